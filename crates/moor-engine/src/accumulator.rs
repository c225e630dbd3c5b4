//! Streaming response accumulator.
//!
//! The remote runtime streams cumulative snapshots: each partial carries
//! the *entire* content produced so far under its message id, not a delta.
//! Re-applying a snapshot is therefore a no-op, which makes redelivered
//! partials harmless. A new message id opens a new segment; the final text
//! is the segments joined with a blank line.

/// Ordered segments of an in-progress response, keyed by message id.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    segments: Vec<(String, String)>,
}

/// Separator between message segments in the finalized text.
const SEGMENT_JOIN: &str = "\n\n";

impl ResponseAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a cumulative snapshot. Content for a known message id
    /// replaces that segment; an unseen id appends a new segment.
    /// Returns `true` if the visible text changed.
    pub fn apply(&mut self, message_id: &str, content: &str) -> bool {
        if let Some(segment) = self.segments.iter_mut().find(|(id, _)| id == message_id) {
            if segment.1 == content {
                return false;
            }
            segment.1 = content.to_owned();
            return true;
        }
        self.segments.push((message_id.to_owned(), content.to_owned()));
        true
    }

    /// The id of the most recently opened segment, if any.
    pub fn last_message_id(&self) -> Option<&str> {
        self.segments.last().map(|(id, _)| id.as_str())
    }

    /// Current assembled text.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|(_, content)| content.as_str())
            .collect::<Vec<_>>()
            .join(SEGMENT_JOIN)
    }

    /// Whether no content has been received.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Consume the accumulated content, leaving the accumulator empty.
    /// Returns `None` if nothing was ever received.
    pub fn finalize(&mut self) -> Option<String> {
        if self.segments.is_empty() {
            return None;
        }
        let text = self.text();
        self.segments.clear();
        Some(text)
    }

    /// Discard any accumulated content (new dispatch starting).
    pub fn clear(&mut self) {
        self.segments.clear();
    }
}
