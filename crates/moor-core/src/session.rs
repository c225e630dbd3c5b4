//! Session and interaction domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ContextId, InteractionId, MessageId, SessionId};

/// Response recorded on an interaction whose request timed out.
///
/// User-facing views must render this as a failed, retryable turn.
pub const NO_RESPONSE_SENTINEL: &str = "[no response received from agent]";

/// Lifecycle of one instruction/response pair.
///
/// ```text
/// pending ──dispatch──▶ sent ──first partial──▶ streaming
///    │                    │                        │
///    │                    ├──completion──▶ complete ◀┘
///    │                    └──timeout────▶ timed_out
/// ```
///
/// `complete` and `timed_out` are terminal. At most one interaction per
/// session is in `sent` or `streaming` at a time (single-flight), except
/// momentarily during an explicit interrupt dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    /// Enqueued, not yet dispatched.
    Pending,
    /// Dispatched to the runtime, awaiting any response.
    Sent,
    /// At least one partial content update received.
    Streaming,
    /// Completion event received. Terminal.
    Complete,
    /// Timeout supervisor fired before any completion. Terminal.
    TimedOut,
}

impl InteractionState {
    /// Whether the state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::TimedOut)
    }

    /// Whether the interaction is awaiting a completion (in flight).
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Sent | Self::Streaming)
    }

    /// Stable string form used in storage and status payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Streaming => "streaming",
            Self::Complete => "complete",
            Self::TimedOut => "timed_out",
        }
    }

    /// Parse the stable string form. Returns `None` for unknown values.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "streaming" => Some(Self::Streaming),
            "complete" => Some(Self::Complete),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }
}

/// Orchestrator-side conversation.
///
/// Owned exclusively by the orchestrator and mutated only through the
/// engine's public operations. The context link, once established, is
/// immutable for the session's lifetime (barring a privileged relink).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier.
    pub id: SessionId,
    /// Human-readable name.
    pub name: String,
    /// Linked remote context, nullable until first contact.
    pub context_id: Option<ContextId>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated: DateTime<Utc>,
}

impl Session {
    /// Construct a new unlinked session.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(),
            name: name.into(),
            context_id: None,
            created: now,
            updated: now,
        }
    }
}

/// One user instruction and its eventual response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    /// Unique identifier.
    pub id: InteractionId,
    /// Owning session.
    pub session_id: SessionId,
    /// Instruction text as dispatched.
    pub prompt: String,
    /// Accumulated response text (partial while streaming, final once
    /// terminal, sentinel on timeout).
    pub response: String,
    /// Current lifecycle state.
    pub state: InteractionState,
    /// Most recent runtime message id applied to the response. Used to tell
    /// cumulative re-snapshots of one message from new distinct messages.
    pub last_message_id: Option<MessageId>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated: DateTime<Utc>,
    /// Set when the interaction reaches a terminal state.
    pub completed: Option<DateTime<Utc>>,
}

impl Interaction {
    /// Construct a new `pending` interaction for a session.
    pub fn new(session_id: SessionId, prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: InteractionId::generate(),
            session_id,
            prompt: prompt.into(),
            response: String::new(),
            state: InteractionState::Pending,
            last_message_id: None,
            created: now,
            updated: now,
            completed: None,
        }
    }
}
