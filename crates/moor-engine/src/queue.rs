//! Per-session prompt queue.
//!
//! Holds the identifiers of interactions waiting for dispatch, in FIFO
//! order. Only identifiers live here; interaction content stays in the
//! store. The engine enforces single-flight above this structure, so the
//! queue itself is a plain deque with positional reordering.

use std::collections::VecDeque;

use moor_core::ids::InteractionId;

/// FIFO of interactions waiting for their turn on the wire.
#[derive(Debug, Default)]
pub struct PromptQueue {
    entries: VecDeque<InteractionId>,
}

impl PromptQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interaction at the tail.
    pub fn push_back(&mut self, id: InteractionId) {
        self.entries.push_back(id);
    }

    /// Put an interaction back at the head (failed dispatch, retried next).
    pub fn push_front(&mut self, id: InteractionId) {
        self.entries.push_front(id);
    }

    /// Take the next interaction to dispatch.
    pub fn pop_front(&mut self) -> Option<InteractionId> {
        self.entries.pop_front()
    }

    /// Remove a specific interaction wherever it sits. Returns `true` if
    /// it was present.
    pub fn remove(&mut self, id: &InteractionId) -> bool {
        if let Some(pos) = self.entries.iter().position(|e| e == id) {
            let _ = self.entries.remove(pos);
            return true;
        }
        false
    }

    /// Move an interaction to `position` (clamped to the tail). Returns
    /// `false` if the interaction is not queued.
    pub fn move_to(&mut self, id: &InteractionId, position: usize) -> bool {
        let Some(current) = self.entries.iter().position(|e| e == id) else {
            return false;
        };
        let Some(entry) = self.entries.remove(current) else {
            return false;
        };
        let target = position.min(self.entries.len());
        self.entries.insert(target, entry);
        true
    }

    /// Number of queued interactions.
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue contents in dispatch order.
    pub fn snapshot(&self) -> Vec<InteractionId> {
        self.entries.iter().cloned().collect()
    }

    /// Drop everything (session close).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> InteractionId {
        InteractionId::from_raw(raw)
    }

    fn queue_of(raws: &[&str]) -> PromptQueue {
        let mut queue = PromptQueue::new();
        for raw in raws {
            queue.push_back(id(raw));
        }
        queue
    }

    #[test]
    fn fifo_order() {
        let mut queue = queue_of(&["itx_1", "itx_2", "itx_3"]);
        assert_eq!(queue.pop_front(), Some(id("itx_1")));
        assert_eq!(queue.pop_front(), Some(id("itx_2")));
        assert_eq!(queue.pop_front(), Some(id("itx_3")));
        assert_eq!(queue.pop_front(), None);
    }

    #[test]
    fn push_front_retries_first() {
        let mut queue = queue_of(&["itx_2"]);
        queue.push_front(id("itx_1"));
        assert_eq!(queue.pop_front(), Some(id("itx_1")));
    }

    #[test]
    fn remove_by_id() {
        let mut queue = queue_of(&["itx_1", "itx_2", "itx_3"]);
        assert!(queue.remove(&id("itx_2")));
        assert!(!queue.remove(&id("itx_2")));
        assert_eq!(queue.snapshot(), vec![id("itx_1"), id("itx_3")]);
    }

    #[test]
    fn move_to_front() {
        let mut queue = queue_of(&["itx_1", "itx_2", "itx_3"]);
        assert!(queue.move_to(&id("itx_3"), 0));
        assert_eq!(queue.snapshot(), vec![id("itx_3"), id("itx_1"), id("itx_2")]);
    }

    #[test]
    fn move_to_clamps_past_tail() {
        let mut queue = queue_of(&["itx_1", "itx_2", "itx_3"]);
        assert!(queue.move_to(&id("itx_1"), 99));
        assert_eq!(queue.snapshot(), vec![id("itx_2"), id("itx_3"), id("itx_1")]);
    }

    #[test]
    fn move_unknown_id_fails() {
        let mut queue = queue_of(&["itx_1"]);
        assert!(!queue.move_to(&id("itx_ghost"), 0));
    }

    #[test]
    fn clear_empties_queue() {
        let mut queue = queue_of(&["itx_1", "itx_2"]);
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.depth(), 0);
    }
}
