//! Request correlator: single source of truth for in-flight requests.
//!
//! Every dispatched instruction registers a [`PendingRequest`] keyed by its
//! request identifier. Resolution is claim-by-removal: whichever path gets
//! to [`RequestCorrelator::take`] first (tagged completion, fallback
//! completion, or timeout) owns the entry, and every later claimant sees
//! `None` and stands down. That one rule gives exactly-once resolution
//! without any extra state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use moor_core::ids::{InteractionId, RequestId, SessionId};

/// An instruction that has been sent and not yet resolved.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Correlation key carried on the outbound instruction.
    pub request_id: RequestId,
    /// Session the instruction belongs to.
    pub session_id: SessionId,
    /// Interaction the response resolves.
    pub interaction_id: InteractionId,
    /// When the instruction was handed to the router.
    pub dispatched_at: Instant,
    /// When the timeout supervisor will fire for it.
    pub deadline: Instant,
    /// Monotonic dispatch ordinal, used to pick the most recent request
    /// for a session when a completion arrives without a request id.
    pub seq: u64,
}

/// In-flight request table. All operations take the internal lock for the
/// duration of a map lookup only; callers never hold it across await
/// points or store calls.
#[derive(Default)]
pub struct RequestCorrelator {
    inner: Mutex<Table>,
}

#[derive(Default)]
struct Table {
    by_request: HashMap<RequestId, PendingRequest>,
    next_seq: u64,
}

impl RequestCorrelator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly dispatched request and return its record.
    pub fn begin(
        &self,
        request_id: RequestId,
        session_id: SessionId,
        interaction_id: InteractionId,
        timeout: Duration,
    ) -> PendingRequest {
        let mut table = self.inner.lock();
        let now = Instant::now();
        let pending = PendingRequest {
            request_id: request_id.clone(),
            session_id,
            interaction_id,
            dispatched_at: now,
            deadline: now + timeout,
            seq: table.next_seq,
        };
        table.next_seq += 1;
        let _ = table.by_request.insert(request_id, pending.clone());
        metrics::gauge!("moor_pending_requests").set(table.by_request.len() as f64);
        pending
    }

    /// Claim the pending request for `request_id`, removing it. Returns
    /// `None` if another resolution path got there first (or the id was
    /// never registered).
    pub fn take(&self, request_id: &RequestId) -> Option<PendingRequest> {
        let mut table = self.inner.lock();
        let taken = table.by_request.remove(request_id);
        if taken.is_some() {
            metrics::gauge!("moor_pending_requests").set(table.by_request.len() as f64);
        }
        taken
    }

    /// Claim the most recently dispatched pending request for a session.
    /// Used when a completion arrives without a request id and fallback
    /// resolution is enabled.
    pub fn take_latest_for_session(&self, session_id: &SessionId) -> Option<PendingRequest> {
        let mut table = self.inner.lock();
        let latest = table
            .by_request
            .values()
            .filter(|p| p.session_id == *session_id)
            .max_by_key(|p| p.seq)
            .map(|p| p.request_id.clone())?;
        let taken = table.by_request.remove(&latest);
        metrics::gauge!("moor_pending_requests").set(table.by_request.len() as f64);
        taken
    }

    /// Drop all pending requests for a session (session close). Returns
    /// the removed records so the caller can mark their interactions.
    pub fn remove_session(&self, session_id: &SessionId) -> Vec<PendingRequest> {
        let mut table = self.inner.lock();
        let ids: Vec<RequestId> = table
            .by_request
            .values()
            .filter(|p| p.session_id == *session_id)
            .map(|p| p.request_id.clone())
            .collect();
        let removed: Vec<PendingRequest> = ids
            .iter()
            .filter_map(|id| table.by_request.remove(id))
            .collect();
        if !removed.is_empty() {
            metrics::gauge!("moor_pending_requests").set(table.by_request.len() as f64);
        }
        removed
    }

    /// Whether a session has any pending request.
    pub fn has_pending(&self, session_id: &SessionId) -> bool {
        self.inner
            .lock()
            .by_request
            .values()
            .any(|p| p.session_id == *session_id)
    }

    /// Total pending requests across all sessions.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().by_request.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlator() -> RequestCorrelator {
        RequestCorrelator::new()
    }

    fn begin(
        c: &RequestCorrelator,
        request: &str,
        session: &str,
        interaction: &str,
    ) -> PendingRequest {
        c.begin(
            RequestId::from_raw(request),
            SessionId::from_raw(session),
            InteractionId::from_raw(interaction),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn take_claims_exactly_once() {
        let c = correlator();
        let pending = begin(&c, "req_1", "ses_1", "itx_1");
        assert_eq!(pending.seq, 0);

        let first = c.take(&RequestId::from_raw("req_1"));
        assert!(first.is_some());
        assert_eq!(first.unwrap().interaction_id.as_str(), "itx_1");

        // Second claimant loses the race.
        assert!(c.take(&RequestId::from_raw("req_1")).is_none());
    }

    #[test]
    fn take_unknown_id_is_none() {
        let c = correlator();
        assert!(c.take(&RequestId::from_raw("req_ghost")).is_none());
    }

    #[test]
    fn take_latest_prefers_most_recent_dispatch() {
        let c = correlator();
        let _ = begin(&c, "req_old", "ses_1", "itx_1");
        let _ = begin(&c, "req_new", "ses_1", "itx_2");
        let _ = begin(&c, "req_other", "ses_2", "itx_3");

        let taken = c.take_latest_for_session(&SessionId::from_raw("ses_1")).unwrap();
        assert_eq!(taken.request_id.as_str(), "req_new");

        // The older one is still claimable, the other session untouched.
        assert!(c.take(&RequestId::from_raw("req_old")).is_some());
        assert!(c.has_pending(&SessionId::from_raw("ses_2")));
    }

    #[test]
    fn take_latest_empty_session_is_none() {
        let c = correlator();
        let _ = begin(&c, "req_1", "ses_1", "itx_1");
        assert!(c.take_latest_for_session(&SessionId::from_raw("ses_2")).is_none());
    }

    #[test]
    fn remove_session_clears_only_that_session() {
        let c = correlator();
        let _ = begin(&c, "req_1", "ses_1", "itx_1");
        let _ = begin(&c, "req_2", "ses_1", "itx_2");
        let _ = begin(&c, "req_3", "ses_2", "itx_3");

        let removed = c.remove_session(&SessionId::from_raw("ses_1"));
        assert_eq!(removed.len(), 2);
        assert!(!c.has_pending(&SessionId::from_raw("ses_1")));
        assert_eq!(c.pending_count(), 1);
    }

    #[test]
    fn seq_is_monotonic_across_sessions() {
        let c = correlator();
        let a = begin(&c, "req_1", "ses_1", "itx_1");
        let b = begin(&c, "req_2", "ses_2", "itx_2");
        assert!(b.seq > a.seq);
    }

    #[test]
    fn deadline_reflects_timeout() {
        let c = correlator();
        let pending = c.begin(
            RequestId::from_raw("req_1"),
            SessionId::from_raw("ses_1"),
            InteractionId::from_raw("itx_1"),
            Duration::from_secs(120),
        );
        assert_eq!(pending.deadline - pending.dispatched_at, Duration::from_secs(120));
    }
}
