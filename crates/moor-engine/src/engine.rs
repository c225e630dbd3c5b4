//! The synchronization engine facade.
//!
//! [`SyncEngine`] owns all protocol state and is the only entry point for
//! both directions of traffic: HTTP handlers call `enqueue`, `reorder`,
//! `status` and friends; the transport layer feeds every inbound runtime
//! event through `handle_event`. Internally it composes the context
//! registry, request correlator, per-session queues and accumulators, and
//! the timeout supervisor.
//!
//! ## Locking
//!
//! Each session has its own `parking_lot::Mutex<SessionState>`; the outer
//! map lock is held only to fetch the per-session `Arc`. The correlator's
//! internal lock is never held while a session lock is taken. Session
//! locks are held across store writes and router dispatch, which are both
//! synchronous and short.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use moor_core::ids::{ContextId, InteractionId, RequestId, SessionId};
use moor_core::protocol::{AgentCommand, AgentEvent};
use moor_core::session::{Interaction, InteractionState, NO_RESPONSE_SENTINEL, Session};
use moor_settings::SyncSettings;
use moor_store::SessionStore;

use crate::accumulator::ResponseAccumulator;
use crate::correlator::{PendingRequest, RequestCorrelator};
use crate::errors::{EngineError, Result};
use crate::queue::PromptQueue;
use crate::registry::ContextRegistry;
use crate::router::InstructionRouter;
use crate::timeout::TimeoutSupervisor;

/// Engine tunables, snapshotted from settings at construction.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long a dispatched instruction may go unanswered.
    pub request_timeout: Duration,
    /// Whether `enqueue` with `interrupt` is permitted.
    pub allow_interrupt: bool,
    /// Whether completions without a request id resolve against the
    /// session's most recent pending request.
    pub fallback_resolution: bool,
}

impl From<&SyncSettings> for SyncConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            request_timeout: settings.request_timeout(),
            allow_interrupt: settings.allow_interrupt,
            fallback_resolution: settings.fallback_resolution,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

/// How a pending request ended.
enum Outcome {
    Completed,
    TimedOut,
}

struct InFlight {
    request_id: RequestId,
    interaction_id: InteractionId,
}

/// Mutable per-session protocol state. Everything here is in-memory;
/// interactions themselves live in the store.
struct SessionState {
    queue: PromptQueue,
    in_flight: Option<InFlight>,
    accumulator: ResponseAccumulator,
    closed: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            queue: PromptQueue::new(),
            in_flight: None,
            accumulator: ResponseAccumulator::new(),
            closed: false,
        }
    }
}

/// Point-in-time view of a session for status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Session identifier.
    pub session_id: SessionId,
    /// Human-readable session name.
    pub name: String,
    /// Linked context, if established.
    pub context_id: Option<ContextId>,
    /// The in-flight interaction, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_interaction: Option<InteractionId>,
    /// State of the in-flight interaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_state: Option<InteractionState>,
    /// Response text accumulated so far for the in-flight interaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming_response: Option<String>,
    /// Interactions waiting behind the current one, in dispatch order.
    pub queued: Vec<InteractionId>,
    /// Whether the session has been closed.
    pub closed: bool,
}

/// Session/context synchronization engine.
pub struct SyncEngine {
    store: Arc<SessionStore>,
    router: Arc<dyn InstructionRouter>,
    config: SyncConfig,
    registry: ContextRegistry,
    correlator: RequestCorrelator,
    supervisor: TimeoutSupervisor,
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<SessionState>>>>,
}

impl SyncEngine {
    /// Build an engine over a migrated store, rebuilding the context
    /// registry from persisted session links.
    pub fn new(
        store: Arc<SessionStore>,
        router: Arc<dyn InstructionRouter>,
        config: SyncConfig,
    ) -> Result<Arc<Self>> {
        let registry = ContextRegistry::new();
        let restored = registry.load(store.linked_sessions()?);
        if restored > 0 {
            info!(restored, "context registry rebuilt from store");
        }
        Ok(Arc::new(Self {
            store,
            router,
            config,
            registry,
            correlator: RequestCorrelator::new(),
            supervisor: TimeoutSupervisor::new(),
            sessions: Mutex::new(HashMap::new()),
        }))
    }

    /// Cancel all outstanding timeout timers. Call once at shutdown.
    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }

    /// The underlying store, for read paths that bypass protocol state
    /// (listing sessions and transcripts).
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    // ── Session lifecycle ───────────────────────────────────────────────

    /// Create and persist a new session.
    #[instrument(skip(self))]
    pub fn create_session(&self, name: &str) -> Result<Session> {
        let session = Session::new(name);
        self.store.create_session(&session)?;
        let _ = self
            .sessions
            .lock()
            .insert(session.id.clone(), Arc::new(Mutex::new(SessionState::new())));
        info!(session_id = %session.id, "session created");
        Ok(session)
    }

    /// Close a session: drop its queue, cancel correlation for its
    /// pending requests, and unlink its context. Closed sessions reject
    /// further instructions.
    #[instrument(skip(self))]
    pub fn close_session(&self, session_id: &SessionId) -> Result<()> {
        let state = self.session_state(session_id)?;
        {
            let mut state = state.lock();
            state.closed = true;
            state.queue.clear();
            state.in_flight = None;
            state.accumulator.clear();
        }
        Self::record_queue_depth(session_id, 0);
        // Removing the pending entries makes any still-armed timers and
        // late completions find nothing to claim.
        for pending in self.correlator.remove_session(session_id) {
            self.mark_abandoned(&pending);
        }
        self.registry.unlink_session(session_id);
        // The state entry stays in the map with `closed` set; dropping it
        // would let the lazy loader resurrect the session as open.
        info!(session_id = %session_id, "session closed");
        Ok(())
    }

    /// Snapshot a session's protocol state.
    pub fn status(&self, session_id: &SessionId) -> Result<SessionStatus> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;
        let state = self.session_state(session_id)?;
        let state = state.lock();

        let (current_interaction, streaming_response) = match &state.in_flight {
            Some(in_flight) => {
                let text = state.accumulator.text();
                (
                    Some(in_flight.interaction_id.clone()),
                    if text.is_empty() { None } else { Some(text) },
                )
            }
            None => (None, None),
        };
        let current_state = match &current_interaction {
            Some(id) => self.store.get_interaction(id)?.map(|i| i.state),
            None => None,
        };

        Ok(SessionStatus {
            session_id: session.id,
            name: session.name,
            context_id: self.registry.resolve_context(session_id).or(session.context_id),
            current_interaction,
            current_state,
            streaming_response,
            queued: state.queue.snapshot(),
            closed: state.closed,
        })
    }

    // ── Outbound path ───────────────────────────────────────────────────

    /// Accept an instruction for a session.
    ///
    /// Dispatches immediately if the session is idle and routable,
    /// otherwise queues. With `interrupt` set, dispatches even while a
    /// request is in flight; the superseded request is left to resolve by
    /// completion or timeout on its own.
    #[instrument(skip(self, prompt), fields(session_id = %session_id, interrupt))]
    pub fn enqueue(
        self: &Arc<Self>,
        session_id: &SessionId,
        prompt: &str,
        interrupt: bool,
    ) -> Result<Interaction> {
        if interrupt && !self.config.allow_interrupt {
            return Err(EngineError::InterruptDisabled);
        }
        let state = self.session_state(session_id)?;
        let mut state = state.lock();
        if state.closed {
            return Err(EngineError::SessionClosed(session_id.clone()));
        }

        let mut interaction = Interaction::new(session_id.clone(), prompt);
        self.store.create_interaction(&interaction)?;

        let busy = state.in_flight.is_some() || !state.queue.is_empty();
        if busy && !interrupt {
            state.queue.push_back(interaction.id.clone());
            Self::record_queue_depth(session_id, state.queue.depth());
            debug!(interaction_id = %interaction.id, depth = state.queue.depth(), "queued");
            return Ok(interaction);
        }

        match self.dispatch(&mut state, &mut interaction) {
            Ok(()) => Ok(interaction),
            Err(EngineError::NoRoute(_)) => {
                // No agent yet. Keep the instruction at the head; the
                // readiness signal will retry it.
                state.queue.push_front(interaction.id.clone());
                Self::record_queue_depth(session_id, state.queue.depth());
                debug!(interaction_id = %interaction.id, "no route, holding at queue head");
                Ok(interaction)
            }
            Err(e) => Err(e),
        }
    }

    /// Move a queued interaction to `position` in its session's queue.
    /// Returns the new queue order.
    #[instrument(skip(self))]
    pub fn reorder(
        &self,
        session_id: &SessionId,
        interaction_id: &InteractionId,
        position: usize,
    ) -> Result<Vec<InteractionId>> {
        let state = self.session_state(session_id)?;
        let mut state = state.lock();
        if !state.queue.move_to(interaction_id, position) {
            return Err(EngineError::InteractionNotFound(interaction_id.clone()));
        }
        Ok(state.queue.snapshot())
    }

    /// A route to the session's agent became available (connection
    /// registered or agent reported ready). Dispatch the next queued
    /// instruction if the session is idle.
    pub fn on_route_ready(self: &Arc<Self>, session_id: &SessionId) -> Result<()> {
        let state = self.session_state(session_id)?;
        let mut state = state.lock();
        self.advance_locked(session_id, &mut state)
    }

    // ── Inbound path ────────────────────────────────────────────────────

    /// Process one event from a remote runtime. Never fails on protocol
    /// noise: unknown events, duplicate completions, and partials with no
    /// in-flight interaction are logged and dropped.
    pub fn handle_event(self: &Arc<Self>, event: AgentEvent) -> Result<()> {
        debug!(kind = event.kind(), session_id = ?event.session_id(), "event");
        match event {
            AgentEvent::ContextCreated {
                session_id,
                context_id,
            } => {
                let _ = self.link_context(&session_id, &context_id)?;
                Ok(())
            }
            AgentEvent::PartialUpdate {
                session_id,
                message_id,
                content,
            } => self.apply_partial(&session_id, message_id.as_str(), &content),
            AgentEvent::Completion {
                session_id,
                request_id,
                ..
            } => match request_id {
                Some(request_id) => self.resolve_by_request(&request_id),
                None if self.config.fallback_resolution => self.resolve_by_session(&session_id),
                None => {
                    warn!(session_id = %session_id, "untagged completion dropped, fallback disabled");
                    Ok(())
                }
            },
            AgentEvent::AgentReady { session_id } => self.on_route_ready(&session_id),
            AgentEvent::Ping | AgentEvent::Unknown => Ok(()),
        }
    }

    /// Bind a context to a session and persist the link. Returns `true`
    /// if the binding is new.
    pub fn link_context(&self, session_id: &SessionId, context_id: &ContextId) -> Result<bool> {
        let newly = self.registry.link(session_id, context_id)?;
        if newly {
            self.store.set_context(session_id, context_id)?;
        }
        Ok(newly)
    }

    /// Forcibly rebind a session to a different context. Administrative.
    pub fn relink_context(&self, session_id: &SessionId, context_id: &ContextId) -> Result<()> {
        self.registry.relink(session_id, context_id);
        Ok(self.store.set_context(session_id, context_id)?)
    }

    /// Context currently linked to a session, if any.
    pub fn resolve_context(&self, session_id: &SessionId) -> Option<ContextId> {
        self.registry.resolve_context(session_id)
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn session_state(&self, session_id: &SessionId) -> Result<Arc<Mutex<SessionState>>> {
        if let Some(state) = self.sessions.lock().get(session_id) {
            return Ok(Arc::clone(state));
        }
        // Known to the store but not yet in memory: restarted process.
        if self.store.get_session(session_id)?.is_none() {
            return Err(EngineError::SessionNotFound(session_id.clone()));
        }
        let mut sessions = self.sessions.lock();
        let state = sessions
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::new())));
        Ok(Arc::clone(state))
    }

    /// Send one instruction. On success the interaction is `sent`, the
    /// request is registered with the correlator, and a timeout timer is
    /// armed. On `NoRoute` the correlator entry is withdrawn and nothing
    /// is persisted.
    fn dispatch(
        self: &Arc<Self>,
        state: &mut SessionState,
        interaction: &mut Interaction,
    ) -> Result<()> {
        let request_id = RequestId::generate();
        let _ = self.correlator.begin(
            request_id.clone(),
            interaction.session_id.clone(),
            interaction.id.clone(),
            self.config.request_timeout,
        );

        let command = AgentCommand::Instruction {
            session_id: interaction.session_id.clone(),
            context_id: self.registry.resolve_context(&interaction.session_id),
            request_id: request_id.clone(),
            content: interaction.prompt.clone(),
        };
        if let Err(e) = self.router.dispatch(&command) {
            let _ = self.correlator.take(&request_id);
            return Err(e);
        }

        interaction.state = InteractionState::Sent;
        interaction.updated = Utc::now();
        self.store.update_interaction(interaction)?;

        state.in_flight = Some(InFlight {
            request_id: request_id.clone(),
            interaction_id: interaction.id.clone(),
        });
        state.accumulator.clear();

        let engine: Weak<Self> = Arc::downgrade(self);
        let timer_request = request_id.clone();
        self.supervisor
            .schedule(self.config.request_timeout, move || {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                if let Err(e) = engine.resolve_timeout(&timer_request) {
                    warn!(request_id = %timer_request, error = %e, "timeout resolution failed");
                }
            });

        metrics::counter!("moor_instructions_dispatched_total").increment(1);
        info!(
            session_id = %interaction.session_id,
            interaction_id = %interaction.id,
            request_id = %request_id,
            "instruction dispatched"
        );
        Ok(())
    }

    /// Apply a cumulative partial snapshot to the in-flight interaction.
    fn apply_partial(&self, session_id: &SessionId, message_id: &str, content: &str) -> Result<()> {
        let state = self.session_state(session_id)?;
        let mut state = state.lock();
        let Some(in_flight) = &state.in_flight else {
            debug!(session_id = %session_id, "partial with no in-flight interaction dropped");
            return Ok(());
        };
        let interaction_id = in_flight.interaction_id.clone();
        if !state.accumulator.apply(message_id, content) {
            return Ok(());
        }

        let Some(mut interaction) = self.store.get_interaction(&interaction_id)? else {
            warn!(interaction_id = %interaction_id, "in-flight interaction missing from store");
            return Ok(());
        };
        if interaction.state == InteractionState::Sent {
            interaction.state = InteractionState::Streaming;
        }
        interaction.response = state.accumulator.text();
        interaction.last_message_id = state
            .accumulator
            .last_message_id()
            .map(moor_core::ids::MessageId::from_raw);
        interaction.updated = Utc::now();
        self.store.update_interaction(&interaction)?;
        Ok(())
    }

    /// Resolve a completion that carries its correlation token.
    fn resolve_by_request(self: &Arc<Self>, request_id: &RequestId) -> Result<()> {
        let Some(pending) = self.correlator.take(request_id) else {
            // Already resolved by timeout or an earlier duplicate.
            metrics::counter!("moor_duplicate_completions_total").increment(1);
            debug!(request_id = %request_id, "duplicate completion ignored");
            return Ok(());
        };
        self.finish(&pending, Outcome::Completed)
    }

    /// Resolve an untagged completion against the session's most recent
    /// pending request.
    fn resolve_by_session(self: &Arc<Self>, session_id: &SessionId) -> Result<()> {
        let Some(pending) = self.correlator.take_latest_for_session(session_id) else {
            metrics::counter!("moor_fallback_misses_total").increment(1);
            warn!(session_id = %session_id, "untagged completion with nothing pending");
            return Ok(());
        };
        metrics::counter!("moor_fallback_resolutions_total").increment(1);
        debug!(session_id = %session_id, request_id = %pending.request_id, "fallback resolution");
        self.finish(&pending, Outcome::Completed)
    }

    /// Timer callback: mark the request timed out unless a completion won
    /// the race.
    fn resolve_timeout(self: &Arc<Self>, request_id: &RequestId) -> Result<()> {
        let Some(pending) = self.correlator.take(request_id) else {
            return Ok(());
        };
        warn!(
            session_id = %pending.session_id,
            interaction_id = %pending.interaction_id,
            request_id = %request_id,
            "request timed out"
        );
        self.finish(&pending, Outcome::TimedOut)
    }

    /// Common terminal path for completion and timeout. The caller has
    /// already claimed the pending entry, so this runs at most once per
    /// request.
    fn finish(self: &Arc<Self>, pending: &PendingRequest, outcome: Outcome) -> Result<()> {
        let state = match self.session_state(&pending.session_id) {
            Ok(state) => state,
            Err(EngineError::SessionNotFound(_)) => {
                // Session deleted while the request was in flight.
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let mut state = state.lock();

        // Only the request currently marked in flight releases the slot;
        // a superseded (interrupted) request resolving late does not.
        let streamed = if state
            .in_flight
            .as_ref()
            .is_some_and(|f| f.request_id == pending.request_id)
        {
            state.in_flight = None;
            state.accumulator.finalize()
        } else {
            None
        };

        let Some(mut interaction) = self.store.get_interaction(&pending.interaction_id)? else {
            warn!(interaction_id = %pending.interaction_id, "resolved interaction missing from store");
            return self.advance_locked(&pending.session_id, &mut state);
        };
        if let Some(text) = streamed {
            interaction.response = text;
        }
        let now = Utc::now();
        match outcome {
            Outcome::Completed => {
                interaction.state = InteractionState::Complete;
                metrics::counter!("moor_interactions_completed_total").increment(1);
            }
            Outcome::TimedOut => {
                interaction.state = InteractionState::TimedOut;
                if interaction.response.is_empty() {
                    interaction.response = NO_RESPONSE_SENTINEL.to_owned();
                }
                metrics::counter!("moor_interactions_timed_out_total").increment(1);
            }
        }
        interaction.updated = now;
        interaction.completed = Some(now);
        self.store.update_interaction(&interaction)?;
        info!(
            session_id = %pending.session_id,
            interaction_id = %interaction.id,
            state = interaction.state.as_str(),
            "interaction resolved"
        );

        self.advance_locked(&pending.session_id, &mut state)
    }

    /// Dispatch queued instructions until one is in flight, the queue is
    /// empty, or routing fails. Caller holds the session lock.
    fn advance_locked(self: &Arc<Self>, session_id: &SessionId, state: &mut SessionState) -> Result<()> {
        while !state.closed && state.in_flight.is_none() {
            let Some(next) = state.queue.pop_front() else {
                Self::record_queue_depth(session_id, 0);
                return Ok(());
            };
            Self::record_queue_depth(session_id, state.queue.depth());
            let Some(mut interaction) = self.store.get_interaction(&next)? else {
                warn!(interaction_id = %next, "queued interaction missing from store, skipping");
                continue;
            };
            match self.dispatch(state, &mut interaction) {
                Ok(()) => return Ok(()),
                Err(EngineError::NoRoute(_)) => {
                    state.queue.push_front(next);
                    Self::record_queue_depth(session_id, state.queue.depth());
                    debug!(session_id = %session_id, "no route, queue parked");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn record_queue_depth(session_id: &SessionId, depth: usize) {
        metrics::gauge!("moor_queue_depth", "session" => session_id.to_string()).set(depth as f64);
    }

    /// Mark an interaction abandoned by session close.
    fn mark_abandoned(&self, pending: &PendingRequest) {
        let result = (|| -> Result<()> {
            let Some(mut interaction) = self.store.get_interaction(&pending.interaction_id)? else {
                return Ok(());
            };
            if interaction.state.is_terminal() {
                return Ok(());
            }
            let now = Utc::now();
            interaction.state = InteractionState::TimedOut;
            if interaction.response.is_empty() {
                interaction.response = NO_RESPONSE_SENTINEL.to_owned();
            }
            interaction.updated = now;
            interaction.completed = Some(now);
            Ok(self.store.update_interaction(&interaction)?)
        })();
        if let Err(e) = result {
            warn!(interaction_id = %pending.interaction_id, error = %e, "failed to mark abandoned interaction");
        }
    }
}
