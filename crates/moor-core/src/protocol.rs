//! Wire protocol between the orchestrator and remote agent runtimes.
//!
//! One multiplexed duplex channel per runtime instance carries tagged JSON
//! messages in both directions. Every message names the session it belongs
//! to in its payload: routing is by payload content, never by which
//! physical connection a message arrived on, because one connection can host
//! many contexts and a session can be served by different connections across
//! reconnects.

use serde::{Deserialize, Serialize};

use crate::ids::{ContextId, MessageId, RequestId, SessionId};

/// Outbound command to a remote agent runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    /// Dispatch one instruction into the session's context.
    ///
    /// `context_id: None` instructs the runtime to create a new context and
    /// report it back via [`AgentEvent::ContextCreated`].
    Instruction {
        /// Session this instruction belongs to.
        session_id: SessionId,
        /// Linked context, if one has been established.
        context_id: Option<ContextId>,
        /// Correlation token echoed back in the completion event.
        request_id: RequestId,
        /// Instruction text.
        content: String,
    },
}

impl AgentCommand {
    /// The session this command targets.
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Instruction { session_id, .. } => session_id,
        }
    }
}

/// Inbound event from a remote agent runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The runtime created a context for a session. Sent at most once per
    /// context; the orchestrator must link it before any further exchange.
    ContextCreated {
        /// Session the context was created for.
        session_id: SessionId,
        /// The newly minted context handle.
        context_id: ContextId,
    },
    /// Incremental content for the in-flight interaction. `content` is the
    /// cumulative text of the message so far, not a delta.
    PartialUpdate {
        /// Session the update belongs to.
        session_id: SessionId,
        /// Message this snapshot belongs to.
        message_id: MessageId,
        /// Cumulative message content.
        content: String,
    },
    /// The in-flight instruction finished. `request_id` is the preferred
    /// correlation key; its absence triggers session-based fallback
    /// resolution (when enabled).
    Completion {
        /// Session the completion belongs to.
        session_id: SessionId,
        /// Correlation token from the originating dispatch, if echoed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
        /// Final message of the response, if the runtime reports one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
    },
    /// The agent inside the runtime finished loading and can accept
    /// instructions. Held commands are flushed on receipt.
    AgentReady {
        /// Session that became ready.
        session_id: SessionId,
    },
    /// Transport keepalive. Ignored by the engine.
    Ping,
    /// Unrecognized event type. Logged and dropped, never fatal.
    #[serde(other)]
    Unknown,
}

impl AgentEvent {
    /// The session named in the event payload, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::ContextCreated { session_id, .. }
            | Self::PartialUpdate { session_id, .. }
            | Self::Completion { session_id, .. }
            | Self::AgentReady { session_id } => Some(session_id),
            Self::Ping | Self::Unknown => None,
        }
    }

    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContextCreated { .. } => "context_created",
            Self::PartialUpdate { .. } => "partial_update",
            Self::Completion { .. } => "completion",
            Self::AgentReady { .. } => "agent_ready",
            Self::Ping => "ping",
            Self::Unknown => "unknown",
        }
    }
}
