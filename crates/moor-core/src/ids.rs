//! Branded identifier newtypes.
//!
//! Sessions and contexts live in two independent state spaces: sessions are
//! minted by the orchestrator, contexts by the remote runtime. Branding the
//! identifiers as distinct types keeps the two spaces from being confused at
//! compile time; a completion lookup keyed on the wrong identifier is
//! exactly the class of bug this prevents.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier string.
            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// The identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

branded_id!(
    /// Orchestrator-side conversation identifier (`ses_` prefix).
    SessionId
);
branded_id!(
    /// Remote-runtime conversation handle. Opaque: minted by the runtime,
    /// reported back exactly once at context creation.
    ContextId
);
branded_id!(
    /// One instruction/response pair within a session (`itx_` prefix).
    InteractionId
);
branded_id!(
    /// Correlation token for a dispatched instruction (`req_` prefix).
    /// Globally unique, orchestrator-generated.
    RequestId
);
branded_id!(
    /// Identifier of one streamed assistant message, minted by the runtime.
    MessageId
);

fn prefixed(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7().simple())
}

impl SessionId {
    /// Mint a new session identifier.
    pub fn generate() -> Self {
        Self(prefixed("ses"))
    }
}

impl InteractionId {
    /// Mint a new interaction identifier.
    pub fn generate() -> Self {
        Self(prefixed("itx"))
    }
}

impl RequestId {
    /// Mint a new request identifier.
    pub fn generate() -> Self {
        Self(prefixed("req"))
    }
}
