//! Settings schema with compiled defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MoorSettings {
    /// Schema version.
    pub version: String,
    /// HTTP/WebSocket server settings.
    pub server: ServerSettings,
    /// Synchronization engine settings.
    pub sync: SyncSettings,
}

impl Default for MoorSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            sync: SyncSettings::default(),
        }
    }
}

/// Server listen settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    /// Bind address for the combined HTTP + WebSocket listener.
    pub bind_addr: String,
    /// Path of the agent WebSocket endpoint.
    pub ws_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8090".to_string(),
            ws_path: "/ws/agent".to_string(),
        }
    }
}

/// Synchronization engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    /// Seconds an in-flight instruction may wait for its completion before
    /// the timeout supervisor force-completes it.
    pub request_timeout_secs: u64,
    /// Whether `interrupt` dispatches may bypass the single-flight queue.
    pub allow_interrupt: bool,
    /// Whether completions lacking a request id may fall back to resolution
    /// by session. Disable once all runtimes echo request ids reliably.
    pub fallback_resolution: bool,
    /// Seconds to hold outbound commands for a connected-but-not-ready
    /// agent before flushing anyway.
    pub ready_grace_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 300,
            allow_interrupt: true,
            fallback_resolution: true,
            ready_grace_secs: 60,
        }
    }
}

impl SyncSettings {
    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Readiness grace period as a [`Duration`].
    pub fn ready_grace(&self) -> Duration {
        Duration::from_secs(self.ready_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = MoorSettings::default();
        assert_eq!(settings.version, "0.1.0");
        assert_eq!(settings.server.bind_addr, "127.0.0.1:8090");
        assert_eq!(settings.server.ws_path, "/ws/agent");
        assert_eq!(settings.sync.request_timeout_secs, 300);
        assert!(settings.sync.allow_interrupt);
        assert!(settings.sync.fallback_resolution);
        assert_eq!(settings.sync.ready_grace_secs, 60);
    }

    #[test]
    fn durations_derive_from_seconds() {
        let sync = SyncSettings::default();
        assert_eq!(sync.request_timeout(), Duration::from_secs(300));
        assert_eq!(sync.ready_grace(), Duration::from_secs(60));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: MoorSettings =
            serde_json::from_str(r#"{"sync":{"requestTimeoutSecs":30}}"#).unwrap();
        assert_eq!(settings.sync.request_timeout_secs, 30);
        // Unspecified fields keep defaults
        assert!(settings.sync.allow_interrupt);
        assert_eq!(settings.server.bind_addr, "127.0.0.1:8090");
    }

    #[test]
    fn camel_case_field_names() {
        let json = serde_json::to_value(MoorSettings::default()).unwrap();
        assert!(json["sync"]["requestTimeoutSecs"].is_number());
        assert!(json["sync"]["fallbackResolution"].is_boolean());
        assert!(json["server"]["bindAddr"].is_string());
    }
}
