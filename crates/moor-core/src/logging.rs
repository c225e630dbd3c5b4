//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the global tracing subscriber.
///
/// Filter resolution order: `MOOR_LOG` env var, then `RUST_LOG`, then the
/// provided default directive. When `json` is set, events are emitted as
/// one JSON object per line for log shippers.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_logging(default_directive: &str, json: bool) {
    let filter = std::env::var("MOOR_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_directive.to_string());
    let filter = EnvFilter::try_new(filter)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
    // Already initialized (tests, embedded use): keep the existing one.
    drop(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_does_not_panic() {
        init_logging("info", false);
        init_logging("debug", true);
    }
}
