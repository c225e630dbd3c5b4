//! # moor-settings
//!
//! Configuration management with layered sources for the Moor orchestrator.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`MoorSettings::default()`]
//! 2. **User file**: `~/.moor/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `MOOR_*` overrides (highest priority)
//!
//! The global singleton is reloadable: operators can rewrite the settings
//! file and call [`reload_settings_from_path`] to swap the cached value so
//! all subsequent [`get_settings`] calls return fresh data.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::path::Path;
use std::sync::{Arc, RwLock};

/// Global settings singleton.
///
/// `RwLock<Option<Arc<MoorSettings>>>` rather than `OnceLock` so the cached
/// value can be swapped on reload. Reads are cheap (shared lock +
/// `Arc::clone`); writes only happen on reload, which is rare.
static SETTINGS: RwLock<Option<Arc<MoorSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// On first call, loads from disk with env overrides; afterwards, returns
/// the cached value. Load failures fall back to compiled defaults. Returns
/// an `Arc` so callers hold a consistent snapshot even across a concurrent
/// reload.
pub fn get_settings() -> Arc<MoorSettings> {
    {
        let guard = SETTINGS.read().expect("settings lock poisoned");
        if let Some(ref s) = *guard {
            return Arc::clone(s);
        }
    }

    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    // Double-check after acquiring write lock
    if let Some(ref s) = *guard {
        return Arc::clone(s);
    }

    let settings = Arc::new(match load_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            MoorSettings::default()
        }
    });
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Initialize the global settings with a specific value.
///
/// Replaces any previously cached settings. Useful for tests and server
/// startup where the settings are already resolved.
pub fn init_settings(settings: MoorSettings) {
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    *guard = Some(Arc::new(settings));
}

/// Reload settings from a specific file path and swap the global cache.
pub fn reload_settings_from_path(path: &Path) {
    let new = Arc::new(match load_settings_from_path(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, ?path, "failed to reload settings, falling back to defaults");
            MoorSettings::default()
        }
    });
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    *guard = Some(new);
    tracing::info!(?path, "settings reloaded from disk");
}

#[cfg(test)]
pub(crate) fn reset_settings() {
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    *guard = None;
}
