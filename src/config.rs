//! Runtime configuration.
//!
//! The configuration is read exactly once, when the first
//! [`ThreadManager`](crate::manager::ThreadManager) is constructed, and is
//! frozen from then on. Hosts that want non-default settings call
//! [`set_global`] (or [`load_global_toml`]) during startup, before any
//! worker is acquired.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::affinity::Affinity;
use crate::error::{RuntimeError, RuntimeResult};

/// Process-wide runtime settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Pin worker threads to their affinity class at startup.
    pub pin_workers: bool,

    /// Affinity class handed to the first spawned worker; successive spawns
    /// alternate from here. This is a policy knob, not an invariant; see
    /// [`Affinity`].
    pub first_affinity: Affinity,

    /// Thread name used when a worker is spawned through the shared
    /// "current" handle, which has no caller-supplied name.
    pub current_worker_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pin_workers: true,
            first_affinity: Affinity::Odd,
            current_worker_name: "render-worker".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> RuntimeResult<Self> {
        toml::from_str(text).map_err(|e| RuntimeError::InvalidConfig(e.to_string()))
    }
}

struct GlobalConfig {
    config: RuntimeConfig,
    frozen: bool,
}

lazy_static! {
    static ref GLOBAL: RwLock<GlobalConfig> = RwLock::new(GlobalConfig {
        config: RuntimeConfig::default(),
        frozen: false,
    });
}

/// Install the process-wide configuration.
///
/// Fails with [`RuntimeError::AlreadyConfigured`] once any manager has been
/// constructed; managers must all observe the same settings.
pub fn set_global(config: RuntimeConfig) -> RuntimeResult<()> {
    let mut global = GLOBAL.write();
    if global.frozen {
        return Err(RuntimeError::AlreadyConfigured);
    }
    global.config = config;
    Ok(())
}

/// Parse TOML text and install it as the process-wide configuration.
pub fn load_global_toml(text: &str) -> RuntimeResult<()> {
    set_global(RuntimeConfig::from_toml_str(text)?)
}

/// Snapshot the configuration and freeze it against further changes.
pub(crate) fn freeze() -> RuntimeConfig {
    let mut global = GLOBAL.write();
    global.frozen = true;
    global.config.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_android_runtime() {
        let config = RuntimeConfig::default();
        assert!(config.pin_workers);
        assert_eq!(config.first_affinity, Affinity::Odd);
        assert_eq!(config.current_worker_name, "render-worker");
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            pin_workers = false
            first_affinity = "Even"
            "#,
        )
        .expect("valid config");
        assert!(!config.pin_workers);
        assert_eq!(config.first_affinity, Affinity::Even);
        assert_eq!(config.current_worker_name, "render-worker");
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = RuntimeConfig::from_toml_str("pin_workers = \"maybe\"")
            .expect_err("bool field cannot hold a string");
        assert!(matches!(err, RuntimeError::InvalidConfig(_)));
    }

    #[test]
    fn configuration_is_frozen_once_a_manager_exists() {
        use crate::context::WorkerContext;
        use crate::manager::ThreadManager;

        struct FrozenContext;
        impl WorkerContext for FrozenContext {
            fn create() -> Self {
                Self
            }
        }

        let _ = ThreadManager::<FrozenContext>::instance();
        let err = set_global(RuntimeConfig::default())
            .expect_err("managers already observed the configuration");
        assert!(matches!(err, RuntimeError::AlreadyConfigured));
    }
}
