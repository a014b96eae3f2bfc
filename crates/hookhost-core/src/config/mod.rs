//! Host configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section; every field carries a serde default so an empty file is valid.

pub mod logging;
pub mod patches;
pub mod runtime;
pub mod watcher;

use serde::{Deserialize, Serialize};

pub use self::logging::LoggingConfig;
pub use self::patches::PatchConfig;
pub use self::runtime::RuntimeConfig;
pub use self::watcher::WatcherConfig;

use crate::error::AppError;

/// Root host configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// Dispatch, profiling and compile settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Source directory watching.
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Hot-patch catalog source.
    #[serde(default)]
    pub patches: PatchConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HostConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `config/default`, an environment-specific overlay
    /// `config/{env}` and environment variables prefixed with `HOOKHOST__`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        Self::load_from("config/default", env)
    }

    /// Load configuration with an explicit base file (without extension).
    pub fn load_from(base: &str, env: &str) -> Result<Self, AppError> {
        let overlay = match base.rsplit_once('/') {
            Some((dir, _)) => format!("{dir}/{env}"),
            None => env.to_string(),
        };

        let config = config::Config::builder()
            .add_source(config::File::with_name(base).required(false))
            .add_source(config::File::with_name(&overlay).required(false))
            .add_source(
                config::Environment::with_prefix("HOOKHOST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files_yield_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path().join("default");
        let config = HostConfig::load_from(base.to_str().expect("utf8"), "test").expect("load");
        assert_eq!(config.watcher.debounce_ms, 250);
        assert_eq!(config.runtime.protocol, "1");
        assert!(config.runtime.profiling);
        assert_eq!(config.watcher.extensions, vec!["toml".to_string()]);
    }

    #[test]
    fn test_overlay_overrides_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("default.toml"),
            "[watcher]\ndebounce_ms = 500\nrecursive = false\n",
        )
        .expect("write default");
        std::fs::write(
            dir.path().join("staging.toml"),
            "[watcher]\ndebounce_ms = 100\n[runtime]\nprotocol = \"2577\"\n",
        )
        .expect("write overlay");

        let base = dir.path().join("default");
        let config =
            HostConfig::load_from(base.to_str().expect("utf8"), "staging").expect("load");
        assert_eq!(config.watcher.debounce_ms, 100);
        assert!(!config.watcher.recursive);
        assert_eq!(config.runtime.protocol, "2577");
    }
}
