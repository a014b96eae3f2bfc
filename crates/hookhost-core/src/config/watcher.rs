//! Change processor configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Source directory watching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Whether the change processor is started at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory containing unit sources.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// Quiet period after the last change event before a load is queued.
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
    /// Poll interval used by the polling watcher.
    #[serde(default = "default_scan_rate")]
    pub scan_rate_ms: u64,
    /// Watch sub-directories as well as the top level.
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// Use the polling watcher instead of the platform notifier.
    #[serde(default)]
    pub poll: bool,
    /// File extensions treated as unit sources.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl WatcherConfig {
    /// Debounce window as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Poll interval as a [`Duration`].
    pub fn scan_rate(&self) -> Duration {
        Duration::from_millis(self.scan_rate_ms.max(1))
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_directory(),
            debounce_ms: default_debounce(),
            scan_rate_ms: default_scan_rate(),
            recursive: true,
            poll: false,
            extensions: default_extensions(),
        }
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from("./units")
}

fn default_debounce() -> u64 {
    250
}

fn default_scan_rate() -> u64 {
    1_000
}

fn default_extensions() -> Vec<String> {
    vec!["toml".to_string()]
}

fn default_true() -> bool {
    true
}
