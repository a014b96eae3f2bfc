//! Hot-patch catalog configuration.

use serde::{Deserialize, Serialize};

/// Where the hot-patch definition catalog is fetched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    /// Path to a JSON catalog, or an `http(s)://` URL serving one.
    #[serde(default)]
    pub source: Option<String>,
    /// Fetch the catalog once during startup.
    #[serde(default = "default_true")]
    pub fetch_on_start: bool,
}

impl PatchConfig {
    /// Returns whether the configured source is a remote endpoint.
    pub fn is_remote(&self) -> bool {
        self.source
            .as_deref()
            .is_some_and(|s| s.starts_with("http://") || s.starts_with("https://"))
    }
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            source: None,
            fetch_on_start: true,
        }
    }
}

fn default_true() -> bool {
    true
}
