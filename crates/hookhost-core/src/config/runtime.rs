//! Runtime configuration: dispatch profiling, compile budget, host protocol.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the hook runtime itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum wall-clock time a single compile may take, in milliseconds.
    #[serde(default = "default_compile_timeout")]
    pub compile_timeout_ms: u64,
    /// Whether hook invocations are profiled (fire count, time, memory).
    #[serde(default = "default_true")]
    pub profiling: bool,
    /// Host protocol string; hot-patch definitions for other protocols are rejected.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Interval between host ticks, in milliseconds.
    #[serde(default = "default_tick_rate")]
    pub tick_rate_ms: u64,
}

impl RuntimeConfig {
    /// Compile budget as a [`Duration`].
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    /// Tick interval as a [`Duration`].
    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms.max(1))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            compile_timeout_ms: default_compile_timeout(),
            profiling: true,
            protocol: default_protocol(),
            tick_rate_ms: default_tick_rate(),
        }
    }
}

fn default_compile_timeout() -> u64 {
    10_000
}

fn default_protocol() -> String {
    "1".to_string()
}

fn default_tick_rate() -> u64 {
    50
}

fn default_true() -> bool {
    true
}
