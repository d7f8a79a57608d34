use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const ENV_GPU: &str = "NVD_GPU";
pub const ENV_FIFO_LENGTH: &str = "NVD_FIFO_LENGTH";
pub const ENV_EVENT_TIMEOUT_MS: &str = "NVD_EVENT_TIMEOUT_MS";
pub const ENV_ABORT_ON_EXPORT_FAILURE: &str = "NVD_ABORT_ON_EXPORT_FAILURE";

/// Runtime knobs for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Ordinal of the device to open.
    pub gpu: u32,
    /// Frames the export stream may hold before the producer must wait.
    pub fifo_length: u32,
    /// How long each consumer event poll may wait.
    pub event_timeout: Duration,
    /// Abort the process when a surface export fails instead of reporting it.
    pub abort_on_export_failure: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            gpu: 0,
            fifo_length: 10,
            event_timeout: Duration::ZERO,
            abort_on_export_failure: false,
        }
    }
}

impl DriverConfig {
    /// Defaults overridden by `NVD_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(gpu) = parse(&lookup, ENV_GPU) {
            config.gpu = gpu;
        }
        if let Some(len) = parse::<u32>(&lookup, ENV_FIFO_LENGTH) {
            if len == 0 {
                warn!(key = ENV_FIFO_LENGTH, "fifo length must be positive, keeping default");
            } else {
                config.fifo_length = len;
            }
        }
        if let Some(ms) = parse(&lookup, ENV_EVENT_TIMEOUT_MS) {
            config.event_timeout = Duration::from_millis(ms);
        }
        if let Some(value) = lookup(ENV_ABORT_ON_EXPORT_FAILURE) {
            match value.trim() {
                "1" | "true" | "yes" => config.abort_on_export_failure = true,
                "0" | "false" | "no" | "" => config.abort_on_export_failure = false,
                other => warn!(key = ENV_ABORT_ON_EXPORT_FAILURE, value = other, "ignoring invalid value"),
            }
        }
        config
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring invalid value");
            None
        }
    }
}
