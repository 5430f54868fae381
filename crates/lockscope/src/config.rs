use crate::timer::{TimerFn, monotonic_ns};

pub const DEFAULT_MAX_CLASSES: usize = 256;
pub const DEFAULT_MAX_INSTANCES: usize = 65_536;

pub const ENABLED_ENV: &str = "LOCKSCOPE_ENABLED";
pub const TIMED_ENV: &str = "LOCKSCOPE_TIMED";
pub const MAX_CLASSES_ENV: &str = "LOCKSCOPE_MAX_CLASSES";
pub const MAX_INSTANCES_ENV: &str = "LOCKSCOPE_MAX_INSTANCES";
pub const TRACK_HOLD_TIME_ENV: &str = "LOCKSCOPE_TRACK_HOLD_TIME";

/// Startup configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Global switch. Off means every `start_*` returns `None`.
    pub enabled: bool,
    /// Timer source. `None` disables all instrumentation.
    pub timer: Option<TimerFn>,
    /// Maximum number of distinct rwlock classes (keys).
    pub max_classes: usize,
    /// Maximum number of live instrumented instances.
    pub max_instances: usize,
    /// Record write hold time on unlock.
    pub track_hold_time: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timer: Some(monotonic_ns),
            max_classes: DEFAULT_MAX_CLASSES,
            max_instances: DEFAULT_MAX_INSTANCES,
            track_hold_time: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidBool { var: &'static str, value: String },
    InvalidNumber { var: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidBool { var, value } => {
                write!(f, "{var}: expected a boolean, got {value:?}")
            }
            ConfigError::InvalidNumber { var, value } => {
                write!(f, "{var}: expected a non-negative integer, got {value:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl EngineConfig {
    /// Defaults overlaid with `LOCKSCOPE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|var| std::env::var(var).ok())
    }

    /// Applies overrides looked up through `lookup`. Unset variables keep
    /// the current value.
    pub fn overlay(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENABLED_ENV) {
            self.enabled = parse_bool(ENABLED_ENV, &value)?;
        }
        if let Some(value) = lookup(TIMED_ENV) {
            if parse_bool(TIMED_ENV, &value)? {
                self.timer.get_or_insert(monotonic_ns);
            } else {
                self.timer = None;
            }
        }
        if let Some(value) = lookup(MAX_CLASSES_ENV) {
            self.max_classes = parse_usize(MAX_CLASSES_ENV, &value)?;
        }
        if let Some(value) = lookup(MAX_INSTANCES_ENV) {
            self.max_instances = parse_usize(MAX_INSTANCES_ENV, &value)?;
        }
        if let Some(value) = lookup(TRACK_HOLD_TIME_ENV) {
            self.track_hold_time = parse_bool(TRACK_HOLD_TIME_ENV, &value)?;
        }
        Ok(self)
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: value.to_string(),
        }),
    }
}

fn parse_usize(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        })
}
