//! Diagnostic logging bootstrap
//!
//! The library logs through `tracing` macros and never installs a subscriber
//! on its own. Hosts that have no subscriber of their own can call
//! [`init_logging`], which honours `PAID_LOG_LEVEL` (default `error`) and
//! `PAID_LOG_FORMAT` (`text` or `json`).

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, TracingError};

/// Environment variable selecting the library log level
pub const ENV_LOG_LEVEL: &str = "PAID_LOG_LEVEL";

/// Environment variable selecting the log output format
pub const ENV_LOG_FORMAT: &str = "PAID_LOG_FORMAT";

/// Library log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    #[default]
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Resolved logging settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Raw `PAID_LOG_LEVEL` value that failed to parse, reported after init
    pub rejected_level: Option<String>,
    targets: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            rejected_level: None,
            targets: vec![env!("CARGO_CRATE_NAME").to_string()],
        }
    }
}

impl LoggingConfig {
    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            match raw.parse::<LogLevel>() {
                Ok(level) => config.level = level,
                Err(_) => config.rejected_level = Some(raw),
            }
        }

        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            if raw.trim().eq_ignore_ascii_case("json") {
                config.format = LogFormat::Json;
            }
        }

        config
    }

    /// Also apply the level to another target (e.g. a host binary)
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    /// `EnvFilter` directive string for the configured targets
    pub fn directive(&self) -> String {
        self.targets
            .iter()
            .map(|t| format!("{}={}", t, self.level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install a global subscriber configured from the environment
pub fn init_logging() -> Result<()> {
    init_logging_with(LoggingConfig::from_env())
}

/// Install a global subscriber with explicit settings
pub fn init_logging_with(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.directive())
        .map_err(|e| TracingError::Logging(e.to_string()))?;

    let (json, text) = match config.format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .try_init()
        .map_err(|e| TracingError::Logging(e.to_string()))?;

    if let Some(raw) = &config.rejected_level {
        tracing::warn!(
            value = %raw,
            "Invalid {} value, expected error|warn|info|debug|trace; using {}",
            ENV_LOG_LEVEL,
            config.level
        );
    }

    Ok(())
}
