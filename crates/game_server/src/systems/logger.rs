//! Logging system setup and configuration
//!
//! Installs the process-wide tracing subscriber. Runs at runlevel 0 so every
//! other subsystem logs through it.
//!
//! ```toml
//! [logger]
//! level = "info"          # trace | debug | info | warn | error
//! format = "text"         # text | json
//! report_caller = false   # include file and line
//! ```
//!
//! `RUST_LOG` takes precedence over `level` when set.

use async_trait::async_trait;
use rally_kernel::{ConfigError, Kernel, Status, StatusFlag, Subsystem, SystemConfig, SystemError};
use serde::Deserialize;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggerSettings {
    pub level: String,
    pub format: LogFormat,
    pub report_caller: bool,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            report_caller: false,
        }
    }
}

impl LoggerSettings {
    pub fn from_config(config: &SystemConfig) -> Result<Self, ConfigError> {
        let mut settings: LoggerSettings = config.deserialize()?;
        settings.level = settings.level.to_lowercase();
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LEVELS.contains(&self.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "invalid log level '{}', must be one of: {}",
                self.level,
                VALID_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}

/// The `logger` subsystem.
#[derive(Debug, Default)]
pub struct LoggerSystem {
    status: StatusFlag,
}

impl LoggerSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the global subscriber.
    ///
    /// Returns `false` when another subscriber was already installed, which
    /// happens in tests and when Rally is embedded in a larger program.
    pub fn install(settings: &LoggerSettings) -> bool {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&settings.level));

        let result = match settings.format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(false)
                        .with_file(settings.report_caller)
                        .with_line_number(settings.report_caller),
                )
                .try_init(),
            LogFormat::Text => tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_file(settings.report_caller)
                        .with_line_number(settings.report_caller),
                )
                .try_init(),
        };

        result.is_ok()
    }
}

#[async_trait]
impl Subsystem for LoggerSystem {
    async fn setup(&self, _kernel: &Kernel, config: &SystemConfig) -> Result<(), SystemError> {
        let settings = LoggerSettings::from_config(config)?;

        if Self::install(&settings) {
            info!(
                "📝 Logging initialized (level: {}, format: {:?})",
                settings.level, settings.format
            );
        } else {
            debug!("Global subscriber already installed, keeping it");
        }

        self.status.mark_up();
        Ok(())
    }

    async fn teardown(&self, _kernel: &Kernel, _config: &SystemConfig) -> Result<(), SystemError> {
        // The global subscriber cannot be uninstalled; it stays until exit.
        self.status.mark_down();
        Ok(())
    }

    fn status(&self) -> Status {
        self.status.get()
    }
}
