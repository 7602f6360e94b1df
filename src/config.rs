//! Typed configuration loading for the acceptance rig.
//!
//! Configuration is loaded from:
//! 1. `rigcheck.toml` file (base configuration)
//! 2. Environment variables (prefixed with `RIGCHECK_`)
//!
//! # Environment Variable Overrides
//!
//! Environment variables with the `RIGCHECK_` prefix can override
//! configuration values. A double underscore separates the section from the
//! field, since field names themselves contain underscores:
//!
//! ```text
//! RIGCHECK_APPLICATION__LOG_LEVEL=debug
//! RIGCHECK_ORCHESTRATOR__CONFIRMATION_TIMEOUT_MS=45000
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rigcheck::config::RigConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = RigConfig::load()?;
//!     println!("Confirmation timeout: {:?}", config.orchestrator.confirmation_timeout());
//!     Ok(())
//! }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level rig configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Test session orchestration settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Timing knobs consumed by the session orchestrator.
///
/// All values are externally supplied; the defaults mirror a typical
/// acceptance-line setup (a thirty second confirmation window with a one
/// second cosmetic countdown).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard upper bound on an automated confirmation, in milliseconds.
    /// When it expires the item is recorded Abnormal unconditionally.
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
    /// Interval of the operator-visible remaining-time tick, in milliseconds.
    /// Purely cosmetic; firing it never produces a verdict.
    #[serde(default = "default_display_tick_ms")]
    pub display_tick_ms: u64,
    /// Delay between command dispatch and the confirmation query, in
    /// milliseconds, giving the unit time to settle.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            display_tick_ms: default_display_tick_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl OrchestratorConfig {
    /// Confirmation timeout as a [`Duration`].
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    /// Display tick interval as a [`Duration`].
    pub fn display_tick(&self) -> Duration {
        Duration::from_millis(self.display_tick_ms)
    }

    /// Post-dispatch settle delay as a [`Duration`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

fn default_name() -> String {
    "rigcheck".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_confirmation_timeout_ms() -> u64 {
    30_000
}

fn default_display_tick_ms() -> u64 {
    1_000
}

fn default_settle_delay_ms() -> u64 {
    1_000
}

impl RigConfig {
    /// Load configuration from `rigcheck.toml` and environment variables.
    ///
    /// Configuration is loaded in this order of precedence (highest to
    /// lowest): environment variables (`RIGCHECK_` prefix), then the TOML
    /// file. After loading, configuration is validated.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the config file cannot be loaded or
    /// validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("rigcheck.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RIGCHECK_").split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Confirmation timeout is non-zero
    /// - Display tick is non-zero and no longer than the confirmation timeout
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] with a descriptive message for any
    /// validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.orchestrator.confirmation_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "confirmation_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.orchestrator.display_tick_ms == 0 {
            return Err(ConfigError::ValidationError(
                "display_tick_ms must be > 0".to_string(),
            ));
        }

        if self.orchestrator.display_tick_ms > self.orchestrator.confirmation_timeout_ms {
            return Err(ConfigError::ValidationError(format!(
                "display_tick_ms ({}) must not exceed confirmation_timeout_ms ({})",
                self.orchestrator.display_tick_ms, self.orchestrator.confirmation_timeout_ms
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RigConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestrator.confirmation_timeout_ms, 30_000);
        assert_eq!(config.orchestrator.display_tick_ms, 1_000);
        assert_eq!(config.orchestrator.settle_delay_ms, 1_000);
    }

    #[test]
    fn test_invalid_log_level() {
        let config = RigConfig {
            application: ApplicationConfig {
                name: "test".into(),
                log_level: "loud".into(),
            },
            orchestrator: OrchestratorConfig::default(),
        };
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = RigConfig {
            application: ApplicationConfig::default(),
            orchestrator: OrchestratorConfig {
                confirmation_timeout_ms: 0,
                ..OrchestratorConfig::default()
            },
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tick_longer_than_timeout_rejected() {
        let config = RigConfig {
            application: ApplicationConfig::default(),
            orchestrator: OrchestratorConfig {
                confirmation_timeout_ms: 500,
                display_tick_ms: 1_000,
                settle_delay_ms: 0,
            },
        };
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must not exceed confirmation_timeout_ms"));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
name = "line-3 rig"
log_level = "debug"

[orchestrator]
confirmation_timeout_ms = 45000
"#
        )
        .unwrap();

        let config = RigConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.name, "line-3 rig");
        assert_eq!(config.orchestrator.confirmation_timeout_ms, 45_000);
        // Unset keys fall back to defaults.
        assert_eq!(config.orchestrator.display_tick_ms, 1_000);
    }

    #[test]
    fn test_env_overrides_apply() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RIGCHECK_ORCHESTRATOR__CONFIRMATION_TIMEOUT_MS", "45000");
            jail.set_env("RIGCHECK_APPLICATION__LOG_LEVEL", "debug");
            let config = RigConfig::load_from("rigcheck.toml").unwrap();
            assert_eq!(config.orchestrator.confirmation_timeout_ms, 45_000);
            assert_eq!(config.application.log_level, "debug");
            // Keys without an override keep their defaults.
            assert_eq!(config.orchestrator.display_tick_ms, 1_000);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = RigConfig::load_from("/nonexistent/rigcheck.toml").unwrap();
        assert_eq!(config.orchestrator.confirmation_timeout_ms, 30_000);
    }

    #[test]
    fn test_duration_accessors() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.confirmation_timeout(), Duration::from_secs(30));
        assert_eq!(config.display_tick(), Duration::from_secs(1));
        assert_eq!(config.settle_delay(), Duration::from_secs(1));
    }
}
