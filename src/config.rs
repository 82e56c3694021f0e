//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for the explorer, supporting:
//! - Environment variables for all configurable values
//! - Defaults tuned for a single emulator and an OpenAI-compatible oracle
//! - Builder-style overrides from the command line
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `REPRO_ORACLE_ENDPOINT` | Chat-completions endpoint URL | `http://127.0.0.1:8080/v1/chat/completions` |
//! | `REPRO_ORACLE_API_KEY` | Bearer token for the endpoint | unset |
//! | `REPRO_ORACLE_MODEL` | Model for text-only requests | `gpt-4o` |
//! | `REPRO_ORACLE_IMAGE_MODEL` | Model for requests with images | `gpt-4o` |
//! | `REPRO_ORACLE_FORMAT_MODEL` | Model for structured extraction | `gpt-4o-mini` |
//! | `REPRO_ORACLE_MAX_TOKENS` | Maximum tokens in a reply | `2048` |
//! | `REPRO_ORACLE_TIMEOUT` | Activity timeout in seconds | `120` |
//! | `REPRO_ORACLE_CONNECT_TIMEOUT` | Connection timeout in seconds | `10` |
//! | `REPRO_RESULT_DIR` | Base directory for run results | `working/result` |
//! | `REPRO_MAX_STEP` | Maximum search levels | `20` |
//! | `REPRO_MAX_MINUTES` | Wall-clock budget in minutes | `120` |
//! | `REPRO_MAX_TRANSITIONS` | Transition budget | `100` |
//! | `REPRO_FIRST_BRANCH_LIMIT` | Top-K widgets/operations per refinement batch | `6` |
//! | `REPRO_SECOND_BRANCH_LIMIT` | Top-K frontier survivors per level | `3` |
//! | `REPRO_WIDGET_BATCH_SIZE` | Widgets drawn per refinement image | `100` |
//! | `REPRO_FINGERPRINT` | `structural` or `salted` | `structural` |
//! | `REPRO_ACTION_DELAY` | Settle time after each action (seconds) | `2` |
//! | `REPRO_ADB` | Path to the adb binary | `adb` |

use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use crate::scene::FingerprintMode;

// ============================================================================
// Default Values
// ============================================================================

pub const DEFAULT_ORACLE_ENDPOINT: &str = "http://127.0.0.1:8080/v1/chat/completions";
pub const DEFAULT_ORACLE_MODEL: &str = "gpt-4o";
pub const DEFAULT_ORACLE_IMAGE_MODEL: &str = "gpt-4o";
pub const DEFAULT_ORACLE_FORMAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ORACLE_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_ORACLE_CONNECT_TIMEOUT: u64 = 10;
pub const DEFAULT_ORACLE_ACTIVITY_TIMEOUT: u64 = 120;

/// Default base directory for run results
pub const DEFAULT_RESULT_DIR: &str = "working/result";

pub const DEFAULT_MAX_STEP: u32 = 20;
pub const DEFAULT_MAX_MINUTES: u64 = 120;
pub const DEFAULT_MAX_TRANSITIONS: u64 = 100;
pub const DEFAULT_FIRST_BRANCH_LIMIT: usize = 6;
pub const DEFAULT_SECOND_BRANCH_LIMIT: usize = 3;

/// Widgets per annotated image for high-capacity vision models
pub const DEFAULT_WIDGET_BATCH_SIZE: usize = 100;

/// Widgets per annotated image for low-capacity vision models (glm family)
pub const LOW_CAPACITY_WIDGET_BATCH_SIZE: usize = 20;

pub const DEFAULT_ACTION_DELAY: u64 = 2;
pub const DEFAULT_ADB: &str = "adb";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_ORACLE_ENDPOINT: &str = "REPRO_ORACLE_ENDPOINT";
pub const ENV_ORACLE_API_KEY: &str = "REPRO_ORACLE_API_KEY";
pub const ENV_ORACLE_MODEL: &str = "REPRO_ORACLE_MODEL";
pub const ENV_ORACLE_IMAGE_MODEL: &str = "REPRO_ORACLE_IMAGE_MODEL";
pub const ENV_ORACLE_FORMAT_MODEL: &str = "REPRO_ORACLE_FORMAT_MODEL";
pub const ENV_ORACLE_MAX_TOKENS: &str = "REPRO_ORACLE_MAX_TOKENS";
pub const ENV_ORACLE_ACTIVITY_TIMEOUT: &str = "REPRO_ORACLE_TIMEOUT";
pub const ENV_ORACLE_CONNECT_TIMEOUT: &str = "REPRO_ORACLE_CONNECT_TIMEOUT";
pub const ENV_RESULT_DIR: &str = "REPRO_RESULT_DIR";
pub const ENV_MAX_STEP: &str = "REPRO_MAX_STEP";
pub const ENV_MAX_MINUTES: &str = "REPRO_MAX_MINUTES";
pub const ENV_MAX_TRANSITIONS: &str = "REPRO_MAX_TRANSITIONS";
pub const ENV_FIRST_BRANCH_LIMIT: &str = "REPRO_FIRST_BRANCH_LIMIT";
pub const ENV_SECOND_BRANCH_LIMIT: &str = "REPRO_SECOND_BRANCH_LIMIT";
pub const ENV_WIDGET_BATCH_SIZE: &str = "REPRO_WIDGET_BATCH_SIZE";
pub const ENV_FINGERPRINT: &str = "REPRO_FINGERPRINT";
pub const ENV_ACTION_DELAY: &str = "REPRO_ACTION_DELAY";
pub const ENV_ADB: &str = "REPRO_ADB";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Errors raised when a configuration value cannot be used
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Centralized configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub oracle: OracleSettings,
    pub session: SessionSettings,
    pub explore: ExploreSettings,
    pub device: DeviceSettings,
}

/// Oracle endpoint settings
#[derive(Debug, Clone)]
pub struct OracleSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Model used for text-only prompts
    pub text_model: String,
    /// Model used when images are attached
    pub image_model: String,
    /// Model used for schema-constrained extraction
    pub format_model: String,
    pub max_tokens: u32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Activity timeout during streaming (seconds)
    pub activity_timeout: u64,
}

/// Result directory settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub base_dir: String,
}

/// Search limits and branching factors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExploreSettings {
    /// Maximum number of search levels
    pub max_step: u32,
    /// Wall-clock budget
    pub max_duration: Duration,
    /// Maximum recorded transitions
    pub max_transitions: u64,
    /// Top-K widgets and operations kept per refinement batch
    pub first_branch_limit: usize,
    /// Top-K frontier nodes kept per pruning round
    pub second_branch_limit: usize,
    /// Widgets drawn on one annotated image
    pub widget_batch_size: usize,
    pub fingerprint: FingerprintMode,
}

/// Device driver settings
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub adb: String,
    /// Settle time after each injected action
    pub action_delay: Duration,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            oracle: OracleSettings::from_env(),
            session: SessionSettings::from_env(),
            explore: ExploreSettings::from_env(),
            device: DeviceSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            oracle: OracleSettings::defaults(),
            session: SessionSettings::defaults(),
            explore: ExploreSettings::defaults(),
            device: DeviceSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl OracleSettings {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_ORACLE_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_ORACLE_ENDPOINT.to_string()),
            api_key: env::var(ENV_ORACLE_API_KEY).ok().filter(|k| !k.is_empty()),
            text_model: env::var(ENV_ORACLE_MODEL)
                .unwrap_or_else(|_| DEFAULT_ORACLE_MODEL.to_string()),
            image_model: env::var(ENV_ORACLE_IMAGE_MODEL)
                .unwrap_or_else(|_| DEFAULT_ORACLE_IMAGE_MODEL.to_string()),
            format_model: env::var(ENV_ORACLE_FORMAT_MODEL)
                .unwrap_or_else(|_| DEFAULT_ORACLE_FORMAT_MODEL.to_string()),
            max_tokens: env_parse(ENV_ORACLE_MAX_TOKENS).unwrap_or(DEFAULT_ORACLE_MAX_TOKENS),
            connect_timeout: env_parse(ENV_ORACLE_CONNECT_TIMEOUT)
                .unwrap_or(DEFAULT_ORACLE_CONNECT_TIMEOUT),
            activity_timeout: env_parse(ENV_ORACLE_ACTIVITY_TIMEOUT)
                .unwrap_or(DEFAULT_ORACLE_ACTIVITY_TIMEOUT),
        }
    }

    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_ORACLE_ENDPOINT.to_string(),
            api_key: None,
            text_model: DEFAULT_ORACLE_MODEL.to_string(),
            image_model: DEFAULT_ORACLE_IMAGE_MODEL.to_string(),
            format_model: DEFAULT_ORACLE_FORMAT_MODEL.to_string(),
            max_tokens: DEFAULT_ORACLE_MAX_TOKENS,
            connect_timeout: DEFAULT_ORACLE_CONNECT_TIMEOUT,
            activity_timeout: DEFAULT_ORACLE_ACTIVITY_TIMEOUT,
        }
    }

    /// Widgets per annotated image the image model can reliably read
    pub fn visual_capacity(&self) -> usize {
        if self.image_model.starts_with("glm") {
            LOW_CAPACITY_WIDGET_BATCH_SIZE
        } else {
            DEFAULT_WIDGET_BATCH_SIZE
        }
    }
}

impl SessionSettings {
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_RESULT_DIR).unwrap_or_else(|_| DEFAULT_RESULT_DIR.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_RESULT_DIR.to_string(),
        }
    }
}

impl ExploreSettings {
    pub fn from_env() -> Self {
        let defaults = Self::defaults();
        Self {
            max_step: env_parse(ENV_MAX_STEP).unwrap_or(defaults.max_step),
            max_duration: env_parse::<u64>(ENV_MAX_MINUTES)
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.max_duration),
            max_transitions: env_parse(ENV_MAX_TRANSITIONS).unwrap_or(defaults.max_transitions),
            first_branch_limit: env_parse(ENV_FIRST_BRANCH_LIMIT)
                .unwrap_or(defaults.first_branch_limit),
            second_branch_limit: env_parse(ENV_SECOND_BRANCH_LIMIT)
                .unwrap_or(defaults.second_branch_limit),
            widget_batch_size: env_parse(ENV_WIDGET_BATCH_SIZE)
                .unwrap_or(defaults.widget_batch_size),
            fingerprint: env_parse(ENV_FINGERPRINT).unwrap_or(defaults.fingerprint),
        }
    }

    pub fn defaults() -> Self {
        Self {
            max_step: DEFAULT_MAX_STEP,
            max_duration: Duration::from_secs(DEFAULT_MAX_MINUTES * 60),
            max_transitions: DEFAULT_MAX_TRANSITIONS,
            first_branch_limit: DEFAULT_FIRST_BRANCH_LIMIT,
            second_branch_limit: DEFAULT_SECOND_BRANCH_LIMIT,
            widget_batch_size: DEFAULT_WIDGET_BATCH_SIZE,
            fingerprint: FingerprintMode::Structural,
        }
    }

    pub fn max_step(mut self, max_step: u32) -> Self {
        self.max_step = max_step;
        self
    }

    pub fn max_transitions(mut self, max_transitions: u64) -> Self {
        self.max_transitions = max_transitions;
        self
    }

    pub fn max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    pub fn branch_limits(mut self, first: usize, second: usize) -> Self {
        self.first_branch_limit = first;
        self.second_branch_limit = second;
        self
    }

    pub fn widget_batch_size(mut self, size: usize) -> Self {
        self.widget_batch_size = size;
        self
    }

    pub fn fingerprint(mut self, mode: FingerprintMode) -> Self {
        self.fingerprint = mode;
        self
    }

    /// Reject limits that would make the search unable to make progress
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, usize); 3] = [
            ("first_branch_limit", self.first_branch_limit),
            ("second_branch_limit", self.second_branch_limit),
            ("widget_batch_size", self.widget_batch_size),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    value: value.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for ExploreSettings {
    fn default() -> Self {
        Self::defaults()
    }
}

impl DeviceSettings {
    pub fn from_env() -> Self {
        Self {
            adb: env::var(ENV_ADB).unwrap_or_else(|_| DEFAULT_ADB.to_string()),
            action_delay: Duration::from_secs(
                env_parse(ENV_ACTION_DELAY).unwrap_or(DEFAULT_ACTION_DELAY),
            ),
        }
    }

    pub fn defaults() -> Self {
        Self {
            adb: DEFAULT_ADB.to_string(),
            action_delay: Duration::from_secs(DEFAULT_ACTION_DELAY),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Format a duration as `HH:MM:SS`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Get the result base directory (convenience function)
pub fn result_base_dir() -> String {
    get().session.base_dir.clone()
}
