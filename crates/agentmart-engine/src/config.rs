//! Engine Configuration
//!
//! Layered sources, later ones win:
//! 1. built-in defaults
//! 2. `config/default` and `config/local` (any format the `config` crate reads)
//! 3. an explicit file passed by the caller
//! 4. `AGENTMART__SECTION__KEY` environment variables (after loading `.env`)

use std::path::Path;
use std::time::Duration;

use agentmart_db::StorageConfig;
use agentmart_types::{AgentMartError, Result};
use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub gamification: GamificationConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

/// Achievement levels and leaderboard size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GamificationConfig {
    /// Entries kept per leaderboard category
    pub leaderboard_capacity: usize,
    /// Points needed per level
    pub points_per_level: u64,
}

impl Default for GamificationConfig {
    fn default() -> Self {
        Self {
            leaderboard_capacity: 100,
            points_per_level: 1000,
        }
    }
}

/// Background retry of failed follow-up work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per job, the inline attempt included
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based), doubling up to the cap
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter; `RUST_LOG` overrides it
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from files and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AGENTMART")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AgentMartError::InvalidConfig {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;

        if self.gamification.leaderboard_capacity == 0 {
            return Err(invalid("gamification.leaderboard_capacity must be at least 1"));
        }
        if self.gamification.points_per_level == 0 {
            return Err(invalid("gamification.points_per_level must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(invalid(
                "retry.initial_backoff_ms cannot exceed retry.max_backoff_ms",
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging.level cannot be empty"));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(invalid(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> AgentMartError {
    AgentMartError::InvalidConfig {
        reason: reason.into(),
    }
}
