use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_COOLDOWN_SECS: u64 = 600;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BATCH_LIMIT: u32 = 100;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Top-level config (scout.toml + SCOUT_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoutConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Job configurations upserted on every start, before the polling loop.
    #[serde(default)]
    pub seeds: Vec<SeedConfiguration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// How long a connection waits on a locked database before giving up.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Operational parameters of the polling loop and its retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between ticks.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Seconds after an attempt before the execution becomes eligible again.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Attempts allowed before an execution is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Maximum eligible executions fetched per tick.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,
    /// Executions processed at once within a tick. 1 = sequential.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Hard limit for a single executor call. Unset means no limit.
    #[serde(default)]
    pub attempt_timeout_secs: Option<u64>,
    /// Consecutive failed ticks before the loop starts backing off.
    #[serde(default = "default_backoff_after_failures")]
    pub backoff_after_failures: u32,
    /// Upper bound of the back-off delay.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Consecutive failed ticks after which the loop gives up.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            batch_limit: DEFAULT_BATCH_LIMIT,
            max_concurrency: default_max_concurrency(),
            attempt_timeout_secs: None,
            backoff_after_failures: default_backoff_after_failures(),
            max_backoff_secs: default_max_backoff_secs(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_secs.map(Duration::from_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature sent with every request.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Directory holding prompt templates (`<agent>/system.md`).
    pub prompts_dir: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            prompts_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
    pub openai: Option<OpenAiProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

/// A job configuration known at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfiguration {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Create a pending execution on start when none is pending yet.
    #[serde(default)]
    pub enqueue: bool,
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_batch_limit() -> u32 {
    DEFAULT_BATCH_LIMIT
}
fn default_max_concurrency() -> usize {
    1
}
fn default_backoff_after_failures() -> u32 {
    3
}
fn default_max_backoff_secs() -> u64 {
    60
}
fn default_max_consecutive_failures() -> u32 {
    20
}
fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}
fn default_model() -> String {
    "gpt-4.1".to_string()
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_temperature() -> f64 {
    0.1
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.scout/scout.db", home)
}

impl ScoutConfig {
    /// Load config from a TOML file with SCOUT_* env var overrides.
    ///
    /// Nested keys are separated by a double underscore, e.g.
    /// `SCOUT_SCHEDULER__MAX_RETRIES=5`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ScoutConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SCOUT_").split("__"))
            .extract()
            .map_err(|e| crate::error::ScoutError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let s = &self.scheduler;
        if s.poll_interval_secs == 0 {
            return Err(crate::error::ScoutError::Config(
                "scheduler.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if s.batch_limit == 0 {
            return Err(crate::error::ScoutError::Config(
                "scheduler.batch_limit must be at least 1".to_string(),
            ));
        }
        if s.max_concurrency == 0 {
            return Err(crate::error::ScoutError::Config(
                "scheduler.max_concurrency must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(crate::error::ScoutError::Config(format!(
                "agent.temperature ({}) must be between 0 and 2",
                self.agent.temperature
            )));
        }
        if s.max_consecutive_failures < s.backoff_after_failures {
            return Err(crate::error::ScoutError::Config(format!(
                "scheduler.max_consecutive_failures ({}) is below backoff_after_failures ({})",
                s.max_consecutive_failures, s.backoff_after_failures
            )));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.scout/scout.toml", home)
}
