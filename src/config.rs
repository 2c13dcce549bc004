//! Engine-wide configuration: cost, concurrency, retry, memory, and cache
//! knobs loaded from a TOML file with environment overrides, plus the
//! plural/singular API-key variable handling (§6).
//!
//! Follows [`crate::runtimes::runtime_config::RuntimeConfig`]'s pattern of a
//! `Default` impl that reads the environment via `dotenvy`, with an explicit
//! `EngineConfig::load` for callers (the HTTP/MCP binaries) that want a
//! config-file path override instead of pure-environment defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cost::ModelPrice;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    #[diagnostic(code(research_agent::config::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    #[diagnostic(code(research_agent::config::parse))]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("no API key configured for any provider; set ANTHROPIC_API_KEY(S), OPENAI_API_KEY(S), or GOOGLE_API_KEY(S)")]
    #[diagnostic(code(research_agent::config::no_api_keys))]
    NoApiKeys,
}

/// Cost-tracking knobs (§4.4 / §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CostConfig {
    pub max_cost_per_run: f64,
    pub warn_at_percentage: f64,
    #[serde(default)]
    pub model_prices: HashMap<String, ModelPriceConfig>,
}

/// TOML-friendly mirror of [`ModelPrice`] (input/output $ per million tokens).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ModelPriceConfig {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl From<ModelPriceConfig> for ModelPrice {
    fn from(p: ModelPriceConfig) -> Self {
        ModelPrice::new(p.input_per_mtok, p.output_per_mtok)
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            max_cost_per_run: 2.0,
            warn_at_percentage: 0.8,
            model_prices: HashMap::new(),
        }
    }
}

/// Admission/queueing knobs (§4.10 / §6), mirrored onto
/// [`crate::runtimes::SessionManagerConfig`] at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrent_sessions: usize,
    pub queue_limit: usize,
    pub rate_limit_per_minute: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 4,
            queue_limit: 16,
            rate_limit_per_minute: 60,
        }
    }
}

/// Retry/recovery knobs (§4.3 / §6), consumed by
/// [`crate::schedulers::recovery::RecoveryPolicy::new`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    pub backoff_initial_seconds: u64,
    pub backoff_max_seconds: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_initial_seconds: 1,
            backoff_max_seconds: 30,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_seconds: 60,
        }
    }
}

impl RetryConfig {
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_secs(self.backoff_initial_seconds)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_seconds)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_cooldown_seconds)
    }
}

/// Long-term memory knobs (§4.12 / §6), mirrored onto
/// [`crate::memory::ResearchMemory`]'s `with_*` builders.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub relevance_threshold: f32,
    pub staleness_days: i64,
    pub max_results: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.75,
            staleness_days: 90,
            max_results: 5,
        }
    }
}

/// LLM response cache knobs (§4.6 / §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub max_temperature_to_cache: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 86_400,
            max_temperature_to_cache: 0.0,
        }
    }
}

/// Resolved API keys per provider, after merging the plural
/// (`ANTHROPIC_API_KEYS=a,b,c`) and singular (`ANTHROPIC_API_KEY=a`)
/// environment variables — mirrors [`crate::keys`]'s own resolution order,
/// duplicated here only so the config loader can fail fast at startup
/// instead of discovering a missing key mid-session.
#[derive(Clone, Debug, Default)]
pub struct ApiKeys {
    pub anthropic: Vec<String>,
    pub openai: Vec<String>,
    pub google: Vec<String>,
    pub tavily: Option<String>,
}

impl ApiKeys {
    fn from_env() -> Self {
        Self {
            anthropic: resolve_provider_keys("ANTHROPIC_API_KEYS", "ANTHROPIC_API_KEY"),
            openai: resolve_provider_keys("OPENAI_API_KEYS", "OPENAI_API_KEY"),
            google: resolve_provider_keys("GOOGLE_API_KEYS", "GOOGLE_API_KEY"),
            tavily: std::env::var("TAVILY_API_KEY").ok(),
        }
    }

    pub fn has_any_llm_key(&self) -> bool {
        !self.anthropic.is_empty() || !self.openai.is_empty() || !self.google.is_empty()
    }
}

fn resolve_provider_keys(plural_var: &str, singular_var: &str) -> Vec<String> {
    if let Ok(plural) = std::env::var(plural_var) {
        return plural
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    std::env::var(singular_var)
        .ok()
        .into_iter()
        .collect()
}

/// Top-level engine configuration: everything §6 lists as "enumerated
/// essentials", plus the resolved API keys. Not itself `Serialize`d —
/// [`ApiKeys`] is always resolved from the environment, never the file.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct EngineConfigFile {
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub cost: CostConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub memory: MemoryConfig,
    pub cache: CacheConfig,
    pub api_keys: ApiKeys,
}

impl Default for EngineConfig {
    fn default() -> Self {
        dotenvy::dotenv().ok();
        Self {
            cost: CostConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            memory: MemoryConfig::default(),
            cache: CacheConfig::default(),
            api_keys: ApiKeys::from_env(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, falling back to defaults for any field the
    /// file omits (`#[serde(default)]` on every section). The config-file
    /// path override from §6 is `RESEARCH_AGENT_CONFIG`; callers that resolve
    /// the path some other way can skip straight to [`Self::load`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: EngineConfigFile = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_file(file))
    }

    /// Resolve `RESEARCH_AGENT_CONFIG` if set, otherwise fall back to
    /// environment-only defaults — the same override/fallback shape
    /// `RuntimeConfig::resolve_sqlite_db_name` uses for `SQLITE_DB_NAME`.
    pub fn load_from_env_or_default() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        match std::env::var("RESEARCH_AGENT_CONFIG") {
            Ok(path) => Self::load(path),
            Err(_) => Ok(Self::default()),
        }
    }

    fn from_file(file: EngineConfigFile) -> Self {
        Self {
            cost: file.cost,
            concurrency: file.concurrency,
            retry: file.retry,
            memory: file.memory,
            cache: file.cache,
            api_keys: ApiKeys::from_env(),
        }
    }

    /// Merge `model_prices` from the file into the `rustc_hash`-keyed map
    /// [`crate::cost::CostTracker::new`] expects.
    pub fn model_prices(&self) -> rustc_hash::FxHashMap<String, ModelPrice> {
        self.cost
            .model_prices
            .iter()
            .map(|(name, p)| (name.clone(), ModelPrice::from(*p)))
            .collect()
    }

    pub fn require_api_keys(&self) -> Result<(), ConfigError> {
        if self.api_keys.has_any_llm_key() {
            Ok(())
        } else {
            Err(ConfigError::NoApiKeys)
        }
    }
}

/// Default report output directory, mirroring the persistent-layout section
/// of §6 (`<sanitized-query>_<timestamp>.md` plus `.meta.json`).
pub fn default_report_dir() -> PathBuf {
    std::env::var("RESEARCH_AGENT_REPORT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("reports"))
}

/// Default event-log directory (`events/<session_id>.jsonl`, §6).
pub fn default_events_dir() -> PathBuf {
    std::env::var("RESEARCH_AGENT_EVENTS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("events"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_provider_keys_prefers_plural_comma_separated() {
        std::env::set_var("TEST_KEYS_PLURAL", "a, b ,c");
        std::env::remove_var("TEST_KEYS_SINGULAR");
        let keys = resolve_provider_keys("TEST_KEYS_PLURAL", "TEST_KEYS_SINGULAR");
        assert_eq!(keys, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        std::env::remove_var("TEST_KEYS_PLURAL");
    }

    #[test]
    fn resolve_provider_keys_falls_back_to_singular() {
        std::env::remove_var("TEST_KEYS_PLURAL2");
        std::env::set_var("TEST_KEYS_SINGULAR2", "only-one");
        let keys = resolve_provider_keys("TEST_KEYS_PLURAL2", "TEST_KEYS_SINGULAR2");
        assert_eq!(keys, vec!["only-one".to_string()]);
        std::env::remove_var("TEST_KEYS_SINGULAR2");
    }

    #[test]
    fn engine_config_file_defaults_fill_in_missing_sections() {
        let file: EngineConfigFile = toml::from_str("[cost]\nmax_cost_per_run = 5.0\nwarn_at_percentage = 0.9\n").unwrap();
        assert_eq!(file.cost.max_cost_per_run, 5.0);
        assert_eq!(file.concurrency.max_concurrent_sessions, 4);
        assert_eq!(file.retry.attempts, 3);
    }
}
