//! Round-robin API key rotation with cooldown on rate limits.
//!
//! Distributes LLM API calls across multiple keys per provider so a single
//! rate-limited key doesn't stall a session. Keys are loaded lazily from
//! comma-separated environment variables (`ANTHROPIC_API_KEYS=key1,key2`),
//! falling back to the singular per-provider variable, and cached for the
//! life of the process. A rate-limited key is skipped for `cooldown` before
//! it's offered again.

use std::time::{Duration, Instant};

use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_COOLDOWN_SECONDS: u64 = 60;

#[derive(Debug, Error, Diagnostic)]
pub enum KeyError {
    #[error("no api key configured for provider {0:?}")]
    #[diagnostic(
        code(research_agent::keys::no_key_configured),
        help("set {0}_API_KEYS or {0}_API_KEY")
    )]
    NoKeyConfigured(String),

    #[error("all {count} api key(s) for provider {provider:?} are rate-limited")]
    #[diagnostic(code(research_agent::keys::all_keys_rate_limited))]
    AllKeysRateLimited { provider: String, count: usize },
}

fn multi_key_env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" => Some("ANTHROPIC_API_KEYS"),
        "openai" => Some("OPENAI_API_KEYS"),
        "google" => Some("GOOGLE_API_KEYS"),
        _ => None,
    }
}

fn single_key_env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "google" => Some("GOOGLE_API_KEY"),
        _ => None,
    }
}

fn parse_csv_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn load_keys_from_env(provider: &str) -> Vec<String> {
    if let Some(multi_var) = multi_key_env_var(provider) {
        if let Ok(raw) = std::env::var(multi_var) {
            let keys = parse_csv_keys(&raw);
            if !keys.is_empty() {
                info!(provider, count = keys.len(), source = multi_var, "keys_loaded");
                return keys;
            }
        }
    }

    if let Some(single_var) = single_key_env_var(provider) {
        if let Ok(key) = std::env::var(single_var) {
            let key = key.trim().to_string();
            if !key.is_empty() {
                info!(provider, source = single_var, "single_key_loaded");
                return vec![key];
            }
        }
    }

    Vec::new()
}

#[derive(Default)]
struct ProviderPool {
    keys: Vec<String>,
    next_index: usize,
    cooldown_until: FxHashMap<usize, Instant>,
}

/// Per-provider key pool utilization, for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyPoolStats {
    pub total: usize,
    pub available: usize,
}

/// Distributes API calls across multiple keys per provider.
///
/// Cheap to share: internally `RwLock`-guarded, so one instance can be held
/// behind an `Arc` and used concurrently from every session.
pub struct KeyRotator {
    cooldown: Duration,
    pools: RwLock<FxHashMap<String, ProviderPool>>,
}

impl Default for KeyRotator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyRotator {
    /// A rotator with the default 60s rate-limit cooldown.
    pub fn new() -> Self {
        Self::with_cooldown(Duration::from_secs(DEFAULT_COOLDOWN_SECONDS))
    }

    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            cooldown,
            pools: RwLock::new(FxHashMap::default()),
        }
    }

    /// Seed a provider's key pool directly, bypassing environment lookup.
    /// Intended for config-driven setups and tests.
    pub fn set_keys(&self, provider: &str, keys: Vec<String>) {
        let mut pools = self.pools.write();
        pools.insert(
            provider.to_string(),
            ProviderPool {
                keys,
                next_index: 0,
                cooldown_until: FxHashMap::default(),
            },
        );
    }

    fn ensure_loaded(pools: &mut FxHashMap<String, ProviderPool>, provider: &str) {
        if pools.contains_key(provider) {
            return;
        }
        pools.insert(
            provider.to_string(),
            ProviderPool {
                keys: load_keys_from_env(provider),
                next_index: 0,
                cooldown_until: FxHashMap::default(),
            },
        );
    }

    /// Return the next available key for `provider`, round-robin, skipping
    /// any key still in cooldown. `None` if no keys are configured or every
    /// key is currently rate-limited.
    pub fn get_key(&self, provider: &str) -> Option<String> {
        let mut pools = self.pools.write();
        Self::ensure_loaded(&mut pools, provider);
        let pool = pools.get_mut(provider)?;
        if pool.keys.is_empty() {
            return None;
        }

        let now = Instant::now();
        let attempts = pool.keys.len();
        for _ in 0..attempts {
            let idx = pool.next_index % pool.keys.len();
            pool.next_index = idx + 1;
            let in_cooldown = pool
                .cooldown_until
                .get(&idx)
                .is_some_and(|until| now < *until);
            if !in_cooldown {
                return Some(pool.keys[idx].clone());
            }
        }

        warn!(provider, count = attempts, "all_keys_in_cooldown");
        None
    }

    /// Like [`Self::get_key`], but distinguishes "no keys configured" from
    /// "all keys currently rate-limited" for callers that need to surface
    /// the distinction (e.g. choosing whether to retry later or fail fast).
    pub fn require_key(&self, provider: &str) -> Result<String, KeyError> {
        match self.get_key(provider) {
            Some(key) => Ok(key),
            None => {
                let stats = self.stats();
                match stats.get(provider) {
                    Some(stat) if stat.total > 0 => Err(KeyError::AllKeysRateLimited {
                        provider: provider.to_string(),
                        count: stat.total,
                    }),
                    _ => Err(KeyError::NoKeyConfigured(provider.to_string())),
                }
            }
        }
    }

    /// Place `key` in cooldown for this rotator's configured duration.
    /// A no-op if `key` isn't a known key for `provider`.
    pub fn mark_rate_limited(&self, provider: &str, key: &str) {
        let mut pools = self.pools.write();
        Self::ensure_loaded(&mut pools, provider);
        let Some(pool) = pools.get_mut(provider) else {
            return;
        };
        let Some(idx) = pool.keys.iter().position(|k| k == key) else {
            return;
        };
        pool.cooldown_until.insert(idx, Instant::now() + self.cooldown);
        info!(
            provider,
            key_index = idx,
            cooldown_secs = self.cooldown.as_secs(),
            "key_rate_limited"
        );
    }

    /// Per-provider pool utilization: total keys vs. currently available.
    pub fn stats(&self) -> FxHashMap<String, KeyPoolStats> {
        let pools = self.pools.read();
        let now = Instant::now();
        pools
            .iter()
            .map(|(provider, pool)| {
                let available = (0..pool.keys.len())
                    .filter(|idx| {
                        pool.cooldown_until
                            .get(idx)
                            .is_none_or(|until| now >= *until)
                    })
                    .count();
                (
                    provider.clone(),
                    KeyPoolStats {
                        total: pool.keys.len(),
                        available,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_csv_keys_trimming_blanks() {
        assert_eq!(
            parse_csv_keys(" a , b,, c "),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn round_robins_across_seeded_keys() {
        let rotator = KeyRotator::with_cooldown(Duration::from_secs(60));
        rotator.set_keys("anthropic", vec!["k1".to_string(), "k2".to_string()]);

        assert_eq!(rotator.get_key("anthropic").as_deref(), Some("k1"));
        assert_eq!(rotator.get_key("anthropic").as_deref(), Some("k2"));
        assert_eq!(rotator.get_key("anthropic").as_deref(), Some("k1"));
    }

    #[test]
    fn rate_limited_key_is_skipped_until_cooldown_elapses() {
        let rotator = KeyRotator::with_cooldown(Duration::from_millis(20));
        rotator.set_keys("anthropic", vec!["k1".to_string(), "k2".to_string()]);

        assert_eq!(rotator.get_key("anthropic").as_deref(), Some("k1"));
        rotator.mark_rate_limited("anthropic", "k2");
        // k2 was just marked, k1 should come back around.
        assert_eq!(rotator.get_key("anthropic").as_deref(), Some("k1"));

        std::thread::sleep(Duration::from_millis(30));
        // cooldown elapsed: k2 is available again.
        assert_eq!(rotator.get_key("anthropic").as_deref(), Some("k2"));
    }

    #[test]
    fn all_keys_in_cooldown_returns_none() {
        let rotator = KeyRotator::with_cooldown(Duration::from_secs(60));
        rotator.set_keys("anthropic", vec!["k1".to_string()]);
        rotator.get_key("anthropic");
        rotator.mark_rate_limited("anthropic", "k1");
        assert_eq!(rotator.get_key("anthropic"), None);
    }

    #[test]
    fn stats_reports_total_and_available() {
        let rotator = KeyRotator::with_cooldown(Duration::from_secs(60));
        rotator.set_keys("anthropic", vec!["k1".to_string(), "k2".to_string()]);
        rotator.mark_rate_limited("anthropic", "k1");

        let stats = rotator.stats();
        let anthropic = stats.get("anthropic").expect("provider present");
        assert_eq!(anthropic.total, 2);
        assert_eq!(anthropic.available, 1);
    }

    #[test]
    fn unknown_provider_returns_none() {
        let rotator = KeyRotator::new();
        assert!(rotator.get_key("unknown-provider").is_none());
    }

    #[test]
    fn require_key_distinguishes_unconfigured_from_rate_limited() {
        let rotator = KeyRotator::with_cooldown(Duration::from_secs(60));
        assert!(matches!(
            rotator.require_key("anthropic"),
            Err(KeyError::NoKeyConfigured(_))
        ));

        rotator.set_keys("anthropic", vec!["k1".to_string()]);
        rotator.get_key("anthropic");
        rotator.mark_rate_limited("anthropic", "k1");
        assert!(matches!(
            rotator.require_key("anthropic"),
            Err(KeyError::AllKeysRateLimited { .. })
        ));
    }
}
