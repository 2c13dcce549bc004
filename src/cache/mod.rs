//! Disk-backed LLM response cache for deduplicating deterministic API calls.
//!
//! Only calls with `temperature <= max_temperature_to_cache` (default 0.0)
//! are cached, keyed by a SHA-256 hash of `{cache_version, model,
//! temperature, messages, prompt_version_hash}`. Entries expire after
//! `ttl_seconds`. Cache failures (disk I/O, corruption) degrade to a miss
//! and are never propagated to the caller.

pub mod prompt_cache;
pub mod prompt_version;

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::message::Message;

const CACHE_VERSION: &str = "v1";
const DEFAULT_TTL_SECONDS: u64 = 86_400;

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error("llm cache io error: {0}")]
    #[diagnostic(code(research_agent::cache::io))]
    Io(#[from] std::io::Error),

    #[error("llm cache serialization error: {0}")]
    #[diagnostic(code(research_agent::cache::serde))]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    response: Value,
    cached_at: u64,
    ttl_seconds: u64,
}

#[derive(Serialize)]
struct KeyParts<'a> {
    version: &'a str,
    model: &'a str,
    temperature_bits: u64,
    messages: &'a [Message],
    extra: &'a str,
}

fn build_cache_key(model: &str, temperature: f64, messages: &[Message], extra: &str) -> String {
    let parts = KeyParts {
        version: CACHE_VERSION,
        model,
        temperature_bits: temperature.to_bits(),
        messages,
        extra,
    };
    let serialized = serde_json::to_vec(&parts).expect("KeyParts always serializes");
    hex_encode(&Sha256::digest(&serialized))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Disk-backed cache for deterministic LLM call responses.
pub struct LlmCache {
    cache_dir: PathBuf,
    ttl_seconds: u64,
    max_temperature: f64,
}

impl LlmCache {
    /// A cache rooted at `cache_dir` with the default 24h TTL, caching only
    /// temperature-0 calls.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self::with_options(cache_dir, DEFAULT_TTL_SECONDS, 0.0)
    }

    pub fn with_options(
        cache_dir: impl Into<PathBuf>,
        ttl_seconds: u64,
        max_temperature: f64,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ttl_seconds,
            max_temperature,
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.json"))
    }

    /// Look up a cached response. Returns `None` on a miss, a non-cacheable
    /// temperature, or any cache failure (logged, never propagated).
    pub fn get(
        &self,
        model: &str,
        temperature: f64,
        messages: &[Message],
        extra: &str,
    ) -> Option<Value> {
        if temperature > self.max_temperature {
            return None;
        }
        match self.try_get(model, temperature, messages, extra) {
            Ok(hit) => hit,
            Err(err) => {
                warn!(error = %err, "llm_cache_read_failed");
                None
            }
        }
    }

    fn try_get(
        &self,
        model: &str,
        temperature: f64,
        messages: &[Message],
        extra: &str,
    ) -> Result<Option<Value>, CacheError> {
        let key = build_cache_key(model, temperature, messages, extra);
        let path = self.entry_path(&key);
        if !path.exists() {
            debug!(model, key_prefix = &key[..12.min(key.len())], "llm_cache_miss");
            return Ok(None);
        }

        let raw = fs::read(&path)?;
        let entry: CacheEntry = serde_json::from_slice(&raw)?;
        if now_secs().saturating_sub(entry.cached_at) >= entry.ttl_seconds {
            let _ = fs::remove_file(&path);
            debug!(model, key_prefix = &key[..12.min(key.len())], "llm_cache_expired");
            return Ok(None);
        }

        debug!(model, key_prefix = &key[..12.min(key.len())], "llm_cache_hit");
        Ok(Some(entry.response))
    }

    /// Store a response in the cache. Returns whether it was cached (a
    /// non-cacheable temperature or a cache failure both return `false`).
    pub fn set(
        &self,
        model: &str,
        temperature: f64,
        messages: &[Message],
        response: Value,
        extra: &str,
    ) -> bool {
        if temperature > self.max_temperature {
            return false;
        }
        match self.try_set(model, temperature, messages, response, extra) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "llm_cache_write_failed");
                false
            }
        }
    }

    fn try_set(
        &self,
        model: &str,
        temperature: f64,
        messages: &[Message],
        response: Value,
        extra: &str,
    ) -> Result<(), CacheError> {
        fs::create_dir_all(&self.cache_dir)?;
        let key = build_cache_key(model, temperature, messages, extra);
        let entry = CacheEntry {
            response,
            cached_at: now_secs(),
            ttl_seconds: self.ttl_seconds,
        };
        fs::write(self.entry_path(&key), serde_json::to_vec(&entry)?)?;
        debug!(model, key_prefix = &key[..12.min(key.len())], ttl_seconds = self.ttl_seconds, "llm_cache_set");
        Ok(())
    }

    /// Remove every entry from the cache, returning the count removed.
    pub fn clear(&self) -> usize {
        let Ok(read_dir) = fs::read_dir(&self.cache_dir) else {
            return 0;
        };
        read_dir
            .flatten()
            .filter(|entry| fs::remove_file(entry.path()).is_ok())
            .count()
    }

    /// Number of entries currently on disk.
    pub fn size(&self) -> usize {
        fs::read_dir(&self.cache_dir)
            .map(|d| d.flatten().count())
            .unwrap_or(0)
    }
}
