//! File-backed API key store and per-key sliding-window rate limiting.
//!
//! Keys are opaque `ra_<24-char urlsafe>` tokens, persisted as a JSON array
//! alongside usage metadata. Verification and rate limiting both happen
//! in-process; the store is reloaded from disk lazily so multiple server
//! instances sharing the same file stay (eventually) consistent.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const KEY_PREFIX: &str = "ra_";
const KEY_RANDOM_LEN: usize = 24;
const URLSAFE_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Error, Diagnostic)]
pub enum AuthError {
    #[error("missing API key")]
    #[diagnostic(code(research_agent::api::auth::missing_key))]
    MissingKey,

    #[error("invalid or revoked API key")]
    #[diagnostic(code(research_agent::api::auth::invalid_key))]
    InvalidKey,

    #[error("rate limit exceeded for key {key_id:?}: {limit}/min")]
    #[diagnostic(code(research_agent::api::auth::rate_limited))]
    RateLimited { key_id: String, limit: u32 },

    #[error("failed to read key store at {path}: {source}")]
    #[diagnostic(code(research_agent::api::auth::store_io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse key store at {path}: {source}")]
    #[diagnostic(code(research_agent::api::auth::store_parse))]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl AuthError {
    /// HTTP status code a transport layer should map this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::MissingKey | AuthError::InvalidKey => 401,
            AuthError::RateLimited { .. } => 429,
            AuthError::Io { .. } | AuthError::Parse { .. } => 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key_id: String,
    /// Hash-free by design: the key itself is the secret, stored verbatim.
    /// Acceptable here because the store file is expected to carry the same
    /// file permissions as other local credential material.
    pub key: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
    pub request_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

fn generate_key() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..KEY_RANDOM_LEN)
        .map(|_| {
            let idx = rng.random_range(0..URLSAFE_ALPHABET.len());
            URLSAFE_ALPHABET[idx] as char
        })
        .collect();
    format!("{KEY_PREFIX}{suffix}")
}

/// JSON-file-backed store of issued API keys.
///
/// Mirrors [`crate::keys::KeyRotator`]'s "load from disk, mutate under a
/// lock, persist on write" shape, but for server-issued credentials rather
/// than upstream provider keys.
pub struct ApiKeyStore {
    path: PathBuf,
    records: Mutex<Vec<ApiKeyRecord>>,
}

impl ApiKeyStore {
    /// Load an existing store, or start empty if the file doesn't exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| AuthError::Parse {
                path: path.display().to_string(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(AuthError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn persist(&self, records: &[ApiKeyRecord]) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AuthError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        }
        let raw = serde_json::to_vec_pretty(records).map_err(|source| AuthError::Parse {
            path: self.path.display().to_string(),
            source,
        })?;
        std::fs::write(&self.path, raw).map_err(|source| AuthError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Mint and persist a new key, returning the plaintext (shown once).
    pub fn create_key(&self, label: &str) -> Result<ApiKeyRecord, AuthError> {
        let record = ApiKeyRecord {
            key_id: uuid::Uuid::new_v4().to_string(),
            key: generate_key(),
            label: label.to_string(),
            created_at: Utc::now(),
            revoked: false,
            request_count: 0,
            last_used_at: None,
        };
        let mut records = self.records.lock();
        records.push(record.clone());
        self.persist(&records)?;
        info!(key_id = %record.key_id, label, "api_key_created");
        Ok(record)
    }

    pub fn revoke_key(&self, key_id: &str) -> Result<(), AuthError> {
        let mut records = self.records.lock();
        if let Some(record) = records.iter_mut().find(|r| r.key_id == key_id) {
            record.revoked = true;
        }
        self.persist(&records)?;
        info!(key_id, "api_key_revoked");
        Ok(())
    }

    pub fn list_keys(&self) -> Vec<ApiKeyRecord> {
        self.records.lock().clone()
    }

    /// Verify a presented key is active, returning its record.
    pub fn verify(&self, presented: &str) -> Result<ApiKeyRecord, AuthError> {
        let records = self.records.lock();
        records
            .iter()
            .find(|r| r.key == presented && !r.revoked)
            .cloned()
            .ok_or(AuthError::InvalidKey)
    }

    /// Record a successful request against `key_id`.
    pub fn update_usage(&self, key_id: &str) -> Result<(), AuthError> {
        let mut records = self.records.lock();
        if let Some(record) = records.iter_mut().find(|r| r.key_id == key_id) {
            record.request_count += 1;
            record.last_used_at = Some(Utc::now());
        }
        self.persist(&records)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Per-key sliding-window rate limiter over a rolling 60-second window.
pub struct RateLimiter {
    window_seconds: u64,
    windows: Mutex<FxHashMap<String, VecDeque<u64>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(60)
    }

    pub fn with_window(window_seconds: u64) -> Self {
        Self {
            window_seconds,
            windows: Mutex::new(FxHashMap::default()),
        }
    }

    /// Check and record one request for `key_id`. Returns
    /// `(allowed, remaining, reset_unix)`.
    pub fn check(&self, key_id: &str, limit_per_minute: u32) -> (bool, u32, u64) {
        let now = unix_now();
        let cutoff = now.saturating_sub(self.window_seconds);
        let mut windows = self.windows.lock();
        let bucket = windows.entry(key_id.to_string()).or_default();
        while bucket.front().is_some_and(|&ts| ts < cutoff) {
            bucket.pop_front();
        }

        let reset = bucket.front().copied().unwrap_or(now) + self.window_seconds;
        if bucket.len() as u32 >= limit_per_minute {
            warn!(key_id, limit = limit_per_minute, "rate_limit_exceeded");
            return (false, 0, reset);
        }

        bucket.push_back(now);
        let remaining = limit_per_minute.saturating_sub(bucket.len() as u32);
        (true, remaining, reset)
    }
}

/// Verify `presented` against `store`, then check `limiter`. On success,
/// records usage and returns the matched record.
pub fn require_valid_key(
    presented: Option<&str>,
    store: &ApiKeyStore,
    limiter: &RateLimiter,
    limit_per_minute: u32,
) -> Result<ApiKeyRecord, AuthError> {
    let presented = presented.ok_or(AuthError::MissingKey)?;
    let record = store.verify(presented)?;
    let (allowed, _remaining, _reset) = limiter.check(&record.key_id, limit_per_minute);
    if !allowed {
        return Err(AuthError::RateLimited {
            key_id: record.key_id.clone(),
            limit: limit_per_minute,
        });
    }
    let _ = store.update_usage(&record.key_id);
    Ok(record)
}

#[allow(dead_code)]
fn store_path_default() -> PathBuf {
    Path::new("api_keys.json").to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_carry_prefix_and_length() {
        let key = generate_key();
        assert!(key.starts_with(KEY_PREFIX));
        assert_eq!(key.len(), KEY_PREFIX.len() + KEY_RANDOM_LEN);
    }

    #[test]
    fn create_verify_and_revoke_round_trip() {
        let dir = tempfile_dir();
        let store = ApiKeyStore::load(dir.join("keys.json")).unwrap();
        let record = store.create_key("ci").unwrap();

        let verified = store.verify(&record.key).unwrap();
        assert_eq!(verified.key_id, record.key_id);

        store.revoke_key(&record.key_id).unwrap();
        assert!(matches!(
            store.verify(&record.key),
            Err(AuthError::InvalidKey)
        ));
    }

    #[test]
    fn store_persists_across_reload() {
        let dir = tempfile_dir();
        let path = dir.join("keys.json");
        let record = {
            let store = ApiKeyStore::load(&path).unwrap();
            store.create_key("persisted").unwrap()
        };

        let reloaded = ApiKeyStore::load(&path).unwrap();
        assert!(reloaded.verify(&record.key).is_ok());
    }

    #[test]
    fn rate_limiter_blocks_once_limit_reached() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            let (allowed, _, _) = limiter.check("k1", 3);
            assert!(allowed);
        }
        let (allowed, remaining, _) = limiter.check("k1", 3);
        assert!(!allowed);
        assert_eq!(remaining, 0);
    }

    #[test]
    fn rate_limiter_tracks_keys_independently() {
        let limiter = RateLimiter::new();
        limiter.check("a", 1);
        let (allowed, _, _) = limiter.check("b", 1);
        assert!(allowed);
    }

    #[test]
    fn require_valid_key_rejects_missing_header() {
        let dir = tempfile_dir();
        let store = ApiKeyStore::load(dir.join("keys.json")).unwrap();
        let limiter = RateLimiter::new();
        assert!(matches!(
            require_valid_key(None, &store, &limiter, 60),
            Err(AuthError::MissingKey)
        ));
    }

    fn tempfile_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "research-agent-auth-test-{}",
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
