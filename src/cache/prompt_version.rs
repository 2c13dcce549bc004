//! Prompt versioning via content hashing for LLM-cache invalidation.
//!
//! Each prompt template gets a stable SHA-256 hash of its file content that
//! can be folded into an [`super::LlmCache`] key, so cache entries
//! automatically invalidate when prompt content changes. Hashes are
//! memoized per process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::hex_encode;

static HASH_CACHE: RwLock<Option<HashMap<String, String>>> = RwLock::new(None);

fn prompts_dir() -> PathBuf {
    Path::new("./prompts").to_path_buf()
}

/// Compute the SHA-256 hash of `prompt_name`.yaml's content under the
/// prompts directory, memoized in-process. Returns an empty string if the
/// file doesn't exist.
pub fn prompt_hash(prompt_name: &str) -> String {
    {
        let cache = HASH_CACHE.read().expect("hash cache lock not poisoned");
        if let Some(map) = cache.as_ref() {
            if let Some(hash) = map.get(prompt_name) {
                return hash.clone();
            }
        }
    }

    let path = prompts_dir().join(format!("{prompt_name}.yaml"));
    let digest = match std::fs::read(&path) {
        Ok(content) => {
            let hash = hex_encode(&Sha256::digest(&content));
            debug!(prompt_name, hash_prefix = &hash[..12.min(hash.len())], "prompt_hash_computed");
            hash
        }
        Err(_) => {
            warn!(prompt_name, path = %path.display(), "prompt_file_not_found");
            String::new()
        }
    };

    let mut cache = HASH_CACHE.write().expect("hash cache lock not poisoned");
    cache
        .get_or_insert_with(HashMap::new)
        .insert(prompt_name.to_string(), digest.clone());
    digest
}

/// Combine the hashes of several prompt templates into one digest, so a
/// node using multiple templates invalidates its cache if any of them
/// change.
pub fn prompt_hash_combined(prompt_names: &[&str]) -> String {
    let mut sorted: Vec<&str> = prompt_names.to_vec();
    sorted.sort_unstable();
    let combined = sorted
        .iter()
        .map(|name| prompt_hash(name))
        .collect::<Vec<_>>()
        .join("|");
    hex_encode(&Sha256::digest(combined.as_bytes()))
}

/// Clear the in-memory hash cache. Useful for tests.
pub fn clear_hash_cache() {
    let mut cache = HASH_CACHE.write().expect("hash cache lock not poisoned");
    *cache = None;
}
