//! Cross-session research memory.
//!
//! Stores key findings from completed research sessions and recalls the
//! ones relevant to a later query, so the agent can build on prior work.
//! Backed by a narrow [`MemoryStore`] trait (`add`/`search`/
//! `check_duplicate`/`count`/`delete_collection`) rather than a vendored
//! vector engine — production deployments wire in a real embeddings-backed
//! store; [`InMemoryMemoryStore`] is a brute-force reference implementation
//! suitable for tests and small single-process deployments.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const DEFAULT_STALENESS_DAYS: i64 = 30;
const DEFAULT_RELEVANCE_THRESHOLD: f32 = 0.80;
const DEFAULT_MAX_RESULTS: usize = 5;
const SECONDS_PER_DAY: i64 = 86_400;
const DUPLICATE_SIMILARITY_THRESHOLD: f32 = 0.98;

#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    #[error("memory backend error: {0}")]
    #[diagnostic(code(research_agent::memory::backend))]
    Backend(String),
}

/// A document to persist into a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    pub content: String,
    pub query: String,
    pub stored_at_unix: i64,
}

/// A candidate match returned by a [`MemoryStore`] similarity search.
#[derive(Debug, Clone)]
pub struct SimilarityMatch {
    pub content: String,
    pub query: String,
    pub stored_at_unix: i64,
    pub score: f32,
}

/// A recalled memory entry, annotated with staleness relative to now.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub content: String,
    pub query: String,
    pub stored_at_unix: i64,
    pub score: f32,
    pub is_stale: bool,
}

/// Pluggable backend for cross-session memory storage and retrieval,
/// narrow by design so a real vector/embeddings store can implement it
/// without the engine depending on one directly.
///
/// Implementations may be a real embeddings/vector store; this crate ships
/// only the trait plus [`InMemoryMemoryStore`], a brute-force reference
/// implementation.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist `docs`, returning the number actually stored.
    async fn add(&self, docs: Vec<MemoryDocument>) -> Result<usize, MemoryError>;

    /// Return up to `n_results` matches for `query`, optionally restricted
    /// to entries whose stored query equals `filter`.
    async fn search(
        &self,
        query: &str,
        n_results: usize,
        filter: Option<&str>,
    ) -> Result<Vec<SimilarityMatch>, MemoryError>;

    /// Whether near-duplicate content is already stored.
    async fn check_duplicate(&self, content: &str) -> Result<bool, MemoryError>;

    async fn count(&self) -> Result<usize, MemoryError>;

    async fn delete_collection(&self) -> Result<(), MemoryError>;
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Wraps a [`MemoryStore`] with the relevance/staleness policy shared by all
/// backends: a similarity floor for recall, and an age threshold beyond
/// which entries are flagged stale rather than discarded.
pub struct ResearchMemory<S: MemoryStore> {
    store: S,
    relevance_threshold: f32,
    staleness_days: i64,
    max_results: usize,
}

impl<S: MemoryStore> ResearchMemory<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            relevance_threshold: DEFAULT_RELEVANCE_THRESHOLD,
            staleness_days: DEFAULT_STALENESS_DAYS,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    #[must_use]
    pub fn with_relevance_threshold(mut self, threshold: f32) -> Self {
        self.relevance_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_staleness_days(mut self, days: i64) -> Self {
        self.staleness_days = days;
        self
    }

    #[must_use]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Store findings from a completed research session, skipping blanks
    /// and anything already recorded near-verbatim.
    pub async fn store(&self, findings: &[String], query: &str) -> Result<usize, MemoryError> {
        let now = now_unix();
        let mut docs = Vec::with_capacity(findings.len());
        for finding in findings {
            let trimmed = finding.trim();
            if trimmed.is_empty() {
                continue;
            }
            if self.store.check_duplicate(trimmed).await? {
                continue;
            }
            docs.push(MemoryDocument {
                content: trimmed.to_string(),
                query: query.to_string(),
                stored_at_unix: now,
            });
        }
        if docs.is_empty() {
            return Ok(0);
        }
        let stored = self.store.add(docs).await?;
        info!(query, findings_count = stored, "memory_stored");
        Ok(stored)
    }

    /// Recall memories relevant to `query`, above the relevance threshold.
    pub async fn recall(&self, query: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        let now = now_unix();
        let matches = self.store.search(query, self.max_results, None).await?;

        let entries: Vec<MemoryEntry> = matches
            .into_iter()
            .filter(|m| m.score >= self.relevance_threshold)
            .map(|m| {
                let age_days = (now - m.stored_at_unix) as f64 / SECONDS_PER_DAY as f64;
                let is_stale = age_days > self.staleness_days as f64;
                MemoryEntry {
                    content: m.content,
                    query: m.query,
                    stored_at_unix: m.stored_at_unix,
                    score: m.score,
                    is_stale,
                }
            })
            .collect();

        info!(
            query,
            results_count = entries.len(),
            stale_count = entries.iter().filter(|e| e.is_stale).count(),
            "memory_recalled"
        );
        Ok(entries)
    }

    /// Format recalled entries as an LLM-ready context block.
    pub fn format_context(entries: &[MemoryEntry]) -> String {
        if entries.is_empty() {
            return String::new();
        }
        let mut lines = vec!["Previous research findings:".to_string()];
        for entry in entries {
            let staleness_note = if entry.is_stale { " [stale]" } else { "" };
            lines.push(format!("- {}{staleness_note}", entry.content));
        }
        lines.join("\n")
    }

    pub async fn count(&self) -> Result<usize, MemoryError> {
        self.store.count().await
    }

    pub async fn clear(&self) -> Result<(), MemoryError> {
        self.store.delete_collection().await?;
        info!("memory_cleared");
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredDocument {
    content: String,
    query: String,
    stored_at_unix: i64,
    terms: Vec<String>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn jaccard_similarity(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a: std::collections::HashSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: std::collections::HashSet<&str> = b.iter().map(String::as_str).collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Brute-force in-memory [`MemoryStore`] using term-overlap (Jaccard)
/// similarity in place of real embeddings. Intended for tests and small
/// single-process deployments, not as a production vector store.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    docs: parking_lot::RwLock<Vec<StoredDocument>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn add(&self, docs: Vec<MemoryDocument>) -> Result<usize, MemoryError> {
        let mut guard = self.docs.write();
        let added = docs.len();
        for doc in docs {
            guard.push(StoredDocument {
                terms: tokenize(&doc.content),
                content: doc.content,
                query: doc.query,
                stored_at_unix: doc.stored_at_unix,
            });
        }
        Ok(added)
    }

    async fn search(
        &self,
        query: &str,
        n_results: usize,
        filter: Option<&str>,
    ) -> Result<Vec<SimilarityMatch>, MemoryError> {
        let query_terms = tokenize(query);
        let docs = self.docs.read();
        let mut scored: Vec<SimilarityMatch> = docs
            .iter()
            .filter(|doc| filter.is_none_or(|f| doc.query == f))
            .map(|doc| SimilarityMatch {
                content: doc.content.clone(),
                query: doc.query.clone(),
                stored_at_unix: doc.stored_at_unix,
                score: jaccard_similarity(&query_terms, &doc.terms),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n_results);
        Ok(scored)
    }

    async fn check_duplicate(&self, content: &str) -> Result<bool, MemoryError> {
        let terms = tokenize(content);
        let docs = self.docs.read();
        Ok(docs
            .iter()
            .any(|doc| jaccard_similarity(&terms, &doc.terms) >= DUPLICATE_SIMILARITY_THRESHOLD))
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.docs.read().len())
    }

    async fn delete_collection(&self) -> Result<(), MemoryError> {
        self.docs.write().clear();
        Ok(())
    }
}
