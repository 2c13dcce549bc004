//! The five research pipeline nodes (plan, search, scrape, summarize,
//! synthesize), implementing [`crate::node::Node`] the way the teacher's
//! demo nodes do (see `demos/basic_nodes.rs`): a plain struct holding its
//! collaborators, constructed once and shared (via `Arc`) across a session.

mod plan;
mod scrape;
mod search;
mod summarize;
mod synthesize;

pub use plan::PlanNode;
pub use scrape::ScrapeNode;
pub use search::SearchNode;
pub use summarize::SummarizeNode;
pub use synthesize::SynthesizeNode;

use std::time::Duration;

/// Shared tuning knobs for the pipeline nodes, mirroring §6's configuration
/// surface. Constructed once per session by the config loader / session
/// manager and cloned into each node.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub primary_model: String,
    pub economy_model: String,
    pub search_max_results: usize,
    pub search_relevance_min: f32,
    pub search_concurrency: usize,
    pub search_expand: bool,
    pub search_retry_attempts: u32,
    pub search_retry_backoff_initial: Duration,
    pub search_retry_backoff_max: Duration,
    pub scrape_concurrency: usize,
    pub scrape_timeout: Duration,
    pub scrape_max_bytes: usize,
    pub scrape_quality_min: f32,
    pub scrape_paywall_max: f32,
    /// When set, Summarize appends each subtopic summary to a Markdown file
    /// here as it completes, so a crash mid-run still leaves a partial,
    /// parseable report on disk.
    pub report_dir: Option<std::path::PathBuf>,
    /// Conversation turns kept in full detail by the session's
    /// [`crate::compaction::ContextManager`] before older tool turns get
    /// masked.
    pub compaction_window_turns: usize,
    /// Token budget that triggers a compaction pass once exceeded.
    pub compaction_max_tokens: u32,
    /// Turns to wait before rescanning after a compaction pass masked
    /// nothing.
    pub compaction_cooldown_turns: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            primary_model: "claude-sonnet-4".to_string(),
            economy_model: "claude-haiku-4".to_string(),
            search_max_results: 10,
            search_relevance_min: 0.3,
            search_concurrency: 3,
            search_expand: true,
            search_retry_attempts: 3,
            search_retry_backoff_initial: Duration::from_secs(1),
            search_retry_backoff_max: Duration::from_secs(30),
            scrape_concurrency: 5,
            scrape_timeout: Duration::from_secs(30),
            scrape_max_bytes: 500_000,
            scrape_quality_min: 0.3,
            scrape_paywall_max: 0.6,
            report_dir: None,
            compaction_window_turns: 20,
            compaction_max_tokens: 8_000,
            compaction_cooldown_turns: 5,
        }
    }
}

/// Exponential backoff with decorrelated jitter, capped at `max`. Grounded on
/// [`crate::schedulers::recovery::RecoveryPolicy`]'s backoff shape, but
/// jittered since this guards per-call search retries rather than whole-node
/// dispatch.
pub(crate) fn jittered_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let scale = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    let base = initial.saturating_mul(scale).min(max);
    let jitter_ms = rand::random::<u64>() % (base.as_millis() as u64 / 2 + 1);
    base + Duration::from_millis(jitter_ms)
}
