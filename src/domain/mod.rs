//! Research-session domain state.
//!
//! The generic engine keeps workflow state in [`crate::state::VersionedState`]'s
//! three channels (messages, extra, errors). This module layers the research
//! pipeline's typed fields (§3 of the originating design) on top of the
//! `extra` channel: each field lives under a well-known JSON key, with
//! accessor helpers here so node code never hand-rolls key strings or
//! `serde_json::from_value` boilerplate.
//!
//! Append-only fields are merged by [`reducer::DomainReducer`] instead of the
//! engine's default last-writer-wins `MapMerge`; see that module for which
//! keys are append vs. replace.

pub mod reducer;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::collections::ExtraMap;

/// Keys under which research-session fields live in the `extra` channel.
pub mod keys {
    pub const QUERY: &str = "query";
    pub const SUB_QUESTIONS: &str = "sub_questions";
    pub const CURRENT_SUBTOPIC_INDEX: &str = "current_subtopic_index";
    pub const SEARCH_RESULTS: &str = "search_results";
    pub const SEEN_URLS: &str = "seen_urls";
    pub const SCRAPED_CONTENT: &str = "scraped_content";
    pub const SUMMARIES: &str = "summaries";
    pub const FINAL_REPORT: &str = "final_report";
    pub const SOURCES: &str = "sources";
    pub const ERROR_LOG: &str = "error_log";
    pub const SEARCH_RETRY_COUNT: &str = "search_retry_count";
    pub const REPORT_METADATA: &str = "report_metadata";

    /// Keys whose updates are merged by concatenation rather than overwrite.
    pub const APPEND_ONLY: &[&str] = &[
        SEARCH_RESULTS,
        SEEN_URLS,
        SCRAPED_CONTENT,
        SUMMARIES,
        SOURCES,
        ERROR_LOG,
    ];
}

/// One sub-question produced by Plan, 1-based `id` assigned sequentially.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SubQuestion {
    pub id: u32,
    pub question: String,
    pub rationale: String,
}

/// A single search hit, scored and attributed to the sub-question that
/// produced the query.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub sub_question_id: u32,
    pub query: String,
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub score: f32,
}

/// Sanitized, quality-scored page content attributed to a sub-question.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScrapedPage {
    pub url: String,
    pub sub_question_id: u32,
    pub title: String,
    pub content: String,
    pub word_count: u32,
    pub quality_score: f32,
}

/// A compressed per-sub-question summary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub sub_question_id: u32,
    pub summary: String,
    pub source_urls: Vec<String>,
    pub key_findings: Vec<String>,
}

/// A cited source, surfaced in the report's Sources section.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub url: String,
    pub title: String,
    pub accessed_at: DateTime<Utc>,
    pub relevance: f32,
}

/// One dropped/irrecoverable event recorded against the session, distinct
/// from the recovery orchestrator's dead-letter queue (which tracks retry
/// exhaustion, not domain-level content rejection).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorLogEntry {
    pub step: String,
    pub message: String,
    pub recoverable: bool,
}

/// Advisory quality-check result, attached under `report_metadata.quality`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct QualityReport {
    pub word_count: usize,
    pub has_required_sections: bool,
    pub citation_count: usize,
    pub subtopic_coverage: f32,
    pub passed: bool,
}

fn get_vec<T: for<'de> Deserialize<'de>>(extra: &ExtraMap, key: &str) -> Vec<T> {
    extra
        .get(key)
        .and_then(|v| serde_json::from_value::<Vec<T>>(v.clone()).ok())
        .unwrap_or_default()
}

fn get_scalar<T: for<'de> Deserialize<'de>>(extra: &ExtraMap, key: &str) -> Option<T> {
    extra
        .get(key)
        .and_then(|v| serde_json::from_value::<T>(v.clone()).ok())
}

/// Read-only view over a `StateSnapshot`'s extra channel, typed per-field.
pub struct DomainView<'a> {
    extra: &'a ExtraMap,
}

impl<'a> DomainView<'a> {
    pub fn new(extra: &'a ExtraMap) -> Self {
        Self { extra }
    }

    pub fn query(&self) -> String {
        get_scalar(self.extra, keys::QUERY).unwrap_or_default()
    }

    pub fn sub_questions(&self) -> Vec<SubQuestion> {
        get_vec(self.extra, keys::SUB_QUESTIONS)
    }

    pub fn current_subtopic_index(&self) -> usize {
        get_scalar(self.extra, keys::CURRENT_SUBTOPIC_INDEX).unwrap_or(0)
    }

    pub fn search_results(&self) -> Vec<SearchResult> {
        get_vec(self.extra, keys::SEARCH_RESULTS)
    }

    pub fn seen_urls(&self) -> Vec<String> {
        get_vec(self.extra, keys::SEEN_URLS)
    }

    pub fn scraped_content(&self) -> Vec<ScrapedPage> {
        get_vec(self.extra, keys::SCRAPED_CONTENT)
    }

    pub fn summaries(&self) -> Vec<Summary> {
        get_vec(self.extra, keys::SUMMARIES)
    }

    pub fn final_report(&self) -> Option<String> {
        get_scalar(self.extra, keys::FINAL_REPORT)
    }

    pub fn sources(&self) -> Vec<Source> {
        get_vec(self.extra, keys::SOURCES)
    }

    pub fn error_log(&self) -> Vec<ErrorLogEntry> {
        get_vec(self.extra, keys::ERROR_LOG)
    }

    pub fn search_retry_count(&self) -> u32 {
        get_scalar(self.extra, keys::SEARCH_RETRY_COUNT).unwrap_or(0)
    }

    pub fn report_metadata(&self) -> Value {
        self.extra
            .get(keys::REPORT_METADATA)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

/// Builds a `NodePartial`-ready extra map for scalar-replace fields.
#[derive(Default)]
pub struct DomainUpdate {
    map: FxHashMap<String, Value>,
}

impl DomainUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_query(mut self, query: impl Into<String>) -> Self {
        self.map
            .insert(keys::QUERY.to_string(), Value::String(query.into()));
        self
    }

    pub fn set_sub_questions(mut self, qs: &[SubQuestion]) -> Self {
        self.map.insert(
            keys::SUB_QUESTIONS.to_string(),
            serde_json::to_value(qs).expect("SubQuestion serializes"),
        );
        self
    }

    pub fn set_current_subtopic_index(mut self, idx: usize) -> Self {
        self.map.insert(
            keys::CURRENT_SUBTOPIC_INDEX.to_string(),
            Value::from(idx as u64),
        );
        self
    }

    pub fn append_search_results(mut self, results: &[SearchResult]) -> Self {
        self.map.insert(
            keys::SEARCH_RESULTS.to_string(),
            serde_json::to_value(results).expect("SearchResult serializes"),
        );
        self
    }

    pub fn append_seen_urls(mut self, urls: &[String]) -> Self {
        self.map.insert(
            keys::SEEN_URLS.to_string(),
            serde_json::to_value(urls).expect("urls serialize"),
        );
        self
    }

    pub fn append_scraped_content(mut self, pages: &[ScrapedPage]) -> Self {
        self.map.insert(
            keys::SCRAPED_CONTENT.to_string(),
            serde_json::to_value(pages).expect("ScrapedPage serializes"),
        );
        self
    }

    pub fn append_summaries(mut self, summaries: &[Summary]) -> Self {
        self.map.insert(
            keys::SUMMARIES.to_string(),
            serde_json::to_value(summaries).expect("Summary serializes"),
        );
        self
    }

    pub fn set_final_report(mut self, report: impl Into<String>) -> Self {
        self.map.insert(
            keys::FINAL_REPORT.to_string(),
            Value::String(report.into()),
        );
        self
    }

    pub fn append_sources(mut self, sources: &[Source]) -> Self {
        self.map.insert(
            keys::SOURCES.to_string(),
            serde_json::to_value(sources).expect("Source serializes"),
        );
        self
    }

    pub fn append_error_log(mut self, entries: &[ErrorLogEntry]) -> Self {
        self.map.insert(
            keys::ERROR_LOG.to_string(),
            serde_json::to_value(entries).expect("ErrorLogEntry serializes"),
        );
        self
    }

    pub fn set_search_retry_count(mut self, count: u32) -> Self {
        self.map.insert(
            keys::SEARCH_RETRY_COUNT.to_string(),
            Value::from(count),
        );
        self
    }

    pub fn set_report_metadata(mut self, metadata: Value) -> Self {
        self.map
            .insert(keys::REPORT_METADATA.to_string(), metadata);
        self
    }

    pub fn into_map(self) -> FxHashMap<String, Value> {
        self.map
    }
}
