//! Narrow collaborator interfaces for external systems.
//!
//! Mirrors the design of [`crate::memory::MemoryStore`]: a small async trait
//! per external dependency (LLM provider, search backend, page extractor) so
//! pipeline nodes depend on a capability, not a concrete SDK, and tests can
//! supply deterministic doubles instead of hitting the network.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::message::Message;

#[cfg(any(feature = "llm", feature = "collectors"))]
pub mod live;

#[derive(Debug, Error, Diagnostic)]
pub enum CollaboratorError {
    #[error("{provider} request failed: {message}")]
    #[diagnostic(code(research_agent::collab::request_failed))]
    RequestFailed { provider: &'static str, message: String },

    #[error("{provider} rate limited")]
    #[diagnostic(code(research_agent::collab::rate_limited))]
    RateLimited { provider: &'static str },

    #[error("{provider} returned a response that failed schema validation: {message}")]
    #[diagnostic(code(research_agent::collab::invalid_response))]
    InvalidResponse { provider: &'static str, message: String },

    #[error("{provider} request timed out")]
    #[diagnostic(code(research_agent::collab::timeout))]
    Timeout { provider: &'static str },
}

/// One LLM completion call's result and token accounting, as reported by the
/// provider (used for cost-tracker bookkeeping alongside the estimate already
/// reserved before dispatch).
#[derive(Clone, Debug)]
pub struct LlmCompletion {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Input tokens served from the provider's own prompt cache rather than
    /// computed fresh, per [`crate::cache::prompt_cache::CacheTracker`].
    /// `0` for providers/paths that don't report this (e.g. the disk
    /// [`crate::cache::LlmCache`] replay path, which never touches the wire).
    pub cached_input_tokens: u32,
}

/// A chat-completion provider. Implementations wrap a concrete SDK (e.g.
/// `rig-core`, gated by the `llm` feature); the engine only depends on this
/// trait so nodes stay testable without live credentials.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        messages: &[Message],
        temperature: f64,
    ) -> Result<LlmCompletion, CollaboratorError>;
}

/// One web-search hit, prior to relevance filtering/scoring.
#[derive(Clone, Debug)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub score: f32,
}

/// A web-search backend (e.g. Tavily, gated by the `collectors` feature).
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, CollaboratorError>;
}

/// Raw page fetch, pre-sanitization.
#[derive(Clone, Debug)]
pub struct FetchedPage {
    pub url: String,
    pub title: String,
    pub html: String,
}

/// A page-fetching engine. The primary implementation uses `reqwest` for
/// transport and delegates text extraction to [`crate::sanitize`]; the trait
/// boundary is kept here (rather than folded into the node) so a
/// headless-browser fallback engine can be substituted per §9's note that no
/// such fallback is implemented in this engine — callers needing one supply
/// their own `ScrapeExtractor`.
#[async_trait]
pub trait ScrapeExtractor: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CollaboratorError>;
}
