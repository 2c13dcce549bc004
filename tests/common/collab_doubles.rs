#![allow(dead_code)]

use async_trait::async_trait;
use research_agent::collab::{
    CollaboratorError, FetchedPage, LlmClient, LlmCompletion, ScrapeExtractor, SearchBackend,
    SearchHit,
};
use research_agent::message::Message;

/// Never actually called in the session-manager admission/budget tests —
/// present so [`research_agent::graphs::research::build_research_graph`] has
/// something to wire up.
pub struct NoopLlm;

#[async_trait]
impl LlmClient for NoopLlm {
    async fn complete(
        &self,
        _model: &str,
        _system_prompt: &str,
        _messages: &[Message],
        _temperature: f64,
    ) -> Result<LlmCompletion, CollaboratorError> {
        Ok(LlmCompletion {
            content: "[]".to_string(),
            input_tokens: 0,
            output_tokens: 0,
            cached_input_tokens: 0,
        })
    }
}

pub struct NoopSearch;

#[async_trait]
impl SearchBackend for NoopSearch {
    async fn search(&self, _query: &str, _n: usize) -> Result<Vec<SearchHit>, CollaboratorError> {
        Ok(vec![])
    }
}

pub struct NoopScrape;

#[async_trait]
impl ScrapeExtractor for NoopScrape {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CollaboratorError> {
        Ok(FetchedPage {
            url: url.to_string(),
            title: String::new(),
            html: String::new(),
        })
    }
}
