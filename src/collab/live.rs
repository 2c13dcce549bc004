//! Concrete network-backed collaborator implementations.
//!
//! [`AnthropicLlmClient`] talks to Anthropic's Messages API directly over
//! `reqwest` rather than through `rig-core` (which this crate already uses,
//! behind the `llm` feature, for the *client* side of MCP dialing — a
//! general agent framework, not a thin completion wrapper). A plain REST
//! call is the smaller, more auditable surface for the one thing this
//! collaborator needs: one request in, one completion out.
//!
//! [`TavilySearchClient`] and [`HttpScrapeExtractor`] are gated by the
//! `collectors` feature, matching the `reqwest`/`scraper` dependencies
//! declared there.

#![cfg(any(feature = "llm", feature = "collectors"))]

use async_trait::async_trait;
use serde_json::json;
use tracing::{instrument, warn};

use crate::collab::CollaboratorError;
use crate::message::Message;

#[cfg(feature = "llm")]
use crate::cache::prompt_cache::order_for_cache;

#[cfg(feature = "llm")]
use std::sync::Arc;
#[cfg(feature = "llm")]
use crate::keys::KeyRotator;

#[cfg(feature = "llm")]
const ANTHROPIC_PROVIDER: &str = "anthropic";

#[cfg(feature = "llm")]
pub struct AnthropicLlmClient {
    http: reqwest::Client,
    keys: Arc<KeyRotator>,
    base_url: String,
}

#[cfg(feature = "llm")]
impl AnthropicLlmClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com/v1/messages";
    const ANTHROPIC_VERSION: &'static str = "2023-06-01";
    const DEFAULT_MAX_TOKENS: u32 = 4096;

    /// `keys` should already have its `"anthropic"` pool seeded (via
    /// [`KeyRotator::set_keys`] or the `ANTHROPIC_API_KEY(S)` env vars) —
    /// shared with any other collaborator rotating the same provider.
    pub fn new(keys: Arc<KeyRotator>) -> Self {
        Self::with_base_url(keys, Self::DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(keys: Arc<KeyRotator>, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            keys,
            base_url,
        }
    }
}

#[cfg(feature = "llm")]
#[async_trait]
impl crate::collab::LlmClient for AnthropicLlmClient {
    #[instrument(skip(self, system_prompt, messages), fields(model))]
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        messages: &[Message],
        temperature: f64,
    ) -> Result<crate::collab::LlmCompletion, CollaboratorError> {
        // Order the request stable-prefix-first (system, then every turn but
        // the latest) so the provider's own prompt cache keeps matching as
        // this session's conversation grows, instead of re-pricing the whole
        // history on every call.
        let turns: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();
        let split_at = turns.len().saturating_sub(1);
        let (history, latest) = turns.split_at(split_at);
        let cache_payload = order_for_cache(system_prompt, &[], history, latest.first());

        let body = json!({
            "model": model,
            "system": cache_payload.system,
            "max_tokens": Self::DEFAULT_MAX_TOKENS,
            "temperature": temperature,
            "messages": cache_payload.messages,
        });

        // Rate limit on one key cools that key down and hands the next
        // request to the next key in the pool; once every key is cooling,
        // `get_key` returns `None` and the call falls through to the same
        // transient `RateLimited` error the recovery scheduler already
        // retries/dead-letters on.
        loop {
            let key = self
                .keys
                .get_key(ANTHROPIC_PROVIDER)
                .ok_or(CollaboratorError::RateLimited { provider: "anthropic" })?;

            let response = self
                .http
                .post(&self.base_url)
                .header("x-api-key", &key)
                .header("anthropic-version", Self::ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|err| {
                    if err.is_timeout() {
                        CollaboratorError::Timeout { provider: "anthropic" }
                    } else {
                        CollaboratorError::RequestFailed { provider: "anthropic", message: err.to_string() }
                    }
                })?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                warn!(provider = ANTHROPIC_PROVIDER, "rate_limited_rotating_key");
                self.keys.mark_rate_limited(ANTHROPIC_PROVIDER, &key);
                continue;
            }
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(CollaboratorError::RequestFailed {
                    provider: "anthropic",
                    message: format!("HTTP {status}: {body}"),
                });
            }

            let payload: serde_json::Value = response.json().await.map_err(|err| {
                CollaboratorError::InvalidResponse { provider: "anthropic", message: err.to_string() }
            })?;

            let content = payload["content"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|block| block["text"].as_str())
                .collect::<Vec<_>>()
                .join("");
            if content.is_empty() {
                return Err(CollaboratorError::InvalidResponse {
                    provider: "anthropic",
                    message: "response carried no text content blocks".to_string(),
                });
            }

            let input_tokens = payload["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
            let output_tokens = payload["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;
            let cached_input_tokens =
                payload["usage"]["cache_read_input_tokens"].as_u64().unwrap_or(0) as u32;

            return Ok(crate::collab::LlmCompletion {
                content,
                input_tokens,
                output_tokens,
                cached_input_tokens,
            });
        }
    }
}

#[cfg(feature = "collectors")]
pub struct TavilySearchClient {
    http: reqwest::Client,
    api_key: String,
}

#[cfg(feature = "collectors")]
impl TavilySearchClient {
    const ENDPOINT: &'static str = "https://api.tavily.com/search";

    pub fn new(api_key: String) -> Self {
        Self { http: reqwest::Client::new(), api_key }
    }
}

#[cfg(feature = "collectors")]
#[async_trait]
impl crate::collab::SearchBackend for TavilySearchClient {
    #[instrument(skip(self))]
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<crate::collab::SearchHit>, CollaboratorError> {
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
        });

        let response = self
            .http
            .post(Self::ENDPOINT)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CollaboratorError::Timeout { provider: "tavily" }
                } else {
                    CollaboratorError::RequestFailed { provider: "tavily", message: err.to_string() }
                }
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CollaboratorError::RateLimited { provider: "tavily" });
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(CollaboratorError::RequestFailed {
                provider: "tavily",
                message: format!("HTTP {status}"),
            });
        }

        let payload: serde_json::Value = response.json().await.map_err(|err| {
            CollaboratorError::InvalidResponse { provider: "tavily", message: err.to_string() }
        })?;

        let hits = payload["results"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|item| crate::collab::SearchHit {
                url: item["url"].as_str().unwrap_or_default().to_string(),
                title: item["title"].as_str().unwrap_or_default().to_string(),
                snippet: item["content"].as_str().unwrap_or_default().to_string(),
                score: item["score"].as_f64().unwrap_or(0.0) as f32,
            })
            .collect();
        Ok(hits)
    }
}

#[cfg(feature = "collectors")]
pub struct HttpScrapeExtractor {
    http: reqwest::Client,
    max_bytes: usize,
}

#[cfg(feature = "collectors")]
impl HttpScrapeExtractor {
    pub fn new(timeout: std::time::Duration, max_bytes: usize) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a valid timeout");
        Self { http, max_bytes }
    }
}

#[cfg(feature = "collectors")]
#[async_trait]
impl crate::collab::ScrapeExtractor for HttpScrapeExtractor {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<crate::collab::FetchedPage, CollaboratorError> {
        let response = self.http.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                CollaboratorError::Timeout { provider: "http_scrape" }
            } else {
                CollaboratorError::RequestFailed { provider: "http_scrape", message: err.to_string() }
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(CollaboratorError::RequestFailed {
                provider: "http_scrape",
                message: format!("HTTP {status}"),
            });
        }

        let bytes = response.bytes().await.map_err(|err| CollaboratorError::RequestFailed {
            provider: "http_scrape",
            message: err.to_string(),
        })?;
        if bytes.len() > self.max_bytes {
            warn!(url, len = bytes.len(), cap = self.max_bytes, "scrape_response_truncated");
        }
        let capped = &bytes[..bytes.len().min(self.max_bytes)];
        let html = String::from_utf8_lossy(capped).into_owned();

        let title = scraper::Html::parse_document(&html)
            .select(&scraper::Selector::parse("title").expect("static selector parses"))
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default();

        Ok(crate::collab::FetchedPage { url: url.to_string(), title, html })
    }
}
