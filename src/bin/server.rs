//! HTTP/MCP server entry point (§6): loads [`EngineConfig`], builds the
//! process-wide collaborators, and serves the session API over axum.
//!
//! Mirrors the startup shape of `demos/demo7_axum_sse.rs` — tracing init,
//! then build a router, then `axum::serve` — generalized to the dynamic
//! session table instead of one fixed graph.

use std::net::SocketAddr;
use std::sync::Arc;

use research_agent::api::auth::{ApiKeyStore, RateLimiter};
use research_agent::api::http::{router, HttpState};
use research_agent::config::{default_events_dir, default_report_dir, EngineConfig};
use research_agent::keys::KeyRotator;
use research_agent::runtimes::{CheckpointerType, SessionManager, SessionManagerConfig, SharedCollaborators};
use tokio::net::TcpListener;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

#[cfg(feature = "llm")]
use research_agent::collab::live::AnthropicLlmClient;
#[cfg(feature = "collectors")]
use research_agent::collab::live::{HttpScrapeExtractor, TavilySearchClient};

#[cfg(not(feature = "llm"))]
use unconfigured::UnconfiguredLlm;
#[cfg(not(feature = "collectors"))]
use unconfigured::{UnconfiguredScrape, UnconfiguredSearch};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let config = EngineConfig::load_from_env_or_default()?;
    if let Err(err) = config.require_api_keys() {
        tracing::warn!(%err, "starting without a configured LLM provider key");
    }

    let report_dir = default_report_dir();
    let events_dir = default_events_dir();
    let api_keys_path = std::env::var("RESEARCH_AGENT_API_KEYS_FILE")
        .unwrap_or_else(|_| "api_keys.json".to_string());

    let key_rotator = Arc::new(KeyRotator::new());
    key_rotator.set_keys("anthropic", config.api_keys.anthropic.clone());

    let llm: Arc<dyn research_agent::collab::LlmClient> = build_llm_client(&config, &key_rotator);
    let search_backend: Arc<dyn research_agent::collab::SearchBackend> = build_search_backend(&config);
    let scrape_extractor: Arc<dyn research_agent::collab::ScrapeExtractor> =
        build_scrape_extractor(&config);
    let llm_cache = Some(Arc::new(research_agent::cache::LlmCache::with_options(
        "llm_cache",
        config.cache.ttl_seconds,
        config.cache.max_temperature_to_cache,
    )));

    let collaborators = SharedCollaborators {
        llm,
        search_backend,
        scrape_extractor,
        llm_cache,
        model_prices: config.model_prices(),
        pipeline_config: research_agent::nodes::PipelineConfig {
            report_dir: Some(report_dir.clone()),
            ..Default::default()
        },
        warn_at_percentage: config.cost.warn_at_percentage,
    };

    let manager_config = SessionManagerConfig {
        max_concurrent_sessions: config.concurrency.max_concurrent_sessions,
        queue_limit: config.concurrency.queue_limit,
        ..SessionManagerConfig::default()
    };

    let sessions = SessionManager::new(
        collaborators,
        manager_config,
        CheckpointerType::InMemory,
        Some(events_dir),
        report_dir,
    );

    let keys = Arc::new(ApiKeyStore::load(api_keys_path)?);
    let http_state = HttpState {
        sessions,
        keys,
        rate_limiter: Arc::new(RateLimiter::new()),
        rate_limit_per_minute: config.concurrency.rate_limit_per_minute,
    };

    let app = router(http_state);
    let addr: SocketAddr = std::env::var("RESEARCH_AGENT_BIND")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "research-agent-server listening");
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

#[cfg(feature = "llm")]
fn build_llm_client(
    config: &EngineConfig,
    key_rotator: &Arc<KeyRotator>,
) -> Arc<dyn research_agent::collab::LlmClient> {
    if config.api_keys.anthropic.is_empty() {
        Arc::new(unconfigured::UnconfiguredLlm)
    } else {
        Arc::new(AnthropicLlmClient::new(key_rotator.clone()))
    }
}

#[cfg(not(feature = "llm"))]
fn build_llm_client(
    _config: &EngineConfig,
    _key_rotator: &Arc<KeyRotator>,
) -> Arc<dyn research_agent::collab::LlmClient> {
    Arc::new(UnconfiguredLlm)
}

#[cfg(feature = "collectors")]
fn build_search_backend(config: &EngineConfig) -> Arc<dyn research_agent::collab::SearchBackend> {
    match &config.api_keys.tavily {
        Some(key) => Arc::new(TavilySearchClient::new(key.clone())),
        None => Arc::new(unconfigured::UnconfiguredSearch),
    }
}

#[cfg(not(feature = "collectors"))]
fn build_search_backend(_config: &EngineConfig) -> Arc<dyn research_agent::collab::SearchBackend> {
    Arc::new(UnconfiguredSearch)
}

#[cfg(feature = "collectors")]
fn build_scrape_extractor(
    _config: &EngineConfig,
) -> Arc<dyn research_agent::collab::ScrapeExtractor> {
    Arc::new(HttpScrapeExtractor::new(
        std::time::Duration::from_secs(30),
        500_000,
    ))
}

#[cfg(not(feature = "collectors"))]
fn build_scrape_extractor(
    _config: &EngineConfig,
) -> Arc<dyn research_agent::collab::ScrapeExtractor> {
    Arc::new(UnconfiguredScrape)
}

/// Collaborator stand-ins for builds missing the `llm`/`collectors`
/// features, or missing the corresponding API key at startup. Always
/// return an error rather than panic, so a misconfigured deployment fails
/// each session cleanly instead of crashing the process.
mod unconfigured {
    use async_trait::async_trait;
    use research_agent::collab::{
        CollaboratorError, FetchedPage, LlmClient, LlmCompletion, ScrapeExtractor, SearchBackend,
        SearchHit,
    };
    use research_agent::message::Message;

    pub struct UnconfiguredLlm;

    #[async_trait]
    impl LlmClient for UnconfiguredLlm {
        async fn complete(
            &self,
            _model: &str,
            _system_prompt: &str,
            _messages: &[Message],
            _temperature: f64,
        ) -> Result<LlmCompletion, CollaboratorError> {
            Err(CollaboratorError::RequestFailed {
                provider: "anthropic",
                message: "no LLM provider configured (missing API key or `llm` feature)".to_string(),
            })
        }
    }

    pub struct UnconfiguredSearch;

    #[async_trait]
    impl SearchBackend for UnconfiguredSearch {
        async fn search(&self, _query: &str, _n: usize) -> Result<Vec<SearchHit>, CollaboratorError> {
            Err(CollaboratorError::RequestFailed {
                provider: "tavily",
                message: "no search backend configured (missing API key or `collectors` feature)"
                    .to_string(),
            })
        }
    }

    pub struct UnconfiguredScrape;

    #[async_trait]
    impl ScrapeExtractor for UnconfiguredScrape {
        async fn fetch(&self, _url: &str) -> Result<FetchedPage, CollaboratorError> {
            Err(CollaboratorError::RequestFailed {
                provider: "http_scrape",
                message: "no scrape extractor configured (missing `collectors` feature)".to_string(),
            })
        }
    }
}
