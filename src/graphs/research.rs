//! Wires the five research nodes (§4.2) into the graph the distilled spec's
//! §4.1 edge table describes, as a specialization of the generic
//! [`GraphBuilder`](super::GraphBuilder)/[`App`](crate::app::App) machinery
//! the rest of this crate provides.
//!
//! Edge table, unchanged from the spec:
//!
//! - `plan -> search` (unconditional)
//! - `search -> {scrape if |search_results| >= 3 OR search_retry_count >= 3; else search}`
//! - `scrape -> {summarize if scraped_content nonempty; else End}`
//! - `summarize -> synthesize`
//! - `synthesize -> End`

use std::sync::Arc;

use parking_lot::Mutex;

use crate::app::App;
use crate::cache::prompt_cache::CacheTracker;
use crate::compaction::ContextManager;
use crate::domain::{reducer::DomainReducer, DomainView};
use crate::graphs::builder::GraphBuilder;
use crate::graphs::edges::EdgePredicate;
use crate::nodes::{PlanNode, ScrapeNode, SearchNode, SummarizeNode, SynthesizeNode};
use crate::types::{ChannelType, NodeKind};

/// Node-name constants, used both to register nodes and to build edges —
/// kept as `&str` rather than an enum since [`NodeKind::Custom`] is
/// string-keyed throughout the rest of the engine.
pub mod node_names {
    pub const PLAN: &str = "plan";
    pub const SEARCH: &str = "search";
    pub const SCRAPE: &str = "scrape";
    pub const SUMMARIZE: &str = "summarize";
    pub const SYNTHESIZE: &str = "synthesize";
}

fn kind(name: &str) -> NodeKind {
    NodeKind::Custom(name.to_string())
}

const MIN_SEARCH_RESULTS: usize = 3;
const MAX_SEARCH_RETRIES: u32 = 3;

fn should_continue_search() -> EdgePredicate {
    Arc::new(|snapshot| {
        let view = DomainView::new(&snapshot.extra);
        if view.search_results().len() >= MIN_SEARCH_RESULTS
            || view.search_retry_count() >= MAX_SEARCH_RETRIES
        {
            vec![node_names::SCRAPE.to_string()]
        } else {
            vec![node_names::SEARCH.to_string()]
        }
    })
}

fn should_continue_scrape() -> EdgePredicate {
    Arc::new(|snapshot| {
        let view = DomainView::new(&snapshot.extra);
        if view.scraped_content().is_empty() {
            vec!["End".to_string()]
        } else {
            vec![node_names::SUMMARIZE.to_string()]
        }
    })
}

/// The collaborators every pipeline node needs, grouped so
/// [`build_research_graph`] takes one argument instead of five.
///
/// Each field is an `Arc` so the same collaborator set can be reused across
/// sessions (the session manager constructs one `CostTracker` per session
/// per §5, but the LLM client / search backend / scrape extractor are
/// process-wide like the key rotator and LLM cache).
pub struct ResearchCollaborators {
    pub llm: Arc<dyn crate::collab::LlmClient>,
    pub search_backend: Arc<dyn crate::collab::SearchBackend>,
    pub scrape_extractor: Arc<dyn crate::collab::ScrapeExtractor>,
    pub cost: crate::cost::CostTracker,
    pub llm_cache: Option<Arc<crate::cache::LlmCache>>,
    pub config: crate::nodes::PipelineConfig,
    /// Provider prompt-cache hit/miss accounting, shared across every
    /// LLM-calling node so a session's stats cover the whole run.
    pub cache_tracker: Arc<Mutex<CacheTracker>>,
    /// Rolling conversation window, shared across every LLM-calling node so
    /// compaction sees turns accumulate across the whole session rather than
    /// per-node.
    pub context: Arc<Mutex<ContextManager>>,
}

/// Builds the compiled research pipeline [`App`], registering
/// [`DomainReducer`] on the `Extra` channel so append-only domain fields
/// (`search_results`, `seen_urls`, `scraped_content`, `summaries`,
/// `sources`, `error_log`) concatenate instead of overwrite, per §3.
pub fn build_research_graph(collab: ResearchCollaborators) -> App {
    let ResearchCollaborators {
        llm,
        search_backend,
        scrape_extractor,
        cost,
        llm_cache,
        config,
        cache_tracker,
        context,
    } = collab;

    GraphBuilder::new()
        .add_node(
            kind(node_names::PLAN),
            PlanNode::new(
                Arc::clone(&llm),
                cost.clone(),
                llm_cache.clone(),
                config.clone(),
                Arc::clone(&cache_tracker),
                Arc::clone(&context),
            ),
        )
        .add_node(
            kind(node_names::SEARCH),
            SearchNode::new(search_backend, config.clone()),
        )
        .add_node(
            kind(node_names::SCRAPE),
            ScrapeNode::new(scrape_extractor, config.clone()),
        )
        .add_node(
            kind(node_names::SUMMARIZE),
            SummarizeNode::new(
                Arc::clone(&llm),
                cost.clone(),
                llm_cache.clone(),
                config.clone(),
                Arc::clone(&cache_tracker),
                Arc::clone(&context),
            ),
        )
        .add_node(
            kind(node_names::SYNTHESIZE),
            SynthesizeNode::new(llm, cost, llm_cache, config, cache_tracker, context),
        )
        .with_reducer(ChannelType::Extra, Arc::new(DomainReducer))
        .add_edge(NodeKind::Start, kind(node_names::PLAN))
        .add_edge(kind(node_names::PLAN), kind(node_names::SEARCH))
        .add_conditional_edge(kind(node_names::SEARCH), should_continue_search())
        .add_conditional_edge(kind(node_names::SCRAPE), should_continue_scrape())
        .add_edge(kind(node_names::SUMMARIZE), kind(node_names::SYNTHESIZE))
        .add_edge(kind(node_names::SYNTHESIZE), NodeKind::End)
        .compile()
}
