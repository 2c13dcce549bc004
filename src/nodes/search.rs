//! Search node (§4.2): issues (optionally expanded) web searches for the
//! current sub-question, filters/dedups/ranks results.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::{
    collab::{CollaboratorError, SearchBackend, SearchHit},
    domain::{DomainUpdate, DomainView, SearchResult},
    node::{Node, NodeContext, NodeError, NodePartial},
    state::StateSnapshot,
};

use super::{PipelineConfig, jittered_backoff};

pub struct SearchNode {
    backend: Arc<dyn SearchBackend>,
    config: PipelineConfig,
}

impl SearchNode {
    pub fn new(backend: Arc<dyn SearchBackend>, config: PipelineConfig) -> Self {
        Self { backend, config }
    }

    /// `ExpandSearch`: the original query plus up to two mechanical
    /// variations, executed concurrently under the shared cap. Variations
    /// are generated by cheap heuristic rewrites rather than an extra LLM
    /// call, keeping Search's cost footprint at zero per §2's component
    /// budget for this stage.
    fn expand_queries(&self, question: &str) -> Vec<String> {
        if !self.config.search_expand {
            return vec![question.to_string()];
        }
        vec![
            question.to_string(),
            format!("{question} overview"),
            format!("{question} latest research"),
        ]
    }

    async fn search_with_retry(&self, query: &str) -> Result<Vec<SearchHit>, CollaboratorError> {
        let mut attempt = 1;
        loop {
            match self
                .backend
                .search(query, self.config.search_max_results)
                .await
            {
                Ok(hits) => return Ok(hits),
                Err(err @ CollaboratorError::RequestFailed { .. })
                | Err(err @ CollaboratorError::Timeout { .. })
                    if attempt < self.config.search_retry_attempts =>
                {
                    let backoff = jittered_backoff(
                        attempt,
                        self.config.search_retry_backoff_initial,
                        self.config.search_retry_backoff_max,
                    );
                    tracing::warn!(query, attempt, ?backoff, error = %err, "search_retry");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Node for SearchNode {
    async fn run(&self, snapshot: StateSnapshot, ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let view = DomainView::new(&snapshot.extra);
        let sub_questions = view.sub_questions();
        let idx = view.current_subtopic_index();
        let sub_question = sub_questions
            .get(idx)
            .ok_or(NodeError::MissingInput { what: "sub_questions[current_subtopic_index]" })?
            .clone();

        let mut seen_urls: HashSet<String> = view.seen_urls().into_iter().collect();
        let queries = self.expand_queries(&sub_question.question);

        let semaphore = Arc::new(Semaphore::new(self.config.search_concurrency));
        let mut tasks = Vec::new();
        for query in queries {
            let semaphore = Arc::clone(&semaphore);
            let node_query = query.clone();
            tasks.push(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                (node_query.clone(), self.search_with_retry(&node_query).await)
            });
        }
        let results = futures_util::future::join_all(tasks).await;

        let mut by_url: std::collections::HashMap<String, SearchResult> = std::collections::HashMap::new();
        for (query, outcome) in results {
            match outcome {
                Ok(hits) => {
                    for hit in hits {
                        if hit.score < self.config.search_relevance_min {
                            continue;
                        }
                        if seen_urls.contains(&hit.url) {
                            continue;
                        }
                        by_url
                            .entry(hit.url.clone())
                            .and_modify(|existing| {
                                if hit.score > existing.score {
                                    existing.score = hit.score;
                                }
                            })
                            .or_insert(SearchResult {
                                sub_question_id: sub_question.id,
                                query: query.clone(),
                                url: hit.url,
                                title: hit.title,
                                snippet: hit.snippet,
                                score: hit.score,
                            });
                    }
                }
                Err(err) => {
                    ctx.emit_diagnostic("search", format!("backend call failed: {err}"))?;
                }
            }
        }

        let mut new_results: Vec<SearchResult> = by_url.into_values().collect();
        new_results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        new_results.truncate(self.config.search_max_results);

        let new_urls: Vec<String> = new_results.iter().map(|r| r.url.clone()).collect();
        for url in &new_urls {
            seen_urls.insert(url.clone());
        }

        let retry_count = if new_results.len() < 3 {
            view.search_retry_count() + 1
        } else {
            0
        };

        ctx.emit_node(
            "search",
            format!(
                "sub_question={} new_results={} retry_count={retry_count}",
                sub_question.id,
                new_results.len()
            ),
        )?;

        let extra = DomainUpdate::new()
            .append_search_results(&new_results)
            .append_seen_urls(&new_urls)
            .set_search_retry_count(retry_count)
            .into_map();

        Ok(NodePartial::new().with_extra(extra))
    }
}
