//! Scrape node (§4.2): fetches and sanitizes search-result URLs, dropping
//! paywalled or low-quality pages.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::{
    collab::ScrapeExtractor,
    domain::{DomainUpdate, DomainView, ScrapedPage},
    node::{Node, NodeContext, NodeError, NodePartial},
    sanitize::sanitize_and_score,
    state::StateSnapshot,
};

use super::PipelineConfig;

pub struct ScrapeNode {
    extractor: Arc<dyn ScrapeExtractor>,
    config: PipelineConfig,
}

impl ScrapeNode {
    pub fn new(extractor: Arc<dyn ScrapeExtractor>, config: PipelineConfig) -> Self {
        Self { extractor, config }
    }
}

#[async_trait]
impl Node for ScrapeNode {
    async fn run(&self, snapshot: StateSnapshot, ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let view = DomainView::new(&snapshot.extra);
        let already_scraped: std::collections::HashSet<String> = view
            .scraped_content()
            .into_iter()
            .map(|p| p.url)
            .collect();
        let pending: Vec<_> = view
            .search_results()
            .into_iter()
            .filter(|r| !already_scraped.contains(&r.url))
            .collect();

        if pending.is_empty() {
            ctx.emit_diagnostic("scrape", "no pending URLs to scrape")?;
            return Ok(NodePartial::default());
        }

        let semaphore = Arc::new(Semaphore::new(self.config.scrape_concurrency));
        let mut tasks = Vec::new();
        for result in pending {
            let semaphore = Arc::clone(&semaphore);
            tasks.push(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                let fetch = self.extractor.fetch(&result.url);
                let outcome = tokio::time::timeout(self.config.scrape_timeout, fetch).await;
                (result, outcome)
            });
        }

        let outcomes = futures_util::future::join_all(tasks).await;

        let mut pages = Vec::new();
        let mut dropped_paywall = 0u32;
        let mut dropped_quality = 0u32;
        let mut dropped_fetch = 0u32;

        for (result, outcome) in outcomes {
            let fetched = match outcome {
                Ok(Ok(page)) => page,
                Ok(Err(err)) => {
                    ctx.emit_diagnostic("scrape", format!("fetch failed for {}: {err}", result.url))?;
                    dropped_fetch += 1;
                    continue;
                }
                Err(_elapsed) => {
                    ctx.emit_diagnostic("scrape", format!("timed out fetching {}", result.url))?;
                    dropped_fetch += 1;
                    continue;
                }
            };

            let sanitized = sanitize_and_score(&fetched.html, self.config.scrape_max_bytes);

            if sanitized.paywall_score > self.config.scrape_paywall_max {
                dropped_paywall += 1;
                continue;
            }
            if sanitized.quality_score < self.config.scrape_quality_min || sanitized.text.is_empty() {
                dropped_quality += 1;
                continue;
            }

            pages.push(ScrapedPage {
                url: result.url,
                sub_question_id: result.sub_question_id,
                title: fetched.title,
                content: sanitized.text,
                word_count: sanitized.word_count,
                quality_score: sanitized.quality_score,
            });
        }

        ctx.emit_node(
            "scrape",
            format!(
                "scraped={} dropped_paywall={dropped_paywall} dropped_quality={dropped_quality} dropped_fetch={dropped_fetch}",
                pages.len()
            ),
        )?;

        let extra = DomainUpdate::new().append_scraped_content(&pages).into_map();
        Ok(NodePartial::new().with_extra(extra))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{CollaboratorError, FetchedPage};
    use crate::domain::{DomainUpdate, SearchResult};
    use crate::state::VersionedState;

    struct StubExtractor {
        html: String,
    }

    #[async_trait]
    impl ScrapeExtractor for StubExtractor {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, CollaboratorError> {
            Ok(FetchedPage {
                url: url.to_string(),
                title: "Title".into(),
                html: self.html.clone(),
            })
        }
    }

    fn ctx() -> NodeContext {
        let bus = crate::event_bus::EventBus::default();
        NodeContext {
            node_id: "scrape".into(),
            step: 1,
            event_emitter: bus.get_emitter(),
        }
    }

    fn snapshot_with_one_result() -> crate::state::StateSnapshot {
        let mut state = VersionedState::new_with_user_message("q");
        let extra = DomainUpdate::new()
            .append_search_results(&[SearchResult {
                sub_question_id: 1,
                query: "q".into(),
                url: "https://example.com".into(),
                title: "t".into(),
                snippet: "s".into(),
                score: 0.9,
            }])
            .into_map();
        for (k, v) in extra {
            state.extra.get_mut().insert(k, v);
        }
        state.snapshot()
    }

    #[tokio::test]
    async fn drops_paywalled_pages() {
        let extractor = StubExtractor {
            html: "<html><body><p>Subscribe to continue reading this exclusive report.</p></body></html>".into(),
        };
        let node = ScrapeNode::new(Arc::new(extractor), PipelineConfig::default());
        let partial = node.run(snapshot_with_one_result(), ctx()).await.unwrap();
        let extra = partial.extra.unwrap_or_default();
        let view = DomainView::new(&extra);
        assert!(view.scraped_content().is_empty());
    }

    #[tokio::test]
    async fn keeps_substantial_prose() {
        let extractor = StubExtractor {
            html: "<html><body><p>This is a substantial, well formed article body with plenty of meaningful prose content describing a real topic in depth for the reader to learn from, spanning several full sentences of useful material.</p></body></html>".into(),
        };
        let node = ScrapeNode::new(Arc::new(extractor), PipelineConfig::default());
        let partial = node.run(snapshot_with_one_result(), ctx()).await.unwrap();
        let extra = partial.extra.unwrap();
        let view = DomainView::new(&extra);
        assert_eq!(view.scraped_content().len(), 1);
    }
}
