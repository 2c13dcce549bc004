//! Synthesize node (§4.2): produces the final cited Markdown report from
//! accumulated summaries, then runs the advisory quality check (§4.11).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::{
    cache::LlmCache,
    cache::prompt_cache::CacheTracker,
    cache::prompt_version::prompt_hash,
    collab::LlmClient,
    compaction::{ContextManager, Turn},
    cost::{CostTracker, PipelineStage},
    domain::{DomainUpdate, DomainView, Source},
    message::Message,
    node::{Node, NodeContext, NodeError, NodePartial},
    quality::check_quality,
    state::StateSnapshot,
};

use super::PipelineConfig;

const PROMPT_NAME: &str = "synthesize";
const STEP_NAME: &str = "synthesize";

const REQUIRED_SECTIONS: &[&str] = &[
    "Executive Summary",
    "Key Findings",
    "Detailed Analysis",
    "Technical Considerations",
    "Sources",
    "Methodology",
];

pub struct SynthesizeNode {
    llm: Arc<dyn LlmClient>,
    cost: CostTracker,
    cache: Option<Arc<LlmCache>>,
    config: PipelineConfig,
    cache_tracker: Arc<Mutex<CacheTracker>>,
    context: Arc<Mutex<ContextManager>>,
}

impl SynthesizeNode {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        cost: CostTracker,
        cache: Option<Arc<LlmCache>>,
        config: PipelineConfig,
        cache_tracker: Arc<Mutex<CacheTracker>>,
        context: Arc<Mutex<ContextManager>>,
    ) -> Self {
        Self {
            llm,
            cost,
            cache,
            config,
            cache_tracker,
            context,
        }
    }

    fn system_prompt() -> String {
        format!(
            "You are a research report writer. Using the provided query, sub-questions, and summaries, \
             write a complete Markdown report with exactly these top-level sections in order: {}. \
             Cite sources inline with bracketed numeric markers like [1] that refer to the numbered \
             Sources section. Do not invent sources beyond the ones provided.",
            REQUIRED_SECTIONS.join(", ")
        )
    }
}

#[async_trait]
impl Node for SynthesizeNode {
    async fn run(&self, snapshot: StateSnapshot, ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let view = DomainView::new(&snapshot.extra);
        let query = view.query();
        let sub_questions = view.sub_questions();
        let summaries = view.summaries();

        if summaries.is_empty() {
            return Err(NodeError::MissingInput { what: "summaries" });
        }

        let mut urls_in_order = Vec::new();
        for summary in &summaries {
            for url in &summary.source_urls {
                if !urls_in_order.contains(url) {
                    urls_in_order.push(url.clone());
                }
            }
        }
        let sources: Vec<Source> = urls_in_order
            .iter()
            .enumerate()
            .map(|(i, url)| Source {
                url: url.clone(),
                title: format!("Source {}", i + 1),
                accessed_at: Utc::now(),
                relevance: 1.0,
            })
            .collect();

        let prompt = build_prompt(&query, &sub_questions, &summaries, &sources);
        let messages = vec![Message::user(&prompt)];
        let model = self.cost.recommended_tier(
            PipelineStage::Synthesize,
            &self.config.primary_model,
            &self.config.economy_model,
        );

        let system_prompt = Self::system_prompt();
        let cache_extra = prompt_hash(PROMPT_NAME);
        let report = if let Some(cache) = &self.cache
            && let Some(cached) = cache.get(model, 0.0, &messages, &cache_extra)
            && let Some(text) = cached.as_str()
        {
            text.to_string()
        } else {
            self.cost
                .estimate_and_reserve(model, &system_prompt, &messages, 2048)
                .map_err(|e| NodeError::Provider {
                    provider: "cost_tracker",
                    message: e.to_string(),
                })?;

            let completion = self
                .llm
                .complete(model, &system_prompt, &messages, 0.0)
                .await
                .map_err(|e| NodeError::Provider {
                    provider: "llm",
                    message: e.to_string(),
                })?;

            self.cache_tracker.lock().record_call(
                u64::from(completion.input_tokens),
                u64::from(completion.cached_input_tokens),
            );
            {
                let mut context = self.context.lock();
                context.add_turn(Turn::new("user", prompt.clone(), completion.input_tokens).with_step_name(STEP_NAME));
                context.add_turn(
                    Turn::new("assistant", completion.content.clone(), completion.output_tokens)
                        .with_step_name(STEP_NAME),
                );
            }

            if let Some(cache) = &self.cache {
                cache.set(
                    model,
                    0.0,
                    &messages,
                    serde_json::Value::String(completion.content.clone()),
                    &cache_extra,
                );
            }
            completion.content
        };

        let quality = check_quality(&report, &sub_questions);
        ctx.emit_node(
            "synthesize",
            format!(
                "report_words={} quality_passed={}",
                quality.word_count, quality.passed
            ),
        )?;
        if !quality.passed {
            ctx.emit_diagnostic(
                "synthesize",
                format!(
                    "quality check did not pass: required_sections={} subtopic_coverage={:.2}",
                    quality.has_required_sections, quality.subtopic_coverage
                ),
            )?;
        }

        // report_metadata is a replace key (not `keys::APPEND_ONLY`), and the
        // recovery scheduler writes its own `recovery`/`dead_letter_queue`
        // entries under it, so merge into the existing object rather than
        // overwriting it wholesale.
        let mut metadata = view.report_metadata();
        if !metadata.is_object() {
            metadata = serde_json::json!({});
        }
        metadata
            .as_object_mut()
            .expect("just normalized to an object")
            .insert("quality".to_string(), serde_json::to_value(&quality).unwrap_or_default());

        let extra = DomainUpdate::new()
            .set_final_report(report)
            .append_sources(&sources)
            .set_report_metadata(metadata)
            .into_map();

        Ok(NodePartial::new().with_extra(extra))
    }
}

fn build_prompt(
    query: &str,
    sub_questions: &[crate::domain::SubQuestion],
    summaries: &[crate::domain::Summary],
    sources: &[Source],
) -> String {
    let mut out = format!("Query: {query}\n\nSub-questions:\n");
    for sq in sub_questions {
        out.push_str(&format!("- ({}) {}\n", sq.id, sq.question));
    }
    out.push_str("\nSummaries:\n");
    for summary in summaries {
        out.push_str(&format!(
            "- sub_question {}: {}\n  key findings: {}\n",
            summary.sub_question_id,
            summary.summary,
            summary.key_findings.join("; ")
        ));
    }
    out.push_str("\nSources:\n");
    for (i, source) in sources.iter().enumerate() {
        out.push_str(&format!("[{}] {}\n", i + 1, source.url));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{CollaboratorError, LlmCompletion};
    use crate::domain::{DomainUpdate, Summary};
    use std::collections::HashMap;

    struct StubLlm {
        response: String,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn complete(
            &self,
            _model: &str,
            _system_prompt: &str,
            _messages: &[Message],
            _temperature: f64,
        ) -> Result<LlmCompletion, CollaboratorError> {
            Ok(LlmCompletion {
                content: self.response.clone(),
                input_tokens: 10,
                output_tokens: 10,
                cached_input_tokens: 0,
            })
        }
    }

    fn test_cache_tracker() -> Arc<Mutex<CacheTracker>> {
        Arc::new(Mutex::new(CacheTracker::new()))
    }

    fn test_context() -> Arc<Mutex<ContextManager>> {
        Arc::new(Mutex::new(ContextManager::new(20, 8_000, 5)))
    }

    fn cost_tracker() -> CostTracker {
        let mut prices = HashMap::default();
        prices.insert("claude-sonnet-4".to_string(), crate::cost::ModelPrice::new(3.0, 15.0));
        prices.insert("claude-haiku-4".to_string(), crate::cost::ModelPrice::new(0.25, 1.25));
        CostTracker::new(prices.into_iter().collect(), 10.0, 80.0)
    }

    fn ctx() -> NodeContext {
        let bus = crate::event_bus::EventBus::default();
        NodeContext {
            node_id: "synthesize".into(),
            step: 1,
            event_emitter: bus.get_emitter(),
        }
    }

    fn snapshot_with_summary() -> crate::state::StateSnapshot {
        let mut state = crate::state::VersionedState::new_with_user_message("rust async runtimes");
        let extra = DomainUpdate::new()
            .set_query("rust async runtimes")
            .set_sub_questions(&[crate::domain::SubQuestion {
                id: 1,
                question: "what are the leading rust async runtimes".into(),
                rationale: String::new(),
            }])
            .append_summaries(&[Summary {
                sub_question_id: 1,
                summary: "Tokio dominates production usage.".into(),
                source_urls: vec!["https://example.com".into()],
                key_findings: vec!["tokio is most widely used".into()],
            }])
            .into_map();
        for (k, v) in extra {
            state.extra.get_mut().insert(k, v);
        }
        state.snapshot()
    }

    #[tokio::test]
    async fn missing_summaries_is_an_error() {
        let node = SynthesizeNode::new(
            Arc::new(StubLlm { response: String::new() }),
            cost_tracker(),
            None,
            PipelineConfig::default(),
            test_cache_tracker(),
            test_context(),
        );
        let snapshot = crate::state::VersionedState::new_with_user_message("q").snapshot();
        let result = node.run(snapshot, ctx()).await;
        assert!(matches!(result, Err(NodeError::MissingInput { .. })));
    }

    #[tokio::test]
    async fn produces_report_and_quality_metadata() {
        let report = "## Executive Summary\nTokio leads. [1]\n\n\
             ## Key Findings\nTokio is dominant. [1]\n\n\
             ## Detailed Analysis\nMore detail. [1]\n\n\
             ## Technical Considerations\nPerformance notes. [1]\n\n\
             ## Sources\n[1] https://example.com\n\n\
             ## Methodology\nWeb search and synthesis.";
        let node = SynthesizeNode::new(
            Arc::new(StubLlm {
                response: report.to_string(),
            }),
            cost_tracker(),
            None,
            PipelineConfig::default(),
            test_cache_tracker(),
            test_context(),
        );
        let partial = node.run(snapshot_with_summary(), ctx()).await.unwrap();
        let extra = partial.extra.unwrap();
        let view = DomainView::new(&extra);
        assert_eq!(view.final_report().as_deref(), Some(report));
        assert_eq!(view.sources().len(), 1);
        let metadata = view.report_metadata();
        assert!(metadata["quality"]["passed"].as_bool().unwrap());
    }
}
