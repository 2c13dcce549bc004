//! Plan node (§4.2): expands the user query into 1..10 sub-questions.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    cache::LlmCache,
    cache::prompt_cache::CacheTracker,
    cache::prompt_version::prompt_hash,
    collab::LlmClient,
    compaction::{ContextManager, Turn},
    cost::{CostTracker, PipelineStage},
    domain::{DomainUpdate, DomainView, SubQuestion},
    message::Message,
    node::{Node, NodeContext, NodeError, NodePartial},
    state::StateSnapshot,
};

use super::PipelineConfig;

const STEP_NAME: &str = "plan";

const PROMPT_NAME: &str = "plan";
const MAX_SUB_QUESTIONS: usize = 10;

/// Raw shape expected back from the LLM before it's validated into
/// [`SubQuestion`]s with sequentially assigned ids.
#[derive(serde::Deserialize)]
struct RawSubQuestion {
    question: String,
    #[serde(default)]
    rationale: String,
}

pub struct PlanNode {
    llm: Arc<dyn LlmClient>,
    cost: CostTracker,
    cache: Option<Arc<LlmCache>>,
    config: PipelineConfig,
    cache_tracker: Arc<Mutex<CacheTracker>>,
    context: Arc<Mutex<ContextManager>>,
}

impl PlanNode {
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

    fn system_prompt(&self) -> String {
        format!(
            "You are a research planner. Given a user query, produce between 1 and {MAX_SUB_QUESTIONS} \
             focused sub-questions that together cover the query thoroughly. Respond with strict JSON: \
             an array of objects with fields \"question\" and \"rationale\". No prose outside the JSON array."
        )
    }

    fn parse_sub_questions(&self, raw: &str) -> Result<Vec<SubQuestion>, NodeError> {
        let parsed: Vec<RawSubQuestion> = serde_json::from_str(raw).map_err(|e| {
            NodeError::ValidationFailed(format!("plan response was not a JSON array: {e}"))
        })?;

        if parsed.is_empty() || parsed.len() > MAX_SUB_QUESTIONS {
            return Err(NodeError::ValidationFailed(format!(
                "expected 1..{MAX_SUB_QUESTIONS} sub-questions, got {}",
                parsed.len()
            )));
        }
        if parsed.iter().any(|q| q.question.trim().is_empty()) {
            return Err(NodeError::ValidationFailed(
                "sub-question text must not be empty".to_string(),
            ));
        }

        Ok(parsed
            .into_iter()
            .enumerate()
            .map(|(i, raw)| SubQuestion {
                id: (i + 1) as u32,
                question: raw.question,
                rationale: raw.rationale,
            })
            .collect())
    }
}

#[async_trait]
impl Node for PlanNode {
    async fn run(&self, snapshot: StateSnapshot, ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let view = DomainView::new(&snapshot.extra);
        let query = if view.query().is_empty() {
            snapshot
                .messages
                .first()
                .map(|m| m.content.clone())
                .ok_or(NodeError::MissingInput { what: "query" })?
        } else {
            view.query()
        };

        let system_prompt = self.system_prompt();
        let messages = vec![Message::user(&query)];
        let model = self
            .cost
            .recommended_tier(PipelineStage::Plan, &self.config.primary_model, &self.config.economy_model)
            .to_string();

        let cache_extra = prompt_hash(PROMPT_NAME);
        if let Some(cache) = &self.cache
            && let Some(cached) = cache.get(&model, 0.0, &messages, &cache_extra)
            && let Some(text) = cached.as_str()
        {
            ctx.emit_diagnostic("plan", "llm cache hit")?;
            let sub_questions = self.parse_sub_questions(text)?;
            return Ok(build_partial(&query, sub_questions));
        }

        self.cost
            .estimate_and_reserve(&model, &system_prompt, &messages, 1024)
            .map_err(|e| NodeError::Provider {
                provider: "cost_tracker",
                message: e.to_string(),
            })?;

        let completion = self
            .llm
            .complete(&model, &system_prompt, &messages, 0.0)
            .await
            .map_err(|e| NodeError::Provider {
                provider: "llm",
                message: e.to_string(),
            })?;

        self.cache_tracker
            .lock()
            .record_call(u64::from(completion.input_tokens), u64::from(completion.cached_input_tokens));
        {
            let mut context = self.context.lock();
            context.add_turn(Turn::new("user", query.clone(), completion.input_tokens).with_step_name(STEP_NAME));
            context.add_turn(
                Turn::new("assistant", completion.content.clone(), completion.output_tokens)
                    .with_step_name(STEP_NAME),
            );
        }

        let sub_questions = self.parse_sub_questions(&completion.content)?;

        if let Some(cache) = &self.cache {
            cache.set(
                &model,
                0.0,
                &messages,
                serde_json::Value::String(completion.content.clone()),
                &cache_extra,
            );
        }

        ctx.emit_node("plan", format!("produced {} sub-questions", sub_questions.len()))?;
        Ok(build_partial(&query, sub_questions))
    }
}

fn build_partial(query: &str, sub_questions: Vec<SubQuestion>) -> NodePartial {
    let extra = DomainUpdate::new()
        .set_query(query)
        .set_sub_questions(&sub_questions)
        .set_current_subtopic_index(0)
        .set_search_retry_count(0)
        .into_map();
    NodePartial::new().with_extra(extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{CollaboratorError, LlmCompletion};
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
        prices.insert(
            "claude-sonnet-4".to_string(),
            crate::cost::ModelPrice::new(3.0, 15.0),
        );
        prices.insert(
            "claude-haiku-4".to_string(),
            crate::cost::ModelPrice::new(0.25, 1.25),
        );
        CostTracker::new(prices.into_iter().collect(), 10.0, 80.0)
    }

    fn ctx() -> NodeContext {
        let bus = crate::event_bus::EventBus::default();
        NodeContext {
            node_id: "plan".into(),
            step: 1,
            event_emitter: bus.get_emitter(),
        }
    }

    #[tokio::test]
    async fn parses_well_formed_plan_response() {
        let node = PlanNode::new(
            Arc::new(StubLlm {
                response: r#"[{"question":"What is Rust?","rationale":"baseline"}]"#.to_string(),
            }),
            cost_tracker(),
            None,
            PipelineConfig::default(),
            test_cache_tracker(),
            test_context(),
        );
        let snapshot = crate::state::VersionedState::new_with_user_message("Tell me about Rust").snapshot();
        let partial = node.run(snapshot, ctx()).await.unwrap();
        let extra = partial.extra.unwrap();
        let view = DomainView::new(&extra);
        assert_eq!(view.sub_questions().len(), 1);
        assert_eq!(view.sub_questions()[0].id, 1);
    }

    #[tokio::test]
    async fn rejects_malformed_plan_response() {
        let node = PlanNode::new(
            Arc::new(StubLlm {
                response: "not json".to_string(),
            }),
            cost_tracker(),
            None,
            PipelineConfig::default(),
            test_cache_tracker(),
            test_context(),
        );
        let snapshot = crate::state::VersionedState::new_with_user_message("Tell me about Rust").snapshot();
        let result = node.run(snapshot, ctx()).await;
        assert!(matches!(result, Err(NodeError::ValidationFailed(_))));
    }
}
