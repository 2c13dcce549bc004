//! Summarize node (§4.2): compresses each sub-question's scraped content
//! into a cited summary, and progressively appends it to the on-disk
//! report so a crash mid-run leaves a partial but parseable Markdown file.

use std::io::Write as _;
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
    domain::{DomainUpdate, DomainView, ScrapedPage, Summary},
    message::Message,
    node::{Node, NodeContext, NodeError, NodePartial},
    state::StateSnapshot,
};

use super::PipelineConfig;

const PROMPT_NAME: &str = "summarize";
const STEP_NAME: &str = "summarize";

#[derive(serde::Deserialize)]
struct RawSummary {
    summary: String,
    #[serde(default)]
    key_findings: Vec<String>,
}

pub struct SummarizeNode {
    llm: Arc<dyn LlmClient>,
    cost: CostTracker,
    cache: Option<Arc<LlmCache>>,
    config: PipelineConfig,
    cache_tracker: Arc<Mutex<CacheTracker>>,
    context: Arc<Mutex<ContextManager>>,
}

impl SummarizeNode {
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

    fn system_prompt() -> &'static str {
        "You compress research material into a concise, well-cited summary. \
         Respond with strict JSON: an object with fields \"summary\" (a paragraph) \
         and \"key_findings\" (an array of short bullet strings). No prose outside the JSON object."
    }

    async fn summarize_group(
        &self,
        question: &str,
        pages: &[&ScrapedPage],
    ) -> Result<(String, Vec<String>), NodeError> {
        let body = pages
            .iter()
            .map(|p| format!("Source: {}\n{}", p.url, p.content))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let prompt = format!("Sub-question: {question}\n\nMaterial:\n{body}");
        let messages = vec![Message::user(&prompt)];
        let model = self.cost.recommended_tier(
            PipelineStage::Summarize,
            &self.config.primary_model,
            &self.config.economy_model,
        );

        let cache_extra = prompt_hash(PROMPT_NAME);
        if let Some(cache) = &self.cache
            && let Some(cached) = cache.get(model, 0.0, &messages, &cache_extra)
            && let Some(text) = cached.as_str()
        {
            return parse_summary(text);
        }

        self.cost
            .estimate_and_reserve(model, Self::system_prompt(), &messages, 512)
            .map_err(|e| NodeError::Provider {
                provider: "cost_tracker",
                message: e.to_string(),
            })?;

        let completion = self
            .llm
            .complete(model, Self::system_prompt(), &messages, 0.0)
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

        parse_summary(&completion.content)
    }

    fn append_progress(&self, question: &str, summary: &str) {
        let Some(dir) = &self.config.report_dir else {
            return;
        };
        if let Err(err) = std::fs::create_dir_all(dir) {
            tracing::warn!(error = %err, "report_dir_create_failed");
            return;
        }
        let path = dir.join("progress.md");
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "## {question}\n\n{summary}\n"));
        if let Err(err) = result {
            tracing::warn!(error = %err, "progressive_report_write_failed");
        }
    }
}

fn parse_summary(raw: &str) -> Result<(String, Vec<String>), NodeError> {
    let parsed: RawSummary = serde_json::from_str(raw)
        .map_err(|e| NodeError::ValidationFailed(format!("summarize response was not valid JSON: {e}")))?;
    if parsed.summary.trim().is_empty() {
        return Err(NodeError::ValidationFailed(
            "summary text must not be empty".to_string(),
        ));
    }
    Ok((parsed.summary, parsed.key_findings))
}

#[async_trait]
impl Node for SummarizeNode {
    async fn run(&self, snapshot: StateSnapshot, ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let view = DomainView::new(&snapshot.extra);
        let sub_questions = view.sub_questions();
        let already: std::collections::HashSet<u32> =
            view.summaries().into_iter().map(|s| s.sub_question_id).collect();
        let scraped = view.scraped_content();

        let mut summaries = Vec::new();
        for sq in &sub_questions {
            if already.contains(&sq.id) {
                continue;
            }
            let pages: Vec<&ScrapedPage> = scraped
                .iter()
                .filter(|p| p.sub_question_id == sq.id)
                .collect();
            if pages.is_empty() {
                continue;
            }

            let (summary_text, key_findings) = self.summarize_group(&sq.question, &pages).await?;
            self.append_progress(&sq.question, &summary_text);

            summaries.push(Summary {
                sub_question_id: sq.id,
                summary: summary_text,
                source_urls: pages.iter().map(|p| p.url.clone()).collect(),
                key_findings,
            });
        }

        ctx.emit_node("summarize", format!("produced {} summaries", summaries.len()))?;
        let extra = DomainUpdate::new().append_summaries(&summaries).into_map();
        Ok(NodePartial::new().with_extra(extra))
    }
}
