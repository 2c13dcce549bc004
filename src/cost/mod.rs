//! Token→USD cost accounting, budget gating, and budget-pressure model-tier
//! routing.
//!
//! One `CostTracker` is owned per session (never shared across sessions):
//! every prospective LLM call is estimated, converted to USD via a per-model
//! price table, and rejected before dispatch if it would exceed the
//! session's budget. Above a configurable warn threshold the tracker can
//! recommend a cheaper model tier for non-Synthesize stages; Synthesize
//! always runs on the primary tier.

pub mod tokenizer;

use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::message::Message;

/// Per-model $/Mtok pricing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelPrice {
    pub fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    fn usd_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (f64::from(input_tokens) / 1_000_000.0) * self.input_per_mtok
            + (f64::from(output_tokens) / 1_000_000.0) * self.output_per_mtok
    }
}

/// The pipeline stage issuing a call, used to gate tier downgrades —
/// Synthesize stays on the primary tier until the budget is fully exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Plan,
    Search,
    Scrape,
    Summarize,
    Synthesize,
}

#[derive(Debug, Error, Diagnostic)]
pub enum CostError {
    #[error(
        "budget exhausted: estimated call would cost ${estimated:.4}, only ${remaining:.4} of ${budget:.2} remains"
    )]
    #[diagnostic(
        code(research_agent::cost::budget_exhausted),
        help("reduce scope or raise max_cost_per_run")
    )]
    BudgetExhausted {
        estimated: f64,
        remaining: f64,
        budget: f64,
    },

    #[error("no price table entry for model {0:?}")]
    #[diagnostic(code(research_agent::cost::unknown_model))]
    UnknownModel(String),
}

/// A committed budget reservation for one LLM call.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub estimated_cost_usd: f64,
}

#[derive(Debug, Default)]
struct Inner {
    spent_usd: f64,
    tier_downgrades: u64,
}

/// Accumulates per-call USD cost against a fixed budget and proposes
/// cheaper model tiers under budget pressure.
///
/// Cheap to clone: internally `Arc`+`Mutex`-backed, so the same tracker can
/// be shared across the concurrently-dispatched nodes of one session.
#[derive(Clone)]
pub struct CostTracker {
    prices: Arc<FxHashMap<String, ModelPrice>>,
    budget_usd: f64,
    warn_at_percentage: f64,
    inner: Arc<Mutex<Inner>>,
}

impl CostTracker {
    pub fn new(
        prices: FxHashMap<String, ModelPrice>,
        budget_usd: f64,
        warn_at_percentage: f64,
    ) -> Self {
        Self {
            prices: Arc::new(prices),
            budget_usd,
            warn_at_percentage,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn budget_usd(&self) -> f64 {
        self.budget_usd
    }

    pub fn total_cost(&self) -> f64 {
        self.inner.lock().spent_usd
    }

    pub fn remaining_budget(&self) -> f64 {
        (self.budget_usd - self.total_cost()).max(0.0)
    }

    pub fn tier_downgrades(&self) -> u64 {
        self.inner.lock().tier_downgrades
    }

    /// Whether accumulated spend has crossed `warn_at_percentage` of budget.
    pub fn should_warn(&self) -> bool {
        if self.budget_usd <= 0.0 {
            return true;
        }
        (self.total_cost() / self.budget_usd) * 100.0 >= self.warn_at_percentage
    }

    /// Estimate a prospective call's cost and, if it fits in the remaining
    /// budget, commit it immediately. Retries never reset prior spend: every
    /// external call attempt is charged, successful or not.
    pub fn estimate_and_reserve(
        &self,
        model: &str,
        system_prompt: &str,
        messages: &[Message],
        estimated_output_tokens: u32,
    ) -> Result<Reservation, CostError> {
        let price = self
            .prices
            .get(model)
            .copied()
            .ok_or_else(|| CostError::UnknownModel(model.to_string()))?;
        let estimate =
            tokenizer::estimate_call_tokens(system_prompt, messages, model, estimated_output_tokens);
        let cost = price.usd_cost(estimate.input_tokens, estimate.output_tokens);

        let mut inner = self.inner.lock();
        let remaining = self.budget_usd - inner.spent_usd;
        if cost > remaining {
            return Err(CostError::BudgetExhausted {
                estimated: cost,
                remaining,
                budget: self.budget_usd,
            });
        }
        inner.spent_usd += cost;

        Ok(Reservation {
            input_tokens: estimate.input_tokens,
            output_tokens: estimate.output_tokens,
            estimated_cost_usd: cost,
        })
    }

    /// Recommend a model tier for `stage`: the primary tier under healthy
    /// budget, or `economy_model` once `should_warn` trips — except for
    /// Synthesize, which always stays on the primary tier.
    pub fn recommended_tier<'a>(
        &self,
        stage: PipelineStage,
        primary_model: &'a str,
        economy_model: &'a str,
    ) -> &'a str {
        if stage == PipelineStage::Synthesize || !self.should_warn() {
            return primary_model;
        }
        let mut inner = self.inner.lock();
        inner.tier_downgrades += 1;
        warn!(
            ?stage,
            spent_usd = inner.spent_usd,
            budget_usd = self.budget_usd,
            economy_model,
            "tier_downgraded"
        );
        economy_model
    }
}
