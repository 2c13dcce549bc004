//! Per-node retry, exponential backoff, circuit breaker, and dead-letter
//! recovery for node dispatch.
//!
//! Wraps a single node invocation: on failure it retries with backoff up to
//! `attempts`, and on exhaustion appends a [`DeadLetterEntry`] instead of
//! letting the error abort the session. A per-node circuit breaker opens
//! after `circuit_breaker_threshold` consecutive dead-letters and
//! short-circuits further dispatch until `circuit_breaker_cooldown` elapses.
//! Metrics and dead-letter entries are folded into the node's
//! `report_metadata` extra key so they're checkpointed with everything else.

use std::sync::Arc;
use std::time::{Duration, Instant};

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::channels::errors::{ErrorEvent, LadderError};
use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::StateSnapshot;

const REPORT_METADATA_KEY: &str = "report_metadata";

/// A single irrecoverable node failure, recorded once retries are exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterEntry {
    pub timestamp: String,
    pub node: String,
    pub error_type: String,
    pub message: String,
    pub attempts: u32,
    pub reason: String,
}

/// Session-level recovery counters, accumulated across every node dispatch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryMetrics {
    pub retries_attempted: u64,
    pub recovered_failures: u64,
    pub retry_exhausted: u64,
    pub circuit_breaker_opened: u64,
    pub circuit_breaker_skips: u64,
    pub dead_letter_count: u64,
}

impl RecoveryMetrics {
    fn is_zero(&self) -> bool {
        *self == RecoveryMetrics::default()
    }

    fn add(&self, delta: &RecoveryMetrics) -> RecoveryMetrics {
        RecoveryMetrics {
            retries_attempted: self.retries_attempted + delta.retries_attempted,
            recovered_failures: self.recovered_failures + delta.recovered_failures,
            retry_exhausted: self.retry_exhausted + delta.retry_exhausted,
            circuit_breaker_opened: self.circuit_breaker_opened + delta.circuit_breaker_opened,
            circuit_breaker_skips: self.circuit_breaker_skips + delta.circuit_breaker_skips,
            dead_letter_count: self.dead_letter_count + delta.dead_letter_count,
        }
    }
}

/// A point-in-time view of a node's breaker state, mainly useful in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    pub consecutive_failures: u32,
    pub breaker_open: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum RecoveryError {
    #[error("invalid retry policy: {0}")]
    #[diagnostic(code(research_agent::schedulers::recovery::invalid_policy))]
    InvalidPolicy(&'static str),
}

/// Retry/backoff/circuit-breaker policy wrapping node dispatch.
///
/// Clones share the same breaker bookkeeping (it's internally `Arc`-backed),
/// so a policy can be cloned once per dispatch task without losing track of
/// consecutive-failure counts across supersteps.
#[derive(Clone)]
pub struct RecoveryPolicy {
    attempts: u32,
    initial_backoff: Duration,
    backoff_max: Duration,
    circuit_breaker_threshold: u32,
    circuit_breaker_cooldown: Duration,
    breakers: Arc<Mutex<FxHashMap<String, BreakerState>>>,
}

impl RecoveryPolicy {
    /// A single dispatch attempt per node, breaker effectively disabled.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            initial_backoff: Duration::from_millis(1),
            backoff_max: Duration::from_millis(1),
            circuit_breaker_threshold: u32::MAX,
            circuit_breaker_cooldown: Duration::ZERO,
            breakers: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Build a policy with explicit retry/backoff/circuit-breaker parameters.
    pub fn new(
        attempts: u32,
        initial_backoff: Duration,
        backoff_max: Duration,
        circuit_breaker_threshold: u32,
        circuit_breaker_cooldown: Duration,
    ) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_backoff,
            backoff_max,
            circuit_breaker_threshold: circuit_breaker_threshold.max(1),
            circuit_breaker_cooldown,
            breakers: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let scale = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(scale).min(self.backoff_max)
    }

    /// Current breaker state for `node_id`, for observability/tests.
    pub fn report_for(&self, node_id: &str) -> RecoveryReport {
        let mut breakers = self.breakers.lock();
        let state = breakers.entry(node_id.to_string()).or_default();
        let breaker_open = match state.opened_at {
            Some(opened_at) => opened_at.elapsed() < self.circuit_breaker_cooldown,
            None => false,
        };
        RecoveryReport {
            consecutive_failures: state.consecutive_failures,
            breaker_open,
        }
    }

    /// True if the breaker for `node_id` is open and its cooldown hasn't
    /// elapsed yet. A breaker whose cooldown has elapsed transitions to
    /// half-open (closed, counters intact) and allows one trial dispatch.
    fn breaker_open(&self, node_id: &str) -> bool {
        let mut breakers = self.breakers.lock();
        let state = breakers.entry(node_id.to_string()).or_default();
        match state.opened_at {
            Some(opened_at) if opened_at.elapsed() < self.circuit_breaker_cooldown => true,
            Some(_) => {
                state.opened_at = None;
                false
            }
            None => false,
        }
    }

    fn record_success(&self, node_id: &str) {
        let mut breakers = self.breakers.lock();
        let state = breakers.entry(node_id.to_string()).or_default();
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    /// Records a dead-lettered failure; returns `true` if this failure is
    /// the one that just tripped the breaker open.
    fn record_failure(&self, node_id: &str) -> bool {
        let mut breakers = self.breakers.lock();
        let state = breakers.entry(node_id.to_string()).or_default();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.circuit_breaker_threshold && state.opened_at.is_none()
        {
            state.opened_at = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Dispatch `node` against `snapshot`, retrying transient failures with
    /// exponential backoff and honoring the per-node circuit breaker.
    ///
    /// Retry exhaustion and breaker trips never surface as `Err`: they're
    /// folded into the returned `NodePartial`'s `report_metadata` (and, on
    /// exhaustion, `errors`) so one misbehaving node can't abort the whole
    /// session. `Err` is reserved for joins/panics handled above this layer.
    pub async fn run_with_retry(
        &self,
        node: &dyn Node,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let node_id = ctx.node_id.clone();

        if self.breaker_open(&node_id) {
            warn!(node = %node_id, "circuit breaker is open");
            let _ = ctx.emit_diagnostic("recovery", "circuit breaker is open");
            let delta = RecoveryMetrics {
                circuit_breaker_skips: 1,
                ..Default::default()
            };
            return Ok(fold_metrics(
                NodePartial::default(),
                &snapshot,
                delta,
                None,
            ));
        }

        let mut metrics = RecoveryMetrics::default();
        let mut last_err: Option<NodeError> = None;

        for attempt in 1..=self.attempts {
            match node.run(snapshot.clone(), ctx.clone()).await {
                Ok(partial) => {
                    if attempt > 1 {
                        metrics.recovered_failures = 1;
                    }
                    self.record_success(&node_id);
                    return Ok(fold_metrics(partial, &snapshot, metrics, None));
                }
                Err(err) => {
                    metrics.retries_attempted += 1;
                    last_err = Some(err);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff_for(attempt)).await;
                    }
                }
            }
        }

        let err = last_err.expect("loop runs at least once when attempts >= 1");
        metrics.retry_exhausted = 1;
        metrics.dead_letter_count = 1;
        if self.record_failure(&node_id) {
            metrics.circuit_breaker_opened = 1;
        }

        let dlq_entry = DeadLetterEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            node: node_id.clone(),
            error_type: error_type_name(&err).to_string(),
            message: err.to_string(),
            attempts: self.attempts,
            reason: "retry_exhausted".to_string(),
        };

        let error_event = ErrorEvent::node(node_id, ctx.step, LadderError::msg(err.to_string()))
            .with_tag("retry_exhausted");

        let partial = NodePartial::default().with_errors(vec![error_event]);
        Ok(fold_metrics(partial, &snapshot, metrics, Some(dlq_entry)))
    }
}

fn error_type_name(err: &NodeError) -> &'static str {
    match err {
        NodeError::MissingInput { .. } => "missing_input",
        NodeError::Provider { .. } => "provider",
        NodeError::Serde(_) => "serde_json",
        NodeError::ValidationFailed(_) => "validation_failed",
        NodeError::EventBus(_) => "event_bus",
    }
}

/// Merge a recovery metrics delta (and optional dead-letter entry) into the
/// `report_metadata` extra key, reading the prior cumulative value out of
/// `snapshot` since the generic extra channel only replaces whole values.
fn fold_metrics(
    mut partial: NodePartial,
    snapshot: &StateSnapshot,
    delta: RecoveryMetrics,
    dlq_entry: Option<DeadLetterEntry>,
) -> NodePartial {
    if delta.is_zero() && dlq_entry.is_none() {
        return partial;
    }

    let mut report_metadata = snapshot
        .extra
        .get(REPORT_METADATA_KEY)
        .cloned()
        .unwrap_or_else(|| json!({}));
    if !report_metadata.is_object() {
        report_metadata = json!({});
    }
    let obj = report_metadata
        .as_object_mut()
        .expect("just normalized to an object");

    let existing: RecoveryMetrics = obj
        .get("recovery")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    obj.insert(
        "recovery".to_string(),
        serde_json::to_value(existing.add(&delta)).unwrap_or_default(),
    );

    if let Some(entry) = dlq_entry {
        let mut dlq: Vec<DeadLetterEntry> = obj
            .get("dead_letter_queue")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        dlq.push(entry);
        obj.insert(
            "dead_letter_queue".to_string(),
            serde_json::to_value(dlq).unwrap_or_default(),
        );
    }

    let mut extra = partial.extra.take().unwrap_or_default();
    extra.insert(REPORT_METADATA_KEY.to_string(), report_metadata);
    partial.extra = Some(extra);
    partial
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::utils::testing::create_test_snapshot;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysFails;

    #[async_trait]
    impl Node for AlwaysFails {
        async fn run(
            &self,
            _snapshot: StateSnapshot,
            _ctx: NodeContext,
        ) -> Result<NodePartial, NodeError> {
            Err(NodeError::ValidationFailed("boom".to_string()))
        }
    }

    struct FailsThenSucceeds {
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl Node for FailsThenSucceeds {
        async fn run(
            &self,
            _snapshot: StateSnapshot,
            _ctx: NodeContext,
        ) -> Result<NodePartial, NodeError> {
            if self.remaining_failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(NodeError::Provider {
                    provider: "test",
                    message: "transient".to_string(),
                })
            } else {
                Ok(NodePartial::default())
            }
        }
    }

    fn test_ctx() -> NodeContext {
        NodeContext {
            node_id: "search".to_string(),
            step: 1,
            event_emitter: EventBus::default().get_emitter(),
        }
    }

    #[tokio::test]
    async fn retries_then_recovers() {
        let policy = RecoveryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
            10,
            Duration::from_secs(60),
        );
        let node = FailsThenSucceeds {
            remaining_failures: AtomicU32::new(2),
        };
        let snap = create_test_snapshot(1, 1);
        let partial = policy
            .run_with_retry(&node, snap, test_ctx())
            .await
            .expect("recovery never returns Err");
        let metadata = partial.extra.expect("metrics recorded").remove("report_metadata").unwrap();
        assert_eq!(metadata["recovery"]["retries_attempted"], 2);
        assert_eq!(metadata["recovery"]["recovered_failures"], 1);
    }

    #[tokio::test]
    async fn exhaustion_dead_letters_without_erroring() {
        let policy = RecoveryPolicy::new(
            2,
            Duration::from_millis(1),
            Duration::from_millis(2),
            10,
            Duration::from_secs(60),
        );
        let snap = create_test_snapshot(1, 1);
        let partial = policy
            .run_with_retry(&AlwaysFails, snap, test_ctx())
            .await
            .expect("recovery never returns Err");
        assert!(partial.errors.is_some());
        let metadata = partial.extra.unwrap().remove("report_metadata").unwrap();
        assert_eq!(metadata["recovery"]["retry_exhausted"], 1);
        assert_eq!(metadata["dead_letter_queue"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_skips_dispatch() {
        let policy = RecoveryPolicy::new(
            1,
            Duration::from_millis(1),
            Duration::from_millis(2),
            2,
            Duration::from_secs(60),
        );
        let snap = create_test_snapshot(1, 1);

        let _ = policy
            .run_with_retry(&AlwaysFails, snap.clone(), test_ctx())
            .await
            .unwrap();
        let second = policy
            .run_with_retry(&AlwaysFails, snap.clone(), test_ctx())
            .await
            .unwrap();
        assert_eq!(
            second.extra.unwrap()["report_metadata"]["recovery"]["circuit_breaker_opened"],
            1
        );

        let third = policy.run_with_retry(&AlwaysFails, snap, test_ctx()).await.unwrap();
        let metadata = third.extra.unwrap().remove("report_metadata").unwrap();
        assert_eq!(metadata["recovery"]["circuit_breaker_skips"], 1);
        assert!(policy.report_for("search").breaker_open);
    }
}
