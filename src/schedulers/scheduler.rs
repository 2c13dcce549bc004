//! The concurrent superstep scheduler.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::instrument;

use crate::event_bus::EventEmitter;
use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::StateSnapshot;
use crate::types::NodeKind;

use super::recovery::RecoveryPolicy;

/// Per-session bookkeeping the scheduler needs across supersteps: which
/// channel versions each node last observed, keyed by the node's encoded id.
#[derive(Clone, Debug, Default)]
pub struct SchedulerState {
    pub versions_seen: FxHashMap<String, FxHashMap<String, u64>>,
}

/// Outcome of dispatching one superstep across a frontier.
#[derive(Debug, Default)]
pub struct StepRunResult {
    /// Nodes actually dispatched, in frontier order.
    pub ran_nodes: Vec<NodeKind>,
    /// Nodes gated out (version-unchanged, or a virtual End node).
    pub skipped_nodes: Vec<NodeKind>,
    /// Outputs keyed by node; may arrive in any order under concurrency.
    pub outputs: Vec<(NodeKind, NodePartial)>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error("node {kind} failed at step {step}: {source}")]
    #[diagnostic(code(research_agent::schedulers::node_run))]
    NodeRun {
        kind: NodeKind,
        step: u64,
        #[source]
        source: NodeError,
    },

    #[error("node task join failed: {0}")]
    #[diagnostic(code(research_agent::schedulers::join))]
    Join(#[from] tokio::task::JoinError),
}

/// Dispatches a frontier's nodes under a bounded concurrency limit.
#[derive(Clone)]
pub struct Scheduler {
    pub concurrency_limit: usize,
    recovery: RecoveryPolicy,
}

impl Scheduler {
    /// A scheduler with no retry/backoff (one attempt per node).
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
            recovery: RecoveryPolicy::none(),
        }
    }

    /// A scheduler that retries failed node dispatch per `policy`.
    pub fn with_recovery(concurrency_limit: usize, policy: RecoveryPolicy) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
            recovery: policy,
        }
    }

    fn channel_key(snapshot: &StateSnapshot) -> FxHashMap<String, u64> {
        let mut versions = FxHashMap::default();
        versions.insert("messages".to_string(), snapshot.messages_version as u64);
        versions.insert("extra".to_string(), snapshot.extra_version as u64);
        versions
    }

    /// Whether `id` should run given the channel versions in `snapshot`,
    /// compared against what was last recorded for it.
    pub fn should_run(&self, state: &SchedulerState, id: &str, snapshot: &StateSnapshot) -> bool {
        match state.versions_seen.get(id) {
            None => true,
            Some(seen) => {
                let current = Self::channel_key(snapshot);
                current.iter().any(|(channel, version)| {
                    seen.get(channel).is_none_or(|prev| version > prev)
                })
            }
        }
    }

    /// Record the channel versions `id` has now observed.
    pub fn record_seen(&self, state: &mut SchedulerState, id: &str, snapshot: &StateSnapshot) {
        state
            .versions_seen
            .insert(id.to_string(), Self::channel_key(snapshot));
    }

    /// Run one superstep: gate, dispatch (bounded concurrency, with retry),
    /// and collect results for the given frontier.
    #[instrument(skip(self, state, nodes, snapshot, emitter), fields(step))]
    pub async fn superstep(
        &self,
        state: &mut SchedulerState,
        nodes: &FxHashMap<NodeKind, Arc<dyn Node>>,
        frontier: Vec<NodeKind>,
        snapshot: StateSnapshot,
        step: u64,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<StepRunResult, SchedulerError> {
        let mut result = StepRunResult::default();
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut join_set = tokio::task::JoinSet::new();

        for kind in &frontier {
            if kind.is_end() {
                result.skipped_nodes.push(kind.clone());
                continue;
            }

            let id = kind.encode();
            if !self.should_run(state, &id, &snapshot) {
                result.skipped_nodes.push(kind.clone());
                continue;
            }

            let Some(node) = nodes.get(kind).cloned() else {
                result.skipped_nodes.push(kind.clone());
                continue;
            };

            self.record_seen(state, &id, &snapshot);
            result.ran_nodes.push(kind.clone());

            let permit = Arc::clone(&semaphore);
            let ctx = NodeContext {
                node_id: id,
                step,
                event_emitter: Arc::clone(&emitter),
            };
            let snap = snapshot.clone();
            let kind_owned = kind.clone();
            let recovery = self.recovery.clone();

            join_set.spawn(async move {
                let _permit = permit
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                let outcome = recovery.run_with_retry(node.as_ref(), snap, ctx).await;
                (kind_owned, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (kind, outcome) = joined?;
            match outcome {
                Ok(partial) => result.outputs.push((kind, partial)),
                Err(source) => {
                    return Err(SchedulerError::NodeRun { kind, step, source });
                }
            }
        }

        Ok(result)
    }
}
