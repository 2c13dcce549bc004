//! Fixtures shared by the crate's own test suites.
//!
//! Kept in the library (rather than `tests/common`) so both inline
//! `#[cfg(test)]` modules and the `tests/` integration suite can use the same
//! registries without duplicating node stubs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::node::{Node, NodeContext, NodeError, NodePartial};
use crate::state::StateSnapshot;
use crate::types::NodeKind;

/// Build a `StateSnapshot` with the given channel versions and empty data.
pub fn create_test_snapshot(messages_version: u32, extra_version: u32) -> StateSnapshot {
    StateSnapshot {
        messages: Vec::new(),
        messages_version,
        extra: FxHashMap::default(),
        extra_version,
        errors: Vec::new(),
        errors_version: 1,
    }
}

struct PassThroughNode;

#[async_trait]
impl Node for PassThroughNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        Ok(NodePartial::default())
    }
}

struct DelayedNode {
    delay: Duration,
}

#[async_trait]
impl Node for DelayedNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        tokio::time::sleep(self.delay).await;
        Ok(NodePartial::default())
    }
}

/// A node registry with two immediately-resolving nodes, `Custom("A")` and `Custom("B")`.
pub fn make_test_registry() -> FxHashMap<NodeKind, Arc<dyn Node>> {
    let mut registry: FxHashMap<NodeKind, Arc<dyn Node>> = FxHashMap::default();
    registry.insert(NodeKind::Custom("A".into()), Arc::new(PassThroughNode));
    registry.insert(NodeKind::Custom("B".into()), Arc::new(PassThroughNode));
    registry
}

/// Like [`make_test_registry`] but both nodes sleep briefly, useful for
/// asserting on concurrent-vs-serialized dispatch ordering.
pub fn make_delayed_registry() -> FxHashMap<NodeKind, Arc<dyn Node>> {
    let mut registry: FxHashMap<NodeKind, Arc<dyn Node>> = FxHashMap::default();
    registry.insert(
        NodeKind::Custom("A".into()),
        Arc::new(DelayedNode {
            delay: Duration::from_millis(20),
        }),
    );
    registry.insert(
        NodeKind::Custom("B".into()),
        Arc::new(DelayedNode {
            delay: Duration::from_millis(20),
        }),
    );
    registry
}

/// A node that always fails with `NodeError::MissingInput { what: "test_key" }`.
#[derive(Default)]
pub struct FailingNode;

#[async_trait]
impl Node for FailingNode {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        Err(NodeError::MissingInput { what: "test_key" })
    }
}
