//! Merge Inspector for debug merge traces and state debugging.
//!
//! This module provides tools to inspect and debug state merges during
//! barrier synchronization. Useful for understanding how `NodePartial`
//! updates are combined into the final `VersionedState`.
//!
//! # Overview
//!
//! When multiple nodes execute concurrently, their outputs are merged
//! during the barrier phase. The merge inspector helps diagnose issues
//! like:
//!
//! - Unexpected state after merges
//! - Reducer conflicts or ordering issues
//! - Missing or overwritten channel data
//!
//! # Future Implementation
//!
//! This module is currently a placeholder. Planned features include:
//!
//! - `MergeTrace` struct capturing before/after snapshots
//! - `MergeInspector` trait for custom inspection hooks
//! - Integration with tracing for structured merge logging
//! - Diff generation between pre/post merge states
//!
//! # Example (Future API)
//!
//! ```rust,ignore
//! use research_agent::utils::merge_inspector::MergeInspector;
//!
//! // Attach an inspector to capture merge operations
//! let inspector = MergeInspector::new()
//!     .with_diff_output(true)
//!     .with_channel_filter(ChannelType::Message);
//!
//! // Inspect will be called during barrier synchronization
//! let traces = inspector.traces();
//! for trace in traces {
//!     println!("Node {} merged: {:?}", trace.node_id, trace.diff);
//! }
//! ```

// Placeholder for future implementation
