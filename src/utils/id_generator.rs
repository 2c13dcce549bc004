//! Identifier generation for runs, sessions, and other workflow entities.
//!
//! Defaults to UUIDv4. Tests that need reproducible IDs can supply a seed via
//! [`IdConfig`], in which case IDs are derived from a [`DeterministicRng`]
//! plus a monotonic counter so repeated calls never collide even though the
//! seed is fixed.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use super::deterministic_rng::DeterministicRng;

/// Configuration for [`IdGenerator`].
#[derive(Debug, Clone, Default)]
pub struct IdConfig {
    /// When set, IDs are generated deterministically from this seed.
    pub seed: Option<u64>,
    /// Append a monotonic counter suffix even in seeded mode (default true
    /// in practice; kept explicit since a fixed seed alone would repeat).
    pub use_counter: bool,
}

#[derive(Debug)]
enum Source {
    Random,
    Seeded(DeterministicRng),
}

/// Generates run IDs and general-purpose unique IDs.
#[derive(Debug)]
pub struct IdGenerator {
    source: Source,
    counter: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            source: Source::Random,
            counter: AtomicU64::new(0),
        }
    }

    pub fn with_config(config: IdConfig) -> Self {
        let source = match config.seed {
            Some(seed) => Source::Seeded(DeterministicRng::new(seed)),
            None => Source::Random,
        };
        Self {
            source,
            counter: AtomicU64::new(0),
        }
    }

    /// Generate an ID prefixed for a workflow run.
    pub fn generate_run_id(&mut self) -> String {
        format!("run-{}", self.generate_id())
    }

    /// Generate a general-purpose unique ID.
    pub fn generate_id(&mut self) -> String {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        match &mut self.source {
            Source::Random => Uuid::new_v4().to_string(),
            Source::Seeded(rng) => format!("{:016x}-{counter}", rng.random_u64()),
        }
    }
}
