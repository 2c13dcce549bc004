//! Concurrent execution of a workflow frontier.
//!
//! A [`scheduler::Scheduler`] takes a frontier (the set of nodes the graph
//! says should run next), gates each node on whether its upstream channels
//! actually changed since it last ran, dispatches the ones that should run
//! under a bounded concurrency limit, and reports back what happened so the
//! caller (`AppRunner`) can apply the barrier and advance the session.
//!
//! Recovery (retry/backoff/circuit-breaker) wraps node dispatch inside the
//! scheduler rather than living in a separate execution layer, since retrying
//! a node *is* just running it again through the same dispatch path.

pub mod recovery;
pub mod scheduler;

pub use recovery::{RecoveryError, RecoveryPolicy, RecoveryReport};
pub use scheduler::{Scheduler, SchedulerError, SchedulerState, StepRunResult};
