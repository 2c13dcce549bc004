//! Small typed wrappers for runtime identifiers and counters.
//!
//! Kept separate from the stringly-typed `NodeKind`/`ChannelType` pair in
//! [`crate::types`]: those describe graph topology, these describe a single
//! running session's identity and progress, and have different invariants
//! (uniqueness, monotonic increment) worth enforcing in their own type.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session identifier. Wraps a `String` so call sites can't
/// accidentally pass a raw node id or query string where a session id is
/// expected.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing identifier (e.g. one supplied by a caller or read
    /// back from the checkpoint store).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh, randomly generated session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A session's last-executed superstep ordinal. `zero()` is the pre-start
/// value; `next()` saturates at `u64::MAX` rather than wrapping, since a
/// session that has run that many steps has bigger problems than overflow.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepNumber(u64);

impl StepNumber {
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn zero() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for StepNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StepNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_round_trips_as_str() {
        let id = SessionId::new("abc");
        assert_eq!(id.as_str(), "abc");
    }

    #[test]
    fn step_number_next_saturates() {
        let max = StepNumber::new(u64::MAX);
        assert_eq!(max.next().value(), u64::MAX);
    }
}
