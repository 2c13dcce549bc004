//! Rolling-window context compaction.
//!
//! Keeps the most recent `window_size` turns in full detail and masks older
//! tool-role turns with a short placeholder once the running token total
//! exceeds `max_tokens`. A cooldown suppresses repeated O(n) scans once a
//! compaction pass finds nothing left to mask.

use serde::{Deserialize, Serialize};

/// A single conversation turn tracked by a [`ContextManager`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: String,
    pub content: String,
    pub token_count: u32,
    pub step_name: String,
    pub masked: bool,
}

impl Turn {
    pub fn new(role: impl Into<String>, content: impl Into<String>, token_count: u32) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            token_count,
            step_name: String::new(),
            masked: false,
        }
    }

    #[must_use]
    pub fn with_step_name(mut self, step_name: impl Into<String>) -> Self {
        self.step_name = step_name.into();
        self
    }
}

/// Statistics from one [`ContextManager::compact`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionResult {
    pub original_tokens: u32,
    pub compacted_tokens: u32,
    pub turns_masked: u32,
    pub turns_total: u32,
}

const MASKED_TURN_TOKEN_COUNT: u32 = 10;

/// Manages a rolling window of conversation turns with tool-output masking.
pub struct ContextManager {
    window_size: usize,
    max_tokens: u32,
    compaction_cooldown_turns: u32,
    turns: Vec<Turn>,
    turns_since_compaction: u32,
    compaction_pending: bool,
}

impl ContextManager {
    pub fn new(window_size: usize, max_tokens: u32, compaction_cooldown_turns: u32) -> Self {
        Self {
            window_size,
            max_tokens,
            compaction_cooldown_turns,
            turns: Vec::new(),
            turns_since_compaction: 0,
            compaction_pending: false,
        }
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn total_tokens(&self) -> u32 {
        self.turns.iter().map(|t| t.token_count).sum()
    }

    /// Append a new turn, triggering compaction if the token budget is
    /// exceeded. Compaction is skipped during the post-no-op cooldown
    /// window to avoid repeated full scans with nothing left to mask.
    pub fn add_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.turns_since_compaction += 1;

        if self.compaction_pending {
            if self.turns_since_compaction < self.compaction_cooldown_turns {
                return;
            }
            self.compaction_pending = false;
        }

        if self.total_tokens() > self.max_tokens {
            let result = self.compact();
            self.turns_since_compaction = 0;
            if result.turns_masked == 0 {
                self.compaction_pending = true;
            }
        }
    }

    /// Mask tool-role turns older than the last `window_size` turns.
    pub fn compact(&mut self) -> CompactionResult {
        let original_tokens = self.total_tokens();
        let mut turns_masked = 0u32;
        let cutoff = self.turns.len().saturating_sub(self.window_size);

        for turn in &mut self.turns[..cutoff] {
            if turn.role == "tool" && !turn.masked {
                turn.content = format!("[masked tool output from {}]", turn.step_name);
                turn.token_count = MASKED_TURN_TOKEN_COUNT;
                turn.masked = true;
                turns_masked += 1;
            }
        }

        if turns_masked > 0 {
            self.compaction_pending = false;
            self.turns_since_compaction = 0;
        }

        let result = CompactionResult {
            original_tokens,
            compacted_tokens: self.total_tokens(),
            turns_masked,
            turns_total: self.turns.len() as u32,
        };
        tracing::info!(
            original_tokens = result.original_tokens,
            compacted_tokens = result.compacted_tokens,
            turns_masked = result.turns_masked,
            "context_compacted"
        );
        result
    }

    /// Turns formatted as `{role, content}` pairs ready for LLM consumption.
    pub fn context_window(&self) -> Vec<(String, String)> {
        self.turns
            .iter()
            .map(|t| (t.role.clone(), t.content.clone()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.turns_since_compaction = 0;
        self.compaction_pending = false;
    }
}
