//! Provider-native prompt-cache shaping and hit-rate tracking.
//!
//! Mirrors Anthropic-style prompt caching: stable content (tool schemas,
//! system prompt) is ordered ahead of the growing conversation history so
//! the provider's cache prefix keeps matching as a session progresses.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Cached reads cost 90% less than an uncached read.
const CACHE_READ_COST_MULTIPLIER: f64 = 0.10;
const CACHE_CONTROL_TYPE: &str = "ephemeral";

/// A cache-stable payload ready for an Anthropic-style messages API call.
#[derive(Debug, Clone, Serialize)]
pub struct CacheOrderedPayload {
    pub system: Vec<Value>,
    pub tools: Vec<Value>,
    pub messages: Vec<Value>,
}

/// Serialize `value` with sorted object keys and no extra whitespace, so
/// identical content always produces an identical string — critical for
/// cache key/prefix stability.
pub fn deterministic_json(value: &Value) -> String {
    serde_json::to_string(&sort_keys(value)).expect("sorted value always serializes")
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.iter().map(|(k, v)| (k.clone(), sort_keys(v))).collect();
            serde_json::to_value(sorted).expect("BTreeMap<String, Value> always serializes")
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

fn with_cache_control(mut value: Value) -> Value {
    if let Value::Object(ref mut map) = value {
        map.insert(
            "cache_control".to_string(),
            serde_json::json!({"type": CACHE_CONTROL_TYPE}),
        );
    }
    value
}

/// Order a call's content as `tools -> system -> conversation -> latest`,
/// the stable-prefix-first layout that maximizes provider prompt-cache hits
/// as conversation history grows.
pub fn order_for_cache(
    system_prompt: &str,
    tool_definitions: &[Value],
    conversation: &[Value],
    latest_message: Option<&Value>,
) -> CacheOrderedPayload {
    let system = vec![with_cache_control(serde_json::json!({
        "type": "text",
        "text": system_prompt,
    }))];

    let tools: Vec<Value> = tool_definitions
        .iter()
        .map(|tool| {
            let stable: Value = serde_json::from_str(&deterministic_json(tool))
                .expect("deterministic_json output always re-parses");
            with_cache_control(stable)
        })
        .collect();

    let mut messages: Vec<Value> = conversation.to_vec();
    if let Some(latest) = latest_message {
        messages.push(latest.clone());
    }

    CacheOrderedPayload {
        system,
        tools,
        messages,
    }
}

/// Point-in-time snapshot of a [`CacheTracker`]'s accumulated statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStatsSummary {
    pub total_calls: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub total_input_tokens: u64,
    pub cached_input_tokens: u64,
}

/// Tracks provider-native prompt-cache hit/miss statistics for a session.
#[derive(Debug, Default)]
pub struct CacheTracker {
    total_calls: u64,
    cache_hits: u64,
    cache_misses: u64,
    total_input_tokens: u64,
    cached_input_tokens: u64,
}

impl CacheTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one API call's cache statistics.
    pub fn record_call(&mut self, input_tokens: u64, cached_tokens: u64) {
        self.total_calls += 1;
        self.total_input_tokens += input_tokens;
        self.cached_input_tokens += cached_tokens;
        if cached_tokens > 0 {
            self.cache_hits += 1;
        } else {
            self.cache_misses += 1;
        }
        debug!(
            input_tokens,
            cached_tokens,
            hit = cached_tokens > 0,
            "cache_call_recorded"
        );
    }

    /// Fraction of calls (0.0-1.0) that hit the provider's prompt cache.
    pub fn hit_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_calls as f64
        }
    }

    /// Estimated USD savings from cache hits, given the model's
    /// $/Mtok input price.
    pub fn estimated_savings(&self, input_cost_per_million: f64) -> f64 {
        if self.cached_input_tokens == 0 {
            return 0.0;
        }
        let cost_per_token = input_cost_per_million / 1_000_000.0;
        let uncached_cost = self.cached_input_tokens as f64 * cost_per_token;
        let cached_cost = uncached_cost * CACHE_READ_COST_MULTIPLIER;
        uncached_cost - cached_cost
    }

    pub fn summary(&self) -> CacheStatsSummary {
        CacheStatsSummary {
            total_calls: self.total_calls,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            hit_rate: self.hit_rate(),
            total_input_tokens: self.total_input_tokens,
            cached_input_tokens: self.cached_input_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_json_sorts_nested_keys() {
        let a = serde_json::json!({"b": 1, "a": {"d": 2, "c": 3}});
        let b = serde_json::json!({"a": {"c": 3, "d": 2}, "b": 1});
        assert_eq!(deterministic_json(&a), deterministic_json(&b));
    }

    #[test]
    fn order_for_cache_places_tools_and_system_ahead_of_conversation() {
        let tools = vec![serde_json::json!({"name": "search"})];
        let conversation = vec![serde_json::json!({"role": "user", "content": "prior turn"})];
        let latest = serde_json::json!({"role": "user", "content": "latest turn"});

        let payload = order_for_cache("you are helpful", &tools, &conversation, Some(&latest));

        assert_eq!(payload.system.len(), 1);
        assert_eq!(payload.tools.len(), 1);
        assert_eq!(payload.messages.len(), 2);
        assert_eq!(payload.messages[1], latest);
        assert_eq!(payload.system[0]["cache_control"]["type"], "ephemeral");
        assert_eq!(payload.tools[0]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn hit_rate_and_savings_reflect_recorded_calls() {
        let mut tracker = CacheTracker::new();
        tracker.record_call(1000, 0);
        tracker.record_call(1000, 1000);
        assert_eq!(tracker.hit_rate(), 0.5);
        assert!(tracker.estimated_savings(3.0) > 0.0);
    }

    #[test]
    fn no_calls_means_zero_hit_rate_and_savings() {
        let tracker = CacheTracker::new();
        assert_eq!(tracker.hit_rate(), 0.0);
        assert_eq!(tracker.estimated_savings(3.0), 0.0);
    }
}
