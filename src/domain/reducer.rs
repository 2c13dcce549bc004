//! Custom `Extra`-channel reducer for research-session state.
//!
//! Grounded on [`crate::reducers::map_merge::MapMerge`]: same shape (a
//! `Reducer` that only touches `update.extra`), but append-only domain keys
//! (§3's list fields) are JSON-array-concatenated instead of overwritten.
//! Everything else falls back to last-writer-wins, matching `MapMerge`.

use serde_json::Value;

use super::keys::APPEND_ONLY;
use crate::{channels::Channel, node::NodePartial, reducers::Reducer, state::VersionedState};

#[derive(Debug, Default, Clone)]
pub struct DomainReducer;

impl Reducer for DomainReducer {
    fn apply(&self, state: &mut VersionedState, update: &NodePartial) {
        let Some(extras_update) = &update.extra else {
            return;
        };
        if extras_update.is_empty() {
            return;
        }

        let state_map = state.extra.get_mut();
        for (key, incoming) in extras_update.iter() {
            if APPEND_ONLY.contains(&key.as_str()) {
                let mut merged = match state_map.get(key) {
                    Some(Value::Array(existing)) => existing.clone(),
                    _ => Vec::new(),
                };
                match incoming {
                    Value::Array(items) => merged.extend(items.iter().cloned()),
                    other => merged.push(other.clone()),
                }
                state_map.insert(key.clone(), Value::Array(merged));
            } else {
                state_map.insert(key.clone(), incoming.clone());
            }
        }
    }
}
