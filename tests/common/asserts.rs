use research_agent::app::App;
use research_agent::channels::Channel;
use research_agent::state::VersionedState;
use research_agent::types::NodeKind;

#[allow(dead_code)]
pub fn assert_edge(app: &App, from: NodeKind, to: NodeKind) {
    let edges = app.edges();
    let outs = edges.get(&from).expect("source node has edges");
    assert!(outs.contains(&to), "expected edge {from:?} -> {to:?}");
}

#[allow(dead_code)]
pub fn assert_message_contains(state: &VersionedState, needle: &str) {
    let msgs = state.messages.snapshot();
    let found = msgs.iter().any(|m| m.content.contains(needle));
    assert!(
        found,
        "expected at least one message containing '{needle}', got: {:?}",
        msgs
    );
}

#[allow(dead_code)]
pub fn assert_extra_has(state: &VersionedState, key: &str) {
    let extra = state.extra.snapshot();
    assert!(
        extra.contains_key(key),
        "expected extra to have key '{key}', got keys: {:?}",
        extra.keys().collect::<Vec<_>>()
    );
}
