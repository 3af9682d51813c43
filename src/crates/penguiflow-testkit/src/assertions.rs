use crate::error::TestkitError;
use penguiflow_core::{Context, EventType, Message, Node, StoredEvent};

/// Assert that `history`'s `NodeStart` events, in order, name exactly
/// `expected_names`. Panics with both sequences on mismatch so the failure
/// is readable without re-running under a debugger.
pub fn assert_node_sequence(history: &[StoredEvent], expected_names: &[&str]) {
    let actual: Vec<&str> = history
        .iter()
        .filter(|event| event.kind == EventType::NodeStart)
        .filter_map(|event| event.node_name.as_deref())
        .collect();
    assert_eq!(
        actual, expected_names,
        "node sequence mismatch:\n  expected: {expected_names:?}\n  actual:   {actual:?}"
    );
}

/// Invoke `node`'s handler on a bare [`Context`] (no live floes, no
/// successors) and check every output envelope keeps `trace_id`, `headers`,
/// and the incoming `meta` keys unchanged — the invariant SPEC_FULL.md §3.1
/// requires of any hop that doesn't explicitly rewrite them.
///
/// Handlers that call `ctx.emit`/`ctx.fetch` will see `FloeError::Closed` or
/// `FloeError::AmbiguousTarget`; this assertion is for nodes that only
/// transform their input and return it.
pub async fn assert_preserves_message_envelope(
    node: &Node,
    message: Message,
) -> Result<(), TestkitError> {
    let ctx = Context::for_isolated_test(&message);
    let outputs = node
        .invoke(&ctx, message.clone())
        .await
        .map_err(|e| TestkitError::Handler(e.to_string()))?;

    for (i, out) in outputs.iter().enumerate() {
        if out.trace_id != message.trace_id {
            return Err(TestkitError::EnvelopeMismatch(format!(
                "output {i}: trace_id changed from {:?} to {:?}",
                message.trace_id, out.trace_id
            )));
        }
        if out.headers != message.headers {
            return Err(TestkitError::EnvelopeMismatch(format!(
                "output {i}: headers changed from {:?} to {:?}",
                message.headers, out.headers
            )));
        }
        for (key, value) in &message.meta {
            if out.meta.get(key) != Some(value) {
                return Err(TestkitError::EnvelopeMismatch(format!(
                    "output {i}: meta key {key:?} was dropped or changed"
                )));
            }
        }
    }
    Ok(())
}
