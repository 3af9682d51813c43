//! Test tooling for `penguiflow-core`: a one-message driver, envelope and
//! node-sequence assertions, fault injection, and a recording state hook.
//!
//! Everything here reads the same `FlowEvent`/`StoredEvent` stream the
//! runtime already emits — there is no separate instrumentation path a
//! handler has to opt into, and no global mutable state (SPEC_FULL.md §9).

mod assertions;
mod error;
mod fault;
mod recording;
mod run_one;

pub use assertions::{assert_node_sequence, assert_preserves_message_envelope};
pub use error::TestkitError;
pub use fault::{simulate_error, FaultInjector};
pub use recording::RecordingStateHook;
pub use run_one::run_one;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use penguiflow_core::{Context, FlowOutput, Message, Node, NodeError, NodeHandler, NodePolicy};
    use serde_json::Value;
    use std::sync::Arc;

    struct Upper;

    #[async_trait]
    impl NodeHandler for Upper {
        async fn call(&self, _ctx: &Context, envelope: Message) -> Result<Vec<Message>, NodeError> {
            let text = envelope.payload.as_str().unwrap_or_default().to_uppercase();
            Ok(vec![envelope.with_payload(Value::String(text))])
        }
    }

    #[tokio::test]
    async fn run_one_returns_the_single_output() {
        let upper = Node::new("upper", Arc::new(Upper));
        let mut flow = penguiflow_core::Flow::create(vec![upper], vec![]).unwrap();
        let msg = Message::new(Value::String("hi".into()), "t1");
        let output = run_one(&mut flow, msg, None).await.unwrap();
        match output {
            FlowOutput::Ok(m) => assert_eq!(m.payload, Value::String("HI".into())),
            FlowOutput::Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn envelope_assertion_passes_for_a_preserving_handler() {
        let node = Node::new("upper", Arc::new(Upper));
        let msg = Message::new(Value::String("hi".into()), "t1")
            .with_meta_entry("hop", Value::from(1));
        assert_preserves_message_envelope(&node, msg).await.unwrap();
    }

    struct DropsTraceId;

    #[async_trait]
    impl NodeHandler for DropsTraceId {
        async fn call(&self, _ctx: &Context, _envelope: Message) -> Result<Vec<Message>, NodeError> {
            Ok(vec![Message::new(Value::Null, "different-trace")])
        }
    }

    #[tokio::test]
    async fn envelope_assertion_fails_when_trace_id_changes() {
        let node = Node::new("breaks-it", Arc::new(DropsTraceId));
        let msg = Message::new(Value::Null, "t1");
        assert!(assert_preserves_message_envelope(&node, msg).await.is_err());
    }

    #[tokio::test]
    async fn fault_injector_fires_once_on_the_requested_attempt() {
        let injected = penguiflow_core::FlowError::node_failed(
            "flaky",
            &std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );
        let injector = simulate_error("flaky", injected, 1);
        let node = Node::new("flaky", injector.wrap(Arc::new(Upper)))
            .with_policy(NodePolicy::new().with_retries(1, 0.0, 1.0));
        let mut flow = penguiflow_core::Flow::create(vec![node], vec![]).unwrap();
        let msg = Message::new(Value::String("hi".into()), "t1");
        let output = run_one(&mut flow, msg, None).await.unwrap();
        // First attempt is the injected fault; the retry runs Upper for real.
        match output {
            FlowOutput::Ok(m) => assert_eq!(m.payload, Value::String("HI".into())),
            FlowOutput::Err(e) => panic!("expected retry to succeed, got {e}"),
        }
    }

    #[tokio::test]
    async fn node_sequence_assertion_reads_node_start_events() {
        let hook = RecordingStateHook::new();
        let upper = Node::new("upper", Arc::new(Upper));
        let mut flow = penguiflow_core::Flow::create(vec![upper], vec![]).unwrap();
        flow.run(None, Vec::new(), Some(Arc::new(hook.clone())))
            .await
            .unwrap();
        flow.emit(Message::new(Value::String("hi".into()), "t1"))
            .await
            .unwrap();
        flow.fetch().await;
        flow.stop().await;
        assert_node_sequence(&hook.history("t1"), &["upper"]);
    }
}
