//! Fan-in helper: buffers the first `k` envelopes per trace, then emits one
//! aggregated envelope and clears the bucket (SPEC_FULL.md §4.4).

use crate::context::Context;
use crate::error::NodeError;
use crate::message::Message;
use crate::node::{Node, NodeHandler};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

enum Bucket {
    Buffering(Vec<Message>),
    Completed,
}

struct JoinK {
    k: usize,
    buckets: Mutex<HashMap<String, Bucket>>,
}

#[async_trait]
impl NodeHandler for JoinK {
    async fn call(&self, _ctx: &Context, envelope: Message) -> Result<Vec<Message>, NodeError> {
        let mut buckets = self.buckets.lock().await;
        let trace_id = envelope.trace_id.clone();
        match buckets.get_mut(&trace_id) {
            Some(Bucket::Completed) => {
                debug!(trace_id, "join_k: late arrival for completed bucket, ignored");
                Ok(vec![])
            }
            Some(Bucket::Buffering(items)) => {
                items.push(envelope);
                if items.len() >= self.k {
                    let items = std::mem::replace(buckets.get_mut(&trace_id).unwrap(), Bucket::Completed);
                    let Bucket::Buffering(items) = items else {
                        unreachable!()
                    };
                    Ok(vec![aggregate(items)])
                } else {
                    Ok(vec![])
                }
            }
            None => {
                if self.k <= 1 {
                    buckets.insert(trace_id.clone(), Bucket::Completed);
                    Ok(vec![aggregate(vec![envelope])])
                } else {
                    buckets.insert(trace_id, Bucket::Buffering(vec![envelope]));
                    Ok(vec![])
                }
            }
        }
    }
}

fn aggregate(items: Vec<Message>) -> Message {
    let first = items.first().expect("aggregate called with no items");
    let trace_id = first.trace_id.clone();
    let headers = first.headers.clone();
    let meta = first.meta.clone();
    let payloads: Vec<Value> = items.iter().map(|m| m.payload.clone()).collect();
    Message {
        payload: Value::Array(payloads),
        trace_id,
        headers,
        deadline_s: None,
        meta,
    }
}

/// Construct a fan-in node named `name` that aggregates the first `k`
/// arrivals per trace on its single input floe. Memory per trace is
/// bounded by `k`; arrivals after a bucket completes are dropped and
/// logged at `debug`.
pub fn join_k(name: impl Into<String>, k: usize) -> Node {
    assert!(k >= 1, "join_k requires k >= 1");
    Node::new(
        name,
        std::sync::Arc::new(JoinK {
            k,
            buckets: Mutex::new(HashMap::new()),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests_support::dummy_context;

    #[tokio::test]
    async fn aggregates_first_k_arrivals_in_order() {
        let node = join_k("join", 3);
        let ctx = dummy_context("t1");
        let mut last = None;
        for i in 0..5 {
            let msg = Message::new(Value::from(i), "t1");
            let out = node.handler.call(&ctx, msg).await.unwrap();
            if !out.is_empty() {
                last = Some(out);
            }
        }
        let out = last.expect("expected exactly one aggregated emission");
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].payload,
            Value::Array(vec![Value::from(0), Value::from(1), Value::from(2)])
        );
    }

    #[tokio::test]
    async fn late_arrivals_after_completion_are_ignored() {
        let node = join_k("join", 2);
        let ctx = dummy_context("t1");
        node.handler
            .call(&ctx, Message::new(Value::from(1), "t1"))
            .await
            .unwrap();
        let out = node
            .handler
            .call(&ctx, Message::new(Value::from(2), "t1"))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        // bucket is now completed; late arrival is dropped, no second emission
        let out = node
            .handler
            .call(&ctx, Message::new(Value::from(3), "t1"))
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
