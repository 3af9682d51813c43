//! End-to-end scenarios exercising a running [`Flow`]: linear pipelines,
//! backpressure, streaming, fan-in, retry, deadlines, and cancellation.

use penguiflow_core::{
    join_k, ChunkPayload, Context, FlowOutput, Message, Node, NodeError, NodePolicy,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn handler_node(
    name: &str,
    f: impl Fn(Context, Message) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Vec<Message>, NodeError>> + Send>,
        > + Send
        + Sync
        + 'static,
) -> Node {
    Node::new(name, Arc::new(penguiflow_core::FnHandler(f)))
}

/// S1: linear echo. A two-node pipeline preserves trace_id/meta end to end.
#[tokio::test]
async fn linear_echo_preserves_envelope() {
    let upper = handler_node("upper", |_ctx, msg| {
        Box::pin(async move {
            let text = msg.payload.as_str().unwrap_or_default().to_uppercase();
            Ok(vec![msg.with_payload(text.into())])
        })
    });
    let exclaim = handler_node("exclaim", |_ctx, msg| {
        Box::pin(async move {
            let text = format!("{}!", msg.payload.as_str().unwrap_or_default());
            Ok(vec![msg.with_payload(text.into())])
        })
    });

    let edge = upper.to(&exclaim);
    let mut flow = penguiflow_core::Flow::create(vec![upper, exclaim], vec![edge]).unwrap();
    flow.run(None, vec![], None).await.unwrap();

    let msg = Message::new("hi".into(), "trace-1").with_meta_entry("hop", 0.into());
    flow.emit(msg).await.unwrap();

    let out = flow.fetch().await.unwrap();
    match out {
        FlowOutput::Ok(m) => {
            assert_eq!(m.trace_id, "trace-1");
            assert_eq!(m.payload, "HI!".into());
            assert_eq!(m.meta.get("hop"), Some(&0.into()));
        }
        FlowOutput::Err(e) => panic!("unexpected error: {e}"),
    }
    flow.stop().await;
}

/// S2: a slow downstream node suspends its producer instead of dropping
/// envelopes; every item sent still arrives, in order.
#[tokio::test]
async fn backpressure_never_drops() {
    let passthrough = handler_node("fast", |_ctx, msg| Box::pin(async move { Ok(vec![msg]) }));
    let slow = handler_node("slow", |_ctx, msg| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(vec![msg])
        })
    });
    let edge = passthrough.to_with_capacity(&slow, 2);
    let mut flow = penguiflow_core::Flow::create(vec![passthrough, slow], vec![edge]).unwrap();
    flow.run(None, vec![], None).await.unwrap();

    for i in 0..10 {
        flow.emit(Message::new(i.into(), format!("t{i}"))).await.unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..10 {
        if let FlowOutput::Ok(m) = flow.fetch().await.unwrap() {
            seen.push(m.payload.as_i64().unwrap());
        }
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
    flow.stop().await;
}

/// S3: stream chunks for one `stream_id` arrive with a monotonic sequence
/// and a single final `done` chunk.
#[tokio::test]
async fn stream_chunks_are_monotonic_and_terminated() {
    let streamer = handler_node("streamer", |ctx, msg| {
        Box::pin(async move {
            let trace_id = msg.trace_id.clone();
            for i in 0..3 {
                ctx.emit_chunk(&trace_id, ChunkPayload::Text(format!("chunk-{i}")), i == 2)
                    .await
                    .unwrap();
            }
            Ok(vec![])
        })
    });
    let mut flow = penguiflow_core::Flow::create(vec![streamer], vec![]).unwrap();
    flow.run(None, vec![], None).await.unwrap();
    flow.emit(Message::new("go".into(), "trace-stream")).await.unwrap();

    let mut seqs = Vec::new();
    let mut done_count = 0;
    for _ in 0..3 {
        let chunk = flow.fetch_chunk().await.unwrap();
        seqs.push(chunk.seq);
        if chunk.done {
            done_count += 1;
        }
    }
    assert_eq!(seqs, vec![0, 1, 2]);
    assert_eq!(done_count, 1);
    flow.stop().await;
}

/// S4: `join_k` emits exactly once per trace, aggregating the first `k`
/// arrivals from k independent root producers.
#[tokio::test]
async fn join_k_aggregates_fan_out_once_per_trace() {
    // A node with more than one successor must route explicitly through
    // ctx.emit(value, Some(name)); a returned Vec is only auto-routed for
    // zero or one successor.
    let fan_out = handler_node("fan_out", |ctx, msg| {
        Box::pin(async move {
            for branch in ["a", "b", "c"] {
                ctx.emit(msg.with_payload(branch.into()), Some(branch))
                    .await
                    .unwrap();
            }
            Ok(vec![])
        })
    });
    let a = handler_node("a", |_ctx, msg| Box::pin(async move { Ok(vec![msg]) }));
    let b = handler_node("b", |_ctx, msg| Box::pin(async move { Ok(vec![msg]) }));
    let c = handler_node("c", |_ctx, msg| Box::pin(async move { Ok(vec![msg]) }));
    let join = join_k("join", 3);

    let edges = vec![
        fan_out.to(&a),
        fan_out.to(&b),
        fan_out.to(&c),
        a.to(&join),
        b.to(&join),
        c.to(&join),
    ];
    let mut flow =
        penguiflow_core::Flow::create(vec![fan_out, a, b, c, join], edges).unwrap();
    flow.run(None, vec![], None).await.unwrap();
    flow.emit(Message::new("go".into(), "trace-join")).await.unwrap();

    let out = flow.fetch().await.unwrap();
    match out {
        FlowOutput::Ok(m) => {
            let arr = m.payload.as_array().unwrap();
            assert_eq!(arr.len(), 3);
        }
        FlowOutput::Err(e) => panic!("unexpected error: {e}"),
    }
    flow.stop().await;
}

/// S5: a node that fails twice then succeeds is retried under the policy's
/// backoff, and the retry engine reports the eventual success.
#[tokio::test]
async fn retry_then_success() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let flaky = {
        let attempts = attempts.clone();
        Node::new(
            "flaky",
            Arc::new(penguiflow_core::FnHandler(move |_ctx, msg: Message| {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(NodeError::other(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            "transient",
                        )))
                    } else {
                        Ok(vec![msg])
                    }
                }
            })),
        )
        .with_policy(NodePolicy::new().with_retries(5, 0.001, 2.0))
    };
    let mut flow = penguiflow_core::Flow::create(vec![flaky], vec![]).unwrap();
    flow.run(None, vec![], None).await.unwrap();
    flow.emit(Message::new("go".into(), "trace-retry")).await.unwrap();

    let out = flow.fetch().await.unwrap();
    assert!(out.is_ok());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    flow.stop().await;
}

/// S6: an envelope whose deadline has already passed is short-circuited
/// before the handler runs, with a `DeadlineExceeded` error on egress.
#[tokio::test]
async fn expired_deadline_short_circuits_before_handler() {
    let called = Arc::new(AtomicUsize::new(0));
    let node = {
        let called = called.clone();
        Node::new(
            "node",
            Arc::new(penguiflow_core::FnHandler(move |_ctx, msg: Message| {
                let called = called.clone();
                async move {
                    called.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![msg])
                }
            })),
        )
    };
    let mut flow = penguiflow_core::Flow::create(vec![node], vec![]).unwrap();
    flow.run(None, vec![], None).await.unwrap();

    let expired = Message::new("go".into(), "trace-deadline").with_deadline(0.0);
    flow.emit(expired).await.unwrap();

    let out = flow.fetch().await.unwrap();
    match out {
        FlowOutput::Err(e) => assert_eq!(e.code, penguiflow_core::FlowErrorCode::DeadlineExceeded),
        FlowOutput::Ok(_) => panic!("expected a deadline error"),
    }
    assert_eq!(called.load(Ordering::SeqCst), 0);
    flow.stop().await;
}

/// S7: cancelling one trace does not affect another trace in flight on the
/// same node.
#[tokio::test]
async fn cancel_is_isolated_per_trace() {
    let node = handler_node("node", |_ctx, msg| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(vec![msg])
        })
    });
    let mut flow = penguiflow_core::Flow::create(vec![node], vec![]).unwrap();
    flow.run(None, vec![], None).await.unwrap();

    flow.emit(Message::new("go".into(), "trace-a")).await.unwrap();
    flow.emit(Message::new("go".into(), "trace-b")).await.unwrap();
    flow.cancel("trace-a");

    let mut survivors = Vec::new();
    for _ in 0..2 {
        if let Some(out) = tokio::time::timeout(Duration::from_millis(200), flow.fetch())
            .await
            .ok()
            .flatten()
        {
            if let FlowOutput::Ok(m) = out {
                survivors.push(m.trace_id);
            }
        }
    }
    assert_eq!(survivors, vec!["trace-b".to_string()]);
    flow.stop().await;
}
