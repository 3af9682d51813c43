//! Retry/backoff engine: executes a node handler with retries, per-attempt
//! timeouts, and structured error/event emission (SPEC_FULL.md §4.5).

use crate::context::Context;
use crate::error::{FlowError, NodeError};
use crate::events::{EventType, FlowEvent};
use crate::message::Message;
use crate::node::NodeHandler;
use crate::policy::NodePolicy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Terminal result of [`run_with_policy`].
pub enum Outcome {
    Messages(Vec<Message>),
    Error(FlowError),
    Cancelled,
}

/// Sleep for `delay_s`, waking early if the trace is cancelled. Used
/// between retry attempts so a cancelled trace doesn't sit out a full
/// backoff window before its node task notices.
async fn sleep_cancellable(delay_s: f64, notify: &tokio::sync::Notify) {
    if delay_s <= 0.0 {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(delay_s)) => {}
        _ = notify.notified() => {}
    }
}

/// Run `handler` against `envelope` under `policy`, retrying unhandled
/// errors up to `policy.max_retries` with exponential backoff, and failing
/// an attempt outright once it exceeds `policy.timeout_s`.
///
/// Emits `NodeStart` before the first attempt, `NodeRetry` before each
/// retry sleep, and exactly one of `NodeSuccess`/`NodeError`/`NodeFailed` at
/// terminal resolution.
pub async fn run_with_policy(
    handler: &dyn NodeHandler,
    ctx: &Context,
    envelope: Message,
    policy: &NodePolicy,
    node_name: &str,
    cancel_notify: &tokio::sync::Notify,
    cancelled_flag: &Arc<AtomicBool>,
) -> Outcome {
    let node_id = ctx.node_id;
    let trace_id = envelope.trace_id.clone();
    let emit = |event_type: EventType, attempt: u32, extra_latency_ms: Option<f64>| {
        let mut event = FlowEvent::new(event_type, trace_id.clone(), node_id)
            .with_node_name(node_name.to_string())
            .with_attempt(attempt);
        if let Some(ms) = extra_latency_ms {
            event = event.with_latency_ms(ms);
        }
        (ctx.emit_event)(event);
    };

    emit(EventType::NodeStart, 1, None);

    let mut attempt: u32 = 1;
    loop {
        if cancelled_flag.load(Ordering::SeqCst) {
            return Outcome::Cancelled;
        }

        let start = std::time::Instant::now();
        let call = handler.call(ctx, envelope.clone());
        let attempt_result = match policy.timeout_s {
            Some(timeout_s) => {
                match tokio::time::timeout(Duration::from_secs_f64(timeout_s), call).await {
                    Ok(r) => r,
                    Err(_) => Err(NodeError::Other(Box::new(TimeoutElapsed))),
                }
            }
            None => call.await,
        };
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match attempt_result {
            Ok(messages) => {
                emit(EventType::NodeSuccess, attempt, Some(latency_ms));
                return Outcome::Messages(messages);
            }
            Err(NodeError::Validation(e)) => {
                let err = FlowError::validation(&e);
                emit(EventType::ValidationError, attempt, Some(latency_ms));
                return Outcome::Error(err);
            }
            Err(NodeError::Cancelled) => {
                return Outcome::Cancelled;
            }
            Err(NodeError::Other(e)) => {
                let is_timeout = e.downcast_ref::<TimeoutElapsed>().is_some();
                if attempt > policy.max_retries {
                    let err = if is_timeout {
                        FlowError::timeout(node_name, policy.timeout_s.unwrap_or(0.0))
                    } else {
                        FlowError::node_failed(node_name, e.as_ref())
                    };
                    emit(EventType::NodeFailed, attempt, Some(latency_ms));
                    return Outcome::Error(err);
                }
                emit(EventType::NodeRetry, attempt, Some(latency_ms));
                let delay = policy.backoff_delay(attempt);
                sleep_cancellable(delay, cancel_notify).await;
                if cancelled_flag.load(Ordering::SeqCst) {
                    return Outcome::Cancelled;
                }
                attempt += 1;
            }
        }
    }
}

#[derive(Debug)]
struct TimeoutElapsed;

impl std::fmt::Display for TimeoutElapsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "attempt exceeded its per-attempt timeout")
    }
}

impl std::error::Error for TimeoutElapsed {}
