//! Structured observation emitted by the runtime at every lifecycle point.
//!
//! [`FlowEvent`] is the one surface every other observability consumer
//! (state hooks, the publish hook, the testkit's recording middleware, the
//! admin CLI) is built on. The event bus runs a [`Middleware`] chain on the
//! emitting task itself — no re-queue to a different executor — so "events
//! for the same node emitted in the order they happened" holds without any
//! extra bookkeeping.

use serde_json::{Map, Value};
use std::sync::Arc;

/// Closed set of event kinds the runtime emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NodeStart,
    NodeSuccess,
    NodeError,
    NodeRetry,
    NodeFailed,
    Emit,
    Fetch,
    StreamChunk,
    TraceCancelStart,
    TraceCancelFinish,
    DeadlineSkip,
    ValidationError,
}

/// Immutable structured record of one runtime lifecycle point.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FlowEvent {
    pub event_type: EventType,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub node_name: Option<String>,
    pub node_id: uuid::Uuid,
    pub trace_id: String,
    pub attempt: u32,
    pub latency_ms: Option<f64>,
    pub queue_depth_in: Option<usize>,
    pub queue_depth_out: Option<usize>,
    pub outgoing_edges: Vec<String>,
    pub queue_maxsize: Option<usize>,
    pub trace_pending: i64,
    pub trace_inflight: i64,
    pub trace_cancelled: bool,
    pub extra: Map<String, Value>,
}

impl FlowEvent {
    /// Construct an event with all the bookkeeping fields zeroed, for
    /// call-sites that only care about `event_type`/`trace_id`/`node_name`.
    pub fn new(event_type: EventType, trace_id: impl Into<String>, node_id: uuid::Uuid) -> Self {
        Self {
            event_type,
            ts: chrono::Utc::now(),
            node_name: None,
            node_id,
            trace_id: trace_id.into(),
            attempt: 0,
            latency_ms: None,
            queue_depth_in: None,
            queue_depth_out: None,
            outgoing_edges: Vec::new(),
            queue_maxsize: None,
            trace_pending: 0,
            trace_inflight: 0,
            trace_cancelled: false,
            extra: Map::new(),
        }
    }

    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = Some(name.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn with_queue_depth_out(mut self, depth: usize, maxsize: usize) -> Self {
        self.queue_depth_out = Some(depth);
        self.queue_maxsize = Some(maxsize);
        self
    }

    pub fn with_trace_counts(mut self, pending: i64, inflight: i64) -> Self {
        self.trace_pending = pending;
        self.trace_inflight = inflight;
        self
    }

    pub fn with_trace_cancelled(mut self, cancelled: bool) -> Self {
        self.trace_cancelled = cancelled;
        self
    }
}

/// Read-only observer over the event stream.
///
/// The spec's Python source models middleware as `(event) -> event`
/// closures over shared metrics state; SPEC_FULL.md §4.6 resolves that to an
/// observer-only signature (`on_event` takes `&FlowEvent`) because "returning
/// the event unchanged is the contract" makes a transforming signature pure
/// ceremony in a typed language — see DESIGN.md for the recorded decision.
/// Middleware ordering is insertion order; thread-safety is the `Send +
/// Sync` bound, not a convention.
pub trait Middleware: Send + Sync {
    fn on_event(&self, event: &FlowEvent);
}

/// A chain of middleware run in insertion order before an event reaches the
/// state hook and publish hook.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run every middleware, catching and logging panics-as-errors is not
    /// possible for a plain trait call, but a middleware that panics will
    /// poison the node task the same way any other in-task panic would;
    /// middleware is documented as non-blocking, not as panic-safe.
    pub fn dispatch(&self, event: &FlowEvent) {
        for mw in &self.middlewares {
            mw.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMiddleware(Arc<AtomicUsize>);
    impl Middleware for CountingMiddleware {
        fn on_event(&self, _event: &FlowEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn middleware_runs_in_insertion_order_and_every_entry_fires() {
        let counter = Arc::new(AtomicUsize::new(0));
        let chain = MiddlewareChain::new(vec![
            Arc::new(CountingMiddleware(counter.clone())),
            Arc::new(CountingMiddleware(counter.clone())),
        ]);
        let event = FlowEvent::new(EventType::Fetch, "t1", uuid::Uuid::new_v4());
        chain.dispatch(&event);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
