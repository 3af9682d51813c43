//! Per-handler handle: fetch inputs, emit outputs, stream chunks, check
//! cancellation.
//!
//! A `Context` is built fresh for every handler invocation and holds only
//! `Arc`-shared capability handles into the owning [`crate::runtime::Flow`]
//! — nodes never hold a back-reference to the flow itself (SPEC_FULL.md §9).

use crate::error::FloeError;
use crate::events::{EventType, FlowEvent};
use crate::floe::FloeSender;
use crate::merge::FairMerge;
use crate::message::{Headers, Message};
use crate::runtime::Accounting;
use crate::stream::{ChunkPayload, StreamChunk, StreamSequencer};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Shared, mutex-guarded view over a node's inbound floes. Both the node
/// task's own receive loop and `ctx.fetch()` read through this handle, so a
/// handler that pulls extra input mid-call observes the same FIFO order the
/// outer loop would have seen.
pub(crate) struct SharedInputs {
    pub(crate) merge: AsyncMutex<FairMerge<Message>>,
}

impl SharedInputs {
    pub(crate) fn new(merge: FairMerge<Message>) -> Self {
        Self {
            merge: AsyncMutex::new(merge),
        }
    }

    pub(crate) async fn recv(&self) -> Option<Message> {
        let mut guard = self.merge.lock().await;
        guard.recv().await.map(|(_, msg)| msg)
    }
}

/// Emits a [`FlowEvent`] through the middleware chain / state hook /
/// publish hook, resolved against the node currently running.
pub(crate) type EventEmitter = Arc<dyn Fn(FlowEvent) + Send + Sync>;

#[derive(Clone)]
pub struct Context {
    pub(crate) node_name: String,
    pub(crate) node_id: uuid::Uuid,
    envelope_trace_id: String,
    envelope_headers: Headers,
    envelope_meta: Map<String, Value>,
    pub(crate) successors: Vec<(String, FloeSender<Message>)>,
    pub(crate) inputs: Option<Arc<SharedInputs>>,
    pub(crate) cancelled_flag: Arc<AtomicBool>,
    pub(crate) stream_tx: FloeSender<StreamChunk>,
    pub(crate) sequencer: Arc<StreamSequencer>,
    pub(crate) emit_event: EventEmitter,
    pub(crate) accounting: Arc<Accounting>,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        node_name: String,
        node_id: uuid::Uuid,
        envelope: &Message,
        successors: Vec<(String, FloeSender<Message>)>,
        inputs: Option<Arc<SharedInputs>>,
        cancelled_flag: Arc<AtomicBool>,
        stream_tx: FloeSender<StreamChunk>,
        sequencer: Arc<StreamSequencer>,
        emit_event: EventEmitter,
        accounting: Arc<Accounting>,
    ) -> Self {
        Self {
            node_name,
            node_id,
            envelope_trace_id: envelope.trace_id.clone(),
            envelope_headers: envelope.headers.clone(),
            envelope_meta: envelope.meta.clone(),
            successors,
            inputs,
            cancelled_flag,
            stream_tx,
            sequencer,
            emit_event,
            accounting,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.envelope_trace_id
    }

    pub fn headers(&self) -> &Headers {
        &self.envelope_headers
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.envelope_meta
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled_flag.load(Ordering::SeqCst)
    }

    /// Pop the next input without touching other nodes' floes. Intended for
    /// planner-style pull nodes that want more than the one envelope the
    /// handler was invoked with.
    pub async fn fetch(&self) -> Option<Message> {
        match &self.inputs {
            Some(inputs) => inputs.recv().await,
            None => None,
        }
    }

    /// Push `value` to a specific successor (or the sole successor when
    /// `to` is `None`). Blocks under backpressure; returns
    /// [`FloeError::Cancelled`] if the trace is cancelled before the put
    /// completes.
    pub async fn emit(&self, value: Message, to: Option<&str>) -> Result<(), FloeError> {
        if self.cancelled() {
            return Err(FloeError::Cancelled(self.envelope_trace_id.clone()));
        }
        let target = match to {
            Some(name) => self
                .successors
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, s)| s)
                .ok_or(FloeError::AmbiguousTarget(self.successors.len()))?,
            None => match self.successors.as_slice() {
                [(_, single)] => single,
                other => return Err(FloeError::AmbiguousTarget(other.len())),
            },
        };
        // Snapshot the envelope as JSON before it moves, so the publish hook
        // (which only sees `FlowEvent`s, never the floe itself) can rebuild it.
        let envelope_json = serde_json::to_value(&value).unwrap_or(Value::Null);
        let queue_maxsize = target.max_capacity();
        target.put(value).await?;
        self.accounting.mark_pending(&self.envelope_trace_id, 1);
        (self.emit_event)(
            FlowEvent::new(EventType::Emit, self.envelope_trace_id.clone(), self.node_id)
                .with_node_name(self.node_name.clone())
                .with_extra("envelope", envelope_json)
                .with_queue_depth_out(target.depth_hint(), queue_maxsize),
        );
        Ok(())
    }

    /// Stamp and forward a streamed chunk. Honors backpressure and
    /// cancellation the same way [`Context::emit`] does.
    pub async fn emit_chunk(
        &self,
        stream_id: &str,
        payload: ChunkPayload,
        done: bool,
    ) -> Result<(), FloeError> {
        if self.cancelled() {
            return Err(FloeError::Cancelled(self.envelope_trace_id.clone()));
        }
        let seq = self.sequencer.next(stream_id, done);
        let chunk = StreamChunk {
            stream_id: stream_id.to_string(),
            seq,
            payload,
            done,
        };
        self.stream_tx.put(chunk).await?;
        (self.emit_event)(
            FlowEvent::new(
                EventType::StreamChunk,
                self.envelope_trace_id.clone(),
                self.node_id,
            )
            .with_node_name(self.node_name.clone()),
        );
        Ok(())
    }

    /// Best-effort structured-artifact emission to the event stream. Never
    /// blocks on backpressure (Open Question §9.1, resolved in DESIGN.md).
    pub fn emit_artifact(&self, name: &str, data: Value) {
        (self.emit_event)(
            FlowEvent::new(EventType::Emit, self.envelope_trace_id.clone(), self.node_id)
                .with_node_name(self.node_name.clone())
                .with_extra("kind", Value::String("artifact".into()))
                .with_extra("name", Value::String(name.into()))
                .with_extra("data", data),
        );
    }
}

impl Context {
    /// Build a `Context` with no live floes and no successors, for exercising
    /// a handler in isolation rather than inside a running
    /// [`crate::runtime::Flow`]. `ctx.emit`/`ctx.fetch` are unusable on the
    /// result (there is nothing on the other end); this exists for handlers
    /// that only read the envelope and return outputs, which is what
    /// `penguiflow-testkit`'s envelope-preservation assertion needs.
    pub fn for_isolated_test(envelope: &Message) -> Self {
        let (stream_tx, _stream_rx) = crate::floe::floe::<StreamChunk>(crate::floe::FloeConfig {
            capacity: crate::floe::DEFAULT_CAPACITY,
        });
        Self::new(
            "isolated".to_string(),
            uuid::Uuid::new_v4(),
            envelope,
            Vec::new(),
            None,
            Arc::new(AtomicBool::new(false)),
            stream_tx,
            Arc::new(StreamSequencer::new()),
            Arc::new(|_event| {}),
            Arc::new(Accounting::default()),
        )
    }
}

/// Test-only helpers for building a minimal `Context` without spinning up a
/// full [`crate::runtime::Flow`]. Used by node-level unit tests (`join_k`,
/// handler tests) across the crate.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::floe::{floe, FloeConfig};

    pub(crate) fn dummy_context(trace_id: &str) -> Context {
        let envelope = Message::new(Value::Null, trace_id);
        let (stream_tx, _stream_rx) = floe::<StreamChunk>(FloeConfig { capacity: 8 });
        Context::new(
            "test-node".to_string(),
            uuid::Uuid::new_v4(),
            &envelope,
            Vec::new(),
            None,
            Arc::new(AtomicBool::new(false)),
            stream_tx,
            Arc::new(StreamSequencer::new()),
            Arc::new(|_event| {}),
            Arc::new(Accounting::default()),
        )
    }
}
