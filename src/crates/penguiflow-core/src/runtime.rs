//! The scheduler: one task per node, bounded floes between them, and the
//! per-trace bookkeeping that drives cancellation and deadlines
//! (SPEC_FULL.md §4.1).
//!
//! A running [`Flow`] never shares mutable state across node tasks except
//! through the floes themselves and a handful of [`DashMap`]s keyed by
//! `trace_id` — there is no global lock a slow node can hold up.

use crate::config::FlowConfig;
use crate::context::{Context, SharedInputs};
use crate::error::{BuildError, FlowError, FlowErrorCode};
use crate::events::{EventType, FlowEvent, MiddlewareChain};
use crate::floe::{floe, FloeConfig, FloeReceiver, FloeSender};
use crate::graph::GraphBuilder;
use crate::merge::FairMerge;
use crate::message::{FlowOutput, Message};
use crate::node::{Edge, Node};
use crate::registry::Registry;
use crate::retry::{run_with_policy, Outcome};
use crate::state::{PublishHook, StateError, StateHook, StoredEvent};
use crate::stream::{StreamChunk, StreamSequencer};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-trace pending/inflight counters plus cancellation plumbing, shared by
/// every node task in a running [`Flow`].
///
/// `pending` counts envelopes sitting in a floe, not yet popped by a node
/// task. `inflight` counts envelopes a node task has popped and is actively
/// processing (including its own successor emissions, which immediately
/// become new `pending` units downstream). A trace is fully drained once
/// both counters read zero.
#[derive(Default)]
pub(crate) struct Accounting {
    pending: DashMap<String, i64>,
    inflight: DashMap<String, i64>,
    cancel_flags: DashMap<String, Arc<AtomicBool>>,
    cancel_notifies: DashMap<String, Arc<Notify>>,
    cancel_finished: DashMap<String, ()>,
}

impl Accounting {
    pub(crate) fn mark_pending(&self, trace_id: &str, n: i64) {
        if n == 0 {
            return;
        }
        *self.pending.entry(trace_id.to_string()).or_insert(0) += n;
    }

    pub(crate) fn pop_to_inflight(&self, trace_id: &str) {
        if let Some(mut v) = self.pending.get_mut(trace_id) {
            *v -= 1;
        }
        *self.inflight.entry(trace_id.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn snapshot(&self, trace_id: &str) -> (i64, i64) {
        (
            self.pending.get(trace_id).map(|v| *v).unwrap_or(0),
            self.inflight.get(trace_id).map(|v| *v).unwrap_or(0),
        )
    }

    pub(crate) fn cancel_flag(&self, trace_id: &str) -> Arc<AtomicBool> {
        self.cancel_flags
            .entry(trace_id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    pub(crate) fn notify(&self, trace_id: &str) -> Arc<Notify> {
        self.cancel_notifies
            .entry(trace_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    pub(crate) fn is_cancelled(&self, trace_id: &str) -> bool {
        self.cancel_flags
            .get(trace_id)
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Decrement `inflight` for a finished unit of work. If the trace is
    /// cancelled and fully drained, emits `TraceCancelFinish` exactly once.
    pub(crate) fn finish_inflight(
        &self,
        trace_id: &str,
        node_id: uuid::Uuid,
        emit: &dyn Fn(FlowEvent),
    ) {
        if let Some(mut v) = self.inflight.get_mut(trace_id) {
            *v -= 1;
        }
        let (pending, inflight) = self.snapshot(trace_id);
        if self.is_cancelled(trace_id) && pending <= 0 && inflight <= 0 {
            let already = self
                .cancel_finished
                .insert(trace_id.to_string(), ())
                .is_some();
            if !already {
                emit(
                    FlowEvent::new(EventType::TraceCancelFinish, trace_id.to_string(), node_id)
                        .with_trace_cancelled(true)
                        .with_trace_counts(pending, inflight),
                );
            }
        }
        if pending <= 0 && inflight <= 0 {
            self.pending.remove(trace_id);
            self.inflight.remove(trace_id);
        }
    }
}

/// A runnable graph of [`Node`]s connected by bounded floes.
///
/// Built via [`GraphBuilder::build`] or [`Flow::create`]. A `Flow` is inert
/// until [`Flow::run`] spawns its node tasks; calling `run` twice is a no-op.
pub struct Flow {
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
    roots: Vec<String>,
    config: FlowConfig,
    publish_hook: Option<Arc<dyn PublishHook>>,
    running: bool,

    ingress_senders: HashMap<String, FloeSender<Message>>,
    egress_rx: Option<AsyncMutex<FloeReceiver<FlowOutput>>>,
    stream_rx: Option<AsyncMutex<FloeReceiver<StreamChunk>>>,
    task_handles: Vec<JoinHandle<()>>,
    event_task: Option<JoinHandle<()>>,
    event_tx: Option<mpsc::UnboundedSender<FlowEvent>>,
    accounting: Arc<Accounting>,
    state_store: Option<Arc<dyn StateHook>>,
}

impl Flow {
    /// Build and validate a flow from loose nodes and edges in one call.
    /// Equivalent to threading the same nodes/edges through a
    /// [`GraphBuilder`].
    pub fn create(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self, BuildError> {
        let mut builder = GraphBuilder::new();
        for node in nodes {
            builder = builder.add_node(node);
        }
        for edge in edges {
            builder = builder.add_edge(edge);
        }
        builder.build()
    }

    pub(crate) fn new(nodes: HashMap<String, Node>, edges: Vec<Edge>, roots: Vec<String>) -> Self {
        Self {
            nodes,
            edges,
            roots,
            config: FlowConfig::default(),
            publish_hook: None,
            running: false,
            ingress_senders: HashMap::new(),
            egress_rx: None,
            stream_rx: None,
            task_handles: Vec::new(),
            event_task: None,
            event_tx: None,
            accounting: Arc::new(Accounting::default()),
            state_store: None,
        }
    }

    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_publish_hook(mut self, hook: Arc<dyn PublishHook>) -> Self {
        self.publish_hook = Some(hook);
        self
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.keys().map(|s| s.as_str()).collect()
    }

    pub fn root_names(&self) -> &[String] {
        &self.roots
    }

    /// Spawn one task per node and wire every floe. Idempotent: a second
    /// call on an already-running flow returns immediately.
    pub async fn run(
        &mut self,
        registry: Option<Registry>,
        middleware: Vec<Arc<dyn crate::events::Middleware>>,
        state_store: Option<Arc<dyn StateHook>>,
    ) -> Result<(), BuildError> {
        if self.running {
            return Ok(());
        }

        let registry = registry.map(Arc::new);
        let middleware = Arc::new(MiddlewareChain::new(middleware));
        self.state_store = state_store.clone();

        // Inbound floe for every edge, keyed by destination node.
        let mut inbound: HashMap<String, Vec<FloeReceiver<Message>>> = HashMap::new();
        let mut outbound: HashMap<String, Vec<(String, FloeSender<Message>)>> = HashMap::new();
        for edge in &self.edges {
            let (tx, rx) = floe::<Message>(FloeConfig {
                capacity: edge.capacity,
            });
            inbound.entry(edge.to.clone()).or_default().push(rx);
            outbound
                .entry(edge.from.clone())
                .or_default()
                .push((edge.to.clone(), tx));
        }

        // Every root additionally gets a dedicated ingress floe fed by
        // `Flow::emit`/`emit_nowait`; fan-out to several roots is modeled as
        // several independent sends, not one shared multi-consumer channel.
        let mut ingress_senders = HashMap::new();
        for root in &self.roots {
            let (tx, rx) = floe::<Message>(FloeConfig {
                capacity: self.config.default_floe_capacity,
            });
            ingress_senders.insert(root.clone(), tx);
            inbound.entry(root.clone()).or_default().push(rx);
        }

        let (egress_tx, egress_rx) = floe::<FlowOutput>(FloeConfig {
            capacity: self.config.default_floe_capacity,
        });
        let (stream_tx, stream_rx) = floe::<StreamChunk>(FloeConfig {
            capacity: self.config.default_floe_capacity,
        });
        let sequencer = Arc::new(StreamSequencer::new());

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<FlowEvent>();
        let event_task = tokio::spawn({
            let middleware = middleware.clone();
            let state_store = state_store.clone();
            let publish_hook = self.publish_hook.clone();
            async move {
                while let Some(event) = event_rx.recv().await {
                    middleware.dispatch(&event);
                    if let Some(hook) = &state_store {
                        let stored = StoredEvent::from(&event);
                        match tokio::time::timeout(Duration::from_secs(5), hook.save_event(stored))
                            .await
                        {
                            Ok(Ok(())) => {}
                            Ok(Err(StateError::Backend(msg))) => {
                                warn!(trace_id = %event.trace_id, error = %msg, "state hook save_event failed");
                            }
                            Err(_) => {
                                warn!(trace_id = %event.trace_id, "state hook save_event timed out");
                            }
                        }
                    }
                    if event.event_type == EventType::Emit {
                        if let (Some(hook), Some(envelope_json)) =
                            (&publish_hook, event.extra.get("envelope"))
                        {
                            match serde_json::from_value::<Message>(envelope_json.clone()) {
                                Ok(msg) => {
                                    if let Err(e) = hook.publish(&msg).await {
                                        warn!(trace_id = %event.trace_id, error = %e, "publish hook failed");
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "publish hook skipped: envelope did not round-trip through JSON");
                                }
                            }
                        }
                    }
                }
            }
        });

        let mut task_handles = Vec::with_capacity(self.nodes.len());
        for (name, node) in &self.nodes {
            let inputs = inbound.remove(name).unwrap_or_default();
            let successors = outbound.remove(name).unwrap_or_default();
            let is_terminal = successors.is_empty();

            let node = node.clone();
            let registry = registry.clone();
            let accounting = self.accounting.clone();
            let event_tx = event_tx.clone();
            let egress_tx = egress_tx.clone();
            let stream_tx = stream_tx.clone();
            let sequencer = sequencer.clone();
            let enforce_validation = self.config.enforce_validation;

            let handle = tokio::spawn(async move {
                node_task(
                    node,
                    inputs,
                    successors,
                    is_terminal,
                    registry,
                    accounting,
                    event_tx,
                    egress_tx,
                    stream_tx,
                    sequencer,
                    enforce_validation,
                )
                .await;
            });
            task_handles.push(handle);
        }

        self.ingress_senders = ingress_senders;
        self.egress_rx = Some(AsyncMutex::new(egress_rx));
        self.stream_rx = Some(AsyncMutex::new(stream_rx));
        self.task_handles = task_handles;
        self.event_task = Some(event_task);
        self.event_tx = Some(event_tx);
        self.running = true;
        info!(nodes = self.nodes.len(), roots = self.roots.len(), "flow started");
        Ok(())
    }

    /// Fan the envelope out to every root node's ingress floe, suspending
    /// under backpressure. Each root gets its own clone.
    pub async fn emit(&self, value: Message) -> Result<(), crate::error::FloeError> {
        for (root, sender) in &self.ingress_senders {
            sender.put(value.clone()).await?;
            self.accounting.mark_pending(&value.trace_id, 1);
            debug!(node = %root, trace_id = %value.trace_id, "accepted onto ingress");
        }
        Ok(())
    }

    /// Non-suspending variant of [`Flow::emit`]; fails fast if any root's
    /// ingress floe is full.
    pub fn emit_nowait(&self, value: Message) -> Result<(), crate::error::FloeError> {
        for sender in self.ingress_senders.values() {
            sender.put_nowait(value.clone())?;
            self.accounting.mark_pending(&value.trace_id, 1);
        }
        Ok(())
    }

    /// Pop the next finished envelope or terminal error from the egress
    /// floe. Returns `None` once the flow has stopped and fully drained.
    pub async fn fetch(&self) -> Option<FlowOutput> {
        match &self.egress_rx {
            Some(rx) => rx.lock().await.get().await,
            None => None,
        }
    }

    /// Pop the next streamed chunk, across every node's `emit_chunk` calls.
    pub async fn fetch_chunk(&self) -> Option<StreamChunk> {
        match &self.stream_rx {
            Some(rx) => rx.lock().await.get().await,
            None => None,
        }
    }

    /// Mark `trace_id` cancelled: in-flight node tasks observe this before
    /// their next attempt and stop retrying/forwarding for that trace.
    /// Returns once the cancel flag is set; `TraceCancelFinish` is emitted
    /// asynchronously once every in-flight unit for the trace has drained.
    pub fn cancel(&self, trace_id: &str) {
        let flag = self.accounting.cancel_flag(trace_id);
        flag.store(true, Ordering::SeqCst);
        self.accounting.notify(trace_id).notify_waiters();
        if let Some(tx) = &self.event_tx {
            let (pending, inflight) = self.accounting.snapshot(trace_id);
            let _ = tx.send(
                FlowEvent::new(
                    EventType::TraceCancelStart,
                    trace_id.to_string(),
                    uuid::Uuid::nil(),
                )
                .with_trace_cancelled(true)
                .with_trace_counts(pending, inflight),
            );
        }
    }

    pub fn trace_pending(&self, trace_id: &str) -> i64 {
        self.accounting.snapshot(trace_id).0
    }

    pub fn trace_inflight(&self, trace_id: &str) -> i64 {
        self.accounting.snapshot(trace_id).1
    }

    /// Replay a trace's recorded history through the configured state hook,
    /// oldest first. Empty if no state hook was passed to [`Flow::run`].
    pub async fn load_history(&self, trace_id: &str) -> Vec<StoredEvent> {
        match &self.state_store {
            Some(hook) => hook.load_history(trace_id).await.unwrap_or_else(|e| {
                warn!(trace_id, error = %e, "load_history failed");
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    /// Close every root's ingress floe and wait for the drain cascade: each
    /// node task exits once its inputs are exhausted and closed, which in
    /// turn drops its own successor senders and closes the next node's
    /// inputs. No task is aborted mid-handler.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.ingress_senders.clear();
        for handle in self.task_handles.drain(..) {
            let _ = handle.await;
        }
        self.event_tx = None;
        if let Some(handle) = self.event_task.take() {
            let _ = handle.await;
        }
        self.running = false;
        info!("flow stopped");
    }
}

#[allow(clippy::too_many_arguments)]
async fn node_task(
    node: Node,
    inputs: Vec<FloeReceiver<Message>>,
    successors: Vec<(String, FloeSender<Message>)>,
    is_terminal: bool,
    registry: Option<Arc<Registry>>,
    accounting: Arc<Accounting>,
    event_tx: mpsc::UnboundedSender<FlowEvent>,
    egress_tx: FloeSender<FlowOutput>,
    stream_tx: FloeSender<StreamChunk>,
    sequencer: Arc<StreamSequencer>,
    enforce_validation: bool,
) {
    let node_id = uuid::Uuid::new_v4();
    let shared_inputs = Arc::new(SharedInputs::new(FairMerge::new(inputs)));
    let emit_event = {
        let event_tx = event_tx.clone();
        let accounting = accounting.clone();
        Arc::new(move |event: FlowEvent| {
            let (pending, inflight) = accounting.snapshot(&event.trace_id);
            let _ = event_tx.send(event.with_trace_counts(pending, inflight));
        }) as crate::context::EventEmitter
    };

    loop {
        let Some(envelope) = shared_inputs.recv().await else {
            break;
        };
        let trace_id = envelope.trace_id.clone();
        emit_event(
            FlowEvent::new(EventType::Fetch, trace_id.clone(), node_id)
                .with_node_name(node.name.clone()),
        );
        accounting.pop_to_inflight(&trace_id);

        let cancelled_flag = accounting.cancel_flag(&trace_id);
        let notify = accounting.notify(&trace_id);

        if cancelled_flag.load(Ordering::SeqCst) {
            debug!(node = %node.name, trace_id, "dropping envelope for cancelled trace");
            accounting.finish_inflight(&trace_id, node_id, &|e| emit_event(e));
            continue;
        }

        let now_s = now_seconds();
        if envelope.is_expired(now_s) {
            let deadline = envelope.deadline_s.unwrap_or(now_s);
            emit_event(
                FlowEvent::new(EventType::DeadlineSkip, trace_id.clone(), node_id)
                    .with_node_name(node.name.clone()),
            );
            let err = FlowError::deadline_exceeded(&trace_id, deadline);
            let _ = egress_tx.put(FlowOutput::Err(err)).await;
            accounting.finish_inflight(&trace_id, node_id, &|e| emit_event(e));
            continue;
        }

        let envelope = if node.policy.validate.validates_in() {
            match validate_in(&registry, &node.name, &envelope, enforce_validation) {
                Ok(envelope) => envelope,
                Err(err) => {
                    emit_event(
                        FlowEvent::new(EventType::ValidationError, trace_id.clone(), node_id)
                            .with_node_name(node.name.clone()),
                    );
                    let _ = egress_tx.put(FlowOutput::Err(err)).await;
                    accounting.finish_inflight(&trace_id, node_id, &|e| emit_event(e));
                    continue;
                }
            }
        } else {
            envelope
        };

        let ctx = Context::new(
            node.name.clone(),
            node_id,
            &envelope,
            successors.clone(),
            Some(shared_inputs.clone()),
            cancelled_flag.clone(),
            stream_tx.clone(),
            sequencer.clone(),
            emit_event.clone(),
            accounting.clone(),
        );

        let outcome = run_with_policy(
            node.handler.as_ref(),
            &ctx,
            envelope,
            &node.policy,
            &node.name,
            &notify,
            &cancelled_flag,
        )
        .await;

        match outcome {
            Outcome::Cancelled => {
                accounting.finish_inflight(&trace_id, node_id, &|e| emit_event(e));
            }
            Outcome::Error(err) => {
                let _ = egress_tx.put(FlowOutput::Err(err)).await;
                accounting.finish_inflight(&trace_id, node_id, &|e| emit_event(e));
            }
            Outcome::Messages(messages) if cancelled_flag.load(Ordering::SeqCst) => {
                debug!(node = %node.name, trace_id, "discarding output: trace cancelled mid-handler");
                accounting.finish_inflight(&trace_id, node_id, &|e| emit_event(e));
                let _ = messages;
            }
            Outcome::Messages(messages) => {
                let messages = if node.policy.validate.validates_out() {
                    match validate_out(&registry, &node.name, messages, enforce_validation) {
                        Ok(messages) => messages,
                        Err(err) => {
                            emit_event(
                                FlowEvent::new(
                                    EventType::ValidationError,
                                    trace_id.clone(),
                                    node_id,
                                )
                                .with_node_name(node.name.clone()),
                            );
                            let _ = egress_tx.put(FlowOutput::Err(err)).await;
                            accounting.finish_inflight(&trace_id, node_id, &|e| emit_event(e));
                            continue;
                        }
                    }
                } else {
                    messages
                };

                if is_terminal {
                    if messages.is_empty() {
                        debug!(node = %node.name, trace_id, "terminal node produced no output for this trace");
                    }
                    for message in messages {
                        let _ = egress_tx.put(FlowOutput::Ok(message)).await;
                    }
                } else if successors.len() == 1 {
                    let (_, sender) = &successors[0];
                    let count = messages.len();
                    for message in messages {
                        let _ = sender.put(message).await;
                    }
                    accounting.mark_pending(&trace_id, count as i64);
                } else if !messages.is_empty() {
                    warn!(
                        node = %node.name,
                        trace_id,
                        successors = successors.len(),
                        "node returned messages but has multiple successors; use ctx.emit(value, Some(name)) instead"
                    );
                    let err = FlowError::node_failed(
                        &node.name,
                        &std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            "ambiguous return-value routing with multiple successors",
                        ),
                    );
                    let _ = egress_tx.put(FlowOutput::Err(err)).await;
                }
                accounting.finish_inflight(&trace_id, node_id, &|e| emit_event(e));
            }
        }
    }
}

fn validate_in(
    registry: &Option<Arc<Registry>>,
    node_name: &str,
    envelope: &Message,
    enforce: bool,
) -> Result<Message, FlowError> {
    let Some(registry) = registry else {
        return Ok(envelope.clone());
    };
    let Some(schemas) = registry.get(node_name) else {
        if enforce {
            return Err(FlowError {
                code: FlowErrorCode::Validation,
                message: format!("node '{node_name}' has no registered schema"),
                original_exc: None,
                context: serde_json::Map::new(),
            });
        }
        return Ok(envelope.clone());
    };
    match schemas.input.validate(&envelope.payload) {
        Ok(payload) => Ok(envelope.with_payload(payload)),
        Err(e) => Err(FlowError::validation(&e)),
    }
}

fn validate_out(
    registry: &Option<Arc<Registry>>,
    node_name: &str,
    messages: Vec<Message>,
    enforce: bool,
) -> Result<Vec<Message>, FlowError> {
    let Some(registry) = registry else {
        return Ok(messages);
    };
    let Some(schemas) = registry.get(node_name) else {
        if enforce {
            return Err(FlowError {
                code: FlowErrorCode::Validation,
                message: format!("node '{node_name}' has no registered schema"),
                original_exc: None,
                context: serde_json::Map::new(),
            });
        }
        return Ok(messages);
    };
    messages
        .into_iter()
        .map(|m| {
            schemas
                .output
                .validate(&m.payload)
                .map(|payload| m.with_payload(payload))
                .map_err(|e| FlowError::validation(&e))
        })
        .collect()
}

fn now_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
