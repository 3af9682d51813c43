//! The state-hook and publish-hook contracts (SPEC_FULL.md §6).
//!
//! These traits live in `penguiflow-core`, rather than in
//! `penguiflow-state`, so that [`crate::runtime::Flow::run`] can accept a
//! hook without the core crate depending on its own downstream state crate.
//! `penguiflow-state` implements [`StateHook`] for its in-memory backend and
//! layers the optional planner/memory capability traits on top — see
//! DESIGN.md for the recorded rationale.

use crate::events::{EventType, FlowEvent};
use crate::message::Message;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One persisted observation, as handed to [`StateHook::save_event`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoredEvent {
    pub trace_id: String,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub kind: EventType,
    pub node_name: Option<String>,
    pub node_id: uuid::Uuid,
    pub payload: Map<String, Value>,
}

impl From<&FlowEvent> for StoredEvent {
    fn from(event: &FlowEvent) -> Self {
        let mut payload = event.extra.clone();
        payload.insert("attempt".into(), Value::from(event.attempt));
        if let Some(ms) = event.latency_ms {
            payload.insert("latency_ms".into(), Value::from(ms));
        }
        payload.insert("trace_pending".into(), Value::from(event.trace_pending));
        payload.insert("trace_inflight".into(), Value::from(event.trace_inflight));
        payload.insert("trace_cancelled".into(), Value::from(event.trace_cancelled));
        Self {
            trace_id: event.trace_id.clone(),
            ts: event.ts,
            kind: event.event_type,
            node_name: event.node_name.clone(),
            node_id: event.node_id,
            payload,
        }
    }
}

/// Idempotent upsert target for `(trace_id, context_id, task_id, agent_url)`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemoteBinding {
    pub trace_id: String,
    pub context_id: String,
    pub task_id: String,
    pub agent_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state hook failure: {0}")]
    Backend(String),
}

/// Duck-typed persistence surface consumed by the runtime. Every method is
/// expected to be idempotent; the runtime awaits `save_event` under an
/// internal timeout (default 5s) so a slow hook cannot block a node task
/// indefinitely, and any error is logged, never propagated.
///
/// Planner pause/resume and memory persistence are optional capabilities a
/// backend may or may not support. Rather than downcasting `dyn StateHook`
/// at runtime, a backend that supports one exposes it through the matching
/// accessor (`as_planner_state`/`as_memory_state`); the default is `None`,
/// which is what a bare `StateHook` implementor gets for free.
#[async_trait]
pub trait StateHook: Send + Sync {
    async fn save_event(&self, event: StoredEvent) -> Result<(), StateError>;
    async fn load_history(&self, trace_id: &str) -> Result<Vec<StoredEvent>, StateError>;
    async fn save_remote_binding(&self, binding: RemoteBinding) -> Result<(), StateError>;

    /// Planner pause/resume capability, if this backend supports it.
    fn as_planner_state(&self) -> Option<&dyn PlannerStateHook> {
        None
    }

    /// Memory persistence capability, if this backend supports it.
    fn as_memory_state(&self) -> Option<&dyn MemoryStateHook> {
        None
    }
}

/// Optional capability: pause a planner mid-run and resume it later from a
/// single-use token. A token MUST be consumed on successful load — the
/// in-memory reference backend in `penguiflow-state` removes the entry.
#[async_trait]
pub trait PlannerStateHook: Send + Sync {
    async fn save_planner_state(&self, token: &str, payload: Value) -> Result<(), StateError>;
    async fn load_planner_state(&self, token: &str) -> Result<Option<Value>, StateError>;
}

/// Optional capability: key/value persistence for long-lived agent memory,
/// independent of any single trace.
#[async_trait]
pub trait MemoryStateHook: Send + Sync {
    async fn save_memory_state(&self, key: &str, state: Value) -> Result<(), StateError>;
    async fn load_memory_state(&self, key: &str) -> Result<Option<Value>, StateError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publish hook failure: {0}")]
    Backend(String),
}

/// Optional cross-process publish surface invoked once per `Emit` event.
/// Failures are logged and never propagated to the node task.
#[async_trait]
pub trait PublishHook: Send + Sync {
    async fn publish(&self, envelope: &Message) -> Result<(), PublishError>;
}
