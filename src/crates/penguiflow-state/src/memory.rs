//! In-memory [`StateHook`] backend: a reference implementation for tests,
//! local development, and the `penguiflow-cli replay` command's default
//! snapshot source.
//!
//! Storage is a few `RwLock<HashMap<...>>`s. Nothing is written to disk;
//! everything is lost when the process exits. Production hosts should
//! implement [`StateHook`] against a real database — this backend is not
//! meant to be promoted to production, the way the teacher's own
//! `InMemoryCheckpointSaver` documents itself as development-only.

use async_trait::async_trait;
use penguiflow_core::{
    MemoryStateHook, PlannerStateHook, RemoteBinding, StateError, StateHook, StoredEvent,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Dedup key for idempotent `save_event`: `(trace_id, ts, event_type, node_id)`
/// per SPEC_FULL.md §4.6 — a retry may call `save_event` more than once for
/// the same logical observation, and the hook is expected to collapse those.
type EventKey = (String, chrono::DateTime<chrono::Utc>, String, uuid::Uuid);

#[derive(Default)]
struct Storage {
    history: HashMap<String, Vec<StoredEvent>>,
    seen: std::collections::HashSet<EventKey>,
    bindings: HashMap<String, RemoteBinding>,
    planner_state: HashMap<String, Value>,
    memory_state: HashMap<String, Value>,
}

/// Thread-safe in-memory [`StateHook`], also implementing the optional
/// [`PlannerStateHook`] and [`MemoryStateHook`] capabilities.
#[derive(Clone, Default)]
pub struct InMemoryStateHook {
    storage: Arc<RwLock<Storage>>,
}

impl InMemoryStateHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of distinct traces with recorded history. Test-only
    /// convenience, mirroring the teacher's `thread_count()`.
    pub fn trace_count(&self) -> usize {
        self.storage.read().unwrap().history.len()
    }

    /// Drop every recorded event, binding, and state entry. Useful between
    /// test cases that share one backend instance.
    pub fn clear(&self) {
        *self.storage.write().unwrap() = Storage::default();
    }
}

fn event_key(event: &StoredEvent) -> EventKey {
    (
        event.trace_id.clone(),
        event.ts,
        format!("{:?}", event.kind),
        event.node_id,
    )
}

#[async_trait]
impl StateHook for InMemoryStateHook {
    async fn save_event(&self, event: StoredEvent) -> Result<(), StateError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| StateError::Backend("lock poisoned".into()))?;
        let key = event_key(&event);
        if !storage.seen.insert(key) {
            return Ok(());
        }
        storage
            .history
            .entry(event.trace_id.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn load_history(&self, trace_id: &str) -> Result<Vec<StoredEvent>, StateError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| StateError::Backend("lock poisoned".into()))?;
        let mut events = storage.history.get(trace_id).cloned().unwrap_or_default();
        // Ascending ts, stable on ties (insertion order is already ts-adjacent
        // because events are pushed as they're observed).
        events.sort_by_key(|e| e.ts);
        Ok(events)
    }

    async fn save_remote_binding(&self, binding: RemoteBinding) -> Result<(), StateError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| StateError::Backend("lock poisoned".into()))?;
        storage.bindings.insert(binding.trace_id.clone(), binding);
        Ok(())
    }

    fn as_planner_state(&self) -> Option<&dyn PlannerStateHook> {
        Some(self)
    }

    fn as_memory_state(&self) -> Option<&dyn MemoryStateHook> {
        Some(self)
    }
}

#[async_trait]
impl PlannerStateHook for InMemoryStateHook {
    async fn save_planner_state(&self, token: &str, payload: Value) -> Result<(), StateError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| StateError::Backend("lock poisoned".into()))?;
        storage.planner_state.insert(token.to_string(), payload);
        Ok(())
    }

    /// Single-use: a successful load removes the token so a replayed resume
    /// can't be applied twice.
    async fn load_planner_state(&self, token: &str) -> Result<Option<Value>, StateError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| StateError::Backend("lock poisoned".into()))?;
        Ok(storage.planner_state.remove(token))
    }
}

#[async_trait]
impl MemoryStateHook for InMemoryStateHook {
    async fn save_memory_state(&self, key: &str, state: Value) -> Result<(), StateError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| StateError::Backend("lock poisoned".into()))?;
        storage.memory_state.insert(key.to_string(), state);
        Ok(())
    }

    async fn load_memory_state(&self, key: &str) -> Result<Option<Value>, StateError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| StateError::Backend("lock poisoned".into()))?;
        Ok(storage.memory_state.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use penguiflow_core::{EventType, FlowEvent};

    fn event(trace_id: &str, kind: EventType) -> StoredEvent {
        StoredEvent::from(&FlowEvent::new(kind, trace_id, uuid::Uuid::nil()))
    }

    #[tokio::test]
    async fn load_history_is_empty_for_unknown_trace() {
        let hook = InMemoryStateHook::new();
        assert!(hook.load_history("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_event_is_idempotent_on_exact_duplicate() {
        let hook = InMemoryStateHook::new();
        let e = event("t1", EventType::NodeStart);
        hook.save_event(e.clone()).await.unwrap();
        hook.save_event(e).await.unwrap();
        assert_eq!(hook.load_history("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_is_chronologically_ordered() {
        let hook = InMemoryStateHook::new();
        let mut first = event("t1", EventType::NodeStart);
        first.ts = chrono::Utc::now() - chrono::Duration::seconds(5);
        let second = event("t1", EventType::NodeSuccess);
        hook.save_event(second.clone()).await.unwrap();
        hook.save_event(first.clone()).await.unwrap();
        let history = hook.load_history("t1").await.unwrap();
        assert_eq!(history[0].ts, first.ts);
        assert_eq!(history[1].ts, second.ts);
    }

    #[tokio::test]
    async fn planner_token_is_single_use() {
        let hook = InMemoryStateHook::new();
        hook.save_planner_state("tok", Value::from(42)).await.unwrap();
        assert_eq!(
            hook.load_planner_state("tok").await.unwrap(),
            Some(Value::from(42))
        );
        assert_eq!(hook.load_planner_state("tok").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_state_round_trips() {
        let hook = InMemoryStateHook::new();
        hook.save_memory_state("k", Value::from("v")).await.unwrap();
        assert_eq!(
            hook.load_memory_state("k").await.unwrap(),
            Some(Value::from("v"))
        );
    }

    #[tokio::test]
    async fn remote_binding_upsert_is_idempotent() {
        let hook = InMemoryStateHook::new();
        let binding = RemoteBinding {
            trace_id: "t1".into(),
            context_id: "c1".into(),
            task_id: "task1".into(),
            agent_url: "https://example.invalid/agent".into(),
        };
        hook.save_remote_binding(binding.clone()).await.unwrap();
        hook.save_remote_binding(binding).await.unwrap();
        assert_eq!(hook.trace_count(), 0); // bindings don't populate history
    }
}
