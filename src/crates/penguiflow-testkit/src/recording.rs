use async_trait::async_trait;
use penguiflow_core::{RemoteBinding, StateError, StateHook, StoredEvent};
use std::sync::{Arc, Mutex};

/// An in-memory [`StateHook`] that only buffers events, for assertions
/// (`assert_node_sequence`) rather than persistence. Install it on
/// [`penguiflow_core::Flow::run`] and read it back after `flow.stop()`.
#[derive(Clone, Default)]
pub struct RecordingStateHook {
    events: Arc<Mutex<Vec<StoredEvent>>>,
}

impl RecordingStateHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far, across all traces, in arrival order.
    pub fn events(&self) -> Vec<StoredEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events recorded for one trace, in arrival order.
    pub fn history(&self, trace_id: &str) -> Vec<StoredEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.trace_id == trace_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StateHook for RecordingStateHook {
    async fn save_event(&self, event: StoredEvent) -> Result<(), StateError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn load_history(&self, trace_id: &str) -> Result<Vec<StoredEvent>, StateError> {
        Ok(self.history(trace_id))
    }

    async fn save_remote_binding(&self, _binding: RemoteBinding) -> Result<(), StateError> {
        Ok(())
    }
}
