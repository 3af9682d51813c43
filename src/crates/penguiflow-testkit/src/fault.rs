use async_trait::async_trait;
use penguiflow_core::{Context, FlowError, Message, NodeError, NodeHandler};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Register a one-shot fault for a node, to be consulted on a given attempt
/// number (1-indexed, matching the retry engine's `attempt` counter).
///
/// An injector does not reach into a running [`penguiflow_core::Flow`] on its
/// own; wrap the node's handler with [`FaultInjector::wrap`] before building
/// the node, so the fault fires from inside the same retry loop the runtime
/// already drives.
pub fn simulate_error(node_name: impl Into<String>, error: FlowError, on_attempt: usize) -> FaultInjector {
    FaultInjector {
        node_name: node_name.into(),
        error,
        on_attempt,
        attempts: Arc::new(AtomicUsize::new(0)),
    }
}

pub struct FaultInjector {
    node_name: String,
    error: FlowError,
    on_attempt: usize,
    attempts: Arc<AtomicUsize>,
}

impl FaultInjector {
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Wrap `inner` so that its `on_attempt`th invocation returns the
    /// registered fault instead of delegating; every other invocation
    /// (including retries past the injected one) runs `inner` normally.
    pub fn wrap(&self, inner: Arc<dyn NodeHandler>) -> Arc<dyn NodeHandler> {
        Arc::new(FaultInjectingHandler {
            inner,
            error: self.error.clone(),
            on_attempt: self.on_attempt,
            attempts: self.attempts.clone(),
        })
    }
}

struct FaultInjectingHandler {
    inner: Arc<dyn NodeHandler>,
    error: FlowError,
    on_attempt: usize,
    attempts: Arc<AtomicUsize>,
}

#[derive(Debug)]
struct InjectedFault(FlowError);

impl fmt::Display for InjectedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "injected fault: {}", self.0.message)
    }
}

impl std::error::Error for InjectedFault {}

#[async_trait]
impl NodeHandler for FaultInjectingHandler {
    async fn call(&self, ctx: &Context, envelope: Message) -> Result<Vec<Message>, NodeError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == self.on_attempt {
            tracing::debug!(attempt, "injecting fault for node under test");
            return Err(NodeError::other(InjectedFault(self.error.clone())));
        }
        self.inner.call(ctx, envelope).await
    }
}
