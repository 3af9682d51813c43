//! Async handler wrapped with a name, policy, and graph edges.

use crate::context::Context;
use crate::error::NodeError;
use crate::floe::DEFAULT_CAPACITY;
use crate::message::Message;
use crate::policy::NodePolicy;
use async_trait::async_trait;
use std::sync::Arc;

/// A node's handler logic. Implementors receive the envelope that was
/// fetched for them plus a fresh [`Context`] and return zero or more
/// outgoing envelopes.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn call(&self, ctx: &Context, envelope: Message) -> Result<Vec<Message>, NodeError>;
}

/// Adapts a plain async closure into a [`NodeHandler`], for nodes that
/// don't need a dedicated struct.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> NodeHandler for FnHandler<F>
where
    F: Fn(Context, Message) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Vec<Message>, NodeError>> + Send,
{
    async fn call(&self, ctx: &Context, envelope: Message) -> Result<Vec<Message>, NodeError> {
        // Context is cheap to clone (Arc handles); closures take it by value.
        (self.0)(ctx.clone(), envelope).await
    }
}

/// A node in the flow graph: name, handler, policy, and fan-out behavior.
#[derive(Clone)]
pub struct Node {
    pub name: String,
    pub(crate) handler: Arc<dyn NodeHandler>,
    pub policy: NodePolicy,
    pub allow_parallel: bool,
}

impl Node {
    pub fn new(name: impl Into<String>, handler: Arc<dyn NodeHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            policy: NodePolicy::default(),
            allow_parallel: true,
        }
    }

    pub fn with_policy(mut self, policy: NodePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_allow_parallel(mut self, allow_parallel: bool) -> Self {
        self.allow_parallel = allow_parallel;
        self
    }

    /// Invoke this node's handler directly, outside the scheduler. Exposed
    /// for `penguiflow-testkit`, which exercises handlers in isolation
    /// against a bare [`Context`].
    pub async fn invoke(
        &self,
        ctx: &Context,
        envelope: Message,
    ) -> Result<Vec<Message>, NodeError> {
        self.handler.call(ctx, envelope).await
    }

    /// Build an edge from this node to `other` using the default floe
    /// capacity.
    pub fn to(&self, other: &Node) -> Edge {
        self.to_with_capacity(other, DEFAULT_CAPACITY)
    }

    pub fn to_with_capacity(&self, other: &Node, capacity: usize) -> Edge {
        Edge {
            from: self.name.clone(),
            to: other.name.clone(),
            capacity,
        }
    }
}

/// A directed edge between two named nodes, carrying its own floe capacity.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub capacity: usize,
}
