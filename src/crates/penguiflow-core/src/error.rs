//! Error types for graph construction, queue operations, and node execution.
//!
//! All errors implement `std::error::Error` via `thiserror`. The taxonomy is
//! intentionally closed: node handlers distinguish retryable failures from
//! terminal ones through [`NodeError`], and the runtime never surfaces a
//! terminal condition without a matching [`FlowError`] on the egress floe.
//!
//! ```text
//! BuildError     - raised by GraphBuilder::build(), before any task runs
//! FloeError      - raised by bounded-queue put/get operations
//! NodeError      - returned by a node handler; drives the retry engine
//! FlowError      - terminal outcome routed to the egress floe
//! ```

use serde_json::Map as JsonMap;
use serde_json::Value;
use std::fmt;

/// Failure while assembling a [`crate::runtime::Flow`] from nodes and edges.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// An edge referenced a node name that was never registered.
    #[error("edge references unknown node '{0}'")]
    UnknownNode(String),

    /// The graph contains a cycle; controlled loops are out of scope for v1.
    #[error("graph contains a cycle among nodes: {0:?}")]
    Cycle(Vec<String>),

    /// Two nodes were registered under the same name.
    #[error("duplicate node name '{0}'")]
    DuplicateNode(String),

    /// The graph has no root nodes (nothing reachable from the ingress floe).
    #[error("graph has no root nodes reachable from ingress")]
    NoRoots,
}

/// Failure from a bounded [`crate::floe::Floe`] operation.
#[derive(Debug, thiserror::Error)]
pub enum FloeError {
    /// `put_nowait`/`try_get` found no capacity/item available.
    #[error("floe is full")]
    Full,

    /// `try_get` found nothing queued.
    #[error("floe is empty")]
    Empty,

    /// The floe's consumer (or producer) half has been dropped.
    #[error("floe is closed")]
    Closed,

    /// `ctx.emit` was called with `to: None` but the node has more than one
    /// successor, so the target is ambiguous.
    #[error("emit target is ambiguous: node has {0} successors")]
    AmbiguousTarget(usize),

    /// The operation was abandoned because its trace was cancelled mid-emit.
    #[error("trace '{0}' was cancelled")]
    Cancelled(String),
}

/// Outcome of a single node handler invocation, consumed by the retry engine.
///
/// This is the type node handlers return. It is distinct from [`FlowError`],
/// which is the terminal, egress-facing representation the retry engine
/// produces once it decides an error is no longer retryable.
#[derive(Debug)]
pub enum NodeError {
    /// Input/output schema validation failed; never retried.
    Validation(ValidationError),
    /// The handler observed cancellation and unwound; never retried.
    Cancelled,
    /// Any other handler failure; retried up to `policy.max_retries`.
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Validation(e) => write!(f, "validation error: {e}"),
            NodeError::Cancelled => write!(f, "cancelled"),
            NodeError::Other(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl NodeError {
    /// Wrap an arbitrary error as a retryable [`NodeError::Other`].
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        NodeError::Other(Box::new(err))
    }
}

/// A structured schema-validation failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub path: Option<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Closed set of terminal error codes surfaced on the egress floe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowErrorCode {
    Validation,
    NodeFailed,
    Timeout,
    DeadlineExceeded,
}

/// Terminal error routed to the egress floe in lieu of a success envelope.
///
/// Produced by the retry engine (§4.5 of the design) when a node exhausts
/// its retries, a validation check fails, or a message's deadline has
/// already passed. `FlowError` never occurs for a cancelled trace: a
/// cancelled trace produces no egress item at all.
#[derive(Debug, Clone, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("{code:?}: {message}")]
pub struct FlowError {
    pub code: FlowErrorCode,
    pub message: String,
    pub original_exc: Option<String>,
    pub context: JsonMap<String, Value>,
}

impl FlowError {
    pub fn validation(err: &ValidationError) -> Self {
        Self {
            code: FlowErrorCode::Validation,
            message: err.message.clone(),
            original_exc: None,
            context: err
                .path
                .clone()
                .map(|p| {
                    let mut m = JsonMap::new();
                    m.insert("path".into(), Value::String(p));
                    m
                })
                .unwrap_or_default(),
        }
    }

    pub fn node_failed(node_name: &str, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut context = JsonMap::new();
        context.insert("node_name".into(), Value::String(node_name.to_string()));
        Self {
            code: FlowErrorCode::NodeFailed,
            message: format!("node '{node_name}' failed: {err}"),
            original_exc: Some(err.to_string()),
            context,
        }
    }

    pub fn timeout(node_name: &str, timeout_s: f64) -> Self {
        let mut context = JsonMap::new();
        context.insert("node_name".into(), Value::String(node_name.to_string()));
        context.insert(
            "timeout_s".into(),
            serde_json::Number::from_f64(timeout_s)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
        Self {
            code: FlowErrorCode::Timeout,
            message: format!("node '{node_name}' exceeded its {timeout_s}s attempt timeout"),
            original_exc: None,
            context,
        }
    }

    pub fn deadline_exceeded(trace_id: &str, deadline_s: f64) -> Self {
        let mut context = JsonMap::new();
        context.insert("trace_id".into(), Value::String(trace_id.to_string()));
        context.insert(
            "deadline_s".into(),
            serde_json::Number::from_f64(deadline_s)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
        Self {
            code: FlowErrorCode::DeadlineExceeded,
            message: format!("trace '{trace_id}' exceeded its deadline"),
            original_exc: None,
            context,
        }
    }
}
