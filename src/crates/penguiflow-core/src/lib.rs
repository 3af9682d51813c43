//! In-process dataflow runtime for agentic/LLM pipelines: bounded-queue
//! nodes wired into a graph, retried with backoff, observed through a
//! structured event bus, and driven by a task-per-node scheduler.
//!
//! ```text
//!               ┌─────────┐      floe       ┌─────────┐
//!  flow.emit -> │  root   │ ───────────────> │  node   │ -> egress -> flow.fetch
//!               └─────────┘                 └─────────┘
//!                    |  every hop is a bounded mpsc channel (Floe):
//!                    |  put() suspends the producer, FIFO per edge,
//!                    |  no silent drops under backpressure.
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use penguiflow_core::{Flow, Node, NodeError, Message, FnHandler};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let upper = Node::new(
//!     "upper",
//!     Arc::new(FnHandler(|_ctx, msg: Message| async move {
//!         let text = msg.payload.as_str().unwrap_or_default().to_uppercase();
//!         Ok(vec![msg.with_payload(text.into())])
//!     })),
//! );
//!
//! let mut flow = Flow::create(vec![upper], vec![])?;
//! flow.run(None, vec![], None).await?;
//! flow.emit(Message::new("hi".into(), "trace-1")).await?;
//! if let Some(output) = flow.fetch().await {
//!     println!("{output:?}");
//! }
//! flow.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! Node handlers that fan out to more than one successor should route
//! explicitly with [`Context::emit`] (`to: Some(name)`) rather than
//! returning a list from [`NodeHandler::call`] — a return value is only
//! routed automatically when the node has zero or one successor.

mod config;
mod context;
mod error;
mod events;
mod floe;
mod graph;
mod join_k;
mod merge;
mod message;
mod node;
mod policy;
mod registry;
mod retry;
mod runtime;
mod state;
mod stream;

pub use config::{ConfigError, FlowConfig, TracingVerbosity};
pub use context::Context;
pub use error::{BuildError, FlowError, FlowErrorCode, FloeError, NodeError, ValidationError};
pub use events::{EventType, FlowEvent, Middleware, MiddlewareChain};
pub use floe::{floe, FloeConfig, FloeReceiver, FloeSender, DEFAULT_CAPACITY};
pub use graph::GraphBuilder;
pub use join_k::join_k;
pub use message::{FlowOutput, Headers, Message};
pub use node::{Edge, FnHandler, Node, NodeHandler};
pub use policy::{NodePolicy, ValidationMode};
pub use registry::{AlwaysValid, NodeSchemas, Registry, Validator};
pub use runtime::Flow;
pub use state::{
    MemoryStateHook, PlannerStateHook, PublishError, PublishHook, RemoteBinding, StateError,
    StateHook, StoredEvent,
};
pub use stream::{ChunkPayload, StreamChunk, StreamSequencer};

#[cfg(feature = "json-validation")]
pub use registry::JsonSchemaValidator;

/// Marker re-export so downstream crates can name the floe type without
/// reaching into the `floe` module directly. `Floe<T>` itself has no public
/// constructor; use [`floe()`] to get a connected sender/receiver pair.
pub type Floe<T> = (FloeSender<T>, FloeReceiver<T>);
