use penguiflow_core::{BuildError, FloeError};

/// Failures surfaced by this crate's assertions and drivers, distinct from
/// `penguiflow-core`'s own error types so a failing test reports which
/// testkit helper it was inside of.
#[derive(Debug, thiserror::Error)]
pub enum TestkitError {
    #[error("flow failed to start: {0}")]
    Build(#[from] BuildError),

    #[error("floe operation failed: {0}")]
    Floe(#[from] FloeError),

    #[error("flow stopped without producing an output")]
    NoOutput,

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("envelope not preserved: {0}")]
    EnvelopeMismatch(String),
}
