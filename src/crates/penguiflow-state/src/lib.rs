//! Reference [`StateHook`] backends for `penguiflow-core`.
//!
//! This crate ships one backend, [`InMemoryStateHook`]: an in-process,
//! `RwLock`-guarded implementation suitable for development, tests, and the
//! `penguiflow-cli` admin utility's default snapshot format. Production
//! hosts are expected to implement [`StateHook`] themselves against a real
//! database; this crate exists so the contract has at least one working,
//! testable implementation (SPEC_FULL.md §6.1, §3.9).

mod memory;

pub use memory::InMemoryStateHook;
pub use penguiflow_core::{
    MemoryStateHook, PlannerStateHook, PublishError, PublishHook, RemoteBinding, StateError,
    StateHook, StoredEvent,
};
