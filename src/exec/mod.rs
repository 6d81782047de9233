// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`supervisor`] spawns one-shot tool processes, tracks them in a
//!   [`registry`] and turns their output into [`events`].
//! - [`signature`] scans stderr for fault signatures while it streams.
//! - [`terminate`] holds the platform-specific process-tree shutdown.
//! - [`runner`] provides the `InvocationRunner` trait; the real
//!   implementation is `ProcessSupervisor` and tests can swap in a fake.
//! - [`fallback`] wraps a runner with accelerated/safe mode retry.

pub mod events;
pub mod fallback;
pub mod registry;
pub mod result;
pub mod runner;
pub mod signature;
pub mod spawn_error;
pub mod supervisor;
pub mod tail;
pub mod terminate;

pub use events::{EventSink, InvocationEvent};
pub use fallback::{FallbackController, FallbackNotice};
pub use registry::{RecordSnapshot, Registry};
pub use result::{ExecutionResult, Outcome};
pub use runner::InvocationRunner;
pub use spawn_error::SpawnError;
pub use supervisor::{Invocation, ProcessSupervisor, SpawnOptions, SpawnRequest};
