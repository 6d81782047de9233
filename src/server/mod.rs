// src/server/mod.rs

//! Persistent server-mode process (e.g. a model server kept warm between
//! requests).
//!
//! - [`manager`] owns the process and its `Stopped → Starting → Ready`
//!   state machine, including the idle shutdown.
//! - [`transport`] is the HTTP client used to talk to it.
//! - [`status`] holds the phase enum and the caller-facing snapshot.

pub mod manager;
pub mod status;
pub mod transport;

pub use manager::ServerManager;
pub use status::{ServerPhase, ServerStatus};
pub use transport::{ServerClient, ServerRequest, ServerResponse};
