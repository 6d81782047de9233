// src/exec/runner.rs

//! Pluggable "run to completion" abstraction.
//!
//! The fallback controller talks to an `InvocationRunner` instead of the
//! supervisor directly, so tests can swap in a scripted fake that never
//! spawns a real process while production keeps using
//! [`ProcessSupervisor`].

use std::future::Future;
use std::pin::Pin;

use crate::errors::Result;

use super::result::ExecutionResult;
use super::supervisor::{ProcessSupervisor, SpawnRequest};

pub trait InvocationRunner: Send + Sync {
    /// Launch `request` and resolve once it has finished.
    ///
    /// Spawn failures are errors; every process that actually started
    /// resolves to an `ExecutionResult`, successful or not.
    fn run(
        &self,
        request: SpawnRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionResult>> + Send + '_>>;
}

impl InvocationRunner for ProcessSupervisor {
    fn run(
        &self,
        request: SpawnRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionResult>> + Send + '_>> {
        Box::pin(async move {
            let invocation = self.spawn(request)?;
            Ok(invocation.wait().await)
        })
    }
}
