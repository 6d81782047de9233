// src/exec/result.rs

use std::time::Duration;

use crate::types::InvocationId;

/// Error text carried by aborted invocations.
pub const ABORTED: &str = "aborted";

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// Non-zero exit, a missing artifact, or a wait error.
    Failed,
    /// Cancelled through `abort`; not a bug in the tool.
    Aborted,
}

/// Terminal outcome of one invocation, produced exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub id: InvocationId,
    pub outcome: Outcome,
    /// Raw exit code; `None` when killed by a signal.
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub error: Option<String>,
    /// First stderr line that matched the signatures the run was watched
    /// for, if any.
    pub matched_signature: Option<String>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }

    pub fn is_aborted(&self) -> bool {
        self.outcome == Outcome::Aborted
    }

    pub(crate) fn succeeded(id: InvocationId, exit_code: Option<i32>, duration: Duration) -> Self {
        Self {
            id,
            outcome: Outcome::Succeeded,
            exit_code,
            duration,
            error: None,
            matched_signature: None,
        }
    }

    pub(crate) fn failed(
        id: InvocationId,
        exit_code: Option<i32>,
        duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id,
            outcome: Outcome::Failed,
            exit_code,
            duration,
            error: Some(error.into()),
            matched_signature: None,
        }
    }

    pub(crate) fn aborted(id: InvocationId, exit_code: Option<i32>, duration: Duration) -> Self {
        Self {
            id,
            outcome: Outcome::Aborted,
            exit_code,
            duration,
            error: Some(ABORTED.to_string()),
            matched_signature: None,
        }
    }
}
