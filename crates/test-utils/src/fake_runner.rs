use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mediabridge::errors::Result;
use mediabridge::exec::result::ABORTED;
use mediabridge::exec::{ExecutionResult, InvocationRunner, Outcome, SpawnRequest};
use mediabridge::types::InvocationId;

/// Scripted outcome for one `run` call.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    Succeed,
    Fail(String),
    Abort,
}

/// A fake runner that:
/// - records every request it was asked to run
/// - resolves each call with the next scripted outcome (success once the
///   script is exhausted), without spawning anything.
#[derive(Debug, Clone, Default)]
pub struct FakeRunner {
    script: Arc<Mutex<VecDeque<FakeOutcome>>>,
    requests: Arc<Mutex<Vec<SpawnRequest>>>,
}

impl FakeRunner {
    pub fn new(script: impl IntoIterator<Item = FakeOutcome>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl InvocationRunner for FakeRunner {
    fn run(
        &self,
        request: SpawnRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionResult>> + Send + '_>> {
        let id = request
            .options
            .id
            .clone()
            .unwrap_or_else(InvocationId::generate);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(FakeOutcome::Succeed);
        self.requests.lock().unwrap().push(request);

        Box::pin(async move {
            let (outcome, exit_code, error) = match outcome {
                FakeOutcome::Succeed => (Outcome::Succeeded, Some(0), None),
                FakeOutcome::Fail(text) => (Outcome::Failed, Some(1), Some(text)),
                FakeOutcome::Abort => (Outcome::Aborted, None, Some(ABORTED.to_string())),
            };
            Ok(ExecutionResult {
                id,
                outcome,
                exit_code,
                duration: Duration::ZERO,
                error,
                matched_signature: None,
            })
        })
    }
}
