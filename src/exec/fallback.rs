// src/exec/fallback.rs

//! Automatic recovery from accelerated-mode failures.
//!
//! Tools such as a GPU-enabled speech engine can crash for reasons that have
//! nothing to do with the input: driver assertions, device loss, VRAM
//! exhaustion. When a run in accelerated mode fails with such a signature,
//! the controller retries once in safe mode and stays in safe mode for the
//! rest of its lifetime, even if the caller keeps asking for acceleration,
//! unless the caller explicitly forces it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::RegexSet;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::FallbackConfig;
use crate::errors::{BridgeError, Result};
use crate::types::{AccelerationPreference, ExecutionMode, InvocationId};

use super::result::ExecutionResult;
use super::runner::InvocationRunner;
use super::supervisor::SpawnRequest;

const NOTICE_CAPACITY: usize = 16;

/// Published when a failed accelerated run is being retried in safe mode.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackNotice {
    pub failed_id: InvocationId,
    pub retry_id: InvocationId,
    pub reason: String,
}

pub struct FallbackController<R: InvocationRunner> {
    runner: R,
    signatures: Arc<RegexSet>,
    config: FallbackConfig,
    degraded: AtomicBool,
    notices: broadcast::Sender<FallbackNotice>,
}

impl<R: InvocationRunner> std::fmt::Debug for FallbackController<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackController")
            .field("degraded", &self.is_degraded())
            .field("signatures", &self.signatures.len())
            .finish_non_exhaustive()
    }
}

impl<R: InvocationRunner> FallbackController<R> {
    pub fn new(runner: R, config: FallbackConfig) -> Result<Self> {
        let signatures = RegexSet::new(&config.signatures).map_err(|e| {
            BridgeError::ConfigError(format!("invalid fallback signature: {e}"))
        })?;
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Ok(Self {
            runner,
            signatures: Arc::new(signatures),
            config,
            degraded: AtomicBool::new(false),
            notices,
        })
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Whether an accelerated failure has been observed in this session.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FallbackNotice> {
        self.notices.subscribe()
    }

    /// Mode the next run will start in for `preference`.
    pub fn effective_mode(&self, preference: AccelerationPreference) -> ExecutionMode {
        match preference {
            AccelerationPreference::Disabled => ExecutionMode::Safe,
            AccelerationPreference::Force => ExecutionMode::Accelerated,
            AccelerationPreference::Auto if self.is_degraded() => ExecutionMode::Safe,
            AccelerationPreference::Auto => ExecutionMode::Accelerated,
        }
    }

    /// A failed (not aborted) result that hit a known driver/device
    /// signature, either while its stderr streamed or in its error text.
    pub fn is_accelerator_failure(&self, result: &ExecutionResult) -> bool {
        if result.success() || result.is_aborted() {
            return false;
        }
        result.matched_signature.is_some()
            || result
                .error
                .as_deref()
                .is_some_and(|text| self.signatures.is_match(text))
    }

    /// Run `request`, retrying once in safe mode if an accelerated attempt
    /// fails with a recognised signature.
    pub async fn run(
        &self,
        request: SpawnRequest,
        preference: AccelerationPreference,
    ) -> Result<ExecutionResult> {
        let mode = self.effective_mode(preference);
        let first = self.runner.run(self.prepare(&request, mode, None)).await?;

        if mode != ExecutionMode::Accelerated || !self.is_accelerator_failure(&first) {
            return Ok(first);
        }

        self.degraded.store(true, Ordering::SeqCst);
        let retry_id = InvocationId::generate();
        let reason = first
            .matched_signature
            .clone()
            .or_else(|| first.error.clone())
            .unwrap_or_default();
        warn!(
            invocation = %first.id,
            retry = %retry_id,
            "accelerated run failed with a driver/device error; retrying in safe mode"
        );
        let _ = self.notices.send(FallbackNotice {
            failed_id: first.id.clone(),
            retry_id: retry_id.clone(),
            reason,
        });

        let retry = self
            .runner
            .run(self.prepare(&request, ExecutionMode::Safe, Some(retry_id)))
            .await?;
        info!(
            invocation = %retry.id,
            success = retry.success(),
            "safe-mode retry finished"
        );
        Ok(retry)
    }

    fn prepare(
        &self,
        request: &SpawnRequest,
        mode: ExecutionMode,
        id: Option<InvocationId>,
    ) -> SpawnRequest {
        let mut prepared = request.clone();
        let (extra, multiplier) = match mode {
            ExecutionMode::Accelerated => {
                (&self.config.accelerated_args, self.config.accelerated_multiplier)
            }
            ExecutionMode::Safe => (&self.config.safe_args, self.config.safe_multiplier),
        };
        prepared.args.extend(extra.iter().cloned());
        if mode == ExecutionMode::Accelerated {
            prepared.options.fault_signatures = Some(Arc::clone(&self.signatures));
        }
        if let Some(spec) = prepared.options.estimator.take() {
            prepared.options.estimator = Some(spec.with_multiplier(multiplier));
        }
        if id.is_some() {
            prepared.options.id = id;
        }
        prepared
    }
}
