// src/progress/mod.rs

//! Progress extraction from unstructured tool output.
//!
//! - [`grammar`] defines the `ProgressGrammar` trait, the chunk-to-line
//!   `LineBuffer` and small shared parsing helpers.
//! - [`transcoder`], [`downloader`], [`speech`] and [`json_lines`] are the
//!   per-tool grammars.
//! - [`tracker`] owns a grammar plus the per-invocation state (carry-over
//!   buffers, last percent, current phase) and turns signals into events
//!   that never go backwards.
//! - [`estimator`] fills gaps between coarse milestones from wall-clock time.

use std::time::Duration;

use crate::types::InvocationId;

pub mod downloader;
pub mod estimator;
pub mod grammar;
pub mod json_lines;
pub mod speech;
pub mod tracker;
pub mod transcoder;

pub use estimator::{EstimatorSpec, EstimatorStart, TimeEstimator};
pub use grammar::{LineBuffer, ProgressGrammar, Sample, Signal, grammar_for};
pub use tracker::{EstimateOutcome, ProgressTracker, StreamKind};

/// Highest percent a running process may report. 100 is only ever emitted
/// by the supervisor once the invocation succeeded.
pub const RUNNING_CEILING: f64 = 95.0;

/// Percent reported with the terminal success event.
pub const COMPLETE: f64 = 100.0;

/// Immutable progress snapshot for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub id: InvocationId,
    /// In `[0, 100]`; non-decreasing per invocation.
    pub percent: f64,
    /// Human-readable throughput, e.g. `"1.5x"` or `"2.30MiB/s"`.
    pub rate: Option<String>,
    pub eta: Option<Duration>,
    /// Bytes or frames processed so far, depending on the tool.
    pub processed: Option<u64>,
    /// Phase label current at the time of the event.
    pub phase: Option<String>,
}
