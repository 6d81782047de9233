// src/progress/tracker.rs

use tracing::trace;

use crate::exec::events::InvocationEvent;
use crate::types::InvocationId;

use super::grammar::{LineBuffer, ProgressGrammar, Sample, Signal};
use super::{COMPLETE, ProgressEvent, RUNNING_CEILING};

/// Which pipe a chunk came from. Each stream keeps its own carry-over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Result of offering a time-based estimate to the tracker.
#[derive(Debug)]
pub enum EstimateOutcome {
    Emitted(InvocationEvent),
    /// Not ahead of what was already reported; try again later.
    Skipped,
    /// The invocation finished or already reached the estimator's ceiling.
    Exhausted,
}

/// Per-invocation progress state.
///
/// Owns the tool grammar and turns its signals into events that respect
/// the invariants consumers rely on:
/// - percents only ever increase (ties and regressions are dropped),
/// - nothing above [`RUNNING_CEILING`] is reported while running,
/// - after [`complete`](Self::complete) or [`close`](Self::close) nothing
///   more is emitted.
pub struct ProgressTracker {
    id: InvocationId,
    grammar: Box<dyn ProgressGrammar>,
    stdout: LineBuffer,
    stderr: LineBuffer,
    last_percent: Option<f64>,
    phase: Option<String>,
    total_duration: Option<f64>,
    finished: bool,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("id", &self.id)
            .field("last_percent", &self.last_percent)
            .field("phase", &self.phase)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    pub fn new(
        id: InvocationId,
        grammar: Box<dyn ProgressGrammar>,
        total_duration: Option<f64>,
    ) -> Self {
        Self {
            id,
            grammar,
            stdout: LineBuffer::default(),
            stderr: LineBuffer::default(),
            last_percent: None,
            phase: None,
            total_duration,
            finished: false,
        }
    }

    pub fn id(&self) -> &InvocationId {
        &self.id
    }

    pub fn last_percent(&self) -> Option<f64> {
        self.last_percent
    }

    pub fn total_duration(&self) -> Option<f64> {
        self.total_duration
    }

    pub fn phase(&self) -> Option<&str> {
        self.phase.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed a raw chunk read from `stream`.
    pub fn feed(&mut self, stream: StreamKind, chunk: &[u8]) -> Vec<InvocationEvent> {
        let lines = self.buffer(stream).push(chunk);
        let mut events = Vec::new();
        for line in lines {
            self.parse(&line, &mut events);
        }
        events
    }

    /// Parse whatever partial line `stream` left behind at EOF.
    pub fn finish_stream(&mut self, stream: StreamKind) -> Vec<InvocationEvent> {
        let mut events = Vec::new();
        if let Some(line) = self.buffer(stream).flush() {
            self.parse(&line, &mut events);
        }
        events
    }

    /// Offer a wall-clock estimate capped at `ceiling`.
    pub fn offer_estimate(&mut self, percent: f64, ceiling: f64) -> EstimateOutcome {
        let ceiling = ceiling.min(RUNNING_CEILING);
        if self.finished || self.last_percent.is_some_and(|last| last >= ceiling) {
            return EstimateOutcome::Exhausted;
        }
        match self.accept(Sample::percent(percent.min(ceiling))) {
            Some(event) => EstimateOutcome::Emitted(event),
            None => EstimateOutcome::Skipped,
        }
    }

    /// Mark the invocation as successfully completed and return the single
    /// 100% event. Returns `None` if the tracker was already finished.
    pub fn complete(&mut self) -> Option<InvocationEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.last_percent = Some(COMPLETE);
        Some(InvocationEvent::Progress(ProgressEvent {
            id: self.id.clone(),
            percent: COMPLETE,
            rate: None,
            eta: None,
            processed: None,
            phase: self.phase.clone(),
        }))
    }

    /// Stop emitting without a completion event (failure or abort).
    pub fn close(&mut self) {
        self.finished = true;
    }

    fn buffer(&mut self, stream: StreamKind) -> &mut LineBuffer {
        match stream {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        }
    }

    fn parse(&mut self, line: &str, events: &mut Vec<InvocationEvent>) {
        trace!(invocation = %self.id, "output: {}", line);
        if self.finished {
            return;
        }
        for signal in self.grammar.parse_line(line) {
            match signal {
                Signal::Progress(sample) => {
                    if let Some(event) = self.accept(sample) {
                        events.push(event);
                    }
                }
                Signal::Phase(label) => {
                    if self.phase.as_deref() != Some(label.as_str()) {
                        self.phase = Some(label.clone());
                        events.push(InvocationEvent::Phase {
                            id: self.id.clone(),
                            label,
                        });
                    }
                }
                Signal::TotalDuration(total) => {
                    self.total_duration.get_or_insert(total);
                }
            }
        }
    }

    fn accept(&mut self, sample: Sample) -> Option<InvocationEvent> {
        if self.finished || !sample.percent.is_finite() {
            return None;
        }
        let percent = (sample.percent.clamp(0.0, RUNNING_CEILING) * 10.0).round() / 10.0;
        if self.last_percent.is_some_and(|last| percent <= last) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(InvocationEvent::Progress(ProgressEvent {
            id: self.id.clone(),
            percent,
            rate: sample.rate,
            eta: sample.eta,
            processed: sample.processed,
            phase: self.phase.clone(),
        }))
    }
}
