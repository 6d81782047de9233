// src/progress/grammar.rs

use std::time::Duration;

use crate::types::GrammarKind;

use super::downloader::DownloaderGrammar;
use super::json_lines::JsonLinesGrammar;
use super::speech::SpeechGrammar;
use super::transcoder::TranscoderGrammar;

/// Carry-over buffers are capped so a tool that never prints a newline
/// cannot grow memory without bound.
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// One progress reading extracted from a line of output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    pub percent: f64,
    pub rate: Option<String>,
    pub eta: Option<Duration>,
    pub processed: Option<u64>,
}

impl Sample {
    pub fn percent(percent: f64) -> Self {
        Self {
            percent,
            ..Self::default()
        }
    }
}

/// What a grammar can learn from a single line.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Progress(Sample),
    Phase(String),
    /// Total length of the work unit in seconds, discovered from output.
    TotalDuration(f64),
}

/// A per-tool output grammar.
///
/// Grammars only ever see complete lines; splitting arbitrary chunks into
/// lines is the job of [`LineBuffer`]. Any state a grammar needs between
/// lines (a discovered total duration, the last seen speed) lives in the
/// implementing struct.
pub trait ProgressGrammar: Send {
    fn parse_line(&mut self, line: &str) -> Vec<Signal>;
}

/// Grammar for tools that print nothing useful while running.
#[derive(Debug, Default)]
pub struct SilentGrammar;

impl ProgressGrammar for SilentGrammar {
    fn parse_line(&mut self, _line: &str) -> Vec<Signal> {
        Vec::new()
    }
}

/// Build the grammar for `kind`. `total_seconds` is the caller-supplied
/// length of the media, if known.
pub fn grammar_for(kind: GrammarKind, total_seconds: Option<f64>) -> Box<dyn ProgressGrammar> {
    match kind {
        GrammarKind::Transcoder => Box::new(TranscoderGrammar::new(total_seconds)),
        GrammarKind::Downloader => Box::new(DownloaderGrammar::default()),
        GrammarKind::Speech => Box::new(SpeechGrammar::new(total_seconds)),
        GrammarKind::JsonLines => Box::new(JsonLinesGrammar::default()),
        GrammarKind::Silent => Box::new(SilentGrammar),
    }
}

/// Splits a byte stream into lines on `\n` and `\r`, keeping any trailing
/// partial line until the next chunk (or [`LineBuffer::flush`]).
///
/// Works on bytes so a multi-byte character split across two reads is
/// decoded intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
            } else {
                self.pending.push(byte);
            }
        }

        if self.pending.len() > MAX_PENDING_BYTES {
            let excess = self.pending.len() - MAX_PENDING_BYTES;
            self.pending.drain(..excess);
        }

        lines
    }

    /// Return whatever partial line is left (end of stream).
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

/// Parse `HH:MM:SS(.frac)`, `MM:SS` or bare seconds into seconds.
pub fn parse_clock(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let mut total = 0.0;
    for part in s.split(':') {
        let value: f64 = part.parse().ok()?;
        if value < 0.0 {
            return None;
        }
        total = total * 60.0 + value;
    }
    Some(total)
}

/// Parse sizes like `10.00MiB`, `512KiB`, `1.2GB` or `300B` into bytes.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().trim_start_matches('~').trim();
    let idx = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(idx);
    let value: f64 = num.parse().ok()?;
    let multiplier = match unit.trim() {
        "" | "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" | "kB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    Some((value * multiplier).round() as u64)
}

/// Percent of `done` over `total`, or `None` if `total` is unusable.
pub fn ratio_percent(done: f64, total: f64) -> Option<f64> {
    (total > 0.0 && done.is_finite()).then(|| (done / total * 100.0).max(0.0))
}
