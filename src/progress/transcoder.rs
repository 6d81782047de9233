// src/progress/transcoder.rs

//! Grammar for ffmpeg-style transcoder output.
//!
//! Understands both the human stats line printed on stderr
//! (`frame=  240 fps= 48 ... time=00:00:10.00 ... speed=1.5x`) and the
//! machine-readable `-progress pipe:1` key/value blocks, which end with a
//! `progress=continue` or `progress=end` line.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::grammar::{ProgressGrammar, Sample, Signal, parse_clock, ratio_percent};

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d+:\d{2}:\d{2}(?:\.\d+)?)").expect("valid duration regex")
});
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=\s*(\d+:\d{2}:\d{2}(?:\.\d+)?)").expect("valid time regex")
});
static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"speed=\s*([\d.]+)x").expect("valid speed regex"));
static FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"frame=\s*(\d+)").expect("valid frame regex"));

#[derive(Debug, Default)]
pub struct TranscoderGrammar {
    total: Option<f64>,
    out_time: Option<f64>,
    speed: Option<f64>,
    frame: Option<u64>,
    announced: bool,
}

impl TranscoderGrammar {
    pub fn new(total_seconds: Option<f64>) -> Self {
        Self {
            total: total_seconds.filter(|t| *t > 0.0),
            ..Self::default()
        }
    }

    fn parse_stats_line(&mut self, line: &str) -> Option<Sample> {
        let time = TIME_RE
            .captures(line)
            .and_then(|c| parse_clock(&c[1]))?;
        self.out_time = Some(time);
        self.speed = SPEED_RE
            .captures(line)
            .and_then(|c| c[1].parse().ok())
            .or(self.speed);
        self.frame = FRAME_RE
            .captures(line)
            .and_then(|c| c[1].parse().ok())
            .or(self.frame);
        self.sample()
    }

    /// Returns a sample only on the `progress=` line closing a block.
    fn parse_key_value(&mut self, key: &str, value: &str) -> Option<Sample> {
        match key {
            // ffmpeg reports both of these in microseconds.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time = Some(us / 1_000_000.0);
                }
            }
            "out_time" => {
                if let Some(t) = parse_clock(value) {
                    self.out_time = Some(t);
                }
            }
            "speed" => {
                if let Ok(s) = value.trim_end_matches('x').trim().parse() {
                    self.speed = Some(s);
                }
            }
            "frame" => {
                if let Ok(f) = value.parse() {
                    self.frame = Some(f);
                }
            }
            "progress" => return self.sample(),
            _ => {}
        }
        None
    }

    fn sample(&self) -> Option<Sample> {
        let time = self.out_time?;
        let total = self.total?;
        let percent = ratio_percent(time, total)?;
        let eta = match self.speed {
            Some(speed) if speed > 0.0 => {
                let remaining = ((total - time) / speed).max(0.0);
                Some(Duration::from_secs_f64(remaining))
            }
            _ => None,
        };
        Some(Sample {
            percent,
            rate: self.speed.map(|s| format!("{s}x")),
            eta,
            processed: self.frame,
        })
    }
}

impl ProgressGrammar for TranscoderGrammar {
    fn parse_line(&mut self, line: &str) -> Vec<Signal> {
        let mut signals = Vec::new();
        let line = line.trim();

        if self.total.is_none() {
            if let Some(total) = DURATION_RE
                .captures(line)
                .and_then(|c| parse_clock(&c[1]))
                .filter(|t| *t > 0.0)
            {
                self.total = Some(total);
                signals.push(Signal::TotalDuration(total));
                return signals;
            }
        }

        // Stats lines are space separated; `-progress` lines are a single pair.
        let sample = if line.contains(char::is_whitespace) && line.contains("time=") {
            self.parse_stats_line(line)
        } else {
            match line.split_once('=') {
                Some((key, value)) if !key.contains(' ') => {
                    self.parse_key_value(key.trim(), value.trim())
                }
                _ => None,
            }
        };

        if let Some(sample) = sample {
            if !self.announced {
                self.announced = true;
                signals.push(Signal::Phase("Encoding".to_string()));
            }
            signals.push(Signal::Progress(sample));
        }

        signals
    }
}
