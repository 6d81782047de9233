// src/progress/downloader.rs

//! Grammar for yt-dlp style downloader output.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::grammar::{ProgressGrammar, Sample, Signal, parse_clock, parse_size};

static DOWNLOAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[download\]\s+(\d+(?:\.\d+)?)%(?:\s+of\s+(~?\s*[\d.]+\s*[KMGT]?i?B))?(?:\s+at\s+(\S+))?(?:\s+ETA\s+(\S+))?",
    )
    .expect("valid download regex")
});

/// Phase labels keyed by line prefix.
const PHASES: &[(&str, &str)] = &[
    ("[youtube]", "Fetching metadata"),
    ("[info]", "Fetching metadata"),
    ("[download] Destination:", "Downloading"),
    ("[Merger]", "Merging formats"),
    ("[ExtractAudio]", "Extracting audio"),
    ("[VideoConvertor]", "Converting"),
    ("[ffmpeg]", "Post-processing"),
];

#[derive(Debug, Default)]
pub struct DownloaderGrammar;

impl ProgressGrammar for DownloaderGrammar {
    fn parse_line(&mut self, line: &str) -> Vec<Signal> {
        let line = line.trim();
        let mut signals = Vec::new();

        if let Some((_, label)) = PHASES.iter().find(|(prefix, _)| line.starts_with(prefix)) {
            signals.push(Signal::Phase(label.to_string()));
            return signals;
        }

        if line.starts_with("[download]") && line.contains("has already been downloaded") {
            signals.push(Signal::Progress(Sample::percent(100.0)));
            return signals;
        }

        if let Some(caps) = DOWNLOAD_RE.captures(line) {
            let Ok(percent) = caps[1].parse::<f64>() else {
                return signals;
            };
            let total_bytes = caps.get(2).and_then(|m| parse_size(m.as_str()));
            let rate = caps
                .get(3)
                .map(|m| m.as_str())
                .filter(|r| !r.starts_with("Unknown"))
                .map(str::to_string);
            let eta = caps
                .get(4)
                .and_then(|m| parse_clock(m.as_str()))
                .map(Duration::from_secs_f64);

            signals.push(Signal::Progress(Sample {
                percent,
                rate,
                eta,
                processed: total_bytes.map(|b| (b as f64 * percent / 100.0).round() as u64),
            }));
        }

        signals
    }
}
