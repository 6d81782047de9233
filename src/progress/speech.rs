// src/progress/speech.rs

//! Grammar for whisper.cpp style speech-to-text output.
//!
//! Two sources of progress exist: the `--print-progress` callback lines
//! (`whisper_print_progress_callback: progress =  45%`) and segment lines
//! (`[00:00:05.000 --> 00:00:10.000]  text`), whose end timestamp is turned
//! into a percent when the audio length is known.

use std::sync::LazyLock;

use regex::Regex;

use super::grammar::{ProgressGrammar, Sample, Signal, parse_clock, ratio_percent};

static CALLBACK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"progress\s*=\s*(\d+(?:\.\d+)?)\s*%").expect("valid progress regex"));
static SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d+:\d{2}:\d{2}(?:\.\d+)?)\s*-->\s*(\d+:\d{2}:\d{2}(?:\.\d+)?)\]")
        .expect("valid segment regex")
});

const PHASES: &[(&str, &str)] = &[
    ("whisper_init_from_file", "Loading model"),
    ("whisper_model_load", "Loading model"),
    ("main: processing", "Transcribing"),
    ("output_srt:", "Writing subtitles"),
    ("output_txt:", "Writing transcript"),
    ("output_json:", "Writing transcript"),
];

#[derive(Debug, Default)]
pub struct SpeechGrammar {
    total: Option<f64>,
}

impl SpeechGrammar {
    pub fn new(total_seconds: Option<f64>) -> Self {
        Self {
            total: total_seconds.filter(|t| *t > 0.0),
        }
    }
}

impl ProgressGrammar for SpeechGrammar {
    fn parse_line(&mut self, line: &str) -> Vec<Signal> {
        let line = line.trim();

        if let Some((_, label)) = PHASES.iter().find(|(marker, _)| line.starts_with(marker)) {
            return vec![Signal::Phase(label.to_string())];
        }

        if let Some(caps) = CALLBACK_RE.captures(line) {
            if let Ok(percent) = caps[1].parse::<f64>() {
                return vec![Signal::Progress(Sample::percent(percent))];
            }
        }

        if let (Some(caps), Some(total)) = (SEGMENT_RE.captures(line), self.total) {
            if let Some(percent) = parse_clock(&caps[2]).and_then(|end| ratio_percent(end, total)) {
                return vec![Signal::Progress(Sample::percent(percent))];
            }
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Captured from `whisper-cli -m ggml-base.bin -f audio.wav -osrt -pp`.
    const FIXTURE: &str = "\
whisper_init_from_file_with_params_no_state: loading model from 'ggml-base.bin'
whisper_model_load: n_vocab       = 51865
main: processing 'audio.wav' (960000 samples, 60.0 sec), 4 threads, 1 processors, lang = en, task = transcribe ...
[00:00:00.000 --> 00:00:15.000]   Hello and welcome.
whisper_print_progress_callback: progress =  30%
[00:00:15.000 --> 00:00:30.000]   Today we talk about pipes.
output_srt: saving output to 'audio.wav.srt'";

    #[test]
    fn fixture_yields_phases_and_percents() {
        let mut g = SpeechGrammar::new(Some(60.0));
        let signals: Vec<Signal> = FIXTURE.lines().flat_map(|l| g.parse_line(l)).collect();
        assert_eq!(
            signals,
            vec![
                Signal::Phase("Loading model".to_string()),
                Signal::Phase("Loading model".to_string()),
                Signal::Phase("Transcribing".to_string()),
                Signal::Progress(Sample::percent(25.0)),
                Signal::Progress(Sample::percent(30.0)),
                Signal::Progress(Sample::percent(50.0)),
                Signal::Phase("Writing subtitles".to_string()),
            ]
        );
    }

    #[test]
    fn segments_are_ignored_without_total() {
        let mut g = SpeechGrammar::new(None);
        assert!(g.parse_line("[00:00:00.000 --> 00:00:15.000]  hi").is_empty());
    }
}
