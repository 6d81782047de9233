// src/progress/json_lines.rs

//! Grammar for helper scripts that report progress as one JSON object per
//! line on stdout:
//!
//! ```text
//! {"type": "progress", "phase": "transcription", "progress": 40, "message": "Transcribing audio..."}
//! {"type": "error", "message": "model not found"}
//! {"type": "result", "data": {...}}
//! ```
//!
//! Only `progress` messages produce signals; everything else (including
//! non-JSON lines) is ignored here and left to the error tail.

use serde::Deserialize;

use super::grammar::{ProgressGrammar, Sample, Signal};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum HelperMessage {
    Progress {
        #[serde(default)]
        phase: Option<String>,
        progress: f64,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default)]
pub struct JsonLinesGrammar;

impl ProgressGrammar for JsonLinesGrammar {
    fn parse_line(&mut self, line: &str) -> Vec<Signal> {
        let line = line.trim();
        if !line.starts_with('{') {
            return Vec::new();
        }

        match serde_json::from_str::<HelperMessage>(line) {
            Ok(HelperMessage::Progress {
                phase,
                progress,
                message,
            }) => {
                let mut signals = Vec::new();
                let label = message.filter(|m| !m.is_empty()).or(phase);
                if let Some(label) = label {
                    signals.push(Signal::Phase(label));
                }
                signals.push(Signal::Progress(Sample::percent(progress)));
                signals
            }
            _ => Vec::new(),
        }
    }
}
