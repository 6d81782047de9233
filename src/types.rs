use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Opaque token identifying one invocation of an external tool.
///
/// Unique among concurrently active invocations; may be reused once the
/// previous holder has completed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvocationId(String);

impl InvocationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh lowercase ULID.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InvocationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for InvocationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Which output grammar to apply to a tool's streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrammarKind {
    /// ffmpeg-style `time=` / `Duration:` reporting.
    Transcoder,
    /// yt-dlp-style `[download] NN.N%` reporting.
    Downloader,
    /// whisper.cpp progress callback and segment timestamps.
    Speech,
    /// One JSON object per line with a `progress` field.
    JsonLines,
    /// No progress output at all (e.g. a media prober).
    Silent,
}

impl Default for GrammarKind {
    fn default() -> Self {
        GrammarKind::Silent
    }
}

impl FromStr for GrammarKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transcoder" => Ok(GrammarKind::Transcoder),
            "downloader" => Ok(GrammarKind::Downloader),
            "speech" => Ok(GrammarKind::Speech),
            "json_lines" | "json-lines" => Ok(GrammarKind::JsonLines),
            "silent" => Ok(GrammarKind::Silent),
            other => Err(format!(
                "invalid grammar: {other} (expected transcoder, downloader, speech, json_lines or silent)"
            )),
        }
    }
}

/// Execution mode for tools that can run accelerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Accelerated,
    Safe,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Accelerated => f.write_str("accelerated"),
            ExecutionMode::Safe => f.write_str("safe"),
        }
    }
}

/// What the caller asks of the fallback controller.
///
/// - `Auto`: accelerated unless this session already saw it fail.
/// - `Force`: accelerated even after a recorded failure.
/// - `Disabled`: always safe mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccelerationPreference {
    #[default]
    Auto,
    Force,
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_ulids() {
        let id = InvocationId::generate();
        assert_eq!(id.as_str().len(), 26);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, InvocationId::generate());
    }

    #[test]
    fn grammar_kind_from_str_accepts_both_spellings() {
        assert_eq!("json-lines".parse::<GrammarKind>(), Ok(GrammarKind::JsonLines));
        assert_eq!(" Transcoder".parse::<GrammarKind>(), Ok(GrammarKind::Transcoder));
        assert!("ffmpeg".parse::<GrammarKind>().is_err());
    }
}
