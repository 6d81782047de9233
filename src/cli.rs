// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::AccelerationPreference;

/// Command-line arguments for `mediabridge`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "mediabridge",
    version,
    about = "Supervise external media tools and a persistent model server.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `MEDIABRIDGE_CONFIG`, else `Mediabridge.toml` in the current
    /// working directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `MEDIABRIDGE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Parse + validate the config and print a summary without running
    /// anything.
    Check,
    /// Run one invocation of a configured tool and print its progress.
    Run(RunArgs),
    /// Send one request to the persistent server, starting it if needed.
    Call(CallArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Tool name as configured under `[tool.<name>]`.
    pub tool: String,

    /// Invocation id; a fresh one is generated when omitted.
    #[arg(long)]
    pub id: Option<String>,

    /// Media duration in seconds, when the tool does not report it.
    #[arg(long, value_name = "SECS")]
    pub duration: Option<f64>,

    /// File the tool must produce for the run to count as a success.
    #[arg(long, value_name = "PATH")]
    pub artifact: Option<PathBuf>,

    /// Never use accelerated mode.
    #[arg(long, conflicts_with = "force_accelerated")]
    pub no_accelerated: bool,

    /// Use accelerated mode even after an earlier accelerator failure.
    #[arg(long)]
    pub force_accelerated: bool,

    /// Arguments passed through to the tool.
    #[arg(last = true)]
    pub args: Vec<String>,
}

impl RunArgs {
    pub fn preference(&self) -> AccelerationPreference {
        if self.no_accelerated {
            AccelerationPreference::Disabled
        } else if self.force_accelerated {
            AccelerationPreference::Force
        } else {
            AccelerationPreference::Auto
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct CallArgs {
    /// Request path, e.g. `/inference`.
    pub path: String,

    /// HTTP method; defaults to POST with a body, GET without.
    #[arg(long)]
    pub method: Option<String>,

    /// JSON request body.
    #[arg(long, value_name = "JSON")]
    pub body: Option<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_passes_trailing_args_through() {
        let args = CliArgs::try_parse_from([
            "mediabridge",
            "run",
            "transcode",
            "--duration",
            "12.5",
            "--no-accelerated",
            "--",
            "-i",
            "in.mp4",
            "out.mp3",
        ])
        .unwrap();
        let Command::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.tool, "transcode");
        assert_eq!(run.duration, Some(12.5));
        assert_eq!(run.args, ["-i", "in.mp4", "out.mp3"]);
        assert_eq!(run.preference(), AccelerationPreference::Disabled);
    }

    #[test]
    fn accelerated_flags_conflict() {
        let err = CliArgs::try_parse_from([
            "mediabridge",
            "run",
            "speech",
            "--no-accelerated",
            "--force-accelerated",
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args =
            CliArgs::try_parse_from(["mediabridge", "check", "--log-level", "debug"]).unwrap();
        assert!(matches!(args.command, Command::Check));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    }
}
