// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::time::Duration;

use thiserror::Error;

use crate::exec::spawn_error::SpawnError;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error(
        "server did not become ready within {timeout:?}; the model may be too large \
         for available memory (close other applications or pick a smaller model)"
    )]
    ServerStartupTimeout { timeout: Duration },

    #[error("server exited before becoming ready (exit code {code:?})")]
    ServerExited { code: Option<i32> },

    #[error("server is not reachable, it probably crashed: {0}")]
    ServerCrash(String),

    #[error("previous server process has not exited after {waited:?}")]
    ServerStillExiting { waited: Duration },

    #[error("server start was cancelled")]
    StartCancelled,

    #[error("request to server timed out after {timeout:?}")]
    RequestTimeout { timeout: Duration },

    #[error("request to server failed: {0}")]
    Request(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BridgeError>;
