// src/server/status.rs

use std::fmt;
use std::time::Duration;

/// Lifecycle of the persistent server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Stopped,
    Starting,
    Ready,
    /// Ready with at least one request in flight; the idle timer is paused.
    Generating,
}

impl ServerPhase {
    pub fn is_running(self) -> bool {
        self != ServerPhase::Stopped
    }

    pub fn is_ready(self) -> bool {
        matches!(self, ServerPhase::Ready | ServerPhase::Generating)
    }
}

impl fmt::Display for ServerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerPhase::Stopped => "stopped",
            ServerPhase::Starting => "starting",
            ServerPhase::Ready => "ready",
            ServerPhase::Generating => "generating",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the server, safe to hand to any caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerStatus {
    pub phase: ServerPhase,
    pub running: bool,
    pub ready: bool,
    pub port: u16,
    /// Time since the last successful start; `None` unless ready.
    pub uptime: Option<Duration>,
}
