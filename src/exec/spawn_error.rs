// src/exec/spawn_error.rs

//! Classification of failures to start an executable at all.
//!
//! A missing binary and a binary built for another CPU need different fixes
//! from the user, so they are kept apart instead of folded into one
//! "could not spawn" error.

use std::io;

use thiserror::Error;

use crate::types::InvocationId;

#[cfg(unix)]
const EXEC_FORMAT_ERROR: i32 = 8; // ENOEXEC
#[cfg(windows)]
const EXEC_FORMAT_ERROR: i32 = 193; // ERROR_BAD_EXE_FORMAT

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("executable not found: {program}")]
    BinaryMissing { program: String },

    #[error("executable is built for a different architecture or format: {program}")]
    ArchitectureMismatch { program: String },

    #[error("permission denied executing {program}")]
    PermissionDenied { program: String },

    #[error("invocation id '{id}' is already active")]
    InvocationInUse { id: InvocationId },

    #[error("failed to start {program}: {source}")]
    Other {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl SpawnError {
    /// Map the OS error from a failed spawn onto the remediation classes.
    pub fn classify(program: &str, err: io::Error) -> Self {
        let program = program.to_string();
        if err.raw_os_error() == Some(EXEC_FORMAT_ERROR) {
            return SpawnError::ArchitectureMismatch { program };
        }
        match err.kind() {
            io::ErrorKind::NotFound => SpawnError::BinaryMissing { program },
            io::ErrorKind::PermissionDenied => SpawnError::PermissionDenied { program },
            _ => SpawnError::Other {
                program,
                source: err,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_missing_binary() {
        let err = io::Error::from(io::ErrorKind::NotFound);
        assert!(matches!(
            SpawnError::classify("/opt/ffmpeg", err),
            SpawnError::BinaryMissing { program } if program == "/opt/ffmpeg"
        ));
    }

    #[test]
    fn exec_format_error_is_architecture_mismatch() {
        let err = io::Error::from_raw_os_error(EXEC_FORMAT_ERROR);
        assert!(matches!(
            SpawnError::classify("whisper", err),
            SpawnError::ArchitectureMismatch { .. }
        ));
    }

    #[test]
    fn permission_and_other_errors() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(
            SpawnError::classify("x", denied),
            SpawnError::PermissionDenied { .. }
        ));

        let other = io::Error::other("boom");
        let classified = SpawnError::classify("x", other);
        assert!(matches!(classified, SpawnError::Other { .. }));
        assert!(classified.to_string().contains("boom"));
    }
}
