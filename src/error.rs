//! Error types for workspace synchronization.
//!
//! Defines [`SyncError`], the unified error type for checkout, polling, and
//! archival operations. Advisory conditions (a workspace that merely needs a
//! fresh checkout instead of an update) are *not* errors; they are reason
//! strings returned by the inspector. Errors here are the conditions that
//! abort an operation.

use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

/// Unified error type for synchronization operations.
#[derive(Debug)]
pub enum SyncError {
    /// The job configuration is invalid. Surfaced before any subprocess runs.
    Config {
        /// Human-readable description of the problem.
        message: String,
    },

    /// The external cvs command exited with a non-zero status.
    Subprocess {
        /// The command that was run (executable plus arguments).
        command: String,
        /// Process exit code, if available.
        exit_code: Option<i32>,
    },

    /// Writing the tagging archive failed. Build-affecting: later tag
    /// application depends on the archive.
    Archive {
        /// Path of the archive being written.
        path: PathBuf,
        /// Human-readable description of the failure.
        detail: String,
    },

    /// An I/O error occurred during a workspace operation.
    Io(std::io::Error),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message } => write!(f, "configuration error: {message}"),
            Self::Subprocess { command, exit_code } => {
                write!(f, "`{command}` failed")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit code {code})")?;
                }
                Ok(())
            }
            Self::Archive { path, detail } => {
                write!(f, "failed to archive workspace to {}: {detail}", path.display())
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl SyncError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
