//! Error taxonomy for the installation pipeline.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why opening an encrypted volume failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockReason {
    /// No key slot matched the passphrase.
    WrongKey,
    /// The mapping name is already in use.
    AlreadyOpen,
    Other,
}

impl std::fmt::Display for UnlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnlockReason::WrongKey => write!(f, "wrong passphrase"),
            UnlockReason::AlreadyOpen => write!(f, "mapping already open"),
            UnlockReason::Other => write!(f, "unlock error"),
        }
    }
}

#[derive(Error, Debug)]
pub enum InstallError {
    /// External command exited non-zero or could not be started.
    #[error("'{program} {}' failed ({}): {}", .args.join(" "), describe_exit(.exit_code), .stderr.trim())]
    ExecutionFailed {
        program: String,
        args: Vec<String>,
        /// `None` when the process never started or died from a signal.
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("precondition violated: {0}")]
    PreconditionViolated(String),

    #[error("'{program} {}' timed out after {}s", .args.join(" "), .after.as_secs())]
    Timeout {
        program: String,
        args: Vec<String>,
        after: Duration,
    },

    /// Some mount tree entries were mounted before one failed.
    #[error("mounting {} failed after {} successful mount(s); {} left mounted: {cause}", .failed.display(), .mounted.len(), .left_mounted.len())]
    PartialMount {
        mounted: Vec<PathBuf>,
        failed: PathBuf,
        /// Mounts the unwind could not remove.
        left_mounted: Vec<PathBuf>,
        cause: Box<InstallError>,
    },

    #[error("could not format {} as an encrypted volume: {cause}", .device.display())]
    EncryptionFormat {
        device: PathBuf,
        cause: Box<InstallError>,
    },

    #[error("could not unlock {} ({reason}): {cause}", .device.display())]
    UnlockFailed {
        device: PathBuf,
        reason: UnlockReason,
        cause: Box<InstallError>,
    },

    #[error("bootloader {step} failed, the system will not boot: {cause}")]
    BootloaderFailed {
        step: &'static str,
        cause: Box<InstallError>,
    },

    #[error("invalid partition plan: {0}")]
    InvalidPlan(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl InstallError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        InstallError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the orchestrator may retry or skip past this error.
    ///
    /// Partitioning, encryption format, mount and bootloader failures are
    /// one-way; only unlock attempts are worth repeating.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, InstallError::UnlockFailed { .. })
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, InstallError>;
