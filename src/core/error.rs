use std::path::PathBuf;
use thiserror::Error;

/// Exit code used when at least one job of a live sweep failed.
pub const EXIT_JOB_FAILURE: u8 = 1;
/// Exit code used for malformed `--args` / `--gpus` input.
pub const EXIT_MALFORMED_ARGUMENT: u8 = 2;
/// Exit code used when the sweep itself could not be set up on disk.
pub const EXIT_IO: u8 = 3;
/// Exit code used after an operator interrupt (128 + SIGINT).
pub const EXIT_INTERRUPTED: u8 = 130;

/// Sweep-level errors. Any of these aborts the whole run before (or instead of)
/// dispatching jobs.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("malformed argument: {0}")]
    MalformedArgument(String),

    #[error("{context}: {}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SweepError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedArgument(msg.into())
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MalformedArgument(_) => EXIT_MALFORMED_ARGUMENT,
            Self::Io { .. } => EXIT_IO,
        }
    }
}

/// Why a single job ended up `Failed`. These never propagate past the job that
/// produced them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure {
    #[error("could not allocate run directory: {0}")]
    DirectoryAllocation(String),

    #[error("could not spawn process: {0}")]
    Spawn(String),

    #[error("exited with code {0}")]
    Exited(i32),

    #[error("terminated by signal")]
    Signaled,

    #[error("lost track of process: {0}")]
    Wait(String),

    #[error("interrupted by operator")]
    Interrupted,
}

impl JobFailure {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(*code),
            _ => None,
        }
    }
}
