//! On-disk layout of a sweep.
//!
//! ```text
//! <output_dir>/sweep_<timestamp>_<token>/
//!     sweep.json          sweep parameters, written before any job starts
//!     summary.json        final tally, written after the scheduler returns
//!     gsweep.log          the launcher's own log
//!     run_<index>/
//!         meta.json       command line, GPU, start/end time, exit code
//!         args.json       the grid point as a JSON object
//!         stdout.log
//!         stderr.log
//! ```

use crate::core::command::shell_command_line;
use crate::core::error::{JobFailure, SweepError};
use crate::core::grid::Assignment;
use crate::core::job::{JobRecord, JobStatus};
use crate::core::GpuId;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub const SWEEP_METADATA_FILE: &str = "sweep.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const LOG_FILE: &str = "gsweep.log";
pub const JOB_METADATA_FILE: &str = "meta.json";
pub const JOB_ARGS_FILE: &str = "args.json";
pub const STDOUT_FILE: &str = "stdout.log";
pub const STDERR_FILE: &str = "stderr.log";

/// Sweep-level parameters persisted as `sweep.json`.
#[derive(Debug, Clone, Serialize)]
pub struct SweepMetadata {
    pub script: String,
    pub launcher: Vec<String>,
    pub args: Vec<String>,
    pub gpus: Vec<GpuId>,
    pub sweep_dir: PathBuf,
    pub job_count: usize,
    pub timestamp: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
struct JobMetadata<'a> {
    index: usize,
    command: &'a [String],
    command_line: String,
    gpu: Option<GpuId>,
    assignment: &'a Assignment,
    status: String,
    started_at: Option<DateTime<Local>>,
    finished_at: Option<DateTime<Local>>,
    exit_code: Option<i32>,
    failure: Option<String>,
}

impl<'a> JobMetadata<'a> {
    fn from_job(job: &'a JobRecord) -> Self {
        let failure = job.failure();
        let exit_code = match &job.status {
            JobStatus::Succeeded => Some(0),
            JobStatus::Failed(failure) => failure.exit_code(),
            JobStatus::Pending | JobStatus::Running => None,
        };
        Self {
            index: job.index,
            command: &job.command,
            command_line: shell_command_line(&job.command),
            gpu: job.gpu,
            assignment: &job.assignment,
            status: job.status.to_string(),
            started_at: job.started_at,
            finished_at: job.finished_at,
            exit_code,
            failure: failure.map(ToString::to_string),
        }
    }
}

/// The per-invocation root directory. Its name combines a timestamp with a
/// random token so two sweeps started in the same second under the same
/// parent never share a directory.
#[derive(Debug, Clone)]
pub struct SweepDirectory {
    root: PathBuf,
    timestamp: String,
    token: String,
}

impl SweepDirectory {
    pub fn create(output_dir: &Path) -> Result<Self, SweepError> {
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        Self::create_with(output_dir, timestamp, crate::core::random_sweep_token())
    }

    pub fn create_with(
        output_dir: &Path,
        timestamp: String,
        token: String,
    ) -> Result<Self, SweepError> {
        fs::create_dir_all(output_dir).map_err(|source| SweepError::Io {
            context: "Failed to create output directory",
            path: output_dir.to_path_buf(),
            source,
        })?;

        let root = output_dir.join(format!("sweep_{timestamp}_{token}"));
        fs::create_dir(&root).map_err(|source| SweepError::Io {
            context: "Failed to create sweep directory",
            path: root.clone(),
            source,
        })?;

        Ok(Self {
            root,
            timestamp,
            token,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Create `run_<index>`; fails if the directory already exists.
    pub fn allocate(&self, run_index: usize) -> Result<RunDirectory, JobFailure> {
        let path = self.root.join(format!("run_{run_index}"));
        fs::create_dir(&path).map_err(|e| {
            JobFailure::DirectoryAllocation(format!("{}: {e}", path.display()))
        })?;
        Ok(RunDirectory { path })
    }

    pub fn write_sweep_metadata(&self, metadata: &SweepMetadata) -> Result<(), SweepError> {
        self.write_json(SWEEP_METADATA_FILE, metadata)
    }

    pub fn write_summary<T: Serialize>(&self, summary: &T) -> Result<(), SweepError> {
        self.write_json(SUMMARY_FILE, summary)
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), SweepError> {
        let path = self.root.join(name);
        write_json_atomic(&path, value).map_err(|source| SweepError::Io {
            context: "Failed to write sweep metadata",
            path,
            source,
        })
    }
}

/// The private directory of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    path: PathBuf,
}

impl RunDirectory {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.path.join(STDOUT_FILE)
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.path.join(STDERR_FILE)
    }

    /// Write `meta.json` and `args.json` before the process is spawned.
    pub fn write_start(&self, job: &JobRecord) -> io::Result<()> {
        write_json_atomic(&self.path.join(JOB_ARGS_FILE), &job.assignment)?;
        self.write_metadata(job)
    }

    /// Rewrite `meta.json` once the job reached a terminal state.
    pub fn write_end(&self, job: &JobRecord) -> io::Result<()> {
        self.write_metadata(job)
    }

    /// Open the append-only capture files for stdout and stderr.
    pub fn open_output(&self) -> io::Result<(File, File)> {
        let open = |path: PathBuf| OpenOptions::new().create(true).append(true).open(path);
        Ok((open(self.stdout_path())?, open(self.stderr_path())?))
    }

    fn write_metadata(&self, job: &JobRecord) -> io::Result<()> {
        write_json_atomic(&self.path.join(JOB_METADATA_FILE), &JobMetadata::from_job(job))
    }
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)?;
    // Atomic rename
    fs::rename(&tmp_path, path)
}
