use crate::core::error::JobFailure;
use crate::core::grid::Assignment;
use crate::core::GpuId;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use strum::Display;

#[derive(Debug, PartialEq, Eq, Clone, Display)]
pub enum JobStatus {
    #[strum(to_string = "Pending")]
    Pending,
    #[strum(to_string = "Running")]
    Running,
    #[strum(to_string = "Succeeded")]
    Succeeded,
    #[strum(to_string = "Failed")]
    Failed(JobFailure),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed(_))
    }

    /// Pending -> Running -> {Succeeded, Failed}. A pending job may also fail
    /// directly when its directory or process cannot be set up.
    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed(_))
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed(_))
        )
    }
}

/// One grid point turned into a unit of scheduled work.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// 1-based position in grid enumeration order
    pub index: usize,
    pub command: Vec<String>,
    pub assignment: Assignment,

    /// Populated by the scheduler
    pub gpu: Option<GpuId>,
    pub dir: Option<PathBuf>,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

impl JobRecord {
    pub fn new(index: usize, command: Vec<String>, assignment: Assignment) -> Self {
        Self {
            index,
            command,
            assignment,
            gpu: None,
            dir: None,
            status: JobStatus::Pending,
            started_at: None,
            finished_at: None,
        }
    }

    /// Move to `next`, refusing transitions the state machine does not allow.
    pub fn try_transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(&next) {
            tracing::warn!(
                "Job {} ignored invalid transition {} -> {}",
                self.index,
                self.status,
                next
            );
            return false;
        }

        match next {
            JobStatus::Running => self.started_at = Some(Local::now()),
            JobStatus::Succeeded | JobStatus::Failed(_) => self.finished_at = Some(Local::now()),
            JobStatus::Pending => {}
        }
        self.status = next;
        true
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.status {
            JobStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn elapsed(&self) -> Option<std::time::Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Local::now);
        (end - start).to_std().ok()
    }
}
