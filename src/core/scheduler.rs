use crate::core::error::{JobFailure, SweepError};
use crate::core::executor::{
    force_kill, request_termination, Executor, JobOutput, ProcessExecutor,
};
use crate::core::job::{JobRecord, JobStatus};
use crate::core::run_dir::{RunDirectory, SweepDirectory};
use crate::core::GpuId;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use strum::Display;
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

/// How long a terminated job gets between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(10);

/// What happens to running jobs when the operator interrupts the sweep.
/// Either way no new job is dispatched, and a second interrupt always
/// terminates whatever is still running.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InterruptPolicy {
    /// Send SIGTERM to running jobs, then SIGKILL after the grace period
    #[default]
    Terminate,
    /// Let running jobs finish on their own
    Wait,
}

/// Slot transitions in the order the scheduler observed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotEvent {
    Started {
        index: usize,
        gpu: GpuId,
    },
    Finished {
        index: usize,
        gpu: GpuId,
        status: JobStatus,
    },
}

#[derive(Debug)]
struct RunningJob {
    job: usize,
    dir: RunDirectory,
}

/// One GPU with room for exactly one job.
#[derive(Debug)]
pub struct GpuSlot {
    pub gpu: GpuId,
    running: Option<RunningJob>,
}

impl GpuSlot {
    fn new(gpu: GpuId) -> Self {
        Self { gpu, running: None }
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_none()
    }
}

/// Sent back by a supervisor task once its child is gone.
struct Reaped {
    slot: usize,
    status: io::Result<ExitStatus>,
    interrupted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub interrupted: bool,
}

/// Dispatches jobs FIFO onto GPU slots, one job per GPU.
///
/// All slot and queue mutation happens in [`GpuScheduler::run`]'s single
/// coordinating loop; child processes are awaited by supervisor tasks that
/// only report back their exit status.
pub struct GpuScheduler {
    slots: Vec<GpuSlot>,
    pending: VecDeque<usize>,
    jobs: Vec<JobRecord>,
    events: Vec<SlotEvent>,
    executor: Box<dyn Executor>,
    sweep_dir: SweepDirectory,
    interrupt_policy: InterruptPolicy,
    kill_grace: Duration,
}

impl GpuScheduler {
    /// Queue a job behind every job submitted before it.
    pub fn submit(&mut self, job: JobRecord) {
        self.pending.push_back(self.jobs.len());
        self.jobs.push(job);
    }

    pub fn jobs(&self) -> &[JobRecord] {
        &self.jobs
    }

    pub fn into_jobs(self) -> Vec<JobRecord> {
        self.jobs
    }

    pub fn events(&self) -> &[SlotEvent] {
        &self.events
    }

    pub fn slots(&self) -> &[GpuSlot] {
        &self.slots
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_idle()).count()
    }

    pub fn sweep_dir(&self) -> &SweepDirectory {
        &self.sweep_dir
    }

    /// Drive every submitted job to a terminal state, or stop early when an
    /// interrupt arrives on `interrupts`.
    ///
    /// The first interrupt stops dispatch and applies the interrupt policy.
    /// Any later one terminates the jobs still running. A closed channel
    /// means no interrupts will come.
    pub async fn run(&mut self, mut interrupts: mpsc::Receiver<()>) -> RunOutcome {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut running: JoinSet<Reaped> = JoinSet::new();
        let mut interrupted = false;

        tracing::info!(
            "Scheduling {} jobs on {} GPUs",
            self.pending.len(),
            self.slots.len()
        );
        self.dispatch(&mut running, &stop_rx);

        while !running.is_empty() {
            tokio::select! {
                joined = running.join_next() => match joined {
                    Some(Ok(reaped)) => {
                        self.reap(reaped);
                        if !interrupted {
                            self.dispatch(&mut running, &stop_rx);
                        }
                    }
                    Some(Err(e)) => tracing::error!("Job supervisor task failed: {}", e),
                    None => break,
                },
                Some(()) = interrupts.recv(), if !*stop_tx.borrow() => {
                    if !interrupted {
                        interrupted = true;
                        tracing::warn!(
                            "Interrupted: {} jobs not started, {} running ({} policy)",
                            self.pending.len(),
                            self.running_count(),
                            self.interrupt_policy
                        );
                        if self.interrupt_policy == InterruptPolicy::Terminate {
                            stop_tx.send_replace(true);
                        }
                    } else {
                        tracing::warn!(
                            "Interrupted again, terminating {} running jobs",
                            self.running_count()
                        );
                        stop_tx.send_replace(true);
                    }
                }
            }
        }

        RunOutcome { interrupted }
    }

    /// Fill every idle slot from the head of the queue. A job that fails to
    /// launch gives its slot straight to the next one.
    fn dispatch(&mut self, running: &mut JoinSet<Reaped>, stop: &watch::Receiver<bool>) {
        for slot in 0..self.slots.len() {
            while self.slots[slot].is_idle() {
                let Some(job) = self.pending.pop_front() else {
                    return;
                };
                if let Some(child) = self.launch(slot, job) {
                    running.spawn(supervise(child, slot, stop.clone(), self.kill_grace));
                }
            }
        }
    }

    /// Prepare the run directory and spawn the job on `slot`. Returns `None`
    /// (with the job already marked failed) if either step fails.
    fn launch(&mut self, slot: usize, job: usize) -> Option<Child> {
        let gpu = self.slots[slot].gpu;
        let index = self.jobs[job].index;

        let dir = match self.sweep_dir.allocate(index) {
            Ok(dir) => dir,
            Err(failure) => {
                self.fail_before_start(job, failure, None);
                return None;
            }
        };
        self.jobs[job].dir = Some(dir.path().to_path_buf());

        let output = match dir.open_output() {
            Ok((stdout, stderr)) => JobOutput { stdout, stderr },
            Err(e) => {
                let failure = JobFailure::DirectoryAllocation(e.to_string());
                self.fail_before_start(job, failure, Some(&dir));
                return None;
            }
        };

        let record = &mut self.jobs[job];
        record.gpu = Some(gpu);
        record.try_transition(JobStatus::Running);

        if let Err(e) = dir.write_start(record) {
            let failure = JobFailure::DirectoryAllocation(e.to_string());
            self.fail_before_start(job, failure, Some(&dir));
            return None;
        }

        match self.executor.spawn(record, gpu, output) {
            Ok(child) => {
                tracing::info!(
                    "Starting job {} on GPU {}: {}",
                    index,
                    gpu,
                    record.command.join(" ")
                );
                debug_assert!(self.slots[slot].is_idle());
                self.slots[slot].running = Some(RunningJob { job, dir });
                self.events.push(SlotEvent::Started { index, gpu });
                Some(child)
            }
            Err(e) => {
                self.fail_before_start(job, JobFailure::Spawn(e.to_string()), Some(&dir));
                None
            }
        }
    }

    fn fail_before_start(&mut self, job: usize, failure: JobFailure, dir: Option<&RunDirectory>) {
        let record = &mut self.jobs[job];
        tracing::warn!("Job {} could not start: {}", record.index, failure);
        record.try_transition(JobStatus::Failed(failure));
        if let Some(dir) = dir {
            record.dir = Some(dir.path().to_path_buf());
            if let Err(e) = dir.write_end(record) {
                tracing::warn!("Failed to write metadata for job {}: {}", record.index, e);
            }
        }
    }

    fn reap(&mut self, reaped: Reaped) {
        let slot = &mut self.slots[reaped.slot];
        let gpu = slot.gpu;
        let Some(RunningJob { job, dir }) = slot.running.take() else {
            tracing::error!("GPU {} reported a finished job but was idle", gpu);
            return;
        };

        let status = if reaped.interrupted {
            JobStatus::Failed(JobFailure::Interrupted)
        } else {
            match reaped.status {
                Ok(exit) => status_from_exit(exit),
                Err(e) => JobStatus::Failed(JobFailure::Wait(e.to_string())),
            }
        };

        let record = &mut self.jobs[job];
        record.try_transition(status.clone());
        match &record.status {
            JobStatus::Failed(failure) => tracing::warn!(
                "Job {} on GPU {} failed: {} (see {})",
                record.index,
                gpu,
                failure,
                dir.stderr_path().display()
            ),
            _ => tracing::info!("Finished job {} on GPU {}", record.index, gpu),
        }

        if let Err(e) = dir.write_end(record) {
            tracing::warn!("Failed to write metadata for job {}: {}", record.index, e);
        }

        tracing::debug!("GPU {} is idle", gpu);
        self.events.push(SlotEvent::Finished {
            index: record.index,
            gpu,
            status,
        });
    }
}

fn status_from_exit(exit: ExitStatus) -> JobStatus {
    if exit.success() {
        JobStatus::Succeeded
    } else {
        match exit.code() {
            Some(code) => JobStatus::Failed(JobFailure::Exited(code)),
            None => JobStatus::Failed(JobFailure::Signaled),
        }
    }
}

/// Wait for `child`; if a stop is requested first, terminate it and give it
/// `grace` to exit before killing it.
async fn supervise(
    mut child: Child,
    slot: usize,
    mut stop: watch::Receiver<bool>,
    grace: Duration,
) -> Reaped {
    tokio::select! {
        status = child.wait() => Reaped { slot, status, interrupted: false },
        true = async { stop.wait_for(|stop| *stop).await.is_ok() } => {
            if let Err(e) = request_termination(&mut child) {
                tracing::warn!("Failed to send SIGTERM to job process: {}", e);
            }
            let status = match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!(
                        "Job process still alive {}s after SIGTERM, killing it",
                        grace.as_secs()
                    );
                    if let Err(e) = force_kill(&mut child) {
                        tracing::warn!("Failed to kill job process group: {}", e);
                    }
                    child.wait().await
                }
            };
            Reaped { slot, status, interrupted: true }
        }
    }
}

/// Builder for creating GpuScheduler instances with dependency injection
pub struct SchedulerBuilder {
    sweep_dir: SweepDirectory,
    gpus: Vec<GpuId>,
    executor: Option<Box<dyn Executor>>,
    interrupt_policy: InterruptPolicy,
    kill_grace: Duration,
}

impl SchedulerBuilder {
    pub fn new(sweep_dir: SweepDirectory) -> Self {
        Self {
            sweep_dir,
            gpus: Vec::new(),
            executor: None,
            interrupt_policy: InterruptPolicy::default(),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn with_gpus(mut self, gpus: Vec<GpuId>) -> Self {
        self.gpus = gpus;
        self
    }

    pub fn with_executor(mut self, executor: Box<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_interrupt_policy(mut self, policy: InterruptPolicy) -> Self {
        self.interrupt_policy = policy;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn build(self) -> Result<GpuScheduler, SweepError> {
        if self.gpus.is_empty() {
            return Err(SweepError::malformed("at least one GPU is required"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.gpus.iter().find(|gpu| !seen.insert(**gpu)) {
            return Err(SweepError::malformed(format!("GPU {dup} is listed twice")));
        }

        Ok(GpuScheduler {
            slots: self.gpus.into_iter().map(GpuSlot::new).collect(),
            pending: VecDeque::new(),
            jobs: Vec::new(),
            events: Vec::new(),
            executor: self
                .executor
                .unwrap_or_else(|| Box::new(ProcessExecutor::default()) as Box<dyn Executor>),
            sweep_dir: self.sweep_dir,
            interrupt_policy: self.interrupt_policy,
            kill_grace: self.kill_grace,
        })
    }
}
