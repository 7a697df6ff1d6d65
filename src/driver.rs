//! Turns one command line into a sweep: plan it, then either list it or run it.

use crate::config::SweepConfig;
use crate::core::command::{display_command, CommandBuilder};
use crate::core::error::{SweepError, EXIT_INTERRUPTED, EXIT_JOB_FAILURE};
use crate::core::executor::ProcessExecutor;
use crate::core::gpu::warn_on_unknown_gpus;
use crate::core::grid::{ArgumentGrid, MAX_GRID_SIZE};
use crate::core::job::{JobRecord, JobStatus};
use crate::core::run_dir::{SweepDirectory, SweepMetadata};
use crate::core::scheduler::{InterruptPolicy, SchedulerBuilder};
use crate::core::GpuId;
use crate::utils::{format_elapsed, parse_gpu_indices};
use serde::Serialize;
use std::path::PathBuf;
use tabled::{settings::Style, Table, Tabled};
use tokio::sync::mpsc;

const RULE_WIDTH: usize = 50;

/// Everything the operator asked for on the command line.
#[derive(Debug, Clone, Default)]
pub struct SweepRequest {
    pub script: String,
    pub args: Vec<String>,
    pub gpus: Option<String>,
    pub dry_run: bool,
    pub output_dir: Option<PathBuf>,
    pub launcher: Option<String>,
    pub on_interrupt: Option<InterruptPolicy>,
}

/// The expanded grid, rendered but not yet run.
#[derive(Debug, Clone)]
pub struct SweepPlan {
    pub builder: CommandBuilder,
    pub jobs: Vec<JobRecord>,
}

impl SweepPlan {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn commands(&self) -> impl Iterator<Item = &[String]> {
        self.jobs.iter().map(|job| job.command.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedJob {
    pub index: usize,
    pub dir: Option<PathBuf>,
    pub reason: String,
}

/// Final tally of a live sweep, persisted as `summary.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedJob>,
    /// Jobs never dispatched because the sweep was interrupted
    pub pending: Vec<usize>,
    pub directories: usize,
    pub interrupted: bool,
}

impl SweepSummary {
    pub fn from_jobs(jobs: &[JobRecord], interrupted: bool) -> Self {
        let failed = jobs
            .iter()
            .filter_map(|job| {
                job.failure().map(|failure| FailedJob {
                    index: job.index,
                    dir: job.dir.clone(),
                    reason: failure.to_string(),
                })
            })
            .collect();

        Self {
            total: jobs.len(),
            succeeded: jobs
                .iter()
                .filter(|job| job.status == JobStatus::Succeeded)
                .count(),
            failed,
            pending: jobs
                .iter()
                .filter(|job| !job.status.is_terminal())
                .map(|job| job.index)
                .collect(),
            directories: jobs.iter().filter(|job| job.dir.is_some()).count(),
            interrupted,
        }
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failed.iter().map(|job| job.index).collect()
    }

    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if !self.failed.is_empty() {
            EXIT_JOB_FAILURE
        } else {
            0
        }
    }
}

/// Result of a live sweep.
#[derive(Debug)]
pub struct SweepReport {
    pub sweep_dir: SweepDirectory,
    pub jobs: Vec<JobRecord>,
    pub summary: SweepSummary,
}

pub struct SweepDriver {
    request: SweepRequest,
    config: SweepConfig,
}

impl SweepDriver {
    pub fn new(request: SweepRequest, config: SweepConfig) -> Self {
        Self { request, config }
    }

    pub fn request(&self) -> &SweepRequest {
        &self.request
    }

    /// Parse and expand the grid and render every command. Touches nothing
    /// on disk. Grids beyond [`MAX_GRID_SIZE`] points are rejected before
    /// anything is expanded.
    pub fn plan(&self) -> Result<SweepPlan, SweepError> {
        let grid = ArgumentGrid::parse(&self.request.args)?;
        match grid.grid_size() {
            Some(size) if size <= MAX_GRID_SIZE => {}
            size => {
                let size = size.map_or_else(|| "too many".to_string(), |n| n.to_string());
                return Err(SweepError::malformed(format!(
                    "parameter grid has {size} points, more than the limit of {MAX_GRID_SIZE}"
                )));
            }
        }
        let builder = CommandBuilder::for_script(
            &self.request.script,
            self.request.launcher.as_deref(),
            &self.config.python,
        );

        let jobs = grid
            .expand()
            .into_iter()
            .enumerate()
            .map(|(i, assignment)| {
                let command = builder.build(&assignment);
                JobRecord::new(i + 1, command, assignment)
            })
            .collect();

        Ok(SweepPlan { builder, jobs })
    }

    /// `--gpus` if given, else the configured pool.
    pub fn resolve_gpus(&self) -> Result<Vec<GpuId>, SweepError> {
        if let Some(gpus) = &self.request.gpus {
            return parse_gpu_indices(gpus);
        }
        match &self.config.gpus {
            Some(gpus) if !gpus.is_empty() => Ok(gpus.clone()),
            _ => Err(SweepError::malformed(
                "--gpus is required unless sweep.gpus is configured",
            )),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.request
            .output_dir
            .clone()
            .unwrap_or_else(|| self.config.output_dir.clone())
    }

    pub fn interrupt_policy(&self) -> InterruptPolicy {
        self.request
            .on_interrupt
            .unwrap_or(self.config.on_interrupt)
    }

    pub fn create_sweep_dir(&self) -> Result<SweepDirectory, SweepError> {
        SweepDirectory::create(&self.output_dir())
    }

    /// Run every job of `plan` on `gpus` under `sweep_dir` until all of them
    /// finish or the operator interrupts through `interrupts`. The summary is
    /// written either way.
    pub async fn run(
        &self,
        plan: SweepPlan,
        sweep_dir: SweepDirectory,
        gpus: Vec<GpuId>,
        interrupts: mpsc::Receiver<()>,
    ) -> Result<SweepReport, SweepError> {
        warn_on_unknown_gpus(&gpus);

        sweep_dir.write_sweep_metadata(&SweepMetadata {
            script: plan.builder.script().to_string(),
            launcher: plan.builder.launcher().to_vec(),
            args: self.request.args.clone(),
            gpus: gpus.clone(),
            sweep_dir: sweep_dir.root().to_path_buf(),
            job_count: plan.len(),
            timestamp: sweep_dir.timestamp().to_string(),
            token: sweep_dir.token().to_string(),
        })?;

        let mut scheduler = SchedulerBuilder::new(sweep_dir.clone())
            .with_gpus(gpus)
            .with_executor(Box::new(ProcessExecutor::new(
                self.config.gpu_env_var.clone(),
            )))
            .with_interrupt_policy(self.interrupt_policy())
            .with_kill_grace(self.config.kill_grace())
            .build()?;

        tracing::info!(
            "Sweep directory: {} ({} jobs)",
            sweep_dir.root().display(),
            plan.len()
        );
        for job in plan.jobs {
            scheduler.submit(job);
        }

        let outcome = scheduler.run(interrupts).await;
        let jobs = scheduler.into_jobs();
        let summary = SweepSummary::from_jobs(&jobs, outcome.interrupted);
        sweep_dir.write_summary(&summary)?;

        Ok(SweepReport {
            sweep_dir,
            jobs,
            summary,
        })
    }
}

/// The dry-run listing: a rule, the job count, one numbered command per line,
/// and a closing rule.
pub fn render_dry_run(plan: &SweepPlan) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = format!("{rule}\n{} jobs to be run.\n\n", plan.len());
    for job in &plan.jobs {
        out.push_str(&format!("{}: {}\n", job.index, display_command(&job.command)));
    }
    out.push_str(&rule);
    out.push('\n');
    out
}

/// Per-job table followed by the totals line.
pub fn render_summary(report: &SweepReport) -> String {
    #[derive(Tabled)]
    struct JobRow {
        #[tabled(rename = "JOB")]
        index: usize,
        #[tabled(rename = "GPU")]
        gpu: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "ELAPSED")]
        elapsed: String,
        #[tabled(rename = "DIR")]
        dir: String,
    }

    let rows: Vec<JobRow> = report
        .jobs
        .iter()
        .map(|job| JobRow {
            index: job.index,
            gpu: job.gpu.map_or_else(|| "-".to_string(), |gpu| gpu.to_string()),
            status: match job.failure() {
                Some(failure) => format!("{} ({})", job.status, failure),
                None => job.status.to_string(),
            },
            elapsed: format_elapsed(job.elapsed()),
            dir: job
                .dir
                .as_ref()
                .map_or_else(|| "-".to_string(), |dir| dir.display().to_string()),
        })
        .collect();

    let summary = &report.summary;
    let mut out = Table::new(&rows).with(Style::empty()).to_string();
    out.push_str(&format!(
        "\n\n{} jobs: {} succeeded, {} failed",
        summary.total,
        summary.succeeded,
        summary.failed.len()
    ));
    if !summary.failed.is_empty() {
        out.push_str(&format!(" {:?}", summary.failed_indices()));
    }
    if summary.interrupted {
        out.push_str(&format!(
            ", {} not started (interrupted)",
            summary.pending.len()
        ));
    }
    out.push_str(&format!(
        "\n{} run directories under {}\n",
        summary.directories,
        report.sweep_dir.root().display()
    ));
    out
}
