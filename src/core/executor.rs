use crate::core::job::JobRecord;
use crate::core::GpuId;
use std::fs::File;
use std::io;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Environment variable that restricts CUDA to the assigned device.
pub const DEFAULT_GPU_ENV_VAR: &str = "CUDA_VISIBLE_DEVICES";
/// Exported to every job: its private run directory.
pub const RUN_DIR_ENV_VAR: &str = "GSWEEP_RUN_DIR";
/// Exported to every job: its 1-based index in the sweep.
pub const RUN_INDEX_ENV_VAR: &str = "GSWEEP_RUN_INDEX";

/// Where a job's output goes.
pub struct JobOutput {
    pub stdout: File,
    pub stderr: File,
}

/// Starts the process for a job that has been given a GPU slot.
pub trait Executor: Send + Sync {
    fn spawn(&self, job: &JobRecord, gpu: GpuId, output: JobOutput) -> io::Result<Child>;
}

/// Runs the job's argv as a child process pinned to one GPU.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    gpu_env_var: String,
}

impl ProcessExecutor {
    pub fn new(gpu_env_var: impl Into<String>) -> Self {
        Self {
            gpu_env_var: gpu_env_var.into(),
        }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_GPU_ENV_VAR)
    }
}

impl Executor for ProcessExecutor {
    fn spawn(&self, job: &JobRecord, gpu: GpuId, output: JobOutput) -> io::Result<Child> {
        let (program, args) = job
            .command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        let mut command = std::process::Command::new(program);
        command
            .args(args)
            .env(&self.gpu_env_var, gpu.to_string())
            .env(RUN_INDEX_ENV_VAR, job.index.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(output.stdout))
            .stderr(Stdio::from(output.stderr));

        if let Some(dir) = &job.dir {
            command.env(RUN_DIR_ENV_VAR, dir);
        }

        // Own process group: a terminal Ctrl-C reaches only gsweep, which then
        // applies the configured interrupt policy to its children.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        Command::from(command).kill_on_drop(true).spawn()
    }
}

/// Ask a child to stop (SIGTERM to its process group on unix, hard kill
/// elsewhere).
pub fn request_termination(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        signal_group(child, libc::SIGTERM)
    }
    #[cfg(not(unix))]
    {
        child.start_kill()
    }
}

/// Kill a child and every process left in its group.
pub fn force_kill(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        signal_group(child, libc::SIGKILL)
    }
    #[cfg(not(unix))]
    {
        child.start_kill()
    }
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: libc::c_int) -> io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped
        return Ok(());
    };
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // The child leads its own group, so this also reaches its descendants.
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::Assignment;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn output_in(dir: &std::path::Path) -> JobOutput {
        JobOutput {
            stdout: File::create(dir.join("out")).unwrap(),
            stderr: File::create(dir.join("err")).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_spawn_exports_gpu_and_run_env() {
        let temp = tempdir().unwrap();
        let mut job = JobRecord::new(
            7,
            vec![
                "sh".into(),
                "-c".into(),
                "echo $CUDA_VISIBLE_DEVICES $GSWEEP_RUN_INDEX $GSWEEP_RUN_DIR; echo warn >&2"
                    .into(),
            ],
            Assignment::default(),
        );
        job.dir = Some(PathBuf::from("/tmp/run_7"));

        let mut child = ProcessExecutor::default()
            .spawn(&job, 3, output_in(temp.path()))
            .unwrap();
        assert!(child.wait().await.unwrap().success());

        let out = std::fs::read_to_string(temp.path().join("out")).unwrap();
        assert_eq!(out.trim(), "3 7 /tmp/run_7");
        let err = std::fs::read_to_string(temp.path().join("err")).unwrap();
        assert_eq!(err.trim(), "warn");
    }

    #[tokio::test]
    async fn test_custom_gpu_env_var() {
        let temp = tempdir().unwrap();
        let job = JobRecord::new(
            1,
            vec!["sh".into(), "-c".into(), "echo $HIP_VISIBLE_DEVICES".into()],
            Assignment::default(),
        );
        let mut child = ProcessExecutor::new("HIP_VISIBLE_DEVICES")
            .spawn(&job, 5, output_in(temp.path()))
            .unwrap();
        child.wait().await.unwrap();
        let out = std::fs::read_to_string(temp.path().join("out")).unwrap();
        assert_eq!(out.trim(), "5");
    }

    #[tokio::test]
    async fn test_spawn_missing_program_fails() {
        let temp = tempdir().unwrap();
        let job = JobRecord::new(
            1,
            vec!["/definitely/not/a/real/program".into()],
            Assignment::default(),
        );
        assert!(ProcessExecutor::default()
            .spawn(&job, 0, output_in(temp.path()))
            .is_err());
    }

    #[tokio::test]
    async fn test_spawn_empty_command_fails() {
        let temp = tempdir().unwrap();
        let job = JobRecord::new(1, vec![], Assignment::default());
        let err = ProcessExecutor::default()
            .spawn(&job, 0, output_in(temp.path()))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_request_termination_stops_child() {
        use std::os::unix::process::ExitStatusExt;

        let temp = tempdir().unwrap();
        let job = JobRecord::new(
            1,
            vec!["sleep".into(), "30".into()],
            Assignment::default(),
        );
        let mut child = ProcessExecutor::default()
            .spawn(&job, 0, output_in(temp.path()))
            .unwrap();
        request_termination(&mut child).unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(status.signal(), Some(libc::SIGTERM));
    }

    /// True while `pid` exists and is not a zombie.
    #[cfg(target_os = "linux")]
    fn is_alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            // state is the first field after the parenthesised command name
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_force_kill_reaches_descendants_ignoring_sigterm() {
        use std::os::unix::process::ExitStatusExt;
        use std::time::Duration;

        let temp = tempdir().unwrap();
        // A worker that shrugs off SIGTERM, like a stuck data loader.
        let job = JobRecord::new(
            1,
            vec![
                "sh".into(),
                "-c".into(),
                "trap '' TERM; sleep 30 & echo $!; wait".into(),
            ],
            Assignment::default(),
        );
        let mut child = ProcessExecutor::default()
            .spawn(&job, 0, output_in(temp.path()))
            .unwrap();

        let out = temp.path().join("out");
        let mut worker = None;
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(&out) {
                if let Ok(pid) = text.trim().parse::<u32>() {
                    worker = Some(pid);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let worker = worker.expect("worker pid was never printed");
        assert!(is_alive(worker));

        force_kill(&mut child).unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));

        let mut gone = false;
        for _ in 0..100 {
            if !is_alive(worker) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "worker {worker} outlived its group");
    }
}
