use crate::core::get_config_dir;
use crate::core::scheduler::{InterruptPolicy, DEFAULT_KILL_GRACE};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SweepConfig {
    /// Parent directory for sweep roots
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// GPU pool used when `--gpus` is not given
    #[serde(default)]
    pub gpus: Option<Vec<u32>>,
    /// Variable that scopes each job to its device
    #[serde(default = "default_gpu_env_var")]
    pub gpu_env_var: String,
    /// Interpreter placed before `.py` scripts
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default)]
    pub on_interrupt: InterruptPolicy,
    /// Seconds between SIGTERM and SIGKILL on interrupt
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
}

impl SweepConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./log")
}

fn default_gpu_env_var() -> String {
    crate::core::executor::DEFAULT_GPU_ENV_VAR.to_string()
}

fn default_python() -> String {
    "python".to_string()
}

fn default_kill_grace_secs() -> u64 {
    DEFAULT_KILL_GRACE.as_secs()
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            gpus: None,
            gpu_env_var: default_gpu_env_var(),
            python: default_python(),
            on_interrupt: InterruptPolicy::default(),
            kill_grace_secs: default_kill_grace_secs(),
        }
    }
}

pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config, config::ConfigError> {
    let mut config_vec = vec![];

    // Default config file
    if let Ok(default_config_path) = get_config_dir().map(|d| d.join("gsweep.toml")) {
        if default_config_path.exists() {
            config_vec.push(default_config_path);
        }
    }

    // User-provided config file, layered on top of the default one
    if let Some(config_path) = config_path {
        if config_path.exists() {
            config_vec.push(config_path.clone());
        } else {
            eprintln!("Warning: Config file {config_path:?} not found.");
        }
    }

    load_from(&config_vec)
}

fn load_from(files: &[PathBuf]) -> Result<Config, config::ConfigError> {
    let settings = config::Config::builder();
    let settings = files.iter().fold(settings, |s, path| {
        s.add_source(config::File::from(path.as_path()))
    });

    settings
        .add_source(
            config::Environment::with_prefix("GSWEEP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("sweep.gpus"),
        )
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toml_file(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = load_from(&[]).unwrap();
        assert_eq!(config.sweep.output_dir, PathBuf::from("./log"));
        assert_eq!(config.sweep.gpus, None);
        assert_eq!(config.sweep.gpu_env_var, "CUDA_VISIBLE_DEVICES");
        assert_eq!(config.sweep.python, "python");
        assert_eq!(config.sweep.on_interrupt, InterruptPolicy::Terminate);
        assert_eq!(config.sweep.kill_grace(), Duration::from_secs(10));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = toml_file(
            r#"
[sweep]
output_dir = "/scratch/sweeps"
gpus = [0, 2, 3]
gpu_env_var = "HIP_VISIBLE_DEVICES"
python = "python3"
on_interrupt = "wait"
kill_grace_secs = 30
"#,
        );
        let config = load_from(&[file.path().to_path_buf()]).unwrap();
        assert_eq!(config.sweep.output_dir, PathBuf::from("/scratch/sweeps"));
        assert_eq!(config.sweep.gpus, Some(vec![0, 2, 3]));
        assert_eq!(config.sweep.gpu_env_var, "HIP_VISIBLE_DEVICES");
        assert_eq!(config.sweep.python, "python3");
        assert_eq!(config.sweep.on_interrupt, InterruptPolicy::Wait);
        assert_eq!(config.sweep.kill_grace_secs, 30);
    }

    #[test]
    fn test_invalid_interrupt_policy_is_rejected() {
        let file = toml_file("[sweep]\non_interrupt = \"explode\"\n");
        assert!(load_from(&[file.path().to_path_buf()]).is_err());
    }

    #[test]
    fn test_missing_user_file_falls_back() {
        let missing = PathBuf::from("/nonexistent/gsweep.toml");
        assert!(load_config(Some(&missing)).is_ok());
    }
}
