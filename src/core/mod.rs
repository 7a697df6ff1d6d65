pub mod command;
pub mod error;
pub mod executor;
pub mod gpu;
pub mod grid;
pub mod job;
pub mod run_dir;
pub mod scheduler;

use std::path::PathBuf;

/// A CUDA device index.
pub type GpuId = u32;

const VERSION_MESSAGE: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_BUILD_TIMESTAMP"),
    ")",
);

pub fn version() -> &'static str {
    let author = clap::crate_authors!();

    Box::leak(Box::new(format!(
        "\
{VERSION_MESSAGE}
Authors: {author}"
    )))
}

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))
        .map(|p| p.join("gsweep"))
}

/// Short random token shared by every job of one sweep invocation.
pub fn random_sweep_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
