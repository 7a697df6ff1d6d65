use crate::core::error::SweepError;
use crate::core::GpuId;
use clap::builder::{
    styling::{AnsiColor, Effects},
    Styles,
};
use range_parser::parse;
use std::time::Duration;

/// Format duration for display in HH:MM:SS format.
///
/// Displays time with hours as the maximum unit (no days).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use gsweep::utils::format_duration;
///
/// assert_eq!(format_duration(Duration::from_secs(45)), "00:00:45");
/// assert_eq!(format_duration(Duration::from_secs(9045)), "02:30:45");
/// assert_eq!(format_duration(Duration::from_secs(90000)), "25:00:00");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Format an optional elapsed time, `-` when the job never started.
pub fn format_elapsed(elapsed: Option<Duration>) -> String {
    elapsed.map(format_duration).unwrap_or_else(|| "-".to_string())
}

/// Parse a GPU pool such as `"0,1"` or `"0-3,6"`.
///
/// Order is kept as given since it decides which slot fills first; repeated
/// indices collapse to their first occurrence.
///
/// # Examples
///
/// ```
/// use gsweep::utils::parse_gpu_indices;
///
/// assert_eq!(parse_gpu_indices("0").unwrap(), vec![0]);
/// assert_eq!(parse_gpu_indices("0,2,4").unwrap(), vec![0, 2, 4]);
/// assert_eq!(parse_gpu_indices("0-2").unwrap(), vec![0, 1, 2]);
/// assert_eq!(parse_gpu_indices("3,0-1").unwrap(), vec![3, 0, 1]);
/// ```
pub fn parse_gpu_indices(gpu_string: &str) -> Result<Vec<GpuId>, SweepError> {
    let trimmed = gpu_string.trim();
    if trimmed.is_empty() {
        return Err(SweepError::malformed("--gpus needs at least one GPU index"));
    }

    let parsed: Vec<GpuId> = parse::<GpuId>(trimmed).map_err(|e| {
        SweepError::malformed(format!("invalid GPU index or range '{gpu_string}': {e}"))
    })?;

    let mut pool = Vec::with_capacity(parsed.len());
    for gpu in parsed {
        if !pool.contains(&gpu) {
            pool.push(gpu);
        }
    }
    Ok(pool)
}

pub const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());
