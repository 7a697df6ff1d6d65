use clap::{Args, Parser};
use clap_complete::Shell;
use gsweep::core::scheduler::InterruptPolicy;
use gsweep::core::version;
use gsweep::driver::SweepRequest;
use gsweep::utils::STYLES;
use std::path::PathBuf;

const COMPLETIONS_HELP: &str = "\
Examples:
  gsweep completions bash > ~/.local/share/bash-completion/completions/gsweep
  gsweep completions zsh > ~/.zfunc/_gsweep
  gsweep completions fish > ~/.config/fish/completions/gsweep.fish";

const AFTER_HELP: &str = "\
Examples:
  gsweep toy.py --args lr=0.01,0.1 n_layers=2,4,6 --dry_run
  gsweep toy.py --args lr=0.01,0.1 n_layers=2,4,6 --gpus 0,1
  gsweep train.sh --args seed=1,2,3 --gpus 0-3 --output_dir /scratch/sweeps";

#[derive(Debug, Parser)]
#[command(
    name = "gsweep",
    author,
    version = version(),
    about = "Launch a hyperparameter grid across a pool of GPUs, one job per device.",
    styles = STYLES,
    after_help = AFTER_HELP,
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
pub struct GSweep {
    /// Sub Commands
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub sweep: SweepArgs,

    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    #[arg(long, help = "Path to the config file")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub enum Commands {
    /// Generate tab-completion scripts for your shell
    #[command(after_help = COMPLETIONS_HELP, arg_required_else_help = true)]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Script to launch for every grid point
    #[arg(required = true, value_name = "SCRIPT")]
    pub script: Option<String>,

    /// Parameter grid, one `name=v1,v2,...` per parameter
    #[arg(long, required = true, num_args = 1.., value_name = "NAME=V1,V2")]
    pub args: Vec<String>,

    /// GPU pool, e.g. `0,1` or `0-3`
    #[arg(long, value_name = "GPUS")]
    pub gpus: Option<String>,

    /// Print the commands without running anything
    #[arg(long = "dry_run", alias = "dry-run")]
    pub dry_run: bool,

    /// Parent directory of the sweep directory [default: ./log]
    #[arg(long = "output_dir", alias = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Command placed before the script, e.g. "python -u"
    #[arg(long, value_name = "CMD", allow_hyphen_values = true)]
    pub launcher: Option<String>,

    /// What to do with running jobs on Ctrl-C [default: terminate]
    #[arg(long = "on_interrupt", alias = "on-interrupt", value_enum)]
    pub on_interrupt: Option<InterruptPolicy>,
}

impl SweepArgs {
    pub fn into_request(self) -> SweepRequest {
        SweepRequest {
            script: self.script.unwrap_or_default(),
            args: self.args,
            gpus: self.gpus,
            dry_run: self.dry_run,
            output_dir: self.output_dir,
            launcher: self.launcher,
            on_interrupt: self.on_interrupt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(argv: &[&str]) -> Result<GSweep, clap::Error> {
        GSweep::try_parse_from(std::iter::once("gsweep").chain(argv.iter().copied()))
    }

    #[test]
    fn test_cli_is_well_formed() {
        GSweep::command().debug_assert();
    }

    #[test]
    fn test_help_examples_plan_as_advertised() {
        use gsweep::config::SweepConfig;
        use gsweep::driver::SweepDriver;

        let expected_jobs = [6, 6, 3];
        let examples: Vec<&str> = AFTER_HELP
            .lines()
            .filter_map(|line| line.trim().strip_prefix("gsweep "))
            .collect();
        assert_eq!(examples.len(), expected_jobs.len());

        for (example, jobs) in examples.into_iter().zip(expected_jobs) {
            let argv: Vec<&str> = example.split_whitespace().collect();
            let request = parse(&argv).unwrap().sweep.into_request();
            let plan = SweepDriver::new(request, SweepConfig::default())
                .plan()
                .unwrap();
            assert_eq!(plan.len(), jobs, "{example}");
        }
    }

    #[test]
    fn test_parse_sweep() {
        let cli = parse(&[
            "toy.py",
            "--args",
            "lr=0.01,0.1",
            "n_layers=2,4,6",
            "--gpus",
            "0,1",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        let request = cli.sweep.into_request();
        assert_eq!(request.script, "toy.py");
        assert_eq!(request.args, vec!["lr=0.01,0.1", "n_layers=2,4,6"]);
        assert_eq!(request.gpus.as_deref(), Some("0,1"));
        assert!(!request.dry_run);
    }

    #[test]
    fn test_dry_run_spellings() {
        for flag in ["--dry_run", "--dry-run"] {
            let cli = parse(&["toy.py", "--args", "lr=1", flag]).unwrap();
            assert!(cli.sweep.dry_run);
        }
    }

    #[test]
    fn test_on_interrupt_values() {
        let cli = parse(&["toy.py", "--args", "lr=1", "--on_interrupt", "wait"]).unwrap();
        assert_eq!(cli.sweep.on_interrupt, Some(InterruptPolicy::Wait));
        assert!(parse(&["toy.py", "--args", "lr=1", "--on_interrupt", "later"]).is_err());
    }

    #[test]
    fn test_args_are_required() {
        assert!(parse(&["toy.py"]).is_err());
        assert!(parse(&["--args", "lr=1"]).is_err());
    }

    #[test]
    fn test_completions_needs_no_script() {
        let cli = parse(&["completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Completions { shell: Shell::Bash })
        ));
    }
}
