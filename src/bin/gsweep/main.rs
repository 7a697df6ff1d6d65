use clap::Parser;
use gsweep::core::error::{SweepError, EXIT_IO, EXIT_MALFORMED_ARGUMENT};
use std::process::ExitCode;

mod cli;
mod commands;

#[cfg(target_arch = "x86_64")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::GSweep::parse();

    match commands::handle(args).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(err) = err.downcast_ref::<SweepError>() {
        return err.exit_code();
    }
    if err.downcast_ref::<config::ConfigError>().is_some() {
        return EXIT_MALFORMED_ARGUMENT;
    }
    EXIT_IO
}
