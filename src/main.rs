use clap::Parser;
use log::debug;
use owo_colors::OwoColorize;
use std::backtrace::BacktraceStatus;
use std::process::ExitCode;

use entity_porter::cli::Cli;
use entity_porter::utils::error::Error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .init();

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            // captured only with RUST_BACKTRACE set
            if let Some(bt) = e.downcast_ref::<Error>().and_then(Error::backtrace) {
                if bt.status() == BacktraceStatus::Captured {
                    debug!("backtrace:\n{bt}");
                }
            }
            ExitCode::FAILURE
        }
    }
}
