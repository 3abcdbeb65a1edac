mod cli;
mod engine;
mod log_buffer;
mod logging;
mod model;
mod orchestrator;
mod projector;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let _guard = logging::init(args.log_file.as_deref(), &args.log_level)?;

    let res = cli::run(args).await;
    if let Err(e) = &res {
        tracing::error!(error = format!("{e:#}"), "session ended with an error");
    }
    res
}
