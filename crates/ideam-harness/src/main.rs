//! Command line entry point of the IDEAM provisioning harness.

use std::process::ExitCode;

use clap::Parser;

use ideam_harness::cli::Cli;

use tokio_util::sync::CancellationToken;

use tracing::{error, warn};

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let cancellation_token = CancellationToken::new();
    let interrupt = cancellation_token.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted: stopping, registered devices are still deregistered");
            interrupt.cancel();
        }
    });

    match cli.run(cancellation_token).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
