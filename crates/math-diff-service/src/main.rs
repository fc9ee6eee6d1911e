//! Math diff service.
//!
//! Run with: cargo run -p math-diff-service -- --service-id <id> --service-token <token>
//!
//! For every linked device, subscribes to its configured input topics and
//! publishes the difference between consecutive values.

mod cli;

use anyhow::Context;
use clap::Parser;
use math_diff_core::{Device, DiffDevice};
use math_diff_mqtt::ServiceClient;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::default().add_directive(cli.level_filter().into())),
        )
        .init();

    if let Err(e) = run(cli).await {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("Starting Math Diff Service");

    let options = cli.service_options()?;
    let diff_options = cli.diff_options();
    let factory = move || -> Box<dyn Device> { Box::new(DiffDevice::new(diff_options)) };

    let service = ServiceClient::start(options, factory)
        .await
        .context("Failed to start service client")?;
    tracing::info!("Started service");

    service
        .set_status("Starting")
        .await
        .context("Failed to publish service status")?;
    tracing::info!("Published service status");

    service
        .set_status("Started")
        .await
        .context("Failed to publish service status")?;
    tracing::info!("Published service status");

    let signal = shutdown_signal().await;
    tracing::info!("Received signal {signal}");
    tracing::warn!("Shutting down");

    if let Err(e) = service.set_status("Shutting down").await {
        tracing::error!("Failed to publish service status: {e}");
    } else {
        tracing::info!("Published service status");
    }

    service.stop().await;
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => "interrupt",
        () = terminate => "terminated",
    }
}
