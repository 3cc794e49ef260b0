use anyhow::Context;
use clap::Parser;
use tether::cli::Cli;
use tether::health;
use tether::process::{Supervisor, SupervisorOptions};
use tether::signals::ShutdownSignals;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&cli.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cli.load_config().context("invalid configuration")?;
    let options = SupervisorOptions::from_config(&config)?;
    let stop_signal = options.stop_signal;

    // Install handlers first so an early SIGTERM still reaches the worker
    let mut signals = ShutdownSignals::install()?;

    let supervisor = Supervisor::spawn(options);

    let (http_shutdown_tx, http_shutdown_rx) = oneshot::channel::<()>();
    let router = health::build_router(supervisor.reader(), config.http.static_dir.clone());
    let addr = config.listen_addr();
    let http = tokio::spawn(async move {
        let shutdown = async move {
            let _ = http_shutdown_rx.await;
        };
        // The worker stays supervised even without a health endpoint
        if let Err(e) = health::serve(&addr, router, shutdown).await {
            tracing::error!("Health endpoint unavailable: {}", e);
        }
    });

    supervisor.start()?;

    let received = signals.recv().await;
    tracing::info!(signal = received, "Received shutdown signal");

    let report = supervisor.shutdown(stop_signal).await;
    tracing::info!(
        outcome = ?report.outcome,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Supervisor stopped"
    );

    let _ = http_shutdown_tx.send(());
    let _ = http.await;

    Ok(())
}
