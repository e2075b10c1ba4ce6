//! `waypoint`: registry and gateway in one process.

use std::process::ExitCode;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use waypoint_server::telemetry::{init_tracing, install_prometheus_recorder};
use waypoint_server::{Args, GatewayConfig, GatewayServer};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("failed to initialise logging: {err:#}");
        return ExitCode::FAILURE;
    }

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "waypoint exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> anyhow::Result<()> {
    let config = GatewayConfig::from_args(args)?;
    info!(
        routes = config.routing.routes.len(),
        heartbeat_interval_ms = config.registry.heartbeat_interval.as_millis() as u64,
        lease_ms = config.registry.lease_duration.as_millis() as u64,
        "configuration loaded"
    );

    let metrics = install_prometheus_recorder()?;
    let mut server = GatewayServer::new(config)?.with_metrics(metrics);
    let ports = server.start().await?;
    info!(
        gateway_port = ports.gateway,
        registry_port = ports.registry,
        version = env!("CARGO_PKG_VERSION"),
        "waypoint started"
    );
    server.serve(wait_for_shutdown()).await
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
