//! Opsflow CLI and REST API entry point.
//!
//! Binary name: `opsflow`
//!
//! Parses CLI arguments, initializes database and services, then dispatches
//! to the appropriate command handler or starts the REST API server together
//! with the schedule/resume poller.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands};
use opsflow_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
use state::{AppState, LaunchMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,opsflow=debug",
        _ => "trace",
    };
    let (log_json, otel) = match &cli.command {
        Commands::Serve { log_json, otel, .. } => (*log_json, *otel),
        _ => (false, false),
    };
    init_tracing(&TracingOptions {
        default_filter: filter.to_string(),
        json: log_json,
        otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "opsflow", &mut std::io::stdout());
        return Ok(());
    }

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { port, host, .. } => serve(host, port).await,

        Commands::Workflow { action } => {
            let state = AppState::init(LaunchMode::Inline).await?;
            cli::workflow::handle_workflow_command(action, &state, cli.json).await
        }

        Commands::Dispatch { file } => {
            let state = AppState::init(LaunchMode::Inline).await?;
            cli::dispatch::handle_dispatch(&file, &state, cli.json).await
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }
}

async fn serve(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let state = AppState::init(LaunchMode::Background).await?;
    tracing::info!(data_dir = %state.data_dir.display(), "opsflow starting");

    // Runs left running or pending by a previous process.
    let recovered = state.poller.recover_interrupted().await?;
    if recovered > 0 {
        tracing::info!(recovered, "relaunched interrupted runs");
    }

    let shutdown = CancellationToken::new();
    let poller = tokio::spawn(state.poller.clone().run(shutdown.clone()));
    let logger = tokio::spawn(log_engine_events(state.clone(), shutdown.clone()));

    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!(
        "  {} Opsflow API listening on {}",
        console::style("⚡").bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let router = http::router::build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    let _ = tokio::join!(poller, logger);
    println!("\n  Server stopped.");
    Ok(())
}

/// Mirror engine lifecycle events into the log.
async fn log_engine_events(state: AppState, shutdown: CancellationToken) {
    let mut events = state.event_bus.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = events.recv() => match received {
                Ok(event) => tracing::debug!(run_id = %event.run_id(), ?event, "engine event"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "engine event log fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
