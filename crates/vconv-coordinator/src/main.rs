//! Coordinator binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vconv_coordinator::probe::FfprobeProbe;
use vconv_coordinator::services::{LivenessMonitor, Scanner};
use vconv_coordinator::{create_router, metrics, AppState, CoordinatorConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON when requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vconv=debug"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("starting vconv-coordinator");

    let config_file = std::env::var("VCONV_CONFIG").unwrap_or_else(|_| "config".to_string());
    let config = match CoordinatorConfig::load(&config_file) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    // Misconfigured roots are fatal before anything else starts
    let roots = match config.usable_scan_roots() {
        Ok(roots) => roots,
        Err(e) => {
            error!(error = %e, "invalid scan configuration");
            std::process::exit(1);
        }
    };
    info!(
        roots = ?roots.iter().map(|r| r.display().to_string()).collect::<Vec<_>>(),
        "scan roots"
    );

    let state = match AppState::new(config.clone()).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to initialize application state");
            std::process::exit(1);
        }
    };

    let metrics_handle = if config.metrics.enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics())
    } else {
        None
    };

    // Liveness sweeps
    let monitor = Arc::new(LivenessMonitor::new(
        state.catalog.clone(),
        state.events.clone(),
        config.heartbeat_timeout(),
        config.task_stall_timeout(),
        config.sweep_interval(),
    ));
    monitor.spawn();

    // Scanner: optional startup pass, then hourly at minute 5
    let scanner = Arc::new(Scanner::new(
        state.catalog.clone(),
        Arc::new(FfprobeProbe::new()),
        roots,
    ));
    if config.scheduler.scan_on_startup {
        let startup_scanner = Arc::clone(&scanner);
        tokio::spawn(async move {
            if let Err(e) = startup_scanner.scan().await {
                error!(error = %e, "startup scan failed");
            }
        });
    }
    tokio::spawn(Scanner::run_scheduled(Arc::clone(&scanner)));

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = match config.bind_address().parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, address = %config.bind_address(), "invalid bind address");
            std::process::exit(1);
        }
    };
    info!(%addr, "listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("coordinator shutdown complete");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    info!("received shutdown signal");
}
