//! Flight Sync Server
//!
//! Leads a simulation loaded from a save file, or mirrors a remote lead,
//! depending on the data location argument. Ctrl-C exits.

use std::error::Error as _;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flight_sync::{
    config::{Cli, Role, SyncConfig},
    diagnostics::{log_git_info, log_stale_artifact_hint},
    network::{service_runtime, ServerConfig, StateLink, StateServer, StateService},
    runtime::{
        run_until_exit, ConsoleRenderer, ControlLoop, ExitKind, ExitStatus, LeadLoop, LoopError,
        MirrorLoop, SharedRenderer, ShutdownCoordinator, ShutdownSignal, TickScheduler,
    },
    sim::{FlightEngine, StateSnapshot},
    VERSION,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.default_log_filter());

    info!("Flight Sync Server v{}", VERSION);
    log_git_info();

    let config = match SyncConfig::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    match run(&config) {
        Ok(status) => {
            if let ExitStatus::Fatal { error, .. } = &status {
                report_fatal(error, &config);
            }
            ExitCode::from(status.code())
        }
        Err(e) => {
            error!("Startup failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Ignore error if already set.
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}

/// Set up the chosen loop and drive it to exit.
fn run(config: &SyncConfig) -> Result<ExitStatus> {
    let signal = ShutdownSignal::new();
    let workers = match config.role {
        Role::Lead { .. } => config.workers,
        Role::Mirror { .. } => 1,
    };
    let runtime = service_runtime(workers).context("failed to start worker pool")?;

    let interrupt = signal.clone();
    runtime.spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received");
                interrupt.trigger();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    let mut coordinator = ShutdownCoordinator::new();
    let renderer: Option<SharedRenderer> = if config.headless {
        None
    } else {
        let renderer: SharedRenderer = Arc::new(Mutex::new(ConsoleRenderer::stdin()));
        let graceful = renderer.clone();
        coordinator.register_graceful("renderer", move || graceful.lock().shutdown());
        let ungraceful = renderer.clone();
        coordinator.register_ungraceful("renderer", move || ungraceful.lock().ungraceful_shutdown());
        Some(renderer)
    };

    let scheduler = TickScheduler::from_frame_rate(config.frame_rate);
    let frame = scheduler.interval();

    let mut control: ControlLoop<FlightEngine, StateLink> = match &config.role {
        Role::Lead { save, port } => {
            info!("Loading save at {}", save.display());
            let engine = FlightEngine::from_save_file(save, frame)
                .with_context(|| format!("failed to load {}", save.display()))?;

            let service = StateService::new();
            let server_config = ServerConfig {
                bind_addr: SocketAddr::from(([0, 0, 0, 0], *port)),
                ..Default::default()
            };
            let server = Arc::new(
                runtime
                    .block_on(StateServer::bind(server_config, service.clone()))
                    .with_context(|| format!("failed to serve on port {port}"))?,
            );

            let running = server.clone();
            runtime.spawn(async move {
                if let Err(e) = running.run().await {
                    error!("State server stopped: {}", e);
                }
            });
            let stopping = server.clone();
            let stop = signal.clone();
            runtime.spawn(async move {
                stop.triggered().await;
                stopping.shutdown();
            });

            let graceful = server.clone();
            coordinator.register_graceful("state server", move || graceful.shutdown());
            coordinator.register_ungraceful("state server", move || server.shutdown());

            info!("Server running on port {}. Ctrl-C exits.", port);
            ControlLoop::Lead(LeadLoop::new(engine, service, renderer, scheduler))
        }
        Role::Mirror { endpoint } => {
            info!("Connecting to lead server {}", endpoint);
            let link = StateLink::connect(endpoint.clone(), config.connect_timeout)
                .with_context(|| format!("failed to connect to {endpoint}"))?;
            let engine = FlightEngine::new(StateSnapshot::default(), frame);

            match MirrorLoop::new(engine, link, renderer, scheduler, config.fetch_interval) {
                Ok(mirror) => ControlLoop::Mirror(mirror),
                Err(error) => {
                    coordinator.run_on_exit(ExitKind::Ungraceful);
                    return Ok(ExitStatus::Fatal { ticks: 0, error });
                }
            }
        }
    };

    let status = run_until_exit(&mut control, &signal, config.max_ticks, coordinator);

    // Let peers receive their shutdown notice.
    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(status)
}

fn report_fatal(error: &LoopError, config: &SyncConfig) {
    error!("Unexpected error, exiting: {}", error);
    let mut cause = error.source();
    while let Some(inner) = cause {
        error!("  caused by: {}", inner);
        cause = inner.source();
    }

    if error.is_schema_mismatch() {
        if let Some((source, artifact)) = &config.schema {
            log_stale_artifact_hint(source, artifact);
        }
    }
}
