use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use fedrun_core::FedrunConfig;
use fedrun_plugin::PluginSlot;
use fedrun_scheduler::{EngineCommand, Scheduler, SchedulerEngine, SchedulerSettings};
use fedrun_store::StorageManager;
use tracing::{error, info, warn};

mod app;
mod http;
mod namespace;

use app::{AppState, Conditions};
use namespace::SessionNamespace;

/// On-device federated round scheduler.
#[derive(Debug, Parser)]
#[command(name = "fedrund", version)]
struct Args {
    /// Config file (default: $FEDRUN_CONFIG, then ~/.fedrun/fedrun.toml).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "fedrun_daemon=info,fedrun_scheduler=info,fedrun_store=info".into()
            }),
        )
        .init();

    // load config: --config > FEDRUN_CONFIG env > ~/.fedrun/fedrun.toml
    let args = Args::parse();
    let config_path = args.config.or_else(|| std::env::var("FEDRUN_CONFIG").ok());
    let config = FedrunConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        FedrunConfig::default()
    });

    let clients = config.client_configs();
    if clients.is_empty() {
        warn!("no clients configured; the scheduler will stay idle");
    }

    let conditions = Conditions::new();
    let monitor = Arc::new(conditions.monitor());
    let namespace = Arc::new(SessionNamespace::new());

    let storage = StorageManager::new(
        &config.storage.root,
        config.storage.file_name.clone(),
        config.storage.retention(),
        clients.iter().map(|c| c.name.clone()).collect(),
        namespace.clone(),
    );
    let plugin = if config.plugin.path.is_empty() {
        error!("plugin.path is not set; no rounds will run");
        PluginSlot::Failed
    } else {
        PluginSlot::from_path(&config.plugin.path)
    };
    let scheduler = Scheduler::new(
        monitor.clone(),
        storage,
        plugin,
        SchedulerSettings::from_config(&config),
    );
    let scheduler_stats = scheduler.stats();
    let (engine, handle) = SchedulerEngine::new(scheduler, clients);

    if let Some(initial) = config.scheduler.initial_namespace.as_deref() {
        namespace.set(initial);
        handle.try_send(EngineCommand::SessionStarted)?;
    }

    // scheduler engine: its own thread, so plugin rounds never block HTTP
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_thread = engine.spawn(shutdown_rx)?;

    let addr: SocketAddr = format!("{}:{}", config.daemon.bind, config.daemon.port).parse()?;
    let state = Arc::new(AppState::new(
        config,
        conditions,
        monitor,
        namespace,
        handle,
        scheduler_stats,
    ));
    let router = app::build_router(state);

    info!("fedrun daemon listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal scheduler to stop; a running round finishes first
    let _ = shutdown_tx.send(true);
    if tokio::task::spawn_blocking(move || engine_thread.join())
        .await?
        .is_err()
    {
        error!("scheduler engine thread panicked");
    }
    info!("fedrun daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
