//! `aquamon-cli` – headless AquaMon host.
//!
//! This binary wires the monitoring core together and keeps it running:
//!
//! 1. Loads `~/.aquamon/config.toml`, writing defaults on first run.
//! 2. Serves the map rendering surface over a local WebSocket.
//! 3. Runs the TelemetryIngestor against the configured push stream and
//!    REST backend, fanning readings out to the map and the alert notifier.
//! 4. Offers a small operator console (`/status`, `/background`, ...).
//! 5. Intercepts **Ctrl-C** and shuts the pipeline down gracefully.

mod config;
mod console;

use std::sync::Arc;

use aquamon_alerts::{AlertNotifier, LogGateway};
use aquamon_bridge::{EventBus, MessageBridge, SurfaceServer};
use aquamon_ingest::{HttpPullClient, TelemetryIngestor, WsPushSource};
use aquamon_map::MapBridgeAdapter;
use aquamon_runtime::{MonitorPipeline, init_tracing};
use aquamon_types::{AquaError, Event, EventPayload};
use colored::Colorize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // Installed before the Tokio runtime exists; see `init_tracing`.
    let _telemetry = init_tracing("aquamon");

    print_banner();

    let cfg = load_config();
    debug!(config = ?cfg, "effective configuration");

    // ── Shared shutdown signal ────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let ctrlc_tx = shutdown_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – initiating graceful shutdown …".yellow().bold());
        ctrlc_tx.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to stop the monitor");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cfg, shutdown_tx, shutdown_rx)) {
        println!("{}: {}", "Fatal".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(
    cfg: config::Config,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), AquaError> {
    let bus = EventBus::default();
    let (lifecycle_tx, lifecycle_rx) = watch::channel(cfg.host.lifecycle);

    // ── Map surface ───────────────────────────────────────────────────────
    let (bridge, link) = MessageBridge::new();
    let map = Arc::new(MapBridgeAdapter::new(bridge.clone()));
    map.attach(bus.clone());

    let surface_addr = cfg.surface.addr();
    let surface = tokio::spawn(async move {
        if let Err(e) = SurfaceServer::new(bridge, link).run(surface_addr).await {
            error!(error = %e, "map surface endpoint stopped");
        }
    });
    println!(
        "  Map surface on {}",
        format!("ws://{surface_addr}").bold()
    );

    // ── Alerts and pipeline ───────────────────────────────────────────────
    let alerts = Arc::new(AlertNotifier::new(
        cfg.alerts.clone(),
        Arc::new(LogGateway),
        lifecycle_rx.clone(),
        bus.clone(),
    ));
    let pipeline = Arc::new(MonitorPipeline::new(map, alerts));

    let follower = {
        let pipeline = pipeline.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { pipeline.follow_lifecycle(lifecycle_rx, shutdown).await })
    };
    let events = tokio::spawn(report_events(bus.subscribe_all(), shutdown_rx.clone()));

    // ── Ingestion ─────────────────────────────────────────────────────────
    let pull = HttpPullClient::new(
        cfg.api.base_url.clone(),
        cfg.api.timeout(),
        cfg.api.token(),
    )?;
    let push = WsPushSource::new(cfg.push.url.clone(), cfg.push.events());
    let mut ingestor = TelemetryIngestor::new(pull, push, bus, cfg.ingest_config());
    ingestor.add_sink(pipeline.clone());

    println!(
        "  Pulling from {}, streaming from {}",
        cfg.api.base_url.dimmed(),
        cfg.push.url.dimmed()
    );
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    let console = tokio::spawn(console::run(pipeline.clone(), lifecycle_tx, shutdown_tx));

    let stats = ingestor.run(shutdown_rx).await;

    surface.abort();
    console.abort();
    if let Err(e) = follower.await {
        debug!(error = %e, "lifecycle follower ended abnormally");
    }
    if let Err(e) = events.await {
        debug!(error = %e, "event reporter ended abnormally");
    }

    println!(
        "  {} {} forwarded, {} duplicates, {} dropped",
        "✓".green().bold(),
        stats.forwarded,
        stats.duplicates,
        stats.dropped
    );
    println!("{}", "  ✓ Exiting AquaMon.".green());
    Ok(())
}

/// Echo domain events that matter to an operator.
async fn report_events(mut rx: broadcast::Receiver<Event>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let event = tokio::select! {
            recv = rx.recv() => match recv {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event reporter lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        };
        match &event.payload {
            EventPayload::ConnectivityLost { attempts, reason } => println!(
                "\n  {} live data unavailable after {} attempts ({})",
                "⚠".yellow().bold(),
                attempts,
                reason
            ),
            EventPayload::ConnectivityRestored => {
                println!("\n  {} live data restored", "✓".green().bold())
            }
            EventPayload::FetchTimedOut { operation } => println!(
                "\n  {} {} timed out; it will be retried",
                "⚠".yellow().bold(),
                operation
            ),
            EventPayload::LocationSelected { location_id } => {
                info!(location_id = %location_id, "location selected on the map")
            }
            other => debug!(source = %event.source, payload = ?other, "domain event"),
        }
    }
}

fn load_config() -> config::Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___                    __  ___         "#.bold().cyan());
    println!("{}", r#"  / _ |___ ___ _____ _   /  |/  /__  ___  "#.bold().cyan());
    println!("{}", r#" / __ / _ `/ // / _ `/  / /|_/ / _ \/ _ \ "#.bold().cyan());
    println!("{}", r#"/_/ |_\_, /\_,_/\_,_/  /_/  /_/\___/_//_/ "#.bold().cyan());
    println!("{}", r#"       /_/                                "#.bold().cyan());
    println!();
    println!("  {} {}",
        "AquaMon".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Water quality monitoring host");
    println!();
}
