// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! MeshFence - node-state evaluation service
//!
//! Tracks every node heard on the mesh, announces geofence entries/exits and
//! stationary/moving transitions, and drives LED proximity feedback.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use meshfence::core::{EventBus, Monitor, Shutdown};
use meshfence::nodes::{run_position_worker, NodeStore};
use meshfence::notify::proximity::LogLedDevice;
use meshfence::notify::ChannelSink;
use meshfence::simulator::{demo_anchor, MeshSimulator, SimulatedGps, DEMO_LOCAL_ID};
use meshfence::{Config, SharedConfig, VERSION};

/// MeshFence - geofence and stationary alerts for mesh radio networks
#[derive(Parser, Debug, Clone)]
#[command(name = "meshfence")]
#[command(version = VERSION)]
#[command(about = "Geofence, stationary and proximity monitoring for mesh nodes")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Demo mode with a simulated mesh
    #[arg(long)]
    demo: bool,

    /// Seconds between evaluation ticks
    #[arg(long)]
    check_interval: Option<u64>,

    /// Id of this node, excluded from evaluation
    #[arg(long)]
    local_node: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if self.demo {
            config.demo_mode = true;
        }
        if let Some(secs) = self.check_interval {
            config.check_interval_secs = secs;
        }
        if let Some(id) = &self.local_node {
            config.local_node_id = Some(id.clone());
        }
        if config.demo_mode && config.local_node_id.is_none() {
            config.local_node_id = Some(DEMO_LOCAL_ID.to_string());
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("MeshFence v{} - node-state evaluation service", VERSION);

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;
    args.apply(&mut config);

    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", config.demo_mode);
    info!("Geofences: {}", config.geofences.len());

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args, config_path, config))
}

async fn run(args: Args, config_path: PathBuf, config: Config) -> Result<()> {
    let shared = SharedConfig::new(config.clone())?;
    let shutdown = Shutdown::new();
    let store = NodeStore::new();
    let bus = Arc::new(EventBus::default());

    // Outgoing mesh text; the radio link itself lives outside this service
    let (mesh_tx, mut mesh_rx) = mpsc::unbounded_channel::<String>();
    let mut handles = Vec::new();

    handles.push(tokio::spawn(async move {
        while let Some(message) = mesh_rx.recv().await {
            info!("Sending to mesh: {}", message);
        }
    }));

    let mut feed = bus.subscribe();
    let feed_shutdown = shutdown.clone();
    handles.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                entry = feed.recv() => match entry {
                    Ok(entry) => debug!(
                        "[feed #{}] {} (dispatched: {})",
                        entry.id, entry.message, entry.dispatched
                    ),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Feed logger lagged, skipped {} entries", n)
                    }
                    Err(_) => break,
                },
                _ = feed_shutdown.wait() => break,
            }
        }
    }));

    let monitor = Monitor::new(
        shared.clone(),
        store.clone(),
        bus.clone(),
        Arc::new(ChannelSink::new(mesh_tx)),
        Arc::new(LogLedDevice),
    );

    let mut status = monitor.subscribe_status();
    let status_shutdown = shutdown.clone();
    handles.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let report = status.borrow_and_update().clone();
                    match serde_json::to_string(&report) {
                        Ok(json) => debug!("Status: {}", json),
                        Err(e) => warn!("Failed to serialize status: {}", e),
                    }
                }
                _ = status_shutdown.wait() => break,
            }
        }
    }));

    if config.demo_mode {
        let anchor = demo_anchor(&config);
        let simulator = MeshSimulator::new(store.clone(), anchor, 6)?;
        handles.push(tokio::spawn(
            simulator.run(Duration::from_secs(5), shutdown.clone()),
        ));

        if let Some(local_id) = config.local_node_id.clone() {
            let gps = SimulatedGps::new(anchor)?;
            handles.push(tokio::spawn(run_position_worker(
                Box::new(gps),
                store.clone(),
                local_id,
                config.check_interval(),
                config.error_backoff(),
                shutdown.clone(),
            )));
        }
        info!("Simulated mesh started around {:.4}, {:.4}", anchor.latitude, anchor.longitude);
    }

    #[cfg(unix)]
    handles.push(tokio::spawn(reload_on_hangup(
        args,
        config_path,
        shared.clone(),
        shutdown.clone(),
    )));

    let monitor_handle = tokio::spawn(monitor.run(shutdown.clone()));

    info!("MeshFence running");
    info!("   Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, cleaning up...");
    shutdown.trigger();

    match monitor_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Monitor stopped with error: {:#}", e),
        Err(e) => error!("Monitor task failed: {}", e),
    }
    // Dropping the monitor closed the mesh channel, so the sender task ends too
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker task failed: {}", e);
        }
    }

    info!("MeshFence shutdown complete");
    Ok(())
}

/// Re-read the config file on SIGHUP and publish it as a new generation
#[cfg(unix)]
async fn reload_on_hangup(args: Args, path: PathBuf, shared: SharedConfig, shutdown: Shutdown) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Config reload on SIGHUP unavailable: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                info!("SIGHUP received, reloading {:?}", path);
                let result = Config::load(&path).and_then(|mut config| {
                    args.apply(&mut config);
                    shared.publish(config)
                });
                match result {
                    Ok(generation) => info!("Configuration generation {} active", generation),
                    Err(e) => error!("Config reload rejected, keeping current: {}", e),
                }
            }
            _ = shutdown.wait() => break,
        }
    }
}
