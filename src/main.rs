//! Multi-Robot Map Fusion Service
//!
//! Ingests per-robot occupancy maps, aligns them into a shared world frame,
//! and maintains a consensus unified map streamed to subscribers over
//! WebSocket. Calibration re-runs whenever a robot docks.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod align;
mod calibration;
mod config;
mod controller;
mod decode;
mod errors;
mod geometry;
mod mapmodel;
mod models;
mod tracker;
mod transport;
mod unify;
mod vectorizer;

use config::Config;
use controller::{CalibrationController, RetryPolicy};
use tracker::StateTracker;
use transport::{DockCommand, HttpMapFetcher, WebSocketServer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "mapfusion_core=info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("starting multi-robot map fusion service");

    let config = Config::load();
    info!(ws_port = config.ws_port, "configuration loaded");

    let tracker = Arc::new(StateTracker::new_with_cache(&config.unified_map_cache_path).unwrap_or_else(|e| {
        error!(error = %e, "failed to load cached unified map, starting empty");
        StateTracker::new()
    }));

    let fetcher = HttpMapFetcher::new("http://127.0.0.1:8090");
    let controller = Arc::new(CalibrationController::new(
        tracker.clone(),
        config.calibration_cache_path.clone(),
        fetcher,
        RetryPolicy::default(),
    ));

    let (map_tx, _rx) = broadcast::channel(16);
    let map_tx = Arc::new(map_tx);
    let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel::<DockCommand>();
    let cmd_tx = Arc::new(cmd_tx);

    let dispatch_tracker = tracker.clone();
    let dispatch_map_tx = map_tx.clone();
    let dispatch_handle = tokio::spawn(async move {
        let mut known_maps = std::collections::HashMap::new();
        while let Some(cmd) = cmd_rx.recv().await {
            let now = current_unix_time();
            if let Err(e) = controller.on_robot_docked(&cmd.vacuum_id, None, &mut known_maps, now).await {
                error!(vacuum_id = %cmd.vacuum_id, error = %e, "docking calibration flow failed");
                continue;
            }
            if let Some(unified) = dispatch_tracker.get_unified_map().await {
                let _ = dispatch_map_tx.send(unified);
            }
        }
    });

    let server = WebSocketServer::new(config.ws_port, map_tx.clone(), cmd_tx.clone());
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("websocket server error: {}", e);
        }
    });

    info!(port = config.ws_port, "unified map feed listening");

    tokio::select! {
        result = dispatch_handle => {
            if let Err(e) = result {
                error!("dispatch task panicked: {}", e);
            }
        }
        result = server_handle => {
            if let Err(e) = result {
                error!("server task panicked: {}", e);
            }
        }
    }

    info!("shutting down gracefully");
    Ok(())
}

fn current_unix_time() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
