// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Local position worker

use std::time::Duration;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info};

use super::NodeStore;
use crate::core::Shutdown;
use crate::geo::GeoPoint;

/// Anything that can produce a fix for the local node
#[async_trait]
pub trait PositionSource: Send {
    /// Short label for logs
    fn name(&self) -> &str;

    /// Latest fix, `None` while there is no lock
    async fn read_fix(&mut self) -> Result<Option<(GeoPoint, Option<i32>)>>;
}

/// Poll `source` and keep the local node's entry current until shutdown
pub async fn run_position_worker(
    mut source: Box<dyn PositionSource>,
    store: NodeStore,
    local_id: String,
    interval: Duration,
    error_backoff: Duration,
    shutdown: Shutdown,
) {
    info!("Starting position worker for {} from {}", local_id, source.name());

    while !shutdown.is_triggered() {
        let wait = match source.read_fix().await {
            Ok(Some((position, altitude))) => {
                store.set_local_position(&local_id, position, altitude, Utc::now());
                debug!(
                    "Local fix {:.5}, {:.5}",
                    position.latitude, position.longitude
                );
                interval
            }
            Ok(None) => {
                debug!("Waiting for fix from {}", source.name());
                interval
            }
            Err(e) => {
                error!("Position source {} failed: {:#}", source.name(), e);
                error_backoff
            }
        };

        if !shutdown.sleep(wait).await {
            break;
        }
    }

    info!("Position worker finished");
}
