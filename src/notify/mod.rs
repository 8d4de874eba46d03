// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Notification module - throttled radio notifications and LED feedback

mod throttle;
pub mod proximity;

pub use throttle::NotificationThrottle;
pub use proximity::{LedDevice, LedMode, ProximityIndicator};

use tokio::sync::mpsc;

use crate::error::SinkError;

/// Destination for notification text that passed the cooldown gate
///
/// Implementations must not block: the tick loop calls this inline.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, message: &str) -> Result<(), SinkError>;
}

/// Hands messages to a mesh-send worker over a channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl NotificationSink for ChannelSink {
    fn deliver(&self, message: &str) -> Result<(), SinkError> {
        self.tx
            .send(message.to_string())
            .map_err(|_| SinkError::Closed("mesh"))
    }
}
