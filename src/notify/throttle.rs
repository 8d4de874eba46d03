// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Per-event cooldown gate in front of the notification sink

use std::collections::HashMap;
use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;

use super::NotificationSink;
use crate::config::span;
use crate::error::SinkError;

/// Drops repeats of the same event key inside the cooldown window
///
/// Keys throttle independently; a dropped message is gone, not queued.
pub struct NotificationThrottle {
    sink: Arc<dyn NotificationSink>,
    cooldown: Mutex<Duration>,
    // event key -> last successful dispatch
    ledger: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl NotificationThrottle {
    pub fn new(sink: Arc<dyn NotificationSink>, cooldown_secs: u64) -> Self {
        Self {
            sink,
            cooldown: Mutex::new(span(cooldown_secs)),
            ledger: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_cooldown(&self, cooldown_secs: u64) {
        *self.cooldown.lock() = span(cooldown_secs);
    }

    pub fn cooldown(&self) -> Duration {
        *self.cooldown.lock()
    }

    pub fn try_notify(&self, event_key: &str, message: &str, force: bool) -> Result<bool, SinkError> {
        self.try_notify_at(event_key, message, force, Utc::now())
    }

    /// Dispatch if the key is out of cooldown (or `force`), returning whether it went out
    pub fn try_notify_at(
        &self,
        event_key: &str,
        message: &str,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, SinkError> {
        let cooldown = self.cooldown();
        let mut ledger = self.ledger.lock();

        let allowed = force
            || ledger
                .get(event_key)
                .map_or(true, |last| now - *last > cooldown);

        if !allowed {
            debug!(
                "Notification cooldown active for event: {} - Message suppressed: {}",
                event_key, message
            );
            return Ok(false);
        }

        self.sink.deliver(message)?;
        ledger.insert(event_key.to_string(), now);
        Ok(true)
    }

    /// When `event_key` last went out, if ever
    pub fn last_dispatch(&self, event_key: &str) -> Option<DateTime<Utc>> {
        self.ledger.lock().get(event_key).copied()
    }
}
