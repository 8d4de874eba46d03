// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Event bus feeding the display surface
//!
//! Every transition is published here whether or not the throttle let it out
//! over the radio. The bus keeps the most recent entries for late readers and
//! broadcasts each entry to live subscribers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::detection::{EventKind, NodeEvent};

/// Default number of feed entries retained for display
pub const DEFAULT_FEED_CAPACITY: usize = 50;

/// One line of the notification feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub node_id: String,
    pub fence: Option<String>,
    pub distance_km: Option<f64>,
    pub message: String,
    /// Whether the radio notification went out (false when throttled)
    pub dispatched: bool,
}

/// Central feed for transition events
pub struct EventBus {
    feed_tx: broadcast::Sender<FeedEntry>,
    recent: Mutex<VecDeque<FeedEntry>>,
    capacity: usize,
    event_counter: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (feed_tx, _) = broadcast::channel(capacity.max(16));

        Self {
            feed_tx,
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            event_counter: AtomicU64::new(0),
        }
    }

    /// Record a transition and fan it out to subscribers
    pub fn publish(&self, event: &NodeEvent, dispatched: bool, timestamp: DateTime<Utc>) -> FeedEntry {
        let entry = FeedEntry {
            id: self.event_counter.fetch_add(1, Ordering::Relaxed),
            timestamp,
            kind: event.kind(),
            node_id: event.node_id.clone(),
            fence: event.fence_name().map(str::to_string),
            distance_km: event.distance_km(),
            message: event.to_string(),
            dispatched,
        };

        {
            let mut recent = self.recent.lock();
            if recent.len() >= self.capacity {
                recent.pop_back();
            }
            recent.push_front(entry.clone());
        }

        // No subscribers is fine; the recent list still has it
        let _ = self.feed_tx.send(entry.clone());
        entry
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<FeedEntry> {
        self.recent.lock().iter().take(limit).cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEntry> {
        self.feed_tx.subscribe()
    }

    /// Entries published since startup
    pub fn published(&self) -> u64 {
        self.event_counter.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}
