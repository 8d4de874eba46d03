// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Tick orchestrator
//!
//! Each tick picks up any newly published configuration, snapshots the node
//! table and walks every peer through location update, geofence check and
//! stationary check, in that order. Transitions go through the throttle to
//! the radio sink and, unconditionally, to the event bus.

use std::collections::BTreeMap;
use std::sync::Arc;
use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{EventBus, Scheduler, Shutdown, StatusReport};
use crate::config::{ConfigSnapshot, SharedConfig};
use crate::detection::{GeofenceEngine, NodeEvent, StationaryEngine};
use crate::error::{EvalError, SinkError};
use crate::geo::Haversine;
use crate::nodes::{NodeState, NodeStore};
use crate::notify::{LedDevice, NotificationSink, NotificationThrottle, ProximityIndicator};

const STALE_CLEANUP: &str = "stale-cleanup";

/// Outcome of one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub nodes_evaluated: usize,
    pub events: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub closest_node_km: Option<f64>,
}

struct NodeOutcome {
    events: usize,
    dispatched: usize,
}

/// Owns the per-node engines and drives them on a fixed interval
pub struct Monitor {
    config: SharedConfig,
    applied: Arc<ConfigSnapshot>,
    nodes: NodeStore,
    bus: Arc<EventBus>,
    geo: Haversine,
    geofence: GeofenceEngine,
    stationary: StationaryEngine,
    throttle: NotificationThrottle,
    proximity: ProximityIndicator,
    scheduler: Scheduler,
    status_tx: watch::Sender<StatusReport>,
    status: StatusReport,
}

impl Monitor {
    pub fn new(
        config: SharedConfig,
        nodes: NodeStore,
        bus: Arc<EventBus>,
        sink: Arc<dyn NotificationSink>,
        led: Arc<dyn LedDevice>,
    ) -> Self {
        let applied = config.snapshot();
        let cfg = &applied.config;
        let geo = Haversine::new(cfg.earth_radius_km);

        let geofence = GeofenceEngine::new(cfg.geofences.clone(), geo);
        let stationary = StationaryEngine::new(
            cfg.stationary_time_threshold_secs,
            cfg.stationary_distance_threshold_km,
            cfg.history_capacity,
            geo,
        );
        let throttle = NotificationThrottle::new(sink, cfg.notification_cooldown_secs);
        let proximity = ProximityIndicator::new(led, cfg.led.clone());

        let status = StatusReport {
            config_generation: applied.generation,
            geofence_summary: geofence.summary(),
            ..StatusReport::default()
        };
        let (status_tx, _) = watch::channel(status.clone());

        Self {
            config,
            applied,
            nodes,
            bus,
            geo,
            geofence,
            stationary,
            throttle,
            proximity,
            scheduler: Scheduler::new(),
            status_tx,
            status,
        }
    }

    /// Receiver for the status published after each tick
    pub fn subscribe_status(&self) -> watch::Receiver<StatusReport> {
        self.status_tx.subscribe()
    }

    pub fn geofence_summary(&self) -> BTreeMap<String, Vec<String>> {
        self.geofence.summary()
    }

    pub fn stationary_node_ids(&self) -> Vec<String> {
        self.stationary.stationary_nodes()
    }

    pub fn geofence(&self) -> &GeofenceEngine {
        &self.geofence
    }

    pub fn stationary(&self) -> &StationaryEngine {
        &self.stationary
    }

    /// Run ticks until shutdown; a failed tick backs off instead of stopping the loop
    pub async fn run(mut self, shutdown: Shutdown) -> Result<()> {
        info!("Starting periodic check loop...");

        if !shutdown.sleep(self.applied.config.startup_delay()).await {
            info!("Periodic check loop finished.");
            return Ok(());
        }

        while !shutdown.is_triggered() {
            let wait = match self.tick_at(Utc::now()) {
                Ok(report) => {
                    debug!(
                        "Tick: {} nodes, {} events, {} dispatched, {} failed",
                        report.nodes_evaluated, report.events, report.dispatched, report.failed
                    );
                    self.applied.config.check_interval()
                }
                Err(e) => {
                    error!("Error in periodic check loop: {:#}", e);
                    self.applied.config.error_backoff()
                }
            };

            if !shutdown.sleep(wait).await {
                break;
            }
        }

        info!("Periodic check loop finished.");
        Ok(())
    }

    /// One full evaluation cycle as of `now`
    ///
    /// Per-node faults are counted in the report. The tick itself fails only
    /// when the notification sink is closed, after state and status have been
    /// brought up to date.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickReport> {
        self.sync_config();
        let applied = Arc::clone(&self.applied);
        let cfg = &applied.config;

        if !self.scheduler.contains(STALE_CLEANUP) {
            self.scheduler
                .add_task(STALE_CLEANUP, cfg.stale_cleanup_interval(), now);
        }

        let local_id = cfg.local_node_id.as_deref();
        let local_position = local_id
            .and_then(|id| self.nodes.get(id))
            .and_then(|n| n.position);
        let peers = self.nodes.snapshot_excluding(local_id);

        let mut report = TickReport::default();
        let mut closed_sink = None;
        for node in &peers {
            match self.evaluate_node(node, now) {
                Ok(outcome) => {
                    report.events += outcome.events;
                    report.dispatched += outcome.dispatched;
                }
                Err(e) => {
                    error!("Error evaluating node {}: {}", node.id, e);
                    if let EvalError::Dispatch { source: SinkError::Closed(name), .. } = &e {
                        closed_sink = Some(*name);
                    }
                    report.failed += 1;
                }
            }
            report.nodes_evaluated += 1;

            if let Some(d) = self.geo.distance(local_position, node.position) {
                report.closest_node_km = Some(report.closest_node_km.map_or(d, |c| c.min(d)));
            }
        }

        match report.closest_node_km {
            Some(d) => debug!("Closest node is {:.3} km away", d),
            None => debug!("No nodes in range"),
        }

        if self.scheduler.take_due(STALE_CLEANUP, now) {
            self.run_cleanup(cfg.stale_max_age(), now);
        }

        self.publish_status(&report, now);

        // LED feedback is best effort
        if let Err(e) = self.proximity.update(report.closest_node_km) {
            warn!("Proximity feedback unavailable: {}", e);
        }

        if let Some(name) = closed_sink {
            bail!("notification sink '{}' is closed", name);
        }
        Ok(report)
    }

    /// Adopt a newly published configuration generation, if any
    fn sync_config(&mut self) {
        let snapshot = self.config.snapshot();
        if snapshot.generation == self.applied.generation {
            return;
        }
        let previous = Arc::clone(&self.applied);
        let (old, new) = (&previous.config, &snapshot.config);
        debug!("Config reload detected (generation {})", snapshot.generation);

        if new.earth_radius_km != old.earth_radius_km {
            self.geo = Haversine::new(new.earth_radius_km);
            self.geofence.set_geodesy(self.geo);
            self.stationary.set_geodesy(self.geo);
        }
        if new.check_interval_secs != old.check_interval_secs {
            info!("Check interval reloaded to {}s.", new.check_interval_secs);
        }
        self.stationary.set_thresholds(
            new.stationary_time_threshold_secs,
            new.stationary_distance_threshold_km,
        );
        if new.notification_cooldown_secs != old.notification_cooldown_secs {
            self.throttle.set_cooldown(new.notification_cooldown_secs);
        }
        self.proximity.set_config(new.led.clone());
        self.scheduler
            .set_interval(STALE_CLEANUP, new.stale_cleanup_interval());
        if new.geofences != old.geofences {
            self.geofence.reload(new.geofences.clone());
        }

        self.applied = snapshot;
    }

    fn evaluate_node(&mut self, node: &NodeState, now: DateTime<Utc>) -> Result<NodeOutcome, EvalError> {
        self.stationary.update_location(node);
        let mut events = self.geofence.check(node);
        let (_, stationary_event) = self.stationary.check_stationary(node);
        events.extend(stationary_event);

        let mut outcome = NodeOutcome {
            events: events.len(),
            dispatched: 0,
        };
        let mut failure = None;

        for event in &events {
            let dispatched = match self.route(event, now) {
                Ok(sent) => sent,
                Err(e) => {
                    failure.get_or_insert(e);
                    false
                }
            };
            if dispatched {
                outcome.dispatched += 1;
            }
            // The feed sees every transition, throttled or not
            self.bus.publish(event, dispatched, now);
        }

        match failure {
            Some(source) => Err(EvalError::Dispatch {
                node_id: node.id.clone(),
                source,
            }),
            None => Ok(outcome),
        }
    }

    fn route(&self, event: &NodeEvent, now: DateTime<Utc>) -> Result<bool, SinkError> {
        let key = event.notification_key();
        self.throttle.try_notify_at(&key, &event.to_string(), false, now)
    }

    fn run_cleanup(&mut self, max_age: Duration, now: DateTime<Utc>) {
        info!("Running stale node cleanup...");
        self.stationary.cleanup_stale(max_age, now);
        let pruned = self.nodes.prune_unseen(max_age, now);
        self.geofence.forget(&pruned);
    }

    fn publish_status(&mut self, report: &TickReport, now: DateTime<Utc>) {
        let status = &mut self.status;
        status.config_generation = self.applied.generation;
        status.ticks += 1;
        status.last_tick = Some(now);
        status.nodes_evaluated = report.nodes_evaluated;
        status.failed_nodes = report.failed;
        status.geofence_summary = self.geofence.summary();
        status.stationary_nodes = self.stationary.stationary_nodes();
        status.closest_node_km = report.closest_node_km;
        status.total_events += report.events as u64;
        status.total_dispatched += report.dispatched as u64;

        self.status_tx.send_replace(status.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, GeofenceDefinition, LedConfig};
    use crate::detection::EventKind;
    use crate::geo::GeoPoint;
    use crate::notify::proximity::{LogLedDevice, LED_CANDIDATE_KEYS};
    use crate::notify::ChannelSink;
    use parking_lot::Mutex;
    use std::time::Duration as StdDuration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
        reject_containing: Option<&'static str>,
    }

    impl NotificationSink for Recorder {
        fn deliver(&self, message: &str) -> Result<(), SinkError> {
            if let Some(pattern) = self.reject_containing {
                if message.contains(pattern) {
                    return Err(SinkError::Rejected {
                        key: "mesh".into(),
                        reason: "queue full".into(),
                    });
                }
            }
            self.sent.lock().push(message.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct DeadLed {
        writes: Mutex<usize>,
    }

    impl LedDevice for DeadLed {
        fn set_config(&self, key: &str, _value: u8) -> Result<(), SinkError> {
            *self.writes.lock() += 1;
            Err(SinkError::Rejected {
                key: key.to_string(),
                reason: "unsupported".into(),
            })
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn base_config() -> Config {
        Config {
            local_node_id: Some("!self".into()),
            startup_delay_secs: 0,
            geofences: vec![GeofenceDefinition::new("Base", 43.00, -79.00, 1.0)],
            ..Config::default()
        }
    }

    struct Harness {
        monitor: Monitor,
        config: SharedConfig,
        store: NodeStore,
        bus: Arc<EventBus>,
        sink: Arc<Recorder>,
    }

    fn harness(config: Config, sink: Recorder) -> Harness {
        let shared = SharedConfig::new(config).unwrap();
        let store = NodeStore::new();
        let bus = Arc::new(EventBus::default());
        let sink = Arc::new(sink);
        let monitor = Monitor::new(
            shared.clone(),
            store.clone(),
            bus.clone(),
            sink.clone(),
            Arc::new(LogLedDevice),
        );
        Harness {
            monitor,
            config: shared,
            store,
            bus,
            sink,
        }
    }

    fn report(store: &NodeStore, id: &str, lat: f64, lon: f64, secs: i64) {
        store.upsert_position(id, Some(GeoPoint::new(lat, lon)), None, t(secs));
    }

    #[test]
    fn test_tick_dispatches_and_feeds() {
        let mut h = harness(base_config(), Recorder::default());
        report(&h.store, "!a1b2c3d4", 43.0, -79.0, 0);

        let tick = h.monitor.tick_at(t(0)).unwrap();
        assert_eq!(tick.nodes_evaluated, 1);
        assert_eq!(tick.events, 1);
        assert_eq!(tick.dispatched, 1);

        let sent = h.sink.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("entered geofence 'Base'"));

        let feed = h.bus.recent(10);
        assert_eq!(feed.len(), 1);
        assert!(feed[0].dispatched);
        assert_eq!(h.monitor.geofence_summary()["Base"], vec!["!a1b2c3d4".to_string()]);
    }

    #[test]
    fn test_throttled_events_still_reach_feed() {
        let mut h = harness(base_config(), Recorder::default());

        report(&h.store, "!a1b2c3d4", 43.0, -79.0, 0);
        h.monitor.tick_at(t(0)).unwrap();
        report(&h.store, "!a1b2c3d4", 43.02, -79.0, 10);
        h.monitor.tick_at(t(10)).unwrap();
        report(&h.store, "!a1b2c3d4", 43.0, -79.0, 20);
        let tick = h.monitor.tick_at(t(20)).unwrap();

        // Second Enter falls inside the 60s cooldown of the first
        assert_eq!(tick.events, 1);
        assert_eq!(tick.dispatched, 0);
        assert_eq!(h.sink.sent.lock().len(), 2);

        let feed = h.bus.recent(10);
        assert_eq!(feed.len(), 3);
        assert_eq!(feed[0].kind, EventKind::GeofenceEnter);
        assert!(!feed[0].dispatched);
    }

    #[test]
    fn test_local_node_excluded_and_closest_reported() {
        let mut h = harness(base_config(), Recorder::default());
        report(&h.store, "!self", 43.0, -79.0, 0);
        report(&h.store, "!near", 43.02, -79.0, 0);
        report(&h.store, "!far", 44.0, -79.0, 0);
        h.store.touch("!silent", Some("No GPS"), t(0));

        let tick = h.monitor.tick_at(t(0)).unwrap();
        assert_eq!(tick.nodes_evaluated, 3);
        let closest = tick.closest_node_km.unwrap();
        assert!((closest - 2.224).abs() < 0.01, "got {closest}");

        let status = h.monitor.subscribe_status().borrow().clone();
        assert_eq!(status.ticks, 1);
        assert_eq!(status.closest_node_km, tick.closest_node_km);
        assert!(status.geofence_summary["Base"].is_empty());
    }

    #[test]
    fn test_no_local_position_means_no_closest() {
        let mut h = harness(base_config(), Recorder::default());
        report(&h.store, "!near", 43.0, -79.0, 0);
        assert_eq!(h.monitor.tick_at(t(0)).unwrap().closest_node_km, None);
    }

    #[test]
    fn test_dispatch_failure_is_isolated() {
        let sink = Recorder {
            reject_containing: Some("!bad"),
            ..Recorder::default()
        };
        let mut h = harness(base_config(), sink);
        report(&h.store, "!bad", 43.0, -79.0, 0);
        report(&h.store, "!good", 43.0, -79.0, 0);

        let tick = h.monitor.tick_at(t(0)).unwrap();
        assert_eq!(tick.failed, 1);
        assert_eq!(tick.dispatched, 1);
        assert_eq!(h.bus.recent(10).len(), 2);
        assert_eq!(h.monitor.geofence_summary()["Base"].len(), 2);
    }

    #[test]
    fn test_config_reload_swaps_fences_and_thresholds() {
        let mut h = harness(base_config(), Recorder::default());
        report(&h.store, "!a1b2c3d4", 43.0, -79.0, 0);
        h.monitor.tick_at(t(0)).unwrap();

        h.config
            .update(|c| {
                c.geofences = vec![
                    GeofenceDefinition::new("Base", 43.00, -79.00, 1.0),
                    GeofenceDefinition::new("Dock", 43.001, -79.0, 0.5),
                ];
                c.stationary_time_threshold_secs = 60;
                c.notification_cooldown_secs = 5;
            })
            .unwrap();

        report(&h.store, "!a1b2c3d4", 43.0, -79.0, 10);
        let tick = h.monitor.tick_at(t(10)).unwrap();
        // Membership was cleared by the reload, so both fences are entered
        assert_eq!(tick.events, 2);
        assert_eq!(h.monitor.throttle.cooldown(), Duration::seconds(5));
        assert_eq!(h.monitor.subscribe_status().borrow().config_generation, 2);

        // Unchanged generation: no further reload
        report(&h.store, "!a1b2c3d4", 43.0, -79.0, 20);
        assert_eq!(h.monitor.tick_at(t(20)).unwrap().events, 0);
    }

    #[test]
    fn test_stationary_through_ticks() {
        let mut h = harness(base_config(), Recorder::default());
        let mut started_at = None;

        for secs in (0..=400).step_by(10) {
            report(&h.store, "!park", 43.5, -79.5, secs);
            h.monitor.tick_at(t(secs)).unwrap();
            if started_at.is_none() && !h.monitor.stationary_node_ids().is_empty() {
                started_at = Some(secs);
            }
        }

        assert_eq!(started_at, Some(300));
        let starts = h
            .bus
            .recent(50)
            .iter()
            .filter(|e| e.kind == EventKind::StationaryStarted)
            .count();
        assert_eq!(starts, 1);
    }

    #[test]
    fn test_cleanup_sweeps_unseen_nodes() {
        let config = Config {
            stale_cleanup_interval_secs: 60,
            stale_max_age_secs: 100,
            ..base_config()
        };
        let mut h = harness(config, Recorder::default());
        report(&h.store, "!gone", 43.0, -79.0, 0);
        h.monitor.tick_at(t(0)).unwrap();
        assert_eq!(h.monitor.geofence_summary()["Base"].len(), 1);

        h.monitor.tick_at(t(200)).unwrap();
        assert!(h.store.get("!gone").is_none());
        assert!(h.monitor.stationary().history("!gone").is_none());
        assert!(h.monitor.geofence_summary()["Base"].is_empty());
    }

    #[test]
    fn test_led_failure_keeps_tick_healthy() {
        let config = Config {
            led: LedConfig {
                enabled: true,
                ..LedConfig::default()
            },
            ..base_config()
        };
        let store = NodeStore::new();
        report(&store, "!a1b2c3d4", 43.0, -79.0, 0);
        let sink = Arc::new(Recorder::default());
        let led = Arc::new(DeadLed::default());
        let mut monitor = Monitor::new(
            SharedConfig::new(config).unwrap(),
            store,
            Arc::new(EventBus::default()),
            sink.clone(),
            led.clone(),
        );

        for secs in 0..3 {
            let tick = monitor.tick_at(t(secs * 10)).unwrap();
            assert_eq!(tick.failed, 0);
        }
        assert_eq!(sink.sent.lock().len(), 1);
        // The rejected mode is probed once, not on every tick
        assert_eq!(*led.writes.lock(), LED_CANDIDATE_KEYS.len());
    }

    #[test]
    fn test_closed_sink_fails_tick_after_evaluation() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let store = NodeStore::new();
        report(&store, "!a1b2c3d4", 43.0, -79.0, 0);
        let mut monitor = Monitor::new(
            SharedConfig::new(base_config()).unwrap(),
            store,
            Arc::new(EventBus::default()),
            Arc::new(ChannelSink::new(tx)),
            Arc::new(LogLedDevice),
        );

        assert!(monitor.tick_at(t(0)).is_err());
        let status = monitor.subscribe_status().borrow().clone();
        assert_eq!(status.ticks, 1);
        assert_eq!(status.failed_nodes, 1);
        assert_eq!(status.geofence_summary["Base"], vec!["!a1b2c3d4".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_backs_off_then_resumes() {
        let config = Config {
            check_interval_secs: 60,
            error_backoff_secs: 5,
            ..base_config()
        };
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let store = NodeStore::new();
        report(&store, "!a1b2c3d4", 43.0, -79.0, 0);
        let monitor = Monitor::new(
            SharedConfig::new(config).unwrap(),
            store,
            Arc::new(EventBus::default()),
            Arc::new(ChannelSink::new(tx)),
            Arc::new(LogLedDevice),
        );
        let status = monitor.subscribe_status();
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(monitor.run(shutdown.clone()));

        tokio::time::sleep(StdDuration::from_secs(1)).await;
        assert_eq!(status.borrow().ticks, 1);
        assert_eq!(status.borrow().failed_nodes, 1);

        // Retried after the backoff, well before the check interval
        tokio::time::sleep(StdDuration::from_secs(5)).await;
        assert_eq!(status.borrow().ticks, 2);
        assert_eq!(status.borrow().failed_nodes, 0);

        // Healthy tick: back to the regular cadence
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        assert_eq!(status.borrow().ticks, 2);
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        assert_eq!(status.borrow().ticks, 3);
        assert!(!handle.is_finished());

        shutdown.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(base_config(), Recorder::default());
        report(&h.store, "!a1b2c3d4", 43.0, -79.0, 0);
        let mut status = h.monitor.subscribe_status();
        let shutdown = Shutdown::new();

        let handle = tokio::spawn(h.monitor.run(shutdown.clone()));
        tokio::time::timeout(StdDuration::from_secs(5), status.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.borrow().ticks, 1);

        shutdown.trigger();
        tokio::time::timeout(StdDuration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
