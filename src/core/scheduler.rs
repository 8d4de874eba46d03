// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Task scheduler for timed operations driven from the tick loop

use std::collections::HashMap;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

struct ScheduledTask {
    interval: Duration,
    last_run: DateTime<Utc>,
}

/// Tracks named periodic jobs independently of the tick cadence
#[derive(Default)]
pub struct Scheduler {
    tasks: HashMap<String, ScheduledTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task whose first run is one `interval` after `now`
    pub fn add_task(&mut self, name: &str, interval: Duration, now: DateTime<Utc>) {
        self.tasks.insert(
            name.to_string(),
            ScheduledTask {
                interval,
                last_run: now,
            },
        );
        debug!("Scheduled task '{}' with interval {}s", name, interval.num_seconds());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn set_interval(&mut self, name: &str, interval: Duration) {
        if let Some(task) = self.tasks.get_mut(name) {
            task.interval = interval;
        }
    }

    /// `true` if the task is due, marking it as run at `now`
    pub fn take_due(&mut self, name: &str, now: DateTime<Utc>) -> bool {
        match self.tasks.get_mut(name) {
            Some(task) if now - task.last_run >= task.interval => {
                task.last_run = now;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_due_after_interval() {
        let mut scheduler = Scheduler::new();
        scheduler.add_task("cleanup", Duration::seconds(3600), t(0));

        assert!(!scheduler.take_due("cleanup", t(10)));
        assert!(scheduler.take_due("cleanup", t(3600)));
        assert!(!scheduler.take_due("cleanup", t(3700)));
        assert!(scheduler.take_due("cleanup", t(7300)));
        assert!(!scheduler.take_due("missing", t(7300)));
        assert!(scheduler.contains("cleanup"));
        assert!(!scheduler.contains("missing"));
    }

    #[test]
    fn test_interval_change_applies_to_next_run() {
        let mut scheduler = Scheduler::new();
        scheduler.add_task("cleanup", Duration::seconds(3600), t(0));
        scheduler.set_interval("cleanup", Duration::seconds(60));
        assert!(scheduler.take_due("cleanup", t(60)));
        assert!(!scheduler.take_due("cleanup", t(100)));
    }
}
