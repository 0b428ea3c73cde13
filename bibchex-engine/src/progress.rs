//! Subtask progress counters published on the event bus
//!
//! Display: "CrossrefQuery 3 of 10". `total` grows as tasks are scheduled,
//! `done` as they finish; every change is broadcast with `emit_lossy` and
//! never waits for a reader.

use bibchex_common::events::{EventBus, MessageLevel, ProgressEvent};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Counters for one subtask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubtaskStats {
    pub done: usize,
    pub total: usize,
}

impl SubtaskStats {
    pub fn display_string(&self, name: &str) -> String {
        format!("{} {} of {}", name, self.done, self.total)
    }
}

/// Shared progress state, cheap to clone into tasks
#[derive(Clone)]
pub struct ProgressTracker {
    bus: EventBus,
    subtasks: Arc<Mutex<BTreeMap<String, SubtaskStats>>>,
}

impl ProgressTracker {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            subtasks: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Tracker whose events nobody receives
    pub fn detached() -> Self {
        Self::new(EventBus::new(16))
    }

    /// Schedule `count` more units of work for a subtask
    pub fn increase(&self, subtask: &str, count: usize) {
        self.update(subtask, |s| s.total += count);
    }

    /// Mark one unit of a subtask as done
    pub fn finish(&self, subtask: &str) {
        self.update(subtask, |s| s.done += 1);
    }

    pub fn stats(&self, subtask: &str) -> SubtaskStats {
        self.subtasks
            .lock()
            .map(|map| map.get(subtask).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn phase_started(&self, phase: &str) {
        self.bus.emit_lossy(ProgressEvent::phase_started(phase));
    }

    pub fn phase_completed(&self, phase: &str) {
        self.bus.emit_lossy(ProgressEvent::phase_completed(phase));
    }

    pub fn message(&self, component: &str, level: MessageLevel, text: impl Into<String>) {
        self.bus
            .emit_lossy(ProgressEvent::message(component, level, text));
    }

    fn update(&self, subtask: &str, f: impl FnOnce(&mut SubtaskStats)) {
        // Poisoned lock only loses advisory counters
        let stats = match self.subtasks.lock() {
            Ok(mut map) => {
                let stats = map.entry(subtask.to_string()).or_default();
                f(stats);
                *stats
            }
            Err(_) => return,
        };

        self.bus.emit_lossy(ProgressEvent::SubtaskProgress {
            subtask: subtask.to_string(),
            done: stats.done,
            total: stats.total,
            timestamp: Utc::now(),
        });
    }
}
