//! Progress events and the EventBus they travel on
//!
//! Orchestration code publishes advisory progress ("CrossrefQuery now at 3 of 10")
//! through the bus and never waits for anyone to read it. A presentation layer
//! subscribes and renders whatever arrives; a slow subscriber lags and loses
//! events instead of stalling producers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Severity of a free-form progress message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// bibchex progress event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    /// A pipeline phase started ("Retrieving metadata", "Running consistency checks")
    PhaseStarted {
        phase: String,
        timestamp: DateTime<Utc>,
    },

    /// Counters of a named subtask changed
    ///
    /// `total` grows as tasks are scheduled, `done` as they finish.
    SubtaskProgress {
        subtask: String,
        done: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Free-form message from a component
    Message {
        component: String,
        level: MessageLevel,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline phase finished
    PhaseCompleted {
        phase: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    /// Event type name, matching the serde tag
    pub fn event_type(&self) -> &str {
        match self {
            ProgressEvent::PhaseStarted { .. } => "PhaseStarted",
            ProgressEvent::SubtaskProgress { .. } => "SubtaskProgress",
            ProgressEvent::Message { .. } => "Message",
            ProgressEvent::PhaseCompleted { .. } => "PhaseCompleted",
        }
    }

    pub fn phase_started(phase: impl Into<String>) -> Self {
        ProgressEvent::PhaseStarted {
            phase: phase.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn phase_completed(phase: impl Into<String>) -> Self {
        ProgressEvent::PhaseCompleted {
            phase: phase.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn message(component: impl Into<String>, level: MessageLevel, text: impl Into<String>) -> Self {
        ProgressEvent::Message {
            component: component.into(),
            level,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Central distribution bus for progress events
///
/// Uses `tokio::sync::broadcast` internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged subscribers skip ahead instead of applying backpressure
///
/// # Examples
///
/// ```
/// use bibchex_common::events::{EventBus, ProgressEvent};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(ProgressEvent::phase_started("Retrieving metadata"));
/// assert_eq!(rx.try_recv().unwrap().event_type(), "PhaseStarted");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
