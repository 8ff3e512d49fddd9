//! Periodic transmissions

use super::AutomationEvent;
use crate::core::codec::hex_bytes;
use crate::core::connection::DataSink;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Periodic send as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Unique name
    pub name: String,
    /// Bytes sent on each tick
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    /// Time between sends
    #[serde(rename = "interval_ms", with = "crate::core::transport::duration_ms")]
    pub interval: Duration,
    /// Number of sends before the task disables itself; -1 runs until stopped
    #[serde(default = "unbounded")]
    pub repeat: i32,
    /// Arm the task as soon as it is added
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn unbounded() -> i32 {
    -1
}

fn enabled_default() -> bool {
    true
}

impl ScheduledTask {
    /// Enabled, unbounded task
    pub fn new(name: &str, payload: &[u8], interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            payload: payload.to_vec(),
            interval,
            repeat: -1,
            enabled: true,
        }
    }

    /// Limit the number of sends
    #[must_use]
    pub fn repeat(mut self, count: i32) -> Self {
        self.repeat = count;
        self
    }

    /// Set the initial enabled flag
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn limit(&self) -> Option<u64> {
        u64::try_from(self.repeat).ok().filter(|&n| n > 0)
    }
}

/// Task with its live progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    /// Task, with the current enabled flag
    pub task: ScheduledTask,
    /// Payloads sent since the task was last reset
    pub sent_count: u64,
}

#[derive(Debug)]
struct TaskState {
    enabled: bool,
    sent_count: u64,
}

enum Tick {
    Continue,
    Done,
}

/// A task held by the engine
#[derive(Debug)]
pub(crate) struct TaskEntry {
    pub(crate) task: ScheduledTask,
    state: Mutex<TaskState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TaskEntry {
    pub(crate) fn new(task: ScheduledTask) -> Self {
        Self {
            state: Mutex::new(TaskState {
                enabled: false,
                sent_count: 0,
            }),
            timer: Mutex::new(None),
            task,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.timer.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start the periodic timer. A task that ran to its limit starts over.
    pub(crate) fn arm(
        self: &Arc<Self>,
        runtime: &Handle,
        sink: Arc<dyn DataSink>,
        events: broadcast::Sender<AutomationEvent>,
    ) {
        let mut timer = self.timer.lock();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        {
            let mut state = self.state.lock();
            if self.task.limit().is_some_and(|limit| state.sent_count >= limit) {
                state.sent_count = 0;
            }
            state.enabled = true;
        }

        debug!(task = %self.task.name, interval = ?self.task.interval, "Task armed");
        let entry = Arc::clone(self);
        *timer = Some(runtime.spawn(async move { entry.run(sink, events).await }));
    }

    /// Stop the timer. No send happens after this returns.
    pub(crate) fn disarm(&self) {
        self.state.lock().enabled = false;
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
            debug!(task = %self.task.name, "Task disarmed");
        }
    }

    async fn run(&self, sink: Arc<dyn DataSink>, events: broadcast::Sender<AutomationEvent>) {
        let period = self.task.interval;
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Tick::Done = self.tick(sink.as_ref(), &events) {
                break;
            }
        }
    }

    // Send, count and the limit check share one lock hold, so a stop or the
    // final send cannot be followed by another tick's send.
    fn tick(&self, sink: &dyn DataSink, events: &broadcast::Sender<AutomationEvent>) -> Tick {
        let mut state = self.state.lock();
        if !state.enabled {
            return Tick::Done;
        }

        if let Err(e) = sink.send(&self.task.payload) {
            warn!(task = %self.task.name, error = %e, "Scheduled send failed");
            let _ = events.send(AutomationEvent::SendFailed {
                source: format!("task '{}'", self.task.name),
                error: e.to_string(),
            });
        }
        state.sent_count += 1;
        let _ = events.send(AutomationEvent::TaskSent {
            task: self.task.name.clone(),
            sent_count: state.sent_count,
        });

        if self.task.limit().is_some_and(|limit| state.sent_count >= limit) {
            state.enabled = false;
            info!(task = %self.task.name, sent = state.sent_count, "Task completed");
            let _ = events.send(AutomationEvent::TaskCompleted {
                task: self.task.name.clone(),
                sent_count: state.sent_count,
            });
            return Tick::Done;
        }

        Tick::Continue
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        let state = self.state.lock();
        let mut task = self.task.clone();
        task.enabled = state.enabled;
        TaskSnapshot {
            task,
            sent_count: state.sent_count,
        }
    }
}
