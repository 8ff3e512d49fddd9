//! Traffic automation
//!
//! Provides:
//! - Pattern-triggered responses, every matching rule fires
//! - Periodic sends with an optional repeat limit
//! - Session recording and timed replay of the transmitted side
//!
//! The engine reaches the wire only through a `DataSink`. Timers and delayed
//! sends run on the tokio runtime handed to `AutomationEngine::new`.

pub mod recorder;
pub mod rules;
pub mod scheduler;

pub use recorder::{RecordEntry, RecordSession};
pub use rules::{AutoResponseRule, MatchKind, RuleSnapshot};
pub use scheduler::{ScheduledTask, TaskSnapshot};

use crate::core::connection::{ConnectionEvent, DataEvent, DataSink, Direction};
use parking_lot::RwLock;
use recorder::Recorder;
use rules::RuleEntry;
use scheduler::TaskEntry;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Automation configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutomationError {
    /// A rule with this name exists
    #[error("Rule already exists: {0}")]
    DuplicateRule(String),

    /// A task with this name exists
    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    /// No rule with this name
    #[error("Rule not found: {0}")]
    UnknownRule(String),

    /// No task with this name
    #[error("Task not found: {0}")]
    UnknownTask(String),

    /// No archived session with this name
    #[error("Recording not found: {0}")]
    UnknownSession(String),

    /// Replay speed must be positive and finite
    #[error("Invalid replay speed: {0}")]
    InvalidSpeed(f64),

    /// Task interval must be non-zero
    #[error("Task '{0}' has a zero interval")]
    ZeroInterval(String),
}

/// Notifications from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomationEvent {
    /// A rule matched an inbound chunk
    RuleMatched {
        /// Rule name
        rule: String,
        /// Matches so far
        match_count: u64,
    },
    /// A scheduled task sent its payload
    TaskSent {
        /// Task name
        task: String,
        /// Sends so far
        sent_count: u64,
    },
    /// A scheduled task reached its repeat limit and disabled itself
    TaskCompleted {
        /// Task name
        task: String,
        /// Total sends
        sent_count: u64,
    },
    /// A replay sent its last record
    ReplayFinished {
        /// Session name
        session: String,
        /// Records sent
        sent: usize,
    },
    /// A send issued by the engine failed
    SendFailed {
        /// Rule, task or replay that issued the send
        source: String,
        /// Transport error
        error: String,
    },
}

/// Running replay
#[derive(Debug)]
pub struct ReplayHandle {
    session: String,
    handle: JoinHandle<()>,
}

impl ReplayHandle {
    /// Name of the session being replayed
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Cancel the sends not yet made
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// All sends made or the replay was aborted
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the replay to end. Dropping the future leaves the replay
    /// running; call `abort` to cancel it.
    pub async fn wait(&mut self) {
        let _ = (&mut self.handle).await;
    }
}

struct Inner {
    sink: Arc<dyn DataSink>,
    runtime: Handle,
    rules: RwLock<Vec<Arc<RuleEntry>>>,
    tasks: RwLock<Vec<Arc<TaskEntry>>>,
    recorder: Recorder,
    events: broadcast::Sender<AutomationEvent>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().iter() {
            task.disarm();
        }
    }
}

/// Rules, scheduled tasks and recordings for one link
#[derive(Clone)]
pub struct AutomationEngine {
    inner: Arc<Inner>,
}

impl AutomationEngine {
    /// Engine sending through `sink`, with timers on `runtime`
    pub fn new(sink: Arc<dyn DataSink>, runtime: Handle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                sink,
                runtime,
                rules: RwLock::new(Vec::new()),
                tasks: RwLock::new(Vec::new()),
                recorder: Recorder::default(),
                events,
            }),
        }
    }

    /// Subscribe to engine notifications
    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.inner.events.subscribe()
    }

    /// Feed a connection's event stream into the engine until it closes
    pub fn attach(&self, mut receiver: broadcast::Receiver<ConnectionEvent>) -> JoinHandle<()> {
        let engine = self.clone();
        self.inner.runtime.spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(ConnectionEvent::Data(event)) => engine.handle_event(&event),
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Automation fell behind the connection, events skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Automation listener stopped");
        })
    }

    /// Process one traffic chunk: record it and, for RX, run the rules
    pub fn handle_event(&self, event: &DataEvent) {
        self.inner.recorder.record(event);
        if event.direction != Direction::Rx {
            return;
        }

        let rules = self.inner.rules.read().clone();
        for rule in rules {
            if rule.try_match(&event.bytes) {
                let match_count = rule.snapshot().match_count;
                debug!(rule = %rule.rule.name, match_count, "Rule matched");
                let _ = self.inner.events.send(AutomationEvent::RuleMatched {
                    rule: rule.rule.name.clone(),
                    match_count,
                });
                self.respond(rule);
            }
        }
    }

    fn respond(&self, rule: Arc<RuleEntry>) {
        if rule.rule.delay.is_zero() {
            send_response(&rule, self.inner.sink.as_ref(), &self.inner.events);
            return;
        }

        let sink = Arc::clone(&self.inner.sink);
        let events = self.inner.events.clone();
        self.inner.runtime.spawn(async move {
            time::sleep(rule.rule.delay).await;
            // Disabled or removed while waiting
            if rule.is_enabled() {
                send_response(&rule, sink.as_ref(), &events);
            }
        });
    }

    /// Add a rule
    pub fn add_rule(&self, rule: AutoResponseRule) -> Result<(), AutomationError> {
        let mut rules = self.inner.rules.write();
        if rules.iter().any(|r| r.rule.name == rule.name) {
            return Err(AutomationError::DuplicateRule(rule.name));
        }
        info!(rule = %rule.name, kind = ?rule.match_kind, "Rule added");
        rules.push(Arc::new(RuleEntry::new(rule)));
        Ok(())
    }

    /// Remove a rule; pending delayed responses are dropped
    pub fn remove_rule(&self, name: &str) -> Result<(), AutomationError> {
        let mut rules = self.inner.rules.write();
        let index = rules
            .iter()
            .position(|r| r.rule.name == name)
            .ok_or_else(|| AutomationError::UnknownRule(name.to_string()))?;
        let removed = rules.remove(index);
        removed.set_enabled(false);
        info!(rule = %name, "Rule removed");
        Ok(())
    }

    /// Enable or disable a rule
    pub fn set_rule_enabled(&self, name: &str, enabled: bool) -> Result<(), AutomationError> {
        self.find_rule(name)?.set_enabled(enabled);
        Ok(())
    }

    fn find_rule(&self, name: &str) -> Result<Arc<RuleEntry>, AutomationError> {
        self.inner
            .rules
            .read()
            .iter()
            .find(|r| r.rule.name == name)
            .cloned()
            .ok_or_else(|| AutomationError::UnknownRule(name.to_string()))
    }

    /// Rules with their counters, in insertion order
    pub fn rules(&self) -> Vec<RuleSnapshot> {
        self.inner.rules.read().iter().map(|r| r.snapshot()).collect()
    }

    /// Zero every rule's match counter
    pub fn reset_counters(&self) {
        for rule in self.inner.rules.read().iter() {
            rule.reset_count();
        }
    }

    /// Add a task, arming it when enabled
    pub fn add_task(&self, task: ScheduledTask) -> Result<(), AutomationError> {
        if task.interval.is_zero() {
            return Err(AutomationError::ZeroInterval(task.name));
        }

        let entry = {
            let mut tasks = self.inner.tasks.write();
            if tasks.iter().any(|t| t.task.name == task.name) {
                return Err(AutomationError::DuplicateTask(task.name));
            }
            info!(task = %task.name, interval = ?task.interval, repeat = task.repeat, "Task added");
            let entry = Arc::new(TaskEntry::new(task));
            tasks.push(Arc::clone(&entry));
            entry
        };

        if entry.task.enabled {
            self.arm(&entry);
        }
        Ok(())
    }

    fn arm(&self, entry: &Arc<TaskEntry>) {
        entry.arm(&self.inner.runtime, Arc::clone(&self.inner.sink), self.inner.events.clone());
    }

    fn find_task(&self, name: &str) -> Result<Arc<TaskEntry>, AutomationError> {
        self.inner
            .tasks
            .read()
            .iter()
            .find(|t| t.task.name == name)
            .cloned()
            .ok_or_else(|| AutomationError::UnknownTask(name.to_string()))
    }

    /// Arm a task. A running task is left as is.
    pub fn start_task(&self, name: &str) -> Result<(), AutomationError> {
        let entry = self.find_task(name)?;
        self.arm(&entry);
        Ok(())
    }

    /// Disarm a task, keeping its progress
    pub fn stop_task(&self, name: &str) -> Result<(), AutomationError> {
        self.find_task(name)?.disarm();
        Ok(())
    }

    /// Disarm and forget a task
    pub fn remove_task(&self, name: &str) -> Result<(), AutomationError> {
        let mut tasks = self.inner.tasks.write();
        let index = tasks
            .iter()
            .position(|t| t.task.name == name)
            .ok_or_else(|| AutomationError::UnknownTask(name.to_string()))?;
        tasks.remove(index).disarm();
        info!(task = %name, "Task removed");
        Ok(())
    }

    /// Whether a task's timer is running
    pub fn is_task_running(&self, name: &str) -> bool {
        self.find_task(name).is_ok_and(|t| t.is_armed())
    }

    /// Tasks with their progress, in insertion order
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        self.inner.tasks.read().iter().map(|t| t.snapshot()).collect()
    }

    /// Disarm every task
    pub fn stop_all_tasks(&self) {
        for task in self.inner.tasks.read().iter() {
            task.disarm();
        }
    }

    /// Start capturing traffic under `name`
    pub fn start_recording(&self, name: &str) {
        self.inner.recorder.start(name);
    }

    /// Stop capturing and archive the session
    pub fn stop_recording(&self) -> Option<Arc<RecordSession>> {
        self.inner.recorder.stop()
    }

    /// Whether a capture is running
    pub fn is_recording(&self) -> bool {
        self.inner.recorder.is_recording()
    }

    /// Archived session
    pub fn recording(&self, name: &str) -> Option<Arc<RecordSession>> {
        self.inner.recorder.get(name)
    }

    /// Archived session names, sorted
    pub fn recordings(&self) -> Vec<String> {
        self.inner.recorder.names()
    }

    /// Archive an externally loaded session, replacing one with the same name
    pub fn import_recording(&self, session: RecordSession) -> Arc<RecordSession> {
        self.inner.recorder.insert(session)
    }

    /// Drop an archived session
    pub fn remove_recording(&self, name: &str) -> Option<Arc<RecordSession>> {
        self.inner.recorder.remove(name)
    }

    /// Resend the TX records of an archived session, each at `elapsed / speed`
    /// from now
    pub fn replay(&self, name: &str, speed: f64) -> Result<ReplayHandle, AutomationError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(AutomationError::InvalidSpeed(speed));
        }
        let session = self
            .recording(name)
            .ok_or_else(|| AutomationError::UnknownSession(name.to_string()))?;

        let start = time::Instant::now();
        let mut schedule = Vec::new();
        for record in session.entries(Direction::Tx) {
            #[allow(clippy::cast_precision_loss)]
            let secs = record.elapsed_ms as f64 / 1000.0 / speed;
            let deadline = Duration::try_from_secs_f64(secs)
                .ok()
                .and_then(|offset| start.checked_add(offset))
                .ok_or(AutomationError::InvalidSpeed(speed))?;
            schedule.push((deadline, record.data.clone()));
        }

        info!(session = %name, speed, sends = schedule.len(), "Replay scheduled");
        let sink = Arc::clone(&self.inner.sink);
        let events = self.inner.events.clone();
        let session_name = name.to_string();
        let handle = self.inner.runtime.spawn(async move {
            let mut sent = 0usize;
            for (deadline, data) in schedule {
                time::sleep_until(deadline).await;
                match sink.send(&data) {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        warn!(session = %session_name, error = %e, "Replay send failed");
                        let _ = events.send(AutomationEvent::SendFailed {
                            source: format!("replay '{session_name}'"),
                            error: e.to_string(),
                        });
                    }
                }
            }
            info!(session = %session_name, sent, "Replay finished");
            let _ = events.send(AutomationEvent::ReplayFinished {
                session: session_name,
                sent,
            });
        });

        Ok(ReplayHandle {
            session: name.to_string(),
            handle,
        })
    }
}

impl fmt::Debug for AutomationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutomationEngine")
            .field("rules", &self.inner.rules.read().len())
            .field("tasks", &self.inner.tasks.read().len())
            .field("recording", &self.is_recording())
            .finish_non_exhaustive()
    }
}

fn send_response(rule: &RuleEntry, sink: &dyn DataSink, events: &broadcast::Sender<AutomationEvent>) {
    if let Err(e) = sink.send(&rule.rule.response) {
        warn!(rule = %rule.rule.name, error = %e, "Rule response failed");
        let _ = events.send(AutomationEvent::SendFailed {
            source: format!("rule '{}'", rule.rule.name),
            error: e.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::TransportError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        sent: Mutex<Vec<(time::Instant, Vec<u8>)>>,
    }

    impl CollectingSink {
        fn payloads(&self) -> Vec<Vec<u8>> {
            self.sent.lock().iter().map(|(_, d)| d.clone()).collect()
        }
    }

    impl DataSink for CollectingSink {
        fn send(&self, data: &[u8]) -> Result<(), TransportError> {
            self.sent.lock().push((time::Instant::now(), data.to_vec()));
            Ok(())
        }
    }

    fn engine() -> (AutomationEngine, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let engine = AutomationEngine::new(sink.clone(), Handle::current());
        (engine, sink)
    }

    fn rx(data: &'static [u8]) -> DataEvent {
        DataEvent::new(Direction::Rx, data)
    }

    #[tokio::test]
    async fn test_every_matching_rule_fires() {
        let (engine, sink) = engine();
        engine.add_rule(AutoResponseRule::new("a", b"AT", MatchKind::StartsWith, b"1")).unwrap();
        engine.add_rule(AutoResponseRule::new("b", b"\r\n", MatchKind::EndsWith, b"2")).unwrap();
        engine.add_rule(AutoResponseRule::new("c", b"ZZ", MatchKind::Contains, b"3")).unwrap();

        engine.handle_event(&rx(b"AT\r\n"));
        assert_eq!(sink.payloads(), vec![b"1".to_vec(), b"2".to_vec()]);

        let counts: Vec<u64> = engine.rules().iter().map(|r| r.match_count).collect();
        assert_eq!(counts, vec![1, 1, 0]);
    }

    #[tokio::test]
    async fn test_tx_chunks_do_not_trigger_rules() {
        let (engine, sink) = engine();
        engine.add_rule(AutoResponseRule::new("a", b"AT", MatchKind::Contains, b"OK")).unwrap();
        engine.handle_event(&DataEvent::new(Direction::Tx, &b"AT"[..]));
        assert!(sink.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let (engine, _sink) = engine();
        engine.add_rule(AutoResponseRule::new("a", b"x", MatchKind::Exact, b"y")).unwrap();
        assert_eq!(
            engine.add_rule(AutoResponseRule::new("a", b"z", MatchKind::Exact, b"y")),
            Err(AutomationError::DuplicateRule("a".to_string()))
        );

        let task = ScheduledTask::new("t", b"p", Duration::from_secs(1)).enabled(false);
        engine.add_task(task.clone()).unwrap();
        assert_eq!(engine.add_task(task), Err(AutomationError::DuplicateTask("t".to_string())));
        assert_eq!(
            engine.add_task(ScheduledTask::new("z", b"p", Duration::ZERO)),
            Err(AutomationError::ZeroInterval("z".to_string()))
        );
        assert_eq!(engine.remove_rule("nope"), Err(AutomationError::UnknownRule("nope".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_response_dropped_when_disabled() {
        let (engine, sink) = engine();
        let rule = AutoResponseRule::new("slow", b"PING", MatchKind::Exact, b"PONG")
            .with_delay(Duration::from_millis(200));
        engine.add_rule(rule).unwrap();

        engine.handle_event(&rx(b"PING"));
        time::sleep(Duration::from_millis(100)).await;
        engine.set_rule_enabled("slow", false).unwrap();
        time::sleep(Duration::from_millis(200)).await;
        assert!(sink.payloads().is_empty());

        engine.set_rule_enabled("slow", true).unwrap();
        engine.handle_event(&rx(b"PING"));
        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(sink.payloads(), vec![b"PONG".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_task_keeps_progress() {
        let (engine, sink) = engine();
        engine.add_task(ScheduledTask::new("beat", b"H", Duration::from_millis(100))).unwrap();
        assert!(engine.is_task_running("beat"));

        time::sleep(Duration::from_millis(350)).await;
        engine.stop_task("beat").unwrap();
        assert!(!engine.is_task_running("beat"));
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(sink.payloads().len(), 3);
        let snapshot = &engine.tasks()[0];
        assert_eq!(snapshot.sent_count, 3);
        assert!(!snapshot.task.enabled);

        engine.start_task("beat").unwrap();
        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(engine.tasks()[0].sent_count, 4);
        engine.remove_task("beat").unwrap();
        assert!(engine.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_replay_rejects_bad_speed() {
        let (engine, _sink) = engine();
        engine.import_recording(RecordSession::new("s"));
        for speed in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(engine.replay("s", speed), Err(AutomationError::InvalidSpeed(_))));
        }
        assert_eq!(
            engine.replay("missing", 1.0).unwrap_err(),
            AutomationError::UnknownSession("missing".to_string())
        );
    }

    #[tokio::test]
    async fn test_recording_captures_both_directions() {
        let (engine, _sink) = engine();
        engine.start_recording("cap");
        assert!(engine.is_recording());
        engine.handle_event(&DataEvent::new(Direction::Tx, &b"AT"[..]));
        engine.handle_event(&rx(b"OK"));
        let session = engine.stop_recording().unwrap();
        assert!(!engine.is_recording());
        assert_eq!(session.records.len(), 2);
        assert_eq!(session.records[0].elapsed_ms, 0);
        assert_eq!(engine.recordings(), vec!["cap".to_string()]);
    }
}
