//! Deferred power actions: at most one armed at a time.
//!
//! Arming always disarms first. The timer task re-checks, under the same lock, that it
//! still owns the slot before firing, so a superseded or cancelled timer never runs.
//! Sink calls run on the blocking pool.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use lsd_core::{unix_time, Outcome, PowerAction};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::sink::{ActionSink, Sinks};

/// Default time a user gets to confirm a non-forced action.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

/// Snapshot of the armed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedAction {
    pub action: PowerAction,
    pub delay_secs: i32,
    pub issued_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("negative delay {0}s")]
    NegativeDelay(i32),
    #[error("cannot register timer: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

struct Armed {
    id: u64,
    info: ArmedAction,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    next_id: u64,
    armed: Option<Armed>,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the single outstanding deferred action.
pub struct Scheduler {
    slot: Arc<Mutex<Slot>>,
    sinks: Sinks,
    confirm_timeout: Duration,
}

impl Scheduler {
    pub fn new(sinks: Sinks, confirm_timeout: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::default())),
            sinks,
            confirm_timeout,
        }
    }

    /// Confirm (unless forced), then arm `action` for `delay_secs`, replacing any armed
    /// action. A delay of 0 executes immediately, which may not return.
    pub async fn schedule(
        &self,
        action: PowerAction,
        delay_secs: i32,
        force: bool,
        message: &str,
    ) -> Result<Outcome, ScheduleError> {
        if delay_secs < 0 {
            return Err(ScheduleError::NegativeDelay(delay_secs));
        }
        let runtime = Handle::try_current()?;
        if force {
            debug!("force bit set, skipping confirmation");
            let sink = self.sinks.notify.clone();
            let notice = forced_notice(action, delay_secs, message);
            blocking(runtime.spawn_blocking(move || sink.notify(&notice)), "notification").await;
        } else if !self.confirm(action, delay_secs, message).await {
            return Ok(Outcome::Declined);
        }
        let issued_at = unix_time();
        if delay_secs == 0 {
            self.disarm_for(action);
            info!("executing {} now", action);
            let sink = self.sinks.action.clone();
            blocking(runtime.spawn_blocking(move || sink.execute(action)), "execution").await;
        } else {
            self.arm(&runtime, action, delay_secs, issued_at);
        }
        Ok(Outcome::Armed { issued_at })
    }

    /// Disarm the pending action, if any. Returns whether one was armed.
    pub fn cancel(&self) -> bool {
        match lock(&self.slot).armed.take() {
            Some(prev) => {
                prev.task.abort();
                info!("cancelled pending {}", prev.info.action);
                true
            }
            None => false,
        }
    }

    pub fn armed(&self) -> Option<ArmedAction> {
        lock(&self.slot).armed.as_ref().map(|a| a.info)
    }

    async fn confirm(&self, action: PowerAction, timer: i32, message: &str) -> bool {
        let sink = self.sinks.confirm.clone();
        let message = message.to_string();
        let timeout = self.confirm_timeout;
        let ask = tokio::task::spawn_blocking(move || sink.confirm(action, timer, &message, timeout));
        match tokio::time::timeout(self.confirm_timeout, ask).await {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                info!("{} declined by user", action);
                false
            }
            Ok(Err(e)) => {
                warn!("confirmation for {} failed: {}", action, e);
                false
            }
            Err(_) => {
                info!(
                    "no confirmation for {} within {:?}, not scheduling",
                    action, self.confirm_timeout
                );
                false
            }
        }
    }

    fn disarm_for(&self, next: PowerAction) {
        if let Some(prev) = lock(&self.slot).armed.take() {
            prev.task.abort();
            info!("{} superseded by {}", prev.info.action, next);
        }
    }

    fn arm(&self, runtime: &Handle, action: PowerAction, delay_secs: i32, issued_at: i64) {
        let mut slot = lock(&self.slot);
        if let Some(prev) = slot.armed.take() {
            prev.task.abort();
            info!("{} superseded by {}", prev.info.action, action);
        }
        slot.next_id += 1;
        let id = slot.next_id;
        let task = runtime.spawn(fire_after(
            self.slot.clone(),
            self.sinks.action.clone(),
            id,
            action,
            Duration::from_secs(delay_secs as u64),
        ));
        slot.armed = Some(Armed {
            id,
            info: ArmedAction {
                action,
                delay_secs,
                issued_at,
            },
            task,
        });
        info!("{} armed for {}s", action, delay_secs);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(prev) = lock(&self.slot).armed.take() {
            prev.task.abort();
        }
    }
}

async fn fire_after(
    slot: Arc<Mutex<Slot>>,
    sink: Arc<dyn ActionSink>,
    id: u64,
    action: PowerAction,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    let due = {
        let mut slot = lock(&slot);
        let owned = slot.armed.as_ref().map_or(false, |a| a.id == id);
        if owned {
            slot.armed = None;
        }
        owned
    };
    if due {
        info!("timer expired, executing {}", action);
        blocking(tokio::task::spawn_blocking(move || sink.execute(action)), "execution").await;
    }
}

async fn blocking(call: JoinHandle<()>, what: &str) {
    if let Err(e) = call.await {
        warn!("{} sink failed: {}", what, e);
    }
}

fn forced_notice(action: PowerAction, delay_secs: i32, message: &str) -> String {
    if !message.is_empty() {
        return message.to_string();
    }
    if delay_secs == 0 {
        format!("System {} requested now", action)
    } else {
        format!("System {} requested in {} seconds", action, delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ConfirmationSink, NotificationSink};

    #[derive(Default)]
    struct Recorder {
        executed: Mutex<Vec<PowerAction>>,
        notes: Mutex<Vec<String>>,
        asked: Mutex<u32>,
        deadlines: Mutex<Vec<Duration>>,
        fired: tokio::sync::Notify,
        answer: bool,
        think: Duration,
    }

    impl ActionSink for Recorder {
        fn execute(&self, action: PowerAction) {
            self.executed.lock().unwrap().push(action);
            self.fired.notify_one();
        }
    }

    impl ConfirmationSink for Recorder {
        fn confirm(&self, _action: PowerAction, _timer: i32, _message: &str, timeout: Duration) -> bool {
            *self.asked.lock().unwrap() += 1;
            self.deadlines.lock().unwrap().push(timeout);
            std::thread::sleep(self.think);
            self.answer
        }
    }

    impl NotificationSink for Recorder {
        fn notify(&self, message: &str) {
            self.notes.lock().unwrap().push(message.to_string());
        }
    }

    fn scheduler(answer: bool, think: Duration, timeout: Duration) -> (Scheduler, Arc<Recorder>) {
        let rec = Arc::new(Recorder {
            answer,
            think,
            ..Recorder::default()
        });
        let sinks = Sinks {
            action: rec.clone(),
            confirm: rec.clone(),
            notify: rec.clone(),
        };
        (Scheduler::new(sinks, timeout), rec)
    }

    fn executed(rec: &Recorder) -> Vec<PowerAction> {
        rec.executed.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn forced_zero_timer_executes_immediately() {
        let (s, rec) = scheduler(false, Duration::ZERO, DEFAULT_CONFIRM_TIMEOUT);
        let outcome = s
            .schedule(PowerAction::Shutdown, 0, true, "")
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Armed { .. }));
        assert_eq!(executed(&rec), vec![PowerAction::Shutdown]);
        assert_eq!(*rec.asked.lock().unwrap(), 0);
        assert_eq!(rec.notes.lock().unwrap().len(), 1);
        assert_eq!(s.armed(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn second_schedule_supersedes_first() {
        let (s, rec) = scheduler(true, Duration::ZERO, DEFAULT_CONFIRM_TIMEOUT);
        s.schedule(PowerAction::Reboot, 30, true, "").await.unwrap();
        s.schedule(PowerAction::Hibernate, 60, true, "").await.unwrap();
        let armed = s.armed().unwrap();
        assert_eq!(armed.action, PowerAction::Hibernate);
        assert_eq!(armed.delay_secs, 60);

        tokio::time::sleep(Duration::from_secs(61)).await;
        rec.fired.notified().await;
        assert_eq!(executed(&rec), vec![PowerAction::Hibernate]);
        assert_eq!(s.armed(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_delay() {
        let (s, rec) = scheduler(true, Duration::ZERO, DEFAULT_CONFIRM_TIMEOUT);
        s.schedule(PowerAction::Sleep, 5, true, "nap").await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(executed(&rec).is_empty());
        rec.fired.notified().await;
        assert_eq!(executed(&rec), vec![PowerAction::Sleep]);
        assert_eq!(rec.notes.lock().unwrap().as_slice(), ["nap".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_disarms_and_is_idempotent() {
        let (s, rec) = scheduler(true, Duration::ZERO, DEFAULT_CONFIRM_TIMEOUT);
        assert!(!s.cancel());
        s.schedule(PowerAction::Shutdown, 10, true, "").await.unwrap();
        assert!(s.cancel());
        assert!(!s.cancel());
        assert_eq!(s.armed(), None);
        tokio::time::sleep(Duration::from_secs(20)).await;
        tokio::task::yield_now().await;
        assert!(executed(&rec).is_empty());
    }

    #[tokio::test]
    async fn confirmed_action_is_armed_then_aborted() {
        let (s, rec) = scheduler(true, Duration::ZERO, DEFAULT_CONFIRM_TIMEOUT);
        let outcome = s
            .schedule(PowerAction::Shutdown, 30, false, "")
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Armed { .. }));
        assert_eq!(*rec.asked.lock().unwrap(), 1);
        assert_eq!(s.armed().map(|a| a.delay_secs), Some(30));
        assert!(s.cancel());
        assert!(executed(&rec).is_empty());
    }

    #[tokio::test]
    async fn declined_leaves_previous_action_armed() {
        let (s, _rec) = scheduler(false, Duration::ZERO, DEFAULT_CONFIRM_TIMEOUT);
        s.schedule(PowerAction::Reboot, 100, true, "").await.unwrap();
        let outcome = s
            .schedule(PowerAction::Shutdown, 5, false, "")
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Declined);
        assert_eq!(s.armed().map(|a| a.action), Some(PowerAction::Reboot));
    }

    #[tokio::test]
    async fn confirmation_timeout_counts_as_declined() {
        let (s, rec) = scheduler(true, Duration::from_millis(500), Duration::from_millis(50));
        let outcome = s
            .schedule(PowerAction::Shutdown, 5, false, "")
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Declined);
        assert_eq!(s.armed(), None);
        assert!(executed(&rec).is_empty());
    }

    #[tokio::test]
    async fn confirmation_is_told_its_deadline() {
        let (s, rec) = scheduler(false, Duration::ZERO, Duration::from_secs(7));
        s.schedule(PowerAction::Reboot, 5, false, "").await.unwrap();
        assert_eq!(s.armed(), None);
        assert_eq!(rec.deadlines.lock().unwrap().as_slice(), [Duration::from_secs(7)]);
    }

    #[tokio::test]
    async fn slow_notification_does_not_stall_the_runtime() {
        struct SlowNotes;
        impl NotificationSink for SlowNotes {
            fn notify(&self, _message: &str) {
                std::thread::sleep(Duration::from_millis(800));
            }
        }

        let (_, rec) = scheduler(true, Duration::ZERO, DEFAULT_CONFIRM_TIMEOUT);
        let sinks = Sinks {
            action: rec.clone(),
            confirm: rec.clone(),
            notify: Arc::new(SlowNotes),
        };
        let s = Scheduler::new(sinks, DEFAULT_CONFIRM_TIMEOUT);
        let start = std::time::Instant::now();
        let schedule = tokio::spawn(async move {
            s.schedule(PowerAction::Reboot, 30, true, "").await.unwrap();
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(start.elapsed() < Duration::from_millis(400));
        schedule.await.unwrap();
    }

    #[tokio::test]
    async fn negative_delay_is_refused() {
        let (s, rec) = scheduler(true, Duration::ZERO, DEFAULT_CONFIRM_TIMEOUT);
        assert!(matches!(
            s.schedule(PowerAction::Reboot, -1, true, "").await,
            Err(ScheduleError::NegativeDelay(-1))
        ));
        assert!(executed(&rec).is_empty());
    }

    #[test]
    fn forced_notice_text() {
        assert_eq!(forced_notice(PowerAction::Reboot, 0, "bye"), "bye");
        assert_eq!(
            forced_notice(PowerAction::Shutdown, 30, ""),
            "System shutdown requested in 30 seconds"
        );
    }
}
