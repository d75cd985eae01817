//! External collaborators: what actually powers the machine down, asks the user, and
//! shows desktop notifications.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use lsd_core::PowerAction;

/// Performs a power action. May not return (the machine goes down).
pub trait ActionSink: Send + Sync {
    fn execute(&self, action: PowerAction);
}

/// Asks a human to approve a non-forced action. Blocking. The caller stops waiting after
/// `timeout`; implementations should take down any prompt by then.
pub trait ConfirmationSink: Send + Sync {
    fn confirm(&self, action: PowerAction, timer: i32, message: &str, timeout: Duration) -> bool;
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str);
}

/// The three sinks a daemon runs with.
#[derive(Clone)]
pub struct Sinks {
    pub action: Arc<dyn ActionSink>,
    pub confirm: Arc<dyn ConfirmationSink>,
    pub notify: Arc<dyn NotificationSink>,
}

impl Sinks {
    /// systemctl, zenity and notify-send.
    pub fn system() -> Self {
        let s = Arc::new(SystemSinks);
        Self {
            action: s.clone(),
            confirm: s.clone(),
            notify: s,
        }
    }

    /// Log what would happen; approve every confirmation.
    pub fn log_only() -> Self {
        let s = Arc::new(LogSinks);
        Self {
            action: s.clone(),
            confirm: s.clone(),
            notify: s,
        }
    }
}

/// Command line that performs `action` through systemd.
pub fn systemctl_args(action: PowerAction) -> [&'static str; 1] {
    match action {
        PowerAction::Shutdown => ["poweroff"],
        PowerAction::Reboot => ["reboot"],
        PowerAction::Standby | PowerAction::Sleep => ["suspend"],
        PowerAction::Hibernate => ["hibernate"],
    }
}

/// zenity arguments for the confirmation prompt. The dialog closes itself after `timeout`,
/// rounded up to whole seconds.
pub fn zenity_args(action: PowerAction, timer: i32, message: &str, timeout: Duration) -> Vec<String> {
    let mut text = format!("Confirm {} in {} seconds?", action, timer);
    if !message.is_empty() {
        text.push_str("\n\n");
        text.push_str(message);
    }
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    vec![
        "--question".into(),
        "--width=400".into(),
        "--height=100".into(),
        format!("--timeout={}", secs.max(1)),
        format!("--title=Confirm {}", action),
        format!("--text={}", text),
    ]
}

pub struct SystemSinks;

impl ActionSink for SystemSinks {
    fn execute(&self, action: PowerAction) {
        info!("executing {}", action);
        match Command::new("systemctl").args(systemctl_args(action)).status() {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("systemctl {} exited with {}", action, status),
            Err(e) => warn!("cannot run systemctl for {}: {}", action, e),
        }
    }
}

impl ConfirmationSink for SystemSinks {
    fn confirm(&self, action: PowerAction, timer: i32, message: &str, timeout: Duration) -> bool {
        let status = Command::new("zenity")
            .args(zenity_args(action, timer, message, timeout))
            .status();
        match status {
            // zenity exits 0 on "yes", 1 on "no", 5 when --timeout runs out
            Ok(status) => status.success(),
            Err(e) => {
                warn!("cannot ask for confirmation: {}", e);
                false
            }
        }
    }
}

impl NotificationSink for SystemSinks {
    fn notify(&self, message: &str) {
        if let Err(e) = Command::new("notify-send").arg("lsd").arg(message).status() {
            warn!("cannot show notification: {}", e);
        }
    }
}

pub struct LogSinks;

impl ActionSink for LogSinks {
    fn execute(&self, action: PowerAction) {
        info!("[dry-run] would {}", action);
    }
}

impl ConfirmationSink for LogSinks {
    fn confirm(&self, action: PowerAction, timer: i32, _message: &str, _timeout: Duration) -> bool {
        info!("[dry-run] auto-confirming {} in {}s", action, timer);
        true
    }
}

impl NotificationSink for LogSinks {
    fn notify(&self, message: &str) {
        info!("[dry-run] notification: {}", message);
    }
}
