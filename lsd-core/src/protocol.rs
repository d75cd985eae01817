//! Protocol types: request kinds, the force flag, Request and ServerState.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Well-known UDP port the daemon binds.
pub const DEFAULT_PORT: u16 = 6969;

/// Maximum message bytes carried by a request. Longer messages are clamped on encode.
pub const MSG_MAX_SIZE: usize = 128;

/// Maximum signature bytes accepted in the trailing signature block.
pub const SIG_MAX_SIZE: usize = 192;

/// High bit of `req_type`: skip confirmation and execute unconditionally.
pub const FORCE_BIT: u16 = 0x8000;

/// Set the force flag on a request type code.
pub fn set_force(req_type: u16) -> u16 {
    req_type | FORCE_BIT
}

/// Strip the force flag, leaving the bare action code.
pub fn mask_force(req_type: u16) -> u16 {
    req_type & !FORCE_BIT
}

pub fn get_force(req_type: u16) -> bool {
    req_type & FORCE_BIT != 0
}

/// Seconds since the Unix epoch. A clock before the epoch reads as 0.
pub fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Action codes on the wire (bits 0-14 of `req_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u16)]
pub enum RequestKind {
    Shutdown = 1,
    Reboot = 2,
    Standby = 3,
    Sleep = 4,
    Hibernate = 5,
    Abort = 6,
    Notify = 7,
    Query = 8,
}

impl RequestKind {
    pub const ALL: [RequestKind; 8] = [
        RequestKind::Shutdown,
        RequestKind::Reboot,
        RequestKind::Standby,
        RequestKind::Sleep,
        RequestKind::Hibernate,
        RequestKind::Abort,
        RequestKind::Notify,
        RequestKind::Query,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Look up a bare action code. The force flag must already be masked off.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Shutdown => "shutdown",
            RequestKind::Reboot => "reboot",
            RequestKind::Standby => "standby",
            RequestKind::Sleep => "sleep",
            RequestKind::Hibernate => "hibernate",
            RequestKind::Abort => "abort",
            RequestKind::Notify => "notify",
            RequestKind::Query => "query",
        }
    }

    /// The power action behind this kind, if it is one of the schedulable kinds.
    pub fn command(self) -> Command {
        match self {
            RequestKind::Shutdown => Command::Power(PowerAction::Shutdown),
            RequestKind::Reboot => Command::Power(PowerAction::Reboot),
            RequestKind::Standby => Command::Power(PowerAction::Standby),
            RequestKind::Sleep => Command::Power(PowerAction::Sleep),
            RequestKind::Hibernate => Command::Power(PowerAction::Hibernate),
            RequestKind::Abort => Command::Abort,
            RequestKind::Notify => Command::Notify,
            RequestKind::Query => Command::Query,
        }
    }

    pub fn power_action(self) -> Option<PowerAction> {
        match self.command() {
            Command::Power(action) => Some(action),
            _ => None,
        }
    }
}

/// A request kind grouped by how the server handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Power(PowerAction),
    Abort,
    Notify,
    Query,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown request '{0}' (expected one of shutdown, reboot, standby, sleep, hibernate, abort, notify, query)")]
pub struct ParseKindError(String);

impl FromStr for RequestKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseKindError(s.to_string()))
    }
}

/// The schedulable subset of request kinds; what the action sink performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerAction {
    Shutdown,
    Reboot,
    Standby,
    Sleep,
    Hibernate,
}

impl PowerAction {
    pub fn kind(self) -> RequestKind {
        match self {
            PowerAction::Shutdown => RequestKind::Shutdown,
            PowerAction::Reboot => RequestKind::Reboot,
            PowerAction::Standby => RequestKind::Standby,
            PowerAction::Sleep => RequestKind::Sleep,
            PowerAction::Hibernate => RequestKind::Hibernate,
        }
    }

    pub fn code(self) -> u16 {
        self.kind().code()
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().as_str())
    }
}

/// One client-issued request. The signature travels beside it on the wire, never inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Creation time on the client, seconds since epoch. Anti-replay key.
    pub when: i64,
    /// Action code with the force flag in bit 15.
    pub req_type: u16,
    /// Seconds until the action fires; 0 means immediately.
    pub timer: i32,
    /// Free-text payload (notification text). Not nul-terminated.
    pub msg: Vec<u8>,
}

impl Request {
    pub fn new(kind: RequestKind, when: i64) -> Self {
        Self {
            when,
            req_type: kind.code(),
            timer: 0,
            msg: Vec::new(),
        }
    }

    pub fn with_timer(mut self, timer: i32) -> Self {
        self.timer = timer;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.req_type = if force {
            set_force(self.req_type)
        } else {
            mask_force(self.req_type)
        };
        self
    }

    pub fn with_message(mut self, msg: impl Into<Vec<u8>>) -> Self {
        self.msg = msg.into();
        self
    }

    /// Bare action kind, or None for an unknown code.
    pub fn kind(&self) -> Option<RequestKind> {
        RequestKind::from_code(mask_force(self.req_type))
    }

    pub fn is_forced(&self) -> bool {
        get_force(self.req_type)
    }

    pub fn message_text(&self) -> String {
        String::from_utf8_lossy(&self.msg).into_owned()
    }
}

/// Outcome of the last power-class request, reported in `ServerState::ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Ack {
    None = 0,
    Granted = 8,
    Denied = 9,
    /// The action is disabled in the daemon's configuration.
    Disabled = 10,
}

impl Ack {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Ack::None),
            8 => Some(Ack::Granted),
            9 => Some(Ack::Denied),
            10 => Some(Ack::Disabled),
            _ => None,
        }
    }
}

/// Server's in-memory record: anti-replay watermark plus the armed action.
/// Field order is the wire order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    /// Timestamp of the last accepted request (anti-replay watermark).
    pub when: i64,
    /// When the current action was armed.
    pub issued_at: i64,
    pub timer: i32,
    pub power_cmd: u16,
    pub ack: u16,
}

impl ServerState {
    pub fn power_action(&self) -> Option<PowerAction> {
        RequestKind::from_code(self.power_cmd).and_then(RequestKind::power_action)
    }

    pub fn ack(&self) -> Option<Ack> {
        Ack::from_code(self.ack)
    }

    /// Seconds left before the armed action fires, measured from `now`.
    pub fn remaining(&self, now: i64) -> Option<i64> {
        self.power_action()?;
        let due = self.issued_at.saturating_add(self.timer as i64);
        Some(due.saturating_sub(now).max(0))
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.power_action() {
            Some(action) => write!(
                f,
                "{} in {}s (armed at {}), last request at {}",
                action, self.timer, self.issued_at, self.when
            )?,
            None => write!(f, "nothing scheduled, last request at {}", self.when)?,
        }
        match self.ack() {
            Some(Ack::None) | None => Ok(()),
            Some(ack) => write!(f, ", ack {:?}", ack),
        }
    }
}
