//! Host-driven server core: the host passes datagrams in, the core returns actions.
//! No sockets, no timers. The host performs the action and reports the outcome back.

use std::path::{Path, PathBuf};

use crate::auth;
use crate::protocol::{Ack, Command, PowerAction, RequestKind, ServerState};
use crate::wire::{self, WireError};

/// What the host should do with an accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Arm (or run immediately when `timer == 0`) a power action.
    Schedule {
        action: PowerAction,
        timer: i32,
        force: bool,
        message: String,
    },
    /// Disarm any pending action.
    Abort,
    /// Show the message on the desktop.
    Notify(String),
    /// Send this state back to the requester.
    Query(ServerState),
    /// Valid request for an action the daemon refuses by configuration.
    Disabled(RequestKind),
}

/// Why a datagram was discarded. Nothing is ever sent back for these.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("malformed datagram: {0}")]
    Decode(#[from] WireError),
    #[error("signature verification failed")]
    BadSignature,
    #[error("stale request: when={when} not after watermark {watermark}")]
    Stale { when: i64, watermark: i64 },
    #[error("unknown action code {0:#06x}")]
    UnknownAction(u16),
}

/// Outcome of a Schedule action, reported back by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Armed (or executed) at `issued_at`.
    Armed { issued_at: i64 },
    /// Confirmation declined or timed out.
    Declined,
}

/// Validation state machine plus the in-memory ServerState.
pub struct ServerCore {
    public_key: PathBuf,
    state: ServerState,
    disabled: Vec<RequestKind>,
}

impl ServerCore {
    pub fn new(public_key: impl Into<PathBuf>) -> Self {
        Self {
            public_key: public_key.into(),
            state: ServerState::default(),
            disabled: Vec::new(),
        }
    }

    /// Refuse these kinds even when correctly signed. They still advance the watermark.
    pub fn with_disabled(mut self, disabled: Vec<RequestKind>) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn public_key(&self) -> &Path {
        &self.public_key
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Decode, verify, apply the anti-replay rule and map to an action.
    /// On success the watermark has advanced to the request's `when`.
    pub fn on_datagram(&mut self, bytes: &[u8]) -> Result<Action, Rejection> {
        let signed = wire::decode_datagram(bytes)?;
        if !auth::verify(
            &self.public_key,
            &bytes[..signed.signed_len],
            &signed.signature,
        ) {
            return Err(Rejection::BadSignature);
        }
        let req = signed.request;
        if req.when <= self.state.when {
            return Err(Rejection::Stale {
                when: req.when,
                watermark: self.state.when,
            });
        }
        let kind = req
            .kind()
            .ok_or(Rejection::UnknownAction(req.req_type))?;
        self.state.when = req.when;

        if self.disabled.contains(&kind) {
            if kind.power_action().is_some() {
                self.state.ack = Ack::Disabled as u16;
            }
            return Ok(Action::Disabled(kind));
        }

        let action = match kind.command() {
            Command::Power(action) => Action::Schedule {
                action,
                timer: req.timer,
                force: req.is_forced(),
                message: req.message_text(),
            },
            Command::Abort => Action::Abort,
            Command::Notify => Action::Notify(req.message_text()),
            Command::Query => Action::Query(self.state),
        };
        Ok(action)
    }

    /// Record the outcome of a Schedule action.
    pub fn on_schedule_outcome(&mut self, action: PowerAction, timer: i32, outcome: Outcome) {
        match outcome {
            Outcome::Armed { issued_at } => {
                self.state.power_cmd = action.code();
                self.state.timer = timer;
                self.state.issued_at = issued_at;
                self.state.ack = Ack::Granted as u16;
            }
            Outcome::Declined => {
                self.state.ack = Ack::Denied as u16;
            }
        }
    }

    /// The pending action was disarmed (abort) or has fired.
    pub fn on_disarmed(&mut self) {
        self.state.power_cmd = 0;
        self.state.timer = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;
    use p256::pkcs8::{EncodePublicKey, LineEnding};
    use p256::SecretKey;
    use rand::rngs::OsRng;

    struct Fixture {
        core: ServerCore,
        key: p256::ecdsa::SigningKey,
        public: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.public);
        }
    }

    fn fixture() -> Fixture {
        let secret = SecretKey::random(&mut OsRng);
        let public = std::env::temp_dir().join(format!(
            "lsd-core-{:016x}-public.pem",
            rand::random::<u64>()
        ));
        std::fs::write(
            &public,
            secret.public_key().to_public_key_pem(LineEnding::LF).unwrap(),
        )
        .unwrap();
        Fixture {
            core: ServerCore::new(&public),
            key: p256::ecdsa::SigningKey::from(secret),
            public,
        }
    }

    fn datagram(key: &p256::ecdsa::SigningKey, req: &Request) -> Vec<u8> {
        let mut bytes = wire::encode_request(req).unwrap();
        let sig = auth::sign_with(key, &bytes).unwrap();
        bytes.extend(wire::encode_signature(&sig).unwrap());
        bytes
    }

    #[test]
    fn forced_shutdown_is_scheduled() {
        let mut f = fixture();
        let req = Request::new(RequestKind::Shutdown, 100).with_force(true);
        let action = f.core.on_datagram(&datagram(&f.key, &req)).unwrap();
        assert_eq!(
            action,
            Action::Schedule {
                action: PowerAction::Shutdown,
                timer: 0,
                force: true,
                message: String::new(),
            }
        );
        assert_eq!(f.core.state().when, 100);
    }

    #[test]
    fn watermark_rejects_not_newer() {
        let mut f = fixture();
        let first = Request::new(RequestKind::Notify, 500).with_message("hello");
        f.core.on_datagram(&datagram(&f.key, &first)).unwrap();

        for when in [400, 500] {
            let req = Request::new(RequestKind::Notify, when);
            assert!(matches!(
                f.core.on_datagram(&datagram(&f.key, &req)),
                Err(Rejection::Stale { watermark: 500, .. })
            ));
        }
        let next = Request::new(RequestKind::Notify, 501);
        assert!(f.core.on_datagram(&datagram(&f.key, &next)).is_ok());
        assert_eq!(f.core.state().when, 501);
    }

    #[test]
    fn replayed_capture_is_stale() {
        let mut f = fixture();
        let bytes = datagram(&f.key, &Request::new(RequestKind::Reboot, 42));
        assert!(f.core.on_datagram(&bytes).is_ok());
        assert!(matches!(
            f.core.on_datagram(&bytes),
            Err(Rejection::Stale { .. })
        ));
    }

    #[test]
    fn tampered_datagram_fails_verification_and_keeps_watermark() {
        let mut f = fixture();
        let mut bytes = datagram(&f.key, &Request::new(RequestKind::Reboot, 42).with_timer(60));
        bytes[11] ^= 0x01; // timer
        assert!(matches!(
            f.core.on_datagram(&bytes),
            Err(Rejection::BadSignature)
        ));
        assert_eq!(f.core.state().when, 0);
    }

    #[test]
    fn forged_signature_rejected() {
        let mut f = fixture();
        let stranger = p256::ecdsa::SigningKey::random(&mut OsRng);
        let bytes = datagram(&stranger, &Request::new(RequestKind::Shutdown, 9));
        assert!(matches!(
            f.core.on_datagram(&bytes),
            Err(Rejection::BadSignature)
        ));
    }

    #[test]
    fn unknown_code_rejected() {
        let mut f = fixture();
        let mut req = Request::new(RequestKind::Query, 10);
        req.req_type = 0x0063;
        assert!(matches!(
            f.core.on_datagram(&datagram(&f.key, &req)),
            Err(Rejection::UnknownAction(0x0063))
        ));
        assert_eq!(f.core.state().when, 0);
    }

    #[test]
    fn truncated_datagram_is_decode_error() {
        let mut f = fixture();
        assert!(matches!(
            f.core.on_datagram(&[0u8; 5]),
            Err(Rejection::Decode(_))
        ));
    }

    #[test]
    fn outcome_updates_state() {
        let mut f = fixture();
        let req = Request::new(RequestKind::Hibernate, 7).with_timer(30);
        let Action::Schedule { action, timer, .. } =
            f.core.on_datagram(&datagram(&f.key, &req)).unwrap()
        else {
            panic!("expected Schedule");
        };
        f.core
            .on_schedule_outcome(action, timer, Outcome::Armed { issued_at: 8 });
        let state = *f.core.state();
        assert_eq!(state.power_action(), Some(PowerAction::Hibernate));
        assert_eq!(state.timer, 30);
        assert_eq!(state.issued_at, 8);
        assert_eq!(state.ack(), Some(Ack::Granted));

        let abort = Request::new(RequestKind::Abort, 9);
        assert_eq!(
            f.core.on_datagram(&datagram(&f.key, &abort)).unwrap(),
            Action::Abort
        );
        f.core.on_disarmed();
        assert_eq!(f.core.state().power_action(), None);
        assert_eq!(f.core.state().when, 9);
    }

    #[test]
    fn declined_sets_denied_ack() {
        let mut f = fixture();
        f.core
            .on_schedule_outcome(PowerAction::Reboot, 10, Outcome::Declined);
        assert_eq!(f.core.state().ack(), Some(Ack::Denied));
        assert_eq!(f.core.state().power_action(), None);
    }

    #[test]
    fn query_returns_current_state() {
        let mut f = fixture();
        let req = Request::new(RequestKind::Query, 77);
        match f.core.on_datagram(&datagram(&f.key, &req)).unwrap() {
            Action::Query(state) => assert_eq!(state.when, 77),
            other => panic!("expected Query, got {:?}", other),
        }
    }

    #[test]
    fn disabled_kind_is_refused() {
        let mut f = fixture();
        f.core = ServerCore::new(&f.public).with_disabled(vec![RequestKind::Hibernate]);
        let req = Request::new(RequestKind::Hibernate, 3).with_force(true);
        assert_eq!(
            f.core.on_datagram(&datagram(&f.key, &req)).unwrap(),
            Action::Disabled(RequestKind::Hibernate)
        );
        assert_eq!(f.core.state().ack(), Some(Ack::Disabled));
        assert_eq!(f.core.state().when, 3);
    }
}
