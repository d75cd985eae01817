//! Client Dispatcher: build one signed request and fan it out over UDP.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use lsd_core::{
    decode_server_state, sign_request, unix_time, Request, RequestKind, ServerState,
    SignRequestError, MSG_MAX_SIZE,
};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::resolve::Family;

/// What the user asked for, before it is stamped and signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub kind: RequestKind,
    pub timer: i32,
    pub force: bool,
    pub message: String,
}

impl Intent {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            timer: 0,
            force: false,
            message: String::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("cannot sign request: {0}")]
    Sign(#[from] SignRequestError),
    #[error("cannot open socket: {0}")]
    Socket(std::io::Error),
    #[error("request was not delivered to any target")]
    NothingSent,
}

pub fn build_request(intent: &Intent, when: i64) -> Request {
    if intent.message.len() > MSG_MAX_SIZE {
        warn!(
            "message is {} bytes, only the first {} are sent",
            intent.message.len(),
            MSG_MAX_SIZE
        );
    }
    Request::new(intent.kind, when)
        .with_timer(intent.timer)
        .with_force(intent.force)
        .with_message(intent.message.as_bytes())
}

/// Encode and sign the request for `intent` stamped with `when`. Every target gets these bytes.
pub fn signed_payload(
    intent: &Intent,
    when: i64,
    private_key: &Path,
) -> Result<Vec<u8>, DispatchError> {
    Ok(sign_request(&build_request(intent, when), private_key)?)
}

/// Target list: the broadcast address first, then each unicast address, all on `port`.
pub fn targets(broadcast: Option<IpAddr>, unicast: &[IpAddr], port: u16) -> Vec<SocketAddr> {
    broadcast
        .into_iter()
        .chain(unicast.iter().copied())
        .map(|ip| SocketAddr::new(ip, port))
        .collect()
}

/// Ephemeral UDP socket for `family`, with SO_BROADCAST when `broadcast` is set.
pub async fn open_socket(family: Family, broadcast: bool) -> Result<UdpSocket, DispatchError> {
    let socket = UdpSocket::bind((family.unspecified(), 0))
        .await
        .map_err(DispatchError::Socket)?;
    if broadcast {
        socket.set_broadcast(true).map_err(DispatchError::Socket)?;
    }
    Ok(socket)
}

/// Result of one fan-out.
#[derive(Debug, Default)]
pub struct Delivery {
    pub sent: Vec<SocketAddr>,
    pub failed: Vec<(SocketAddr, std::io::Error)>,
}

/// Send `payload` to every target in order. A failed send is logged and skipped.
pub async fn send_all(socket: &UdpSocket, payload: &[u8], targets: &[SocketAddr]) -> Delivery {
    let mut delivery = Delivery::default();
    for &target in targets {
        match socket.send_to(payload, target).await {
            Ok(n) => {
                debug!("sent {} bytes to {}", n, target);
                delivery.sent.push(target);
            }
            Err(e) => {
                warn!("cannot send to {}: {}", target, e);
                delivery.failed.push((target, e));
            }
        }
    }
    delivery
}

/// Send a query and gather ServerState replies. Each try sends to every target and waits
/// `timeout`; a further try happens only while no reply has arrived. Replies are kept one
/// per sender, latest wins.
///
/// The first try is stamped `when`. A daemon that answered a lost try has already moved its
/// watermark, so every retry is signed again with a strictly newer timestamp.
pub async fn collect_states(
    socket: &UdpSocket,
    intent: &Intent,
    when: i64,
    private_key: &Path,
    targets: &[SocketAddr],
    timeout: Duration,
    tries: u32,
) -> Result<Vec<(SocketAddr, ServerState)>, DispatchError> {
    let mut replies: Vec<(SocketAddr, ServerState)> = Vec::new();
    let mut buf = [0u8; 512];
    let mut stamp = when;
    for attempt in 1..=tries.max(1) {
        if attempt > 1 {
            stamp = unix_time().max(stamp.saturating_add(1));
        }
        let payload = signed_payload(intent, stamp, private_key)?;
        if send_all(socket, &payload, targets).await.sent.is_empty() {
            return Err(DispatchError::NothingSent);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let (n, from) =
                match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                    Ok(Ok(r)) => r,
                    Ok(Err(e)) => {
                        warn!("receive failed: {}", e);
                        continue;
                    }
                    Err(_) => break,
                };
            let mut state = ServerState::default();
            if !decode_server_state(&buf[..n], &mut state) {
                debug!("ignoring {}-byte datagram from {}", n, from);
                continue;
            }
            match replies.iter_mut().find(|(addr, _)| *addr == from) {
                Some(slot) => slot.1 = state,
                None => replies.push((from, state)),
            }
            if targets.iter().all(|t| replies.iter().any(|(a, _)| a == t)) {
                return Ok(replies);
            }
        }
        if !replies.is_empty() {
            break;
        }
        info!("no reply after try {} of {}", attempt, tries.max(1));
    }
    Ok(replies)
}
