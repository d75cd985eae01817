//! Server engine: one UDP socket, one datagram at a time, never exits on a bad datagram.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use lsd_core::{encode_server_state, Action, Rejection, ServerCore};
use tokio::net::UdpSocket;

use crate::scheduler::Scheduler;
use crate::sink::{NotificationSink, Sinks};

/// Largest datagram read in one go; a valid request is at most 338 bytes.
const RECV_BUF_SIZE: usize = 2048;

pub struct Engine {
    core: ServerCore,
    scheduler: Scheduler,
    notify: Arc<dyn NotificationSink>,
}

/// Bind the daemon socket on all IPv4 interfaces.
pub async fn bind(port: u16) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(("0.0.0.0", port)).await
}

impl Engine {
    pub fn new(core: ServerCore, sinks: Sinks, confirm_timeout: Duration) -> Self {
        let notify = sinks.notify.clone();
        Self {
            core,
            scheduler: Scheduler::new(sinks, confirm_timeout),
            notify,
        }
    }

    /// Validate and act on one datagram. Returns the reply to send back, if any.
    /// Rejected datagrams get no reply.
    pub async fn handle_datagram(
        &mut self,
        bytes: &[u8],
        from: SocketAddr,
    ) -> Result<Option<Vec<u8>>, Rejection> {
        if self.scheduler.armed().is_none() {
            self.core.on_disarmed();
        }
        let action = self.core.on_datagram(bytes)?;
        info!("accepted from {}: {:?}", from, action);
        match action {
            Action::Schedule {
                action,
                timer,
                force,
                message,
            } => match self.scheduler.schedule(action, timer, force, &message).await {
                Ok(outcome) => self.core.on_schedule_outcome(action, timer, outcome),
                Err(e) => error!("cannot schedule {}: {}", action, e),
            },
            Action::Abort => {
                if !self.scheduler.cancel() {
                    debug!("abort from {} with nothing armed", from);
                }
                self.core.on_disarmed();
            }
            Action::Notify(message) => {
                let sink = self.notify.clone();
                tokio::task::spawn_blocking(move || sink.notify(&message));
            }
            Action::Query(state) => match encode_server_state(&state) {
                Ok(reply) => return Ok(Some(reply)),
                Err(e) => error!("cannot encode state for {}: {}", from, e),
            },
            Action::Disabled(kind) => warn!("{} from {} is disabled by configuration", kind, from),
        }
        Ok(None)
    }

    /// Receive loop. Runs until the task is dropped.
    pub async fn run(mut self, socket: UdpSocket) {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        loop {
            let (n, from) = match socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    error!("receive failed: {}", e);
                    continue;
                }
            };
            debug!("received {} bytes from {}", n, from);
            match self.handle_datagram(&buf[..n], from).await {
                Ok(Some(reply)) => {
                    if let Err(e) = socket.send_to(&reply, from).await {
                        warn!("cannot reply to {}: {}", from, e);
                    }
                }
                Ok(None) => {}
                Err(rejection) => warn!("discarded datagram from {}: {}", from, rejection),
            }
        }
    }
}
