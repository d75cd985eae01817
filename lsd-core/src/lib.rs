//! Signed remote power-management protocol.
//! Host-driven: no sockets or timers here; hosts pass datagrams in and act on what comes out.

pub mod auth;
pub mod config;
pub mod core;
pub mod protocol;
pub mod wire;

pub use auth::{sign, verify, AuthError, KeyFingerprint};
pub use core::{Action, Outcome, Rejection, ServerCore};
pub use protocol::{
    get_force, mask_force, set_force, unix_time, Ack, Command, PowerAction, Request, RequestKind,
    ServerState, DEFAULT_PORT, MSG_MAX_SIZE, SIG_MAX_SIZE,
};
pub use wire::{
    decode_datagram, decode_request_fixed, decode_server_state, decode_signature,
    encode_request, encode_server_state, encode_signature, WireError,
};

/// Encode `req` and append a signature made with the private key at `private_key`.
pub fn sign_request(
    req: &Request,
    private_key: &std::path::Path,
) -> Result<Vec<u8>, SignRequestError> {
    let mut payload = encode_request(req)?;
    let sig = sign(private_key, &payload)?;
    payload.extend(encode_signature(&sig)?);
    Ok(payload)
}

#[derive(Debug, thiserror::Error)]
pub enum SignRequestError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}
