//! Framing: fixed 16-byte big-endian header, u16-prefixed message, u16-prefixed signature.
//!
//! ```text
//! when(8) | timer(4) | req_type(2) | msg_size(2) | msg | sig_size(2) | sig
//! ```
//!
//! The signature covers everything before `sig_size`. It is appended after
//! packing and never part of what it signs.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::protocol::{Request, ServerState, MSG_MAX_SIZE, SIG_MAX_SIZE};

const LEN_SIZE: usize = 2;

/// Size of the fixed request header.
pub const REQUEST_FIXED_SIZE: usize = 16;

/// Size of an encoded ServerState.
pub const SERVER_STATE_SIZE: usize = 24;

/// Fixed part of a request, as laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub when: i64,
    pub timer: i32,
    pub req_type: u16,
    pub msg_size: u16,
}

/// A request split out of a datagram, with the byte span its signature must cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub request: Request,
    /// Length of the signed prefix (header + message) of the datagram.
    pub signed_len: usize,
    pub signature: Vec<u8>,
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

/// Encode header and message. Messages over `MSG_MAX_SIZE` are clamped. Never signs.
pub fn encode_request(req: &Request) -> Result<Vec<u8>, WireError> {
    let msg = &req.msg[..req.msg.len().min(MSG_MAX_SIZE)];
    let header = RequestHeader {
        when: req.when,
        timer: req.timer,
        req_type: req.req_type,
        msg_size: msg.len() as u16,
    };
    let mut out = options().serialize(&header)?;
    out.reserve(msg.len() + LEN_SIZE + SIG_MAX_SIZE);
    out.extend_from_slice(msg);
    Ok(out)
}

/// Malformed or oversized wire data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("truncated header: {0} bytes")]
    TruncatedHeader(usize),
    #[error("message of {declared} bytes exceeds {max}")]
    MessageTooLarge { declared: usize, max: usize },
    #[error("truncated message: expected {expected} bytes, have {have}")]
    TruncatedMessage { expected: usize, have: usize },
    #[error("missing signature block")]
    MissingSignature,
    #[error("signature of {0} bytes exceeds the maximum")]
    SignatureTooLarge(usize),
    #[error("truncated signature: expected {expected} bytes, have {have}")]
    TruncatedSignature { expected: usize, have: usize },
    #[error("{0} trailing bytes after signature")]
    TrailingBytes(usize),
}

/// Decode the fixed header from the front of `bytes`. Returns the header and the offset of
/// the message. The caller slices `msg_size` bytes and then the signature block.
pub fn decode_request_fixed(bytes: &[u8]) -> Result<(RequestHeader, usize), WireError> {
    if bytes.len() < REQUEST_FIXED_SIZE {
        return Err(WireError::TruncatedHeader(bytes.len()));
    }
    let header: RequestHeader = options().deserialize(&bytes[..REQUEST_FIXED_SIZE])?;
    Ok((header, REQUEST_FIXED_SIZE))
}

/// Length-prefix a detached signature.
pub fn encode_signature(sig: &[u8]) -> Result<Vec<u8>, WireError> {
    if sig.len() > SIG_MAX_SIZE {
        return Err(WireError::SignatureTooLarge(sig.len()));
    }
    let mut out = Vec::with_capacity(LEN_SIZE + sig.len());
    out.extend_from_slice(&(sig.len() as u16).to_be_bytes());
    out.extend_from_slice(sig);
    Ok(out)
}

/// Decode one signature block from the front of `bytes`. Returns the signature and bytes consumed.
pub fn decode_signature(bytes: &[u8]) -> Result<(Vec<u8>, usize), WireError> {
    if bytes.len() < LEN_SIZE {
        return Err(WireError::MissingSignature);
    }
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    if len > SIG_MAX_SIZE {
        return Err(WireError::SignatureTooLarge(len));
    }
    let have = bytes.len() - LEN_SIZE;
    if have < len {
        return Err(WireError::TruncatedSignature {
            expected: len,
            have,
        });
    }
    Ok((bytes[LEN_SIZE..LEN_SIZE + len].to_vec(), LEN_SIZE + len))
}

/// Split a whole datagram into request, signed span and signature.
pub fn decode_datagram(bytes: &[u8]) -> Result<SignedRequest, WireError> {
    let (header, offset) = decode_request_fixed(bytes)?;
    let msg_size = header.msg_size as usize;
    if msg_size > MSG_MAX_SIZE {
        return Err(WireError::MessageTooLarge {
            declared: msg_size,
            max: MSG_MAX_SIZE,
        });
    }
    let rest = &bytes[offset..];
    if rest.len() < msg_size {
        return Err(WireError::TruncatedMessage {
            expected: msg_size,
            have: rest.len(),
        });
    }
    let signed_len = offset + msg_size;
    let (signature, consumed) = decode_signature(&bytes[signed_len..])?;
    let trailing = bytes.len() - signed_len - consumed;
    if trailing != 0 {
        return Err(WireError::TrailingBytes(trailing));
    }
    Ok(SignedRequest {
        request: Request {
            when: header.when,
            timer: header.timer,
            req_type: header.req_type,
            msg: rest[..msg_size].to_vec(),
        },
        signed_len,
        signature,
    })
}

/// Encode a ServerState into its fixed 24-byte form.
pub fn encode_server_state(state: &ServerState) -> Result<Vec<u8>, WireError> {
    Ok(options().serialize(state)?)
}

/// Decode a ServerState into `dest`. A buffer shorter than `SERVER_STATE_SIZE` leaves
/// `dest` untouched and returns false.
pub fn decode_server_state(bytes: &[u8], dest: &mut ServerState) -> bool {
    if bytes.len() < SERVER_STATE_SIZE {
        return false;
    }
    match options().deserialize::<ServerState>(&bytes[..SERVER_STATE_SIZE]) {
        Ok(state) => {
            *dest = state;
            true
        }
        Err(_) => false,
    }
}
