//! Client side of the protocol: resolve targets, sign one request, fan it out.

pub mod config;
pub mod dispatch;
pub mod resolve;

pub use config::Config;
pub use dispatch::{
    build_request, collect_states, open_socket, send_all, signed_payload, targets, Delivery,
    DispatchError, Intent,
};
pub use resolve::{broadcast_address_of, resolve_many, resolve_one, Family, ResolveError};
