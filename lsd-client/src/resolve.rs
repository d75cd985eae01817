//! Address Resolver: host names and literals to IP addresses, interface names to
//! their subnet broadcast address.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use log::debug;
use pnet::datalink;

/// Address family the client talks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Family {
    #[default]
    V4,
    V6,
}

impl Family {
    pub fn matches(self, addr: &IpAddr) -> bool {
        match self {
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        }
    }

    /// Wildcard address a sending socket binds to.
    pub fn unspecified(self) -> IpAddr {
        match self {
            Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("cannot resolve {host}: {source}")]
    Lookup {
        host: String,
        source: std::io::Error,
    },
    #[error("{host} has no {family:?} address")]
    NoAddress { host: String, family: Family },
    #[error("no such interface: {0}")]
    NoSuchInterface(String),
    #[error("interface {name} has no {family:?} broadcast address")]
    NoBroadcastAddress { name: String, family: Family },
}

/// Resolve a host name or literal IP to an address of `family`.
pub async fn resolve_one(family: Family, host: &str) -> Result<IpAddr, ResolveError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return if family.matches(&ip) {
            Ok(ip)
        } else {
            Err(ResolveError::NoAddress {
                host: host.to_string(),
                family,
            })
        };
    }
    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|source| ResolveError::Lookup {
            host: host.to_string(),
            source,
        })?;
    for addr in addrs {
        if family.matches(&addr.ip()) {
            debug!("{} resolved to {}", host, addr.ip());
            return Ok(addr.ip());
        }
    }
    Err(ResolveError::NoAddress {
        host: host.to_string(),
        family,
    })
}

/// Resolve every host; the first failure fails the whole call.
pub async fn resolve_many<S: AsRef<str>>(
    family: Family,
    hosts: &[S],
) -> Result<Vec<IpAddr>, ResolveError> {
    let mut out = Vec::with_capacity(hosts.len());
    for host in hosts {
        out.push(resolve_one(family, host.as_ref()).await?);
    }
    Ok(out)
}

/// Broadcast address of `name` for `family`. IPv6 has no broadcast, so a V6 lookup on an
/// existing interface always fails with `NoBroadcastAddress`.
pub fn broadcast_address_of(family: Family, name: &str) -> Result<IpAddr, ResolveError> {
    let iface = datalink::interfaces()
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| ResolveError::NoSuchInterface(name.to_string()))?;
    let no_broadcast = || ResolveError::NoBroadcastAddress {
        name: name.to_string(),
        family,
    };
    if family == Family::V6 || !iface.is_broadcast() {
        return Err(no_broadcast());
    }
    iface
        .ips
        .iter()
        .find(|net| net.is_ipv4())
        .map(|net| net.broadcast())
        .ok_or_else(no_broadcast)
}
