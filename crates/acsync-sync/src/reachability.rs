//! Address classification for active sync.
//!
//! Terminals on private or otherwise non-routable addresses deliver their
//! events through an inbound push channel and are left out of active
//! polling and streaming. Host names are assumed routable, apart from
//! `localhost` and mDNS `.local` names.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// How a terminal address is treated by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    /// Actively polled and streamed
    Routable,
    /// Private, loopback, link-local or unspecified
    NonRoutable,
}

impl Reachability {
    #[must_use]
    pub fn is_routable(self) -> bool {
        matches!(self, Reachability::Routable)
    }
}

impl std::fmt::Display for Reachability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reachability::Routable => write!(f, "routable"),
            Reachability::NonRoutable => write!(f, "non-routable"),
        }
    }
}

/// Classify a terminal address (`host`, `host:port` or a URL).
#[must_use]
pub fn classify(address: &str) -> Reachability {
    let host = host_of(address);
    let routable = match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ipv4_routable(ip),
        Ok(IpAddr::V6(ip)) => ipv6_routable(ip),
        Err(_) => {
            let name = host.trim_end_matches('.').to_ascii_lowercase();
            !(name.is_empty() || name == "localhost" || name.ends_with(".local"))
        }
    };
    if routable {
        Reachability::Routable
    } else {
        Reachability::NonRoutable
    }
}

/// Host part of an address, without scheme, credentials, port or path.
fn host_of(address: &str) -> &str {
    let mut rest = address.trim();
    if let Some((_, after)) = rest.split_once("://") {
        rest = after;
    }
    rest = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    if let Some((_, after)) = rest.rsplit_once('@') {
        rest = after;
    }

    if let Some(bracketed) = rest.strip_prefix('[') {
        return bracketed.split(']').next().unwrap_or(bracketed);
    }
    // A bare IPv6 address has several colons; only strip a single port.
    match rest.matches(':').count() {
        1 => rest.split(':').next().unwrap_or(rest),
        _ => rest,
    }
}

fn ipv4_routable(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    let shared = a == 100 && (64..128).contains(&b);
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || shared)
}

fn ipv6_routable(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return ipv4_routable(v4);
    }
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    !(ip.is_loopback() || ip.is_unspecified() || unique_local || link_local)
}
