use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};

use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// First port a `NetManager` tries to bind, and the port assumed by `resolve`
/// when the host string carries none.
pub const DEFAULT_PORT: u16 = 48960;

const LOCALHOST: &str = "localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Invalid,
    Loopback,
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    Any,
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            AddressFamily::Any => true,
            AddressFamily::Ipv4 => addr.is_ipv4(),
            AddressFamily::Ipv6 => addr.is_ipv6(),
        }
    }
}

/// A transport endpoint.
///
/// `Loopback` is the in-process endpoint: packets sent to it never touch the
/// OS socket and are delivered through the manager's loopback queues instead.
///
/// Equality and hashing look at the kind and the raw address only (plus the
/// scope of an IPv6 address). Two addresses that differ only by port compare
/// equal; use [`same_endpoint`] when the port matters.
///
/// [`same_endpoint`]: NetAddress::same_endpoint
#[derive(Debug, Clone, Copy, Default)]
pub enum NetAddress {
    #[default]
    Invalid,
    Loopback,
    /// Host-order IPv4 address.
    Ipv4 { ip: u32, port: u16 },
    /// `scope_id` names the interface of a link-local address, 0 otherwise.
    Ipv6 { ip: [u8; 16], port: u16, scope_id: u32 },
}

impl NetAddress {
    pub const fn loopback() -> Self {
        NetAddress::Loopback
    }

    /// Resolves `"host:port"` to an address of the requested family.
    ///
    /// The literal host `localhost` maps to [`NetAddress::Loopback`]. Any other
    /// host goes through blocking system resolution. Every failure yields
    /// [`NetAddress::Invalid`].
    ///
    /// The host and port are split at the first colon, so raw IPv6 literals
    /// (`::1`, `[::1]:80`) do not resolve.
    pub fn resolve(host_port: &str, family: AddressFamily) -> Self {
        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(port) => (host, port),
                Err(_) => {
                    log::warn!("Cannot parse port in address '{}'", host_port);
                    return NetAddress::Invalid;
                }
            },
            None => (host_port, DEFAULT_PORT),
        };

        if host == LOCALHOST {
            return NetAddress::Loopback;
        }

        let addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                log::warn!("Failed to resolve '{}': {}", host, e);
                return NetAddress::Invalid;
            }
        };

        addrs
            .filter(|addr| family.accepts(addr))
            .map(NetAddress::from)
            .next()
            .unwrap_or_else(|| {
                log::warn!("No {:?} address found for '{}'", family, host);
                NetAddress::Invalid
            })
    }

    pub fn kind(&self) -> AddressKind {
        match self {
            NetAddress::Invalid => AddressKind::Invalid,
            NetAddress::Loopback => AddressKind::Loopback,
            NetAddress::Ipv4 { .. } => AddressKind::Ipv4,
            NetAddress::Ipv6 { .. } => AddressKind::Ipv6,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, NetAddress::Invalid)
    }

    pub fn is_loopback(&self) -> bool {
        matches!(self, NetAddress::Loopback)
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            NetAddress::Ipv4 { port, .. } | NetAddress::Ipv6 { port, .. } => Some(*port),
            NetAddress::Invalid | NetAddress::Loopback => None,
        }
    }

    /// Like `==`, but also requires the ports to match.
    pub fn same_endpoint(&self, other: &NetAddress) -> bool {
        self == other && self.port() == other.port()
    }

    /// Renders the address as an OS socket address.
    ///
    /// Invalid and loopback addresses have no socket form.
    pub fn to_socket_addr(&self) -> Result<SocketAddr, NetError> {
        match *self {
            NetAddress::Ipv4 { ip, port } => {
                Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(ip), port)))
            }
            NetAddress::Ipv6 { ip, port, scope_id } => Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(ip),
                port,
                0,
                scope_id,
            ))),
            NetAddress::Invalid | NetAddress::Loopback => {
                Err(NetError::NoSocketAddress(self.kind()))
            }
        }
    }
}

impl From<SocketAddr> for NetAddress {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => NetAddress::Ipv4 {
                ip: u32::from(*v4.ip()),
                port: v4.port(),
            },
            SocketAddr::V6(v6) => NetAddress::Ipv6 {
                ip: v6.ip().octets(),
                port: v6.port(),
                scope_id: v6.scope_id(),
            },
        }
    }
}

impl PartialEq for NetAddress {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NetAddress::Invalid, NetAddress::Invalid) => true,
            (NetAddress::Loopback, NetAddress::Loopback) => true,
            (NetAddress::Ipv4 { ip: a, .. }, NetAddress::Ipv4 { ip: b, .. }) => a == b,
            (
                NetAddress::Ipv6 { ip: a, scope_id: sa, .. },
                NetAddress::Ipv6 { ip: b, scope_id: sb, .. },
            ) => a == b && sa == sb,
            _ => false,
        }
    }
}

impl Eq for NetAddress {}

impl Hash for NetAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        match self {
            NetAddress::Ipv4 { ip, .. } => ip.hash(state),
            NetAddress::Ipv6 { ip, scope_id, .. } => {
                ip.hash(state);
                scope_id.hash(state);
            }
            NetAddress::Invalid | NetAddress::Loopback => {}
        }
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            NetAddress::Invalid => f.write_str("INVALID"),
            NetAddress::Loopback => f.write_str(LOCALHOST),
            NetAddress::Ipv4 { ip, port } => write!(f, "{}:{}", Ipv4Addr::from(ip), port),
            NetAddress::Ipv6 { ip, port, scope_id: 0 } => {
                write!(f, "[{}]:{}", Ipv6Addr::from(ip), port)
            }
            NetAddress::Ipv6 { ip, port, scope_id } => {
                write!(f, "[{}%{}]:{}", Ipv6Addr::from(ip), scope_id, port)
            }
        }
    }
}
