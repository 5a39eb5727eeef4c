//! IPv4 network prefixes and routes.

use core::fmt;
use core::net::{Ipv4Addr, SocketAddrV4};
use core::str::FromStr;

use crate::constants::MAX_PREFIX_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetParseError {
    InvalidAddress,
    InvalidPrefixLen,
    InvalidPort,
}

impl fmt::Display for NetParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetParseError::InvalidAddress => write!(f, "invalid IPv4 address"),
            NetParseError::InvalidPrefixLen => write!(f, "prefix length must be 0-32"),
            NetParseError::InvalidPort => write!(f, "invalid port"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for NetParseError {}

/// Netmask with the `len` high-order bits set.
#[inline]
pub fn prefix_mask(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(len.min(MAX_PREFIX_LEN)))
    }
}

/// An IPv4 network: address plus prefix length.
///
/// Host bits beyond the prefix are always zero, so two values compare
/// equal exactly when they describe the same network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Net {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Net {
    /// Build a network, clearing any host bits of `addr`.
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, NetParseError> {
        if prefix_len > MAX_PREFIX_LEN {
            return Err(NetParseError::InvalidPrefixLen);
        }
        let bits = u32::from(addr) & prefix_mask(prefix_len);
        Ok(Ipv4Net {
            network: Ipv4Addr::from(bits),
            prefix_len,
        })
    }

    /// The default route, `0.0.0.0/0`.
    pub const fn default_route() -> Self {
        Ipv4Net {
            network: Ipv4Addr::UNSPECIFIED,
            prefix_len: 0,
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn mask(&self) -> u32 {
        prefix_mask(self.prefix_len)
    }

    /// True if `addr` falls inside this network.
    #[inline]
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == u32::from(self.network)
    }
}

impl fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Parses `a.b.c.d/len`; a bare address is taken as a /32.
impl FromStr for Ipv4Net {
    type Err = NetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => {
                let len = len
                    .trim()
                    .parse::<u8>()
                    .map_err(|_| NetParseError::InvalidPrefixLen)?;
                (addr, len)
            }
            None => (s, MAX_PREFIX_LEN),
        };
        let addr = addr
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|_| NetParseError::InvalidAddress)?;
        Ipv4Net::new(addr, len)
    }
}

/// Parse an `a.b.c.d:port` next-hop endpoint. Port 0 is rejected.
pub fn parse_next_hop(s: &str) -> Result<SocketAddrV4, NetParseError> {
    let (addr, port) = s
        .trim()
        .rsplit_once(':')
        .ok_or(NetParseError::InvalidPort)?;
    let addr = addr
        .parse::<Ipv4Addr>()
        .map_err(|_| NetParseError::InvalidAddress)?;
    let port = port.parse::<u16>().map_err(|_| NetParseError::InvalidPort)?;
    if port == 0 {
        return Err(NetParseError::InvalidPort);
    }
    Ok(SocketAddrV4::new(addr, port))
}

/// A routing entry: packets for `net` are sent to `next_hop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub net: Ipv4Net,
    pub next_hop: SocketAddrV4,
}

impl Route {
    pub fn new(net: Ipv4Net, next_hop: SocketAddrV4) -> Self {
        Route { net, next_hop }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.net, self.next_hop)
    }
}
