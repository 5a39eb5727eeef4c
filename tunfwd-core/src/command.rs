//! Control-channel commands and their fixed wire record.
//!
//! One record per message, laid out like the C struct operators have
//! always written to the control descriptor:
//!
//! ```text
//! offset  size  field          encoding
//!      0     4  cmd            i32, host byte order (1 set, 2 del, 3 stop)
//!      4     4  dest_net       IPv4 address, network byte order
//!      8     4  dest_net_len   i32, host byte order, 0..=32
//!     12     4  next_hop_ip    IPv4 address, network byte order
//!     16     2  next_hop_port  i16, host byte order (bits read as u16)
//!     18     2  padding
//! ```

use core::fmt;
use core::net::{Ipv4Addr, SocketAddrV4};

use crate::constants::{CMD_DEL_ROUTE, CMD_SET_ROUTE, CMD_STOP, MAX_PREFIX_LEN, RECORD_LEN};
use crate::net::{Ipv4Net, Route};

/// A decoded control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Install `route`, replacing any route for the same network.
    SetRoute(Route),
    /// Remove the route for exactly this network.
    DelRoute(Ipv4Net),
    /// Leave the forwarding loop.
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Record was not exactly `RECORD_LEN` bytes.
    Length(usize),
    UnknownCommand(i32),
    InvalidPrefixLen(i32),
    /// SET_ROUTE with next-hop port 0.
    InvalidPort,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Length(n) => {
                write!(f, "control record is {} bytes, expected {}", n, RECORD_LEN)
            }
            DecodeError::UnknownCommand(c) => write!(f, "unknown command {}", c),
            DecodeError::InvalidPrefixLen(l) => write!(f, "prefix length {} out of range", l),
            DecodeError::InvalidPort => write!(f, "next-hop port must be non-zero"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

impl Command {
    /// Decode one wire record.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() != RECORD_LEN {
            return Err(DecodeError::Length(buf.len()));
        }

        let cmd = i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        match cmd {
            CMD_SET_ROUTE => {
                let net = decode_net(buf)?;
                let ip = Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]);
                let port = i16::from_ne_bytes([buf[16], buf[17]]) as u16;
                if port == 0 {
                    return Err(DecodeError::InvalidPort);
                }
                Ok(Command::SetRoute(Route::new(net, SocketAddrV4::new(ip, port))))
            }
            CMD_DEL_ROUTE => Ok(Command::DelRoute(decode_net(buf)?)),
            CMD_STOP => Ok(Command::Stop),
            other => Err(DecodeError::UnknownCommand(other)),
        }
    }

    /// Encode into a wire record. Unused fields are zero.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        match self {
            Command::SetRoute(route) => {
                put_header(&mut buf, CMD_SET_ROUTE, &route.net);
                buf[12..16].copy_from_slice(&route.next_hop.ip().octets());
                buf[16..18].copy_from_slice(&(route.next_hop.port() as i16).to_ne_bytes());
            }
            Command::DelRoute(net) => put_header(&mut buf, CMD_DEL_ROUTE, net),
            Command::Stop => buf[0..4].copy_from_slice(&CMD_STOP.to_ne_bytes()),
        }
        buf
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetRoute(route) => write!(f, "set route {}", route),
            Command::DelRoute(net) => write!(f, "del route {}", net),
            Command::Stop => write!(f, "stop"),
        }
    }
}

fn decode_net(buf: &[u8]) -> Result<Ipv4Net, DecodeError> {
    let addr = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);
    let len = i32::from_ne_bytes([buf[8], buf[9], buf[10], buf[11]]);
    if !(0..=MAX_PREFIX_LEN as i32).contains(&len) {
        return Err(DecodeError::InvalidPrefixLen(len));
    }
    Ipv4Net::new(addr, len as u8).map_err(|_| DecodeError::InvalidPrefixLen(len))
}

fn put_header(buf: &mut [u8; RECORD_LEN], cmd: i32, net: &Ipv4Net) {
    buf[0..4].copy_from_slice(&cmd.to_ne_bytes());
    buf[4..8].copy_from_slice(&net.network().octets());
    buf[8..12].copy_from_slice(&i32::from(net.prefix_len()).to_ne_bytes());
}
