//! IPv4 header inspection and the few rewrites the forwarder performs.

use alloc::vec::Vec;
use core::fmt;
use core::net::Ipv4Addr;

use crate::constants::{
    ICMP_DEST_UNREACH, ICMP_ERROR_TTL, ICMP_HEADER_LEN, ICMP_QUOTE_PAYLOAD, ICMP_TIME_EXCEEDED,
    IPPROTO_ICMP, IPV4_CHECKSUM_OFFSET, IPV4_DST_OFFSET, IPV4_HEADER_MIN, IPV4_PROTO_OFFSET,
    IPV4_SRC_OFFSET, IPV4_TTL_OFFSET,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Shorter than a minimal IPv4 header.
    TooShort(usize),
    /// Version nibble is not 4.
    NotIpv4(u8),
    /// IHL below 5 or beyond the packet.
    BadHeaderLen,
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::TooShort(n) => write!(f, "packet too small ({} bytes)", n),
            PacketError::NotIpv4(v) => write!(f, "not an IPv4 packet (version {})", v),
            PacketError::BadHeaderLen => write!(f, "invalid IPv4 header length"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PacketError {}

/// Validate the fixed part of an IPv4 header and return its length.
pub fn header_len(pkt: &[u8]) -> Result<usize, PacketError> {
    if pkt.len() < IPV4_HEADER_MIN {
        return Err(PacketError::TooShort(pkt.len()));
    }
    let version = pkt[0] >> 4;
    if version != 4 {
        return Err(PacketError::NotIpv4(version));
    }
    let ihl = usize::from(pkt[0] & 0x0f) * 4;
    if ihl < IPV4_HEADER_MIN || ihl > pkt.len() {
        return Err(PacketError::BadHeaderLen);
    }
    Ok(ihl)
}

/// Destination address of an IPv4 packet.
#[inline]
pub fn destination(pkt: &[u8]) -> Result<Ipv4Addr, PacketError> {
    header_len(pkt)?;
    Ok(addr_at(pkt, IPV4_DST_OFFSET))
}

/// Source address of an IPv4 packet.
pub fn source(pkt: &[u8]) -> Result<Ipv4Addr, PacketError> {
    header_len(pkt)?;
    Ok(addr_at(pkt, IPV4_SRC_OFFSET))
}

fn addr_at(pkt: &[u8], off: usize) -> Ipv4Addr {
    Ipv4Addr::new(pkt[off], pkt[off + 1], pkt[off + 2], pkt[off + 3])
}

/// Internet checksum (RFC 1071) over `data`.
///
/// Over a header whose checksum field is already filled in, a correct
/// header yields 0.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    !fold(sum)
}

fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Decrement the TTL in place, patching the header checksum
/// incrementally (RFC 1624, eqn. 3).
///
/// Returns `false` and leaves the packet untouched if the TTL would
/// reach zero; the caller drops such packets.
pub fn decrement_ttl(pkt: &mut [u8]) -> bool {
    let ttl = pkt[IPV4_TTL_OFFSET];
    if ttl <= 1 {
        return false;
    }
    let old = u16::from_be_bytes([ttl, pkt[IPV4_PROTO_OFFSET]]);
    pkt[IPV4_TTL_OFFSET] = ttl - 1;
    let new = u16::from_be_bytes([ttl - 1, pkt[IPV4_PROTO_OFFSET]]);

    let hc = u16::from_be_bytes([pkt[IPV4_CHECKSUM_OFFSET], pkt[IPV4_CHECKSUM_OFFSET + 1]]);
    let sum = u32::from(!hc) + u32::from(!old) + u32::from(new);
    let patched = !fold(sum);
    pkt[IPV4_CHECKSUM_OFFSET..IPV4_CHECKSUM_OFFSET + 2].copy_from_slice(&patched.to_be_bytes());
    true
}

/// True if `pkt` is itself an ICMP error, which must never trigger another.
fn is_icmp_error(pkt: &[u8], ihl: usize) -> bool {
    if pkt[IPV4_PROTO_OFFSET] != IPPROTO_ICMP {
        return false;
    }
    match pkt.get(ihl) {
        Some(&t) => matches!(t, 3 | 4 | 5 | 11 | 12),
        None => false,
    }
}

/// Build an ICMP error (RFC 792) about `orig`, addressed back to its
/// sender and sourced from `local`.
///
/// The body quotes the original header plus the first 8 payload bytes.
/// Returns `None` when no error may be sent: `orig` is malformed, is an
/// ICMP error, is a non-initial fragment, or came from an address that
/// cannot be answered.
pub fn icmp_error(orig: &[u8], local: Ipv4Addr, icmp_type: u8, code: u8) -> Option<Vec<u8>> {
    let ihl = header_len(orig).ok()?;
    if is_icmp_error(orig, ihl) {
        return None;
    }
    let frag_offset = u16::from_be_bytes([orig[6], orig[7]]) & 0x1fff;
    if frag_offset != 0 {
        return None;
    }
    let dst = addr_at(orig, IPV4_SRC_OFFSET);
    if dst.is_unspecified() || dst.is_broadcast() || dst.is_multicast() {
        return None;
    }

    let quote = &orig[..orig.len().min(ihl + ICMP_QUOTE_PAYLOAD)];
    let total = IPV4_HEADER_MIN + ICMP_HEADER_LEN + quote.len();
    let mut pkt = Vec::with_capacity(total);

    // IPv4 header
    pkt.push(0x45);
    pkt.push(0);
    pkt.extend_from_slice(&(total as u16).to_be_bytes());
    pkt.extend_from_slice(&[0, 0, 0, 0]); // id, flags, fragment offset
    pkt.push(ICMP_ERROR_TTL);
    pkt.push(IPPROTO_ICMP);
    pkt.extend_from_slice(&[0, 0]);
    pkt.extend_from_slice(&local.octets());
    pkt.extend_from_slice(&dst.octets());
    let ip_sum = checksum(&pkt[..IPV4_HEADER_MIN]);
    pkt[IPV4_CHECKSUM_OFFSET..IPV4_CHECKSUM_OFFSET + 2].copy_from_slice(&ip_sum.to_be_bytes());

    // ICMP header + quoted datagram
    pkt.push(icmp_type);
    pkt.push(code);
    pkt.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    pkt.extend_from_slice(quote);
    let icmp_sum = checksum(&pkt[IPV4_HEADER_MIN..]);
    pkt[IPV4_HEADER_MIN + 2..IPV4_HEADER_MIN + 4].copy_from_slice(&icmp_sum.to_be_bytes());

    Some(pkt)
}

/// ICMP "network unreachable" for a packet with no route.
pub fn net_unreachable(orig: &[u8], local: Ipv4Addr) -> Option<Vec<u8>> {
    icmp_error(orig, local, ICMP_DEST_UNREACH, crate::constants::ICMP_NET_UNREACH)
}

/// ICMP "TTL exceeded in transit" for a packet whose TTL ran out.
pub fn ttl_exceeded(orig: &[u8], local: Ipv4Addr) -> Option<Vec<u8>> {
    icmp_error(orig, local, ICMP_TIME_EXCEEDED, crate::constants::ICMP_EXC_TTL)
}
