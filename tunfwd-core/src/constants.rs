// =============================================================================
// Forwarder constants
// =============================================================================

// --- Addressing ---

/// Longest IPv4 prefix length.
pub const MAX_PREFIX_LEN: u8 = 32;

// --- IPv4 / UDP framing ---

/// Minimum IPv4 header size (no options).
pub const IPV4_HEADER_MIN: usize = 20;

/// Byte offset of the destination address in the IPv4 header.
pub const IPV4_DST_OFFSET: usize = 16;

/// Byte offset of the source address in the IPv4 header.
pub const IPV4_SRC_OFFSET: usize = 12;

/// Byte offset of the TTL field in the IPv4 header.
pub const IPV4_TTL_OFFSET: usize = 8;

/// Byte offset of the protocol field in the IPv4 header.
pub const IPV4_PROTO_OFFSET: usize = 9;

/// Byte offset of the header checksum in the IPv4 header.
pub const IPV4_CHECKSUM_OFFSET: usize = 10;

/// IP protocol number for ICMP.
pub const IPPROTO_ICMP: u8 = 1;

/// TTL used for locally generated ICMP errors.
pub const ICMP_ERROR_TTL: u8 = 64;

/// ICMP header size.
pub const ICMP_HEADER_LEN: usize = 8;

/// ICMP type: destination unreachable.
pub const ICMP_DEST_UNREACH: u8 = 3;

/// ICMP destination-unreachable code: network unreachable.
pub const ICMP_NET_UNREACH: u8 = 0;

/// ICMP type: time exceeded.
pub const ICMP_TIME_EXCEEDED: u8 = 11;

/// ICMP time-exceeded code: TTL exceeded in transit.
pub const ICMP_EXC_TTL: u8 = 0;

/// Bytes of the offending datagram quoted after its header in ICMP errors.
pub const ICMP_QUOTE_PAYLOAD: usize = 8;

/// Encapsulation overhead: 20 bytes outer IPv4 header + 8 bytes UDP header.
pub const ENCAP_OVERHEAD: usize = 28;

/// Default interface MTU: an Ethernet-sized underlay minus encapsulation.
pub const DEFAULT_MTU: usize = 1500 - ENCAP_OVERHEAD;

/// Default UDP port the forwarder listens on.
pub const DEFAULT_PORT: u16 = 8285;

// --- Control channel ---

/// Command code: install or replace a route.
pub const CMD_SET_ROUTE: i32 = 1;

/// Command code: remove a route.
pub const CMD_DEL_ROUTE: i32 = 2;

/// Command code: stop the forwarding loop.
pub const CMD_STOP: i32 = 3;

/// Size of one control record: four 32-bit fields, a 16-bit port and
/// two bytes of trailing struct padding.
pub const RECORD_LEN: usize = 20;
