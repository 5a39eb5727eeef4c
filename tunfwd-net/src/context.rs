//! Runtime context and engine options.

use std::net::Ipv4Addr;
use std::os::fd::BorrowedFd;

/// Everything one `run_proxy` invocation works with.
///
/// The descriptors are borrowed: the caller created them and closes them
/// after the engine returns.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeContext<'fd> {
    /// TUN device: one whole IP packet per read/write.
    pub tun: BorrowedFd<'fd>,
    /// Bound UDP socket used for both directions.
    pub udp: BorrowedFd<'fd>,
    /// Control descriptor carrying command records.
    pub control: BorrowedFd<'fd>,
    /// Address configured on the TUN interface.
    pub interface_address: Ipv4Addr,
    /// MTU of the TUN interface; sizes the packet buffer.
    pub interface_mtu: usize,
    /// Emit diagnostics for drops and protocol errors.
    pub log_errors: bool,
}

/// Optional forwarding behaviour. The defaults forward packets unmodified
/// and drop silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Decrement the IPv4 TTL before encapsulating; expired packets drop.
    pub decrement_ttl: bool,
    /// Answer unroutable or expired packets with ICMP errors on the TUN.
    pub icmp_errors: bool,
    /// Most packets moved per data descriptor per wakeup (minimum 1).
    pub burst: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            decrement_ttl: false,
            icmp_errors: false,
            burst: 1,
        }
    }
}
