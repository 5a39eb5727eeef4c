//! Traffic and drop counters for one engine run.

use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyStats {
    /// Packets and bytes read from the TUN device.
    pub tun_rx_packets: u64,
    pub tun_rx_bytes: u64,
    /// Datagrams and bytes sent to next hops.
    pub udp_tx_packets: u64,
    pub udp_tx_bytes: u64,
    /// Datagrams and bytes received on the UDP socket.
    pub udp_rx_packets: u64,
    pub udp_rx_bytes: u64,
    /// Packets and bytes written to the TUN device.
    pub tun_tx_packets: u64,
    pub tun_tx_bytes: u64,

    pub no_route: u64,
    pub malformed: u64,
    pub oversize: u64,
    pub ttl_expired: u64,
    /// Failed or short UDP sends.
    pub send_errors: u64,
    /// Failed or short TUN writes.
    pub write_errors: u64,
    pub icmp_sent: u64,
    /// Failed TUN reads; nothing was consumed, so these are not drops.
    pub read_errors: u64,

    pub commands: u64,
    pub protocol_errors: u64,
}

impl ProxyStats {
    /// Total packets dropped on either path.
    pub fn dropped(&self) -> u64 {
        self.no_route
            + self.malformed
            + self.oversize
            + self.ttl_expired
            + self.send_errors
            + self.write_errors
    }
}

impl fmt::Display for ProxyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tun->udp {}/{} pkts ({} B), udp->tun {}/{} pkts ({} B), dropped {} \
             (no route {}, malformed {}, oversize {}, ttl {}, send {}, write {}), \
             commands {} (rejected {}), tun read errors {}",
            self.udp_tx_packets,
            self.tun_rx_packets,
            self.udp_tx_bytes,
            self.tun_tx_packets,
            self.udp_rx_packets,
            self.tun_tx_bytes,
            self.dropped(),
            self.no_route,
            self.malformed,
            self.oversize,
            self.ttl_expired,
            self.send_errors,
            self.write_errors,
            self.commands,
            self.protocol_errors,
            self.read_errors,
        )
    }
}
