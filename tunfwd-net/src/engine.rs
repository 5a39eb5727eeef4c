//! Forwarding engine: one `poll(2)` loop over TUN, UDP and control.
//!
//! Each wakeup services the control descriptor first, then moves at most
//! `burst` packets TUN -> UDP and at most `burst` packets UDP -> TUN. The
//! routing table is owned by the engine and only mutated from inside the
//! loop, so every lookup sees either all of a command or none of it.
//!
//! Drops never end the loop. Only STOP, closure of the control channel,
//! a failing control read, an invalid or hung-up descriptor, a TUN device
//! whose reads keep failing, or a failing `poll` do.

use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::BorrowedFd;

use tunfwd_core::constants::IPV4_HEADER_MIN;
use tunfwd_core::{ipv4, RoutingTable};

use crate::context::{EngineOptions, RuntimeContext};
use crate::control::{self, ControlOutcome, ControlReader, Framing, Received};
use crate::stats::ProxyStats;
use crate::sys::{self, PollSet};

const CTL: usize = 0;
const TUN: usize = 1;
const UDP: usize = 2;

/// Consecutive failed TUN reads tolerated before the device is given up on.
const TUN_READ_FAILURE_LIMIT: u32 = 16;

/// Emit a drop/protocol diagnostic only when `log_errors` is set.
macro_rules! diag {
    ($enabled:expr, $($arg:tt)*) => {
        if $enabled {
            log::warn!($($arg)*);
        }
    };
}

/// Why the loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A STOP command was received.
    Stopped,
    /// The control channel was closed by its peer.
    ControlClosed,
}

/// Orderly termination report.
#[derive(Debug, Clone)]
pub struct ProxyExit {
    pub reason: ExitReason,
    pub stats: ProxyStats,
    pub routes: RoutingTable,
}

/// Conditions that end the loop abnormally.
#[derive(Debug)]
pub enum ProxyError {
    /// MTU too small to hold an IPv4 header.
    InvalidMtu(usize),
    /// A descriptor could not be prepared for the loop.
    Setup(&'static str, io::Error),
    /// `poll` itself failed.
    Poll(io::Error),
    /// Reading the control descriptor failed.
    Control(io::Error),
    /// `poll` reported `POLLNVAL` for a descriptor.
    InvalidDescriptor(&'static str),
    /// A data descriptor hung up and can no longer deliver packets.
    Hangup(&'static str),
    /// A data descriptor stayed readable but every read failed.
    ReadFailed(&'static str),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::InvalidMtu(mtu) => {
                write!(f, "MTU {} is smaller than an IPv4 header", mtu)
            }
            ProxyError::Setup(which, e) => write!(f, "failed to prepare {} descriptor: {}", which, e),
            ProxyError::Poll(e) => write!(f, "poll failed: {}", e),
            ProxyError::Control(e) => write!(f, "control channel read failed: {}", e),
            ProxyError::InvalidDescriptor(which) => write!(f, "{} descriptor is invalid", which),
            ProxyError::Hangup(which) => write!(f, "{} descriptor hung up", which),
            ProxyError::ReadFailed(which) => write!(f, "{} descriptor keeps failing reads", which),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Setup(_, e) | ProxyError::Poll(e) | ProxyError::Control(e) => Some(e),
            _ => None,
        }
    }
}

/// Whether a data handler moved (or consumed) a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Busy,
    Idle,
    /// The descriptor reported end of file.
    Eof,
    /// Reads failed `TUN_READ_FAILURE_LIMIT` times in a row.
    Failed,
}

/// Run the forwarder with default options and an empty routing table
/// until STOP, control-channel closure, or a fatal error.
pub fn run_proxy(
    tun: BorrowedFd<'_>,
    udp: BorrowedFd<'_>,
    control: BorrowedFd<'_>,
    interface_address: Ipv4Addr,
    interface_mtu: usize,
    log_errors: bool,
) -> Result<ProxyExit, ProxyError> {
    let ctx = RuntimeContext {
        tun,
        udp,
        control,
        interface_address,
        interface_mtu,
        log_errors,
    };
    Engine::new(ctx, EngineOptions::default()).run()
}

/// The forwarding loop and the state it owns.
pub struct Engine<'fd> {
    ctx: RuntimeContext<'fd>,
    options: EngineOptions,
    routes: RoutingTable,
    stats: ProxyStats,
    control: ControlReader,
    tun_read_failures: u32,
    /// One byte past the MTU so oversized datagrams are detectable.
    buf: Vec<u8>,
}

impl<'fd> Engine<'fd> {
    pub fn new(ctx: RuntimeContext<'fd>, options: EngineOptions) -> Self {
        Engine {
            buf: vec![0u8; ctx.interface_mtu + 1],
            ctx,
            options: EngineOptions {
                burst: options.burst.max(1),
                ..options
            },
            routes: RoutingTable::new(),
            stats: ProxyStats::default(),
            // `run` replaces this once the descriptor type is known
            control: ControlReader::new(Framing::Message),
            tun_read_failures: 0,
        }
    }

    /// Start from a pre-populated routing table.
    pub fn with_routes(mut self, routes: RoutingTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn stats(&self) -> &ProxyStats {
        &self.stats
    }

    /// Run until shutdown. Consumes the engine; its final table and
    /// counters come back in the exit report.
    pub fn run(mut self) -> Result<ProxyExit, ProxyError> {
        if self.ctx.interface_mtu < IPV4_HEADER_MIN {
            return Err(ProxyError::InvalidMtu(self.ctx.interface_mtu));
        }
        for (name, fd) in [
            ("tun", self.ctx.tun),
            ("udp", self.ctx.udp),
            ("control", self.ctx.control),
        ] {
            sys::set_nonblocking(fd).map_err(|e| ProxyError::Setup(name, e))?;
        }
        let framing =
            Framing::detect(self.ctx.control).map_err(|e| ProxyError::Setup("control", e))?;
        self.control = ControlReader::new(framing);

        log::info!(
            "forwarding engine started: address {}, mtu {}, {} route(s), log_errors {}, {:?} control",
            self.ctx.interface_address,
            self.ctx.interface_mtu,
            self.routes.len(),
            self.ctx.log_errors,
            framing
        );

        let mut polls = PollSet::new([self.ctx.control, self.ctx.tun, self.ctx.udp]);
        let result = loop {
            match self.turn(&mut polls) {
                Ok(Some(reason)) => break Ok(reason),
                Ok(None) => continue,
                Err(e) => break Err(e),
            }
        };

        match result {
            Ok(reason) => {
                log::info!("forwarding engine exiting ({:?}): {}", reason, self.stats);
                Ok(ProxyExit {
                    reason,
                    stats: self.stats,
                    routes: self.routes,
                })
            }
            Err(e) => {
                log::error!("forwarding engine failed: {}", e);
                Err(e)
            }
        }
    }

    /// One wait plus dispatch. `Some` ends the loop.
    fn turn(&mut self, polls: &mut PollSet<3>) -> Result<Option<ExitReason>, ProxyError> {
        if polls.wait().map_err(ProxyError::Poll)? == 0 {
            return Ok(None);
        }

        let ctl = polls.readiness(CTL);
        if ctl.invalid() {
            return Err(ProxyError::InvalidDescriptor("control"));
        }
        if ctl.readable() || ctl.hangup() {
            match self.handle_control()? {
                ControlOutcome::Continue => {}
                ControlOutcome::Stop => return Ok(Some(ExitReason::Stopped)),
                ControlOutcome::Closed => return Ok(Some(ExitReason::ControlClosed)),
            }
        }

        let tun = polls.readiness(TUN);
        if tun.invalid() {
            return Err(ProxyError::InvalidDescriptor("tun"));
        }
        if tun.readable() {
            for _ in 0..self.options.burst {
                match self.tun_to_udp() {
                    Activity::Busy => {}
                    Activity::Idle => break,
                    Activity::Eof => return Err(ProxyError::Hangup("tun")),
                    Activity::Failed => return Err(ProxyError::ReadFailed("tun")),
                }
            }
        } else if tun.hangup() {
            return Err(ProxyError::Hangup("tun"));
        }

        let udp = polls.readiness(UDP);
        if udp.invalid() {
            return Err(ProxyError::InvalidDescriptor("udp"));
        }
        if udp.readable() {
            for _ in 0..self.options.burst {
                if self.udp_to_tun() != Activity::Busy {
                    break;
                }
            }
        } else if udp.hangup() {
            return Err(ProxyError::Hangup("udp"));
        }

        Ok(None)
    }

    fn handle_control(&mut self) -> Result<ControlOutcome, ProxyError> {
        match self.control.receive(self.ctx.control).map_err(ProxyError::Control)? {
            Received::Command(cmd) => {
                self.stats.commands += 1;
                Ok(control::apply(&mut self.routes, cmd))
            }
            Received::Malformed(e) => {
                self.stats.protocol_errors += 1;
                diag!(self.ctx.log_errors, "discarding control record: {}", e);
                Ok(ControlOutcome::Continue)
            }
            Received::Closed => {
                log::info!("control channel closed by peer");
                Ok(ControlOutcome::Closed)
            }
            Received::Nothing => Ok(ControlOutcome::Continue),
        }
    }

    /// Read one packet from the TUN device and send it to its next hop.
    fn tun_to_udp(&mut self) -> Activity {
        let mtu = self.ctx.interface_mtu;
        let log_errors = self.ctx.log_errors;

        let n = match sys::read(self.ctx.tun, &mut self.buf[..mtu]) {
            Ok(0) => return Activity::Eof,
            Ok(n) => n,
            Err(ref e) if sys::is_transient(e) => return Activity::Idle,
            Err(e) => {
                self.stats.read_errors += 1;
                self.tun_read_failures += 1;
                if self.tun_read_failures >= TUN_READ_FAILURE_LIMIT {
                    log::error!(
                        "giving up on TUN device after {} failed reads: {}",
                        self.tun_read_failures,
                        e
                    );
                    return Activity::Failed;
                }
                diag!(log_errors, "error reading from TUN device: {}", e);
                return Activity::Idle;
            }
        };
        self.tun_read_failures = 0;
        self.stats.tun_rx_packets += 1;
        self.stats.tun_rx_bytes += n as u64;

        let dst = match ipv4::destination(&self.buf[..n]) {
            Ok(dst) => dst,
            Err(e) => {
                self.stats.malformed += 1;
                diag!(log_errors, "unable to route packet: {}", e);
                return Activity::Busy;
            }
        };

        let next_hop = match self.routes.lookup(dst) {
            Some(hop) => hop,
            None => {
                self.stats.no_route += 1;
                diag!(log_errors, "no route found for {}", dst);
                if self.options.icmp_errors {
                    let reply = ipv4::net_unreachable(&self.buf[..n], self.ctx.interface_address);
                    self.send_icmp(reply);
                }
                return Activity::Busy;
            }
        };

        if self.options.decrement_ttl && !ipv4::decrement_ttl(&mut self.buf[..n]) {
            self.stats.ttl_expired += 1;
            diag!(log_errors, "TTL expired for packet to {}", dst);
            if self.options.icmp_errors {
                let reply = ipv4::ttl_exceeded(&self.buf[..n], self.ctx.interface_address);
                self.send_icmp(reply);
            }
            return Activity::Busy;
        }

        match sys::send_to(self.ctx.udp, &self.buf[..n], next_hop) {
            Ok(sent) if sent == n => {
                self.stats.udp_tx_packets += 1;
                self.stats.udp_tx_bytes += n as u64;
            }
            Ok(sent) => {
                self.stats.send_errors += 1;
                diag!(
                    log_errors,
                    "was only able to send {} out of {} bytes to {}",
                    sent,
                    n,
                    next_hop
                );
            }
            Err(e) => {
                self.stats.send_errors += 1;
                diag!(log_errors, "UDP send to {} failed: {}", next_hop, e);
            }
        }
        Activity::Busy
    }

    /// Receive one datagram and write its payload to the TUN device.
    fn udp_to_tun(&mut self) -> Activity {
        let mtu = self.ctx.interface_mtu;
        let log_errors = self.ctx.log_errors;

        let n = match sys::recv(self.ctx.udp, &mut self.buf) {
            Ok(n) => n,
            Err(ref e) if sys::is_transient(e) => return Activity::Idle,
            Err(e) => {
                diag!(log_errors, "error reading from UDP socket: {}", e);
                return Activity::Idle;
            }
        };
        self.stats.udp_rx_packets += 1;
        self.stats.udp_rx_bytes += n as u64;

        if n > mtu {
            self.stats.oversize += 1;
            diag!(log_errors, "dropping datagram larger than MTU {}", mtu);
            return Activity::Busy;
        }
        if n == 0 {
            self.stats.malformed += 1;
            diag!(log_errors, "dropping empty datagram");
            return Activity::Busy;
        }

        match sys::write(self.ctx.tun, &self.buf[..n]) {
            Ok(written) if written == n => {
                self.stats.tun_tx_packets += 1;
                self.stats.tun_tx_bytes += n as u64;
            }
            Ok(written) => {
                self.stats.write_errors += 1;
                diag!(
                    log_errors,
                    "was only able to write {} out of {} bytes to TUN device",
                    written,
                    n
                );
            }
            Err(e) => {
                self.stats.write_errors += 1;
                diag!(log_errors, "error writing to TUN device: {}", e);
            }
        }
        Activity::Busy
    }

    fn send_icmp(&mut self, reply: Option<Vec<u8>>) {
        let Some(reply) = reply else { return };
        match sys::write(self.ctx.tun, &reply) {
            Ok(_) => self.stats.icmp_sent += 1,
            Err(e) => diag!(self.ctx.log_errors, "failed to write ICMP error to TUN: {}", e),
        }
    }
}
