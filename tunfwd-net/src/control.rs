//! Control channel: receiving command records and sending them.
//!
//! The engine side reads one record per readiness event and applies it to
//! the routing table it owns. Datagram and seqpacket channels carry one
//! record per message. Pipes, FIFOs and stream sockets carry a byte
//! stream, which [`ControlReader`] cuts into records. The sending side, [`Controller`], is what
//! operator code holds: it encodes typed commands and writes one record
//! per message to a connected descriptor.

use std::io;
use std::net::SocketAddrV4;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::net::UnixDatagram;
use std::path::Path;

use socket2::{SockRef, Type};
use tunfwd_core::constants::RECORD_LEN;
use tunfwd_core::{Command, DecodeError, Ipv4Net, Route, RoutingTable};

use crate::sys;

/// Read buffer for one record; larger than a record so over-long
/// messages are noticed instead of silently truncated to fit.
const CONTROL_BUF: usize = 64;

/// Result of one read on the control descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Command(Command),
    /// A record arrived but could not be decoded; it has been discarded.
    Malformed(DecodeError),
    /// The peer closed the channel.
    Closed,
    /// Spurious wakeup: nothing to read right now.
    Nothing,
}

/// What the engine does after a control event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Continue,
    Stop,
    Closed,
}

/// Read and decode one message-framed record. Only non-transient read
/// errors are `Err`.
pub fn receive(fd: BorrowedFd<'_>) -> io::Result<Received> {
    let mut buf = [0u8; CONTROL_BUF];
    match sys::read(fd, &mut buf) {
        Ok(0) => Ok(Received::Closed),
        Ok(n) => Ok(match Command::decode(&buf[..n]) {
            Ok(cmd) => Received::Command(cmd),
            Err(e) => Received::Malformed(e),
        }),
        Err(ref e) if sys::is_transient(e) => Ok(Received::Nothing),
        Err(e) => Err(e),
    }
}

/// How records are delimited on a control descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One record per message.
    Message,
    /// Records are consecutive `RECORD_LEN`-byte runs of a byte stream.
    Stream,
}

impl Framing {
    /// `SOCK_STREAM` sockets and anything that is not a socket (pipes,
    /// FIFOs) are streams. Every other socket type keeps boundaries.
    pub fn detect(fd: BorrowedFd<'_>) -> io::Result<Framing> {
        match SockRef::from(&fd).r#type() {
            Ok(ty) if ty == Type::STREAM => Ok(Framing::Stream),
            Ok(_) => Ok(Framing::Message),
            Err(ref e) if e.raw_os_error() == Some(libc::ENOTSOCK) => Ok(Framing::Stream),
            Err(e) => Err(e),
        }
    }
}

/// Per-channel receive state held by the engine.
#[derive(Debug)]
pub struct ControlReader {
    framing: Framing,
    pending: Vec<u8>,
}

impl ControlReader {
    pub fn new(framing: Framing) -> Self {
        ControlReader {
            framing,
            pending: Vec::with_capacity(RECORD_LEN),
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Yield at most one record per call.
    pub fn receive(&mut self, fd: BorrowedFd<'_>) -> io::Result<Received> {
        match self.framing {
            Framing::Message => receive(fd),
            Framing::Stream => self.receive_stream(fd),
        }
    }

    /// Reads never go past the end of the current record, so later
    /// records stay queued in the kernel and keep the descriptor readable.
    fn receive_stream(&mut self, fd: BorrowedFd<'_>) -> io::Result<Received> {
        let mut buf = [0u8; RECORD_LEN];
        let want = RECORD_LEN - self.pending.len();
        match sys::read(fd, &mut buf[..want]) {
            Ok(0) if self.pending.is_empty() => Ok(Received::Closed),
            Ok(0) => {
                // truncated tail; the next read reports closure
                let tail = self.pending.len();
                self.pending.clear();
                Ok(Received::Malformed(DecodeError::Length(tail)))
            }
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                if self.pending.len() < RECORD_LEN {
                    return Ok(Received::Nothing);
                }
                let decoded = Command::decode(&self.pending);
                self.pending.clear();
                Ok(match decoded {
                    Ok(cmd) => Received::Command(cmd),
                    Err(e) => Received::Malformed(e),
                })
            }
            Err(ref e) if sys::is_transient(e) => Ok(Received::Nothing),
            Err(e) => Err(e),
        }
    }
}

/// Apply a decoded command to the routing table.
pub fn apply(table: &mut RoutingTable, cmd: Command) -> ControlOutcome {
    match cmd {
        Command::SetRoute(route) => {
            match table.insert_or_replace(route) {
                Some(old) => log::debug!("route {} replaced (was via {})", route, old),
                None => log::debug!("route {} added", route),
            }
            ControlOutcome::Continue
        }
        Command::DelRoute(net) => {
            match table.remove(&net) {
                Some(hop) => log::debug!("route {} via {} removed", net, hop),
                None => log::debug!("route {} not present, nothing removed", net),
            }
            ControlOutcome::Continue
        }
        Command::Stop => ControlOutcome::Stop,
    }
}

/// Sending end of a control channel.
#[derive(Debug)]
pub struct Controller {
    fd: OwnedFd,
}

impl Controller {
    /// Wrap any connected descriptor: a socket, or the write end of a pipe.
    pub fn from_fd(fd: OwnedFd) -> Self {
        Controller { fd }
    }

    /// Connect to a daemon's Unix datagram control socket.
    pub fn connect<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let sock = UnixDatagram::unbound()?;
        sock.connect(path)?;
        Ok(Controller { fd: sock.into() })
    }

    /// Send one command as a single record.
    pub fn send(&self, cmd: &Command) -> io::Result<()> {
        let record = cmd.encode();
        let n = sys::write(self.fd.as_fd(), &record)?;
        if n != RECORD_LEN {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short control write: {} of {} bytes", n, RECORD_LEN),
            ));
        }
        Ok(())
    }

    pub fn set_route(&self, net: Ipv4Net, next_hop: SocketAddrV4) -> io::Result<()> {
        self.send(&Command::SetRoute(Route::new(net, next_hop)))
    }

    pub fn del_route(&self, net: Ipv4Net) -> io::Result<()> {
        self.send(&Command::DelRoute(net))
    }

    pub fn stop(&self) -> io::Result<()> {
        self.send(&Command::Stop)
    }
}

impl AsFd for Controller {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Create a connected control channel: the `Controller` for the operator
/// side and the descriptor to hand to the engine.
pub fn control_pair() -> io::Result<(Controller, OwnedFd)> {
    let (ours, theirs) = sys::packet_pair()?;
    Ok((Controller::from_fd(ours), theirs))
}
