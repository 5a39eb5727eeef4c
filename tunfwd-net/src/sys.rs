//! Thin libc wrappers for the per-packet system calls.
//!
//! Every call takes a borrowed descriptor and maps `-1` to
//! `io::Error::last_os_error()`. Nothing here retries or blocks on its
//! own; the engine decides what a given error means.

use std::io;
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

fn cvt(ret: libc::ssize_t) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// True for errors that mean "try again later", not a real failure.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Switch a descriptor to non-blocking mode, preserving its other flags.
pub fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    if unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub fn read(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
    cvt(unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len()) })
}

pub fn write(fd: BorrowedFd<'_>, buf: &[u8]) -> io::Result<usize> {
    cvt(unsafe { libc::write(fd.as_raw_fd(), buf.as_ptr() as *const libc::c_void, buf.len()) })
}

/// Receive one datagram, discarding the sender address.
pub fn recv(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
    cvt(unsafe {
        libc::recv(
            fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
        )
    })
}

/// Send one datagram to an explicit IPv4 destination.
pub fn send_to(fd: BorrowedFd<'_>, buf: &[u8], dest: SocketAddrV4) -> io::Result<usize> {
    let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = dest.port().to_be();
    sa.sin_addr = libc::in_addr {
        s_addr: u32::from_ne_bytes(dest.ip().octets()),
    };
    cvt(unsafe {
        libc::sendto(
            fd.as_raw_fd(),
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            libc::MSG_NOSIGNAL,
            &sa as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    })
}

/// A connected pair of `SOCK_SEQPACKET` Unix sockets.
///
/// Message boundaries are preserved and closing one end makes reads on
/// the other return 0, which is what both the control channel and a
/// stand-in TUN device need.
pub fn packet_pair() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1, -1];
    let ret = unsafe {
        libc::socketpair(
            libc::AF_UNIX,
            libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC,
            0,
            fds.as_mut_ptr(),
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    // socketpair just handed us two fresh descriptors
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// An anonymous pipe, returned as `(read end, write end)`.
pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1, -1];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Readiness reported by `poll` for one descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness(libc::c_short);

impl Readiness {
    pub fn readable(self) -> bool {
        self.0 & (libc::POLLIN | libc::POLLERR) != 0
    }

    pub fn hangup(self) -> bool {
        self.0 & libc::POLLHUP != 0
    }

    pub fn invalid(self) -> bool {
        self.0 & libc::POLLNVAL != 0
    }

    pub fn any(self) -> bool {
        self.0 != 0
    }
}

/// A fixed set of descriptors polled for input.
pub struct PollSet<const N: usize> {
    fds: [libc::pollfd; N],
}

impl<const N: usize> PollSet<N> {
    pub fn new(fds: [BorrowedFd<'_>; N]) -> Self {
        PollSet {
            fds: fds.map(|fd| libc::pollfd {
                fd: fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            }),
        }
    }

    /// Wait without timeout until at least one descriptor is ready.
    ///
    /// `EINTR` is reported as `Ok(0)` with every readiness cleared.
    pub fn wait(&mut self) -> io::Result<usize> {
        let n = unsafe { libc::poll(self.fds.as_mut_ptr(), N as libc::nfds_t, -1) };
        if n < 0 {
            for fd in &mut self.fds {
                fd.revents = 0;
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(n as usize)
    }

    pub fn readiness(&self, index: usize) -> Readiness {
        Readiness(self.fds[index].revents)
    }
}
