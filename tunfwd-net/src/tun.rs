//! Opening a Linux TUN device.
//!
//! The device is created in `IFF_TUN | IFF_NO_PI` mode, so every read
//! yields exactly one IP packet with no packet-information prefix and
//! every write injects one. Assigning an address and MTU and bringing the
//! link up is left to the operator.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;

const TUN_DEVICE: &str = "/dev/net/tun";

const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

/// `struct ifreq` restricted to the name and flags members, padded to
/// the kernel's full size.
#[repr(C)]
struct IfReqFlags {
    name: [u8; libc::IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

/// Open (or attach to) the TUN interface `name`.
///
/// An empty name lets the kernel pick one. A name may contain a `%d`
/// template. Returns the device file and the name the kernel assigned.
pub fn open_tun(name: &str) -> io::Result<(File, String)> {
    if name.len() >= libc::IFNAMSIZ || name.as_bytes().contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid interface name '{}'", name),
        ));
    }

    let file = OpenOptions::new().read(true).write(true).open(TUN_DEVICE)?;

    let mut req = IfReqFlags {
        name: [0; libc::IFNAMSIZ],
        flags: IFF_TUN | IFF_NO_PI,
        _pad: [0; 22],
    };
    req.name[..name.len()].copy_from_slice(name.as_bytes());

    // req outlives the call and is laid out as the kernel expects
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &mut req as *mut IfReqFlags) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    let end = req.name.iter().position(|b| *b == 0).unwrap_or(req.name.len());
    let assigned = String::from_utf8_lossy(&req.name[..end]).into_owned();
    log::info!("opened TUN device {}", assigned);
    Ok((file, assigned))
}
