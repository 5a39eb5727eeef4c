//! End-to-end tests of the forwarding loop.
//!
//! A `SOCK_SEQPACKET` socketpair stands in for the TUN device: the test
//! holds the kernel side and reads/writes whole packets on it. Peers are
//! real UDP sockets on 127.0.0.1. The engine runs on its own thread and
//! every wait in the test is bounded. The control channel is a SEQPACKET
//! pair unless a test hands in a pipe.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tunfwd_core::ipv4;
use tunfwd_net::sys;
use tunfwd_net::{
    control_pair, run_proxy, Controller, Engine, EngineOptions, ExitReason, Ipv4Net, ProxyError,
    ProxyExit, RuntimeContext,
};

const LOCAL: Ipv4Addr = Ipv4Addr::new(10, 5, 1, 0);
const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

struct Harness {
    /// Kernel side of the stand-in TUN device.
    tun: OwnedFd,
    ctl: Controller,
    engine_addr: SocketAddr,
    done: mpsc::Receiver<Result<ProxyExit, ProxyError>>,
}

impl Harness {
    /// Start an engine with diagnostics on. `None` goes through
    /// `run_proxy` with defaults.
    fn start(mtu: usize, options: Option<EngineOptions>) -> Harness {
        Harness::launch(mtu, options, true, control_pair().unwrap())
    }

    fn launch(
        mtu: usize,
        options: Option<EngineOptions>,
        log_errors: bool,
        (ctl, ctl_engine): (Controller, OwnedFd),
    ) -> Harness {
        let (tun, tun_engine) = sys::packet_pair().unwrap();
        let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
        let engine_addr = udp.local_addr().unwrap();
        let (tx, done) = mpsc::channel();

        thread::Builder::new()
            .name("engine".into())
            .spawn(move || {
                let result = match options {
                    None => run_proxy(
                        tun_engine.as_fd(),
                        udp.as_fd(),
                        ctl_engine.as_fd(),
                        LOCAL,
                        mtu,
                        log_errors,
                    ),
                    Some(options) => {
                        let ctx = RuntimeContext {
                            tun: tun_engine.as_fd(),
                            udp: udp.as_fd(),
                            control: ctl_engine.as_fd(),
                            interface_address: LOCAL,
                            interface_mtu: mtu,
                            log_errors,
                        };
                        Engine::new(ctx, options).run()
                    }
                };
                let _ = tx.send(result);
            })
            .unwrap();

        Harness {
            tun,
            ctl,
            engine_addr,
            done,
        }
    }

    fn inject(&self, pkt: &[u8]) {
        assert_eq!(sys::write(self.tun.as_fd(), pkt).unwrap(), pkt.len());
    }

    /// Next packet the engine wrote to the TUN device, if one arrives in time.
    fn tun_output(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut pfd = libc::pollfd {
            fd: self.tun.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&mut pfd, 1, timeout.as_millis() as libc::c_int) };
        if ready <= 0 {
            return None;
        }
        let mut buf = vec![0u8; 65536];
        let n = sys::read(self.tun.as_fd(), &mut buf).unwrap();
        buf.truncate(n);
        Some(buf)
    }

    fn finish(&self) -> Result<ProxyExit, ProxyError> {
        self.done.recv_timeout(WAIT).expect("engine did not terminate")
    }

    fn stop(&self) -> ProxyExit {
        self.ctl.stop().unwrap();
        let exit = self.finish().unwrap();
        assert_eq!(exit.reason, ExitReason::Stopped);
        exit
    }
}

fn peer() -> (UdpSocket, SocketAddrV4) {
    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.set_read_timeout(Some(WAIT)).unwrap();
    let addr = match sock.local_addr().unwrap() {
        SocketAddr::V4(a) => a,
        SocketAddr::V6(_) => unreachable!(),
    };
    (sock, addr)
}

fn recv_from(sock: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; 65536];
    let n = sock.recv(&mut buf).unwrap();
    buf.truncate(n);
    buf
}

/// Inject `pkt` until `sock` receives it. The engine decodes one control
/// record per wakeup, so a packet can overtake commands queued ahead of it;
/// delivery proves every earlier command has been applied.
fn inject_until_delivered(h: &Harness, sock: &UdpSocket, pkt: &[u8]) {
    sock.set_read_timeout(Some(QUIET)).unwrap();
    let mut buf = vec![0u8; 65536];
    for _ in 0..25 {
        h.inject(pkt);
        if let Ok(n) = sock.recv(&mut buf) {
            assert_eq!(&buf[..n], pkt);
            sock.set_read_timeout(Some(WAIT)).unwrap();
            return;
        }
    }
    panic!("packet was never forwarded");
}

fn assert_silent(sock: &UdpSocket) {
    sock.set_read_timeout(Some(QUIET)).unwrap();
    let mut buf = [0u8; 2048];
    let err = sock.recv(&mut buf).unwrap_err();
    assert!(
        matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
        "unexpected error {:?}",
        err
    );
    sock.set_read_timeout(Some(WAIT)).unwrap();
}

fn net(s: &str) -> Ipv4Net {
    s.parse().unwrap()
}

/// A UDP-in-IPv4 packet from 10.5.1.7 to `dst` with `payload`.
fn packet(dst: Ipv4Addr, ttl: u8, payload: &[u8]) -> Vec<u8> {
    let total = (20 + payload.len()) as u16;
    let mut pkt = vec![0x45, 0];
    pkt.extend_from_slice(&total.to_be_bytes());
    pkt.extend_from_slice(&[0x12, 0x34, 0, 0, ttl, 17, 0, 0]);
    pkt.extend_from_slice(&[10, 5, 1, 7]);
    pkt.extend_from_slice(&dst.octets());
    let sum = ipv4::checksum(&pkt);
    pkt[10..12].copy_from_slice(&sum.to_be_bytes());
    pkt.extend_from_slice(payload);
    pkt
}

#[test]
fn worked_example_over_sockets() {
    let h = Harness::start(1472, None);
    let (wide, wide_addr) = peer();
    let (narrow, narrow_addr) = peer();
    let dst = Ipv4Addr::new(10, 1, 2, 3);

    h.ctl.set_route(net("10.0.0.0/8"), wide_addr).unwrap();
    let first = packet(dst, 64, b"one");
    h.inject(&first);
    assert_eq!(recv_from(&wide), first);

    h.ctl.set_route(net("10.1.0.0/16"), narrow_addr).unwrap();
    let second = packet(dst, 64, b"two");
    h.inject(&second);
    assert_eq!(recv_from(&narrow), second);

    h.ctl.del_route(net("10.1.0.0/16")).unwrap();
    let third = packet(dst, 64, b"three");
    h.inject(&third);
    assert_eq!(recv_from(&wide), third);

    let exit = h.stop();
    assert_eq!(exit.stats.udp_tx_packets, 3);
    assert_eq!(exit.stats.commands, 4);
    assert_eq!(exit.routes.len(), 1);
    assert_silent(&narrow);
}

#[test]
fn unmatched_packet_is_dropped() {
    let h = Harness::start(1472, None);
    let (sock, addr) = peer();

    h.ctl.set_route(net("192.168.0.0/16"), addr).unwrap();
    h.inject(&packet(Ipv4Addr::new(10, 9, 9, 9), 64, b"lost"));
    let routed = packet(Ipv4Addr::new(192, 168, 4, 4), 64, b"found");
    h.inject(&routed);

    // Only the routed packet arrives.
    assert_eq!(recv_from(&sock), routed);
    assert_silent(&sock);

    let exit = h.stop();
    assert_eq!(exit.stats.no_route, 1);
    assert_eq!(exit.stats.udp_tx_packets, 1);
    assert!(h.tun_output(QUIET).is_none());
}

#[test]
fn datagram_written_to_tun_verbatim() {
    let h = Harness::start(1472, None);
    let (sock, _) = peer();

    let inner = packet(Ipv4Addr::new(10, 5, 1, 7), 3, b"inbound payload");
    sock.send_to(&inner, h.engine_addr).unwrap();
    assert_eq!(h.tun_output(WAIT).unwrap(), inner);

    let exit = h.stop();
    assert_eq!(exit.stats.udp_rx_packets, 1);
    assert_eq!(exit.stats.tun_tx_packets, 1);
    assert_eq!(exit.stats.tun_tx_bytes, inner.len() as u64);
}

#[test]
fn oversized_datagram_is_dropped() {
    let h = Harness::start(100, None);
    let (sock, _) = peer();

    sock.send_to(&[0x45; 101], h.engine_addr).unwrap();
    sock.send_to(&[0x45; 100], h.engine_addr).unwrap();

    assert_eq!(h.tun_output(WAIT).unwrap().len(), 100);
    assert!(h.tun_output(QUIET).is_none());

    let exit = h.stop();
    assert_eq!(exit.stats.oversize, 1);
    assert_eq!(exit.stats.tun_tx_packets, 1);
}

#[test]
fn stop_ends_processing() {
    let h = Harness::start(1472, None);
    let (sock, addr) = peer();
    h.ctl.set_route(net("0.0.0.0/0"), addr).unwrap();
    inject_until_delivered(&h, &sock, &packet(Ipv4Addr::new(10, 1, 1, 1), 64, b"early"));

    // STOP is queued before the packet, and control is serviced first.
    h.ctl.stop().unwrap();
    // The engine may already be gone, closing its end.
    let _ = sys::write(h.tun.as_fd(), &packet(Ipv4Addr::new(10, 1, 1, 1), 64, b"late"));

    let exit = h.finish().unwrap();
    assert_eq!(exit.reason, ExitReason::Stopped);
    assert_eq!(exit.stats.udp_tx_packets, 1);
    assert_silent(&sock);
}

#[test]
fn control_closure_ends_loop() {
    let Harness {
        tun: _tun,
        ctl,
        done,
        ..
    } = Harness::start(1472, None);
    drop(ctl);
    let exit = done.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(exit.reason, ExitReason::ControlClosed);
}

#[test]
fn malformed_record_does_not_stop_engine() {
    let h = Harness::start(1472, None);
    let (sock, addr) = peer();

    sys::write(h.ctl.as_fd(), &[1, 0, 0, 0, 10, 0, 0]).unwrap();
    // Unknown command code, otherwise well-formed.
    let mut record = tunfwd_core::Command::Stop.encode();
    record[..4].copy_from_slice(&9i32.to_ne_bytes());
    sys::write(h.ctl.as_fd(), &record).unwrap();

    h.ctl.set_route(net("10.0.0.0/8"), addr).unwrap();
    let pkt = packet(Ipv4Addr::new(10, 2, 3, 4), 64, b"still running");
    inject_until_delivered(&h, &sock, &pkt);

    let exit = h.stop();
    assert_eq!(exit.stats.protocol_errors, 2);
    assert_eq!(exit.stats.commands, 2);
    assert_eq!(exit.routes.len(), 1);
}

#[test]
fn tun_hangup_is_fatal() {
    let h = Harness::start(1472, None);
    drop(h.tun);
    let err = h.done.recv_timeout(WAIT).unwrap().unwrap_err();
    assert!(matches!(err, ProxyError::Hangup("tun")), "{}", err);
}

#[test]
fn ttl_decrement_and_icmp_errors() {
    let options = EngineOptions {
        decrement_ttl: true,
        icmp_errors: true,
        burst: 8,
    };
    let h = Harness::start(1472, Some(options));
    let (sock, addr) = peer();
    h.ctl.set_route(net("10.0.0.0/8"), addr).unwrap();

    // Forwarded with TTL 64 -> 63 and a still-valid header checksum.
    h.inject(&packet(Ipv4Addr::new(10, 1, 1, 1), 64, b"hop"));
    let sent = recv_from(&sock);
    assert_eq!(sent[8], 63);
    assert_eq!(ipv4::checksum(&sent[..20]), 0);
    assert_eq!(&sent[20..], b"hop");

    // TTL 1 expires: nothing sent, time-exceeded back to the source.
    let expiring = packet(Ipv4Addr::new(10, 1, 1, 1), 1, b"expired!");
    h.inject(&expiring);
    let reply = h.tun_output(WAIT).unwrap();
    assert_eq!(ipv4::source(&reply).unwrap(), LOCAL);
    assert_eq!(ipv4::destination(&reply).unwrap(), Ipv4Addr::new(10, 5, 1, 7));
    assert_eq!(reply[20], 11);
    assert_eq!(&reply[28..], &expiring[..]);

    // No route: network unreachable.
    h.inject(&packet(Ipv4Addr::new(172, 16, 0, 1), 64, b"nowhere"));
    let reply = h.tun_output(WAIT).unwrap();
    assert_eq!((reply[20], reply[21]), (3, 0));

    assert_silent(&sock);
    let exit = h.stop();
    assert_eq!(exit.stats.ttl_expired, 1);
    assert_eq!(exit.stats.icmp_sent, 2);
    assert_eq!(exit.stats.udp_tx_packets, 1);
}

/// Drops and rejected records are counted the same way whether or not
/// they are logged, and none of them ends the loop.
fn drops_are_counted(log_errors: bool) {
    let h = Harness::launch(100, None, log_errors, control_pair().unwrap());
    let (sock, addr) = peer();

    sock.send_to(&[0x45; 101], h.engine_addr).unwrap();
    sock.send_to(&[0x45; 100], h.engine_addr).unwrap();
    assert_eq!(h.tun_output(WAIT).unwrap().len(), 100);

    sys::write(h.ctl.as_fd(), &[1, 0, 0, 0, 10]).unwrap();
    h.ctl.set_route(net("10.0.0.0/8"), addr).unwrap();
    inject_until_delivered(&h, &sock, &packet(Ipv4Addr::new(10, 1, 1, 1), 64, b"routed"));

    h.inject(&packet(Ipv4Addr::new(172, 16, 0, 1), 64, b"nowhere"));
    let after = packet(Ipv4Addr::new(10, 1, 1, 2), 64, b"after");
    h.inject(&after);
    assert_eq!(recv_from(&sock), after);
    assert_silent(&sock);
    assert!(h.tun_output(QUIET).is_none());

    let exit = h.stop();
    let stats = &exit.stats;
    assert_eq!(stats.oversize, 1);
    assert_eq!(stats.tun_tx_packets, 1);
    assert_eq!(stats.protocol_errors, 1);
    assert_eq!(stats.commands, 2);
    assert_eq!(stats.malformed, 0);
    assert!(stats.no_route >= 1);
    assert!(stats.udp_tx_packets >= 2);
    assert_eq!(stats.no_route + stats.udp_tx_packets, stats.tun_rx_packets);
    assert_eq!(exit.routes.len(), 1);
}

#[test]
fn drops_counted_with_diagnostics() {
    drops_are_counted(true);
}

#[test]
fn drops_counted_without_diagnostics() {
    drops_are_counted(false);
}

#[test]
fn pipe_control_descriptor() {
    let (ctl_engine, ctl_write) = sys::pipe().unwrap();
    let ctl = Controller::from_fd(ctl_write);
    let (_sock, addr) = peer();

    // Both records and the EOF are queued before the engine reads any.
    ctl.set_route(net("10.0.0.0/8"), addr).unwrap();
    ctl.stop().unwrap();
    drop(ctl);

    let (_tun, tun_engine) = sys::packet_pair().unwrap();
    let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let exit = run_proxy(tun_engine.as_fd(), udp.as_fd(), ctl_engine.as_fd(), LOCAL, 1472, true)
        .unwrap();
    assert_eq!(exit.reason, ExitReason::Stopped);
    assert_eq!(exit.routes.len(), 1);
    assert_eq!(exit.stats.commands, 2);
    assert_eq!(exit.stats.protocol_errors, 0);
}

#[test]
fn pipe_control_forwards_then_closes() {
    let (ctl_engine, ctl_write) = sys::pipe().unwrap();
    let h = Harness::launch(1472, None, true, (Controller::from_fd(ctl_write), ctl_engine));
    let (sock, addr) = peer();

    h.ctl.set_route(net("10.0.0.0/8"), addr).unwrap();
    inject_until_delivered(&h, &sock, &packet(Ipv4Addr::new(10, 3, 3, 3), 64, b"via pipe"));

    // A truncated record followed by EOF is rejected, then ends the loop.
    sys::write(h.ctl.as_fd(), &tunfwd_core::Command::Stop.encode()[..7]).unwrap();
    let Harness {
        tun: _tun,
        ctl,
        done,
        ..
    } = h;
    drop(ctl);

    let exit = done.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(exit.reason, ExitReason::ControlClosed);
    assert_eq!(exit.stats.commands, 1);
    assert_eq!(exit.stats.protocol_errors, 1);
    assert_eq!(exit.routes.len(), 1);
}
