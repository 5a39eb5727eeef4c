//! tunfwdd - TUN/UDP tunnel forwarder daemon
//!
//! Opens the TUN device and UDP socket from config, binds a Unix datagram
//! control socket, and runs the forwarding engine until SIGINT/SIGTERM,
//! a STOP record, or a fatal error.

use std::net::SocketAddrV4;
use std::os::fd::AsFd;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use tunfwd_cli::args::Args;
use tunfwd_cli::supervise::{supervise, POLL_INTERVAL};
use tunfwd_net::config::{self, TunfwdConfig};
use tunfwd_net::udp::{self, UdpConfig};
use tunfwd_net::{tun, Controller, Engine, ProxyError, ProxyExit, RoutingTable, RuntimeContext};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const EXAMPLE_CONFIG: &str = r#"# tunfwdd configuration

[tunnel]
  interface = tunfwd0
  address = 10.5.1.0
  mtu = 1472
  listen_ip = 0.0.0.0
  listen_port = 8285
  control_socket = /run/tunfwd.sock
  log_errors = no
  decrement_ttl = no
  icmp_errors = no
  burst = 1

[logging]
  loglevel = 4

[routes]
  # 10.1.0.0/16 = 198.51.100.2:5001
"#;

fn main() {
    let args = Args::parse();

    if args.has("version") {
        println!("tunfwdd {}", VERSION);
        return;
    }

    if args.has("help") || args.has("h") {
        print_usage();
        return;
    }

    if args.has("exampleconfig") {
        print!("{}", EXAMPLE_CONFIG);
        return;
    }

    let loaded = match args.config_path() {
        Some(path) => config::parse_file(Path::new(path)),
        None => config::parse(""),
    };
    let loglevel = loaded.as_ref().map(|c| c.logging.loglevel).unwrap_or(4);

    env_logger::Builder::new()
        .filter_level(args.log_level(loglevel))
        .format_timestamp_secs()
        .init();

    let mut config = match loaded {
        Ok(c) => c,
        Err(e) => {
            log::error!("Failed to load config: {}", e);
            process::exit(1);
        }
    };
    if args.has("log-errors") {
        config.tunnel.log_errors = true;
    }
    if let Some(path) = args.socket_path() {
        config.tunnel.control_socket = PathBuf::from(path);
    }

    log::info!("Starting tunfwdd {}", VERSION);

    match run(config) {
        Ok(exit) => {
            log::info!("tunfwdd stopped ({:?})", exit.reason);
        }
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    }
}

/// Set up descriptors, run the engine thread, and wait for it or a signal.
fn run(config: TunfwdConfig) -> Result<ProxyExit, String> {
    let t = &config.tunnel;
    if t.icmp_errors && t.address.is_unspecified() {
        log::warn!("icmp_errors is on but no interface address is configured; ICMP errors will be sourced from 0.0.0.0");
    }

    let (tun_file, ifname) =
        tun::open_tun(&t.interface).map_err(|e| format!("Failed to open TUN device '{}': {}", t.interface, e))?;

    let udp_socket = udp::bind(&UdpConfig {
        listen: SocketAddrV4::new(t.listen_ip, t.listen_port),
        ..Default::default()
    })
    .map_err(|e| format!("Failed to bind UDP {}:{}: {}", t.listen_ip, t.listen_port, e))?;

    let control_path = t.control_socket.clone();
    let control = bind_control(&control_path)
        .map_err(|e| format!("Failed to bind control socket {}: {}", control_path.display(), e))?;
    log::info!("Control socket at {}", control_path.display());

    let mut routes = RoutingTable::new();
    for route in &config.routes {
        routes.insert_or_replace(*route);
        log::info!("Configured route {}", route);
    }

    let address = t.address;
    let mtu = t.mtu;
    let log_errors = t.log_errors;
    let options = t.engine_options();

    let (done_tx, done_rx) = mpsc::channel::<Result<ProxyExit, ProxyError>>();
    let engine = thread::Builder::new()
        .name("tunfwd-engine".into())
        .spawn(move || {
            let ctx = RuntimeContext {
                tun: tun_file.as_fd(),
                udp: udp_socket.as_fd(),
                control: control.as_fd(),
                interface_address: address,
                interface_mtu: mtu,
                log_errors,
            };
            let result = Engine::new(ctx, options).with_routes(routes).run();
            let _ = done_tx.send(result);
        })
        .map_err(|e| format!("Failed to spawn engine thread: {}", e))?;

    unsafe {
        libc::signal(libc::SIGINT, signal_handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, signal_handler as *const () as libc::sighandler_t);
    }

    log::info!("tunfwdd started on {}", ifname);

    let result = supervise(
        &done_rx,
        engine,
        POLL_INTERVAL,
        || STOP_REQUESTED.load(Ordering::SeqCst),
        || Controller::connect(&control_path).and_then(|c| c.stop()),
    );

    if let Err(e) = std::fs::remove_file(&control_path) {
        log::warn!("Could not remove control socket {}: {}", control_path.display(), e);
    }

    let exit = result?;
    log::info!("Final statistics: {}", exit.stats);
    log::info!("{} route(s) installed at exit", exit.routes.len());
    Ok(exit)
}

/// Bind the Unix datagram control socket, replacing a stale socket file.
fn bind_control(path: &Path) -> std::io::Result<UnixDatagram> {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Removed stale control socket {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    UnixDatagram::bind(path)
}

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

fn print_usage() {
    println!("Usage: tunfwdd [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config PATH, -c PATH  Path to config file");
    println!("  --socket PATH, -s PATH  Control socket path (overrides config)");
    println!("  --log-errors            Log dropped packets and rejected commands");
    println!("  --exampleconfig         Print an example config and exit");
    println!("  -v                      Increase verbosity (can repeat)");
    println!("  -q                      Decrease verbosity (can repeat)");
    println!("  --version               Print version and exit");
    println!("  --help, -h              Print this help");
}
