//! tunfwdctl - Send route and stop commands to a running tunfwdd
//!
//! Each invocation writes exactly one control record to the daemon's
//! Unix datagram control socket.

use std::path::{Path, PathBuf};
use std::process;

use tunfwd_cli::args::Args;
use tunfwd_cli::ctl::parse_command;
use tunfwd_net::config::{self, DEFAULT_CONTROL_SOCKET};
use tunfwd_net::Controller;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args = Args::parse();

    if args.has("version") {
        println!("tunfwdctl {}", VERSION);
        return;
    }

    if args.has("help") || args.has("h") {
        print_usage();
        return;
    }

    env_logger::Builder::new()
        .filter_level(match args.verbosity {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    let command = match parse_command(&args.positional) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(2);
        }
    };

    let socket = match socket_path(&args) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error reading config: {}", e);
            process::exit(1);
        }
    };

    let controller = match Controller::connect(&socket) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Could not connect to tunfwdd at {}: {}", socket.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = controller.send(&command) {
        eprintln!("Failed to send command: {}", e);
        process::exit(1);
    }
    log::info!("sent {}", command);
}

/// `--socket` wins, then the config file's `control_socket`, then the default.
fn socket_path(args: &Args) -> Result<PathBuf, config::ConfigError> {
    if let Some(path) = args.socket_path() {
        return Ok(PathBuf::from(path));
    }
    match args.config_path() {
        Some(path) => Ok(config::parse_file(Path::new(path))?.tunnel.control_socket),
        None => Ok(PathBuf::from(DEFAULT_CONTROL_SOCKET)),
    }
}

fn print_usage() {
    println!("Usage: tunfwdctl [OPTIONS] COMMAND");
    println!();
    println!("Commands:");
    println!("  add NET/LEN IP:PORT     Install or replace a route");
    println!("  del NET/LEN             Remove a route");
    println!("  stop                    Stop the forwarding engine");
    println!();
    println!("Options:");
    println!("  --socket PATH, -s PATH  Control socket (default {})", DEFAULT_CONTROL_SOCKET);
    println!("  --config PATH, -c PATH  Read the control socket path from a config file");
    println!("  -v                      Increase verbosity (can repeat)");
    println!("  --version               Print version and exit");
    println!("  --help, -h              Print this help");
}
