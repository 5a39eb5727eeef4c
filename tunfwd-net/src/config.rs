//! ConfigObj-style parser for the daemon's config file.
//!
//! `#` comments, `[section]` headers, `key = value` lines with unquoted
//! values, booleans as `yes`/`no`/`true`/`false`/`on`/`off`. Unknown
//! sections and keys are ignored.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tunfwd_core::constants::{DEFAULT_MTU, DEFAULT_PORT};
use tunfwd_core::net::parse_next_hop;
use tunfwd_core::{Ipv4Net, Route};

use crate::context::EngineOptions;

pub const DEFAULT_INTERFACE: &str = "tunfwd0";
pub const DEFAULT_CONTROL_SOCKET: &str = "/run/tunfwd.sock";

/// Parsed daemon configuration.
#[derive(Debug, Clone)]
pub struct TunfwdConfig {
    pub tunnel: TunnelSection,
    pub logging: LoggingSection,
    /// Static routes, in file order.
    pub routes: Vec<Route>,
}

/// The `[tunnel]` section.
#[derive(Debug, Clone)]
pub struct TunnelSection {
    pub interface: String,
    pub address: Ipv4Addr,
    pub mtu: usize,
    pub listen_ip: Ipv4Addr,
    pub listen_port: u16,
    pub control_socket: PathBuf,
    pub log_errors: bool,
    pub decrement_ttl: bool,
    pub icmp_errors: bool,
    pub burst: usize,
}

impl Default for TunnelSection {
    fn default() -> Self {
        TunnelSection {
            interface: DEFAULT_INTERFACE.into(),
            address: Ipv4Addr::UNSPECIFIED,
            mtu: DEFAULT_MTU,
            listen_ip: Ipv4Addr::UNSPECIFIED,
            listen_port: DEFAULT_PORT,
            control_socket: PathBuf::from(DEFAULT_CONTROL_SOCKET),
            log_errors: false,
            decrement_ttl: false,
            icmp_errors: false,
            burst: 1,
        }
    }
}

impl TunnelSection {
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            decrement_ttl: self.decrement_ttl,
            icmp_errors: self.icmp_errors,
            burst: self.burst,
        }
    }
}

/// The `[logging]` section.
#[derive(Debug, Clone)]
pub struct LoggingSection {
    pub loglevel: u8,
}

impl Default for LoggingSection {
    fn default() -> Self {
        LoggingSection { loglevel: 4 }
    }
}

/// Configuration parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Config I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value for '{}': '{}'", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e.to_string())
    }
}

/// Parse a config string.
pub fn parse(input: &str) -> Result<TunfwdConfig, ConfigError> {
    let mut current_section: Option<String> = None;

    let mut tunnel_kvs: HashMap<String, String> = HashMap::new();
    let mut logging_kvs: HashMap<String, String> = HashMap::new();
    let mut route_kvs: Vec<(String, String)> = Vec::new();

    for (lineno, line) in input.lines().enumerate() {
        let trimmed = strip_comment(line).trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            let name = trimmed.trim_start_matches('[').trim_end_matches(']');
            current_section = Some(name.trim().to_lowercase());
            continue;
        }

        let Some(eq_pos) = trimmed.find('=') else {
            return Err(ConfigError::Parse(format!(
                "line {}: expected 'key = value', got '{}'",
                lineno + 1,
                trimmed
            )));
        };
        let key = trimmed[..eq_pos].trim().to_string();
        let value = trimmed[eq_pos + 1..].trim().to_string();

        match current_section.as_deref() {
            Some("tunnel") => {
                tunnel_kvs.insert(key, value);
            }
            Some("logging") => {
                logging_kvs.insert(key, value);
            }
            Some("routes") => route_kvs.push((key, value)),
            _ => {} // ignore unknown sections
        }
    }

    Ok(TunfwdConfig {
        tunnel: build_tunnel_section(&tunnel_kvs)?,
        logging: build_logging_section(&logging_kvs)?,
        routes: build_routes(&route_kvs)?,
    })
}

/// Parse a config file from disk.
pub fn parse_file(path: &Path) -> Result<TunfwdConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

/// Strip `#` comments from a line (simple: not inside quotes).
fn strip_comment(line: &str) -> &str {
    let mut in_quote = false;
    let mut quote_char = '"';
    for (i, ch) in line.char_indices() {
        if !in_quote && (ch == '"' || ch == '\'') {
            in_quote = true;
            quote_char = ch;
        } else if in_quote && ch == quote_char {
            in_quote = false;
        } else if !in_quote && ch == '#' {
            return &line[..i];
        }
    }
    line
}

/// Parse a string as a boolean (ConfigObj style).
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Some(true),
        "no" | "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        value: value.into(),
    }
}

fn get_parsed<T: FromStr>(
    kvs: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match kvs.get(key) {
        Some(v) => v.parse::<T>().map(Some).map_err(|_| invalid(key, v)),
        None => Ok(None),
    }
}

fn get_bool(kvs: &HashMap<String, String>, key: &str) -> Result<Option<bool>, ConfigError> {
    match kvs.get(key) {
        Some(v) => parse_bool(v).map(Some).ok_or_else(|| invalid(key, v)),
        None => Ok(None),
    }
}

fn build_tunnel_section(kvs: &HashMap<String, String>) -> Result<TunnelSection, ConfigError> {
    let mut section = TunnelSection::default();

    if let Some(v) = kvs.get("interface") {
        if v.is_empty() || v.len() >= libc::IFNAMSIZ {
            return Err(invalid("interface", v));
        }
        section.interface = v.clone();
    }
    if let Some(v) = get_parsed(kvs, "address")? {
        section.address = v;
    }
    if let Some(v) = get_parsed::<usize>(kvs, "mtu")? {
        if v < tunfwd_core::constants::IPV4_HEADER_MIN || v > u16::MAX as usize {
            return Err(invalid("mtu", &v.to_string()));
        }
        section.mtu = v;
    }
    if let Some(v) = get_parsed(kvs, "listen_ip")? {
        section.listen_ip = v;
    }
    if let Some(v) = get_parsed(kvs, "listen_port")? {
        section.listen_port = v;
    }
    if let Some(v) = kvs.get("control_socket") {
        section.control_socket = PathBuf::from(v);
    }
    if let Some(v) = get_bool(kvs, "log_errors")? {
        section.log_errors = v;
    }
    if let Some(v) = get_bool(kvs, "decrement_ttl")? {
        section.decrement_ttl = v;
    }
    if let Some(v) = get_bool(kvs, "icmp_errors")? {
        section.icmp_errors = v;
    }
    if let Some(v) = get_parsed::<usize>(kvs, "burst")? {
        if v == 0 {
            return Err(invalid("burst", "0"));
        }
        section.burst = v;
    }

    Ok(section)
}

fn build_logging_section(kvs: &HashMap<String, String>) -> Result<LoggingSection, ConfigError> {
    let mut section = LoggingSection::default();

    if let Some(v) = kvs.get("loglevel") {
        section.loglevel = v
            .parse::<u8>()
            .ok()
            .filter(|l| *l <= 7)
            .ok_or_else(|| invalid("loglevel", v))?;
    }

    Ok(section)
}

fn build_routes(kvs: &[(String, String)]) -> Result<Vec<Route>, ConfigError> {
    kvs.iter()
        .map(|(net, hop)| {
            let net: Ipv4Net = net.parse().map_err(|_| invalid(net, hop))?;
            let next_hop = parse_next_hop(hop).map_err(|_| invalid(&net.to_string(), hop))?;
            Ok(Route::new(net, next_hop))
        })
        .collect()
}
