//! Simple command-line argument parser.
//!
//! No external dependencies. Supports `--flag`, `--key value`,
//! `--key=value`, `-v`/`-q` (counted), `-c PATH`, and positional arguments.

use std::collections::HashMap;

/// Parsed command-line arguments.
pub struct Args {
    pub flags: HashMap<String, String>,
    pub positional: Vec<String>,
    pub verbosity: u8,
    pub quiet: u8,
}

impl Args {
    /// Parse command-line arguments (skipping argv[0]).
    pub fn parse() -> Self {
        Self::parse_from(std::env::args().skip(1).collect())
    }

    /// Parse from a list of argument strings.
    pub fn parse_from(args: Vec<String>) -> Self {
        let mut flags = HashMap::new();
        let mut positional = Vec::new();
        let mut verbosity: u8 = 0;
        let mut quiet: u8 = 0;
        let mut iter = args.into_iter();

        while let Some(arg) = iter.next() {
            if arg == "--" {
                // Everything after -- is positional
                positional.extend(iter);
                break;
            } else if let Some(key) = arg.strip_prefix("--") {
                if let Some((k, v)) = key.split_once('=') {
                    flags.insert(k.to_string(), v.to_string());
                } else {
                    match key {
                        "version" | "help" | "exampleconfig" | "log-errors" => {
                            flags.insert(key.to_string(), "true".into());
                        }
                        _ => {
                            // Next arg is the value
                            let val = iter.next().unwrap_or_else(|| "true".into());
                            flags.insert(key.to_string(), val);
                        }
                    }
                }
            } else if arg.starts_with('-') && arg.len() > 1 && !is_negative_number(&arg) {
                let chars: Vec<char> = arg[1..].chars().collect();
                for &c in &chars {
                    match c {
                        'v' => verbosity = verbosity.saturating_add(1),
                        'q' => quiet = quiet.saturating_add(1),
                        'h' => {
                            flags.insert("h".into(), "true".into());
                        }
                        _ => {
                            // Short flag that may take a value: -c /path, -s /sock.
                            // Only consume the next arg if it doesn't look like a flag.
                            let next_is_value = chars.len() == 1
                                && iter
                                    .as_slice()
                                    .first()
                                    .map(|s| !s.starts_with('-') || s == "-")
                                    .unwrap_or(false);
                            let val = if next_is_value { iter.next() } else { None };
                            flags.insert(c.to_string(), val.unwrap_or_else(|| "true".into()));
                        }
                    }
                }
            } else {
                positional.push(arg);
            }
        }

        Args {
            flags,
            positional,
            verbosity,
            quiet,
        }
    }

    /// Get a flag value by long or short name.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.flags.get(key).map(|s| s.as_str())
    }

    /// Check if a flag is set.
    pub fn has(&self, key: &str) -> bool {
        self.flags.contains_key(key)
    }

    /// Get config path from --config or -c flag.
    pub fn config_path(&self) -> Option<&str> {
        self.get("config").or_else(|| self.get("c"))
    }

    /// Get control socket path from --socket or -s flag.
    pub fn socket_path(&self) -> Option<&str> {
        self.get("socket").or_else(|| self.get("s"))
    }

    /// Logging level from `-v`/`-q` counts applied to a ConfigObj-style
    /// `loglevel` (0..7, 4 = info).
    pub fn log_level(&self, loglevel: u8) -> log::LevelFilter {
        let level = (loglevel as i16 + self.verbosity as i16 - self.quiet as i16).clamp(0, 7);
        match level {
            0 => log::LevelFilter::Off,
            1 => log::LevelFilter::Error,
            2 => log::LevelFilter::Warn,
            3 | 4 => log::LevelFilter::Info,
            5 | 6 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

fn is_negative_number(arg: &str) -> bool {
    arg[1..].chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &[&str]) -> Args {
        Args::parse_from(s.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn parse_config_and_verbose() {
        let a = args(&["--config", "/etc/tunfwd.conf", "-vv"]);
        assert_eq!(a.config_path(), Some("/etc/tunfwd.conf"));
        assert_eq!(a.verbosity, 2);
    }

    #[test]
    fn parse_short_config() {
        let a = args(&["-c", "/my/config"]);
        assert_eq!(a.config_path(), Some("/my/config"));
    }

    #[test]
    fn parse_equals_syntax() {
        let a = args(&["--socket=/tmp/t.sock", "stop"]);
        assert_eq!(a.socket_path(), Some("/tmp/t.sock"));
        assert_eq!(a.positional, vec!["stop"]);
    }

    #[test]
    fn parse_subcommand_positionals() {
        let a = args(&["-s", "/tmp/t.sock", "add", "10.1.0.0/16", "198.51.100.2:5001"]);
        assert_eq!(a.socket_path(), Some("/tmp/t.sock"));
        assert_eq!(a.positional, vec!["add", "10.1.0.0/16", "198.51.100.2:5001"]);
    }

    #[test]
    fn parse_boolean_long_flags() {
        let a = args(&["--version", "--log-errors", "--help", "del", "10.0.0.0/8"]);
        assert!(a.has("version"));
        assert!(a.has("log-errors"));
        assert!(a.has("help"));
        assert_eq!(a.positional, vec!["del", "10.0.0.0/8"]);
    }

    #[test]
    fn parse_quiet() {
        let a = args(&["-qq"]);
        assert_eq!(a.quiet, 2);
    }

    #[test]
    fn flag_with_value_vs_boolean() {
        let a = args(&["-c", "-v"]);
        assert_eq!(a.get("c"), Some("true"));
        assert_eq!(a.verbosity, 1);

        let a = args(&["-h"]);
        assert!(a.has("h"));
    }

    #[test]
    fn double_dash_ends_flags() {
        let a = args(&["--", "-v", "x"]);
        assert_eq!(a.verbosity, 0);
        assert_eq!(a.positional, vec!["-v", "x"]);
    }

    #[test]
    fn log_level_from_counts() {
        assert_eq!(args(&[]).log_level(4), log::LevelFilter::Info);
        assert_eq!(args(&["-v"]).log_level(4), log::LevelFilter::Debug);
        assert_eq!(args(&["-vvvv"]).log_level(4), log::LevelFilter::Trace);
        assert_eq!(args(&["-qq"]).log_level(4), log::LevelFilter::Warn);
        assert_eq!(args(&["-qqqqqq"]).log_level(4), log::LevelFilter::Off);
        assert_eq!(args(&[]).log_level(6), log::LevelFilter::Debug);
    }
}
