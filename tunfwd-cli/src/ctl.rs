//! Turning `tunfwdctl` positionals into control commands.

use std::fmt;

use tunfwd_core::net::parse_next_hop;
use tunfwd_core::{Command, Ipv4Net, Route};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    MissingCommand,
    UnknownCommand(String),
    WrongArity { command: &'static str, expected: usize, got: usize },
    BadNetwork(String),
    BadNextHop(String),
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageError::MissingCommand => write!(f, "no command given"),
            UsageError::UnknownCommand(c) => write!(f, "unknown command '{}'", c),
            UsageError::WrongArity {
                command,
                expected,
                got,
            } => write!(f, "'{}' takes {} argument(s), got {}", command, expected, got),
            UsageError::BadNetwork(s) => write!(f, "invalid network '{}', expected a.b.c.d/len", s),
            UsageError::BadNextHop(s) => {
                write!(f, "invalid next hop '{}', expected a.b.c.d:port with port > 0", s)
            }
        }
    }
}

impl std::error::Error for UsageError {}

/// Parse `add NET HOP`, `del NET` or `stop`.
pub fn parse_command(positional: &[String]) -> Result<Command, UsageError> {
    let (name, rest) = positional.split_first().ok_or(UsageError::MissingCommand)?;
    let arity = |command: &'static str, expected: usize| {
        if rest.len() == expected {
            Ok(())
        } else {
            Err(UsageError::WrongArity {
                command,
                expected,
                got: rest.len(),
            })
        }
    };

    match name.as_str() {
        "add" | "set" => {
            arity("add", 2)?;
            let net = parse_net(&rest[0])?;
            let hop = parse_next_hop(&rest[1]).map_err(|_| UsageError::BadNextHop(rest[1].clone()))?;
            Ok(Command::SetRoute(Route::new(net, hop)))
        }
        "del" | "delete" => {
            arity("del", 1)?;
            Ok(Command::DelRoute(parse_net(&rest[0])?))
        }
        "stop" => {
            arity("stop", 0)?;
            Ok(Command::Stop)
        }
        other => Err(UsageError::UnknownCommand(other.to_string())),
    }
}

fn parse_net(s: &str) -> Result<Ipv4Net, UsageError> {
    s.parse().map_err(|_| UsageError::BadNetwork(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &[&str]) -> Result<Command, UsageError> {
        parse_command(&s.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn add_route() {
        let cmd = parse(&["add", "10.1.0.0/16", "198.51.100.2:5001"]).unwrap();
        assert_eq!(
            cmd,
            Command::SetRoute(Route::new(
                "10.1.0.0/16".parse().unwrap(),
                "198.51.100.2:5001".parse().unwrap()
            ))
        );
    }

    #[test]
    fn del_and_stop() {
        assert_eq!(
            parse(&["del", "10.0.0.0/8"]).unwrap(),
            Command::DelRoute("10.0.0.0/8".parse().unwrap())
        );
        assert_eq!(parse(&["stop"]).unwrap(), Command::Stop);
    }

    #[test]
    fn usage_errors() {
        assert_eq!(parse(&[]), Err(UsageError::MissingCommand));
        assert_eq!(parse(&["flush"]), Err(UsageError::UnknownCommand("flush".into())));
        assert!(matches!(parse(&["del"]), Err(UsageError::WrongArity { .. })));
        assert!(matches!(parse(&["stop", "now"]), Err(UsageError::WrongArity { .. })));
        assert!(matches!(
            parse(&["add", "10.0.0.0/40", "198.51.100.1:5000"]),
            Err(UsageError::BadNetwork(_))
        ));
        assert!(matches!(
            parse(&["add", "10.0.0.0/8", "198.51.100.1:0"]),
            Err(UsageError::BadNextHop(_))
        ));
    }
}
