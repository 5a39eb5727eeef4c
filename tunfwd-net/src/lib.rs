//! tunfwd-net: the forwarding engine and its descriptors.
//!
//! Drives `tunfwd-core`'s routing table with a TUN device, a UDP socket
//! and a control descriptor, multiplexed by a single `poll(2)` loop.

pub mod sys;
pub mod context;
pub mod stats;
pub mod control;
pub mod engine;
pub mod udp;
pub mod tun;
pub mod config;

pub use context::{EngineOptions, RuntimeContext};
pub use control::{control_pair, ControlReader, Controller, Framing};
pub use engine::{run_proxy, Engine, ExitReason, ProxyError, ProxyExit};
pub use stats::ProxyStats;

// Re-export commonly used types from tunfwd-core
pub use tunfwd_core::{Command, Ipv4Net, Route, RoutingTable};
