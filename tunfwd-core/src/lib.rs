//! tunfwd-core: I/O-free building blocks of the tunnel forwarder.
//!
//! Holds the longest-prefix-match routing table, the typed control
//! commands with their fixed wire record, and the IPv4 header helpers the
//! forwarding engine applies per packet. Nothing here touches a
//! descriptor; `tunfwd-net` drives these types with real sockets.

#![cfg_attr(not(feature = "std"), no_std)]
extern crate alloc;

pub mod constants;
pub mod net;
pub mod table;
pub mod command;
pub mod ipv4;

pub use command::{Command, DecodeError};
pub use net::{Ipv4Net, NetParseError, Route};
pub use table::RoutingTable;
