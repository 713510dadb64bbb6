//! Shared routing, codec, and crypto primitives for the `wgmux` server and
//! client binaries: packet buffers, the obfuscation codec, the WireGuard
//! handshake decryptor, the peer resolver, the forwarding table, and
//! config parsing.

pub mod config;
pub mod error;
pub mod handshake;
pub mod obfuscate;
pub mod packet;
pub mod resolver;
pub mod table;
pub mod wireguard;

pub use config::{Peer, Server};
pub use error::{Error, Result};
pub use obfuscate::Obfuscator;
pub use packet::Packet;
pub use table::ForwardingTable;
