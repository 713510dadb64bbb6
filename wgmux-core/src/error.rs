/// Error kinds per the propagation policy: startup/config errors are
/// surfaced to the caller, hot-path per-packet errors never propagate
/// past the server loop's per-datagram match arm (they're logged and the
/// packet is dropped — see `wgmux-server`'s `server.rs`).
use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to resolve {role} address {literal:?}: {cause}")]
    ResolveAddr {
        role: &'static str,
        literal: String,
        cause: std::io::Error,
    },

    #[error("invalid peer id {id}, must be 0..=255")]
    InvalidPeerId { id: u32 },

    #[error("packet too short: {length} bytes")]
    PacketTooShort { length: usize },

    #[error("no configured server could decrypt the handshake initiation")]
    HandshakeDecryptFailed,

    #[error("no peer route for pubkey {pubkey:?}")]
    NoPeerRoute { pubkey: [u8; 32] },

    #[error("datagram from {src} matches no forwarding entry and is not a handshake initiation")]
    UnroutedDatagram { src: SocketAddr },

    #[error("socket I/O error on {addr:?}: {cause}")]
    SocketIo {
        addr: Option<SocketAddr>,
        cause: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
