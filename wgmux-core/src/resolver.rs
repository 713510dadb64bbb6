/// Maps a decrypted initiator static public key to the upstream endpoint
/// it should be forwarded to, trying each configured server in turn.
use crate::config::{Peer, Server};
use crate::error::{Error, Result};
use crate::handshake::decrypt_initiation;
use crate::wireguard::INITIATION_SIZE;
use std::net::SocketAddr;
use x25519_dalek::PublicKey;

/// Routes a deobfuscated Initiation frame to an upstream address by
/// decrypting it against each configured server until one succeeds.
///
/// Non-Initiation frames must never reach this function — they reuse an
/// existing forwarding entry keyed by client source address instead.
pub fn resolve_initiation(servers: &[Server], frame: &[u8]) -> Result<(usize, SocketAddr)> {
    if frame.len() < INITIATION_SIZE {
        return Err(Error::PacketTooShort { length: frame.len() });
    }

    for (server_index, server) in servers.iter().enumerate() {
        let server_public = PublicKey::from(&server.private_key);
        let Ok(initiator_pubkey) =
            decrypt_initiation(&server.private_key, &server_public, frame)
        else {
            continue;
        };

        return match find_peer(server, &initiator_pubkey) {
            Some(peer) => Ok((server_index, peer.forward_to)),
            None => Err(Error::NoPeerRoute { pubkey: initiator_pubkey }),
        };
    }

    Err(Error::HandshakeDecryptFailed)
}

fn find_peer<'a>(server: &'a Server, initiator_pubkey: &[u8; 32]) -> Option<&'a Peer> {
    server
        .peers
        .iter()
        .find(|p| p.public_key.as_ref() == Some(initiator_pubkey))
        .or_else(|| server.peers.iter().find(|p| p.public_key.is_none()))
}
