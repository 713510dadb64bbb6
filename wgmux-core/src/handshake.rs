/// Handshake decryptor: recovers an initiator's static public key from a
/// deobfuscated `MessageInitiation` frame, so the server loop can route
/// the session without interpreting anything else about it.
///
/// This runs only the Noise_IK steps needed to open `encrypted_static` —
/// no MAC1/MAC2 validation, no timestamp replay check, no session
/// establishment. Those belong to the WireGuard endpoint this proxy sits
/// in front of, not to the proxy itself (§1 Non-goals).
use crate::wireguard::INITIATION_SIZE;
use blake2::digest::{FixedOutput, KeyInit, Update};
use blake2::Blake2s256;
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, KeyInit as AeadKeyInit};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

const CONSTRUCTION: &[u8] = b"Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s";
const IDENTIFIER: &[u8] = b"WireGuard v1 zx2c4 Jason@zx2c4.com";

const EPHEMERAL_OFFSET: usize = 8;
const ENCRYPTED_STATIC_OFFSET: usize = 40;
const ENCRYPTED_STATIC_LEN: usize = 32 + 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecryptError {
    #[error("frame is not a full-size handshake initiation")]
    ShortFrame,
    #[error("AEAD authentication failed")]
    AuthFailed,
}

type HmacBlake2s = hmac::SimpleHmac<Blake2s256>;

#[inline]
fn b2s_hash(data1: &[u8], data2: &[u8]) -> [u8; 32] {
    use blake2::Digest;
    let mut h = Blake2s256::new();
    h.update(data1);
    h.update(data2);
    h.finalize().into()
}

#[inline]
fn b2s_hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacBlake2s::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize_fixed().into()
}

#[inline]
fn b2s_hmac2(key: &[u8], data1: &[u8], data2: &[u8]) -> [u8; 32] {
    let mut mac = HmacBlake2s::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data1);
    mac.update(data2);
    mac.finalize_fixed().into()
}

fn aead_open(key: &[u8; 32], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, DecryptError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key).expect("32-byte key");
    // Handshake AEADs always use counter 0.
    let nonce = chacha20poly1305::Nonce::default();
    cipher
        .decrypt(&nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| DecryptError::AuthFailed)
}

/// Recover the initiator's static public key from a 148-byte, already
/// deobfuscated Initiation frame, using this server's static keypair.
pub fn decrypt_initiation(
    server_private: &StaticSecret,
    server_public: &PublicKey,
    frame: &[u8],
) -> Result<[u8; 32], DecryptError> {
    if frame.len() < INITIATION_SIZE {
        return Err(DecryptError::ShortFrame);
    }

    let peer_ephemeral_bytes: [u8; 32] = frame[EPHEMERAL_OFFSET..EPHEMERAL_OFFSET + 32]
        .try_into()
        .expect("32-byte slice");
    let peer_ephemeral_public = PublicKey::from(peer_ephemeral_bytes);

    // initiator.chaining_key = HASH(CONSTRUCTION)
    let mut chaining_key = b2s_hash(CONSTRUCTION, &[]);
    // initiator.hash = HASH(HASH(chaining_key || IDENTIFIER) || responder.static_public)
    let mut hash = b2s_hash(&chaining_key, IDENTIFIER);
    hash = b2s_hash(&hash, server_public.as_bytes());
    // initiator.hash = HASH(hash || msg.unencrypted_ephemeral)
    hash = b2s_hash(&hash, peer_ephemeral_public.as_bytes());
    // temp = HMAC(chaining_key, msg.unencrypted_ephemeral); chaining_key = HMAC(temp, 0x1)
    chaining_key = b2s_hmac(&b2s_hmac(&chaining_key, peer_ephemeral_public.as_bytes()), &[0x01]);
    // temp = HMAC(chaining_key, DH(responder.static_private, msg.unencrypted_ephemeral))
    let ephemeral_shared = server_private.diffie_hellman(&peer_ephemeral_public);
    let temp = b2s_hmac(&chaining_key, ephemeral_shared.as_bytes());
    // chaining_key = HMAC(temp, 0x1); key = HMAC(temp, chaining_key || 0x2)
    chaining_key = b2s_hmac(&temp, &[0x01]);
    let key = b2s_hmac2(&temp, &chaining_key, &[0x02]);

    let encrypted_static =
        &frame[ENCRYPTED_STATIC_OFFSET..ENCRYPTED_STATIC_OFFSET + ENCRYPTED_STATIC_LEN];
    let plaintext = aead_open(&key, encrypted_static, &hash)?;

    let mut initiator_static = [0u8; 32];
    initiator_static.copy_from_slice(&plaintext);
    Ok(initiator_static)
}


/// Test-only handshake builder shared with `resolver`'s tests, which need
/// genuine Initiation frames to route.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use x25519_dalek::EphemeralSecret;

    pub(crate) fn build_initiation_for(
        initiator_static: &StaticSecret,
        responder_public: &PublicKey,
    ) -> [u8; INITIATION_SIZE] {
        let mut msg = [0u8; INITIATION_SIZE];
        msg[0] = 1;

        let mut chaining_key = b2s_hash(CONSTRUCTION, &[]);
        let mut hash = b2s_hash(&chaining_key, IDENTIFIER);
        hash = b2s_hash(&hash, responder_public.as_bytes());

        let eph_secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let eph_public = PublicKey::from(&eph_secret);
        msg[8..40].copy_from_slice(eph_public.as_bytes());
        hash = b2s_hash(&hash, eph_public.as_bytes());

        chaining_key = b2s_hmac(&b2s_hmac(&chaining_key, eph_public.as_bytes()), &[0x01]);
        let ephemeral_shared = eph_secret.diffie_hellman(responder_public);
        let temp = b2s_hmac(&chaining_key, ephemeral_shared.as_bytes());
        chaining_key = b2s_hmac(&temp, &[0x01]);
        let key = b2s_hmac2(&temp, &chaining_key, &[0x02]);

        let initiator_public = PublicKey::from(initiator_static);
        let cipher = ChaCha20Poly1305::new_from_slice(&key).unwrap();
        let nonce = chacha20poly1305::Nonce::default();
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: initiator_public.as_bytes(),
                    aad: &hash,
                },
            )
            .unwrap();
        msg[40..88].copy_from_slice(&ciphertext);

        msg
    }
}
