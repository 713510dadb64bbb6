/// Stateless-per-packet obfuscation transform: a length/entropy shim over
/// WireGuard, not a replacement for Noise_IK. Pads fixed-size handshake
/// frames with random-length random tails, hides zeroed MAC2 fields
/// behind a marker bit, and XORs a keystream derived from `(nonce,
/// user_key_hash)` over the parts of the frame a passive observer could
/// otherwise fingerprint or mount a known-plaintext attack against.
use crate::packet::{Flags, Packet};
use crate::wireguard::{
    self, MessageType, COOKIE_REPLY_SIZE, INITIATION_MAC2_OFFSET, INITIATION_SIZE, MAC2_LEN,
    MIN_WG_MESSAGE_SIZE, RESPONSE_MAC2_OFFSET, RESPONSE_SIZE, TRANSPORT_HEADER_SIZE,
};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};
use std::hash::Hasher;
use twox_hash::XxHash64;

pub const NONCE_LEN: usize = 16;
pub const XOR_STEP: usize = 8;
pub const MAX_RANDOM_SUFFIX: usize = 384;
pub const TRANSPORT_SUFFIX_THRESHOLD: usize = 256;

const MARKED_BYTE: u8 = 0x01;

/// `SHA-256(user_key_string)` — a process-wide constant once configured.
pub type UserKeyHash = [u8; 32];

pub fn hash_user_key(user_key: &str) -> UserKeyHash {
    let mut hasher = Sha256::new();
    hasher.update(user_key.as_bytes());
    hasher.finalize().into()
}

/// Keyed, stateless-per-packet obfuscator. Construct once from the
/// configured user key and reuse for every packet.
#[derive(Debug, Clone)]
pub struct Obfuscator {
    enabled: bool,
    user_key_hash: UserKeyHash,
}

impl Obfuscator {
    /// An empty `user_key` disables obfuscation entirely (both directions
    /// become the identity transform).
    pub fn new(user_key: &str) -> Self {
        if user_key.is_empty() {
            Self {
                enabled: false,
                user_key_hash: [0u8; 32],
            }
        } else {
            Self {
                enabled: true,
                user_key_hash: hash_user_key(user_key),
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Egress transform. Runs only when `Flags::OBFUSCATE_BEFORE_SEND` is
    /// set and obfuscation is enabled; otherwise the packet is untouched.
    pub fn obfuscate(&self, packet: &mut Packet) {
        if !self.enabled || !packet.flags().contains(Flags::OBFUSCATE_BEFORE_SEND) {
            return;
        }
        let Some(message_type) = packet.message_type() else {
            return;
        };

        let mut rng = OsRng;
        match message_type {
            MessageType::Initiation | MessageType::Response | MessageType::CookieReply => {
                self.obfuscate_fixed(packet, message_type, &mut rng);
            }
            MessageType::Transport => {
                self.obfuscate_transport(packet, &mut rng);
            }
        }
    }

    fn obfuscate_fixed(&self, packet: &mut Packet, message_type: MessageType, rng: &mut OsRng) {
        let fixed_size = message_type.fixed_size().expect("fixed-size message type");
        let mac2_offset = match message_type {
            MessageType::Initiation => Some(INITIATION_MAC2_OFFSET),
            MessageType::Response => Some(RESPONSE_MAC2_OFFSET),
            MessageType::CookieReply => None,
        };

        let mut obfs_len = fixed_size;
        if let Some(mac2_offset) = mac2_offset {
            if packet.as_slice()[mac2_offset..mac2_offset + MAC2_LEN]
                .iter()
                .all(|&b| b == 0)
            {
                packet.set_byte(1, MARKED_BYTE);
                obfs_len = mac2_offset;
            }
        }

        let random_suffix = rng.gen_range(0..MAX_RANDOM_SUFFIX);
        let new_length = fixed_size + NONCE_LEN + random_suffix;
        packet.set_len(new_length);
        fill_random(packet, obfs_len, new_length, rng);

        let nonce = tail_nonce(packet);
        apply_keystream(&mut packet.full_buf_mut()[..obfs_len], &nonce, &self.user_key_hash);
    }

    fn obfuscate_transport(&self, packet: &mut Packet, rng: &mut OsRng) {
        let obfs_len = TRANSPORT_HEADER_SIZE;

        if packet.len() < TRANSPORT_SUFFIX_THRESHOLD {
            packet.set_byte(1, MARKED_BYTE);
            let old_len = packet.len();
            let new_len = old_len + NONCE_LEN;
            packet.set_len(new_len);
            fill_random(packet, old_len, new_len, rng);
        }

        let nonce = tail_nonce(packet);
        apply_keystream(&mut packet.full_buf_mut()[..obfs_len], &nonce, &self.user_key_hash);
    }

    /// Ingress transform. If `packet` is already a canonical WireGuard
    /// frame, leaves it unchanged with no side effect (§8 property 2).
    /// Otherwise reveals the message type, restores the true frame
    /// length, and sets `Flags::DEOBFUSCATED_AFTER_RECEIVED`.
    pub fn deobfuscate(&self, packet: &mut Packet) {
        if packet.len() < MIN_WG_MESSAGE_SIZE {
            return;
        }
        if wireguard::is_canonical_header(packet.as_slice()) {
            return;
        }

        let nonce = tail_nonce(packet);
        let mut state = KeystreamState::new(&nonce);
        let mut block0 = state.next_block(&self.user_key_hash);
        apply_header_fix(&mut block0);
        for (i, b) in block0.iter().enumerate() {
            packet.full_buf_mut()[i] ^= b;
        }

        let obfs_len = match MessageType::from_byte(packet.byte(0)) {
            Some(MessageType::Initiation) => {
                packet.set_len(INITIATION_SIZE);
                if packet.byte(1) == MARKED_BYTE {
                    packet.set_byte(1, 0);
                    packet.zero_range(INITIATION_MAC2_OFFSET, INITIATION_SIZE);
                    INITIATION_MAC2_OFFSET
                } else {
                    INITIATION_SIZE
                }
            }
            Some(MessageType::Response) => {
                packet.set_len(RESPONSE_SIZE);
                if packet.byte(1) == MARKED_BYTE {
                    packet.set_byte(1, 0);
                    packet.zero_range(RESPONSE_MAC2_OFFSET, RESPONSE_SIZE);
                    RESPONSE_MAC2_OFFSET
                } else {
                    RESPONSE_SIZE
                }
            }
            Some(MessageType::CookieReply) => {
                packet.set_len(COOKIE_REPLY_SIZE);
                COOKIE_REPLY_SIZE
            }
            Some(MessageType::Transport) => {
                if packet.byte(1) == MARKED_BYTE {
                    packet.set_byte(1, 0);
                    packet.set_len(packet.len() - NONCE_LEN);
                }
                TRANSPORT_HEADER_SIZE
            }
            None => return,
        };

        if obfs_len > XOR_STEP {
            xor_range(
                &mut packet.full_buf_mut()[XOR_STEP..obfs_len],
                &mut state,
                &self.user_key_hash,
            );
        }
        packet.set_flag(Flags::DEOBFUSCATED_AFTER_RECEIVED);
    }
}

fn fill_random(packet: &mut Packet, from: usize, to: usize, rng: &mut OsRng) {
    rng.fill_bytes(&mut packet.full_buf_mut()[from..to]);
}

fn tail_nonce(packet: &Packet) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    let len = packet.len();
    nonce.copy_from_slice(&packet.as_slice()[len - NONCE_LEN..len]);
    nonce
}

/// Running XXH64 state keyed by `(nonce, user_key_hash)`: write the nonce
/// once, then before extracting each 8-byte block, append
/// `user_key_hash` and snapshot the digest. `Hasher::finish` doesn't
/// consume the state, so successive `write` + `finish` calls yield a
/// deterministic stream of blocks without restarting the hash.
struct KeystreamState {
    hasher: XxHash64,
}

impl KeystreamState {
    fn new(nonce: &[u8; NONCE_LEN]) -> Self {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(nonce);
        Self { hasher }
    }

    fn next_block(&mut self, user_key_hash: &UserKeyHash) -> [u8; XOR_STEP] {
        self.hasher.write(user_key_hash);
        self.hasher.finish().to_le_bytes()
    }
}

/// If the first block would XOR a canonical WireGuard header into another
/// canonical-looking header, force two bits so it can't. Guarantees the
/// pass-through discriminator in `deobfuscate` is sound (§8 property 3).
fn apply_header_fix(block0: &mut [u8; XOR_STEP]) {
    if block0[0] & 0b1111_1000 == 0 && block0[1] & 0b1111_1110 == 0 {
        block0[0] |= 0b1101_0111;
        block0[1] |= 0b0110_1001;
    }
}

fn apply_keystream(data: &mut [u8], nonce: &[u8; NONCE_LEN], user_key_hash: &UserKeyHash) {
    if data.is_empty() {
        return;
    }
    let mut state = KeystreamState::new(nonce);
    let mut block0 = state.next_block(user_key_hash);
    apply_header_fix(&mut block0);
    let first = data.len().min(XOR_STEP);
    for i in 0..first {
        data[i] ^= block0[i];
    }
    if data.len() > XOR_STEP {
        xor_range(&mut data[XOR_STEP..], &mut state, user_key_hash);
    }
}

fn xor_range(data: &mut [u8], state: &mut KeystreamState, user_key_hash: &UserKeyHash) {
    let mut i = 0;
    while i < data.len() {
        let block = state.next_block(user_key_hash);
        let n = (data.len() - i).min(XOR_STEP);
        for j in 0..n {
            data[i + j] ^= block[j];
        }
        i += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wireguard::INITIATION_SIZE;

    fn canonical_initiation(seed: u8) -> Packet {
        let mut p = Packet::new();
        p.reset(INITIATION_SIZE);
        for i in 0..INITIATION_SIZE {
            p.set_byte(i, seed.wrapping_add(i as u8));
        }
        p.set_byte(0, 1);
        p.set_byte(1, 0);
        p.set_byte(2, 0);
        p.set_byte(3, 0);
        p
    }

    #[test]
    fn disabled_obfuscator_is_identity() {
        let obfs = Obfuscator::new("");
        assert!(!obfs.is_enabled());
        let mut p = canonical_initiation(7);
        p.set_flag(Flags::OBFUSCATE_BEFORE_SEND);
        let before = p.as_slice().to_vec();
        obfs.obfuscate(&mut p);
        assert_eq!(p.as_slice(), before.as_slice());
    }

    #[test]
    fn pass_through_canonical_frame() {
        let obfs = Obfuscator::new("some key");
        let mut p = canonical_initiation(3);
        let before = p.as_slice().to_vec();
        obfs.deobfuscate(&mut p);
        assert_eq!(p.as_slice(), before.as_slice());
        assert!(!p.flags().contains(Flags::DEOBFUSCATED_AFTER_RECEIVED));
    }

    #[test]
    fn round_trip_initiation_with_zero_mac2() {
        let obfs = Obfuscator::new("kisekimo, mahoumo, muryoudewaarimasen");
        let mut p = canonical_initiation(11);
        // zero MAC2
        for i in INITIATION_MAC2_OFFSET..INITIATION_SIZE {
            p.set_byte(i, 0);
        }
        let original = p.as_slice().to_vec();

        p.set_flag(Flags::OBFUSCATE_BEFORE_SEND);
        obfs.obfuscate(&mut p);
        assert!(p.len() >= INITIATION_SIZE + NONCE_LEN);
        assert!(p.len() < INITIATION_SIZE + NONCE_LEN + MAX_RANDOM_SUFFIX);
        assert!(!wireguard::is_canonical_header(p.as_slice()));

        obfs.deobfuscate(&mut p);
        assert_eq!(p.len(), INITIATION_SIZE);
        assert_eq!(p.as_slice(), original.as_slice());
    }

    #[test]
    fn short_transport_gets_padded() {
        let obfs = Obfuscator::new("k");
        let mut p = Packet::new();
        p.reset(100);
        for i in 0..100 {
            p.set_byte(i, (i * 7) as u8);
        }
        p.set_byte(0, 4);
        p.set_byte(1, 0);
        p.set_byte(2, 0);
        p.set_byte(3, 0);
        let original = p.as_slice().to_vec();

        p.set_flag(Flags::OBFUSCATE_BEFORE_SEND);
        obfs.obfuscate(&mut p);
        assert_eq!(p.len(), 116);

        obfs.deobfuscate(&mut p);
        assert_eq!(p.len(), 100);
        assert_eq!(p.as_slice(), original.as_slice());
    }

    #[test]
    fn idempotent_deobfuscate_on_canonical() {
        let obfs = Obfuscator::new("k");
        let mut p = canonical_initiation(1);
        obfs.deobfuscate(&mut p);
        let once = p.as_slice().to_vec();
        obfs.deobfuscate(&mut p);
        assert_eq!(p.as_slice(), once.as_slice());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::wireguard::{
        COOKIE_REPLY_SIZE, INITIATION_SIZE, MIN_WG_MESSAGE_SIZE, RESPONSE_SIZE,
    };
    use proptest::prelude::*;

    fn canonical_frame(message_type: u8, len: usize, filler: u8) -> Packet {
        let mut p = Packet::new();
        p.reset(len);
        for i in 0..len {
            p.set_byte(i, filler.wrapping_add(i as u8));
        }
        p.set_byte(0, message_type);
        p.set_byte(1, 0);
        p.set_byte(2, 0);
        p.set_byte(3, 0);
        p
    }

    fn arb_fixed_frame() -> impl Strategy<Value = (u8, usize, u8)> {
        prop_oneof![
            Just((1u8, INITIATION_SIZE)),
            Just((2u8, RESPONSE_SIZE)),
            Just((3u8, COOKIE_REPLY_SIZE)),
        ]
        .prop_flat_map(|(t, len)| any::<u8>().prop_map(move |filler| (t, len, filler)))
    }

    proptest! {
        /// Property 1 — round-trip identity for canonical WireGuard frames,
        /// modulo the random padding, the marker byte, and MAC2 zeroing.
        #[test]
        fn round_trip_identity((message_type, len, filler) in arb_fixed_frame(), key in "\\PC{0,40}") {
            let obfs = Obfuscator::new(&key);
            let mut p = canonical_frame(message_type, len, filler);
            let original = p.as_slice().to_vec();

            p.set_flag(Flags::OBFUSCATE_BEFORE_SEND);
            obfs.obfuscate(&mut p);
            obfs.deobfuscate(&mut p);

            prop_assert_eq!(p.len(), original.len());
            prop_assert_eq!(p.as_slice(), original.as_slice());
        }

        /// Property 2 — a canonical frame passes through `deobfuscate`
        /// completely unchanged, regardless of user key.
        #[test]
        fn pass_through_is_unconditional(
            (message_type, len, filler) in arb_fixed_frame(),
            key in "\\PC{0,40}",
        ) {
            let obfs = Obfuscator::new(&key);
            let mut p = canonical_frame(message_type, len, filler);
            let original = p.as_slice().to_vec();
            obfs.deobfuscate(&mut p);
            prop_assert_eq!(p.as_slice(), original.as_slice());
            prop_assert!(!p.flags().contains(Flags::DEOBFUSCATED_AFTER_RECEIVED));
        }

        /// Property 3 — obfuscated output can never look like a canonical
        /// WireGuard header, for any reachable nonce/key/message type.
        #[test]
        fn header_disambiguation(
            (message_type, len, filler) in arb_fixed_frame(),
            key in "\\PC{1,40}",
        ) {
            let obfs = Obfuscator::new(&key);
            let mut p = canonical_frame(message_type, len, filler);
            p.set_flag(Flags::OBFUSCATE_BEFORE_SEND);
            obfs.obfuscate(&mut p);
            prop_assert!(!crate::wireguard::is_canonical_header(p.as_slice()));
        }

        /// Property 4 — length bounds after obfuscating a fixed-size frame.
        #[test]
        fn length_bounds_fixed_size(
            (message_type, len, filler) in arb_fixed_frame(),
            key in "\\PC{1,40}",
        ) {
            let obfs = Obfuscator::new(&key);
            let mut p = canonical_frame(message_type, len, filler);
            p.set_flag(Flags::OBFUSCATE_BEFORE_SEND);
            obfs.obfuscate(&mut p);
            prop_assert!(p.len() >= len + NONCE_LEN);
            prop_assert!(p.len() < len + NONCE_LEN + MAX_RANDOM_SUFFIX);
        }

        /// Property 5 — deobfuscating an already-canonical frame twice is
        /// the same as deobfuscating it once.
        #[test]
        fn idempotent_on_canonical(
            (message_type, len, filler) in arb_fixed_frame(),
            key in "\\PC{0,40}",
        ) {
            let obfs = Obfuscator::new(&key);
            let mut p = canonical_frame(message_type, len, filler);
            obfs.deobfuscate(&mut p);
            let once = p.as_slice().to_vec();
            obfs.deobfuscate(&mut p);
            prop_assert_eq!(p.as_slice(), once.as_slice());
        }

        /// Disabled obfuscator (empty key) is always the identity
        /// transform on both directions, for any frame length.
        #[test]
        fn disabled_is_always_identity(len in MIN_WG_MESSAGE_SIZE..2048usize, filler in any::<u8>()) {
            let obfs = Obfuscator::new("");
            let mut p = Packet::new();
            p.reset(len);
            for i in 0..len {
                p.set_byte(i, filler.wrapping_add(i as u8));
            }
            p.set_byte(0, 4);
            let original = p.as_slice().to_vec();

            p.set_flag(Flags::OBFUSCATE_BEFORE_SEND);
            obfs.obfuscate(&mut p);
            prop_assert_eq!(p.as_slice(), original.as_slice());
        }
    }
}
