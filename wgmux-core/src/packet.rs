/// Fixed-capacity packet buffer: the hot-path datagram carrier.
///
/// Capacity must cover the largest obfuscated handshake frame:
/// `148 (Initiation) + 16 (nonce) + 384 (random suffix)`, rounded up.
use crate::wireguard::MessageType;

pub const MAX_MTU: usize = 2048;

bitflags::bitflags! {
    /// Pending-transform markers for a packet moving through the codec.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const OBFUSCATE_BEFORE_SEND = 0b01;
        const DEOBFUSCATED_AFTER_RECEIVED = 0b10;
    }
}

/// A mutable byte region with an explicit meaningful-prefix cursor.
///
/// Reused across datagrams; never reallocated. The packet owns its buffer
/// exclusively while inside the hot path.
#[derive(Debug, Clone)]
pub struct Packet {
    data: [u8; MAX_MTU],
    length: usize,
    flags: Flags,
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            data: [0u8; MAX_MTU],
            length: 0,
            flags: Flags::empty(),
        }
    }
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the meaningful prefix to `length` bytes, clearing flags.
    /// Does not zero the underlying buffer; callers fill `data[..length]`.
    pub fn reset(&mut self, length: usize) {
        assert!(length <= MAX_MTU, "packet length exceeds capacity");
        self.length = length;
        self.flags = Flags::empty();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn set_len(&mut self, length: usize) {
        assert!(length <= MAX_MTU, "packet length exceeds capacity");
        self.length = length;
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        MAX_MTU
    }

    #[inline]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    #[inline]
    pub fn set_flag(&mut self, flag: Flags) {
        self.flags.insert(flag);
    }

    #[inline]
    pub fn clear_flag(&mut self, flag: Flags) {
        self.flags.remove(flag);
    }

    #[inline]
    pub fn set_byte(&mut self, i: usize, v: u8) {
        self.data[i] = v;
    }

    #[inline]
    pub fn byte(&self, i: usize) -> u8 {
        self.data[i]
    }

    /// `data[0]` interpreted as a WireGuard message type, defined (per §3)
    /// only when `length >= 4` and `data[1..4] == {0, 0, 0}` — the
    /// canonical WireGuard header shape. `wireguard::is_canonical_header`
    /// implements the identical check directly on a byte slice for the
    /// obfuscator's pass-through discriminator, which runs before a
    /// `Packet` has been reconstructed.
    pub fn message_type(&self) -> Option<MessageType> {
        if self.length < 4 {
            return None;
        }
        if self.data[1] != 0 || self.data[2] != 0 || self.data[3] != 0 {
            return None;
        }
        MessageType::from_byte(self.data[0])
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.length]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.length]
    }

    /// Full backing buffer, for writers that need to extend `length`
    /// past the current prefix (e.g. appending a random suffix).
    #[inline]
    pub fn full_buf_mut(&mut self) -> &mut [u8; MAX_MTU] {
        &mut self.data
    }

    /// Fill `data[from..]` (caller must have already grown `length`) from
    /// the given source, used by transforms that append random bytes.
    pub fn copy_into(&mut self, offset: usize, src: &[u8]) {
        self.data[offset..offset + src.len()].copy_from_slice(src);
    }

    /// Zero out `data[start..end]`, used to restore a MAC2 field that was
    /// folded into random padding on the wire.
    pub fn zero_range(&mut self, start: usize, end: usize) {
        self.data[start..end].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_flags_and_length() {
        let mut p = Packet::new();
        p.reset(148);
        p.set_flag(Flags::OBFUSCATE_BEFORE_SEND);
        assert_eq!(p.len(), 148);
        p.reset(64);
        assert_eq!(p.len(), 64);
        assert!(p.flags().is_empty());
    }

    #[test]
    fn message_type_requires_four_bytes() {
        let mut p = Packet::new();
        p.reset(3);
        p.set_byte(0, 1);
        assert_eq!(p.message_type(), None);

        p.reset(4);
        p.set_byte(0, 1);
        assert_eq!(p.message_type(), Some(MessageType::Initiation));
    }

    #[test]
    fn message_type_requires_canonical_reserved_bytes() {
        let mut p = Packet::new();
        p.reset(4);
        p.set_byte(0, 1);
        p.set_byte(1, 1);
        p.set_byte(2, 0);
        p.set_byte(3, 0);
        assert_eq!(p.message_type(), None);

        p.set_byte(1, 0);
        assert_eq!(p.message_type(), Some(MessageType::Initiation));
    }
}
