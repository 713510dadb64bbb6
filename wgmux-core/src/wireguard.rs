/// WireGuard wire constants the codec and handshake decryptor need.
///
/// These are WireGuard-defined values, not something this proxy invents;
/// see the WireGuard whitepaper's message layout.

/// Initiation, Response, and CookieReply are fixed-size; Transport is not.
pub const INITIATION_SIZE: usize = 148;
pub const RESPONSE_SIZE: usize = 92;
pub const COOKIE_REPLY_SIZE: usize = 64;
pub const TRANSPORT_HEADER_SIZE: usize = 16;
/// Smallest legal Transport frame: 16-byte header + 16-byte AEAD tag.
pub const MIN_WG_MESSAGE_SIZE: usize = 32;

pub const INITIATION_MAC2_OFFSET: usize = 132;
pub const RESPONSE_MAC2_OFFSET: usize = 76;
pub const MAC2_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Initiation = 1,
    Response = 2,
    CookieReply = 3,
    Transport = 4,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Initiation),
            2 => Some(Self::Response),
            3 => Some(Self::CookieReply),
            4 => Some(Self::Transport),
            _ => None,
        }
    }

    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Fixed frame size for Initiation/Response/CookieReply; `None` for
    /// Transport, whose length is the datagram's own (variable) length.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Initiation => Some(INITIATION_SIZE),
            Self::Response => Some(RESPONSE_SIZE),
            Self::CookieReply => Some(COOKIE_REPLY_SIZE),
            Self::Transport => None,
        }
    }
}

/// `true` when the first four bytes look like a canonical (unobfuscated)
/// WireGuard header: `{1..4, 0, 0, 0}`.
#[inline]
pub fn is_canonical_header(data: &[u8]) -> bool {
    data.len() >= 4
        && MessageType::from_byte(data[0]).is_some()
        && data[1] == 0
        && data[2] == 0
        && data[3] == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_header_detection() {
        assert!(is_canonical_header(&[1, 0, 0, 0, 9]));
        assert!(!is_canonical_header(&[5, 0, 0, 0]));
        assert!(!is_canonical_header(&[1, 1, 0, 0]));
        assert!(!is_canonical_header(&[1, 0, 0]));
    }
}
