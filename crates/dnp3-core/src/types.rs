//! Newtype wrappers for link addresses and session handles.
//!
//! These types prevent accidental mixing of wire addresses with the opaque
//! session handles used by the channel layer.

use core::fmt;

/// A 16-bit DNP3 link address, transmitted little-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub struct LinkAddress(pub u16);

impl LinkAddress {
    /// The self-address wildcard: a station may be configured to accept
    /// frames destined to this address as its own.
    pub const SELF_ADDRESS: LinkAddress = LinkAddress(0xFFFC);

    /// First address of the broadcast range.
    pub const BROADCAST_MIN: u16 = 0xFFFD;

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Whether this address is in the broadcast range (0xFFFD-0xFFFF).
    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        self.0 >= Self::BROADCAST_MIN
    }

    /// Whether this address is the self-address wildcard.
    #[must_use]
    pub const fn is_self_address(self) -> bool {
        self.0 == Self::SELF_ADDRESS.0
    }

    #[must_use]
    pub const fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    #[must_use]
    pub const fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkAddress({})", self.0)
    }
}

/// An opaque handle identifying one remote-station session on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub struct SessionId(pub u32);

impl SessionId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_range() {
        assert!(!LinkAddress::new(0xFFFC).is_broadcast());
        assert!(LinkAddress::new(0xFFFD).is_broadcast());
        assert!(LinkAddress::new(0xFFFF).is_broadcast());
        assert!(!LinkAddress::new(4).is_broadcast());
    }

    #[test]
    fn self_address_wildcard() {
        assert!(LinkAddress::SELF_ADDRESS.is_self_address());
        assert!(!LinkAddress::new(0xFFFD).is_self_address());
    }

    #[test]
    fn little_endian_bytes() {
        let addr = LinkAddress::new(0x0403);
        assert_eq!(addr.to_le_bytes(), [0x03, 0x04]);
        assert_eq!(LinkAddress::from_le_bytes([0x03, 0x04]), addr);
    }
}
