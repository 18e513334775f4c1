//! Transport header: the single byte prefixing each link frame's user data.
//!
//! Bits 5:0 carry a rolling sequence number (0-63), bit 6 marks the FIRST
//! segment of a fragment, bit 7 the FINAL segment. A one-segment fragment
//! has both bits set.

use crate::constants::TRANSPORT_SEQ_MODULUS;

const FIR_MASK: u8 = 0x40;
const FIN_MASK: u8 = 0x80;
const SEQ_MASK: u8 = 0x3F;

/// Decoded transport header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    /// Sequence number, 0-63.
    pub seq: u8,
    /// First segment of a fragment.
    pub fir: bool,
    /// Final segment of a fragment.
    pub fin: bool,
}

impl TransportHeader {
    #[must_use]
    pub fn new(seq: u8, fir: bool, fin: bool) -> Self {
        Self {
            seq: seq & SEQ_MASK,
            fir,
            fin,
        }
    }

    /// Decode a transport header byte. Never fails: all 256 values are valid.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            seq: byte & SEQ_MASK,
            fir: byte & FIR_MASK != 0,
            fin: byte & FIN_MASK != 0,
        }
    }

    #[must_use]
    pub fn to_byte(self) -> u8 {
        let mut byte = self.seq & SEQ_MASK;
        if self.fir {
            byte |= FIR_MASK;
        }
        if self.fin {
            byte |= FIN_MASK;
        }
        byte
    }
}

/// Increment a transport sequence number, wrapping mod 64.
#[must_use]
pub fn next_seq(seq: u8) -> u8 {
    (seq + 1) % TRANSPORT_SEQ_MODULUS
}

/// Decrement a transport sequence number, wrapping mod 64.
#[must_use]
pub fn prev_seq(seq: u8) -> u8 {
    (seq + TRANSPORT_SEQ_MODULUS - 1) % TRANSPORT_SEQ_MODULUS
}
