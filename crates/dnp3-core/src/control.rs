//! Link control field parsing and serialization.
//!
//! One byte at frame offset 3: `DIR | PRM | FCB | FCV/DFC | function(4)`.
//! Bit 4 is FCV on primary frames and DFC (data flow control) on secondary
//! frames; both are carried in the same field here.

use crate::error::FrameError;

const DIR_MASK: u8 = 0x80;
const PRM_MASK: u8 = 0x40;
const FCB_MASK: u8 = 0x20;
const FCV_MASK: u8 = 0x10;
const FUNC_MASK: u8 = 0x0F;

/// Function codes on frames sent by the primary (initiating) station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PrimaryFunction {
    ResetLink = 0,
    TestLink = 2,
    ConfirmedUserData = 3,
    UnconfirmedUserData = 4,
    RequestLinkStatus = 9,
}

impl PrimaryFunction {
    pub fn from_u8(v: u8) -> Result<Self, FrameError> {
        match v {
            0 => Ok(PrimaryFunction::ResetLink),
            2 => Ok(PrimaryFunction::TestLink),
            3 => Ok(PrimaryFunction::ConfirmedUserData),
            4 => Ok(PrimaryFunction::UnconfirmedUserData),
            9 => Ok(PrimaryFunction::RequestLinkStatus),
            _ => Err(FrameError::InvalidPrimaryFunction(v)),
        }
    }
}

/// Function codes on frames sent by the secondary (responding) station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecondaryFunction {
    Ack = 0,
    Nack = 1,
    LinkStatus = 11,
    NotSupported = 15,
}

impl SecondaryFunction {
    pub fn from_u8(v: u8) -> Result<Self, FrameError> {
        match v {
            0 => Ok(SecondaryFunction::Ack),
            1 => Ok(SecondaryFunction::Nack),
            11 => Ok(SecondaryFunction::LinkStatus),
            15 => Ok(SecondaryFunction::NotSupported),
            _ => Err(FrameError::InvalidSecondaryFunction(v)),
        }
    }
}

/// Decoded link control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlField {
    /// Direction: `true` when sent by the master station.
    pub dir: bool,
    /// Primary message: `true` when sent by the initiator of the exchange.
    pub prm: bool,
    /// Frame count bit (meaningful only when `fcv` is set on a primary frame).
    pub fcb: bool,
    /// Frame count valid (primary) or data flow control (secondary).
    pub fcv: bool,
    /// Raw 4-bit function code; interpret via [`ControlField::primary_function`]
    /// or [`ControlField::secondary_function`] depending on `prm`.
    pub function: u8,
}

impl ControlField {
    /// Decode a control byte. Never fails: the function nibble is kept raw.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            dir: byte & DIR_MASK != 0,
            prm: byte & PRM_MASK != 0,
            fcb: byte & FCB_MASK != 0,
            fcv: byte & FCV_MASK != 0,
            function: byte & FUNC_MASK,
        }
    }

    /// Encode the control byte.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        let mut byte = self.function & FUNC_MASK;
        if self.dir {
            byte |= DIR_MASK;
        }
        if self.prm {
            byte |= PRM_MASK;
        }
        if self.fcb {
            byte |= FCB_MASK;
        }
        if self.fcv {
            byte |= FCV_MASK;
        }
        byte
    }

    /// Build a primary-frame control field.
    #[must_use]
    pub fn primary(dir: bool, function: PrimaryFunction, fcb: bool, fcv: bool) -> Self {
        Self {
            dir,
            prm: true,
            fcb,
            fcv,
            function: function as u8,
        }
    }

    /// Build a secondary-frame control field. FCB is always clear and bit 4
    /// (DFC) is reported clear by this stack.
    #[must_use]
    pub fn secondary(dir: bool, function: SecondaryFunction) -> Self {
        Self {
            dir,
            prm: false,
            fcb: false,
            fcv: false,
            function: function as u8,
        }
    }

    /// Interpret the function nibble as a primary function code.
    pub fn primary_function(&self) -> Result<PrimaryFunction, FrameError> {
        PrimaryFunction::from_u8(self.function)
    }

    /// Interpret the function nibble as a secondary function code.
    pub fn secondary_function(&self) -> Result<SecondaryFunction, FrameError> {
        SecondaryFunction::from_u8(self.function)
    }
}
