//! Core wire formats, constants, and types for the DNP3 transmission stack.
//!
//! This crate defines the link frame wire format (header, CRC-protected user
//! data blocks), the one-byte transport header, the link control field, and
//! the address newtypes shared by the link, transport, and channel layers.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod constants;
pub mod control;
pub mod crc;
pub mod error;
pub mod frame;
pub mod transport;
pub mod types;

pub use constants::{HEADER_SIZE, MAX_FRAME_SIZE, MAX_USER_DATA, MIN_FRAME_SIZE};
pub use control::{ControlField, PrimaryFunction, SecondaryFunction};
pub use crc::{check_crc, crc16};
pub use error::FrameError;
pub use frame::{FrameHeader, build_frame, max_user_data_for};
pub use transport::TransportHeader;
pub use types::{LinkAddress, SessionId};
