//! Link frame wire format: header parsing and frame building.
//!
//! Layout (all multi-byte fields little-endian):
//!
//! ```text
//! offset 0:   0x05            sync byte 1
//! offset 1:   0x64            sync byte 2
//! offset 2:   length          5 + user data byte count
//! offset 3:   control         DIR | PRM | FCB | FCV | function(4)
//! offset 4-5: destination address
//! offset 6-7: source address
//! offset 8-9: CRC-16 over offsets 0-7
//! offset 10.. user data in blocks of <=16 bytes, each followed by CRC-16
//! ```
//!
//! A fixed (no data) frame is exactly 10 bytes with length field 5.

use alloc::vec::Vec;

use crate::constants::{
    BLOCK_DATA_SIZE, CRC_SIZE, FIXED_FRAME_LENGTH, HEADER_SIZE, MAX_USER_DATA, SYNC_1, SYNC_2,
};
use crate::control::ControlField;
use crate::crc::{append_crc, check_crc, crc16};
use crate::error::FrameError;
use crate::types::LinkAddress;

/// A parsed, CRC-verified link frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u8,
    pub control: ControlField,
    pub destination: LinkAddress,
    pub source: LinkAddress,
}

impl FrameHeader {
    /// Parse and verify the 10-byte frame header.
    ///
    /// Checks both sync bytes, the header CRC, and the length field floor.
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                min: HEADER_SIZE,
                actual: raw.len(),
            });
        }
        if raw[0] != SYNC_1 {
            return Err(FrameError::BadSync {
                offset: 0,
                value: raw[0],
            });
        }
        if raw[1] != SYNC_2 {
            return Err(FrameError::BadSync {
                offset: 1,
                value: raw[1],
            });
        }
        if !check_crc(&raw[..HEADER_SIZE]) {
            return Err(FrameError::BadHeaderCrc);
        }
        let length = raw[2];
        if length < FIXED_FRAME_LENGTH {
            return Err(FrameError::InvalidLength(length));
        }
        Ok(Self {
            length,
            control: ControlField::from_byte(raw[3]),
            destination: LinkAddress::from_le_bytes([raw[4], raw[5]]),
            source: LinkAddress::from_le_bytes([raw[6], raw[7]]),
        })
    }

    /// Number of user data bytes this frame carries (length field minus 5).
    #[must_use]
    pub fn user_data_len(&self) -> usize {
        (self.length - FIXED_FRAME_LENGTH) as usize
    }

    /// Serialize the header including its CRC.
    #[must_use]
    pub fn build(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = SYNC_1;
        header[1] = SYNC_2;
        header[2] = self.length;
        header[3] = self.control.to_byte();
        header[4..6].copy_from_slice(&self.destination.to_le_bytes());
        header[6..8].copy_from_slice(&self.source.to_le_bytes());
        let crc = crc16(&header[..8]);
        header[8..10].copy_from_slice(&crc.to_le_bytes());
        header
    }
}

/// Total on-wire length of a frame carrying `user_len` data bytes.
#[must_use]
pub fn frame_len(user_len: usize) -> usize {
    HEADER_SIZE + user_len + user_len.div_ceil(BLOCK_DATA_SIZE) * CRC_SIZE
}

/// Maximum user data bytes that fit a frame of at most `max_frame` wire bytes.
///
/// Inverse of [`frame_len`], accounting for the per-block CRC overhead.
#[must_use]
pub fn max_user_data_for(max_frame: usize) -> usize {
    let available = max_frame.saturating_sub(HEADER_SIZE);
    let full_blocks = available / (BLOCK_DATA_SIZE + CRC_SIZE);
    let leftover = available % (BLOCK_DATA_SIZE + CRC_SIZE);
    let partial = leftover.saturating_sub(CRC_SIZE);
    (full_blocks * BLOCK_DATA_SIZE + partial).min(MAX_USER_DATA)
}

/// Build a complete link frame: header plus CRC-protected user data blocks.
pub fn build_frame(
    control: ControlField,
    destination: LinkAddress,
    source: LinkAddress,
    user_data: &[u8],
) -> Result<Vec<u8>, FrameError> {
    if user_data.len() > MAX_USER_DATA {
        return Err(FrameError::UserDataTooLong {
            len: user_data.len(),
            max: MAX_USER_DATA,
        });
    }
    let header = FrameHeader {
        length: FIXED_FRAME_LENGTH + user_data.len() as u8,
        control,
        destination,
        source,
    };

    let mut frame = Vec::with_capacity(frame_len(user_data.len()));
    frame.extend_from_slice(&header.build());
    for block in user_data.chunks(BLOCK_DATA_SIZE) {
        let start = frame.len();
        frame.extend_from_slice(block);
        append_crc(&mut frame, start);
    }
    Ok(frame)
}

/// Extract and CRC-verify the user data of a complete frame body.
///
/// `body` is everything after the 10-byte header; `user_len` comes from the
/// header's length field.
pub fn parse_user_data(body: &[u8], user_len: usize) -> Result<Vec<u8>, FrameError> {
    let expected = user_len + user_len.div_ceil(BLOCK_DATA_SIZE) * CRC_SIZE;
    if body.len() < expected {
        return Err(FrameError::TooShort {
            min: expected,
            actual: body.len(),
        });
    }

    let mut data = Vec::with_capacity(user_len);
    let mut offset = 0;
    let mut remaining = user_len;
    let mut block_index = 0;
    while remaining > 0 {
        let take = remaining.min(BLOCK_DATA_SIZE);
        let block = &body[offset..offset + take + CRC_SIZE];
        if !check_crc(block) {
            return Err(FrameError::BadBlockCrc { block: block_index });
        }
        data.extend_from_slice(&block[..take]);
        offset += take + CRC_SIZE;
        remaining -= take;
        block_index += 1;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MIN_FRAME_SIZE;
    use crate::control::{PrimaryFunction, SecondaryFunction};
    use alloc::vec;

    fn addr(v: u16) -> LinkAddress {
        LinkAddress::new(v)
    }

    #[test]
    fn fixed_frame_is_ten_bytes() {
        let cf = ControlField::secondary(false, SecondaryFunction::Ack);
        let frame = build_frame(cf, addr(3), addr(1024), &[]).unwrap();
        assert_eq!(frame.len(), HEADER_SIZE);
        let header = FrameHeader::parse(&frame).unwrap();
        assert_eq!(header.length, FIXED_FRAME_LENGTH);
        assert_eq!(header.user_data_len(), 0);
        assert_eq!(header.destination, addr(3));
        assert_eq!(header.source, addr(1024));
    }

    #[test]
    fn data_frame_roundtrip() {
        let cf = ControlField::primary(true, PrimaryFunction::UnconfirmedUserData, false, false);
        let payload: Vec<u8> = (0..40u8).collect();
        let frame = build_frame(cf, addr(1), addr(2), &payload).unwrap();
        // 10 header + 40 data + 3 block CRCs
        assert_eq!(frame.len(), 10 + 40 + 6);
        let header = FrameHeader::parse(&frame).unwrap();
        assert_eq!(header.user_data_len(), 40);
        let data = parse_user_data(&frame[HEADER_SIZE..], 40).unwrap();
        assert_eq!(data, payload);
    }

    #[test]
    fn max_user_data_frame_is_292_bytes() {
        let cf = ControlField::primary(true, PrimaryFunction::ConfirmedUserData, true, true);
        let payload = vec![0xAB; MAX_USER_DATA];
        let frame = build_frame(cf, addr(1), addr(2), &payload).unwrap();
        assert_eq!(frame.len(), crate::constants::MAX_FRAME_SIZE);
    }

    #[test]
    fn max_user_data_inverts_frame_len() {
        assert_eq!(max_user_data_for(crate::constants::MAX_FRAME_SIZE), 250);
        assert_eq!(max_user_data_for(MIN_FRAME_SIZE), 12);
        assert_eq!(max_user_data_for(HEADER_SIZE), 0);
        for max_frame in MIN_FRAME_SIZE..=crate::constants::MAX_FRAME_SIZE {
            let user = max_user_data_for(max_frame);
            assert!(frame_len(user) <= max_frame);
            if user < MAX_USER_DATA {
                assert!(frame_len(user + 1) > max_frame);
            }
        }
    }

    #[test]
    fn oversized_user_data_rejected() {
        let cf = ControlField::primary(true, PrimaryFunction::ConfirmedUserData, false, true);
        let payload = vec![0u8; MAX_USER_DATA + 1];
        assert_eq!(
            build_frame(cf, addr(1), addr(2), &payload),
            Err(FrameError::UserDataTooLong {
                len: 251,
                max: 250
            })
        );
    }

    #[test]
    fn bad_sync_rejected() {
        let cf = ControlField::secondary(false, SecondaryFunction::Ack);
        let mut frame = build_frame(cf, addr(3), addr(4), &[]).unwrap();
        frame[1] = 0x65;
        assert_eq!(
            FrameHeader::parse(&frame),
            Err(FrameError::BadSync {
                offset: 1,
                value: 0x65
            })
        );
    }

    #[test]
    fn corrupt_header_crc_rejected() {
        let cf = ControlField::secondary(false, SecondaryFunction::Ack);
        let mut frame = build_frame(cf, addr(3), addr(4), &[]).unwrap();
        frame[4] ^= 0x01;
        assert_eq!(FrameHeader::parse(&frame), Err(FrameError::BadHeaderCrc));
    }

    #[test]
    fn corrupt_block_crc_rejected() {
        let cf = ControlField::primary(true, PrimaryFunction::UnconfirmedUserData, false, false);
        let payload: Vec<u8> = (0..20u8).collect();
        let mut frame = build_frame(cf, addr(1), addr(2), &payload).unwrap();
        // Flip a byte inside the second block.
        let second_block = HEADER_SIZE + 16 + CRC_SIZE;
        frame[second_block] ^= 0x80;
        assert_eq!(
            parse_user_data(&frame[HEADER_SIZE..], 20),
            Err(FrameError::BadBlockCrc { block: 1 })
        );
    }

    #[test]
    fn truncated_body_rejected() {
        let cf = ControlField::primary(true, PrimaryFunction::UnconfirmedUserData, false, false);
        let payload: Vec<u8> = (0..20u8).collect();
        let frame = build_frame(cf, addr(1), addr(2), &payload).unwrap();
        let body = &frame[HEADER_SIZE..frame.len() - 1];
        assert!(matches!(
            parse_user_data(body, 20),
            Err(FrameError::TooShort { .. })
        ));
    }

    #[test]
    fn invalid_length_field_rejected() {
        let header = FrameHeader {
            length: FIXED_FRAME_LENGTH,
            control: ControlField::secondary(false, SecondaryFunction::Ack),
            destination: addr(1),
            source: addr(2),
        };
        let mut raw = header.build();
        raw[2] = 4;
        let crc = crc16(&raw[..8]);
        raw[8..10].copy_from_slice(&crc.to_le_bytes());
        assert_eq!(FrameHeader::parse(&raw), Err(FrameError::InvalidLength(4)));
    }
}
