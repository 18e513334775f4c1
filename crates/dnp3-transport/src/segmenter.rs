//! Fragment segmentation.

use dnp3_core::transport::{TransportHeader, next_seq};

use crate::error::TransportError;

/// Number of segments a fragment of `len` bytes needs at the given per-frame
/// user-data budget (`frame_size` includes the one-byte transport header).
#[must_use]
pub fn segment_count(len: usize, frame_size: usize) -> usize {
    len.div_ceil(frame_size - 1)
}

/// Transmit-side transport state: the rolling segment sequence number.
///
/// The sequence is incremented once per segment actually emitted and carries
/// across fragments, wrapping mod 64.
#[derive(Debug, Default)]
pub struct Segmenter {
    next_seq: u8,
}

impl Segmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next emitted segment will carry.
    #[must_use]
    pub fn peek_seq(&self) -> u8 {
        self.next_seq
    }

    /// Split `fragment` into transport segments of at most `frame_size`
    /// bytes each (header byte included).
    ///
    /// FIRST is set only on the first segment, FINAL only on the last; a
    /// one-segment fragment carries both.
    pub fn segment(
        &mut self,
        fragment: &[u8],
        frame_size: usize,
    ) -> Result<Vec<Vec<u8>>, TransportError> {
        if fragment.is_empty() {
            return Err(TransportError::EmptyFragment);
        }
        if frame_size < 2 {
            return Err(TransportError::FrameSizeTooSmall(frame_size));
        }

        let payload_budget = frame_size - 1;
        let count = segment_count(fragment.len(), frame_size);
        let mut segments = Vec::with_capacity(count);
        for (index, chunk) in fragment.chunks(payload_budget).enumerate() {
            let header = TransportHeader::new(self.next_seq, index == 0, index == count - 1);
            let mut segment = Vec::with_capacity(1 + chunk.len());
            segment.push(header.to_byte());
            segment.extend_from_slice(chunk);
            segments.push(segment);
            self.next_seq = next_seq(self.next_seq);
        }

        tracing::trace!(
            fragment_len = fragment.len(),
            segments = segments.len(),
            "fragment segmented"
        );
        Ok(segments)
    }
}
