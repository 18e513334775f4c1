//! Link receive state machine.
//!
//! A pull-based byte consumer with four states:
//!
//! ```text
//! Idle --0x05--> Header --valid, data--> UserData --last block--> Idle
//!   ^               |                        |
//!   |               +--valid, fixed frame----+--> (frame event)
//!   +---bad sync/CRC: resync on next 0x05 within the buffered bytes
//!
//! Header --valid, not for us / oversized--> DiscardData --consumed--> Idle
//! ```
//!
//! On a header or block CRC failure the parser never drops more bytes than
//! necessary: it scans the already-buffered bytes for the next 0x05 and
//! resumes synchronization from there.

use std::collections::VecDeque;
use std::time::Instant;

use dnp3_core::constants::{BLOCK_DATA_SIZE, BLOCK_SIZE, CRC_SIZE, HEADER_SIZE, SYNC_1};
use dnp3_core::crc::check_crc;
use dnp3_core::error::FrameError;
use dnp3_core::frame::FrameHeader;

/// A complete, fully CRC-verified link frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub header: FrameHeader,
    pub user_data: Vec<u8>,
    /// When the frame's first sync byte was seen.
    pub started_at: Instant,
}

/// Events produced while feeding bytes to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxEvent {
    /// A data-frame header passed validation. The caller may inspect the
    /// addressing and call [`LinkRxParser::discard_current`] before feeding
    /// further bytes to skip the frame body.
    Header(FrameHeader),
    /// A complete frame (fixed, or data with all blocks verified).
    Frame(ReceivedFrame),
}

/// Reason a frame or partial frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxDiscardReason {
    BadSync,
    BadHeaderCrc,
    BadBlockCrc,
    OversizedFrame,
    NotAddressedHere,
}

/// Receive-side diagnostic counters, incremented at every discard and
/// state transition of interest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxStats {
    pub frames_received: u64,
    pub idle_bytes_discarded: u64,
    pub bad_sync: u64,
    pub bad_header_crc: u64,
    pub bad_block_crc: u64,
    pub oversized_frames: u64,
    pub frames_discarded: u64,
    pub resyncs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Idle,
    Header,
    UserData,
    DiscardData,
}

/// The link receive parser.
#[derive(Debug)]
pub struct LinkRxParser {
    state: RxState,
    header_buf: [u8; HEADER_SIZE],
    header_have: usize,
    header: Option<FrameHeader>,
    block_buf: [u8; BLOCK_SIZE],
    block_have: usize,
    block_expect: usize,
    frame_buf: Vec<u8>,
    remaining: usize,
    max_user_data: usize,
    started_at: Option<Instant>,
    stats: RxStats,
}

impl LinkRxParser {
    /// Create a parser that accepts frames carrying up to `max_user_data`
    /// bytes; larger frames are consumed but discarded.
    pub fn new(max_user_data: usize) -> Self {
        Self {
            state: RxState::Idle,
            header_buf: [0; HEADER_SIZE],
            header_have: 0,
            header: None,
            block_buf: [0; BLOCK_SIZE],
            block_have: 0,
            block_expect: 0,
            frame_buf: Vec::new(),
            remaining: 0,
            max_user_data,
            started_at: None,
            stats: RxStats::default(),
        }
    }

    /// How many more bytes the caller should deliver before the next state
    /// transition can occur.
    #[must_use]
    pub fn needed_bytes(&self) -> usize {
        match self.state {
            RxState::Idle => 1,
            RxState::Header => HEADER_SIZE - self.header_have,
            RxState::UserData | RxState::DiscardData => {
                self.block_expect + CRC_SIZE - self.block_have
            }
        }
    }

    /// Receive-side counters.
    #[must_use]
    pub fn stats(&self) -> RxStats {
        self.stats
    }

    /// Switch the in-progress data frame to discard mode (frame addressed
    /// elsewhere, or otherwise unwanted). Valid after a `Header` event.
    pub fn discard_current(&mut self, reason: RxDiscardReason) {
        if self.state == RxState::UserData {
            tracing::debug!(?reason, "discarding frame body");
            self.stats.frames_discarded += 1;
            self.frame_buf.clear();
            self.state = RxState::DiscardData;
        }
    }

    /// Feed received bytes, returning the events they produced.
    ///
    /// `now` is recorded as the receive timestamp of any frame whose first
    /// sync byte is seen in this call.
    pub fn parse_bytes(&mut self, input: &[u8], now: Instant) -> Vec<RxEvent> {
        let mut events = Vec::new();
        let mut queue: VecDeque<u8> = input.iter().copied().collect();
        while let Some(byte) = queue.pop_front() {
            self.step(byte, now, &mut events, &mut queue);
        }
        events
    }

    fn step(
        &mut self,
        byte: u8,
        now: Instant,
        events: &mut Vec<RxEvent>,
        queue: &mut VecDeque<u8>,
    ) {
        match self.state {
            RxState::Idle => {
                if byte == SYNC_1 {
                    self.header_buf[0] = byte;
                    self.header_have = 1;
                    self.started_at = Some(now);
                    self.state = RxState::Header;
                } else {
                    self.stats.idle_bytes_discarded += 1;
                }
            }
            RxState::Header => {
                self.header_buf[self.header_have] = byte;
                self.header_have += 1;
                if self.header_have == HEADER_SIZE {
                    self.finish_header(events, queue);
                }
            }
            RxState::UserData => {
                self.block_buf[self.block_have] = byte;
                self.block_have += 1;
                if self.block_have == self.block_expect + CRC_SIZE {
                    self.finish_block(events, queue);
                }
            }
            RxState::DiscardData => {
                self.block_buf[self.block_have] = byte;
                self.block_have += 1;
                if self.block_have == self.block_expect + CRC_SIZE {
                    self.remaining -= self.block_expect;
                    if self.remaining == 0 {
                        self.reset();
                    } else {
                        self.begin_block();
                    }
                }
            }
        }
    }

    fn finish_header(&mut self, events: &mut Vec<RxEvent>, queue: &mut VecDeque<u8>) {
        match FrameHeader::parse(&self.header_buf) {
            Ok(header) => {
                let user_len = header.user_data_len();
                if user_len == 0 {
                    tracing::trace!(
                        function = header.control.function,
                        source = %header.source,
                        "fixed frame received"
                    );
                    self.stats.frames_received += 1;
                    let started_at = self.started_at.take().expect("set on first sync byte");
                    events.push(RxEvent::Frame(ReceivedFrame {
                        header,
                        user_data: Vec::new(),
                        started_at,
                    }));
                    self.reset();
                } else if user_len > self.max_user_data {
                    tracing::warn!(
                        user_len,
                        max = self.max_user_data,
                        "oversized frame; consuming and discarding"
                    );
                    self.stats.oversized_frames += 1;
                    self.stats.frames_discarded += 1;
                    self.header = None;
                    self.remaining = user_len;
                    self.state = RxState::DiscardData;
                    self.begin_block();
                } else {
                    events.push(RxEvent::Header(header));
                    self.header = Some(header);
                    self.remaining = user_len;
                    self.frame_buf.clear();
                    self.state = RxState::UserData;
                    self.begin_block();
                }
            }
            Err(err) => {
                match err {
                    FrameError::BadSync { .. } => self.stats.bad_sync += 1,
                    FrameError::BadHeaderCrc => self.stats.bad_header_crc += 1,
                    _ => self.stats.bad_sync += 1,
                }
                tracing::debug!(%err, "header rejected; resynchronizing");
                // Do not drop the whole buffered block: resume the sync
                // search from the next 0x05 inside it.
                let have = self.header_have;
                let buffered = self.header_buf;
                self.resync(&buffered[1..have], queue);
            }
        }
    }

    fn finish_block(&mut self, events: &mut Vec<RxEvent>, queue: &mut VecDeque<u8>) {
        let block_len = self.block_have;
        if check_crc(&self.block_buf[..block_len]) {
            self.frame_buf
                .extend_from_slice(&self.block_buf[..self.block_expect]);
            self.remaining -= self.block_expect;
            if self.remaining == 0 {
                let header = self.header.take().expect("header present in UserData");
                let started_at = self.started_at.take().expect("set on first sync byte");
                self.stats.frames_received += 1;
                tracing::trace!(
                    user_len = self.frame_buf.len(),
                    source = %header.source,
                    "data frame received"
                );
                events.push(RxEvent::Frame(ReceivedFrame {
                    header,
                    user_data: std::mem::take(&mut self.frame_buf),
                    started_at,
                }));
                self.reset();
            } else {
                self.begin_block();
            }
        } else {
            self.stats.bad_block_crc += 1;
            self.stats.frames_discarded += 1;
            tracing::debug!("block CRC mismatch; dropping frame and resynchronizing");
            let block = self.block_buf;
            self.resync(&block[..block_len], queue);
        }
    }

    /// Drop the in-progress frame and resume the sync search from the first
    /// 0x05 within `tail`, replaying those bytes through the parser.
    fn resync(&mut self, tail: &[u8], queue: &mut VecDeque<u8>) {
        self.reset();
        if let Some(pos) = tail.iter().position(|&b| b == SYNC_1) {
            self.stats.resyncs += 1;
            for &b in tail[pos..].iter().rev() {
                queue.push_front(b);
            }
        }
    }

    fn begin_block(&mut self) {
        self.block_expect = self.remaining.min(BLOCK_DATA_SIZE);
        self.block_have = 0;
    }

    fn reset(&mut self) {
        self.state = RxState::Idle;
        self.header_have = 0;
        self.header = None;
        self.block_have = 0;
        self.block_expect = 0;
        self.remaining = 0;
        self.started_at = None;
        self.frame_buf.clear();
    }
}
