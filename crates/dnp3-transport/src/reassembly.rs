//! Fragment reassembly.
//!
//! Segments are accepted only in strict mod-64 sequence from a single
//! session. A FIRST segment always restarts the assembly, even mid-fragment:
//! a master superseding an unfinished solicited response is legitimate. One
//! duplicate retransmitted segment (previous sequence, no FINAL) is tolerated
//! and dropped alone; any other sequence mismatch discards the whole
//! in-progress fragment.

use dnp3_core::constants::MIN_FRAGMENT_SIZE;
use dnp3_core::transport::{TransportHeader, next_seq, prev_seq};
use dnp3_core::types::SessionId;

/// Why a segment or in-progress fragment was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentDiscard {
    /// Segment without FIRST while no reassembly is in progress.
    NoFragmentInProgress,
    /// Segment names a different session than the fragment in progress.
    WrongSession,
    /// Duplicate of the previous segment (retransmission); dropped alone.
    DuplicateSegment,
    /// Sequence gap; the whole in-progress fragment was dropped.
    SequenceGap,
    /// Assembled fragment would exceed the configured maximum.
    FragmentTooLarge,
    /// Completed fragment shorter than an application header.
    FragmentTooShort,
    /// Segment with no payload bytes at all.
    EmptySegment,
}

/// Result of feeding one segment to the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// Segment accepted; fragment still incomplete.
    Accepted,
    /// FINAL segment accepted; the complete fragment is returned.
    Complete(Vec<u8>),
    /// This segment was dropped; any in-progress fragment is unaffected.
    SegmentDropped(SegmentDiscard),
    /// This segment and the whole in-progress fragment were dropped.
    FragmentDropped(SegmentDiscard),
}

/// Reassembly counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub fragments_completed: u64,
    pub segments_accepted: u64,
    pub segments_dropped: u64,
    pub fragments_dropped: u64,
    pub restarts: u64,
}

/// Receive-side transport state for one session (or one channel, depending
/// on the configured ownership granularity).
#[derive(Debug)]
pub struct Reassembler {
    expected_seq: u8,
    waiting_for_first: bool,
    session: Option<SessionId>,
    buf: Vec<u8>,
    max_fragment: usize,
    stats: ReassemblyStats,
}

impl Reassembler {
    /// `max_fragment` bounds the assembled fragment size; exceeding it drops
    /// the fragment.
    pub fn new(max_fragment: usize) -> Self {
        Self {
            expected_seq: 0,
            waiting_for_first: true,
            session: None,
            buf: Vec::new(),
            max_fragment,
            stats: ReassemblyStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Whether a fragment is currently being assembled.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        !self.waiting_for_first
    }

    /// Drop any in-progress fragment and return to waiting-for-first.
    pub fn reset(&mut self) {
        if !self.waiting_for_first {
            self.stats.fragments_dropped += 1;
        }
        self.waiting_for_first = true;
        self.session = None;
        self.buf.clear();
    }

    /// Feed one received segment (transport header byte plus payload).
    pub fn on_segment(&mut self, session: SessionId, segment: &[u8]) -> SegmentOutcome {
        if segment.is_empty() {
            return self.drop_segment(SegmentDiscard::EmptySegment);
        }
        let header = TransportHeader::from_byte(segment[0]);
        let payload = &segment[1..];

        if header.fir {
            if !self.waiting_for_first {
                // A new fragment superseding an unfinished one is legitimate.
                tracing::debug!(
                    %session,
                    discarded = self.buf.len(),
                    "FIRST segment mid-assembly; restarting"
                );
                self.stats.fragments_dropped += 1;
                self.stats.restarts += 1;
            }
            self.buf.clear();
            self.session = Some(session);
            self.waiting_for_first = false;
            self.expected_seq = header.seq;
            return self.accept(header, payload);
        }

        if self.waiting_for_first {
            return self.drop_segment(SegmentDiscard::NoFragmentInProgress);
        }
        if self.session != Some(session) {
            return self.drop_segment(SegmentDiscard::WrongSession);
        }
        if header.seq != self.expected_seq {
            if header.seq == prev_seq(self.expected_seq) && !header.fin {
                // A retransmitted duplicate of the previous segment: drop it
                // alone and keep expecting the original sequence.
                return self.drop_segment(SegmentDiscard::DuplicateSegment);
            }
            tracing::debug!(
                %session,
                expected = self.expected_seq,
                got = header.seq,
                "transport sequence gap; dropping fragment"
            );
            self.reset();
            self.stats.segments_dropped += 1;
            return SegmentOutcome::FragmentDropped(SegmentDiscard::SequenceGap);
        }

        self.accept(header, payload)
    }

    fn accept(&mut self, header: TransportHeader, payload: &[u8]) -> SegmentOutcome {
        if self.buf.len() + payload.len() > self.max_fragment {
            tracing::warn!(
                have = self.buf.len(),
                add = payload.len(),
                max = self.max_fragment,
                "fragment exceeds maximum size; dropping"
            );
            self.reset();
            self.stats.segments_dropped += 1;
            return SegmentOutcome::FragmentDropped(SegmentDiscard::FragmentTooLarge);
        }
        self.buf.extend_from_slice(payload);
        self.expected_seq = next_seq(header.seq);
        self.stats.segments_accepted += 1;

        if header.fin {
            if self.buf.len() < MIN_FRAGMENT_SIZE {
                self.reset();
                return SegmentOutcome::FragmentDropped(SegmentDiscard::FragmentTooShort);
            }
            let fragment = std::mem::take(&mut self.buf);
            self.waiting_for_first = true;
            self.session = None;
            self.stats.fragments_completed += 1;
            tracing::trace!(len = fragment.len(), "fragment complete");
            SegmentOutcome::Complete(fragment)
        } else {
            SegmentOutcome::Accepted
        }
    }

    fn drop_segment(&mut self, reason: SegmentDiscard) -> SegmentOutcome {
        tracing::debug!(?reason, "segment dropped");
        self.stats.segments_dropped += 1;
        SegmentOutcome::SegmentDropped(reason)
    }
}
