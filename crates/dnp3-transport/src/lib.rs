//! Transport-layer segmentation and reassembly.
//!
//! An application fragment is split into link-frame-sized segments on send,
//! each prefixed with a one-byte transport header (6-bit rolling sequence,
//! FIRST/FINAL markers), and rejoined on receive with strict sequence
//! validation and a duplicate-segment tolerance rule.

pub mod error;
pub mod reassembly;
pub mod segmenter;

pub use error::TransportError;
pub use reassembly::{Reassembler, SegmentDiscard, SegmentOutcome};
pub use segmenter::{Segmenter, segment_count};
