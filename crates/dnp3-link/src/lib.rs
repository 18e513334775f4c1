//! Link-layer frame engine for the DNP3 transmission stack.
//!
//! This crate implements the stateful link-layer logic: the pull-based
//! receive byte-stream state machine (sync search, header validation,
//! CRC-checked user data blocks, resynchronization), the per-remote-station
//! alternating-bit (FCB/FCV) protocol, the single in-flight transmit
//! descriptor with its retry state machine, and link-status keepalive
//! scheduling.
//!
//! The state machines here are deliberately decoupled from I/O: they return
//! action enums that the channel layer executes.

pub mod error;
pub mod keepalive;
pub mod rx;
pub mod session;
pub mod tx;

pub use error::LinkError;
pub use keepalive::Keepalive;
pub use rx::{LinkRxParser, ReceivedFrame, RxDiscardReason, RxEvent, RxStats};
pub use session::{ConfirmAction, IgnoreReason, LinkSession, SessionAction};
pub use tx::{LinkTx, RetryDecision, SendOutcome, TxDescriptor, TxKind, TxState};
