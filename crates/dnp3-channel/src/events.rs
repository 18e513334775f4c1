//! Events returned by channel entry points.
//!
//! The channel performs no I/O of its own: every side effect it wants is
//! expressed as a [`ChannelEvent`] in the `Vec` each entry point returns,
//! and the caller reports transmit completion back with the event's token.

use dnp3_core::types::SessionId;

use crate::request::ResponseInfo;

/// Identifies one `TransmitBytes` event so its physical-layer completion can
/// be reported back via [`Channel::on_transmit_done`](crate::Channel::on_transmit_done).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct TxToken(pub u64);

/// A side effect the caller must perform, or a notification to surface.
#[derive(Debug)]
pub enum ChannelEvent {
    /// Write these bytes to the physical layer, then report completion.
    TransmitBytes { token: TxToken, bytes: Vec<u8> },
    /// A complete application fragment was reassembled.
    FragmentReceived {
        session: SessionId,
        fragment: Vec<u8>,
    },
    /// A queued request reached a terminal status.
    RequestComplete(ResponseInfo),
    /// The session stopped responding and entered its offline cool-down.
    SessionOffline(SessionId),
    /// A keepalive probe exhausted its retries and the configuration asks
    /// for the channel transport to be reopened.
    ReopenChannel,
}

/// Channel-level diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub requests_enqueued: u64,
    pub requests_completed: u64,
    pub requests_timed_out: u64,
    pub requests_canceled: u64,
    pub requests_failed: u64,
    pub duplicates_replaced: u64,
    pub fragments_tx: u64,
    pub fragments_rx: u64,
    pub frames_not_addressed_here: u64,
    pub unexpected_confirms: u64,
    pub keepalives_sent: u64,
}
