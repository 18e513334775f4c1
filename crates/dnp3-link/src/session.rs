//! Per-remote-station alternating-bit protocol state.
//!
//! [`LinkSession`] tracks both directions of the FCB/FCV handshake with one
//! remote station:
//!
//! ```text
//! OUR PRIMARY SIDE                       THEIR PRIMARY SIDE
//!     |-- RESET_LINK ------------------>     |-- RESET_LINK (we ACK,
//!     |<------------------------- ACK --|    |   expected_fcb := true)
//!     | secondary_is_reset := true           |
//!     | next_fcb := true                     |-- CONFIRMED_USER_DATA FCB=1
//!     |-- CONFIRMED_USER_DATA FCB=1 -->      |   (matches: deliver, toggle,
//!     |<------------------------- ACK --|    |    ACK; mismatch: repeat
//!     | next_fcb := false                    |    last ACK/NACK, drop data)
//! ```
//!
//! The FCB bits toggle exactly once per successfully validated confirmed
//! exchange in each direction; only a link reset re-seeds them.
//!
//! Handlers return action enums that the channel layer executes; this module
//! performs no I/O.

use dnp3_core::control::{ControlField, PrimaryFunction, SecondaryFunction};
use dnp3_core::types::LinkAddress;

/// What the channel layer should do after a primary frame was processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send a fixed secondary frame (ACK/NACK/NOT_SUPPORTED) in reply.
    Reply(SecondaryFunction),
    /// Send a LINK_STATUS reply via the non-retried transmit slot.
    ReplyLinkStatus,
    /// Hand the frame's user data to the transport layer.
    Deliver(Vec<u8>),
    /// Deliver user data and send the given secondary reply.
    DeliverAndReply(Vec<u8>, SecondaryFunction),
    /// Drop the frame without reply.
    Ignore(IgnoreReason),
}

/// Why a primary frame was dropped without reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// RESET_LINK or another confirmable service addressed to broadcast.
    BroadcastConfirmRequest,
    /// REQUEST_LINK_STATUS before any link reset.
    LinkNotReset,
    /// FCB mismatch on a confirmed frame with no prior confirm to repeat.
    FcbMismatch,
}

/// What the channel layer should do after a secondary frame acknowledged
/// (or refused) a frame we sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAction {
    /// Our RESET_LINK was acknowledged; the deferred data send may proceed.
    ResetAcked,
    /// Our confirmed data frame was delivered.
    Delivered,
    /// NACK received; retransmit the frame directly.
    RetryDirect,
    /// NACK received; a link reset must precede the retransmission.
    RetryWithReset,
    /// LINK_STATUS received; cancel the confirm timer, informational only.
    StatusReceived,
    /// Secondary frame arrived with nothing outstanding.
    Unexpected,
}

/// Alternating-bit protocol state for one remote station.
#[derive(Debug, Clone)]
pub struct LinkSession {
    /// Remote station link address.
    address: LinkAddress,
    /// We (as secondary) have processed a RESET_LINK from the remote.
    pub link_is_reset: bool,
    /// The remote secondary confirmed our reset: confirmed data may be sent.
    pub secondary_is_reset: bool,
    /// Our RESET_LINK is in flight, awaiting its ACK.
    pub reset_wait: bool,
    /// FCB to put on our next confirmed-data frame.
    pub next_fcb: bool,
    /// FCB we expect on the next confirmed-data frame we receive.
    pub expected_fcb: bool,
    /// Last confirm we sent (repeated verbatim on FCB mismatch).
    last_confirm: Option<SecondaryFunction>,
}

impl LinkSession {
    pub fn new(address: LinkAddress) -> Self {
        Self {
            address,
            link_is_reset: false,
            secondary_is_reset: false,
            reset_wait: false,
            next_fcb: true,
            expected_fcb: true,
            last_confirm: None,
        }
    }

    #[must_use]
    pub fn address(&self) -> LinkAddress {
        self.address
    }

    // ------------------------------------------------------------------ //
    // Secondary role: frames initiated by the remote primary
    // ------------------------------------------------------------------ //

    /// Process a primary frame addressed to us.
    ///
    /// `broadcast` is true when the frame's destination was a broadcast
    /// address. FCB/FCV are validated here, on the complete frame, never
    /// before all blocks have passed CRC.
    pub fn on_primary_frame(
        &mut self,
        control: ControlField,
        broadcast: bool,
        user_data: Vec<u8>,
    ) -> SessionAction {
        let function = match control.primary_function() {
            Ok(f) => f,
            Err(err) => {
                tracing::debug!(address = %self.address, %err, "unsupported primary function");
                return SessionAction::Reply(SecondaryFunction::NotSupported);
            }
        };
        match function {
            PrimaryFunction::ResetLink => self.on_reset_link(broadcast),
            PrimaryFunction::TestLink => self.on_test_link(control),
            PrimaryFunction::RequestLinkStatus => self.on_request_status(),
            PrimaryFunction::ConfirmedUserData => {
                self.on_confirmed_data(control, broadcast, user_data)
            }
            PrimaryFunction::UnconfirmedUserData => {
                tracing::trace!(address = %self.address, len = user_data.len(),
                    "unconfirmed user data");
                SessionAction::Deliver(user_data)
            }
        }
    }

    fn on_reset_link(&mut self, broadcast: bool) -> SessionAction {
        if broadcast {
            tracing::debug!(address = %self.address, "RESET_LINK to broadcast rejected");
            return SessionAction::Ignore(IgnoreReason::BroadcastConfirmRequest);
        }
        tracing::debug!(address = %self.address, "link reset by remote");
        self.link_is_reset = true;
        self.expected_fcb = true;
        self.last_confirm = Some(SecondaryFunction::Ack);
        SessionAction::Reply(SecondaryFunction::Ack)
    }

    fn on_test_link(&mut self, control: ControlField) -> SessionAction {
        if !self.link_is_reset {
            self.last_confirm = Some(SecondaryFunction::Nack);
            return SessionAction::Reply(SecondaryFunction::Nack);
        }
        if control.fcv && control.fcb == self.expected_fcb {
            self.expected_fcb = !self.expected_fcb;
            self.last_confirm = Some(SecondaryFunction::Ack);
            SessionAction::Reply(SecondaryFunction::Ack)
        } else {
            self.repeat_last_confirm()
        }
    }

    fn on_request_status(&mut self) -> SessionAction {
        if !self.link_is_reset {
            tracing::debug!(address = %self.address, "REQUEST_LINK_STATUS before reset");
            return SessionAction::Ignore(IgnoreReason::LinkNotReset);
        }
        SessionAction::ReplyLinkStatus
    }

    fn on_confirmed_data(
        &mut self,
        control: ControlField,
        broadcast: bool,
        user_data: Vec<u8>,
    ) -> SessionAction {
        if broadcast {
            // A broadcast cannot be acknowledged; deliver without confirming.
            tracing::trace!(address = %self.address, "confirmed user data to broadcast");
            return SessionAction::Deliver(user_data);
        }
        if !self.link_is_reset {
            self.last_confirm = Some(SecondaryFunction::Nack);
            return SessionAction::Reply(SecondaryFunction::Nack);
        }
        if control.fcv && control.fcb == self.expected_fcb {
            self.expected_fcb = !self.expected_fcb;
            self.last_confirm = Some(SecondaryFunction::Ack);
            SessionAction::DeliverAndReply(user_data, SecondaryFunction::Ack)
        } else {
            tracing::debug!(
                address = %self.address,
                fcb = control.fcb,
                fcv = control.fcv,
                expected = self.expected_fcb,
                "FCB mismatch; repeating last confirm, dropping data"
            );
            self.repeat_last_confirm()
        }
    }

    fn repeat_last_confirm(&self) -> SessionAction {
        match self.last_confirm {
            Some(confirm) => SessionAction::Reply(confirm),
            None => SessionAction::Ignore(IgnoreReason::FcbMismatch),
        }
    }

    // ------------------------------------------------------------------ //
    // Primary role: acknowledgements of frames we initiated
    // ------------------------------------------------------------------ //

    /// Process an ACK of our outstanding primary frame.
    pub fn on_ack(&mut self, awaiting_reset_ack: bool) -> ConfirmAction {
        if awaiting_reset_ack {
            tracing::debug!(address = %self.address, "link reset acknowledged");
            self.reset_wait = false;
            self.secondary_is_reset = true;
            self.next_fcb = true;
            ConfirmAction::ResetAcked
        } else {
            self.next_fcb = !self.next_fcb;
            ConfirmAction::Delivered
        }
    }

    /// Process a NACK of our outstanding primary frame.
    ///
    /// `reset_required` reflects whether the confirm-mode policy demands a
    /// fresh link reset before the retransmission.
    pub fn on_nack(&mut self, reset_required: bool) -> ConfirmAction {
        tracing::debug!(address = %self.address, reset_required, "NACK received");
        self.secondary_is_reset = false;
        if reset_required {
            ConfirmAction::RetryWithReset
        } else {
            ConfirmAction::RetryDirect
        }
    }

    /// Process a LINK_STATUS reply to our REQUEST_LINK_STATUS.
    pub fn on_link_status(&self) -> ConfirmAction {
        tracing::trace!(address = %self.address, "link status received");
        ConfirmAction::StatusReceived
    }

    /// Mark our RESET_LINK as in flight.
    pub fn begin_reset(&mut self) {
        self.reset_wait = true;
    }

    /// Called when a confirmed transmission exhausted its retries: the
    /// secondary can no longer be assumed reset.
    pub fn on_confirm_failed(&mut self) {
        tracing::debug!(address = %self.address, "confirm retries exhausted");
        self.reset_wait = false;
        self.secondary_is_reset = false;
    }
}
