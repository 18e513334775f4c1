//! Link transmit descriptor and retry state machine.
//!
//! A channel carries at most one retryable in-flight frame at a time. On a
//! confirm timeout the identical bytes are retransmitted verbatim, up to the
//! configured retry limit. LINK_STATUS replies travel through a separate,
//! never-retried slot so that a status probe answer can never displace or be
//! displaced by the retryable descriptor.

use dnp3_core::control::{ControlField, PrimaryFunction, SecondaryFunction};
use dnp3_core::frame::build_frame;
use dnp3_core::types::LinkAddress;

use crate::error::LinkError;
use crate::session::LinkSession;

/// What kind of frame the retryable descriptor holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    ResetLink,
    UserData { confirmed: bool },
    RequestLinkStatus,
}

/// Retry machine state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    #[default]
    Idle,
    AwaitingConfirm,
}

/// The single retryable in-flight transmission unit.
#[derive(Debug, Clone)]
pub struct TxDescriptor {
    pub frame: Vec<u8>,
    pub kind: TxKind,
    pub destination: LinkAddress,
    pub retries: u32,
}

/// Outcome of staging a user-data send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame staged; transmit these bytes.
    Frame(Vec<u8>),
    /// The destination's secondary is not reset: a RESET_LINK was staged
    /// instead and the data send is deferred until the reset is acknowledged.
    ResetFirst(Vec<u8>),
}

/// Outcome of a confirm-timer expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retransmit these identical bytes.
    Retransmit(Vec<u8>),
    /// Retries exhausted; the descriptor has been abandoned.
    Exhausted {
        kind: TxKind,
        destination: LinkAddress,
    },
}

/// Link transmit state for one channel.
#[derive(Debug, Default)]
pub struct LinkTx {
    descriptor: Option<TxDescriptor>,
    state: TxState,
}

impl LinkTx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the retryable slot is free.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.descriptor.is_none()
    }

    #[must_use]
    pub fn state(&self) -> TxState {
        self.state
    }

    #[must_use]
    pub fn current_kind(&self) -> Option<TxKind> {
        self.descriptor.as_ref().map(|d| d.kind)
    }

    #[must_use]
    pub fn destination(&self) -> Option<LinkAddress> {
        self.descriptor.as_ref().map(|d| d.destination)
    }

    // ------------------------------------------------------------------ //
    // Staging
    // ------------------------------------------------------------------ //

    /// Stage a user-data frame toward `session`.
    ///
    /// For a confirmed send to an unreset secondary, a RESET_LINK is staged
    /// first and [`SendOutcome::ResetFirst`] returned; the caller re-attempts
    /// the data send once the reset completes.
    pub fn send_user_data(
        &mut self,
        session: &mut LinkSession,
        dir: bool,
        source: LinkAddress,
        payload: &[u8],
        confirmed: bool,
    ) -> Result<SendOutcome, LinkError> {
        if self.descriptor.is_some() {
            return Err(LinkError::TxBusy);
        }
        if confirmed && !session.secondary_is_reset {
            let control = ControlField::primary(dir, PrimaryFunction::ResetLink, false, false);
            let frame = build_frame(control, session.address(), source, &[])?;
            session.begin_reset();
            tracing::debug!(destination = %session.address(), "staging RESET_LINK before data");
            self.descriptor = Some(TxDescriptor {
                frame: frame.clone(),
                kind: TxKind::ResetLink,
                destination: session.address(),
                retries: 0,
            });
            return Ok(SendOutcome::ResetFirst(frame));
        }

        let function = if confirmed {
            PrimaryFunction::ConfirmedUserData
        } else {
            PrimaryFunction::UnconfirmedUserData
        };
        let control = ControlField::primary(
            dir,
            function,
            confirmed && session.next_fcb,
            confirmed,
        );
        let frame = build_frame(control, session.address(), source, payload)?;
        tracing::trace!(
            destination = %session.address(),
            len = payload.len(),
            confirmed,
            fcb = control.fcb,
            "staging user data frame"
        );
        self.descriptor = Some(TxDescriptor {
            frame: frame.clone(),
            kind: TxKind::UserData { confirmed },
            destination: session.address(),
            retries: 0,
        });
        Ok(SendOutcome::Frame(frame))
    }

    /// Stage a REQUEST_LINK_STATUS probe toward `destination`.
    pub fn send_request_status(
        &mut self,
        dir: bool,
        source: LinkAddress,
        destination: LinkAddress,
    ) -> Result<Vec<u8>, LinkError> {
        if self.descriptor.is_some() {
            return Err(LinkError::TxBusy);
        }
        let control = ControlField::primary(dir, PrimaryFunction::RequestLinkStatus, false, false);
        let frame = build_frame(control, destination, source, &[])?;
        self.descriptor = Some(TxDescriptor {
            frame: frame.clone(),
            kind: TxKind::RequestLinkStatus,
            destination,
            retries: 0,
        });
        Ok(frame)
    }

    /// Build a LINK_STATUS reply; fire and forget, never retried, and
    /// independent of the retryable descriptor.
    pub fn build_status_reply(
        dir: bool,
        source: LinkAddress,
        destination: LinkAddress,
    ) -> Result<Vec<u8>, LinkError> {
        let control = ControlField::secondary(dir, SecondaryFunction::LinkStatus);
        Ok(build_frame(control, destination, source, &[])?)
    }

    /// Build a fixed secondary reply (ACK/NACK/NOT_SUPPORTED); fire and forget.
    pub fn build_secondary_reply(
        dir: bool,
        function: SecondaryFunction,
        source: LinkAddress,
        destination: LinkAddress,
    ) -> Result<Vec<u8>, LinkError> {
        let control = ControlField::secondary(dir, function);
        Ok(build_frame(control, destination, source, &[])?)
    }

    // ------------------------------------------------------------------ //
    // Completion and retries
    // ------------------------------------------------------------------ //

    /// The physical layer finished writing the staged frame.
    ///
    /// Returns `true` when a confirm is now awaited (the caller starts the
    /// confirm timer); otherwise the descriptor is released.
    pub fn on_transmitted(&mut self) -> bool {
        let needs_confirm = matches!(
            self.current_kind(),
            Some(TxKind::ResetLink)
                | Some(TxKind::UserData { confirmed: true })
                | Some(TxKind::RequestLinkStatus)
        );
        if needs_confirm {
            self.state = TxState::AwaitingConfirm;
        } else {
            self.descriptor = None;
            self.state = TxState::Idle;
        }
        needs_confirm
    }

    /// A matching secondary frame confirmed (or refused) the staged frame.
    /// Releases the descriptor and returns it.
    pub fn confirm_received(&mut self) -> Option<TxDescriptor> {
        self.state = TxState::Idle;
        self.descriptor.take()
    }

    /// Confirm-timer expiry: retransmit verbatim or give up.
    pub fn on_confirm_timeout(&mut self, max_retries: u32) -> Result<RetryDecision, LinkError> {
        let descriptor = self.descriptor.as_mut().ok_or(LinkError::NoPendingTx)?;
        if descriptor.retries < max_retries {
            descriptor.retries += 1;
            tracing::debug!(
                destination = %descriptor.destination,
                retry = descriptor.retries,
                max_retries,
                "confirm timeout; retransmitting"
            );
            Ok(RetryDecision::Retransmit(descriptor.frame.clone()))
        } else {
            let descriptor = self.descriptor.take().ok_or(LinkError::NoPendingTx)?;
            self.state = TxState::Idle;
            tracing::warn!(
                destination = %descriptor.destination,
                attempts = descriptor.retries + 1,
                "confirm retries exhausted; abandoning transmission"
            );
            Ok(RetryDecision::Exhausted {
                kind: descriptor.kind,
                destination: descriptor.destination,
            })
        }
    }

    /// Abandon any staged transmission (cancellation path).
    pub fn abandon(&mut self) -> Option<TxDescriptor> {
        self.state = TxState::Idle;
        self.descriptor.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> LinkSession {
        LinkSession::new(LinkAddress::new(4))
    }

    #[test]
    fn unconfirmed_send_releases_on_transmit() {
        let mut tx = LinkTx::new();
        let mut s = session();
        let out = tx
            .send_user_data(&mut s, true, LinkAddress::new(1), &[1, 2, 3], false)
            .unwrap();
        assert!(matches!(out, SendOutcome::Frame(_)));
        assert!(!tx.on_transmitted());
        assert!(tx.is_idle());
    }

    #[test]
    fn confirmed_send_to_unreset_secondary_defers_behind_reset() {
        let mut tx = LinkTx::new();
        let mut s = session();
        let out = tx
            .send_user_data(&mut s, true, LinkAddress::new(1), &[1, 2, 3], true)
            .unwrap();
        assert!(matches!(out, SendOutcome::ResetFirst(_)));
        assert_eq!(tx.current_kind(), Some(TxKind::ResetLink));
        assert!(s.reset_wait);
        assert!(tx.on_transmitted());
        assert_eq!(tx.state(), TxState::AwaitingConfirm);
        // Reset acked: slot free again, data send can proceed.
        tx.confirm_received();
        s.on_ack(true);
        let out = tx
            .send_user_data(&mut s, true, LinkAddress::new(1), &[1, 2, 3], true)
            .unwrap();
        assert!(matches!(out, SendOutcome::Frame(_)));
        assert_eq!(tx.current_kind(), Some(TxKind::UserData { confirmed: true }));
    }

    #[test]
    fn busy_slot_rejects_second_send() {
        let mut tx = LinkTx::new();
        let mut s = session();
        s.secondary_is_reset = true;
        tx.send_user_data(&mut s, true, LinkAddress::new(1), &[0], true)
            .unwrap();
        assert!(matches!(
            tx.send_user_data(&mut s, true, LinkAddress::new(1), &[1], true),
            Err(LinkError::TxBusy)
        ));
    }

    #[test]
    fn retry_exhaustion_after_max_retries() {
        let mut tx = LinkTx::new();
        let mut s = session();
        s.secondary_is_reset = true;
        let SendOutcome::Frame(first) = tx
            .send_user_data(&mut s, true, LinkAddress::new(1), &[7; 10], true)
            .unwrap()
        else {
            panic!("expected direct frame");
        };
        assert!(tx.on_transmitted());

        let max_retries = 3;
        let mut attempts = 1;
        loop {
            match tx.on_confirm_timeout(max_retries).unwrap() {
                RetryDecision::Retransmit(bytes) => {
                    attempts += 1;
                    // Verbatim retransmission.
                    assert_eq!(bytes, first);
                }
                RetryDecision::Exhausted { kind, destination } => {
                    assert_eq!(kind, TxKind::UserData { confirmed: true });
                    assert_eq!(destination, LinkAddress::new(4));
                    break;
                }
            }
        }
        assert_eq!(attempts, 4); // 1 original + 3 retries
        assert!(tx.is_idle());
    }

    #[test]
    fn status_reply_does_not_touch_descriptor() {
        let mut tx = LinkTx::new();
        let mut s = session();
        s.secondary_is_reset = true;
        tx.send_user_data(&mut s, true, LinkAddress::new(1), &[0], true)
            .unwrap();
        // The status reply does not collide with the retryable descriptor.
        let reply = LinkTx::build_status_reply(true, LinkAddress::new(1), LinkAddress::new(4))
            .unwrap();
        assert_eq!(reply.len(), 10);
        assert_eq!(tx.current_kind(), Some(TxKind::UserData { confirmed: true }));
    }

    #[test]
    fn timeout_with_nothing_pending_is_error() {
        let mut tx = LinkTx::new();
        assert!(matches!(
            tx.on_confirm_timeout(3),
            Err(LinkError::NoPendingTx)
        ));
    }
}
