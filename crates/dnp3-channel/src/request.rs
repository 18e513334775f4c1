//! Transmit requests and their completion reporting.
//!
//! A request owns its application fragment from enqueue to completion. The
//! completion callback runs while the channel lock is held; it must not call
//! back into the channel directly and instead records follow-up cancellations
//! on the [`CompletionCtx`] it is handed, which the channel drains after the
//! callback returns.

use std::fmt;
use std::time::Duration;

use dnp3_core::constants::{APP_FUNC_CONFIRM, APP_FUNC_READ};
use dnp3_core::types::SessionId;

/// Channel-unique handle for one queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub struct RequestId(pub u64);

/// Terminal status of a transmit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Transmitted, and the expected response (if any) arrived.
    Success,
    /// The response (or an incremental frame of it) did not arrive in time.
    Timeout,
    /// Canceled by the caller or displaced by a duplicate.
    Canceled,
    /// The link layer gave up on delivery.
    Failure,
    /// A response arrived but was rejected by the session hooks.
    Mismatch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFlags {
    /// Send to the broadcast address rather than the session's station.
    pub broadcast: bool,
    /// Complete with `Success` as soon as the fragment is fully transmitted.
    pub no_response: bool,
    /// Authentication traffic: may be dispatched past an outstanding
    /// request on the same session. Such sends never hold the outstanding
    /// slot, so they complete with `Success` at delivery, like
    /// `no_response`.
    pub auth: bool,
}

/// Deferred-action context handed to completion callbacks.
///
/// Cancellations recorded here are applied by the channel after the callback
/// returns, so a callback may cancel any request, including ones whose own
/// callbacks are further down the same completion cascade.
#[derive(Debug, Default)]
pub struct CompletionCtx {
    cancels: Vec<RequestId>,
}

impl CompletionCtx {
    pub fn cancel(&mut self, id: RequestId) {
        self.cancels.push(id);
    }

    pub(crate) fn take_cancels(&mut self) -> Vec<RequestId> {
        std::mem::take(&mut self.cancels)
    }
}

/// What a completed request looked like when it finished.
#[derive(Debug)]
pub struct ResponseInfo {
    pub id: RequestId,
    pub session: SessionId,
    pub status: TxStatus,
    /// The request's application fragment, returned to the caller.
    pub payload: Vec<u8>,
    pub priority: u8,
    pub flags: RequestFlags,
}

pub type CompletionHandler = Box<dyn FnMut(&mut CompletionCtx, &ResponseInfo) + Send>;

/// An application fragment queued for transmission.
pub struct TxRequest {
    pub session: SessionId,
    pub payload: Vec<u8>,
    pub priority: u8,
    pub flags: RequestFlags,
    /// Time allowed for the response, measured from enqueue. Zero disables
    /// the response timer.
    pub response_timeout: Duration,
    /// Requests on the same session with equal tags and equivalent payloads
    /// replace each other while still unsent.
    pub owner_tag: Option<u64>,
    pub on_complete: Option<CompletionHandler>,
}

impl TxRequest {
    pub fn new(session: SessionId, payload: Vec<u8>) -> Self {
        Self {
            session,
            payload,
            priority: 0,
            flags: RequestFlags::default(),
            response_timeout: Duration::ZERO,
            owner_tag: None,
            on_complete: None,
        }
    }

    /// Application function code, if the fragment has one.
    #[must_use]
    pub fn function(&self) -> Option<u8> {
        self.payload.get(1).copied()
    }

    /// Application CONFIRM messages bypass dispatch ordering entirely.
    #[must_use]
    pub fn is_confirm(&self) -> bool {
        self.function() == Some(APP_FUNC_CONFIRM)
    }

    #[must_use]
    pub fn is_read(&self) -> bool {
        self.function() == Some(APP_FUNC_READ)
    }

    /// Payload equivalence for duplicate detection: the leading application
    /// control byte (sequence numbers, FIR/FIN flags) is ignored.
    #[must_use]
    pub fn same_payload(&self, other: &TxRequest) -> bool {
        self.payload.len() == other.payload.len()
            && self.payload.get(1..) == other.payload.get(1..)
    }
}

impl fmt::Debug for TxRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxRequest")
            .field("session", &self.session)
            .field("len", &self.payload.len())
            .field("priority", &self.priority)
            .field("flags", &self.flags)
            .field("owner_tag", &self.owner_tag)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_code_is_second_byte() {
        let req = TxRequest::new(SessionId::new(1), vec![0xC0, 0x01, 0x3C]);
        assert!(req.is_read());
        assert!(!req.is_confirm());
        let confirm = TxRequest::new(SessionId::new(1), vec![0xC1, 0x00]);
        assert!(confirm.is_confirm());
    }

    #[test]
    fn payload_equivalence_ignores_control_byte() {
        let a = TxRequest::new(SessionId::new(1), vec![0xC0, 0x01, 0x3C, 0x02]);
        let b = TxRequest::new(SessionId::new(1), vec![0xC7, 0x01, 0x3C, 0x02]);
        let c = TxRequest::new(SessionId::new(1), vec![0xC0, 0x01, 0x3C, 0x03]);
        assert!(a.same_payload(&b));
        assert!(!a.same_payload(&c));
    }

    #[test]
    fn one_byte_payloads_compare_equal_after_control() {
        let a = TxRequest::new(SessionId::new(1), vec![0xC0]);
        let b = TxRequest::new(SessionId::new(1), vec![0xC1]);
        assert!(a.same_payload(&b));
    }
}
