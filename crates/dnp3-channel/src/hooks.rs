//! Session-layer policy hooks.
//!
//! The channel is policy-free: whether a session may transmit right now, how
//! an application header is finalized before segmentation, and whether an
//! unknown station is worth opening a session for are all decided here. The
//! defaults make every hook a no-op so simple deployments need none of them.

use dnp3_core::types::{LinkAddress, SessionId};

use crate::request::ResponseInfo;

pub trait SessionHooks: Send {
    /// May `session` transmit right now? Dispatch skips it otherwise.
    fn ok_to_send(&mut self, _session: SessionId) -> bool {
        true
    }

    /// Finalize the application header just before segmentation. Rewrites
    /// persist on the queued request, so a later retransmission reuses them.
    fn prepare(&mut self, _session: SessionId, _payload: &mut Vec<u8>) {}

    /// A well-formed frame arrived from a station with no open session.
    /// Return a session id to open one for `remote`; called at most once
    /// per frame.
    fn auto_open(&mut self, _remote: LinkAddress) -> Option<SessionId> {
        None
    }

    /// Validate a received fragment against the outstanding request before
    /// it completes that request. Rejection completes it as `Mismatch`.
    fn accept_response(&mut self, _session: SessionId, _fragment: &[u8]) -> bool {
        true
    }

    /// Observe every completion before the request's own callback runs.
    fn on_request_complete(&mut self, _info: &ResponseInfo) {}
}

/// The do-nothing default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl SessionHooks for NoHooks {}
