//! Channel-layer error types.

use dnp3_core::types::SessionId;

use crate::request::RequestId;

/// A configuration field outside its permitted range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max frame size {0} outside 24-292")]
    FrameSize(usize),
    #[error("fragment size {0} below the 2-byte application header minimum")]
    FragmentSize(usize),
    #[error("confirm timeout must be non-zero")]
    ZeroConfirmTimeout,
    #[error("keepalive period shorter than the confirm timeout")]
    KeepaliveTooShort,
}

/// Errors surfaced by channel entry points.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("request queue full ({depth} entries)")]
    QueueFull { depth: usize },
    #[error("fragment of {len} bytes exceeds the {max}-byte transmit limit")]
    FragmentTooLarge { len: usize, max: usize },
    #[error("no session {0}")]
    UnknownSession(SessionId),
    #[error("no request {0:?}")]
    UnknownRequest(RequestId),
    #[error("session {0} already open")]
    DuplicateSession(SessionId),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
