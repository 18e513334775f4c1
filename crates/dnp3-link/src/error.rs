//! Link-layer error types.

use dnp3_core::error::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("a transmission is already in flight")]
    TxBusy,

    #[error("no transmission awaiting confirm")]
    NoPendingTx,
}
