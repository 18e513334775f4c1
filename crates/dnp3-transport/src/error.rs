//! Transport-layer error types.

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("empty application fragment")]
    EmptyFragment,

    #[error("frame size {0} too small to carry a transport segment")]
    FrameSizeTooSmall(usize),
}
