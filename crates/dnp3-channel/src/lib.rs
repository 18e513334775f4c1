//! Channel request queue and dispatcher.
//!
//! This crate drives the full transmit pipeline: application fragments are
//! queued per channel in priority order, dispatched one at a time per
//! session, segmented by `dnp3-transport`, framed and delivered by
//! `dnp3-link`, and completed back to the caller with a terminal status.
//!
//! The [`Channel`] is sans-I/O: the caller owns the socket or serial port
//! and the clock, feeds bytes in with [`Channel::on_bytes`], executes the
//! [`ChannelEvent::TransmitBytes`] events it gets back, and drives timers
//! through [`Channel::poll_timers`].

mod channel;
mod config;
mod dispatcher;
mod error;
mod events;
mod hooks;
mod queue;
mod request;

pub use channel::Channel;
pub use config::{ChannelConfig, ConfirmMode, ReassemblyMode};
pub use dispatcher::{rotation, Dispatcher, Selection};
pub use error::{ChannelError, ConfigError};
pub use events::{ChannelEvent, ChannelStats, TxToken};
pub use hooks::{NoHooks, SessionHooks};
pub use queue::{ChannelQueue, EnqueueRejected, QueuedRequest};
pub use request::{
    CompletionCtx, CompletionHandler, RequestFlags, RequestId, ResponseInfo, TxRequest, TxStatus,
};
