//! Channel configuration.
//!
//! A [`ChannelConfig`] is validated once at construction and again on every
//! [`modify`](crate::Channel::modify_config); all fields may change at
//! runtime except the queue contents they govern, which are re-checked lazily.

use std::time::Duration;

use dnp3_core::constants::{MAX_FRAME_SIZE, MIN_FRAGMENT_SIZE, MIN_FRAME_SIZE};
use dnp3_core::frame::max_user_data_for;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// When confirmed (acknowledged) link-layer delivery is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmMode {
    /// Never request link confirms.
    Never,
    /// Confirm only multi-frame fragments.
    Sometimes,
    /// Confirm every user-data frame.
    Always,
}

/// How received transport segments are reassembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReassemblyMode {
    /// One reassembly buffer for the whole channel; interleaved fragments
    /// from different stations abort each other.
    PerChannel,
    /// One reassembly buffer per session.
    PerSession,
}

/// Per-channel tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Our own link address.
    pub local_address: u16,
    /// Master stations set DIR=1 on every primary frame they send.
    pub is_master: bool,
    /// Accept frames destined to the 0xFFFC self-address wildcard.
    pub accept_self_address: bool,
    /// Largest on-wire frame, 24-292 bytes. Bounds the per-frame user data.
    pub max_frame_size: usize,
    /// Largest application fragment we will segment and transmit.
    pub tx_fragment_size: usize,
    /// Largest application fragment we will reassemble.
    pub rx_fragment_size: usize,
    pub confirm_mode: ConfirmMode,
    /// Whether a NACK forces a link reset before the retransmission.
    pub reset_on_nack: bool,
    /// Confirm timer for the retryable transmit slot.
    pub confirm_timeout: Duration,
    /// Retransmissions after the original attempt.
    pub max_retries: u32,
    /// Bounds one session's multi-frame exchange on the shared channel.
    /// Zero disables the timer.
    pub incremental_timeout: Duration,
    /// Cool-down before a failed session is dispatched to again.
    pub offline_delay: Duration,
    /// Consecutive read-request timeouts before the session is marked
    /// offline. Zero disables the check.
    pub read_timeout_offline_threshold: u32,
    /// Idle period before a REQUEST_LINK_STATUS probe. Zero disables.
    pub keepalive_period: Duration,
    /// Reopen the channel when a keepalive probe exhausts its retries.
    pub reopen_on_keepalive_failure: bool,
    /// Maximum queued requests. Zero means unbounded.
    pub max_queue_depth: usize,
    pub reassembly_mode: ReassemblyMode,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            local_address: 1,
            is_master: true,
            accept_self_address: false,
            max_frame_size: MAX_FRAME_SIZE,
            tx_fragment_size: 2048,
            rx_fragment_size: 2048,
            confirm_mode: ConfirmMode::Never,
            reset_on_nack: false,
            confirm_timeout: Duration::from_secs(5),
            max_retries: 3,
            incremental_timeout: Duration::from_secs(5),
            offline_delay: Duration::from_secs(30),
            read_timeout_offline_threshold: 0,
            keepalive_period: Duration::from_secs(60),
            reopen_on_keepalive_failure: false,
            max_queue_depth: 0,
            reassembly_mode: ReassemblyMode::PerSession,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&self.max_frame_size) {
            return Err(ConfigError::FrameSize(self.max_frame_size));
        }
        if self.tx_fragment_size < MIN_FRAGMENT_SIZE {
            return Err(ConfigError::FragmentSize(self.tx_fragment_size));
        }
        if self.rx_fragment_size < MIN_FRAGMENT_SIZE {
            return Err(ConfigError::FragmentSize(self.rx_fragment_size));
        }
        if self.confirm_timeout.is_zero() {
            return Err(ConfigError::ZeroConfirmTimeout);
        }
        if !self.keepalive_period.is_zero() && self.keepalive_period < self.confirm_timeout {
            return Err(ConfigError::KeepaliveTooShort);
        }
        Ok(())
    }

    /// User-data bytes available per frame, transport header included.
    #[must_use]
    pub fn segment_budget(&self) -> usize {
        max_user_data_for(self.max_frame_size)
    }
}
