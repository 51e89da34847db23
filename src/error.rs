// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 tvlink contributors

use thiserror::Error;

/// Transport-level failures. `Timeout` and `Network` are per-attempt and
/// recovered by the retry loop; callers only ever see `Exhausted`.
///
/// Causes are carried as strings rather than source chains so a single
/// failure can be handed to every deduplicated waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("request to {url} failed: {cause}")]
    Network { url: String, cause: String },

    #[error("giving up on {url} after {attempts} attempts: {cause}")]
    Exhausted {
        url: String,
        attempts: u32,
        cause: String,
    },
}

/// Failures surfaced by [`crate::resolver::StreamResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Every transport attempt failed. Transient: a later call may succeed.
    #[error("no stream for channel {channel} after {attempts} attempts: {cause}")]
    Exhausted {
        channel: String,
        attempts: u32,
        cause: String,
    },

    /// The upstream answered but the payload failed validation. Not retried;
    /// likely permanent for this channel.
    #[error("upstream rejected channel {channel}: {reason}")]
    InvalidResponse { channel: String, reason: String },

    /// The caller that owned the in-flight request was dropped before it
    /// settled.
    #[error("resolution of channel {channel} was interrupted")]
    Interrupted { channel: String },
}

impl ResolveError {
    /// Whether retrying the same channel later is worthwhile.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidResponse { .. })
    }

    /// The channel the failure belongs to.
    pub fn channel(&self) -> &str {
        match self {
            Self::Exhausted { channel, .. }
            | Self::InvalidResponse { channel, .. }
            | Self::Interrupted { channel } => channel,
        }
    }
}
