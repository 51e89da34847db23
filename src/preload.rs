// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 tvlink contributors

use futures_util::future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::resolver::StreamResolver;

/// Enforces a minimum spacing between successive calls.
///
/// The first `pace()` returns immediately; each later call sleeps until at
/// least the configured interval has passed since the previous one. Keeps
/// the throttling policy in one tunable place instead of scattered sleeps.
#[derive(Debug)]
pub struct Pacer {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub async fn pace(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Outcome of a [`StreamResolver::preload`] run. Partial failure is a
/// report, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadReport {
    /// Channels requested.
    pub requested: usize,
    /// Channels whose URL resolved (phase 1).
    pub resolved: usize,
    /// Channels whose session initialized (phase 2).
    pub sessions: usize,
}

impl std::fmt::Display for PreloadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} resolved, {}/{} sessions warmed",
            self.resolved, self.requested, self.sessions, self.requested
        )
    }
}

impl StreamResolver {
    /// Warm the cache and sessions for a prioritized channel list.
    ///
    /// Phase 1 resolves every channel concurrently; individual failures are
    /// logged and the batch continues. Phase 2 initializes sessions strictly
    /// in list order, paced so upstream never sees a burst of session
    /// calls. Total failure still returns a report.
    pub async fn preload(&self, channel_ids: &[String]) -> PreloadReport {
        let resolutions = future::join_all(channel_ids.iter().map(|id| async move {
            let result = self.resolve_stream_url(id).await;
            (id, result)
        }))
        .await;

        let mut resolved = 0usize;
        for (id, result) in resolutions {
            match result {
                Ok(_) => resolved += 1,
                Err(e) => warn!("preload: failed to resolve channel {}: {}", id, e),
            }
        }

        let mut pacer = Pacer::new(self.session_delay());
        let mut sessions = 0usize;
        for id in channel_ids {
            pacer.pace().await;
            match self.initialize_session(id).await {
                Ok(_) => sessions += 1,
                Err(e) => warn!("preload: session init failed for channel {}: {}", id, e),
            }
        }

        let report = PreloadReport {
            requested: channel_ids.len(),
            resolved,
            sessions,
        };
        info!("preload complete: {}", report);
        report
    }
}
