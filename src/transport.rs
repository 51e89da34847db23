// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 tvlink contributors

use anyhow::Result;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::TransportError;

/// Retry schedule for upstream requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (3 means 4 attempts total).
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            attempt_timeout: Duration::from_secs(30),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt` (0-based):
    /// `min(base * 2^attempt, cap)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// HTTP client that retries transient failures with capped exponential
/// backoff.
///
/// Purely transport-level: no caching, no payload interpretation. Any HTTP
/// status is returned as-is; only network errors and per-attempt timeouts
/// count as failures here.
#[derive(Debug)]
pub struct RetryingClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .user_agent("Mozilla/5.0")
                .build()?,
            policy,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Issue one logical GET, retrying per-attempt timeouts and network
    /// errors until the policy is exhausted.
    ///
    /// A timed-out attempt is aborted (its future is dropped) and counted as
    /// a failure; the logical operation continues to the next attempt. The
    /// final error names the URL, the attempt count, and the last cause.
    pub async fn fetch_with_retry(&self, url: &str) -> Result<reqwest::Response, TransportError> {
        let attempts = self.policy.max_retries + 1;
        let mut last_failure: Option<TransportError> = None;

        for attempt in 0..attempts {
            let outcome =
                tokio::time::timeout(self.policy.attempt_timeout, self.client.get(url).send())
                    .await;

            let failure = match outcome {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => TransportError::Network {
                    url: url.to_string(),
                    cause: e.to_string(),
                },
                Err(_) => TransportError::Timeout {
                    url: url.to_string(),
                    timeout_secs: self.policy.attempt_timeout.as_secs(),
                },
            };

            if attempt + 1 < attempts {
                let delay = self.policy.backoff_delay(attempt);
                warn!(
                    "attempt {}/{} for {} failed: {}; retrying in {:?}",
                    attempt + 1,
                    attempts,
                    url,
                    failure,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            last_failure = Some(failure);
        }

        let cause = last_failure
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts were made".to_string());
        Err(TransportError::Exhausted {
            url: url.to_string(),
            attempts,
            cause,
        })
    }
}
