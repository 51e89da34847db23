// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 tvlink contributors

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::UrlCache;
use crate::config::{Config, UpstreamConfig};
use crate::error::{ResolveError, TransportError};
use crate::singleflight::{FlightError, SingleFlight};
use crate::store::KeyValueStore;
use crate::transport::{RetryPolicy, RetryingClient};

/// Normalized upstream response.
///
/// The wire payload carries the playable URL as either `proxyUrl`
/// (session-bound) or `streamUrl` (generic lookup); `success: false` or a
/// missing URL is a domain failure regardless of HTTP status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamResult {
    pub success: bool,
    #[serde(default, rename = "proxyUrl")]
    pub proxy_url: Option<String>,
    #[serde(default, rename = "streamUrl")]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl UpstreamResult {
    /// The playable URL, preferring the session-bound proxy form. Empty
    /// strings count as missing.
    pub fn playable_url(&self) -> Option<&str> {
        [self.proxy_url.as_deref(), self.stream_url.as_deref()]
            .into_iter()
            .flatten()
            .find(|u| !u.is_empty())
    }
}

/// Resolves playable stream URLs against the upstream service.
///
/// Owns the retrying transport, the URL cache, and two in-flight registries:
/// one keyed by channel id for session initialization, one keyed by request
/// URL for plain resolution, so the two never deduplicate against each
/// other.
///
/// Note on key space: all routes cache under the same channel-id key with
/// one TTL, so a session-bound proxy URL and a generic lookup for the same
/// channel overwrite each other (last writer wins). This mirrors the
/// upstream service's contract where both forms are playable
/// interchangeably for the TTL window.
pub struct StreamResolver {
    transport: RetryingClient,
    cache: UrlCache,
    routes: UpstreamConfig,
    base_url: String,
    session_flights: SingleFlight<String, UpstreamResult, ResolveError>,
    resolve_flights: SingleFlight<String, String, ResolveError>,
    session_delay: Duration,
}

impl StreamResolver {
    pub fn new(config: &Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        url::Url::parse(&config.upstream.base_url)
            .with_context(|| format!("Invalid upstream base URL: {}", config.upstream.base_url))?;

        let transport = RetryingClient::new(RetryPolicy::from(&config.retry))?;
        let cache = UrlCache::new(store, Duration::from_secs(config.cache.ttl_secs));

        Ok(Self {
            transport,
            cache,
            routes: config.upstream.clone(),
            base_url: config.upstream.base_url.trim_end_matches('/').to_string(),
            session_flights: SingleFlight::new(),
            resolve_flights: SingleFlight::new(),
            session_delay: Duration::from_millis(config.preload.session_delay_ms),
        })
    }

    pub fn cache(&self) -> &UrlCache {
        &self.cache
    }

    pub(crate) fn session_delay(&self) -> Duration {
        self.session_delay
    }

    fn route_url(&self, path: &str, channel_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            path.trim_matches('/'),
            urlencoding::encode(channel_id)
        )
    }

    /// Initialize an upstream session for a channel, deduplicated.
    ///
    /// Any number of concurrent calls for the same channel trigger exactly
    /// one upstream request; all callers observe the same result or the same
    /// error. On a validated success the proxy URL is written through to the
    /// cache before callers resume.
    pub async fn initialize_session(
        &self,
        channel_id: &str,
    ) -> Result<UpstreamResult, ResolveError> {
        let url = self.route_url(&self.routes.session_path, channel_id);

        let outcome = self
            .session_flights
            .run(channel_id.to_string(), async {
                let (stream_url, result) = self.fetch_validated(&url, channel_id).await?;
                self.cache.put(channel_id, &stream_url).await;
                Ok(result)
            })
            .await;

        outcome.map_err(|e| match e {
            FlightError::Inner(e) => e,
            FlightError::LeaderDropped => ResolveError::Interrupted {
                channel: channel_id.to_string(),
            },
        })
    }

    /// Resolve a playable URL for a channel, cache-first.
    ///
    /// A cache hit returns immediately with no network traffic; a miss
    /// fetches from the generic stream route and caches the result.
    pub async fn resolve_stream_url(&self, channel_id: &str) -> Result<String, ResolveError> {
        self.resolve_via(&self.routes.stream_path, channel_id).await
    }

    /// Same shape as [`Self::resolve_stream_url`] against the secondary
    /// channel catalog route. Shares the cache and TTL policy.
    pub async fn get_channels_stream(&self, channel_id: &str) -> Result<String, ResolveError> {
        self.resolve_via(&self.routes.catalog_path, channel_id).await
    }

    async fn resolve_via(&self, path: &str, channel_id: &str) -> Result<String, ResolveError> {
        if let Some(url) = self.cache.get(channel_id) {
            debug!("cache hit for channel {}", channel_id);
            return Ok(url);
        }

        let request_url = self.route_url(path, channel_id);

        let outcome = self
            .resolve_flights
            .run(request_url.clone(), async {
                let (stream_url, _) = self.fetch_validated(&request_url, channel_id).await?;
                self.cache.put(channel_id, &stream_url).await;
                Ok(stream_url)
            })
            .await;

        outcome.map_err(|e| match e {
            FlightError::Inner(e) => e,
            FlightError::LeaderDropped => ResolveError::Interrupted {
                channel: channel_id.to_string(),
            },
        })
    }

    /// Fetch a route and validate the payload. Nothing is cached here; on
    /// any failure the caller must leave the cache untouched.
    async fn fetch_validated(
        &self,
        url: &str,
        channel_id: &str,
    ) -> Result<(String, UpstreamResult), ResolveError> {
        let response = self
            .transport
            .fetch_with_retry(url)
            .await
            .map_err(|e| match e {
                TransportError::Exhausted {
                    attempts, cause, ..
                } => ResolveError::Exhausted {
                    channel: channel_id.to_string(),
                    attempts,
                    cause,
                },
                other => ResolveError::Exhausted {
                    channel: channel_id.to_string(),
                    attempts: 1,
                    cause: other.to_string(),
                },
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::InvalidResponse {
                channel: channel_id.to_string(),
                reason: format!("upstream returned HTTP {}", status),
            });
        }

        let result: UpstreamResult =
            response
                .json()
                .await
                .map_err(|e| ResolveError::InvalidResponse {
                    channel: channel_id.to_string(),
                    reason: format!("malformed upstream payload: {}", e),
                })?;

        if !result.success {
            let reason = result
                .message
                .clone()
                .unwrap_or_else(|| "upstream reported failure".to_string());
            return Err(ResolveError::InvalidResponse {
                channel: channel_id.to_string(),
                reason,
            });
        }

        let Some(stream_url) = result.playable_url() else {
            return Err(ResolveError::InvalidResponse {
                channel: channel_id.to_string(),
                reason: "payload carried no stream URL".to_string(),
            });
        };

        Ok((stream_url.to_string(), result))
    }

    /// Drop every cached URL, in memory and in the persistent store.
    pub async fn invalidate_all(&self) -> Result<()> {
        self.cache.invalidate_all().await
    }

    /// Warm the cache from the persistent store. Call once at startup.
    pub async fn load_from_persistent(&self) -> Result<usize> {
        self.cache.load_from_persistent().await
    }
}
