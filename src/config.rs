// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 tvlink contributors

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub preload: PreloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream resolver service.
    pub base_url: String,
    /// Route issuing session-bound proxy URLs.
    pub session_path: String,
    /// Route for generic channel stream lookups.
    pub stream_path: String,
    /// Route for the secondary channel catalog.
    pub catalog_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a resolved URL stays valid.
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (3 means 4 attempts total).
    pub max_retries: u32,
    pub attempt_timeout_secs: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadConfig {
    /// Minimum spacing between session-initialization calls during preload.
    pub session_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig {
                base_url: "https://your-resolver.example.com".to_string(),
                session_path: "/api/session".to_string(),
                stream_path: "/api/stream".to_string(),
                catalog_path: "/api/channels".to_string(),
            },
            cache: CacheConfig { ttl_secs: 600 },
            retry: RetryConfig {
                max_retries: 3,
                attempt_timeout_secs: 30,
                base_delay_ms: 1000,
                max_delay_ms: 5000,
            },
            preload: PreloadConfig {
                session_delay_ms: 500,
            },
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Config {
        Self::load(&path).unwrap_or_else(|_| {
            eprintln!("Warning: Could not load config file, using defaults");
            Self::default()
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Default config file location under the platform config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("tvlink").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}
