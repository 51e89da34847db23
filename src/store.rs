// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 tvlink contributors

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tokio::fs as async_fs;

/// Minimal persistent key-value repository.
///
/// The cache layer only needs these five operations; the backend (files,
/// embedded KV store, remote cache) is swappable without touching cache
/// logic.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn keys(&self) -> Result<Vec<String>>;
    async fn get_many(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>>;
    async fn remove_many(&self, keys: &[String]) -> Result<()>;
}

/// File-backed store: one JSON document per key under a single directory.
///
/// File names are the urlencoded key, so arbitrary key strings survive the
/// filesystem and `keys()` can recover them by decoding.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store rooted at the platform cache directory.
    pub fn new() -> Result<Self> {
        let dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine cache directory"))?
            .join("tvlink");
        Self::with_dir(dir)
    }

    pub fn with_dir(dir: PathBuf) -> Result<Self> {
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create store directory: {}", dir.display()))?;
        }
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }

    fn key_of(file_name: &str) -> Option<String> {
        let encoded = file_name.strip_suffix(".json")?;
        urlencoding::decode(encoded).ok().map(|k| k.into_owned())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        match async_fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read store entry: {}", path.display()))
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(key);
        async_fs::write(&path, value)
            .await
            .with_context(|| format!("Failed to write store entry: {}", path.display()))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = async_fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list store directory: {}", self.dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(Self::key_of) {
                keys.push(key);
            }
        }

        Ok(keys)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push((key.clone(), self.get(key).await?));
        }
        Ok(out)
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            let path = self.entry_path(key);
            match async_fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to remove store entry: {}", path.display())
                    });
                }
            }
        }
        Ok(())
    }
}

/// In-memory store, primarily a test double for [`FileStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().keys().cloned().collect())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>> {
        let entries = self.entries.lock();
        Ok(keys
            .iter()
            .map(|k| (k.clone(), entries.get(k).cloned()))
            .collect())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}
