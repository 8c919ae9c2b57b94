//! persistent cache backend, one json file per entry.
//!
//! files are named by the sha-256 of the cache key so arbitrary keys map to
//! safe file names. a write lands in a temp file first and is then hard linked
//! into place, which fails if another writer got there first, so the store's
//! write-once rule holds across concurrent writers and restarts.

use crate::cache::{CacheBackend, CacheEntry};
use crate::util::{Result, StasisError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const ENTRY_EXTENSION: &str = "json";

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    status: u16,
    url: String,
    /// (name, base64 value); values may carry non-utf-8 obs-text
    headers: Vec<(String, String)>,
    data: String,
}

impl StoredEntry {
    fn from_entry(key: &str, entry: &CacheEntry) -> Self {
        let headers = entry
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_owned(), STANDARD.encode(value.as_bytes())))
            .collect();
        Self {
            key: key.to_owned(),
            status: entry.status.as_u16(),
            url: entry.url.clone(),
            headers,
            data: STANDARD.encode(&entry.data),
        }
    }

    fn into_entry(self) -> Result<CacheEntry> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| StasisError::Cache(format!("bad stored status: {}", e)))?;
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            let raw = STANDARD
                .decode(value)
                .map_err(|e| StasisError::Cache(format!("bad stored header {}: {}", name, e)))?;
            headers.append(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_bytes(&raw)?,
            );
        }
        let data = STANDARD
            .decode(self.data)
            .map_err(|e| StasisError::Cache(format!("bad stored body: {}", e)))?;
        Ok(CacheEntry {
            status,
            headers,
            url: self.url,
            data: Bytes::from(data),
        })
    }
}

pub struct DiskBackend {
    dir: PathBuf,
    count: AtomicU64,
}

impl DiskBackend {
    /// opens (creating if needed) a cache directory and counts what is already in it
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut existing = 0;
        for item in std::fs::read_dir(&dir)? {
            let path = item?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION) {
                existing += 1;
            }
        }
        info!("opened cache directory {:?} with {} entries", dir, existing);

        Ok(Self {
            dir,
            count: AtomicU64::new(existing),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name = hex::encode(Sha256::digest(key.as_bytes()));
        self.dir.join(format!("{}.{}", name, ENTRY_EXTENSION))
    }

    async fn load(&self, key: &str) -> Result<Option<Arc<CacheEntry>>> {
        let raw = match tokio::fs::read(self.path_for(key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredEntry = serde_json::from_slice(&raw)?;
        if stored.key != key {
            warn!("cache file for {} holds a different key: {}", key, stored.key);
            return Ok(None);
        }
        Ok(Some(Arc::new(stored.into_entry()?)))
    }

    async fn store(&self, key: &str, entry: CacheEntry) -> Result<bool> {
        let target = self.path_for(key);
        if tokio::fs::try_exists(&target).await? {
            return Ok(false);
        }

        let encoded = serde_json::to_vec(&StoredEntry::from_entry(key, &entry))?;
        let scratch = self
            .dir
            .join(format!(".{:016x}.tmp", rand::random::<u64>()));
        tokio::fs::write(&scratch, &encoded).await?;

        let linked = tokio::fs::hard_link(&scratch, &target).await;
        if let Err(e) = tokio::fs::remove_file(&scratch).await {
            debug!("could not remove scratch file {:?}: {}", scratch, e);
        }

        match linked {
            Ok(()) => {
                self.count.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl CacheBackend for DiskBackend {
    fn contains<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move { Ok(tokio::fs::try_exists(self.path_for(key)).await?) }.boxed()
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Arc<CacheEntry>>>> {
        self.load(key).boxed()
    }

    fn insert_if_absent<'a>(
        &'a self,
        key: &'a str,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<bool>> {
        self.store(key, entry).boxed()
    }

    fn len(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
