//! In-memory object store
//!
//! Backs tests and local development with the same listing semantics the
//! pipeline expects from a real store: keys are ordered, listings resume
//! strictly after `start_after`, and shallow listings only return direct
//! children of the prefix.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

use super::{collect_stream, ListPage, ObjectInfo, ObjectStore, PutOutcome, ReadStream};
use crate::error::{Result, ZipError};

/// Ordered in-memory `ObjectStore` implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
    /// Keys whose `get` is forced to fail (test hook)
    poisoned: RwLock<HashSet<String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an object
    pub async fn insert<S: Into<String>, B: Into<Bytes>>(&self, key: S, data: B) {
        self.objects.write().await.insert(key.into(), data.into());
    }

    /// Force subsequent `get` calls for `key` to fail
    pub async fn poison_get<S: Into<String>>(&self, key: S) {
        self.poisoned.write().await.insert(key.into());
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Check whether the store holds no objects
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Check whether a key exists
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    /// Fetch a stored object's bytes directly (test convenience)
    pub async fn bytes_of(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).cloned()
    }

    /// All keys in order (test convenience)
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    /// True when `key` is a direct child of `prefix` (one path segment,
    /// allowing a trailing slash for folder markers)
    fn is_direct_child(prefix: &str, key: &str) -> bool {
        match key.strip_prefix(prefix) {
            Some(rest) => !rest.trim_end_matches('/').contains('/'),
            None => false,
        }
    }
}

fn fingerprint(data: &[u8]) -> u64 {
    // FNV-1a, enough for a fabricated etag
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: Option<usize>,
        recursive: bool,
    ) -> Result<ListPage> {
        let objects = self.objects.read().await;
        let cap = max_keys.unwrap_or(usize::MAX);

        let mut page = ListPage::default();
        for (key, data) in objects.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(after) = start_after {
                if key.as_str() <= after {
                    continue;
                }
            }
            if !recursive && !Self::is_direct_child(prefix, key) {
                continue;
            }
            if page.objects.len() == cap {
                page.truncated = true;
                break;
            }
            page.objects
                .push(ObjectInfo::new(key.clone(), data.len() as u64));
        }

        Ok(page)
    }

    async fn get(&self, key: &str) -> Result<ReadStream> {
        if self.poisoned.read().await.contains(key) {
            return Err(ZipError::Fetch {
                key: key.to_string(),
                message: "injected fetch failure".to_string(),
            });
        }

        let data = self
            .objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ZipError::Fetch {
                key: key.to_string(),
                message: "no such key".to_string(),
            })?;

        Ok(super::stream_from_bytes(data))
    }

    async fn put(&self, key: &str, data: ReadStream, len: u64) -> Result<PutOutcome> {
        let body = collect_stream(data).await.map_err(|e| ZipError::Upload {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        if body.len() as u64 != len {
            return Err(ZipError::Upload {
                key: key.to_string(),
                message: format!("length mismatch: declared {}, got {}", len, body.len()),
            });
        }

        let etag = format!("\"{:016x}\"", fingerprint(&body));
        self.objects.write().await.insert(key.to_string(), body);

        Ok(PutOutcome {
            etag,
            location: format!("memory://{}", key),
        })
    }
}
