//! Object-store abstraction consumed by the folder-zip pipeline
//!
//! The pipeline never talks to a concrete store directly; it is written
//! against the `ObjectStore` trait and receives an implementation by
//! injection. The crate ships `MemoryStore`, an ordered in-memory
//! implementation used for tests and local development.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::pin::Pin;

use crate::error::Result;

/// Async byte stream for object payloads
pub type ReadStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Descriptor for one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object key
    pub key: String,

    /// Object size in bytes
    pub size: u64,
}

impl ObjectInfo {
    /// Create a new descriptor
    pub fn new<S: Into<String>>(key: S, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }

    /// Check if this key is a folder placeholder rather than real content
    pub fn is_placeholder(&self) -> bool {
        self.key.ends_with('/')
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Object descriptors in listing (key) order
    pub objects: Vec<ObjectInfo>,

    /// More objects remain beyond this page
    pub truncated: bool,
}

/// Result of persisting an object
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// Entity tag assigned by the store
    pub etag: String,

    /// Location (URL or store-specific address) of the stored object
    pub location: String,
}

/// Unified interface to a remote object store
///
/// Implementations must be `Send + Sync`; every method is a suspension
/// point and should honor the store's own timeouts. The pipeline performs
/// no retries of its own, so transient-failure handling belongs to the
/// implementation.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects under a prefix in key order
    ///
    /// `start_after` resumes the listing strictly after the given key.
    /// When `recursive` is false only objects directly under the prefix
    /// are returned (keys with further `/` segments are skipped).
    async fn list(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: Option<usize>,
        recursive: bool,
    ) -> Result<ListPage>;

    /// Fetch one object's bytes as a stream
    async fn get(&self, key: &str) -> Result<ReadStream>;

    /// Persist an object from a stream of known length
    async fn put(&self, key: &str, data: ReadStream, len: u64) -> Result<PutOutcome>;
}

/// Drain a `ReadStream` into a single buffer
pub async fn collect_stream(mut stream: ReadStream) -> std::io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Wrap a single buffer as a `ReadStream`
pub fn stream_from_bytes(data: Bytes) -> ReadStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}
