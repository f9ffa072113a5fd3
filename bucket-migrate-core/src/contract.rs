//! # contract: narrow interfaces to the external collaborators of a migration
//!
//! The migration pipeline talks to exactly three outside systems, each behind
//! a single async trait defined here:
//!
//! - [`SourceStore`]: paged listing plus a byte stream per object.
//! - [`DestinationStore`] / [`ObjectSink`]: a single-shot write stream per
//!   path, plus the optional make-public capability.
//! - [`CacheBackend`]: the key/value service backing the fingerprint store.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall` so tests can generate deterministic
//!   mocks; the mocks are exported under the `test-export-mocks` feature.
//!
//! ## Adding New Backends
//! - Implement the trait for your SDK client in the CLI crate (see its
//!   `storage` and `cache` modules) and keep SDK types out of this crate.
//! - Convert upstream errors into [`StorageError`] / [`CacheError`], boxing the
//!   SDK error as the source.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Boxed error used as the source of adapter failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Byte stream of a single source object. Chunks arrive in object order.
pub type ObjectStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// One object as reported by the source listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    /// Path of the object within its bucket.
    pub key: String,
    /// Size in bytes. Zero-byte objects are directory markers.
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// One page of a listing call.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectDescriptor>,
    /// Opaque cursor for the next page; `None` on the last page.
    pub next_continuation_token: Option<String>,
}

/// Name and base URL of the destination bucket, echoed in every summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationInfo {
    pub name: String,
    pub url: String,
}

/// Errors raised by object-store adapters.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The object disappeared (e.g. deleted between listing and copy).
    #[error("object {key} not found in bucket {bucket}")]
    NotFound { bucket: String, key: String },

    /// A request to the store failed.
    #[error("{operation} failed for {target}: {source}")]
    Request {
        operation: &'static str,
        target: String,
        #[source]
        source: BoxError,
    },

    /// A byte stream broke mid-transfer.
    #[error("stream error: {0}")]
    Stream(#[source] BoxError),
}

/// Errors raised by cache backends and by the transfer record codec.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[source] BoxError),

    #[error("cache connection is closed")]
    Closed,

    #[error("failed to encode transfer record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode transfer record at {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Read side of a migration: a bucket that can be listed and streamed from.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Fetch one page of objects under `prefix`, continuing from
    /// `continuation_token` when given.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage, StorageError>;

    /// Open a read stream over the object's bytes.
    async fn open_read(&self, bucket: &str, key: &str) -> Result<ObjectStream, StorageError>;
}

/// Write side of a migration: the destination bucket.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DestinationStore: Send + Sync {
    fn info(&self) -> DestinationInfo;

    /// Open a single-shot (non-resumable) write stream at `path`.
    /// `size` is the expected total length reported by the listing.
    async fn open_write(&self, path: &str, size: u64) -> Result<Box<dyn ObjectSink>, StorageError>;

    /// Grant public read on `path` and return its public URL.
    async fn make_public(&self, path: &str) -> Result<String, StorageError>;
}

/// A byte sink for one destination object.
///
/// `finish` resolves once the destination confirms the object is stored; an
/// error from either method means the object must be treated as not written.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectSink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError>;

    async fn finish(&mut self) -> Result<(), StorageError>;
}

/// Key/value service backing the fingerprint store.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key`, replacing any previous value, expiring after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), CacheError>;

    /// All live keys starting with `prefix`, in no particular order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Release the connection. Further calls fail with [`CacheError::Closed`].
    async fn close(&self) -> Result<(), CacheError>;
}
