#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};

use bucket_migrate_core::contract::{
    DestinationInfo, DestinationStore, ListPage, ObjectDescriptor, ObjectSink, ObjectStream,
    SourceStore, StorageError,
};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

#[derive(Clone)]
struct FakeObject {
    body: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// Source bucket held in memory, listed `page_size` objects per page.
#[derive(Clone)]
pub struct FakeSource {
    objects: Arc<Mutex<Vec<(String, FakeObject)>>>,
    unreadable: Arc<Mutex<HashSet<String>>>,
    flaky: Arc<Mutex<HashMap<String, usize>>>,
    page_size: usize,
    pub list_calls: Arc<Mutex<Vec<Option<String>>>>,
    pub reads: Arc<Mutex<Vec<String>>>,
}

impl FakeSource {
    pub fn new(page_size: usize) -> Self {
        Self {
            objects: Arc::default(),
            unreadable: Arc::default(),
            flaky: Arc::default(),
            page_size,
            list_calls: Arc::default(),
            reads: Arc::default(),
        }
    }

    /// Insert or overwrite an object.
    pub fn put(&self, key: &str, body: &[u8], last_modified: DateTime<Utc>) {
        let mut objects = self.objects.lock().unwrap();
        let object = FakeObject {
            body: body.to_vec(),
            last_modified,
        };
        match objects.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = object,
            None => objects.push((key.to_string(), object)),
        }
    }

    pub fn make_unreadable(&self, key: &str) {
        self.unreadable.lock().unwrap().insert(key.to_string());
    }

    /// The next `failures` reads of `key` fail with a stream error.
    pub fn fail_next_reads(&self, key: &str, failures: usize) {
        self.flaky.lock().unwrap().insert(key.to_string(), failures);
    }

    pub fn reads_of(&self, key: &str) -> usize {
        self.reads.lock().unwrap().iter().filter(|k| *k == key).count()
    }
}

#[async_trait]
impl SourceStore for FakeSource {
    async fn list_page(
        &self,
        _bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage, StorageError> {
        self.list_calls
            .lock()
            .unwrap()
            .push(continuation_token.clone());
        let start: usize = continuation_token
            .as_deref()
            .map(|t| t.parse().unwrap())
            .unwrap_or(0);
        let matching: Vec<_> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .cloned()
            .collect();
        let end = (start + self.page_size).min(matching.len());
        let objects = matching[start..end]
            .iter()
            .map(|(key, o)| ObjectDescriptor {
                key: key.clone(),
                size: o.body.len() as u64,
                last_modified: o.last_modified,
            })
            .collect();
        Ok(ListPage {
            objects,
            next_continuation_token: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn open_read(&self, bucket: &str, key: &str) -> Result<ObjectStream, StorageError> {
        self.reads.lock().unwrap().push(key.to_string());
        if self.unreadable.lock().unwrap().contains(key) {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        if let Some(left) = self.flaky.lock().unwrap().get_mut(key) {
            if *left > 0 {
                *left -= 1;
                return Err(StorageError::Stream("connection reset by peer".into()));
            }
        }
        let body = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, o)| o.body.clone())
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        // Two chunks, so the copier has to loop.
        let mid = body.len() / 2;
        let chunks = vec![
            Ok(Bytes::copy_from_slice(&body[..mid])),
            Ok(Bytes::copy_from_slice(&body[mid..])),
        ];
        Ok(stream::iter(chunks).boxed())
    }
}

/// Destination bucket held in memory.
#[derive(Clone, Default)]
pub struct FakeDestination {
    pub written: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    pub opened: Arc<Mutex<Vec<String>>>,
    private_only: Arc<Mutex<HashSet<String>>>,
}

impl FakeDestination {
    /// Granting public read on `path` fails.
    pub fn refuse_public(&self, path: &str) {
        self.private_only.lock().unwrap().insert(path.to_string());
    }

    pub fn writes_of(&self, path: &str) -> usize {
        self.opened.lock().unwrap().iter().filter(|p| *p == path).count()
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.written.lock().unwrap().get(path).cloned()
    }
}

struct FakeSink {
    path: String,
    buffer: Vec<u8>,
    written: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

#[async_trait]
impl ObjectSink for FakeSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), StorageError> {
        self.written
            .lock()
            .unwrap()
            .insert(self.path.clone(), std::mem::take(&mut self.buffer));
        Ok(())
    }
}

#[async_trait]
impl DestinationStore for FakeDestination {
    fn info(&self) -> DestinationInfo {
        DestinationInfo {
            name: "dst".into(),
            url: "https://storage.example.test/dst".into(),
        }
    }

    async fn open_write(&self, path: &str, _size: u64) -> Result<Box<dyn ObjectSink>, StorageError> {
        self.opened.lock().unwrap().push(path.to_string());
        Ok(Box::new(FakeSink {
            path: path.to_string(),
            buffer: Vec::new(),
            written: self.written.clone(),
        }))
    }

    async fn make_public(&self, path: &str) -> Result<String, StorageError> {
        if self.private_only.lock().unwrap().contains(path) {
            return Err(StorageError::Request {
                operation: "PutObjectAcl",
                target: format!("dst/{path}"),
                source: "uniform bucket-level access is enabled".into(),
            });
        }
        Ok(format!("https://storage.example.test/dst/{path}"))
    }
}

use bucket_migrate_core::contract::{CacheBackend, CacheError};
use bucket_migrate_core::store::MemoryCache;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A handle onto one long-lived cache, the way every run reconnects to the
/// same Redis. Closing the handle leaves the data in place.
#[derive(Clone, Default)]
pub struct SharedCache {
    inner: Arc<MemoryCache>,
    pub closes: Arc<AtomicUsize>,
}

impl SharedCache {
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheBackend for SharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.inner.get(key).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.inner.set_with_expiry(key, value, ttl).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        self.inner.scan_prefix(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
