//! # store: fingerprint → transfer record cache with expiry
//!
//! [`FingerprintStore`] is the idempotency ledger of a migration. It keeps one
//! JSON-encoded [`TransferRecord`] per fingerprint under a key namespace in a
//! [`CacheBackend`], each entry expiring after its TTL.
//!
//! Lookups fail softly: when the backend is unreachable, [`FingerprintStore::exists`]
//! answers `false` so the object is copied again rather than missed. Writes and
//! audits report their errors to the caller.
//!
//! [`MemoryCache`] is an in-process backend keyed on the tokio clock, used by
//! tests and by single-run local trials.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::contract::{CacheBackend, CacheError};
use crate::fingerprint::{Fingerprint, TransferRecord};

/// Key namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "s3_gcs_transfer:";

pub struct FingerprintStore<C> {
    backend: C,
    namespace: String,
}

impl<C: CacheBackend> FingerprintStore<C> {
    pub fn new(backend: C, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key_for(&self, fingerprint: &Fingerprint) -> String {
        format!("{}{}", self.namespace, fingerprint)
    }

    /// Whether a live record exists for `fingerprint`. Backend errors count as "not found".
    pub async fn exists(&self, fingerprint: &Fingerprint) -> bool {
        match self.backend.get(&self.key_for(fingerprint)).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!(%fingerprint, error = %e, "[STORE] Lookup failed, treating as not transferred");
                false
            }
        }
    }

    /// Store `record` under `fingerprint`, replacing any existing entry.
    /// The entry expires after `ttl`; the store has no TTL of its own.
    pub async fn put(
        &self,
        fingerprint: &Fingerprint,
        record: &TransferRecord,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_string(record).map_err(CacheError::Encode)?;
        self.backend
            .set_with_expiry(&self.key_for(fingerprint), &value, ttl)
            .await?;
        debug!(%fingerprint, ttl_secs = ttl.as_secs(), "[STORE] Marked as transferred");
        Ok(())
    }

    /// Every live record in the namespace. Entries that expire between the
    /// scan and the read are left out.
    pub async fn list_all(&self) -> Result<Vec<TransferRecord>, CacheError> {
        let keys = self.backend.scan_prefix(&self.namespace).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.backend.get(&key).await? else {
                continue;
            };
            let mut record: TransferRecord =
                serde_json::from_str(&raw).map_err(|source| CacheError::Decode {
                    key: key.clone(),
                    source,
                })?;
            // The key is authoritative for the fingerprint.
            if let Some(hex) = key.strip_prefix(&self.namespace) {
                record.fingerprint = Fingerprint::from_hex(hex);
            }
            records.push(record);
        }
        info!(count = records.len(), namespace = %self.namespace, "[STORE] Listed transfer records");
        Ok(records)
    }

    /// Drop the record for `fingerprint`, making the object eligible for transfer again.
    pub async fn forget(&self, fingerprint: &Fingerprint) -> Result<(), CacheError> {
        self.backend.delete(&self.key_for(fingerprint)).await
    }

    pub async fn close(&self) -> Result<(), CacheError> {
        self.backend.close().await
    }
}

/// In-process [`CacheBackend`]. Entries expire on the tokio clock.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    closed: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>> {
        // A poisoned map is still structurally valid.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => return Ok(Some(value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        entries.remove(key);
        Ok(None)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.lock()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.lock().remove(key);
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
