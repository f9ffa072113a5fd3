//! Object fingerprints and the transfer records stored under them.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::contract::ObjectDescriptor;

/// Deterministic digest of (source bucket, object key, last-modified time).
///
/// Overwriting an object at the source changes its last-modified time and
/// therefore its fingerprint, which makes it eligible for transfer again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(bucket: &str, key: &str, last_modified: &DateTime<Utc>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bucket.as_bytes());
        hasher.update(b":");
        hasher.update(key.as_bytes());
        hasher.update(b":");
        hasher.update(
            last_modified
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .as_bytes(),
        );
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn of(bucket: &str, object: &ObjectDescriptor) -> Self {
        Self::compute(bucket, &object.key, &object.last_modified)
    }

    /// Wrap an already computed digest, e.g. one parsed back out of a cache key.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata persisted for every successfully copied object.
///
/// Field names are part of the stored schema; do not rename them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub fingerprint: Fingerprint,
    pub file_name: String,
    pub source_path: String,
    pub destination_path: String,
    pub public_url: String,
    pub uploaded_at: DateTime<Utc>,
    pub source_bucket: String,
    pub size: u64,
    pub destination_bucket: String,
}

/// Last path segment of an object key (`"a/b/c.txt"` -> `"c.txt"`).
pub fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
