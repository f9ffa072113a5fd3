//! High-level pipeline: orchestrates listing → fingerprint check → copy → mark-as-done.
//!
//! This module provides the top-level orchestration of a one-way migration
//! from a source bucket prefix into the destination bucket. For every listed
//! object it:
//!   - Computes the object's [`Fingerprint`]
//!   - Skips it when the [`FingerprintStore`] already holds a live record (unless forced)
//!   - Otherwise streams it to the destination via [`copy_object`]
//!   - Records a [`TransferRecord`] with the store's TTL on success
//!
//! # Major Types
//! - [`Migrator`]: owns the injected store handles for exactly one run
//! - [`MigrateRequest`]: what to migrate (bucket, prefix, force flag)
//! - [`TransferSummary`]: transferred / skipped / failed entries of the run
//!
//! # Error Handling
//! - A failed listing page aborts the run with [`MigrateError`]; no partial summary is returned.
//! - A failed copy is recorded in [`TransferSummary::failed`] and the run moves on.
//! - A failed mark-as-done keeps the object in `transferred` and adds it to
//!   [`TransferSummary::unrecorded`]; a later run will copy it again.
//! - A failed fingerprint lookup counts as "not transferred".
//!
//! # Concurrency
//! Objects are processed `concurrency` at a time (sequentially by default).
//! Outcomes are reported in listing order either way, and a fingerprint seen
//! twice in one run is only processed once.

use std::collections::HashSet;
use std::future;
use std::time::Duration;

use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{MigrateOptions, PRIVATE_URL_PLACEHOLDER};
use crate::contract::{CacheBackend, DestinationInfo, DestinationStore, ObjectDescriptor, SourceStore};
use crate::copier::{copy_object, CopyError};
use crate::fingerprint::{file_name_of, Fingerprint, TransferRecord};
use crate::listing::{list_objects, ListError};
use crate::store::FingerprintStore;

/// What one run migrates.
#[derive(Debug, Clone)]
pub struct MigrateRequest {
    pub source_bucket: String,
    pub prefix: String,
    /// Copy even objects whose fingerprint is already recorded.
    pub force_update: bool,
}

/// Fatal errors of a run.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("invalid migrate request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Listing(#[from] ListError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEntry {
    pub file_name: String,
    pub source_path: String,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEntry {
    pub file_name: String,
    pub source_path: String,
    pub fingerprint: Fingerprint,
    pub error: String,
}

/// A copied object whose transfer record could not be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnrecordedEntry {
    pub source_path: String,
    pub fingerprint: Fingerprint,
    pub error: String,
}

/// Result of one run, built incrementally in listing order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub transferred: Vec<TransferRecord>,
    pub skipped: Vec<SkippedEntry>,
    pub failed: Vec<FailedEntry>,
    pub unrecorded: Vec<UnrecordedEntry>,
    pub destination_info: DestinationInfo,
    /// Cancellation was requested while the run was in progress.
    pub cancelled: bool,
}

impl TransferSummary {
    fn new(destination_info: DestinationInfo) -> Self {
        Self {
            transferred: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            unrecorded: Vec::new(),
            destination_info,
            cancelled: false,
        }
    }

    /// Objects that reached a terminal state. Zero-byte objects never count.
    pub fn total_processed(&self) -> usize {
        self.transferred.len() + self.skipped.len() + self.failed.len()
    }

    fn record(&mut self, outcome: ObjectOutcome) {
        match outcome {
            ObjectOutcome::Skipped(entry) => self.skipped.push(entry),
            ObjectOutcome::Failed(entry) => self.failed.push(entry),
            ObjectOutcome::Transferred { record, mark_error } => {
                if let Some(error) = mark_error {
                    self.unrecorded.push(UnrecordedEntry {
                        source_path: record.source_path.clone(),
                        fingerprint: record.fingerprint.clone(),
                        error,
                    });
                }
                self.transferred.push(record);
            }
        }
    }
}

/// Terminal state of one object.
enum ObjectOutcome {
    Skipped(SkippedEntry),
    Transferred {
        record: TransferRecord,
        mark_error: Option<String>,
    },
    Failed(FailedEntry),
}

/// Failure of the copy-and-publish step for one object.
#[derive(Debug, thiserror::Error)]
enum TransferError {
    #[error(transparent)]
    Copy(#[from] CopyError),

    #[error("making {path} public failed: {source}")]
    Publish {
        path: String,
        #[source]
        source: crate::contract::StorageError,
    },
}

/// Longest wait between two copy attempts.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(15 * 60);

/// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at [`MAX_RETRY_DELAY`].
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.checked_mul(factor)
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}

/// Drives one migration over explicitly injected store handles.
///
/// The handles live exactly as long as the migrator: [`Migrator::run`]
/// consumes it and closes the fingerprint store on every exit path.
pub struct Migrator<S, D, C> {
    source: S,
    destination: D,
    fingerprints: FingerprintStore<C>,
    options: MigrateOptions,
}

impl<S, D, C> Migrator<S, D, C>
where
    S: SourceStore,
    D: DestinationStore,
    C: CacheBackend,
{
    pub fn new(
        source: S,
        destination: D,
        fingerprints: FingerprintStore<C>,
        options: MigrateOptions,
    ) -> Self {
        Self {
            source,
            destination,
            fingerprints,
            options,
        }
    }

    /// Run the migration, then release the fingerprint store connection.
    ///
    /// `cancel` is checked between objects: once triggered no new object is
    /// started, objects already in flight finish, and the summary is flagged
    /// as cancelled.
    pub async fn run(
        self,
        request: &MigrateRequest,
        cancel: CancellationToken,
    ) -> Result<TransferSummary, MigrateError> {
        let result = self.execute(request, &cancel).await;
        if let Err(e) = &result {
            error!(error = %e, "[MIGRATE][ERROR] Migration aborted");
        }
        self.cleanup().await;
        result
    }

    async fn cleanup(self) {
        match self.fingerprints.close().await {
            Ok(()) => debug!("[MIGRATE] Fingerprint store closed"),
            Err(e) => warn!(error = %e, "[MIGRATE] Closing fingerprint store failed"),
        }
    }

    async fn execute(
        &self,
        request: &MigrateRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary, MigrateError> {
        if request.source_bucket.is_empty() {
            return Err(MigrateError::InvalidRequest(
                "source bucket must not be empty".into(),
            ));
        }

        let destination = self.destination.info();
        info!(
            source_bucket = %request.source_bucket,
            prefix = %request.prefix,
            force_update = request.force_update,
            destination = %destination.name,
            "[MIGRATE] Starting migration"
        );
        let mut summary = TransferSummary::new(destination);

        let bucket = request.source_bucket.as_str();
        let mut seen = HashSet::new();
        let outcomes = list_objects(&self.source, bucket, &request.prefix)
            .take_until(cancel.cancelled())
            .map_ok(|object| {
                let fingerprint = Fingerprint::of(bucket, &object);
                (object, fingerprint)
            })
            .try_filter(move |(object, fingerprint)| {
                let first = seen.insert(fingerprint.clone());
                if !first {
                    warn!(key = %object.key, "[MIGRATE] Object listed twice, ignoring repeat");
                }
                future::ready(first)
            })
            .map_ok(|(object, fingerprint)| async move {
                Ok::<_, ListError>(self.process(request, object, fingerprint).await)
            })
            .try_buffered(self.options.concurrency.max(1));
        let mut outcomes = std::pin::pin!(outcomes);

        while let Some(outcome) = outcomes.try_next().await? {
            summary.record(outcome);
        }

        summary.cancelled = cancel.is_cancelled();
        if summary.cancelled {
            warn!("[MIGRATE] Migration cancelled, remaining objects were not started");
        }
        info!(
            total = summary.total_processed(),
            transferred = summary.transferred.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            unrecorded = summary.unrecorded.len(),
            "[MIGRATE] Migration complete"
        );
        Ok(summary)
    }

    async fn process(
        &self,
        request: &MigrateRequest,
        object: ObjectDescriptor,
        fingerprint: Fingerprint,
    ) -> ObjectOutcome {
        let file_name = file_name_of(&object.key).to_string();

        if !request.force_update && self.fingerprints.exists(&fingerprint).await {
            info!(key = %object.key, "[MIGRATE] Skipping already transferred object");
            return ObjectOutcome::Skipped(SkippedEntry {
                file_name,
                source_path: object.key,
                fingerprint,
            });
        }

        info!(key = %object.key, size = object.size, "[MIGRATE] Transferring");
        let public_url = match self.transfer(&request.source_bucket, &object).await {
            Ok(url) => url,
            Err(e) => {
                error!(key = %object.key, error = %e, "[MIGRATE][ERROR] Transfer failed");
                return ObjectOutcome::Failed(FailedEntry {
                    file_name,
                    source_path: object.key,
                    fingerprint,
                    error: e.to_string(),
                });
            }
        };

        let destination = self.destination.info();
        let record = TransferRecord {
            fingerprint: fingerprint.clone(),
            file_name,
            destination_path: object.key.clone(),
            source_path: object.key,
            public_url,
            uploaded_at: Utc::now(),
            source_bucket: request.source_bucket.clone(),
            size: object.size,
            destination_bucket: destination.name,
        };

        let mark_error = match self
            .fingerprints
            .put(&fingerprint, &record, self.options.ttl)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    key = %record.source_path,
                    error = %e,
                    "[MIGRATE] Copied but could not record transfer; a later run will copy it again"
                );
                Some(e.to_string())
            }
        };
        ObjectOutcome::Transferred { record, mark_error }
    }

    /// Copy with retries, then publish if configured. Returns the public URL.
    async fn transfer(
        &self,
        bucket: &str,
        object: &ObjectDescriptor,
    ) -> Result<String, TransferError> {
        let attempts = self.options.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match copy_object(
                &self.source,
                &self.destination,
                bucket,
                object,
                self.options.completion_timeout,
            )
            .await
            {
                Ok(_) => break,
                Err(e) if attempt < attempts => {
                    let delay = retry_delay(self.options.retry_base_delay, attempt);
                    warn!(
                        key = %object.key,
                        error = %e,
                        "[MIGRATE] Copy attempt {attempt}/{attempts} failed, retrying in {delay:.1?}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !self.options.make_public {
            return Ok(PRIVATE_URL_PLACEHOLDER.to_string());
        }
        self.destination
            .make_public(&object.key)
            .await
            .map_err(|source| TransferError::Publish {
                path: object.key.clone(),
                source,
            })
    }
}
