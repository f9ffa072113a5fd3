//! # S3 adapters for the migration contract
//!
//! Both ends of a migration speak the S3 API through `aws-sdk-s3`:
//!
//! - [`S3SourceStore`] reads from an AWS S3 bucket (or any S3-compatible
//!   endpoint) using the standard AWS credential chain.
//! - [`S3DestinationStore`] writes to an S3-compatible destination, by default
//!   the Google Cloud Storage XML interoperability endpoint, using static HMAC
//!   credentials.
//!
//! Writes are streamed: [`S3DestinationStore::open_write`] starts a
//! `PutObject` request whose body is fed from a bounded channel, so a slow
//! destination back-pressures the source reader.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{
    Credentials, Region, RequestChecksumCalculation, ResponseChecksumValidation,
};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Object, ObjectCannedAcl};
use aws_sdk_s3::Client;
use bucket_migrate_core::contract::{
    BoxError, DestinationInfo, DestinationStore, ListPage, ObjectDescriptor, ObjectSink,
    ObjectStream, SourceStore, StorageError,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use http_body::Frame;
use http_body_util::StreamBody;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::load_config::{DestinationCredentials, DestinationSection, SourceSection};

/// Chunks buffered between the copier and the in-flight upload request.
const UPLOAD_CHANNEL_CAPACITY: usize = 8;

fn sdk_error<E: std::error::Error>(e: E) -> BoxError {
    DisplayErrorContext(e).to_string().into()
}

fn request_error<E: std::error::Error>(
    operation: &'static str,
    target: impl Into<String>,
    e: E,
) -> StorageError {
    StorageError::Request {
        operation,
        target: target.into(),
        source: sdk_error(e),
    }
}

/// Converts one listed S3 object; `None` when the entry lacks a key or timestamp.
fn descriptor_from(object: &Object) -> Option<ObjectDescriptor> {
    let key = object.key()?;
    let modified = object.last_modified()?;
    let last_modified = DateTime::<Utc>::from_timestamp(modified.secs(), modified.subsec_nanos())?;
    Some(ObjectDescriptor {
        key: key.to_string(),
        size: object.size().unwrap_or(0).max(0) as u64,
        last_modified,
    })
}

fn public_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Source side: an S3 bucket read with the ambient AWS credentials.
pub struct S3SourceStore {
    client: Client,
}

impl S3SourceStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from the standard AWS environment, honouring the
    /// configured region and optional custom endpoint.
    pub async fn from_config(section: &SourceSection) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(section.region.clone()))
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &section.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        info!(
            region = %section.region,
            custom_endpoint = section.endpoint.is_some(),
            "Initialized source S3 client"
        );
        Self::new(Client::from_conf(builder.build()))
    }
}

#[async_trait]
impl SourceStore for S3SourceStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage, StorageError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| request_error("ListObjectsV2", format!("{bucket}/{prefix}"), e))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                let descriptor = descriptor_from(object);
                if descriptor.is_none() {
                    warn!(key = ?object.key(), "Listed object without key or timestamp, ignoring");
                }
                descriptor
            })
            .collect();

        Ok(ListPage {
            objects,
            next_continuation_token: output.next_continuation_token().map(str::to_string),
        })
    }

    async fn open_read(&self, bucket: &str, key: &str) -> Result<ObjectStream, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    StorageError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    request_error("GetObject", format!("{bucket}/{key}"), e)
                }
            })?;

        let body = stream::try_unfold(output.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Ok(Some((chunk, body))),
                Ok(None) => Ok(None),
                Err(e) => Err(StorageError::Stream(Box::new(e))),
            }
        });
        Ok(body.boxed())
    }
}

/// Destination side: an S3-compatible bucket authenticated with HMAC keys.
pub struct S3DestinationStore {
    client: Client,
    bucket: String,
    base_url: String,
}

impl S3DestinationStore {
    pub fn new(client: Client, bucket: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            base_url: base_url.into(),
        }
    }

    pub fn from_config(section: &DestinationSection, credentials: &DestinationCredentials) -> Self {
        let creds = Credentials::new(
            &credentials.access_key_id,
            &credentials.secret_access_key,
            None,
            None,
            "dest-env",
        );
        // The GCS interop endpoint does not accept aws-chunked trailing checksums.
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&section.endpoint)
            .region(Region::new(section.region.clone()))
            .credentials_provider(creds)
            .force_path_style(true)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();
        info!(
            endpoint = %section.endpoint,
            bucket = %section.bucket,
            "Initialized destination S3 client"
        );
        Self::new(Client::from_conf(config), &section.bucket, section.base_url())
    }
}

#[async_trait]
impl DestinationStore for S3DestinationStore {
    fn info(&self) -> DestinationInfo {
        DestinationInfo {
            name: self.bucket.clone(),
            url: self.base_url.clone(),
        }
    }

    async fn open_write(&self, path: &str, size: u64) -> Result<Box<dyn ObjectSink>, StorageError> {
        let target = format!("{}/{}", self.bucket, path);
        let content_length = i64::try_from(size).map_err(|e| StorageError::Request {
            operation: "PutObject",
            target: target.clone(),
            source: Box::new(e),
        })?;

        let (tx, rx) = mpsc::channel::<Bytes>(UPLOAD_CHANNEL_CAPACITY);
        let frames = ReceiverStream::new(rx).map(|chunk| Ok::<_, std::convert::Infallible>(Frame::data(chunk)));
        let body = ByteStream::from_body_1_x(StreamBody::new(frames));

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_length(content_length)
            .body(body);
        let upload_target = target.clone();
        let upload = tokio::spawn(async move {
            request
                .send()
                .await
                .map(|_| ())
                .map_err(|e| request_error("PutObject", upload_target, e))
        });
        debug!(target = %target, size, "Opened destination upload");

        Ok(Box::new(S3ObjectSink {
            target,
            tx: Some(tx),
            upload: Some(upload),
        }))
    }

    async fn make_public(&self, path: &str) -> Result<String, StorageError> {
        self.client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(path)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|e| request_error("PutObjectAcl", format!("{}/{}", self.bucket, path), e))?;
        Ok(public_url(&self.base_url, path))
    }
}

/// Feeds one in-flight `PutObject` request.
struct S3ObjectSink {
    target: String,
    tx: Option<mpsc::Sender<Bytes>>,
    upload: Option<JoinHandle<Result<(), StorageError>>>,
}

impl S3ObjectSink {
    async fn join_upload(&mut self) -> Result<(), StorageError> {
        let Some(upload) = self.upload.take() else {
            return Err(StorageError::Stream(
                format!("upload of {} already finished", self.target).into(),
            ));
        };
        match upload.await {
            Ok(result) => result,
            Err(e) => Err(StorageError::Stream(Box::new(e))),
        }
    }
}

#[async_trait]
impl ObjectSink for S3ObjectSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        let Some(tx) = &self.tx else {
            return Err(StorageError::Stream(
                format!("upload of {} is closed", self.target).into(),
            ));
        };
        if tx.send(chunk).await.is_ok() {
            return Ok(());
        }
        // The request stopped consuming the body; report why.
        self.tx = None;
        match self.join_upload().await {
            Err(e) => Err(e),
            Ok(()) => Err(StorageError::Stream(
                format!("upload of {} ended before all bytes were sent", self.target).into(),
            )),
        }
    }

    async fn finish(&mut self) -> Result<(), StorageError> {
        self.tx = None;
        self.join_upload().await
    }
}

impl Drop for S3ObjectSink {
    fn drop(&mut self) {
        if let Some(upload) = self.upload.take() {
            upload.abort();
        }
    }
}
