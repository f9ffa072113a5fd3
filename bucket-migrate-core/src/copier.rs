//! Streaming copy of one object from source to destination.
//!
//! Bytes are pulled chunk by chunk from the source stream and pushed into the
//! destination sink; at most one chunk is held here at a time, and a slow sink
//! slows the reader down. The write is single-shot: there is no resume and no
//! internal retry.

use std::time::Duration;

use futures::TryStreamExt;
use tracing::{debug, info, warn};

use crate::contract::{DestinationStore, ObjectDescriptor, SourceStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("cannot open source object {key}: {source}")]
    OpenSource {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("cannot open destination {path}: {source}")]
    OpenDestination {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("reading source object {key} failed: {source}")]
    Read {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("writing destination {path} failed: {source}")]
    Write {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("source object {key} changed since listing: listed {listed} bytes, read {read}")]
    SizeChanged { key: String, listed: u64, read: u64 },

    #[error("destination {path} did not confirm completion within {timeout:?}")]
    Incomplete { path: String, timeout: Duration },
}

/// Copy `object` from `bucket` to the same relative path at the destination.
/// Returns the number of bytes written.
pub async fn copy_object<S, D>(
    source: &S,
    destination: &D,
    bucket: &str,
    object: &ObjectDescriptor,
    completion_timeout: Duration,
) -> Result<u64, CopyError>
where
    S: SourceStore + ?Sized,
    D: DestinationStore + ?Sized,
{
    let key = object.key.as_str();
    let mut reader = source
        .open_read(bucket, key)
        .await
        .map_err(|source| CopyError::OpenSource {
            key: key.to_string(),
            source,
        })?;
    let mut sink = destination
        .open_write(key, object.size)
        .await
        .map_err(|source| CopyError::OpenDestination {
            path: key.to_string(),
            source,
        })?;

    let mut written: u64 = 0;
    while let Some(chunk) = reader.try_next().await.map_err(|source| CopyError::Read {
        key: key.to_string(),
        source,
    })? {
        let len = chunk.len() as u64;
        sink.write(chunk).await.map_err(|source| CopyError::Write {
            path: key.to_string(),
            source,
        })?;
        written += len;
    }
    // The destination is told the listed size up front; a different byte
    // count must not be committed.
    if written != object.size {
        warn!(
            key,
            listed = object.size,
            written,
            "[COPY] Object size changed since listing, abandoning write"
        );
        return Err(CopyError::SizeChanged {
            key: key.to_string(),
            listed: object.size,
            read: written,
        });
    }
    debug!(key, written, "[COPY] Source stream drained, awaiting destination");

    match tokio::time::timeout(completion_timeout, sink.finish()).await {
        Ok(Ok(())) => {}
        Ok(Err(source)) => {
            return Err(CopyError::Write {
                path: key.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(CopyError::Incomplete {
                path: key.to_string(),
                timeout: completion_timeout,
            })
        }
    }

    info!(key, bytes = written, "[COPY] Object copied");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockDestinationStore, MockObjectSink, MockSourceStore, StorageError};
    use bytes::Bytes;
    use chrono::Utc;
    use futures::stream::{self, StreamExt};
    use std::sync::{Arc, Mutex};

    fn object(key: &str, size: u64) -> ObjectDescriptor {
        ObjectDescriptor {
            key: key.to_string(),
            size,
            last_modified: Utc::now(),
        }
    }

    fn source_with(chunks: Vec<Result<&'static str, &'static str>>) -> MockSourceStore {
        let mut source = MockSourceStore::new();
        source.expect_open_read().return_once(move |_, _| {
            let items = chunks.into_iter().map(|c| match c {
                Ok(s) => Ok(Bytes::from_static(s.as_bytes())),
                Err(e) => Err(StorageError::Stream(e.into())),
            });
            Ok(stream::iter(items).boxed())
        });
        source
    }

    fn recording_destination(received: Arc<Mutex<Vec<u8>>>) -> MockDestinationStore {
        let mut destination = MockDestinationStore::new();
        destination.expect_open_write().return_once(move |_, _| {
            let mut sink = MockObjectSink::new();
            sink.expect_write().returning(move |chunk| {
                received.lock().unwrap().extend_from_slice(&chunk);
                Ok(())
            });
            sink.expect_finish().times(1).returning(|| Ok(()));
            Ok(Box::new(sink))
        });
        destination
    }

    #[tokio::test]
    async fn pipes_all_chunks_in_order() {
        let source = source_with(vec![Ok("hello "), Ok("world")]);
        let received = Arc::new(Mutex::new(Vec::new()));
        let destination = recording_destination(received.clone());

        let written = copy_object(
            &source,
            &destination,
            "src",
            &object("a.txt", 11),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(written, 11);
        assert_eq!(&*received.lock().unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn vanished_source_is_a_copy_failure() {
        let mut source = MockSourceStore::new();
        source.expect_open_read().returning(|bucket, key| {
            Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        });
        let mut destination = MockDestinationStore::new();
        destination.expect_open_write().never();

        let err = copy_object(
            &source,
            &destination,
            "src",
            &object("gone.txt", 3),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CopyError::OpenSource { .. }));
        assert!(err.to_string().contains("gone.txt"));
    }

    #[tokio::test]
    async fn destination_write_error_surfaces() {
        let source = source_with(vec![Ok("abc")]);
        let mut destination = MockDestinationStore::new();
        destination.expect_open_write().return_once(|_, _| {
            let mut sink = MockObjectSink::new();
            sink.expect_write().returning(|_| {
                Err(StorageError::Request {
                    operation: "PutObject",
                    target: "dst/a.txt".into(),
                    source: "quota exceeded".into(),
                })
            });
            sink.expect_finish().never();
            Ok(Box::new(sink))
        });

        let err = copy_object(
            &source,
            &destination,
            "src",
            &object("a.txt", 3),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CopyError::Write { .. }));
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn broken_source_stream_is_a_read_failure() {
        let source = source_with(vec![Ok("ab"), Err("connection reset")]);
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut destination = MockDestinationStore::new();
        let sink_received = received.clone();
        destination.expect_open_write().return_once(move |_, _| {
            let mut sink = MockObjectSink::new();
            sink.expect_write().returning(move |chunk| {
                sink_received.lock().unwrap().extend_from_slice(&chunk);
                Ok(())
            });
            sink.expect_finish().never();
            Ok(Box::new(sink))
        });

        let err = copy_object(
            &source,
            &destination,
            "src",
            &object("a.txt", 4),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CopyError::Read { .. }));
        assert_eq!(&*received.lock().unwrap(), b"ab");
    }

    #[tokio::test]
    async fn object_resized_after_listing_is_not_committed() {
        let source = source_with(vec![Ok("hello "), Ok("world!")]);
        let mut destination = MockDestinationStore::new();
        destination.expect_open_write().return_once(|_, _| {
            let mut sink = MockObjectSink::new();
            sink.expect_write().returning(|_| Ok(()));
            sink.expect_finish().never();
            Ok(Box::new(sink))
        });

        let err = copy_object(
            &source,
            &destination,
            "src",
            &object("a.txt", 11),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            CopyError::SizeChanged {
                listed: 11,
                read: 12,
                ..
            }
        ));
    }

    struct StalledSink;

    #[async_trait::async_trait]
    impl crate::contract::ObjectSink for StalledSink {
        async fn write(&mut self, _chunk: Bytes) -> Result<(), StorageError> {
            Ok(())
        }

        async fn finish(&mut self) -> Result<(), StorageError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn destination_that_never_completes_times_out() {
        let source = source_with(vec![Ok("abc")]);
        let mut destination = MockDestinationStore::new();
        destination
            .expect_open_write()
            .return_once(|_, _| Ok(Box::new(StalledSink)));

        let err = copy_object(
            &source,
            &destination,
            "src",
            &object("a.txt", 3),
            Duration::from_secs(30),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CopyError::Incomplete { .. }));
    }
}
