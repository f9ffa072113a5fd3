//! Lazy, page-by-page enumeration of a source prefix.
//!
//! The listing is produced as a stream so the orchestrator can start copying
//! before the last page has been fetched. Zero-byte objects (directory
//! markers) never leave this module.

use futures::stream::{self, Stream, TryStreamExt};
use tracing::{debug, info};

use crate::contract::{ObjectDescriptor, SourceStore, StorageError};

/// A page request failed; the listing cannot continue.
#[derive(Debug, thiserror::Error)]
#[error("listing {bucket}/{prefix} failed at page {page}: {source}")]
pub struct ListError {
    pub bucket: String,
    pub prefix: String,
    /// 1-based page number that failed.
    pub page: usize,
    #[source]
    pub source: StorageError,
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Stream every non-empty object under `prefix`, in listing order.
///
/// Each page request carries the continuation token of the previous page;
/// the stream ends after a page without one.
pub fn list_objects<'a, S>(
    source: &'a S,
    bucket: &'a str,
    prefix: &'a str,
) -> impl Stream<Item = Result<ObjectDescriptor, ListError>> + Send + 'a
where
    S: SourceStore + ?Sized,
{
    stream::try_unfold((Cursor::Start, 0usize), move |(cursor, fetched)| async move {
        let token = match cursor {
            Cursor::Start => None,
            Cursor::Next(token) => Some(token),
            Cursor::Done => return Ok(None),
        };
        let page_no = fetched + 1;
        let page = match source.list_page(bucket, prefix, token).await {
            Ok(page) => page,
            Err(source) => {
                return Err(ListError {
                    bucket: bucket.to_string(),
                    prefix: prefix.to_string(),
                    page: page_no,
                    source,
                })
            }
        };

        let next = match page.next_continuation_token {
            Some(token) if !token.is_empty() => Cursor::Next(token),
            _ => Cursor::Done,
        };
        debug!(
            bucket,
            prefix,
            page = page_no,
            objects = page.objects.len(),
            more = matches!(next, Cursor::Next(_)),
            "[LIST] Retrieved page"
        );

        let objects = stream::iter(page.objects.into_iter().map(Ok::<_, ListError>));
        Ok(Some((objects, (next, page_no))))
    })
    .try_flatten()
    .try_filter(|object| {
        let keep = object.size > 0;
        if !keep {
            debug!(key = %object.key, "[LIST] Ignoring zero-byte object");
        }
        futures::future::ready(keep)
    })
}

/// Accumulate the whole listing in memory. O(n) in the number of objects.
pub async fn collect_objects<S>(
    source: &S,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<ObjectDescriptor>, ListError>
where
    S: SourceStore + ?Sized,
{
    let objects: Vec<ObjectDescriptor> = list_objects(source, bucket, prefix).try_collect().await?;
    info!(bucket, prefix, total = objects.len(), "[LIST] Total objects found");
    Ok(objects)
}
