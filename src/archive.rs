//! Archive sink and batch streaming
//!
//! `ArchiveSink` is the single-writer seam between the pipeline and the
//! archive codec; `ZipSink` is the shipped implementation over the `zip`
//! crate. `stream_batch` fans fetches out concurrently and serializes
//! appends onto the sink as fetches complete, so entry order inside an
//! archive follows fetch completion, not batch order.

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::io::{Seek, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::ZipConfig;
use crate::error::{Result, ZipError};
use crate::store::{collect_stream, ObjectInfo, ObjectStore};

/// Append-only archive writer
///
/// Appends must come from a single caller; `finish` flushes the central
/// directory and makes further appends an error.
pub trait ArchiveSink {
    /// Append one entry under the given name
    fn append(&mut self, name: &str, data: &[u8]) -> Result<()>;

    /// Finalize the archive
    fn finish(&mut self) -> Result<()>;
}

/// Zip archive sink over any `Write + Seek` target
pub struct ZipSink<W: Write + Seek> {
    writer: Option<ZipWriter<W>>,
    finished: Option<W>,
}

impl<W: Write + Seek> ZipSink<W> {
    /// Create a sink writing a deflate-compressed zip into `inner`
    pub fn new(inner: W) -> Self {
        Self {
            writer: Some(ZipWriter::new(inner)),
            finished: None,
        }
    }

    /// Recover the underlying target after `finish`
    pub fn into_inner(mut self) -> Option<W> {
        self.finished.take()
    }
}

impl<W: Write + Seek> ArchiveSink for ZipSink<W> {
    fn append(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ZipError::Archive("archive already finalized".to_string()))?;

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(data.len() as u64 >= u32::MAX as u64);
        writer.start_file(name, options)?;
        writer.write_all(data)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            self.finished = Some(writer.finish()?);
        }
        Ok(())
    }
}

/// Compute an archive entry name from an object key
///
/// The leading folder segment is always stripped. With `preserve_paths` the
/// remaining segments are kept; otherwise only the final segment is used.
/// An empty result means the key names the folder itself (or a marker) and
/// the entry should be skipped.
pub fn entry_name(key: &str, preserve_paths: bool) -> String {
    let mut segments = key.split('/');
    segments.next();
    let rest: Vec<&str> = segments.collect();

    let name = if preserve_paths {
        rest.join("/")
    } else {
        rest.last().copied().unwrap_or("").to_string()
    };

    if name.ends_with('/') {
        String::new()
    } else {
        name
    }
}

/// Fetch every object of `batch` and append it to `sink`
///
/// Fetches run with bounded concurrency; appends happen in completion
/// order. Any single fetch failure abandons the whole fragment. Returns the
/// archived entries in append order; the sink is finalized on success.
pub(crate) async fn stream_batch<S, K>(
    store: &Arc<S>,
    batch: &[ObjectInfo],
    config: &ZipConfig,
    sink: &mut K,
    cancel: &CancellationToken,
) -> Result<Vec<ObjectInfo>>
where
    S: ObjectStore + 'static,
    K: ArchiveSink + Send + ?Sized,
{
    let fetches = batch.iter().cloned().map(|object| {
        let store = Arc::clone(store);
        async move {
            let stream = store.get(&object.key).await?;
            let data = collect_stream(stream).await.map_err(|e| ZipError::Fetch {
                key: object.key.clone(),
                message: e.to_string(),
            })?;
            Ok::<(ObjectInfo, Bytes), ZipError>((object, data))
        }
    });
    let mut completed = stream::iter(fetches).buffer_unordered(config.max_concurrent_fetches);

    let mut entries = Vec::with_capacity(batch.len());
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ZipError::Cancelled { operation: "fetch" }),
            next = completed.next() => next,
        };
        let Some(fetched) = next else { break };
        let (object, data) = fetched?;

        let name = entry_name(&object.key, config.preserve_folder_paths);
        if name.is_empty() {
            tracing::debug!(key = %object.key, "skipping entry with empty archive name");
            continue;
        }

        tracing::debug!(key = %object.key, entry = %name, bytes = data.len(), "zipping");
        sink.append(&name, &data)?;
        entries.push(object);
    }

    if cancel.is_cancelled() {
        return Err(ZipError::Cancelled {
            operation: "archive-finalize",
        });
    }
    sink.finish()?;

    Ok(entries)
}
