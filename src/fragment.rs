//! Fragment orchestration
//!
//! `FolderZipper` drives the whole pipeline: page through the folder
//! listing, select a bounded batch, write it into a local zip fragment,
//! and either hand the fragment back to the caller or ship it to the
//! destination store while the next fragment is already being built.
//!
//! Fragment indices are assigned only to fragments that actually hold
//! entries, so they are contiguous from zero even when a listing page
//! yields nothing selectable.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use crate::archive::{stream_batch, ArchiveSink, ZipSink};
use crate::batch::{select_batch, BatchOutcome, BatchPolicy};
use crate::config::ZipConfig;
use crate::error::{Result, ZipError};
use crate::store::ObjectStore;
use crate::upload::{FragmentHook, UploadTracker, ZipReport};

/// One locally produced zip fragment
#[derive(Debug, Clone)]
pub struct FragmentManifest {
    /// Fragment index (contiguous from 0)
    pub index: u32,

    /// Objects archived into this fragment, in append order
    pub entries: Vec<crate::store::ObjectInfo>,

    /// Path of the fragment file on local disk
    pub local_path: PathBuf,
}

/// Result of streaming one fragment into a caller-provided sink
///
/// `outcome` carries the selection and the resume cursor; `entries` lists
/// what was actually archived, in append order. Append order follows fetch
/// completion, so it can differ from `outcome.selected`, and keys that
/// resolve to an empty entry name are skipped and never appear in it.
#[derive(Debug, Clone)]
pub struct StreamedFragment {
    /// Selection outcome; `last_scanned` is the cursor for the next call
    pub outcome: BatchOutcome,

    /// Archived entries in append order
    pub entries: Vec<crate::store::ObjectInfo>,
}

/// Folder-to-zip-fragments pipeline over any `ObjectStore`
pub struct FolderZipper<S> {
    store: Arc<S>,
    cancel: CancellationToken,
}

impl<S: ObjectStore + 'static> FolderZipper<S> {
    /// Create a pipeline owning its store
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    /// Create a pipeline over a shared store handle
    pub fn from_arc(store: Arc<S>) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a cancellation token
    ///
    /// Cancelling the token makes every pending suspension point return
    /// `ZipError::Cancelled`.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Shared handle to the underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// List and select a single bounded batch
    ///
    /// Resumes after `config.start_key` when set. The returned outcome
    /// carries the cursor (`last_scanned`) for the next call.
    pub async fn list_batch(&self, config: &ZipConfig) -> Result<BatchOutcome> {
        config.validate()?;
        self.next_batch(config, config.start_key.as_deref()).await
    }

    /// Stream one fragment's worth of objects into a caller-provided sink
    ///
    /// The sink is finalized on success, even when nothing was selected
    /// (the result is then a valid empty archive). The returned value
    /// carries both the archived entries and the cursor to resume from.
    pub async fn stream_fragment_to_sink<K>(
        &self,
        config: &ZipConfig,
        sink: &mut K,
    ) -> Result<StreamedFragment>
    where
        K: ArchiveSink + Send,
    {
        config.validate()?;
        let outcome = self.next_batch(config, config.start_key.as_deref()).await?;
        let entries =
            stream_batch(&self.store, &outcome.selected, config, sink, &self.cancel).await?;
        Ok(StreamedFragment { outcome, entries })
    }

    /// Zip the whole folder into local fragment files
    ///
    /// Walks the listing to exhaustion and returns one manifest per
    /// non-empty fragment. On error every fragment file written so far is
    /// removed before the error surfaces; nothing is left on disk.
    pub async fn produce_local_fragments(&self, config: &ZipConfig) -> Result<Vec<FragmentManifest>> {
        config.validate()?;

        let mut manifests: Vec<FragmentManifest> = Vec::new();
        let mut cursor = config.start_key.clone();
        let mut index: u32 = 0;

        loop {
            let outcome = match self.next_batch(config, cursor.as_deref()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    remove_fragment_files(&manifests);
                    return Err(e);
                }
            };
            if outcome.is_exhausted() {
                break;
            }
            if let Some(last) = &outcome.last_scanned {
                cursor = Some(last.key.clone());
            }

            if outcome.selected.is_empty() {
                tracing::debug!(scanned = outcome.total_scanned, "page yielded no selectable objects");
                continue;
            }

            match self.write_fragment(config, &outcome.selected, index).await {
                Ok(manifest) => {
                    tracing::info!(
                        index,
                        entries = manifest.entries.len(),
                        path = %manifest.local_path.display(),
                        "fragment written"
                    );
                    manifests.push(manifest);
                    index += 1;
                }
                Err(e) => {
                    remove_fragment_files(&manifests);
                    return Err(e);
                }
            }
        }

        Ok(manifests)
    }

    /// Zip the whole folder and upload each fragment back to the store
    ///
    /// Fragment `i` is uploaded as `{stem}_{i}.zip`, where the stem comes
    /// from the resolved archive name. Uploads are pipelined with the
    /// production of later fragments; the report is returned once every
    /// issued upload has settled.
    pub async fn produce_and_upload_fragments(&self, config: &ZipConfig) -> Result<ZipReport> {
        self.produce_and_upload_inner(config, None).await
    }

    /// Same as [`produce_and_upload_fragments`], invoking `hook` as each
    /// fragment upload completes
    ///
    /// [`produce_and_upload_fragments`]: FolderZipper::produce_and_upload_fragments
    pub async fn produce_and_upload_fragments_with_hook(
        &self,
        config: &ZipConfig,
        hook: FragmentHook,
    ) -> Result<ZipReport> {
        self.produce_and_upload_inner(config, Some(hook)).await
    }

    async fn produce_and_upload_inner(
        &self,
        config: &ZipConfig,
        hook: Option<FragmentHook>,
    ) -> Result<ZipReport> {
        config.validate()?;

        let stem = {
            let name = config.resolve_archive_name();
            name.strip_suffix(".zip").unwrap_or(&name).to_string()
        };
        let tracker = UploadTracker::new(
            Arc::clone(&self.store),
            config.max_concurrent_uploads,
            hook,
            self.cancel.clone(),
        );

        let mut cursor = config.start_key.clone();
        let mut index: u32 = 0;
        let run = loop {
            let outcome = match self.next_batch(config, cursor.as_deref()).await {
                Ok(outcome) => outcome,
                Err(e) => break Err(e),
            };
            if outcome.is_exhausted() {
                break Ok(());
            }
            if let Some(last) = &outcome.last_scanned {
                cursor = Some(last.key.clone());
            }

            if outcome.selected.is_empty() {
                continue;
            }

            match self.write_fragment(config, &outcome.selected, index).await {
                Ok(manifest) => {
                    tracker.track(manifest, format!("{}_{}.zip", stem, index));
                    index += 1;
                }
                Err(e) => break Err(e),
            }
        };

        // In-flight uploads drain before any orchestration error surfaces
        let report = tracker.finish_and_wait().await;
        match run {
            Ok(()) => Ok(report),
            Err(e) => {
                tracing::warn!(
                    uploaded = report.uploaded.len(),
                    failed = report.failed.len(),
                    error = %e,
                    "fragment production aborted; settled uploads stand"
                );
                Err(e)
            }
        }
    }

    /// List one page and select a batch from it
    async fn next_batch(&self, config: &ZipConfig, cursor: Option<&str>) -> Result<BatchOutcome> {
        if self.cancel.is_cancelled() {
            return Err(ZipError::Cancelled { operation: "list" });
        }

        let page = self
            .store
            .list(
                &config.prefix(),
                cursor,
                Some(config.page_size()),
                config.recursive,
            )
            .await?;

        let policy = BatchPolicy {
            max_count: config.max_file_count,
            max_size: config.max_file_size,
        };
        Ok(select_batch(&page.objects, &policy))
    }

    /// Write one batch into a local fragment file, flushed to disk
    async fn write_fragment(
        &self,
        config: &ZipConfig,
        batch: &[crate::store::ObjectInfo],
        index: u32,
    ) -> Result<FragmentManifest> {
        let path = fragment_path(config, index);
        let file = std::fs::File::create(&path)?;
        let mut sink = ZipSink::new(file);

        let entries = match stream_batch(&self.store, batch, config, &mut sink, &self.cancel).await
        {
            Ok(entries) => entries,
            Err(e) => {
                if let Err(remove_err) = std::fs::remove_file(&path) {
                    tracing::warn!(
                        path = %path.display(),
                        error = %remove_err,
                        "failed to remove partial fragment file"
                    );
                }
                return Err(e);
            }
        };

        let file = sink
            .into_inner()
            .ok_or_else(|| ZipError::Archive("fragment writer was not finalized".to_string()))?;
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(|e| ZipError::Archive(format!("flush task failed: {}", e)))??;

        Ok(FragmentManifest {
            index,
            entries,
            local_path: path,
        })
    }
}

/// Process-wide sequence so concurrent operations sharing one `tmp_dir`
/// never collide on a fragment file name
static FRAGMENT_FILE_SEQ: AtomicU64 = AtomicU64::new(0);

fn fragment_path(config: &ZipConfig, index: u32) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let seq = FRAGMENT_FILE_SEQ.fetch_add(1, Ordering::Relaxed);
    config
        .tmp_dir
        .join(format!("__{}_{}_{}.zip", millis, seq, index))
}

fn remove_fragment_files(manifests: &[FragmentManifest]) {
    for manifest in manifests {
        if let Err(e) = std::fs::remove_file(&manifest.local_path) {
            tracing::warn!(
                path = %manifest.local_path.display(),
                error = %e,
                "failed to remove fragment file"
            );
        }
    }
}
