//! Background fragment uploads and the completion barrier
//!
//! Fragment uploads run on spawned tasks, pipelined with the orchestration
//! of later fragments. `UploadTracker` owns the shared state that makes the
//! final completion race-free: a pending-upload count and an
//! orchestration-finished flag behind one lock, with a single well-defined
//! "all done" transition. `finish_and_wait` consumes the tracker, so the
//! completion can only be observed once.

use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ZipError};
use crate::fragment::FragmentManifest;
use crate::store::{ObjectInfo, ObjectStore, PutOutcome, ReadStream};

/// Notification hook invoked as each fragment upload completes
pub type FragmentHook = Arc<dyn Fn(&UploadedFragment) + Send + Sync>;

/// A fragment that was successfully persisted to the destination store
#[derive(Debug, Clone)]
pub struct UploadedFragment {
    /// Fragment index (contiguous from 0)
    pub index: u32,

    /// Destination key of the uploaded archive
    pub key: String,

    /// Entity tag returned by the store
    pub etag: String,

    /// Location returned by the store
    pub location: String,

    /// Objects archived into this fragment, in append order
    pub entries: Vec<ObjectInfo>,
}

/// A fragment whose upload failed
///
/// The local fragment file is deleted on this path too; the failure carries
/// everything needed to re-run the fragment from its entry list.
#[derive(Debug, Clone)]
pub struct UploadFailure {
    /// Fragment index
    pub index: u32,

    /// Destination key that was attempted
    pub key: String,

    /// Error message
    pub error: String,
}

/// Final result of a produce-and-upload operation
#[derive(Debug, Clone, Default)]
pub struct ZipReport {
    /// Successfully uploaded fragments, ordered by index
    pub uploaded: Vec<UploadedFragment>,

    /// Failed fragment uploads, ordered by index
    pub failed: Vec<UploadFailure>,
}

impl ZipReport {
    /// Check if every issued upload succeeded
    pub fn all_uploaded(&self) -> bool {
        self.failed.is_empty()
    }

    /// Check if the operation produced no fragments at all
    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty() && self.failed.is_empty()
    }

    /// Total number of objects archived across uploaded fragments
    pub fn archived_objects(&self) -> usize {
        self.uploaded.iter().map(|f| f.entries.len()).sum()
    }
}

struct TrackerInner {
    pending: usize,
    finished: bool,
    uploaded: Vec<UploadedFragment>,
    failed: Vec<UploadFailure>,
}

/// Barrier between the fragment orchestrator and its background uploads
pub(crate) struct UploadTracker<S> {
    store: Arc<S>,
    inner: Arc<Mutex<TrackerInner>>,
    notify: Arc<Notify>,
    semaphore: Arc<Semaphore>,
    hook: Option<FragmentHook>,
    cancel: CancellationToken,
}

impl<S: ObjectStore + 'static> UploadTracker<S> {
    pub(crate) fn new(
        store: Arc<S>,
        max_concurrent: usize,
        hook: Option<FragmentHook>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            inner: Arc::new(Mutex::new(TrackerInner {
                pending: 0,
                finished: false,
                uploaded: Vec::new(),
                failed: Vec::new(),
            })),
            notify: Arc::new(Notify::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            hook,
            cancel,
        }
    }

    /// Issue a background upload for one fragment
    ///
    /// The pending count is incremented before the task is spawned, so the
    /// completion barrier can never observe a gap between "issued" and
    /// "counted". The local fragment file is deleted once the upload
    /// settles, success or failure.
    pub(crate) fn track(&self, manifest: FragmentManifest, key: String) {
        debug_assert!(
            !manifest.entries.is_empty(),
            "empty fragments must not be uploaded"
        );

        self.inner.lock().expect("tracker lock").pending += 1;

        let store = Arc::clone(&self.store);
        let inner = Arc::clone(&self.inner);
        let notify = Arc::clone(&self.notify);
        let semaphore = Arc::clone(&self.semaphore);
        let hook = self.hook.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let outcome = match semaphore.acquire_owned().await {
                Ok(_permit) => upload_fragment(&store, &manifest, &key, &cancel).await,
                Err(_) => Err(ZipError::Upload {
                    key: key.clone(),
                    message: "upload pool closed".to_string(),
                }),
            };

            if let Err(e) = tokio::fs::remove_file(&manifest.local_path).await {
                tracing::warn!(
                    path = %manifest.local_path.display(),
                    error = %e,
                    "failed to remove local fragment file"
                );
            }

            let settled = match outcome {
                Ok(put) => {
                    tracing::info!(key = %key, etag = %put.etag, "fragment uploaded");
                    let fragment = UploadedFragment {
                        index: manifest.index,
                        key,
                        etag: put.etag,
                        location: put.location,
                        entries: manifest.entries,
                    };
                    if let Some(hook) = &hook {
                        hook(&fragment);
                    }
                    Ok(fragment)
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "fragment upload failed");
                    Err(UploadFailure {
                        index: manifest.index,
                        key,
                        error: e.to_string(),
                    })
                }
            };

            let fire = {
                let mut guard = inner.lock().expect("tracker lock");
                match settled {
                    Ok(fragment) => guard.uploaded.push(fragment),
                    Err(failure) => guard.failed.push(failure),
                }
                guard.pending -= 1;
                guard.pending == 0 && guard.finished
            };
            if fire {
                notify.notify_waiters();
            }
        });
    }

    /// Mark orchestration finished and wait until every issued upload has
    /// settled, then return the report
    ///
    /// Consuming `self` is what makes the completion single-fire: there is
    /// no second caller to wake.
    pub(crate) async fn finish_and_wait(self) -> ZipReport {
        self.inner.lock().expect("tracker lock").finished = true;

        loop {
            let notified = self.notify.notified();
            {
                let guard = self.inner.lock().expect("tracker lock");
                if guard.pending == 0 {
                    break;
                }
            }
            notified.await;
        }

        let mut guard = self.inner.lock().expect("tracker lock");
        let mut report = ZipReport {
            uploaded: std::mem::take(&mut guard.uploaded),
            failed: std::mem::take(&mut guard.failed),
        };
        report.uploaded.sort_by_key(|f| f.index);
        report.failed.sort_by_key(|f| f.index);
        report
    }
}

/// Stream one local fragment file into the destination store
async fn upload_fragment<S: ObjectStore>(
    store: &Arc<S>,
    manifest: &FragmentManifest,
    key: &str,
    cancel: &CancellationToken,
) -> Result<PutOutcome> {
    if cancel.is_cancelled() {
        return Err(ZipError::Cancelled {
            operation: "upload",
        });
    }

    let file = tokio::fs::File::open(&manifest.local_path).await?;
    let len = file.metadata().await?.len();
    let stream: ReadStream = Box::pin(ReaderStream::new(file));

    tracing::debug!(key = %key, bytes = len, "uploading fragment");
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ZipError::Cancelled { operation: "upload" }),
        outcome = store.put(key, stream, len) => outcome,
    }
}
