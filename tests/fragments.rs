//! Integration tests for the folder-to-fragments pipeline
//!
//! These tests drive `FolderZipper` end to end over `MemoryStore`, then
//! extract the produced archives and compare entry bytes against the
//! source objects.

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use zipline::{
    FolderZipper, FragmentHook, ListPage, MemoryStore, ObjectStore, PutOutcome, ReadStream,
    ZipConfig, ZipError,
};

/// Extract every entry of a zip held in `bytes`
fn extract(bytes: &[u8]) -> HashMap<String, Vec<u8>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    let mut entries = HashMap::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).unwrap();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        entries.insert(entry.name().to_string(), data);
    }
    entries
}

async fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.insert("reports/2024-01.csv", vec![b'a'; 400]).await;
    store.insert("reports/2024-02.csv", vec![b'b'; 400]).await;
    store.insert("reports/2024-03.csv", vec![b'c'; 400]).await;
    store.insert("reports/2024-04.csv", vec![b'd'; 400]).await;
    store.insert("reports/2024-05.csv", vec![b'e'; 400]).await;
    Arc::new(store)
}

#[tokio::test]
async fn test_count_bounded_fragments_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store().await;
    let zipper = FolderZipper::from_arc(Arc::clone(&store));
    let config = ZipConfig::new("reports")
        .with_tmp_dir(dir.path())
        .with_max_file_count(2);

    let manifests = zipper.produce_local_fragments(&config).await.unwrap();
    assert_eq!(manifests.len(), 3);

    // Reassemble all entries across fragments and compare to the source
    let mut all = HashMap::new();
    for manifest in &manifests {
        let bytes = std::fs::read(&manifest.local_path).unwrap();
        all.extend(extract(&bytes));
    }
    assert_eq!(all.len(), 5);
    for month in ["01", "02", "03", "04", "05"] {
        let key = format!("reports/2024-{}.csv", month);
        let source = store.bytes_of(&key).await.unwrap();
        let entry = &all[&format!("2024-{}.csv", month)];
        assert_eq!(&entry[..], &source[..]);
    }
}

#[tokio::test]
async fn test_size_bound_with_oversized_object() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.insert("media/small1.bin", vec![1u8; 100]).await;
    store.insert("media/huge.bin", vec![2u8; 5000]).await;
    store.insert("media/small2.bin", vec![3u8; 100]).await;
    let zipper = FolderZipper::new(store);

    let config = ZipConfig::new("media")
        .with_tmp_dir(dir.path())
        .with_max_file_size(1500);

    let manifests = zipper.produce_local_fragments(&config).await.unwrap();
    // huge.bin lists first and is archived alone; the small objects share
    // the next fragment
    assert_eq!(manifests.len(), 2);
    assert_eq!(manifests[0].entries.len(), 1);
    assert_eq!(manifests[0].entries[0].key, "media/huge.bin");
    assert_eq!(manifests[1].entries.len(), 2);
}

#[tokio::test]
async fn test_fragment_keys_advance_monotonically() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store().await;
    let zipper = FolderZipper::from_arc(store);
    let config = ZipConfig::new("reports")
        .with_tmp_dir(dir.path())
        .with_max_file_count(2);

    let manifests = zipper.produce_local_fragments(&config).await.unwrap();
    assert!(manifests.len() > 1);

    // Every key of fragment i sorts strictly before every key of fragment
    // i+1: the listing cursor never revisits or reorders objects
    for window in manifests.windows(2) {
        let max_prev = window[0].entries.iter().map(|o| &o.key).max().unwrap();
        let min_next = window[1].entries.iter().map(|o| &o.key).min().unwrap();
        assert!(
            max_prev < min_next,
            "fragment {} reaches {} but fragment {} starts at {}",
            window[0].index,
            max_prev,
            window[1].index,
            min_next
        );
    }
}

#[tokio::test]
async fn test_resume_from_start_key() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store().await;
    let zipper = FolderZipper::from_arc(store);

    let config = ZipConfig::new("reports")
        .with_tmp_dir(dir.path())
        .with_start_key("reports/2024-03.csv");

    let manifests = zipper.produce_local_fragments(&config).await.unwrap();
    assert_eq!(manifests.len(), 1);
    let keys: Vec<&str> = manifests[0]
        .entries
        .iter()
        .map(|o| o.key.as_str())
        .collect();
    assert_eq!(keys, vec!["reports/2024-04.csv", "reports/2024-05.csv"]);
}

#[tokio::test]
async fn test_recursive_listing_and_flattened_names() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.insert("logs/2024/06/app.log", &b"june"[..]).await;
    store.insert("logs/2024/07/app2.log", &b"july"[..]).await;
    store.insert("logs/top.log", &b"top"[..]).await;
    let zipper = FolderZipper::new(store);

    let config = ZipConfig::new("logs")
        .with_tmp_dir(dir.path())
        .recursive()
        .flatten_paths();

    let manifests = zipper.produce_local_fragments(&config).await.unwrap();
    assert_eq!(manifests.len(), 1);

    let bytes = std::fs::read(&manifests[0].local_path).unwrap();
    let entries = extract(&bytes);
    assert_eq!(entries.len(), 3);
    assert_eq!(&entries["app.log"][..], b"june");
    assert_eq!(&entries["app2.log"][..], b"july");
    assert_eq!(&entries["top.log"][..], b"top");
}

#[tokio::test]
async fn test_upload_pipeline_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store().await;
    let zipper = FolderZipper::from_arc(Arc::clone(&store));

    let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_hook = Arc::clone(&seen);
    let hook: FragmentHook = Arc::new(move |fragment| {
        seen_in_hook.lock().unwrap().push(fragment.index);
    });

    let config = ZipConfig::new("reports")
        .with_tmp_dir(dir.path())
        .with_max_file_count(2)
        .with_archive_name("monthly.zip");

    let report = zipper
        .produce_and_upload_fragments_with_hook(&config, hook)
        .await
        .unwrap();

    assert!(report.all_uploaded());
    assert_eq!(report.uploaded.len(), 3);
    assert_eq!(report.archived_objects(), 5);
    for fragment in &report.uploaded {
        assert!(!fragment.etag.is_empty());
        assert!(fragment.location.starts_with("memory://"));
    }

    // Hook fired once per fragment
    let mut indices = seen.lock().unwrap().clone();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 2]);

    // Uploaded fragments are valid archives with the right entries
    let bytes = store.bytes_of("reports/monthly_0.zip").await.unwrap();
    let entries = extract(&bytes);
    assert_eq!(entries.len(), 2);
    assert!(entries.contains_key("2024-01.csv"));
    assert!(entries.contains_key("2024-02.csv"));

    // No local files left behind
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

/// Store wrapper that fails puts for selected keys
struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_puts: Vec<String>,
    attempts: AtomicUsize,
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn list(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: Option<usize>,
        recursive: bool,
    ) -> zipline::Result<ListPage> {
        self.inner.list(prefix, start_after, max_keys, recursive).await
    }

    async fn get(&self, key: &str) -> zipline::Result<ReadStream> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: ReadStream, len: u64) -> zipline::Result<PutOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.iter().any(|k| k == key) {
            return Err(ZipError::Upload {
                key: key.to_string(),
                message: "simulated outage".to_string(),
            });
        }
        self.inner.put(key, data, len).await
    }
}

#[tokio::test]
async fn test_upload_failure_is_scoped_to_one_fragment() {
    let dir = TempDir::new().unwrap();
    let memory = seeded_store().await;
    let store = Arc::new(FlakyStore {
        inner: Arc::clone(&memory),
        fail_puts: vec!["reports/monthly_1.zip".to_string()],
        attempts: AtomicUsize::new(0),
    });
    let zipper = FolderZipper::from_arc(store);

    let config = ZipConfig::new("reports")
        .with_tmp_dir(dir.path())
        .with_max_file_count(2)
        .with_archive_name("monthly.zip");

    // An upload failure does not abort the operation
    let report = zipper.produce_and_upload_fragments(&config).await.unwrap();
    assert_eq!(report.uploaded.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, "reports/monthly_1.zip");
    assert!(report.failed[0].error.contains("simulated outage"));

    assert!(memory.contains("reports/monthly_0.zip").await);
    assert!(!memory.contains("reports/monthly_1.zip").await);
    assert!(memory.contains("reports/monthly_2.zip").await);

    // Temp files reclaimed on both outcomes
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_fetch_failure_aborts_after_draining_uploads() {
    let dir = TempDir::new().unwrap();
    let memory = seeded_store().await;
    memory.poison_get("reports/2024-05.csv").await;
    let zipper = FolderZipper::from_arc(Arc::clone(&memory));

    let config = ZipConfig::new("reports")
        .with_tmp_dir(dir.path())
        .with_max_file_count(2)
        .with_archive_name("monthly.zip");

    let err = zipper
        .produce_and_upload_fragments(&config)
        .await
        .unwrap_err();
    assert!(matches!(err, ZipError::Fetch { .. }));

    // Fragments produced before the failure were still uploaded
    assert!(memory.contains("reports/monthly_0.zip").await);
    assert!(memory.contains("reports/monthly_1.zip").await);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
