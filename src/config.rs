/*!
 * Configuration types for zipline
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ZipError};

/// Default listing page size when no file-count cap is configured
pub const DEFAULT_PAGE_SIZE: usize = 1000;

fn default_preserve_paths() -> bool {
    true
}

fn default_tmp_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_fetch_concurrency() -> usize {
    8
}

fn default_upload_concurrency() -> usize {
    4
}

/// Configuration for one folder-zip operation
///
/// A `ZipConfig` is an immutable value passed explicitly to each operation;
/// nothing in the crate reads ambient or global state. Defaults are suitable
/// for zipping a small folder into a single fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZipConfig {
    /// Logical folder (key prefix, without trailing slash) to archive
    pub folder: String,

    /// Resume listing after this key (None = start from the first object)
    #[serde(default)]
    pub start_key: Option<String>,

    /// Maximum number of objects per fragment
    #[serde(default)]
    pub max_file_count: Option<usize>,

    /// Maximum cumulative object bytes per fragment
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// Descend into nested folders
    #[serde(default)]
    pub recursive: bool,

    /// Keep nested path segments in archive entry names; when false only the
    /// final segment is used
    #[serde(default = "default_preserve_paths")]
    pub preserve_folder_paths: bool,

    /// Directory for local fragment files while they are being written
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    /// Destination archive name; fragment `i` becomes `{stem}_{i}.zip`.
    /// Defaults to `{folder}.zip` inside the folder itself.
    #[serde(default)]
    pub archive_name: Option<String>,

    /// Concurrent object fetches while building one fragment
    #[serde(default = "default_fetch_concurrency")]
    pub max_concurrent_fetches: usize,

    /// Concurrent fragment uploads
    #[serde(default = "default_upload_concurrency")]
    pub max_concurrent_uploads: usize,
}

impl ZipConfig {
    /// Create a configuration for the given folder with default limits
    pub fn new<S: Into<String>>(folder: S) -> Self {
        Self {
            folder: folder.into(),
            start_key: None,
            max_file_count: None,
            max_file_size: None,
            recursive: false,
            preserve_folder_paths: default_preserve_paths(),
            tmp_dir: default_tmp_dir(),
            archive_name: None,
            max_concurrent_fetches: default_fetch_concurrency(),
            max_concurrent_uploads: default_upload_concurrency(),
        }
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: ZipConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Builder pattern: resume after a key
    pub fn with_start_key<S: Into<String>>(mut self, key: S) -> Self {
        self.start_key = Some(key.into());
        self
    }

    /// Builder pattern: cap the number of objects per fragment
    pub fn with_max_file_count(mut self, count: usize) -> Self {
        self.max_file_count = Some(count);
        self
    }

    /// Builder pattern: cap cumulative object bytes per fragment
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Builder pattern: descend into nested folders
    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    /// Builder pattern: flatten entry names to their final path segment
    pub fn flatten_paths(mut self) -> Self {
        self.preserve_folder_paths = false;
        self
    }

    /// Builder pattern: set the local temp directory
    pub fn with_tmp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.tmp_dir = dir.into();
        self
    }

    /// Builder pattern: set the destination archive name
    pub fn with_archive_name<S: Into<String>>(mut self, name: S) -> Self {
        self.archive_name = Some(name.into());
        self
    }

    /// Builder pattern: bound concurrent fetches within a fragment
    pub fn with_max_concurrent_fetches(mut self, n: usize) -> Self {
        self.max_concurrent_fetches = n;
        self
    }

    /// Builder pattern: bound concurrent fragment uploads
    pub fn with_max_concurrent_uploads(mut self, n: usize) -> Self {
        self.max_concurrent_uploads = n;
        self
    }

    /// Validate the configuration before running an operation
    pub fn validate(&self) -> Result<()> {
        if self.folder.trim_matches('/').is_empty() {
            return Err(ZipError::Config("folder is required".to_string()));
        }
        if self.max_file_count == Some(0) {
            return Err(ZipError::Config(
                "max_file_count must be greater than zero".to_string(),
            ));
        }
        if self.max_file_size == Some(0) {
            return Err(ZipError::Config(
                "max_file_size must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_fetches == 0 || self.max_concurrent_uploads == 0 {
            return Err(ZipError::Config(
                "concurrency limits must be greater than zero".to_string(),
            ));
        }
        if let Some(max) = self.max_file_size {
            if max < 1024 {
                tracing::warn!(
                    max_file_size = max,
                    "max_file_size is very low; fragments may each hold a single object"
                );
            }
        }
        Ok(())
    }

    /// Listing prefix for this folder (always with a trailing slash)
    pub fn prefix(&self) -> String {
        format!("{}/", self.folder.trim_matches('/'))
    }

    /// Listing page size: the file-count cap when set, otherwise the default
    pub fn page_size(&self) -> usize {
        self.max_file_count.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Resolve the destination archive name
    ///
    /// A bare name (no `/`) is placed inside the folder, matching where the
    /// fragments' source objects live; an explicit path is used as-is.
    pub fn resolve_archive_name(&self) -> String {
        let name = match &self.archive_name {
            Some(name) => name.clone(),
            None => {
                let base = self
                    .folder
                    .trim_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or("archive");
                format!("{}.zip", base)
            }
        };

        if name.contains('/') {
            name
        } else {
            format!("{}/{}", self.folder.trim_matches('/'), name)
        }
    }
}
