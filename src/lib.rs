/*!
 * Zipline - Stream object-store folders into bounded zip fragments
 *
 * A library for archiving a logical folder of a remote object store with:
 * - Cursor-based batch listing that resumes after any key
 * - Count and size bounds per fragment
 * - Concurrent object fetches while building each fragment
 * - Background fragment uploads pipelined with production
 * - Cancellation at every suspension point
 * - Pluggable stores behind the `ObjectStore` trait
 *
 * Version: 0.2.0
 */

pub mod archive;
pub mod batch;
pub mod config;
pub mod error;
pub mod fragment;
pub mod store;
pub mod upload;

// Re-export commonly used types
pub use archive::{ArchiveSink, ZipSink};
pub use batch::{select_batch, BatchOutcome, BatchPolicy};
pub use config::ZipConfig;
pub use error::{Result, ZipError};
pub use fragment::{FolderZipper, FragmentManifest, StreamedFragment};
pub use store::{ListPage, MemoryStore, ObjectInfo, ObjectStore, PutOutcome, ReadStream};
pub use upload::{FragmentHook, UploadFailure, UploadedFragment, ZipReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
