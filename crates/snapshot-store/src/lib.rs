//! snapshot-store: local retention and upload of decoded snapshots
//!
//! Rows are appended to a [`SnapshotStore`] and removed only after an
//! [`Uploader`] acknowledges them through [`flush_pending`].

mod error;
pub use error::{FlushError, StoreError, UploadError};

mod store;
pub use store::{MemoryStore, SnapshotStore, StoredRow};

mod jsonl;
pub use jsonl::JsonlStore;

mod upload;
#[cfg(feature = "http")]
pub use upload::HttpUploader;
pub use upload::{flush_pending, FlushReport, UploadBatch, Uploader};
