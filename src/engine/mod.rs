//! Storage engine: composes the metadata store and the blob store into the
//! S3 data model
//!
//! The engine owns every filesystem and database touch; handlers never
//! reach past it. Writes follow stage-then-publish: bytes land in a
//! staging file, get fsynced, the metadata row commits, and only then is
//! the blob renamed into its permanent location, so a version is readable
//! exactly when its row is visible, and readers never see partial data.

mod bucket;
mod error;
mod list;
mod multipart;
mod object;

pub use error::StorageError;
pub use list::{
    partition_entries, partition_version_entries, ListEntry, ListObjectsResult, ListVersionsResult,
};
pub use multipart::{CompletedPart, ListPartsResult, ListUploadsResult};
pub use object::{DeleteOutcome, GetOutcome, PutChecks, PutOutcome, RangeRequest};

use crate::blob::BlobStore;
use crate::meta::MetaStore;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Hard S3 limits honored by the engine.
pub const MAX_PART_NUMBER: u32 = 10_000;
/// Every multipart part except the last must be at least this large.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

pub struct StorageEngine {
    pub(crate) meta: Arc<MetaStore>,
    pub(crate) blobs: Arc<BlobStore>,
}

impl StorageEngine {
    /// Open both stores and run the startup scavenger.
    pub async fn open(data_dir: &Path, metadata_path: &Path) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(data_dir).await?;
        let meta = {
            let metadata_path = metadata_path.to_path_buf();
            tokio::task::spawn_blocking(move || MetaStore::open(&metadata_path))
                .await
                .map_err(|e| StorageError::Other(format!("metadata open task failed: {e}")))??
        };
        let blobs = BlobStore::new(data_dir.to_path_buf()).await?;

        let engine = Self {
            meta: Arc::new(meta),
            blobs: Arc::new(blobs),
        };

        let live: HashSet<String> = engine.meta.all_upload_ids()?.into_iter().collect();
        engine.blobs.scavenge(&live).await;

        info!(
            data_dir = %data_dir.display(),
            metadata = %metadata_path.display(),
            "storage engine ready"
        );
        Ok(engine)
    }

    /// Run a metadata-store call on the blocking pool.
    pub(crate) async fn with_meta<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&MetaStore) -> Result<T, StorageError> + Send + 'static,
    {
        let meta = self.meta.clone();
        tokio::task::spawn_blocking(move || f(&meta))
            .await
            .map_err(|e| StorageError::Other(format!("metadata task failed: {e}")))?
    }
}
