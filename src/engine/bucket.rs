//! Bucket operations and pass-through configuration facets

use super::{StorageEngine, StorageError};
use crate::meta::BucketRecord;
use crate::types::VersioningState;
use chrono::Utc;
use tracing::{debug, instrument};

impl StorageEngine {
    #[instrument(skip(self))]
    pub async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let name = bucket.to_string();
        self.with_meta(move |m| m.create_bucket(&name, Utc::now()))
            .await?;
        self.blobs.ensure_bucket(bucket).await?;
        debug!("bucket created");
        Ok(())
    }

    /// Fetch the bucket record, or `BucketNotFound`.
    pub async fn bucket(&self, bucket: &str) -> Result<BucketRecord, StorageError> {
        let name = bucket.to_string();
        self.with_meta(move |m| {
            m.get_bucket(&name)?
                .ok_or(StorageError::BucketNotFound(name))
        })
        .await
    }

    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        let name = bucket.to_string();
        self.with_meta(move |m| Ok(m.get_bucket(&name)?.is_some()))
            .await
    }

    pub async fn list_buckets(&self) -> Result<Vec<BucketRecord>, StorageError> {
        self.with_meta(|m| m.list_buckets()).await
    }

    /// Delete an empty bucket and its directory tree.
    #[instrument(skip(self))]
    pub async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let name = bucket.to_string();
        self.with_meta(move |m| m.delete_bucket(&name)).await?;
        self.blobs.remove_bucket(bucket).await?;
        debug!("bucket deleted");
        Ok(())
    }

    pub async fn versioning(&self, bucket: &str) -> Result<VersioningState, StorageError> {
        Ok(self.bucket(bucket).await?.versioning)
    }

    /// Flip the bucket's versioning state. Suspending keeps history; only
    /// future writes change behavior.
    pub async fn set_versioning(
        &self,
        bucket: &str,
        state: VersioningState,
    ) -> Result<(), StorageError> {
        let name = bucket.to_string();
        self.with_meta(move |m| m.set_versioning(&name, state)).await
    }

    // === Pass-through configuration facets ===
    //
    // Tags, CORS, policy, lifecycle, encryption, website, object-lock and
    // ACL documents are stored verbatim; the engine acts on none of them.
    // Callers validate well-formedness before handing the bytes down.

    pub async fn put_bucket_config(
        &self,
        bucket: &str,
        facet: &'static str,
        body: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.bucket(bucket).await?;
        let name = bucket.to_string();
        self.with_meta(move |m| m.put_bucket_config(&name, facet, &body))
            .await
    }

    pub async fn get_bucket_config(
        &self,
        bucket: &str,
        facet: &'static str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        self.bucket(bucket).await?;
        let name = bucket.to_string();
        self.with_meta(move |m| m.get_bucket_config(&name, facet))
            .await
    }

    pub async fn delete_bucket_config(
        &self,
        bucket: &str,
        facet: &'static str,
    ) -> Result<(), StorageError> {
        self.bucket(bucket).await?;
        let name = bucket.to_string();
        self.with_meta(move |m| m.delete_bucket_config(&name, facet))
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) async fn open_engine() -> (TempDir, StorageEngine) {
        let dir = TempDir::new().unwrap();
        let engine = StorageEngine::open(dir.path(), &dir.path().join("metadata.sqlite3"))
            .await
            .unwrap();
        (dir, engine)
    }

    #[tokio::test]
    async fn test_bucket_crud() {
        let (_dir, engine) = open_engine().await;

        engine.create_bucket("b1").await.unwrap();
        assert!(engine.bucket_exists("b1").await.unwrap());
        assert!(!engine.bucket_exists("b2").await.unwrap());
        assert!(matches!(
            engine.create_bucket("b1").await,
            Err(StorageError::BucketAlreadyExists(_))
        ));

        assert_eq!(engine.list_buckets().await.unwrap().len(), 1);

        engine.delete_bucket("b1").await.unwrap();
        assert!(!engine.bucket_exists("b1").await.unwrap());
    }

    #[tokio::test]
    async fn test_versioning_states() {
        let (_dir, engine) = open_engine().await;
        engine.create_bucket("b1").await.unwrap();

        assert_eq!(
            engine.versioning("b1").await.unwrap(),
            VersioningState::Unversioned
        );
        engine
            .set_versioning("b1", VersioningState::Enabled)
            .await
            .unwrap();
        assert_eq!(
            engine.versioning("b1").await.unwrap(),
            VersioningState::Enabled
        );
        engine
            .set_versioning("b1", VersioningState::Suspended)
            .await
            .unwrap();
        assert_eq!(
            engine.versioning("b1").await.unwrap(),
            VersioningState::Suspended
        );
    }

    #[tokio::test]
    async fn test_config_facets_are_opaque() {
        let (_dir, engine) = open_engine().await;
        engine.create_bucket("b1").await.unwrap();

        let doc = b"<LifecycleConfiguration><Rule/></LifecycleConfiguration>".to_vec();
        engine
            .put_bucket_config("b1", "lifecycle", doc.clone())
            .await
            .unwrap();
        assert_eq!(
            engine.get_bucket_config("b1", "lifecycle").await.unwrap(),
            Some(doc)
        );
        engine.delete_bucket_config("b1", "lifecycle").await.unwrap();
        assert_eq!(
            engine.get_bucket_config("b1", "lifecycle").await.unwrap(),
            None
        );

        assert!(matches!(
            engine.get_bucket_config("nope", "lifecycle").await,
            Err(StorageError::BucketNotFound(_))
        ));
    }
}
