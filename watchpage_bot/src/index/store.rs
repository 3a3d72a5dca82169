use std::sync::Arc;

use crate::{
    config::MissingIndexPolicy,
    storage::{ObjectStore, ObjectVersion, StoreError, CONTENT_TYPE_JSON},
};

use super::record::VideoRecord;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index {0} does not exist yet")]
    Uninitialized(String),
    #[error("index {key} is not a valid list of videos: {source}")]
    Corrupt {
        key: String,
        source: serde_json::Error,
    },
    #[error("index was changed by someone else in the meantime")]
    Conflict,
    #[error("could not serialize the index: {0}")]
    Serialize(serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The index as it was read, plus the version to compare against on save.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub records: Vec<VideoRecord>,
    pub version: Option<ObjectVersion>,
}

/// Reads and writes the index document: a JSON array of [`VideoRecord`]s
/// under a single key of the object store.
pub struct IndexStore {
    store: Arc<dyn ObjectStore>,
    key: String,
    policy: MissingIndexPolicy,
}

impl IndexStore {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        key: impl Into<String>,
        policy: MissingIndexPolicy,
    ) -> IndexStore {
        IndexStore {
            store,
            key: key.into(),
            policy,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn load(&self) -> Result<IndexSnapshot, IndexError> {
        let Some(object) = self.store.get(&self.key).await? else {
            return match self.policy {
                MissingIndexPolicy::Lenient => {
                    log::debug!("Index {} is missing, starting empty", self.key);
                    Ok(IndexSnapshot::default())
                }
                MissingIndexPolicy::Strict => Err(IndexError::Uninitialized(self.key.clone())),
            };
        };

        // A zero-length document is what some tools leave behind on create.
        let records = if object.data.iter().all(u8::is_ascii_whitespace) {
            Vec::new()
        } else {
            serde_json::from_slice(&object.data).map_err(|source| IndexError::Corrupt {
                key: self.key.clone(),
                source,
            })?
        };

        Ok(IndexSnapshot {
            records,
            version: object.version,
        })
    }

    /// Overwrite the index with `records`, unless it changed since `expected` was read.
    pub async fn save(
        &self,
        records: &[VideoRecord],
        expected: Option<&ObjectVersion>,
    ) -> Result<Option<ObjectVersion>, IndexError> {
        let current = self.store.head(&self.key).await?;
        if current.as_ref() != expected {
            log::warn!(
                "Index {} changed under us: expected {:?}, found {:?}",
                self.key,
                expected,
                current
            );
            return Err(IndexError::Conflict);
        }

        let data = serde_json::to_vec_pretty(records).map_err(IndexError::Serialize)?;
        let version = self.store.put(&self.key, data, CONTENT_TYPE_JSON).await?;
        log::debug!("Saved index {} with {} records", self.key, records.len());
        Ok(version)
    }

    pub async fn exists(&self) -> Result<bool, IndexError> {
        Ok(self.store.head(&self.key).await?.is_some())
    }

    /// Create an empty index if there is none. Returns whether it was created.
    pub async fn ensure(&self) -> Result<bool, IndexError> {
        if self.exists().await? {
            return Ok(false);
        }
        log::info!("Creating empty index {}", self.key);
        self.store
            .put(&self.key, b"[]".to_vec(), CONTENT_TYPE_JSON)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{index::record::SourceKind, storage::LocalStore};

    const KEY: &str = "metadata/index.json";

    fn store_in(dir: &std::path::Path) -> Arc<dyn ObjectStore> {
        Arc::new(LocalStore::new(dir, "https://cdn.example.com"))
    }

    #[tokio::test]
    async fn missing_index_depends_on_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let lenient = IndexStore::new(store.clone(), KEY, MissingIndexPolicy::Lenient);
        let snapshot = lenient.load().await.unwrap();
        assert!(snapshot.records.is_empty());
        assert!(snapshot.version.is_none());

        let strict = IndexStore::new(store, KEY, MissingIndexPolicy::Strict);
        assert!(matches!(
            strict.load().await,
            Err(IndexError::Uninitialized(_))
        ));

        assert!(strict.ensure().await.unwrap());
        assert!(!strict.ensure().await.unwrap());
        assert!(strict.load().await.unwrap().records.is_empty());
    }

    #[tokio::test]
    async fn corrupt_index_is_an_error_even_when_lenient() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .put(KEY, b"{ not json".to_vec(), CONTENT_TYPE_JSON)
            .await
            .unwrap();

        let index = IndexStore::new(store, KEY, MissingIndexPolicy::Lenient);
        assert!(matches!(index.load().await, Err(IndexError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let index = IndexStore::new(store_in(dir.path()), KEY, MissingIndexPolicy::Lenient);

        let records = vec![
            VideoRecord::new("b", "Second", SourceKind::ChatUpload),
            VideoRecord::new("a", "First", SourceKind::RemoteFetch),
        ];
        let version = index.save(&records, None).await.unwrap();

        let snapshot = index.load().await.unwrap();
        assert_eq!(snapshot.records, records);
        assert_eq!(snapshot.version, version);
    }

    #[tokio::test]
    async fn stale_save_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let index = IndexStore::new(store_in(dir.path()), KEY, MissingIndexPolicy::Lenient);
        index.ensure().await.unwrap();

        let first = index.load().await.unwrap();
        let second = index.load().await.unwrap();

        let mut records = first.records.clone();
        records.push(VideoRecord::new("a", "A", SourceKind::ManualUpload));
        index.save(&records, first.version.as_ref()).await.unwrap();

        let mut records = second.records.clone();
        records.push(VideoRecord::new("b", "B", SourceKind::ManualUpload));
        assert!(matches!(
            index.save(&records, second.version.as_ref()).await,
            Err(IndexError::Conflict)
        ));

        let ids: Vec<_> = index
            .load()
            .await
            .unwrap()
            .records
            .into_iter()
            .map(|r| r.video_id)
            .collect();
        assert_eq!(ids, ["a"]);
    }
}
