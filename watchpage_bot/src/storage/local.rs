use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;

use super::{join_public_url, ObjectStore, ObjectVersion, StoreError, StoredObject};

/// Object store backed by a plain directory. Handy for development
/// and for serving the assets with any static file server.
pub struct LocalStore {
    root: PathBuf,
    public_base: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> LocalStore {
        LocalStore {
            root: root.into(),
            public_base: public_base.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let sane = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !sane {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn version_of(data: &[u8]) -> ObjectVersion {
        ObjectVersion(format!("{:08x}", crc32fast::hash(data)))
    }

    /// Write through a sibling temp file, so readers never see half a document.
    async fn write_atomically(path: &Path, data: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(
            ".{file_name}.{}.tmp",
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&temp_path, data).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => {
                let version = Some(Self::version_of(&data));
                Ok(Some(StoredObject { data, version }))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> Result<Option<ObjectVersion>, StoreError> {
        let path = self.path_for(key)?;
        Self::write_atomically(&path, &data).await?;
        Ok(Some(Self::version_of(&data)))
    }

    async fn put_file(
        &self,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> Result<Option<ObjectVersion>, StoreError> {
        let data = tokio::fs::read(source).await?;
        self.put(key, data, content_type).await
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectVersion>, StoreError> {
        Ok(self.get(key).await?.and_then(|object| object.version))
    }

    fn public_url(&self, key: &str) -> String {
        join_public_url(&self.public_base, key)
    }
}
