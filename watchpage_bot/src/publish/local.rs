use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{PagePublisher, PublishError, RemoteFile};

/// Writes pages into a local directory, e.g. a checkout that something
/// else commits and pushes.
pub struct LocalPublisher {
    root: PathBuf,
}

fn revision_of(content: &str) -> String {
    format!("{:08x}", crc32fast::hash(content.as_bytes()))
}

impl LocalPublisher {
    pub fn new(root: impl Into<PathBuf>) -> LocalPublisher {
        LocalPublisher { root: root.into() }
    }

    fn path_for(&self, path: &str) -> Result<PathBuf, PublishError> {
        let relative = Path::new(path);
        let sane = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !sane {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("refusing to write outside the site: {path:?}"),
            )
            .into());
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl PagePublisher for LocalPublisher {
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>, PublishError> {
        let full_path = self.path_for(path)?;
        match tokio::fs::read_to_string(&full_path).await {
            Ok(content) => Ok(Some(RemoteFile {
                revision: revision_of(&content),
                content,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_file(
        &self,
        path: &str,
        _message: &str,
        content: &str,
    ) -> Result<(), PublishError> {
        let full_path = self.path_for(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(PublishError::AlreadyExists(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn update_file(
        &self,
        path: &str,
        _message: &str,
        content: &str,
        revision: &str,
    ) -> Result<(), PublishError> {
        let Some(current) = self.get_file(path).await? else {
            return Err(PublishError::Api {
                status: 404,
                message: format!("{path} does not exist"),
            });
        };
        if current.revision != revision {
            return Err(PublishError::Api {
                status: 409,
                message: format!("{path} is at {}, not {revision}", current.revision),
            });
        }

        tokio::fs::write(self.path_for(path)?, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_update() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = LocalPublisher::new(dir.path());

        assert!(publisher.get_file("v/a.html").await.unwrap().is_none());
        publisher.create_file("v/a.html", "add", "one").await.unwrap();
        assert!(matches!(
            publisher.create_file("v/a.html", "add", "two").await,
            Err(PublishError::AlreadyExists(_))
        ));

        let file = publisher.get_file("v/a.html").await.unwrap().unwrap();
        assert_eq!(file.content, "one");

        assert!(matches!(
            publisher.update_file("v/a.html", "edit", "two", "stale").await,
            Err(PublishError::Api { status: 409, .. })
        ));
        publisher
            .update_file("v/a.html", "edit", "two", &file.revision)
            .await
            .unwrap();
        assert_eq!(
            publisher.get_file("v/a.html").await.unwrap().unwrap().content,
            "two"
        );
    }

    #[tokio::test]
    async fn stays_inside_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = LocalPublisher::new(dir.path().join("site"));
        assert!(publisher.create_file("../escape.html", "x", "x").await.is_err());
        assert!(publisher.get_file("/etc/passwd").await.is_err());
    }
}
