//! Settings operators change from the chat, kept in the object store next to
//! the index so they survive restarts. The config file only gives the
//! starting values.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::storage::{keys, ObjectStore, StoreError, CONTENT_TYPE_JSON};

pub const MIN_BLUR_SIGMA: f64 = 1.0;
pub const MAX_BLUR_SIGMA: f64 = 100.0;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{key} is not valid: {source}")]
    Corrupt {
        key: &'static str,
        source: serde_json::Error,
    },
    #[error("could not serialize settings: {0}")]
    Serialize(serde_json::Error),
    #[error("a title can't be empty")]
    EmptyTitle,
    #[error("\"{0}\" is already in the pool")]
    TitleExists(String),
    #[error("there is no title number {0}")]
    NoSuchTitle(usize),
    #[error("the pool needs at least one title")]
    LastTitle,
    #[error("blur has to be between 1 and 100")]
    BlurOutOfRange,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlurSetting {
    radius: f64,
}

pub struct Settings {
    store: Arc<dyn ObjectStore>,
    default_titles: Vec<String>,
    default_blur: f64,
    /// Held across read-modify-write of the title pool.
    lock: Mutex<()>,
}

impl Settings {
    pub fn new(store: Arc<dyn ObjectStore>, default_titles: Vec<String>, default_blur: f64) -> Settings {
        Settings {
            store,
            default_titles,
            default_blur,
            lock: Mutex::new(()),
        }
    }

    async fn read<T: DeserializeOwned>(&self, key: &'static str) -> Result<Option<T>, SettingsError> {
        let Some(object) = self.store.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&object.data)
            .map(Some)
            .map_err(|source| SettingsError::Corrupt { key, source })
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SettingsError> {
        let data = serde_json::to_vec_pretty(value).map_err(SettingsError::Serialize)?;
        self.store.put(key, data, CONTENT_TYPE_JSON).await?;
        Ok(())
    }

    /// The title pool, or the configured one until it was first changed.
    pub async fn titles(&self) -> Result<Vec<String>, SettingsError> {
        Ok(self
            .read(keys::TITLES)
            .await?
            .unwrap_or_else(|| self.default_titles.clone()))
    }

    /// Returns the pool with the new title in it.
    pub async fn add_title(&self, title: &str) -> Result<Vec<String>, SettingsError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SettingsError::EmptyTitle);
        }

        let _guard = self.lock.lock().await;
        let mut titles = self.titles().await?;
        if titles.iter().any(|existing| existing == title) {
            return Err(SettingsError::TitleExists(title.to_string()));
        }
        titles.push(title.to_string());
        self.write(keys::TITLES, &titles).await?;

        log::info!("Added title {title:?}, {} in the pool", titles.len());
        Ok(titles)
    }

    /// Remove the title at a 1-based `position`, or the last one. The last
    /// remaining title can't be removed.
    pub async fn remove_title(&self, position: Option<usize>) -> Result<String, SettingsError> {
        let _guard = self.lock.lock().await;
        let mut titles = self.titles().await?;
        if titles.len() <= 1 {
            return Err(SettingsError::LastTitle);
        }

        let index = match position {
            Some(n) if (1..=titles.len()).contains(&n) => n - 1,
            Some(n) => return Err(SettingsError::NoSuchTitle(n)),
            None => titles.len() - 1,
        };
        let removed = titles.remove(index);
        self.write(keys::TITLES, &titles).await?;

        log::info!("Removed title {removed:?}, {} left", titles.len());
        Ok(removed)
    }

    /// Blur sigma of safe thumbnails.
    pub async fn blur_sigma(&self) -> Result<f64, SettingsError> {
        Ok(self
            .read::<BlurSetting>(keys::BLUR)
            .await?
            .map_or(self.default_blur, |blur| blur.radius))
    }

    pub async fn set_blur_sigma(&self, sigma: f64) -> Result<(), SettingsError> {
        // NaN isn't in any range, so it's refused too.
        if !(MIN_BLUR_SIGMA..=MAX_BLUR_SIGMA).contains(&sigma) {
            return Err(SettingsError::BlurOutOfRange);
        }
        self.write(keys::BLUR, &BlurSetting { radius: sigma }).await?;
        log::info!("Blur set to {sigma}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;

    fn settings(dir: &std::path::Path) -> (Settings, Arc<LocalStore>) {
        let store = Arc::new(LocalStore::new(dir, "https://cdn.example.com"));
        let defaults = vec!["Must Watch".to_string(), "Exclusive".to_string()];
        (Settings::new(store.clone(), defaults, 25.0), store)
    }

    #[tokio::test]
    async fn titles_start_from_config_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, store) = settings(dir.path());
        assert_eq!(settings.titles().await.unwrap(), ["Must Watch", "Exclusive"]);
        assert!(store.get(keys::TITLES).await.unwrap().is_none());

        let titles = settings.add_title("  Fresh one ").await.unwrap();
        assert_eq!(titles, ["Must Watch", "Exclusive", "Fresh one"]);
        assert!(matches!(
            settings.add_title("Exclusive").await,
            Err(SettingsError::TitleExists(t)) if t == "Exclusive"
        ));
        assert!(matches!(settings.add_title("   ").await, Err(SettingsError::EmptyTitle)));

        // Another instance over the same store sees the change.
        let reopened = Settings::new(store, Vec::new(), 25.0);
        assert_eq!(reopened.titles().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn removing_titles_keeps_one() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, _) = settings(dir.path());
        settings.add_title("Third").await.unwrap();

        assert!(matches!(
            settings.remove_title(Some(4)).await,
            Err(SettingsError::NoSuchTitle(4))
        ));
        assert!(matches!(
            settings.remove_title(Some(0)).await,
            Err(SettingsError::NoSuchTitle(0))
        ));
        assert_eq!(settings.remove_title(Some(1)).await.unwrap(), "Must Watch");
        assert_eq!(settings.remove_title(None).await.unwrap(), "Third");
        assert!(matches!(settings.remove_title(None).await, Err(SettingsError::LastTitle)));
        assert_eq!(settings.titles().await.unwrap(), ["Exclusive"]);
    }

    #[tokio::test]
    async fn blur_is_validated_and_stored_as_radius() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, store) = settings(dir.path());
        assert_eq!(settings.blur_sigma().await.unwrap(), 25.0);

        for bad in [0.0, 100.5, f64::NAN] {
            assert!(matches!(
                settings.set_blur_sigma(bad).await,
                Err(SettingsError::BlurOutOfRange)
            ));
        }
        settings.set_blur_sigma(40.0).await.unwrap();
        assert_eq!(settings.blur_sigma().await.unwrap(), 40.0);

        let stored = store.get(keys::BLUR).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&stored.data).unwrap();
        assert_eq!(value, serde_json::json!({ "radius": 40.0 }));
    }

    #[tokio::test]
    async fn damaged_settings_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, store) = settings(dir.path());
        store
            .put(keys::TITLES, b"not json".to_vec(), CONTENT_TYPE_JSON)
            .await
            .unwrap();
        assert!(matches!(
            settings.titles().await,
            Err(SettingsError::Corrupt { key, .. }) if key == keys::TITLES
        ));

        // Written by hand with an integer radius.
        store
            .put(keys::BLUR, br#"{"radius": 30}"#.to_vec(), CONTENT_TYPE_JSON)
            .await
            .unwrap();
        assert_eq!(settings.blur_sigma().await.unwrap(), 30.0);
    }
}
