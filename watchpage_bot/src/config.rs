//! Runtime configuration, read once at startup from a TOML file.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "watchpage_bot.toml";
/// Env var overriding [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "WATCHPAGE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bot: BotConfig,
    pub storage: StorageConfig,
    pub publisher: PublisherConfig,
    pub media: MediaConfig,
    pub titles: TitlesConfig,
    pub safe_page: SafePageConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Telegram user IDs allowed to use the bot. Everyone else is ignored.
    pub admins: Vec<u64>,
    /// URL of a self-hosted Bot API server, which lifts the 20MB download limit.
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    S3,
    Local,
}

/// What to do when the index document doesn't exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingIndexPolicy {
    /// Treat it as an empty index.
    #[default]
    Lenient,
    /// Refuse to work until it is created.
    Strict,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Custom endpoint, e.g. `https://<account>.r2.cloudflarestorage.com`.
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

fn default_region() -> String {
    "auto".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Required when `backend = "s3"`.
    pub s3: Option<S3Config>,
    /// Root directory when `backend = "local"`.
    pub local_dir: PathBuf,
    /// Base URL under which stored objects are publicly reachable.
    pub public_url: String,
    pub index_key: String,
    pub missing_index: MissingIndexPolicy,
    pub upload_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: StorageBackend::default(),
            s3: None,
            local_dir: PathBuf::from("bucket"),
            public_url: String::from("http://127.0.0.1:8000"),
            index_key: String::from("metadata/index.json"),
            missing_index: MissingIndexPolicy::default(),
            upload_attempts: 3,
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn upload_retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.upload_attempts,
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherBackend {
    #[default]
    Github,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub backend: PublisherBackend,
    /// `owner/name` of the repository holding the site.
    pub repo: String,
    pub branch: String,
    /// File containing the GitHub token.
    pub token_file: PathBuf,
    /// Root directory when `backend = "local"`.
    pub local_dir: PathBuf,
    /// Directory inside the site the pages go to.
    pub pages_dir: String,
    /// Public base URL of the site, like `https://example.github.io`.
    pub site_url: String,
    pub template: String,
    pub safe_template: String,
    /// Template of the page listing every video. No such file, no gallery.
    pub gallery_template: String,
    /// Where the rendered gallery goes, relative to the site root.
    pub gallery_path: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            backend: PublisherBackend::default(),
            repo: String::new(),
            branch: String::from("main"),
            token_file: PathBuf::from("github_token"),
            local_dir: PathBuf::from("site"),
            pages_dir: String::from("v"),
            site_url: String::from("http://127.0.0.1:8000"),
            template: String::from("template.html"),
            safe_template: String::from("template_safe.html"),
            gallery_template: String::from("template_index.html"),
            gallery_path: String::from("index.html"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub blur_sigma: f64,
    /// Used as the thumbnail when none could be made.
    pub placeholder_thumb_url: String,
    /// Image drawn over the middle of thumbnails.
    pub play_icon: Option<PathBuf>,
    pub ffmpeg: String,
    pub extract_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        MediaConfig {
            blur_sigma: 25.0,
            placeholder_thumb_url: String::from("https://placehold.co/1280x720.jpg?text=Video"),
            play_icon: None,
            ffmpeg: String::from("ffmpeg"),
            extract_timeout_secs: 60,
        }
    }
}

impl MediaConfig {
    #[must_use]
    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TitlesConfig {
    /// Titles to pick from when the operator doesn't give one.
    pub pool: Vec<String>,
}

impl Default for TitlesConfig {
    fn default() -> Self {
        TitlesConfig {
            pool: ["Must Watch", "Trending Now", "Exclusive", "Special Video"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SafePageConfig {
    /// Words removed from the title and description on the safe page. Case-insensitive.
    pub strip_words: Vec<String>,
}

impl Config {
    /// Path of the config file: `$WATCHPAGE_CONFIG`, or [`DEFAULT_CONFIG_PATH`].
    #[must_use]
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
    }

    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.backend == StorageBackend::S3 && self.storage.s3.is_none() {
            return Err(ConfigError::Missing("storage.s3"));
        }
        if self.publisher.backend == PublisherBackend::Github && self.publisher.repo.is_empty() {
            return Err(ConfigError::Missing("publisher.repo"));
        }
        Ok(())
    }
}

/// Read a secret from a file, trimming the trailing newline editors like to add.
pub fn read_secret(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
}
