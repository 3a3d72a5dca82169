//! Rendering watch pages and pushing them to the site repository.

mod github;
mod local;
pub mod safe;
pub mod template;

pub use github::GithubPublisher;
pub use local::LocalPublisher;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::{
    config::{PublisherConfig, SafePageConfig},
    index::VideoRecord,
};

use self::{
    safe::{safe_thumb_url, sanitize_text},
    template::{render, render_gallery, time_ago, video_card, GalleryFields, PageFields},
};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("request to the site repository failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("site repository answered {status}: {message}")]
    Api { status: u16, message: String },
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("template {0} is missing from the site repository")]
    MissingTemplate(String),
    #[error("could not decode {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("site I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file in the site repository, with the revision needed to update it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub content: String,
    pub revision: String,
}

/// A repository of files with revision-checked updates, like a GitHub repo.
#[async_trait]
pub trait PagePublisher: Send + Sync {
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>, PublishError>;

    /// Fails with [`PublishError::AlreadyExists`] if the file is already there.
    async fn create_file(&self, path: &str, message: &str, content: &str)
        -> Result<(), PublishError>;

    async fn update_file(
        &self,
        path: &str,
        message: &str,
        content: &str,
        revision: &str,
    ) -> Result<(), PublishError>;
}

/// The two page templates, loaded once per batch of publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templates {
    pub normal: String,
    pub safe: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPages {
    pub normal_path: String,
    pub safe_path: String,
    pub normal_url: String,
    pub safe_url: String,
}

#[derive(Serialize)]
struct ListingEntry<'a> {
    video_id: &'a str,
    title: String,
    thumb_url: String,
    page_url: String,
    time_ago: String,
}

fn to_json(entries: &[ListingEntry]) -> String {
    serde_json::to_string(entries).unwrap_or_else(|e| {
        log::error!("Failed to serialize video listing: {e}");
        String::from("[]")
    })
}

pub struct Publisher {
    backend: Arc<dyn PagePublisher>,
    pages_dir: String,
    site_url: String,
    template_path: String,
    safe_template_path: String,
    gallery_template_path: String,
    gallery_path: String,
    strip_words: Vec<String>,
}

impl Publisher {
    pub fn new(
        backend: Arc<dyn PagePublisher>,
        config: &PublisherConfig,
        safe_page: &SafePageConfig,
    ) -> Publisher {
        Publisher {
            backend,
            pages_dir: config.pages_dir.trim_matches('/').to_string(),
            site_url: config.site_url.trim_end_matches('/').to_string(),
            template_path: config.template.clone(),
            safe_template_path: config.safe_template.clone(),
            gallery_template_path: config.gallery_template.clone(),
            gallery_path: config.gallery_path.trim_start_matches('/').to_string(),
            strip_words: safe_page.strip_words.clone(),
        }
    }

    /// Repository paths of the normal and the safe page of a video.
    #[must_use]
    pub fn page_paths(&self, video_id: &str) -> (String, String) {
        let prefix = if self.pages_dir.is_empty() {
            String::new()
        } else {
            format!("{}/", self.pages_dir)
        };
        (
            format!("{prefix}{video_id}.html"),
            format!("{prefix}{video_id}_safe.html"),
        )
    }

    #[must_use]
    pub fn page_url(&self, path: &str) -> String {
        format!("{}/{}", self.site_url, path)
    }

    async fn load_template(&self, path: &str) -> Result<String, PublishError> {
        match self.backend.get_file(path).await? {
            Some(file) => Ok(file.content),
            None => Err(PublishError::MissingTemplate(path.to_string())),
        }
    }

    pub async fn load_templates(&self) -> Result<Templates, PublishError> {
        Ok(Templates {
            normal: self.load_template(&self.template_path).await?,
            safe: self.load_template(&self.safe_template_path).await?,
        })
    }

    /// Create the file, or update it if it's already there.
    async fn put_page(&self, path: &str, content: &str, message: &str) -> Result<(), PublishError> {
        if let Some(existing) = self.backend.get_file(path).await? {
            if existing.content == content {
                log::debug!("Page {path} is already up to date");
                return Ok(());
            }
            return self
                .backend
                .update_file(path, message, content, &existing.revision)
                .await;
        }

        match self.backend.create_file(path, message, content).await {
            Err(PublishError::AlreadyExists(_)) => {
                // Someone else created it in the meantime.
                log::warn!("Page {path} appeared while creating it, updating instead");
                let revision = self
                    .backend
                    .get_file(path)
                    .await?
                    .map(|file| file.revision)
                    .ok_or_else(|| PublishError::AlreadyExists(path.to_string()))?;
                self.backend
                    .update_file(path, message, content, &revision)
                    .await
            }
            other => other,
        }
    }

    fn listing_entry<'a>(
        &self,
        record: &'a VideoRecord,
        safe: bool,
        now: DateTime<Utc>,
    ) -> ListingEntry<'a> {
        let (normal_path, safe_path) = self.page_paths(&record.video_id);
        ListingEntry {
            video_id: &record.video_id,
            title: if safe {
                sanitize_text(&record.title, &self.strip_words)
            } else {
                record.title.clone()
            },
            thumb_url: if safe {
                safe_thumb_url(record)
            } else {
                record.thumb_url.clone()
            },
            page_url: self.page_url(if safe { &safe_path } else { &normal_path }),
            time_ago: record
                .created_at
                .map(|at| time_ago(at, now))
                .unwrap_or_default(),
        }
    }

    fn listing(&self, record: &VideoRecord, others: &[VideoRecord], safe: bool) -> String {
        let now = Utc::now();
        let mut entries: Vec<ListingEntry> = others
            .iter()
            .filter(|other| other.video_id != record.video_id)
            .map(|other| self.listing_entry(other, safe, now))
            .collect();
        entries.shuffle(&mut rand::rng());
        to_json(&entries)
    }

    /// Render both pages of `record` and create-or-update them.
    ///
    /// `others` is the rest of the index; it's listed on the pages in random order.
    pub async fn publish(
        &self,
        record: &VideoRecord,
        others: &[VideoRecord],
        templates: &Templates,
    ) -> Result<PublishedPages, PublishError> {
        let (normal_path, safe_path) = self.page_paths(&record.video_id);
        let normal_url = self.page_url(&normal_path);
        let safe_url = self.page_url(&safe_path);
        let posted = record
            .created_at
            .map(|at| time_ago(at, Utc::now()))
            .unwrap_or_default();

        let normal = PageFields {
            video_url: record.video_url.clone(),
            thumb_url: record.thumb_url.clone(),
            player_page_url: normal_url.clone(),
            video_id: record.video_id.clone(),
            title: record.title.clone(),
            description: record.description.clone(),
            time_ago: posted.clone(),
            all_videos_json: self.listing(record, others, false),
        };
        // The safe page is for sharing; it leads to the real one.
        let safe = PageFields {
            video_url: record.video_url.clone(),
            thumb_url: safe_thumb_url(record),
            player_page_url: normal_url.clone(),
            video_id: record.video_id.clone(),
            title: sanitize_text(&record.title, &self.strip_words),
            description: sanitize_text(&record.description, &self.strip_words),
            time_ago: posted,
            all_videos_json: self.listing(record, others, true),
        };

        let message = format!("Publish video {}", record.video_id);
        self.put_page(&normal_path, &render(&templates.normal, &normal), &message)
            .await?;
        self.put_page(&safe_path, &render(&templates.safe, &safe), &message)
            .await?;

        log::info!("Published pages of {}", record.video_id);
        Ok(PublishedPages {
            normal_path,
            safe_path,
            normal_url,
            safe_url,
        })
    }

    /// The gallery template, or [`None`] if the site doesn't have one.
    pub async fn load_gallery_template(&self) -> Result<Option<String>, PublishError> {
        Ok(self
            .backend
            .get_file(&self.gallery_template_path)
            .await?
            .map(|file| file.content))
    }

    /// Render the gallery out of every video that has a page, newest first,
    /// and create-or-update it. Returns its URL.
    pub async fn publish_gallery(
        &self,
        records: &[VideoRecord],
        template: &str,
    ) -> Result<String, PublishError> {
        let now = Utc::now();
        let mut published: Vec<&VideoRecord> = records
            .iter()
            .filter(|record| record.page_url.is_some())
            .collect();
        // Records without a date sort last.
        published.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut video_cards = String::new();
        for record in &published {
            let page_url = record.page_url.as_deref().unwrap_or_default();
            video_cards += &video_card(page_url, &record.thumb_url, &record.title);
        }
        let entries: Vec<ListingEntry> = published
            .iter()
            .map(|record| self.listing_entry(record, false, now))
            .collect();

        let fields = GalleryFields {
            video_count: published.len(),
            video_cards,
            all_videos_json: to_json(&entries),
        };
        let message = format!("Update gallery, {} videos", published.len());
        self.put_page(&self.gallery_path, &render_gallery(template, &fields), &message)
            .await?;

        log::info!("Published the gallery with {} videos", published.len());
        Ok(self.page_url(&self.gallery_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SourceKind;

    fn publisher(dir: &std::path::Path, strip_words: &[&str]) -> (Publisher, Arc<LocalPublisher>) {
        let backend = Arc::new(LocalPublisher::new(dir));
        let config = PublisherConfig {
            site_url: "https://site.example.com/".to_string(),
            ..PublisherConfig::default()
        };
        let safe_page = SafePageConfig {
            strip_words: strip_words.iter().map(|w| w.to_string()).collect(),
        };
        (Publisher::new(backend.clone(), &config, &safe_page), backend)
    }

    fn templates() -> Templates {
        Templates {
            normal: "<title>{{TITLE}}</title><img src=\"{{THUMB_URL}}\"><a href=\"{{PLAYER_PAGE_URL}}\"></a><script>{{ALL_VIDEOS_JSON}}</script>".to_string(),
            safe: "<title>{{TITLE}}</title><img src=\"{{THUMB_URL}}\"><a href=\"{{PLAYER_PAGE_URL}}\"></a><script>{{ALL_VIDEOS_JSON}}</script>".to_string(),
        }
    }

    fn record(id: &str, title: &str) -> VideoRecord {
        let mut record = VideoRecord::new(id, title, SourceKind::ChatUpload);
        record.thumb_url = format!("https://cdn/thumbs/{id}.jpg");
        record.video_url = format!("https://cdn/videos/{id}.mp4");
        record
    }

    #[tokio::test]
    async fn publishes_both_pages() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, backend) = publisher(dir.path(), &["hot"]);
        let target = record("abc", "Hot sunset");
        let others = vec![target.clone(), record("def", "Other hot one")];

        let pages = publisher.publish(&target, &others, &templates()).await.unwrap();
        assert_eq!(pages.normal_path, "v/abc.html");
        assert_eq!(pages.safe_path, "v/abc_safe.html");
        assert_eq!(pages.normal_url, "https://site.example.com/v/abc.html");
        assert_eq!(pages.safe_url, "https://site.example.com/v/abc_safe.html");

        let normal = backend.get_file("v/abc.html").await.unwrap().unwrap().content;
        assert!(normal.contains("<title>Hot sunset</title>"));
        assert!(normal.contains("https://cdn/thumbs/abc.jpg\""));
        assert!(normal.contains("\"video_id\":\"def\""));
        // A page doesn't list itself.
        assert!(!normal.contains("\"video_id\":\"abc\""));

        let safe = backend.get_file("v/abc_safe.html").await.unwrap().unwrap().content;
        assert!(safe.contains("<title>sunset</title>"));
        assert!(safe.contains("https://cdn/thumbs/abc.jpg?blur=10"));
        assert!(safe.contains("href=\"https://site.example.com/v/abc.html\""));
        assert!(safe.contains("\"title\":\"Other one\""));
    }

    #[tokio::test]
    async fn republishing_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, backend) = publisher(dir.path(), &[]);
        let mut target = record("abc", "First title");

        publisher.publish(&target, &[], &templates()).await.unwrap();
        let before = backend.get_file("v/abc.html").await.unwrap().unwrap();

        target.title = "Second title".to_string();
        publisher.publish(&target, &[], &templates()).await.unwrap();
        let after = backend.get_file("v/abc.html").await.unwrap().unwrap();

        assert_ne!(before.revision, after.revision);
        assert!(after.content.contains("Second title"));

        // Same content again is a no-op.
        publisher.publish(&target, &[], &templates()).await.unwrap();
        assert_eq!(
            backend.get_file("v/abc.html").await.unwrap().unwrap(),
            after
        );
    }

    #[tokio::test]
    async fn templates_come_from_the_repository() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, backend) = publisher(dir.path(), &[]);

        assert!(matches!(
            publisher.load_templates().await,
            Err(PublishError::MissingTemplate(path)) if path == "template.html"
        ));

        backend
            .create_file("template.html", "add", "normal {{TITLE}}")
            .await
            .unwrap();
        backend
            .create_file("template_safe.html", "add", "safe {{TITLE}}")
            .await
            .unwrap();
        let templates = publisher.load_templates().await.unwrap();
        assert_eq!(templates.normal, "normal {{TITLE}}");
        assert_eq!(templates.safe, "safe {{TITLE}}");
    }

    #[tokio::test]
    async fn gallery_lists_published_videos_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, backend) = publisher(dir.path(), &[]);
        assert_eq!(publisher.load_gallery_template().await.unwrap(), None);

        backend
            .create_file(
                "template_index.html",
                "add",
                "<h1>{{VIDEO_COUNT}}</h1>{{VIDEO_CARDS}}<script>{{ALL_VIDEOS_JSON}}</script>",
            )
            .await
            .unwrap();
        let template = publisher.load_gallery_template().await.unwrap().unwrap();

        let now = Utc::now();
        let mut old = record("old", "Old one");
        old.created_at = Some(now - chrono::Duration::days(2));
        old.page_url = Some("https://site.example.com/v/old.html".to_string());
        let mut new = record("new", "New & shiny");
        new.created_at = Some(now);
        new.page_url = Some("https://site.example.com/v/new.html".to_string());
        let unpublished = record("draft", "Not yet");

        let url = publisher
            .publish_gallery(&[old, unpublished, new], &template)
            .await
            .unwrap();
        assert_eq!(url, "https://site.example.com/index.html");

        let gallery = backend.get_file("index.html").await.unwrap().unwrap().content;
        assert!(gallery.starts_with("<h1>2</h1>"));
        assert!(gallery.contains("<h3>New &amp; shiny</h3>"));
        assert!(!gallery.contains("draft"));
        let newest = gallery.find("v/new.html").unwrap();
        let oldest = gallery.find("v/old.html").unwrap();
        assert!(newest < oldest);
        assert!(gallery.contains("\"video_id\":\"old\""));
    }

    /// Claims every create lost a race against another writer.
    struct RacingPublisher {
        inner: LocalPublisher,
    }

    #[async_trait]
    impl PagePublisher for RacingPublisher {
        async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>, PublishError> {
            self.inner.get_file(path).await
        }

        async fn create_file(
            &self,
            path: &str,
            message: &str,
            _content: &str,
        ) -> Result<(), PublishError> {
            self.inner.create_file(path, message, "someone else's page").await?;
            Err(PublishError::AlreadyExists(path.to_string()))
        }

        async fn update_file(
            &self,
            path: &str,
            message: &str,
            content: &str,
            revision: &str,
        ) -> Result<(), PublishError> {
            self.inner.update_file(path, message, content, revision).await
        }
    }

    #[tokio::test]
    async fn lost_create_race_falls_back_to_update() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(RacingPublisher {
            inner: LocalPublisher::new(dir.path()),
        });
        let publisher = Publisher::new(
            backend.clone(),
            &PublisherConfig::default(),
            &SafePageConfig::default(),
        );

        publisher
            .publish(&record("abc", "Mine"), &[], &templates())
            .await
            .unwrap();
        let page = backend.get_file("v/abc.html").await.unwrap().unwrap();
        assert!(page.content.contains("<title>Mine</title>"));
    }
}
