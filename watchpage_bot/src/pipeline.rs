//! Turning an incoming video into stored assets, an index entry and pages.

use std::{fmt::Display, path::Path, sync::Arc, time::Duration};

use chrono::Utc;
use rand::seq::IndexedRandom;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::{read_secret, Config, ConfigError, PublisherBackend, StorageBackend},
    fetch::{remote_upload, Downloader, FetchError, RemoteHost},
    index::{
        is_duplicate, new_video_id, IndexError, IndexStore, InsertOutcome, RecordEdit,
        ReindexReport, SourceKind, VideoIndex, VideoRecord,
    },
    media::{
        make_thumbnails, process_custom_thumbnail, FfmpegExtractor, FrameExtractor, ImageFilter,
        MagickFilter, MediaError, ThumbnailSettings,
    },
    publish::{
        GithubPublisher, LocalPublisher, PagePublisher, PublishError, PublishedPages, Publisher,
        Templates,
    },
    retry::RetryPolicy,
    settings::{Settings, SettingsError},
    storage::{
        keys, upload_file_with_retry, upload_with_retry, LocalStore, ObjectStore, S3Store,
        StoreError, CONTENT_TYPE_JPEG, CONTENT_TYPE_MP4,
    },
};

const REMOTE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const REMOTE_POLL_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const FALLBACK_TITLE: &str = "Video";

/// Progress messages for whoever asked for the work. Receivers may come and go.
pub type Progress = watch::Sender<String>;

fn report(progress: &Progress, text: &str) {
    progress.send_replace(text.to_string());
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("there is no video {0}")]
    UnknownVideo(String),
    #[error("{0:?} is not a link")]
    BadLink(String),
}

/// How a request ended. Displays as the message shown to the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Published {
        record: VideoRecord,
        pages: PublishedPages,
    },
    Duplicate {
        existing: VideoRecord,
    },
    Failed {
        reason: String,
    },
}

impl From<PipelineError> for Outcome {
    fn from(e: PipelineError) -> Self {
        Outcome::Failed {
            reason: e.to_string(),
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Published { record, pages } => {
                writeln!(f, "Published \"{}\" ({})", record.title, record.video_id)?;
                writeln!(f, "Page: {}", pages.normal_url)?;
                write!(f, "Safe page: {}", pages.safe_url)
            }
            Outcome::Duplicate { existing } => {
                write!(f, "Already published as {}", existing.video_id)?;
                match &existing.page_url {
                    Some(page) => write!(f, ": {page}"),
                    None => write!(f, ", but it has no page yet. /syncpages will make one."),
                }
            }
            Outcome::Failed { reason } => write!(f, "Failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub published: usize,
    pub failed: usize,
    /// Records that had both pages already.
    pub already: usize,
}

impl Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Published {} missing pages, {} failed, {} already had pages.",
            self.published, self.failed, self.already
        )
    }
}

/// What's known about a video before it's processed.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub source_ref: Option<String>,
    pub origin_url: Option<String>,
    /// Picked from the configured pool if not given.
    pub title: Option<String>,
    pub kind: SourceKind,
}

/// Everything the pipeline needs. Built once at startup and shared.
pub struct Context {
    pub config: Config,
    pub store: Arc<dyn ObjectStore>,
    pub index: VideoIndex,
    pub publisher: Publisher,
    pub extractor: Arc<dyn FrameExtractor>,
    pub filter: Arc<dyn ImageFilter>,
    /// Blur comes from [`Settings`] on each use, the rest is fixed.
    pub thumbnails: ThumbnailSettings,
    pub settings: Settings,
    pub downloader: Downloader,
    pub remote_host: Option<Arc<dyn RemoteHost>>,
    /// Cancelled on shutdown, to stop waiting on remote hosts.
    pub cancel: CancellationToken,
}

impl Context {
    pub fn new(
        config: Config,
        store: Arc<dyn ObjectStore>,
        pages: Arc<dyn PagePublisher>,
        extractor: Arc<dyn FrameExtractor>,
        filter: Arc<dyn ImageFilter>,
        play_icon: Option<Vec<u8>>,
    ) -> Result<Context, PipelineError> {
        let index = VideoIndex::new(IndexStore::new(
            store.clone(),
            config.storage.index_key.clone(),
            config.storage.missing_index,
        ));
        let publisher = Publisher::new(pages, &config.publisher, &config.safe_page);
        let thumbnails = ThumbnailSettings {
            blur_sigma: config.media.blur_sigma,
            play_icon: play_icon.map(Arc::new),
        };
        let settings = Settings::new(
            store.clone(),
            config.titles.pool.clone(),
            config.media.blur_sigma,
        );
        let downloader = Downloader::new(RetryPolicy::default())?;

        Ok(Context {
            config,
            store,
            index,
            publisher,
            extractor,
            filter,
            thumbnails,
            settings,
            downloader,
            remote_host: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Build the real backends named by the config.
    pub fn from_config(config: Config) -> Result<Context, PipelineError> {
        let store: Arc<dyn ObjectStore> = match config.storage.backend {
            StorageBackend::S3 => {
                let s3 = config
                    .storage
                    .s3
                    .as_ref()
                    .ok_or(ConfigError::Missing("storage.s3"))?;
                Arc::new(S3Store::new(s3, &config.storage.public_url))
            }
            StorageBackend::Local => Arc::new(LocalStore::new(
                config.storage.local_dir.clone(),
                config.storage.public_url.clone(),
            )),
        };

        let pages: Arc<dyn PagePublisher> = match config.publisher.backend {
            PublisherBackend::Github => {
                let token = read_secret(&config.publisher.token_file)?;
                Arc::new(GithubPublisher::new(
                    config.publisher.repo.clone(),
                    config.publisher.branch.clone(),
                    token,
                )?)
            }
            PublisherBackend::Local => {
                Arc::new(LocalPublisher::new(config.publisher.local_dir.clone()))
            }
        };

        let extractor = Arc::new(FfmpegExtractor::new(
            config.media.ffmpeg.clone(),
            config.media.extract_timeout(),
        ));

        let play_icon = match &config.media.play_icon {
            Some(path) => match std::fs::read(path) {
                Ok(icon) => Some(icon),
                Err(e) => {
                    log::warn!("Could not read play icon {}: {e}", path.display());
                    None
                }
            },
            None => None,
        };

        Context::new(
            config,
            store,
            pages,
            extractor,
            Arc::new(MagickFilter),
            play_icon,
        )
    }

    #[must_use]
    pub fn with_remote_host(mut self, host: Arc<dyn RemoteHost>) -> Context {
        self.remote_host = Some(host);
        self
    }

    async fn pick_title(&self) -> String {
        let titles = self.settings.titles().await.unwrap_or_else(|e| {
            log::warn!("Could not read the title pool, using the configured one: {e}");
            self.config.titles.pool.clone()
        });
        titles
            .choose(&mut rand::rng())
            .cloned()
            .unwrap_or_else(|| FALLBACK_TITLE.to_string())
    }

    async fn thumbnail_settings(&self) -> ThumbnailSettings {
        let blur_sigma = self.settings.blur_sigma().await.unwrap_or_else(|e| {
            log::warn!("Could not read the blur setting, using the configured one: {e}");
            self.config.media.blur_sigma
        });
        ThumbnailSettings {
            blur_sigma,
            ..self.thumbnails.clone()
        }
    }

    /// Render the gallery from the whole index. [`None`] if the site has no
    /// gallery template.
    pub async fn publish_gallery(&self) -> Result<Option<String>, PipelineError> {
        let Some(template) = self.publisher.load_gallery_template().await? else {
            log::debug!("No gallery template, skipping the gallery");
            return Ok(None);
        };
        let records = self.index.snapshot().await?;
        Ok(Some(self.publisher.publish_gallery(&records, &template).await?))
    }

    /// The gallery is secondary, so failing to update it only gets logged.
    async fn refresh_gallery(&self) {
        if let Err(e) = self.publish_gallery().await {
            log::warn!("Could not update the gallery: {e}");
        }
    }

    /// Upload a thumbnail, or fall back to `fallback` if that fails.
    async fn upload_thumb(&self, key: &str, data: Option<Vec<u8>>, fallback: &str) -> String {
        let Some(data) = data else {
            return fallback.to_string();
        };
        let policy = self.config.storage.upload_retry();
        match upload_with_retry(&*self.store, policy, key, &data, CONTENT_TYPE_JPEG).await {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Thumbnail {key} could not be stored: {e}");
                fallback.to_string()
            }
        }
    }

    /// Publish both pages of `record` and remember their links in the index.
    async fn publish_record(
        &self,
        record: &VideoRecord,
        others: &[VideoRecord],
        templates: &Templates,
    ) -> Result<(VideoRecord, PublishedPages), PipelineError> {
        let pages = self.publisher.publish(record, others, templates).await?;
        let edit = RecordEdit {
            page_url: Some(pages.normal_url.clone()),
            safe_page_url: Some(pages.safe_url.clone()),
            ..RecordEdit::default()
        };
        let updated = self
            .index
            .update(&record.video_id, &edit)
            .await?
            .unwrap_or_else(|| record.clone());
        Ok((updated, pages))
    }

    /// Publish a record with fresh templates and listing.
    async fn publish_fresh(
        &self,
        record: &VideoRecord,
    ) -> Result<(VideoRecord, PublishedPages), PipelineError> {
        let templates = self.publisher.load_templates().await?;
        let others = self.index.snapshot().await?;
        self.publish_record(record, &others, &templates).await
    }

    /// Process a video file that is already on disk.
    pub async fn process_upload(
        &self,
        video: &Path,
        request: UploadRequest,
        progress: &Progress,
    ) -> Outcome {
        self.try_process_upload(video, request, progress)
            .await
            .unwrap_or_else(|e| {
                log::error!("Processing {} failed: {e}", video.display());
                e.into()
            })
    }

    async fn try_process_upload(
        &self,
        video: &Path,
        request: UploadRequest,
        progress: &Progress,
    ) -> Result<Outcome, PipelineError> {
        // Early exit only. The insert below is what actually guarantees uniqueness.
        let records = self.index.snapshot().await?;
        if let Some(existing) = is_duplicate(
            &records,
            request.source_ref.as_deref(),
            request.origin_url.as_deref(),
        ) {
            log::info!("Skipping known video, already indexed as {}", existing.video_id);
            return Ok(Outcome::Duplicate {
                existing: existing.clone(),
            });
        }
        drop(records);

        let video_id = new_video_id();
        log::info!("Processing {} as video {video_id}", video.display());

        report(progress, "Making thumbnails...");
        let settings = self.thumbnail_settings().await;
        let thumbs = make_thumbnails(&*self.extractor, self.filter.clone(), &settings, video).await;

        report(progress, "Uploading video...");
        let video_url = upload_file_with_retry(
            &*self.store,
            self.config.storage.upload_retry(),
            &keys::video(&video_id),
            video,
            CONTENT_TYPE_MP4,
        )
        .await?;

        report(progress, "Uploading thumbnails...");
        let placeholder = self.config.media.placeholder_thumb_url.clone();
        let thumb_url = self
            .upload_thumb(&keys::thumb(&video_id), thumbs.thumb, &placeholder)
            .await;
        let safe_thumb_url = self
            .upload_thumb(&keys::safe_thumb(&video_id), thumbs.safe, "")
            .await;

        let title = match request.title.filter(|t| !t.trim().is_empty()) {
            Some(title) => title,
            None => self.pick_title().await,
        };
        let mut record = VideoRecord::new(video_id, title, request.kind);
        record.video_url = video_url;
        record.thumb_url = thumb_url;
        record.safe_thumb_url = safe_thumb_url;
        record.source_ref = request.source_ref;
        record.origin_url = request.origin_url;
        record.created_at = Some(Utc::now());

        report(progress, "Indexing...");
        if let InsertOutcome::Duplicate(existing) = self.index.insert(record.clone()).await? {
            log::warn!(
                "Video {} lost the race to {}, its assets are orphaned",
                record.video_id,
                existing.video_id
            );
            return Ok(Outcome::Duplicate { existing });
        }

        report(progress, "Publishing pages...");
        match self.publish_fresh(&record).await {
            Ok((record, pages)) => {
                self.refresh_gallery().await;
                Ok(Outcome::Published { record, pages })
            }
            Err(e) => {
                log::error!("Publishing {} failed: {e}", record.video_id);
                Ok(Outcome::Failed {
                    reason: format!(
                        "video {} is indexed, but publishing its pages failed: {e}. /syncpages will retry.",
                        record.video_id
                    ),
                })
            }
        }
    }

    /// Process a video behind a link: via the remote host if there is one,
    /// otherwise by downloading it.
    pub async fn process_link(
        &self,
        link: &str,
        title: Option<String>,
        progress: &Progress,
    ) -> Outcome {
        self.try_process_link(link, title, progress)
            .await
            .unwrap_or_else(|e| {
                log::error!("Processing link {link} failed: {e}");
                e.into()
            })
    }

    async fn try_process_link(
        &self,
        link: &str,
        title: Option<String>,
        progress: &Progress,
    ) -> Result<Outcome, PipelineError> {
        let url = Url::parse(link.trim()).map_err(|_| PipelineError::BadLink(link.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipelineError::BadLink(link.to_string()));
        }

        let records = self.index.snapshot().await?;
        if let Some(existing) = is_duplicate(&records, None, Some(url.as_str())) {
            return Ok(Outcome::Duplicate {
                existing: existing.clone(),
            });
        }
        drop(records);

        let (download_url, source_ref) = match &self.remote_host {
            Some(host) => {
                report(progress, "Waiting for the video host...");
                let hosted = remote_upload(
                    &**host,
                    &url,
                    REMOTE_POLL_INTERVAL,
                    REMOTE_POLL_TIMEOUT,
                    &self.cancel,
                )
                .await?;
                (hosted.download_url, Some(hosted.file_ref))
            }
            None => (url.clone(), None),
        };

        report(progress, "Downloading...");
        let video = self.downloader.download_to_temp(&download_url).await?;

        let request = UploadRequest {
            source_ref,
            origin_url: Some(url.to_string()),
            title,
            kind: SourceKind::RemoteFetch,
        };
        self.try_process_upload(video.path(), request, progress)
            .await
    }

    /// Replace the thumbnails of a video with a photo, and re-publish it.
    pub async fn replace_thumbnail(
        &self,
        video_id: &str,
        image: Vec<u8>,
        progress: &Progress,
    ) -> Outcome {
        self.try_replace_thumbnail(video_id, image, progress)
            .await
            .unwrap_or_else(|e| {
                log::error!("Replacing thumbnail of {video_id} failed: {e}");
                e.into()
            })
    }

    async fn try_replace_thumbnail(
        &self,
        video_id: &str,
        image: Vec<u8>,
        progress: &Progress,
    ) -> Result<Outcome, PipelineError> {
        if self.index.get(video_id).await?.is_none() {
            return Err(PipelineError::UnknownVideo(video_id.to_string()));
        }

        report(progress, "Processing thumbnail...");
        let settings = self.thumbnail_settings().await;
        let thumbs = process_custom_thumbnail(self.filter.clone(), &settings, image).await?;

        report(progress, "Uploading thumbnails...");
        let policy = self.config.storage.upload_retry();
        // Same keys as before, so make caches notice.
        let version = Utc::now().timestamp();
        let mut edit = RecordEdit::default();
        if let Some(thumb) = thumbs.thumb {
            let url = upload_with_retry(
                &*self.store,
                policy,
                &keys::thumb(video_id),
                &thumb,
                CONTENT_TYPE_JPEG,
            )
            .await?;
            edit.thumb_url = Some(format!("{url}?v={version}"));
        }
        if let Some(safe) = thumbs.safe {
            let url = upload_with_retry(
                &*self.store,
                policy,
                &keys::safe_thumb(video_id),
                &safe,
                CONTENT_TYPE_JPEG,
            )
            .await?;
            edit.safe_thumb_url = Some(format!("{url}?v={version}"));
        } else {
            // The old blurred frame no longer matches, so let pages blur the new thumbnail.
            edit.safe_thumb_url = Some(String::new());
        }

        self.edit_and_republish(video_id, &edit, progress).await
    }

    /// Give a video a new title, and re-publish it.
    pub async fn retitle(&self, video_id: &str, title: &str, progress: &Progress) -> Outcome {
        let edit = RecordEdit {
            title: Some(title.trim().to_string()),
            ..RecordEdit::default()
        };
        self.edit_and_republish(video_id, &edit, progress)
            .await
            .unwrap_or_else(|e| {
                log::error!("Retitling {video_id} failed: {e}");
                e.into()
            })
    }

    async fn edit_and_republish(
        &self,
        video_id: &str,
        edit: &RecordEdit,
        progress: &Progress,
    ) -> Result<Outcome, PipelineError> {
        let Some(record) = self.index.update(video_id, edit).await? else {
            return Err(PipelineError::UnknownVideo(video_id.to_string()));
        };

        report(progress, "Publishing pages...");
        let (record, pages) = self.publish_fresh(&record).await?;
        self.refresh_gallery().await;
        Ok(Outcome::Published { record, pages })
    }

    /// Publish pages for every record that lacks one. Safe to run repeatedly.
    pub async fn sync_missing_pages(&self, progress: &Progress) -> Result<SyncReport, PipelineError> {
        let records = self.index.snapshot().await?;
        let missing: Vec<&VideoRecord> = records
            .iter()
            .filter(|r| r.page_url.is_none() || r.safe_page_url.is_none())
            .collect();

        let mut report_so_far = SyncReport {
            already: records.len() - missing.len(),
            ..SyncReport::default()
        };
        if missing.is_empty() {
            return Ok(report_so_far);
        }

        let templates = self.publisher.load_templates().await?;
        let total = missing.len();
        for (done, record) in missing.into_iter().enumerate() {
            report(progress, &format!("Publishing {} of {total}...", done + 1));
            match self.publish_record(record, &records, &templates).await {
                Ok(_) => report_so_far.published += 1,
                Err(e) => {
                    log::warn!("Sync: publishing {} failed: {e}", record.video_id);
                    report_so_far.failed += 1;
                }
            }
        }

        if report_so_far.published > 0 {
            self.refresh_gallery().await;
        }
        log::info!("Sync done: {report_so_far:?}");
        Ok(report_so_far)
    }

    pub async fn reindex(&self) -> Result<ReindexReport, PipelineError> {
        Ok(self.index.reindex().await?)
    }

    /// Number of indexed videos.
    pub async fn stats(&self) -> Result<usize, PipelineError> {
        Ok(self.index.snapshot().await?.len())
    }
}
