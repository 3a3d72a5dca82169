//! Thumbnails: grabbing a frame out of a video, blurring it and decorating it.

mod ffmpeg;
mod magick;

pub use ffmpeg::FfmpegExtractor;
pub use magick::MagickFilter;

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;

/// Size every thumbnail is scaled and padded to.
pub const THUMB_WIDTH: usize = 1280;
pub const THUMB_HEIGHT: usize = 720;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffmpeg took longer than {0:?}")]
    Timeout(Duration),
    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),
    #[error("could not get a single frame out of the video")]
    NoFrame,
    #[error("image processing failed: {0}")]
    Image(String),
    #[error("image worker died: {0}")]
    Worker(String),
}

impl From<magick_rust::MagickError> for MediaError {
    fn from(e: magick_rust::MagickError) -> Self {
        MediaError::Image(e.to_string())
    }
}

/// Pulls a representative still out of a video file.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Returns a JPEG of [`THUMB_WIDTH`]x[`THUMB_HEIGHT`].
    async fn extract_frame(&self, video: &Path) -> Result<Vec<u8>, MediaError>;
}

/// CPU-bound image operations. Called off the async runtime.
pub trait ImageFilter: Send + Sync {
    fn blur(&self, image: &[u8], sigma: f64) -> Result<Vec<u8>, MediaError>;

    /// Draw `icon` over the middle of `image`.
    fn overlay_icon(&self, image: &[u8], icon: &[u8]) -> Result<Vec<u8>, MediaError>;

    /// Scale and pad an arbitrary image to the thumbnail size.
    fn fit_frame(&self, image: &[u8]) -> Result<Vec<u8>, MediaError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Thumbnails {
    pub thumb: Option<Vec<u8>>,
    /// Blurred version of the thumbnail, for the safe page.
    pub safe: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct ThumbnailSettings {
    pub blur_sigma: f64,
    /// Encoded play icon image, if one is configured.
    pub play_icon: Option<Arc<Vec<u8>>>,
}

/// Derive both thumbnails from one frame. Never fails: a failed overlay
/// leaves the plain frame, a failed blur leaves no safe thumbnail.
pub fn derive_thumbnails(
    filter: &dyn ImageFilter,
    frame: Vec<u8>,
    settings: &ThumbnailSettings,
) -> Thumbnails {
    let decorate = |image: Vec<u8>| match &settings.play_icon {
        Some(icon) => match filter.overlay_icon(&image, icon) {
            Ok(decorated) => decorated,
            Err(e) => {
                log::warn!("Failed to draw play icon, using the plain image: {e}");
                image
            }
        },
        None => image,
    };

    let safe = match filter.blur(&frame, settings.blur_sigma) {
        Ok(blurred) => Some(decorate(blurred)),
        Err(e) => {
            log::warn!("Failed to blur thumbnail: {e}");
            None
        }
    };

    Thumbnails {
        thumb: Some(decorate(frame)),
        safe,
    }
}

/// Make the thumbnails of a video. Failures only cost thumbnails, they
/// are logged and never returned.
pub async fn make_thumbnails(
    extractor: &dyn FrameExtractor,
    filter: Arc<dyn ImageFilter>,
    settings: &ThumbnailSettings,
    video: &Path,
) -> Thumbnails {
    let frame = match extractor.extract_frame(video).await {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("No thumbnail for {}: {e}", video.display());
            return Thumbnails::default();
        }
    };

    let settings = settings.clone();
    match tokio::task::spawn_blocking(move || derive_thumbnails(&*filter, frame, &settings)).await {
        Ok(thumbnails) => thumbnails,
        Err(e) => {
            log::error!("Thumbnail worker panicked: {e}");
            Thumbnails::default()
        }
    }
}

/// Turn a photo sent by an operator into a thumbnail pair.
///
/// Unlike [`make_thumbnails`], failing to read the photo is an error.
pub async fn process_custom_thumbnail(
    filter: Arc<dyn ImageFilter>,
    settings: &ThumbnailSettings,
    image: Vec<u8>,
) -> Result<Thumbnails, MediaError> {
    let settings = settings.clone();
    tokio::task::spawn_blocking(move || {
        let frame = filter.fit_frame(&image)?;
        Ok(derive_thumbnails(&*filter, frame, &settings))
    })
    .await
    .map_err(|e| MediaError::Worker(e.to_string()))?
}


#[cfg(test)]
mod tests {
    use super::{fakes::*, *};

    fn with_icon() -> ThumbnailSettings {
        ThumbnailSettings {
            blur_sigma: 25.0,
            play_icon: Some(Arc::new(b"icon".to_vec())),
        }
    }

    #[tokio::test]
    async fn both_thumbnails_when_everything_works() {
        let thumbs = make_thumbnails(
            &FakeExtractor::working(),
            Arc::new(FakeFilter::default()),
            &with_icon(),
            Path::new("video.mp4"),
        )
        .await;
        assert_eq!(thumbs.thumb.as_deref(), Some(&b"frame+icon"[..]));
        assert_eq!(thumbs.safe.as_deref(), Some(&b"frame+blur+icon"[..]));
    }

    #[tokio::test]
    async fn no_frame_no_thumbnails() {
        let thumbs = make_thumbnails(
            &FakeExtractor::broken(),
            Arc::new(FakeFilter::default()),
            &with_icon(),
            Path::new("video.mp4"),
        )
        .await;
        assert_eq!(thumbs, Thumbnails::default());
    }

    #[test]
    fn failed_steps_degrade() {
        let filter = FakeFilter {
            broken_blur: true,
            broken_overlay: true,
            ..FakeFilter::default()
        };
        let thumbs = derive_thumbnails(&filter, b"frame".to_vec(), &with_icon());
        assert_eq!(thumbs.thumb.as_deref(), Some(&b"frame"[..]));
        assert!(thumbs.safe.is_none());

        let thumbs = derive_thumbnails(
            &FakeFilter::default(),
            b"frame".to_vec(),
            &ThumbnailSettings::default(),
        );
        assert_eq!(thumbs.thumb.as_deref(), Some(&b"frame"[..]));
        assert_eq!(thumbs.safe.as_deref(), Some(&b"frame+blur"[..]));
    }

    #[tokio::test]
    async fn custom_thumbnails_are_fitted_first() {
        let thumbs = process_custom_thumbnail(
            Arc::new(FakeFilter::default()),
            &with_icon(),
            b"photo".to_vec(),
        )
        .await
        .unwrap();
        assert_eq!(thumbs.thumb.as_deref(), Some(&b"photo+fit+icon"[..]));

        let broken = FakeFilter {
            broken_fit: true,
            ..FakeFilter::default()
        };
        assert!(process_custom_thumbnail(Arc::new(broken), &with_icon(), b"x".to_vec())
            .await
            .is_err());
    }
}
