use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;

use super::{FrameExtractor, MediaError};

/// Seek positions tried in order. Very short clips may not reach the later ones.
const SEEK_POSITIONS: [&str; 4] = ["00:00:00.5", "00:00:01", "00:00:02", "00:00:00"];

/// Scale down to fit 1280x720, then pad with black to exactly that.
const SCALE_AND_PAD: &str = concat!(
    "scale=1280:720:force_original_aspect_ratio=decrease,",
    "pad=1280:720:(ow-iw)/2:(oh-ih)/2:black",
);

/// Grabs frames with the `ffmpeg` binary.
pub struct FfmpegExtractor {
    binary: PathBuf,
    timeout: Duration,
}

impl FfmpegExtractor {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> FfmpegExtractor {
        FfmpegExtractor {
            binary: binary.into(),
            timeout,
        }
    }

    /// One attempt: seek to `seek` (if any), push one frame through `filter`, write a JPEG.
    async fn grab(&self, video: &Path, seek: Option<&str>, filter: &str) -> Result<Vec<u8>, MediaError> {
        let output_file = tempfile::Builder::new()
            .prefix("frame_")
            .suffix(".jpg")
            .tempfile()?;

        let mut command = Command::new(&self.binary);
        command.args(["-y", "-loglevel", "error"]);
        if let Some(seek) = seek {
            command.args(["-ss", seek]);
        }
        command
            .args([OsStr::new("-i"), video.as_os_str()])
            .args(["-frames:v", "1", "-q:v", "2", "-vf", filter])
            .arg(output_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output?,
            Err(_) => return Err(MediaError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::Ffmpeg(stderr.trim().to_string()));
        }

        let frame = tokio::fs::read(output_file.path()).await?;
        if frame.is_empty() {
            // Seeking past the end "succeeds" without writing anything.
            return Err(MediaError::NoFrame);
        }
        Ok(frame)
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract_frame(&self, video: &Path) -> Result<Vec<u8>, MediaError> {
        for seek in SEEK_POSITIONS {
            match self.grab(video, Some(seek), SCALE_AND_PAD).await {
                Ok(frame) => return Ok(frame),
                Err(e) => log::debug!("No frame at {seek} of {}: {e}", video.display()),
            }
        }

        // Let ffmpeg pick a representative frame itself.
        let filter = format!("thumbnail,{SCALE_AND_PAD}");
        match self.grab(video, None, &filter).await {
            Ok(frame) => Ok(frame),
            Err(e) => {
                log::warn!("ffmpeg could not get any frame of {}: {e}", video.display());
                Err(MediaError::NoFrame)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_means_no_frame() {
        let extractor = FfmpegExtractor::new(
            "/nonexistent/definitely-not-ffmpeg",
            Duration::from_secs(5),
        );
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("video.mp4");
        std::fs::write(&video, b"not a video").unwrap();

        assert!(matches!(
            extractor.extract_frame(&video).await,
            Err(MediaError::NoFrame)
        ));
    }
}
