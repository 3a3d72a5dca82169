mod status;
pub use status::*;

use std::fmt::Display;

use futures::Future;
use teloxide::{
    net::Download,
    requests::Requester,
    types::{FileMeta, Message, PhotoSize},
    Bot, DownloadError, RequestError,
};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

/// A video attached to a message, either as a proper video
/// or as a document with a `video/*` MIME type.
pub struct MessageVideoInfo<'a> {
    pub file: &'a FileMeta,
    pub file_name: Option<&'a str>,
}

pub trait MessageStuff {
    fn text_full(&self) -> Option<&str>;
    fn get_video_info(&self) -> Option<MessageVideoInfo<'_>>;
    fn find_biggest_photo(&self) -> Option<&PhotoSize>;
}

impl MessageStuff for Message {
    fn text_full(&self) -> Option<&str> {
        self.text().or_else(|| self.caption())
    }

    fn get_video_info(&self) -> Option<MessageVideoInfo<'_>> {
        if let Some(video) = self.video() {
            return Some(MessageVideoInfo {
                file: &video.file,
                file_name: video.file_name.as_deref(),
            });
        }

        if let Some(document) = self.document() {
            let is_video = document
                .mime_type
                .as_ref()
                .is_some_and(|mime| mime.type_() == "video");
            if is_video {
                return Some(MessageVideoInfo {
                    file: &document.file,
                    file_name: document.file_name.as_deref(),
                });
            }
        }

        None
    }

    fn find_biggest_photo(&self) -> Option<&PhotoSize> {
        if let Some(photo_sizes) = self.photo() {
            photo_sizes.iter().max_by_key(|x| x.width + x.height)
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub enum FetchFileError {
    Request(RequestError),
    Download(DownloadError),
    Io(std::io::Error),
}

impl Display for FetchFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request(e) => write!(f, "failed to query the file: {e}"),
            Self::Download(e) => write!(f, "failed to download the file: {e}"),
            Self::Io(e) => write!(f, "failed to write the file to disk: {e}"),
        }
    }
}

impl std::error::Error for FetchFileError {}

pub trait BotStuff {
    fn download_file_to_vec(
        &self,
        file: &FileMeta,
        to: &mut Vec<u8>,
    ) -> impl Future<Output = Result<(), FetchFileError>> + Send;

    /// Download the file into a fresh temporary file with given `suffix`.
    /// The file is deleted once the returned handle is dropped.
    fn download_file_to_temp(
        &self,
        file: &FileMeta,
        suffix: &str,
    ) -> impl Future<Output = Result<NamedTempFile, FetchFileError>> + Send;
}

impl BotStuff for Bot {
    async fn download_file_to_vec(
        &self,
        file: &FileMeta,
        to: &mut Vec<u8>,
    ) -> Result<(), FetchFileError> {
        let file = self
            .get_file(file.id.clone())
            .await
            .map_err(FetchFileError::Request)?;
        to.reserve_exact(file.size as usize);
        self.download_file(&file.path, to)
            .await
            .map_err(FetchFileError::Download)
    }

    async fn download_file_to_temp(
        &self,
        file: &FileMeta,
        suffix: &str,
    ) -> Result<NamedTempFile, FetchFileError> {
        let file = self
            .get_file(file.id.clone())
            .await
            .map_err(FetchFileError::Request)?;

        let temp = tempfile::Builder::new()
            .prefix("tg_")
            .suffix(suffix)
            .tempfile()
            .map_err(FetchFileError::Io)?;

        let mut destination =
            tokio::fs::File::from_std(temp.reopen().map_err(FetchFileError::Io)?);
        self.download_file(&file.path, &mut destination)
            .await
            .map_err(FetchFileError::Download)?;
        destination.flush().await.map_err(FetchFileError::Io)?;

        Ok(temp)
    }
}
