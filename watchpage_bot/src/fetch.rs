//! Getting videos from elsewhere: plain downloads, and third-party hosts
//! that fetch a link on their side.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::retry::{poll_until, retry_with_backoff, PollError, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {0}")]
    Status(u16),
    #[error("download I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("video host error: {0}")]
    Host(String),
    #[error("video host did not finish: {0}")]
    Unfinished(String),
}

/// Streams remote files to disk.
pub struct Downloader {
    client: Client,
    retry: RetryPolicy,
}

impl Downloader {
    pub fn new(retry: RetryPolicy) -> Result<Downloader, FetchError> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; watchpage_bot)")
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(Downloader { client, retry })
    }

    /// Download `url` into a temporary file, retrying transient failures.
    /// The file is deleted when the returned handle is dropped.
    pub async fn download_to_temp(&self, url: &Url) -> Result<NamedTempFile, FetchError> {
        retry_with_backoff(self.retry, &format!("download of {url}"), || {
            self.download_once(url)
        })
        .await
    }

    async fn download_once(&self, url: &Url) -> Result<NamedTempFile, FetchError> {
        let response = self.client.get(url.as_str()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let temp = tempfile::Builder::new()
            .prefix("dl_")
            .suffix(".mp4")
            .tempfile()?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);

        let mut written = 0usize;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        log::debug!("Downloaded {written} bytes from {url}");
        Ok(temp)
    }
}

/// A finished remote upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedFile {
    /// The host's ID of the file. Used as the video's source reference.
    pub file_ref: String,
    /// Where the file can be downloaded from.
    pub download_url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Pending,
    Done(HostedFile),
    Failed(String),
}

/// A video host that can fetch a link by itself ("remote upload").
#[async_trait]
pub trait RemoteHost: Send + Sync {
    /// Start fetching `url`. Returns a job ID.
    async fn submit(&self, url: &Url) -> Result<String, FetchError>;

    async fn status(&self, job: &str) -> Result<RemoteStatus, FetchError>;
}

/// Submit `url` to `host` and wait for it to be done.
pub async fn remote_upload(
    host: &dyn RemoteHost,
    url: &Url,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<HostedFile, FetchError> {
    let job = host.submit(url).await?;
    log::info!("Remote upload of {url} started as job {job}");

    let result = poll_until(interval, timeout, cancel, || async {
        host.status(&job).await.and_then(|status| match status {
            RemoteStatus::Pending => Ok(None),
            RemoteStatus::Done(file) => Ok(Some(file)),
            RemoteStatus::Failed(reason) => Err(FetchError::Host(reason)),
        })
    })
    .await;

    match result {
        Ok(file) => Ok(file),
        Err(PollError::Check(e)) => Err(e),
        Err(e @ (PollError::TimedOut(_) | PollError::Cancelled)) => {
            log::warn!("Remote upload job {job} abandoned: {e}");
            Err(FetchError::Unfinished(e.to_string()))
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    };

    use tokio::{io::AsyncReadExt, net::TcpListener};

    use super::*;

    /// Serves one canned response per connection, in order.
    pub async fn serve(responses: Vec<(u16, &'static [u8])>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = vec![0u8; 4096];
                let _ = socket.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                socket.write_all(head.as_bytes()).await.unwrap();
                socket.write_all(body).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        Url::parse(&format!("http://{address}/video.mp4")).unwrap()
    }

    /// Answers status polls from a script, then stays pending.
    pub struct FakeHost {
        statuses: Mutex<Vec<RemoteStatus>>,
        pub polls: AtomicU32,
    }

    impl FakeHost {
        pub fn new(mut statuses: Vec<RemoteStatus>) -> FakeHost {
            statuses.reverse();
            FakeHost {
                statuses: Mutex::new(statuses),
                polls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteHost for FakeHost {
        async fn submit(&self, _url: &Url) -> Result<String, FetchError> {
            Ok("job-1".to_string())
        }

        async fn status(&self, job: &str) -> Result<RemoteStatus, FetchError> {
            assert_eq!(job, "job-1");
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(RemoteStatus::Pending))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::{fakes::*, *};

    fn quick() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn downloads_after_a_transient_failure() {
        let url = serve(vec![(503, b"busy"), (200, b"video bytes")]).await;
        let downloader = Downloader::new(quick()).unwrap();

        let file = downloader.download_to_temp(&url).await.unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), b"video bytes");

        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn gives_up_on_persistent_errors() {
        let url = serve(vec![(404, b""), (404, b""), (404, b"")]).await;
        let downloader = Downloader::new(quick()).unwrap();
        assert!(matches!(
            downloader.download_to_temp(&url).await,
            Err(FetchError::Status(404))
        ));
    }

    fn hosted() -> HostedFile {
        HostedFile {
            file_ref: "kLmN0pQ".to_string(),
            download_url: Url::parse("https://host.example/dl/kLmN0pQ").unwrap(),
        }
    }

    #[tokio::test]
    async fn waits_for_remote_upload() {
        let host = FakeHost::new(vec![
            RemoteStatus::Pending,
            RemoteStatus::Pending,
            RemoteStatus::Done(hosted()),
        ]);
        let url = Url::parse("https://example.com/v.mp4").unwrap();
        let file = remote_upload(
            &host,
            &url,
            Duration::from_millis(1),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(file, hosted());
        assert_eq!(host.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn remote_failures_and_timeouts() {
        let url = Url::parse("https://example.com/v.mp4").unwrap();

        let host = FakeHost::new(vec![RemoteStatus::Failed("file too big".to_string())]);
        let result = remote_upload(
            &host,
            &url,
            Duration::from_millis(1),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(FetchError::Host(reason)) if reason == "file too big"));

        let host = FakeHost::new(Vec::new());
        let result = remote_upload(
            &host,
            &url,
            Duration::from_millis(2),
            Duration::from_millis(20),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(FetchError::Unfinished(_))));
    }
}
