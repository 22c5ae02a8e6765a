pub mod config;

use futures_util::StreamExt;
use reqwest::Url;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};

use super::client::{FetchClient, FetchResponse};
use super::handle::{CancellationToken, DownloadHandle};
use super::progress::ProgressTracker;
use super::{DownloadEvent, DownloadOutcome, State};
use crate::util::{mb, parse_filename};

use self::config::HttpDownloadConfig;

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("File IO operation failed, error: '{0}'")]
    Io(#[from] tokio::io::Error),
    #[error("Request error: '{0}'")]
    Request(#[from] reqwest::Error),
    #[error("Download req did not yield 200, instead: '{0}', body: '{1}'")]
    DownloadNotOk(reqwest::StatusCode, String),
    #[error("Download ended before completion, downloaded bytes: '{0}', content length: '{1}'")]
    StreamEndedBeforeCompletion(u64, u64),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::DownloadNotOk(status, _) => Some(status.as_u16()),
            Error::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<Error> for DownloadOutcome {
    fn from(value: Error) -> Self {
        let status_code = value.status_code();
        let message = match value {
            // the server's explanation is what the user needs to see
            Error::DownloadNotOk(_, body) => body,
            other => other.to_string(),
        };
        DownloadOutcome::Failed {
            status_code,
            message,
        }
    }
}

/// How streaming the body ended when no error occurred
#[derive(Debug, PartialEq, Eq)]
enum Streamed {
    Complete(u64),
    Cancelled(u64),
}

/// A single download attempt of `url` into `directory`.
/// Consumed by [`HttpDownload::start`], every attempt starts from zero.
#[derive(Debug, Clone)]
pub struct HttpDownload {
    pub id: uuid::Uuid,
    pub url: Url,
    pub directory: PathBuf,
    pub config: HttpDownloadConfig,
    client: FetchClient,
}

impl HttpDownload {
    pub fn new(
        url: Url,
        directory: PathBuf,
        client: FetchClient,
        config: Option<HttpDownloadConfig>,
    ) -> Self {
        // If no configuration is passed the default one is copied
        let config = config.unwrap_or_default();
        HttpDownload {
            id: uuid::Uuid::new_v4(),
            url,
            directory,
            config,
            client,
        }
    }

    pub fn start(self) -> DownloadHandle {
        self.start_with(CancellationToken::new())
    }

    /// Spawns the download on the runtime, `cancel` may already be shared with other tasks.
    pub fn start_with(self, cancel: CancellationToken) -> DownloadHandle {
        let (update_ch, events) = mpsc::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(State::Idle);
        let id = self.id;
        log::info!("Starting download {} from {}", id, self.url);
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let outcome = self.run(&cancel, &update_ch, &state_tx).await;
                let _ = update_ch.send(DownloadEvent::Finished(outcome)).await;
            }
        });
        DownloadHandle::new(id, cancel, events, state_rx, task)
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        update_ch: &mpsc::Sender<DownloadEvent>,
        state: &watch::Sender<State>,
    ) -> DownloadOutcome {
        if cancel.is_cancelled() {
            self.transition(state, State::Cancelled);
            return DownloadOutcome::Cancelled;
        }
        self.transition(state, State::Connecting);
        // Covers the handshake and the waits between retries
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::info!("Download {} cancelled while connecting", self.id);
                self.transition(state, State::Cancelled);
                return DownloadOutcome::Cancelled;
            }
            resp = self.client.open_stream(&self.url) => resp,
        };
        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                log::error!("Download {} could not connect: {}", self.id, e);
                self.transition(state, State::Failed);
                return e.into();
            }
        };
        if cancel.is_cancelled() {
            log::info!("Download {} cancelled before any bytes were written", self.id);
            self.transition(state, State::Cancelled);
            return DownloadOutcome::Cancelled;
        }
        let file_path = self.file_path(&resp);
        self.transition(state, State::Streaming);
        match self.progress(resp, &file_path, cancel, update_ch).await {
            Ok(Streamed::Complete(downloaded_bytes)) => {
                log::info!(
                    "Download completed successfully: {}, {:.2}MB",
                    self.url,
                    mb(downloaded_bytes)
                );
                self.transition(state, State::Completed);
                DownloadOutcome::Completed { file_path }
            }
            Ok(Streamed::Cancelled(downloaded_bytes)) => {
                log::info!(
                    "Download {} cancelled after {} bytes",
                    self.id,
                    downloaded_bytes
                );
                if self.config.remove_partial_on_cancel {
                    remove_partial(&file_path).await;
                }
                self.transition(state, State::Cancelled);
                DownloadOutcome::Cancelled
            }
            Err(e) => {
                log::error!("Error encountered while downloading {}, Error: {}", self.id, e);
                remove_partial(&file_path).await;
                self.transition(state, State::Failed);
                e.into()
            }
        }
    }

    fn transition(&self, state: &watch::Sender<State>, next: State) {
        log::debug!("Download {} is now {:?}", self.id, next);
        state.send_replace(next);
    }

    /// Name suggested by the server, then the last url segment, then the configured default.
    fn file_path(&self, resp: &FetchResponse) -> PathBuf {
        let filename = resp
            .filename
            .clone()
            .or_else(|| parse_filename(&self.url).map(str::to_owned))
            .unwrap_or_else(|| self.config.default_filename.clone());
        self.directory.join(filename)
    }

    /// Writes the body to `file_path`. The file handle lives only inside this function
    /// so it is flushed and closed whichever way streaming ends.
    async fn progress(
        &self,
        resp: FetchResponse,
        file_path: &Path,
        cancel: &CancellationToken,
        update_ch: &mpsc::Sender<DownloadEvent>,
    ) -> Result<Streamed> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let mut file_handler = File::create(file_path).await?;
        let streamed = self
            .stream_to_file(resp, &mut file_handler, cancel, update_ch)
            .await;
        let flushed = file_handler.flush().await;
        drop(file_handler);
        let streamed = streamed?;
        flushed?;
        Ok(streamed)
    }

    async fn stream_to_file(
        &self,
        resp: FetchResponse,
        file_handler: &mut File,
        cancel: &CancellationToken,
        update_ch: &mpsc::Sender<DownloadEvent>,
    ) -> Result<Streamed> {
        let content_length = resp.content_length;
        let chunk_size = self.config.effective_chunk_size();
        let mut tracker = ProgressTracker::new(content_length);
        let mut pending: Vec<u8> = Vec::with_capacity(chunk_size * 2);
        let mut stream = resp.response.bytes_stream();
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(Streamed::Cancelled(tracker.bytes_received()));
                }
                item = stream.next() => item,
            };
            let Some(item) = item else {
                break;
            };
            pending.extend_from_slice(&item?);
            let mut offset = 0;
            while pending.len() - offset >= chunk_size {
                if cancel.is_cancelled() {
                    return Ok(Streamed::Cancelled(tracker.bytes_received()));
                }
                let chunk = &pending[offset..offset + chunk_size];
                write_chunk(file_handler, chunk, &mut tracker, update_ch).await?;
                offset += chunk_size;
            }
            pending.drain(..offset);
        }
        if !pending.is_empty() {
            write_chunk(file_handler, &pending, &mut tracker, update_ch).await?;
        }
        let downloaded_bytes = tracker.bytes_received();
        if content_length > 0 && downloaded_bytes < content_length {
            log::error!(
                "Download stream ended before completion, downloaded bytes: {}, content length: {}",
                downloaded_bytes,
                content_length
            );
            return Err(Error::StreamEndedBeforeCompletion(
                downloaded_bytes,
                content_length,
            ));
        }
        Ok(Streamed::Complete(downloaded_bytes))
    }
}

/// Write first, report after, so observers never see bytes that aren't on disk yet.
async fn write_chunk(
    file_handler: &mut File,
    chunk: &[u8],
    tracker: &mut ProgressTracker,
    update_ch: &mpsc::Sender<DownloadEvent>,
) -> Result<()> {
    file_handler.write_all(chunk).await?;
    let progress = tracker.record(chunk.len());
    // Nobody listening is fine, the download keeps going
    let _ = update_ch.send(DownloadEvent::Progress(progress)).await;
    Ok(())
}

async fn remove_partial(file_path: &Path) {
    match tokio::fs::remove_file(file_path).await {
        Ok(()) => log::info!("Removed partial download {}", file_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(
            "Could not remove partial download {}: {}",
            file_path.display(),
            e
        ),
    }
}
