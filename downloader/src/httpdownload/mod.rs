use std::fmt;
use std::path::PathBuf;

pub mod client;
pub mod download;
pub mod handle;
pub mod observer;
pub mod progress;

pub use self::client::{FetchClient, FetchConfig};
pub use self::download::{config::HttpDownloadConfig, HttpDownload};
pub use self::handle::{CancellationToken, DownloadHandle};
pub use self::observer::DownloadObserver;
pub use self::progress::{DownloadProgress, ProgressTracker, Unit};

/// Lifecycle of a single download attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Completed | State::Failed | State::Cancelled)
    }
}

/// Terminal result of a download attempt, produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed { file_path: PathBuf },
    Failed {
        /// HTTP status if the server answered at all
        status_code: Option<u16>,
        message: String,
    },
    Cancelled,
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadOutcome::Completed { file_path } => {
                write!(f, "Downloaded update to {}", file_path.display())
            }
            DownloadOutcome::Failed {
                status_code: Some(code),
                message,
            } => write!(f, "Error downloading file. Status code: {}, {}", code, message),
            DownloadOutcome::Failed {
                status_code: None,
                message,
            } => write!(f, "Error downloading file: {}", message),
            DownloadOutcome::Cancelled => f.write_str("Download cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Progress(DownloadProgress),
    /// Always the last event of a download
    Finished(DownloadOutcome),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{TestResponse, TestServer};
    use crate::util::TestResult;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use test_log::test;

    #[derive(Default)]
    struct Recorder {
        progress: Vec<u64>,
        outcomes: Vec<DownloadOutcome>,
    }

    impl DownloadObserver for Recorder {
        fn on_progress(&mut self, progress: &DownloadProgress) {
            self.progress.push(progress.bytes_received);
        }

        fn on_outcome(&mut self, outcome: &DownloadOutcome) {
            self.outcomes.push(outcome.clone());
        }
    }

    #[test(tokio::test)]
    async fn test_download_with_observability() -> TestResult<()> {
        let server = TestServer::start(vec![TestResponse::ok(vec![1u8; 1000])
            .header("Content-Disposition", "inline; filename=app-setup.exe")])
        .await?;
        let tmp_dir = TempDir::new()?;
        let config = HttpDownloadConfig {
            chunk_size: 125,
            ..Default::default()
        };
        let download = HttpDownload::new(
            server.url("/download"),
            tmp_dir.path().to_owned(),
            FetchClient::new(FetchConfig::default())?,
            Some(config),
        );
        let mut recorder = Recorder::default();
        let outcome = download.start().observe(&mut recorder).await;

        let expected = tmp_dir.path().join("app-setup.exe");
        assert_eq!(
            outcome,
            DownloadOutcome::Completed {
                file_path: expected.clone()
            }
        );
        assert_eq!(recorder.progress, (1..=8).map(|i| i * 125).collect::<Vec<u64>>());
        assert_eq!(recorder.outcomes, vec![outcome]);
        assert_eq!(std::fs::read(expected)?.len(), 1000);
        Ok(())
    }

    #[test]
    fn failed_outcome_reads_as_one_line() {
        let outcome = DownloadOutcome::Failed {
            status_code: Some(503),
            message: "maintenance".to_owned(),
        };
        assert_eq!(
            outcome.to_string(),
            "Error downloading file. Status code: 503, maintenance"
        );
        assert!(State::Cancelled.is_terminal());
        assert!(!State::Streaming.is_terminal());
    }
}
