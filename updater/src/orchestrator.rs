use std::path::{Path, PathBuf};
use std::sync::Arc;

use downloader::httpdownload::download;
use downloader::{
    CancellationToken, DownloadObserver, DownloadOutcome, FetchClient, FetchConfig, HttpDownload,
    HttpDownloadConfig,
};

use crate::platform::{Launcher, SystemLauncher};
use crate::reaper::{self, ProcessTable, SystemProcessTable};
use crate::settings::{self, UpdateRequest};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] settings::Error),
    #[error("Could not set up the HTTP client: {0}")]
    Client(#[from] download::Error),
    #[error("{0}")]
    Download(DownloadOutcome),
    #[error("Could not launch installer '{}': {1}", .0.display())]
    Launch(PathBuf, std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Longest cause printed on stderr, the log keeps the full text
const MAX_CAUSE_CHARS: usize = 200;

impl Error {
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// The error on a single line, error pages sent by the server get squashed and cut.
    pub fn summary(&self) -> String {
        let text = self.to_string();
        let mut line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if let Some((cut, _)) = line.char_indices().nth(MAX_CAUSE_CHARS) {
            line.truncate(cut);
            line.push_str("...");
        }
        line
    }

    /// HTTP status of a failed download, if the server answered at all
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Download(DownloadOutcome::Failed { status_code, .. }) => *status_code,
            _ => None,
        }
    }
}

/// How an update ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The installer at this path was started
    Launched(PathBuf),
    /// The download directory was opened instead of running the installer
    Revealed(PathBuf),
    Cancelled,
}

/// Exit code of the process for the result of [`Updater::run`]. Failures are reported on
/// stderr as a single line.
pub fn conclude(result: Result<UpdateStatus>) -> i32 {
    match result {
        Ok(status) => {
            log::info!("Update finished: {:?}", status);
            0
        }
        Err(e) => {
            log::error!("Update failed: {}", e);
            eprintln!("{}", e.summary());
            e.exit_code()
        }
    }
}

/// Drives one update: close the caller, download the installer, hand over to it.
pub struct Updater {
    request: UpdateRequest,
    fetch_config: FetchConfig,
    download_config: HttpDownloadConfig,
    launcher: Arc<dyn Launcher>,
    processes: Arc<dyn ProcessTable>,
}

impl Updater {
    pub fn new(request: UpdateRequest) -> Self {
        Self {
            request,
            fetch_config: FetchConfig::default(),
            download_config: HttpDownloadConfig::default(),
            launcher: Arc::new(SystemLauncher),
            processes: Arc::new(SystemProcessTable),
        }
    }

    pub fn with_fetch_config(mut self, config: FetchConfig) -> Self {
        self.fetch_config = config;
        self
    }

    pub fn with_download_config(mut self, config: HttpDownloadConfig) -> Self {
        self.download_config = config;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_process_table(mut self, processes: Arc<dyn ProcessTable>) -> Self {
        self.processes = processes;
        self
    }

    pub fn request(&self) -> &UpdateRequest {
        &self.request
    }

    /// Runs the update once. `cancel` may be triggered from any task while the
    /// download is in flight, a cancelled update is not an error.
    pub async fn run(
        &self,
        observer: &mut dyn DownloadObserver,
        cancel: CancellationToken,
    ) -> Result<UpdateStatus> {
        let url = self.request.validate()?;
        log::info!(
            "Updating {} from version {}",
            self.request.software_name,
            self.request.current_version
        );
        // The download doesn't wait for the caller to be gone
        let _reaper = reaper::spawn_reaper(
            self.processes.clone(),
            self.request.calling_pid,
            self.request.software_name.clone(),
        );
        let client = FetchClient::new(self.fetch_config.clone())?;
        let download = HttpDownload::new(
            url,
            self.request.download_directory.clone(),
            client,
            Some(self.download_config.clone()),
        );
        match download.start_with(cancel).observe(observer).await {
            DownloadOutcome::Completed { file_path } => self.after_download(file_path),
            DownloadOutcome::Cancelled => {
                log::info!("Update cancelled by the user");
                Ok(UpdateStatus::Cancelled)
            }
            failed => Err(Error::Download(failed)),
        }
    }

    fn after_download(&self, file_path: PathBuf) -> Result<UpdateStatus> {
        if self.request.run_after_download {
            log::info!("Running installer {}", file_path.display());
            self.launcher
                .launch_installer(
                    &file_path,
                    self.request.installer_flags.as_deref(),
                    self.request.run_as_admin,
                )
                .map_err(|e| Error::Launch(file_path.clone(), e))?;
            return Ok(UpdateStatus::Launched(file_path));
        }
        let directory = file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.request.download_directory.clone());
        log::info!("Opening download directory {}", directory.display());
        if let Err(e) = self.launcher.reveal_directory(&directory) {
            log::warn!("Could not open {}: {}", directory.display(), e);
        }
        Ok(UpdateStatus::Revealed(directory))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn download_failure_reads_like_the_outcome() {
        let err = Error::Download(DownloadOutcome::Failed {
            status_code: Some(503),
            message: "maintenance".to_owned(),
        });
        assert_eq!(err.to_string(), "Error downloading file. Status code: 503, maintenance");
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn error_pages_are_summarized_on_one_line() {
        let page = format!(
            "<html>\n  <head><title>502 Bad Gateway</title></head>\n  <body>{}</body>\n</html>\n",
            "x".repeat(500)
        );
        let err = Error::Download(DownloadOutcome::Failed {
            status_code: Some(502),
            message: page,
        });
        let summary = err.summary();
        assert!(!summary.contains('\n'), "{}", summary);
        assert!(summary.starts_with(
            "Error downloading file. Status code: 502, <html> <head><title>502 Bad Gateway</title></head>"
        ));
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), MAX_CAUSE_CHARS + 3);
        assert!(err.to_string().contains("</html>"), "full text stays in the error");

        let short = Error::Config(settings::Error::MissingDownloadUrl);
        assert_eq!(short.summary(), "You must pass a URL for the download!");
    }

    #[test]
    fn conclude_maps_to_exit_codes() {
        assert_eq!(conclude(Ok(UpdateStatus::Cancelled)), 0);
        assert_eq!(
            conclude(Ok(UpdateStatus::Launched(PathBuf::from("/tmp/u/setup.exe")))),
            0
        );
        assert_eq!(
            conclude(Err(Error::Config(settings::Error::MissingDownloadUrl))),
            1
        );
    }
}
