use super::{DownloadOutcome, DownloadProgress};

/// Receives the events of one download, implemented by whatever presents progress.
/// Called from the task that observes the [`DownloadHandle`](super::DownloadHandle),
/// never from the download task itself.
pub trait DownloadObserver {
    fn on_progress(&mut self, progress: &DownloadProgress);
    fn on_outcome(&mut self, outcome: &DownloadOutcome);
}

impl DownloadObserver for () {
    fn on_progress(&mut self, _progress: &DownloadProgress) {}
    fn on_outcome(&mut self, _outcome: &DownloadOutcome) {}
}
