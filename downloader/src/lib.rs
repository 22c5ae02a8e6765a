pub mod httpdownload;
pub mod util;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use httpdownload::{
    CancellationToken, DownloadEvent, DownloadHandle, DownloadObserver, DownloadOutcome,
    DownloadProgress, FetchClient, FetchConfig, HttpDownload, HttpDownloadConfig, State, Unit,
};
pub use reqwest::Url;
