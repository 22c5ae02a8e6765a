use std::time::{Duration, Instant};

use downloader::util::HALF_SECOND;
use downloader::{DownloadObserver, DownloadOutcome, DownloadProgress};
use indicatif::{ProgressBar, ProgressStyle};

use crate::settings::UpdateRequest;

const PB_STYLE: &str =
    "{msg}\n{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const SPINNER_STYLE: &str = "{msg}\n{spinner:.blue} [{elapsed_precise}] {bytes} ({bytes_per_sec})";
const PB_CHARS: &str = "█▓▒░  ";

/// Default log filter for a run. Headless runs report through the log at info level,
/// interactive ones keep it quiet so lines don't tear through the progress bar.
pub fn default_log_level(request: &UpdateRequest) -> &'static str {
    if request.headless {
        "info"
    } else {
        "warn"
    }
}

/// Headless presentation, progress goes to the log at most every `interval`.
pub struct LogObserver {
    interval: Duration,
    last_update: Option<Instant>,
}

impl LogObserver {
    pub fn new() -> Self {
        Self::with_interval(HALF_SECOND)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_update: None,
        }
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadObserver for LogObserver {
    fn on_progress(&mut self, progress: &DownloadProgress) {
        let finished = progress.bytes_total > 0 && progress.bytes_received >= progress.bytes_total;
        let due = self
            .last_update
            .map(|last| last.elapsed() >= self.interval)
            .unwrap_or(true);
        if due || finished {
            log::info!("Downloaded {}", progress);
            self.last_update = Some(Instant::now());
        }
    }

    fn on_outcome(&mut self, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::Failed { .. } => log::error!("{}", outcome),
            _ => log::info!("{}", outcome),
        }
    }
}

/// Interactive presentation: a progress bar on the terminal.
pub struct TerminalObserver {
    pb: ProgressBar,
    has_length: bool,
}

impl TerminalObserver {
    pub fn new(software_name: &str, current_version: &str) -> Self {
        let pb = ProgressBar::no_length();
        if let Ok(style) = ProgressStyle::with_template(SPINNER_STYLE) {
            pb.set_style(style);
        }
        let name = if software_name.is_empty() {
            "application"
        } else {
            software_name
        };
        let version = if current_version.is_empty() {
            String::new()
        } else {
            format!(" (v{})", current_version)
        };
        pb.set_message(format!("Updating {}{}... press Ctrl-C to cancel", name, version));
        pb.enable_steady_tick(Duration::from_millis(100));
        Self {
            pb,
            has_length: false,
        }
    }
}

impl DownloadObserver for TerminalObserver {
    fn on_progress(&mut self, progress: &DownloadProgress) {
        if !self.has_length && progress.bytes_total > 0 {
            self.pb.set_length(progress.bytes_total);
            if let Ok(style) = ProgressStyle::with_template(PB_STYLE) {
                self.pb.set_style(style.progress_chars(PB_CHARS));
            }
            self.has_length = true;
        }
        self.pb.set_position(progress.bytes_received);
    }

    fn on_outcome(&mut self, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::Completed { .. } => {
                self.pb.finish_with_message("Downloaded update successfully!")
            }
            DownloadOutcome::Failed { .. } => self.pb.abandon_with_message(outcome.to_string()),
            DownloadOutcome::Cancelled => self.pb.abandon_with_message("Update cancelled"),
        }
    }
}
