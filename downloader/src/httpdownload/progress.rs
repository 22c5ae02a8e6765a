use std::fmt;

use crate::util::{gb, kb, mb};

const GIGABYTE: u64 = 1024 * 1024 * 1024;

/// Presentation unit of a [`DownloadProgress`], the stored values are always raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    B,
    KB,
    MB,
    GB,
}

impl Unit {
    /// MB unless the download is large enough to be shown in GB.
    pub fn for_total(bytes_total: u64) -> Self {
        if bytes_total >= GIGABYTE {
            Unit::GB
        } else {
            Unit::MB
        }
    }

    pub fn scale(&self, bytes: u64) -> f64 {
        match self {
            Unit::B => bytes as f64,
            Unit::KB => kb(bytes),
            Unit::MB => mb(bytes),
            Unit::GB => gb(bytes),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self {
            Unit::B => "B",
            Unit::KB => "KB",
            Unit::MB => "MB",
            Unit::GB => "GB",
        };
        f.write_str(unit)
    }
}

/// Immutable snapshot of a running download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_received: u64,
    /// 0 when the server didn't announce a content length
    pub bytes_total: u64,
    pub unit: Unit,
}

impl DownloadProgress {
    /// None while the total size is unknown.
    pub fn percent(&self) -> Option<f64> {
        if self.bytes_total == 0 {
            return None;
        }
        let percent = self.bytes_received as f64 / self.bytes_total as f64 * 100.0;
        Some(percent.min(100.0))
    }

    pub fn scaled(&self, bytes: u64) -> f64 {
        self.unit.scale(bytes)
    }
}

impl fmt::Display for DownloadProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let received = self.scaled(self.bytes_received);
        match self.percent() {
            Some(percent) => write!(
                f,
                "{:.2}/{:.2}{} ({:.1}%)",
                received,
                self.scaled(self.bytes_total),
                self.unit,
                percent
            ),
            None => write!(f, "{:.2}{}", received, self.unit),
        }
    }
}

/// Running byte accumulator for one download attempt.
#[derive(Debug)]
pub struct ProgressTracker {
    bytes_received: u64,
    bytes_total: u64,
    unit: Unit,
}

impl ProgressTracker {
    pub fn new(bytes_total: u64) -> Self {
        Self {
            bytes_received: 0,
            bytes_total,
            unit: Unit::for_total(bytes_total),
        }
    }

    /// Must only be called once the chunk is written to disk.
    pub fn record(&mut self, chunk_len: usize) -> DownloadProgress {
        self.bytes_received = self.bytes_received.saturating_add(chunk_len as u64);
        self.snapshot()
    }

    pub fn snapshot(&self) -> DownloadProgress {
        DownloadProgress {
            bytes_received: self.bytes_received,
            bytes_total: self.bytes_total,
            unit: self.unit,
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tracker_accumulates_chunks() {
        let mut tracker = ProgressTracker::new(1000);
        let received: Vec<u64> = (0..8).map(|_| tracker.record(125).bytes_received).collect();
        assert_eq!(received, vec![125, 250, 375, 500, 625, 750, 875, 1000]);
        assert_eq!(tracker.snapshot().percent(), Some(100.0));
    }

    #[test]
    fn percent_is_undefined_without_total() {
        let mut tracker = ProgressTracker::new(0);
        let progress = tracker.record(4096);
        assert_eq!(progress.percent(), None);
        assert_eq!(progress.bytes_received, 4096);
    }

    #[test]
    fn percent_is_clamped() {
        let progress = DownloadProgress {
            bytes_received: 150,
            bytes_total: 100,
            unit: Unit::MB,
        };
        assert_eq!(progress.percent(), Some(100.0));
    }

    #[test]
    fn unit_follows_total_size() {
        assert_eq!(Unit::for_total(0), Unit::MB);
        assert_eq!(Unit::for_total(500 * 1024 * 1024), Unit::MB);
        assert_eq!(Unit::for_total(3 * GIGABYTE), Unit::GB);
        assert_eq!(Unit::MB.scale(2 * 1024 * 1024), 2.0);
        assert_eq!(Unit::KB.scale(2048), 2.0);
    }
}
