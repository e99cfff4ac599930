use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::prefecture::Prefecture;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArchiveYear {
    Known(String),
    Unknown,
}

impl ArchiveYear {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.len() == 4 && value.chars().all(|ch| ch.is_ascii_digit()) {
            ArchiveYear::Known(value.to_string())
        } else {
            ArchiveYear::Unknown
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ArchiveYear::Known(year) => year,
            ArchiveYear::Unknown => "unknown_year",
        }
    }
}

impl fmt::Display for ArchiveYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the region of an archive comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionToken {
    /// Two-digit index embedded in the file name.
    Index(String),
    /// Human-readable label taken from the listing row that was clicked.
    Label(String),
    Missing,
}

/// A completed archive on disk together with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    pub location: Utf8PathBuf,
    pub raw_name: String,
    pub year: ArchiveYear,
    pub prefecture: Prefecture,
}

impl ArchiveFile {
    pub fn is_fully_classified(&self) -> bool {
        self.year != ArchiveYear::Unknown && !self.prefecture.is_unknown()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOptions {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_size_stability")]
    pub size_stability_required: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            size_stability_required: default_size_stability(),
        }
    }
}

fn default_max_attempts() -> u32 {
    20
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_size_stability() -> bool {
    true
}

/// One expected transfer, created right before the click that triggers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDownload {
    pub expected_file_name: Option<String>,
    pub target_directory: Utf8PathBuf,
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub size_stability_required: bool,
    /// Archives already in the directory before the click; never taken as the new download.
    pub preexisting: BTreeSet<String>,
}

impl PendingDownload {
    pub fn new(
        target_directory: &Utf8Path,
        expected_file_name: Option<String>,
        options: &WatchOptions,
    ) -> Self {
        Self {
            expected_file_name,
            target_directory: target_directory.to_path_buf(),
            max_attempts: options.max_attempts,
            poll_interval: Duration::from_millis(options.poll_interval_ms),
            size_stability_required: options.size_stability_required,
            preexisting: BTreeSet::new(),
        }
    }

    pub fn ignoring(mut self, preexisting: BTreeSet<String>) -> Self {
        self.preexisting = preexisting;
        self
    }

    pub fn describe(&self) -> &str {
        self.expected_file_name.as_deref().unwrap_or("<any archive>")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchFailure {
    Timeout { attempts: u32 },
    Unreadable(String),
}

impl fmt::Display for WatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchFailure::Timeout { attempts } => write!(f, "timed out after {attempts} polls"),
            WatchFailure::Unreadable(message) => write!(f, "directory unreadable: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadVerdict {
    Completed(Utf8PathBuf),
    Failed(WatchFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RelocationMode {
    /// File every archive after all links were clicked.
    #[default]
    Batch,
    /// File each archive as soon as its download completes.
    Streaming,
}

impl fmt::Display for RelocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelocationMode::Batch => write!(f, "batch"),
            RelocationMode::Streaming => write!(f, "streaming"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_year() {
        assert_eq!(ArchiveYear::parse("2018"), ArchiveYear::Known("2018".to_string()));
        assert_eq!(ArchiveYear::parse("18"), ArchiveYear::Unknown);
        assert_eq!(ArchiveYear::Unknown.as_str(), "unknown_year");
    }

    #[test]
    fn pending_download_takes_options() {
        let options = WatchOptions {
            max_attempts: 3,
            poll_interval_ms: 250,
            size_stability_required: false,
        };
        let pending = PendingDownload::new(Utf8Path::new("/tmp/data"), None, &options);
        assert_eq!(pending.max_attempts, 3);
        assert_eq!(pending.poll_interval, Duration::from_millis(250));
        assert_eq!(pending.describe(), "<any archive>");
    }
}
