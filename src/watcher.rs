//! Download completion detection.
//!
//! Browsers write a sidecar file (`*.crdownload`, `*.part`) while a transfer
//! is running and rename it away once the last byte is on disk. The watcher
//! polls the download directory for those markers and, when a file name is
//! known, additionally requires two consecutive equal non-zero size readings.
//!
//! The in-progress scan is directory-wide, so only one transfer may be in
//! flight per directory at a time.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::thread;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::domain::{DownloadVerdict, PendingDownload, WatchFailure};
use crate::error::MeshError;

pub const DEFAULT_IN_PROGRESS_SUFFIXES: [&str; 2] = [".crdownload", ".part"];
pub const DEFAULT_ARCHIVE_SUFFIX: &str = ".zip";

/// Read-only view of a directory, so polling can be driven by a fake in tests.
pub trait DirectoryProbe {
    fn entries(&self, dir: &Utf8Path) -> Result<Vec<String>, MeshError>;
    /// `Ok(None)` when the file does not exist.
    fn file_size(&self, path: &Utf8Path) -> Result<Option<u64>, MeshError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsDirectory;

impl DirectoryProbe for OsDirectory {
    fn entries(&self, dir: &Utf8Path) -> Result<Vec<String>, MeshError> {
        let mut names = Vec::new();
        for entry in dir
            .read_dir_utf8()
            .map_err(|err| MeshError::Filesystem(format!("read dir {dir}: {err}")))?
        {
            let entry = entry.map_err(|err| MeshError::Filesystem(err.to_string()))?;
            names.push(entry.file_name().to_string());
        }
        Ok(names)
    }

    fn file_size(&self, path: &Utf8Path) -> Result<Option<u64>, MeshError> {
        match fs::metadata(path.as_std_path()) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(MeshError::Filesystem(format!("stat {path}: {err}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadWatcher<P: DirectoryProbe = OsDirectory> {
    probe: P,
    in_progress_suffixes: Vec<String>,
    archive_suffix: String,
}

impl DownloadWatcher<OsDirectory> {
    pub fn new() -> Self {
        Self::with_probe(OsDirectory)
    }
}

impl Default for DownloadWatcher<OsDirectory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: DirectoryProbe> DownloadWatcher<P> {
    pub fn with_probe(probe: P) -> Self {
        Self {
            probe,
            in_progress_suffixes: DEFAULT_IN_PROGRESS_SUFFIXES
                .iter()
                .map(|suffix| suffix.to_string())
                .collect(),
            archive_suffix: DEFAULT_ARCHIVE_SUFFIX.to_string(),
        }
    }

    pub fn in_progress_suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.in_progress_suffixes = suffixes;
        self
    }

    pub fn archive_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.archive_suffix = suffix.into();
        self
    }

    pub fn is_in_progress(&self, name: &str) -> bool {
        self.in_progress_suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix.as_str()))
    }

    pub fn is_archive(&self, name: &str) -> bool {
        name.ends_with(self.archive_suffix.as_str()) && !self.is_in_progress(name)
    }

    pub fn await_completion(&self, pending: &PendingDownload) -> DownloadVerdict {
        let dir = &pending.target_directory;
        let mut previous_size: Option<u64> = None;

        for attempt in 1..=pending.max_attempts {
            if attempt > 1 {
                thread::sleep(pending.poll_interval);
            }

            let entries = match self.probe.entries(dir) {
                Ok(entries) => entries,
                Err(err) => return DownloadVerdict::Failed(WatchFailure::Unreadable(err.to_string())),
            };

            let in_progress = entries
                .iter()
                .filter(|name| self.is_in_progress(name))
                .collect::<Vec<_>>();
            if !in_progress.is_empty() {
                debug!(attempt, ?in_progress, "download still in progress");
                previous_size = None;
                continue;
            }

            match pending.expected_file_name.as_deref() {
                Some(name) => {
                    let path = dir.join(name);
                    let size = match self.probe.file_size(&path) {
                        Ok(size) => size,
                        Err(err) => {
                            return DownloadVerdict::Failed(WatchFailure::Unreadable(
                                err.to_string(),
                            ));
                        }
                    };
                    match size {
                        Some(size) if size > 0 && !pending.size_stability_required => {
                            return DownloadVerdict::Completed(path);
                        }
                        Some(size) if size > 0 && previous_size == Some(size) => {
                            return DownloadVerdict::Completed(path);
                        }
                        Some(size) => {
                            debug!(attempt, size, file = name, "checking file size");
                            previous_size = Some(size);
                        }
                        None => {
                            debug!(attempt, file = name, "no completed file yet");
                            previous_size = None;
                        }
                    }
                }
                None => {
                    if let Some(found) = self.first_new_archive(&entries, &pending.preexisting) {
                        return DownloadVerdict::Completed(dir.join(found));
                    }
                    debug!(attempt, "no downloaded archive yet");
                }
            }
        }

        DownloadVerdict::Failed(WatchFailure::Timeout {
            attempts: pending.max_attempts,
        })
    }

    /// Names of the archives currently in `dir`, taken right before a click.
    pub fn snapshot(&self, dir: &Utf8Path) -> Result<BTreeSet<String>, MeshError> {
        Ok(self
            .probe
            .entries(dir)?
            .into_iter()
            .filter(|name| self.is_archive(name))
            .collect())
    }

    fn first_new_archive<'a>(
        &self,
        entries: &'a [String],
        preexisting: &BTreeSet<String>,
    ) -> Option<&'a str> {
        entries
            .iter()
            .filter(|name| self.is_archive(name) && !preexisting.contains(name.as_str()))
            .min()
            .map(String::as_str)
    }
}

/// Archive files directly inside `dir`, sorted by name.
pub fn list_archives<P: DirectoryProbe>(
    watcher: &DownloadWatcher<P>,
    dir: &Utf8Path,
) -> Result<Vec<Utf8PathBuf>, MeshError> {
    let mut names = watcher
        .probe
        .entries(dir)?
        .into_iter()
        .filter(|name| watcher.is_archive(name))
        .collect::<Vec<_>>();
    names.sort();
    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}
