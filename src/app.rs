use std::collections::BTreeSet;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::classify::{classify, classify_and_move, relocate_directory};
use crate::config::ResolvedConfig;
use crate::domain::{DownloadVerdict, PendingDownload, RelocationMode};
use crate::driver::{LinkHandle, PageDriver};
use crate::error::MeshError;
use crate::fs_util::validate_zip;
use crate::watcher::{DirectoryProbe, DownloadWatcher, OsDirectory};

/// Clicks per link: the first attempt plus one retry.
const CLICK_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionStatus {
    Filed,
    Downloaded,
    Skipped,
    Collision,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionReport {
    pub index: usize,
    pub label: Option<String>,
    pub status: RegionStatus,
    pub attempts: u32,
    pub path: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub page_url: String,
    pub base_dir: String,
    pub regions: Vec<RegionReport>,
    /// Archives found in the download directory by the final batch sweep
    /// that no region claimed.
    pub late_arrivals: Vec<LateArrival>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LateArrival {
    pub source: String,
    pub path: Option<String>,
    pub reason: Option<String>,
}

impl RunReport {
    pub fn count(&self, status: RegionStatus) -> usize {
        self.regions
            .iter()
            .filter(|region| region.status == status)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<std::time::Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Drives one download run: click every link, wait for each transfer, file
/// the archives. Downloads are strictly sequential because completion is
/// detected by scanning the shared download directory.
pub struct App<P: DirectoryProbe = OsDirectory> {
    config: ResolvedConfig,
    watcher: DownloadWatcher<P>,
}

impl App<OsDirectory> {
    pub fn new(config: ResolvedConfig) -> Self {
        Self::with_probe(config, OsDirectory)
    }
}

impl<P: DirectoryProbe> App<P> {
    pub fn with_probe(config: ResolvedConfig, probe: P) -> Self {
        let watcher = DownloadWatcher::with_probe(probe)
            .in_progress_suffixes(config.in_progress_suffixes.clone())
            .archive_suffix(config.archive_suffix.clone());
        Self { config, watcher }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn watcher(&self) -> &DownloadWatcher<P> {
        &self.watcher
    }

    /// Only a failure to list the links aborts the run; every per-region
    /// problem is logged and recorded in the report.
    pub fn run<D: PageDriver>(
        &self,
        driver: &D,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, MeshError> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let links = driver.list_download_links()?;
        let total = links.len();
        sink.event(ProgressEvent {
            message: format!("found {total} download links"),
            elapsed: None,
        });

        let mut regions = Vec::with_capacity(total);
        let mut late_arrivals = Vec::new();
        for (index, link) in links.iter().enumerate() {
            let start = Instant::now();
            info!(index = index + 1, total, label = ?link.label, "downloading region");
            let report = self.fetch_region(driver, index, link);
            sink.event(ProgressEvent {
                message: format!(
                    "{}/{total} {} {:?}",
                    index + 1,
                    link.label.as_deref().unwrap_or("-"),
                    report.status
                ),
                elapsed: Some(start.elapsed()),
            });
            regions.push(report);
        }

        if self.config.relocation == RelocationMode::Batch {
            for region in regions
                .iter_mut()
                .filter(|region| region.status == RegionStatus::Downloaded)
            {
                self.file_region(region);
            }
            self.sweep_late_arrivals(&mut regions, &mut late_arrivals);
        }

        let report = RunReport {
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            page_url: self.config.page_url.clone(),
            base_dir: self.config.base_dir.to_string(),
            regions,
            late_arrivals,
        };
        info!(
            filed = report.count(RegionStatus::Filed),
            skipped = report.count(RegionStatus::Skipped),
            collisions = report.count(RegionStatus::Collision),
            "run finished"
        );
        Ok(report)
    }

    fn fetch_region<D: PageDriver>(
        &self,
        driver: &D,
        index: usize,
        link: &LinkHandle,
    ) -> RegionReport {
        let mut report = RegionReport {
            index: index + 1,
            label: link.label.clone(),
            status: RegionStatus::Skipped,
            attempts: 0,
            path: None,
            reason: None,
        };

        let mut last_error = None;
        for attempt in 1..=CLICK_ATTEMPTS {
            report.attempts = attempt;
            match self.attempt_download(driver, index, link, attempt) {
                Ok(path) => {
                    report.status = RegionStatus::Downloaded;
                    report.path = Some(path.to_string());
                    last_error = None;
                    break;
                }
                Err(err @ (MeshError::DownloadTimeout { .. } | MeshError::InvalidArchive(_)))
                    if attempt < CLICK_ATTEMPTS =>
                {
                    warn!(index = index + 1, error = %err, "download failed, clicking again");
                    last_error = Some(err);
                }
                Err(err) => {
                    last_error = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = last_error {
            warn!(index = index + 1, label = ?link.label, error = %err, "skipping region");
            report.reason = Some(err.to_string());
            return report;
        }

        if self.config.relocation == RelocationMode::Streaming {
            self.file_region(&mut report);
        }
        report
    }

    fn attempt_download<D: PageDriver>(
        &self,
        driver: &D,
        index: usize,
        link: &LinkHandle,
        attempt: u32,
    ) -> Result<Utf8PathBuf, MeshError> {
        let preexisting = match self.config.expected_file_name(index) {
            Some(_) => BTreeSet::new(),
            None => self.watcher.snapshot(&self.config.base_dir)?,
        };
        driver.click(link)?;

        // The survey popup only shows up after the very first click.
        if index == 0 && attempt == 1 {
            if let Err(err) = driver.dismiss_modal_if_present() {
                warn!(error = %err, "failed to close survey popup");
            }
        }
        match driver.accept_confirmation_if_present(self.config.confirmation_timeout) {
            Ok(true) => info!(index = index + 1, "download confirmation accepted"),
            Ok(false) => info!(index = index + 1, "no download confirmation shown"),
            Err(err) => warn!(error = %err, "failed to handle download confirmation"),
        }

        let pending = PendingDownload::new(
            &self.config.base_dir,
            self.config.expected_file_name(index),
            &self.config.watch,
        )
        .ignoring(preexisting);
        match self.watcher.await_completion(&pending) {
            DownloadVerdict::Completed(path) => {
                info!(path = %path, "download completed");
                if self.config.verify_archives {
                    validate_zip(&path)?;
                }
                Ok(path)
            }
            DownloadVerdict::Failed(reason) => {
                warn!(file = pending.describe(), %reason, "download did not complete");
                Err(MeshError::DownloadTimeout {
                    file: pending.describe().to_string(),
                    attempts: pending.max_attempts,
                })
            }
        }
    }

    /// Files every archive still loose in the download directory, the way a
    /// batch run ends. An archive that matches the expected name of a skipped
    /// region is credited to that region.
    fn sweep_late_arrivals(&self, regions: &mut [RegionReport], late: &mut Vec<LateArrival>) {
        let base = &self.config.base_dir;
        let relocations = match relocate_directory(&self.watcher, base, base) {
            Ok(relocations) => relocations,
            Err(err) => {
                error!(dir = %base, error = %err, "final sweep failed");
                return;
            }
        };

        for relocation in relocations {
            let source = relocation.source.as_str();
            if regions
                .iter()
                .any(|region| region.path.as_deref() == Some(source))
            {
                continue;
            }
            let name = relocation.source.file_name().unwrap_or_default();
            let owner = regions.iter_mut().find(|region| {
                region.status == RegionStatus::Skipped
                    && self.config.expected_file_name(region.index - 1).as_deref() == Some(name)
            });
            match (owner, relocation.outcome) {
                (Some(region), Ok(dest)) => {
                    info!(index = region.index, path = %dest, "archive arrived after its wait");
                    region.status = RegionStatus::Filed;
                    region.path = Some(dest.to_string());
                }
                (Some(region), Err(err @ MeshError::DestinationCollision(_))) => {
                    region.status = RegionStatus::Collision;
                    region.path = Some(relocation.source.to_string());
                    region.reason = Some(err.to_string());
                }
                (_, outcome) => late.push(LateArrival {
                    source: relocation.source.to_string(),
                    path: outcome.as_ref().ok().map(|dest| dest.to_string()),
                    reason: outcome.err().map(|err| err.to_string()),
                }),
            }
        }
    }

    fn file_region(&self, report: &mut RegionReport) {
        let Some(path) = report.path.clone() else {
            return;
        };
        match self.file_archive(Utf8Path::new(&path), report.label.as_deref()) {
            Ok(dest) => {
                report.status = RegionStatus::Filed;
                report.path = Some(dest.to_string());
            }
            Err(err @ MeshError::DestinationCollision(_)) => {
                error!(file = %path, error = %err, "not moving archive");
                report.status = RegionStatus::Collision;
                report.reason = Some(err.to_string());
            }
            Err(err) => {
                error!(file = %path, error = %err, "failed to move archive");
                report.reason = Some(err.to_string());
            }
        }
    }

    pub fn file_archive(
        &self,
        path: &Utf8Path,
        label: Option<&str>,
    ) -> Result<Utf8PathBuf, MeshError> {
        let file = classify(path, label);
        classify_and_move(&file, &self.config.base_dir)
    }
}
