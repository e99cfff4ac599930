use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RegionStatus, RunReport};
use crate::prefecture::PREFECTURES;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "mesh-fetch summary ({})", report.base_dir)?;
        writeln!(
            stdout,
            "  filed: {}  downloaded: {}  skipped: {}  collisions: {}",
            report.count(RegionStatus::Filed),
            report.count(RegionStatus::Downloaded),
            report.count(RegionStatus::Skipped),
            report.count(RegionStatus::Collision),
        )?;
        for region in &report.regions {
            if region.status == RegionStatus::Filed {
                continue;
            }
            writeln!(
                stdout,
                "  #{:02} {} {:?}: {}",
                region.index,
                region.label.as_deref().unwrap_or("-"),
                region.status,
                region
                    .reason
                    .as_deref()
                    .or(region.path.as_deref())
                    .unwrap_or(""),
            )?;
        }
        for late in &report.late_arrivals {
            writeln!(
                stdout,
                "  late {} -> {}",
                late.source,
                late.path
                    .as_deref()
                    .or(late.reason.as_deref())
                    .unwrap_or(""),
            )?;
        }
        Ok(())
    }

    pub fn print_regions() -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for pref in PREFECTURES {
            writeln!(stdout, "{}\t{}", pref.code(), pref.name())?;
        }
        Ok(())
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => println!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => println!("{}", event.message),
        }
    }
}
