use std::cell::RefCell;
use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;

use mesh_fetch::app::{App, ProgressEvent, ProgressSink, RegionStatus};
use mesh_fetch::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use mesh_fetch::domain::RelocationMode;
use mesh_fetch::driver::{LinkHandle, PageDriver};
use mesh_fetch::error::MeshError;

struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Clone, Copy, PartialEq)]
enum Behaviour {
    /// Writes the file on every click.
    Deliver,
    /// Writes the file only on the second click.
    DeliverOnRetry,
    Never,
    ClickFails,
    /// Writes its own file and, late, the archive of another region.
    DeliverAlso(&'static str),
}

/// Pretends to be the browser: a click drops the archive into the directory.
struct StubDriver {
    dir: Utf8PathBuf,
    links: Vec<(&'static str, &'static str, Behaviour)>,
    clicks: RefCell<Vec<String>>,
    modal_checks: RefCell<u32>,
}

impl StubDriver {
    fn new(dir: Utf8PathBuf, links: Vec<(&'static str, &'static str, Behaviour)>) -> Self {
        Self {
            dir,
            links,
            clicks: RefCell::new(Vec::new()),
            modal_checks: RefCell::new(0),
        }
    }

    fn clicks_on(&self, element: &str) -> usize {
        self.clicks.borrow().iter().filter(|id| *id == element).count()
    }
}

impl PageDriver for StubDriver {
    fn list_download_links(&self) -> Result<Vec<LinkHandle>, MeshError> {
        Ok(self
            .links
            .iter()
            .map(|(id, label, _)| LinkHandle {
                element: id.to_string(),
                label: Some(label.to_string()),
            })
            .collect())
    }

    fn click(&self, link: &LinkHandle) -> Result<(), MeshError> {
        self.clicks.borrow_mut().push(link.element.clone());
        let clicks = self.clicks_on(&link.element);
        let (id, _, behaviour) = self
            .links
            .iter()
            .find(|(id, _, _)| *id == link.element)
            .unwrap();
        let deliver = match behaviour {
            Behaviour::Deliver => true,
            Behaviour::DeliverAlso(other) => {
                fs::write(self.dir.join(other), b"archive").unwrap();
                true
            }
            Behaviour::DeliverOnRetry => clicks == 2,
            Behaviour::Never => false,
            Behaviour::ClickFails => {
                return Err(MeshError::PageDriver("element detached".to_string()));
            }
        };
        if deliver {
            fs::write(self.dir.join(*id), b"archive").unwrap();
        }
        Ok(())
    }

    fn dismiss_modal_if_present(&self) -> Result<bool, MeshError> {
        *self.modal_checks.borrow_mut() += 1;
        Ok(false)
    }

    fn accept_confirmation_if_present(&self, _timeout: Duration) -> Result<bool, MeshError> {
        Ok(true)
    }
}

fn config(base: &Utf8PathBuf, relocation: RelocationMode, discover: bool) -> ResolvedConfig {
    let overrides = ConfigOverrides {
        base_dir: Some(base.clone()),
        max_attempts: Some(3),
        poll_interval_ms: Some(0),
        relocation: Some(relocation),
        discover,
        ..ConfigOverrides::default()
    };
    let mut resolved =
        ConfigLoader::resolve_config(ConfigLoader::parse("{}").unwrap(), overrides).unwrap();
    resolved.confirmation_timeout = Duration::ZERO;
    resolved
}

fn utf8_temp() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, path)
}

#[test]
fn batch_run_files_archives_and_skips_failures() {
    let (_temp, base) = utf8_temp();
    let driver = StubDriver::new(
        base.clone(),
        vec![
            ("500m_mesh_suikei_2018_shape_01.zip", "北海道", Behaviour::Deliver),
            ("500m_mesh_suikei_2018_shape_02.zip", "青森", Behaviour::DeliverOnRetry),
            ("500m_mesh_suikei_2018_shape_03.zip", "岩手", Behaviour::Never),
            ("500m_mesh_suikei_2018_shape_04.zip", "宮城", Behaviour::ClickFails),
        ],
    );
    let app = App::new(config(&base, RelocationMode::Batch, false));

    let report = app.run(&driver, &NoopSink).unwrap();

    let statuses = report
        .regions
        .iter()
        .map(|region| region.status)
        .collect::<Vec<_>>();
    assert_eq!(
        statuses,
        vec![
            RegionStatus::Filed,
            RegionStatus::Filed,
            RegionStatus::Skipped,
            RegionStatus::Skipped,
        ]
    );
    assert_eq!(report.regions[1].attempts, 2);
    assert_eq!(report.regions[2].attempts, 2);
    assert_eq!(report.regions[3].attempts, 1);
    assert_eq!(driver.clicks_on("500m_mesh_suikei_2018_shape_03.zip"), 2);
    assert_eq!(*driver.modal_checks.borrow(), 1);
    assert!(base.join("2018/01_北海道/500m_mesh_suikei_2018_shape_01.zip").exists());
    assert!(base.join("2018/02_青森県/500m_mesh_suikei_2018_shape_02.zip").exists());
}

#[test]
fn streaming_discovery_uses_row_labels() {
    let (_temp, base) = utf8_temp();
    let driver = StubDriver::new(
        base.clone(),
        vec![
            ("mesh_2018_osaka.zip", "大阪", Behaviour::Deliver),
            ("mesh_2018_nagano.zip", "長野", Behaviour::Deliver),
        ],
    );
    let app = App::new(config(&base, RelocationMode::Streaming, true));

    let report = app.run(&driver, &NoopSink).unwrap();

    assert_eq!(report.count(RegionStatus::Filed), 2);
    assert!(base.join("2018/27_大阪府/mesh_2018_osaka.zip").exists());
    assert!(base.join("2018/20_長野県/mesh_2018_nagano.zip").exists());
}

#[test]
fn collision_is_reported_not_overwritten() {
    let (_temp, base) = utf8_temp();
    let name = "500m_mesh_suikei_2018_shape_01.zip";
    let occupied = base.join("2018/01_北海道").join(name);
    fs::create_dir_all(occupied.parent().unwrap()).unwrap();
    fs::write(&occupied, b"old").unwrap();

    let driver = StubDriver::new(base.clone(), vec![(name, "北海道", Behaviour::Deliver)]);
    let app = App::new(config(&base, RelocationMode::Batch, false));
    let report = app.run(&driver, &NoopSink).unwrap();

    assert_eq!(report.regions[0].status, RegionStatus::Collision);
    assert_eq!(fs::read(&occupied).unwrap(), b"old");
    assert!(base.join(name).exists());
}

#[test]
fn discovery_ignores_archives_left_from_earlier_runs() {
    let (_temp, base) = utf8_temp();
    fs::write(base.join("a_leftover_2017.zip"), b"stale").unwrap();
    let driver = StubDriver::new(
        base.clone(),
        vec![
            ("mesh_2018_osaka.zip", "大阪", Behaviour::Deliver),
            ("mesh_2018_nagano.zip", "長野", Behaviour::Deliver),
        ],
    );
    let app = App::new(config(&base, RelocationMode::Streaming, true));

    let report = app.run(&driver, &NoopSink).unwrap();

    assert_eq!(report.count(RegionStatus::Filed), 2);
    assert!(base.join("2018/27_大阪府/mesh_2018_osaka.zip").exists());
    assert!(base.join("2018/20_長野県/mesh_2018_nagano.zip").exists());
    assert!(!base.join("2017/27_大阪府/a_leftover_2017.zip").exists());
    assert!(base.join("a_leftover_2017.zip").exists());
}

#[test]
fn batch_sweep_files_archive_that_arrived_after_its_wait() {
    let (_temp, base) = utf8_temp();
    let late = "500m_mesh_suikei_2018_shape_01.zip";
    let driver = StubDriver::new(
        base.clone(),
        vec![
            (late, "北海道", Behaviour::Never),
            ("500m_mesh_suikei_2018_shape_02.zip", "青森", Behaviour::DeliverAlso(late)),
        ],
    );
    let app = App::new(config(&base, RelocationMode::Batch, false));

    let report = app.run(&driver, &NoopSink).unwrap();

    let filed = base.join("2018/01_北海道").join(late);
    assert!(filed.exists());
    assert!(!base.join(late).exists());
    assert_eq!(report.regions[0].status, RegionStatus::Filed);
    assert_eq!(report.regions[0].path.as_deref(), Some(filed.as_str()));
    assert_eq!(report.regions[1].status, RegionStatus::Filed);
    assert!(report.late_arrivals.is_empty());
}

#[test]
fn batch_sweep_reports_unclaimed_archives() {
    let (_temp, base) = utf8_temp();
    fs::write(base.join("500m_mesh_suikei_2018_shape_47.zip"), b"archive").unwrap();
    let driver = StubDriver::new(
        base.clone(),
        vec![("500m_mesh_suikei_2018_shape_01.zip", "北海道", Behaviour::Deliver)],
    );
    let app = App::new(config(&base, RelocationMode::Batch, false));

    let report = app.run(&driver, &NoopSink).unwrap();

    assert_eq!(report.late_arrivals.len(), 1);
    let moved = base.join("2018/47_沖縄県/500m_mesh_suikei_2018_shape_47.zip");
    assert_eq!(report.late_arrivals[0].path.as_deref(), Some(moved.as_str()));
    assert!(moved.exists());
}
