//! Maps downloaded archive names onto `<base>/<year>/<code>_<name>/<file>`.
//!
//! Classification never fails: an unparseable year becomes `unknown_year`
//! and an unresolvable region becomes `00_unknown`, so every archive lands
//! somewhere reproducible. Only the move itself can fail.

use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::domain::{ArchiveFile, ArchiveYear, RegionToken};
use crate::error::MeshError;
use crate::fs_util::{move_no_clobber, same_file};
use crate::prefecture::{self, Prefecture};
use crate::watcher::{DirectoryProbe, DownloadWatcher, list_archives};

static SHAPE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.+_(?P<year>\d{4})_shape_(?P<index>\d{2})\.zip$").expect("valid regex")
});

static EMBEDDED_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9])(?P<year>(?:19|20)\d{2})(?:[^0-9]|$)").expect("valid regex")
});

/// Extracts the year and region token from a file name. `region_label` is
/// the text of the listing row the download came from, when known.
pub fn parse_name(raw_name: &str, region_label: Option<&str>) -> (ArchiveYear, RegionToken) {
    if let Some(caps) = SHAPE_NAME.captures(raw_name) {
        return (
            ArchiveYear::parse(&caps["year"]),
            RegionToken::Index(caps["index"].to_string()),
        );
    }

    let year = EMBEDDED_YEAR
        .captures(raw_name)
        .map(|caps| ArchiveYear::parse(&caps["year"]))
        .unwrap_or(ArchiveYear::Unknown);
    let token = match region_label {
        Some(label) => RegionToken::Label(label.to_string()),
        None => RegionToken::Missing,
    };
    (year, token)
}

pub fn resolve_region(token: &RegionToken) -> Prefecture {
    match token {
        RegionToken::Index(code) => prefecture::resolve_code(code),
        RegionToken::Label(label) => prefecture::resolve_label(label),
        RegionToken::Missing => Prefecture::UNKNOWN,
    }
}

pub fn classify(location: &Utf8Path, region_label: Option<&str>) -> ArchiveFile {
    let raw_name = location.file_name().unwrap_or_default().to_string();
    let (year, token) = parse_name(&raw_name, region_label);
    let prefecture = resolve_region(&token);
    let file = ArchiveFile {
        location: location.to_path_buf(),
        raw_name,
        year,
        prefecture,
    };
    if !file.is_fully_classified() {
        warn!(
            file = %file.raw_name,
            ?token,
            year = %file.year,
            region = %file.prefecture,
            "archive only partially classified, using sentinel bucket"
        );
    }
    file
}

pub fn canonical_path(base: &Utf8Path, file: &ArchiveFile) -> Utf8PathBuf {
    base.join(file.year.as_str())
        .join(file.prefecture.dir_name())
        .join(&file.raw_name)
}

/// Moves `file` to its canonical location under `base` and returns that path.
///
/// Calling this again for a file that already sits at its canonical path is
/// a no-op. An occupied destination yields `DestinationCollision` and leaves
/// the source untouched.
pub fn classify_and_move(file: &ArchiveFile, base: &Utf8Path) -> Result<Utf8PathBuf, MeshError> {
    let dest = canonical_path(base, file);

    if file.location == dest || same_file(&file.location, &dest) {
        debug!(path = %dest, "archive already in place");
        return Ok(dest);
    }
    if !file.location.exists() && dest.exists() {
        debug!(path = %dest, "archive was moved earlier");
        return Ok(dest);
    }

    move_no_clobber(&file.location, &dest)?;
    info!(from = %file.location, to = %dest, "moved archive");
    Ok(dest)
}

#[derive(Debug)]
pub struct Relocation {
    pub source: Utf8PathBuf,
    pub outcome: Result<Utf8PathBuf, MeshError>,
}

/// Files every archive found directly inside `dir`. Per-file failures are
/// logged and reported; they do not stop the remaining files.
pub fn relocate_directory<P: DirectoryProbe>(
    watcher: &DownloadWatcher<P>,
    dir: &Utf8Path,
    base: &Utf8Path,
) -> Result<Vec<Relocation>, MeshError> {
    let mut relocations = Vec::new();
    for source in list_archives(watcher, dir)? {
        let file = classify(&source, None);
        let outcome = classify_and_move(&file, base);
        if let Err(err) = &outcome {
            warn!(file = %source, error = %err, "failed to move archive");
        }
        relocations.push(Relocation { source, outcome });
    }
    Ok(relocations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_shape_name() {
        let (year, token) = parse_name("500m_mesh_suikei_2018_shape_13.zip", None);
        assert_eq!(year, ArchiveYear::Known("2018".to_string()));
        assert_eq!(token, RegionToken::Index("13".to_string()));
    }

    #[test]
    fn index_in_name_wins_over_label() {
        let (_, token) = parse_name("500m_mesh_suikei_2018_shape_01.zip", Some("沖縄"));
        assert_eq!(resolve_region(&token).code(), "01");
    }

    #[test]
    fn parse_embedded_year_with_label() {
        let (year, token) = parse_name("mesh500h30_2018_ver2.zip", Some("大阪"));
        assert_eq!(year, ArchiveYear::Known("2018".to_string()));
        assert_eq!(resolve_region(&token).name(), "大阪府");
    }

    #[test]
    fn unparseable_name_uses_sentinels() {
        let file = classify(Utf8Path::new("/tmp/readme.zip"), Some(""));
        assert_eq!(file.year, ArchiveYear::Unknown);
        assert!(file.prefecture.is_unknown());
        assert_eq!(
            canonical_path(Utf8Path::new("/base"), &file),
            Utf8PathBuf::from("/base/unknown_year/00_unknown/readme.zip")
        );
    }
}
