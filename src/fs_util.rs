use std::fs;
use std::io;

use camino::Utf8Path;
use tracing::{info, warn};
use zip::ZipArchive;

use crate::error::MeshError;

/// Creates the download directory, wiping it first when `clean` is set.
pub fn prepare_download_dir(dir: &Utf8Path, clean: bool) -> Result<(), MeshError> {
    if clean && dir.as_std_path().exists() {
        info!(%dir, "removing existing download directory");
        fs::remove_dir_all(dir.as_std_path())
            .map_err(|err| MeshError::Filesystem(format!("remove {dir}: {err}")))?;
    }
    fs::create_dir_all(dir.as_std_path())
        .map_err(|err| MeshError::Filesystem(format!("create {dir}: {err}")))
}

/// Moves `source` to `dest` without ever replacing an existing file.
///
/// Parent directories of `dest` are created as needed. Falls back to
/// copy-and-remove when the rename crosses filesystems.
pub fn move_no_clobber(source: &Utf8Path, dest: &Utf8Path) -> Result<(), MeshError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| MeshError::Filesystem(format!("create {parent}: {err}")))?;
    }
    if dest.as_std_path().exists() {
        return Err(MeshError::DestinationCollision(dest.to_path_buf()));
    }
    match fs::rename(source.as_std_path(), dest.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => copy_then_remove(source, dest),
        Err(err) => Err(MeshError::Filesystem(format!(
            "move {source} -> {dest}: {err}"
        ))),
    }
}

/// Fallback for moves across filesystems. A failed copy removes the partial
/// destination so a later run does not see it as already filed.
fn copy_then_remove(source: &Utf8Path, dest: &Utf8Path) -> Result<(), MeshError> {
    let mut input = fs::File::open(source.as_std_path())
        .map_err(|err| MeshError::Filesystem(format!("open {source}: {err}")))?;
    let mut output = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest.as_std_path())
        .map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists => MeshError::DestinationCollision(dest.to_path_buf()),
            _ => MeshError::Filesystem(format!("create {dest}: {err}")),
        })?;
    if let Err(err) = io::copy(&mut input, &mut output) {
        drop(output);
        if let Err(cleanup) = fs::remove_file(dest.as_std_path()) {
            warn!(file = %dest, error = %cleanup, "failed to remove partial copy");
        }
        return Err(MeshError::Filesystem(format!("copy {source} -> {dest}: {err}")));
    }
    fs::remove_file(source.as_std_path())
        .map_err(|err| MeshError::Filesystem(format!("remove {source}: {err}")))
}

/// True when both paths resolve to the same file on disk.
pub fn same_file(a: &Utf8Path, b: &Utf8Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

pub fn validate_zip(zip_path: &Utf8Path) -> Result<(), MeshError> {
    let file = fs::File::open(zip_path.as_std_path())
        .map_err(|err| MeshError::Filesystem(format!("open zip {zip_path}: {err}")))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|err| MeshError::InvalidArchive(format!("{zip_path}: {err}")))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| MeshError::InvalidArchive(format!("{zip_path}: {err}")))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| MeshError::InvalidArchive(format!("{zip_path}: {err}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    fn utf8_temp() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, path)
    }

    #[test]
    fn failed_copy_leaves_no_partial_destination() {
        let (_temp, dir) = utf8_temp();
        // Opening a directory succeeds, reading from it does not.
        let source = dir.join("not_a_file.zip");
        fs::create_dir(&source).unwrap();
        let dest = dir.join("2018/01_北海道/not_a_file.zip");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();

        assert_matches!(copy_then_remove(&source, &dest), Err(MeshError::Filesystem(_)));
        assert!(!dest.exists());
        assert!(source.exists());
    }

    #[test]
    fn move_refuses_to_overwrite() {
        let (_temp, root) = utf8_temp();
        let source = root.join("a.zip");
        let dest = root.join("nested/a.zip");
        fs::write(&source, b"new").unwrap();
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(&dest, b"old").unwrap();

        let err = move_no_clobber(&source, &dest).unwrap_err();
        assert_matches!(err, MeshError::DestinationCollision(_));
        assert!(source.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"old");
    }

    #[test]
    fn prepare_cleans_when_asked() {
        let (_temp, root) = utf8_temp();
        let dir = root.join("data");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("stale.zip"), b"x").unwrap();

        prepare_download_dir(&dir, false).unwrap();
        assert!(dir.join("stale.zip").exists());

        prepare_download_dir(&dir, true).unwrap();
        assert!(dir.exists());
        assert!(!dir.join("stale.zip").exists());
    }

    #[test]
    fn validate_rejects_garbage() {
        let (_temp, root) = utf8_temp();
        let path = root.join("broken.zip");
        fs::write(&path, b"definitely not a zip").unwrap();
        assert_matches!(validate_zip(&path), Err(MeshError::InvalidArchive(_)));
    }
}
