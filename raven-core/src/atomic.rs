//! Atomic file writes: write to a sibling `.tmp`, `fsync` it, then rename
//! over the destination.
//!
//! Grounded on `harness::feature_registry::FeatureRegistry::save`,
//! which used a backup-copy + write-tmp + `std::fs::rename` sequence but
//! never called `fsync` on the temp file before the rename — on a crash
//! between `write` and `rename`, a journaling filesystem can still expose
//! a zero-length or stale destination. The spec requires fsync (§3, §5),
//! so it is added here.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{RavenError, RavenResult};

/// Write `contents` to `path` atomically: data lands either as the
/// complete previous content or the complete new content, never partial.
pub fn write_atomic(path: &Path, contents: &[u8]) -> RavenResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| RavenError::io(dir, e))?;

    let tmp_path = tmp_path_for(path);
    {
        let mut tmp = File::create(&tmp_path).map_err(|e| RavenError::io(&tmp_path, e))?;
        tmp.write_all(contents)
            .map_err(|e| RavenError::io(&tmp_path, e))?;
        tmp.sync_all().map_err(|e| RavenError::io(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| RavenError::io(path, e))?;
    Ok(())
}

/// Same as [`write_atomic`] but keeps one rolling `.backup` of whatever
/// was previously at `path`, matching the same recovery chain
/// (primary → `.backup` → caller-supplied default).
pub fn write_atomic_with_backup(path: &Path, contents: &[u8]) -> RavenResult<()> {
    if path.exists() {
        let backup = backup_path_for(path);
        fs::copy(path, &backup).map_err(|e| RavenError::io(&backup, e))?;
    }
    write_atomic(path, contents)
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn backup_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".backup");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_creates_parent_dirs_and_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deep/state.json");
        write_atomic(&path, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{\"a\":1}");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn write_atomic_overwrites_cleanly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn write_atomic_with_backup_preserves_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        write_atomic(&path, b"v1").unwrap();
        write_atomic_with_backup(&path, b"v2").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"v2");
        assert_eq!(fs::read(backup_path_for(&path)).unwrap(), b"v1");
    }
}
