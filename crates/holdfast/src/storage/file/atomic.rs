//! Atomic file replacement.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// `<path>.<suffix>`, e.g. `a.json.tmp`.
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes `bytes` to `path` so readers never observe a partial file.
///
/// Content goes to a `.tmp` sibling which is then renamed over the target. If
/// the rename fails the target is replaced in place instead.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = sibling(path, "tmp");
    stage(&tmp, |file| file.write_all(bytes))?;

    if let Err(err) = fs::rename(&tmp, path) {
        tracing::debug!(path = %path.display(), error = %err, "Atomic rename failed, replacing in place");
        let replaced = fs::write(path, bytes);
        let _ = fs::remove_file(&tmp);
        replaced?;
    }
    Ok(())
}

/// Creates `tmp`, fills it with `fill` and syncs it. A partial file is
/// removed on failure.
fn stage(tmp: &Path, fill: impl FnOnce(&mut File) -> io::Result<()>) -> io::Result<()> {
    let mut file = File::create(tmp)?;
    let written = fill(&mut file).and_then(|()| file.sync_all());
    drop(file);
    if written.is_err() {
        let _ = fs::remove_file(tmp);
    }
    written
}

/// Reads a file, mapping "not found" to `None`.
pub fn read_if_exists(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Removes a file; returns whether it existed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
