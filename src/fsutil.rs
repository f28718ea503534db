// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Crash-safe file system helpers.
//!
//! Everything nebi persists goes through [`write_atomic`]: bytes are written to
//! a sibling temporary file, flushed to disk, and renamed over the target. A
//! reader therefore observes either the old document or the new one, never a
//! partial write.

use crate::error::{Error, Result};

use fs2::FileExt;
use std::{
    ffi::OsString,
    fs::{self, DirBuilder, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

/// Permission bits for documents only the user may read.
pub(crate) const PRIVATE_FILE: u32 = 0o600;

/// Permission bits for files inside user-owned project directories.
pub(crate) const SHARED_FILE: u32 = 0o644;

/// Write bytes to path through temporary file, fsync, and rename.
///
/// The temporary file is named `<file_name>.tmp` next to the target. The
/// parent directory is synced after the rename so the new directory entry
/// survives a crash.
///
/// # Errors
///
/// - Return [`Error::Io`] if any step fails. The target is left untouched.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp = tmp_path(path);

    let result = (|| -> Result<()> {
        let mut file = File::create(&tmp).map_err(|err| Error::io(&tmp, err))?;
        file.write_all(bytes).map_err(|err| Error::io(&tmp, err))?;
        set_mode(&tmp, mode)?;
        file.sync_all().map_err(|err| Error::io(&tmp, err))?;
        fs::rename(&tmp, path).map_err(|err| Error::io(path, err))?;
        sync_dir(parent)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }

    result
}

/// Create directory and its parents, restricted to the current user.
pub(crate) fn create_private_dir(path: &Path) -> Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }

    builder.create(path).map_err(|err| Error::io(path, err))
}

/// Read file, mapping "not found" to [`None`].
pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::io(path, err)),
    }
}

/// Remove file, treating an already missing file as success.
pub(crate) fn remove_optional(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::io(path, err)),
    }
}

/// Exclusive advisory lock on a lock file.
///
/// Unlocks when dropped, so every exit path releases it.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    /// Block until exclusive lock on path is held, creating the file if needed.
    pub(crate) fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|err| Error::io(path, err))?;
        file.lock_exclusive().map_err(|err| Error::io(path, err))?;
        debug!("acquired lock {:?}", path.display());

        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("nebi"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|err| Error::io(path, err))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|dir_file| dir_file.sync_all())
        .map_err(|err| Error::io(dir, err))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
