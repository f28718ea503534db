// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Commit-time snapshots of spec files.
//!
//! A workspace that was never pulled has no sidecar to measure drift against.
//! Instead, `nebi commit` copies its spec files into the snapshot store at
//! `<data_dir>/snapshots/<workspace-id>/`. The snapshot then serves as the
//! baseline for `status` and `diff`.
//!
//! Snapshots are partitioned by workspace id, so invocations touching
//! different workspaces never contend.

use crate::{
    digest::digest,
    drift::{classify, Baseline, BaselineSource, Report},
    error::{Error, Result},
    fsutil::{create_private_dir, read_optional, remove_optional, write_atomic, PRIVATE_FILE},
    sidecar,
    store::Index,
    LOCK_FILE, MANIFEST_FILE, SPEC_FILES,
};

use similar::TextDiff;
use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Snapshot store inside a data directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Construct snapshot store rooted at `<data_dir>/snapshots`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("snapshots"),
        }
    }

    /// Directory holding the snapshot of a workspace.
    pub fn snapshot_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Snapshot spec files of source directory.
    ///
    /// `pixi.toml` is required. `pixi.lock` is copied when present, and a
    /// previously snapshotted lock is dropped when it is not.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if the source has no `pixi.toml`.
    /// - Return [`Error::Io`] if copying fails.
    #[instrument(skip(self, src_dir), level = "debug")]
    pub fn commit(&self, id: Uuid, src_dir: impl AsRef<Path>) -> Result<()> {
        let src_dir = src_dir.as_ref();
        let manifest = read_optional(&src_dir.join(MANIFEST_FILE))?.ok_or_else(|| {
            Error::not_found("spec file", src_dir.join(MANIFEST_FILE).display().to_string())
        })?;
        let lock = read_optional(&src_dir.join(LOCK_FILE))?;

        let dir = self.snapshot_dir(id);
        create_private_dir(&dir)?;

        // INVARIANT: Lock first, manifest last, so a snapshot with a manifest
        // is always complete.
        match lock {
            Some(lock) => write_atomic(&dir.join(LOCK_FILE), &lock, PRIVATE_FILE)?,
            None => remove_optional(&dir.join(LOCK_FILE))?,
        }
        write_atomic(&dir.join(MANIFEST_FILE), &manifest, PRIVATE_FILE)?;
        info!("committed snapshot of {:?}", src_dir.display());

        Ok(())
    }

    /// Check if a workspace has a committed snapshot.
    pub fn exists(&self, id: Uuid) -> bool {
        self.snapshot_dir(id).join(MANIFEST_FILE).is_file()
    }

    /// Read one snapshotted file.
    pub fn read(&self, id: Uuid, name: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.snapshot_dir(id).join(name))
    }

    /// Digests of the snapshot, usable as a drift baseline.
    ///
    /// Returns [`None`] if nothing was committed yet.
    pub fn baseline(&self, id: Uuid) -> Result<Option<Baseline>> {
        let mut digests = BTreeMap::new();
        for name in SPEC_FILES {
            if let Some(bytes) = self.read(id, name)? {
                digests.insert(name.to_string(), digest(bytes));
            }
        }

        if !digests.contains_key(MANIFEST_FILE) {
            return Ok(None);
        }

        Ok(Some(Baseline::new(BaselineSource::Snapshot, digests)))
    }

    /// Drop snapshot of a workspace.
    pub fn remove(&self, id: Uuid) -> Result<()> {
        let dir = self.snapshot_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io(&dir, err)),
        }
    }
}

/// Classify workspace directory against its baseline.
///
/// The baseline is the sidecar if present, then the latest index entry for
/// the path, then the committed snapshot. Never fails.
pub fn status(index: &Index, snapshots: &SnapshotStore, dir: impl AsRef<Path>) -> Report {
    let dir = dir.as_ref();
    let sidecar = match sidecar::read_any(dir) {
        Ok(sidecar) => sidecar,
        Err(err) => {
            warn!("ignore unreadable sidecar: {err}");
            None
        }
    };

    let snapshot = index.find_by_path(dir).and_then(|workspace| {
        snapshots.baseline(workspace.id).unwrap_or_else(|err| {
            debug!("ignore unreadable snapshot: {err}");
            None
        })
    });

    let baseline = Baseline::select(sidecar.as_ref(), index.latest_entry(dir), snapshot);
    classify(dir, baseline.as_ref())
}

/// Spec files of one side of a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSource {
    /// Human description of where the files came from.
    pub label: String,
    pub manifest: Option<String>,
    pub lock: Option<String>,
}

impl SpecSource {
    /// Load spec files from a directory.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if the directory has no `pixi.toml`.
    pub fn from_dir(label: impl Into<String>, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest = read_text(&dir.join(MANIFEST_FILE))?.ok_or_else(|| {
            Error::not_found("spec file", dir.join(MANIFEST_FILE).display().to_string())
        })?;

        Ok(Self {
            label: label.into(),
            manifest: Some(manifest),
            lock: read_text(&dir.join(LOCK_FILE))?,
        })
    }

    /// Load spec files from a committed snapshot.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if nothing was committed for the workspace.
    pub fn from_snapshot(snapshots: &SnapshotStore, id: Uuid) -> Result<Self> {
        if !snapshots.exists(id) {
            return Err(Error::not_found("snapshot", id.to_string()));
        }

        Self::from_dir("snapshot", snapshots.snapshot_dir(id))
    }

    fn file(&self, name: &str) -> Option<&str> {
        match name {
            MANIFEST_FILE => self.manifest.as_deref(),
            LOCK_FILE => self.lock.as_deref(),
            _ => None,
        }
    }
}

/// Unified diff between two spec sources.
///
/// `pixi.toml` is always compared, `pixi.lock` only if asked for. Identical
/// sources produce an empty string.
pub fn diff(old: &SpecSource, new: &SpecSource, include_lock: bool) -> String {
    let mut out = String::new();
    for name in SPEC_FILES {
        if name == LOCK_FILE && !include_lock {
            continue;
        }

        let before = old.file(name).unwrap_or_default();
        let after = new.file(name).unwrap_or_default();
        if before == after {
            continue;
        }

        let text = TextDiff::from_lines(before, after)
            .unified_diff()
            .context_radius(3)
            .header(
                &format!("a/{name}\t({})", old.label),
                &format!("b/{name}\t({})", new.label),
            )
            .to_string();
        out.push_str(&text);
    }

    out
}

fn read_text(path: &Path) -> Result<Option<String>> {
    Ok(read_optional(path)?.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}
