// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Drift classification.
//!
//! Drift is the divergence between the spec files on disk and the digests
//! recorded when the workspace was pulled or committed. The recorded digests
//! are called the __baseline__. A baseline comes from exactly one place:
//!
//! 1. The `.nebi.toml` sidecar of a pulled workspace.
//! 2. The index entry of a pulled workspace whose sidecar went missing.
//! 3. The committed snapshot of a purely local workspace.
//!
//! Classification never touches the network and never mutates any state. The
//! only input besides the baseline is the current content of the spec files.

use crate::{
    digest::digest_file,
    sidecar::Sidecar,
    store::Entry,
    LOCK_FILE, MANIFEST_FILE, SPEC_FILES,
};

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
};
use tracing::debug;

/// Status of a single spec file, or the rollup of a whole workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// File exists and matches the baseline.
    Clean,

    /// File exists, but the baseline recorded none.
    Untracked,

    /// File exists and differs from the baseline.
    Modified,

    /// File is gone, but the baseline recorded one.
    Missing,

    /// No baseline, or the file could not be read.
    Unknown,
}

impl Status {
    /// Rank used to roll per-file statuses up into one.
    fn strength(self) -> u8 {
        match self {
            Self::Clean => 0,
            Self::Untracked => 1,
            Self::Modified | Self::Missing => 2,
            Self::Unknown => 3,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            Self::Clean => "clean",
            Self::Untracked => "untracked",
            Self::Modified => "modified",
            Self::Missing => "missing",
            Self::Unknown => "unknown",
        };
        fmt.write_str(label)
    }
}

/// Where a baseline came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineSource {
    Sidecar,
    Entry,
    Snapshot,
}

impl Display for BaselineSource {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Sidecar => fmt.write_str("sidecar"),
            Self::Entry => fmt.write_str("index entry"),
            Self::Snapshot => fmt.write_str("snapshot"),
        }
    }
}

/// Recorded digests drift is measured against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub source: BaselineSource,
    digests: BTreeMap<String, String>,
}

impl Baseline {
    pub fn new(source: BaselineSource, digests: BTreeMap<String, String>) -> Self {
        Self { source, digests }
    }

    pub fn from_sidecar(sidecar: &Sidecar) -> Self {
        let digests = sidecar
            .layers
            .iter()
            .map(|(name, layer)| (name.clone(), layer.digest.clone()))
            .collect();
        Self::new(BaselineSource::Sidecar, digests)
    }

    pub fn from_entry(entry: &Entry) -> Self {
        Self::new(BaselineSource::Entry, entry.layers.clone())
    }

    /// Recorded digest of a spec file.
    pub fn digest(&self, name: &str) -> Option<&str> {
        self.digests.get(name).map(String::as_str)
    }

    /// Pick the baseline of a workspace.
    ///
    /// The sidecar wins, then the index entry, then the snapshot.
    pub fn select(
        sidecar: Option<&Sidecar>,
        entry: Option<&Entry>,
        snapshot: Option<Baseline>,
    ) -> Option<Self> {
        sidecar
            .map(Self::from_sidecar)
            .or_else(|| entry.map(Self::from_entry))
            .or(snapshot)
    }
}

/// Status of one spec file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub name: &'static str,
    pub status: Status,
}

/// Drift of a whole workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Rollup over every file.
    pub status: Status,

    /// Per-file statuses. `pixi.lock` is only listed when it exists or the
    /// baseline recorded it.
    pub files: Vec<FileReport>,

    /// Baseline the report was computed against.
    pub source: Option<BaselineSource>,
}

impl Report {
    pub fn file(&self, name: &str) -> Option<Status> {
        self.files
            .iter()
            .find(|report| report.name == name)
            .map(|report| report.status)
    }
}

/// Classify one file from its current and recorded digests.
///
/// `current` is `Some(None)` when the file does not exist, and `None` when it
/// could not be read.
pub fn classify_file(
    current: Option<Option<&str>>,
    baseline: Option<&Baseline>,
    name: &str,
) -> Option<Status> {
    let Some(baseline) = baseline else {
        return Some(Status::Unknown);
    };
    let Some(current) = current else {
        return Some(Status::Unknown);
    };

    match (current, baseline.digest(name)) {
        (Some(current), Some(recorded)) if current == recorded => Some(Status::Clean),
        (Some(_), Some(_)) => Some(Status::Modified),
        (Some(_), None) => Some(Status::Untracked),
        (None, Some(_)) => Some(Status::Missing),
        (None, None) => None,
    }
}

/// Classify workspace directory against a baseline.
///
/// Never fails. An unreadable file classifies as [`Status::Unknown`].
pub fn classify(dir: impl AsRef<Path>, baseline: Option<&Baseline>) -> Report {
    let dir = dir.as_ref();
    let source = baseline.map(|baseline| baseline.source);

    if !dir.is_dir() {
        return Report {
            status: Status::Missing,
            files: vec![FileReport {
                name: MANIFEST_FILE,
                status: Status::Missing,
            }],
            source,
        };
    }

    let mut files = Vec::new();
    let mut manifest_present = false;
    for name in SPEC_FILES {
        let current = match digest_file(dir.join(name)) {
            Ok(current) => Some(current),
            Err(err) => {
                debug!("cannot digest {name} in {:?}: {err}", dir.display());
                None
            }
        };

        if name == MANIFEST_FILE {
            manifest_present = !matches!(current, Some(None));
        }

        let status = classify_file(current.as_ref().map(Option::as_deref), baseline, name);
        let status = match (name, status) {
            // INVARIANT: Manifest is always reported, lock only when relevant.
            (MANIFEST_FILE, None) => Some(Status::Missing),
            (MANIFEST_FILE, Some(Status::Unknown)) if matches!(current, Some(None)) => {
                Some(Status::Missing)
            }
            (LOCK_FILE, Some(Status::Unknown)) if matches!(current, Some(None)) => None,
            (_, status) => status,
        };

        if let Some(status) = status {
            files.push(FileReport { name, status });
        }
    }

    Report {
        status: rollup(manifest_present, baseline.is_some(), &files),
        files,
        source,
    }
}

/// Roll per-file statuses up into a workspace status.
///
/// A missing manifest makes the workspace [`Status::Missing`]. Without a
/// baseline the workspace is [`Status::Unknown`]. Otherwise the strongest
/// per-file status wins under `Clean < Untracked < Modified`, where a missing
/// lock counts as a modification.
pub fn rollup(manifest_present: bool, has_baseline: bool, files: &[FileReport]) -> Status {
    if !manifest_present {
        return Status::Missing;
    }

    if !has_baseline {
        return Status::Unknown;
    }

    let strongest = files
        .iter()
        .map(|report| report.status)
        .max_by_key(|status| status.strength())
        .unwrap_or(Status::Clean);

    match strongest {
        Status::Missing => Status::Modified,
        other => other,
    }
}
