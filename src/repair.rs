// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reconcile the index with the file system.
//!
//! Users move, copy, and delete workspace directories without telling nebi.
//! Repair walks a set of scan roots looking for sidecars, matches each one
//! against the index by workspace id (or by path for legacy sidecars), and
//! produces a [`Plan`]. Applying the plan relocates moved workspaces and
//! forgets stale ones in a single locked update.

use crate::{
    error::Result,
    sidecar::{self, Sidecar},
    store::{Index, IndexStore},
};

use std::{
    collections::{HashSet, VecDeque},
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// How deep below a scan root sidecars are looked for.
pub const MAX_DEPTH: usize = 5;

/// Directories never worth descending into.
const SKIPPED_DIRS: [&str; 4] = [".git", "node_modules", ".pixi", "__pycache__"];

/// Reconciliation record for one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// Sidecar sits where the index expects it.
    Ok { id: Uuid, path: PathBuf },

    /// Tracked workspace now lives somewhere else.
    PathMoved { id: Uuid, from: PathBuf, to: PathBuf },

    /// Sidecar the index knows nothing about. Never added automatically.
    Orphaned {
        path: PathBuf,
        spec_name: String,
        version_name: String,
    },

    /// Tracked workspace whose directory is gone.
    Stale { id: Uuid, path: PathBuf },
}

impl Finding {
    /// Check if applying this finding changes the index.
    pub fn is_change(&self) -> bool {
        matches!(self, Self::PathMoved { .. } | Self::Stale { .. })
    }
}

impl Display for Finding {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Ok { path, .. } => write!(fmt, "ok        {}", path.display()),
            Self::PathMoved { from, to, .. } => {
                write!(fmt, "moved     {} -> {}", from.display(), to.display())
            }
            Self::Orphaned {
                path,
                spec_name,
                version_name,
            } => write!(
                fmt,
                "orphaned  {} ({spec_name}:{version_name}), run `nebi pull` to track it",
                path.display()
            ),
            Self::Stale { path, .. } => write!(fmt, "stale     {}", path.display()),
        }
    }
}

/// Every finding of one repair run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub findings: Vec<Finding>,
}

impl Plan {
    /// Findings that would change the index.
    pub fn changes(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|finding| finding.is_change())
    }

    pub fn has_changes(&self) -> bool {
        self.changes().next().is_some()
    }
}

impl Display for Plan {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for finding in &self.findings {
            writeln!(fmt, "{finding}")?;
        }

        Ok(())
    }
}

/// Default scan roots: the working directory and the global workspace tree.
pub fn default_roots(store: &IndexStore, cwd: impl Into<PathBuf>) -> Vec<PathBuf> {
    let mut roots = vec![cwd.into()];
    let envs = store.envs_dir();
    if envs.is_dir() {
        roots.push(envs);
    }

    roots
}

/// Find every directory holding a sidecar below the scan roots.
///
/// The walk is breadth-first and bounded by `max_depth`. Inaccessible
/// subtrees are skipped silently, symlinked directories are not followed,
/// and a directory reachable from several roots is only reported once.
#[instrument(level = "debug")]
pub fn scan(roots: &[PathBuf], max_depth: usize) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut visited = HashSet::new();
    let mut queue: VecDeque<(PathBuf, usize)> =
        roots.iter().map(|root| (root.clone(), 0)).collect();

    while let Some((dir, depth)) = queue.pop_front() {
        let key = fs::canonicalize(&dir).unwrap_or_else(|_| dir.clone());
        if !visited.insert(key) {
            continue;
        }

        if sidecar::exists(&dir) {
            debug!("found sidecar in {:?}", dir.display());
            found.push(dir.clone());
        }

        if depth >= max_depth {
            continue;
        }

        // INVARIANT: Unreadable directories are not an error, just skipped.
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }

            let name = entry.file_name();
            if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
                continue;
            }

            queue.push_back((entry.path(), depth + 1));
        }
    }

    found
}

/// Match found sidecars against the index.
///
/// Global workspaces only ever live below `envs_dir`. A global sidecar found
/// anywhere else is reported as orphaned rather than followed.
pub fn plan(index: &Index, envs_dir: &Path, sidecar_dirs: &[PathBuf]) -> Plan {
    let mut findings = Vec::new();
    let mut claimed: HashSet<Uuid> = HashSet::new();

    for dir in sidecar_dirs {
        let sidecar = match sidecar::read_any(dir) {
            Ok(Some(sidecar)) => sidecar,
            Ok(None) => continue,
            Err(err) => {
                warn!("skip {:?}: {err}", dir.display());
                continue;
            }
        };

        findings.push(reconcile(index, envs_dir, dir, &sidecar, &mut claimed));
    }

    // INVARIANT: Moved workspaces are not stale, their old path is gone by
    // definition.
    for workspace in index.workspaces.values() {
        if !workspace.path.exists() && !claimed.contains(&workspace.id) {
            findings.push(Finding::Stale {
                id: workspace.id,
                path: workspace.path.clone(),
            });
        }
    }

    Plan { findings }
}

fn reconcile(
    index: &Index,
    envs_dir: &Path,
    dir: &Path,
    sidecar: &Sidecar,
    claimed: &mut HashSet<Uuid>,
) -> Finding {
    let orphaned = || Finding::Orphaned {
        path: dir.to_path_buf(),
        spec_name: sidecar.origin.spec_name.clone(),
        version_name: sidecar.origin.version_name.clone(),
    };

    let workspace = match sidecar.id {
        Some(id) => index.find_by_id(id),
        None => index.find_by_path(dir),
    };
    let Some(workspace) = workspace else {
        return orphaned();
    };

    if workspace.path == dir {
        claimed.insert(workspace.id);
        return Finding::Ok {
            id: workspace.id,
            path: dir.to_path_buf(),
        };
    }

    // INVARIANT: Global trees belong to nebi, user directories are never
    // adopted as one.
    if workspace.is_global() && !dir.starts_with(envs_dir) {
        return orphaned();
    }

    // INVARIANT: Original still on disk means this is a copy, not a move.
    if workspace.path.exists() || !claimed.insert(workspace.id) {
        return orphaned();
    }

    Finding::PathMoved {
        id: workspace.id,
        from: workspace.path.clone(),
        to: dir.to_path_buf(),
    }
}

/// Apply plan under the index lock.
///
/// Path updates are applied first, then stale workspaces are dropped by id.
/// Returns the number of changes made.
#[instrument(skip(store, plan), level = "debug")]
pub fn apply(store: &IndexStore, plan: &Plan) -> Result<usize> {
    store.update(|index| {
        let mut applied = 0;
        for finding in plan.changes() {
            if let Finding::PathMoved { id, to, .. } = finding {
                match index.relocate(*id, to.clone()) {
                    Ok(()) => applied += 1,
                    Err(err) => warn!("cannot relocate {id}: {err}"),
                }
            }
        }

        for finding in plan.changes() {
            if let Finding::Stale { id, .. } = finding {
                let Some(path) = index.find_by_id(*id).map(|workspace| workspace.path.clone()) else {
                    continue;
                };
                index.remove_workspace(&path)?;
                applied += 1;
            }
        }

        info!("applied {applied} repair changes");
        Ok(applied)
    })
}
