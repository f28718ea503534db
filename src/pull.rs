// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pull a `spec:tag` reference into a workspace.
//!
//! A pull runs in two phases. The network phase fetches the spec files
//! without touching the index. The local phase writes the files and the
//! sidecar, then registers the workspace and records an index entry under the
//! index lock. The lock is never held while waiting on the server.

use crate::{
    digest::digest,
    drift::{classify, Baseline, Status},
    error::{Error, Result},
    fsutil::{create_private_dir, read_optional, remove_optional, write_atomic, SHARED_FILE},
    remote::{fetch, Fetched, Remote},
    resolve::Reference,
    sidecar::{self, Layer, Origin, Sidecar},
    store::{Entry, IndexStore, Workspace, WorkspaceKind},
    SPEC_FILES,
};

use chrono::Utc;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};
use uuid::Uuid;

/// Where and how to pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullOptions {
    /// Target directory of a local pull. Must be absolute.
    pub dir: Option<PathBuf>,

    /// Pull into a nebi-owned directory under `<data_dir>/envs`.
    pub global: bool,

    /// Overwrite spec files that differ from their recorded origin.
    pub force: bool,

    /// Bound on concurrent file fetches.
    pub workers: usize,
}

/// Outcome of a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pulled {
    pub workspace: Workspace,
    pub entry: Entry,

    /// Global directory of an earlier pull was reused.
    pub reused: bool,
}

/// Pull reference into a workspace.
///
/// # Errors
///
/// - Return [`Error::Malformed`] if neither a directory nor `global` was
///   given.
/// - Return [`Error::AlreadyExists`] if a local spec file would be
///   overwritten without `force`.
/// - See [`fetch`] for remote failures.
#[instrument(skip(store, remote, options), level = "debug")]
pub async fn pull(
    store: &IndexStore,
    remote: &impl Remote,
    reference: &Reference,
    options: &PullOptions,
) -> Result<Pulled> {
    let fetched = fetch(remote, reference, options.workers).await?;

    let index = store.load()?;
    let (dir, kind, reused) = if options.global {
        match index.find_global(&fetched.environment.name, &fetched.tag) {
            Some(entry) => (entry.path.clone(), WorkspaceKind::Global, true),
            None => (
                store.envs_dir().join(Uuid::new_v4().to_string()),
                WorkspaceKind::Global,
                false,
            ),
        }
    } else {
        let dir = options
            .dir
            .clone()
            .ok_or_else(|| Error::malformed("pull target", "no directory given"))?;
        (dir, WorkspaceKind::Local, false)
    };

    match kind {
        WorkspaceKind::Global => create_private_dir(&dir)?,
        WorkspaceKind::Local => fs::create_dir_all(&dir).map_err(|err| Error::io(&dir, err))?,
    }
    write_files(&dir, &fetched, options.force)?;

    let id = index
        .find_by_path(&dir)
        .map(|workspace| workspace.id)
        .unwrap_or_else(Uuid::new_v4);
    let now = Utc::now();
    let layers: BTreeMap<String, Layer> = fetched
        .files
        .iter()
        .map(|(name, bytes)| {
            let layer = Layer {
                digest: digest(bytes),
                size: bytes.len() as u64,
            };
            (name.clone(), layer)
        })
        .collect();
    let origin = Origin {
        spec_name: fetched.environment.name.clone(),
        version_name: fetched.tag.clone(),
        version_id: fetched.version,
        server_url: remote.url().to_string(),
        registry_url: None,
        // INVARIANT: REST pulls have no artifact manifest to digest.
        manifest_digest: None,
        pulled_at: now,
    };
    sidecar::write(&dir, &Sidecar::new(id, origin, layers.clone()))?;

    let entry = Entry {
        spec_name: fetched.environment.name.clone(),
        version_name: fetched.tag.clone(),
        version_id: fetched.version,
        path: dir.clone(),
        pulled_at: now,
        layers: layers
            .into_iter()
            .map(|(name, layer)| (name, layer.digest))
            .collect(),
        is_global: kind == WorkspaceKind::Global,
        server_url: Some(remote.url().to_string()),
    };

    let workspace = store.update(|index| {
        let workspace = match index.workspaces.get_mut(&dir) {
            Some(workspace) => {
                workspace.updated_at = now;
                workspace.clone()
            }
            None => {
                let mut workspace = Workspace::new(&fetched.environment.name, &dir, kind);
                workspace.id = id;
                index.add_workspace(workspace.clone())?;
                workspace
            }
        };
        index.add_entry(entry.clone());
        Ok(workspace)
    })?;
    info!("pulled {reference} into {:?}", dir.display());

    Ok(Pulled {
        workspace,
        entry,
        reused,
    })
}

/// Write fetched files into directory.
///
/// Nothing is written if any spec file would clobber local changes. A file
/// may be replaced when it is identical to the incoming one or unchanged
/// since its recorded origin.
fn write_files(dir: &Path, fetched: &Fetched, force: bool) -> Result<()> {
    if !force {
        let baseline = sidecar::read_any(dir)
            .ok()
            .flatten()
            .map(|sidecar| Baseline::from_sidecar(&sidecar));
        let report = classify(dir, baseline.as_ref());

        for name in SPEC_FILES {
            let path = dir.join(name);
            let Some(current) = read_optional(&path)? else {
                continue;
            };

            let incoming = fetched.files.get(name);
            if incoming == Some(&current) || report.file(name) == Some(Status::Clean) {
                continue;
            }

            return Err(Error::already_exists(
                "modified spec file",
                format!("{}, use --force to overwrite", path.display()),
            ));
        }
    }

    for name in SPEC_FILES {
        let path = dir.join(name);
        match fetched.files.get(name) {
            Some(bytes) => write_atomic(&path, bytes, SHARED_FILE)?,
            None => remove_optional(&path)?,
        }
    }

    Ok(())
}
