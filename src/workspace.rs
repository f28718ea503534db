// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Workspace lifecycle.
//!
//! Operations here tie the index, the snapshot store, and the global
//! workspace tree together: tracking a directory, committing its spec files,
//! promoting it into a nebi-owned global workspace, and forgetting it again.

use crate::{
    drift::Status,
    error::{Error, Result},
    fsutil::{create_private_dir, read_optional, write_atomic, SHARED_FILE},
    resolve::validate_name,
    sidecar,
    snapshot::{status, SnapshotStore},
    store::{IndexStore, Workspace, WorkspaceKind},
    MANIFEST_FILE, SPEC_FILES,
};

use chrono::Utc;
use std::{fs, io::ErrorKind, path::Path};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Result of committing a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Spec files were snapshotted.
    Committed,

    /// Workspace was pulled, its origin stays the baseline.
    OriginAuthoritative,
}

/// Workspace with its current drift status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listed {
    pub workspace: Workspace,
    pub status: Status,
}

/// Track directory as a local workspace.
///
/// Without an explicit name, the name comes from `[workspace].name` of the
/// manifest, then legacy `[project].name`, then the directory name.
///
/// # Errors
///
/// - Return [`Error::NotFound`] if the directory has no `pixi.toml`.
/// - Return [`Error::Malformed`] if the name is not valid.
/// - Return [`Error::AlreadyExists`] if the directory is already tracked.
#[instrument(skip(store, dir), level = "debug")]
pub fn init(store: &IndexStore, dir: impl AsRef<Path>, name: Option<&str>) -> Result<Workspace> {
    let dir = dir.as_ref();
    let manifest = read_optional(&dir.join(MANIFEST_FILE))?
        .ok_or_else(|| Error::not_found("spec file", dir.join(MANIFEST_FILE).display().to_string()))?;

    let name = match name {
        Some(name) => name.to_string(),
        None => default_name(dir, &String::from_utf8_lossy(&manifest)),
    };
    validate_name(&name)?;

    let workspace = Workspace::new(name, dir, WorkspaceKind::Local);
    store.update(|index| index.add_workspace(workspace.clone()))?;
    info!("tracking {:?} as {:?}", dir.display(), workspace.name);

    Ok(workspace)
}

fn default_name(dir: &Path, manifest: &str) -> String {
    let from_manifest = manifest.parse::<toml::Table>().ok().and_then(|table| {
        ["workspace", "project"].into_iter().find_map(|section| {
            table
                .get(section)
                .and_then(|section| section.get("name"))
                .and_then(|name| name.as_str())
                .map(str::to_string)
        })
    });

    from_manifest.unwrap_or_else(|| {
        dir.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    })
}

/// Snapshot spec files of tracked workspace.
///
/// Pulled workspaces are left alone, their sidecar or pull entry stays the
/// baseline.
///
/// # Errors
///
/// - Return [`Error::NotFound`] if the directory is not tracked.
#[instrument(skip(store, snapshots, dir), level = "debug")]
pub fn commit(store: &IndexStore, snapshots: &SnapshotStore, dir: impl AsRef<Path>) -> Result<CommitOutcome> {
    let dir = dir.as_ref();
    let index = store.load()?;
    let workspace = index
        .find_by_path(dir)
        .cloned()
        .ok_or_else(|| Error::not_found("workspace", dir.display().to_string()))?;

    // INVARIANT: Same precedence as status, a sidecar or pull entry outranks
    // any snapshot.
    if sidecar::exists(dir) || index.latest_entry(dir).is_some() {
        warn!("origin is authoritative; use push to publish changes");
        return Ok(CommitOutcome::OriginAuthoritative);
    }

    snapshots.commit(workspace.id, dir)?;
    store.update(|index| {
        if let Some(workspace) = index.workspaces.get_mut(dir) {
            workspace.updated_at = Utc::now();
        }
        Ok(())
    })?;

    Ok(CommitOutcome::Committed)
}

/// Copy spec files of directory into a new global workspace.
///
/// # Errors
///
/// - Return [`Error::Malformed`] if the name is not valid.
/// - Return [`Error::AlreadyExists`] if a global workspace has that name.
/// - Return [`Error::NotFound`] if the source has no `pixi.toml`.
#[instrument(skip(store, snapshots, src_dir), level = "debug")]
pub fn promote(
    store: &IndexStore,
    snapshots: &SnapshotStore,
    src_dir: impl AsRef<Path>,
    name: &str,
) -> Result<Workspace> {
    validate_name(name)?;
    let src_dir = src_dir.as_ref();
    if store.find_global_by_name(name)?.is_some() {
        return Err(Error::already_exists("global workspace", name));
    }

    let mut files = Vec::new();
    for file in SPEC_FILES {
        if let Some(bytes) = read_optional(&src_dir.join(file))? {
            files.push((file, bytes));
        }
    }
    if !files.iter().any(|(file, _)| *file == MANIFEST_FILE) {
        return Err(Error::not_found(
            "spec file",
            src_dir.join(MANIFEST_FILE).display().to_string(),
        ));
    }

    let dir = store.envs_dir().join(Uuid::new_v4().to_string());
    let workspace = Workspace::new(name, &dir, WorkspaceKind::Global);
    let result = (|| -> Result<()> {
        create_private_dir(&dir)?;
        for (file, bytes) in &files {
            write_atomic(&dir.join(file), bytes, SHARED_FILE)?;
        }
        snapshots.commit(workspace.id, &dir)?;
        store.update(|index| {
            if index.find_global_by_name(name).is_some() {
                return Err(Error::already_exists("global workspace", name));
            }
            index.add_workspace(workspace.clone())
        })
    })();

    // INVARIANT: A failed promotion leaves no half-built global tree behind.
    if let Err(err) = result {
        remove_tree(&dir);
        let _ = snapshots.remove(workspace.id);
        return Err(err);
    }
    info!("promoted {:?} into global workspace {name:?}", src_dir.display());

    Ok(workspace)
}

/// Stop tracking workspace.
///
/// The directory of a global workspace is deleted with it, but only if it
/// lies below the global tree. Anything else belongs to the user and is never
/// touched.
///
/// # Errors
///
/// - Return [`Error::NotFound`] if nothing is tracked at path.
#[instrument(skip(store, snapshots, path), level = "debug")]
pub fn remove(store: &IndexStore, snapshots: &SnapshotStore, path: impl AsRef<Path>) -> Result<Workspace> {
    let workspace = store.remove_workspace(path)?;
    if workspace.is_global() && workspace.path.starts_with(store.envs_dir()) {
        remove_tree(&workspace.path);
    } else if workspace.is_global() {
        warn!("leave {:?} in place, it is outside the global tree", workspace.path.display());
    }
    snapshots.remove(workspace.id)?;

    Ok(workspace)
}

/// Forget every workspace whose directory no longer exists.
///
/// Returns the workspaces removed.
#[instrument(skip(store, snapshots), level = "debug")]
pub fn prune(store: &IndexStore, snapshots: &SnapshotStore) -> Result<Vec<Workspace>> {
    let removed = store.update(|index| {
        let missing: Vec<_> = index
            .workspaces
            .keys()
            .filter(|path| !path.exists())
            .cloned()
            .collect();

        missing
            .into_iter()
            .map(|path| index.remove_workspace(path))
            .collect::<Result<Vec<_>>>()
    })?;

    for workspace in &removed {
        snapshots.remove(workspace.id)?;
        debug!("pruned {:?}", workspace.path.display());
    }

    Ok(removed)
}

/// Every tracked workspace with its status, sorted by name then path.
///
/// Reads without locking, so the result is a point-in-time view.
pub fn list(store: &IndexStore, snapshots: &SnapshotStore) -> Result<Vec<Listed>> {
    let index = store.load()?;
    let mut listed: Vec<_> = index
        .workspaces
        .values()
        .map(|workspace| Listed {
            workspace: workspace.clone(),
            status: status(&index, snapshots, &workspace.path).status,
        })
        .collect();
    listed.sort_by(|a, b| {
        (&a.workspace.name, &a.workspace.path).cmp(&(&b.workspace.name, &b.workspace.path))
    });

    Ok(listed)
}

fn remove_tree(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!("cannot remove {:?}: {err}", dir.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{digest::digest, drift::BaselineSource, error::ErrorKind as NebiErrorKind, store::Entry};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct Fixture {
        _data: TempDir,
        project: TempDir,
        store: IndexStore,
        snapshots: SnapshotStore,
    }

    fn fixture(manifest: &str) -> Fixture {
        let data = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(project.path().join(MANIFEST_FILE), manifest).unwrap();
        let store = IndexStore::open(data.path()).unwrap();
        let snapshots = SnapshotStore::new(data.path());

        Fixture {
            _data: data,
            project,
            store,
            snapshots,
        }
    }

    #[test_case(indoc! {r#"
        [workspace]
        name = "x"
    "#}, "x"; "workspace name")]
    #[test_case(indoc! {r#"
        [project]
        name = "legacy"
    "#}, "legacy"; "project name")]
    #[test]
    fn init_names_workspace_from_manifest(manifest: &str, expect: &str) {
        let fx = fixture(manifest);

        let workspace = init(&fx.store, fx.project.path(), None).unwrap();
        std::assert_eq!(workspace.name, expect);
        std::assert_eq!(workspace.kind, WorkspaceKind::Local);
        std::assert_eq!(fx.store.load().unwrap().workspaces.len(), 1);
    }

    #[test]
    fn init_falls_back_to_directory_name() -> anyhow::Result<()> {
        let fx = fixture("[dependencies]\n");
        let expect = fx.project.path().file_name().unwrap().to_string_lossy().into_owned();

        let workspace = init(&fx.store, fx.project.path(), None)?;
        assert_eq!(workspace.name, expect);
        Ok(())
    }

    #[test]
    fn init_rejects_untrackable_directories() -> anyhow::Result<()> {
        let fx = fixture("[workspace]\nname = \"x\"\n");
        init(&fx.store, fx.project.path(), None)?;

        let err = init(&fx.store, fx.project.path(), Some("y")).unwrap_err();
        assert_eq!(err.kind(), NebiErrorKind::AlreadyExists);

        let empty = TempDir::new()?;
        let err = init(&fx.store, empty.path(), None).unwrap_err();
        assert_eq!(err.kind(), NebiErrorKind::NotFound);
        Ok(())
    }

    #[test]
    fn init_commit_edit_status() -> anyhow::Result<()> {
        let fx = fixture("[workspace]\nname=\"x\"\n");

        init(&fx.store, fx.project.path(), None)?;
        let outcome = commit(&fx.store, &fx.snapshots, fx.project.path())?;
        assert_eq!(outcome, CommitOutcome::Committed);

        let index = fx.store.load()?;
        assert_eq!(status(&index, &fx.snapshots, fx.project.path()).status, Status::Clean);

        fs::write(fx.project.path().join(MANIFEST_FILE), "[workspace]\nname=\"z\"\n")?;
        assert_eq!(status(&index, &fx.snapshots, fx.project.path()).status, Status::Modified);
        Ok(())
    }

    #[test]
    fn commit_requires_tracked_workspace() {
        let fx = fixture("[workspace]\nname=\"x\"\n");

        let err = commit(&fx.store, &fx.snapshots, fx.project.path()).unwrap_err();
        assert_eq!(err.kind(), NebiErrorKind::NotFound);
    }

    #[test_case("foo/bar"; "separator")]
    #[test_case(""; "empty")]
    #[test_case("a:b"; "colon")]
    #[test]
    fn promote_rejects_bad_names(name: &str) {
        let fx = fixture("[workspace]\nname=\"x\"\n");

        let err = promote(&fx.store, &fx.snapshots, fx.project.path(), name).unwrap_err();
        std::assert_eq!(err.kind(), NebiErrorKind::Malformed);
        assert!(fx.store.load().unwrap().workspaces.is_empty());
    }

    #[test]
    fn promote_then_remove_global() -> anyhow::Result<()> {
        let fx = fixture("[workspace]\nname=\"x\"\n");

        let workspace = promote(&fx.store, &fx.snapshots, fx.project.path(), "foo")?;
        assert!(workspace.is_global());
        assert!(workspace.path.starts_with(fx.store.envs_dir()));
        assert_eq!(
            fs::read_to_string(workspace.path.join(MANIFEST_FILE))?,
            "[workspace]\nname=\"x\"\n"
        );

        let index = fx.store.load()?;
        assert_eq!(index.find_by_name("foo").map(|ws| ws.id), Some(workspace.id));
        assert_eq!(status(&index, &fx.snapshots, &workspace.path).status, Status::Clean);

        let err = promote(&fx.store, &fx.snapshots, fx.project.path(), "foo").unwrap_err();
        assert_eq!(err.kind(), NebiErrorKind::AlreadyExists);

        remove(&fx.store, &fx.snapshots, &workspace.path)?;
        assert!(!workspace.path.exists());
        assert!(!fx.snapshots.exists(workspace.id));
        assert!(fx.store.load()?.workspaces.is_empty());
        Ok(())
    }

    #[test]
    fn remove_keeps_local_directory() -> anyhow::Result<()> {
        let fx = fixture("[workspace]\nname=\"x\"\n");
        init(&fx.store, fx.project.path(), None)?;

        remove(&fx.store, &fx.snapshots, fx.project.path())?;
        assert!(fx.project.path().join(MANIFEST_FILE).exists());
        assert!(fx.store.load()?.workspaces.is_empty());
        Ok(())
    }

    #[test]
    fn commit_defers_to_pull_entry_without_sidecar() -> anyhow::Result<()> {
        let manifest = "[workspace]\nname=\"x\"\n";
        let fx = fixture(manifest);
        init(&fx.store, fx.project.path(), None)?;
        fx.store.add_entry(Entry {
            spec_name: "data-science".into(),
            version_name: "v1".into(),
            version_id: 1,
            path: fx.project.path().to_path_buf(),
            pulled_at: Utc::now(),
            layers: BTreeMap::from([(MANIFEST_FILE.to_string(), digest(manifest))]),
            is_global: false,
            server_url: None,
        })?;

        fs::write(fx.project.path().join(MANIFEST_FILE), "[workspace]\nname=\"y\"\n")?;
        let outcome = commit(&fx.store, &fx.snapshots, fx.project.path())?;
        assert_eq!(outcome, CommitOutcome::OriginAuthoritative);

        let report = status(&fx.store.load()?, &fx.snapshots, fx.project.path());
        assert_eq!(report.source, Some(BaselineSource::Entry));
        assert_eq!(report.status, Status::Modified);
        Ok(())
    }

    #[test]
    fn remove_never_deletes_global_outside_envs() -> anyhow::Result<()> {
        let fx = fixture("[workspace]\nname=\"x\"\n");
        fs::write(fx.project.path().join("precious.txt"), "keep")?;
        fx.store.add_workspace(Workspace::new("g1", fx.project.path(), WorkspaceKind::Global))?;

        remove(&fx.store, &fx.snapshots, fx.project.path())?;
        assert!(fx.project.path().join("precious.txt").exists());
        assert!(fx.store.load()?.workspaces.is_empty());
        Ok(())
    }

    #[test]
    fn prune_removes_missing_paths() -> anyhow::Result<()> {
        let fx = fixture("[workspace]\nname=\"x\"\n");
        init(&fx.store, fx.project.path(), Some("a"))?;

        let doomed = TempDir::new()?;
        fs::write(doomed.path().join(MANIFEST_FILE), "[workspace]\nname=\"b\"\n")?;
        let gone = init(&fx.store, doomed.path(), Some("b"))?;
        doomed.close()?;

        let removed = prune(&fx.store, &fx.snapshots)?;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].path, gone.path);

        let listed = list(&fx.store, &fx.snapshots)?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].workspace.name, "a");
        assert!(prune(&fx.store, &fx.snapshots)?.is_empty());
        Ok(())
    }
}
