// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Local index store.
//!
//! Nebi keeps a single catalog of everything it tracks called the __index__.
//! The index lives at `<data_dir>/index.json` and records every tracked
//! workspace, every registered server, and every pulled reference.
//!
//! # Concurrency
//!
//! Several nebi invocations may run at once. Every read-modify-write of the
//! index happens while holding an exclusive advisory lock on the sibling file
//! `index.lock`. The lock is tied to an RAII guard, so it is released on every
//! exit path including panics. Readers never lock; they may observe a slightly
//! stale index, but never a partial one, because writes go through
//! write-temp-fsync-rename.
//!
//! # Versioning
//!
//! The index carries an integer `version`. Older documents are upgraded in
//! place on open. Documents from a newer nebi are refused outright.

use crate::{
    error::{Error, Result},
    fsutil::{create_private_dir, read_optional, write_atomic, FileLock, PRIVATE_FILE},
};

use chrono::{DateTime, Utc};
use serde::{de::Error as _, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    cmp::Reverse,
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Current index schema version.
pub const INDEX_VERSION: u32 = 2;

/// File name of the index inside the data directory.
pub const INDEX_FILE: &str = "index.json";

/// File name of the advisory lock guarding the index.
pub const INDEX_LOCK_FILE: &str = "index.lock";

/// Persisted catalog of tracked workspaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub version: u32,

    /// Tracked workspaces keyed by absolute path.
    #[serde(default)]
    pub workspaces: BTreeMap<PathBuf, Workspace>,

    /// Registered servers, short name to URL.
    #[serde(default)]
    pub servers: BTreeMap<String, String>,

    /// Pulled references.
    #[serde(default)]
    pub entries: Vec<Entry>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            workspaces: BTreeMap::new(),
            servers: BTreeMap::new(),
            entries: Vec::new(),
        }
    }
}

/// Unit of tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub path: PathBuf,
    pub kind: WorkspaceKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// Construct new workspace with a fresh identifier.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, kind: WorkspaceKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            kind,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_global(&self) -> bool {
        self.kind == WorkspaceKind::Global
    }
}

/// Where the files of a workspace live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceKind {
    /// User-owned directory nebi only references.
    Local,

    /// Directory under the data directory that nebi owns.
    Global,
}

impl Display for WorkspaceKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Local => fmt.write_str("local"),
            Self::Global => fmt.write_str("global"),
        }
    }
}

/// Pulled reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub spec_name: String,
    pub version_name: String,
    pub version_id: u64,
    pub path: PathBuf,
    pub pulled_at: DateTime<Utc>,

    /// Layer digests keyed by file name.
    #[serde(default)]
    pub layers: BTreeMap<String, String>,

    #[serde(default)]
    pub is_global: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
}

impl Index {
    /// Construct new empty index at the current version.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track new workspace.
    ///
    /// # Errors
    ///
    /// - Return [`Error::AlreadyExists`] if the path or the id is already
    ///   tracked.
    pub fn add_workspace(&mut self, workspace: Workspace) -> Result<()> {
        if self.workspaces.contains_key(&workspace.path) {
            return Err(Error::already_exists(
                "workspace",
                workspace.path.display().to_string(),
            ));
        }

        if self.find_by_id(workspace.id).is_some() {
            return Err(Error::already_exists("workspace", workspace.id.to_string()));
        }

        self.workspaces.insert(workspace.path.clone(), workspace);
        Ok(())
    }

    /// Stop tracking workspace at path, dropping its pulled entries as well.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if nothing is tracked at path.
    pub fn remove_workspace(&mut self, path: impl AsRef<Path>) -> Result<Workspace> {
        let path = path.as_ref();
        let workspace = self
            .workspaces
            .remove(path)
            .ok_or_else(|| Error::not_found("workspace", path.display().to_string()))?;
        self.entries.retain(|entry| entry.path != path);

        Ok(workspace)
    }

    /// Move tracked workspace to a new path, keeping its identity.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if no workspace has the given id.
    /// - Return [`Error::AlreadyExists`] if the new path is already tracked.
    pub fn relocate(&mut self, id: Uuid, to: impl Into<PathBuf>) -> Result<()> {
        let to = to.into();
        let from = self
            .find_by_id(id)
            .map(|workspace| workspace.path.clone())
            .ok_or_else(|| Error::not_found("workspace", id.to_string()))?;
        if from == to {
            return Ok(());
        }

        if self.workspaces.contains_key(&to) {
            return Err(Error::already_exists("workspace", to.display().to_string()));
        }

        // INVARIANT: Entries follow their workspace so paths stay consistent.
        if let Some(mut workspace) = self.workspaces.remove(&from) {
            workspace.path = to.clone();
            workspace.updated_at = Utc::now();
            self.workspaces.insert(to.clone(), workspace);
        }
        for entry in self.entries.iter_mut().filter(|entry| entry.path == from) {
            entry.path = to.clone();
        }

        Ok(())
    }

    pub fn find_by_path(&self, path: impl AsRef<Path>) -> Option<&Workspace> {
        self.workspaces.get(path.as_ref())
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<&Workspace> {
        self.workspaces.values().find(|workspace| workspace.id == id)
    }

    pub fn find_global_by_name(&self, name: &str) -> Option<&Workspace> {
        self.workspaces
            .values()
            .find(|workspace| workspace.is_global() && workspace.name == name)
    }

    /// Find tracked workspace by name.
    ///
    /// A global workspace wins over local ones. Among local workspaces the
    /// most recently pulled wins, with ties broken by lexicographic path.
    pub fn find_by_name(&self, name: &str) -> Option<&Workspace> {
        if let Some(global) = self.find_global_by_name(name) {
            return Some(global);
        }

        self.workspaces
            .values()
            .filter(|workspace| workspace.name == name)
            .min_by_key(|workspace| {
                (
                    Reverse(self.last_pulled(&workspace.path)),
                    workspace.path.clone(),
                )
            })
    }

    /// Time the workspace at path was last pulled into, if ever.
    pub fn last_pulled(&self, path: impl AsRef<Path>) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .filter(|entry| entry.path == path.as_ref())
            .map(|entry| entry.pulled_at)
            .max()
    }

    /// Record pulled reference.
    ///
    /// A previous entry for the same path and `spec:tag` is replaced.
    pub fn add_entry(&mut self, entry: Entry) {
        self.entries.retain(|existing| {
            !(existing.path == entry.path
                && existing.spec_name == entry.spec_name
                && existing.version_name == entry.version_name)
        });
        self.entries.push(entry);
    }

    /// Every pulled entry for `spec:tag`.
    pub fn find_by_tag(&self, spec: &str, tag: &str) -> Vec<&Entry> {
        self.entries
            .iter()
            .filter(|entry| entry.spec_name == spec && entry.version_name == tag)
            .collect()
    }

    /// Global pulled entry for `spec:tag`.
    pub fn find_global(&self, spec: &str, tag: &str) -> Option<&Entry> {
        self.find_by_tag(spec, tag)
            .into_iter()
            .find(|entry| entry.is_global)
    }

    /// Most recent pulled entry for workspace path.
    pub fn latest_entry(&self, path: impl AsRef<Path>) -> Option<&Entry> {
        self.entries
            .iter()
            .filter(|entry| entry.path == path.as_ref())
            .max_by_key(|entry| entry.pulled_at)
    }

    /// Register server under short name.
    ///
    /// # Errors
    ///
    /// - Return [`Error::AlreadyExists`] if the name is taken.
    pub fn add_server(&mut self, name: impl Into<String>, url: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.servers.contains_key(&name) {
            return Err(Error::already_exists("server", name));
        }

        self.servers.insert(name, url.into());
        Ok(())
    }

    /// Forget server by short name.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if no server has that name.
    pub fn remove_server(&mut self, name: &str) -> Result<String> {
        self.servers
            .remove(name)
            .ok_or_else(|| Error::not_found("server", name))
    }

    /// Translate server short name or URL into a URL.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if the value is neither a registered name
    ///   nor a URL.
    pub fn server_url(&self, name_or_url: &str) -> Result<String> {
        if let Some(url) = self.servers.get(name_or_url) {
            return Ok(url.clone());
        }

        if name_or_url.starts_with("http://") || name_or_url.starts_with("https://") {
            return Ok(name_or_url.trim_end_matches('/').to_string());
        }

        Err(Error::not_found("server", name_or_url))
    }
}

/// Handle to the index inside a data directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    data_dir: PathBuf,
}

impl IndexStore {
    /// Open index store at target data directory.
    ///
    /// Creates the data directory (0700) if missing, and upgrades an older
    /// index in place.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Io`] if the data directory cannot be created.
    /// - Return [`Error::Corrupt`] if the index cannot be parsed.
    /// - Return [`Error::UnsupportedVersion`] if the index is from a newer nebi.
    #[instrument(skip(data_dir), level = "debug")]
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            data_dir: data_dir.into(),
        };
        create_private_dir(&store.data_dir)?;

        if store.read()?.1 {
            store.update(|index| {
                info!("upgrade index to version {}", index.version);
                Ok(())
            })?;
        }

        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_LOCK_FILE)
    }

    /// Directory holding global workspace trees.
    pub fn envs_dir(&self) -> PathBuf {
        self.data_dir.join("envs")
    }

    /// Load the whole index without locking.
    ///
    /// A missing index yields an empty index at the current version.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Corrupt`] if the index cannot be parsed.
    /// - Return [`Error::UnsupportedVersion`] if the index is from a newer nebi.
    pub fn load(&self) -> Result<Index> {
        self.read().map(|(index, _)| index)
    }

    /// Replace the whole index.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Io`] if the lock or the atomic write fails.
    pub fn save(&self, index: &Index) -> Result<()> {
        let _lock = self.lock()?;
        self.persist(index)
    }

    /// Load, modify, and save the index while holding the index lock.
    ///
    /// The closure's result is returned. If the closure fails, nothing is
    /// written.
    ///
    /// # Errors
    ///
    /// - Return whatever the closure returns.
    /// - See [`IndexStore::load`] and [`IndexStore::save`].
    pub fn update<T, F>(&self, editor: F) -> Result<T>
    where
        F: FnOnce(&mut Index) -> Result<T>,
    {
        let _lock = self.lock()?;

        // INVARIANT: Re-read under the lock, never reuse an earlier load.
        let (mut index, _) = self.read()?;
        let result = editor(&mut index)?;
        self.persist(&index)?;

        Ok(result)
    }

    pub fn add_workspace(&self, workspace: Workspace) -> Result<()> {
        self.update(|index| index.add_workspace(workspace))
    }

    pub fn remove_workspace(&self, path: impl AsRef<Path>) -> Result<Workspace> {
        self.update(|index| index.remove_workspace(path))
    }

    pub fn add_entry(&self, entry: Entry) -> Result<()> {
        self.update(|index| {
            index.add_entry(entry);
            Ok(())
        })
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<Workspace>> {
        Ok(self.load()?.find_by_name(name).cloned())
    }

    pub fn find_by_path(&self, path: impl AsRef<Path>) -> Result<Option<Workspace>> {
        Ok(self.load()?.find_by_path(path).cloned())
    }

    pub fn find_global_by_name(&self, name: &str) -> Result<Option<Workspace>> {
        Ok(self.load()?.find_global_by_name(name).cloned())
    }

    pub fn find_by_tag(&self, spec: &str, tag: &str) -> Result<Vec<Entry>> {
        Ok(self
            .load()?
            .find_by_tag(spec, tag)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn find_global(&self, spec: &str, tag: &str) -> Result<Option<Entry>> {
        Ok(self.load()?.find_global(spec, tag).cloned())
    }

    /// Acquire the exclusive index lock, blocking until it is free.
    #[instrument(skip(self), level = "debug")]
    pub(crate) fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(self.lock_path())
    }

    fn read(&self) -> Result<(Index, bool)> {
        let path = self.index_path();
        let Some(bytes) = read_optional(&path)? else {
            return Ok((Index::new(), false));
        };

        let value: Value = serde_json::from_slice(&bytes).map_err(|err| Error::Corrupt {
            source: err,
            path: path.clone(),
        })?;
        let (value, migrated) = migrate(value, &path)?;
        let index = serde_json::from_value(value).map_err(|err| Error::Corrupt {
            source: err,
            path: path.clone(),
        })?;

        Ok((index, migrated))
    }

    fn persist(&self, index: &Index) -> Result<()> {
        let path = self.index_path();
        let mut bytes = serde_json::to_vec_pretty(index).map_err(|err| Error::Corrupt {
            source: err,
            path: path.clone(),
        })?;
        bytes.push(b'\n');
        write_atomic(&path, &bytes, PRIVATE_FILE)
    }
}

/// Structural upgrade from one version to the next.
type Migration = fn(&mut Map<String, Value>) -> std::result::Result<(), String>;

/// Known upgrades, where `MIGRATIONS[n]` upgrades version `n + 1` to `n + 2`.
const MIGRATIONS: [Migration; 1] = [migrate_v1_to_v2];

fn migrate(value: Value, path: &Path) -> Result<(Value, bool)> {
    let Value::Object(mut document) = value else {
        return Err(corrupt(path, "document is not an object"));
    };

    // INVARIANT: Documents without a version predate versioning, i.e., are v1.
    let found = match document.get("version") {
        None => 1,
        Some(version) => version
            .as_u64()
            .and_then(|version| u32::try_from(version).ok())
            .ok_or_else(|| corrupt(path, "version is not an integer"))?,
    };

    if found > INDEX_VERSION {
        return Err(Error::UnsupportedVersion {
            path: path.to_path_buf(),
            found,
            supported: INDEX_VERSION,
        });
    }

    let mut version = found.max(1);
    while version < INDEX_VERSION {
        debug!("migrate index from version {version}");
        MIGRATIONS[(version - 1) as usize](&mut document)
            .map_err(|reason| corrupt(path, reason))?;
        version += 1;
    }
    document.insert("version".into(), Value::from(INDEX_VERSION));

    Ok((Value::Object(document), found < INDEX_VERSION))
}

/// Structurally invalid document that still parsed as JSON.
fn corrupt(path: &Path, reason: impl Display) -> Error {
    Error::Corrupt {
        source: serde_json::Error::custom(reason),
        path: path.to_path_buf(),
    }
}

/// Version 1 stored workspaces as a list and had no server registry.
fn migrate_v1_to_v2(document: &mut Map<String, Value>) -> std::result::Result<(), String> {
    let workspaces = match document.remove("workspaces") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Array(list)) => {
            let mut map = Map::new();
            for workspace in list {
                let path = workspace
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or("workspace without path")?
                    .to_string();
                map.insert(path, workspace);
            }
            map
        }
        Some(Value::Object(map)) => map,
        Some(_) => return Err("workspaces is neither a list nor a map".into()),
    };

    document.insert("workspaces".into(), Value::Object(workspaces));
    document
        .entry("servers")
        .or_insert_with(|| Value::Object(Map::new()));
    document
        .entry("entries")
        .or_insert_with(|| Value::Array(Vec::new()));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn entry(spec: &str, tag: &str, path: &str, pulled_at: &str) -> Entry {
        Entry {
            spec_name: spec.into(),
            version_name: tag.into(),
            version_id: 1,
            path: path.into(),
            pulled_at: pulled_at.parse().unwrap(),
            layers: BTreeMap::new(),
            is_global: false,
            server_url: None,
        }
    }

    #[test]
    fn load_missing_index_is_empty() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = IndexStore::open(dir.path().join("data"))?;

        assert_eq!(store.load()?, Index::new());
        assert!(store.data_dir().is_dir());
        assert!(!store.index_path().exists());
        Ok(())
    }

    #[test]
    fn add_workspace_save_load() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = IndexStore::open(dir.path())?;
        let workspace = Workspace::new("x", "/work/x", WorkspaceKind::Local);

        store.add_workspace(workspace.clone())?;
        let index = store.load()?;

        assert_eq!(index.workspaces.len(), 1);
        assert_eq!(index.find_by_path("/work/x"), Some(&workspace));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(store.index_path())?.permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
        Ok(())
    }

    #[test]
    fn duplicate_path_or_id_is_rejected() {
        let mut index = Index::new();
        let first = Workspace::new("x", "/work/x", WorkspaceKind::Local);
        index.add_workspace(first.clone()).unwrap();

        let same_path = Workspace::new("y", "/work/x", WorkspaceKind::Local);
        let err = index.add_workspace(same_path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let mut same_id = Workspace::new("z", "/work/z", WorkspaceKind::Local);
        same_id.id = first.id;
        let err = index.add_workspace(same_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn find_by_name_prefers_global_then_latest_pull() {
        let mut index = Index::new();
        let older = Workspace::new("ds", "/b/ds", WorkspaceKind::Local);
        let newer = Workspace::new("ds", "/c/ds", WorkspaceKind::Local);
        let never = Workspace::new("ds", "/a/ds", WorkspaceKind::Local);
        index.add_workspace(older).unwrap();
        index.add_workspace(newer).unwrap();
        index.add_workspace(never).unwrap();
        index.add_entry(entry("ds", "v1", "/b/ds", "2025-01-01T00:00:00Z"));
        index.add_entry(entry("ds", "v2", "/c/ds", "2025-02-01T00:00:00Z"));

        assert_eq!(index.find_by_name("ds").unwrap().path, PathBuf::from("/c/ds"));

        let global = Workspace::new("ds", "/data/envs/1", WorkspaceKind::Global);
        index.add_workspace(global).unwrap();
        assert_eq!(
            index.find_by_name("ds").unwrap().path,
            PathBuf::from("/data/envs/1")
        );
    }

    #[test]
    fn find_by_name_breaks_ties_by_path() {
        let mut index = Index::new();
        index
            .add_workspace(Workspace::new("ds", "/z/ds", WorkspaceKind::Local))
            .unwrap();
        index
            .add_workspace(Workspace::new("ds", "/a/ds", WorkspaceKind::Local))
            .unwrap();

        assert_eq!(index.find_by_name("ds").unwrap().path, PathBuf::from("/a/ds"));
    }

    #[test]
    fn entries_by_tag_and_global() {
        let mut index = Index::new();
        index.add_entry(entry("ds", "v1", "/a", "2025-01-01T00:00:00Z"));
        let mut global = entry("ds", "v1", "/data/envs/1", "2025-01-02T00:00:00Z");
        global.is_global = true;
        index.add_entry(global.clone());
        index.add_entry(entry("ds", "v2", "/a", "2025-01-03T00:00:00Z"));

        assert_eq!(index.find_by_tag("ds", "v1").len(), 2);
        assert_eq!(index.find_global("ds", "v1"), Some(&global));
        assert_eq!(index.find_global("ds", "v2"), None);

        // Re-pull of same tag into same path replaces entry.
        index.add_entry(entry("ds", "v1", "/a", "2025-03-01T00:00:00Z"));
        assert_eq!(index.find_by_tag("ds", "v1").len(), 2);
    }

    #[test]
    fn remove_and_relocate_keep_entries_consistent() -> anyhow::Result<()> {
        let mut index = Index::new();
        let workspace = Workspace::new("ds", "/a", WorkspaceKind::Local);
        let id = workspace.id;
        index.add_workspace(workspace)?;
        index.add_entry(entry("ds", "v1", "/a", "2025-01-01T00:00:00Z"));

        index.relocate(id, "/b")?;
        assert!(index.find_by_path("/a").is_none());
        assert_eq!(index.find_by_path("/b").unwrap().id, id);
        assert_eq!(index.entries[0].path, PathBuf::from("/b"));

        index.remove_workspace("/b")?;
        assert!(index.entries.is_empty());
        assert_eq!(index.remove_workspace("/b").unwrap_err().kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[test]
    fn corrupt_index_is_reported() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = IndexStore::open(dir.path())?;
        fs::write(store.index_path(), "{ not json")?;

        assert_eq!(store.load().unwrap_err().kind(), ErrorKind::Corrupt);
        Ok(())
    }

    #[test]
    fn structurally_invalid_index_is_corrupt() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = IndexStore::open(dir.path())?;

        for document in ["[]", r#"{"version": "two"}"#, r#"{"version": 1, "workspaces": 3}"#] {
            fs::write(store.index_path(), document)?;
            let err = store.load().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Corrupt, "{document}");
            assert!(err.to_string().contains(&store.index_path().display().to_string()));
        }
        Ok(())
    }

    #[test]
    fn newer_index_is_unsupported() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join(INDEX_FILE), r#"{"version": 99}"#)?;

        let err = IndexStore::open(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);
        Ok(())
    }

    #[test]
    fn version_one_index_is_upgraded_in_place() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(
            dir.path().join(INDEX_FILE),
            indoc! {r#"
                {
                  "version": 1,
                  "workspaces": [
                    {
                      "id": "0b5d6f2c-5a6e-4f0e-9a53-0d7b0c1b5f10",
                      "name": "x",
                      "path": "/work/x",
                      "kind": "local",
                      "created_at": "2025-01-01T00:00:00Z",
                      "updated_at": "2025-01-01T00:00:00Z"
                    }
                  ]
                }
            "#},
        )?;

        let store = IndexStore::open(dir.path())?;
        let index = store.load()?;
        assert_eq!(index.version, INDEX_VERSION);
        assert_eq!(index.find_by_path("/work/x").unwrap().name, "x");

        let raw: Value = serde_json::from_slice(&fs::read(store.index_path())?)?;
        assert_eq!(raw["version"], Value::from(INDEX_VERSION));
        assert!(raw["workspaces"].is_object());
        Ok(())
    }

    #[test]
    fn failed_update_writes_nothing() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = IndexStore::open(dir.path())?;
        store.add_workspace(Workspace::new("x", "/work/x", WorkspaceKind::Local))?;
        let before = fs::read(store.index_path())?;

        let result = store.update(|index| {
            index.workspaces.clear();
            Err::<(), _>(Error::Cancelled)
        });

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
        assert_eq!(fs::read(store.index_path())?, before);
        Ok(())
    }

    #[test]
    fn server_registry() {
        let mut index = Index::new();
        index.add_server("work", "https://nebi.example.org").unwrap();

        assert_eq!(index.server_url("work").unwrap(), "https://nebi.example.org");
        assert_eq!(
            index.server_url("https://other.example.org/").unwrap(),
            "https://other.example.org"
        );
        assert_eq!(
            index.add_server("work", "https://x").unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
        assert_eq!(index.server_url("nope").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(index.remove_server("nope").unwrap_err().kind(), ErrorKind::NotFound);
    }
}
