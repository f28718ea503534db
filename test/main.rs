// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use anyhow::Result;
use assert_cmd::prelude::*;
use nebi::{
    path::{CONFIG_DIR_ENV, DATA_DIR_ENV},
    store::{Index, IndexStore},
};
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};
use tempfile::TempDir;

/// Isolated data directory, config directory, and scratch space for driving
/// the `nebi` binary.
pub(crate) struct Sandbox {
    root: TempDir,
}

impl Sandbox {
    pub(crate) fn new() -> Result<Self> {
        let root = TempDir::new()?;
        fs::create_dir_all(root.path().join("data"))?;
        fs::create_dir_all(root.path().join("config"))?;
        fs::create_dir_all(root.path().join("work"))?;

        Ok(Self { root })
    }

    pub(crate) fn data_dir(&self) -> PathBuf {
        self.root.path().join("data")
    }

    pub(crate) fn config_dir(&self) -> PathBuf {
        self.root.path().join("config")
    }

    /// Path inside the scratch space.
    pub(crate) fn work(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.path().join("work").join(path)
    }

    /// Create project directory holding a `pixi.toml`.
    pub(crate) fn project(&self, path: impl AsRef<Path>, manifest: impl AsRef<str>) -> Result<PathBuf> {
        let dir = self.work(path);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(nebi::MANIFEST_FILE), manifest.as_ref())?;

        Ok(dir)
    }

    /// Command running `nebi` inside target directory against the sandbox.
    pub(crate) fn nebi(&self, cwd: impl AsRef<Path>) -> Result<Command> {
        let mut cmd = Command::cargo_bin("nebi")?;
        cmd.current_dir(cwd.as_ref())
            .env(DATA_DIR_ENV, self.data_dir())
            .env(CONFIG_DIR_ENV, self.config_dir())
            .env_remove("RUST_LOG");

        Ok(cmd)
    }

    pub(crate) fn store(&self) -> Result<IndexStore> {
        Ok(IndexStore::open(self.data_dir())?)
    }

    pub(crate) fn index(&self) -> Result<Index> {
        Ok(self.store()?.load()?)
    }
}

pub(crate) fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub(crate) fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
