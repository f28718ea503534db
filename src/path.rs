// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where nebi keeps the files it owns. The data directory holds the
//! index, snapshots, and global workspace trees. The config directory holds
//! credentials and the default-server pointer. Both can be redirected through
//! environment variables, which is mainly useful for tests and sandboxes.

use std::{env, path::PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "NEBI_DATA_DIR";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "NEBI_CONFIG_DIR";

/// Determine default absolute path to nebi's data directory.
///
/// Uses `$NEBI_DATA_DIR` when set, otherwise the XDG Base Directory path
/// `$XDG_DATA_HOME/nebi` (or platform equivalent). Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if the platform data directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_data_dir() -> Result<PathBuf> {
    if let Some(path) = env::var_os(DATA_DIR_ENV).filter(|path| !path.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    dirs::data_dir()
        .map(|path| path.join("nebi"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to nebi's config directory.
///
/// Uses `$NEBI_CONFIG_DIR` when set, otherwise `$XDG_CONFIG_HOME/nebi`.
///
/// # Errors
///
/// - Return [`NoWayHome`] if the platform config directory cannot be determined.
pub fn default_config_dir() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_DIR_ENV).filter(|path| !path.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    dirs::config_dir()
        .map(|path| path.join("nebi"))
        .ok_or(NoWayHome)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
