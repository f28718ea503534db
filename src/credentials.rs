// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Stored server credentials.
//!
//! Credentials are kept apart from the index in `<config_dir>/credentials.json`,
//! a mapping from server URL to `{token, username}`. The file is only ever
//! readable by the user (0600). Writes hold `credentials.lock` for the whole
//! read-modify-write, the same way the index store does.

use crate::{
    error::{Error, Result},
    fsutil::{create_private_dir, read_optional, write_atomic, FileLock, PRIVATE_FILE},
};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// File name of the credentials document inside the config directory.
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// File name of the advisory lock guarding the credentials document.
pub const CREDENTIALS_LOCK_FILE: &str = "credentials.lock";

/// Credential for a single server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,

    #[serde(default)]
    pub username: String,
}

/// Every stored credential keyed by server URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials {
    servers: BTreeMap<String, Credential>,
}

impl Credentials {
    pub fn get(&self, url: &str) -> Option<&Credential> {
        self.servers.get(normalize(url))
    }

    pub fn insert(&mut self, url: &str, credential: Credential) {
        self.servers.insert(normalize(url).to_string(), credential);
    }

    pub fn remove(&mut self, url: &str) -> Option<Credential> {
        self.servers.remove(normalize(url))
    }
}

fn normalize(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Handle to the credentials document inside a config directory.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    config_dir: PathBuf,
}

impl CredentialStore {
    /// Open credential store at target config directory.
    pub fn open(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn path(&self) -> PathBuf {
        self.config_dir.join(CREDENTIALS_FILE)
    }

    /// Load every stored credential without locking.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Corrupt`] if the document cannot be parsed.
    pub fn load(&self) -> Result<Credentials> {
        let path = self.path();
        match read_optional(&path)? {
            None => Ok(Credentials::default()),
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|err| Error::Corrupt { source: err, path })
            }
        }
    }

    /// Credential for server URL.
    ///
    /// # Errors
    ///
    /// - Return [`Error::AuthRequired`] if nothing is stored for the URL.
    pub fn require(&self, url: &str) -> Result<Credential> {
        self.load()?
            .get(url)
            .cloned()
            .ok_or_else(|| Error::AuthRequired {
                url: url.to_string(),
            })
    }

    /// Store credential for server URL, replacing any previous one.
    #[instrument(skip(self, credential), level = "debug")]
    pub fn store(&self, url: &str, credential: Credential) -> Result<()> {
        self.update(|credentials| {
            credentials.insert(url, credential);
            Ok(())
        })
    }

    /// Forget credential for server URL.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotFound`] if nothing is stored for the URL.
    #[instrument(skip(self), level = "debug")]
    pub fn forget(&self, url: &str) -> Result<Credential> {
        self.update(|credentials| {
            credentials
                .remove(url)
                .ok_or_else(|| Error::not_found("credential", url))
        })
    }

    fn update<T, F>(&self, editor: F) -> Result<T>
    where
        F: FnOnce(&mut Credentials) -> Result<T>,
    {
        create_private_dir(&self.config_dir)?;
        let _lock = FileLock::acquire(self.config_dir.join(CREDENTIALS_LOCK_FILE))?;

        let mut credentials = self.load()?;
        let result = editor(&mut credentials)?;

        let path = self.path();
        let bytes = serde_json::to_vec_pretty(&credentials).map_err(|err| Error::Corrupt {
            source: err,
            path: path.clone(),
        })?;
        write_atomic(&path, &bytes, PRIVATE_FILE)?;
        debug!("saved credentials {:?}", path.display());

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn store_require_forget() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = CredentialStore::open(dir.path().join("nebi"));
        let credential = Credential {
            token: "secret".into(),
            username: "alice".into(),
        };

        assert_eq!(
            store.require("https://nebi.example.org").unwrap_err().kind(),
            ErrorKind::AuthRequired
        );

        store.store("https://nebi.example.org/", credential.clone())?;
        assert_eq!(store.require("https://nebi.example.org")?, credential);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(store.path())?.permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }

        store.forget("https://nebi.example.org")?;
        assert_eq!(
            store.forget("https://nebi.example.org").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        Ok(())
    }

    #[test]
    fn document_is_plain_url_mapping() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = CredentialStore::open(dir.path());
        store.store(
            "https://nebi.example.org",
            Credential {
                token: "t".into(),
                username: "bob".into(),
            },
        )?;

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(store.path())?)?;
        assert_eq!(raw["https://nebi.example.org"]["token"], "t");
        assert_eq!(raw["https://nebi.example.org"]["username"], "bob");
        Ok(())
    }
}
