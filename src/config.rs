// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Nebi reads an optional `config.toml` from its config directory. The file
//! holds the default-server pointer, an optional data directory override, and
//! tuning knobs for remote access. A missing file means defaults everywhere.

use crate::{
    error::{Error, Result},
    fsutil::{create_private_dir, read_optional, write_atomic, PRIVATE_FILE},
    path::{default_data_dir, DATA_DIR_ENV},
};

use serde::{Deserialize, Serialize};
use std::{
    env,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

/// File name of the configuration file inside the config directory.
pub const CONFIG_FILE: &str = "config.toml";

/// User configuration.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server short name or URL used when a command names no server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_server: Option<String>,

    /// Data directory to use instead of the platform default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Remote access settings.
    #[serde(default)]
    pub remote: RemoteSettings,
}

/// Remote access settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Deadline of a single request in seconds.
    pub timeout_secs: u64,

    /// Number of concurrent blob fetches.
    pub workers: usize,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            workers: 4,
        }
    }
}

impl RemoteSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from config directory.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Malformed`] if the file cannot be parsed.
    /// - Return [`Error::Io`] if the file exists but cannot be read.
    pub fn load(config_dir: impl AsRef<Path>) -> Result<Self> {
        let path = config_dir.as_ref().join(CONFIG_FILE);
        match read_optional(&path)? {
            None => Ok(Self::default()),
            Some(bytes) => String::from_utf8_lossy(&bytes).parse(),
        }
    }

    /// Save configuration into config directory.
    pub fn save(&self, config_dir: impl AsRef<Path>) -> Result<()> {
        let config_dir = config_dir.as_ref();
        create_private_dir(config_dir)?;
        write_atomic(
            &config_dir.join(CONFIG_FILE),
            self.to_string().as_bytes(),
            PRIVATE_FILE,
        )
    }

    /// Data directory to use.
    ///
    /// `$NEBI_DATA_DIR` wins over the configured directory, which wins over
    /// the platform default.
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if env::var_os(DATA_DIR_ENV).is_some_and(|path| !path.is_empty()) {
            return Ok(default_data_dir()?);
        }

        match &self.data_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(default_data_dir()?),
        }
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config =
            toml::de::from_str(data).map_err(|err| Error::malformed("config", err.message()))?;

        // INVARIANT: Perform shell expansion on data directory field.
        if let Some(path) = &config.data_dir {
            let expanded = shellexpand::full(path.to_string_lossy().as_ref())
                .map_err(|err| Error::malformed("config", err.to_string()))?
                .into_owned();
            config.data_dir = Some(PathBuf::from(expanded));
        }

        if config.remote.workers == 0 {
            return Err(Error::malformed("config", "remote.workers must be at least 1"));
        }

        Ok(config)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(|_| FmtError)?
                .as_str(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("BLAH", "/home/blah/blah")])]
    fn deserialize_config() -> anyhow::Result<()> {
        let result: Config = r#"
            default_server = "work"
            data_dir = "$BLAH/nebi"

            [remote]
            timeout_secs = 10
        "#
        .parse()?;

        let expect = Config {
            default_server: Some("work".into()),
            data_dir: Some(PathBuf::from("/home/blah/blah/nebi")),
            remote: RemoteSettings {
                timeout_secs: 10,
                workers: 4,
            },
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn serialize_config() {
        let result = Config {
            default_server: Some("work".into()),
            data_dir: None,
            remote: RemoteSettings::default(),
        }
        .to_string();

        let expect = indoc! {r#"
            default_server = "work"

            [remote]
            timeout_secs = 30
            workers = 4
        "#};

        assert_eq!(result, expect);
    }

    #[test]
    fn zero_workers_is_malformed() {
        let err = "[remote]\nworkers = 0\n".parse::<Config>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[sealed_test(env = [("NEBI_DATA_DIR", "/tmp/from-env")])]
    fn env_data_dir_wins_over_config() {
        let config = Config {
            data_dir: Some(PathBuf::from("/tmp/from-config")),
            ..Config::default()
        };

        assert_eq!(config.resolve_data_dir().unwrap(), PathBuf::from("/tmp/from-env"));
    }

    #[test]
    fn missing_config_file_is_default() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        assert_eq!(Config::load(dir.path())?, Config::default());

        let config = Config {
            default_server: Some("work".into()),
            ..Config::default()
        };
        config.save(dir.path())?;
        assert_eq!(Config::load(dir.path())?, config);
        Ok(())
    }
}
