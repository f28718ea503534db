// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Origin sidecar codec.
//!
//! A pulled workspace carries a `.nebi.toml` file next to its spec files. The
//! sidecar records where the spec came from (server, spec name, version) and
//! the digest of every layer exactly as it was pulled. It is the drift
//! baseline for pulled workspaces.
//!
//! # Layout
//!
//! ```toml
//! id = "0b5d6f2c-5a6e-4f0e-9a53-0d7b0c1b5f10"
//!
//! [origin]
//! spec_name = "data-science"
//! version_name = "v1"
//! version_id = 3
//! server_url = "https://nebi.example.org"
//! pulled_at = "2025-01-01T00:00:00Z"
//!
//! [layers."pixi.toml"]
//! digest = "sha256:..."
//! size = 120
//! ```
//!
//! Unknown top-level keys are kept as-is, so a sidecar written by a newer
//! nebi survives a round trip through an older one.

use crate::{
    digest::is_valid_digest,
    error::{Error, Result},
    fsutil::{write_atomic, SHARED_FILE},
    MANIFEST_FILE,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};
use uuid::Uuid;

/// File name of the sidecar inside a workspace directory.
pub const SIDECAR_FILE: &str = ".nebi.toml";

/// Origin metadata of a pulled workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    /// Stable workspace identifier. Missing only in legacy sidecars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,

    /// Where the spec was pulled from.
    pub origin: Origin,

    /// Digest and size of every pulled layer, keyed by file name.
    pub layers: BTreeMap<String, Layer>,

    /// Top-level keys this version of nebi does not know about.
    #[serde(flatten)]
    pub extra: toml::Table,
}

/// Remote origin of a pulled spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub spec_name: String,
    pub version_name: String,
    pub version_id: u64,
    pub server_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_digest: Option<String>,

    pub pulled_at: DateTime<Utc>,
}

/// Single pulled layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub digest: String,
    pub size: u64,
}

impl Sidecar {
    /// Construct new sidecar for a freshly pulled workspace.
    pub fn new(id: Uuid, origin: Origin, layers: BTreeMap<String, Layer>) -> Self {
        Self {
            id: Some(id),
            origin,
            layers,
            extra: toml::Table::new(),
        }
    }

    /// Recorded digest of a layer, if the origin had one.
    pub fn layer_digest(&self, name: &str) -> Option<&str> {
        self.layers.get(name).map(|layer| layer.digest.as_str())
    }

    fn validate(&self) -> Result<()> {
        if !self.layers.contains_key(MANIFEST_FILE) {
            return Err(Error::malformed(
                "sidecar",
                format!("missing key layers.\"{MANIFEST_FILE}\""),
            ));
        }

        for (name, layer) in &self.layers {
            if !is_valid_digest(&layer.digest) {
                return Err(Error::malformed(
                    "sidecar",
                    format!("layer {name:?} has invalid digest {:?}", layer.digest),
                ));
            }
        }

        if let Some(digest) = &self.origin.manifest_digest {
            if !is_valid_digest(digest) {
                return Err(Error::malformed(
                    "sidecar",
                    format!("invalid manifest digest {digest:?}"),
                ));
            }
        }

        Ok(())
    }
}

impl FromStr for Sidecar {
    type Err = Error;

    /// Parse sidecar, accepting legacy documents without an `id`.
    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let sidecar: Sidecar =
            toml::de::from_str(data).map_err(|err| Error::malformed("sidecar", err.message()))?;
        sidecar.validate()?;

        Ok(sidecar)
    }
}

impl Display for Sidecar {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(|_| FmtError)?
                .as_str(),
        )
    }
}

/// Path of the sidecar inside a workspace directory.
pub fn sidecar_path(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(SIDECAR_FILE)
}

/// Check if workspace directory carries a sidecar.
pub fn exists(dir: impl AsRef<Path>) -> bool {
    fs::symlink_metadata(sidecar_path(dir)).is_ok_and(|meta| meta.is_file())
}

/// Write sidecar into workspace directory.
///
/// # Errors
///
/// - Return [`Error::Malformed`] if the sidecar has no id or invalid digests.
/// - Return [`Error::Io`] if the atomic write fails.
#[instrument(skip(dir, sidecar), level = "debug")]
pub fn write(dir: impl AsRef<Path>, sidecar: &Sidecar) -> Result<()> {
    if sidecar.id.is_none() {
        return Err(Error::malformed("sidecar", "missing key id"));
    }
    sidecar.validate()?;

    let contents = toml::ser::to_string_pretty(sidecar)
        .map_err(|err| Error::malformed("sidecar", err.to_string()))?;
    let path = sidecar_path(dir);
    debug!("write sidecar {:?}", path.display());
    write_atomic(&path, contents.as_bytes(), SHARED_FILE)
}

/// Read sidecar from workspace directory.
///
/// Returns [`None`] if the directory has no sidecar.
///
/// # Errors
///
/// - Return [`Error::Malformed`] if a required key (including `id`) is
///   missing, or a digest is not valid hex.
/// - Return [`Error::Io`] for read failures.
pub fn read(dir: impl AsRef<Path>) -> Result<Option<Sidecar>> {
    match read_any(dir)? {
        Some(sidecar) if sidecar.id.is_none() => Err(Error::malformed("sidecar", "missing key id")),
        other => Ok(other),
    }
}

/// Read sidecar from workspace directory, accepting legacy sidecars without
/// an `id` key.
pub fn read_any(dir: impl AsRef<Path>) -> Result<Option<Sidecar>> {
    let path = sidecar_path(dir);
    match fs::symlink_metadata(&path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            return Err(Error::malformed(
                format!("sidecar at {:?}", path.display()),
                "sidecar must not be a symlink",
            ));
        }
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::io(&path, err)),
    }

    let data = fs::read_to_string(&path).map_err(|err| Error::io(&path, err))?;
    data.parse::<Sidecar>()
        .map(Some)
        .map_err(|err| match err {
            Error::Malformed { reason, .. } => {
                Error::malformed(format!("sidecar at {:?}", path.display()), reason)
            }
            other => other,
        })
}
