// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Error kinds surfaced by nebi.
//!
//! Every fallible operation in the library reports one of a small, fixed set of
//! error kinds. The variant carries enough context (path, name, URL) to produce
//! a one-line human message. Command front-ends only need the message and the
//! kind, never a stack.

use std::{io, path::{Path, PathBuf}};

/// All possible error types for nebi operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Workspace, server, or entry is unknown.
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    /// Name or path collides with an existing one at creation time.
    #[error("{what} already exists: {name}")]
    AlreadyExists { what: &'static str, name: String },

    /// Sidecar, index, or user supplied reference cannot be parsed.
    #[error("malformed {what}: {reason}")]
    Malformed { what: String, reason: String },

    /// Persisted document exists but is not valid.
    #[error("corrupt document at {:?}", path.display())]
    Corrupt {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    /// Index was written by a newer version of nebi.
    #[error("index at {:?} has version {found}, but only up to {supported} is supported", path.display())]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    /// External server or registry cannot be reached.
    #[error("{target} is unavailable: {reason}")]
    Unavailable { target: String, reason: String },

    /// No credential stored for target server URL.
    #[error("authentication required for {url}, run `nebi login` first")]
    AuthRequired { url: String },

    /// User or timeout aborted the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Everything else from the file system.
    #[error("i/o failure at {:?}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

impl Error {
    pub(crate) fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }

    pub(crate) fn already_exists(what: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            what,
            name: name.into(),
        }
    }

    pub(crate) fn malformed(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            source,
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Kind of error without its context.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Malformed { .. } => ErrorKind::Malformed,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::AuthRequired { .. } => ErrorKind::AuthRequired,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io { .. } => ErrorKind::Io,
        }
    }
}

impl From<crate::path::NoWayHome> for Error {
    fn from(err: crate::path::NoWayHome) -> Self {
        Self::not_found("directory", err.to_string())
    }
}

/// Fieldless view of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Malformed,
    Corrupt,
    UnsupportedVersion,
    Unavailable,
    AuthRequired,
    Cancelled,
    Io,
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
