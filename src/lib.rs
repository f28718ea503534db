// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Local workspace index and drift detection for pixi environment specs.
//!
//! Nebi tracks directories holding a `pixi.toml` (and usually a `pixi.lock`),
//! remembers where each spec came from, and tells the user whether the files
//! on disk have drifted from that origin. Specs can be pulled from a Nebi
//! server, committed locally as snapshots, diffed, and reconciled after the
//! user moves directories around behind nebi's back.

pub mod config;
pub mod credentials;
pub mod digest;
pub mod drift;
pub mod error;
pub(crate) mod fsutil;
pub mod path;
pub mod pull;
pub mod remote;
pub mod repair;
pub mod resolve;
pub mod sidecar;
pub mod snapshot;
pub mod store;
pub mod workspace;

pub use error::{Error, ErrorKind, Result};

/// File name of the environment manifest.
pub const MANIFEST_FILE: &str = "pixi.toml";

/// File name of the environment lock file.
pub const LOCK_FILE: &str = "pixi.lock";

/// Every spec file nebi tracks, manifest first.
pub const SPEC_FILES: [&str; 2] = [MANIFEST_FILE, LOCK_FILE];
