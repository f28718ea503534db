// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Content addressing for spec files.
//!
//! Digests follow OCI conventions: lowercase hex SHA-256 prefixed with
//! `sha256:`.

use crate::error::{Error, Result};

use sha2::{Digest as _, Sha256};
use std::{
    fs::File,
    io::{ErrorKind, Read},
    path::Path,
};

/// Prefix of every digest nebi produces.
pub const DIGEST_PREFIX: &str = "sha256:";

/// Digest raw bytes.
pub fn digest(bytes: impl AsRef<[u8]>) -> String {
    let hash = Sha256::digest(bytes.as_ref());
    format!("{DIGEST_PREFIX}{}", hex::encode(hash))
}

/// Digest file content.
///
/// Returns [`None`] if the file does not exist.
///
/// # Errors
///
/// - Return [`Error::Io`] for any failure other than a missing file.
pub fn digest_file(path: impl AsRef<Path>) -> Result<Option<String>> {
    let path = path.as_ref();
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::io(path, err)),
    };

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).map_err(|err| Error::io(path, err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(Some(format!("{DIGEST_PREFIX}{}", hex::encode(hasher.finalize()))))
}

/// Check that a string is a well-formed `sha256:<64 lowercase hex>` digest.
pub fn is_valid_digest(value: &str) -> bool {
    value
        .strip_prefix(DIGEST_PREFIX)
        .is_some_and(|hex| {
            hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        })
}
