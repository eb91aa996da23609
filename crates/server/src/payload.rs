// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Published agent payload, served to supervisors.
//!
//! The checksum is recomputed only when the file's length or mtime
//! changes, so replacing the payload on disk publishes a new version.

use std::path::PathBuf;
use std::time::SystemTime;

use cv_wire::PayloadManifest;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("no agent payload is published")]
    NotConfigured,

    #[error("failed to read payload {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

struct Cached {
    len: u64,
    modified: Option<SystemTime>,
    manifest: PayloadManifest,
}

pub struct PayloadStore {
    path: Option<PathBuf>,
    version: Option<String>,
    cached: Mutex<Option<Cached>>,
}

impl PayloadStore {
    pub fn new(path: Option<PathBuf>, version: Option<String>) -> Self {
        Self { path, version, cached: Mutex::new(None) }
    }

    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn manifest(&self) -> Result<PayloadManifest, PayloadError> {
        let path = self.path.as_ref().ok_or(PayloadError::NotConfigured)?;
        let meta = std::fs::metadata(path).map_err(|source| self.io_error(source))?;
        let modified = meta.modified().ok();
        {
            let cached = self.cached.lock();
            if let Some(c) = cached.as_ref().filter(|c| c.len == meta.len() && c.modified == modified) {
                return Ok(c.manifest.clone());
            }
        }
        Ok(self.read()?.0)
    }

    /// Manifest and bytes, computed from the same read.
    pub fn read(&self) -> Result<(PayloadManifest, Vec<u8>), PayloadError> {
        let path = self.path.as_ref().ok_or(PayloadError::NotConfigured)?;
        let modified = std::fs::metadata(path).ok().and_then(|m| m.modified().ok());
        let bytes = std::fs::read(path).map_err(|source| self.io_error(source))?;
        let manifest = self.describe(&bytes);

        let mut cached = self.cached.lock();
        let changed = cached.as_ref().map_or(true, |c| c.manifest.sha256 != manifest.sha256);
        if changed {
            info!(version = %manifest.version, sha256 = %manifest.sha256, len = manifest.len, "payload published");
        }
        *cached = Some(Cached { len: manifest.len, modified, manifest: manifest.clone() });
        Ok((manifest, bytes))
    }

    fn describe(&self, bytes: &[u8]) -> PayloadManifest {
        let mut manifest = PayloadManifest::of(String::new(), bytes);
        manifest.version = match &self.version {
            Some(version) => version.clone(),
            None => manifest.sha256.chars().take(12).collect(),
        };
        manifest
    }

    fn io_error(&self, source: std::io::Error) -> PayloadError {
        PayloadError::Io { path: self.path.clone().unwrap_or_default(), source }
    }
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
