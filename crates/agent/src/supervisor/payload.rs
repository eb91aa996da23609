// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Where the agent payload comes from and how it lands on disk.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cv_wire::PayloadManifest;

use crate::client::{ClientError, Dispatch, DispatchClient};

/// Publisher of the agent payload.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    /// What the dispatcher currently expects agents to run.
    async fn manifest(&self) -> Result<PayloadManifest, ClientError>;

    /// The payload bytes with the manifest they were served under.
    async fn fetch(&self) -> Result<(PayloadManifest, Vec<u8>), ClientError>;
}

#[async_trait]
impl PayloadSource for DispatchClient {
    async fn manifest(&self) -> Result<PayloadManifest, ClientError> {
        self.payload_manifest().await
    }

    async fn fetch(&self) -> Result<(PayloadManifest, Vec<u8>), ClientError> {
        self.fetch_payload().await
    }
}

/// A payload file verified against `manifest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPayload {
    pub path: PathBuf,
    pub manifest: PayloadManifest,
}

/// True when the file at `path` is exactly what `manifest` describes.
pub(crate) async fn matches(path: &Path, manifest: &PayloadManifest) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() == manifest.len => {}
        _ => return false,
    }
    match tokio::fs::read(path).await {
        Ok(bytes) => manifest.verify(&bytes),
        Err(_) => false,
    }
}

/// Write verified bytes next to `path` and rename them into place, so a
/// half-written payload is never what gets launched.
pub(crate) async fn install(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = path.with_extension("download");
    tokio::fs::write(&partial, data).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755)).await?;
    }
    tokio::fs::rename(&partial, path).await
}
