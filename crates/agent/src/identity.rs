// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable agent identity.
//!
//! The uuid is generated once per working directory and kept in
//! `config/guid.txt`, so an agent keeps its identity across restarts and
//! upgrades. Wiping the directory yields a new agent as far as the
//! dispatcher is concerned.

use std::io;
use std::path::{Path, PathBuf};

use cv_core::AgentIdentifier;
use tracing::info;

pub fn guid_path(work_dir: &Path) -> PathBuf {
    work_dir.join("config").join("guid.txt")
}

/// Load the persisted uuid, creating one on first start.
pub fn load_or_create_uuid(work_dir: &Path) -> io::Result<String> {
    let path = guid_path(work_dir);
    match std::fs::read_to_string(&path) {
        Ok(existing) if !existing.trim().is_empty() => return Ok(existing.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let uuid = uuid::Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &uuid)?;
    info!(%uuid, path = %path.display(), "generated agent identity");
    Ok(uuid)
}

/// Identifier for this host. Hostname and address are informational.
pub fn local_identifier(uuid: String) -> AgentIdentifier {
    AgentIdentifier { hostname: hostname(), ip_address: local_ip(), uuid }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Address of the interface that routes outward. No packets are sent;
/// connecting a UDP socket only selects the route.
fn local_ip() -> String {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
