// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-instance mutual exclusion for a working directory.
//!
//! A lock is a file whose recent mtime means "held". The holder keeps it
//! fresh from a heartbeat thread; a file left untouched for longer than the
//! staleness window belongs to a dead owner and may be taken over. No OS
//! advisory locks are involved, so the scheme works across container and
//! process boundaries that share only the directory.
//!
//! A holder whose file ends up carrying someone else's token has lost the
//! lock; [`Lock::is_owner`] turns false and [`wait_until_lost`] resolves.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use tracing::{debug, error, info, warn};

/// Exclusive ownership of some resource.
///
/// Failures never propagate: an acquisition that cannot be completed just
/// reports `false`, and the caller decides whether to retry or exit.
pub trait Lock: Send {
    fn try_acquire(&mut self) -> bool;

    /// Give up ownership. Safe to call when not held.
    fn release(&mut self);

    fn is_held(&self) -> bool;

    /// True while this instance owns the lock and nobody has displaced it.
    fn is_owner(&self) -> bool;
}

/// Resolves once `lock` stops being owned, checking every `every`.
pub async fn wait_until_lost<K: Lock + ?Sized>(lock: &K, every: Duration) {
    let mut ticks = tokio::time::interval(every.max(Duration::from_millis(1)));
    loop {
        ticks.tick().await;
        if !lock.is_owner() {
            return;
        }
    }
}

/// File + heartbeat lock.
pub struct FileLock {
    path: PathBuf,
    stale_after: Duration,
    heartbeat_every: Duration,
    /// Written into the file so the heartbeat can tell it still owns it
    token: String,
    heartbeat: Option<Heartbeat>,
}

struct Heartbeat {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
    /// Set by the thread when the file turned out to belong to someone else
    lost: Arc<AtomicBool>,
}

impl Heartbeat {
    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn stop(self) {
        drop(self.stop);
        let _ = self.handle.join();
    }
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration, heartbeat_every: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
            heartbeat_every,
            token: format!("{}:{}", std::process::id(), nanoid::nanoid!(12)),
            heartbeat: None,
        }
    }

    /// Lock with the staleness window and heartbeat from the environment.
    pub fn from_env(path: impl Into<PathBuf>) -> Self {
        Self::new(path, crate::env::lock_stale_after(), crate::env::lock_heartbeat())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create(&self) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(&self.path)?;
        let written = file.write_all(self.token.as_bytes()).and_then(|()| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&self.path);
            return Err(e);
        }
        Ok(())
    }

    /// Move a stale file out of the way and claim the path.
    ///
    /// The rename is the arbitration point: of several processes that saw
    /// the same stale file, only one renames it.
    fn take_over(&self) -> io::Result<()> {
        let aside = self.path.with_extension(format!("stale-{}", nanoid::nanoid!(8)));
        fs::rename(&self.path, &aside)?;
        if !is_stale(&aside, self.stale_after) {
            // Refreshed between our check and the rename: hand it back
            let restored = fs::hard_link(&aside, &self.path);
            let _ = fs::remove_file(&aside);
            restored?;
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "lock was refreshed"));
        }
        fs::remove_file(&aside)?;
        self.create()
    }

    fn spawn_heartbeat(&self) -> io::Result<Heartbeat> {
        let (stop, stopped) = mpsc::channel::<()>();
        let path = self.path.clone();
        let token = self.token.clone();
        let every = self.heartbeat_every;
        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        let handle = thread::Builder::new().name("cv-lock-heartbeat".to_string()).spawn(move || loop {
            match stopped.recv_timeout(every) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            }
            match touch(&path, &token) {
                Ok(true) => {}
                Ok(false) => {
                    error!(path = %path.display(), "lock file taken over by another owner");
                    flag.store(true, Ordering::SeqCst);
                    return;
                }
                // Includes a file briefly moved aside by a contender; retried next tick
                Err(e) => warn!(path = %path.display(), error = %e, "lock heartbeat failed"),
            }
        })?;
        Ok(Heartbeat { stop, handle, lost })
    }
}

impl Lock for FileLock {
    fn try_acquire(&mut self) -> bool {
        if let Some(heartbeat) = self.heartbeat.take() {
            if !heartbeat.is_lost() {
                self.heartbeat = Some(heartbeat);
                return true;
            }
            heartbeat.stop();
        }

        match self.create() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if !is_stale(&self.path, self.stale_after) {
                    debug!(path = %self.path.display(), "lock is held by a live owner");
                    return false;
                }
                if let Err(e) = self.take_over() {
                    debug!(path = %self.path.display(), error = %e, "could not take over stale lock");
                    return false;
                }
                info!(path = %self.path.display(), "took over stale lock");
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to create lock file");
                return false;
            }
        }

        match self.spawn_heartbeat() {
            Ok(heartbeat) => {
                self.heartbeat = Some(heartbeat);
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to start lock heartbeat");
                let _ = fs::remove_file(&self.path);
                false
            }
        }
    }

    fn release(&mut self) {
        let Some(heartbeat) = self.heartbeat.take() else {
            return;
        };
        heartbeat.stop();

        // Only remove the file if nobody has taken it over since
        match fs::read_to_string(&self.path) {
            Ok(content) if content == self.token => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
                }
            }
            _ => {}
        }
    }

    fn is_held(&self) -> bool {
        self.path.exists() && !is_stale(&self.path, self.stale_after)
    }

    fn is_owner(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(|h| !h.is_lost())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Untouched for longer than `window`. A missing file or an mtime in the
/// future counts as fresh so it is never taken over by mistake.
fn is_stale(path: &Path, window: Duration) -> bool {
    let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) else {
        return false;
    };
    SystemTime::now().duration_since(modified).map(|age| age > window).unwrap_or(false)
}

/// Refresh the mtime if the file still carries our token.
fn touch(path: &Path, token: &str) -> io::Result<bool> {
    match fs::read_to_string(path) {
        Ok(content) if content == token => {}
        Ok(_) => return Ok(false),
        Err(e) => return Err(e),
    }
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_modified(SystemTime::now())?;
    Ok(true)
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
