// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Watches the directories holding VMM control sockets and reports when a
//! socket is created (the VM started or restarted) or deleted (the VM died),
//! the ecosystem equivalent of the original `inotify_simple`-based watcher.

mod error;

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub use error::WatcherError;
use notify::event::{CreateKind, RemoveKind};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

/// Watches one directory per monitored parent, tracking only the filenames
/// that were explicitly registered via [`FileWatcher::add_file`].
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    watched_files: HashMap<PathBuf, HashSet<OsString>>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl FileWatcher {
    pub fn new() -> Result<Self, WatcherError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    // The watcher thread outlives individual FileWatcher::add_file calls;
                    // a closed receiver just means we're shutting down.
                    let _ = tx.send(event);
                }
            },
            Config::default(),
        )
        .map_err(|source| WatcherError::Watch { path: PathBuf::new(), source })?;

        Ok(FileWatcher { watcher, watched_files: HashMap::new(), events: rx })
    }

    fn directory_monitored(&self, directory: &Path) -> bool {
        self.watched_files.contains_key(directory)
    }

    /// Registers `file_path` for create/delete notifications. Watches its
    /// parent directory the first time a file in it is registered.
    pub fn add_file(&mut self, file_path: &Path) -> Result<(), WatcherError> {
        let directory = file_path
            .parent()
            .ok_or_else(|| WatcherError::NoParentDirectory(file_path.to_path_buf()))?
            .to_path_buf();
        let filename = file_path
            .file_name()
            .ok_or_else(|| WatcherError::NoParentDirectory(file_path.to_path_buf()))?
            .to_os_string();

        info!(file = %file_path.display(), "watching for socket activity");

        if !self.directory_monitored(&directory) {
            self.watcher
                .watch(&directory, RecursiveMode::NonRecursive)
                .map_err(|source| WatcherError::Watch { path: directory.clone(), source })?;
            self.watched_files.insert(directory.clone(), HashSet::new());
        }

        self.watched_files.entry(directory).or_default().insert(filename);
        Ok(())
    }

    /// Waits for the next create/delete event on a watched file, dropping
    /// events for directories or files we were not asked to track.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        loop {
            let event = self.events.recv().await?;
            let kind = match event.kind {
                EventKind::Create(CreateKind::File | CreateKind::Any) => WatchEventKind::Created,
                EventKind::Remove(RemoveKind::File | RemoveKind::Any) => WatchEventKind::Deleted,
                _ => continue,
            };
            for path in &event.paths {
                let (Some(directory), Some(filename)) = (path.parent(), path.file_name()) else {
                    continue;
                };
                let tracked = self
                    .watched_files
                    .get(directory)
                    .is_some_and(|files| files.contains(filename));
                if tracked {
                    debug!(path = %path.display(), ?kind, "socket path event");
                    return Some(WatchEvent { path: path.clone(), kind });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn reports_create_and_delete_for_tracked_socket_only() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("vm1.sock");
        let other_path = dir.path().join("vm1.sock.lock");

        let mut watcher = FileWatcher::new().unwrap();
        watcher.add_file(&socket_path).unwrap();

        std::fs::write(&other_path, b"").unwrap();
        std::fs::write(&socket_path, b"").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), watcher.next_event())
            .await
            .expect("timed out waiting for create event")
            .expect("channel closed");
        assert_eq!(event.path, socket_path);
        assert_eq!(event.kind, WatchEventKind::Created);

        std::fs::remove_file(&socket_path).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), watcher.next_event())
            .await
            .expect("timed out waiting for delete event")
            .expect("channel closed");
        assert_eq!(event.path, socket_path);
        assert_eq!(event.kind, WatchEventKind::Deleted);
    }
}
