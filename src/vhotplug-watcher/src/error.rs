// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

/// Errors watching VMM socket directories for create/delete activity.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum WatcherError {
    /// failed to watch {path}: {source}
    Watch { path: std::path::PathBuf, #[source] source: notify::Error },
    /// watched path has no parent directory: {0}
    NoParentDirectory(std::path::PathBuf),
}
