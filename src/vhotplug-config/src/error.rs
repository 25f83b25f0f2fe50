// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;

/// Configuration errors are fatal at startup (exit code 1).
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum ConfigError {
    /// failed to read configuration file {0}: {1}
    Read(PathBuf, #[source] io::Error),
    /// malformed configuration document: {0}
    Parse(#[source] serde_json::Error),
    /// VM `{0}` is declared more than once
    DuplicateVm(String),
    /// no transports configured under `general.api.transports`
    NoApiTransports,
    /// `tcp` transport requires `general.api.host` and `general.api.port`
    MissingTcpAddress,
    /// `unix` transport requires `general.api.unixSocket`
    MissingUnixSocketPath,
    /// VM `{0}` is type `crosvm` but `general.crosvm` names no binary
    MissingCrosvmBinary(String),
    /// vsock transport requires `general.api.allowedCids` to be non-empty
    MissingAllowedCids,
    /// `vsock` transport requires `general.api.port`
    MissingVsockPort,
}
