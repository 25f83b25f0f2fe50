// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use std::io;

/// Errors starting the multi-transport API server. Per-connection I/O errors are
/// logged and drop the connection rather than propagating here.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum ApiError {
    /// failed to bind the unix transport at {0}: {1}
    BindUnix(String, #[source] io::Error),
    /// failed to bind the tcp transport at {0}: {1}
    BindTcp(String, #[source] io::Error),
    /// failed to bind the vsock transport on port {0}: {1}
    BindVsock(u32, #[source] io::Error),
    /// tcp transport is configured but `general.api.host`/`port` is missing
    MissingTcpAddress,
    /// unix transport is configured but `general.api.unixSocket` is missing
    MissingUnixSocketPath,
    /// vsock transport is configured but `general.api.port` is missing
    MissingVsockPort,
}
