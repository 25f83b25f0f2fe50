// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use std::io;

/// Errors enumerating or monitoring kernel devices via udev.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum UdevError {
    /// failed to create udev enumerator: {0}
    Enumerate(#[source] io::Error),
    /// failed to create udev monitor: {0}
    Monitor(#[source] io::Error),
    /// failed to register the udev monitor fd with the async runtime: {0}
    AsyncFd(#[source] io::Error),
}
