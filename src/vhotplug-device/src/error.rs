// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use std::io;

/// Errors produced while extracting a device snapshot from a kernel-device record.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum DeviceError {
    /// missing required udev property `{0}`
    MissingProperty(&'static str),
    /// malformed value for udev property `{0}`: {1}
    MalformedProperty(&'static str, String),
    /// failed to open device node {0}: {1}
    OpenDeviceNode(String, #[source] io::Error),
    /// ioctl {0} failed on {1}: {2}
    Ioctl(&'static str, String, #[source] nix::Error),
}
