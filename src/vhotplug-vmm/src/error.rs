// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use std::io;

/// Errors talking to a QEMU instance over QMP.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum QmpError {
    /// failed to connect to QMP socket {0}: {1}
    Connect(String, #[source] io::Error),
    /// I/O error on QMP socket: {0}
    Io(#[source] io::Error),
    /// malformed QMP response: {0}
    MalformedResponse(#[source] serde_json::Error),
    /// QMP command `{0}` failed after {1} attempts: {2}
    CommandFailed(String, u32, String),
    /// the VM did not become ready within the boot timeout
    BootTimeout,
    /// no empty PCI bridge available for hotplug
    NoPciPortAvailable,
    /// guest device for {0} not found in query-pci
    GuestDeviceNotFound(String),
}

/// Errors talking to a crosvm instance via its control socket / CLI.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum CrosvmError {
    /// failed to spawn crosvm binary {0}: {1}
    Spawn(String, #[source] io::Error),
    /// crosvm usb {0} failed: {1}
    CommandFailed(&'static str, String),
    /// the VM did not become ready within the boot timeout
    BootTimeout,
    /// PCI passthrough is not supported by crosvm
    PciNotSupported,
    /// device {0} is not currently attached
    DeviceNotAttached(String),
}

/// Errors from the VMM façade, unifying the QEMU and crosvm links behind one surface.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum VmmLinkError {
    /// {0}
    Qemu(#[from] QmpError),
    /// {0}
    Crosvm(#[from] CrosvmError),
    /// operation not supported for VM type `{0}`
    Unsupported(&'static str),
}
