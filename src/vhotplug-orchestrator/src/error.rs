// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use vhotplug_device::error::DeviceError;
use vhotplug_vfio::VfioError;
use vhotplug_vmm::VmmLinkError;

/// Errors from the orchestrator's attach/remove/suspend/resume flows. These surface
/// to API callers as `{result: "failed", error: ...}`; the reconciler logs and
/// continues past them.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum OrchestratorError {
    /// no VM named `{0}`
    UnknownVm(String),
    /// device is not currently attached to any VM
    NotAttached,
    /// device's partition is mounted at /boot, refusing passthrough
    BootDevice,
    /// device is marked disconnected; use an explicit attach to re-enable it
    Disconnected,
    /// resolved VM `{0}` is outside the rule's allowed VM list
    OutOfScope(String),
    /// no rule matches this device
    NoMatchingRule,
    /// device has multiple candidate VMs and none has been selected yet
    AwaitingSelection,
    /// device's IOMMU group is shared with other devices and the rule forbids passthrough
    SharedIommuGroup,
    /// no device matches the given selector
    DeviceNotFound,
    /// input device is already exclusively grabbed by another process
    AlreadyGrabbed,
    /// {0}
    Vmm(#[from] VmmLinkError),
    /// {0}
    Vfio(#[from] VfioError),
    /// {0}
    Device(#[from] DeviceError),
    /// the orchestrator task is no longer running
    Shutdown,
}
