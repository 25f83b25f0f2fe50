// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use vhotplug_vmm::VmmLink;

/// Matches the original implementation's per-VMM-type defaults
/// (`qemulink.py::vm_boot_timeout = 5`, `crosvmlink.py::vm_boot_timeout = 10`).
pub const QEMU_BOOT_TIMEOUT: Duration = Duration::from_secs(5);
pub const CROSVM_BOOT_TIMEOUT: Duration = Duration::from_secs(10);

/// One configured VM: its control link plus the readiness timeout appropriate to
/// its VMM type.
pub struct VmEntry {
    pub name: String,
    pub link: VmmLink,
    pub boot_timeout: Duration,
}

impl VmEntry {
    pub fn new(name: String, link: VmmLink) -> Self {
        let boot_timeout = match &link {
            VmmLink::Qemu(_) => QEMU_BOOT_TIMEOUT,
            VmmLink::Crosvm(_) => CROSVM_BOOT_TIMEOUT,
        };
        VmEntry { name, link, boot_timeout }
    }
}
