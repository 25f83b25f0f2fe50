// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Dispatches orchestrator operations to the right VMM link by VM type.

use std::time::Duration;

use vhotplug_device::DeviceInfo;

use crate::crosvm::CrosvmLink;
use crate::error::{CrosvmError, VmmLinkError};
use crate::qemu::{evdev_id, pci_id, usb_id, QemuLink};

/// One running VM's control channel, already resolved to its concrete link.
#[derive(Debug)]
pub enum VmmLink {
    Qemu(QemuLink),
    Crosvm(CrosvmLink),
}

impl VmmLink {
    pub async fn add_device(&self, dev: &DeviceInfo) -> Result<(), VmmLinkError> {
        match (self, dev) {
            (VmmLink::Qemu(qemu), DeviceInfo::Usb(usb)) => {
                let id = usb_id(usb.busnum, usb.devnum);
                Ok(qemu.add_usb_host_device(usb.busnum, usb.devnum, &id).await?)
            }
            (VmmLink::Qemu(qemu), DeviceInfo::Pci(pci)) => {
                Ok(qemu.add_vfio_device(&pci.address, &pci.qdev_id()).await?)
            }
            (VmmLink::Qemu(qemu), DeviceInfo::Evdev(evdev)) => {
                let id = evdev_id(&evdev.sys_name);
                Ok(qemu.add_evdev_device(&evdev.device_node, &id).await?)
            }
            (VmmLink::Crosvm(crosvm), DeviceInfo::Usb(usb)) => {
                let node = usb.device_node.as_deref().ok_or(VmmLinkError::Unsupported("usb device has no node"))?;
                Ok(crosvm.add_usb_device(node, usb.vid, usb.pid).await?)
            }
            (VmmLink::Crosvm(_), DeviceInfo::Pci(_)) => {
                Err(VmmLinkError::Crosvm(CrosvmError::PciNotSupported))
            }
            (VmmLink::Crosvm(_), DeviceInfo::Evdev(_)) => {
                Err(VmmLinkError::Unsupported("crosvm does not support evdev passthrough"))
            }
        }
    }

    pub async fn remove_device(&self, dev: &DeviceInfo) -> Result<(), VmmLinkError> {
        match (self, dev) {
            (VmmLink::Qemu(qemu), DeviceInfo::Usb(usb)) => {
                Ok(qemu.device_del(&usb_id(usb.busnum, usb.devnum)).await?)
            }
            (VmmLink::Qemu(qemu), DeviceInfo::Pci(pci)) => {
                // Tolerate devices added by other tooling: resolve the qdev id by
                // walking query-pci for the matching vendor/device id rather than
                // trusting our own naming scheme.
                match qemu.find_pci_device(pci.vendor_id, pci.device_id).await? {
                    Some(qdev_id) => Ok(qemu.device_del(&qdev_id).await?),
                    None => Ok(qemu.device_del(&pci_id(&pci.address)).await?),
                }
            }
            (VmmLink::Qemu(qemu), DeviceInfo::Evdev(evdev)) => {
                Ok(qemu.device_del(&evdev_id(&evdev.sys_name)).await?)
            }
            (VmmLink::Crosvm(crosvm), DeviceInfo::Usb(usb)) => {
                Ok(crosvm.remove_usb_device(usb.vid, usb.pid).await?)
            }
            (VmmLink::Crosvm(_), DeviceInfo::Pci(_)) => {
                Err(VmmLinkError::Crosvm(CrosvmError::PciNotSupported))
            }
            (VmmLink::Crosvm(_), DeviceInfo::Evdev(_)) => {
                Err(VmmLinkError::Unsupported("crosvm does not support evdev passthrough"))
            }
        }
    }

    /// Pauses the guest for the IOMMU-group atomicity window. crosvm has no PCI
    /// hotplug, so there is no group-attach window to guard; it is a no-op there.
    pub async fn pause(&self) -> Result<(), VmmLinkError> {
        match self {
            VmmLink::Qemu(qemu) => Ok(qemu.pause().await?),
            VmmLink::Crosvm(_) => Ok(()),
        }
    }

    pub async fn resume(&self) -> Result<(), VmmLinkError> {
        match self {
            VmmLink::Qemu(qemu) => Ok(qemu.resume().await?),
            VmmLink::Crosvm(_) => Ok(()),
        }
    }

    /// Readiness gate consulted before every attach: blocks until the VM reports
    /// booted, up to `boot_timeout`.
    pub async fn wait_ready(&self, boot_timeout: Duration) -> Result<(), VmmLinkError> {
        match self {
            VmmLink::Qemu(qemu) => Ok(qemu.wait_ready(boot_timeout).await?),
            VmmLink::Crosvm(crosvm) => Ok(crosvm.wait_ready(boot_timeout).await?),
        }
    }
}
