// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Immutable device snapshots (USB, PCI, evdev) extracted from kernel-device records,
//! and the identity/predicate operations the policy engine and orchestrator need.

pub mod error;
pub mod evdev;
pub mod pci;
pub mod usb;

use serde::Serialize;

pub use error::DeviceError;
pub use evdev::EvdevInfo;
pub use pci::PciInfo;
pub use usb::{BootDeviceProbe, UsbInfo};

/// Tagged union over the three device kinds the orchestrator routes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeviceInfo {
    Usb(UsbInfo),
    Pci(PciInfo),
    Evdev(EvdevInfo),
}

impl DeviceInfo {
    pub fn friendly_name(&self) -> String {
        match self {
            DeviceInfo::Usb(d) => d.friendly_name(),
            DeviceInfo::Pci(d) => d.friendly_name(),
            DeviceInfo::Evdev(d) => d.friendly_name(),
        }
    }

    /// Unique while the device remains physically present.
    pub fn runtime_id(&self) -> String {
        match self {
            DeviceInfo::Usb(d) => d.runtime_id(),
            DeviceInfo::Pci(d) => d.runtime_id(),
            DeviceInfo::Evdev(d) => d.runtime_id(),
        }
    }

    /// Stable across replugs.
    pub fn persistent_id(&self) -> String {
        match self {
            DeviceInfo::Usb(d) => d.persistent_id(),
            DeviceInfo::Pci(d) => d.persistent_id(),
            DeviceInfo::Evdev(d) => d.persistent_id(),
        }
    }

    pub fn as_usb(&self) -> Option<&UsbInfo> {
        match self {
            DeviceInfo::Usb(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_pci(&self) -> Option<&PciInfo> {
        match self {
            DeviceInfo::Pci(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_evdev(&self) -> Option<&EvdevInfo> {
        match self {
            DeviceInfo::Evdev(d) => Some(d),
            _ => None,
        }
    }
}
