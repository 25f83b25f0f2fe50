// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

/// Immutable snapshot of a PCI device, extracted once from its udev record.
#[derive(Debug, Clone, Serialize)]
pub struct PciInfo {
    /// `DDDD:BB:SS.F`
    pub address: String,
    pub driver: Option<String>,
    pub vendor_id: u32,
    pub device_id: u32,
    pub pci_class: u8,
    pub pci_subclass: u8,
    pub pci_prog_if: u8,
    pub subsystem_vendor: Option<u32>,
    pub subsystem_device: Option<u32>,
}

impl PciInfo {
    /// Splits the kernel's 24-bit `PCI_CLASS` property (class:subclass:prog_if, 8 bits
    /// each) into its three components.
    pub fn parse_class(raw: u32) -> (u8, u8, u8) {
        let class = ((raw >> 16) & 0xff) as u8;
        let subclass = ((raw >> 8) & 0xff) as u8;
        let prog_if = (raw & 0xff) as u8;
        (class, subclass, prog_if)
    }

    pub fn friendly_name(&self) -> String {
        format!("PCI {:04x}:{:04x} ({})", self.vendor_id, self.device_id, self.address)
    }

    pub fn runtime_id(&self) -> String {
        format!("pci-{}", self.address)
    }

    /// PCI identity is already stable across replugs: the bus address itself.
    pub fn persistent_id(&self) -> String {
        format!("pci-{}", self.address)
    }

    /// The `qdev_id` this device would be given when hotplugged as `vfio-pci`.
    pub fn qdev_id(&self) -> String {
        format!("pci-{}", self.address.replace([':', '.'], "_"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_24_bit_class_field() {
        // USB controller, XHCI: class 0x0c, subclass 0x03, prog_if 0x30.
        assert_eq!(PciInfo::parse_class(0x0c0330), (0x0c, 0x03, 0x30));
    }
}
