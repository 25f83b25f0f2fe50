// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use regex::RegexBuilder;
use serde::Deserialize;
use vhotplug_device::evdev::EvdevInfo;
use vhotplug_device::pci::PciInfo;
use vhotplug_device::usb::UsbInfo;

/// Something that can test whether a device snapshot of type `D` matches it.
pub trait Matches<D> {
    fn matches(&self, dev: &D) -> bool;
}

fn regex_eq(pattern: &str, value: &str) -> bool {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

fn hex_eq(pattern: &str, value: u16) -> bool {
    u16::from_str_radix(pattern.trim_start_matches("0x"), 16)
        .map(|parsed| parsed == value)
        .unwrap_or(false)
}

/// A USB matcher matches if *any* of its populated independent groups holds.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbMatcher {
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
    pub vendor_name: Option<String>,
    pub product_name: Option<String>,
    pub bus: Option<u32>,
    pub root_port: Option<u32>,
    pub device_class: Option<u8>,
    pub device_subclass: Option<u8>,
    pub device_protocol: Option<u8>,
    pub interface_class: Option<u8>,
    pub interface_subclass: Option<u8>,
    pub interface_protocol: Option<u8>,
}

impl Matches<UsbInfo> for UsbMatcher {
    fn matches(&self, dev: &UsbInfo) -> bool {
        if let (Some(vid), Some(pid)) = (&self.vendor_id, &self.product_id) {
            if hex_eq(vid, dev.vid) && hex_eq(pid, dev.pid) {
                return true;
            }
        }
        if let Some(name) = &self.vendor_name {
            if dev.vendor_name.as_deref().is_some_and(|v| regex_eq(name, v)) {
                return true;
            }
        }
        if let Some(name) = &self.product_name {
            if dev.product_name.as_deref().is_some_and(|v| regex_eq(name, v)) {
                return true;
            }
        }
        if let (Some(bus), Some(root_port)) = (self.bus, self.root_port) {
            if bus == dev.busnum && dev.root_port() == Some(root_port) {
                return true;
            }
        }
        if let Some(class) = self.device_class {
            if class == dev.device_class
                && self.device_subclass.map_or(true, |s| s == dev.device_subclass)
                && self.device_protocol.map_or(true, |p| p == dev.device_protocol)
            {
                return true;
            }
        }
        if let Some(class) = self.interface_class {
            let hits = dev.interfaces.iter().any(|iface| {
                iface.class == class
                    && self.interface_subclass.map_or(true, |s| s == iface.subclass)
                    && self.interface_protocol.map_or(true, |p| p == iface.protocol)
            });
            if hits {
                return true;
            }
        }
        false
    }
}

/// A PCI matcher matches if *any* of its populated independent groups holds.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PciMatcher {
    pub address: Option<String>,
    pub vendor_id: Option<String>,
    pub device_id: Option<String>,
    pub device_class: Option<u8>,
    pub device_subclass: Option<u8>,
    pub prog_if: Option<u8>,
}

impl Matches<PciInfo> for PciMatcher {
    fn matches(&self, dev: &PciInfo) -> bool {
        if let Some(addr) = &self.address {
            if addr.eq_ignore_ascii_case(&dev.address) {
                return true;
            }
        }
        if let (Some(vid), Some(did)) = (&self.vendor_id, &self.device_id) {
            let vid = u32::from_str_radix(vid.trim_start_matches("0x"), 16).ok();
            let did = u32::from_str_radix(did.trim_start_matches("0x"), 16).ok();
            if vid == Some(dev.vendor_id) && did == Some(dev.device_id) {
                return true;
            }
        }
        if let Some(class) = self.device_class {
            if class == dev.pci_class
                && self.device_subclass.map_or(true, |s| s == dev.pci_subclass)
                && self.prog_if.map_or(true, |p| p == dev.pci_prog_if)
            {
                return true;
            }
        }
        false
    }
}

/// An evdev matcher matches if *any* of its populated independent groups holds.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvdevMatcher {
    pub name: Option<String>,
    pub path_tag: Option<String>,
    pub property: Option<String>,
    pub value: Option<String>,
}

impl Matches<EvdevInfo> for EvdevMatcher {
    fn matches(&self, dev: &EvdevInfo) -> bool {
        if let Some(name) = &self.name {
            if regex_eq(name, &dev.name) {
                return true;
            }
        }
        if let Some(tag) = &self.path_tag {
            if dev.path_tag.as_deref().is_some_and(|t| regex_eq(tag, t)) {
                return true;
            }
        }
        if let (Some(prop), Some(value)) = (&self.property, &self.value) {
            if dev
                .properties
                .get(prop)
                .is_some_and(|v| v.eq_ignore_ascii_case(value))
            {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usb_vid_pid_requires_both() {
        let matcher = UsbMatcher {
            vendor_id: Some("046d".into()),
            product_id: None,
            vendor_name: None,
            product_name: None,
            bus: None,
            root_port: None,
            device_class: None,
            device_subclass: None,
            device_protocol: None,
            interface_class: None,
            interface_subclass: None,
            interface_protocol: None,
        };
        let dev = UsbInfo {
            sys_name: "1-2".into(),
            device_node: None,
            vid: 0x046d,
            pid: 0xc52b,
            vendor_name: None,
            product_name: None,
            serial: None,
            busnum: 1,
            devnum: 2,
            ports: vec![2],
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            bcd_device: 0,
            interfaces: vec![],
        };
        assert!(!matcher.matches(&dev), "partial vid/pid match must not match");
    }

    #[test]
    fn pci_class_matcher_ignores_absent_sub_fields() {
        let matcher = PciMatcher {
            address: None,
            vendor_id: None,
            device_id: None,
            device_class: Some(0x0c),
            device_subclass: None,
            prog_if: None,
        };
        let dev = PciInfo {
            address: "0000:00:14.0".into(),
            driver: None,
            vendor_id: 0x8086,
            device_id: 0x1234,
            pci_class: 0x0c,
            pci_subclass: 0x03,
            pci_prog_if: 0x30,
            subsystem_vendor: None,
            subsystem_device: None,
        };
        assert!(matcher.matches(&dev));
    }
}
