// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use serde::Serialize;

/// One `{class, subclass, protocol}` triple parsed out of a USB interface descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsbInterface {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

const HUB_CLASS: u8 = 0x09;

/// Immutable snapshot of a USB device, extracted once from its udev record.
///
/// Mirrors the fields plugged by the policy matcher in `vhotplug-policy` and the
/// identifiers used by the QEMU/crosvm links.
#[derive(Debug, Clone, Serialize)]
pub struct UsbInfo {
    pub sys_name: String,
    pub device_node: Option<String>,
    pub vid: u16,
    pub pid: u16,
    pub vendor_name: Option<String>,
    pub product_name: Option<String>,
    pub serial: Option<String>,
    pub busnum: u32,
    pub devnum: u32,
    /// Port chain parsed from the sysname `B-P1.P2…`, e.g. `1-2.3` -> `[2, 3]`.
    pub ports: Vec<u32>,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub bcd_device: u16,
    pub interfaces: Vec<UsbInterface>,
}

impl UsbInfo {
    /// Parses the colon-separated `CCSSPP` interface string (`":030101:030102:"`) into
    /// a list of class/subclass/protocol triples.
    pub fn parse_interfaces(raw: &str) -> Vec<UsbInterface> {
        raw.split(':')
            .filter(|s| s.len() == 6)
            .filter_map(|triple| {
                let class = u8::from_str_radix(&triple[0..2], 16).ok()?;
                let subclass = u8::from_str_radix(&triple[2..4], 16).ok()?;
                let protocol = u8::from_str_radix(&triple[4..6], 16).ok()?;
                Some(UsbInterface { class, subclass, protocol })
            })
            .collect()
    }

    /// Parses a USB sysname such as `1-2.3` into the bus number and port chain.
    pub fn parse_ports(sysname: &str) -> Vec<u32> {
        sysname
            .split_once('-')
            .map(|(_, ports)| ports)
            .unwrap_or("")
            .split('.')
            .filter_map(|p| p.parse().ok())
            .collect()
    }

    pub fn friendly_name(&self) -> String {
        match (&self.vendor_name, &self.product_name) {
            (Some(v), Some(p)) => format!("{v} {p}"),
            (Some(v), None) => v.clone(),
            (None, Some(p)) => p.clone(),
            (None, None) => format!("USB {:04x}:{:04x}", self.vid, self.pid),
        }
    }

    /// Identity stable only while the device is physically present.
    pub fn runtime_id(&self) -> String {
        match &self.device_node {
            Some(node) => format!("usb-{node}"),
            None => format!("usb-{}-{}", self.busnum, self.devnum),
        }
    }

    /// Identity stable across replugs: `usb-<vid>:<pid>:<serial>`.
    pub fn persistent_id(&self) -> String {
        format!(
            "usb-{:04x}:{:04x}:{}",
            self.vid,
            self.pid,
            self.serial.as_deref().unwrap_or("")
        )
    }

    pub fn root_port(&self) -> Option<u32> {
        self.ports.first().copied()
    }

    pub fn is_usb_hub(&self) -> bool {
        self.device_class == HUB_CLASS || self.interfaces.iter().any(|i| i.class == HUB_CLASS)
    }

    /// The kernel modalias string for each interface, e.g.
    /// `usb:v046Dp C52Bd0000dc00dsc00dp00ic03isc01ip02` (formatted without the space).
    ///
    /// Read-only diagnostic data, surfaced in the API's `usb_list` response; it never
    /// participates in policy matching.
    pub fn modaliases(&self) -> Vec<String> {
        self.interfaces
            .iter()
            .map(|iface| {
                format!(
                    "usb:v{:04X}p{:04X}d{:04X}dc{:02X}dsc{:02X}dp{:02X}ic{:02X}isc{:02X}ip{:02X}",
                    self.vid,
                    self.pid,
                    self.bcd_device,
                    self.device_class,
                    self.device_subclass,
                    self.device_protocol,
                    iface.class,
                    iface.subclass,
                    iface.protocol,
                )
            })
            .collect()
    }

    /// True if any partition of this device is mounted at `/boot`.
    ///
    /// Enumeration of block children and their mountpoints is host-specific and is
    /// supplied by the caller (the live udev context owns that knowledge); this keeps
    /// the device snapshot itself free of sysfs/mount-table coupling.
    pub fn is_boot_device(&self, probe: &dyn BootDeviceProbe) -> bool {
        probe
            .partitions_of(self)
            .iter()
            .any(|p| probe.mountpoint_of(p).as_deref() == Some(Path::new("/boot")))
    }
}

/// Supplies the block-device/mountpoint facts `is_boot_device` needs, without coupling
/// `vhotplug-device` to a live udev context.
pub trait BootDeviceProbe {
    fn partitions_of(&self, usb: &UsbInfo) -> Vec<PathBuf>;
    fn mountpoint_of(&self, partition: &Path) -> Option<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_interface_triples() {
        let interfaces = UsbInfo::parse_interfaces(":030101:030102:030000:");
        assert_eq!(
            interfaces,
            vec![
                UsbInterface { class: 3, subclass: 1, protocol: 1 },
                UsbInterface { class: 3, subclass: 1, protocol: 2 },
                UsbInterface { class: 3, subclass: 0, protocol: 0 },
            ]
        );
    }

    #[test]
    fn detects_hub_from_interfaces() {
        let interfaces = UsbInfo::parse_interfaces(":090000:");
        let dev = sample_usb(interfaces);
        assert!(dev.is_usb_hub());
    }

    #[test]
    fn parses_port_chain() {
        assert_eq!(UsbInfo::parse_ports("1-2.3"), vec![2, 3]);
        assert_eq!(UsbInfo::parse_ports("1-4"), vec![4]);
    }

    #[test]
    fn persistent_id_is_pure_function_of_identity() {
        let a = sample_usb(vec![]);
        let b = sample_usb(vec![]);
        assert_eq!(a.persistent_id(), b.persistent_id());
    }

    fn sample_usb(interfaces: Vec<UsbInterface>) -> UsbInfo {
        UsbInfo {
            sys_name: "1-2".into(),
            device_node: Some("/dev/bus/usb/001/005".into()),
            vid: 0x046d,
            pid: 0xc52b,
            vendor_name: Some("Logitech".into()),
            product_name: Some("USB Receiver".into()),
            serial: Some("ABC123".into()),
            busnum: 1,
            devnum: 5,
            ports: vec![2],
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            bcd_device: 0x0100,
            interfaces,
        }
    }
}
