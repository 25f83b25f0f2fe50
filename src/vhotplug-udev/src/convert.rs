// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Translates a live `udev::Device` record into the immutable snapshots
//! `vhotplug-device` defines.

use std::collections::BTreeMap;

use tracing::debug;
use udev::Device;
use vhotplug_device::evdev::EvdevInfo;
use vhotplug_device::pci::PciInfo;
use vhotplug_device::usb::{UsbInfo, UsbInterface};

pub(crate) fn property(device: &Device, name: &str) -> Option<String> {
    device.property_value(name).map(|v| v.to_string_lossy().into_owned())
}

fn property_hex_u16(device: &Device, name: &str) -> Option<u16> {
    u16::from_str_radix(property(device, name)?.trim(), 16).ok()
}

pub(crate) fn attribute(device: &Device, name: &str) -> Option<String> {
    device.attribute_value(name).map(|v| v.to_string_lossy().into_owned())
}

/// Logs every udev property/attribute of a device at debug level, matching the
/// original implementation's startup device dump.
pub fn log_device(device: &Device) {
    debug!(
        sys_path = %device.syspath().display(),
        sys_name = ?device.sysname(),
        subsystem = ?device.subsystem(),
        device_type = ?device.devtype(),
        device_node = ?device.devnode(),
        is_initialized = device.is_initialized(),
        "udev device"
    );
    for prop in device.properties() {
        debug!(
            property = ?prop.name(),
            value = ?prop.value(),
            "  udev property"
        );
    }
}

/// `true` when `device` is a USB device node (`usb` subsystem, `usb_device` devtype).
pub fn is_usb_device(device: &Device) -> bool {
    device.subsystem().and_then(|s| s.to_str()) == Some("usb")
        && device.devtype().and_then(|t| t.to_str()) == Some("usb_device")
}

pub fn is_pci_device(device: &Device) -> bool {
    device.subsystem().and_then(|s| s.to_str()) == Some("pci")
}

/// `true` when `device` is an `event*` node in the `input` subsystem flagged
/// `ID_INPUT=1` by udev's input rules.
pub fn is_input_device(device: &Device) -> bool {
    device.subsystem().and_then(|s| s.to_str()) == Some("input")
        && device.sysname().to_string_lossy().starts_with("event")
        && property(device, "ID_INPUT").as_deref() == Some("1")
}

/// Finds the USB device ancestor of an arbitrary child device (e.g. an evdev node),
/// mirroring `device.find_parent(subsystem='usb', device_type='usb_device')`.
pub fn find_usb_parent(device: &Device) -> Option<Device> {
    device.parent_with_subsystem_devtype("usb", "usb_device").ok().flatten()
}

pub fn usb_info_from_device(device: &Device) -> Option<UsbInfo> {
    let sys_name = device.sysname().to_string_lossy().into_owned();
    let vid = property_hex_u16(device, "ID_VENDOR_ID")?;
    let pid = property_hex_u16(device, "ID_MODEL_ID")?;
    let busnum = attribute(device, "busnum")?.trim().parse().ok()?;
    let devnum = attribute(device, "devnum")?.trim().parse().ok()?;
    let device_class = attribute(device, "bDeviceClass")
        .and_then(|s| u8::from_str_radix(s.trim(), 16).ok())
        .unwrap_or(0);
    let device_subclass = attribute(device, "bDeviceSubClass")
        .and_then(|s| u8::from_str_radix(s.trim(), 16).ok())
        .unwrap_or(0);
    let device_protocol = attribute(device, "bDeviceProtocol")
        .and_then(|s| u8::from_str_radix(s.trim(), 16).ok())
        .unwrap_or(0);
    let bcd_device = attribute(device, "bcdDevice")
        .and_then(|s| u16::from_str_radix(s.trim(), 16).ok())
        .unwrap_or(0);
    let interfaces: Vec<UsbInterface> = property(device, "ID_USB_INTERFACES")
        .map(|raw| UsbInfo::parse_interfaces(&raw))
        .unwrap_or_default();

    Some(UsbInfo {
        ports: UsbInfo::parse_ports(&sys_name),
        sys_name,
        device_node: device.devnode().map(|p| p.to_string_lossy().into_owned()),
        vid,
        pid,
        vendor_name: property(device, "ID_VENDOR_FROM_DATABASE").or_else(|| property(device, "ID_VENDOR")),
        product_name: property(device, "ID_MODEL_FROM_DATABASE").or_else(|| property(device, "ID_MODEL")),
        serial: property(device, "ID_SERIAL_SHORT"),
        busnum,
        devnum,
        device_class,
        device_subclass,
        device_protocol,
        bcd_device,
        interfaces,
    })
}

pub fn pci_info_from_device(device: &Device) -> Option<PciInfo> {
    let address = device.sysname().to_string_lossy().into_owned();
    let pci_id = property(device, "PCI_ID")?;
    let (vendor_id, device_id) = pci_id.split_once(':')?;
    let vendor_id = u32::from_str_radix(vendor_id, 16).ok()?;
    let device_id = u32::from_str_radix(device_id, 16).ok()?;
    let class_raw = property(device, "PCI_CLASS").and_then(|s| u32::from_str_radix(&s, 16).ok()).unwrap_or(0);
    let (pci_class, pci_subclass, pci_prog_if) = PciInfo::parse_class(class_raw);
    let subsys = property(device, "PCI_SUBSYS_ID");
    let (subsystem_vendor, subsystem_device) = subsys
        .and_then(|s| {
            let (v, d) = s.split_once(':')?;
            Some((u32::from_str_radix(v, 16).ok()?, u32::from_str_radix(d, 16).ok()?))
        })
        .unzip();

    Some(PciInfo {
        driver: device.driver().map(|d| d.to_string_lossy().into_owned()),
        address,
        vendor_id,
        device_id,
        pci_class,
        pci_subclass,
        pci_prog_if,
        subsystem_vendor,
        subsystem_device,
    })
}

pub fn evdev_info_from_device(device: &Device, name: String) -> Option<EvdevInfo> {
    let device_node = device.devnode()?.to_string_lossy().into_owned();
    let mut properties = BTreeMap::new();
    for prop in device.properties() {
        properties.insert(
            prop.name().to_string_lossy().into_owned(),
            prop.value().to_string_lossy().into_owned(),
        );
    }
    Some(EvdevInfo {
        sys_name: device.sysname().to_string_lossy().into_owned(),
        device_node,
        name,
        bus: property(device, "ID_BUS"),
        path_tag: property(device, "ID_PATH_TAG"),
        properties,
    })
}
