// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Converts a raw udev device record, as handed out by [`vhotplug_udev::UdevMonitor`],
//! into the [`DeviceInfo`] snapshot the orchestrator reasons about. The monitor itself
//! stays agnostic of `vhotplug-device`'s tagged union; this is daemon-specific wiring.

use vhotplug_device::evdev::EvdevInfo;
use vhotplug_device::DeviceInfo;
use vhotplug_udev::{evdev_info_from_device, is_input_device, is_pci_device, is_usb_device, pci_info_from_device, usb_info_from_device};

pub fn device_info_from_udev(device: &udev::Device) -> Option<DeviceInfo> {
    if is_usb_device(device) {
        return usb_info_from_device(device).map(DeviceInfo::Usb);
    }
    if is_pci_device(device) {
        return pci_info_from_device(device).map(DeviceInfo::Pci);
    }
    if is_input_device(device) {
        let node = device.devnode()?.to_string_lossy().into_owned();
        let name = EvdevInfo::read_name(&node).ok()?;
        return evdev_info_from_device(device, name).map(DeviceInfo::Evdev);
    }
    None
}
