// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use tracing::warn;
use udev::Enumerator;
use vhotplug_device::evdev::EvdevInfo;
use vhotplug_device::pci::PciInfo;
use vhotplug_device::usb::UsbInfo;

use crate::convert::{
    evdev_info_from_device, is_input_device, is_pci_device, is_usb_device, pci_info_from_device,
    usb_info_from_device,
};
use crate::error::UdevError;

pub fn enumerate_usb_devices() -> Result<Vec<UsbInfo>, UdevError> {
    let mut enumerator = Enumerator::new().map_err(UdevError::Enumerate)?;
    enumerator.match_subsystem("usb").map_err(UdevError::Enumerate)?;
    let devices = enumerator.scan_devices().map_err(UdevError::Enumerate)?;
    Ok(devices
        .filter(is_usb_device)
        .filter_map(|d| {
            usb_info_from_device(&d).or_else(|| {
                warn!(sys_path = %d.syspath().display(), "failed to extract USB device info");
                None
            })
        })
        .collect())
}

pub fn enumerate_pci_devices() -> Result<Vec<PciInfo>, UdevError> {
    let mut enumerator = Enumerator::new().map_err(UdevError::Enumerate)?;
    enumerator.match_subsystem("pci").map_err(UdevError::Enumerate)?;
    let devices = enumerator.scan_devices().map_err(UdevError::Enumerate)?;
    Ok(devices
        .filter(is_pci_device)
        .filter_map(|d| {
            pci_info_from_device(&d).or_else(|| {
                warn!(sys_path = %d.syspath().display(), "failed to extract PCI device info");
                None
            })
        })
        .collect())
}

pub fn enumerate_evdev_devices() -> Result<Vec<EvdevInfo>, UdevError> {
    let mut enumerator = Enumerator::new().map_err(UdevError::Enumerate)?;
    enumerator.match_subsystem("input").map_err(UdevError::Enumerate)?;
    let devices = enumerator.scan_devices().map_err(UdevError::Enumerate)?;
    Ok(devices
        .filter(is_input_device)
        .filter_map(|d| {
            let node = d.devnode()?.to_string_lossy().into_owned();
            let name = vhotplug_device::evdev::EvdevInfo::read_name(&node).ok()?;
            evdev_info_from_device(&d, name)
        })
        .collect())
}
