// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Bridges the kernel's udev device database to the device snapshots and
//! events the orchestrator reasons about.

mod boot;
mod convert;
mod enumerate;
mod error;
mod monitor;

pub use boot::LiveBootDeviceProbe;
pub use convert::{
    evdev_info_from_device, find_usb_parent, is_input_device, is_pci_device, is_usb_device,
    log_device, pci_info_from_device, usb_info_from_device,
};
pub use enumerate::{enumerate_evdev_devices, enumerate_pci_devices, enumerate_usb_devices};
pub use error::UdevError;
pub use monitor::{UdevEvent, UdevEventKind, UdevMonitor};
