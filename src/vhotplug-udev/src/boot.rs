// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Live udev-backed answer to "is this USB stick the one we booted from".

use std::path::{Path, PathBuf};

use udev::Enumerator;
use vhotplug_device::usb::{BootDeviceProbe, UsbInfo};

use crate::convert::{attribute, find_usb_parent};

/// Walks the live udev tree and `/proc/mounts`, as opposed to the cached
/// snapshots `vhotplug-device` otherwise works with.
pub struct LiveBootDeviceProbe;

impl BootDeviceProbe for LiveBootDeviceProbe {
    fn partitions_of(&self, usb: &UsbInfo) -> Vec<PathBuf> {
        let Ok(mut enumerator) = Enumerator::new() else {
            return Vec::new();
        };
        if enumerator.match_subsystem("block").is_err() {
            return Vec::new();
        }
        let Ok(devices) = enumerator.scan_devices() else {
            return Vec::new();
        };

        devices
            .filter(|d| d.devtype().and_then(|t| t.to_str()) == Some("partition"))
            .filter_map(|d| {
                let parent = find_usb_parent(&d)?;
                let busnum: u32 = attribute(&parent, "busnum")?.trim().parse().ok()?;
                let devnum: u32 = attribute(&parent, "devnum")?.trim().parse().ok()?;
                if busnum == usb.busnum && devnum == usb.devnum {
                    d.devnode().map(Path::to_path_buf)
                } else {
                    None
                }
            })
            .collect()
    }

    fn mountpoint_of(&self, partition: &Path) -> Option<PathBuf> {
        let mounts = std::fs::read_to_string("/proc/mounts").ok()?;
        mounts.lines().find_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mountpoint = fields.next()?;
            (Path::new(device) == partition).then(|| PathBuf::from(mountpoint))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mountpoint_lookup_ignores_other_devices() {
        let probe = LiveBootDeviceProbe;
        assert!(probe.mountpoint_of(Path::new("/dev/definitely-not-a-real-device")).is_none());
    }
}
