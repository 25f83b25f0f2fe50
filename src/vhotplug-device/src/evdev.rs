// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fs::File;
use std::os::unix::io::AsRawFd;

use serde::Serialize;

use crate::error::DeviceError;

// `EVIOCGNAME(len)` and `EVIOCGRAB` per <linux/input.h>.
nix::ioctl_read_buf!(eviocgname, b'E', 0x06, u8);
nix::ioctl_write_int!(eviocgrab, b'E', 0x90);

const MAX_NAME_LEN: usize = 256;

/// Immutable snapshot of an evdev input node.
#[derive(Debug, Clone, Serialize)]
pub struct EvdevInfo {
    pub sys_name: String,
    pub device_node: String,
    /// Device name read via `EVIOCGNAME`.
    pub name: String,
    /// `ID_BUS` udev property (e.g. `usb`).
    pub bus: Option<String>,
    /// `ID_PATH_TAG` udev property.
    pub path_tag: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl EvdevInfo {
    pub fn friendly_name(&self) -> String {
        self.name.clone()
    }

    pub fn runtime_id(&self) -> String {
        format!("evdev-{}", self.device_node)
    }

    pub fn persistent_id(&self) -> String {
        format!("evdev-{}", self.sys_name)
    }

    /// Reads the device's name straight from the kernel via `EVIOCGNAME`, independent
    /// of whatever udev happened to cache in `NAME`.
    pub fn read_name(device_node: &str) -> Result<String, DeviceError> {
        let file = File::open(device_node)
            .map_err(|e| DeviceError::OpenDeviceNode(device_node.to_string(), e))?;
        let mut buf = [0u8; MAX_NAME_LEN];
        // SAFETY: `buf` outlives the ioctl call and is sized to the kernel's max name length.
        let len = unsafe { eviocgname(file.as_raw_fd(), &mut buf) }
            .map_err(|e| DeviceError::Ioctl("EVIOCGNAME", device_node.to_string(), e))?;
        let len = (len as usize).min(buf.len());
        let nul = buf[..len].iter().position(|&b| b == 0).unwrap_or(len);
        Ok(String::from_utf8_lossy(&buf[..nul]).into_owned())
    }

    /// Attempts an exclusive `EVIOCGRAB`; `EBUSY` means some other process already
    /// holds the grab and the device is treated as already claimed, not an error.
    pub fn test_grab(device_node: &str) -> Result<bool, DeviceError> {
        let file = File::open(device_node)
            .map_err(|e| DeviceError::OpenDeviceNode(device_node.to_string(), e))?;
        // SAFETY: grabbing then releasing the same fd we just opened.
        match unsafe { eviocgrab(file.as_raw_fd(), 1) } {
            Ok(_) => {
                // SAFETY: releasing the grab acquired above.
                let _ = unsafe { eviocgrab(file.as_raw_fd(), 0) };
                Ok(true)
            }
            Err(nix::Error::EBUSY) => Ok(false),
            Err(e) => Err(DeviceError::Ioctl("EVIOCGRAB", device_node.to_string(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_derive_from_node_and_sysname() {
        let dev = EvdevInfo {
            sys_name: "event3".into(),
            device_node: "/dev/input/event3".into(),
            name: "Logitech USB Receiver".into(),
            bus: Some("usb".into()),
            path_tag: None,
            properties: BTreeMap::new(),
        };
        assert_eq!(dev.runtime_id(), "evdev-/dev/input/event3");
        assert_eq!(dev.persistent_id(), "evdev-event3");
    }
}
