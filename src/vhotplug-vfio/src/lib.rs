// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Reads and enumerates IOMMU groups, and rebinds PCI devices to the `vfio-pci`
//! driver via sysfs.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, warn};

const IOMMU_GROUP_RETRY_COUNT: u32 = 4;
const IOMMU_GROUP_RETRY_DELAY: Duration = Duration::from_millis(100);
const UNBIND_RETRY_COUNT: u32 = 5;
const UNBIND_RETRY_DELAY: Duration = Duration::from_secs(1);

const VFIO_DRIVER: &str = "vfio-pci";

/// Errors rebinding a PCI device to `vfio-pci`.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum VfioError {
    /// iommu_group of {0} did not materialise under sysfs in time
    IommuGroupMissing(String),
    /// failed to unbind {0} from its current driver after {1} attempts: {2}
    UnbindFailed(String, u32, #[source] io::Error),
    /// failed to write driver_override for {0}: {1}
    DriverOverrideFailed(String, #[source] io::Error),
    /// failed to write {0} to drivers_probe: {1}
    DriversProbeFailed(String, #[source] io::Error),
}

fn device_dir(pci_addr: &str) -> PathBuf {
    PathBuf::from("/sys/bus/pci/devices").join(pci_addr)
}

/// Reads the basename of the `driver` symlink, if any (`None` means unbound).
pub async fn current_driver(pci_addr: &str) -> Option<String> {
    let link = device_dir(pci_addr).join("driver");
    let target = tokio::fs::read_link(&link).await.ok()?;
    target.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Reads `/sys/bus/pci/devices/<addr>/iommu_group/devices/`, retrying while the
/// symlink target materialises (it can lag slightly behind device enumeration).
pub async fn get_iommu_group_devices(pci_addr: &str) -> Result<Vec<String>, VfioError> {
    let dir = device_dir(pci_addr).join("iommu_group").join("devices");
    for attempt in 0..IOMMU_GROUP_RETRY_COUNT {
        if let Ok(mut entries) = tokio::fs::read_dir(&dir).await {
            let mut addrs = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                addrs.push(entry.file_name().to_string_lossy().into_owned());
            }
            if !addrs.is_empty() {
                addrs.sort();
                return Ok(addrs);
            }
        }
        if attempt + 1 < IOMMU_GROUP_RETRY_COUNT {
            tokio::time::sleep(IOMMU_GROUP_RETRY_DELAY).await;
        }
    }
    Err(VfioError::IommuGroupMissing(pci_addr.to_string()))
}

/// Unbinds `pci_addr` from its current driver, retrying up to 5 times against sysfs
/// races with udev's own bind events. A no-op if the device is already unbound.
async fn unbind_current_driver(pci_addr: &str) -> Result<(), VfioError> {
    if current_driver(pci_addr).await.is_none() {
        return Ok(());
    }
    let unbind_path = device_dir(pci_addr).join("driver").join("unbind");
    let mut last_err = None;
    for attempt in 0..UNBIND_RETRY_COUNT {
        match tokio::fs::write(&unbind_path, pci_addr.as_bytes()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < UNBIND_RETRY_COUNT {
                    tokio::time::sleep(UNBIND_RETRY_DELAY).await;
                }
            }
        }
    }
    Err(VfioError::UnbindFailed(
        pci_addr.to_string(),
        UNBIND_RETRY_COUNT,
        last_err.expect("loop always sets last_err on failure"),
    ))
}

/// Binds `pci_addr` to `vfio-pci`: unbind (best-effort no-op if already vfio-pci),
/// write `driver_override`, then kick `drivers_probe`.
pub async fn bind_vfio(pci_addr: &str) -> Result<(), VfioError> {
    if current_driver(pci_addr).await.as_deref() == Some(VFIO_DRIVER) {
        debug!(pci_addr, "already bound to vfio-pci");
        return Ok(());
    }
    unbind_current_driver(pci_addr).await?;

    let override_path = device_dir(pci_addr).join("driver_override");
    tokio::fs::write(&override_path, VFIO_DRIVER.as_bytes())
        .await
        .map_err(|e| VfioError::DriverOverrideFailed(pci_addr.to_string(), e))?;

    tokio::fs::write("/sys/bus/pci/drivers_probe", pci_addr.as_bytes())
        .await
        .map_err(|e| VfioError::DriversProbeFailed(pci_addr.to_string(), e))?;

    Ok(())
}

/// Binds every device in `pci_addr`'s IOMMU group to `vfio-pci`. Stops at the first
/// failure (orchestrator decides how to surface partial progress, see the design
/// notes on IOMMU-group half-attach).
pub async fn setup_vfio(pci_addr: &str) -> Result<Vec<String>, VfioError> {
    let group = get_iommu_group_devices(pci_addr).await?;
    if group.len() > 1 {
        warn!(pci_addr, group_size = group.len(), "device shares an IOMMU group");
    }
    for member in &group {
        bind_vfio(member).await?;
    }
    Ok(group)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_dir_is_rooted_under_sysfs_pci_devices() {
        let dir = device_dir("0000:01:00.0");
        assert_eq!(dir, PathBuf::from("/sys/bus/pci/devices/0000:01:00.0"));
    }

    #[tokio::test]
    async fn current_driver_is_none_for_nonexistent_device() {
        assert_eq!(current_driver("0000:ff:ff.7").await, None);
    }
}
