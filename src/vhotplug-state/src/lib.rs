// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! The runtime *device→VM* map plus the persisted *device-identity→chosen-VM* and
//! *disconnected-identities* sets.
//!
//! All mutators run under a single lock; the JSON document is rewritten in full on
//! every mutation, atomically (`<path>.tmp` + rename), while the lock is held.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Errors from loading or persisting the state document. All are non-fatal to the
/// daemon: a load failure just starts from an empty state, a save failure is logged.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum StateError {
    /// failed to read state file {0}: {1}
    Read(PathBuf, #[source] io::Error),
    /// state file {0} is not valid JSON: {1}
    Parse(PathBuf, #[source] serde_json::Error),
    /// failed to write state file {0}: {1}
    Write(PathBuf, #[source] io::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedDocument {
    #[serde(default)]
    selected_vms: HashMap<String, String>,
    #[serde(default)]
    disconnected_devices: HashSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    usb_runtime: HashMap<String, String>,
    pci_runtime: HashMap<String, String>,
    selected_vms: HashMap<String, String>,
    disconnected_devices: HashSet<String>,
}

/// Process-global device/VM mapping. One instance, shared via `Arc`.
#[derive(Debug)]
pub struct StateStore {
    persistent: bool,
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl StateStore {
    /// Loads `selected_vms`/`disconnected_devices` from `path` if `persistent` and the
    /// file exists; a missing or corrupt file starts from empty state (logged).
    pub fn load(persistent: bool, path: Option<PathBuf>) -> Self {
        let mut inner = Inner::default();
        if persistent {
            if let Some(path) = &path {
                match Self::read_document(path) {
                    Ok(Some(doc)) => {
                        inner.selected_vms = doc.selected_vms;
                        inner.disconnected_devices = doc.disconnected_devices;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "failed to load state database, starting empty"),
                }
            }
        }
        StateStore { persistent, path, inner: Mutex::new(inner) }
    }

    fn read_document(path: &Path) -> Result<Option<PersistedDocument>, StateError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path).map_err(|e| StateError::Read(path.to_path_buf(), e))?;
        let doc = serde_json::from_str(&raw).map_err(|e| StateError::Parse(path.to_path_buf(), e))?;
        Ok(Some(doc))
    }

    /// Writes the persisted document to `<path>.tmp` and renames it over `path`.
    fn save(&self, inner: &Inner) -> Result<(), StateError> {
        if !self.persistent {
            return Ok(());
        }
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let doc = PersistedDocument {
            selected_vms: inner.selected_vms.clone(),
            disconnected_devices: inner.disconnected_devices.clone(),
        };
        let serialized =
            serde_json::to_string_pretty(&doc).expect("state document always serializes");
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, serialized).map_err(|e| StateError::Write(path.clone(), e))?;
        std::fs::rename(&tmp_path, path).map_err(|e| StateError::Write(path.clone(), e))?;
        Ok(())
    }

    fn save_logged(&self, inner: &Inner) {
        if let Err(e) = self.save(inner) {
            warn!(error = %e, "failed to persist state database");
        }
    }

    pub fn set_vm_for_usb(&self, device_node: &str, vm: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.usb_runtime.insert(device_node.to_string(), vm.to_string());
    }

    pub fn get_vm_for_usb(&self, device_node: &str) -> Option<String> {
        self.inner.lock().unwrap().usb_runtime.get(device_node).cloned()
    }

    pub fn remove_vm_for_usb(&self, device_node: &str) {
        self.inner.lock().unwrap().usb_runtime.remove(device_node);
    }

    pub fn set_vm_for_pci(&self, address: &str, vm: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.pci_runtime.insert(address.to_string(), vm.to_string());
    }

    pub fn get_vm_for_pci(&self, address: &str) -> Option<String> {
        self.inner.lock().unwrap().pci_runtime.get(address).cloned()
    }

    pub fn remove_vm_for_pci(&self, address: &str) {
        self.inner.lock().unwrap().pci_runtime.remove(address);
    }

    pub fn select_vm_for_device(&self, persistent_id: &str, vm: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.selected_vms.insert(persistent_id.to_string(), vm.to_string());
        self.save_logged(&inner);
    }

    pub fn get_selected_vm_for_device(&self, persistent_id: &str) -> Option<String> {
        self.inner.lock().unwrap().selected_vms.get(persistent_id).cloned()
    }

    pub fn clear_selected_vm_for_device(&self, persistent_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.selected_vms.remove(persistent_id).is_some() {
            self.save_logged(&inner);
        }
    }

    pub fn set_disconnected(&self, persistent_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnected_devices.insert(persistent_id.to_string());
        self.save_logged(&inner);
    }

    pub fn is_disconnected(&self, persistent_id: &str) -> bool {
        self.inner.lock().unwrap().disconnected_devices.contains(persistent_id)
    }

    /// Returns `true` if the device had been marked disconnected (and is now cleared).
    pub fn clear_disconnected(&self, persistent_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.disconnected_devices.remove(persistent_id) {
            self.save_logged(&inner);
            true
        } else {
            false
        }
    }

    pub fn list_usb_devices(&self) -> HashMap<String, String> {
        self.inner.lock().unwrap().usb_runtime.clone()
    }

    pub fn list_pci_devices(&self) -> HashMap<String, String> {
        self.inner.lock().unwrap().pci_runtime.clone()
    }

    pub fn list_disconnected(&self) -> Vec<String> {
        self.inner.lock().unwrap().disconnected_devices.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_selected_vm_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = StateStore::load(true, Some(path.clone()));
        store.select_vm_for_device("usb-04f2:b751:", "vm2");

        let reloaded = StateStore::load(true, Some(path));
        assert_eq!(
            reloaded.get_selected_vm_for_device("usb-04f2:b751:"),
            Some("vm2".to_string())
        );
    }

    #[test]
    fn disconnect_then_clear_round_trips() {
        let store = StateStore::load(false, None);
        store.set_disconnected("usb-1234:5678:");
        assert!(store.is_disconnected("usb-1234:5678:"));
        assert!(store.clear_disconnected("usb-1234:5678:"));
        assert!(!store.is_disconnected("usb-1234:5678:"));
        assert!(!store.clear_disconnected("usb-1234:5678:"));
    }

    #[test]
    fn runtime_maps_are_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::load(true, Some(path.clone()));
        store.set_vm_for_usb("/dev/bus/usb/001/002", "vm1");
        let reloaded = StateStore::load(true, Some(path));
        assert!(reloaded.get_vm_for_usb("/dev/bus/usb/001/002").is_none());
    }
}
