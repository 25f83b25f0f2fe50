// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! The single-writer core: decides per-event what to attach/detach, handles
//! IOMMU-group atomicity, and drives the startup/restart reconciler.

use std::collections::HashMap;

use tokio::sync::broadcast;
use vhotplug_device::evdev::EvdevInfo;
use vhotplug_device::usb::BootDeviceProbe;
use vhotplug_device::DeviceInfo;
use vhotplug_policy::{PassthroughInfo, Policy};
use vhotplug_state::StateStore;

use crate::command::{DeviceListEntry, PciSelector, UsbSelector};
use crate::error::OrchestratorError;
use crate::notification::Notification;
use crate::vm::VmEntry;

fn order_key(dev: &DeviceInfo) -> u8 {
    match dev {
        DeviceInfo::Evdev(_) => 0,
        DeviceInfo::Usb(_) => 1,
        DeviceInfo::Pci(_) => 2,
    }
}

fn get_vm_for(state: &StateStore, dev: &DeviceInfo) -> Option<String> {
    match dev {
        DeviceInfo::Usb(u) => u.device_node.as_deref().and_then(|n| state.get_vm_for_usb(n)),
        DeviceInfo::Pci(p) => state.get_vm_for_pci(&p.address),
        DeviceInfo::Evdev(_) => None,
    }
}

fn set_vm_for(state: &StateStore, dev: &DeviceInfo, vm: &str) {
    match dev {
        DeviceInfo::Usb(u) => {
            if let Some(node) = &u.device_node {
                state.set_vm_for_usb(node, vm);
            }
        }
        DeviceInfo::Pci(p) => state.set_vm_for_pci(&p.address, vm),
        DeviceInfo::Evdev(_) => {}
    }
}

fn clear_vm_for(state: &StateStore, dev: &DeviceInfo) {
    match dev {
        DeviceInfo::Usb(u) => {
            if let Some(node) = &u.device_node {
                state.remove_vm_for_usb(node);
            }
        }
        DeviceInfo::Pci(p) => state.remove_vm_for_pci(&p.address),
        DeviceInfo::Evdev(_) => {}
    }
}

/// The orchestrator's owned state: policy, the device→VM map, the known VM links,
/// and the set of devices currently present on the host. Every public method here
/// is meant to run on the single event-loop task (§5).
pub struct Orchestrator {
    policy: Policy,
    state: StateStore,
    vms: HashMap<String, VmEntry>,
    devices: HashMap<String, DeviceInfo>,
    boot_probe: Box<dyn BootDeviceProbe + Send + Sync>,
    notifications: broadcast::Sender<Notification>,
}

impl Orchestrator {
    pub fn new(
        policy: Policy,
        state: StateStore,
        vms: HashMap<String, VmEntry>,
        boot_probe: Box<dyn BootDeviceProbe + Send + Sync>,
        notifications: broadcast::Sender<Notification>,
    ) -> Self {
        Orchestrator { policy, state, vms, devices: HashMap::new(), boot_probe, notifications }
    }

    fn emit(&self, notification: Notification) {
        let _ = self.notifications.send(notification);
    }

    fn emit_connected(&self, dev: &DeviceInfo) {
        match dev {
            DeviceInfo::Usb(u) => self.emit(Notification::UsbConnected { device: u.clone() }),
            DeviceInfo::Pci(p) => self.emit(Notification::PciConnected { device: p.clone() }),
            DeviceInfo::Evdev(_) => {}
        }
    }

    fn emit_disconnected(&self, dev: &DeviceInfo) {
        match dev {
            DeviceInfo::Usb(u) => self.emit(Notification::UsbDisconnected { device: u.clone() }),
            DeviceInfo::Pci(p) => self.emit(Notification::PciDisconnected { device: p.clone() }),
            DeviceInfo::Evdev(_) => {}
        }
    }

    fn emit_attached(&self, dev: &DeviceInfo, vm: &str) {
        match dev {
            DeviceInfo::Usb(u) => self.emit(Notification::UsbAttached { vm: vm.to_string(), device: u.clone() }),
            DeviceInfo::Pci(p) => self.emit(Notification::PciAttached { vm: vm.to_string(), device: p.clone() }),
            DeviceInfo::Evdev(_) => {}
        }
    }

    fn emit_detached(&self, dev: &DeviceInfo, vm: &str) {
        match dev {
            DeviceInfo::Usb(u) => self.emit(Notification::UsbDetached { vm: vm.to_string(), device: u.clone() }),
            DeviceInfo::Pci(p) => self.emit(Notification::PciDetached { vm: vm.to_string(), device: p.clone() }),
            DeviceInfo::Evdev(_) => {}
        }
    }

    fn vm_for_device(&self, dev: &DeviceInfo) -> Option<PassthroughInfo> {
        match dev {
            DeviceInfo::Usb(u) => self.policy.usb.vm_for_device(u),
            DeviceInfo::Pci(p) => self.policy.pci.vm_for_device(p),
            DeviceInfo::Evdev(e) => self.policy.evdev.vm_for_device(e),
        }
    }

    /// Resolves the scope a matched rule assigns to `dev` to a concrete VM name.
    /// Emits `usb_select_vm` and returns `None` when an allow-listed device has no
    /// stored selection and the caller is asking interactively (`ask`); the spec's
    /// notification catalogue has no `pci_select_vm`/evdev equivalent, so PCI and
    /// evdev always fall back to the allow-list's head instead of prompting.
    fn resolve_vm(&self, info: &PassthroughInfo, dev: &DeviceInfo, ask: bool) -> Option<String> {
        if let Some(target) = &info.target_vm {
            return Some(target.clone());
        }
        let allowed = info.allowed_vms.as_ref()?;
        if allowed.is_empty() {
            return None;
        }
        if let Some(selected) = self.state.get_selected_vm_for_device(&dev.persistent_id()) {
            if allowed.contains(&selected) {
                return Some(selected);
            }
        }
        if ask {
            if let DeviceInfo::Usb(usb) = dev {
                self.emit(Notification::UsbSelectVm { device: usb.clone(), candidates: allowed.clone() });
                return None;
            }
        }
        allowed.first().cloned()
    }

    fn register(&mut self, dev: DeviceInfo) {
        self.devices.insert(dev.runtime_id(), dev);
    }

    /// §4.6.1 attach flow.
    async fn attach(&mut self, dev: DeviceInfo, ask: bool) -> Result<(), OrchestratorError> {
        let info = self.vm_for_device(&dev).ok_or(OrchestratorError::NoMatchingRule)?;

        if let DeviceInfo::Usb(usb) = &dev {
            if usb.is_boot_device(self.boot_probe.as_ref()) {
                tracing::warn!(device = %dev.friendly_name(), "refusing passthrough: device hosts /boot");
                return Err(OrchestratorError::BootDevice);
            }
        }
        if let DeviceInfo::Evdev(evdev) = &dev {
            if !EvdevInfo::test_grab(&evdev.device_node)? {
                tracing::debug!(device = %dev.friendly_name(), "input node already exclusively grabbed, skipping");
                return Err(OrchestratorError::AlreadyGrabbed);
            }
        }
        if self.state.is_disconnected(&dev.persistent_id()) {
            return Err(OrchestratorError::Disconnected);
        }

        let vm = self.resolve_vm(&info, &dev, ask).ok_or(OrchestratorError::AwaitingSelection)?;
        if let Some(allowed) = &info.allowed_vms {
            if !allowed.contains(&vm) {
                return Err(OrchestratorError::OutOfScope(vm));
            }
        }
        if !self.vms.contains_key(&vm) {
            return Err(OrchestratorError::UnknownVm(vm));
        }

        if let DeviceInfo::Pci(pci) = &dev {
            let group = vhotplug_vfio::get_iommu_group_devices(&pci.address).await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, pci_addr = %pci.address, "failed to read iommu group, treating as singleton");
                vec![pci.address.clone()]
            });
            if group.len() > 1 {
                if info.pci_iommu_skip_if_shared {
                    return Err(OrchestratorError::SharedIommuGroup);
                }
                if info.pci_iommu_add_all {
                    return self.attach_group(&group, &vm, &dev).await;
                }
            }
        }
        self.attach_one(&dev, &vm).await
    }

    /// §4.6.1 `attach_one`.
    async fn attach_one(&mut self, dev: &DeviceInfo, vm_name: &str) -> Result<(), OrchestratorError> {
        if let Some(existing) = get_vm_for(&self.state, dev) {
            if existing == vm_name {
                return Ok(());
            }
            let _ = self.remove_one(dev, &existing, false).await;
        }

        if let DeviceInfo::Pci(pci) = dev {
            vhotplug_vfio::setup_vfio(&pci.address).await?;
        }

        let vm = self.vms.get(vm_name).ok_or_else(|| OrchestratorError::UnknownVm(vm_name.to_string()))?;
        vm.link.wait_ready(vm.boot_timeout).await?;
        vm.link.add_device(dev).await?;

        set_vm_for(&self.state, dev, vm_name);
        self.state.clear_disconnected(&dev.persistent_id());
        self.emit_attached(dev, vm_name);
        Ok(())
    }

    /// IOMMU-group atomic attach: best-effort forward, `resume` always attempted
    /// (see DESIGN.md for the half-attach open-question resolution).
    async fn attach_group(&mut self, group: &[String], vm_name: &str, primary: &DeviceInfo) -> Result<(), OrchestratorError> {
        let primary_addr = primary.as_pci().map(|p| p.address.clone()).unwrap_or_default();
        for addr in group {
            if *addr == primary_addr {
                continue;
            }
            if let Some(existing) = self.state.get_vm_for_pci(addr) {
                if existing != vm_name {
                    tracing::warn!(pci_addr = %addr, other_vm = %existing, "iommu group member already attached elsewhere, skipping");
                }
            }
        }

        let vm = self.vms.get(vm_name).ok_or_else(|| OrchestratorError::UnknownVm(vm_name.to_string()))?;
        vm.link.pause().await?;

        let mut result = Ok(());
        for addr in group {
            let member = if *addr == primary_addr {
                primary.clone()
            } else if let Some(cached) = self.devices.get(&format!("pci-{addr}")) {
                cached.clone()
            } else {
                tracing::warn!(pci_addr = %addr, "iommu group member not found among known devices, skipping");
                continue;
            };
            if let Err(e) = self.attach_one(&member, vm_name).await {
                result = Err(e);
                break;
            }
        }

        if let Some(vm) = self.vms.get(vm_name) {
            if let Err(e) = vm.link.resume().await {
                tracing::warn!(error = %e, "failed to resume VM after a paused group attach");
            }
        }
        result
    }

    /// §4.6.2 remove flow.
    async fn remove(&mut self, dev: &DeviceInfo, permanent: bool) -> Result<(), OrchestratorError> {
        let vm = get_vm_for(&self.state, dev).ok_or(OrchestratorError::NotAttached)?;

        if let DeviceInfo::Pci(pci) = dev {
            let group = vhotplug_vfio::get_iommu_group_devices(&pci.address).await.unwrap_or_else(|_| vec![pci.address.clone()]);
            if group.len() > 1 {
                if let Some(info) = self.vm_for_device(dev) {
                    if info.pci_iommu_add_all {
                        return self.remove_group(&group, &vm, permanent).await;
                    }
                }
            }
        }
        self.remove_one(dev, &vm, permanent).await
    }

    /// §4.6.2 `remove_one`.
    async fn remove_one(&mut self, dev: &DeviceInfo, vm_name: &str, permanent: bool) -> Result<(), OrchestratorError> {
        let vm = self.vms.get(vm_name).ok_or_else(|| OrchestratorError::UnknownVm(vm_name.to_string()))?;
        vm.link.remove_device(dev).await?;

        clear_vm_for(&self.state, dev);
        if permanent {
            self.state.set_disconnected(&dev.persistent_id());
        }
        self.emit_detached(dev, vm_name);
        Ok(())
    }

    async fn remove_group(&mut self, group: &[String], vm_name: &str, permanent: bool) -> Result<(), OrchestratorError> {
        let vm = self.vms.get(vm_name).ok_or_else(|| OrchestratorError::UnknownVm(vm_name.to_string()))?;
        vm.link.pause().await?;

        let mut result = Ok(());
        for addr in group {
            if self.state.get_vm_for_pci(addr).as_deref() != Some(vm_name) {
                continue;
            }
            let Some(member) = self.devices.get(&format!("pci-{addr}")).cloned() else { continue };
            if let Err(e) = self.remove_one(&member, vm_name, permanent).await {
                result = Err(e);
            }
        }

        if let Some(vm) = self.vms.get(vm_name) {
            if let Err(e) = vm.link.resume().await {
                tracing::warn!(error = %e, "failed to resume VM after a paused group remove");
            }
        }
        result
    }

    // --- Kernel-device-driven entry points -------------------------------------

    /// Startup reconciliation (`--attach-connected`): evdev, then USB, then PCI.
    pub async fn reconcile_startup(&mut self, mut devices: Vec<DeviceInfo>) {
        devices.sort_by_key(order_key);
        for dev in devices {
            self.register(dev.clone());
            if let Err(e) = self.attach(dev, false).await {
                tracing::debug!(error = %e, "startup attach skipped");
            }
        }
    }

    /// A device just appeared on the bus.
    pub async fn on_device_added(&mut self, dev: DeviceInfo) {
        self.register(dev.clone());
        match self.attach(dev.clone(), true).await {
            Ok(()) => {}
            Err(OrchestratorError::AwaitingSelection) => {}
            Err(e) => {
                tracing::debug!(error = %e, device = %dev.friendly_name(), "device present but not attached");
                self.emit_connected(&dev);
            }
        }
    }

    /// A device just disappeared from the bus, identified by its `runtime_id`.
    pub async fn on_device_removed(&mut self, runtime_id: &str) {
        let Some(dev) = self.devices.remove(runtime_id) else { return };
        match get_vm_for(&self.state, &dev) {
            Some(vm) => {
                if let Err(e) = self.remove_one(&dev, &vm, false).await {
                    tracing::warn!(error = %e, "failed to detach device on unplug");
                }
            }
            None => self.emit_disconnected(&dev),
        }
    }

    /// A `power_supply` `change` event: taken only as a resume hint (§4.6.4).
    pub fn on_power_supply_change(&self) {
        tracing::info!("observed a power_supply change event, possible host resume");
    }

    /// A VM's control socket was just (re)created: reattach everything that rule-routes
    /// to it, then detach any PCI device present but user-disconnected (§4.6.3).
    ///
    /// A restarted VM has forgotten every hotplugged device, so the runtime device→VM
    /// map for this VM is stale and must be cleared first — otherwise `attach_one`
    /// sees the old mapping, treats the device as already attached, and no-ops
    /// instead of re-issuing the add against the fresh VM instance.
    pub async fn reconcile_vm_restart(&mut self, vm_name: &str) {
        self.clear_runtime_map_for_vm(vm_name);

        let mut candidates: Vec<DeviceInfo> = self.devices.values().cloned().collect();
        candidates.sort_by_key(order_key);
        for dev in candidates {
            let Some(info) = self.vm_for_device(&dev) else { continue };
            if self.resolve_vm(&info, &dev, false).as_deref() != Some(vm_name) {
                continue;
            }
            if let Err(e) = self.attach(dev, false).await {
                tracing::debug!(error = %e, vm = vm_name, "restart reattach skipped");
            }
        }
        self.detach_disconnected_pci(vm_name).await;
    }

    /// Drops the device→VM map entries that point at `vm_name`, skipping any device
    /// marked user-disconnected (those are left for `detach_disconnected_pci` below).
    fn clear_runtime_map_for_vm(&mut self, vm_name: &str) {
        let stale: Vec<DeviceInfo> = self
            .devices
            .values()
            .filter(|dev| {
                get_vm_for(&self.state, dev).as_deref() == Some(vm_name) && !self.state.is_disconnected(&dev.persistent_id())
            })
            .cloned()
            .collect();
        for dev in stale {
            clear_vm_for(&self.state, &dev);
        }
    }

    async fn detach_disconnected_pci(&mut self, vm_name: &str) {
        let pci_map = self.state.list_pci_devices();
        for (addr, vm) in pci_map {
            if vm != vm_name {
                continue;
            }
            let pid = format!("pci-{addr}");
            if !self.state.is_disconnected(&pid) {
                continue;
            }
            let Some(dev) = self.devices.get(&pid).cloned() else { continue };
            let _ = self.remove_one(&dev, &vm, false).await;
        }
    }

    // --- API-driven entry points -------------------------------------------------

    fn find_usb(&self, selector: &UsbSelector) -> Option<DeviceInfo> {
        self.devices
            .values()
            .find(|d| match (d, selector) {
                (DeviceInfo::Usb(u), UsbSelector::DeviceNode(node)) => u.device_node.as_deref() == Some(node.as_str()),
                (DeviceInfo::Usb(u), UsbSelector::BusPort { bus, port }) => {
                    u.busnum == *bus && u.ports.first() == Some(port)
                }
                (DeviceInfo::Usb(u), UsbSelector::VidPid { vid, pid }) => u.vid == *vid && u.pid == *pid,
                _ => false,
            })
            .cloned()
    }

    fn find_pci(&self, selector: &PciSelector) -> Option<DeviceInfo> {
        self.devices
            .values()
            .find(|d| match (d, selector) {
                (DeviceInfo::Pci(p), PciSelector::Address(address)) => &p.address == address,
                (DeviceInfo::Pci(p), PciSelector::VidDid { vid, did }) => p.vendor_id == *vid && p.device_id == *did,
                _ => false,
            })
            .cloned()
    }

    fn list_entries(&self, matches: impl Fn(&DeviceInfo) -> bool, disconnected_only: bool) -> Vec<DeviceListEntry> {
        self.devices
            .values()
            .filter(|d| matches(d))
            .filter_map(|d| {
                let persistent_id = d.persistent_id();
                let disconnected = self.state.is_disconnected(&persistent_id);
                if disconnected_only && !disconnected {
                    return None;
                }
                let info = self.vm_for_device(d);
                let modaliases = match d {
                    DeviceInfo::Usb(usb) => usb.modaliases(),
                    _ => Vec::new(),
                };
                Some(DeviceListEntry {
                    device: d.clone(),
                    vm: get_vm_for(&self.state, d),
                    allowed_vms: info.and_then(|i| i.allowed_vms),
                    disconnected,
                    modaliases,
                })
            })
            .collect()
    }

    pub fn usb_list(&self, disconnected_only: bool) -> Vec<DeviceListEntry> {
        self.list_entries(|d| matches!(d, DeviceInfo::Usb(_)), disconnected_only)
    }

    pub fn pci_list(&self, disconnected_only: bool) -> Vec<DeviceListEntry> {
        self.list_entries(|d| matches!(d, DeviceInfo::Pci(_)), disconnected_only)
    }

    pub fn disconnected_list(&self) -> Vec<String> {
        self.state.list_disconnected()
    }

    /// Explicit user-driven attach. Bypasses the automatic policy/disconnect gate
    /// (§7: "API attach requests override this; they clear the flag on success"),
    /// and persists the user's VM choice so a future replug routes the same way (S3).
    pub async fn usb_attach_explicit(&mut self, selector: UsbSelector, vm: String) -> Result<(), OrchestratorError> {
        let dev = self.find_usb(&selector).ok_or(OrchestratorError::DeviceNotFound)?;
        if !self.vms.contains_key(&vm) {
            return Err(OrchestratorError::UnknownVm(vm));
        }
        self.attach_one(&dev, &vm).await?;
        self.state.clear_disconnected(&dev.persistent_id());
        self.state.select_vm_for_device(&dev.persistent_id(), &vm);
        Ok(())
    }

    pub async fn usb_detach_explicit(&mut self, selector: UsbSelector) -> Result<(), OrchestratorError> {
        let dev = self.find_usb(&selector).ok_or(OrchestratorError::DeviceNotFound)?;
        self.remove(&dev, true).await
    }

    pub async fn pci_attach_explicit(&mut self, selector: PciSelector, vm: String) -> Result<(), OrchestratorError> {
        let dev = self.find_pci(&selector).ok_or(OrchestratorError::DeviceNotFound)?;
        if !self.vms.contains_key(&vm) {
            return Err(OrchestratorError::UnknownVm(vm));
        }
        self.attach_one(&dev, &vm).await?;
        self.state.clear_disconnected(&dev.persistent_id());
        self.state.select_vm_for_device(&dev.persistent_id(), &vm);
        Ok(())
    }

    pub async fn pci_detach_explicit(&mut self, selector: PciSelector) -> Result<(), OrchestratorError> {
        let dev = self.find_pci(&selector).ok_or(OrchestratorError::DeviceNotFound)?;
        self.remove(&dev, true).await
    }

    async fn suspend_kind(&mut self, vm_scope: Option<&str>, is_usb: bool) -> Result<(), OrchestratorError> {
        let runtime = if is_usb { self.state.list_usb_devices() } else { self.state.list_pci_devices() };
        for (key, vm) in runtime {
            if let Some(scope) = vm_scope {
                if vm != scope {
                    continue;
                }
            }
            let Some(dev) = self.devices.values().find(|d| match d {
                DeviceInfo::Usb(u) if is_usb => u.device_node.as_deref() == Some(key.as_str()),
                DeviceInfo::Pci(p) if !is_usb => p.address == key,
                _ => false,
            }).cloned() else { continue };
            if let Some(info) = self.vm_for_device(&dev) {
                if info.skip_on_suspend {
                    continue;
                }
            }
            let _ = self.remove_one(&dev, &vm, false).await;
        }
        Ok(())
    }

    async fn resume_kind(&mut self, vm_scope: Option<&str>, is_usb: bool) -> Result<(), OrchestratorError> {
        let candidates: Vec<DeviceInfo> = self
            .devices
            .values()
            .filter(|d| match d {
                DeviceInfo::Usb(_) => is_usb,
                DeviceInfo::Pci(_) => !is_usb,
                DeviceInfo::Evdev(_) => false,
            })
            .cloned()
            .collect();
        for dev in candidates {
            let Some(info) = self.vm_for_device(&dev) else { continue };
            if let Some(scope) = vm_scope {
                if self.resolve_vm(&info, &dev, false).as_deref() != Some(scope) {
                    continue;
                }
            }
            let _ = self.attach(dev, false).await;
        }
        Ok(())
    }

    pub async fn usb_suspend(&mut self, vm: Option<String>) -> Result<(), OrchestratorError> {
        self.suspend_kind(vm.as_deref(), true).await
    }

    pub async fn usb_resume(&mut self, vm: Option<String>) -> Result<(), OrchestratorError> {
        self.resume_kind(vm.as_deref(), true).await
    }

    pub async fn pci_suspend(&mut self, vm: Option<String>) -> Result<(), OrchestratorError> {
        self.suspend_kind(vm.as_deref(), false).await
    }

    pub async fn pci_resume(&mut self, vm: Option<String>) -> Result<(), OrchestratorError> {
        self.resume_kind(vm.as_deref(), false).await
    }
}
