// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Wires a loaded [`Config`] into an [`Orchestrator`] plus its [`OrchestratorHandle`].

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::{broadcast, mpsc};
use vhotplug_config::{Config, VmConfig, VmType};
use vhotplug_orchestrator::{Orchestrator, OrchestratorCommand, OrchestratorHandle, VmEntry};
use vhotplug_policy::{Policy, PolicyEngine};
use vhotplug_state::StateStore;
use vhotplug_udev::LiveBootDeviceProbe;
use vhotplug_vmm::{CrosvmLink, QemuLink, VmmLink};

/// Notification fan-out capacity: generous enough that a burst of device events
/// never blocks the orchestrator loop waiting on a slow subscriber.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;
/// Command queue depth: bounded so a runaway API client applies backpressure
/// rather than growing memory without limit.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

pub struct Bootstrap {
    pub orchestrator: Orchestrator,
    pub handle: OrchestratorHandle,
    pub commands: mpsc::Receiver<OrchestratorCommand>,
}

fn vm_link(config: &Config, vm: &VmConfig) -> VmmLink {
    match vm.vm_type {
        VmType::Qemu => VmmLink::Qemu(QemuLink::new(vm.socket.clone())),
        VmType::Crosvm => {
            // `Config::validate` already rejected a crosvm-type VM with no binary
            // configured, so this is always populated here.
            let crosvm_bin = config.general.crosvm.clone().expect("validated at config load");
            VmmLink::Crosvm(CrosvmLink::new(crosvm_bin, vm.socket.clone()))
        }
    }
}

pub fn build(config: &Config) -> Bootstrap {
    let policy = Policy {
        usb: PolicyEngine::new(config.usb_passthrough.clone()),
        pci: PolicyEngine::new(config.pci_passthrough.clone()),
        evdev: PolicyEngine::new(config.evdev_passthrough.clone()),
    };

    let state_path = config.general.persistency.then(|| PathBuf::from(config.general.state_path.clone()));
    let state = StateStore::load(config.general.persistency, state_path);

    let vms: HashMap<String, VmEntry> = config
        .vms
        .iter()
        .map(|vm| (vm.name.clone(), VmEntry::new(vm.name.clone(), vm_link(config, vm))))
        .collect();

    let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
    let (commands_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

    let handle = OrchestratorHandle::new(commands_tx, notifications.clone());
    let orchestrator = Orchestrator::new(policy, state, vms, Box::new(LiveBootDeviceProbe), notifications);

    Bootstrap { orchestrator, handle, commands }
}
