// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! The orchestrator: a single task owning policy, persisted/runtime state, and
//! every configured VM's control link, driven by commands from the API and events
//! from udev/the filewatcher.

mod command;
mod engine;
mod error;
mod notification;
mod vm;

pub use command::{DeviceListEntry, OrchestratorCommand, OrchestratorHandle, PciSelector, Reply, UsbSelector};
pub use engine::Orchestrator;
pub use error::OrchestratorError;
pub use notification::Notification;
pub use vm::{VmEntry, CROSVM_BOOT_TIMEOUT, QEMU_BOOT_TIMEOUT};

impl Orchestrator {
    /// Drains one `OrchestratorCommand` to completion, replying on its embedded channel.
    pub async fn handle_command(&mut self, command: OrchestratorCommand) {
        match command {
            OrchestratorCommand::UsbList { disconnected_only, reply } => {
                let _ = reply.send(Ok(self.usb_list(disconnected_only)));
            }
            OrchestratorCommand::UsbAttach { selector, vm, reply } => {
                let _ = reply.send(self.usb_attach_explicit(selector, vm).await);
            }
            OrchestratorCommand::UsbDetach { selector, reply } => {
                let _ = reply.send(self.usb_detach_explicit(selector).await);
            }
            OrchestratorCommand::UsbSuspend { vm, reply } => {
                let _ = reply.send(self.usb_suspend(vm).await);
            }
            OrchestratorCommand::UsbResume { vm, reply } => {
                let _ = reply.send(self.usb_resume(vm).await);
            }
            OrchestratorCommand::PciList { disconnected_only, reply } => {
                let _ = reply.send(Ok(self.pci_list(disconnected_only)));
            }
            OrchestratorCommand::PciAttach { selector, vm, reply } => {
                let _ = reply.send(self.pci_attach_explicit(selector, vm).await);
            }
            OrchestratorCommand::PciDetach { selector, reply } => {
                let _ = reply.send(self.pci_detach_explicit(selector).await);
            }
            OrchestratorCommand::PciSuspend { vm, reply } => {
                let _ = reply.send(self.pci_suspend(vm).await);
            }
            OrchestratorCommand::PciResume { vm, reply } => {
                let _ = reply.send(self.pci_resume(vm).await);
            }
            OrchestratorCommand::DisconnectedList { reply } => {
                let _ = reply.send(Ok(self.disconnected_list()));
            }
        }
    }
}
