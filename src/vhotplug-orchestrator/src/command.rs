// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! The request/reply vocabulary external tasks (API handlers) use to submit work to
//! the single orchestrator task, and the subscription handle for notifications.

use tokio::sync::{broadcast, mpsc, oneshot};
use vhotplug_device::DeviceInfo;

use crate::error::OrchestratorError;
use crate::notification::Notification;

pub type Reply<T> = oneshot::Sender<Result<T, OrchestratorError>>;

/// Identifies a USB device for an `usb_attach`/`usb_detach` request, mirroring the
/// three alternative identifiers the API accepts (§4.7).
#[derive(Debug, Clone)]
pub enum UsbSelector {
    DeviceNode(String),
    BusPort { bus: u32, port: u32 },
    VidPid { vid: u16, pid: u16 },
}

/// Identifies a PCI device for a `pci_attach`/`pci_detach` request.
#[derive(Debug, Clone)]
pub enum PciSelector {
    Address(String),
    VidDid { vid: u32, did: u32 },
}

/// One entry of a `usb_list`/`pci_list` response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceListEntry {
    #[serde(flatten)]
    pub device: DeviceInfo,
    pub vm: Option<String>,
    pub allowed_vms: Option<Vec<String>>,
    pub disconnected: bool,
    /// Read-only diagnostic data; empty for non-USB entries. Never consulted by
    /// policy matching.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modaliases: Vec<String>,
}

/// Work submitted from API handler tasks to the single orchestrator task.
pub enum OrchestratorCommand {
    UsbList { disconnected_only: bool, reply: Reply<Vec<DeviceListEntry>> },
    UsbAttach { selector: UsbSelector, vm: String, reply: Reply<()> },
    UsbDetach { selector: UsbSelector, reply: Reply<()> },
    UsbSuspend { vm: Option<String>, reply: Reply<()> },
    UsbResume { vm: Option<String>, reply: Reply<()> },
    PciList { disconnected_only: bool, reply: Reply<Vec<DeviceListEntry>> },
    PciAttach { selector: PciSelector, vm: String, reply: Reply<()> },
    PciDetach { selector: PciSelector, reply: Reply<()> },
    PciSuspend { vm: Option<String>, reply: Reply<()> },
    PciResume { vm: Option<String>, reply: Reply<()> },
    DisconnectedList { reply: Reply<Vec<String>> },
}

/// Cloneable front door onto the orchestrator: submit a command and await its
/// reply, or subscribe to the notification fan-out. Held by every API connection
/// handler task.
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<OrchestratorCommand>,
    notifications: broadcast::Sender<Notification>,
}

impl OrchestratorHandle {
    pub fn new(commands: mpsc::Sender<OrchestratorCommand>, notifications: broadcast::Sender<Notification>) -> Self {
        OrchestratorHandle { commands, notifications }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Submits `command` and awaits its reply. Closing the client connection before
    /// this resolves does not cancel the in-flight orchestrator command (§5).
    pub async fn submit<T>(&self, build: impl FnOnce(Reply<T>) -> OrchestratorCommand) -> Result<T, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(build(tx)).await.is_err() {
            return Err(OrchestratorError::Shutdown);
        }
        rx.await.unwrap_or(Err(OrchestratorError::Shutdown))
    }
}
