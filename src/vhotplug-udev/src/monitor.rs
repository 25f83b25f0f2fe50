// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use std::os::fd::AsRawFd;

use tokio::io::unix::AsyncFd;
use udev::{EventType, MonitorBuilder, MonitorSocket};

use crate::error::UdevError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdevEventKind {
    Add,
    Remove,
    Change,
    Other,
}

impl From<EventType> for UdevEventKind {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Add => UdevEventKind::Add,
            EventType::Remove => UdevEventKind::Remove,
            EventType::Change => UdevEventKind::Change,
            _ => UdevEventKind::Other,
        }
    }
}

pub struct UdevEvent {
    pub kind: UdevEventKind,
    pub device: udev::Device,
}

/// Wraps a netlink `MonitorSocket` so the orchestrator's event loop can `.await` the
/// next device event instead of dedicating an OS thread to blocking polls.
pub struct UdevMonitor {
    fd: AsyncFd<MonitorSocket>,
}

impl UdevMonitor {
    pub fn new() -> Result<Self, UdevError> {
        let socket = MonitorBuilder::new()
            .map_err(UdevError::Monitor)?
            .listen()
            .map_err(UdevError::Monitor)?;
        let fd = AsyncFd::new(socket).map_err(UdevError::AsyncFd)?;
        Ok(UdevMonitor { fd })
    }

    pub async fn next_event(&mut self) -> Result<Option<UdevEvent>, UdevError> {
        loop {
            let mut guard = self.fd.readable_mut().await.map_err(UdevError::AsyncFd)?;
            let socket = guard.get_inner_mut();
            let event = socket.iter().next();
            match event {
                Some(event) => {
                    let kind = event.event_type().into();
                    return Ok(Some(UdevEvent { kind, device: event.device() }));
                }
                None => {
                    guard.clear_ready();
                    continue;
                }
            }
        }
    }
}

impl AsRawFd for UdevMonitor {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}
