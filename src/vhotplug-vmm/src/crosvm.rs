// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Child-process driver of the `crosvm` binary's `usb attach|detach|list` subcommands.

use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CrosvmError;

const RETRY_COUNT: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrosvmUsbDevice {
    pub index: u32,
    pub vid: u16,
    pub pid: u16,
}

/// A crosvm instance's control socket, driven through the `crosvm` CLI. crosvm has no
/// wire protocol to speak directly; every operation is a subprocess invocation, so
/// unlike the QEMU link the mutex here only protects against overlapping `usb attach`
/// retries racing each other, not a shared connection.
#[derive(Debug)]
pub struct CrosvmLink {
    crosvm_bin: PathBuf,
    socket: PathBuf,
    lock: Mutex<()>,
}

impl CrosvmLink {
    pub fn new(crosvm_bin: impl Into<PathBuf>, socket: impl Into<PathBuf>) -> Self {
        CrosvmLink { crosvm_bin: crosvm_bin.into(), socket: socket.into(), lock: Mutex::new(()) }
    }

    pub fn is_socket_alive(&self) -> bool {
        StdUnixStream::connect(&self.socket).is_ok()
    }

    /// Polls the control socket until it accepts a connection, up to `boot_timeout`.
    pub async fn wait_ready(&self, boot_timeout: Duration) -> Result<(), CrosvmError> {
        let deadline = tokio::time::Instant::now() + boot_timeout;
        loop {
            if self.is_socket_alive() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CrosvmError::BootTimeout);
            }
            tokio::time::sleep(BOOT_POLL_INTERVAL).await;
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, CrosvmError> {
        let output = Command::new(&self.crosvm_bin)
            .args(args)
            .output()
            .await
            .map_err(|e| CrosvmError::Spawn(self.crosvm_bin.display().to_string(), e))?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn usb_list(&self) -> Result<Vec<CrosvmUsbDevice>, CrosvmError> {
        let socket = self.socket.display().to_string();
        let stdout = self.run(&["usb", "list", &socket]).await?;
        Ok(parse_usb_list(&stdout))
    }

    /// Attaches a USB device by device node. No-ops if the vid:pid already appears in
    /// crosvm's attached list. On `no_available_port`, detaches every currently
    /// attached device first (documented workaround against a latched I/O-error
    /// state) before retrying, up to 5 times.
    pub async fn add_usb_device(&self, device_node: &str, vid: u16, pid: u16) -> Result<(), CrosvmError> {
        let _guard = self.lock.lock().await;
        if self.usb_list().await?.iter().any(|d| d.vid == vid && d.pid == pid) {
            debug!(vid, pid, "device already attached to crosvm");
            return Ok(());
        }

        let socket = self.socket.display().to_string();
        let mut last_error = String::new();
        for attempt in 0..RETRY_COUNT {
            let stdout = self
                .run(&["usb", "attach", "00:00:00:00", device_node, &socket])
                .await?;
            let mut tokens = stdout.split_whitespace();
            match tokens.next() {
                Some("ok") => return Ok(()),
                Some("no_available_port") => {
                    warn!("crosvm reported no_available_port, detaching all devices as a workaround");
                    for device in self.usb_list().await? {
                        let _ = self.run(&["usb", "detach", &device.index.to_string(), &socket]).await;
                    }
                    last_error = "no_available_port".to_string();
                }
                other => last_error = other.unwrap_or("empty response").to_string(),
            }
            if attempt + 1 < RETRY_COUNT {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
        Err(CrosvmError::CommandFailed("attach", last_error))
    }

    pub async fn remove_usb_device(&self, vid: u16, pid: u16) -> Result<(), CrosvmError> {
        let _guard = self.lock.lock().await;
        let socket = self.socket.display().to_string();
        let device = self
            .usb_list()
            .await?
            .into_iter()
            .find(|d| d.vid == vid && d.pid == pid)
            .ok_or_else(|| CrosvmError::DeviceNotAttached(format!("{vid:04x}:{pid:04x}")))?;
        self.run(&["usb", "detach", &device.index.to_string(), &socket]).await?;
        Ok(())
    }
}

/// Parses `devices\n<index> <vid> <pid>\n...` into a device list.
fn parse_usb_list(stdout: &str) -> Vec<CrosvmUsbDevice> {
    let mut lines = stdout.lines();
    match lines.next() {
        Some(first) if first.trim() == "devices" => {}
        _ => return Vec::new(),
    }
    lines
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let index = parts.next()?.parse().ok()?;
            let vid = u16::from_str_radix(parts.next()?.trim_start_matches("0x"), 16).ok()?;
            let pid = u16::from_str_radix(parts.next()?.trim_start_matches("0x"), 16).ok()?;
            Some(CrosvmUsbDevice { index, vid, pid })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_usb_list_output() {
        let out = "devices\n0 046d c52b\n1 04f2 b751\n";
        let devices = parse_usb_list(out);
        assert_eq!(
            devices,
            vec![
                CrosvmUsbDevice { index: 0, vid: 0x046d, pid: 0xc52b },
                CrosvmUsbDevice { index: 1, vid: 0x04f2, pid: 0xb751 },
            ]
        );
    }

    #[test]
    fn empty_list_has_no_devices_line_mismatch() {
        assert!(parse_usb_list("unexpected\n").is_empty());
    }
}
