// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! A thin QEMU Machine Protocol (QMP) client: JSON lines over a UNIX control socket.
//!
//! No `qapi`-style crate was available to build on, and the wire syntax itself is out
//! of scope (only the operations used matter), so this implements just enough of the
//! handshake and request/response framing to drive `device_add`/`device_del`/queries.

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::QmpError;

const COMMAND_RETRY_COUNT: u32 = 5;
const COMMAND_RETRY_DELAY: Duration = Duration::from_secs(1);
const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A QEMU instance's control socket. One async mutex serialises every command issued
/// against it; QMP has no request multiplexing.
#[derive(Debug)]
pub struct QemuLink {
    socket: PathBuf,
    lock: Mutex<()>,
    port_occupied: Regex,
}

impl QemuLink {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        QemuLink {
            socket: socket.into(),
            lock: Mutex::new(()),
            port_occupied: Regex::new(r"PCI: slot \d+ function \d+ already occupied by")
                .expect("static regex is valid"),
        }
    }

    async fn connect(&self) -> Result<BufReader<UnixStream>, QmpError> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|e| QmpError::Connect(self.socket.display().to_string(), e))?;
        let mut reader = BufReader::new(stream);
        // Greeting.
        let mut line = String::new();
        reader.read_line(&mut line).await.map_err(QmpError::Io)?;
        // Capability negotiation.
        Self::send(&mut reader, &json!({"execute": "qmp_capabilities"})).await?;
        Self::recv(&mut reader).await?;
        Ok(reader)
    }

    async fn send(reader: &mut BufReader<UnixStream>, cmd: &Value) -> Result<(), QmpError> {
        let mut line = serde_json::to_string(cmd).map_err(QmpError::MalformedResponse)?;
        line.push('\n');
        reader.get_mut().write_all(line.as_bytes()).await.map_err(QmpError::Io)
    }

    async fn recv(reader: &mut BufReader<UnixStream>) -> Result<Value, QmpError> {
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.map_err(QmpError::Io)?;
            let value: Value = serde_json::from_str(&line).map_err(QmpError::MalformedResponse)?;
            // Skip asynchronous events; we only care about command replies.
            if value.get("event").is_some() {
                continue;
            }
            return Ok(value);
        }
    }

    /// Connects, executes one command, disconnects. Retries up to 5 times with a 1 s
    /// delay on QMP error replies, except "port already occupied" errors which the
    /// caller handles itself by trying the next candidate bridge.
    async fn execute(&self, command: &str, args: Option<Value>) -> Result<Value, QmpError> {
        let _guard = self.lock.lock().await;
        let mut last_error = String::new();
        for attempt in 0..COMMAND_RETRY_COUNT {
            let result = self.execute_once(command, args.clone()).await;
            match result {
                Ok(value) => return Ok(value),
                Err(QmpError::CommandFailed(_, _, msg)) if self.port_occupied.is_match(&msg) => {
                    return Err(QmpError::CommandFailed(command.to_string(), attempt + 1, msg));
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 < COMMAND_RETRY_COUNT {
                        tokio::time::sleep(COMMAND_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(QmpError::CommandFailed(command.to_string(), COMMAND_RETRY_COUNT, last_error))
    }

    /// Non-retrying variant, used by queries.
    async fn execute_simple(&self, command: &str, args: Option<Value>) -> Result<Value, QmpError> {
        let _guard = self.lock.lock().await;
        self.execute_once(command, args).await
    }

    async fn execute_once(&self, command: &str, args: Option<Value>) -> Result<Value, QmpError> {
        let mut reader = self.connect().await?;
        let mut request = json!({"execute": command});
        if let Some(args) = args {
            request["arguments"] = args;
        }
        Self::send(&mut reader, &request).await?;
        let response = Self::recv(&mut reader).await?;
        if let Some(error) = response.get("error") {
            let desc = error
                .get("desc")
                .and_then(Value::as_str)
                .unwrap_or("unknown QMP error")
                .to_string();
            return Err(QmpError::CommandFailed(command.to_string(), 1, desc));
        }
        Ok(response.get("return").cloned().unwrap_or(Value::Null))
    }

    pub async fn query_status(&self) -> Result<String, QmpError> {
        let result = self.execute_simple("query-status", None).await?;
        Ok(result.get("status").and_then(Value::as_str).unwrap_or("unknown").to_string())
    }

    /// Polls `query-status` at 1 s cadence until the VM reports `running`, up to
    /// `boot_timeout`.
    pub async fn wait_ready(&self, boot_timeout: Duration) -> Result<(), QmpError> {
        let deadline = tokio::time::Instant::now() + boot_timeout;
        loop {
            match self.query_status().await {
                Ok(status) if status == "running" => return Ok(()),
                Ok(status) => debug!(status, socket = %self.socket.display(), "VM not yet running"),
                Err(e) => debug!(error = %e, "query-status failed while waiting for boot"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(QmpError::BootTimeout);
            }
            tokio::time::sleep(BOOT_POLL_INTERVAL).await;
        }
    }

    pub async fn query_pci(&self) -> Result<Value, QmpError> {
        self.execute_simple("query-pci", None).await
    }

    /// Recursively walks `query-pci`'s bus/device/pci_bridge tree for the `qdev_id`
    /// whose vendor+device numeric ids match.
    pub async fn find_pci_device(&self, vendor_id: u32, device_id: u32) -> Result<Option<String>, QmpError> {
        let buses = self.query_pci().await?;
        Ok(find_device_in_buses(&buses, vendor_id, device_id))
    }

    /// Returns the `qdev_id` of every PCI bridge with no attached devices.
    pub async fn find_empty_pci_bridges(&self) -> Result<Vec<String>, QmpError> {
        let buses = self.query_pci().await?;
        let mut bridges = Vec::new();
        collect_empty_bridges(&buses, &mut bridges);
        Ok(bridges)
    }

    /// Scans `info usb` for `ID: <id>` lines to detect an already-attached device.
    pub async fn usb_ids(&self) -> Result<Vec<String>, QmpError> {
        let result = self
            .execute_simple(
                "human-monitor-command",
                Some(json!({"command-line": "info usb"})),
            )
            .await?;
        let text = result.as_str().unwrap_or("");
        let re = Regex::new(r",\s*ID:\s*(\w+)").expect("static regex is valid");
        Ok(re.captures_iter(text).map(|c| c[1].to_string()).collect())
    }

    pub async fn add_usb_host_device(&self, hostbus: u32, hostaddr: u32, id: &str) -> Result<(), QmpError> {
        self.device_add(json!({
            "driver": "usb-host",
            "hostbus": hostbus,
            "hostaddr": hostaddr,
            "id": id,
        }))
        .await
    }

    pub async fn add_usb_host_device_by_vid_pid(&self, vendorid: u16, productid: u16, id: &str) -> Result<(), QmpError> {
        self.device_add(json!({
            "driver": "usb-host",
            "vendorid": vendorid,
            "productid": productid,
            "id": id,
        }))
        .await
    }

    pub async fn add_evdev_device(&self, evdev: &str, id: &str) -> Result<(), QmpError> {
        self.device_add(json!({
            "driver": "virtio-input-host-pci",
            "evdev": evdev,
            "id": id,
        }))
        .await
    }

    /// Tries each empty PCI bridge in turn until `device_add` for `vfio-pci` succeeds.
    pub async fn add_vfio_device(&self, host_addr: &str, id: &str) -> Result<(), QmpError> {
        let bridges = self.find_empty_pci_bridges().await?;
        if bridges.is_empty() {
            return Err(QmpError::NoPciPortAvailable);
        }
        let mut last_error = None;
        for bus in bridges {
            let result = self
                .device_add(json!({"driver": "vfio-pci", "host": host_addr, "id": id, "bus": bus}))
                .await;
            match result {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or(QmpError::NoPciPortAvailable))
    }

    async fn device_add(&self, args: Value) -> Result<(), QmpError> {
        self.execute("device_add", Some(args)).await?;
        Ok(())
    }

    /// Removes a guest device by its `qdev_id`. `Device '<id>' not found` is treated
    /// by callers as an already-gone device, not a failure (see `is_already_gone`).
    pub async fn device_del(&self, id: &str) -> Result<(), QmpError> {
        match self.execute("device_del", Some(json!({"id": id}))).await {
            Ok(_) => Ok(()),
            Err(QmpError::CommandFailed(_, attempts, msg)) if msg.contains("not found") => {
                info!(id, "device already removed from guest");
                let _ = attempts;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn pause(&self) -> Result<(), QmpError> {
        self.execute("stop", None).await?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), QmpError> {
        self.execute("cont", None).await?;
        Ok(())
    }
}

fn find_device_in_buses(buses: &Value, vendor_id: u32, device_id: u32) -> Option<String> {
    let buses = buses.as_array()?;
    for bus in buses {
        let devices = bus.get("devices")?.as_array()?;
        if let Some(id) = find_device_in_devices(devices, vendor_id, device_id) {
            return Some(id);
        }
    }
    None
}

fn find_device_in_devices(devices: &[Value], vendor_id: u32, device_id: u32) -> Option<String> {
    for device in devices {
        let vendor = device.get("id").and_then(|i| i.get("vendor")).and_then(Value::as_u64);
        let ident = device.get("id").and_then(|i| i.get("device")).and_then(Value::as_u64);
        if vendor == Some(u64::from(vendor_id)) && ident == Some(u64::from(device_id)) {
            return device.get("qdev_id").and_then(Value::as_str).map(String::from);
        }
        if let Some(nested) = device.get("pci_bridge").and_then(|b| b.get("devices")).and_then(Value::as_array) {
            if let Some(found) = find_device_in_devices(nested, vendor_id, device_id) {
                return Some(found);
            }
        }
    }
    None
}

fn collect_empty_bridges(buses: &Value, out: &mut Vec<String>) {
    let Some(buses) = buses.as_array() else { return };
    for bus in buses {
        let Some(devices) = bus.get("devices").and_then(Value::as_array) else { continue };
        collect_empty_bridges_in_devices(devices, out);
    }
}

fn collect_empty_bridges_in_devices(devices: &[Value], out: &mut Vec<String>) {
    for device in devices {
        let Some(bridge) = device.get("pci_bridge") else { continue };
        let nested = bridge.get("devices").and_then(Value::as_array);
        if nested.is_none_or_empty() {
            if let Some(qdev_id) = device.get("qdev_id").and_then(Value::as_str) {
                out.push(qdev_id.to_string());
            }
        } else if let Some(nested) = nested {
            collect_empty_bridges_in_devices(nested, out);
        }
    }
}

trait OptionArrayExt {
    fn is_none_or_empty(&self) -> bool;
}

impl OptionArrayExt for Option<&Vec<Value>> {
    fn is_none_or_empty(&self) -> bool {
        match self {
            None => true,
            Some(v) => v.is_empty(),
        }
    }
}

/// QEMU id format for a USB device: `usb<busnum><devnum>`.
pub fn usb_id(busnum: u32, devnum: u32) -> String {
    format!("usb{busnum}{devnum}")
}

/// QEMU id format for a PCI device: `pci-<sysname>`.
pub fn pci_id(sysname: &str) -> String {
    format!("pci-{sysname}")
}

/// QEMU id format for an evdev device: `evdev-<sysname>`.
pub fn evdev_id(sysname: &str) -> String {
    format!("evdev-{sysname}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qemu_ids_follow_the_naming_convention() {
        assert_eq!(usb_id(1, 5), "usb15");
        assert_eq!(pci_id("0000:01:00.0"), "pci-0000:01:00.0");
        assert_eq!(evdev_id("event3"), "evdev-event3");
    }

    #[test]
    fn finds_empty_bridge_recursively() {
        let buses = json!([
            {
                "bus": 0,
                "devices": [
                    {
                        "qdev_id": "pcie.0",
                        "pci_bridge": { "devices": [] }
                    },
                    {
                        "qdev_id": "bridge1",
                        "pci_bridge": {
                            "devices": [
                                { "qdev_id": "usb0" }
                            ]
                        }
                    }
                ]
            }
        ]);
        let mut bridges = Vec::new();
        collect_empty_bridges(&buses, &mut bridges);
        assert_eq!(bridges, vec!["pcie.0".to_string()]);
    }
}
