// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Typed deserialisation and validation of the daemon's JSON configuration document.

pub mod error;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use vhotplug_policy::{EvdevMatcher, PciMatcher, Rule, UsbMatcher};

pub use error::ConfigError;

fn default_true() -> bool {
    true
}

fn default_state_path() -> String {
    "/var/lib/vhotplug/vhotplug.state".to_string()
}

/// `general.api` — which transports the API server binds, and their addressing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default)]
    pub transports: Vec<Transport>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub unix_socket: Option<String>,
    #[serde(default)]
    pub allowed_cids: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Unix,
    Tcp,
    Vsock,
}

/// `general` — daemon-wide settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralConfig {
    pub api: ApiConfig,
    #[serde(default = "default_true")]
    pub persistency: bool,
    #[serde(default = "default_state_path")]
    pub state_path: String,
    pub crosvm: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmType {
    Qemu,
    Crosvm,
}

/// One entry of the `vms` array.
#[derive(Debug, Clone, Deserialize)]
pub struct VmConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub vm_type: VmType,
    pub socket: String,
}

/// The root configuration document (§6 of the design).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub general: GeneralConfig,
    pub vms: Vec<VmConfig>,
    #[serde(default)]
    pub usb_passthrough: Vec<Rule<UsbMatcher>>,
    #[serde(default)]
    pub pci_passthrough: Vec<Rule<PciMatcher>>,
    #[serde(default)]
    pub evdev_passthrough: Vec<Rule<EvdevMatcher>>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let config: Config = serde_json::from_str(&raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for vm in &self.vms {
            if !seen.insert(vm.name.as_str()) {
                return Err(ConfigError::DuplicateVm(vm.name.clone()));
            }
        }
        if self.general.api.transports.is_empty() {
            return Err(ConfigError::NoApiTransports);
        }
        if self.general.api.transports.contains(&Transport::Tcp)
            && (self.general.api.host.is_none() || self.general.api.port.is_none())
        {
            return Err(ConfigError::MissingTcpAddress);
        }
        if self.general.api.transports.contains(&Transport::Unix)
            && self.general.api.unix_socket.is_none()
        {
            return Err(ConfigError::MissingUnixSocketPath);
        }
        if self.general.api.transports.contains(&Transport::Vsock) {
            if self.general.api.allowed_cids.is_empty() {
                return Err(ConfigError::MissingAllowedCids);
            }
            if self.general.api.port.is_none() {
                return Err(ConfigError::MissingVsockPort);
            }
        }
        for vm in &self.vms {
            if vm.vm_type == VmType::Crosvm && self.general.crosvm.is_none() {
                return Err(ConfigError::MissingCrosvmBinary(vm.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_json() -> &'static str {
        r#"{
            "general": {
                "api": { "transports": ["unix"], "unixSocket": "/run/vhotplug.sock" },
                "crosvm": "/usr/bin/crosvm"
            },
            "vms": [
                { "name": "vm1", "type": "qemu", "socket": "/run/vm1.qmp" }
            ],
            "usbPassthrough": [
                { "targetVm": "vm1", "allow": [{ "interfaceClass": 3 }] }
            ]
        }"#
    }

    #[test]
    fn loads_and_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", sample_json()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert!(config.general.persistency);
        assert_eq!(config.general.state_path, "/var/lib/vhotplug/vhotplug.state");
        assert_eq!(config.usb_passthrough.len(), 1);
    }

    #[test]
    fn rejects_duplicate_vm_names() {
        let json = r#"{
            "general": { "api": { "transports": ["unix"], "unixSocket": "/x" } },
            "vms": [
                { "name": "vm1", "type": "qemu", "socket": "/a" },
                { "name": "vm1", "type": "crosvm", "socket": "/b" }
            ]
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{json}").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::DuplicateVm(_))
        ));
    }

    #[test]
    fn rejects_tcp_transport_without_address() {
        let json = r#"{
            "general": { "api": { "transports": ["tcp"] } },
            "vms": []
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{json}").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::MissingTcpAddress)
        ));
    }
}
