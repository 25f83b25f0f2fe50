// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use vhotplug_orchestrator::{PciSelector, UsbSelector};

/// One line of client input, tagged by `action` (§4.7's request table).
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    EnableNotifications,
    UsbList {
        #[serde(default)]
        disconnected: bool,
    },
    UsbAttach {
        #[serde(flatten)]
        selector: UsbSelectorWire,
        vm: String,
    },
    UsbDetach {
        #[serde(flatten)]
        selector: UsbSelectorWire,
    },
    UsbSuspend {
        vm: Option<String>,
    },
    UsbResume {
        vm: Option<String>,
    },
    PciList {
        #[serde(default)]
        disconnected: bool,
    },
    PciAttach {
        #[serde(flatten)]
        selector: PciSelectorWire,
        vm: String,
    },
    PciDetach {
        #[serde(flatten)]
        selector: PciSelectorWire,
    },
    PciSuspend {
        vm: Option<String>,
    },
    PciResume {
        vm: Option<String>,
    },
    DisconnectedList,
}

/// The three alternative USB identifiers a request may supply; exactly one group
/// must be fully populated.
#[derive(Debug, Default, Deserialize)]
pub struct UsbSelectorWire {
    pub device_node: Option<String>,
    pub bus: Option<u32>,
    pub port: Option<u32>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl UsbSelectorWire {
    pub fn resolve(&self) -> Option<UsbSelector> {
        if let Some(node) = &self.device_node {
            return Some(UsbSelector::DeviceNode(node.clone()));
        }
        if let (Some(bus), Some(port)) = (self.bus, self.port) {
            return Some(UsbSelector::BusPort { bus, port });
        }
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            return Some(UsbSelector::VidPid { vid, pid });
        }
        None
    }
}

/// The two alternative PCI identifiers a request may supply.
#[derive(Debug, Default, Deserialize)]
pub struct PciSelectorWire {
    pub address: Option<String>,
    pub vid: Option<u32>,
    pub did: Option<u32>,
}

impl PciSelectorWire {
    pub fn resolve(&self) -> Option<PciSelector> {
        if let Some(address) = &self.address {
            return Some(PciSelector::Address(address.clone()));
        }
        if let (Some(vid), Some(did)) = (self.vid, self.did) {
            return Some(PciSelector::VidDid { vid, did });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usb_attach_parses_device_node_identifier() {
        let request: Request =
            serde_json::from_str(r#"{"action":"usb_attach","device_node":"/dev/bus/usb/001/002","vm":"vm1"}"#)
                .unwrap();
        match request {
            Request::UsbAttach { selector, vm } => {
                assert_eq!(vm, "vm1");
                assert!(matches!(selector.resolve(), Some(UsbSelector::DeviceNode(n)) if n == "/dev/bus/usb/001/002"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn usb_selector_without_any_identifier_does_not_resolve() {
        assert!(UsbSelectorWire::default().resolve().is_none());
    }

    #[test]
    fn pci_attach_parses_vid_did_identifier() {
        let request: Request =
            serde_json::from_str(r#"{"action":"pci_attach","vid":32902,"did":4660,"vm":"vm2"}"#).unwrap();
        match request {
            Request::PciAttach { selector, vm } => {
                assert_eq!(vm, "vm2");
                assert!(matches!(selector.resolve(), Some(PciSelector::VidDid { vid: 32902, did: 4660 })));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_action_fails_to_parse() {
        assert!(serde_json::from_str::<Request>(r#"{"action":"reboot_host"}"#).is_err());
    }

    #[test]
    fn enable_notifications_has_no_payload_fields() {
        let request: Request = serde_json::from_str(r#"{"action":"enable_notifications"}"#).unwrap();
        assert!(matches!(request, Request::EnableNotifications));
    }
}
