// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use vhotplug_orchestrator::DeviceListEntry;

/// One line of server output answering a request: `{result: "ok"|"failed", ...}`.
#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Ok(OkPayload),
    Failed { error: String },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(OkPayload::default())
    }

    pub fn failed(error: impl std::fmt::Display) -> Self {
        Response::Failed { error: error.to_string() }
    }
}

/// The success payload, one field populated per action (§4.7); the rest stay `None`
/// and are omitted from the wire representation.
#[derive(Debug, Default, Serialize)]
pub struct OkPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usb_devices: Option<Vec<DeviceListEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pci_devices: Option<Vec<DeviceListEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnected_devices: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_ok_has_no_payload_fields() {
        let json = serde_json::to_string(&Response::ok()).unwrap();
        assert_eq!(json, r#"{"result":"ok"}"#);
    }

    #[test]
    fn failed_carries_error_message() {
        let json = serde_json::to_string(&Response::failed("no VM named `vm9`")).unwrap();
        assert_eq!(json, r#"{"result":"failed","error":"no VM named `vm9`"}"#);
    }

    #[test]
    fn disconnected_list_omits_unrelated_fields() {
        let response = Response::Ok(OkPayload {
            disconnected_devices: Some(vec!["usb-046d:c52b:".to_string()]),
            ..Default::default()
        });
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"result":"ok","disconnected_devices":["usb-046d:c52b:"]}"#);
    }
}
