// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use vhotplug_device::{PciInfo, UsbInfo};

/// State changes fanned out to every subscribed API client. One notification per
/// state change; failed attaches/detaches emit none beyond the request's own
/// response (§7).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    UsbAttached { vm: String, device: UsbInfo },
    UsbDetached { vm: String, device: UsbInfo },
    UsbConnected { device: UsbInfo },
    UsbDisconnected { device: UsbInfo },
    UsbSelectVm { device: UsbInfo, candidates: Vec<String> },
    PciAttached { vm: String, device: PciInfo },
    PciDetached { vm: String, device: PciInfo },
    PciConnected { device: PciInfo },
    PciDisconnected { device: PciInfo },
}
