// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

//! Rule-matching policy engine: loads USB/PCI/evdev rule documents and answers
//! `vm_for_device` with the first enabled, scoped, matching rule.

pub mod engine;
pub mod matcher;
pub mod rule;

pub use engine::PolicyEngine;
pub use matcher::{EvdevMatcher, Matches, PciMatcher, UsbMatcher};
pub use rule::{PassthroughInfo, Rule};

/// The three policy engines a fully loaded configuration produces, one per device kind.
#[derive(Debug, Clone)]
pub struct Policy {
    pub usb: PolicyEngine<UsbMatcher>,
    pub pci: PolicyEngine<PciMatcher>,
    pub evdev: PolicyEngine<EvdevMatcher>,
}
