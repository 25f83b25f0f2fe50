// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;

use crate::matcher::Matches;

/// One rule document, generic over its matcher kind (`UsbMatcher`, `PciMatcher`,
/// `EvdevMatcher`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule<M> {
    pub description: Option<String>,
    #[serde(default)]
    pub disable: Option<bool>,
    #[serde(default)]
    pub enable: Option<bool>,
    pub target_vm: Option<String>,
    pub allowed_vms: Option<Vec<String>>,
    #[serde(default)]
    pub allow: Vec<M>,
    #[serde(default)]
    pub deny: Vec<M>,
    #[serde(default)]
    pub skip_on_suspend: bool,
    #[serde(default)]
    pub pci_iommu_add_all: bool,
    #[serde(default)]
    pub pci_iommu_skip_if_shared: bool,
}

impl<M> Rule<M> {
    /// Explicit `disable` wins over explicit `enable`; default is enabled.
    pub fn is_enabled(&self) -> bool {
        !matches!(self.disable, Some(true)) && !matches!(self.enable, Some(false))
    }

    /// `target_vm` and `allowed_vms` are mutually exclusive scopes; a rule naming
    /// neither is logged and skipped by `PolicyEngine::vm_for`.
    pub fn has_scope(&self) -> bool {
        self.target_vm.is_some() || self.allowed_vms.is_some()
    }

    pub fn evaluate<D>(&self, dev: &D) -> bool
    where
        M: Matches<D>,
    {
        let allowed = self.allow.iter().any(|m| m.matches(dev));
        if !allowed {
            return false;
        }
        !self.deny.iter().any(|m| m.matches(dev))
    }
}

/// The scope and flags a matched rule assigns to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughInfo {
    pub target_vm: Option<String>,
    pub allowed_vms: Option<Vec<String>>,
    pub skip_on_suspend: bool,
    pub pci_iommu_add_all: bool,
    pub pci_iommu_skip_if_shared: bool,
    /// The matched rule's position in its policy's rule list.
    pub order: usize,
}

impl PassthroughInfo {
    pub fn from_rule<M>(rule: &Rule<M>, order: usize) -> Self {
        PassthroughInfo {
            target_vm: rule.target_vm.clone(),
            allowed_vms: rule.allowed_vms.clone(),
            skip_on_suspend: rule.skip_on_suspend,
            pci_iommu_add_all: rule.pci_iommu_add_all,
            pci_iommu_skip_if_shared: rule.pci_iommu_skip_if_shared,
            order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::UsbMatcher;

    fn matcher_any() -> UsbMatcher {
        UsbMatcher {
            vendor_id: None,
            product_id: None,
            vendor_name: None,
            product_name: None,
            bus: None,
            root_port: None,
            device_class: Some(3),
            device_subclass: None,
            device_protocol: None,
            interface_class: None,
            interface_subclass: None,
            interface_protocol: None,
        }
    }

    #[test]
    fn disable_wins_over_enable() {
        let rule = Rule::<UsbMatcher> {
            description: None,
            disable: Some(true),
            enable: Some(true),
            target_vm: Some("vm1".into()),
            allowed_vms: None,
            allow: vec![matcher_any()],
            deny: vec![],
            skip_on_suspend: false,
            pci_iommu_add_all: false,
            pci_iommu_skip_if_shared: false,
        };
        assert!(!rule.is_enabled());
    }

    #[test]
    fn empty_allow_never_matches() {
        let rule = Rule::<UsbMatcher> {
            description: None,
            disable: None,
            enable: None,
            target_vm: Some("vm1".into()),
            allowed_vms: None,
            allow: vec![],
            deny: vec![],
            skip_on_suspend: false,
            pci_iommu_add_all: false,
            pci_iommu_skip_if_shared: false,
        };
        use vhotplug_device::usb::UsbInfo;
        let dev = UsbInfo {
            sys_name: "1-2".into(),
            device_node: None,
            vid: 1,
            pid: 1,
            vendor_name: None,
            product_name: None,
            serial: None,
            busnum: 1,
            devnum: 1,
            ports: vec![],
            device_class: 3,
            device_subclass: 0,
            device_protocol: 0,
            bcd_device: 0,
            interfaces: vec![],
        };
        assert!(!rule.evaluate(&dev));
    }
}
