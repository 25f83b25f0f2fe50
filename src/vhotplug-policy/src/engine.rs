// Copyright 2024 The vhotplug authors
// SPDX-License-Identifier: Apache-2.0

use tracing::warn;

use crate::matcher::Matches;
use crate::rule::{PassthroughInfo, Rule};

/// Evaluates an ordered list of rules of one device kind against a device snapshot.
///
/// First enabled, scoped, matching rule wins.
#[derive(Debug, Clone)]
pub struct PolicyEngine<M> {
    rules: Vec<Rule<M>>,
}

impl<M> PolicyEngine<M> {
    pub fn new(rules: Vec<Rule<M>>) -> Self {
        Self { rules }
    }

    pub fn vm_for_device<D>(&self, dev: &D) -> Option<PassthroughInfo>
    where
        M: Matches<D>,
    {
        for (order, rule) in self.rules.iter().enumerate() {
            if !rule.is_enabled() {
                continue;
            }
            if !rule.has_scope() {
                warn!(
                    description = rule.description.as_deref().unwrap_or("<unnamed>"),
                    "rule names neither targetVm nor allowedVms, skipping"
                );
                continue;
            }
            if rule.evaluate(dev) {
                return Some(PassthroughInfo::from_rule(rule, order));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::UsbMatcher;
    use vhotplug_device::usb::UsbInfo;

    fn rule(target_vm: &str, class: u8, deny_vid: Option<&str>) -> Rule<UsbMatcher> {
        Rule {
            description: Some("test".into()),
            disable: None,
            enable: None,
            target_vm: Some(target_vm.into()),
            allowed_vms: None,
            allow: vec![UsbMatcher {
                vendor_id: None,
                product_id: None,
                vendor_name: None,
                product_name: None,
                bus: None,
                root_port: None,
                device_class: None,
                device_subclass: None,
                device_protocol: None,
                interface_class: Some(class),
                interface_subclass: None,
                interface_protocol: None,
            }],
            deny: deny_vid
                .map(|vid| {
                    vec![UsbMatcher {
                        vendor_id: Some(vid.into()),
                        product_id: Some("c52b".into()),
                        vendor_name: None,
                        product_name: None,
                        bus: None,
                        root_port: None,
                        device_class: None,
                        device_subclass: None,
                        device_protocol: None,
                        interface_class: None,
                        interface_subclass: None,
                        interface_protocol: None,
                    }]
                })
                .unwrap_or_default(),
            skip_on_suspend: false,
            pci_iommu_add_all: false,
            pci_iommu_skip_if_shared: false,
        }
    }

    fn device(vid: u16, pid: u16, interfaces: &str) -> UsbInfo {
        UsbInfo {
            sys_name: "1-2".into(),
            device_node: Some("/dev/bus/usb/001/002".into()),
            vid,
            pid,
            vendor_name: None,
            product_name: None,
            serial: Some("S1".into()),
            busnum: 1,
            devnum: 2,
            ports: vec![2],
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            bcd_device: 0,
            interfaces: UsbInfo::parse_interfaces(interfaces),
        }
    }

    #[test]
    fn s1_first_matching_rule_routes_to_target_vm() {
        let engine = PolicyEngine::new(vec![rule("vm1", 3, None)]);
        let dev = device(0x1234, 0x5678, ":030101:030102:030000:");
        let result = engine.vm_for_device(&dev).unwrap();
        assert_eq!(result.target_vm.as_deref(), Some("vm1"));
    }

    #[test]
    fn s2_deny_overrides_allow() {
        let engine = PolicyEngine::new(vec![rule("vm1", 3, Some("046d"))]);
        let dev = device(0x046d, 0xc52b, ":030000:");
        assert!(engine.vm_for_device(&dev).is_none());
    }

    #[test]
    fn rules_missing_scope_are_skipped() {
        let mut unscoped = rule("vm1", 3, None);
        unscoped.target_vm = None;
        let engine = PolicyEngine::new(vec![unscoped, rule("vm2", 3, None)]);
        let dev = device(0x1234, 0x5678, ":030000:");
        let result = engine.vm_for_device(&dev).unwrap();
        assert_eq!(result.target_vm.as_deref(), Some("vm2"));
    }

    #[test]
    fn order_reflects_the_matching_rule_position() {
        let mut unscoped = rule("vm1", 3, None);
        unscoped.target_vm = None;
        let engine = PolicyEngine::new(vec![unscoped, rule("vm2", 3, None)]);
        let dev = device(0x1234, 0x5678, ":030000:");
        let result = engine.vm_for_device(&dev).unwrap();
        assert_eq!(result.order, 1);
    }
}
