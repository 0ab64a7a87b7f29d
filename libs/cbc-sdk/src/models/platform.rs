//! Endpoint Standard objects: devices, events and policies.

use std::collections::BTreeMap;

use cbc_query::{Row, SearchKind, Searchable};
use serde_json::Value;

use super::{Fetchable, i64_field, info_model, str_field};

info_model! {
    /// An endpoint with a sensor installed.
    Device
}

impl Device {
    #[must_use]
    pub fn device_id(&self) -> Option<i64> {
        i64_field(&self.info, "deviceId")
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        str_field(&self.info, "name")
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        str_field(&self.info, "status")
    }

    #[must_use]
    pub fn os_version(&self) -> Option<&str> {
        str_field(&self.info, "osVersion")
    }

    #[must_use]
    pub fn policy_name(&self) -> Option<&str> {
        str_field(&self.info, "policyName")
    }
}

impl Searchable for Device {
    fn search_kind(_org_key: &str) -> SearchKind {
        SearchKind::offset(Self::ENDPOINT)
    }
}

impl Fetchable for Device {
    const ENDPOINT: &'static str = "/integrationServices/v3/device";
    const INFO_KEY: &'static str = "deviceInfo";
}

info_model! {
    /// A sensor event as reported by the Endpoint Standard event API.
    Event
}

impl Event {
    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        str_field(&self.info, "eventId")
    }

    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        str_field(&self.info, "eventType")
    }

    #[must_use]
    pub fn create_time(&self) -> Option<i64> {
        i64_field(&self.info, "createTime")
    }

    #[must_use]
    pub fn device_id(&self) -> Option<i64> {
        self.info
            .get("deviceDetails")
            .and_then(|d| d.get("deviceId"))
            .and_then(Value::as_i64)
    }
}

impl Searchable for Event {
    fn search_kind(_org_key: &str) -> SearchKind {
        SearchKind::offset(Self::ENDPOINT)
    }
}

impl Fetchable for Event {
    const ENDPOINT: &'static str = "/integrationServices/v3/event";
    const INFO_KEY: &'static str = "eventInfo";
}

info_model! {
    /// A sensor policy and its rules.
    Policy
}

impl Policy {
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        i64_field(&self.info, "id")
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        str_field(&self.info, "name")
    }

    #[must_use]
    pub fn priority_level(&self) -> Option<&str> {
        str_field(&self.info, "priorityLevel")
    }

    /// Rules of the embedded policy document, keyed by rule id.
    #[must_use]
    pub fn rules(&self) -> BTreeMap<i64, Row> {
        self.info
            .get("policy")
            .and_then(|p| p.get("rules"))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|rule| {
                let rule = rule.as_object()?;
                Some((rule.get("id")?.as_i64()?, rule.clone()))
            })
            .collect()
    }
}

impl Searchable for Policy {
    fn search_kind(_org_key: &str) -> SearchKind {
        SearchKind::offset(Self::ENDPOINT)
    }
}

impl Fetchable for Policy {
    const ENDPOINT: &'static str = "/integrationServices/v3/policy";
    const INFO_KEY: &'static str = "policyInfo";
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use cbc_query::Model;
    use serde_json::json;

    fn build<M: Model>(value: Value) -> M {
        match value {
            Value::Object(row) => M::from_row(row),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_device_accessors() {
        let device: Device = build(json!({
            "deviceId": 98765,
            "name": "WIN-7",
            "status": "REGISTERED",
            "osVersion": "Windows 10 x64",
        }));
        assert!(device.is_initialized());
        assert_eq!(device.device_id(), Some(98765));
        assert_eq!(device.name(), Some("WIN-7"));
        assert_eq!(device.os_version(), Some("Windows 10 x64"));
        assert_eq!(device.policy_name(), None);
        assert!(!Device::default().is_initialized());
    }

    #[test]
    fn test_event_device_id_is_nested() {
        let event: Event = build(json!({
            "eventId": "e-1",
            "eventType": "NETWORK",
            "deviceDetails": { "deviceId": 12 },
        }));
        assert_eq!(event.event_id(), Some("e-1"));
        assert_eq!(event.device_id(), Some(12));
    }

    #[test]
    fn test_policy_rules_by_id() {
        let policy: Policy = build(json!({
            "id": 7,
            "policy": { "rules": [
                { "id": 1, "action": "DENY" },
                { "id": 2, "action": "IGNORE" },
                { "action": "no id, skipped" },
            ]},
        }));
        let rules = policy.rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[&2]["action"], "IGNORE");
        assert!(Policy::default().rules().is_empty());
    }

    #[test]
    fn test_serializes_as_raw_row() {
        let device: Device = build(json!({ "deviceId": 1 }));
        assert_eq!(serde_json::to_value(&device).unwrap(), json!({ "deviceId": 1 }));
    }
}
