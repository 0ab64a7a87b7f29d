use cbc_query::{SearchKind, Searchable, SortDirection, SortField};

use super::{info_model, str_field};

info_model! {
    /// An enriched event found by an Investigate search job.
    EnrichedEvent
}

impl EnrichedEvent {
    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        str_field(&self.info, "event_id")
    }

    #[must_use]
    pub fn device_name(&self) -> Option<&str> {
        str_field(&self.info, "device_name")
    }

    #[must_use]
    pub fn device_timestamp(&self) -> Option<&str> {
        str_field(&self.info, "device_timestamp")
    }

    /// First process name; the API reports it as a list.
    #[must_use]
    pub fn process_name(&self) -> Option<&str> {
        match self.info.get("process_name")? {
            serde_json::Value::Array(names) => names.first()?.as_str(),
            other => other.as_str(),
        }
    }
}

impl Searchable for EnrichedEvent {
    fn search_kind(org_key: &str) -> SearchKind {
        SearchKind::job(org_key)
    }

    fn default_sort() -> Vec<SortField> {
        vec![SortField {
            field: "device_timestamp".to_owned(),
            order: SortDirection::Asc,
        }]
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use cbc_query::Model;
    use serde_json::json;

    #[test]
    fn test_process_name_list_or_string() {
        let listed = EnrichedEvent::from_row(
            json!({ "event_id": "a", "process_name": ["c:\\windows\\cmd.exe"] })
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(listed.event_id(), Some("a"));
        assert_eq!(listed.process_name(), Some("c:\\windows\\cmd.exe"));

        let flat = EnrichedEvent::from_row(
            json!({ "process_name": "cmd.exe" }).as_object().cloned().unwrap(),
        );
        assert_eq!(flat.process_name(), Some("cmd.exe"));
    }

    #[test]
    fn test_searched_by_job_with_timestamp_sort() {
        assert_eq!(EnrichedEvent::search_kind("ORG"), SearchKind::job("ORG"));
        assert_eq!(EnrichedEvent::default_sort()[0].field, "device_timestamp");
    }
}
