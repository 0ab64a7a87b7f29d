//! Threat intelligence objects: feeds, reports, watchlists and IOCs.

use cbc_query::Model;
use serde_json::Value;

use super::{info_model, str_field};

info_model! {
    /// A threat intelligence feed. Feed detail responses nest the feed
    /// under `feedinfo`; list responses do not.
    Feed, wrapped in "feedinfo"
}

impl Feed {
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        str_field(&self.info, "id")
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        str_field(&self.info, "name")
    }

    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        str_field(&self.info, "owner")
    }

    #[must_use]
    pub fn category(&self) -> Option<&str> {
        str_field(&self.info, "category")
    }

    #[must_use]
    pub fn is_public(&self) -> bool {
        self.info
            .get("access")
            .and_then(Value::as_str)
            .is_some_and(|access| access == "public")
    }
}

info_model! {
    /// A report within a feed, carrying its IOCs.
    Report
}

impl Report {
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        str_field(&self.info, "id")
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        str_field(&self.info, "title")
    }

    #[must_use]
    pub fn severity(&self) -> Option<i64> {
        self.info.get("severity").and_then(Value::as_i64)
    }

    /// IOCs listed under `iocs_v2`.
    #[must_use]
    pub fn iocs(&self) -> Vec<Ioc> {
        self.info
            .get("iocs_v2")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|ioc| ioc.as_object().cloned().map(Ioc::from_row))
            .collect()
    }
}

info_model! {
    /// A saved set of reports whose IOCs are matched continuously.
    Watchlist
}

impl Watchlist {
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        str_field(&self.info, "id")
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        str_field(&self.info, "name")
    }

    #[must_use]
    pub fn report_ids(&self) -> Vec<&str> {
        self.info
            .get("report_ids")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .collect()
    }
}

info_model! {
    /// One indicator of compromise. Only reachable through its report.
    Ioc
}

impl Ioc {
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        str_field(&self.info, "id")
    }

    #[must_use]
    pub fn match_type(&self) -> Option<&str> {
        str_field(&self.info, "match_type")
    }

    #[must_use]
    pub fn field(&self) -> Option<&str> {
        str_field(&self.info, "field")
    }

    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        self.info
            .get("values")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .collect()
    }
}
