//! Per-query configuration and count cache.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::QueryError;
use crate::filter::QueryBuilder;

/// Rows requested per page unless overridden with `set_rows`.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Largest page the search endpoints accept.
pub const MAX_BATCH_SIZE: usize = 5000;

/// Sort order for one sort key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

impl FromStr for SortDirection {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("asc") {
            Ok(SortDirection::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Ok(SortDirection::Desc)
        } else {
            Err(QueryError::usage(format!(
                "sort direction must be ASC or DESC, got '{s}'"
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub order: SortDirection,
}

/// `time_range` body argument of a search job.
///
/// `window` is stored alongside `start` and `end`; the server gives it
/// precedence when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
}

impl TimeRange {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.window.is_none()
    }
}

/// Configuration snapshot of one query.
///
/// Every chained call produces a new snapshot; the count cache and job
/// handle live with the protocol engine and are never carried over.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub(crate) builder: QueryBuilder,
    pub(crate) batch_size: usize,
    pub(crate) rows: Option<usize>,
    pub(crate) sort: Vec<SortField>,
    pub(crate) time_range: TimeRange,
    pub(crate) timeout: Option<Duration>,
    pub(crate) body_args: Map<String, Value>,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            builder: QueryBuilder::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            rows: None,
            sort: Vec::new(),
            time_range: TimeRange::default(),
            timeout: None,
            body_args: Map::new(),
        }
    }
}

impl QueryState {
    #[must_use]
    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn sort(&self) -> &[SortField] {
        &self.sort
    }

    #[must_use]
    pub fn time_range(&self) -> &TimeRange {
        &self.time_range
    }

    /// Polling timeout; `None` waits indefinitely.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn set_rows(&mut self, rows: usize) -> Result<(), QueryError> {
        if rows == 0 || rows > MAX_BATCH_SIZE {
            return Err(QueryError::usage(format!(
                "rows must be between 1 and {MAX_BATCH_SIZE}, got {rows}"
            )));
        }
        self.batch_size = rows;
        self.rows = Some(rows);
        Ok(())
    }

    /// Updates the direction of an existing key in place, otherwise appends.
    pub(crate) fn sort_by(&mut self, key: &str, order: SortDirection) {
        if let Some(entry) = self.sort.iter_mut().find(|s| s.field == key) {
            entry.order = order;
        } else {
            self.sort.push(SortField {
                field: key.to_owned(),
                order,
            });
        }
    }

    pub(crate) fn set_time_range(
        &mut self,
        start: Option<&str>,
        end: Option<&str>,
        window: Option<&str>,
    ) -> Result<(), QueryError> {
        if let Some(start) = start {
            validate_timestamp("start", start)?;
        }
        if let Some(end) = end {
            validate_timestamp("end", end)?;
        }
        if let Some(window) = window {
            validate_window(window)?;
        }
        if let Some(start) = start {
            self.time_range.start = Some(start.to_owned());
        }
        if let Some(end) = end {
            self.time_range.end = Some(end.to_owned());
        }
        if let Some(window) = window {
            self.time_range.window = Some(window.to_owned());
        }
        Ok(())
    }

    pub(crate) fn set_timeout(&mut self, msecs: u64) {
        self.timeout = (msecs > 0).then(|| Duration::from_millis(msecs));
    }

    pub(crate) fn set_body_arg(&mut self, key: &str, value: Value) {
        self.body_args.insert(key.to_owned(), value);
    }

    /// Body of a search job submission.
    pub(crate) fn job_body(&self) -> Value {
        let mut body = self.body_args.clone();
        if let Some(query) = self.builder.collapse() {
            body.insert("query".to_owned(), Value::String(query));
        }
        if let Some(rows) = self.rows {
            body.insert("rows".to_owned(), Value::from(rows));
        }
        if !self.sort.is_empty() {
            let sort = self
                .sort
                .iter()
                .map(|s| serde_json::json!({"field": s.field, "order": s.order.to_string()}))
                .collect();
            body.insert("sort".to_owned(), Value::Array(sort));
        }
        if !self.time_range.is_empty() {
            let mut range = Map::new();
            let fields = [
                ("start", &self.time_range.start),
                ("end", &self.time_range.end),
                ("window", &self.time_range.window),
            ];
            for (name, value) in fields {
                if let Some(value) = value {
                    range.insert(name.to_owned(), Value::String(value.clone()));
                }
            }
            body.insert("time_range".to_owned(), Value::Object(range));
        }
        Value::Object(body)
    }
}

fn validate_timestamp(name: &str, value: &str) -> Result<(), QueryError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|_| ())
        .map_err(|e| {
            QueryError::usage(format!(
                "{name} time must be an ISO 8601 timestamp, got '{value}': {e}"
            ))
        })
}

/// Accepts relative windows such as `-2w` or `-30m`.
fn validate_window(value: &str) -> Result<(), QueryError> {
    let valid = value
        .strip_prefix('-')
        .and_then(|rest| rest.split_at_checked(rest.len().saturating_sub(1)))
        .is_some_and(|(amount, unit)| {
            !amount.is_empty()
                && amount.bytes().all(|b| b.is_ascii_digit())
                && matches!(unit, "y" | "w" | "d" | "h" | "m" | "s")
        });
    if valid {
        Ok(())
    } else {
        Err(QueryError::usage(format!(
            "window must look like -<n><y|w|d|h|m|s>, got '{value}'"
        )))
    }
}

/// Cached total result count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CountCache {
    total: usize,
    valid: bool,
}

impl CountCache {
    pub(crate) fn get(self) -> Option<usize> {
        self.valid.then_some(self.total)
    }

    pub(crate) fn total(self) -> usize {
        self.total
    }

    pub(crate) fn set(&mut self, total: usize) {
        self.total = total;
        self.valid = true;
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let state = QueryState::default();
        assert_eq!(state.batch_size(), DEFAULT_BATCH_SIZE);
        assert!(state.sort().is_empty());
        assert!(state.time_range().is_empty());
        assert_eq!(state.timeout(), None);
    }

    #[test]
    fn test_sort_by_overwrites_existing_key() {
        let mut state = QueryState::default();
        state.sort_by("ts", SortDirection::Asc);
        state.sort_by("host", SortDirection::Asc);
        state.sort_by("ts", SortDirection::Desc);
        assert_eq!(
            state.sort(),
            &[
                SortField {
                    field: "ts".to_owned(),
                    order: SortDirection::Desc,
                },
                SortField {
                    field: "host".to_owned(),
                    order: SortDirection::Asc,
                },
            ]
        );
    }

    #[test]
    fn test_set_rows_bounds() {
        let mut state = QueryState::default();
        assert!(state.set_rows(0).unwrap_err().is_usage());
        assert!(state.set_rows(MAX_BATCH_SIZE + 1).unwrap_err().is_usage());
        state.set_rows(MAX_BATCH_SIZE).unwrap();
        assert_eq!(state.batch_size(), MAX_BATCH_SIZE);
    }

    #[test]
    fn test_time_range_keeps_all_fields() {
        let mut state = QueryState::default();
        state
            .set_time_range(Some("2020-10-20T20:34:07Z"), None, None)
            .unwrap();
        state.set_time_range(None, None, Some("-3d")).unwrap();
        assert_eq!(
            state.time_range(),
            &TimeRange {
                start: Some("2020-10-20T20:34:07Z".to_owned()),
                end: None,
                window: Some("-3d".to_owned()),
            }
        );
    }

    #[test]
    fn test_time_range_rejects_bad_values_without_partial_update() {
        let mut state = QueryState::default();
        let err = state
            .set_time_range(Some("2020-10-20T20:34:07Z"), Some("yesterday"), None)
            .unwrap_err();
        assert!(err.is_usage());
        assert!(state.time_range().is_empty());

        for window in ["3d", "-d", "-3x", "-", ""] {
            assert!(
                state.set_time_range(None, None, Some(window)).is_err(),
                "{window}"
            );
        }
    }

    #[test]
    fn test_sort_direction_parse() {
        assert_eq!(
            "desc".parse::<SortDirection>().unwrap(),
            SortDirection::Desc
        );
        assert_eq!("ASC".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert!("up".parse::<SortDirection>().is_err());
    }

    #[test]
    fn test_job_body() {
        let mut state = QueryState::default();
        state.builder = state
            .builder
            .where_(crate::Filter::term("process_name", "cmd.exe"))
            .unwrap();
        state.sort_by("device_timestamp", SortDirection::Desc);
        state.set_rows(500).unwrap();
        state.set_time_range(None, None, Some("-1d")).unwrap();

        assert_eq!(
            state.job_body(),
            json!({
                "query": "process_name:cmd.exe",
                "rows": 500,
                "sort": [{"field": "device_timestamp", "order": "DESC"}],
                "time_range": {"window": "-1d"},
            })
        );
    }

    #[test]
    fn test_job_body_empty() {
        assert_eq!(QueryState::default().job_body(), json!({}));
    }

    #[test]
    fn test_timeout_zero_disables() {
        let mut state = QueryState::default();
        state.set_timeout(250);
        assert_eq!(state.timeout(), Some(Duration::from_millis(250)));
        state.set_timeout(0);
        assert_eq!(state.timeout(), None);
    }

    #[test]
    fn test_count_cache() {
        let mut cache = CountCache::default();
        assert_eq!(cache.get(), None);
        cache.set(42);
        assert_eq!(cache.get(), Some(42));
        assert_eq!(cache.total(), 42);
    }
}
