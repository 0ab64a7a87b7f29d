//! Materialization hook and protocol selection.

use serde_json::{Map, Value};

use crate::state::SortField;

/// One raw result row as returned by a search endpoint.
pub type Row = Map<String, Value>;

/// A type a query can yield.
///
/// `from_row` receives data that is already fetched and must not perform I/O.
/// Rows may omit fields; implementations keep whatever is present and treat
/// the instance as fully initialized.
pub trait Model: Sized + Send + 'static {
    fn from_row(row: Row) -> Self;
}

impl Model for Row {
    fn from_row(row: Row) -> Self {
        row
    }
}

/// Pagination protocol a model is searched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKind {
    /// `start`/`rows` paging against one search endpoint
    Offset { path: String },
    /// Search job submitted, polled and paged for one organization
    Job { org_key: String },
}

impl SearchKind {
    pub fn offset(path: impl Into<String>) -> Self {
        SearchKind::Offset { path: path.into() }
    }

    pub fn job(org_key: impl Into<String>) -> Self {
        SearchKind::Job {
            org_key: org_key.into(),
        }
    }
}

/// A model that can be the target of `select`.
pub trait Searchable: Model {
    fn search_kind(org_key: &str) -> SearchKind;

    /// Sort keys a new job query starts with; ignored for offset search.
    fn default_sort() -> Vec<SortField> {
        Vec::new()
    }
}
