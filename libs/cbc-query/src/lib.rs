#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Lazy paginated queries for the Carbon Black Cloud APIs.
//!
//! A [`Query`] accumulates a filter and paging options without touching the
//! network. Counting, indexing, slicing or streaming it drives one of two
//! protocols, chosen by the model's [`SearchKind`]:
//!
//! - offset search, one GET per page with a 1-based `start`
//! - search jobs, submitted once, polled until complete, then paged
//!
//! Requests go through a [`Transport`], so the engine is independent of the
//! HTTP stack used to reach the server.

mod error;
mod filter;
mod job;
mod model;
mod offset;
mod query;
mod state;
mod transport;

#[cfg(test)]
mod testing;

pub use error::{BoxError, QueryError};
pub use filter::{Filter, FilterOp, QueryBuilder};
pub use job::{JobState, POLL_INTERVAL};
pub use model::{Model, Row, SearchKind, Searchable};
pub use query::{Query, Slice};
pub use state::{
    DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE, QueryState, SortDirection, SortField, TimeRange,
};
pub use transport::{ApiRequest, ApiResponse, Transport};
