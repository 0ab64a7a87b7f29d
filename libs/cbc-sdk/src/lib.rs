#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Carbon Black Cloud SDK.
//!
//! [`CbcApi`] binds credentials to an HTTP client and hands out lazy
//! queries over the typed models:
//!
//! - Endpoint Standard devices, events and policies, paged by offset
//! - Investigate enriched events, found through search jobs
//! - Threat Hunter feeds, reports and watchlists, listed in one call
//!
//! The engine behind [`Query`] lives in `cbc-query`; everything needed to
//! drive it is re-exported here.

mod api;
mod background;
mod credentials;
mod error;
mod lists;
pub mod models;

pub use api::{CbcApi, CbcApiBuilder};
pub use background::{BackgroundQuery, ExecuteAsync};
pub use credentials::{Credentials, DEFAULT_PROFILE, ENV_PREFIX};
pub use error::CbcError;
pub use lists::{FeedQuery, ReportQuery, WatchlistQuery};
pub use models::{Device, EnrichedEvent, Event, Feed, Fetchable, Ioc, Policy, Report, Watchlist};

pub use cbc_http::HttpClientConfig;
pub use cbc_query::{
    Filter, Model, Query, QueryBuilder, QueryError, Row, SearchKind, Searchable, Slice,
    SortDirection,
};
