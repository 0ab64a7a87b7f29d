//! Typed wrappers over raw result rows.
//!
//! Every model keeps the row it was built from; typed accessors read from
//! it and `get`/`raw` expose anything the accessors do not cover.

use cbc_query::Row;
use serde_json::Value;

/// A model with a single-object endpoint at `{ENDPOINT}/{id}`.
pub trait Fetchable: cbc_query::Model {
    const ENDPOINT: &'static str;
    /// Key of the object inside the response body
    const INFO_KEY: &'static str;
}

/// Unwraps `row[key]` when it holds an object, otherwise keeps the row.
fn unwrap_info(mut row: Row, key: &str) -> Row {
    match row.remove(key) {
        Some(Value::Object(inner)) => inner,
        Some(other) => {
            row.insert(key.to_owned(), other);
            row
        }
        None => row,
    }
}

fn str_field<'a>(row: &'a Row, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str)
}

fn i64_field(row: &Row, key: &str) -> Option<i64> {
    row.get(key).and_then(Value::as_i64)
}

macro_rules! info_model {
    ($(#[$meta:meta])* $name:ident $(, wrapped in $wrapper:literal)?) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            info: cbc_query::Row,
            initialized: bool,
        }

        impl $name {
            /// Raw field by its API name.
            #[must_use]
            pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
                self.info.get(key)
            }

            #[must_use]
            pub fn raw(&self) -> &cbc_query::Row {
                &self.info
            }

            #[must_use]
            pub fn into_raw(self) -> cbc_query::Row {
                self.info
            }

            /// False only for a `Default` placeholder.
            #[must_use]
            pub fn is_initialized(&self) -> bool {
                self.initialized
            }
        }

        impl cbc_query::Model for $name {
            fn from_row(row: cbc_query::Row) -> Self {
                $(let row = $crate::models::unwrap_info(row, $wrapper);)?
                Self {
                    info: row,
                    initialized: true,
                }
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serde::Serialize::serialize(&self.info, serializer)
            }
        }
    };
}

pub(crate) use info_model;

mod investigate;
mod platform;
mod threathunter;

pub use investigate::EnrichedEvent;
pub use platform::{Device, Event, Policy};
pub use threathunter::{Feed, Ioc, Report, Watchlist};
