//! Synchronous offset paging: `start`/`rows` against one endpoint.
//!
//! Every filter term becomes its own query parameter. The endpoint's `start`
//! is 1-based: row `n` (0-based) is requested as `start = n + 1`, and the
//! first row is requested with `start` omitted. The server reports the total
//! on each page.

use std::collections::VecDeque;

use futures_core::Stream;
use futures_util::stream;

use crate::error::QueryError;
use crate::model::Row;
use crate::state::{CountCache, QueryState};
use crate::transport::{ApiRequest, Transport, count_field, fetch_object};

/// Servers stop returning rows past this many results.
pub(crate) const RESULT_CEILING: usize = 100_000;

#[derive(Debug, Clone)]
pub(crate) struct OffsetSearch {
    path: String,
    counter: CountCache,
}

impl OffsetSearch {
    pub(crate) fn new(path: String) -> Self {
        Self {
            path,
            counter: CountCache::default(),
        }
    }

    fn base_request(&self, state: &QueryState) -> ApiRequest {
        let mut request = ApiRequest::get(self.path.clone());
        if let Some(filter) = state.builder().filter() {
            for (key, value) in filter.terms() {
                request = request.with_query(key, value);
            }
        }
        request
    }

    /// Total result count, fetched with a zero-row probe unless cached.
    pub(crate) async fn count(
        &mut self,
        transport: &dyn Transport,
        state: &QueryState,
    ) -> Result<usize, QueryError> {
        if let Some(total) = self.counter.get() {
            return Ok(total);
        }
        let request = self.base_request(state).with_query("rows", "0");
        let reply = fetch_object(transport, request).await?;
        let total = count_field(&reply.body, "totalResults");
        self.counter.set(total);
        tracing::debug!(path = %self.path, total, "counted results");
        Ok(total)
    }

    /// Streams rows from 0-based `start`, stopping after `rows` rows when
    /// non-zero.
    pub(crate) fn search<'a>(
        &'a mut self,
        transport: &'a dyn Transport,
        state: &'a QueryState,
        start: usize,
        rows: usize,
    ) -> impl Stream<Item = Result<Row, QueryError>> + Send + 'a {
        let request = self.base_request(state);
        let cursor = OffsetCursor {
            request,
            batch_size: state.batch_size(),
            search: self,
            transport,
            buffer: VecDeque::new(),
            current: start,
            yielded: 0,
            limit: rows,
            fetched: false,
            done: false,
        };
        stream::try_unfold(cursor, |mut cursor| async move {
            Ok(cursor.next_row().await?.map(|row| (row, cursor)))
        })
    }
}

struct OffsetCursor<'a> {
    request: ApiRequest,
    batch_size: usize,
    search: &'a mut OffsetSearch,
    transport: &'a dyn Transport,
    buffer: VecDeque<Row>,
    current: usize,
    yielded: usize,
    limit: usize,
    fetched: bool,
    done: bool,
}

impl OffsetCursor<'_> {
    async fn next_row(&mut self) -> Result<Option<Row>, QueryError> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                self.current += 1;
                self.yielded += 1;
                if self.limit > 0 && self.yielded >= self.limit {
                    self.buffer.clear();
                    self.done = true;
                }
                return Ok(Some(row));
            }
            if self.done {
                return Ok(None);
            }
            if self.fetched && self.current >= self.search.counter.total() {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<(), QueryError> {
        let mut request = self.request.clone();
        let start = if self.current == 0 { 0 } else { self.current + 1 };
        if start != 0 {
            request = request.with_query("start", start.to_string());
        }
        request = request.with_query("rows", self.batch_size.to_string());

        let mut reply = fetch_object(self.transport, request).await?;
        self.fetched = true;
        let total = count_field(&reply.body, "totalResults");
        self.search.counter.set(total);

        let Some(batch) = reply.take_rows("results")? else {
            tracing::debug!(path = %self.search.path, current = self.current, "no result list returned");
            if self.current >= RESULT_CEILING {
                tracing::info!(
                    limit = RESULT_CEILING,
                    "Max result size exceeded. Truncated to 100k."
                );
            }
            self.done = true;
            return Ok(());
        };

        tracing::trace!(
            path = %self.search.path,
            start,
            rows = batch.len(),
            total,
            "fetched page"
        );

        if batch.is_empty() {
            if self.current < total {
                tracing::debug!(
                    reported = total,
                    actual = self.current,
                    "server overestimated total results, clamping count"
                );
                self.search.counter.set(self.current);
            }
            self.done = true;
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::testing::{FakeTransport, ok, param, rows};
    use futures_util::TryStreamExt;
    use serde_json::{Value, json};

    const PATH: &str = "/integrationServices/v3/device";

    /// Serves `total` rows; `start` is 1-based, with 0 meaning the first row.
    fn paged(total: usize) -> std::sync::Arc<FakeTransport> {
        FakeTransport::new(move |request| {
            let rows_wanted = param(request, "rows");
            let offset = param(request, "start").saturating_sub(1).min(total);
            let end = (offset + rows_wanted).min(total);
            ok(json!({ "totalResults": total, "results": rows(offset..end) }))
        })
    }

    #[tokio::test]
    async fn test_pages_advance_start_past_current() {
        let fake = paged(250);
        let state = QueryState::default();
        let mut search = OffsetSearch::new(PATH.to_owned());

        let all: Vec<Row> = search
            .search(fake.as_ref(), &state, 0, 0)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(all.len(), 250);
        assert_eq!(all[249]["id"], json!(249));
        let requests = fake.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].query_param("start"), None);
        assert_eq!(requests[1].query_param("start"), Some("101"));
        assert_eq!(requests[2].query_param("start"), Some("201"));
        for request in &requests {
            assert_eq!(request.query_param("rows"), Some("100"));
        }
        assert_eq!(search.counter.get(), Some(250));
    }

    #[tokio::test]
    async fn test_row_limit_stops_without_extra_request() {
        let fake = paged(250);
        let state = QueryState::default();
        let mut search = OffsetSearch::new(PATH.to_owned());

        let some: Vec<Row> = search
            .search(fake.as_ref(), &state, 0, 30)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(some.len(), 30);
        assert_eq!(fake.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_count_probe_is_cached() {
        let fake = paged(42);
        let mut state = QueryState::default();
        state.builder = state
            .builder
            .where_(Filter::term("hostName", "ws-01"))
            .unwrap();
        let mut search = OffsetSearch::new(PATH.to_owned());

        assert_eq!(search.count(fake.as_ref(), &state).await.unwrap(), 42);
        assert_eq!(search.count(fake.as_ref(), &state).await.unwrap(), 42);

        let requests = fake.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].query_param("rows"), Some("0"));
        assert_eq!(requests[0].query_param("hostName"), Some("ws-01"));
    }

    #[tokio::test]
    async fn test_search_refreshes_cached_count() {
        let fake = paged(5);
        let state = QueryState::default();
        let mut search = OffsetSearch::new(PATH.to_owned());

        let _: Vec<Row> = search
            .search(fake.as_ref(), &state, 0, 0)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(search.count(fake.as_ref(), &state).await.unwrap(), 5);
        assert_eq!(fake.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_overestimated_total_is_clamped() {
        // Claims 250 results but has nothing past the first page.
        let fake = FakeTransport::new(|request| {
            let results = if param(request, "start") == 0 {
                rows(0..100)
            } else {
                Value::Array(Vec::new())
            };
            ok(json!({ "totalResults": 250, "results": results }))
        });
        let state = QueryState::default();
        let mut search = OffsetSearch::new(PATH.to_owned());

        let all: Vec<Row> = search
            .search(fake.as_ref(), &state, 0, 0)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(all.len(), 100);
        assert_eq!(fake.requests().len(), 2);
        assert_eq!(search.count(fake.as_ref(), &state).await.unwrap(), 100);
        assert_eq!(fake.requests().len(), 2);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_null_results_past_ceiling_logs_truncation() {
        let fake = FakeTransport::new(|_| ok(json!({ "totalResults": 250_000, "results": null })));
        let state = QueryState::default();
        let mut search = OffsetSearch::new(PATH.to_owned());

        let all: Vec<Row> = search
            .search(fake.as_ref(), &state, RESULT_CEILING, 0)
            .try_collect()
            .await
            .unwrap();

        assert!(all.is_empty());
        assert!(logs_contain("Max result size exceeded"));
    }

    #[tokio::test]
    async fn test_missing_results_ends_iteration() {
        let fake = FakeTransport::new(|_| ok(json!({ "totalResults": 0 })));
        let state = QueryState::default();
        let mut search = OffsetSearch::new(PATH.to_owned());

        let all: Vec<Row> = search
            .search(fake.as_ref(), &state, 0, 0)
            .try_collect()
            .await
            .unwrap();
        assert!(all.is_empty());
        assert_eq!(fake.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_surfaces_from_stream() {
        let fake = FakeTransport::new(|_| crate::ApiResponse {
            status: 500,
            body: json!({ "message": "internal" }),
        });
        let state = QueryState::default();
        let mut search = OffsetSearch::new(PATH.to_owned());

        let err = search
            .search(fake.as_ref(), &state, 0, 0)
            .try_collect::<Vec<Row>>()
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
    }
}
