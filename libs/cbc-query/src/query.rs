//! The lazy query handle callers interact with.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Range, RangeFrom, RangeFull, RangeTo};
use std::sync::Arc;

use futures_core::Stream;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use serde_json::Value;

use crate::error::QueryError;
use crate::filter::{Filter, QueryBuilder};
use crate::job::{JobSearch, JobState};
use crate::model::{Model, Row, SearchKind, Searchable};
use crate::offset::OffsetSearch;
use crate::state::{QueryState, SortDirection};
use crate::transport::Transport;

/// Half-open result range with Python-style negative bounds.
///
/// A negative bound counts back from the total result count. Only the unit
/// step is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slice {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl Slice {
    #[must_use]
    pub fn new(start: Option<i64>, stop: Option<i64>) -> Self {
        Self {
            start,
            stop,
            step: None,
        }
    }

    #[must_use]
    pub fn step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    fn needs_len(&self) -> bool {
        self.start.is_some_and(|s| s < 0) || self.stop.is_some_and(|s| s < 0)
    }
}

impl From<Range<i64>> for Slice {
    fn from(range: Range<i64>) -> Self {
        Slice::new(Some(range.start), Some(range.end))
    }
}

impl From<RangeFrom<i64>> for Slice {
    fn from(range: RangeFrom<i64>) -> Self {
        Slice::new(Some(range.start), None)
    }
}

impl From<RangeTo<i64>> for Slice {
    fn from(range: RangeTo<i64>) -> Self {
        Slice::new(None, Some(range.end))
    }
}

impl From<RangeFull> for Slice {
    fn from(_: RangeFull) -> Self {
        Slice::default()
    }
}

/// Resolves a bound against the result count; negatives clamp at zero.
fn resolve_bound(bound: i64, len: Option<usize>) -> usize {
    if bound >= 0 {
        return usize::try_from(bound).unwrap_or(usize::MAX);
    }
    let len = i64::try_from(len.unwrap_or(0)).unwrap_or(i64::MAX);
    usize::try_from((len + bound).max(0)).unwrap_or(0)
}

#[derive(Debug, Clone)]
enum Engine {
    Offset(OffsetSearch),
    Job(JobSearch),
}

impl Engine {
    fn new(kind: &SearchKind) -> Self {
        match kind {
            SearchKind::Offset { path } => Engine::Offset(OffsetSearch::new(path.clone())),
            SearchKind::Job { org_key } => Engine::Job(JobSearch::new(org_key.clone())),
        }
    }
}

/// A lazily evaluated query over models of type `M`.
///
/// Construction and chaining never touch the network. Chained calls return a
/// new query carrying a copy of the configuration with an empty count cache
/// and no job handle; the receiver is left unchanged.
pub struct Query<M> {
    transport: Arc<dyn Transport>,
    kind: SearchKind,
    state: QueryState,
    engine: Engine,
    model: PhantomData<fn() -> M>,
}

impl<M> fmt::Debug for Query<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl<M: Searchable> Query<M> {
    /// Query over every `M` visible to `org_key`, with the model's default sort.
    pub fn select(transport: Arc<dyn Transport>, org_key: &str) -> Self {
        let kind = M::search_kind(org_key);
        let mut state = QueryState::default();
        if matches!(kind, SearchKind::Job { .. }) {
            state.sort = M::default_sort();
        }
        Self::with_state(transport, kind, state)
    }
}

impl<M: Model> Query<M> {
    pub fn new(transport: Arc<dyn Transport>, kind: SearchKind) -> Self {
        Self::with_state(transport, kind, QueryState::default())
    }

    fn with_state(transport: Arc<dyn Transport>, kind: SearchKind, state: QueryState) -> Self {
        let engine = Engine::new(&kind);
        Self {
            transport,
            kind,
            state,
            engine,
            model: PhantomData,
        }
    }

    /// Same configuration with no cached count and no job.
    #[must_use]
    pub fn fresh(&self) -> Self {
        Self::with_state(
            Arc::clone(&self.transport),
            self.kind.clone(),
            self.state.clone(),
        )
    }

    fn derive(
        &self,
        edit: impl FnOnce(&mut QueryState) -> Result<(), QueryError>,
    ) -> Result<Self, QueryError> {
        let mut state = self.state.clone();
        edit(&mut state)?;
        Ok(Self::with_state(
            Arc::clone(&self.transport),
            self.kind.clone(),
            state,
        ))
    }

    fn derive_filter(
        &self,
        edit: impl FnOnce(QueryBuilder) -> Result<QueryBuilder, QueryError>,
    ) -> Result<Self, QueryError> {
        self.derive(|state| {
            state.builder = edit(std::mem::take(&mut state.builder))?;
            Ok(())
        })
    }

    fn job_only(&self, operation: &str) -> Result<(), QueryError> {
        match self.kind {
            SearchKind::Job { .. } => Ok(()),
            SearchKind::Offset { .. } => Err(QueryError::usage(format!(
                "{operation} is only supported by search-job queries"
            ))),
        }
    }

    /// Starts the filter with `key:value`.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] if a filter is already set.
    pub fn where_(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, QueryError> {
        self.where_filter(Filter::term(key, value))
    }

    /// Starts the filter with every pair AND-joined.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] if a filter is already set or `pairs` is empty.
    pub fn where_all<I, K, V>(&self, pairs: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let filter = Filter::all(pairs).ok_or_else(|| QueryError::usage("no filter pairs given"))?;
        self.where_filter(filter)
    }

    /// Starts the filter with a raw query string.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] if a filter is already set.
    pub fn where_raw(&self, query: impl Into<String>) -> Result<Self, QueryError> {
        self.where_filter(Filter::raw(query))
    }

    /// # Errors
    /// Returns [`QueryError::Usage`] if a filter is already set.
    pub fn where_filter(&self, filter: Filter) -> Result<Self, QueryError> {
        self.derive_filter(|builder| builder.where_(filter))
    }

    /// # Errors
    /// Returns [`QueryError::Usage`] if no filter is set yet.
    pub fn and_(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, QueryError> {
        self.and_filter(Filter::term(key, value))
    }

    /// # Errors
    /// Returns [`QueryError::Usage`] if no filter is set yet or `pairs` is empty.
    pub fn and_all<I, K, V>(&self, pairs: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let filter = Filter::all(pairs).ok_or_else(|| QueryError::usage("no filter pairs given"))?;
        self.and_filter(filter)
    }

    /// # Errors
    /// Returns [`QueryError::Usage`] if no filter is set yet.
    pub fn and_filter(&self, filter: Filter) -> Result<Self, QueryError> {
        self.derive_filter(|builder| builder.and_(filter))
    }

    /// # Errors
    /// Returns [`QueryError::Usage`] if no filter is set yet, or on offset
    /// queries, whose endpoints only AND their parameters.
    pub fn or_(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, QueryError> {
        self.or_filter(Filter::term(key, value))
    }

    /// # Errors
    /// Same as [`Query::or_`], and when `pairs` is empty.
    pub fn or_all<I, K, V>(&self, pairs: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let filter = Filter::all(pairs).ok_or_else(|| QueryError::usage("no filter pairs given"))?;
        self.or_filter(filter)
    }

    /// # Errors
    /// Same as [`Query::or_`].
    pub fn or_filter(&self, filter: Filter) -> Result<Self, QueryError> {
        if matches!(self.kind, SearchKind::Offset { .. }) {
            return Err(QueryError::usage("or_() is not supported by offset queries"));
        }
        self.derive_filter(|builder| builder.or_(filter))
    }

    /// Sets the page size, and for search jobs the `rows` body argument.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] unless `1 <= rows <= 5000`.
    pub fn set_rows(&self, rows: usize) -> Result<Self, QueryError> {
        self.derive(|state| state.set_rows(rows))
    }

    /// Adds a sort key, or changes the direction of an existing one.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] on offset queries.
    pub fn sort_by(&self, key: &str, direction: SortDirection) -> Result<Self, QueryError> {
        self.job_only("sort_by()")?;
        self.derive(|state| {
            state.sort_by(key, direction);
            Ok(())
        })
    }

    /// Restricts the job to a time window. Omitted fields keep their value.
    ///
    /// `start` and `end` are ISO 8601 timestamps; `window` is relative, such
    /// as `-2w`.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] on offset queries or for malformed values.
    pub fn set_time_range(
        &self,
        start: Option<&str>,
        end: Option<&str>,
        window: Option<&str>,
    ) -> Result<Self, QueryError> {
        self.job_only("set_time_range()")?;
        self.derive(|state| state.set_time_range(start, end, window))
    }

    /// Polling timeout in milliseconds; 0 waits indefinitely.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] on offset queries.
    pub fn timeout(&self, msecs: u64) -> Result<Self, QueryError> {
        self.job_only("timeout()")?;
        self.derive(|state| {
            state.set_timeout(msecs);
            Ok(())
        })
    }

    /// Adds an extra argument to the job submission body.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] on offset queries.
    pub fn with_body_arg(&self, key: &str, value: Value) -> Result<Self, QueryError> {
        self.job_only("with_body_arg()")?;
        self.derive(|state| {
            state.set_body_arg(key, value);
            Ok(())
        })
    }

    #[must_use]
    pub fn state(&self) -> &QueryState {
        &self.state
    }

    #[must_use]
    pub fn search_kind(&self) -> &SearchKind {
        &self.kind
    }

    /// Collapsed filter string, or `None` without a filter.
    #[must_use]
    pub fn filter_string(&self) -> Option<String> {
        self.state.builder().collapse()
    }

    /// Job lifecycle of a search-job query.
    #[must_use]
    pub fn job_state(&self) -> Option<&JobState> {
        match &self.engine {
            Engine::Job(job) => Some(job.state()),
            Engine::Offset(_) => None,
        }
    }

    /// Server-assigned job id once the job has been submitted.
    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        self.job_state().and_then(JobState::job_id)
    }

    /// Submits the search job.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] on offset queries or if already submitted.
    pub async fn submit(&mut self) -> Result<(), QueryError> {
        match &mut self.engine {
            Engine::Job(job) => job.submit(self.transport.as_ref(), &self.state).await,
            Engine::Offset(_) => Err(QueryError::usage(
                "submit() is only supported by search-job queries",
            )),
        }
    }

    /// Polls the search job once, submitting it first if needed.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] on offset queries, or the request error.
    pub async fn still_querying(&mut self) -> Result<bool, QueryError> {
        match &mut self.engine {
            Engine::Job(job) => {
                job.still_querying(self.transport.as_ref(), &self.state)
                    .await
            }
            Engine::Offset(_) => Err(QueryError::usage(
                "still_querying() is only supported by search-job queries",
            )),
        }
    }

    /// Total number of results. Cached after the first call.
    ///
    /// # Errors
    /// Returns the error of the request that failed, or
    /// [`QueryError::Timeout`] if the search job did not complete in time.
    pub async fn count(&mut self) -> Result<usize, QueryError> {
        let transport = self.transport.as_ref();
        match &mut self.engine {
            Engine::Offset(offset) => offset.count(transport, &self.state).await,
            Engine::Job(job) => job.count(transport, &self.state).await,
        }
    }

    /// Alias of [`Query::count`].
    ///
    /// # Errors
    /// See [`Query::count`].
    pub async fn len(&mut self) -> Result<usize, QueryError> {
        self.count().await
    }

    /// # Errors
    /// See [`Query::count`].
    pub async fn is_empty(&mut self) -> Result<bool, QueryError> {
        Ok(self.count().await? == 0)
    }

    /// Raw rows from `start`, at most `rows` of them when non-zero.
    pub fn search(
        &mut self,
        start: usize,
        rows: usize,
    ) -> BoxStream<'_, Result<Row, QueryError>> {
        let transport = self.transport.as_ref();
        match &mut self.engine {
            Engine::Offset(offset) => offset.search(transport, &self.state, start, rows).boxed(),
            Engine::Job(job) => job.search(transport, &self.state, start, rows).boxed(),
        }
    }

    /// Every result, materialized as `M`.
    pub fn stream(&mut self) -> impl Stream<Item = Result<M, QueryError>> + Send + '_ {
        self.search(0, 0).map_ok(M::from_row)
    }

    /// Collects every result.
    ///
    /// # Errors
    /// Returns the first error raised while paging.
    pub async fn all(&mut self) -> Result<Vec<M>, QueryError> {
        self.stream().try_collect().await
    }

    /// First result, or `None` when there are none.
    ///
    /// # Errors
    /// Returns the error of the request that failed.
    pub async fn first(&mut self) -> Result<Option<M>, QueryError> {
        let mut rows = self.search(0, 1);
        Ok(rows.try_next().await?.map(M::from_row))
    }

    /// The single result.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] unless exactly one result matches.
    pub async fn one(&mut self) -> Result<M, QueryError> {
        let total = self.count().await?;
        if total != 1 {
            return Err(QueryError::usage(format!(
                "{total} results found, expected exactly one"
            )));
        }
        self.first()
            .await?
            .ok_or_else(|| QueryError::usage("result disappeared while fetching it"))
    }

    /// Result at `index`.
    ///
    /// # Errors
    /// Returns [`QueryError::Index`] for a negative index or one at or past
    /// the total count.
    pub async fn get(&mut self, index: i64) -> Result<M, QueryError> {
        let len = self.count().await?;
        let out_of_range = QueryError::Index { index, len };
        let Ok(position) = usize::try_from(index) else {
            return Err(out_of_range);
        };
        if position >= len {
            return Err(out_of_range);
        }
        let mut rows = self.search(position, 1);
        rows.try_next()
            .await?
            .map(M::from_row)
            .ok_or(out_of_range)
    }

    /// Results in `slice`, paging only what the range covers.
    ///
    /// # Errors
    /// Returns [`QueryError::Usage`] for a step other than 1, or the error of
    /// the request that failed.
    pub async fn slice(&mut self, slice: impl Into<Slice>) -> Result<Vec<M>, QueryError> {
        let slice = slice.into();
        if slice.step.is_some_and(|step| step != 1) {
            return Err(QueryError::usage("stepped slices are not supported"));
        }
        let len = if slice.needs_len() {
            Some(self.count().await?)
        } else {
            None
        };
        let start = resolve_bound(slice.start.unwrap_or(0), len);
        let rows = match slice.stop.map(|stop| resolve_bound(stop, len)) {
            Some(stop) if stop <= start => return Ok(Vec::new()),
            Some(stop) => stop - start,
            None => 0,
        };
        self.search(start, rows)
            .map_ok(M::from_row)
            .try_collect()
            .await
    }
}
