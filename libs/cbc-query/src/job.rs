//! Asynchronous search jobs: submit once, poll until every backend shard has
//! answered, then page the stored results.

use std::collections::VecDeque;
use std::time::Duration;

use futures_core::Stream;
use futures_util::stream;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::QueryError;
use crate::model::Row;
use crate::state::{CountCache, QueryState};
use crate::transport::{ApiRequest, Transport, count_field, fetch_object};

/// Delay between status polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Lifecycle of one search job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Unsubmitted,
    Submitted {
        job_id: String,
        submitted_at: Instant,
    },
    Polling {
        job_id: String,
        submitted_at: Instant,
    },
    Ready {
        job_id: String,
    },
    /// Terminal; every later call that needs results fails again
    TimedOut {
        job_id: String,
        timeout: Duration,
        elapsed: Duration,
    },
}

impl JobState {
    /// Server-assigned job id, once submitted.
    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobState::Unsubmitted => None,
            JobState::Submitted { job_id, .. }
            | JobState::Polling { job_id, .. }
            | JobState::Ready { job_id }
            | JobState::TimedOut { job_id, .. } => Some(job_id),
        }
    }

    fn submitted_at(&self) -> Option<Instant> {
        match self {
            JobState::Submitted { submitted_at, .. } | JobState::Polling { submitted_at, .. } => {
                Some(*submitted_at)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct JobSearch {
    org_key: String,
    state: JobState,
    counter: CountCache,
}

impl JobSearch {
    pub(crate) fn new(org_key: String) -> Self {
        Self {
            org_key,
            state: JobState::Unsubmitted,
            counter: CountCache::default(),
        }
    }

    pub(crate) fn state(&self) -> &JobState {
        &self.state
    }

    fn submit_path(&self) -> String {
        format!(
            "/api/investigate/v2/orgs/{}/enriched_events/search_jobs",
            self.org_key
        )
    }

    fn status_path(&self, job_id: &str) -> String {
        format!(
            "/api/investigate/v1/orgs/{}/enriched_events/search_jobs/{job_id}",
            self.org_key
        )
    }

    fn results_path(&self, job_id: &str) -> String {
        format!(
            "/api/investigate/v2/orgs/{}/enriched_events/search_jobs/{job_id}/results",
            self.org_key
        )
    }

    /// Submits the job. A job is submitted at most once per instance.
    pub(crate) async fn submit(
        &mut self,
        transport: &dyn Transport,
        state: &QueryState,
    ) -> Result<(), QueryError> {
        if let Some(job_id) = self.state.job_id() {
            return Err(QueryError::usage(format!(
                "query already submitted: token {job_id}"
            )));
        }

        let request = ApiRequest::post(self.submit_path(), state.job_body());
        let reply = fetch_object(transport, request).await?;
        let job_id = match reply.body.get("job_id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(reply.upstream("search job response carries no job_id")),
        };

        tracing::debug!(job_id = %job_id, org_key = %self.org_key, "search job submitted");
        self.state = JobState::Submitted {
            job_id,
            submitted_at: Instant::now(),
        };
        Ok(())
    }

    /// Polls the job once. Submits first if needed.
    ///
    /// Returns true while backends are still answering. Exceeding the timeout
    /// moves the job to [`JobState::TimedOut`] and returns false.
    pub(crate) async fn still_querying(
        &mut self,
        transport: &dyn Transport,
        state: &QueryState,
    ) -> Result<bool, QueryError> {
        if self.state == JobState::Unsubmitted {
            self.submit(transport, state).await?;
        }
        let (job_id, submitted_at) = match &self.state {
            JobState::Submitted {
                job_id,
                submitted_at,
            }
            | JobState::Polling {
                job_id,
                submitted_at,
            } => (job_id.clone(), *submitted_at),
            JobState::Unsubmitted | JobState::Ready { .. } | JobState::TimedOut { .. } => {
                return Ok(false);
            }
        };

        let reply = fetch_object(transport, ApiRequest::get(self.status_path(&job_id))).await?;
        let contacted = count_field(&reply.body, "contacted");
        let completed = count_field(&reply.body, "completed");
        tracing::debug!(job_id = %job_id, contacted, completed, "search job status");

        if contacted > 0 && completed >= contacted {
            self.state = JobState::Ready { job_id };
            return Ok(false);
        }

        let elapsed = submitted_at.elapsed();
        if let Some(timeout) = state.timeout()
            && elapsed >= timeout
        {
            tracing::warn!(job_id = %job_id, ?timeout, ?elapsed, "search job timed out");
            self.state = JobState::TimedOut {
                job_id,
                timeout,
                elapsed,
            };
            return Ok(false);
        }

        self.state = JobState::Polling {
            job_id,
            submitted_at,
        };
        Ok(true)
    }

    /// Polls until the job is ready and returns its id.
    async fn wait_ready(
        &mut self,
        transport: &dyn Transport,
        state: &QueryState,
    ) -> Result<String, QueryError> {
        while self.still_querying(transport, state).await? {
            tokio::time::sleep_until(self.next_poll(state)).await;
        }
        match &self.state {
            JobState::Ready { job_id } => Ok(job_id.clone()),
            JobState::TimedOut {
                timeout, elapsed, ..
            } => Err(QueryError::Timeout {
                timeout: *timeout,
                elapsed: *elapsed,
            }),
            JobState::Unsubmitted | JobState::Submitted { .. } | JobState::Polling { .. } => Err(
                QueryError::usage("search job stopped polling before it was ready"),
            ),
        }
    }

    /// Next poll instant, pulled forward to the deadline when one is near.
    fn next_poll(&self, state: &QueryState) -> Instant {
        let wake = Instant::now() + POLL_INTERVAL;
        match (state.timeout(), self.state.submitted_at()) {
            (Some(timeout), Some(submitted_at)) => wake.min(submitted_at + timeout),
            _ => wake,
        }
    }

    /// Number of available results, waiting for the job first.
    pub(crate) async fn count(
        &mut self,
        transport: &dyn Transport,
        state: &QueryState,
    ) -> Result<usize, QueryError> {
        if let Some(total) = self.counter.get() {
            return Ok(total);
        }
        let job_id = self.wait_ready(transport, state).await?;
        let reply = fetch_object(transport, ApiRequest::get(self.results_path(&job_id))).await?;
        let total = count_field(&reply.body, "num_available");
        self.counter.set(total);
        tracing::debug!(job_id = %job_id, total, "counted job results");
        Ok(total)
    }

    /// Streams results from `start`, stopping after `rows` rows when non-zero.
    pub(crate) fn search<'a>(
        &'a mut self,
        transport: &'a dyn Transport,
        state: &'a QueryState,
        start: usize,
        rows: usize,
    ) -> impl Stream<Item = Result<Row, QueryError>> + Send + 'a {
        let cursor = JobCursor {
            search: self,
            transport,
            state,
            job_id: None,
            buffer: VecDeque::new(),
            current: start,
            yielded: 0,
            limit: rows,
            done: false,
        };
        stream::try_unfold(cursor, |mut cursor| async move {
            Ok(cursor.next_row().await?.map(|row| (row, cursor)))
        })
    }
}

struct JobCursor<'a> {
    search: &'a mut JobSearch,
    transport: &'a dyn Transport,
    state: &'a QueryState,
    job_id: Option<String>,
    buffer: VecDeque<Row>,
    current: usize,
    yielded: usize,
    limit: usize,
    done: bool,
}

impl JobCursor<'_> {
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
            let job_id = match &self.job_id {
                Some(job_id) => {
                    if self.current >= self.search.counter.total() {
                        return Ok(None);
                    }
                    job_id.clone()
                }
                None => {
                    let job_id = self.search.wait_ready(self.transport, self.state).await?;
                    self.job_id = Some(job_id.clone());
                    job_id
                }
            };
            self.fetch_page(&job_id).await?;
        }
    }

    async fn fetch_page(&mut self, job_id: &str) -> Result<(), QueryError> {
        let request = ApiRequest::get(self.search.results_path(job_id))
            .with_query("start", self.current.to_string())
            .with_query("rows", self.state.batch_size().to_string());
        let mut reply = fetch_object(self.transport, request).await?;

        let total = count_field(&reply.body, "num_available");
        self.search.counter.set(total);
        let batch = reply.take_rows("results")?.unwrap_or_default();
        tracing::trace!(
            job_id = %job_id,
            start = self.current,
            rows = batch.len(),
            total,
            "fetched job page"
        );

        if batch.is_empty() {
            self.done = true;
        }
        self.buffer.extend(batch);
        Ok(())
    }
}
