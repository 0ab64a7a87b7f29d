//! Running a query to completion on a Tokio task.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use cbc_query::{Model, Query, QueryError};
use tokio::task::JoinHandle;

use crate::error::CbcError;

/// Handle to a query collecting its results in the background.
///
/// Awaiting it yields every result; dropping it leaves the task running.
#[must_use = "the results are only reachable through the handle"]
pub struct BackgroundQuery<M> {
    handle: JoinHandle<Result<Vec<M>, QueryError>>,
}

impl<M> BackgroundQuery<M> {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the task; awaiting afterwards yields [`CbcError::Join`].
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl<M> Future for BackgroundQuery<M> {
    type Output = Result<Vec<M>, CbcError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().handle)
            .poll(cx)
            .map(|joined| match joined {
                Ok(Ok(results)) => Ok(results),
                Ok(Err(err)) => Err(err.into()),
                Err(err) => Err(err.into()),
            })
    }
}

pub trait ExecuteAsync<M> {
    /// Spawns the query on the current runtime and returns at once.
    ///
    /// # Panics
    /// Panics outside a Tokio runtime.
    fn execute_async(self) -> BackgroundQuery<M>;
}

impl<M: Model> ExecuteAsync<M> for Query<M> {
    fn execute_async(mut self) -> BackgroundQuery<M> {
        let handle = tokio::spawn(async move {
            let results = self.all().await;
            tracing::debug!(ok = results.is_ok(), "background query finished");
            results
        });
        BackgroundQuery { handle }
    }
}
