//! The prepared-statement surface shared by clients, pooled clients and transactions.

use crate::error::{OrmError, OrmResult};
use futures_core::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_postgres::types::ToSql;
use tokio_postgres::{CancelToken, Row, Statement};

/// Anything statements can be prepared and executed on.
pub trait GenericClient: Send + Sync {
    /// Prepare a statement on this connection.
    ///
    /// Prepared statements are **per-connection** and must not be used across connections.
    fn prepare_statement(
        &self,
        sql: &str,
    ) -> impl std::future::Future<Output = OrmResult<Statement>> + Send;

    /// Execute a prepared statement and return affected row count.
    fn execute_prepared(
        &self,
        stmt: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<u64>> + Send;

    /// Execute a prepared statement and stream its rows.
    fn query_prepared(
        &self,
        stmt: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<RowStream>> + Send;

    /// Token for best-effort server-side cancellation of the running query.
    fn cancel_token(&self) -> CancelToken;
}

impl GenericClient for tokio_postgres::Client {
    async fn prepare_statement(&self, sql: &str) -> OrmResult<Statement> {
        tokio_postgres::Client::prepare(self, sql)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn execute_prepared(
        &self,
        stmt: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<u64> {
        tokio_postgres::Client::execute(self, stmt, params)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn query_prepared(
        &self,
        stmt: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<RowStream> {
        let stream = tokio_postgres::Client::query_raw(self, stmt, params.iter().copied())
            .await
            .map_err(OrmError::from_db_error)?;
        Ok(RowStream::new(MapDbRowStream::new(stream)))
    }

    fn cancel_token(&self) -> CancelToken {
        tokio_postgres::Client::cancel_token(self)
    }
}

impl GenericClient for tokio_postgres::Transaction<'_> {
    async fn prepare_statement(&self, sql: &str) -> OrmResult<Statement> {
        tokio_postgres::Transaction::prepare(self, sql)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn execute_prepared(
        &self,
        stmt: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<u64> {
        tokio_postgres::Transaction::execute(self, stmt, params)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn query_prepared(
        &self,
        stmt: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<RowStream> {
        let stream = tokio_postgres::Transaction::query_raw(self, stmt, params.iter().copied())
            .await
            .map_err(OrmError::from_db_error)?;
        Ok(RowStream::new(MapDbRowStream::new(stream)))
    }

    fn cancel_token(&self) -> CancelToken {
        tokio_postgres::Transaction::cancel_token(self)
    }
}

// ===== deadpool-postgres support =====

impl GenericClient for deadpool_postgres::ClientWrapper {
    async fn prepare_statement(&self, sql: &str) -> OrmResult<Statement> {
        GenericClient::prepare_statement(&**self, sql).await
    }

    async fn execute_prepared(
        &self,
        stmt: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<u64> {
        GenericClient::execute_prepared(&**self, stmt, params).await
    }

    async fn query_prepared(
        &self,
        stmt: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<RowStream> {
        GenericClient::query_prepared(&**self, stmt, params).await
    }

    fn cancel_token(&self) -> CancelToken {
        GenericClient::cancel_token(&**self)
    }
}

impl GenericClient for deadpool_postgres::Client {
    async fn prepare_statement(&self, sql: &str) -> OrmResult<Statement> {
        // Delegate to the deref target (ClientWrapper / tokio_postgres::Client).
        GenericClient::prepare_statement(&**self, sql).await
    }

    async fn execute_prepared(
        &self,
        stmt: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<u64> {
        GenericClient::execute_prepared(&**self, stmt, params).await
    }

    async fn query_prepared(
        &self,
        stmt: &Statement,
        params: &[&(dyn ToSql + Sync)],
    ) -> OrmResult<RowStream> {
        GenericClient::query_prepared(&**self, stmt, params).await
    }

    fn cancel_token(&self) -> CancelToken {
        GenericClient::cancel_token(&**self)
    }
}

/// A stream of database rows.
///
/// Dropping the stream closes the server-side portal.
#[must_use]
pub struct RowStream {
    inner: Pin<Box<dyn Stream<Item = OrmResult<Row>> + Send>>,
}

impl RowStream {
    /// Create a new `RowStream` from any compatible stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = OrmResult<Row>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl Stream for RowStream {
    type Item = OrmResult<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

struct MapDbRowStream<S> {
    inner: Pin<Box<S>>,
}

impl<S> MapDbRowStream<S> {
    fn new(stream: S) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl<S> Stream for MapDbRowStream<S>
where
    S: Stream<Item = Result<Row, tokio_postgres::Error>> + Send + 'static,
{
    type Item = OrmResult<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(Ok(row))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(OrmError::from_db_error(e)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
