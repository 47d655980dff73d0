/*!
Callback-based transactions with automatic retry.

The driver pins one connection for the whole callback, issues
`START TRANSACTION` with the façade's options, and commits when the
callback returns `Ok`. A failure classified as retryable rolls back, sleeps
per the backoff policy and re-runs the callback from scratch, up to the
attempt limit.
*/

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::sleep;

use sedge_errors::{
    ClientConnectionError, Error, ErrorKind, InterfaceError, NoDataError, SHOULD_RETRY,
};
use sedge_protocol::common::{Capabilities, Cardinality, IoFormat};
use sedge_protocol::model::Json;
use sedge_protocol::query_arg::QueryArgs;
use sedge_protocol::server_message::TransactionState;
use sedge_protocol::QueryResult;

use crate::client::Client;
use crate::options::RetryCondition;
use crate::raw::PoolConnection;
use crate::state::PoolState;

/// The transactional façade handed to the callback.
///
/// All queries run on the single pinned connection, inside the open
/// transaction. There is deliberately no way to open a nested transaction,
/// and a façade kept alive past its callback refuses further queries.
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

pub(crate) struct TransactionInner {
    conn: Mutex<Option<PoolConnection>>,
    state: Arc<PoolState>,
}

impl Transaction {
    async fn with_conn<T>(
        &mut self,
        f: impl AsyncFnOnce(&mut PoolConnection, &PoolState) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| {
            InterfaceError::with_message("the transaction is no longer active")
        })?;
        f(conn, &self.inner.state).await
    }

    pub async fn query<R, A>(&mut self, query: &str, arguments: &A) -> Result<Vec<R>, Error>
    where
        A: QueryArgs,
        R: QueryResult,
    {
        self.with_conn(async |conn, state| {
            conn.inner()
                .query(
                    query,
                    arguments,
                    state,
                    Capabilities::ALL,
                    IoFormat::Binary,
                    Cardinality::Many,
                )
                .await
                .map(|r| r.data)
        })
        .await
    }

    pub async fn query_single<R, A>(
        &mut self,
        query: &str,
        arguments: &A,
    ) -> Result<Option<R>, Error>
    where
        A: QueryArgs,
        R: QueryResult,
    {
        self.with_conn(async |conn, state| {
            conn.inner()
                .query(
                    query,
                    arguments,
                    state,
                    Capabilities::ALL,
                    IoFormat::Binary,
                    Cardinality::AtMostOne,
                )
                .await
                .map(|r| r.data.into_iter().next())
        })
        .await
    }

    pub async fn query_required_single<R, A>(
        &mut self,
        query: &str,
        arguments: &A,
    ) -> Result<R, Error>
    where
        A: QueryArgs,
        R: QueryResult,
    {
        self.query_single(query, arguments)
            .await?
            .ok_or_else(|| NoDataError::with_message("query returned zero results"))
    }

    pub async fn query_json<A>(&mut self, query: &str, arguments: &A) -> Result<Json, Error>
    where
        A: QueryArgs,
    {
        self.with_conn(async |conn, state| {
            let response = conn
                .inner()
                .query::<String, A>(
                    query,
                    arguments,
                    state,
                    Capabilities::ALL,
                    IoFormat::Json,
                    Cardinality::Many,
                )
                .await?;
            let mut rows = response.data.into_iter();
            match (rows.next(), rows.next()) {
                (Some(row), None) => Ok(Json::new_unchecked(row)),
                _ => Err(sedge_errors::ProtocolError::with_message(
                    "JSON response must contain exactly one data frame",
                )),
            }
        })
        .await
    }

    pub async fn execute<A>(&mut self, query: &str, arguments: &A) -> Result<(), Error>
    where
        A: QueryArgs,
    {
        self.with_conn(async |conn, state| {
            conn.inner()
                .execute(query, arguments, state, Capabilities::ALL)
                .await
                .map(drop)
        })
        .await
    }
}

pub(crate) async fn run<T, B, F>(client: &Client, mut body: B) -> Result<T, Error>
where
    B: FnMut(Transaction) -> F,
    F: Future<Output = Result<T, Error>>,
{
    let options = client.options().clone();
    let mut attempt = 0u32;
    loop {
        let error = match attempt_once(client, &options, &mut body).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        let condition = if error.is::<ClientConnectionError>() {
            RetryCondition::NetworkError
        } else {
            RetryCondition::TransactionConflict
        };
        let rule = options.retry.rule(condition);
        if !error.has_tag(SHOULD_RETRY) || attempt + 1 >= rule.attempts {
            return Err(error);
        }
        log::info!("retrying transaction after {error:#} (attempt {attempt})");
        sleep((rule.backoff)(attempt)).await;
        attempt += 1;
    }
}

async fn attempt_once<T, B, F>(
    client: &Client,
    options: &crate::client::Options,
    body: &mut B,
) -> Result<T, Error>
where
    B: FnMut(Transaction) -> F,
    F: Future<Output = Result<T, Error>>,
{
    let mut conn = client.pool().acquire().await?;
    conn.statement(&options.transaction.start_command(), &*options.state)
        .await?;

    let inner = Arc::new(TransactionInner {
        conn: Mutex::new(Some(conn)),
        state: options.state.clone(),
    });
    let result = body(Transaction {
        inner: inner.clone(),
    })
    .await;

    let mut conn = inner
        .conn
        .lock()
        .await
        .take()
        .ok_or_else(|| InterfaceError::with_message("transaction connection was lost"))?;

    match result {
        Ok(value) => {
            conn.statement("COMMIT", &*options.state).await?;
            Ok(value)
        }
        Err(e) => {
            // Best-effort rollback. A connection this fails on is left
            // inconsistent and destroyed on return to the pool.
            if conn.inner().is_consistent()
                && conn.inner().transaction_state() != TransactionState::NotInTransaction
            {
                if let Err(rollback_err) =
                    conn.statement("ROLLBACK", &*options.state).await
                {
                    log::warn!("rollback failed: {rollback_err:#}");
                }
            }
            Err(e)
        }
    }
}
