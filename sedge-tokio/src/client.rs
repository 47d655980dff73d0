/*!
The [`Client`] façade: a cheaply clonable handle over the connection pool,
carrying immutable per-façade options and session state.
*/

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::time::sleep;

use sedge_errors::{
    ClientCancellationError, ClientConnectionError, Error, ErrorKind, NoDataError,
    ParameterTypeMismatchError, StateMismatchError, SHOULD_RETRY,
};
use sedge_protocol::common::{Capabilities, Cardinality, CompilationOptions, IoFormat};
use sedge_protocol::model::Json;
use sedge_protocol::query_arg::QueryArgs;
use sedge_protocol::server_message::CommandDataDescription;
use sedge_protocol::value::Value;
use sedge_protocol::QueryResult;

use crate::builder::Config;
use crate::errors::QueryCapabilities;
use crate::options::{RetryCondition, RetryOptions, TransactionOptions};
use crate::raw::{Pool, Response};
use crate::state::PoolState;
use crate::transaction::{self, Transaction};

/// The database client.
///
/// Cheap to clone; every clone shares the same connection pool. The
/// `with_*` methods derive a new façade with modified options or session
/// state, leaving the original untouched.
#[derive(Clone)]
pub struct Client {
    pool: Pool,
    options: Arc<Options>,
    cache: Arc<QueryCache>,
}

#[derive(Debug, Default)]
pub(crate) struct Options {
    pub(crate) transaction: TransactionOptions,
    pub(crate) retry: RetryOptions,
    pub(crate) state: Arc<PoolState>,
}

/// Parsed-query cache shared by all façades of one pool.
///
/// Read-mostly: lookups take a lock-free snapshot, updates copy the map.
#[derive(Default)]
pub(crate) struct QueryCache {
    entries: ArcSwap<HashMap<QueryKey, Arc<CommandDataDescription>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct QueryKey {
    query: String,
    io_format: IoFormat,
    cardinality: Cardinality,
    capabilities: u64,
}

impl QueryCache {
    fn get(&self, key: &QueryKey) -> Option<Arc<CommandDataDescription>> {
        self.entries.load().get(key).cloned()
    }
    fn insert(&self, key: QueryKey, desc: CommandDataDescription) {
        let desc = Arc::new(desc);
        self.entries.rcu(|entries| {
            let mut entries = HashMap::clone(entries);
            entries.insert(key.clone(), desc.clone());
            entries
        });
    }
    fn remove(&self, key: &QueryKey) {
        self.entries.rcu(|entries| {
            let mut entries = HashMap::clone(entries);
            entries.remove(key);
            entries
        });
    }
}

impl Client {
    /// Create a client for the given configuration.
    ///
    /// Connections are established lazily; use [`Client::ensure_connected`]
    /// to fail fast.
    pub fn new(config: Config) -> Client {
        Client {
            pool: Pool::new(config),
            options: Arc::new(Options::default()),
            cache: Arc::new(QueryCache::default()),
        }
    }

    pub async fn ensure_connected(&self) -> Result<(), Error> {
        self.pool.acquire().await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &Pool {
        &self.pool
    }

    pub(crate) fn options(&self) -> &Arc<Options> {
        &self.options
    }

    /// Bound one command by the configured deadline. A command cut off
    /// mid-cycle leaves its connection inconsistent, so the pool destroys
    /// it instead of reusing a desynchronized channel.
    async fn with_command_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        match self.pool.config().command_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(ClientCancellationError::with_message("command timed out")),
            },
            None => fut.await,
        }
    }

    async fn query_helper<R, A>(
        &self,
        query: &str,
        arguments: &A,
        io_format: IoFormat,
        cardinality: Cardinality,
    ) -> Result<Response<Vec<R>>, Error>
    where
        A: QueryArgs,
        R: QueryResult,
    {
        let mut attempt = 0u32;
        loop {
            match self
                .query_once(query, arguments, io_format, cardinality)
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let may_retry = e.has_tag(SHOULD_RETRY)
                        && match e.get::<QueryCapabilities>() {
                            // Nothing was executed yet, or the query proved
                            // to be side-effect free.
                            None | Some(QueryCapabilities::Unparsed) => true,
                            Some(QueryCapabilities::Parsed(caps)) => {
                                !caps.intersects(Capabilities::MODIFICATIONS)
                            }
                        };
                    let rule = self.options.retry.rule(retry_condition(&e));
                    if !may_retry || attempt + 1 >= rule.attempts {
                        return Err(e);
                    }
                    log::info!("retrying query after {e:#} (attempt {attempt})");
                    sleep((rule.backoff)(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn query_once<R, A>(
        &self,
        query: &str,
        arguments: &A,
        io_format: IoFormat,
        cardinality: Cardinality,
    ) -> Result<Response<Vec<R>>, Error>
    where
        A: QueryArgs,
        R: QueryResult,
    {
        let allow_capabilities = Capabilities::ALL;
        let flags = CompilationOptions {
            implicit_limit: None,
            implicit_typenames: false,
            implicit_typeids: false,
            explicit_objectids: true,
            allow_capabilities,
            io_format,
            expected_cardinality: cardinality,
        };
        let key = QueryKey {
            query: query.into(),
            io_format,
            cardinality,
            capabilities: allow_capabilities.bits(),
        };
        let state = &*self.options.state;
        let mut conn = self.pool.acquire().await?;

        self.with_command_timeout(async {
            if let Some(desc) = self.cache.get(&key) {
                match conn
                    .inner()
                    .execute_with_description::<R, A>(&flags, query, state, &desc, arguments)
                    .await
                {
                    Ok(response) => return Ok(response),
                    // The server compiled the query against newer
                    // descriptors; drop the stale entry and re-parse
                    // exactly once.
                    Err(e)
                        if e.is::<ParameterTypeMismatchError>()
                            || e.is::<StateMismatchError>() =>
                    {
                        self.cache.remove(&key);
                    }
                    Err(e) => return Err(e),
                }
            }

            let desc = conn.inner().parse(&flags, query, state).await?;
            self.cache.insert(key, desc.clone());
            let result = conn
                .inner()
                .execute_with_description::<R, A>(&flags, query, state, &desc, arguments)
                .await;
            result.map_err(|e| {
                e.set::<QueryCapabilities>(QueryCapabilities::Parsed(desc.capabilities))
            })
        })
        .await
    }

    /// Run a query returning a set of results.
    pub async fn query<R, A>(&self, query: &str, arguments: &A) -> Result<Vec<R>, Error>
    where
        A: QueryArgs,
        R: QueryResult,
    {
        self.query_helper(query, arguments, IoFormat::Binary, Cardinality::Many)
            .await
            .map(|r| r.data)
    }

    /// Run a query returning at most one result.
    pub async fn query_single<R, A>(
        &self,
        query: &str,
        arguments: &A,
    ) -> Result<Option<R>, Error>
    where
        A: QueryArgs,
        R: QueryResult,
    {
        self.query_helper(query, arguments, IoFormat::Binary, Cardinality::AtMostOne)
            .await
            .map(|r| r.data.into_iter().next())
    }

    /// Run a query that must return exactly one result.
    pub async fn query_required_single<R, A>(
        &self,
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

    /// Run a query returning the whole result set as one JSON document.
    pub async fn query_json<A>(&self, query: &str, arguments: &A) -> Result<Json, Error>
    where
        A: QueryArgs,
    {
        let response = self
            .query_helper::<String, A>(query, arguments, IoFormat::Json, Cardinality::Many)
            .await?;
        let mut rows = response.data.into_iter();
        match (rows.next(), rows.next()) {
            (Some(row), None) => Ok(Json::new_unchecked(row)),
            _ => Err(
                sedge_errors::ProtocolError::with_message(
                    "JSON response must contain exactly one data frame",
                ),
            ),
        }
    }

    /// Run a query returning at most one result as a JSON document.
    pub async fn query_single_json<A>(
        &self,
        query: &str,
        arguments: &A,
    ) -> Result<Option<Json>, Error>
    where
        A: QueryArgs,
    {
        let response = self
            .query_helper::<String, A>(query, arguments, IoFormat::Json, Cardinality::AtMostOne)
            .await?;
        Ok(response.data.into_iter().next().map(Json::new_unchecked))
    }

    /// Run a query for its side effects, discarding any result.
    pub async fn execute<A>(&self, query: &str, arguments: &A) -> Result<(), Error>
    where
        A: QueryArgs,
    {
        let mut conn = self.pool.acquire().await?;
        self.with_command_timeout(async {
            conn.inner()
                .execute(query, arguments, &*self.options.state, Capabilities::ALL)
                .await?;
            Ok(())
        })
        .await
    }

    /// Run `body` inside a transaction, retrying it on retryable failures.
    ///
    /// The callback may run multiple times; keep it free of side effects
    /// outside the database.
    pub async fn transaction<T, B, F>(&self, body: B) -> Result<T, Error>
    where
        B: FnMut(Transaction) -> F,
        F: Future<Output = Result<T, Error>>,
    {
        transaction::run(self, body).await
    }

    /// Derive a façade with different transaction options.
    pub fn with_transaction_options(&self, transaction: TransactionOptions) -> Client {
        self.with_options(Options {
            transaction,
            retry: self.options.retry.clone(),
            state: self.options.state.clone(),
        })
    }

    /// Derive a façade with different retry options.
    pub fn with_retry_options(&self, retry: RetryOptions) -> Client {
        self.with_options(Options {
            transaction: self.options.transaction.clone(),
            retry,
            state: self.options.state.clone(),
        })
    }

    /// Derive a façade with a different default module.
    pub fn with_default_module(&self, module: Option<impl Into<String>>) -> Client {
        self.with_state(self.options.state.with_default_module(module.map(Into::into)))
    }

    /// Derive a façade with additional module aliases.
    pub fn with_aliases(
        &self,
        aliases: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Client {
        self.with_state(self.options.state.with_aliases(aliases))
    }

    /// Derive a façade with additional session config settings.
    pub fn with_config(
        &self,
        config: impl IntoIterator<Item = (impl Into<String>, impl Into<Value>)>,
    ) -> Client {
        self.with_state(self.options.state.with_config(config))
    }

    /// Derive a façade with additional global values.
    pub fn with_globals(
        &self,
        globals: impl IntoIterator<Item = (impl Into<String>, impl Into<Value>)>,
    ) -> Client {
        self.with_state(self.options.state.with_globals(globals))
    }

    /// The session state this façade ships with every command.
    pub fn state(&self) -> &PoolState {
        &self.options.state
    }

    fn with_state(&self, state: PoolState) -> Client {
        self.with_options(Options {
            transaction: self.options.transaction.clone(),
            retry: self.options.retry.clone(),
            state: Arc::new(state),
        })
    }

    fn with_options(&self, options: Options) -> Client {
        Client {
            pool: self.pool.clone(),
            options: Arc::new(options),
            cache: self.cache.clone(),
        }
    }
}

fn retry_condition(e: &Error) -> RetryCondition {
    if e.is::<ClientConnectionError>() {
        RetryCondition::NetworkError
    } else {
        RetryCondition::TransactionConflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn facade_derivation_leaves_parent_untouched() {
        let client = Client::new(Builder::new().host("localhost").build().unwrap());
        let derived = client
            .with_config([("allow_user_specified_id", Value::Bool(true))])
            .with_default_module(Some("test_module"));
        assert_eq!(derived.state().module(), Some("test_module"));
        assert_eq!(client.state().module(), None);
        assert!(client.state().is_default());
        assert!(!derived.state().is_default());
    }
}
