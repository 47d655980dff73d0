use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Instant};

use sedge_errors::{
    ClientConnectionFailedTemporarilyError, ClientConnectionTimeoutError, ClientError, Error,
    ErrorKind, SHOULD_RECONNECT,
};
use sedge_protocol::server_message::TransactionState;

use crate::builder::{Config, DEFAULT_POOL_SIZE};
use crate::raw::{Connection, Pool, PoolConnection, PoolInner};

/// Connections idle longer than this are not reused.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Connections idle longer than this are pinged before reuse.
const PING_INTERVAL: Duration = Duration::from_secs(15);

impl Pool {
    pub fn new(config: Config) -> Pool {
        let size = config.max_connections.unwrap_or(DEFAULT_POOL_SIZE);
        Pool {
            inner: Arc::new(PoolInner {
                config,
                semaphore: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(VecDeque::new()),
                resolved_size: AtomicUsize::new(size),
                size_adjusted: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Borrow a connection, creating one if the pool has capacity.
    ///
    /// Callers queue in FIFO order when the pool is exhausted; waiting is
    /// bounded by the configured connect timeout.
    pub async fn acquire(&self) -> Result<PoolConnection, Error> {
        let permit = match timeout(
            self.inner.config.connect_timeout,
            self.inner.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ClientError::with_message("connection pool is closed")),
            Err(_) => {
                return Err(ClientConnectionTimeoutError::with_message(
                    "timed out waiting for a free pool connection",
                ));
            }
        };

        while let Some(mut conn) = self.inner.take_idle() {
            if !conn.is_consistent()
                || conn.transaction_state != TransactionState::NotInTransaction
                || conn.is_expired(MAX_IDLE)
            {
                // Stale or poisoned, replace it.
                drop(conn);
                continue;
            }
            if conn.should_ping(PING_INTERVAL) {
                if let Err(e) = conn.ping().await {
                    log::debug!("discarding idle connection: {e:#}");
                    continue;
                }
            }
            return Ok(PoolConnection {
                inner: Some(conn),
                pool: self.inner.clone(),
                permit,
            });
        }

        let conn = self.connect_with_wait().await?;
        self.inner.apply_suggested_size(&conn);
        Ok(PoolConnection {
            inner: Some(conn),
            pool: self.inner.clone(),
            permit,
        })
    }

    /// Connect, retrying temporary failures with backoff until
    /// `wait_until_available` elapses.
    async fn connect_with_wait(&self) -> Result<Connection, Error> {
        let config = &self.inner.config;
        let deadline = Instant::now() + config.wait_until_available;
        let mut warned = false;
        let mut attempt = 0u32;
        loop {
            match Connection::connect(config).await {
                Ok(conn) => return Ok(conn),
                Err(e)
                    if e.is::<ClientConnectionFailedTemporarilyError>()
                        || e.has_tag(SHOULD_RECONNECT) =>
                {
                    let pause = backoff_with_jitter(attempt);
                    if Instant::now() + pause > deadline {
                        return Err(e);
                    }
                    if !warned {
                        log::warn!(
                            "cannot establish connection to {}:{}: {:#}; retrying",
                            config.host,
                            config.port,
                            e
                        );
                        warned = true;
                    }
                    sleep(pause).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = 2u64.saturating_pow(attempt) * 100;
    Duration::from_millis(base + (rand::random::<f64>() * base as f64) as u64)
}

impl PoolInner {
    fn take_idle(&self) -> Option<Connection> {
        self.idle.lock().expect("pool idle lock").pop_front()
    }

    fn release(&self, conn: Connection) {
        if conn.is_consistent() && conn.transaction_state == TransactionState::NotInTransaction {
            self.idle.lock().expect("pool idle lock").push_back(conn);
        }
        // Otherwise the connection is dropped here, closing the socket;
        // the semaphore permit is returned by the guard either way.
    }

    /// With no explicit `max_connections`, shrink to the size the server
    /// suggested once the first connection reports it.
    fn apply_suggested_size(&self, conn: &Connection) {
        if self.config.max_connections.is_some() {
            return;
        }
        if self.size_adjusted.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(suggested) = conn.server_params().suggested_pool_concurrency() else {
            return;
        };
        let current = self.resolved_size.load(Ordering::SeqCst);
        if suggested > 0 && suggested < current {
            self.semaphore.forget_permits(current - suggested);
            self.resolved_size.store(suggested, Ordering::SeqCst);
            log::debug!("pool size adjusted to server-suggested {suggested}");
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.idle.lock().expect("pool idle lock").len()
    }
}

impl Drop for PoolConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.inner.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::raw::{test_connection, Mode};

    fn test_pool() -> Pool {
        Pool::new(Builder::new().host("localhost").build().unwrap())
    }

    #[tokio::test]
    async fn healthy_connection_returns_to_idle() {
        let pool = test_pool();
        pool.inner.release(test_connection());
        assert_eq!(pool.inner.idle_count(), 1);
    }

    #[tokio::test]
    async fn inconsistent_connection_is_destroyed() {
        let pool = test_pool();
        let mut conn = test_connection();
        conn.mode = Mode::Dirty;
        pool.inner.release(conn);
        assert_eq!(pool.inner.idle_count(), 0);
    }

    #[tokio::test]
    async fn connection_in_transaction_is_destroyed() {
        let pool = test_pool();
        let mut conn = test_connection();
        conn.transaction_state = TransactionState::InFailedTransaction;
        pool.inner.release(conn);
        assert_eq!(pool.inner.idle_count(), 0);
    }
}
