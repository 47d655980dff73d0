/*!
Raw connection and pool internals.

A [`Connection`] owns one authenticated wire channel and enforces the
one-command-at-a-time discipline; the [`Pool`] amortizes connection setup
and bounds concurrency. Application code uses the [`Client`](crate::Client)
façade instead of these types, which are exported for advanced use.
*/

mod connection;
mod pool;
mod queries;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use sedge_errors::{ClientCancellationError, Error, ErrorKind};
use sedge_protocol::common::{RawTypedesc, State as EncodedState};
use sedge_protocol::features::ProtocolVersion;
use sedge_protocol::server_message::TransactionState;

use crate::builder::Config;

pub use crate::state::State;

pub(crate) trait Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> Stream for T {}

/// One established, authenticated connection.
pub struct Connection {
    pub(crate) stream: Box<dyn Stream>,
    pub(crate) in_buf: BytesMut,
    pub(crate) proto: ProtocolVersion,
    pub(crate) mode: Mode,
    pub(crate) transaction_state: TransactionState,
    pub(crate) state_desc: RawTypedesc,
    pub(crate) server_params: ServerParams,
    pub(crate) key_data: Option<[u8; 32]>,
    pub(crate) command_lock: Arc<tokio::sync::Mutex<()>>,
}

/// Where the connection is in its request cycle.
///
/// `Dirty` marks a request in flight; a connection left dirty (the guard was
/// dropped mid-cycle) is inconsistent and must not be reused.
/// `AwaitingPing` marks an idle liveness check in flight: a bare `Sync` was
/// sent and the matching `ReadyForCommand` is outstanding.
#[derive(Debug)]
pub(crate) enum Mode {
    Normal { idle_since: Instant },
    Dirty,
    AwaitingPing,
}

/// Values accumulated from `ParameterStatus` frames.
#[derive(Debug, Default)]
pub struct ServerParams {
    params: HashMap<String, String>,
}

impl ServerParams {
    pub(crate) fn set(&mut self, name: String, value: String) {
        self.params.insert(name, value);
    }
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| &s[..])
    }
    /// The pool size the server recommends for this database.
    pub fn suggested_pool_concurrency(&self) -> Option<usize> {
        self.get("suggested_pool_concurrency")
            .and_then(|v| v.parse().ok())
    }
}

/// Holding this is mandatory for any frame exchange on the connection.
///
/// Waiters queue in FIFO order; the guard is released on scope exit,
/// including on error and on cancellation of the holder.
#[derive(Debug)]
pub struct CommandLockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl Connection {
    /// Wait for the per-connection command lock, up to `deadline`.
    pub async fn acquire_command_lock(
        &self,
        deadline: Duration,
    ) -> Result<CommandLockGuard, Error> {
        match tokio::time::timeout(deadline, self.command_lock.clone().lock_owned()).await {
            Ok(guard) => Ok(CommandLockGuard { _guard: guard }),
            Err(_) => Err(ClientCancellationError::with_message(
                "cancelled while waiting for the command lock",
            )),
        }
    }
}

/// A connection borrowed from the pool; returns itself on drop when healthy.
pub struct PoolConnection {
    pub(crate) inner: Option<Connection>,
    pub(crate) pool: Arc<PoolInner>,
    #[allow(dead_code)] // holding the permit is the point
    pub(crate) permit: OwnedSemaphorePermit,
}

/// A dynamically sized pool of connections to one server.
#[derive(Clone)]
pub struct Pool {
    pub(crate) inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    pub(crate) config: Config,
    pub(crate) semaphore: Arc<Semaphore>,
    pub(crate) idle: std::sync::Mutex<std::collections::VecDeque<Connection>>,
    pub(crate) resolved_size: AtomicUsize,
    pub(crate) size_adjusted: AtomicBool,
}

/// Result of one executed command.
#[derive(Debug)]
pub struct Response<T> {
    pub status: String,
    pub new_state: Option<EncodedState>,
    pub data: T,
}

impl<T> Response<T> {
    pub(crate) fn map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Response<U>, E> {
        Ok(Response {
            status: self.status,
            new_state: self.new_state,
            data: f(self.data)?,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_connection_pair() -> (Connection, tokio::io::DuplexStream) {
    let (client, server) = tokio::io::duplex(4096);
    let conn = Connection {
        stream: Box::new(client),
        in_buf: BytesMut::new(),
        proto: ProtocolVersion::current(),
        mode: Mode::Normal {
            idle_since: Instant::now(),
        },
        transaction_state: TransactionState::NotInTransaction,
        state_desc: RawTypedesc::uninitialized(),
        server_params: ServerParams::default(),
        key_data: None,
        command_lock: Arc::new(tokio::sync::Mutex::new(())),
    };
    (conn, server)
}

#[cfg(test)]
pub(crate) fn test_connection() -> Connection {
    let (conn, server) = test_connection_pair();
    // The far end is leaked so the near end never sees EOF.
    std::mem::forget(server);
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    use sedge_errors::ClientCancellationError;
    use tokio::time::{sleep, Duration, Instant};

    #[tokio::test]
    async fn command_lock_is_exclusive() {
        let conn = test_connection();
        let guard = conn
            .acquire_command_lock(Duration::from_secs(1))
            .await
            .unwrap();
        let err = conn
            .acquire_command_lock(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is::<ClientCancellationError>());
        drop(guard);
        conn.acquire_command_lock(Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn command_lock_waiter_succeeds_after_release() {
        let conn = Arc::new(test_connection());
        let guard = conn
            .acquire_command_lock(Duration::from_secs(1))
            .await
            .unwrap();

        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                conn.acquire_command_lock(Duration::from_secs(10))
                    .await
                    .unwrap();
                started.elapsed()
            })
        };

        sleep(Duration::from_millis(200)).await;
        drop(guard);
        let waited = waiter.await.unwrap();
        assert!(waited >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn ping_marks_connection_fresh() {
        use sedge_protocol::encoding::Output;
        use sedge_protocol::server_message::{ReadyForCommand, ServerMessage};
        use tokio::io::AsyncWriteExt;

        let (mut conn, mut far) = test_connection_pair();
        // Queue the reply up front; the pipe buffers it until the ping
        // reads.
        let mut frame = BytesMut::new();
        ServerMessage::ReadyForCommand(ReadyForCommand {
            annotations: Default::default(),
            transaction_state: TransactionState::NotInTransaction,
        })
        .encode(&mut Output::new(&ProtocolVersion::current(), &mut frame))
        .unwrap();
        far.write_all(&frame).await.unwrap();

        conn.ping().await.unwrap();
        assert!(conn.is_consistent());
        assert!(!conn.should_ping(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn failed_ping_poisons_connection() {
        let (mut conn, far) = test_connection_pair();
        drop(far);
        assert!(conn.ping().await.is_err());
        assert!(!conn.is_consistent());
    }
}
