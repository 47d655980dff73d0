/*!
Sedge database client for tokio.

The entry point is [`Client`]: a cheaply clonable handle over a connection
pool. Connections speak the framed binary protocol over TLS with ALPN,
authenticate with SCRAM-SHA-256, and are borrowed for one command at a
time.

```rust,no_run
# async fn run() -> Result<(), sedge_tokio::Error> {
use sedge_tokio::{Builder, Client};

let config = Builder::new()
    .host("localhost")
    .user("admin")
    .password("secret")
    .build()?;
let client = Client::new(config);
let value = client
    .query_required_single::<i64, _>("select 123", &())
    .await?;
assert_eq!(value, 123);
# Ok(())
# }
```

Derived façades share the pool but carry their own immutable session state:

```rust,no_run
# fn facades(client: sedge_tokio::Client) {
let in_module = client.with_default_module(Some("test_module"));
// `client` still uses the default module.
# }
```
*/

mod builder;
mod client;
mod options;
mod transaction;

pub mod errors;
pub mod raw;
pub mod state;
pub mod tls;

pub(crate) mod scram;

pub use builder::{Builder, ClientType, Config, TlsSecurity};
pub use client::Client;
pub use errors::Error;
pub use options::{IsolationLevel, RetryCondition, RetryOptions, TransactionOptions};
pub use transaction::Transaction;

#[cfg(feature = "derive")]
pub use sedge_derive::Queryable;

pub use sedge_protocol::model;
pub use sedge_protocol::value::Value;
pub use sedge_protocol::{QueryResult, Queryable};
