/*!
Low-level protocol implementation for the Sedge database client.

This crate owns the three layers between raw bytes and user values:

* **Framing and messages** — [`client_message`] and [`server_message`]
  define every frame of the binary protocol; [`encoding`] provides the
  tag-and-length framing and wire primitives.
* **Descriptors and codecs** — [`descriptors`] parses the server's
  self-describing type trees; [`codec`] turns them into encoder/decoder
  trees cached process-wide by type id.
* **Typed bridges** — [`queryable`] decodes rows into concrete Rust types,
  [`query_arg`] encodes arguments, and [`value`] is the dynamically typed
  fallback for both.

Applications normally use the `sedge-tokio` crate instead of this one.
*/

pub mod client_message;
pub mod codec;
pub mod common;
pub mod descriptors;
pub mod encoding;
pub mod errors;
pub mod features;
pub mod model;
pub mod query_arg;
pub mod query_result;
pub mod queryable;
pub mod serialization;
pub mod server_message;
pub mod value;

pub use query_result::QueryResult;
pub use queryable::Queryable;
