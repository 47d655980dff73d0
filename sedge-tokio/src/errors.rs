/*!
Error types, re-exported from the error crate with the typed fields the
client attaches to failures.
*/

pub use sedge_errors::*;

use sedge_protocol::server_message::CommandDataDescription;

/// The parsed description of the failing query, when parsing succeeded
/// before the failure.
pub struct Description;

impl fields::Field for Description {
    const NAME: &'static str = "description";
    type Value = CommandDataDescription;
}

/// Capabilities the failing query was parsed with, used to decide whether a
/// failed read-only query may be silently retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCapabilities {
    Unparsed,
    Parsed(sedge_protocol::common::Capabilities),
}

impl fields::Field for QueryCapabilities {
    const NAME: &'static str = "query_capabilities";
    type Value = QueryCapabilities;
}
