//! Typed fields that can be attached to an [`Error`](crate::Error).
//!
//! Downstream crates define their own markers to piggyback structured
//! context on errors without widening the `Error` type itself.

/// Marker type for a typed error field.
pub trait Field {
    const NAME: &'static str;
    type Value: Send + Sync + 'static;
}

/// The query text the error relates to.
pub struct QueryText;

impl Field for QueryText {
    const NAME: &'static str = "query_text";
    type Value = String;
}
