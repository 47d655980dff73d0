/*!
Value types for the database scalars that have no direct Rust counterpart.

Temporal types use the server's epoch (2000-01-01) and microsecond
resolution; the arbitrary-precision numbers keep the wire representation
(base-10000 digits) so that values survive a round-trip bit-exactly.
*/

mod bignum;
mod json;
mod memory;
mod range;
mod time;

pub use bignum::{BigInt, Decimal};
pub use json::Json;
pub use memory::ConfigMemory;
pub use range::Range;
pub use time::{
    DateDuration, Datetime, Duration, LocalDate, LocalDatetime, LocalTime, RelativeDuration,
};

pub use uuid::Uuid;

/// An error returned when a value is outside of the range
/// representable by the target type.
#[derive(Debug, PartialEq, Eq)]
pub struct OutOfRangeError;

impl std::fmt::Display for OutOfRangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        "value is out of range".fmt(f)
    }
}

impl std::error::Error for OutOfRangeError {}

impl From<std::num::TryFromIntError> for OutOfRangeError {
    fn from(_: std::num::TryFromIntError) -> OutOfRangeError {
        OutOfRangeError
    }
}
