/*!
Error types for the Sedge database client.

All fallible client APIs return [`Error`]. An error belongs to a class
identified by a 32-bit code; classes form a hierarchy queried with
[`Error::is`]:

```rust
# use sedge_errors::{ErrorKind, TransactionConflictError, ExecutionError};
let err = TransactionConflictError::build();
assert!(err.is::<ExecutionError>());
```

Whether an operation is worth retrying is a property of the class, exposed
through tags:

```rust
# use sedge_errors::{ErrorKind, TransactionConflictError, SHOULD_RETRY};
assert!(TransactionConflictError::build().has_tag(SHOULD_RETRY));
```
*/

mod error;
mod kinds;
mod traits;

pub mod fields;

pub use error::{Error, Tag};
pub use kinds::*;
pub use traits::{ErrorKind, Sealed};

pub type Result<T> = std::result::Result<T, Error>;
