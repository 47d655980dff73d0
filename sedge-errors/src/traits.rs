use std::borrow::Cow;
use std::collections::HashMap;
use std::error::Error as StdError;

use crate::error::{Error, Inner};

pub trait Sealed {
    const CODE: u32;
    const NAME: &'static str;
    const TAGS: u32;
}

/// A marker for a concrete error class.
///
/// Kinds form a hierarchy mirrored in the error code bytes: trailing zero
/// bytes of a kind's code are wildcards, so `Error::is::<QueryError>()`
/// matches every error in the `0x04......` class.
pub trait ErrorKind: Sealed {
    fn build() -> Error {
        Error(Box::new(Inner {
            code: Self::CODE,
            messages: Vec::new(),
            error: None,
            headers: HashMap::new(),
            fields: HashMap::new(),
        }))
    }
    fn with_message<M: Into<Cow<'static, str>>>(message: M) -> Error {
        let mut err = Self::build();
        err.0.messages.push(message.into());
        err
    }
    fn with_source<E: StdError + Send + Sync + 'static>(source: E) -> Error {
        let mut err = Self::build();
        err.0.error = Some(Box::new(source));
        err
    }
    fn with_source_box(source: Box<dyn StdError + Send + Sync>) -> Error {
        let mut err = Self::build();
        err.0.error = Some(source);
        err
    }
}
