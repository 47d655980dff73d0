use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::str;

use bytes::Bytes;

use crate::fields::Field;
use crate::kinds::{error_name, tag_check};
use crate::traits::ErrorKind;

// Server-supplied error attributes we interpret on the client.
pub(crate) const FIELD_HINT: u16 = 0x0001;
pub(crate) const FIELD_DETAILS: u16 = 0x0002;
pub(crate) const FIELD_POSITION_START: u16 = 0xFFF1;
pub(crate) const FIELD_POSITION_END: u16 = 0xFFF2;

/// A capability bit attached to an error class, see [`Error::has_tag`].
#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub(crate) bit: u32,
}

/// Error returned by the client.
///
/// Carries the 32-bit error code (server-assigned or one of the client-side
/// `0xFF......` classes), a chain of context messages, an optional source
/// error, the raw server attributes, and typed fields attached by upper
/// layers (see [`crate::fields`]).
pub struct Error(pub(crate) Box<Inner>);

pub(crate) struct Inner {
    pub(crate) code: u32,
    pub(crate) messages: Vec<Cow<'static, str>>,
    pub(crate) error: Option<Box<dyn StdError + Send + Sync>>,
    pub(crate) headers: HashMap<u16, Bytes>,
    pub(crate) fields: HashMap<(&'static str, TypeId), Box<dyn Any + Send + Sync>>,
}

fn code_mask(code: u32) -> u32 {
    if code & 0x00FF_FFFF == 0 {
        0xFF00_0000
    } else if code & 0x0000_FFFF == 0 {
        0xFFFF_0000
    } else if code & 0x0000_00FF == 0 {
        0xFFFF_FF00
    } else {
        0xFFFF_FFFF
    }
}

impl Error {
    pub fn is<K: ErrorKind>(&self) -> bool {
        self.0.code & code_mask(K::CODE) == K::CODE
    }
    pub fn has_tag(&self, tag: Tag) -> bool {
        tag_check(self.0.code, tag.bit)
    }
    pub fn code(&self) -> u32 {
        self.0.code
    }
    pub fn kind_name(&self) -> &'static str {
        error_name(self.0.code)
    }
    /// The earliest message, which for server errors is the server's own.
    pub fn initial_message(&self) -> Option<&str> {
        self.0.messages.first().map(|m| &m[..])
    }
    /// Add a context message on top of the existing ones.
    pub fn context<M: Into<Cow<'static, str>>>(mut self, message: M) -> Error {
        self.0.messages.push(message.into());
        self
    }
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.0.error.as_deref()
    }

    /// Construct from a raw error code, e.g. one read off the wire.
    pub fn from_code(code: u32) -> Error {
        Error(Box::new(Inner {
            code,
            messages: Vec::new(),
            error: None,
            headers: HashMap::new(),
            fields: HashMap::new(),
        }))
    }
    pub fn with_message<M: Into<Cow<'static, str>>>(mut self, message: M) -> Error {
        self.0.messages.push(message.into());
        self
    }
    pub fn with_headers(mut self, headers: HashMap<u16, Bytes>) -> Error {
        self.0.headers = headers;
        self
    }
    pub fn headers(&self) -> &HashMap<u16, Bytes> {
        &self.0.headers
    }

    pub fn set<F: Field>(mut self, value: impl Into<F::Value>) -> Error {
        self.0
            .fields
            .insert((F::NAME, TypeId::of::<F::Value>()), Box::new(value.into()));
        self
    }
    pub fn get<F: Field>(&self) -> Option<&F::Value> {
        self.0
            .fields
            .get(&(F::NAME, TypeId::of::<F::Value>()))
            .and_then(|bx| bx.downcast_ref())
    }

    fn header_str(&self, field: u16) -> Option<&str> {
        self.0
            .headers
            .get(&field)
            .and_then(|v| str::from_utf8(v).ok())
    }
    fn header_usize(&self, field: u16) -> Option<usize> {
        self.header_str(field).and_then(|v| v.parse().ok())
    }
    pub fn hint(&self) -> Option<&str> {
        self.header_str(FIELD_HINT)
    }
    pub fn details(&self) -> Option<&str> {
        self.header_str(FIELD_DETAILS)
    }
    pub fn position_start(&self) -> Option<usize> {
        self.header_usize(FIELD_POSITION_START)
    }
    pub fn position_end(&self) -> Option<usize> {
        self.header_usize(FIELD_POSITION_END)
    }

    /// Refine a generic error into a more specific kind, keeping context.
    pub fn refine_kind<K: ErrorKind>(mut self) -> Error {
        self.0.code = K::CODE;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind_name())?;
        for msg in self.0.messages.iter().rev() {
            write!(f, ": {msg}")?;
        }
        if let Some(err) = &self.0.error {
            write!(f, ": {err}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind_name())?;
        for msg in self.0.messages.iter().rev() {
            write!(f, ": {msg}")?;
        }
        if let Some(err) = &self.0.error {
            write!(f, ": {err:#}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.error.as_ref().map(|b| b.as_ref() as _)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::*;
    use crate::traits::Sealed;

    #[test]
    fn kind_hierarchy() {
        let err = TransactionSerializationError::build();
        assert!(err.is::<TransactionSerializationError>());
        assert!(err.is::<TransactionConflictError>());
        assert!(err.is::<TransactionError>());
        assert!(err.is::<ExecutionError>());
        assert!(!err.is::<QueryError>());
        assert!(!err.is::<ClientError>());
    }

    #[test]
    fn retry_tags() {
        assert!(TransactionConflictError::build().has_tag(SHOULD_RETRY));
        assert!(ClientConnectionTimeoutError::build().has_tag(SHOULD_RETRY));
        assert!(ClientConnectionTimeoutError::build().has_tag(SHOULD_RECONNECT));
        assert!(!QueryError::build().has_tag(SHOULD_RETRY));
    }

    #[test]
    fn display_chains_messages() {
        let err = ClientConnectionError::with_message("tcp connect failed")
            .context("while opening connection");
        assert_eq!(
            err.to_string(),
            "ClientConnectionError: while opening connection: tcp connect failed"
        );
    }

    #[test]
    fn attribute_accessors() {
        let mut headers = HashMap::new();
        headers.insert(FIELD_HINT, Bytes::from_static(b"try harder"));
        headers.insert(FIELD_POSITION_START, Bytes::from_static(b"10"));
        headers.insert(FIELD_POSITION_END, Bytes::from_static(b"12"));
        let err = Error::from_code(EdgeQLSyntaxError::CODE).with_headers(headers);
        assert_eq!(err.hint(), Some("try harder"));
        assert_eq!(err.position_start(), Some(10));
        assert_eq!(err.position_end(), Some(12));
        assert_eq!(err.kind_name(), "EdgeQLSyntaxError");
    }
}
