/*!
Encoding of query arguments against the input shape of a prepared query.

Arguments are supplied positionally (tuples) or as a name→value map. Each
supplied value is encoded with the codec the server declared for that
element; a runtime type that does not match the declared codec is rejected,
so numeric narrowing never happens implicitly. Enum values coerce to their
string name only when the declared codec is the text scalar.
*/

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};

use sedge_errors::{ClientEncodingError, Error, ErrorKind};
use sedge_errors::{MissingArgumentError, QueryArgumentError};

use crate::descriptors::{Descriptor, TypePos};
use crate::model::{
    BigInt, ConfigMemory, DateDuration, Datetime, Decimal, Duration, Json, LocalDate,
    LocalDatetime, LocalTime, RelativeDuration,
};
use crate::queryable::DescriptorContext;
use crate::value::Value;

/// Encodes one argument pack into the wire format of the input shape.
pub struct Encoder<'t> {
    pub ctx: &'t DescriptorContext<'t>,
    buf: &'t mut BytesMut,
}

/// One element of the input shape.
struct InputElement<'t> {
    name: &'t str,
    type_pos: TypePos,
    optional: bool,
}

/// A complete argument pack.
pub trait QueryArgs: Send + Sync {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), Error>;
}

/// A single argument value.
pub trait QueryArg: Send + Sync {
    /// `None` encodes the null marker.
    fn to_value(&self) -> Option<Value>;
}

impl<'t> Encoder<'t> {
    pub fn new(ctx: &'t DescriptorContext<'t>, buf: &'t mut BytesMut) -> Encoder<'t> {
        Encoder { ctx, buf }
    }

    fn input_elements(&self) -> Result<Vec<InputElement<'t>>, Error> {
        let Some(root_pos) = self.ctx.root_pos else {
            return Ok(Vec::new());
        };
        let elements = match self.ctx.get(root_pos).map_err(describe_error)? {
            Descriptor::ObjectShape(shape) => shape
                .elements
                .iter()
                .map(|el| InputElement {
                    name: &el.name,
                    type_pos: el.type_pos,
                    optional: el.cardinality.map(|c| c.is_optional()).unwrap_or(false),
                })
                .collect(),
            Descriptor::InputShape(shape) => shape
                .elements
                .iter()
                .map(|el| InputElement {
                    name: &el.name,
                    type_pos: el.type_pos,
                    optional: el.cardinality.map(|c| c.is_optional()).unwrap_or(true),
                })
                .collect(),
            Descriptor::Tuple(tuple) if tuple.element_types.is_empty() => Vec::new(),
            desc => {
                return Err(QueryArgumentError::with_message(format!(
                    "unexpected input shape {desc:?}"
                )));
            }
        };
        Ok(elements)
    }

    fn encode_pack(
        &mut self,
        mut lookup: impl FnMut(usize, &str) -> Option<Option<Value>>,
        supplied: usize,
    ) -> Result<(), Error> {
        let elements = self.input_elements()?;
        if elements.len() != supplied {
            return Err(QueryArgumentError::with_message(format!(
                "expected {} arguments, got {}",
                elements.len(),
                supplied
            )));
        }
        if elements.is_empty() {
            return Ok(());
        }
        self.buf.reserve(4 + elements.len() * 8);
        self.buf.put_u32(elements.len() as u32);
        for (position, element) in elements.iter().enumerate() {
            let wire_position = element.name.parse::<usize>().unwrap_or(position);
            let value = lookup(wire_position, element.name).ok_or_else(|| {
                MissingArgumentError::with_message(format!(
                    "argument {:?} is missing",
                    element.name
                ))
            })?;
            self.buf.reserve(8);
            self.buf.put_i32(0);
            match value {
                Some(value) => {
                    let codec = self.ctx.build_codec(element.type_pos)?;
                    let base = self.buf.len();
                    self.buf.put_i32(0);
                    codec
                        .encode(self.buf, &value)
                        .map_err(ClientEncodingError::with_source)?;
                    let len = i32::try_from(self.buf.len() - base - 4).map_err(|_| {
                        ClientEncodingError::with_message("argument value too large")
                    })?;
                    self.buf[base..base + 4].copy_from_slice(&len.to_be_bytes());
                }
                None => {
                    if !element.optional {
                        return Err(MissingArgumentError::with_message(format!(
                            "argument {:?} is required",
                            element.name
                        )));
                    }
                    self.buf.put_i32(-1);
                }
            }
        }
        Ok(())
    }
}

fn describe_error(e: crate::queryable::DescriptorMismatch) -> Error {
    QueryArgumentError::with_source(e)
}

impl QueryArgs for () {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), Error> {
        encoder.encode_pack(|_, _| None, 0)
    }
}

impl QueryArgs for HashMap<&str, Value> {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), Error> {
        encoder.encode_pack(
            |_, name| self.get(name).map(|v| v.to_value()),
            self.len(),
        )
    }
}

impl QueryArgs for HashMap<String, Value> {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), Error> {
        encoder.encode_pack(
            |_, name| self.get(name).map(|v| v.to_value()),
            self.len(),
        )
    }
}

macro_rules! implement_query_args {
    ($count:expr, $($name:ident : $idx:tt),+) => {
        impl<$($name: QueryArg),+> QueryArgs for ($($name,)+) {
            fn encode(&self, encoder: &mut Encoder) -> Result<(), Error> {
                encoder.encode_pack(
                    |position, _| match position {
                        $( $idx => Some(self.$idx.to_value()), )+
                        _ => None,
                    },
                    $count,
                )
            }
        }
    };
}

implement_query_args!(1, A: 0);
implement_query_args!(2, A: 0, B: 1);
implement_query_args!(3, A: 0, B: 1, C: 2);
implement_query_args!(4, A: 0, B: 1, C: 2, D: 3);
implement_query_args!(5, A: 0, B: 1, C: 2, D: 3, E: 4);
implement_query_args!(6, A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

impl QueryArg for Value {
    fn to_value(&self) -> Option<Value> {
        match self {
            Value::Nothing => None,
            other => Some(other.clone()),
        }
    }
}

impl<T: QueryArg> QueryArg for Option<T> {
    fn to_value(&self) -> Option<Value> {
        self.as_ref().and_then(QueryArg::to_value)
    }
}

impl<T: QueryArg + Sync> QueryArg for &T {
    fn to_value(&self) -> Option<Value> {
        (*self).to_value()
    }
}

macro_rules! implement_query_arg {
    ($type:ty, $variant:ident) => {
        impl QueryArg for $type {
            fn to_value(&self) -> Option<Value> {
                Some(Value::$variant(self.clone()))
            }
        }
    };
}

implement_query_arg!(i16, Int16);
implement_query_arg!(i32, Int32);
implement_query_arg!(i64, Int64);
implement_query_arg!(f32, Float32);
implement_query_arg!(f64, Float64);
implement_query_arg!(bool, Bool);
implement_query_arg!(String, Str);
implement_query_arg!(uuid::Uuid, Uuid);
implement_query_arg!(bytes::Bytes, Bytes);
implement_query_arg!(Json, Json);
implement_query_arg!(Datetime, Datetime);
implement_query_arg!(LocalDatetime, LocalDatetime);
implement_query_arg!(LocalDate, LocalDate);
implement_query_arg!(LocalTime, LocalTime);
implement_query_arg!(Duration, Duration);
implement_query_arg!(RelativeDuration, RelativeDuration);
implement_query_arg!(DateDuration, DateDuration);
implement_query_arg!(BigInt, BigInt);
implement_query_arg!(Decimal, Decimal);
implement_query_arg!(ConfigMemory, ConfigMemory);

impl QueryArg for &str {
    fn to_value(&self) -> Option<Value> {
        Some(Value::Str((*self).to_owned()))
    }
}
