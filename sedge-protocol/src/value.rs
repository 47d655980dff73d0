/*!
The dynamically typed [Value] — the decode target when the caller does not
request a concrete Rust type, and the input to the argument encoders.
*/

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::codec::{NamedTupleShape, ObjectShape};
use crate::model::{
    BigInt, ConfigMemory, DateDuration, Datetime, Decimal, Duration, Json, LocalDate,
    LocalDatetime, LocalTime, Range, RelativeDuration,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nothing,
    Uuid(Uuid),
    Str(String),
    Bytes(Bytes),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    BigInt(BigInt),
    Decimal(Decimal),
    Bool(bool),
    Datetime(Datetime),
    LocalDatetime(LocalDatetime),
    LocalDate(LocalDate),
    LocalTime(LocalTime),
    Duration(Duration),
    RelativeDuration(RelativeDuration),
    DateDuration(DateDuration),
    Json(Json),
    ConfigMemory(ConfigMemory),
    Set(Vec<Value>),
    Object {
        shape: ObjectShape,
        fields: Vec<Option<Value>>,
    },
    SparseObject(SparseObject),
    Tuple(Vec<Value>),
    NamedTuple {
        shape: NamedTupleShape,
        fields: Vec<Value>,
    },
    Array(Vec<Value>),
    Enum(EnumValue),
    Range(Range<Box<Value>>),
}

/// An enum member, kept as its string name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumValue(pub(crate) Arc<str>);

/// A partial object: only the named fields are present, and a present field
/// may still hold an explicit empty set (`None`).
#[derive(Clone, Debug, PartialEq)]
pub struct SparseObject {
    pub(crate) fields: Vec<(String, Option<Value>)>,
}

impl Value {
    pub fn kind(&self) -> &'static str {
        use Value::*;
        match self {
            Nothing => "nothing",
            Uuid(..) => "uuid",
            Str(..) => "string",
            Bytes(..) => "bytes",
            Int16(..) => "int16",
            Int32(..) => "int32",
            Int64(..) => "int64",
            Float32(..) => "float32",
            Float64(..) => "float64",
            BigInt(..) => "bigint",
            Decimal(..) => "decimal",
            Bool(..) => "bool",
            Datetime(..) => "datetime",
            LocalDatetime(..) => "cal::local_datetime",
            LocalDate(..) => "cal::local_date",
            LocalTime(..) => "cal::local_time",
            Duration(..) => "duration",
            RelativeDuration(..) => "cal::relative_duration",
            DateDuration(..) => "cal::date_duration",
            Json(..) => "json",
            ConfigMemory(..) => "cfg::memory",
            Set(..) => "set",
            Object { .. } => "object",
            SparseObject(..) => "sparse_object",
            Tuple(..) => "tuple",
            NamedTuple { .. } => "named_tuple",
            Array(..) => "array",
            Enum(..) => "enum",
            Range { .. } => "range",
        }
    }

    pub fn empty_tuple() -> Value {
        Value::Tuple(Vec::new())
    }

    /// Fields of an object paired with their shape element metadata.
    pub fn object_fields(&self) -> Option<impl Iterator<Item = (&str, Option<&Value>)>> {
        match self {
            Value::Object { shape, fields } => Some(
                shape
                    .elements()
                    .iter()
                    .zip(fields)
                    .map(|(el, field)| (&el.name[..], field.as_ref())),
            ),
            _ => None,
        }
    }
}

impl EnumValue {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for EnumValue {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EnumValue {
    fn from(s: &str) -> EnumValue {
        EnumValue(s.into())
    }
}

impl From<String> for EnumValue {
    fn from(s: String) -> EnumValue {
        EnumValue(s.into())
    }
}

impl SparseObject {
    /// Fields are kept in insertion order; the codec maps them to shape
    /// indexes at encode time.
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (impl Into<String>, Option<Value>)>,
    ) -> SparseObject {
        SparseObject {
            fields: pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }
    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.fields
            .iter()
            .map(|(name, value)| (&name[..], value.as_ref()))
    }
}

macro_rules! implement_from {
    ($($variant:ident <- $type:ty),+ $(,)?) => {
        $(
            impl From<$type> for Value {
                fn from(value: $type) -> Value {
                    Value::$variant(value)
                }
            }
        )+
    }
}

implement_from! {
    Uuid <- Uuid,
    Str <- String,
    Bytes <- Bytes,
    Int16 <- i16,
    Int32 <- i32,
    Int64 <- i64,
    Float32 <- f32,
    Float64 <- f64,
    BigInt <- BigInt,
    Decimal <- Decimal,
    Bool <- bool,
    Datetime <- Datetime,
    Duration <- Duration,
    Json <- Json,
    Enum <- EnumValue,
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::Str(value.into())
    }
}
