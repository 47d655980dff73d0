/*!
The [`Queryable`] trait: statically typed decoding of query results.

`check_descriptor` runs once per prepared query against the output
descriptor and produces the per-type decode state (`Args`); `decode` then
runs per row. Shape mismatches therefore fail before any data is read, and
no dynamic fallback is attempted for concrete target types.
*/

use std::fmt;
use std::sync::Arc;

use bytes::Buf;
use snafu::ensure;
use uuid::Uuid;

use sedge_errors::{Error, ErrorKind, ProtocolEncodingError};

use crate::codec::{self, Codec};
use crate::descriptors::{Descriptor, TypePos, Typedesc};
use crate::errors::{self, DecodeError};
use crate::serialization::decode::RawCodec;

/// Per-query decoding switches, derived from the compilation options the
/// query was prepared with.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    pub has_implicit_id: bool,
    pub has_implicit_tid: bool,
    pub has_implicit_tname: bool,
}

/// A view over one descriptor stream used while checking target types.
pub struct DescriptorContext<'t> {
    pub(crate) descriptors: &'t [Descriptor],
    pub root_pos: Option<TypePos>,
    pub has_implicit_id: bool,
    pub has_implicit_tid: bool,
    pub has_implicit_tname: bool,
}

/// The target type does not match the shape the server described.
#[derive(Debug)]
pub struct DescriptorMismatch {
    description: String,
}

impl fmt::Display for DescriptorMismatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.description.fmt(f)
    }
}

impl std::error::Error for DescriptorMismatch {}

impl DescriptorContext<'_> {
    pub(crate) fn new(typedesc: &Typedesc) -> DescriptorContext<'_> {
        DescriptorContext {
            descriptors: typedesc.descriptors(),
            root_pos: typedesc.root_pos(),
            has_implicit_id: false,
            has_implicit_tid: false,
            has_implicit_tname: false,
        }
    }

    pub fn get(&self, type_pos: TypePos) -> Result<&Descriptor, DescriptorMismatch> {
        self.descriptors
            .get(type_pos.0 as usize)
            .ok_or_else(|| DescriptorMismatch {
                description: format!("unknown type position {}", type_pos.0),
            })
    }

    pub fn build_codec(&self, type_pos: TypePos) -> Result<Arc<dyn Codec>, Error> {
        codec::build_codec(Some(type_pos), self.descriptors)
            .map_err(ProtocolEncodingError::with_source)
    }

    pub fn wrong_type(&self, descriptor: &Descriptor, expected: &str) -> DescriptorMismatch {
        DescriptorMismatch {
            description: format!("expected {expected}, got {descriptor:?}"),
        }
    }

    pub fn field_number(&self, expected: usize, unexpected: usize) -> DescriptorMismatch {
        DescriptorMismatch {
            description: format!("expected {expected} fields, got {unexpected}"),
        }
    }

    pub fn expected(&self, description: impl fmt::Display) -> DescriptorMismatch {
        DescriptorMismatch {
            description: description.to_string(),
        }
    }
}

/// A type that query results decode into.
///
/// Implemented for scalars, containers and tuples here; structures derive it.
pub trait Queryable: Sized {
    type Args: Send + Sync;

    fn check_descriptor(
        ctx: &DescriptorContext,
        type_pos: TypePos,
    ) -> Result<Self::Args, DescriptorMismatch>;

    fn decode(decoder: &Decoder, args: &Self::Args, buf: &[u8]) -> Result<Self, DecodeError>;

    /// Decode an element that may carry the null marker instead of data.
    fn decode_optional(
        decoder: &Decoder,
        args: &Self::Args,
        buf: Option<&[u8]>,
    ) -> Result<Self, DecodeError> {
        match buf {
            Some(buf) => Self::decode(decoder, args, buf),
            None => errors::MissingRequiredElement.fail(),
        }
    }

    /// Whether an absent field is acceptable for this target type.
    fn accepts_null() -> bool {
        false
    }
}

pub(crate) fn check_scalar(
    ctx: &DescriptorContext,
    type_pos: TypePos,
    type_id: Uuid,
    name: &str,
) -> Result<(), DescriptorMismatch> {
    use Descriptor::{BaseScalar, Scalar};
    let desc = ctx.get(type_pos)?;
    match desc {
        Scalar(scalar) => {
            if scalar.id == type_id {
                return Ok(());
            }
            if let Some(base_pos) = scalar.base_type_pos() {
                return check_scalar(ctx, base_pos, type_id, name);
            }
        }
        BaseScalar(base) if base.id == type_id => return Ok(()),
        _ => {}
    }
    Err(ctx.wrong_type(desc, name))
}

/// Walks the `(reserved, length, data)` element sequence shared by tuples,
/// named tuples and objects.
pub struct RawFields<'t> {
    buf: &'t [u8],
    remaining: usize,
}

impl<'t> RawFields<'t> {
    pub fn new(mut buf: &'t [u8], expected: usize) -> Result<RawFields<'t>, DecodeError> {
        ensure!(buf.remaining() >= 4, errors::Underflow);
        let count = buf.get_u32() as usize;
        ensure!(count == expected, errors::ObjectSizeMismatch);
        Ok(RawFields {
            buf,
            remaining: count,
        })
    }

    pub fn read(&mut self) -> Result<Option<&'t [u8]>, DecodeError> {
        ensure!(self.remaining > 0, errors::ObjectSizeMismatch);
        self.remaining -= 1;
        ensure!(self.buf.remaining() >= 8, errors::Underflow);
        let _reserved = self.buf.get_i32();
        let len = self.buf.get_i32();
        if len < 0 {
            ensure!(len == -1, errors::InvalidMarker);
            return Ok(None);
        }
        let len = len as usize;
        ensure!(self.buf.remaining() >= len, errors::Underflow);
        let data = &self.buf[..len];
        self.buf.advance(len);
        Ok(Some(data))
    }

    pub fn finish(self) -> Result<(), DecodeError> {
        ensure!(self.remaining == 0, errors::ObjectSizeMismatch);
        ensure!(self.buf.is_empty(), errors::ExtraData);
        Ok(())
    }
}

/// One decodable field of an object or named-tuple shape.
pub struct StructField<'t> {
    pub name: &'t str,
    pub type_pos: TypePos,
    pub implicit: bool,
    pub required: bool,
}

/// The fields of an object shape or named tuple, in wire order.
pub fn struct_elements<'t>(
    ctx: &'t DescriptorContext<'t>,
    type_pos: TypePos,
) -> Result<Vec<StructField<'t>>, DescriptorMismatch> {
    match ctx.get(type_pos)? {
        Descriptor::ObjectShape(shape) => Ok(shape
            .elements
            .iter()
            .map(|el| StructField {
                name: &el.name,
                type_pos: el.type_pos,
                implicit: el.flag_implicit,
                required: !el.cardinality.map(|c| c.is_optional()).unwrap_or(false),
            })
            .collect()),
        Descriptor::NamedTuple(desc) => Ok(desc
            .elements
            .iter()
            .map(|el| StructField {
                name: &el.name,
                type_pos: el.type_pos,
                implicit: false,
                required: true,
            })
            .collect()),
        desc => Err(ctx.wrong_type(desc, "object shape")),
    }
}

macro_rules! implement_scalar {
    ($type:ty, $id:expr, $name:expr) => {
        impl Queryable for $type {
            type Args = ();
            fn check_descriptor(
                ctx: &DescriptorContext,
                type_pos: TypePos,
            ) -> Result<(), DescriptorMismatch> {
                check_scalar(ctx, type_pos, $id, $name)
            }
            fn decode(_decoder: &Decoder, _args: &(), buf: &[u8]) -> Result<Self, DecodeError> {
                RawCodec::decode(buf)
            }
        }
    };
}

implement_scalar!(String, codec::STD_STR, "std::str");
implement_scalar!(i16, codec::STD_INT16, "std::int16");
implement_scalar!(i32, codec::STD_INT32, "std::int32");
implement_scalar!(i64, codec::STD_INT64, "std::int64");
implement_scalar!(f32, codec::STD_FLOAT32, "std::float32");
implement_scalar!(f64, codec::STD_FLOAT64, "std::float64");
implement_scalar!(bool, codec::STD_BOOL, "std::bool");
implement_scalar!(uuid::Uuid, codec::STD_UUID, "std::uuid");
implement_scalar!(bytes::Bytes, codec::STD_BYTES, "std::bytes");
implement_scalar!(crate::model::Json, codec::STD_JSON, "std::json");
implement_scalar!(crate::model::Datetime, codec::STD_DATETIME, "std::datetime");
implement_scalar!(
    crate::model::LocalDatetime,
    codec::CAL_LOCAL_DATETIME,
    "cal::local_datetime"
);
implement_scalar!(
    crate::model::LocalDate,
    codec::CAL_LOCAL_DATE,
    "cal::local_date"
);
implement_scalar!(
    crate::model::LocalTime,
    codec::CAL_LOCAL_TIME,
    "cal::local_time"
);
implement_scalar!(crate::model::Duration, codec::STD_DURATION, "std::duration");
implement_scalar!(
    crate::model::RelativeDuration,
    codec::CAL_RELATIVE_DURATION,
    "cal::relative_duration"
);
implement_scalar!(
    crate::model::DateDuration,
    codec::CAL_DATE_DURATION,
    "cal::date_duration"
);
implement_scalar!(crate::model::BigInt, codec::STD_BIGINT, "std::bigint");
implement_scalar!(crate::model::Decimal, codec::STD_DECIMAL, "std::decimal");
implement_scalar!(
    crate::model::ConfigMemory,
    codec::CFG_MEMORY,
    "cfg::memory"
);

impl<T: Queryable> Queryable for Option<T> {
    type Args = T::Args;
    fn check_descriptor(
        ctx: &DescriptorContext,
        type_pos: TypePos,
    ) -> Result<Self::Args, DescriptorMismatch> {
        T::check_descriptor(ctx, type_pos)
    }
    fn decode(decoder: &Decoder, args: &Self::Args, buf: &[u8]) -> Result<Self, DecodeError> {
        T::decode(decoder, args, buf).map(Some)
    }
    fn decode_optional(
        decoder: &Decoder,
        args: &Self::Args,
        buf: Option<&[u8]>,
    ) -> Result<Self, DecodeError> {
        match buf {
            Some(buf) => T::decode(decoder, args, buf).map(Some),
            None => Ok(None),
        }
    }
    fn accepts_null() -> bool {
        true
    }
}

impl<T: Queryable> Queryable for Vec<T> {
    type Args = T::Args;
    fn check_descriptor(
        ctx: &DescriptorContext,
        type_pos: TypePos,
    ) -> Result<Self::Args, DescriptorMismatch> {
        match ctx.get(type_pos)? {
            Descriptor::Set(d) => T::check_descriptor(ctx, d.type_pos),
            Descriptor::Array(d) => T::check_descriptor(ctx, d.type_pos),
            desc => Err(ctx.wrong_type(desc, "array or set")),
        }
    }
    fn decode(decoder: &Decoder, args: &Self::Args, buf: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = buf;
        ensure!(buf.remaining() >= 12, errors::Underflow);
        let ndims = buf.get_u32();
        let _reserved0 = buf.get_u32();
        let _reserved1 = buf.get_u32();
        if ndims == 0 {
            ensure!(buf.remaining() == 0, errors::ExtraData);
            return Ok(Vec::new());
        }
        ensure!(ndims == 1, errors::InvalidArrayOrSetShape);
        ensure!(buf.remaining() >= 8, errors::Underflow);
        let size = buf.get_u32() as usize;
        let lower = buf.get_u32();
        ensure!(lower == 1, errors::InvalidArrayOrSetShape);
        let mut items = Vec::with_capacity(size);
        for _ in 0..size {
            ensure!(buf.remaining() >= 4, errors::Underflow);
            let len = buf.get_i32();
            ensure!(len >= 0, errors::InvalidMarker);
            let len = len as usize;
            ensure!(buf.remaining() >= len, errors::Underflow);
            items.push(T::decode(decoder, args, &buf[..len])?);
            buf.advance(len);
        }
        ensure!(buf.remaining() == 0, errors::ExtraData);
        Ok(items)
    }
}

fn tuple_positions(
    ctx: &DescriptorContext,
    type_pos: TypePos,
    expected: usize,
) -> Result<Vec<TypePos>, DescriptorMismatch> {
    match ctx.get(type_pos)? {
        Descriptor::Tuple(d) => {
            if d.element_types.len() != expected {
                return Err(ctx.field_number(expected, d.element_types.len()));
            }
            Ok(d.element_types.clone())
        }
        // Named tuples decode into plain tuples positionally.
        Descriptor::NamedTuple(d) => {
            if d.elements.len() != expected {
                return Err(ctx.field_number(expected, d.elements.len()));
            }
            Ok(d.elements.iter().map(|el| el.type_pos).collect())
        }
        desc => Err(ctx.wrong_type(desc, "tuple")),
    }
}

macro_rules! implement_tuple {
    ($count:expr, $($name:ident : $idx:tt),+) => {
        impl<$($name: Queryable),+> Queryable for ($($name,)+) {
            type Args = ($($name::Args,)+);
            fn check_descriptor(
                ctx: &DescriptorContext,
                type_pos: TypePos,
            ) -> Result<Self::Args, DescriptorMismatch> {
                let positions = tuple_positions(ctx, type_pos, $count)?;
                Ok(($($name::check_descriptor(ctx, positions[$idx])?,)+))
            }
            fn decode(
                decoder: &Decoder,
                args: &Self::Args,
                buf: &[u8],
            ) -> Result<Self, DecodeError> {
                let mut fields = RawFields::new(buf, $count)?;
                let result = ($(
                    {
                        let data = fields.read()?;
                        $name::decode_optional(decoder, &args.$idx, data)?
                    },
                )+);
                fields.finish()?;
                Ok(result)
            }
        }
    };
}

implement_tuple!(1, A: 0);
implement_tuple!(2, A: 0, B: 1);
implement_tuple!(3, A: 0, B: 1, C: 2);
implement_tuple!(4, A: 0, B: 1, C: 2, D: 3);
implement_tuple!(5, A: 0, B: 1, C: 2, D: 3, E: 4);
implement_tuple!(6, A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
