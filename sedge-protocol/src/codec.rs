/*!
Codecs translate between wire bytes and [`Value`]s.

A codec tree mirrors one descriptor stream ([`build_codec`]); every codec is
cached process-wide by its 128-bit type id in the [`registry`], which is
seeded with the well-known scalars and grows insert-only as composite
descriptors arrive.
*/

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, LazyLock, RwLock};

use bytes::{Buf, BufMut, BytesMut};
use snafu::{ensure, OptionExt, ResultExt};
use uuid::Uuid;

use crate::common::Cardinality;
use crate::descriptors::{self, Descriptor, TypePos};
use crate::errors::{self, invalid_value, CodecError, DecodeError, EncodeError};
use crate::model::{
    BigInt as BigIntValue, ConfigMemory as ConfigMemoryValue, DateDuration as DateDurationValue,
    Datetime as DatetimeValue, Decimal as DecimalValue, Duration as DurationValue, Json as JsonValue,
    LocalDate as LocalDateValue, LocalDatetime as LocalDatetimeValue, LocalTime as LocalTimeValue,
    Range, RelativeDuration as RelativeDurationValue,
};
use crate::value::{EnumValue, SparseObject, Value};

pub const STD_UUID: Uuid = Uuid::from_u128(0x100);
pub const STD_STR: Uuid = Uuid::from_u128(0x101);
pub const STD_BYTES: Uuid = Uuid::from_u128(0x102);
pub const STD_INT16: Uuid = Uuid::from_u128(0x103);
pub const STD_INT32: Uuid = Uuid::from_u128(0x104);
pub const STD_INT64: Uuid = Uuid::from_u128(0x105);
pub const STD_FLOAT32: Uuid = Uuid::from_u128(0x106);
pub const STD_FLOAT64: Uuid = Uuid::from_u128(0x107);
pub const STD_DECIMAL: Uuid = Uuid::from_u128(0x108);
pub const STD_BOOL: Uuid = Uuid::from_u128(0x109);
pub const STD_DATETIME: Uuid = Uuid::from_u128(0x10a);
pub const CAL_LOCAL_DATETIME: Uuid = Uuid::from_u128(0x10b);
pub const CAL_LOCAL_DATE: Uuid = Uuid::from_u128(0x10c);
pub const CAL_LOCAL_TIME: Uuid = Uuid::from_u128(0x10d);
pub const STD_DURATION: Uuid = Uuid::from_u128(0x10e);
pub const STD_JSON: Uuid = Uuid::from_u128(0x10f);
pub const STD_BIGINT: Uuid = Uuid::from_u128(0x110);
pub const CAL_RELATIVE_DURATION: Uuid = Uuid::from_u128(0x111);
pub const CAL_DATE_DURATION: Uuid = Uuid::from_u128(0x112);
pub const CFG_MEMORY: Uuid = Uuid::from_u128(0x130);
pub const PSEUDO_EMPTY_TUPLE: Uuid = Uuid::from_u128(0xFF);

/// A paired encoder/decoder for one wire shape.
pub trait Codec: fmt::Debug + Send + Sync + 'static {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError>;
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError>;
}

/// The process-wide codec cache, keyed by type id.
pub struct CodecRegistry {
    codecs: RwLock<HashMap<Uuid, Arc<dyn Codec>>>,
}

static REGISTRY: LazyLock<CodecRegistry> = LazyLock::new(CodecRegistry::seeded);

pub fn registry() -> &'static CodecRegistry {
    &REGISTRY
}

impl CodecRegistry {
    fn seeded() -> CodecRegistry {
        let mut codecs: HashMap<Uuid, Arc<dyn Codec>> = HashMap::new();
        codecs.insert(STD_UUID, Arc::new(UuidCodec));
        codecs.insert(STD_STR, Arc::new(Str));
        codecs.insert(STD_BYTES, Arc::new(BytesCodec));
        codecs.insert(STD_INT16, Arc::new(Int16));
        codecs.insert(STD_INT32, Arc::new(Int32));
        codecs.insert(STD_INT64, Arc::new(Int64));
        codecs.insert(STD_FLOAT32, Arc::new(Float32));
        codecs.insert(STD_FLOAT64, Arc::new(Float64));
        codecs.insert(STD_DECIMAL, Arc::new(Decimal));
        codecs.insert(STD_BOOL, Arc::new(Bool));
        codecs.insert(STD_DATETIME, Arc::new(Datetime));
        codecs.insert(CAL_LOCAL_DATETIME, Arc::new(LocalDatetime));
        codecs.insert(CAL_LOCAL_DATE, Arc::new(LocalDate));
        codecs.insert(CAL_LOCAL_TIME, Arc::new(LocalTime));
        codecs.insert(STD_DURATION, Arc::new(Duration));
        codecs.insert(STD_JSON, Arc::new(Json));
        codecs.insert(STD_BIGINT, Arc::new(BigInt));
        codecs.insert(CAL_RELATIVE_DURATION, Arc::new(RelativeDuration));
        codecs.insert(CAL_DATE_DURATION, Arc::new(DateDuration));
        codecs.insert(CFG_MEMORY, Arc::new(ConfigMemory));
        codecs.insert(PSEUDO_EMPTY_TUPLE, Arc::new(TupleCodec { elements: vec![] }));
        CodecRegistry {
            codecs: RwLock::new(codecs),
        }
    }

    pub fn lookup(&self, id: &Uuid) -> Option<Arc<dyn Codec>> {
        self.codecs
            .read()
            .expect("codec registry lock is not poisoned")
            .get(id)
            .cloned()
    }

    /// Entries are insert-only: a second registration under the same id is
    /// dropped, since descriptors sharing an id describe equivalent shapes.
    fn register(&self, id: Uuid, codec: &Arc<dyn Codec>) {
        self.codecs
            .write()
            .expect("codec registry lock is not poisoned")
            .entry(id)
            .or_insert_with(|| codec.clone());
    }
}

/// Find the codec for a well-known scalar id.
pub fn scalar_codec(uuid: &Uuid) -> Result<Arc<dyn Codec>, CodecError> {
    registry()
        .lookup(uuid)
        .context(errors::UndefinedBaseScalar { uuid: *uuid })
}

/// Build (or fetch from the registry) the codec tree rooted at `root_pos`.
pub fn build_codec(
    root_pos: Option<TypePos>,
    descriptors: &[Descriptor],
) -> Result<Arc<dyn Codec>, CodecError> {
    let builder = CodecBuilder { descriptors };
    match root_pos {
        Some(pos) => builder.build(pos),
        None => Ok(Arc::new(NothingCodec)),
    }
}

struct CodecBuilder<'a> {
    descriptors: &'a [Descriptor],
}

impl CodecBuilder<'_> {
    fn get(&self, pos: TypePos) -> Result<&Descriptor, CodecError> {
        self.descriptors
            .get(pos.0 as usize)
            .context(errors::UnexpectedTypePos { position: pos.0 })
    }

    fn build(&self, pos: TypePos) -> Result<Arc<dyn Codec>, CodecError> {
        use Descriptor as D;
        let descriptor = self.get(pos)?;
        let id = descriptor.id();
        if !id.is_nil() {
            if let Some(codec) = registry().lookup(&id) {
                return Ok(codec);
            }
        }
        let codec: Arc<dyn Codec> = match descriptor {
            D::BaseScalar(base) => scalar_codec(&base.id)?,
            D::Scalar(d) => match d.base_type_pos() {
                Some(base_pos) => self.build(base_pos)?,
                None => scalar_codec(&d.id)?,
            },
            D::Enumeration(d) => Arc::new(EnumCodec::new(&d.members)),
            D::ObjectShape(d) => Arc::new(ObjectCodec::build(d, self)?),
            D::InputShape(d) => Arc::new(SparseObjectCodec::build(d, self)?),
            D::Set(d) => {
                let enveloped = matches!(self.get(d.type_pos)?, D::Array(_));
                Arc::new(SetCodec {
                    element: self.build(d.type_pos)?,
                    enveloped,
                })
            }
            D::Array(d) => Arc::new(ArrayCodec {
                element: self.build(d.type_pos)?,
            }),
            D::Tuple(d) => Arc::new(TupleCodec {
                elements: d
                    .element_types
                    .iter()
                    .map(|&p| self.build(p))
                    .collect::<Result<_, _>>()?,
            }),
            D::NamedTuple(d) => Arc::new(NamedTupleCodec::build(d, self)?),
            D::Range(d) => Arc::new(RangeCodec {
                element: self.build(d.type_pos)?,
            }),
            D::Object(_) | D::Compound(_) | D::MultiRange(_) | D::TypeAnnotation(_) => {
                return errors::UnexpectedDescriptorKind { position: pos.0 }.fail();
            }
        };
        if !id.is_nil() {
            registry().register(id, &codec);
        }
        Ok(codec)
    }
}

/// Field metadata of an object shape, shared by every decoded row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectShape(Arc<ObjectShapeInfo>);

#[derive(Debug, PartialEq, Eq)]
pub struct ObjectShapeInfo {
    pub elements: Vec<ShapeElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeElement {
    pub flag_implicit: bool,
    pub flag_link_property: bool,
    pub flag_link: bool,
    pub cardinality: Option<Cardinality>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTupleShape(Arc<NamedTupleShapeInfo>);

#[derive(Debug, PartialEq, Eq)]
pub struct NamedTupleShapeInfo {
    pub names: Vec<String>,
}

impl ObjectShape {
    pub fn new(elements: Vec<ShapeElement>) -> ObjectShape {
        ObjectShape(Arc::new(ObjectShapeInfo { elements }))
    }
    pub fn elements(&self) -> &[ShapeElement] {
        &self.0.elements
    }
}

impl Deref for ObjectShape {
    type Target = ObjectShapeInfo;
    fn deref(&self) -> &ObjectShapeInfo {
        &self.0
    }
}

impl From<&[descriptors::ShapeElement]> for ObjectShape {
    fn from(elements: &[descriptors::ShapeElement]) -> ObjectShape {
        ObjectShape::new(
            elements
                .iter()
                .map(|e| ShapeElement {
                    flag_implicit: e.flag_implicit,
                    flag_link_property: e.flag_link_property,
                    flag_link: e.flag_link,
                    cardinality: e.cardinality,
                    name: e.name.clone(),
                })
                .collect(),
        )
    }
}

impl NamedTupleShape {
    pub fn new(names: Vec<String>) -> NamedTupleShape {
        NamedTupleShape(Arc::new(NamedTupleShapeInfo { names }))
    }
    pub fn names(&self) -> &[String] {
        &self.0.names
    }
}

impl ShapeElement {
    pub fn is_implicit(&self) -> bool {
        self.flag_implicit
    }
}

#[derive(Debug)]
struct NothingCodec;

#[derive(Debug)]
pub struct Int16;
#[derive(Debug)]
pub struct Int32;
#[derive(Debug)]
pub struct Int64;
#[derive(Debug)]
pub struct Float32;
#[derive(Debug)]
pub struct Float64;
#[derive(Debug)]
pub struct Str;
#[derive(Debug)]
pub struct BytesCodec;
#[derive(Debug)]
pub struct UuidCodec;
#[derive(Debug)]
pub struct Bool;
#[derive(Debug)]
pub struct Datetime;
#[derive(Debug)]
pub struct LocalDatetime;
#[derive(Debug)]
pub struct LocalDate;
#[derive(Debug)]
pub struct LocalTime;
#[derive(Debug)]
pub struct Duration;
#[derive(Debug)]
pub struct RelativeDuration;
#[derive(Debug)]
pub struct DateDuration;
#[derive(Debug)]
pub struct Json;
#[derive(Debug)]
pub struct BigInt;
#[derive(Debug)]
pub struct Decimal;
#[derive(Debug)]
pub struct ConfigMemory;

#[derive(Debug)]
pub struct EnumCodec {
    members: HashSet<Arc<str>>,
}

#[derive(Debug)]
pub struct TupleCodec {
    elements: Vec<Arc<dyn Codec>>,
}

#[derive(Debug)]
pub struct NamedTupleCodec {
    shape: NamedTupleShape,
    codecs: Vec<Arc<dyn Codec>>,
}

#[derive(Debug)]
pub struct ObjectCodec {
    shape: ObjectShape,
    codecs: Vec<Arc<dyn Codec>>,
}

#[derive(Debug)]
pub struct SparseObjectCodec {
    names: Vec<String>,
    codecs: Vec<Arc<dyn Codec>>,
}

#[derive(Debug)]
pub struct ArrayCodec {
    element: Arc<dyn Codec>,
}

#[derive(Debug)]
pub struct SetCodec {
    element: Arc<dyn Codec>,
    enveloped: bool,
}

#[derive(Debug)]
pub struct RangeCodec {
    element: Arc<dyn Codec>,
}

fn ensure_exact_size(buf: &[u8], expected: usize) -> Result<(), DecodeError> {
    ensure!(buf.len() >= expected, errors::Underflow);
    ensure!(buf.len() <= expected, errors::ExtraData);
    Ok(())
}

/// Write one length-prefixed element body.
fn encode_element(
    buf: &mut BytesMut,
    codec: &dyn Codec,
    value: &Value,
) -> Result<(), EncodeError> {
    buf.reserve(4);
    let base = buf.len();
    buf.put_i32(0);
    codec.encode(buf, value)?;
    let len = i32::try_from(buf.len() - base - 4)
        .ok()
        .context(errors::ElementTooLong)?;
    buf[base..base + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

impl Codec for NothingCodec {
    fn decode(&self, _buf: &[u8]) -> Result<Value, DecodeError> {
        Ok(Value::Nothing)
    }
    fn encode(&self, _buf: &mut BytesMut, _value: &Value) -> Result<(), EncodeError> {
        Ok(())
    }
}

impl Codec for Int16 {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 2)?;
        Ok(Value::Int16(buf.get_i16()))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::Int16(value) = value else {
            return Err(invalid_value("int16", value));
        };
        buf.reserve(2);
        buf.put_i16(value);
        Ok(())
    }
}

impl Codec for Int32 {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 4)?;
        Ok(Value::Int32(buf.get_i32()))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::Int32(value) = value else {
            return Err(invalid_value("int32", value));
        };
        buf.reserve(4);
        buf.put_i32(value);
        Ok(())
    }
}

impl Codec for Int64 {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 8)?;
        Ok(Value::Int64(buf.get_i64()))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::Int64(value) = value else {
            return Err(invalid_value("int64", value));
        };
        buf.reserve(8);
        buf.put_i64(value);
        Ok(())
    }
}

impl Codec for Float32 {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 4)?;
        Ok(Value::Float32(buf.get_f32()))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::Float32(value) = value else {
            return Err(invalid_value("float32", value));
        };
        buf.reserve(4);
        buf.put_f32(value);
        Ok(())
    }
}

impl Codec for Float64 {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 8)?;
        Ok(Value::Float64(buf.get_f64()))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::Float64(value) = value else {
            return Err(invalid_value("float64", value));
        };
        buf.reserve(8);
        buf.put_f64(value);
        Ok(())
    }
}

impl Codec for Str {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let text = std::str::from_utf8(buf).context(errors::InvalidUtf8)?;
        Ok(Value::Str(text.to_owned()))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let text = match value {
            Value::Str(text) => &text[..],
            // Enum members encode as their string name when the target is
            // the text scalar.
            Value::Enum(val) => val.name(),
            _ => return Err(invalid_value("str", value)),
        };
        buf.extend_from_slice(text.as_bytes());
        Ok(())
    }
}

impl Codec for BytesCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        Ok(Value::Bytes(bytes::Bytes::copy_from_slice(buf)))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Bytes(value) = value else {
            return Err(invalid_value("bytes", value));
        };
        buf.extend_from_slice(value);
        Ok(())
    }
}

impl Codec for UuidCodec {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 16)?;
        let mut bytes = [0u8; 16];
        buf.copy_to_slice(&mut bytes);
        Ok(Value::Uuid(Uuid::from_bytes(bytes)))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::Uuid(value) = value else {
            return Err(invalid_value("uuid", value));
        };
        buf.extend_from_slice(value.as_bytes());
        Ok(())
    }
}

impl Codec for Bool {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 1)?;
        match buf[0] {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            val => errors::InvalidBool { val }.fail(),
        }
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::Bool(value) = value else {
            return Err(invalid_value("bool", value));
        };
        buf.reserve(1);
        buf.put_u8(value as u8);
        Ok(())
    }
}

impl Codec for Datetime {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 8)?;
        Ok(Value::Datetime(DatetimeValue::from_postgres_micros(
            buf.get_i64(),
        )))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::Datetime(value) = value else {
            return Err(invalid_value("datetime", value));
        };
        buf.reserve(8);
        buf.put_i64(value.to_postgres_micros());
        Ok(())
    }
}

impl Codec for LocalDatetime {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 8)?;
        Ok(Value::LocalDatetime(LocalDatetimeValue::from_postgres_micros(
            buf.get_i64(),
        )))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::LocalDatetime(value) = value else {
            return Err(invalid_value("cal::local_datetime", value));
        };
        buf.reserve(8);
        buf.put_i64(value.to_postgres_micros());
        Ok(())
    }
}

impl Codec for LocalDate {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 4)?;
        Ok(Value::LocalDate(LocalDateValue::from_postgres_days(
            buf.get_i32(),
        )))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::LocalDate(value) = value else {
            return Err(invalid_value("cal::local_date", value));
        };
        buf.reserve(4);
        buf.put_i32(value.to_postgres_days());
        Ok(())
    }
}

impl Codec for LocalTime {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 8)?;
        let micros = buf.get_i64();
        let micros = u64::try_from(micros)
            .ok()
            .context(errors::InvalidDate)?;
        let time = LocalTimeValue::try_from_micros(micros)
            .ok()
            .context(errors::InvalidDate)?;
        Ok(Value::LocalTime(time))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::LocalTime(value) = value else {
            return Err(invalid_value("cal::local_time", value));
        };
        buf.reserve(8);
        buf.put_i64(value.to_micros() as i64);
        Ok(())
    }
}

impl Codec for Duration {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 16)?;
        let micros = buf.get_i64();
        let days = buf.get_i32();
        let months = buf.get_i32();
        ensure!(days == 0 && months == 0, errors::NonZeroReservedBytes);
        Ok(Value::Duration(DurationValue::from_micros(micros)))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::Duration(value) = value else {
            return Err(invalid_value("duration", value));
        };
        buf.reserve(16);
        buf.put_i64(value.micros());
        buf.put_i32(0);
        buf.put_i32(0);
        Ok(())
    }
}

impl Codec for RelativeDuration {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 16)?;
        let micros = buf.get_i64();
        let days = buf.get_i32();
        let months = buf.get_i32();
        Ok(Value::RelativeDuration(RelativeDurationValue::try_new(
            months, days, micros,
        )))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::RelativeDuration(value) = value else {
            return Err(invalid_value("cal::relative_duration", value));
        };
        buf.reserve(16);
        buf.put_i64(value.micros());
        buf.put_i32(value.days());
        buf.put_i32(value.months());
        Ok(())
    }
}

impl Codec for DateDuration {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 16)?;
        let reserved = buf.get_i64();
        ensure!(reserved == 0, errors::NonZeroReservedBytes);
        let days = buf.get_i32();
        let months = buf.get_i32();
        Ok(Value::DateDuration(DateDurationValue::new(months, days)))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::DateDuration(value) = value else {
            return Err(invalid_value("cal::date_duration", value));
        };
        buf.reserve(16);
        buf.put_i64(0);
        buf.put_i32(value.days());
        buf.put_i32(value.months());
        Ok(())
    }
}

impl Codec for Json {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let format = buf.get_u8();
        ensure!(format == 1, errors::InvalidJsonFormat);
        let text = std::str::from_utf8(buf).context(errors::InvalidUtf8)?;
        Ok(Value::Json(JsonValue::new_unchecked(text.to_owned())))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Json(value) = value else {
            return Err(invalid_value("json", value));
        };
        buf.reserve(1 + value.len());
        buf.put_u8(1);
        buf.extend_from_slice(value.as_bytes());
        Ok(())
    }
}

fn decode_bignum(buf: &mut &[u8]) -> Result<(usize, i16, bool), DecodeError> {
    ensure!(buf.remaining() >= 8, errors::Underflow);
    let ndigits = buf.get_u16() as usize;
    let weight = buf.get_i16();
    let negative = match buf.get_u16() {
        0x0000 => false,
        0x4000 => true,
        _ => return errors::BadSign.fail(),
    };
    Ok((ndigits, weight, negative))
}

impl Codec for BigInt {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        let (ndigits, weight, negative) = decode_bignum(&mut buf)?;
        let reserved = buf.get_u16();
        ensure!(reserved == 0, errors::NonZeroReservedBytes);
        ensure_exact_size(buf, ndigits * 2)?;
        let digits = (0..ndigits).map(|_| buf.get_u16()).collect();
        Ok(Value::BigInt(BigIntValue::from_raw(
            negative, weight, digits,
        )))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::BigInt(value) = value else {
            return Err(invalid_value("bigint", value));
        };
        let ndigits = u16::try_from(value.digits.len())
            .ok()
            .context(errors::BigIntTooLong)?;
        buf.reserve(8 + value.digits.len() * 2);
        buf.put_u16(ndigits);
        buf.put_i16(value.weight);
        buf.put_u16(if value.negative { 0x4000 } else { 0x0000 });
        buf.put_u16(0);
        for &digit in &value.digits {
            buf.put_u16(digit);
        }
        Ok(())
    }
}

impl Codec for Decimal {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        let (ndigits, weight, negative) = decode_bignum(&mut buf)?;
        let decimal_digits = buf.get_u16();
        ensure_exact_size(buf, ndigits * 2)?;
        let digits = (0..ndigits).map(|_| buf.get_u16()).collect();
        Ok(Value::Decimal(DecimalValue::from_raw(
            negative,
            weight,
            decimal_digits,
            digits,
        )))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Decimal(value) = value else {
            return Err(invalid_value("decimal", value));
        };
        let ndigits = u16::try_from(value.digits.len())
            .ok()
            .context(errors::DecimalTooLong)?;
        buf.reserve(8 + value.digits.len() * 2);
        buf.put_u16(ndigits);
        buf.put_i16(value.weight);
        buf.put_u16(if value.negative { 0x4000 } else { 0x0000 });
        buf.put_u16(value.decimal_digits);
        for &digit in &value.digits {
            buf.put_u16(digit);
        }
        Ok(())
    }
}

impl Codec for ConfigMemory {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure_exact_size(buf, 8)?;
        Ok(Value::ConfigMemory(ConfigMemoryValue::new(buf.get_i64())))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let &Value::ConfigMemory(value) = value else {
            return Err(invalid_value("cfg::memory", value));
        };
        buf.reserve(8);
        buf.put_i64(value.bytes());
        Ok(())
    }
}

impl EnumCodec {
    fn new(members: &[String]) -> EnumCodec {
        EnumCodec {
            members: members.iter().map(|m| Arc::from(&m[..])).collect(),
        }
    }
}

impl Codec for EnumCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value, DecodeError> {
        let member = std::str::from_utf8(buf).context(errors::InvalidUtf8)?;
        let member = self
            .members
            .get(member)
            .context(errors::ExtraEnumValue)?;
        Ok(Value::Enum(EnumValue(member.clone())))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let name = match value {
            Value::Enum(val) => val.name(),
            Value::Str(val) => &val[..],
            _ => return Err(invalid_value("enum", value)),
        };
        ensure!(
            self.members.contains(name),
            errors::MissingEnumValue
        );
        buf.extend_from_slice(name.as_bytes());
        Ok(())
    }
}

/// Elements of tuples, named tuples and objects share one layout:
/// a 32-bit reserved word, a signed length (−1 marks null), and the body.
fn decode_tuple_fields(
    buf: &mut &[u8],
    codecs: &[Arc<dyn Codec>],
) -> Result<Vec<Option<Value>>, DecodeError> {
    ensure!(buf.remaining() >= 4, errors::Underflow);
    let size = buf.get_u32() as usize;
    ensure!(size == codecs.len(), errors::ObjectSizeMismatch);
    let mut fields = Vec::with_capacity(size);
    for codec in codecs {
        ensure!(buf.remaining() >= 8, errors::Underflow);
        let _reserved = buf.get_i32();
        let len = buf.get_i32();
        if len < 0 {
            ensure!(len == -1, errors::InvalidMarker);
            fields.push(None);
        } else {
            let len = len as usize;
            ensure!(buf.remaining() >= len, errors::Underflow);
            fields.push(Some(codec.decode(&buf[..len])?));
            buf.advance(len);
        }
    }
    ensure!(buf.remaining() == 0, errors::ExtraData);
    Ok(fields)
}

impl Codec for TupleCodec {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        let fields = decode_tuple_fields(&mut buf, &self.elements)?
            .into_iter()
            .map(|f| f.unwrap_or(Value::Nothing))
            .collect();
        Ok(Value::Tuple(fields))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Tuple(items) = value else {
            return Err(invalid_value("tuple", value));
        };
        ensure!(
            items.len() == self.elements.len(),
            errors::TupleShapeMismatch
        );
        buf.reserve(4 + items.len() * 8);
        buf.put_u32(
            u32::try_from(items.len())
                .ok()
                .context(errors::TooManyElements)?,
        );
        for (codec, item) in self.elements.iter().zip(items) {
            buf.reserve(4);
            buf.put_i32(0);
            encode_element(buf, &**codec, item)?;
        }
        Ok(())
    }
}

impl NamedTupleCodec {
    fn build(
        d: &descriptors::NamedTupleTypeDescriptor,
        dec: &CodecBuilder,
    ) -> Result<NamedTupleCodec, CodecError> {
        Ok(NamedTupleCodec {
            shape: NamedTupleShape::new(d.elements.iter().map(|e| e.name.clone()).collect()),
            codecs: d
                .elements
                .iter()
                .map(|e| dec.build(e.type_pos))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl Codec for NamedTupleCodec {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        let fields = decode_tuple_fields(&mut buf, &self.codecs)?
            .into_iter()
            .map(|f| f.unwrap_or(Value::Nothing))
            .collect();
        Ok(Value::NamedTuple {
            shape: self.shape.clone(),
            fields,
        })
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::NamedTuple { shape, fields } = value else {
            return Err(invalid_value("named_tuple", value));
        };
        ensure!(shape == &self.shape, errors::TupleShapeMismatch);
        buf.reserve(4 + fields.len() * 8);
        buf.put_u32(
            u32::try_from(fields.len())
                .ok()
                .context(errors::TooManyElements)?,
        );
        for (codec, field) in self.codecs.iter().zip(fields) {
            buf.reserve(4);
            buf.put_i32(0);
            encode_element(buf, &**codec, field)?;
        }
        Ok(())
    }
}

impl ObjectCodec {
    fn build(
        d: &descriptors::ObjectShapeDescriptor,
        dec: &CodecBuilder,
    ) -> Result<ObjectCodec, CodecError> {
        Ok(ObjectCodec {
            shape: d.elements.as_slice().into(),
            codecs: d
                .elements
                .iter()
                .map(|e| dec.build(e.type_pos))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl Codec for ObjectCodec {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        let fields = decode_tuple_fields(&mut buf, &self.codecs)?;
        Ok(Value::Object {
            shape: self.shape.clone(),
            fields,
        })
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Object { shape, fields } = value else {
            return Err(invalid_value("object", value));
        };
        ensure!(shape == &self.shape, errors::ObjectShapeMismatch);
        ensure!(
            fields.len() == self.codecs.len(),
            errors::ObjectShapeMismatch
        );
        buf.reserve(4 + fields.len() * 8);
        buf.put_u32(
            u32::try_from(fields.len())
                .ok()
                .context(errors::TooManyElements)?,
        );
        for (codec, field) in self.codecs.iter().zip(fields) {
            buf.reserve(8);
            buf.put_i32(0);
            match field {
                Some(field) => encode_element(buf, &**codec, field)?,
                None => buf.put_i32(-1),
            }
        }
        Ok(())
    }
}

impl SparseObjectCodec {
    fn build(
        d: &descriptors::InputShapeTypeDescriptor,
        dec: &CodecBuilder,
    ) -> Result<SparseObjectCodec, CodecError> {
        Ok(SparseObjectCodec {
            names: d.elements.iter().map(|e| e.name.clone()).collect(),
            codecs: d
                .elements
                .iter()
                .map(|e| dec.build(e.type_pos))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl Codec for SparseObjectCodec {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        ensure!(buf.remaining() >= 4, errors::Underflow);
        let size = buf.get_u32() as usize;
        let mut fields = Vec::with_capacity(size);
        for _ in 0..size {
            ensure!(buf.remaining() >= 8, errors::Underflow);
            let index = buf.get_u32() as usize;
            let name = self
                .names
                .get(index)
                .context(errors::InvalidIndex { index })?;
            let codec = &self.codecs[index];
            let len = buf.get_i32();
            if len < 0 {
                ensure!(len == -1, errors::InvalidMarker);
                fields.push((name.clone(), None));
            } else {
                let len = len as usize;
                ensure!(buf.remaining() >= len, errors::Underflow);
                fields.push((name.clone(), Some(codec.decode(&buf[..len])?)));
                buf.advance(len);
            }
        }
        ensure!(buf.remaining() == 0, errors::ExtraData);
        Ok(Value::SparseObject(SparseObject { fields }))
    }

    /// Absent fields are simply omitted; an explicit `None` encodes the
    /// null marker, which the server reads as a reset of that field.
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::SparseObject(value) = value else {
            return Err(invalid_value("sparse_object", value));
        };
        buf.reserve(4 + value.fields.len() * 8);
        buf.put_u32(
            u32::try_from(value.fields.len())
                .ok()
                .context(errors::TooManyElements)?,
        );
        for (name, field) in &value.fields {
            let index = self
                .names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| errors::ObjectShapeMismatch.build())?;
            buf.reserve(8);
            buf.put_u32(index as u32);
            match field {
                Some(field) => encode_element(buf, &*self.codecs[index], field)?,
                None => buf.put_i32(-1),
            }
        }
        Ok(())
    }
}

fn decode_array_like(
    buf: &mut &[u8],
    codec: &dyn Codec,
) -> Result<Vec<Value>, DecodeError> {
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
        items.push(codec.decode(&buf[..len])?);
        buf.advance(len);
    }
    ensure!(buf.remaining() == 0, errors::ExtraData);
    Ok(items)
}

fn encode_array_like(
    buf: &mut BytesMut,
    codec: &dyn Codec,
    items: &[Value],
) -> Result<(), EncodeError> {
    if items.is_empty() {
        buf.reserve(12);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(0);
        return Ok(());
    }
    buf.reserve(20);
    buf.put_u32(1);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(
        u32::try_from(items.len())
            .ok()
            .context(errors::ArrayTooLong)?,
    );
    buf.put_u32(1);
    for item in items {
        encode_element(buf, codec, item)?;
    }
    Ok(())
}

impl Codec for ArrayCodec {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        let items = decode_array_like(&mut buf, &*self.element)?;
        Ok(Value::Array(items))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Array(items) = value else {
            return Err(invalid_value("array", value));
        };
        encode_array_like(buf, &*self.element, items)
    }
}

impl Codec for SetCodec {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        if !self.enveloped {
            let items = decode_array_like(&mut buf, &*self.element)?;
            return Ok(Value::Set(items));
        }
        // Sets of arrays wrap each array in an envelope.
        ensure!(buf.remaining() >= 12, errors::Underflow);
        let ndims = buf.get_u32();
        let _reserved0 = buf.get_u32();
        let _reserved1 = buf.get_u32();
        if ndims == 0 {
            ensure!(buf.remaining() == 0, errors::ExtraData);
            return Ok(Value::Set(Vec::new()));
        }
        ensure!(ndims == 1, errors::InvalidArrayOrSetShape);
        ensure!(buf.remaining() >= 8, errors::Underflow);
        let size = buf.get_u32() as usize;
        let lower = buf.get_u32();
        ensure!(lower == 1, errors::InvalidArrayOrSetShape);
        let mut items = Vec::with_capacity(size);
        for _ in 0..size {
            ensure!(buf.remaining() >= 12, errors::Underflow);
            let envelope_len = buf.get_i32();
            ensure!(envelope_len >= 8, errors::InvalidArrayOrSetShape);
            let nelems = buf.get_u32();
            ensure!(nelems == 1, errors::InvalidArrayOrSetShape);
            let _reserved = buf.get_u32();
            let data_len = envelope_len as usize - 8;
            ensure!(buf.remaining() >= data_len, errors::Underflow);
            items.push(self.element.decode(&buf[..data_len])?);
            buf.advance(data_len);
        }
        ensure!(buf.remaining() == 0, errors::ExtraData);
        Ok(Value::Set(items))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Set(items) = value else {
            return Err(invalid_value("set", value));
        };
        encode_array_like(buf, &*self.element, items)
    }
}

const RANGE_EMPTY: u8 = 0x01;
const RANGE_LB_INC: u8 = 0x02;
const RANGE_UB_INC: u8 = 0x04;
const RANGE_LB_INF: u8 = 0x08;
const RANGE_UB_INF: u8 = 0x10;
const RANGE_KNOWN_FLAGS: u8 =
    RANGE_EMPTY | RANGE_LB_INC | RANGE_UB_INC | RANGE_LB_INF | RANGE_UB_INF;

impl RangeCodec {
    fn decode_bound(&self, buf: &mut &[u8]) -> Result<Box<Value>, DecodeError> {
        ensure!(buf.remaining() >= 4, errors::Underflow);
        let len = buf.get_i32();
        ensure!(len >= 0, errors::InvalidMarker);
        let len = len as usize;
        ensure!(buf.remaining() >= len, errors::Underflow);
        let value = self.element.decode(&buf[..len])?;
        buf.advance(len);
        Ok(Box::new(value))
    }
}

impl Codec for RangeCodec {
    fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        let buf = &mut buf;
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let flags = buf.get_u8();
        ensure!(flags & !RANGE_KNOWN_FLAGS == 0, errors::InvalidRangeFlags);
        if flags & RANGE_EMPTY != 0 {
            ensure!(buf.remaining() == 0, errors::ExtraData);
            return Ok(Value::Range(Range::empty()));
        }
        let lower = if flags & RANGE_LB_INF == 0 {
            Some(self.decode_bound(buf)?)
        } else {
            None
        };
        let upper = if flags & RANGE_UB_INF == 0 {
            Some(self.decode_bound(buf)?)
        } else {
            None
        };
        ensure!(buf.remaining() == 0, errors::ExtraData);
        Ok(Value::Range(Range::new(
            lower,
            upper,
            flags & RANGE_LB_INC != 0,
            flags & RANGE_UB_INC != 0,
        )))
    }
    fn encode(&self, buf: &mut BytesMut, value: &Value) -> Result<(), EncodeError> {
        let Value::Range(range) = value else {
            return Err(invalid_value("range", value));
        };
        let mut flags = 0u8;
        if range.is_empty() {
            flags |= RANGE_EMPTY;
        } else {
            if range.inc_lower() {
                flags |= RANGE_LB_INC;
            }
            if range.inc_upper() {
                flags |= RANGE_UB_INC;
            }
            if range.lower().is_none() {
                flags |= RANGE_LB_INF;
            }
            if range.upper().is_none() {
                flags |= RANGE_UB_INF;
            }
        }
        buf.reserve(1);
        buf.put_u8(flags);
        if !range.is_empty() {
            if let Some(lower) = range.lower() {
                encode_element(buf, &*self.element, lower)?;
            }
            if let Some(upper) = range.upper() {
                encode_element(buf, &*self.element, upper)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(codec: &dyn Codec, value: Value) {
        let mut buf = BytesMut::new();
        codec.encode(&mut buf, &value).unwrap();
        assert_eq!(codec.decode(&buf).unwrap(), value);
    }

    #[test]
    fn scalar_roundtrips() {
        roundtrip(&Int16, Value::Int16(-42));
        roundtrip(&Int32, Value::Int32(1 << 30));
        roundtrip(&Int64, Value::Int64(i64::MIN));
        roundtrip(&Float32, Value::Float32(1.5));
        roundtrip(&Float64, Value::Float64(-2.25));
        roundtrip(&Str, Value::Str("hello".into()));
        roundtrip(&Bool, Value::Bool(true));
        roundtrip(
            &UuidCodec,
            Value::Uuid("9176ff8c-95b6-11ef-9c20-5b0e8c3daac8".parse().unwrap()),
        );
        roundtrip(
            &Datetime,
            Value::Datetime(DatetimeValue::from_postgres_micros(1234567)),
        );
        roundtrip(
            &Duration,
            Value::Duration(DurationValue::from_micros(-5_000_000)),
        );
        roundtrip(&BigInt, Value::BigInt(BigIntValue::from(-123456789i64)));
        roundtrip(
            &ConfigMemory,
            Value::ConfigMemory(ConfigMemoryValue::new(1 << 30)),
        );
    }

    #[test]
    fn bool_rejects_garbage() {
        assert!(Bool.decode(b"\x02").is_err());
        assert!(Bool.decode(b"").is_err());
        assert!(Bool.decode(b"\x01\x00").is_err());
    }

    #[test]
    fn tuple_roundtrip() {
        let codec = TupleCodec {
            elements: vec![Arc::new(Int64), Arc::new(Str)],
        };
        roundtrip(
            &codec,
            Value::Tuple(vec![Value::Int64(1), Value::Str("two".into())]),
        );
    }

    #[test]
    fn tuple_arity_is_checked() {
        let codec = TupleCodec {
            elements: vec![Arc::new(Int64)],
        };
        let err = codec
            .encode(&mut BytesMut::new(), &Value::Tuple(vec![]))
            .unwrap_err();
        assert!(matches!(err, EncodeError::TupleShapeMismatch { .. }));
    }

    #[test]
    fn array_roundtrip() {
        let codec = ArrayCodec {
            element: Arc::new(Int32),
        };
        roundtrip(
            &codec,
            Value::Array(vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)]),
        );
        roundtrip(&codec, Value::Array(vec![]));
    }

    #[test]
    fn set_preserves_order() {
        let codec = SetCodec {
            element: Arc::new(Int64),
            enveloped: false,
        };
        let mut buf = BytesMut::new();
        codec
            .encode(
                &mut buf,
                &Value::Set(vec![Value::Int64(1), Value::Int64(2)]),
            )
            .unwrap();
        let Value::Set(items) = codec.decode(&buf).unwrap() else {
            panic!("expected set");
        };
        assert_eq!(items.first(), Some(&Value::Int64(1)));
        assert_eq!(items.last(), Some(&Value::Int64(2)));
    }

    #[test]
    fn range_roundtrip() {
        let codec = RangeCodec {
            element: Arc::new(Int32),
        };
        roundtrip(&codec, Value::Range(Range::empty()));
        roundtrip(
            &codec,
            Value::Range(Range::new(
                Some(Box::new(Value::Int32(1))),
                Some(Box::new(Value::Int32(10))),
                true,
                false,
            )),
        );
        roundtrip(
            &codec,
            Value::Range(Range::new(None, Some(Box::new(Value::Int32(4))), false, true)),
        );
    }

    #[test]
    fn enum_membership() {
        let codec = EnumCodec::new(&["Red".to_string(), "Green".to_string()]);
        roundtrip(&codec, Value::Enum("Red".into()));
        assert!(codec.decode(b"Blue").is_err());
        let err = codec
            .encode(&mut BytesMut::new(), &Value::Enum("Blue".into()))
            .unwrap_err();
        assert!(matches!(err, EncodeError::MissingEnumValue { .. }));
    }

    #[test]
    fn sparse_object_skips_absent_fields() {
        let codec = SparseObjectCodec {
            names: vec!["module".into(), "config".into()],
            codecs: vec![Arc::new(Str), Arc::new(Str)],
        };
        let value = Value::SparseObject(SparseObject::from_pairs([(
            "module",
            Some(Value::Str("test".into())),
        )]));
        let mut buf = BytesMut::new();
        codec.encode(&mut buf, &value).unwrap();
        assert_eq!(codec.decode(&buf).unwrap(), value);
    }

    #[test]
    fn registry_is_seeded_with_scalars() {
        assert!(registry().lookup(&STD_INT64).is_some());
        assert!(registry().lookup(&STD_STR).is_some());
        assert!(registry().lookup(&Uuid::from_u128(0xdead)).is_none());
    }
}
