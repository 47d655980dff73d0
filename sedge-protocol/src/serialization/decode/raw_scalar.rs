/*!
Scalar decoding straight from element bodies, without the [`Value`]
indirection. The typed decode path ([`Queryable`]) is built on these.

[`Value`]: crate::value::Value
[`Queryable`]: crate::queryable::Queryable
*/

use bytes::{Buf, Bytes};
use snafu::{ensure, OptionExt, ResultExt};
use uuid::Uuid;

use crate::errors::{self, DecodeError};
use crate::model::{
    BigInt, ConfigMemory, DateDuration, Datetime, Decimal, Duration, Json, LocalDate,
    LocalDatetime, LocalTime, RelativeDuration,
};

/// Decode a scalar from the exact bytes of one element body.
pub trait RawCodec<'t>: Sized {
    fn decode(buf: &'t [u8]) -> Result<Self, DecodeError>;
}

fn ensure_exact_size(buf: &[u8], expected: usize) -> Result<(), DecodeError> {
    ensure!(buf.len() >= expected, errors::Underflow);
    ensure!(buf.len() <= expected, errors::ExtraData);
    Ok(())
}

impl RawCodec<'_> for i16 {
    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        ensure_exact_size(buf, 2)?;
        Ok(buf.get_i16())
    }
}

impl RawCodec<'_> for i32 {
    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        ensure_exact_size(buf, 4)?;
        Ok(buf.get_i32())
    }
}

impl RawCodec<'_> for i64 {
    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        ensure_exact_size(buf, 8)?;
        Ok(buf.get_i64())
    }
}

impl RawCodec<'_> for f32 {
    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        ensure_exact_size(buf, 4)?;
        Ok(buf.get_f32())
    }
}

impl RawCodec<'_> for f64 {
    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        ensure_exact_size(buf, 8)?;
        Ok(buf.get_f64())
    }
}

impl RawCodec<'_> for bool {
    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        ensure_exact_size(buf, 1)?;
        match buf[0] {
            0 => Ok(false),
            1 => Ok(true),
            val => errors::InvalidBool { val }.fail(),
        }
    }
}

impl<'t> RawCodec<'t> for &'t str {
    fn decode(buf: &'t [u8]) -> Result<Self, DecodeError> {
        std::str::from_utf8(buf).context(errors::InvalidUtf8)
    }
}

impl RawCodec<'_> for String {
    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        <&str as RawCodec>::decode(buf).map(str::to_owned)
    }
}

impl RawCodec<'_> for Bytes {
    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(Bytes::copy_from_slice(buf))
    }
}

impl RawCodec<'_> for Uuid {
    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        ensure_exact_size(buf, 16)?;
        let mut bytes = [0u8; 16];
        buf.copy_to_slice(&mut bytes);
        Ok(Uuid::from_bytes(bytes))
    }
}

impl RawCodec<'_> for Json {
    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let format = buf.get_u8();
        ensure!(format == 1, errors::InvalidJsonFormat);
        let text = std::str::from_utf8(buf).context(errors::InvalidUtf8)?;
        Ok(Json::new_unchecked(text.to_owned()))
    }
}

impl RawCodec<'_> for Datetime {
    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        i64::decode(buf).map(Datetime::from_postgres_micros)
    }
}

impl RawCodec<'_> for LocalDatetime {
    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        i64::decode(buf).map(LocalDatetime::from_postgres_micros)
    }
}

impl RawCodec<'_> for LocalDate {
    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        i32::decode(buf).map(LocalDate::from_postgres_days)
    }
}

impl RawCodec<'_> for LocalTime {
    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let micros = i64::decode(buf)?;
        let micros = u64::try_from(micros).ok().context(errors::InvalidDate)?;
        LocalTime::try_from_micros(micros)
            .ok()
            .context(errors::InvalidDate)
    }
}

impl RawCodec<'_> for Duration {
    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        ensure_exact_size(buf, 16)?;
        let micros = buf.get_i64();
        let days = buf.get_i32();
        let months = buf.get_i32();
        ensure!(days == 0 && months == 0, errors::NonZeroReservedBytes);
        Ok(Duration::from_micros(micros))
    }
}

impl RawCodec<'_> for RelativeDuration {
    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        ensure_exact_size(buf, 16)?;
        let micros = buf.get_i64();
        let days = buf.get_i32();
        let months = buf.get_i32();
        Ok(RelativeDuration::try_new(months, days, micros))
    }
}

impl RawCodec<'_> for DateDuration {
    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        ensure_exact_size(buf, 16)?;
        let reserved = buf.get_i64();
        ensure!(reserved == 0, errors::NonZeroReservedBytes);
        let days = buf.get_i32();
        let months = buf.get_i32();
        Ok(DateDuration::new(months, days))
    }
}

impl RawCodec<'_> for ConfigMemory {
    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        i64::decode(buf).map(ConfigMemory::new)
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

impl RawCodec<'_> for BigInt {
    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        let (ndigits, weight, negative) = decode_bignum(&mut buf)?;
        let reserved = buf.get_u16();
        ensure!(reserved == 0, errors::NonZeroReservedBytes);
        ensure_exact_size(buf, ndigits * 2)?;
        let digits = (0..ndigits).map(|_| buf.get_u16()).collect();
        Ok(BigInt::from_raw(negative, weight, digits))
    }
}

impl RawCodec<'_> for Decimal {
    fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        let (ndigits, weight, negative) = decode_bignum(&mut buf)?;
        let decimal_digits = buf.get_u16();
        ensure_exact_size(buf, ndigits * 2)?;
        let digits = (0..ndigits).map(|_| buf.get_u16()).collect();
        Ok(Decimal::from_raw(negative, weight, decimal_digits, digits))
    }
}
