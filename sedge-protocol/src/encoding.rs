/*!
Buffer wrappers and the [`Encode`]/[`Decode`] traits used by every frame and
codec in this crate.

Every wire message is a one-byte type tag followed by a 32-bit big-endian
length covering the remainder of the frame (the length field included).
[`encode`] writes the tag, leaves a hole for the length, runs the message
encoder and back-patches the hole; [`Input::read_frame`] does the reverse.
*/

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use snafu::{ensure, OptionExt, ResultExt};
use uuid::Uuid;

use crate::errors::{self, DecodeError, EncodeError};
use crate::features::ProtocolVersion;

/// Message headers: numeric code to opaque value.
pub type KeyValues = HashMap<u16, Bytes>;
/// Message annotations: free-form string pairs.
pub type Annotations = HashMap<String, String>;

/// Read cursor over a received frame, carrying the negotiated protocol
/// version so that version-gated fields can decode themselves.
#[derive(Debug)]
pub struct Input {
    proto: ProtocolVersion,
    bytes: Bytes,
}

/// Write buffer for outgoing frames.
pub struct Output<'a> {
    proto: &'a ProtocolVersion,
    buf: &'a mut BytesMut,
}

pub trait Encode {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError>;
}

pub trait Decode: Sized {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError>;
}

impl Input {
    pub fn new(proto: ProtocolVersion, bytes: Bytes) -> Input {
        Input { proto, bytes }
    }
    pub fn proto(&self) -> &ProtocolVersion {
        &self.proto
    }
    /// Split one tag+length framed message off the front, returning the type
    /// tag and a cursor over the payload.
    pub fn read_frame(&mut self) -> Result<(u8, Input), DecodeError> {
        ensure!(self.remaining() >= 5, errors::Underflow);
        let mtype = self.bytes[0];
        let len = u32::from_be_bytes(self.bytes[1..5].try_into().unwrap()) as usize;
        ensure!(len >= 4, errors::Underflow);
        ensure!(self.remaining() >= len + 1, errors::Underflow);
        let payload = Input {
            proto: self.proto.clone(),
            bytes: self.bytes.slice(5..len + 1),
        };
        self.bytes.advance(len + 1);
        Ok((mtype, payload))
    }
}

impl Buf for Input {
    fn remaining(&self) -> usize {
        self.bytes.remaining()
    }
    fn chunk(&self) -> &[u8] {
        self.bytes.chunk()
    }
    fn advance(&mut self, cnt: usize) {
        self.bytes.advance(cnt)
    }
    fn copy_to_bytes(&mut self, len: usize) -> Bytes {
        self.bytes.copy_to_bytes(len)
    }
}

impl Deref for Input {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<'a> Output<'a> {
    pub fn new(proto: &'a ProtocolVersion, buf: &'a mut BytesMut) -> Output<'a> {
        Output { proto, buf }
    }
    pub fn proto(&self) -> &ProtocolVersion {
        self.proto
    }
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data)
    }
}

impl Deref for Output<'_> {
    type Target = BytesMut;
    fn deref(&self) -> &BytesMut {
        self.buf
    }
}

impl DerefMut for Output<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf
    }
}

/// Frame a message: type tag, back-patched length, payload.
pub fn encode<T: Encode>(buf: &mut Output, mtype: u8, msg: &T) -> Result<(), EncodeError> {
    buf.reserve(5);
    buf.put_u8(mtype);
    let base = buf.len();
    buf.put_u32(0);
    msg.encode(buf)?;
    let size = u32::try_from(buf.len() - base)
        .ok()
        .context(errors::MessageTooLong)?;
    buf[base..base + 4].copy_from_slice(&size.to_be_bytes());
    Ok(())
}

impl Encode for str {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        let len = u32::try_from(self.len()).ok().context(errors::StringTooLong)?;
        buf.reserve(4 + self.len());
        buf.put_u32(len);
        buf.extend(self.as_bytes());
        Ok(())
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        self[..].encode(buf)
    }
}

impl Decode for String {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        ensure!(buf.remaining() >= 4, errors::Underflow);
        let len = buf.get_u32() as usize;
        ensure!(buf.remaining() >= len, errors::Underflow);
        let data = buf.copy_to_bytes(len);
        let text = std::str::from_utf8(&data).context(errors::InvalidUtf8)?;
        Ok(text.to_owned())
    }
}

impl Encode for Bytes {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        let len = u32::try_from(self.len())
            .ok()
            .context(errors::ElementTooLong)?;
        buf.reserve(4 + self.len());
        buf.put_u32(len);
        buf.extend(self);
        Ok(())
    }
}

impl Decode for Bytes {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        ensure!(buf.remaining() >= 4, errors::Underflow);
        let len = buf.get_u32() as usize;
        ensure!(buf.remaining() >= len, errors::Underflow);
        Ok(buf.copy_to_bytes(len))
    }
}

impl Encode for Uuid {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.reserve(16);
        buf.extend(self.as_bytes());
        Ok(())
    }
}

impl Decode for Uuid {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        ensure!(buf.remaining() >= 16, errors::Underflow);
        let mut bytes = [0u8; 16];
        buf.copy_to_slice(&mut bytes);
        Ok(Uuid::from_bytes(bytes))
    }
}

pub(crate) fn encode_key_values(buf: &mut Output, kv: &KeyValues) -> Result<(), EncodeError> {
    buf.reserve(2);
    buf.put_u16(
        u16::try_from(kv.len())
            .ok()
            .context(errors::TooManyHeaders)?,
    );
    for (&code, value) in kv {
        buf.reserve(2);
        buf.put_u16(code);
        value.encode(buf)?;
    }
    Ok(())
}

pub(crate) fn decode_key_values(buf: &mut Input) -> Result<KeyValues, DecodeError> {
    ensure!(buf.remaining() >= 2, errors::Underflow);
    let count = buf.get_u16();
    let mut result = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        ensure!(buf.remaining() >= 2, errors::Underflow);
        let code = buf.get_u16();
        let value = Bytes::decode(buf)?;
        result.insert(code, value);
    }
    Ok(result)
}

pub(crate) fn encode_annotations(
    buf: &mut Output,
    annotations: &Annotations,
) -> Result<(), EncodeError> {
    buf.reserve(2);
    buf.put_u16(
        u16::try_from(annotations.len())
            .ok()
            .context(errors::TooManyHeaders)?,
    );
    for (name, value) in annotations {
        name.encode(buf)?;
        value.encode(buf)?;
    }
    Ok(())
}

pub(crate) fn decode_annotations(buf: &mut Input) -> Result<Annotations, DecodeError> {
    ensure!(buf.remaining() >= 2, errors::Underflow);
    let count = buf.get_u16();
    let mut result = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let name = String::decode(buf)?;
        let value = String::decode(buf)?;
        result.insert(name, value);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_string(s: &str) -> String {
        let proto = ProtocolVersion::current();
        let mut out = BytesMut::new();
        s.encode(&mut Output::new(&proto, &mut out)).unwrap();
        let mut input = Input::new(proto, out.freeze());
        String::decode(&mut input).unwrap()
    }

    #[test]
    fn string_roundtrip() {
        assert_eq!(roundtrip_string(""), "");
        assert_eq!(roundtrip_string("hello"), "hello");
        assert_eq!(roundtrip_string("приветик"), "приветик");
    }

    #[test]
    fn frame_roundtrip() {
        let proto = ProtocolVersion::current();
        let mut out = BytesMut::new();
        encode(&mut Output::new(&proto, &mut out), 0x58, &Empty).unwrap();
        assert_eq!(&out[..], b"\x58\0\0\0\x04");
        let mut input = Input::new(proto, out.freeze());
        let (mtype, payload) = input.read_frame().unwrap();
        assert_eq!(mtype, 0x58);
        assert_eq!(payload.remaining(), 0);
        assert_eq!(input.remaining(), 0);
    }

    struct Empty;
    impl Encode for Empty {
        fn encode(&self, _buf: &mut Output) -> Result<(), EncodeError> {
            Ok(())
        }
    }

    #[test]
    fn truncated_frame() {
        let proto = ProtocolVersion::current();
        let mut input = Input::new(proto, Bytes::from_static(b"\x58\0\0\0\x08\x01"));
        assert!(input.read_frame().is_err());
    }
}
