/*!
The [ServerMessage] enum and the frames the server sends.
*/

use std::collections::HashMap;
use std::convert::TryFrom;

use bytes::{Buf, BufMut, Bytes};
use snafu::{ensure, OptionExt};
use uuid::Uuid;

use crate::common::Capabilities;
pub use crate::common::{Cardinality, RawTypedesc, State};
use crate::descriptors::Typedesc;
use crate::encoding::{
    decode_annotations, decode_key_values, encode, encode_annotations, encode_key_values,
    Annotations, Decode, Encode, Input, KeyValues, Output,
};
use crate::errors::{self, DecodeError, EncodeError};
use crate::features::ProtocolVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServerMessage {
    ServerHandshake(ServerHandshake),
    Authentication(Authentication),
    ServerKeyData(ServerKeyData),
    ParameterStatus(ParameterStatus),
    StateDataDescription(StateDataDescription),
    CommandDataDescription(CommandDataDescription),
    Data(Data),
    CommandComplete(CommandComplete),
    ReadyForCommand(ReadyForCommand),
    ErrorResponse(ErrorResponse),
    LogMessage(LogMessage),
    RestoreReady(RestoreReady),
    // Dump packets are not decoded further, they are only relayed whole.
    DumpHeader(RawPacket),
    DumpBlock(RawPacket),
    UnknownMessage(u8, Bytes),
}

/// Transaction status reported by [ReadyForCommand].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    NotInTransaction = 0x49,
    InTransaction = 0x54,
    InFailedTransaction = 0x45,
}

impl TryFrom<u8> for TransactionState {
    type Error = DecodeError;
    fn try_from(transaction_state: u8) -> Result<TransactionState, DecodeError> {
        match transaction_state {
            0x49 => Ok(TransactionState::NotInTransaction),
            0x54 => Ok(TransactionState::InTransaction),
            0x45 => Ok(TransactionState::InFailedTransaction),
            _ => errors::InvalidTransactionState { transaction_state }.fail(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshake {
    pub major_ver: u16,
    pub minor_ver: u16,
    pub extensions: HashMap<String, Annotations>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Ok,
    Sasl { methods: Vec<String> },
    SaslContinue { data: Bytes },
    SaslFinal { data: Bytes },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Error,
    Fatal,
    Panic,
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Debug,
    Info,
    Notice,
    Warning,
    Unknown(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub severity: ErrorSeverity,
    pub code: u32,
    pub message: String,
    pub attributes: KeyValues,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub severity: MessageSeverity,
    pub code: u32,
    pub text: String,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyData {
    pub data: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus {
    pub proto: ProtocolVersion,
    pub name: Bytes,
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    pub annotations: Annotations,
    pub capabilities: Capabilities,
    pub status: String,
    pub state: Option<State>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDataDescription {
    pub annotations: Annotations,
    pub capabilities: Capabilities,
    pub result_cardinality: Cardinality,
    pub input: RawTypedesc,
    pub output: RawTypedesc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDataDescription {
    pub typedesc: RawTypedesc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyForCommand {
    pub annotations: Annotations,
    pub transaction_state: TransactionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub data: Vec<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReady {
    pub headers: KeyValues,
    pub jobs: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub data: Bytes,
}

impl CommandDataDescription {
    pub fn output(&self) -> Result<Typedesc, DecodeError> {
        self.output.decode()
    }
    pub fn input(&self) -> Result<Typedesc, DecodeError> {
        self.input.decode()
    }
}

impl StateDataDescription {
    pub fn parse(self) -> Result<Typedesc, DecodeError> {
        self.typedesc.decode()
    }
}

impl ServerMessage {
    pub fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        use ServerMessage::*;
        match self {
            ServerHandshake(h) => encode(buf, 0x76, h),
            Authentication(h) => encode(buf, 0x52, h),
            ServerKeyData(h) => encode(buf, 0x4b, h),
            ParameterStatus(h) => encode(buf, 0x53, h),
            StateDataDescription(h) => encode(buf, 0x73, h),
            CommandDataDescription(h) => encode(buf, 0x54, h),
            Data(h) => encode(buf, 0x44, h),
            CommandComplete(h) => encode(buf, 0x43, h),
            ReadyForCommand(h) => encode(buf, 0x5a, h),
            ErrorResponse(h) => encode(buf, 0x45, h),
            LogMessage(h) => encode(buf, 0x4c, h),
            RestoreReady(h) => encode(buf, 0x2b, h),
            DumpHeader(h) => encode(buf, 0x40, h),
            DumpBlock(h) => encode(buf, 0x3d, h),

            UnknownMessage(_, _) => errors::UnknownMessageCantBeEncoded.fail()?,
        }
    }

    /// Decode exactly one frame from the buffer.
    ///
    /// This expects a full frame to already be in the buffer.
    pub fn decode(buf: &mut Input) -> Result<ServerMessage, DecodeError> {
        use self::ServerMessage as M;
        let (mtype, mut frame) = buf.read_frame()?;
        let buf = &mut frame;
        let result = match mtype {
            0x76 => ServerHandshake::decode(buf).map(M::ServerHandshake)?,
            0x52 => Authentication::decode(buf).map(M::Authentication)?,
            0x4b => ServerKeyData::decode(buf).map(M::ServerKeyData)?,
            0x53 => ParameterStatus::decode(buf).map(M::ParameterStatus)?,
            0x73 => StateDataDescription::decode(buf).map(M::StateDataDescription)?,
            0x54 => CommandDataDescription::decode(buf).map(M::CommandDataDescription)?,
            0x44 => Data::decode(buf).map(M::Data)?,
            0x43 => CommandComplete::decode(buf).map(M::CommandComplete)?,
            0x5a => ReadyForCommand::decode(buf).map(M::ReadyForCommand)?,
            0x45 => ErrorResponse::decode(buf).map(M::ErrorResponse)?,
            0x4c => LogMessage::decode(buf).map(M::LogMessage)?,
            0x2b => RestoreReady::decode(buf).map(M::RestoreReady)?,
            0x40 => RawPacket::decode(buf).map(M::DumpHeader)?,
            0x3d => RawPacket::decode(buf).map(M::DumpBlock)?,
            code => M::UnknownMessage(code, buf.copy_to_bytes(buf.remaining())),
        };
        Ok(result)
    }
}

impl Encode for ServerHandshake {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.reserve(6);
        buf.put_u16(self.major_ver);
        buf.put_u16(self.minor_ver);
        buf.put_u16(
            u16::try_from(self.extensions.len())
                .ok()
                .context(errors::TooManyExtensions)?,
        );
        for (name, annotations) in &self.extensions {
            name.encode(buf)?;
            encode_annotations(buf, annotations)?;
        }
        Ok(())
    }
}

impl Decode for ServerHandshake {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        ensure!(buf.remaining() >= 6, errors::Underflow);
        let major_ver = buf.get_u16();
        let minor_ver = buf.get_u16();
        let num_ext = buf.get_u16();
        let mut extensions = HashMap::with_capacity(num_ext as usize);
        for _ in 0..num_ext {
            let name = String::decode(buf)?;
            let annotations = decode_annotations(buf)?;
            extensions.insert(name, annotations);
        }
        Ok(ServerHandshake {
            major_ver,
            minor_ver,
            extensions,
        })
    }
}

impl Encode for Authentication {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        use Authentication as A;
        buf.reserve(4);
        match self {
            A::Ok => buf.put_u32(0),
            A::Sasl { methods } => {
                buf.put_u32(0x0A);
                buf.reserve(4);
                buf.put_u32(
                    u32::try_from(methods.len())
                        .ok()
                        .context(errors::TooManyParams)?,
                );
                for method in methods {
                    method.encode(buf)?;
                }
            }
            A::SaslContinue { data } => {
                buf.put_u32(0x0B);
                data.encode(buf)?;
            }
            A::SaslFinal { data } => {
                buf.put_u32(0x0C);
                data.encode(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for Authentication {
    fn decode(buf: &mut Input) -> Result<Authentication, DecodeError> {
        ensure!(buf.remaining() >= 4, errors::Underflow);
        match buf.get_u32() {
            0x0 => Ok(Authentication::Ok),
            0x0A => {
                ensure!(buf.remaining() >= 4, errors::Underflow);
                let num_methods = buf.get_u32();
                let mut methods = Vec::with_capacity(num_methods as usize);
                for _ in 0..num_methods {
                    methods.push(String::decode(buf)?);
                }
                Ok(Authentication::Sasl { methods })
            }
            0x0B => Ok(Authentication::SaslContinue {
                data: Bytes::decode(buf)?,
            }),
            0x0C => Ok(Authentication::SaslFinal {
                data: Bytes::decode(buf)?,
            }),
            auth_status => errors::AuthStatusInvalid { auth_status }.fail(),
        }
    }
}

impl Encode for ServerKeyData {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.extend(&self.data);
        Ok(())
    }
}

impl Decode for ServerKeyData {
    fn decode(buf: &mut Input) -> Result<ServerKeyData, DecodeError> {
        ensure!(buf.remaining() >= 32, errors::Underflow);
        let mut data = [0u8; 32];
        buf.copy_to_slice(&mut data);
        Ok(ServerKeyData { data })
    }
}

impl Encode for ParameterStatus {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        self.name.encode(buf)?;
        self.value.encode(buf)?;
        Ok(())
    }
}

impl Decode for ParameterStatus {
    fn decode(buf: &mut Input) -> Result<ParameterStatus, DecodeError> {
        let proto = buf.proto().clone();
        let name = Bytes::decode(buf)?;
        let value = Bytes::decode(buf)?;
        Ok(ParameterStatus { proto, name, value })
    }
}

impl ParameterStatus {
    /// System config is shipped as a descriptor blob followed by data,
    /// both length-prefixed.
    pub fn parse_system_config(self) -> Result<(Typedesc, Bytes), DecodeError> {
        let cur = &mut Input::new(self.proto.clone(), self.value);
        let typedesc_data = Bytes::decode(cur)?;
        let data = Bytes::decode(cur)?;

        let typedesc_buf = &mut Input::new(self.proto, typedesc_data);
        let typedesc_id = Uuid::decode(typedesc_buf)?;
        let typedesc = Typedesc::decode_with_id(typedesc_id, typedesc_buf)?;
        Ok((typedesc, data))
    }
}

impl Encode for StateDataDescription {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        self.typedesc.id.encode(buf)?;
        self.typedesc.data.encode(buf)?;
        Ok(())
    }
}

impl Decode for StateDataDescription {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let proto = buf.proto().clone();
        let id = Uuid::decode(buf)?;
        let data = Bytes::decode(buf)?;
        Ok(StateDataDescription {
            typedesc: RawTypedesc { proto, id, data },
        })
    }
}

impl Encode for CommandDataDescription {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        encode_annotations(buf, &self.annotations)?;
        buf.reserve(8 + 1);
        buf.put_u64(self.capabilities.bits());
        buf.put_u8(self.result_cardinality as u8);
        self.input.id.encode(buf)?;
        self.input.data.encode(buf)?;
        self.output.id.encode(buf)?;
        self.output.data.encode(buf)?;
        Ok(())
    }
}

impl Decode for CommandDataDescription {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let proto = buf.proto().clone();
        let annotations = decode_annotations(buf)?;
        ensure!(buf.remaining() >= 9, errors::Underflow);
        let capabilities = Capabilities::from_bits_retain(buf.get_u64());
        let result_cardinality = Cardinality::try_from(buf.get_u8())?;
        let input_id = Uuid::decode(buf)?;
        let input_data = Bytes::decode(buf)?;
        let output_id = Uuid::decode(buf)?;
        let output_data = Bytes::decode(buf)?;
        Ok(CommandDataDescription {
            annotations,
            capabilities,
            result_cardinality,
            input: RawTypedesc {
                proto: proto.clone(),
                id: input_id,
                data: input_data,
            },
            output: RawTypedesc {
                proto,
                id: output_id,
                data: output_data,
            },
        })
    }
}

impl Encode for Data {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.reserve(2);
        buf.put_u16(
            u16::try_from(self.data.len())
                .ok()
                .context(errors::TooManyElements)?,
        );
        for chunk in &self.data {
            chunk.encode(buf)?;
        }
        Ok(())
    }
}

impl Decode for Data {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        ensure!(buf.remaining() >= 2, errors::Underflow);
        let count = buf.get_u16();
        let mut data = Vec::with_capacity(count as usize);
        for _ in 0..count {
            data.push(Bytes::decode(buf)?);
        }
        Ok(Data { data })
    }
}

impl Encode for CommandComplete {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        encode_annotations(buf, &self.annotations)?;
        buf.reserve(8);
        buf.put_u64(self.capabilities.bits());
        self.status.encode(buf)?;
        match &self.state {
            Some(state) => {
                state.typedesc_id.encode(buf)?;
                state.data.encode(buf)?;
            }
            None => {
                Uuid::from_u128(0).encode(buf)?;
                Bytes::new().encode(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for CommandComplete {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let annotations = decode_annotations(buf)?;
        ensure!(buf.remaining() >= 8, errors::Underflow);
        let capabilities = Capabilities::from_bits_retain(buf.get_u64());
        let status = String::decode(buf)?;
        let typedesc_id = Uuid::decode(buf)?;
        let data = Bytes::decode(buf)?;
        let state = if typedesc_id == Uuid::from_u128(0) {
            None
        } else {
            Some(State { typedesc_id, data })
        };
        Ok(CommandComplete {
            annotations,
            capabilities,
            status,
            state,
        })
    }
}

impl Encode for ReadyForCommand {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        encode_annotations(buf, &self.annotations)?;
        buf.reserve(1);
        buf.put_u8(self.transaction_state as u8);
        Ok(())
    }
}

impl Decode for ReadyForCommand {
    fn decode(buf: &mut Input) -> Result<ReadyForCommand, DecodeError> {
        let annotations = decode_annotations(buf)?;
        ensure!(buf.remaining() >= 1, errors::Underflow);
        let transaction_state = TransactionState::try_from(buf.get_u8())?;
        Ok(ReadyForCommand {
            annotations,
            transaction_state,
        })
    }
}

impl Encode for ErrorResponse {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.reserve(5);
        buf.put_u8(self.severity.to_u8());
        buf.put_u32(self.code);
        self.message.encode(buf)?;
        encode_key_values(buf, &self.attributes)?;
        Ok(())
    }
}

impl Decode for ErrorResponse {
    fn decode(buf: &mut Input) -> Result<ErrorResponse, DecodeError> {
        ensure!(buf.remaining() >= 5, errors::Underflow);
        let severity = ErrorSeverity::from_u8(buf.get_u8());
        let code = buf.get_u32();
        let message = String::decode(buf)?;
        let attributes = decode_key_values(buf)?;
        Ok(ErrorResponse {
            severity,
            code,
            message,
            attributes,
        })
    }
}

impl Encode for LogMessage {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.reserve(5);
        buf.put_u8(self.severity.to_u8());
        buf.put_u32(self.code);
        self.text.encode(buf)?;
        encode_annotations(buf, &self.annotations)?;
        Ok(())
    }
}

impl Decode for LogMessage {
    fn decode(buf: &mut Input) -> Result<LogMessage, DecodeError> {
        ensure!(buf.remaining() >= 5, errors::Underflow);
        let severity = MessageSeverity::from_u8(buf.get_u8());
        let code = buf.get_u32();
        let text = String::decode(buf)?;
        let annotations = decode_annotations(buf)?;
        Ok(LogMessage {
            severity,
            code,
            text,
            annotations,
        })
    }
}

impl Encode for RestoreReady {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        encode_key_values(buf, &self.headers)?;
        buf.reserve(2);
        buf.put_u16(self.jobs);
        Ok(())
    }
}

impl Decode for RestoreReady {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        let headers = decode_key_values(buf)?;
        ensure!(buf.remaining() >= 2, errors::Underflow);
        let jobs = buf.get_u16();
        Ok(RestoreReady { headers, jobs })
    }
}

impl Encode for RawPacket {
    fn encode(&self, buf: &mut Output) -> Result<(), EncodeError> {
        buf.extend(&self.data);
        Ok(())
    }
}

impl Decode for RawPacket {
    fn decode(buf: &mut Input) -> Result<Self, DecodeError> {
        Ok(RawPacket {
            data: buf.copy_to_bytes(buf.remaining()),
        })
    }
}

impl From<ErrorResponse> for sedge_errors::Error {
    fn from(response: ErrorResponse) -> sedge_errors::Error {
        sedge_errors::Error::from_code(response.code)
            .with_message(response.message)
            .with_headers(response.attributes)
    }
}

impl ErrorSeverity {
    pub fn from_u8(code: u8) -> ErrorSeverity {
        use ErrorSeverity::*;
        match code {
            120 => Error,
            200 => Fatal,
            255 => Panic,
            _ => Unknown(code),
        }
    }
    pub fn to_u8(&self) -> u8 {
        use ErrorSeverity::*;
        match *self {
            Error => 120,
            Fatal => 200,
            Panic => 255,
            Unknown(code) => code,
        }
    }
}

impl MessageSeverity {
    pub fn from_u8(code: u8) -> MessageSeverity {
        use MessageSeverity::*;
        match code {
            20 => Debug,
            40 => Info,
            60 => Notice,
            80 => Warning,
            _ => Unknown(code),
        }
    }
    pub fn to_u8(self) -> u8 {
        use MessageSeverity::*;
        match self {
            Debug => 20,
            Info => 40,
            Notice => 60,
            Warning => 80,
            Unknown(code) => code,
        }
    }
}
