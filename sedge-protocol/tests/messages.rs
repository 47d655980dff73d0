use std::collections::HashMap;
use std::error::Error;

use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use sedge_protocol::client_message::{Cardinality, Execute, IoFormat, Parse};
use sedge_protocol::client_message::{ClientHandshake, ClientMessage};
use sedge_protocol::client_message::{SaslInitialResponse, SaslResponse};
use sedge_protocol::common::{Capabilities, CompilationFlags, State};
use sedge_protocol::encoding::{Input, Output};
use sedge_protocol::features::ProtocolVersion;
use sedge_protocol::server_message::{
    Authentication, CommandComplete, Data, ErrorResponse, ErrorSeverity, ReadyForCommand,
    ServerHandshake, ServerKeyData, ServerMessage, TransactionState,
};

macro_rules! encoding_eq {
    ($message: expr, $bytes: expr) => {
        let proto = ProtocolVersion::current();
        let data: &[u8] = $bytes;
        let mut bytes = BytesMut::new();
        $message.encode(&mut Output::new(&proto, &mut bytes))?;
        let bytes = bytes.freeze();
        assert_eq!(&bytes[..], data);
        assert_eq!(
            ClientMessage::decode(&mut Input::new(proto, Bytes::copy_from_slice(data)))?,
            $message,
        );
    };
}

macro_rules! server_roundtrip {
    ($message: expr) => {
        let proto = ProtocolVersion::current();
        let mut bytes = BytesMut::new();
        $message.encode(&mut Output::new(&proto, &mut bytes))?;
        let frame = bytes.freeze();
        let mut input = Input::new(proto.clone(), frame.clone());
        let decoded = ServerMessage::decode(&mut input)?;
        assert_eq!(decoded, $message);
        // Serializing the decoded message parses back to the same value.
        let mut again = BytesMut::new();
        decoded.encode(&mut Output::new(&proto, &mut again))?;
        let reparsed =
            ServerMessage::decode(&mut Input::new(proto, again.freeze()))?;
        assert_eq!(reparsed, $message);
    };
}

#[test]
fn client_handshake() -> Result<(), Box<dyn Error>> {
    encoding_eq!(
        ClientMessage::ClientHandshake(ClientHandshake {
            major_ver: 2,
            minor_ver: 0,
            params: HashMap::new(),
            extensions: HashMap::new(),
        }),
        b"\x56\x00\x00\x00\x0C\x00\x02\x00\x00\x00\x00\x00\x00"
    );
    Ok(())
}

#[test]
fn parse() -> Result<(), Box<dyn Error>> {
    encoding_eq!(
        ClientMessage::Parse(Parse {
            annotations: None,
            allowed_capabilities: Capabilities::MODIFICATIONS,
            compilation_flags: CompilationFlags::INJECT_OUTPUT_TYPE_NAMES,
            implicit_limit: Some(77),
            output_format: IoFormat::Binary,
            expected_cardinality: Cardinality::AtMostOne,
            command_text: String::from("SELECT 1;"),
            state: State {
                typedesc_id: Uuid::from_u128(0),
                data: Bytes::from(""),
            },
        }),
        b"P\0\0\0A\0\0\0\0\0\0\0\0\0\x01\0\0\0\0\0\0\0\x02\0\0\0\0\0\0\0Mbo\
          \0\0\0\tSELECT 1;\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0"
    );
    Ok(())
}

#[test]
fn execute() -> Result<(), Box<dyn Error>> {
    encoding_eq!(
        ClientMessage::Execute(Execute {
            annotations: None,
            allowed_capabilities: Capabilities::MODIFICATIONS,
            compilation_flags: CompilationFlags::empty(),
            implicit_limit: None,
            output_format: IoFormat::Binary,
            expected_cardinality: Cardinality::Many,
            command_text: String::from("SELECT 1;"),
            state: State {
                typedesc_id: Uuid::from_u128(0),
                data: Bytes::from(""),
            },
            input_typedesc_id: Uuid::from_u128(0xFF),
            output_typedesc_id: Uuid::from_u128(0x105),
            arguments: Bytes::new(),
        }),
        b"O\0\0\0e\0\0\0\0\0\0\0\0\0\x01\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0mb\
          \0\0\0\tSELECT 1;\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\
          \0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\xff\
          \0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x05\
          \0\0\0\0"
    );
    Ok(())
}

#[test]
fn sasl_messages() -> Result<(), Box<dyn Error>> {
    encoding_eq!(
        ClientMessage::AuthenticationSaslInitialResponse(SaslInitialResponse {
            method: "SCRAM-SHA-256".into(),
            data: Bytes::from_static(b"n,,n=,r=aaaa"),
        }),
        b"p\0\0\0\x25\0\0\0\rSCRAM-SHA-256\0\0\0\x0cn,,n=,r=aaaa"
    );
    encoding_eq!(
        ClientMessage::AuthenticationSaslResponse(SaslResponse {
            data: Bytes::from_static(b"data"),
        }),
        b"r\0\0\0\x0c\0\0\0\x04data"
    );
    Ok(())
}

#[test]
fn bare_messages() -> Result<(), Box<dyn Error>> {
    encoding_eq!(ClientMessage::Sync, b"\x53\0\0\0\x04");
    encoding_eq!(ClientMessage::Flush, b"\x48\0\0\0\x04");
    encoding_eq!(ClientMessage::Terminate, b"\x58\0\0\0\x04");
    Ok(())
}

#[test]
fn server_messages_roundtrip() -> Result<(), Box<dyn Error>> {
    server_roundtrip!(ServerMessage::ServerHandshake(ServerHandshake {
        major_ver: 2,
        minor_ver: 0,
        extensions: HashMap::new(),
    }));
    server_roundtrip!(ServerMessage::Authentication(Authentication::Sasl {
        methods: vec!["SCRAM-SHA-256".into()],
    }));
    server_roundtrip!(ServerMessage::Authentication(Authentication::Ok));
    server_roundtrip!(ServerMessage::ServerKeyData(ServerKeyData {
        data: [7u8; 32]
    }));
    server_roundtrip!(ServerMessage::ReadyForCommand(ReadyForCommand {
        annotations: HashMap::new(),
        transaction_state: TransactionState::NotInTransaction,
    }));
    server_roundtrip!(ServerMessage::Data(Data {
        data: vec![Bytes::from_static(b"\0\0\0\0\0\0\0\x7b")],
    }));
    server_roundtrip!(ServerMessage::CommandComplete(CommandComplete {
        annotations: HashMap::new(),
        capabilities: Capabilities::empty(),
        status: "SELECT".into(),
        state: None,
    }));
    server_roundtrip!(ServerMessage::ErrorResponse(ErrorResponse {
        severity: ErrorSeverity::Error,
        code: 0x05030101,
        message: "serialization failure".into(),
        attributes: HashMap::new(),
    }));
    Ok(())
}

#[test]
fn multiple_frames_in_one_buffer() -> Result<(), Box<dyn Error>> {
    let proto = ProtocolVersion::current();
    let mut bytes = BytesMut::new();
    ClientMessage::Sync.encode(&mut Output::new(&proto, &mut bytes))?;
    ClientMessage::Terminate.encode(&mut Output::new(&proto, &mut bytes))?;
    let mut input = Input::new(proto, bytes.freeze());
    assert_eq!(ClientMessage::decode(&mut input)?, ClientMessage::Sync);
    assert_eq!(ClientMessage::decode(&mut input)?, ClientMessage::Terminate);
    Ok(())
}
