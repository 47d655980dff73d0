/*!
End-to-end tests against an in-process wire peer.

The mock accepts plain TCP, runs the handshake and serves a fixed table of
queries, so the full stack (framing, descriptors, codecs, pool, retry) is
exercised without a database.
*/

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use sedge_protocol::client_message::ClientMessage;
use sedge_protocol::common::{Capabilities, Cardinality, RawTypedesc};
use sedge_protocol::encoding::{Input, Output};
use sedge_protocol::features::ProtocolVersion;
use sedge_protocol::server_message::{
    Authentication, CommandComplete, CommandDataDescription, Data, ReadyForCommand,
    ServerHandshake, ServerKeyData, ServerMessage, TransactionState,
};
use sedge_tokio::model::Uuid;
use sedge_tokio::{Builder, Client, Config};

const EMPTY_TUPLE_ID: u128 = 0xFF;
const STD_STR_ID: u128 = 0x101;
const STD_INT64_ID: u128 = 0x105;

fn scalar_descriptor(id: u128, name: &str) -> Vec<u8> {
    let mut node = Vec::new();
    node.push(3u8);
    node.extend_from_slice(Uuid::from_u128(id).as_bytes());
    node.extend_from_slice(&(name.len() as u32).to_be_bytes());
    node.extend_from_slice(name.as_bytes());
    node.push(1);
    node.extend_from_slice(&0u16.to_be_bytes());
    with_length(node)
}

fn tuple_descriptor(id: u128, element_positions: &[u16]) -> Vec<u8> {
    let mut node = Vec::new();
    node.push(4u8);
    node.extend_from_slice(Uuid::from_u128(id).as_bytes());
    node.extend_from_slice(&5u32.to_be_bytes());
    node.extend_from_slice(b"tuple");
    node.push(0);
    node.extend_from_slice(&0u16.to_be_bytes());
    node.extend_from_slice(&(element_positions.len() as u16).to_be_bytes());
    for &pos in element_positions {
        node.extend_from_slice(&pos.to_be_bytes());
    }
    with_length(node)
}

fn named_tuple_descriptor(id: u128, elements: &[(&str, u16)]) -> Vec<u8> {
    let mut node = Vec::new();
    node.push(5u8);
    node.extend_from_slice(Uuid::from_u128(id).as_bytes());
    node.extend_from_slice(&5u32.to_be_bytes());
    node.extend_from_slice(b"tuple");
    node.push(0);
    node.extend_from_slice(&0u16.to_be_bytes());
    node.extend_from_slice(&(elements.len() as u16).to_be_bytes());
    for (name, pos) in elements {
        node.extend_from_slice(&(name.len() as u32).to_be_bytes());
        node.extend_from_slice(name.as_bytes());
        node.extend_from_slice(&pos.to_be_bytes());
    }
    with_length(node)
}

fn with_length(node: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(node.len() + 4);
    out.extend_from_slice(&(node.len() as u32).to_be_bytes());
    out.extend_from_slice(&node);
    out
}

fn int64_element(value: i64) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

fn tuple_row(values: &[i64]) -> Bytes {
    let mut row = BytesMut::new();
    row.put_u32(values.len() as u32);
    for value in values {
        row.put_i32(0);
        row.put_i32(8);
        row.put_i64(*value);
    }
    row.freeze()
}

/// Output descriptor and data rows for one known query.
fn lookup(query: &str) -> (Uuid, Vec<u8>, Vec<Bytes>) {
    match query {
        "select 123" => (
            Uuid::from_u128(STD_INT64_ID),
            scalar_descriptor(STD_INT64_ID, "std::int64"),
            vec![int64_element(123)],
        ),
        "select {1,2}" => (
            Uuid::from_u128(STD_INT64_ID),
            scalar_descriptor(STD_INT64_ID, "std::int64"),
            vec![int64_element(1), int64_element(2)],
        ),
        "select (1,2)" => {
            let mut desc = scalar_descriptor(STD_INT64_ID, "std::int64");
            desc.extend(tuple_descriptor(0xA1, &[0, 0]));
            (Uuid::from_u128(0xA1), desc, vec![tuple_row(&[1, 2])])
        }
        "select (one := 1, two := 2)" => {
            let mut desc = scalar_descriptor(STD_INT64_ID, "std::int64");
            desc.extend(named_tuple_descriptor(0xA2, &[("one", 0), ("two", 0)]));
            (Uuid::from_u128(0xA2), desc, vec![tuple_row(&[1, 2])])
        }
        "select {(a := 1), (a := 2)}" => (
            Uuid::from_u128(STD_STR_ID),
            scalar_descriptor(STD_STR_ID, "std::str"),
            vec![Bytes::from_static(b"[{\"a\" : 1}, {\"a\" : 2}]")],
        ),
        "select \"Hello, EdgeDB.Net!\"" => (
            Uuid::from_u128(STD_STR_ID),
            scalar_descriptor(STD_STR_ID, "std::str"),
            vec![Bytes::from_static(b"Hello, EdgeDB.Net!")],
        ),
        other => panic!("mock has no entry for query {other:?}"),
    }
}

struct Peer {
    stream: TcpStream,
    buf: BytesMut,
    proto: ProtocolVersion,
    tx_state: TransactionState,
}

impl Peer {
    fn new(stream: TcpStream) -> Peer {
        Peer {
            stream,
            buf: BytesMut::with_capacity(8192),
            proto: ProtocolVersion::current(),
            tx_state: TransactionState::NotInTransaction,
        }
    }

    async fn recv(&mut self) -> Option<ClientMessage> {
        loop {
            if self.buf.len() >= 5 {
                let len =
                    u32::from_be_bytes(self.buf[1..5].try_into().unwrap()) as usize;
                if self.buf.len() >= len + 1 {
                    let frame = self.buf.split_to(len + 1).freeze();
                    let mut input = Input::new(self.proto.clone(), frame);
                    return Some(ClientMessage::decode(&mut input).expect("client frame"));
                }
            }
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    async fn send(&mut self, messages: &[ServerMessage]) {
        let mut out = BytesMut::new();
        for message in messages {
            message
                .encode(&mut Output::new(&self.proto, &mut out))
                .expect("server frame");
        }
        self.stream.write_all(&out).await.expect("write frames");
    }

    fn ready(&self) -> ServerMessage {
        ServerMessage::ReadyForCommand(ReadyForCommand {
            annotations: Default::default(),
            transaction_state: self.tx_state,
        })
    }

    async fn greet(&mut self) -> bool {
        match self.recv().await {
            Some(ClientMessage::ClientHandshake(_)) => {}
            _ => return false,
        }
        self.send(&[
            ServerMessage::ServerHandshake(ServerHandshake {
                major_ver: 2,
                minor_ver: 0,
                extensions: Default::default(),
            }),
            ServerMessage::Authentication(Authentication::Ok),
            ServerMessage::ServerKeyData(ServerKeyData { data: [0; 32] }),
            self.ready(),
        ])
        .await;
        true
    }

    fn describe(&self, query: &str, cardinality: Cardinality) -> CommandDataDescription {
        let (root_id, output_descriptor, _) = lookup(query);
        CommandDataDescription {
            annotations: Default::default(),
            capabilities: Capabilities::empty(),
            result_cardinality: cardinality,
            input: RawTypedesc {
                proto: self.proto.clone(),
                id: Uuid::from_u128(EMPTY_TUPLE_ID),
                data: Bytes::new(),
            },
            output: RawTypedesc {
                proto: self.proto.clone(),
                id: root_id,
                data: output_descriptor.into(),
            },
        }
    }

    /// Serve command cycles until the client disconnects or `cycles` runs
    /// out.
    async fn serve(&mut self, mut cycles: usize) {
        while cycles > 0 {
            let message = match self.recv().await {
                Some(message) => message,
                None => return,
            };
            match message {
                ClientMessage::Parse(parse) => {
                    assert!(matches!(self.recv().await, Some(ClientMessage::Sync)));
                    let desc = self.describe(&parse.command_text, parse.expected_cardinality);
                    let ready = self.ready();
                    self.send(&[ServerMessage::CommandDataDescription(desc), ready])
                        .await;
                }
                ClientMessage::Execute(execute) if is_transaction_statement(&execute.command_text) => {
                    assert!(matches!(self.recv().await, Some(ClientMessage::Sync)));
                    self.tx_state = if execute.command_text.starts_with("START") {
                        TransactionState::InTransaction
                    } else {
                        TransactionState::NotInTransaction
                    };
                    let ready = self.ready();
                    self.send(&[
                        ServerMessage::CommandComplete(CommandComplete {
                            annotations: Default::default(),
                            capabilities: Capabilities::TRANSACTION,
                            status: execute.command_text.clone(),
                            state: None,
                        }),
                        ready,
                    ])
                    .await;
                }
                ClientMessage::Execute(execute) => {
                    assert!(matches!(self.recv().await, Some(ClientMessage::Sync)));
                    let (_, _, rows) = lookup(&execute.command_text);
                    let mut response: Vec<ServerMessage> = rows
                        .into_iter()
                        .map(|row| ServerMessage::Data(Data { data: vec![row] }))
                        .collect();
                    response.push(ServerMessage::CommandComplete(CommandComplete {
                        annotations: Default::default(),
                        capabilities: Capabilities::empty(),
                        status: "SELECT".into(),
                        state: None,
                    }));
                    response.push(self.ready());
                    self.send(&response).await;
                    cycles -= 1;
                }
                ClientMessage::Terminate => return,
                ClientMessage::Sync => {
                    let ready = self.ready();
                    self.send(&[ready]).await;
                }
                other => panic!("mock cannot serve {other:?}"),
            }
        }
    }
}

fn is_transaction_statement(text: &str) -> bool {
    text.starts_with("START TRANSACTION") || text == "COMMIT" || text == "ROLLBACK"
}

/// Start a mock accepting any number of connections, each serving
/// `cycles_per_connection` executes before closing the socket.
async fn start_mock(cycles_per_connection: usize) -> Config {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut peer = Peer::new(stream);
                if peer.greet().await {
                    peer.serve(cycles_per_connection).await;
                }
            });
        }
    });
    Builder::new()
        .host(addr.ip().to_string())
        .port(addr.port())
        .user("test")
        .wait_until_available(Duration::from_secs(5))
        .insecure_plaintext(true)
        .build()
        .unwrap()
}

#[tokio::test]
async fn scalar_query() {
    let client = Client::new(start_mock(100).await);
    let value = client
        .query_required_single::<i64, _>("select 123", &())
        .await
        .unwrap();
    assert_eq!(value, 123);
}

#[tokio::test]
async fn set_query_preserves_order() {
    let client = Client::new(start_mock(100).await);
    let values = client.query::<i64, _>("select {1,2}", &()).await.unwrap();
    assert_eq!(values.first(), Some(&1));
    assert_eq!(values.last(), Some(&2));
}

#[tokio::test]
async fn tuple_and_named_tuple_decode_alike() {
    let client = Client::new(start_mock(100).await);
    let pair = client
        .query_required_single::<(i64, i64), _>("select (1,2)", &())
        .await
        .unwrap();
    assert_eq!(pair, (1, 2));
    let pair = client
        .query_required_single::<(i64, i64), _>("select (one := 1, two := 2)", &())
        .await
        .unwrap();
    assert_eq!(pair, (1, 2));
}

#[tokio::test]
async fn json_query_returns_exact_document() {
    let client = Client::new(start_mock(100).await);
    let json = client
        .query_json("select {(a := 1), (a := 2)}", &())
        .await
        .unwrap();
    assert_eq!(&json[..], "[{\"a\" : 1}, {\"a\" : 2}]");
}

#[tokio::test]
async fn parsed_queries_are_cached() {
    let client = Client::new(start_mock(100).await);
    for _ in 0..3 {
        let value = client
            .query_required_single::<i64, _>("select 123", &())
            .await
            .unwrap();
        assert_eq!(value, 123);
    }
}

#[tokio::test]
async fn reconnects_after_server_disconnect() {
    // Every connection is dropped by the server after one execute, so the
    // second query always finds a dead pooled connection first.
    let client = Client::new(start_mock(1).await);
    let greeting = client
        .query_required_single::<String, _>("select \"Hello, EdgeDB.Net!\"", &())
        .await
        .unwrap();
    assert_eq!(greeting, "Hello, EdgeDB.Net!");
    let greeting = client
        .query_required_single::<String, _>("select \"Hello, EdgeDB.Net!\"", &())
        .await
        .unwrap();
    assert_eq!(greeting, "Hello, EdgeDB.Net!");
}

#[tokio::test]
async fn dynamic_value_decoding() {
    use sedge_tokio::Value;
    let client = Client::new(start_mock(100).await);
    let value = client
        .query_required_single::<Value, _>("select 123", &())
        .await
        .unwrap();
    assert_eq!(value, Value::Int64(123));
}

#[test_log::test(tokio::test)]
async fn transaction_commits_on_success() {
    let client = Client::new(start_mock(100).await);
    let value = client
        .transaction(|mut tx| async move {
            tx.query_single::<i64, _>("select 123", &()).await
        })
        .await
        .unwrap();
    assert_eq!(value, Some(123));
}

#[test_log::test(tokio::test)]
async fn transaction_retries_conflicts_until_success() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use sedge_tokio::errors::{ErrorKind, TransactionConflictError};

    let client = Client::new(start_mock(100).await);
    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let value = client
        .transaction(move |mut tx| {
            let attempts = seen.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(TransactionConflictError::with_message("try again"));
                }
                tx.query_single::<i64, _>("select 123", &()).await
            }
        })
        .await
        .unwrap();
    assert_eq!(value, Some(123));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn transaction_gives_up_after_max_attempts() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use sedge_tokio::errors::{ErrorKind, TransactionConflictError};

    let client = Client::new(start_mock(100).await);
    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let err = client
        .transaction(move |_tx| {
            let attempts = seen.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TransactionConflictError::with_message("always conflicts"))
            }
        })
        .await
        .unwrap_err();
    assert!(err.is::<TransactionConflictError>());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
