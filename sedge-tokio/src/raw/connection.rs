use std::collections::HashMap;
use std::io;
use std::str;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use sedge_errors::{
    AuthenticationError, ClientConnectionClosedError, ClientConnectionError,
    ClientConnectionEosError, ClientConnectionFailedError,
    ClientConnectionFailedTemporarilyError, ClientConnectionTimeoutError, ClientEncodingError,
    ClientError, ClientInconsistentError, Error, ErrorKind, PasswordRequired,
    ProtocolEncodingError, ProtocolOutOfOrderError, UnsupportedProtocolVersionError,
};
use sedge_protocol::client_message::{ClientHandshake, ClientMessage};
use sedge_protocol::client_message::{SaslInitialResponse, SaslResponse};
use sedge_protocol::common::RawTypedesc;
use sedge_protocol::encoding::{Input, Output};
use sedge_protocol::features::ProtocolVersion;
use sedge_protocol::server_message::{
    Authentication, MessageSeverity, ServerMessage, TransactionState,
};

use crate::builder::{ClientType, Config};
use crate::raw::{Connection, Mode, ServerParams, Stream};
use crate::scram::ScramClient;
use crate::tls;

impl Connection {
    /// Open the transport and run handshake and authentication.
    pub async fn connect(config: &Config) -> Result<Connection, Error> {
        if config.client_type == ClientType::Http {
            return Err(ClientError::with_message(
                "HTTP tunneling is not implemented, use the TCP client type",
            ));
        }
        match timeout(config.connect_timeout, Connection::connect_transport(config)).await {
            Ok(result) => result,
            Err(_) => Err(ClientConnectionTimeoutError::with_message(format!(
                "connecting to {}:{} timed out",
                config.host, config.port
            ))),
        }
    }

    async fn connect_transport(config: &Config) -> Result<Connection, Error> {
        let tcp = TcpStream::connect((&config.host[..], config.port))
            .await
            .map_err(connect_error)?;
        tcp.set_nodelay(true).ok();
        if config.insecure_plaintext {
            return Connection::handshake(Box::new(tcp), config).await;
        }
        let tls_config = tls::client_config(config)?;
        let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
        let name = tls::server_name(config)?;
        let stream = connector
            .connect(name, tcp)
            .await
            .map_err(|e| ClientConnectionFailedError::with_source(e).context("TLS handshake"))?;
        Connection::handshake(Box::new(stream), config).await
    }

    /// Drive handshake and authentication over an established stream.
    pub(crate) async fn handshake(
        stream: Box<dyn Stream>,
        config: &Config,
    ) -> Result<Connection, Error> {
        let mut conn = Connection {
            stream,
            in_buf: BytesMut::with_capacity(8192),
            proto: ProtocolVersion::current(),
            mode: Mode::Normal {
                idle_since: Instant::now(),
            },
            transaction_state: TransactionState::NotInTransaction,
            state_desc: RawTypedesc::uninitialized(),
            server_params: ServerParams::default(),
            key_data: None,
            command_lock: Arc::new(tokio::sync::Mutex::new(())),
        };

        let (major_ver, minor_ver) = conn.proto.version_tuple();
        let mut params = HashMap::new();
        params.insert("user".to_string(), config.user.clone());
        params.insert("database".to_string(), config.database.clone());
        params.insert("branch".to_string(), config.branch.clone());
        conn.send_messages(&[ClientMessage::ClientHandshake(ClientHandshake {
            major_ver,
            minor_ver,
            params,
            extensions: HashMap::new(),
        })])
        .await?;

        loop {
            match conn.message().await? {
                ServerMessage::ServerHandshake(handshake) => {
                    let proto =
                        ProtocolVersion::new(handshake.major_ver, handshake.minor_ver);
                    if !proto.is_supported() {
                        return Err(UnsupportedProtocolVersionError::with_message(format!(
                            "server requires protocol version {}.{}",
                            handshake.major_ver, handshake.minor_ver
                        )));
                    }
                    conn.proto = proto;
                }
                ServerMessage::Authentication(Authentication::Sasl { methods }) => {
                    conn.sasl_exchange(config, &methods).await?;
                }
                ServerMessage::Authentication(Authentication::Ok) => {}
                ServerMessage::ServerKeyData(key_data) => {
                    conn.key_data = Some(key_data.data);
                }
                ServerMessage::StateDataDescription(descriptor) => {
                    conn.state_desc = descriptor.typedesc;
                }
                ServerMessage::ReadyForCommand(ready) => {
                    conn.transaction_state = ready.transaction_state;
                    return Ok(conn);
                }
                ServerMessage::ErrorResponse(err) => {
                    return Err(Error::from(err));
                }
                msg => {
                    return Err(ProtocolOutOfOrderError::with_message(format!(
                        "unsolicited message during handshake: {msg:?}"
                    )));
                }
            }
        }
    }

    async fn sasl_exchange(&mut self, config: &Config, methods: &[String]) -> Result<(), Error> {
        if !methods.iter().any(|m| m == "SCRAM-SHA-256") {
            return Err(AuthenticationError::with_message(format!(
                "server offers no supported SASL method (got {methods:?})"
            )));
        }
        let Some(password) = &config.password else {
            return Err(PasswordRequired::with_message(
                "the server requested password authentication",
            ));
        };

        let scram = ScramClient::new(&config.user, password);
        self.send_messages(&[ClientMessage::AuthenticationSaslInitialResponse(
            SaslInitialResponse {
                method: "SCRAM-SHA-256".into(),
                data: scram.client_first().into_bytes().into(),
            },
        )])
        .await?;

        let server_first = match self.message().await? {
            ServerMessage::Authentication(Authentication::SaslContinue { data }) => data,
            ServerMessage::ErrorResponse(err) => return Err(Error::from(err)),
            msg => {
                return Err(ProtocolOutOfOrderError::with_message(format!(
                    "expected SASL continue, got {msg:?}"
                )));
            }
        };
        let server_first = str::from_utf8(&server_first)
            .map_err(|e| ProtocolEncodingError::with_source(e).context("SASL message"))?;
        let last = scram.handle_server_first(server_first)?;

        self.send_messages(&[ClientMessage::AuthenticationSaslResponse(SaslResponse {
            data: last.message().to_string().into_bytes().into(),
        })])
        .await?;

        let server_final = match self.message().await? {
            ServerMessage::Authentication(Authentication::SaslFinal { data }) => data,
            ServerMessage::ErrorResponse(err) => return Err(Error::from(err)),
            msg => {
                return Err(ProtocolOutOfOrderError::with_message(format!(
                    "expected SASL final, got {msg:?}"
                )));
            }
        };
        let server_final = str::from_utf8(&server_final)
            .map_err(|e| ProtocolEncodingError::with_source(e).context("SASL message"))?;
        last.verify_server_final(server_final)?;
        Ok(())
    }

    /// A connection is consistent when no request was interrupted midway.
    pub fn is_consistent(&self) -> bool {
        matches!(self.mode, Mode::Normal { .. })
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction_state
    }

    pub fn protocol(&self) -> &ProtocolVersion {
        &self.proto
    }

    pub fn server_params(&self) -> &ServerParams {
        &self.server_params
    }

    pub(crate) fn is_expired(&self, max_idle: Duration) -> bool {
        match self.mode {
            Mode::Normal { idle_since } => idle_since.elapsed() > max_idle,
            Mode::Dirty | Mode::AwaitingPing => true,
        }
    }

    pub(crate) fn should_ping(&self, interval: Duration) -> bool {
        match self.mode {
            Mode::Normal { idle_since } => idle_since.elapsed() > interval,
            Mode::Dirty | Mode::AwaitingPing => true,
        }
    }

    /// Liveness check for a connection that sat idle: a bare `Sync` must
    /// come back with `ReadyForCommand`. A connection that fails the ping
    /// is left inconsistent and gets destroyed instead of reused.
    pub(crate) async fn ping(&mut self) -> Result<(), Error> {
        match self.mode {
            Mode::Normal { .. } => {}
            Mode::Dirty | Mode::AwaitingPing => return Err(ClientInconsistentError::build()),
        }
        self.mode = Mode::AwaitingPing;
        self.send_messages(&[ClientMessage::Sync]).await?;
        loop {
            match self.message().await? {
                ServerMessage::StateDataDescription(descriptor) => {
                    self.state_desc = descriptor.typedesc;
                }
                ServerMessage::ReadyForCommand(ready) => {
                    self.transaction_state = ready.transaction_state;
                    self.mode = Mode::Normal {
                        idle_since: Instant::now(),
                    };
                    return Ok(());
                }
                msg => {
                    return Err(ProtocolOutOfOrderError::with_message(format!(
                        "unsolicited message {msg:?}"
                    )));
                }
            }
        }
    }

    pub(crate) async fn send_messages(
        &mut self,
        messages: &[ClientMessage],
    ) -> Result<(), Error> {
        let mut out_buf = BytesMut::with_capacity(8192);
        for message in messages {
            message
                .encode(&mut Output::new(&self.proto, &mut out_buf))
                .map_err(ClientEncodingError::with_source)?;
        }
        if let Err(e) = self.stream.write_all(&out_buf).await {
            self.mode = Mode::Dirty;
            return Err(stream_error(e).context("writing frames"));
        }
        if let Err(e) = self.stream.flush().await {
            self.mode = Mode::Dirty;
            return Err(stream_error(e).context("writing frames"));
        }
        Ok(())
    }

    /// Read the next command-relevant message.
    ///
    /// `LogMessage` frames are routed to the logger and `ParameterStatus`
    /// frames are absorbed into [`ServerParams`]; both may arrive at any
    /// point of a command cycle.
    pub(crate) async fn message(&mut self) -> Result<ServerMessage, Error> {
        loop {
            match self.read_message().await? {
                ServerMessage::LogMessage(message) => {
                    let level = match message.severity {
                        MessageSeverity::Debug => log::Level::Debug,
                        MessageSeverity::Info | MessageSeverity::Notice => log::Level::Info,
                        MessageSeverity::Warning | MessageSeverity::Unknown(_) => {
                            log::Level::Warn
                        }
                    };
                    log::log!(level, "server: {} [{:#x}]", message.text, message.code);
                }
                ServerMessage::ParameterStatus(param) => {
                    let name = String::from_utf8_lossy(&param.name).into_owned();
                    let value = String::from_utf8_lossy(&param.value).into_owned();
                    self.server_params.set(name, value);
                }
                message => return Ok(message),
            }
        }
    }

    async fn read_message(&mut self) -> Result<ServerMessage, Error> {
        loop {
            if self.in_buf.len() >= 5 {
                let frame_len = u32::from_be_bytes(
                    self.in_buf[1..5].try_into().expect("four bytes"),
                ) as usize;
                if frame_len >= 4 && self.in_buf.len() >= frame_len + 1 {
                    let frame = self.in_buf.split_to(frame_len + 1).freeze();
                    let mut input = Input::new(self.proto.clone(), frame);
                    return ServerMessage::decode(&mut input)
                        .map_err(ProtocolEncodingError::with_source);
                }
            }
            let read = match self.stream.read_buf(&mut self.in_buf).await {
                Ok(read) => read,
                Err(e) => {
                    self.mode = Mode::Dirty;
                    return Err(stream_error(e).context("reading frame"));
                }
            };
            if read == 0 {
                self.mode = Mode::Dirty;
                return Err(ClientConnectionEosError::with_message(
                    "connection closed by server",
                ));
            }
        }
    }

    /// Politely close the connection.
    pub async fn terminate(mut self) {
        if self.is_consistent() {
            self.send_messages(&[ClientMessage::Terminate]).await.ok();
        }
    }
}

fn stream_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => ClientConnectionClosedError::with_source(e),
        _ => ClientConnectionError::with_source(e),
    }
}

fn connect_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotFound
        | io::ErrorKind::AddrNotAvailable => {
            ClientConnectionFailedTemporarilyError::with_source(e)
        }
        io::ErrorKind::TimedOut => ClientConnectionTimeoutError::with_source(e),
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => {
            ClientConnectionClosedError::with_source(e)
        }
        _ => ClientConnectionError::with_source(e),
    }
}
