use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use sedge_errors::fields::QueryText;
use sedge_errors::{ClientConnectionEosError, NoResultExpected, ProtocolEncodingError};
use sedge_errors::{ClientInconsistentError, ProtocolOutOfOrderError};
use sedge_errors::{Error, ErrorKind};
use sedge_protocol::client_message::{ClientMessage, Execute, Parse};
use sedge_protocol::common::{Capabilities, Cardinality, CompilationOptions, IoFormat};
use sedge_protocol::model::Uuid;
use sedge_protocol::query_arg::{Encoder, QueryArgs};
use sedge_protocol::server_message::{CommandDataDescription, Data, ServerMessage};
use sedge_protocol::QueryResult;

use crate::errors::{Description, QueryCapabilities};
use crate::raw::{Connection, Mode, PoolConnection, Response, State};

pub(crate) struct Guard;

impl Connection {
    pub(crate) fn begin_request(&mut self) -> Result<Guard, Error> {
        match self.mode {
            Mode::Normal { .. } => {
                self.mode = Mode::Dirty;
                Ok(Guard)
            }
            Mode::Dirty => Err(ClientInconsistentError::build()),
            Mode::AwaitingPing => Err(ClientInconsistentError::with_message("interrupted ping")),
        }
    }

    pub(crate) fn end_request(&mut self, _guard: Guard) {
        self.mode = Mode::Normal {
            idle_since: Instant::now(),
        };
    }

    pub(crate) async fn expect_ready(&mut self, guard: Guard) -> Result<(), Error> {
        loop {
            let msg = self.message().await?;
            if let ServerMessage::ReadyForCommand(ready) = msg {
                self.transaction_state = ready.transaction_state;
                self.end_request(guard);
                return Ok(());
            }
        }
    }

    pub(crate) async fn expect_ready_or_eos(&mut self, guard: Guard) -> Result<(), Error> {
        match self.expect_ready(guard).await {
            Ok(()) => Ok(()),
            Err(e) if e.is::<ClientConnectionEosError>() => {
                debug_assert!(!self.is_consistent());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn parse(
        &mut self,
        flags: &CompilationOptions,
        query: &str,
        state: &dyn State,
    ) -> Result<CommandDataDescription, Error> {
        self._parse(flags, query, state)
            .await
            .map_err(|e| e.set::<QueryText>(query))
    }

    async fn _parse(
        &mut self,
        flags: &CompilationOptions,
        query: &str,
        state: &dyn State,
    ) -> Result<CommandDataDescription, Error> {
        let guard = self.begin_request()?;
        self.send_messages(&[
            ClientMessage::Parse(Parse::new(
                flags,
                query,
                state.encode(&self.state_desc)?,
                None,
            )),
            ClientMessage::Sync,
        ])
        .await?;

        loop {
            let msg = self.message().await?;
            match msg {
                ServerMessage::StateDataDescription(d) => {
                    self.state_desc = d.typedesc;
                }
                ServerMessage::CommandDataDescription(data_desc) => {
                    self.expect_ready(guard).await?;
                    return Ok(data_desc);
                }
                ServerMessage::ErrorResponse(err) => {
                    self.expect_ready_or_eos(guard)
                        .await
                        .map_err(|e| log::warn!("Error waiting for Ready after error: {e:#}"))
                        .ok();
                    return Err(err.into());
                }
                _ => {
                    return Err(ProtocolOutOfOrderError::with_message(format!(
                        "Unsolicited message {msg:?}"
                    )));
                }
            }
        }
    }

    async fn _execute(
        &mut self,
        opts: &CompilationOptions,
        query: &str,
        state: &dyn State,
        desc: &CommandDataDescription,
        arguments: &Bytes,
    ) -> Result<Response<Vec<Data>>, Error> {
        self._execute_inner(opts, query, state, desc, arguments)
            .await
            .map_err(|e| e.set::<QueryText>(query))
    }

    async fn _execute_inner(
        &mut self,
        opts: &CompilationOptions,
        query: &str,
        state: &dyn State,
        desc: &CommandDataDescription,
        arguments: &Bytes,
    ) -> Result<Response<Vec<Data>>, Error> {
        let guard = self.begin_request()?;
        self.send_messages(&[
            ClientMessage::Execute(Execute {
                annotations: None,
                allowed_capabilities: opts.allow_capabilities,
                compilation_flags: opts.flags(),
                implicit_limit: opts.implicit_limit,
                output_format: opts.io_format,
                expected_cardinality: opts.expected_cardinality,
                command_text: query.into(),
                state: state.encode(&self.state_desc)?,
                input_typedesc_id: desc.input.id,
                output_typedesc_id: desc.output.id,
                arguments: arguments.clone(),
            }),
            ClientMessage::Sync,
        ])
        .await?;

        let mut data = Vec::new();
        let mut description = None;
        loop {
            let msg = self.message().await?;
            match msg {
                ServerMessage::StateDataDescription(d) => {
                    self.state_desc = d.typedesc;
                }
                ServerMessage::CommandDataDescription(desc) => {
                    description = Some(desc);
                }
                ServerMessage::Data(datum) => {
                    data.push(datum);
                }
                ServerMessage::CommandComplete(complete) => {
                    self.expect_ready(guard).await?;
                    return Ok(Response {
                        status: complete.status,
                        new_state: complete.state,
                        data,
                    });
                }
                ServerMessage::ErrorResponse(err) => {
                    self.expect_ready_or_eos(guard)
                        .await
                        .map_err(|e| log::warn!("Error waiting for Ready after error: {e:#}"))
                        .ok();
                    let mut err: Error = err.into();
                    if let Some(desc) = description {
                        err = err.set::<Description>(desc);
                    }
                    return Err(err);
                }
                _ => {
                    return Err(ProtocolOutOfOrderError::with_message(format!(
                        "Unsolicited message {msg:?}"
                    )));
                }
            }
        }
    }

    /// Run a bare statement, ignoring any output.
    pub async fn statement(&mut self, query: &str, state: &dyn State) -> Result<(), Error> {
        let flags = CompilationOptions {
            implicit_limit: None,
            implicit_typenames: false,
            implicit_typeids: false,
            explicit_objectids: false,
            allow_capabilities: Capabilities::ALL,
            io_format: IoFormat::Binary,
            expected_cardinality: Cardinality::Many,
        };
        let guard = self.begin_request()?;
        self.send_messages(&[
            ClientMessage::Execute(Execute {
                annotations: None,
                allowed_capabilities: flags.allow_capabilities,
                compilation_flags: flags.flags(),
                implicit_limit: flags.implicit_limit,
                output_format: flags.io_format,
                expected_cardinality: flags.expected_cardinality,
                command_text: query.into(),
                state: state.encode(&self.state_desc)?,
                input_typedesc_id: Uuid::from_u128(0),
                output_typedesc_id: Uuid::from_u128(0),
                arguments: Bytes::new(),
            }),
            ClientMessage::Sync,
        ])
        .await?;

        loop {
            let msg = self.message().await?;
            match msg {
                ServerMessage::StateDataDescription(d) => {
                    self.state_desc = d.typedesc;
                }
                ServerMessage::CommandDataDescription(_) => {}
                ServerMessage::Data(_) => {}
                ServerMessage::CommandComplete(..) => {
                    self.expect_ready(guard).await?;
                    return Ok(());
                }
                ServerMessage::ErrorResponse(err) => {
                    self.expect_ready_or_eos(guard)
                        .await
                        .map_err(|e| log::warn!("Error waiting for Ready after error: {e:#}"))
                        .ok();
                    return Err(err.into());
                }
                _ => {
                    return Err(ProtocolOutOfOrderError::with_message(format!(
                        "Unsolicited message {msg:?}"
                    )));
                }
            }
        }
    }

    pub(crate) fn encode_arguments<A: QueryArgs>(
        desc: &CommandDataDescription,
        arguments: &A,
    ) -> Result<Bytes, Error> {
        let inp_desc = desc.input().map_err(ProtocolEncodingError::with_source)?;
        let mut arg_buf = BytesMut::with_capacity(8);
        arguments.encode(&mut Encoder::new(
            &inp_desc.as_queryable_context(),
            &mut arg_buf,
        ))?;
        Ok(arg_buf.freeze())
    }

    /// Execute a query against an already-parsed description and decode the
    /// result rows into `R`.
    pub async fn execute_with_description<R, A>(
        &mut self,
        opts: &CompilationOptions,
        query: &str,
        state: &dyn State,
        desc: &CommandDataDescription,
        arguments: &A,
    ) -> Result<Response<Vec<R>>, Error>
    where
        A: QueryArgs,
        R: QueryResult,
    {
        let arg_buf = match Self::encode_arguments(desc, arguments) {
            Ok(arg_buf) => arg_buf,
            Err(e) => return Err(e.set::<Description>(desc.clone())),
        };
        let response = self._execute(opts, query, state, desc, &arg_buf).await?;

        let out_desc = desc.output().map_err(ProtocolEncodingError::with_source)?;
        match out_desc.root_pos() {
            Some(root_pos) => {
                let ctx = out_desc.as_queryable_context();
                let mut state = R::prepare(&ctx, root_pos)?;
                response.map(|data| {
                    data.into_iter()
                        .flat_map(|chunk| chunk.data)
                        .map(|chunk| R::decode(&mut state, &chunk))
                        .collect::<Result<Vec<_>, _>>()
                })
            }
            None => Err(NoResultExpected::build()),
        }
    }

    /// Parse and execute in one go, without consulting any cache.
    pub async fn query<R, A>(
        &mut self,
        query: &str,
        arguments: &A,
        state: &dyn State,
        allow_capabilities: Capabilities,
        io_format: IoFormat,
        cardinality: Cardinality,
    ) -> Result<Response<Vec<R>>, Error>
    where
        A: QueryArgs,
        R: QueryResult,
    {
        let mut caps = QueryCapabilities::Unparsed;
        let result = async {
            let flags = CompilationOptions {
                implicit_limit: None,
                implicit_typenames: false,
                implicit_typeids: false,
                explicit_objectids: true,
                allow_capabilities,
                io_format,
                expected_cardinality: cardinality,
            };
            let desc = self.parse(&flags, query, state).await?;
            caps = QueryCapabilities::Parsed(desc.capabilities);
            self.execute_with_description(&flags, query, state, &desc, arguments)
                .await
        }
        .await;
        result.map_err(|e| e.set::<QueryCapabilities>(caps))
    }

    /// Run a query for its side effects.
    pub async fn execute<A>(
        &mut self,
        query: &str,
        arguments: &A,
        state: &dyn State,
        allow_capabilities: Capabilities,
    ) -> Result<Response<()>, Error>
    where
        A: QueryArgs,
    {
        let mut caps = QueryCapabilities::Unparsed;
        let result: Result<_, Error> = async {
            let flags = CompilationOptions {
                implicit_limit: None,
                implicit_typenames: false,
                implicit_typeids: false,
                explicit_objectids: true,
                allow_capabilities,
                io_format: IoFormat::Binary,
                expected_cardinality: Cardinality::Many,
            };
            let desc = self.parse(&flags, query, state).await?;
            caps = QueryCapabilities::Parsed(desc.capabilities);
            let arg_buf = match Self::encode_arguments(&desc, arguments) {
                Ok(arg_buf) => arg_buf,
                Err(e) => return Err(e.set::<Description>(desc)),
            };
            let response = self._execute(&flags, query, state, &desc, &arg_buf).await?;
            response.map(|_| Ok::<_, Error>(()))
        }
        .await;
        result.map_err(|e| e.set::<QueryCapabilities>(caps))
    }
}

impl PoolConnection {
    pub async fn parse(
        &mut self,
        flags: &CompilationOptions,
        query: &str,
        state: &dyn State,
    ) -> Result<CommandDataDescription, Error> {
        self.inner().parse(flags, query, state).await
    }

    pub async fn statement(&mut self, query: &str, state: &dyn State) -> Result<(), Error> {
        self.inner().statement(query, state).await
    }

    pub fn proto(&self) -> &sedge_protocol::features::ProtocolVersion {
        &self
            .inner
            .as_ref()
            .expect("connection is not dropped")
            .proto
    }

    pub fn inner(&mut self) -> &mut Connection {
        self.inner.as_mut().expect("connection is not dropped")
    }
}
