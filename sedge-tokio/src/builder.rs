/*!
Connection configuration.

The core consumes a ready [`Config`] record; discovering one from project
files, credential files or the environment is the business of outer layers.
*/

use std::fmt;
use std::time::Duration;

use sedge_errors::{ClientError, Error, ErrorKind};

pub const DEFAULT_PORT: u16 = 5656;
pub const DEFAULT_POOL_SIZE: usize = 100;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WAIT: Duration = Duration::from_secs(30);

/// TLS validation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsSecurity {
    /// Full certificate and hostname validation.
    #[default]
    Strict,
    /// Validate the certificate chain but not the hostname.
    NoHostVerification,
    /// Accept any certificate.
    Insecure,
}

/// Transport the client tunnels the binary protocol over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Tcp,
    /// Recognized for configuration compatibility; not implemented.
    Http,
}

/// Everything needed to reach and authenticate against one server.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub branch: String,
    pub tls_security: TlsSecurity,
    /// PEM bundle overriding the system trust roots.
    pub tls_ca: Option<String>,
    /// Overrides the name used for SNI and certificate validation.
    pub tls_server_name: Option<String>,
    pub client_type: ClientType,
    pub connect_timeout: Duration,
    /// Deadline for a single command; a command cut off by it leaves the
    /// connection unusable and the pool replaces it.
    pub command_timeout: Option<Duration>,
    /// How long to keep retrying on temporary connection failures.
    pub wait_until_available: Duration,
    pub max_connections: Option<usize>,
    /// Skip TLS entirely. Only for talking to in-process test servers.
    #[doc(hidden)]
    pub insecure_plaintext: bool,
}

/// Builds a [`Config`] in code.
#[derive(Clone)]
pub struct Builder {
    host: Option<String>,
    port: u16,
    user: String,
    password: Option<String>,
    database: String,
    branch: String,
    tls_security: TlsSecurity,
    tls_ca: Option<String>,
    tls_server_name: Option<String>,
    client_type: ClientType,
    connect_timeout: Duration,
    command_timeout: Option<Duration>,
    wait_until_available: Duration,
    max_connections: Option<usize>,
    insecure_plaintext: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "..."))
            .field("database", &self.database)
            .field("branch", &self.branch)
            .field("tls_security", &self.tls_security)
            .field("client_type", &self.client_type)
            .finish_non_exhaustive()
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            host: None,
            port: DEFAULT_PORT,
            user: "admin".into(),
            password: None,
            database: "main".into(),
            branch: "main".into(),
            tls_security: TlsSecurity::default(),
            tls_ca: None,
            tls_server_name: None,
            client_type: ClientType::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: None,
            wait_until_available: DEFAULT_WAIT,
            max_connections: None,
            insecure_plaintext: false,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Builder {
        self.host = Some(host.into());
        self
    }
    pub fn port(mut self, port: u16) -> Builder {
        self.port = port;
        self
    }
    pub fn user(mut self, user: impl Into<String>) -> Builder {
        self.user = user.into();
        self
    }
    pub fn password(mut self, password: impl Into<String>) -> Builder {
        self.password = Some(password.into());
        self
    }
    pub fn database(mut self, database: impl Into<String>) -> Builder {
        self.database = database.into();
        self
    }
    pub fn branch(mut self, branch: impl Into<String>) -> Builder {
        self.branch = branch.into();
        self
    }
    pub fn tls_security(mut self, tls_security: TlsSecurity) -> Builder {
        self.tls_security = tls_security;
        self
    }
    pub fn tls_ca(mut self, pem: impl Into<String>) -> Builder {
        self.tls_ca = Some(pem.into());
        self
    }
    pub fn tls_server_name(mut self, name: impl Into<String>) -> Builder {
        self.tls_server_name = Some(name.into());
        self
    }
    pub fn client_type(mut self, client_type: ClientType) -> Builder {
        self.client_type = client_type;
        self
    }
    pub fn connect_timeout(mut self, timeout: Duration) -> Builder {
        self.connect_timeout = timeout;
        self
    }
    pub fn command_timeout(mut self, timeout: Duration) -> Builder {
        self.command_timeout = Some(timeout);
        self
    }
    pub fn wait_until_available(mut self, wait: Duration) -> Builder {
        self.wait_until_available = wait;
        self
    }
    pub fn max_connections(mut self, max_connections: usize) -> Builder {
        self.max_connections = Some(max_connections);
        self
    }
    #[doc(hidden)]
    pub fn insecure_plaintext(mut self, on: bool) -> Builder {
        self.insecure_plaintext = on;
        self
    }

    pub fn build(self) -> Result<Config, Error> {
        let host = self
            .host
            .ok_or_else(|| ClientError::with_message("no host configured"))?;
        Ok(Config {
            host,
            port: self.port,
            user: self.user,
            password: self.password,
            database: self.database,
            branch: self.branch,
            tls_security: self.tls_security,
            tls_ca: self.tls_ca,
            tls_server_name: self.tls_server_name,
            client_type: self.client_type,
            connect_timeout: self.connect_timeout,
            command_timeout: self.command_timeout,
            wait_until_available: self.wait_until_available,
            max_connections: self.max_connections,
            insecure_plaintext: self.insecure_plaintext,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = Builder::new().host("localhost").build().unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.branch, "main");
        assert_eq!(config.tls_security, TlsSecurity::Strict);
        assert!(config.max_connections.is_none());
    }

    #[test]
    fn builder_requires_host() {
        assert!(Builder::new().build().is_err());
    }
}
