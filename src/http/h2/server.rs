//! HTTP/2 server over plain TCP
//!
//! The server binds a listener, accepts connections, and drives each one on
//! its own thread: bytes read from the socket are fed to a [`Connection`]
//! and whatever it queues is written back. A connection idle for longer than
//! the configured timeout is sent GOAWAY(NO_ERROR) and closed.

use super::connection::{Connection, ConnectionConfig};
use super::error::{Error, ErrorCode, Result};
use super::router::{RequestHandler, Router};
use super::settings::{Settings, SettingsBuilder};
use crate::http::session::{from_tcp_stream, FdSessionOps, HttpSession};
use crate::http::READ_CHUNK_SIZE;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default idle timeout
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Listen backlog passed to `listen(2)`
const LISTEN_BACKLOG: i32 = 128;

/// HTTP/2 server
#[derive(Clone)]
pub struct H2Server {
    address: String,
    port: u16,
    config: ConnectionConfig,
    idle_timeout: Option<Duration>,
    handler: Arc<dyn RequestHandler>,
}

impl H2Server {
    /// Address the server binds to
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Port the server binds to
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Per-connection configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Bind the listening socket
    pub fn bind(&self) -> Result<TcpListener> {
        let addr = (self.address.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("no address for {}:{}", self.address, self.port),
                ))
            })?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;

        Ok(socket.into())
    }

    /// Bind and serve until accepting fails permanently
    pub fn serve(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve_on(listener)
    }

    /// Serve connections accepted from an already bound listener
    pub fn serve_on(&self, listener: TcpListener) -> Result<()> {
        let local: SocketAddr = listener.local_addr()?;
        info!(%local, "HTTP/2 server listening");

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => self.spawn_connection(stream),
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let config = self.config.clone();
        let handler = Arc::clone(&self.handler);
        let idle_timeout = self.idle_timeout;

        debug!(%peer, "connection accepted");
        let spawned = thread::Builder::new()
            .name(format!("h2-{}", peer))
            .spawn(move || {
                let session = from_tcp_stream(stream);
                match serve_connection(session, Connection::new(config, handler), idle_timeout) {
                    Ok(()) => debug!(%peer, "connection finished"),
                    Err(e) => warn!(%peer, error = %e, "connection failed"),
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn connection thread");
        }
    }
}

impl std::fmt::Debug for H2Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Server")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("config", &self.config)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

/// Drive one connection until either side closes it
///
/// The session is closed on return.
pub fn serve_connection(
    mut session: HttpSession<FdSessionOps>,
    mut connection: Connection,
    idle_timeout: Option<Duration>,
) -> Result<()> {
    session.set_timeout(idle_timeout);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    let result = loop {
        let n = match session.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(crate::http::Error::Timeout) => {
                debug!("idle timeout");
                connection.go_away(ErrorCode::NoError);
                break flush(&mut session, &mut connection);
            }
            Err(e) => break Err(Error::from(e)),
        };

        let received = connection.receive(&buf[..n]);
        if let Err(e) = flush(&mut session, &mut connection) {
            break Err(e);
        }
        if let Err(e) = received {
            break Err(e);
        }
        if connection.is_closed() {
            break Ok(());
        }
    };

    session.close()?;
    result
}

fn flush(session: &mut HttpSession<FdSessionOps>, connection: &mut Connection) -> Result<()> {
    let output = connection.take_output();
    if !output.is_empty() {
        session.write_all(&output)?;
    }
    Ok(())
}

/// Builder for [`H2Server`]
pub struct H2ServerBuilder {
    address: String,
    port: u16,
    settings: SettingsBuilder,
    enable_push: bool,
    idle_timeout: Option<Duration>,
    handler: Option<Arc<dyn RequestHandler>>,
}

impl H2ServerBuilder {
    /// Create a builder listening on 0.0.0.0:80 with default settings
    pub fn new() -> Self {
        H2ServerBuilder {
            address: "0.0.0.0".to_string(),
            port: 80,
            settings: SettingsBuilder::from_settings(Settings::server_defaults()),
            enable_push: true,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            handler: None,
        }
    }

    /// Set the bind address
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the bind port (0 picks an ephemeral port)
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set SETTINGS_HEADER_TABLE_SIZE
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings = self.settings.header_table_size(size);
        self
    }

    /// Set SETTINGS_MAX_CONCURRENT_STREAMS
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings = self.settings.max_concurrent_streams(max);
        self
    }

    /// Set SETTINGS_INITIAL_WINDOW_SIZE
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings = self.settings.initial_window_size(size);
        self
    }

    /// Set SETTINGS_MAX_FRAME_SIZE
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings = self.settings.max_frame_size(size);
        self
    }

    /// Set SETTINGS_MAX_HEADER_LIST_SIZE
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings = self.settings.max_header_list_size(size);
        self
    }

    /// Allow routes to push resources
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.enable_push = enable;
        self
    }

    /// Set the idle timeout; `None` waits forever
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Dispatch requests through `router`
    pub fn router(self, router: Router) -> Self {
        self.handler(router)
    }

    /// Dispatch requests to a custom handler
    pub fn handler(mut self, handler: impl RequestHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Validate the settings and build the server
    pub fn build(self) -> Result<H2Server> {
        let settings = self.settings.build()?;

        Ok(H2Server {
            address: self.address,
            port: self.port,
            config: ConnectionConfig {
                settings,
                enable_push: self.enable_push,
            },
            idle_timeout: self.idle_timeout,
            handler: self.handler.unwrap_or_else(|| Arc::new(Router::new())),
        })
    }
}

impl Default for H2ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
