//! HTTP transport layer for h2srv
//!
//! # Architecture
//!
//! The transport uses a session operations abstraction so the HTTP/2 core
//! never touches sockets directly:
//!
//! - `SessionOps` trait defines operations (poll, read, write, close)
//! - `HttpSession` wraps a `SessionOps` and applies the idle timeout
//! - `h2::Connection` consumes inbound bytes and produces outbound bytes
//!
//! # Examples
//!
//! ```no_run
//! use h2srv::http::h2::{H2ServerBuilder, Response, Router};
//! use bytes::Bytes;
//!
//! let mut router = Router::new();
//! router.route("GET", "/", |_req: &h2srv::http::h2::Request| {
//!     Response::with_body(Bytes::from_static(b"Hello, world!\n"))
//! });
//!
//! let server = H2ServerBuilder::new()
//!     .address("127.0.0.1")
//!     .port(8080)
//!     .router(router)
//!     .build()
//!     .unwrap();
//! server.serve().unwrap();
//! ```

pub mod h2;
pub mod session;

pub use session::{from_tcp_stream, FdSessionOps, HttpSession, PollEvents, SessionOps};

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Size of a single socket read
pub const READ_CHUNK_SIZE: usize = 16384;
