//! HTTP/2 protocol implementation
//!
//! Server side of RFC 7540 over cleartext TCP, with HPACK (RFC 7541)
//! header compression.
//!
//! # Architecture
//!
//! The layers are kept independent of each other and of I/O:
//!
//! - **hpack**: header block encoding and decoding, one dynamic table per
//!   direction
//! - **codec**: bytes to [`Frame`] and back, including per-frame validation
//! - **stream**: the RFC 7540 §5.1 state machine and the [`StreamManager`]
//!   that owns every stream of a connection
//! - **connection**: sans-I/O [`Connection`] fed with raw bytes, producing
//!   the bytes to send
//! - **router**: maps `(method, path)` to handlers, optionally with resources
//!   to push
//! - **server**: socket listener that drives one [`Connection`] per client
//!
//! ## Not supported
//!
//! - Flow control windows are not tracked; WINDOW_UPDATE is accepted and
//!   ignored
//! - Header blocks must fit in a single HEADERS frame (no CONTINUATION)
//! - Priority is parsed but not used for scheduling
//!
//! # Examples
//!
//! ```no_run
//! use h2srv::http::h2::{H2ServerBuilder, PushResource, Request, Response, Router};
//!
//! let mut router = Router::new();
//! router.route_with_push(
//!     "GET",
//!     "/",
//!     |_req: &Request| Response::with_body("Hello, world!\n"),
//!     vec![PushResource::new("GET", "/style.css", |_req: &Request| {
//!         Response::with_body("body { color: red }")
//!             .header("content-type", "text/css")
//!     })],
//! );
//!
//! let server = H2ServerBuilder::new()
//!     .address("127.0.0.1")
//!     .port(8080)
//!     .max_concurrent_streams(100)
//!     .router(router)
//!     .build()?;
//! server.serve()?;
//! # Ok::<(), h2srv::http::h2::Error>(())
//! ```
//!
//! Without a socket, a [`Connection`] can be driven directly:
//!
//! ```
//! use h2srv::http::h2::{Connection, ConnectionConfig, Router, CONNECTION_PREFACE};
//! use std::sync::Arc;
//!
//! let mut conn = Connection::new(ConnectionConfig::default(), Arc::new(Router::new()));
//! conn.receive(CONNECTION_PREFACE).unwrap();
//! let server_settings = conn.take_output();
//! assert_eq!(server_settings[3], 0x4);
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod frames;
pub mod hpack;
pub mod router;
pub mod server;
pub mod settings;
pub mod stream;

pub use codec::FrameCodec;
pub use connection::{Connection, ConnectionConfig};
pub use error::{Error, ErrorCode, Result};
pub use frames::{
    DataFrame, Frame, FrameFlags, FrameHeader, FrameType, GoawayFrame, HeadersFrame, PingFrame,
    PushPromiseFrame, RstStreamFrame, SettingsFrame, WindowUpdateFrame,
};
pub use hpack::{HeaderCompression, HeaderField};
pub use router::{Handler, PushResource, Request, RequestHandler, Response, Router};
pub use server::{H2Server, H2ServerBuilder};
pub use settings::{Settings, SettingsBuilder, SettingsParameter};
pub use stream::{H2Stream, StreamId, StreamManager, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Header list size advertised by the server
pub const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 1024;

/// Largest SETTINGS_MAX_FRAME_SIZE a peer may announce (2^24 - 1)
pub const MAX_FRAME_SIZE_UPPER_BOUND: u32 = 0xFFFFFF;

/// Largest flow control window (2^31 - 1)
pub const MAX_WINDOW_SIZE: u32 = 0x7FFFFFFF;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
