//! h2srv - HTTP/2 server core
//!
//! This crate implements the server side of HTTP/2 framing: connection
//! preface and SETTINGS negotiation, a frame codec, the per-stream state
//! machine of RFC 7540 Section 5.1, and HPACK header compression (RFC 7541).

pub mod http;
