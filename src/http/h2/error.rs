//! HTTP/2 error types
//!
//! Errors are split by the scope they are fatal to: a connection error
//! tears the whole connection down with GOAWAY, a stream error closes one
//! stream with RST_STREAM and processing continues (RFC 7540 Section 5.4).

use std::fmt;

/// HTTP/2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the transport layer
    #[error("HTTP error: {0}")]
    Http(#[from] crate::http::Error),

    /// Connection-fatal protocol violation
    #[error("Connection error {code}: {reason}")]
    Connection {
        /// Code sent in the GOAWAY frame
        code: ErrorCode,
        /// Human-readable description
        reason: String,
    },

    /// Stream-fatal protocol violation
    #[error("Stream {stream_id} error {code}: {reason}")]
    Stream {
        /// Offending stream
        stream_id: u32,
        /// Code sent in the RST_STREAM frame
        code: ErrorCode,
        /// Human-readable description
        reason: String,
    },
}

/// What an error is fatal to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// The whole connection must be terminated with GOAWAY
    Connection(ErrorCode),
    /// Only the given stream must be reset
    Stream(u32, ErrorCode),
}

impl Error {
    /// Connection error with an explicit code
    pub fn connection(code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::Connection {
            code,
            reason: reason.into(),
        }
    }

    /// Connection error PROTOCOL_ERROR
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::ProtocolError, reason)
    }

    /// Connection error FRAME_SIZE_ERROR
    pub fn frame_size(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::FrameSizeError, reason)
    }

    /// Connection error COMPRESSION_ERROR
    pub fn compression(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::CompressionError, reason)
    }

    /// Connection error INTERNAL_ERROR
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::InternalError, reason)
    }

    /// Stream error with an explicit code
    pub fn stream(stream_id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::Stream {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    /// Stream error STREAM_CLOSED
    pub fn stream_closed(stream_id: u32) -> Self {
        Self::stream(stream_id, ErrorCode::StreamClosed, "frame received on closed stream")
    }

    /// Scope this error is fatal to
    pub fn scope(&self) -> ErrorScope {
        match self {
            Error::Connection { code, .. } => ErrorScope::Connection(*code),
            Error::Stream {
                stream_id, code, ..
            } => ErrorScope::Stream(*stream_id, *code),
            Error::Io(_) | Error::Http(_) => ErrorScope::Connection(ErrorCode::InternalError),
        }
    }

    /// Error code carried on the wire for this error
    pub fn code(&self) -> ErrorCode {
        match self.scope() {
            ErrorScope::Connection(code) | ErrorScope::Stream(_, code) => code,
        }
    }

    /// Check if this error terminates the connection
    pub fn is_connection_error(&self) -> bool {
        matches!(self.scope(), ErrorScope::Connection(_))
    }
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError = 0x0,
    /// Protocol error detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits exceeded
    FlowControlError = 0x3,
    /// Settings not acknowledged
    SettingsTimeout = 0x4,
    /// Frame received for closed stream
    StreamClosed = 0x5,
    /// Frame size incorrect
    FrameSizeError = 0x6,
    /// Stream not processed
    RefusedStream = 0x7,
    /// Stream cancelled
    Cancel = 0x8,
    /// Compression state not updated
    CompressionError = 0x9,
    /// TCP connection error for CONNECT method
    ConnectError = 0xa,
    /// Processing capacity exceeded
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity = 0xc,
    /// Use HTTP/1.1 for the request
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Convert error code to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create error code from u32
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x4 => Some(ErrorCode::SettingsTimeout),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::RefusedStream),
            0x8 => Some(ErrorCode::Cancel),
            0x9 => Some(ErrorCode::CompressionError),
            0xa => Some(ErrorCode::ConnectError),
            0xb => Some(ErrorCode::EnhanceYourCalm),
            0xc => Some(ErrorCode::InadequateSecurity),
            0xd => Some(ErrorCode::Http11Required),
            _ => None,
        }
    }

    /// Create error code from a received u32; unknown codes read as INTERNAL_ERROR
    pub fn from_wire(code: u32) -> Self {
        Self::from_u32(code).unwrap_or(ErrorCode::InternalError)
    }

    /// Get error name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;
