//! HTTP/2 connection manager
//!
//! [`Connection`] is sans-I/O: the transport feeds it whatever bytes arrive
//! with [`Connection::receive`] and writes out whatever
//! [`Connection::take_output`] returns. Inside, bytes are accumulated until a
//! whole frame is buffered, parsed, and dispatched in arrival order:
//! connection-level frames are answered here, stream frames go through the
//! [`StreamManager`], and completed requests are handed to the
//! [`RequestHandler`].
//!
//! Stream errors reset the offending stream with RST_STREAM and processing
//! continues. Connection errors queue a GOAWAY carrying the highest client
//! stream id seen; after that the connection accepts no more input.

use super::codec::{FrameCodec, FRAME_HEADER_SIZE};
use super::error::{Error, ErrorCode, Result};
use super::frames::{
    Frame, FrameType, GoawayFrame, PingFrame, PushPromiseFrame, RstStreamFrame, SettingsFrame,
};
use super::hpack::HeaderCompression;
use super::router::{Request, RequestHandler, Response};
use super::settings::Settings;
use super::stream::{StreamId, StreamManager};
use super::CONNECTION_PREFACE;
use bytes::{Buf, Bytes, BytesMut};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Per-connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Settings we advertise
    pub settings: Settings,
    /// Whether routes with push resources may push (the peer must allow it too)
    pub enable_push: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            settings: Settings::server_defaults(),
            enable_push: true,
        }
    }
}

/// Server side of one HTTP/2 connection
pub struct Connection {
    config: ConnectionConfig,
    handler: Arc<dyn RequestHandler>,
    compression: HeaderCompression,
    /// Latest settings from the peer, `None` until its first SETTINGS
    peer_settings: Option<Settings>,
    streams: StreamManager,
    /// Inbound bytes not yet consumed
    buffer: BytesMut,
    /// Outbound bytes not yet taken by the transport
    output: BytesMut,
    preface_received: bool,
    goaway_sent: bool,
    goaway_received: bool,
    error: Option<ErrorCode>,
}

impl Connection {
    /// Create a connection that dispatches requests to `handler`
    pub fn new(config: ConnectionConfig, handler: Arc<dyn RequestHandler>) -> Self {
        let mut streams = StreamManager::new();
        streams.set_max_concurrent_streams(config.settings.get_max_concurrent_streams());

        Connection {
            compression: HeaderCompression::new(config.settings.get_header_table_size() as usize),
            config,
            handler,
            peer_settings: None,
            streams,
            buffer: BytesMut::with_capacity(crate::http::READ_CHUNK_SIZE),
            output: BytesMut::new(),
            preface_received: false,
            goaway_sent: false,
            goaway_received: false,
            error: None,
        }
    }

    /// Feed received bytes
    ///
    /// On a connection error the GOAWAY is already queued when this returns
    /// `Err`; the caller should flush [`take_output`](Self::take_output) and
    /// close the transport. Input after that is ignored.
    pub fn receive(&mut self, data: &[u8]) -> Result<()> {
        if self.goaway_sent {
            return Ok(());
        }

        self.buffer.extend_from_slice(data);
        match self.process() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Take everything queued for sending
    pub fn take_output(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    /// Check if output is waiting to be sent
    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Check if either side has sent GOAWAY
    pub fn is_closed(&self) -> bool {
        self.goaway_sent || self.goaway_received
    }

    /// Error code of the connection error that closed us, if any
    pub fn error(&self) -> Option<ErrorCode> {
        self.error
    }

    /// Queue a GOAWAY and stop accepting input
    pub fn go_away(&mut self, code: ErrorCode) {
        if self.goaway_sent {
            return;
        }
        let last_stream_id = self.streams.last_client_stream_id();
        debug!(last_stream_id, %code, "sending GOAWAY");
        self.output.extend_from_slice(&FrameCodec::encode_goaway_frame(&GoawayFrame::new(
            last_stream_id,
            code,
            Bytes::new(),
        )));
        self.goaway_sent = true;
        self.buffer.clear();
    }

    /// Settings we advertise
    pub fn local_settings(&self) -> &Settings {
        &self.config.settings
    }

    /// Settings received from the peer, if any
    pub fn peer_settings(&self) -> Option<&Settings> {
        self.peer_settings.as_ref()
    }

    /// The connection's streams
    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    /// The connection's HPACK context
    pub fn compression(&self) -> &HeaderCompression {
        &self.compression
    }

    fn fail(&mut self, err: &Error) {
        warn!(error = %err, "connection error");
        self.error = Some(err.code());
        self.go_away(err.code());
    }

    fn process(&mut self) -> Result<()> {
        if !self.preface_received {
            let n = self.buffer.len().min(CONNECTION_PREFACE.len());
            if self.buffer[..n] != CONNECTION_PREFACE[..n] {
                return Err(Error::protocol("invalid connection preface"));
            }
            if n < CONNECTION_PREFACE.len() {
                return Ok(());
            }

            self.buffer.advance(CONNECTION_PREFACE.len());
            self.preface_received = true;
            debug!("connection preface received");
            self.output.extend_from_slice(&FrameCodec::encode_settings_frame(&SettingsFrame::new(
                self.config.settings.clone(),
            )));
        }

        let max_frame_size = self.config.settings.get_max_frame_size() as usize;
        while !self.goaway_sent {
            let Some(length) = FrameCodec::peek_length(&self.buffer) else {
                break;
            };
            if length > max_frame_size {
                return Err(Error::frame_size(format!(
                    "frame of {} octets exceeds maximum {}",
                    length, max_frame_size
                )));
            }
            if self.buffer.len() < FRAME_HEADER_SIZE + length {
                break;
            }

            let frame = self.buffer.split_to(FRAME_HEADER_SIZE + length);
            if self.peer_settings.is_none() && frame[3] != FrameType::Settings.as_u8() {
                return Err(Error::protocol("first frame after preface is not SETTINGS"));
            }

            let result = self.process_frame(&frame);

            // HEADERS refused before its stream opened still uses up the id
            let rejected = match &result {
                Err(Error::Stream { stream_id, .. })
                    if frame[3] == FrameType::Headers.as_u8() =>
                {
                    Some(*stream_id)
                }
                _ => None,
            };
            if let Some(stream_id) = rejected {
                self.streams.reject_client_stream(stream_id)?;
            }
            self.recover(result)?;
        }

        Ok(())
    }

    /// Turn a stream error into RST_STREAM; connection errors pass through
    fn recover(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Err(Error::Stream {
                stream_id,
                code,
                reason,
            }) => {
                warn!(stream_id, %code, %reason, "stream error");
                self.reset_stream(stream_id, code);
                Ok(())
            }
            other => other,
        }
    }

    fn reset_stream(&mut self, stream_id: StreamId, code: ErrorCode) {
        if let Some(stream) = self.streams.get_stream_mut(stream_id) {
            stream.reset();
        }
        self.output
            .extend_from_slice(&FrameCodec::encode_rst_stream_frame(&RstStreamFrame::new(
                stream_id, code,
            )));
    }

    fn process_frame(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(frame) = FrameCodec::parse(&mut self.compression, bytes)? else {
            trace!(frame_type = bytes[3], "unknown frame type ignored");
            return Ok(());
        };
        trace!(frame = %frame, "frame received");

        match frame {
            Frame::Settings(settings) => self.on_settings(settings),
            Frame::Ping(ping) => {
                if !ping.ack {
                    self.output
                        .extend_from_slice(&FrameCodec::encode_ping_frame(&PingFrame::ack(ping.data)));
                }
                Ok(())
            }
            Frame::Goaway(goaway) => {
                debug!(
                    last_stream_id = goaway.last_stream_id,
                    code = %goaway.error_code,
                    "GOAWAY received"
                );
                self.goaway_received = true;
                Ok(())
            }
            // Flow control windows are not tracked
            Frame::WindowUpdate(update) if update.stream_id == 0 => Ok(()),
            Frame::PushPromise(_) => Err(Error::protocol("client sent PUSH_PROMISE")),
            Frame::Continuation(_) => Err(Error::protocol("unexpected CONTINUATION frame")),
            frame => match self.streams.receive_frame(&frame)? {
                Some(stream_id) => self.dispatch(stream_id),
                None => Ok(()),
            },
        }
    }

    fn on_settings(&mut self, frame: SettingsFrame) -> Result<()> {
        if frame.ack {
            if self.peer_settings.is_none() {
                return Err(Error::protocol("SETTINGS ACK before peer SETTINGS"));
            }
            debug!("SETTINGS acknowledged by peer");
            return Ok(());
        }

        let mut settings = self.peer_settings.take().unwrap_or_default();
        settings.merge(&frame.settings);
        self.compression
            .set_max_dynamic_table_size_limit(settings.get_header_table_size() as usize);
        debug!(settings = ?settings, "peer SETTINGS applied");
        self.peer_settings = Some(settings);

        self.output
            .extend_from_slice(&FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
        Ok(())
    }

    fn peer_max_frame_size(&self) -> usize {
        self.peer_settings
            .as_ref()
            .map_or(super::DEFAULT_MAX_FRAME_SIZE, Settings::get_max_frame_size) as usize
    }

    fn push_enabled(&self) -> bool {
        self.config.enable_push
            && self.peer_settings.as_ref().map_or(true, Settings::get_enable_push)
    }

    fn dispatch(&mut self, stream_id: StreamId) -> Result<()> {
        let Some(stream) = self.streams.get_stream_mut(stream_id) else {
            return Err(Error::internal(format!("completed stream {} not found", stream_id)));
        };
        let (headers, body) = stream.take_request();
        let request = Request::from_parts(stream_id, headers, body)?;

        debug!(stream_id, method = %request.method, path = %request.path, "request");
        let response = self.handler.handle_request(&request);
        self.send_response(stream_id, response)
    }

    fn send_response(&mut self, stream_id: StreamId, mut response: Response) -> Result<()> {
        let max_frame_size = self.peer_max_frame_size();

        let mut promised = Vec::new();
        if self.push_enabled() {
            for push in std::mem::take(&mut response.pushes) {
                let promised_stream_id = self.streams.reserve_push_stream()?;
                let promise = PushPromiseFrame::new(stream_id, promised_stream_id, push.request_headers);
                match FrameCodec::encode_push_promise_frame(&promise, &mut self.compression) {
                    Ok(bytes) => {
                        debug!(stream_id, promised_stream_id, "PUSH_PROMISE");
                        self.output.extend_from_slice(&bytes);
                        promised.push((promised_stream_id, push.response));
                    }
                    Err(err) => {
                        // Never announced, so no RST_STREAM for this one
                        if let Some(stream) = self.streams.get_stream_mut(promised_stream_id) {
                            stream.reset();
                        }
                        self.cancel_pushes(&promised);
                        return Err(err);
                    }
                }
            }
        }

        if let Err(err) = self.send_on_stream(stream_id, response, max_frame_size) {
            self.cancel_pushes(&promised);
            return Err(err);
        }

        for (promised_stream_id, pushed) in promised {
            let result = self.send_on_stream(promised_stream_id, pushed, max_frame_size);
            self.recover(result)?;
        }
        Ok(())
    }

    fn cancel_pushes(&mut self, promised: &[(StreamId, Response)]) {
        for &(promised_stream_id, _) in promised {
            debug!(promised_stream_id, "cancelling pushed stream");
            self.reset_stream(promised_stream_id, ErrorCode::Cancel);
        }
    }

    fn send_on_stream(
        &mut self,
        stream_id: StreamId,
        response: Response,
        max_frame_size: usize,
    ) -> Result<()> {
        let Some(stream) = self.streams.get_stream_mut(stream_id) else {
            return Err(Error::internal(format!("stream {} not found", stream_id)));
        };
        stream.send_response(
            &mut self.compression,
            response.headers,
            response.body,
            max_frame_size,
            &mut self.output,
        )
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("peer_settings", &self.peer_settings)
            .field("streams", &self.streams)
            .field("buffered", &self.buffer.len())
            .field("goaway_sent", &self.goaway_sent)
            .field("goaway_received", &self.goaway_received)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}
