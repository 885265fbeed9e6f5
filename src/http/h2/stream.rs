//! HTTP/2 stream management
//!
//! This module implements the stream lifecycle of RFC 7540 Section 5.1 from
//! the server's point of view. Every received frame is checked against the
//! stream's current state before anything is changed, so a rejected frame
//! leaves the stream exactly as it was.

use super::codec::FrameCodec;
use super::error::{Error, ErrorCode, Result};
use super::frames::{DataFrame, Frame, FrameFlags, FrameType, HeadersFrame, PrioritySpec};
use super::hpack::{HeaderCompression, HeaderField};
use super::MAX_STREAM_ID;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Stream ID type
pub type StreamId = u32;

/// Stream state as defined in RFC 7540 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Reserved (local): PUSH_PROMISE sent
    ReservedLocal,
    /// Reserved (remote): PUSH_PROMISE received
    ReservedRemote,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// Which side moved a stream into `Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    /// The peer ended or reset the stream
    Remote,
    /// We ended or reset the stream
    Local,
}

/// HTTP/2 stream
#[derive(Debug)]
pub struct H2Stream {
    id: StreamId,
    state: StreamState,
    closed_by: Option<ClosedBy>,
    priority: Option<PrioritySpec>,
    /// Request header fields in receipt order
    headers: Vec<HeaderField>,
    /// Request body, DATA payloads in receipt order
    body: BytesMut,
    headers_received: bool,
    /// We sent RST_STREAM; later frames from the peer are ignored
    reset_sent: bool,
}

impl H2Stream {
    /// Create a new idle stream
    pub fn new(id: StreamId) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            closed_by: None,
            priority: None,
            headers: Vec::new(),
            body: BytesMut::new(),
            headers_received: false,
            reset_sent: false,
        }
    }

    /// Get stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Get stream state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Which side closed the stream, once it is closed
    pub fn closed_by(&self) -> Option<ClosedBy> {
        self.closed_by
    }

    /// Get priority
    pub fn priority(&self) -> Option<&PrioritySpec> {
        self.priority.as_ref()
    }

    /// Received request header fields
    pub fn headers(&self) -> &[HeaderField] {
        &self.headers
    }

    /// Received request body so far
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Check if a HEADERS frame has been received
    pub fn headers_received(&self) -> bool {
        self.headers_received
    }

    /// Take the assembled request, leaving the buffers empty
    pub fn take_request(&mut self) -> (Vec<HeaderField>, Bytes) {
        (
            std::mem::take(&mut self.headers),
            std::mem::take(&mut self.body).freeze(),
        )
    }

    fn transition(&mut self, state: StreamState, closed_by: ClosedBy) {
        if state != self.state {
            debug!(stream_id = self.id, from = ?self.state, to = ?state, "stream state change");
        }
        if state == StreamState::Closed && self.closed_by.is_none() {
            self.closed_by = Some(closed_by);
        }
        self.state = state;
    }

    /// Check whether `frame` may be received in the current state
    ///
    /// Violations in the idle, reserved and open states are connection
    /// errors; frames arriving after the peer has half-closed or closed the
    /// stream are stream errors STREAM_CLOSED. Anything received after we
    /// sent RST_STREAM is accepted and then ignored.
    pub fn check_frame(&self, frame: &Frame) -> Result<()> {
        let kind = frame.frame_type();
        let allowed = match self.state {
            StreamState::Idle => matches!(
                kind,
                FrameType::Headers | FrameType::PushPromise | FrameType::Priority
            ),
            StreamState::ReservedLocal => matches!(
                kind,
                FrameType::RstStream | FrameType::Priority | FrameType::WindowUpdate
            ),
            StreamState::ReservedRemote => matches!(
                kind,
                FrameType::Headers | FrameType::RstStream | FrameType::Priority
            ),
            StreamState::Open | StreamState::HalfClosedLocal => match kind {
                FrameType::Headers => !self.headers_received,
                FrameType::Data
                | FrameType::RstStream
                | FrameType::Priority
                | FrameType::WindowUpdate => true,
                _ => false,
            },
            StreamState::HalfClosedRemote => {
                if matches!(
                    kind,
                    FrameType::WindowUpdate | FrameType::Priority | FrameType::RstStream
                ) {
                    return Ok(());
                }
                return Err(Error::stream_closed(self.id));
            }
            StreamState::Closed => {
                if self.reset_sent {
                    return Ok(());
                }
                let tolerated = match self.closed_by {
                    Some(ClosedBy::Local) => matches!(
                        kind,
                        FrameType::Priority | FrameType::WindowUpdate | FrameType::RstStream
                    ),
                    _ => kind == FrameType::Priority,
                };
                if tolerated {
                    return Ok(());
                }
                return Err(Error::stream_closed(self.id));
            }
        };

        if allowed {
            Ok(())
        } else {
            Err(Error::protocol(format!(
                "{} frame on stream {} in state {:?}",
                kind.name(),
                self.id,
                self.state
            )))
        }
    }

    /// Process a received frame
    ///
    /// Returns true once the request is complete and ready to dispatch.
    pub fn receive_frame(&mut self, frame: &Frame) -> Result<bool> {
        self.check_frame(frame)?;
        if self.reset_sent {
            trace!(
                stream_id = self.id,
                frame_type = frame.frame_type().name(),
                "frame on reset stream ignored"
            );
            return Ok(false);
        }

        match frame {
            Frame::Headers(headers) => Ok(self.receive_headers(headers)),
            Frame::Data(data) => Ok(self.receive_data(data)),
            Frame::PushPromise(_) => {
                self.transition(StreamState::ReservedRemote, ClosedBy::Remote);
                Ok(false)
            }
            Frame::Priority(priority) => {
                self.priority = Some(priority.priority);
                Ok(false)
            }
            Frame::RstStream(rst) => {
                debug!(stream_id = self.id, code = %rst.error_code, "stream reset by peer");
                self.clear();
                self.transition(StreamState::Closed, ClosedBy::Remote);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn receive_headers(&mut self, frame: &HeadersFrame) -> bool {
        let next = match (self.state, frame.end_stream) {
            (StreamState::Idle, false) => StreamState::Open,
            (StreamState::Idle, true) => StreamState::HalfClosedRemote,
            (StreamState::ReservedRemote, false) => StreamState::HalfClosedLocal,
            (StreamState::ReservedRemote, true) => StreamState::Closed,
            (StreamState::Open, true) => StreamState::HalfClosedRemote,
            (StreamState::HalfClosedLocal, true) => StreamState::Closed,
            (state, _) => state,
        };

        self.headers.extend(frame.fields.iter().cloned());
        self.headers_received = true;
        if let Some(priority) = frame.priority {
            self.priority = Some(priority);
        }
        self.transition(next, ClosedBy::Remote);

        frame.end_stream
    }

    fn receive_data(&mut self, frame: &DataFrame) -> bool {
        self.body.extend_from_slice(&frame.data);

        if frame.end_stream {
            let next = match self.state {
                StreamState::Open => StreamState::HalfClosedRemote,
                StreamState::HalfClosedLocal => StreamState::Closed,
                state => state,
            };
            self.transition(next, ClosedBy::Remote);
        }

        frame.end_stream
    }

    /// Prepare to send HEADERS
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        let next = match (self.state, end_stream) {
            (StreamState::Idle, false) => StreamState::Open,
            (StreamState::Idle, true) => StreamState::HalfClosedLocal,
            (StreamState::ReservedLocal, false) => StreamState::HalfClosedRemote,
            (StreamState::ReservedLocal, true) => StreamState::Closed,
            (StreamState::Open, true) => StreamState::HalfClosedLocal,
            (StreamState::HalfClosedRemote, true) => StreamState::Closed,
            (StreamState::Open | StreamState::HalfClosedRemote, false) => self.state,
            _ => {
                return Err(Error::stream(
                    self.id,
                    ErrorCode::InternalError,
                    format!("cannot send HEADERS in state {:?}", self.state),
                ))
            }
        };

        self.transition(next, ClosedBy::Local);
        Ok(())
    }

    /// Prepare to send DATA
    pub fn send_data(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::stream(
                self.id,
                ErrorCode::InternalError,
                format!("cannot send DATA in state {:?}", self.state),
            ));
        }

        if end_stream {
            let next = match self.state {
                StreamState::Open => StreamState::HalfClosedLocal,
                _ => StreamState::Closed,
            };
            self.transition(next, ClosedBy::Local);
        }
        Ok(())
    }

    /// Reserve this stream for a server push (PUSH_PROMISE sent)
    pub fn reserve_local(&mut self) -> Result<()> {
        if self.state != StreamState::Idle {
            return Err(Error::internal(format!(
                "cannot reserve stream {} in state {:?}",
                self.id, self.state
            )));
        }
        self.transition(StreamState::ReservedLocal, ClosedBy::Local);
        Ok(())
    }

    /// Close the stream from our side (RST_STREAM sent)
    pub fn reset(&mut self) {
        self.clear();
        self.reset_sent = true;
        self.transition(StreamState::Closed, ClosedBy::Local);
    }

    fn clear(&mut self) {
        self.headers.clear();
        self.body.clear();
    }

    /// Serialize a response onto `out`
    ///
    /// Without explicit headers the status is 404 when there is no body and
    /// 200 otherwise. An empty body is not sent: HEADERS then carries
    /// END_STREAM. The body is split into DATA frames of at most
    /// `max_frame_size` octets, the last one carrying END_STREAM.
    pub fn send_response(
        &mut self,
        compression: &mut HeaderCompression,
        headers: Option<Vec<HeaderField>>,
        body: Option<Bytes>,
        max_frame_size: usize,
        out: &mut BytesMut,
    ) -> Result<()> {
        // Checked before encoding so a refused response leaves HPACK untouched
        if !matches!(
            self.state,
            StreamState::Idle
                | StreamState::ReservedLocal
                | StreamState::Open
                | StreamState::HalfClosedRemote
        ) {
            return Err(Error::stream(
                self.id,
                ErrorCode::InternalError,
                format!("cannot send a response in state {:?}", self.state),
            ));
        }

        let fields = response_fields(headers, body.is_some());
        let body = body.filter(|b| !b.is_empty());
        let end_stream = body.is_none();

        let headers_frame = HeadersFrame::new(self.id, fields, end_stream);
        let Some(block) =
            compression.encode_header_block_within(&headers_frame.fields, max_frame_size)?
        else {
            return Err(Error::stream(
                self.id,
                ErrorCode::InternalError,
                "response header block exceeds peer's maximum frame size",
            ));
        };

        self.send_headers(end_stream)?;
        write_header_block(out, self.id, &block, end_stream);

        if let Some(body) = body {
            let chunk_size = max_frame_size.max(1);
            let chunks = body.len().div_ceil(chunk_size);
            for (i, start) in (0..body.len()).step_by(chunk_size).enumerate() {
                let end = (start + chunk_size).min(body.len());
                let last = i + 1 == chunks;
                self.send_data(last)?;
                out.extend_from_slice(&FrameCodec::encode_data_frame(
                    &DataFrame::new(self.id, body.slice(start..end), last),
                ));
            }
        }

        Ok(())
    }
}

/// Make sure a response header list starts with `:status`
fn response_fields(headers: Option<Vec<HeaderField>>, has_body: bool) -> Vec<HeaderField> {
    match headers {
        None => {
            let status = if has_body { "200" } else { "404" };
            vec![HeaderField::new(":status", status)]
        }
        Some(mut fields) => {
            if !fields.iter().any(|f| f.name == ":status") {
                fields.insert(0, HeaderField::new(":status", "200"));
            }
            fields
        }
    }
}

/// HEADERS frame around an already compressed block, END_HEADERS set
fn write_header_block(out: &mut BytesMut, stream_id: StreamId, block: &[u8], end_stream: bool) {
    let mut flags = FrameFlags::from_u8(FrameFlags::END_HEADERS);
    flags.set_if(FrameFlags::END_STREAM, end_stream);
    out.extend_from_slice(&FrameCodec::encode_header(
        FrameType::Headers,
        flags,
        stream_id,
        block.len(),
    ));
    out.extend_from_slice(block);
}

/// Stream manager
///
/// Owns every stream of one connection. Client streams use odd ids that
/// must increase; pushed streams get even ids allocated here. Closed
/// streams are kept so late frames can be told apart from frames on idle
/// streams.
#[derive(Debug)]
pub struct StreamManager {
    streams: HashMap<StreamId, H2Stream>,
    /// Highest client-initiated stream id seen
    last_client_stream_id: StreamId,
    /// Next id for a pushed stream
    next_push_stream_id: StreamId,
    /// Our advertised limit on concurrent client streams
    max_concurrent_streams: Option<u32>,
    /// Client streams that were open when last looked at
    active_client_streams: Vec<StreamId>,
}

impl StreamManager {
    /// Create an empty stream manager
    pub fn new() -> Self {
        StreamManager {
            streams: HashMap::new(),
            last_client_stream_id: 0,
            next_push_stream_id: 2,
            max_concurrent_streams: None,
            active_client_streams: Vec::new(),
        }
    }

    /// Set maximum concurrent client streams
    pub fn set_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.max_concurrent_streams = max;
    }

    /// Get maximum concurrent client streams
    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    /// Highest client-initiated stream id seen (0 if none)
    pub fn last_client_stream_id(&self) -> StreamId {
        self.last_client_stream_id
    }

    /// Route a stream-addressed frame to its stream
    ///
    /// Returns the stream id when the frame completed a request.
    pub fn receive_frame(&mut self, frame: &Frame) -> Result<Option<StreamId>> {
        let stream_id = frame.stream_id();

        if let Some(stream) = self.streams.get_mut(&stream_id) {
            let complete = stream.receive_frame(frame)?;
            return Ok(complete.then_some(stream_id));
        }

        if let Frame::Headers(_) = frame {
            let stream = self.open_client_stream(stream_id)?;
            let complete = stream.receive_frame(frame)?;
            return Ok(complete.then_some(stream_id));
        }

        // Client ids below the highest one seen were skipped, and are closed
        if stream_id % 2 == 1 && stream_id < self.last_client_stream_id {
            if frame.frame_type() == FrameType::Priority {
                return Ok(None);
            }
            return Err(Error::stream_closed(stream_id));
        }

        H2Stream::new(stream_id).check_frame(frame)?;
        Ok(None)
    }

    /// Create the stream for a client HEADERS frame
    ///
    /// A stream over the concurrency limit is recorded as reset and refused
    /// with REFUSED_STREAM.
    pub fn open_client_stream(&mut self, stream_id: StreamId) -> Result<&mut H2Stream> {
        self.claim_client_id(stream_id)?;

        if let Some(max) = self.max_concurrent_streams {
            if self.active_client_stream_count() >= max as usize {
                self.insert_reset(stream_id);
                return Err(Error::stream(
                    stream_id,
                    ErrorCode::RefusedStream,
                    "concurrent stream limit reached",
                ));
            }
        }

        debug!(stream_id, "stream opened");
        self.active_client_streams.push(stream_id);
        Ok(self
            .streams
            .entry(stream_id)
            .or_insert_with(|| H2Stream::new(stream_id)))
    }

    /// Record a client stream whose HEADERS were rejected before it opened
    ///
    /// The id is used up and the stream is kept as reset, so frames the
    /// client already sent on it are ignored. Ids that could never have
    /// opened a stream are connection errors.
    pub fn reject_client_stream(&mut self, stream_id: StreamId) -> Result<()> {
        if self.streams.contains_key(&stream_id) {
            return Ok(());
        }
        self.claim_client_id(stream_id)?;
        self.insert_reset(stream_id);
        Ok(())
    }

    fn claim_client_id(&mut self, stream_id: StreamId) -> Result<()> {
        if stream_id % 2 == 0 {
            return Err(Error::protocol(format!(
                "client opened even stream {}",
                stream_id
            )));
        }
        if stream_id <= self.last_client_stream_id {
            return Err(Error::protocol(format!(
                "stream {} is not greater than last stream {}",
                stream_id, self.last_client_stream_id
            )));
        }
        self.last_client_stream_id = stream_id;
        Ok(())
    }

    fn insert_reset(&mut self, stream_id: StreamId) {
        let mut stream = H2Stream::new(stream_id);
        stream.reset();
        self.streams.insert(stream_id, stream);
    }

    /// Allocate the next even stream id and reserve it for a push
    pub fn reserve_push_stream(&mut self) -> Result<StreamId> {
        let stream_id = self.next_push_stream_id;
        if stream_id > MAX_STREAM_ID {
            return Err(Error::internal("server push stream ids exhausted"));
        }
        self.next_push_stream_id += 2;

        let mut stream = H2Stream::new(stream_id);
        stream.reserve_local()?;
        self.streams.insert(stream_id, stream);
        Ok(stream_id)
    }

    /// Get a stream by ID
    pub fn get_stream(&self, stream_id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&stream_id)
    }

    /// Get a mutable stream by ID
    pub fn get_stream_mut(&mut self, stream_id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&stream_id)
    }

    /// Number of client streams that are not closed
    pub fn active_client_stream_count(&mut self) -> usize {
        let streams = &self.streams;
        self.active_client_streams
            .retain(|id| streams.get(id).is_some_and(|s| !s.state().is_closed()));
        self.active_client_streams.len()
    }

    /// Get all stream IDs
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::error::ErrorScope;
    use crate::http::h2::frames::{
        ContinuationFrame, GoawayFrame, PingFrame, PriorityFrame, PushPromiseFrame,
        RstStreamFrame, SettingsFrame, WindowUpdateFrame,
    };

    fn request_headers(end_stream: bool) -> Frame {
        Frame::Headers(HeadersFrame::new(
            1,
            vec![
                HeaderField::new(":method", "GET"),
                HeaderField::new(":path", "/"),
            ],
            end_stream,
        ))
    }

    fn data(end_stream: bool, payload: &'static str) -> Frame {
        data_on(1, end_stream, payload)
    }

    fn data_on(stream_id: StreamId, end_stream: bool, payload: &'static str) -> Frame {
        Frame::Data(DataFrame::new(stream_id, Bytes::from_static(payload.as_bytes()), end_stream))
    }

    fn one_of_each() -> Vec<Frame> {
        vec![
            data(false, "x"),
            request_headers(false),
            Frame::Priority(PriorityFrame {
                stream_id: 1,
                priority: PrioritySpec::new(0, false, 15),
            }),
            Frame::RstStream(RstStreamFrame::new(1, ErrorCode::Cancel)),
            Frame::Settings(SettingsFrame::ack()),
            Frame::PushPromise(PushPromiseFrame::new(1, 2, Vec::new())),
            Frame::Ping(PingFrame::new([0; 8])),
            Frame::Goaway(GoawayFrame::new(0, ErrorCode::NoError, Bytes::new())),
            Frame::WindowUpdate(WindowUpdateFrame::new(1, 10)),
            Frame::Continuation(ContinuationFrame {
                stream_id: 1,
                header_block: Bytes::new(),
                end_headers: true,
            }),
        ]
    }

    fn stream_in(state: StreamState, closed_by: Option<ClosedBy>) -> H2Stream {
        let mut stream = H2Stream::new(1);
        stream.state = state;
        stream.closed_by = closed_by;
        if matches!(state, StreamState::Open | StreamState::HalfClosedLocal) {
            stream.headers_received = true;
        }
        stream
    }

    fn allowed(state: StreamState, closed_by: Option<ClosedBy>) -> &'static [FrameType] {
        use FrameType::*;
        match (state, closed_by) {
            (StreamState::Idle, _) => &[Headers, PushPromise, Priority],
            (StreamState::ReservedLocal, _) => &[RstStream, Priority, WindowUpdate],
            (StreamState::ReservedRemote, _) => &[Headers, RstStream, Priority],
            (StreamState::Open | StreamState::HalfClosedLocal, _) => {
                &[Data, RstStream, Priority, WindowUpdate]
            }
            (StreamState::HalfClosedRemote, _) => &[WindowUpdate, Priority, RstStream],
            (StreamState::Closed, Some(ClosedBy::Local)) => &[Priority, WindowUpdate, RstStream],
            (StreamState::Closed, _) => &[Priority],
        }
    }

    #[test]
    fn test_illegal_frames_do_not_mutate_state() {
        let cases = [
            (StreamState::Idle, None),
            (StreamState::ReservedLocal, None),
            (StreamState::ReservedRemote, None),
            (StreamState::Open, None),
            (StreamState::HalfClosedLocal, None),
            (StreamState::HalfClosedRemote, None),
            (StreamState::Closed, Some(ClosedBy::Remote)),
            (StreamState::Closed, Some(ClosedBy::Local)),
        ];

        for (state, closed_by) in cases {
            for frame in one_of_each() {
                let mut stream = stream_in(state, closed_by);
                let result = stream.receive_frame(&frame);

                if allowed(state, closed_by).contains(&frame.frame_type()) {
                    assert!(result.is_ok(), "{:?} should accept {}", state, frame);
                } else {
                    assert!(result.is_err(), "{:?} should reject {}", state, frame);
                    assert_eq!(stream.state(), state);
                    assert_eq!(stream.closed_by(), closed_by);
                    assert!(stream.body().is_empty());
                }
            }
        }
    }

    #[test]
    fn test_error_scope_by_state() {
        let err = stream_in(StreamState::Idle, None)
            .check_frame(&data(false, "x"))
            .unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(err.code(), ErrorCode::ProtocolError);

        let err = stream_in(StreamState::HalfClosedRemote, None)
            .check_frame(&data(false, "x"))
            .unwrap_err();
        assert_eq!(err.scope(), ErrorScope::Stream(1, ErrorCode::StreamClosed));

        let err = stream_in(StreamState::Open, None)
            .check_frame(&request_headers(true))
            .unwrap_err();
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_request_without_body() {
        let mut stream = H2Stream::new(1);
        assert!(stream.receive_frame(&request_headers(true)).unwrap());
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);

        let (headers, body) = stream.take_request();
        assert_eq!(headers.len(), 2);
        assert!(body.is_empty());
    }

    #[test]
    fn test_request_body_concatenated() {
        let mut stream = H2Stream::new(1);
        assert!(!stream.receive_frame(&request_headers(false)).unwrap());
        assert_eq!(stream.state(), StreamState::Open);

        assert!(!stream.receive_frame(&data(false, "body data")).unwrap());
        assert!(stream.receive_frame(&data(true, " more")).unwrap());
        assert_eq!(stream.body(), b"body data more");
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);
    }

    #[test]
    fn test_peer_reset_closes_remotely() {
        let mut stream = H2Stream::new(1);
        stream.receive_frame(&request_headers(false)).unwrap();
        stream
            .receive_frame(&Frame::RstStream(RstStreamFrame::new(1, ErrorCode::Cancel)))
            .unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(stream.closed_by(), Some(ClosedBy::Remote));

        let err = stream
            .receive_frame(&Frame::WindowUpdate(WindowUpdateFrame::new(1, 1)))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::StreamClosed);
    }

    #[test]
    fn test_send_transitions() {
        let mut stream = H2Stream::new(1);
        stream.receive_frame(&request_headers(true)).unwrap();

        stream.send_headers(false).unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);
        stream.send_data(true).unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(stream.closed_by(), Some(ClosedBy::Local));
        assert!(stream.send_data(true).is_err());

        let mut pushed = H2Stream::new(2);
        pushed.reserve_local().unwrap();
        pushed.send_headers(false).unwrap();
        assert_eq!(pushed.state(), StreamState::HalfClosedRemote);
    }

    #[test]
    fn test_send_response_default_status() {
        let mut compression = HeaderCompression::default();
        let mut stream = H2Stream::new(1);
        stream.receive_frame(&request_headers(true)).unwrap();

        let mut out = BytesMut::new();
        stream
            .send_response(&mut compression, None, None, 16384, &mut out)
            .unwrap();
        assert_eq!(stream.state(), StreamState::Closed);

        let header = FrameCodec::decode_header(&out[..9].try_into().unwrap());
        assert_eq!(header.kind(), Some(FrameType::Headers));
        assert!(header.flags.is_end_stream());
        assert!(header.flags.is_end_headers());
        // :status 404 is static index 13
        assert_eq!(&out[9..], &[0x8d]);
    }

    #[test]
    fn test_send_response_chunks_body() {
        let mut compression = HeaderCompression::default();
        let mut stream = H2Stream::new(1);
        stream.receive_frame(&request_headers(true)).unwrap();

        let body = Bytes::from(vec![b'a'; 40]);
        let mut out = BytesMut::new();
        stream
            .send_response(&mut compression, None, Some(body), 16, &mut out)
            .unwrap();

        let mut rest: &[u8] = &out;
        let mut frames = Vec::new();
        while !rest.is_empty() {
            let (header, payload) = FrameCodec::read_frame(&mut rest).unwrap();
            frames.push((header, payload));
        }

        assert_eq!(frames.len(), 4);
        assert!(!frames[0].0.flags.is_end_stream());
        let sizes: Vec<usize> = frames[1..].iter().map(|(h, _)| h.length).collect();
        assert_eq!(sizes, vec![16, 16, 8]);
        assert!(!frames[1].0.flags.is_end_stream());
        assert!(!frames[2].0.flags.is_end_stream());
        assert!(frames[3].0.flags.is_end_stream());
    }

    #[test]
    fn test_send_response_empty_body_ends_on_headers() {
        let mut compression = HeaderCompression::default();
        let mut stream = H2Stream::new(1);
        stream.receive_frame(&request_headers(true)).unwrap();

        let mut out = BytesMut::new();
        stream
            .send_response(&mut compression, None, Some(Bytes::new()), 16384, &mut out)
            .unwrap();

        assert_eq!(out.len(), 10);
        assert_eq!(out[4], 0x5);
        // :status 200 is static index 8
        assert_eq!(out[9], 0x88);
    }

    #[test]
    fn test_send_response_oversized_headers() {
        let mut compression = HeaderCompression::default();
        let mut stream = H2Stream::new(1);
        stream.receive_frame(&request_headers(true)).unwrap();

        let headers = vec![HeaderField::new("x-large", "z".repeat(64))];
        let mut out = BytesMut::new();
        let err = stream
            .send_response(&mut compression, Some(headers), None, 32, &mut out)
            .unwrap_err();

        assert_eq!(err.scope(), ErrorScope::Stream(1, ErrorCode::InternalError));
        assert!(out.is_empty());
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);
        assert!(compression.encoder().table().is_empty());
    }

    #[test]
    fn test_manager_client_ids() {
        let mut manager = StreamManager::new();
        let mut frame = HeadersFrame::new(3, Vec::new(), true);

        assert_eq!(manager.receive_frame(&Frame::Headers(frame.clone())).unwrap(), Some(3));
        assert_eq!(manager.last_client_stream_id(), 3);

        // Reusing or going backwards is a protocol error
        frame.stream_id = 1;
        let err = manager.receive_frame(&Frame::Headers(frame.clone())).unwrap_err();
        assert!(err.is_connection_error());

        frame.stream_id = 4;
        assert!(manager.receive_frame(&Frame::Headers(frame)).is_err());
    }

    #[test]
    fn test_manager_unseen_streams() {
        let mut manager = StreamManager::new();

        // DATA on an idle stream is a connection error, and creates nothing
        let err = manager.receive_frame(&data(false, "x")).unwrap_err();
        assert!(err.is_connection_error());
        assert!(manager.get_stream(1).is_none());

        // PRIORITY on an idle stream is fine
        let priority = Frame::Priority(PriorityFrame {
            stream_id: 9,
            priority: PrioritySpec::new(0, false, 1),
        });
        assert_eq!(manager.receive_frame(&priority).unwrap(), None);

        // Skipped client ids are closed
        manager
            .receive_frame(&Frame::Headers(HeadersFrame::new(5, Vec::new(), false)))
            .unwrap();
        let err = manager.receive_frame(&data(false, "x")).unwrap_err();
        assert_eq!(err.scope(), ErrorScope::Stream(1, ErrorCode::StreamClosed));
    }

    #[test]
    fn test_manager_push_ids() {
        let mut manager = StreamManager::new();
        assert_eq!(manager.reserve_push_stream().unwrap(), 2);
        assert_eq!(manager.reserve_push_stream().unwrap(), 4);
        assert_eq!(
            manager.get_stream(4).map(|s| s.state()),
            Some(StreamState::ReservedLocal)
        );
        assert_eq!(manager.active_client_stream_count(), 0);
    }

    #[test]
    fn test_manager_max_concurrent() {
        let mut manager = StreamManager::new();
        manager.set_max_concurrent_streams(Some(1));

        manager
            .receive_frame(&Frame::Headers(HeadersFrame::new(1, Vec::new(), false)))
            .unwrap();
        let err = manager
            .receive_frame(&Frame::Headers(HeadersFrame::new(3, Vec::new(), false)))
            .unwrap_err();
        assert_eq!(err.scope(), ErrorScope::Stream(3, ErrorCode::RefusedStream));
        assert_eq!(manager.last_client_stream_id(), 3);

        // The refused stream is kept as reset and swallows in-flight frames
        assert_eq!(manager.get_stream(3).map(|s| s.state()), Some(StreamState::Closed));
        assert_eq!(manager.receive_frame(&data_on(3, true, "late")).unwrap(), None);
        assert_eq!(manager.active_client_stream_count(), 1);

        // Closing stream 1 frees the slot
        manager.receive_frame(&data_on(1, true, "")).unwrap();
        manager.get_stream_mut(1).unwrap().send_headers(true).unwrap();
        assert_eq!(manager.active_client_stream_count(), 0);
        manager
            .receive_frame(&Frame::Headers(HeadersFrame::new(5, Vec::new(), true)))
            .unwrap();
        assert_eq!(manager.active_client_stream_count(), 1);
    }

    #[test]
    fn test_manager_reject_client_stream() {
        let mut manager = StreamManager::new();

        manager.reject_client_stream(3).unwrap();
        assert_eq!(manager.last_client_stream_id(), 3);
        assert_eq!(manager.receive_frame(&data_on(3, true, "x")).unwrap(), None);

        // The id cannot be opened again
        let headers = Frame::Headers(HeadersFrame::new(3, Vec::new(), true));
        assert_eq!(manager.receive_frame(&headers).unwrap(), None);
        assert_eq!(manager.get_stream(3).map(|s| s.state()), Some(StreamState::Closed));

        let err = manager.reject_client_stream(4).unwrap_err();
        assert!(err.is_connection_error());
        let err = manager.reject_client_stream(1).unwrap_err();
        assert!(err.is_connection_error());
    }
}
