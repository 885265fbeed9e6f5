//! HTTP/2 frame encoding and decoding
//!
//! [`FrameCodec::parse`] turns one complete frame (9-byte header plus
//! payload) into a typed [`Frame`], applying the per-type validity rules of
//! RFC 7540 Section 6. The `encode_*` functions go the other way. HEADERS
//! and PUSH_PROMISE pass through the connection's HPACK context in both
//! directions.

use super::error::{Error, ErrorCode, Result};
use super::frames::*;
use super::hpack::HeaderCompression;
use super::settings::Settings;
use super::MAX_STREAM_ID;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Largest payload length a 24-bit length field can carry
pub const MAX_FRAME_SIZE: usize = 0x00FF_FFFF;

/// Size of one SETTINGS entry (2-byte id + 4-byte value)
const SETTINGS_ENTRY_SIZE: usize = 6;

/// Frame codec for encoding/decoding HTTP/2 frames
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame header
    pub fn encode_header(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        length: usize,
    ) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        header[3] = frame_type.as_u8();
        header[4] = flags.as_u8();

        // Stream ID (31 bits, big-endian, reserved bit is 0)
        header[5..9].copy_from_slice(&(stream_id & MAX_STREAM_ID).to_be_bytes());

        header
    }

    /// Decode a frame header; the reserved stream id bit is ignored
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
        let length = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);
        let stream_id =
            u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & MAX_STREAM_ID;

        FrameHeader {
            length,
            frame_type: bytes[3],
            flags: FrameFlags::from_u8(bytes[4]),
            stream_id,
        }
    }

    /// Read the 24-bit payload length from the start of a buffer
    ///
    /// Returns `None` until at least 3 bytes are available.
    pub fn peek_length(buf: &[u8]) -> Option<usize> {
        match buf {
            [a, b, c, ..] => Some(((*a as usize) << 16) | ((*b as usize) << 8) | (*c as usize)),
            _ => None,
        }
    }

    /// Parse one complete frame
    ///
    /// Returns `Ok(None)` for frame types this endpoint does not know; the
    /// caller discards those.
    pub fn parse(compression: &mut HeaderCompression, bytes: &[u8]) -> Result<Option<Frame>> {
        let Some((head, payload)) = bytes.split_first_chunk::<FRAME_HEADER_SIZE>() else {
            return Err(Error::frame_size("truncated frame header"));
        };
        let header = Self::decode_header(head);
        if payload.len() != header.length {
            return Err(Error::frame_size(format!(
                "frame declares {} payload octets, got {}",
                header.length,
                payload.len()
            )));
        }

        let Some(kind) = header.kind() else {
            return Ok(None);
        };

        let frame = match kind {
            FrameType::Data => Frame::Data(Self::parse_data(&header, payload)?),
            FrameType::Headers => Frame::Headers(Self::parse_headers(compression, &header, payload)?),
            FrameType::Priority => Frame::Priority(Self::parse_priority(&header, payload)?),
            FrameType::RstStream => Frame::RstStream(Self::parse_rst_stream(&header, payload)?),
            FrameType::Settings => Frame::Settings(Self::parse_settings(&header, payload)?),
            FrameType::PushPromise => {
                Frame::PushPromise(Self::parse_push_promise(compression, &header, payload)?)
            }
            FrameType::Ping => Frame::Ping(Self::parse_ping(&header, payload)?),
            FrameType::Goaway => Frame::Goaway(Self::parse_goaway(&header, payload)?),
            FrameType::WindowUpdate => {
                Frame::WindowUpdate(Self::parse_window_update(&header, payload)?)
            }
            FrameType::Continuation => {
                Frame::Continuation(Self::parse_continuation(&header, payload)?)
            }
        };

        Ok(Some(frame))
    }

    fn require_stream(header: &FrameHeader) -> Result<()> {
        if header.stream_id == 0 {
            return Err(Error::protocol(format!(
                "{} frame on stream 0",
                FrameType::from_u8(header.frame_type).map_or("unknown", |t| t.name())
            )));
        }
        Ok(())
    }

    fn require_connection(header: &FrameHeader) -> Result<()> {
        if header.stream_id != 0 {
            return Err(Error::protocol(format!(
                "{} frame on stream {}",
                FrameType::from_u8(header.frame_type).map_or("unknown", |t| t.name()),
                header.stream_id
            )));
        }
        Ok(())
    }

    /// Split off the pad length octet and trailing padding
    ///
    /// A pad length of zero still occupies its octet.
    fn strip_padding<'a>(header: &FrameHeader, payload: &'a [u8]) -> Result<(&'a [u8], Option<u8>)> {
        if !header.flags.is_padded() {
            return Ok((payload, None));
        }

        let Some((&pad_len, rest)) = payload.split_first() else {
            return Err(Error::frame_size("padded frame without pad length"));
        };
        if pad_len as usize >= payload.len() {
            return Err(Error::protocol(format!(
                "pad length {} not less than frame length {}",
                pad_len,
                payload.len()
            )));
        }

        Ok((&rest[..rest.len() - pad_len as usize], Some(pad_len)))
    }

    fn read_priority(stream_id: u32, mut src: &[u8]) -> Result<PrioritySpec> {
        let dependency = src.get_u32();
        let weight = src.get_u8();
        let priority = PrioritySpec::new(dependency & MAX_STREAM_ID, dependency & 0x8000_0000 != 0, weight);

        if priority.stream_dependency == stream_id {
            return Err(Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                "stream depends on itself",
            ));
        }
        Ok(priority)
    }

    fn parse_data(header: &FrameHeader, payload: &[u8]) -> Result<DataFrame> {
        Self::require_stream(header)?;
        let (data, padding) = Self::strip_padding(header, payload)?;

        Ok(DataFrame {
            stream_id: header.stream_id,
            data: Bytes::copy_from_slice(data),
            end_stream: header.flags.is_end_stream(),
            padding,
        })
    }

    fn parse_headers(
        compression: &mut HeaderCompression,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<HeadersFrame> {
        Self::require_stream(header)?;
        let (mut block, padding) = Self::strip_padding(header, payload)?;

        let spec = if header.flags.is_priority() {
            if block.len() < 5 {
                return Err(Error::frame_size("HEADERS priority block truncated"));
            }
            let (spec, rest) = block.split_at(5);
            block = rest;
            Some(spec)
        } else {
            None
        };

        if !header.flags.is_end_headers() {
            return Err(Error::protocol(
                "header blocks split across CONTINUATION frames are not supported",
            ));
        }

        // The block is decoded even if the stream is then rejected, or the
        // dynamic table would fall out of sync with the peer's
        let fields = compression.decode_header_block(block)?;
        let priority = spec
            .map(|spec| Self::read_priority(header.stream_id, spec))
            .transpose()?;

        Ok(HeadersFrame {
            stream_id: header.stream_id,
            fields,
            end_stream: header.flags.is_end_stream(),
            end_headers: true,
            priority,
            padding,
        })
    }

    fn parse_priority(header: &FrameHeader, payload: &[u8]) -> Result<PriorityFrame> {
        Self::require_stream(header)?;
        if payload.len() != 5 {
            return Err(Error::stream(
                header.stream_id,
                ErrorCode::FrameSizeError,
                format!("PRIORITY payload of {} octets", payload.len()),
            ));
        }

        Ok(PriorityFrame {
            stream_id: header.stream_id,
            priority: Self::read_priority(header.stream_id, payload)?,
        })
    }

    fn parse_rst_stream(header: &FrameHeader, mut payload: &[u8]) -> Result<RstStreamFrame> {
        Self::require_stream(header)?;
        if payload.len() != 4 {
            return Err(Error::frame_size(format!(
                "RST_STREAM payload of {} octets",
                payload.len()
            )));
        }

        Ok(RstStreamFrame::new(
            header.stream_id,
            ErrorCode::from_wire(payload.get_u32()),
        ))
    }

    fn parse_settings(header: &FrameHeader, payload: &[u8]) -> Result<SettingsFrame> {
        Self::require_connection(header)?;

        if header.flags.is_ack() {
            if !payload.is_empty() {
                return Err(Error::frame_size("SETTINGS ACK with payload"));
            }
            return Ok(SettingsFrame::ack());
        }

        if payload.len() % SETTINGS_ENTRY_SIZE != 0 {
            return Err(Error::frame_size(format!(
                "SETTINGS payload of {} octets is not a multiple of 6",
                payload.len()
            )));
        }

        let mut settings = Settings::new();
        for mut entry in payload.chunks_exact(SETTINGS_ENTRY_SIZE) {
            let id = entry.get_u16();
            let value = entry.get_u32();
            settings.apply(id, value)?;
        }

        Ok(SettingsFrame::new(settings))
    }

    fn parse_push_promise(
        compression: &mut HeaderCompression,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<PushPromiseFrame> {
        Self::require_stream(header)?;
        let (mut block, padding) = Self::strip_padding(header, payload)?;

        if block.len() < 4 {
            return Err(Error::frame_size("PUSH_PROMISE without promised stream id"));
        }
        let promised_stream_id = block.get_u32() & MAX_STREAM_ID;

        if !header.flags.is_end_headers() {
            return Err(Error::protocol(
                "header blocks split across CONTINUATION frames are not supported",
            ));
        }

        Ok(PushPromiseFrame {
            stream_id: header.stream_id,
            promised_stream_id,
            fields: compression.decode_header_block(block)?,
            end_headers: true,
            padding,
        })
    }

    fn parse_ping(header: &FrameHeader, payload: &[u8]) -> Result<PingFrame> {
        Self::require_connection(header)?;
        let data: [u8; 8] = payload
            .try_into()
            .map_err(|_| Error::frame_size(format!("PING payload of {} octets", payload.len())))?;

        Ok(PingFrame {
            ack: header.flags.is_ack(),
            data,
        })
    }

    fn parse_goaway(header: &FrameHeader, mut payload: &[u8]) -> Result<GoawayFrame> {
        Self::require_connection(header)?;
        if payload.len() < 8 {
            return Err(Error::frame_size(format!(
                "GOAWAY payload of {} octets",
                payload.len()
            )));
        }

        let last_stream_id = payload.get_u32() & MAX_STREAM_ID;
        let error_code = ErrorCode::from_wire(payload.get_u32());
        Ok(GoawayFrame::new(
            last_stream_id,
            error_code,
            Bytes::copy_from_slice(payload),
        ))
    }

    fn parse_window_update(header: &FrameHeader, mut payload: &[u8]) -> Result<WindowUpdateFrame> {
        if payload.len() != 4 {
            return Err(Error::frame_size(format!(
                "WINDOW_UPDATE payload of {} octets",
                payload.len()
            )));
        }

        let size_increment = payload.get_u32() & MAX_STREAM_ID;
        if size_increment == 0 {
            let reason = "WINDOW_UPDATE with zero increment";
            return Err(if header.stream_id == 0 {
                Error::protocol(reason)
            } else {
                Error::stream(header.stream_id, ErrorCode::ProtocolError, reason)
            });
        }

        Ok(WindowUpdateFrame::new(header.stream_id, size_increment))
    }

    fn parse_continuation(header: &FrameHeader, payload: &[u8]) -> Result<ContinuationFrame> {
        Self::require_stream(header)?;
        Ok(ContinuationFrame {
            stream_id: header.stream_id,
            header_block: Bytes::copy_from_slice(payload),
            end_headers: header.flags.is_end_headers(),
        })
    }

    /// Serialize any frame, compressing header lists through `compression`
    pub fn encode_frame(frame: &Frame, compression: &mut HeaderCompression) -> Result<Bytes> {
        Ok(match frame {
            Frame::Data(f) => Self::encode_data_frame(f),
            Frame::Headers(f) => Self::encode_headers_frame(f, compression)?,
            Frame::Priority(f) => Self::encode_priority_frame(f),
            Frame::RstStream(f) => Self::encode_rst_stream_frame(f),
            Frame::Settings(f) => Self::encode_settings_frame(f),
            Frame::PushPromise(f) => Self::encode_push_promise_frame(f, compression)?,
            Frame::Ping(f) => Self::encode_ping_frame(f),
            Frame::Goaway(f) => Self::encode_goaway_frame(f),
            Frame::WindowUpdate(f) => Self::encode_window_update_frame(f),
            Frame::Continuation(f) => Self::encode_continuation_frame(f),
        })
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::END_STREAM, frame.end_stream);
        Self::encode_padded(FrameType::Data, flags, frame.stream_id, &[], &frame.data, frame.padding)
    }

    /// Encode a HEADERS frame
    pub fn encode_headers_frame(
        frame: &HeadersFrame,
        compression: &mut HeaderCompression,
    ) -> Result<Bytes> {
        let block = compression.encode_header_block(&frame.fields)?;

        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::END_STREAM, frame.end_stream);
        flags.set_if(FrameFlags::END_HEADERS, frame.end_headers);

        let mut prefix = BytesMut::new();
        if let Some(priority) = &frame.priority {
            flags.set(FrameFlags::PRIORITY);
            let mut dep = priority.stream_dependency & MAX_STREAM_ID;
            if priority.exclusive {
                dep |= 0x8000_0000;
            }
            prefix.put_u32(dep);
            prefix.put_u8(priority.weight);
        }

        Ok(Self::encode_padded(
            FrameType::Headers,
            flags,
            frame.stream_id,
            &prefix,
            &block,
            frame.padding,
        ))
    }

    /// Encode a PUSH_PROMISE frame
    pub fn encode_push_promise_frame(
        frame: &PushPromiseFrame,
        compression: &mut HeaderCompression,
    ) -> Result<Bytes> {
        let block = compression.encode_header_block(&frame.fields)?;

        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::END_HEADERS, frame.end_headers);

        let promised = (frame.promised_stream_id & MAX_STREAM_ID).to_be_bytes();
        Ok(Self::encode_padded(
            FrameType::PushPromise,
            flags,
            frame.stream_id,
            &promised,
            &block,
            frame.padding,
        ))
    }

    /// Shared layout of DATA, HEADERS and PUSH_PROMISE:
    /// [pad length] prefix body [padding]
    fn encode_padded(
        frame_type: FrameType,
        mut flags: FrameFlags,
        stream_id: u32,
        prefix: &[u8],
        body: &[u8],
        padding: Option<u8>,
    ) -> Bytes {
        let mut payload_len = prefix.len() + body.len();
        if let Some(pad_len) = padding {
            flags.set(FrameFlags::PADDED);
            payload_len += 1 + pad_len as usize;
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(frame_type, flags, stream_id, payload_len));
        if let Some(pad_len) = padding {
            buf.put_u8(pad_len);
        }
        buf.put_slice(prefix);
        buf.put_slice(body);
        if let Some(pad_len) = padding {
            buf.put_bytes(0, pad_len as usize);
        }

        buf.freeze()
    }

    /// Encode a SETTINGS frame
    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        let entries = if frame.ack {
            Vec::new()
        } else {
            frame.settings.entries()
        };

        let payload_len = entries.len() * SETTINGS_ENTRY_SIZE;
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(FrameType::Settings, flags, 0, payload_len));
        for (param, value) in entries {
            buf.put_u16(param.as_u16());
            buf.put_u32(value);
        }

        buf.freeze()
    }

    /// Encode a PING frame
    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);
        buf.put_slice(&Self::encode_header(FrameType::Ping, flags, 0, 8));
        buf.put_slice(&frame.data);

        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let payload_len = 8 + frame.debug_data.len();

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(FrameType::Goaway, FrameFlags::empty(), 0, payload_len));
        buf.put_u32(frame.last_stream_id & MAX_STREAM_ID);
        buf.put_u32(frame.error_code.as_u32());
        buf.put_slice(&frame.debug_data);

        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(
            FrameType::WindowUpdate,
            FrameFlags::empty(),
            frame.stream_id,
            4,
        ));
        buf.put_u32(frame.size_increment & MAX_STREAM_ID);

        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(
            FrameType::RstStream,
            FrameFlags::empty(),
            frame.stream_id,
            4,
        ));
        buf.put_u32(frame.error_code.as_u32());

        buf.freeze()
    }

    /// Encode a PRIORITY frame
    pub fn encode_priority_frame(frame: &PriorityFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 5);
        buf.put_slice(&Self::encode_header(
            FrameType::Priority,
            FrameFlags::empty(),
            frame.stream_id,
            5,
        ));

        let mut dep = frame.priority.stream_dependency & MAX_STREAM_ID;
        if frame.priority.exclusive {
            dep |= 0x8000_0000;
        }
        buf.put_u32(dep);
        buf.put_u8(frame.priority.weight);

        buf.freeze()
    }

    /// Encode a CONTINUATION frame
    pub fn encode_continuation_frame(frame: &ContinuationFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::END_HEADERS, frame.end_headers);

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.header_block.len());
        buf.put_slice(&Self::encode_header(
            FrameType::Continuation,
            flags,
            frame.stream_id,
            frame.header_block.len(),
        ));
        buf.put_slice(&frame.header_block);

        buf.freeze()
    }

    /// Read one raw frame (header and payload) from any blocking reader
    pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<(FrameHeader, Bytes)> {
        let mut head = [0u8; FRAME_HEADER_SIZE];
        reader.read_exact(&mut head)?;
        let header = Self::decode_header(&head);

        let mut payload = vec![0u8; header.length];
        reader.read_exact(&mut payload)?;

        Ok((header, Bytes::from(payload)))
    }
}

impl Frame {
    /// Serialize this frame to wire bytes
    pub fn encode(&self, compression: &mut HeaderCompression) -> Result<Bytes> {
        FrameCodec::encode_frame(self, compression)
    }
}
