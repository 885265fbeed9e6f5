//! HTTP/2 connection integration tests
//!
//! These tests drive a sans-I/O `Connection` the way a client would:
//! - Preface and SETTINGS exchange
//! - Request dispatch and response framing
//! - Body fragmentation against the peer's frame size
//! - Stream and connection error handling
//! - Server push

use bytes::Bytes;
use h2srv::http::h2::codec::FRAME_HEADER_SIZE;
use h2srv::http::h2::frames::{PriorityFrame, PrioritySpec};
use h2srv::http::h2::*;
use std::sync::Arc;

fn hello_router() -> Router {
    let mut router = Router::new();
    router
        .route("GET", "/", |_req: &Request| {
            Response::with_body("Hello, world!\n")
        })
        .route("POST", "/echo", |req: &Request| {
            Response::with_body(req.body.clone().unwrap_or_default())
        })
        .route("GET", "/large", |_req: &Request| {
            Response::with_body(vec![b'x'; 40_000])
        })
        .route("GET", "/created", |_req: &Request| {
            Response::with_status(201).header("content-type", "text/plain")
        });
    router
}

struct Client {
    conn: Connection,
    hpack: HeaderCompression,
}

impl Client {
    fn new(router: Router) -> Self {
        Self::with_config(ConnectionConfig::default(), router)
    }

    fn with_config(config: ConnectionConfig, router: Router) -> Self {
        Client {
            conn: Connection::new(config, Arc::new(router)),
            hpack: HeaderCompression::default(),
        }
    }

    /// Preface plus SETTINGS, discarding the server's handshake frames
    fn handshake(&mut self, settings: Settings) {
        self.conn.receive(CONNECTION_PREFACE).unwrap();
        self.conn
            .receive(&FrameCodec::encode_settings_frame(&SettingsFrame::new(settings)))
            .unwrap();
        self.conn.take_output();
    }

    fn send(&mut self, frame: Frame) -> Result<()> {
        let bytes = frame.encode(&mut self.hpack).unwrap();
        self.conn.receive(&bytes)
    }

    fn request(&mut self, stream_id: u32, method: &str, path: &str, end_stream: bool) -> Result<()> {
        self.send(Frame::Headers(HeadersFrame::new(
            stream_id,
            vec![
                HeaderField::new(":method", method),
                HeaderField::new(":scheme", "http"),
                HeaderField::new(":path", path),
                HeaderField::new(":authority", "localhost"),
            ],
            end_stream,
        )))
    }

    fn frames(&mut self) -> Vec<Frame> {
        let output = self.conn.take_output();
        let mut rest = &output[..];
        let mut frames = Vec::new();
        while !rest.is_empty() {
            let len = FRAME_HEADER_SIZE + FrameCodec::peek_length(rest).unwrap();
            let (frame, tail) = rest.split_at(len);
            frames.push(FrameCodec::parse(&mut self.hpack, frame).unwrap().unwrap());
            rest = tail;
        }
        frames
    }
}

fn headers(frame: &Frame) -> &HeadersFrame {
    match frame {
        Frame::Headers(h) => h,
        other => panic!("expected HEADERS, got {}", other),
    }
}

fn data(frame: &Frame) -> &DataFrame {
    match frame {
        Frame::Data(d) => d,
        other => panic!("expected DATA, got {}", other),
    }
}

#[test]
fn test_settings_handshake_bytes() {
    let mut conn = Connection::new(ConnectionConfig::default(), Arc::new(hello_router()));

    conn.receive(CONNECTION_PREFACE).unwrap();
    conn.receive(&[0, 0, 0, 0x4, 0, 0, 0, 0, 0]).unwrap();
    let output = conn.take_output();

    // Server SETTINGS: five parameters of six octets each
    assert_eq!(&output[..9], &[0, 0, 30, 0x4, 0, 0, 0, 0, 0]);
    assert_eq!(
        &output[9..39],
        &[
            0, 1, 0, 0, 0x10, 0, // HEADER_TABLE_SIZE 4096
            0, 2, 0, 0, 0, 1, // ENABLE_PUSH 1
            0, 4, 0, 0, 0xff, 0xff, // INITIAL_WINDOW_SIZE 65535
            0, 5, 0, 0, 0x40, 0, // MAX_FRAME_SIZE 16384
            0, 6, 0, 0, 0x4, 0, // MAX_HEADER_LIST_SIZE 1024
        ]
    );
    // Then the ACK for the client's SETTINGS
    assert_eq!(&output[39..], &[0, 0, 0, 0x4, 0x1, 0, 0, 0, 0]);
}

#[test]
fn test_get_root() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    client.request(1, "GET", "/", true).unwrap();
    let frames = client.frames();
    assert_eq!(frames.len(), 2);

    let h = headers(&frames[0]);
    assert_eq!(h.stream_id, 1);
    assert_eq!(h.fields, vec![HeaderField::new(":status", "200")]);
    assert!(!h.end_stream);

    let d = data(&frames[1]);
    assert_eq!(d.data, Bytes::from_static(b"Hello, world!\n"));
    assert!(d.end_stream);

    assert_eq!(
        client.conn.streams().get_stream(1).unwrap().state(),
        StreamState::Closed
    );
}

#[test]
fn test_not_found() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    client.request(1, "GET", "/missing", true).unwrap();
    let frames = client.frames();
    assert_eq!(frames.len(), 1);

    let h = headers(&frames[0]);
    assert_eq!(h.get(":status"), Some("404"));
    assert!(h.end_stream);
}

#[test]
fn test_custom_error_handler() {
    let mut router = hello_router();
    router.error_handler(|req: &Request| Response::with_body(format!("no route for {}\n", req.path)));
    let mut client = Client::new(router);
    client.handshake(Settings::new());

    client.request(1, "GET", "/missing", true).unwrap();
    let frames = client.frames();
    assert_eq!(headers(&frames[0]).get(":status"), Some("404"));
    assert_eq!(data(&frames[1]).data, Bytes::from_static(b"no route for /missing\n"));
}

#[test]
fn test_explicit_status_and_headers() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    client.request(1, "GET", "/created", true).unwrap();
    let frames = client.frames();
    assert_eq!(frames.len(), 1);

    let h = headers(&frames[0]);
    assert_eq!(h.get(":status"), Some("201"));
    assert_eq!(h.get("content-type"), Some("text/plain"));
    assert!(h.end_stream);
}

#[test]
fn test_post_body_collected() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    client.request(1, "POST", "/echo", false).unwrap();
    client
        .send(Frame::Data(DataFrame::new(1, Bytes::from_static(b"ping "), false)))
        .unwrap();
    // Nothing is dispatched before END_STREAM
    assert!(client.frames().is_empty());

    client
        .send(Frame::Data(
            DataFrame::new(1, Bytes::from_static(b"pong"), true).with_padding(3),
        ))
        .unwrap();
    let frames = client.frames();
    assert_eq!(data(&frames[1]).data, Bytes::from_static(b"ping pong"));
}

#[test]
fn test_body_split_by_default_frame_size() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    client.request(1, "GET", "/large", true).unwrap();
    let frames = client.frames();
    assert_eq!(frames.len(), 4);

    let sizes: Vec<usize> = frames[1..].iter().map(|f| data(f).data.len()).collect();
    assert_eq!(sizes, vec![16384, 16384, 7232]);

    let end_flags: Vec<bool> = frames[1..].iter().map(|f| data(f).end_stream).collect();
    assert_eq!(end_flags, vec![false, false, true]);
}

#[test]
fn test_body_split_by_peer_frame_size() {
    let mut client = Client::new(hello_router());
    client.handshake(SettingsBuilder::new().max_frame_size(20_000).build().unwrap());

    client.request(1, "GET", "/large", true).unwrap();
    let frames = client.frames();
    let sizes: Vec<usize> = frames[1..].iter().map(|f| data(f).data.len()).collect();
    assert_eq!(sizes, vec![20_000, 20_000]);
}

#[test]
fn test_request_fed_one_byte_at_a_time() {
    let mut client = Client::new(hello_router());
    let mut wire = CONNECTION_PREFACE.to_vec();
    wire.extend_from_slice(&FrameCodec::encode_settings_frame(&SettingsFrame::new(
        Settings::new(),
    )));
    wire.extend_from_slice(
        &Frame::Headers(HeadersFrame::new(
            1,
            vec![
                HeaderField::new(":method", "GET"),
                HeaderField::new(":path", "/"),
            ],
            true,
        ))
        .encode(&mut client.hpack)
        .unwrap(),
    );

    for byte in wire {
        client.conn.receive(&[byte]).unwrap();
    }

    let frames = client.frames();
    let kinds: Vec<FrameType> = frames.iter().map(Frame::frame_type).collect();
    assert_eq!(
        kinds,
        vec![
            FrameType::Settings,
            FrameType::Settings,
            FrameType::Headers,
            FrameType::Data
        ]
    );
}

#[test]
fn test_multiple_streams_in_order() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    client.request(1, "GET", "/", true).unwrap();
    client.request(3, "GET", "/missing", true).unwrap();
    client.request(5, "GET", "/", true).unwrap();

    let ids: Vec<u32> = client.frames().iter().map(Frame::stream_id).collect();
    assert_eq!(ids, vec![1, 1, 3, 5, 5]);
    assert_eq!(client.conn.streams().last_client_stream_id(), 5);
}

#[test]
fn test_ping() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    client.send(Frame::Ping(PingFrame::new(*b"12345678"))).unwrap();
    assert_eq!(client.frames(), vec![Frame::Ping(PingFrame::ack(*b"12345678"))]);
}

#[test]
fn test_frame_over_max_size() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    let err = client
        .send(Frame::Data(DataFrame::new(1, Bytes::from(vec![0u8; 16385]), true)))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FrameSizeError);

    match &client.frames()[..] {
        [Frame::Goaway(g)] => assert_eq!(g.error_code, ErrorCode::FrameSizeError),
        other => panic!("expected GOAWAY, got {:?}", other),
    }
}

#[test]
fn test_invalid_preface() {
    let mut client = Client::new(hello_router());
    let err = client.conn.receive(b"PRI * HTTP/1.1\r\n\r\nSM\r\n\r\n").unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);
    assert!(client.conn.is_closed());

    match &client.frames()[..] {
        [Frame::Goaway(g)] => {
            assert_eq!(g.error_code, ErrorCode::ProtocolError);
            assert_eq!(g.last_stream_id, 0);
        }
        other => panic!("expected GOAWAY, got {:?}", other),
    }
}

#[test]
fn test_even_stream_id_is_connection_error() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    let err = client.request(2, "GET", "/", true).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);
    assert_eq!(client.conn.error(), Some(ErrorCode::ProtocolError));
}

#[test]
fn test_client_push_promise_is_connection_error() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());
    client.request(1, "GET", "/", false).unwrap();

    let err = client
        .send(Frame::PushPromise(PushPromiseFrame::new(
            1,
            2,
            vec![HeaderField::new(":method", "GET")],
        )))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);

    let frames = client.frames();
    match frames.last() {
        Some(Frame::Goaway(g)) => assert_eq!(g.last_stream_id, 1),
        other => panic!("expected GOAWAY, got {:?}", other),
    }
}

#[test]
fn test_priority_self_dependency_resets_stream() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    client
        .send(Frame::Priority(PriorityFrame {
            stream_id: 3,
            priority: PrioritySpec::new(3, false, 16),
        }))
        .unwrap();
    assert_eq!(
        client.frames(),
        vec![Frame::RstStream(RstStreamFrame::new(3, ErrorCode::ProtocolError))]
    );
    assert!(!client.conn.is_closed());
}

#[test]
fn test_rst_stream_from_client() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    client.request(1, "POST", "/echo", false).unwrap();
    client
        .send(Frame::RstStream(RstStreamFrame::new(1, ErrorCode::Cancel)))
        .unwrap();
    assert!(client.frames().is_empty());
    assert_eq!(
        client.conn.streams().get_stream(1).unwrap().state(),
        StreamState::Closed
    );

    // Frames on the reset stream other than PRIORITY are refused
    client
        .send(Frame::Data(DataFrame::new(1, Bytes::from_static(b"x"), true)))
        .unwrap();
    assert_eq!(
        client.frames(),
        vec![Frame::RstStream(RstStreamFrame::new(1, ErrorCode::StreamClosed))]
    );
}

#[test]
fn test_max_concurrent_streams() {
    let config = ConnectionConfig {
        settings: SettingsBuilder::from_settings(Settings::server_defaults())
            .max_concurrent_streams(1)
            .build()
            .unwrap(),
        enable_push: false,
    };
    let mut client = Client::with_config(config, hello_router());
    client.handshake(Settings::new());

    client.request(1, "POST", "/echo", false).unwrap();
    client.request(3, "GET", "/", true).unwrap();
    assert_eq!(
        client.frames(),
        vec![Frame::RstStream(RstStreamFrame::new(3, ErrorCode::RefusedStream))]
    );

    // Finishing stream 1 frees the slot
    client
        .send(Frame::Data(DataFrame::new(1, Bytes::from_static(b"done"), true)))
        .unwrap();
    client.frames();
    client.request(5, "GET", "/", true).unwrap();
    assert_eq!(client.frames().len(), 2);
}

#[test]
fn test_data_on_refused_stream_is_ignored() {
    let config = ConnectionConfig {
        settings: SettingsBuilder::from_settings(Settings::server_defaults())
            .max_concurrent_streams(1)
            .build()
            .unwrap(),
        enable_push: false,
    };
    let mut client = Client::with_config(config, hello_router());
    client.handshake(Settings::new());

    client.request(1, "POST", "/echo", false).unwrap();
    client.request(3, "POST", "/echo", false).unwrap();
    assert_eq!(
        client.frames(),
        vec![Frame::RstStream(RstStreamFrame::new(3, ErrorCode::RefusedStream))]
    );

    // The client's DATA was already in flight when the refusal arrived
    client
        .send(Frame::Data(DataFrame::new(3, Bytes::from_static(b"late"), true)))
        .unwrap();
    assert!(client.frames().is_empty());
    assert!(!client.conn.is_closed());

    // Stream 1 is unaffected
    client
        .send(Frame::Data(DataFrame::new(1, Bytes::from_static(b"done"), true)))
        .unwrap();
    let frames = client.frames();
    assert_eq!(headers(&frames[0]).get(":status"), Some("200"));
    assert_eq!(data(&frames[1]).data, Bytes::from_static(b"done"));
}

#[test]
fn test_server_push() {
    let mut router = Router::new();
    router.route_with_push(
        "GET",
        "/",
        |_req: &Request| Response::with_body("Hello, world!\n"),
        vec![
            PushResource::new("GET", "/1", |_req: &Request| {
                Response::with_body("Server push 1.\n")
            }),
            PushResource::new("GET", "/2", |_req: &Request| {
                Response::with_body("Server push 2.\n")
            }),
        ],
    );
    let mut client = Client::new(router);
    client.handshake(Settings::new());

    client.request(1, "GET", "/", true).unwrap();
    let frames = client.frames();

    let promised: Vec<(u32, Option<String>)> = frames
        .iter()
        .filter_map(|f| match f {
            Frame::PushPromise(p) => Some((
                p.promised_stream_id,
                p.fields
                    .iter()
                    .find(|h| h.name == ":path")
                    .map(|h| h.value.clone()),
            )),
            _ => None,
        })
        .collect();
    assert_eq!(
        promised,
        vec![(2, Some("/1".to_string())), (4, Some("/2".to_string()))]
    );

    let bodies: Vec<(u32, Bytes)> = frames
        .iter()
        .filter_map(|f| match f {
            Frame::Data(d) => Some((d.stream_id, d.data.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        bodies,
        vec![
            (1, Bytes::from_static(b"Hello, world!\n")),
            (2, Bytes::from_static(b"Server push 1.\n")),
            (4, Bytes::from_static(b"Server push 2.\n")),
        ]
    );

    for id in [2, 4] {
        assert_eq!(
            client.conn.streams().get_stream(id).unwrap().state(),
            StreamState::Closed
        );
    }
}

#[test]
fn test_push_disabled_in_config() {
    let mut router = Router::new();
    router.route_with_push(
        "GET",
        "/",
        |_req: &Request| Response::with_body("main"),
        vec![PushResource::new("GET", "/1", |_req: &Request| {
            Response::with_body("pushed")
        })],
    );
    let config = ConnectionConfig {
        enable_push: false,
        ..ConnectionConfig::default()
    };
    let mut client = Client::with_config(config, router);
    client.handshake(Settings::new());

    client.request(1, "GET", "/", true).unwrap();
    let frames = client.frames();
    assert!(frames.iter().all(|f| f.frame_type() != FrameType::PushPromise));
    assert_eq!(frames.len(), 2);
}

#[test]
fn test_peer_goaway() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    client
        .send(Frame::Goaway(GoawayFrame::new(0, ErrorCode::NoError, Bytes::new())))
        .unwrap();
    assert!(client.conn.is_closed());
    assert!(client.frames().is_empty());
}

#[test]
fn test_rejected_headers_keep_hpack_in_sync() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    let fields = vec![
        HeaderField::new(":method", "GET"),
        HeaderField::new(":path", "/"),
        HeaderField::new("x-trace", "abc123"),
    ];
    client
        .send(Frame::Headers(
            HeadersFrame::new(1, fields.clone(), true).with_priority(PrioritySpec::new(1, false, 16)),
        ))
        .unwrap();
    assert_eq!(
        client.frames(),
        vec![Frame::RstStream(RstStreamFrame::new(1, ErrorCode::ProtocolError))]
    );

    // The second block refers to "x-trace" through the dynamic table
    client
        .send(Frame::Headers(HeadersFrame::new(3, fields, true)))
        .unwrap();
    let frames = client.frames();
    assert_eq!(headers(&frames[0]).get(":status"), Some("200"));
}

#[test]
fn test_rejected_headers_use_up_the_stream_id() {
    let mut client = Client::new(hello_router());
    client.handshake(Settings::new());

    let fields = vec![
        HeaderField::new(":method", "POST"),
        HeaderField::new(":path", "/echo"),
    ];
    client
        .send(Frame::Headers(
            HeadersFrame::new(1, fields.clone(), false).with_priority(PrioritySpec::new(1, false, 16)),
        ))
        .unwrap();
    assert_eq!(
        client.frames(),
        vec![Frame::RstStream(RstStreamFrame::new(1, ErrorCode::ProtocolError))]
    );
    assert_eq!(client.conn.streams().last_client_stream_id(), 1);

    // Trailing DATA on the rejected stream is ignored
    client
        .send(Frame::Data(DataFrame::new(1, Bytes::from_static(b"body"), true)))
        .unwrap();
    assert!(client.frames().is_empty());

    // Reusing the id does not open a new stream
    client
        .send(Frame::Headers(HeadersFrame::new(1, fields, true)))
        .unwrap();
    assert!(client.frames().is_empty());
    assert!(!client.conn.is_closed());
}
