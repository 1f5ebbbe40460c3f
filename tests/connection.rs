//! Frame-level scenarios: a connection engine wired to a mock transport and
//! session, driven with hand-built wire bytes.

use std::{cell::RefCell, io, rc::Rc};

use bytes::{Bytes, BytesMut};
use h2mux::{
    hpack, Connection, Error, Event, FlowControl, Grant, Headers, Reason, Role, Session, Settings,
    State, StreamHandler, StreamId, Transport, PREFACE,
};

// region: mocks

#[derive(Debug, Default)]
struct MockTransport {
    written: Vec<Bytes>,
    flushes: usize,
    flushing: bool,
    closed: bool,
    graceful: bool,
    events: Vec<Event>,
}

impl Transport for MockTransport {
    fn write(&mut self, frame: Bytes) -> io::Result<()> {
        self.written.push(frame);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }

    fn is_flushing(&self) -> bool {
        self.flushing
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn close_gracefully(&mut self) {
        self.closed = true;
        self.graceful = true;
    }

    fn post_event(&mut self, event: Event) {
        self.events.push(event);
    }
}

#[derive(Debug, PartialEq)]
enum Ev {
    Headers {
        stream: u32,
        method: Option<String>,
        status: Option<u16>,
        has_body: bool,
    },
    Data(u32, Vec<u8>),
    Done(u32),
    Finish(u32),
    Rst(u32, Reason),
    WindowUpdate(u32),
}

type Log = Rc<RefCell<Vec<Ev>>>;

struct Recorder {
    id: u32,
    log: Log,
}

impl StreamHandler for Recorder {
    fn on_header_done(&mut self, headers: Headers, has_body: bool) -> Result<(), Error> {
        self.log.borrow_mut().push(Ev::Headers {
            stream: self.id,
            method: headers.pseudo().method.as_ref().map(|m| m.as_str().to_string()),
            status: headers.status(),
            has_body,
        });
        Ok(())
    }

    fn on_data(&mut self, data: Bytes) -> Result<(), Error> {
        self.log.borrow_mut().push(Ev::Data(self.id, data.to_vec()));
        Ok(())
    }

    fn on_done(&mut self) -> Result<(), Error> {
        self.log.borrow_mut().push(Ev::Done(self.id));
        Ok(())
    }

    fn on_finish(&mut self) {
        self.log.borrow_mut().push(Ev::Finish(self.id));
    }

    fn on_rst(&mut self, reason: Reason) {
        self.log.borrow_mut().push(Ev::Rst(self.id, reason));
    }

    fn on_window_update(&mut self) {
        self.log.borrow_mut().push(Ev::WindowUpdate(self.id));
    }
}

type InitFn = Box<dyn Fn(&mut Settings)>;

struct TestSession {
    log: Log,
    init: Option<InitFn>,
}

impl Session for TestSession {
    fn create_stream(&mut self, id: StreamId) -> Box<dyn StreamHandler> {
        Box::new(Recorder {
            id: id.as_u32(),
            log: self.log.clone(),
        })
    }

    fn init_settings(&mut self, settings: &mut Settings) {
        if let Some(init) = &self.init {
            init(settings);
        }
    }
}

type TestConnection = Connection<MockTransport, TestSession>;

fn connection(role: Role, init: Option<InitFn>) -> (TestConnection, Log) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let log: Log = Rc::default();
    let session = TestSession {
        log: log.clone(),
        init,
    };
    (Connection::new(MockTransport::default(), session, role), log)
}

fn server() -> (TestConnection, Log) {
    connection(Role::Server, None)
}

fn client() -> (TestConnection, Log) {
    connection(Role::Client, None)
}

// endregion
// region: wire helpers

#[derive(Debug)]
struct RawFrame {
    kind: u8,
    flags: u8,
    id: u32,
    payload: Vec<u8>,
}

fn frame(kind: u8, flags: u8, id: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
    buf.push(kind);
    buf.push(flags);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn settings_frame(entries: &[(u16, u32)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (id, value) in entries {
        payload.extend_from_slice(&id.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
    }
    frame(0x4, 0, 0, &payload)
}

fn header_block(encoder: &mut hpack::Encoder, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut block = BytesMut::new();
    for (name, value) in fields {
        encoder.encode(
            name.as_bytes(),
            value.as_bytes(),
            hpack::Indexing::Discard,
            &mut block,
        );
    }
    block.to_vec()
}

fn parse_frames(mut buf: &[u8]) -> Vec<RawFrame> {
    let mut frames = Vec::new();
    while !buf.is_empty() {
        let len = ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | buf[2] as usize;
        let frame = RawFrame {
            kind: buf[3],
            flags: buf[4],
            id: u32::from_be_bytes([buf[5] & 0x7f, buf[6], buf[7], buf[8]]),
            payload: buf[9..9 + len].to_vec(),
        };
        buf = &buf[9 + len..];
        frames.push(frame);
    }
    frames
}

fn drain_written(conn: &mut TestConnection) -> Vec<u8> {
    conn.transport_mut()
        .written
        .drain(..)
        .flat_map(|chunk| chunk.to_vec())
        .collect()
}

fn feed(conn: &mut TestConnection, bytes: &[u8]) -> Result<(), Error> {
    let mut src = BytesMut::from(bytes);
    let result = conn.recv(&mut src);
    assert!(src.is_empty() || result.is_err(), "unconsumed input");
    result
}

/// Preface + empty SETTINGS, then drop the server's handshake output.
fn handshake(conn: &mut TestConnection) {
    let mut bytes = PREFACE.to_vec();
    bytes.extend_from_slice(&settings_frame(&[]));
    feed(conn, &bytes).unwrap();
    drain_written(conn);
}

const DATA: u8 = 0x0;
const HEADERS: u8 = 0x1;
const PRIORITY: u8 = 0x2;
const RST_STREAM: u8 = 0x3;
const SETTINGS: u8 = 0x4;
const PUSH_PROMISE: u8 = 0x5;
const PING: u8 = 0x6;
const GOAWAY: u8 = 0x7;
const WINDOW_UPDATE: u8 = 0x8;
const CONTINUATION: u8 = 0x9;

const END_STREAM: u8 = 0x1;
const ACK: u8 = 0x1;
const END_HEADERS: u8 = 0x4;

fn goaway_code(frame: &RawFrame) -> u32 {
    assert_eq!(frame.kind, GOAWAY);
    u32::from_be_bytes([frame.payload[4], frame.payload[5], frame.payload[6], frame.payload[7]])
}

// endregion

#[test]
fn client_open_writes_preface_then_settings() {
    let (mut conn, _log) = client();
    conn.open().unwrap();

    let bytes = drain_written(&mut conn);
    assert!(bytes.starts_with(PREFACE));
    let frames = parse_frames(&bytes[PREFACE.len()..]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].kind, SETTINGS);
    assert_eq!(frames[0].flags, 0);
    assert_eq!(frames[0].payload.len() % 6, 0);
}

#[test]
fn server_handshake_answers_settings_then_ack_without_data() {
    let (mut conn, _log) = server();
    let mut bytes = PREFACE.to_vec();
    bytes.extend_from_slice(&settings_frame(&[]));
    feed(&mut conn, &bytes).unwrap();

    let frames = parse_frames(&drain_written(&mut conn));
    assert_eq!(frames.len(), 2);
    assert_eq!((frames[0].kind, frames[0].flags), (SETTINGS, 0));
    assert_eq!((frames[1].kind, frames[1].flags), (SETTINGS, ACK));
    assert!(frames.iter().all(|f| f.kind != DATA));

    // The client's ACK of our settings completes the exchange quietly.
    feed(&mut conn, &frame(SETTINGS, ACK, 0, &[])).unwrap();
    assert!(parse_frames(&drain_written(&mut conn)).is_empty());
    assert!(!conn.is_closed());
}

#[test]
fn split_preface_is_consumed_across_reads() {
    let (mut conn, _log) = server();
    feed(&mut conn, &PREFACE[..10]).unwrap();
    let mut rest = PREFACE[10..].to_vec();
    rest.extend_from_slice(&settings_frame(&[]));
    feed(&mut conn, &rest).unwrap();
    assert!(!parse_frames(&drain_written(&mut conn)).is_empty());
}

#[test]
fn preface_mismatch_is_a_protocol_error() {
    let (mut conn, _log) = server();
    let err = feed(&mut conn, b"GET / HTTP/1.1\r\n").unwrap_err();
    assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);
    assert!(conn.transport().closed);
}

#[test]
fn server_dispatches_request_and_sends_response() {
    let (mut conn, log) = server();
    handshake(&mut conn);

    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/index.html"),
            ("user-agent", "test/1"),
        ],
    );
    feed(&mut conn, &frame(HEADERS, END_HEADERS | END_STREAM, 1, &block)).unwrap();

    {
        let log = log.borrow();
        assert_eq!(
            log[0],
            Ev::Headers {
                stream: 1,
                method: Some("GET".into()),
                status: None,
                has_body: false,
            }
        );
        assert_eq!(log[1], Ev::Done(1));
    }
    assert_eq!(conn.stream_state(StreamId::from(1)), Some(State::Processing));

    conn.send_header(StreamId::from(1), &Headers::response(200), false)
        .unwrap();
    let mut body = Bytes::from_static(b"hello h2");
    let limited = conn.send_data(StreamId::from(1), &mut body, true).unwrap();
    assert!(!limited);
    assert!(body.is_empty());

    let frames = parse_frames(&drain_written(&mut conn));
    assert_eq!(frames[0].kind, HEADERS);
    // ":status: 200" resolves to static index 8: one octet, 0x88.
    assert_eq!(frames[0].payload, [0x88]);
    assert_eq!(frames[0].flags, END_HEADERS);
    assert_eq!(frames[1].kind, DATA);
    assert_eq!(frames[1].flags, END_STREAM);
    assert_eq!(frames[1].payload, b"hello h2");

    // The server retains no per-stream state once the response is out.
    assert!(!conn.stream_exists(StreamId::from(1)));
    assert!(log.borrow().contains(&Ev::Finish(1)));
}

#[test]
fn request_body_reaches_the_handler_with_window_updates_granted() {
    let (mut conn, log) = server();
    handshake(&mut conn);

    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[(":method", "POST"), (":scheme", "https"), (":path", "/upload")],
    );
    feed(&mut conn, &frame(HEADERS, END_HEADERS, 1, &block)).unwrap();
    feed(&mut conn, &frame(DATA, END_STREAM, 1, b"payload-bytes")).unwrap();

    {
        let log = log.borrow();
        assert!(log.contains(&Ev::Data(1, b"payload-bytes".to_vec())));
        assert!(log.contains(&Ev::Done(1)));
    }

    // The default strategy grants the credit straight back.
    let frames = parse_frames(&drain_written(&mut conn));
    let updates: Vec<_> = frames.iter().filter(|f| f.kind == WINDOW_UPDATE).collect();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].id, 0);
    assert_eq!(updates[1].id, 1);
    for update in updates {
        let inc = u32::from_be_bytes(update.payload[..4].try_into().unwrap());
        assert_eq!(inc, b"payload-bytes".len() as u32);
    }
}

#[test]
fn padded_data_is_stripped_but_counts_toward_flow_control() {
    let (mut conn, log) = server();
    handshake(&mut conn);

    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[(":method", "POST"), (":scheme", "https"), (":path", "/")],
    );
    feed(&mut conn, &frame(HEADERS, END_HEADERS, 1, &block)).unwrap();

    // Pad length 3, body "abc", padding 3 zero octets.
    let mut payload = vec![3u8];
    payload.extend_from_slice(b"abc");
    payload.extend_from_slice(&[0, 0, 0]);
    feed(&mut conn, &frame(DATA, 0x8 /* PADDED */, 1, &payload)).unwrap();

    assert!(log.borrow().contains(&Ev::Data(1, b"abc".to_vec())));
    // Flow control sees all 7 octets, not the 3 delivered.
    let frames = parse_frames(&drain_written(&mut conn));
    let update = frames.iter().find(|f| f.kind == WINDOW_UPDATE).unwrap();
    assert_eq!(u32::from_be_bytes(update.payload[..4].try_into().unwrap()), 7);
}

#[test]
fn headers_split_across_continuation_frames_are_reassembled() {
    let (mut conn, log) = server();
    handshake(&mut conn);

    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/split"),
            ("x-long-header", "a-reasonably-long-value-to-split"),
        ],
    );
    // Split mid-instruction to exercise partial-instruction retention.
    let cut = block.len() - 5;
    feed(&mut conn, &frame(HEADERS, END_STREAM, 1, &block[..cut])).unwrap();
    assert!(log.borrow().is_empty(), "nothing delivered before END_HEADERS");
    feed(&mut conn, &frame(CONTINUATION, END_HEADERS, 1, &block[cut..])).unwrap();

    let log = log.borrow();
    assert!(matches!(log[0], Ev::Headers { stream: 1, has_body: false, .. }));
    assert_eq!(log[1], Ev::Done(1));
}

#[test]
fn interleaved_headers_during_continuation_kill_the_connection() {
    let (mut conn, log) = server();
    handshake(&mut conn);

    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[(":method", "GET"), (":scheme", "https"), (":path", "/")],
    );
    // Stream 1 leaves its header sequence open…
    feed(&mut conn, &frame(HEADERS, 0, 1, &block)).unwrap();
    // …and stream 3 butts in.
    let err = feed(&mut conn, &frame(HEADERS, END_HEADERS, 3, &block)).unwrap_err();
    assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);

    let frames = parse_frames(&drain_written(&mut conn));
    let goaway = frames.iter().find(|f| f.kind == GOAWAY).unwrap();
    assert_eq!(goaway_code(goaway), Reason::PROTOCOL_ERROR.into());
    assert!(conn.transport().closed);
    // Buffered output is flushed before the close.
    assert!(conn.transport().flushes > 0);
    // Tear-down still finishes the open stream exactly once.
    assert_eq!(
        log.borrow().iter().filter(|e| **e == Ev::Finish(1)).count(),
        1
    );
}

#[test]
fn continuation_without_an_open_sequence_is_rejected() {
    let (mut conn, _log) = server();
    handshake(&mut conn);
    let err = feed(&mut conn, &frame(CONTINUATION, END_HEADERS, 1, &[])).unwrap_err();
    assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);
}

struct Stingy;

impl FlowControl for Stingy {
    fn data_received(&mut self, _: StreamId, _: usize, _: i32, _: i32) -> Grant {
        Grant::default()
    }
}

#[test]
fn connection_window_underflow_is_fatal_and_leaves_the_stream_alone() {
    let log: Log = Rc::default();
    let session = TestSession {
        log: log.clone(),
        init: None,
    };
    let mut conn = Connection::new(MockTransport::default(), session, Role::Server)
        .with_flow_control(Box::new(Stingy));
    handshake(&mut conn);

    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[(":method", "POST"), (":scheme", "https"), (":path", "/")],
    );
    feed(&mut conn, &frame(HEADERS, END_HEADERS, 1, &block)).unwrap();

    // Default windows are 65535; five 16000-octet frames overrun the
    // connection window on the fifth.
    let chunk = vec![0u8; 16_000];
    for _ in 0..4 {
        feed(&mut conn, &frame(DATA, 0, 1, &chunk)).unwrap();
    }
    let err = feed(&mut conn, &frame(DATA, 0, 1, &chunk)).unwrap_err();
    assert_eq!(err.reason(), Reason::FLOW_CONTROL_ERROR);

    let frames = parse_frames(&drain_written(&mut conn));
    let goaway = frames.iter().find(|f| f.kind == GOAWAY).unwrap();
    assert_eq!(goaway_code(goaway), Reason::FLOW_CONTROL_ERROR.into());
    // The stream itself was never reset, only finished at tear-down.
    assert!(!log.borrow().iter().any(|e| matches!(e, Ev::Rst(..))));
}

#[test]
fn stream_window_underflow_resets_only_that_stream() {
    let init: InitFn = Box::new(|settings: &mut Settings| {
        settings.initial_window_size = 1_000;
    });
    let (mut conn, _log) = connection(Role::Server, Some(init));
    handshake(&mut conn);

    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[(":method", "POST"), (":scheme", "https"), (":path", "/")],
    );
    feed(&mut conn, &frame(HEADERS, END_HEADERS, 1, &block)).unwrap();
    feed(&mut conn, &frame(DATA, 0, 1, &vec![0u8; 1_024])).unwrap();

    let frames = parse_frames(&drain_written(&mut conn));
    let rst = frames.iter().find(|f| f.kind == RST_STREAM).unwrap();
    assert_eq!(rst.id, 1);
    assert_eq!(
        u32::from_be_bytes(rst.payload[..4].try_into().unwrap()),
        Reason::FLOW_CONTROL_ERROR.into()
    );
    assert!(!conn.stream_exists(StreamId::from(1)));

    // The connection survives: a PING still gets its ACK.
    feed(&mut conn, &frame(PING, 0, 0, &[7u8; 8])).unwrap();
    let frames = parse_frames(&drain_written(&mut conn));
    assert!(frames.iter().any(|f| f.kind == PING && f.flags == ACK));
}

#[test]
fn settings_initial_window_change_rebases_live_streams_by_the_delta() {
    let (mut conn, _log) = client();
    conn.open().unwrap();
    let id = conn
        .send_header_client(&Headers::request("POST", "/", "https"), false)
        .unwrap();
    assert_eq!(conn.stream_send_window(id), Some(65_535));

    // Partially consume the window so the rebase is visibly a delta.
    let mut body = Bytes::from(vec![1u8; 5_000]);
    conn.send_data(id, &mut body, false).unwrap();
    assert_eq!(conn.stream_send_window(id), Some(60_535));

    feed(&mut conn, &settings_frame(&[(0x4, 70_000)])).unwrap();
    assert_eq!(conn.stream_send_window(id), Some(65_000));

    feed(&mut conn, &settings_frame(&[(0x4, 100)])).unwrap();
    assert_eq!(conn.stream_send_window(id), Some(-4_900));
}

#[test]
fn send_data_is_limited_by_the_stream_window() {
    let (mut conn, _log) = client();
    conn.open().unwrap();
    // Peer advertises a 10-octet initial window before we open the stream.
    feed(&mut conn, &settings_frame(&[(0x4, 10)])).unwrap();
    drain_written(&mut conn);

    let id = conn
        .send_header_client(&Headers::request("POST", "/", "https"), false)
        .unwrap();
    let mut body = Bytes::from_static(b"0123456789abcdef");
    let limited = conn.send_data(id, &mut body, true).unwrap();
    assert!(limited, "flow control must report the cut");
    assert_eq!(body.len(), 6, "only the permitted prefix was consumed");

    let frames = parse_frames(&drain_written(&mut conn));
    let data = frames.iter().find(|f| f.kind == DATA).unwrap();
    assert_eq!(data.payload, b"0123456789");
    assert_eq!(data.flags & END_STREAM, 0, "END_STREAM only on the real end");

    // Credit arrives; the retry finishes the body.
    feed(&mut conn, &frame(WINDOW_UPDATE, 0, id.as_u32(), &10u32.to_be_bytes())).unwrap();
    let limited = conn.send_data(id, &mut body, true).unwrap();
    assert!(!limited);
    let frames = parse_frames(&drain_written(&mut conn));
    let data = frames.iter().find(|f| f.kind == DATA).unwrap();
    assert_eq!(data.payload, b"abcdef");
    assert_eq!(data.flags & END_STREAM, END_STREAM);
}

#[test]
fn send_windows_never_go_negative_under_mixed_traffic() {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let (mut conn, _log) = client();
    conn.open().unwrap();
    // A tight peer window keeps flow control under constant pressure.
    feed(&mut conn, &settings_frame(&[(0x4, 200)])).unwrap();
    let id = conn
        .send_header_client(&Headers::request("POST", "/", "https"), false)
        .unwrap();

    for _ in 0..500 {
        if rng.gen_bool(0.6) {
            let mut chunk = Bytes::from(vec![0u8; rng.gen_range(1..300)]);
            let _ = conn.send_data(id, &mut chunk, false).unwrap();
        } else {
            let increment: u32 = rng.gen_range(1..200);
            feed(
                &mut conn,
                &frame(WINDOW_UPDATE, 0, id.as_u32(), &increment.to_be_bytes()),
            )
            .unwrap();
        }
        assert!(conn.send_window() >= 0);
        assert!(conn.stream_send_window(id).unwrap() >= 0);
    }
}

#[test]
fn send_data_never_blocks_on_a_flushing_transport() {
    let (mut conn, _log) = client();
    conn.open().unwrap();
    let id = conn
        .send_header_client(&Headers::request("POST", "/", "https"), false)
        .unwrap();
    conn.transport_mut().flushing = true;
    let mut body = Bytes::from_static(b"queued");
    assert!(conn.send_data(id, &mut body, true).unwrap());
    assert_eq!(body.len(), 6, "nothing consumed while the transport drains");
}

#[test]
fn window_update_of_zero_is_an_error() {
    let (mut conn, _log) = server();
    handshake(&mut conn);

    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[(":method", "GET"), (":scheme", "https"), (":path", "/")],
    );
    feed(&mut conn, &frame(HEADERS, END_HEADERS, 1, &block)).unwrap();

    // Stream scope: RST, connection stays up.
    feed(&mut conn, &frame(WINDOW_UPDATE, 0, 1, &0u32.to_be_bytes())).unwrap();
    let frames = parse_frames(&drain_written(&mut conn));
    assert!(frames.iter().any(|f| f.kind == RST_STREAM && f.id == 1));
    assert!(!conn.is_closed());

    // Connection scope: fatal.
    let err = feed(&mut conn, &frame(WINDOW_UPDATE, 0, 0, &0u32.to_be_bytes())).unwrap_err();
    assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);
}

#[test]
fn window_update_overflow_is_a_flow_control_error() {
    let (mut conn, _log) = server();
    handshake(&mut conn);
    let err = feed(
        &mut conn,
        &frame(WINDOW_UPDATE, 0, 0, &0x7fff_ffffu32.to_be_bytes()),
    )
    .unwrap_err();
    assert_eq!(err.reason(), Reason::FLOW_CONTROL_ERROR);
}

#[test]
fn window_update_credits_the_stream_and_notifies_the_handler() {
    let (mut conn, log) = client();
    conn.open().unwrap();
    let id = conn
        .send_header_client(&Headers::request("POST", "/", "https"), false)
        .unwrap();
    feed(&mut conn, &frame(WINDOW_UPDATE, 0, id.as_u32(), &500u32.to_be_bytes())).unwrap();
    assert_eq!(conn.stream_send_window(id), Some(66_035));
    assert!(log.borrow().contains(&Ev::WindowUpdate(1)));
}

#[test]
fn goaway_resets_abandoned_streams_then_closes_when_drained() {
    let (mut conn, log) = client();
    conn.open().unwrap();
    let first = conn
        .send_header_client(&Headers::request("GET", "/a", "https"), true)
        .unwrap();
    let second = conn
        .send_header_client(&Headers::request("GET", "/b", "https"), true)
        .unwrap();
    assert_eq!((first.as_u32(), second.as_u32()), (1, 3));
    drain_written(&mut conn);

    // The peer only processed stream 1.
    let mut payload = 1u32.to_be_bytes().to_vec();
    payload.extend_from_slice(&u32::from(Reason::CANCEL).to_be_bytes());
    feed(&mut conn, &frame(GOAWAY, 0, 0, &payload)).unwrap();

    assert!(log.borrow().contains(&Ev::Rst(3, Reason::CANCEL)));
    assert!(conn.stream_exists(first));
    assert!(!conn.stream_exists(second));
    assert!(matches!(
        &conn.transport().events[..],
        [Event::GoAway { reason: Reason::CANCEL, .. }]
    ));
    assert!(!conn.transport().closed);

    // Opening anything new is refused during shutdown.
    assert!(conn
        .send_header_client(&Headers::request("GET", "/c", "https"), true)
        .is_err());

    // Stream 1's response completes; nothing is left and the transport
    // closes gracefully with our own NO_ERROR goaway.
    let mut encoder = hpack::Encoder::default();
    let block = header_block(&mut encoder, &[(":status", "204")]);
    feed(
        &mut conn,
        &frame(HEADERS, END_HEADERS | END_STREAM, 1, &block),
    )
    .unwrap();

    assert!(log.borrow().contains(&Ev::Finish(1)));
    assert!(conn.transport().graceful);
    let frames = parse_frames(&drain_written(&mut conn));
    let goaway = frames.iter().find(|f| f.kind == GOAWAY).unwrap();
    assert_eq!(goaway_code(goaway), Reason::NO_ERROR.into());
}

#[test]
fn ping_round_trip_completes_by_nonce() {
    let (mut conn, _log) = client();
    conn.open().unwrap();
    let seen = Rc::new(RefCell::new(false));
    let seen2 = seen.clone();
    assert!(conn.ping(move |_rtt| *seen2.borrow_mut() = true).unwrap());
    // A second ping while one is in flight is refused.
    assert!(!conn.ping(|_| {}).unwrap());

    let bytes = drain_written(&mut conn);
    let all = parse_frames(&bytes[PREFACE.len()..]);
    let ping = all.iter().find(|f| f.kind == PING).unwrap();

    feed(&mut conn, &frame(PING, ACK, 0, &ping.payload)).unwrap();
    assert!(*seen.borrow());
}

#[test]
fn mismatched_ping_ack_is_a_protocol_error() {
    let (mut conn, _log) = client();
    conn.open().unwrap();
    conn.ping(|_| {}).unwrap();
    let err = feed(&mut conn, &frame(PING, ACK, 0, &[9u8; 8])).unwrap_err();
    assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);
}

#[test]
fn pings_are_echoed_with_ack() {
    let (mut conn, _log) = server();
    handshake(&mut conn);
    feed(&mut conn, &frame(PING, 0, 0, b"\x01\x02\x03\x04\x05\x06\x07\x08")).unwrap();
    let frames = parse_frames(&drain_written(&mut conn));
    let ack = frames.iter().find(|f| f.kind == PING).unwrap();
    assert_eq!(ack.flags, ACK);
    assert_eq!(ack.payload, [1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn unknown_frame_types_and_flags_are_protocol_errors() {
    let (mut conn, _log) = server();
    handshake(&mut conn);
    let err = feed(&mut conn, &frame(12, 0, 0, &[])).unwrap_err();
    assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);

    let (mut conn, _log) = server();
    handshake(&mut conn);
    // END_HEADERS is not a legal DATA flag.
    let err = feed(&mut conn, &frame(DATA, END_HEADERS, 1, b"x")).unwrap_err();
    assert_eq!(err.reason(), Reason::PROTOCOL_ERROR);
}

#[test]
fn oversized_frames_are_rejected_before_buffering() {
    let (mut conn, _log) = server();
    handshake(&mut conn);
    // Claim a 17-megabyte DATA frame; the header alone must kill it.
    let header = [0xff, 0xff, 0xff, DATA, 0, 0, 0, 0, 1];
    let err = feed(&mut conn, &header).unwrap_err();
    assert_eq!(err.reason(), Reason::FRAME_SIZE_ERROR);
}

#[test]
fn settings_length_must_be_a_multiple_of_six() {
    let (mut conn, _log) = server();
    handshake(&mut conn);
    let err = feed(&mut conn, &frame(SETTINGS, 0, 0, &[0, 1, 0, 0])).unwrap_err();
    assert_eq!(err.reason(), Reason::FRAME_SIZE_ERROR);
}

#[test]
fn rst_stream_finalizes_the_stream_with_the_peer_code() {
    let (mut conn, log) = server();
    handshake(&mut conn);

    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[(":method", "GET"), (":scheme", "https"), (":path", "/")],
    );
    feed(&mut conn, &frame(HEADERS, END_HEADERS, 1, &block)).unwrap();
    feed(
        &mut conn,
        &frame(RST_STREAM, 0, 1, &u32::from(Reason::CANCEL).to_be_bytes()),
    )
    .unwrap();

    let log = log.borrow();
    assert!(log.contains(&Ev::Rst(1, Reason::CANCEL)));
    assert!(log.contains(&Ev::Finish(1)));
    assert!(!conn.stream_exists(StreamId::from(1)));
}

#[test]
fn priority_frames_are_validated_and_advisory() {
    let (mut conn, _log) = server();
    handshake(&mut conn);

    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[(":method", "GET"), (":scheme", "https"), (":path", "/")],
    );
    feed(&mut conn, &frame(HEADERS, END_HEADERS, 1, &block)).unwrap();

    let mut payload = 3u32.to_be_bytes().to_vec();
    payload.push(200);
    feed(&mut conn, &frame(PRIORITY, 0, 1, &payload)).unwrap();
    assert!(!conn.is_closed());
    assert_eq!(
        conn.stream_priority(StreamId::from(1)),
        Some((StreamId::from(3), 201))
    );

    let err = feed(&mut conn, &frame(PRIORITY, 0, 1, &[0, 0, 0, 0])).unwrap_err();
    assert_eq!(err.reason(), Reason::FRAME_SIZE_ERROR);
}

#[test]
fn client_receives_a_pushed_stream() {
    let (mut conn, log) = client();
    conn.open().unwrap();
    let parent = conn
        .send_header_client(&Headers::request("GET", "/", "https"), true)
        .unwrap();
    drain_written(&mut conn);

    // PUSH_PROMISE on the request stream, promising stream 2.
    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[(":method", "GET"), (":scheme", "https"), (":path", "/style.css")],
    );
    let mut payload = 2u32.to_be_bytes().to_vec();
    payload.extend_from_slice(&block);
    feed(
        &mut conn,
        &frame(PUSH_PROMISE, END_HEADERS, parent.as_u32(), &payload),
    )
    .unwrap();

    assert!(conn.stream_exists(StreamId::from(2)));
    assert!(log.borrow().contains(&Ev::Headers {
        stream: 2,
        method: Some("GET".into()),
        status: None,
        has_body: false,
    }));

    // The pushed response then arrives on stream 2 as usual.
    let block = header_block(&mut encoder, &[(":status", "200")]);
    feed(
        &mut conn,
        &frame(HEADERS, END_HEADERS | END_STREAM, 2, &block),
    )
    .unwrap();
    assert!(log.borrow().contains(&Ev::Headers {
        stream: 2,
        method: None,
        status: Some(200),
        has_body: false,
    }));
}

#[test]
fn server_push_reserves_an_even_stream() {
    let (mut conn, _log) = server();
    handshake(&mut conn);

    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[(":method", "GET"), (":scheme", "https"), (":path", "/")],
    );
    feed(&mut conn, &frame(HEADERS, END_HEADERS | END_STREAM, 1, &block)).unwrap();
    drain_written(&mut conn);

    let promised = conn
        .push(StreamId::from(1), &Headers::request("GET", "/style.css", "https"))
        .unwrap()
        .unwrap();
    assert!(promised.is_server_initiated());

    let frames = parse_frames(&drain_written(&mut conn));
    let push = frames.iter().find(|f| f.kind == PUSH_PROMISE).unwrap();
    assert_eq!(push.id, 1, "announced on the parent stream");
    assert_eq!(
        u32::from_be_bytes(push.payload[..4].try_into().unwrap()),
        promised.as_u32()
    );
    assert_eq!(push.flags & END_HEADERS, END_HEADERS);

    // The promised stream is ready for its response.
    conn.send_header(promised, &Headers::response(200), true).unwrap();
    assert!(!conn.stream_exists(promised));
}

#[test]
fn push_to_a_client_that_disabled_it_is_rejected() {
    let (mut conn, _log) = server();
    let mut bytes = PREFACE.to_vec();
    bytes.extend_from_slice(&settings_frame(&[(0x2, 0)]));
    feed(&mut conn, &bytes).unwrap();
    assert_eq!(
        conn.push(StreamId::from(1), &Headers::request("GET", "/", "https"))
            .unwrap(),
        None
    );
}

#[test]
fn refused_stream_when_the_concurrency_cap_is_hit() {
    let init: InitFn = Box::new(|settings: &mut Settings| {
        settings.max_concurrent_streams = Some(1);
    });
    let (mut conn, _log) = connection(Role::Server, Some(init));
    handshake(&mut conn);

    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[(":method", "GET"), (":scheme", "https"), (":path", "/")],
    );
    feed(&mut conn, &frame(HEADERS, END_HEADERS, 1, &block)).unwrap();
    let block = header_block(
        &mut encoder,
        &[(":method", "GET"), (":scheme", "https"), (":path", "/two")],
    );
    feed(&mut conn, &frame(HEADERS, END_HEADERS, 3, &block)).unwrap();

    let frames = parse_frames(&drain_written(&mut conn));
    let rst = frames.iter().find(|f| f.kind == RST_STREAM).unwrap();
    assert_eq!(rst.id, 3);
    assert_eq!(
        u32::from_be_bytes(rst.payload[..4].try_into().unwrap()),
        Reason::REFUSED_STREAM.into()
    );
    assert!(!conn.is_closed());
}

#[test]
fn compression_errors_are_connection_fatal() {
    let (mut conn, _log) = server();
    handshake(&mut conn);
    // Indexed field 127 + varint pushing past both tables.
    let err = feed(
        &mut conn,
        &frame(HEADERS, END_HEADERS, 1, &[0xff, 0x80, 0x01]),
    )
    .unwrap_err();
    assert_eq!(err.reason(), Reason::COMPRESSION_ERROR);
    let frames = parse_frames(&drain_written(&mut conn));
    let goaway = frames.iter().find(|f| f.kind == GOAWAY).unwrap();
    assert_eq!(goaway_code(goaway), Reason::COMPRESSION_ERROR.into());
    assert!(conn.transport().closed);
}

#[test]
fn oversized_header_lists_reset_the_stream() {
    let init: InitFn = Box::new(|settings: &mut Settings| {
        settings.max_header_list_size = Some(64);
    });
    let (mut conn, _log) = connection(Role::Server, Some(init));
    handshake(&mut conn);

    let mut encoder = hpack::Encoder::default();
    let block = header_block(
        &mut encoder,
        &[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/with-a-rather-long-request-target"),
            ("x-filler", "another-sizeable-header-value"),
        ],
    );
    feed(&mut conn, &frame(HEADERS, END_HEADERS, 1, &block)).unwrap();

    let frames = parse_frames(&drain_written(&mut conn));
    assert!(frames.iter().any(|f| f.kind == RST_STREAM && f.id == 1));
    assert!(!conn.is_closed(), "431-equivalents stay stream-scoped");
}
