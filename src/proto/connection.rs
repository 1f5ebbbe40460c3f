use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use fnv::FnvHashMap;
use tracing::{debug, trace, warn};

use crate::{
    error::{Error, Reason},
    frame::{self, Head, Headers, Kind, Settings, StreamId},
    hpack,
    transport::{Event, Transport},
};

use super::{
    calm::{MeterConfig, PacketMeter},
    flow_control::{FlowControl, Grant, Immediate},
    ping_pong::Ping,
    session::Session,
    stream::{State, Stream},
    MAX_WINDOW_SIZE, PREFACE,
};

/// Which side of the connection this engine plays. Fixes stream-id parity
/// and the direction-dependent rules (push, preface, deferred settings).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The connection engine: frame loop, stream table, windows, header codec.
///
/// Single-owner by contract: one execution context drives `recv` and the
/// outbound calls; nothing here is locked and the type is deliberately not
/// `Sync`. Suspension is implicit: `recv` returns when the buffer holds no
/// complete frame, `send_data` reports instead of blocking when the window
/// is exhausted.
pub struct Connection<T, S> {
    transport: T,
    session: S,
    role: Role,
    local: Settings,
    remote: Settings,
    encoder: hpack::Encoder,
    decoder: hpack::Decoder,
    /// Stream owning the open HEADERS…CONTINUATION sequence, if any.
    /// Interleaving any other stream's header frames is a connection error.
    hpack_lock: Option<StreamId>,
    streams: FnvHashMap<StreamId, Stream>,
    /// Monotonic; parity-adjusted at allocation, bumped past every id the
    /// peer uses.
    next_stream_id: u32,
    send_window: i32,
    receive_window: i32,
    settings_sent: bool,
    goaway_sent: bool,
    goaway_received: bool,
    /// Server side: preface octets still to consume before the frame loop.
    preface_remaining: usize,
    ping: Option<Ping>,
    flow: Box<dyn FlowControl>,
    meter: PacketMeter,
    closed: bool,
}

impl<T: Transport, S: Session> Connection<T, S> {
    pub fn new(transport: T, session: S, role: Role) -> Connection<T, S> {
        Connection {
            transport,
            session,
            role,
            local: Settings::default(),
            remote: Settings::default(),
            encoder: hpack::Encoder::default(),
            decoder: hpack::Decoder::new(frame::DEFAULT_HEADER_TABLE_SIZE as usize),
            hpack_lock: None,
            streams: FnvHashMap::default(),
            next_stream_id: match role {
                Role::Client => 1,
                Role::Server => 2,
            },
            send_window: frame::DEFAULT_INITIAL_WINDOW_SIZE as i32,
            receive_window: frame::DEFAULT_INITIAL_WINDOW_SIZE as i32,
            settings_sent: false,
            goaway_sent: false,
            goaway_received: false,
            preface_remaining: match role {
                Role::Client => 0,
                Role::Server => PREFACE.len(),
            },
            ping: None,
            flow: Box::new(Immediate),
            meter: PacketMeter::new(MeterConfig::default()),
            closed: false,
        }
    }

    /// Swap in a different window-credit strategy. Call before `open`.
    pub fn with_flow_control(mut self, flow: Box<dyn FlowControl>) -> Connection<T, S> {
        self.flow = flow;
        self
    }

    /// Tune the control-frame flood guard. Call before `open`.
    pub fn with_meter(mut self, config: MeterConfig) -> Connection<T, S> {
        self.meter = PacketMeter::new(config);
        self
    }

    /// The transport is connected. The client writes its preface and
    /// SETTINGS; the server stays quiet until the peer's first SETTINGS.
    pub fn open(&mut self) -> Result<(), Error> {
        if self.role == Role::Client {
            self.transport.write(Bytes::from_static(PREFACE))?;
            self.init_local_settings();
            self.sync_settings()?;
        }
        Ok(())
    }

    /// Consume every complete frame buffered in `src`, leaving partial
    /// bytes in place. Never blocks: returning with leftover bytes is the
    /// suspension point.
    ///
    /// An `Err` return means the connection is finished: the GOAWAY (when
    /// one applies) has been sent and the transport closed.
    pub fn recv(&mut self, src: &mut BytesMut) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        if self.preface_remaining > 0 {
            let take = src.len().min(self.preface_remaining);
            let expect = &PREFACE[PREFACE.len() - self.preface_remaining..][..take];
            if &src[..take] != expect {
                return self.fail(Error::protocol("bad connection preface"));
            }
            src.advance(take);
            self.preface_remaining -= take;
            if self.preface_remaining > 0 {
                return Ok(());
            }
        }
        loop {
            if self.closed || src.len() < frame::HEADER_LEN {
                return Ok(());
            }
            let len = ((src[0] as usize) << 16) | ((src[1] as usize) << 8) | src[2] as usize;
            if len > self.local.max_frame_size as usize {
                return self.fail(Error::frame_size("frame exceeds max_frame_size"));
            }
            if src.len() < frame::HEADER_LEN + len {
                return Ok(());
            }
            let kind = src[3];
            let flags = src[4];
            let id = StreamId::parse(&src[5..9]);
            src.advance(frame::HEADER_LEN);
            let payload = src.split_to(len).freeze();

            if let Err(error) = self.frame(kind, flags, id, payload) {
                match error {
                    Error::Reset { id, reason } => {
                        if let Err(fatal) = self.stream_error(id, reason) {
                            return self.fail(fatal);
                        }
                    }
                    error => return self.fail(error),
                }
            }
        }
    }

    fn frame(&mut self, kind: u8, flags: u8, id: StreamId, payload: Bytes) -> Result<(), Error> {
        let kind = Kind::new(kind).ok_or_else(|| Error::protocol("unknown frame type"))?;
        if flags & !frame::legal_flags(kind) != 0 {
            return Err(Error::protocol("unknown frame flag"));
        }
        trace!(?kind, flags, stream = id.as_u32(), len = payload.len(), "recv frame");
        self.note_stream_id(id);

        match kind {
            Kind::Data => self.recv_data(flags, id, payload),
            Kind::Headers => self.recv_headers(flags, id, payload),
            Kind::Priority => self.recv_priority(id, payload),
            Kind::Reset => self.recv_reset(id, payload),
            Kind::Settings => self.recv_settings(flags, id, payload),
            Kind::PushPromise => self.recv_push_promise(flags, id, payload),
            Kind::Ping => self.recv_ping(flags, id, payload),
            Kind::GoAway => self.recv_go_away(id, payload),
            Kind::WindowUpdate => self.recv_window_update(id, payload),
            Kind::Continuation => self.recv_continuation(flags, id, payload),
            // Advisory frames; nothing to do at this layer.
            Kind::AltSvc | Kind::Blocked => Ok(()),
        }
    }

    // region: inbound frame handlers

    fn recv_settings(&mut self, flags: u8, id: StreamId, payload: Bytes) -> Result<(), Error> {
        if !id.is_zero() {
            return Err(Error::protocol("SETTINGS on a stream"));
        }
        if flags & frame::ACK != 0 {
            if !payload.is_empty() {
                return Err(Error::frame_size("SETTINGS ack with payload"));
            }
            // Our advertised table size is now in force for the peer's
            // encoder, so the decode direction adopts it.
            self.decoder.update_limit(self.local.header_table_size as usize);
            return Ok(());
        }
        if payload.len() % 6 != 0 {
            return Err(Error::frame_size("SETTINGS length not a multiple of 6"));
        }
        self.guard_control("SETTINGS")?;

        let previous_window = self.remote.initial_window_size;
        self.remote.recv(&payload, self.role == Role::Client)?;
        self.session.validate_remote_settings(&self.remote)?;

        // A changed INITIAL_WINDOW_SIZE rebases every live stream's send
        // window by the signed delta; in-flight data stays accounted.
        let delta = self.remote.initial_window_size as i64 - previous_window as i64;
        if delta != 0 {
            for stream in self.streams.values_mut() {
                let updated = stream.send_window as i64 + delta;
                if updated > MAX_WINDOW_SIZE as i64 || updated < -(MAX_WINDOW_SIZE as i64) {
                    return Err(Error::flow_control("initial window delta overflow"));
                }
                stream.send_window = updated as i32;
            }
        }

        if !self.settings_sent {
            // Deferred initial settings: the server answers the first
            // SETTINGS with its own before acknowledging.
            self.init_local_settings();
            self.sync_settings()?;
        }
        self.write_frame(Kind::Settings, frame::ACK, StreamId::ZERO, &[])?;
        self.encoder.update_capacity(self.remote.header_table_size as usize);
        Ok(())
    }

    fn recv_headers(&mut self, flags: u8, id: StreamId, mut payload: Bytes) -> Result<(), Error> {
        if id.is_zero() {
            return Err(Error::protocol("HEADERS on stream 0"));
        }
        if let Some(lock) = self.hpack_lock {
            if lock != id {
                return Err(Error::protocol("continuation expected"));
            }
        }
        if !self.streams.contains_key(&id) {
            if self.role != Role::Server {
                return Err(invalid_stream(id));
            }
            if !id.is_client_initiated() {
                return Err(Error::protocol("stream id parity"));
            }
            // PROTOCOL_ERROR vs REFUSED_STREAM decides whether the client
            // may retry automatically (RFC 9113 §8.7).
            if let Some(max) = self.local.max_concurrent_streams {
                if self.streams.len() >= max as usize {
                    return Err(Error::reset(id, Reason::REFUSED_STREAM));
                }
            }
            if id.as_u32() + 1 < self.next_stream_id {
                return Err(Error::protocol("stream id not increasing"));
            }
            self.open_stream(id);
        }

        if flags & frame::PADDED != 0 {
            strip_padding(&mut payload)?;
        }
        let end_headers = flags & frame::END_HEADERS != 0;
        let end_stream = flags & frame::END_STREAM != 0;
        let priority = if flags & frame::PRIORITY != 0 {
            if payload.len() < 5 {
                return Err(Error::frame_size("HEADERS priority fields truncated"));
            }
            Some((payload.get_u32(), payload.get_u8() as u16 + 1))
        } else {
            None
        };

        self.hpack_lock = if end_headers { None } else { Some(id) };
        let server = self.role == Role::Server;
        {
            let Some(stream) = self.streams.get_mut(&id) else {
                return Err(invalid_stream(id));
            };
            if let Some((dependency, weight)) = priority {
                stream.priority(dependency, weight);
            }
            if end_stream {
                stream.set_end_stream();
            }
            stream.recv_header_fragment(&payload, &mut self.decoder, true)?;
            if end_headers {
                stream.recv_header_end(server)?;
            }
        }
        self.reap(id)
    }

    fn recv_continuation(&mut self, flags: u8, id: StreamId, payload: Bytes) -> Result<(), Error> {
        if self.hpack_lock != Some(id) {
            return Err(Error::protocol("continuation unexpected"));
        }
        let end_headers = flags & frame::END_HEADERS != 0;
        if end_headers {
            self.hpack_lock = None;
        }
        let server = self.role == Role::Server;
        {
            let Some(stream) = self.streams.get_mut(&id) else {
                return Err(invalid_stream(id));
            };
            stream.recv_header_fragment(&payload, &mut self.decoder, false)?;
            if end_headers {
                stream.recv_header_end(server)?;
            }
        }
        if end_headers {
            self.reap(id)?;
        }
        Ok(())
    }

    fn recv_data(&mut self, flags: u8, id: StreamId, mut payload: Bytes) -> Result<(), Error> {
        if id.is_zero() {
            return Err(Error::protocol("DATA on stream 0"));
        }
        let len = payload.len();
        if self.role == Role::Server && self.meter.data(len) {
            return Err(Error::go_away(Reason::ENHANCE_YOUR_CALM, "DATA"));
        }

        let end_stream = flags & frame::END_STREAM != 0;
        let server = self.role == Role::Server;
        let grant;
        {
            let Some(stream) = self.streams.get_mut(&id) else {
                return Err(invalid_stream(id));
            };
            // Connection window first: if it is the one that under-flows,
            // the stream must be left untouched.
            self.receive_window -= len as i32;
            if self.receive_window < 0 {
                return Err(Error::flow_control("connection receive window underflow"));
            }
            stream.receive_window -= len as i32;
            if stream.receive_window < 0 {
                return Err(Error::reset(id, Reason::FLOW_CONTROL_ERROR));
            }
            grant = self.flow.data_received(id, len, self.receive_window, stream.receive_window);

            if flags & frame::PADDED != 0 {
                strip_padding(&mut payload)?;
            }
            stream.recv_data(payload)?;
            if end_stream {
                stream.set_end_stream();
                stream.recv_data_end(server)?;
            }
        }
        self.apply_grant(id, grant)?;
        self.reap(id)
    }

    fn recv_priority(&mut self, id: StreamId, mut payload: Bytes) -> Result<(), Error> {
        if payload.len() != 5 {
            return Err(Error::frame_size("PRIORITY payload must be 5 octets"));
        }
        if id.is_zero() {
            return Err(Error::protocol("PRIORITY on stream 0"));
        }
        if !self.streams.contains_key(&id) {
            return Err(invalid_stream(id));
        }
        self.guard_control("PRIORITY")?;
        let dependency = payload.get_u32();
        let weight = payload.get_u8() as u16 + 1;
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.priority(dependency, weight);
        }
        Ok(())
    }

    fn recv_reset(&mut self, id: StreamId, mut payload: Bytes) -> Result<(), Error> {
        if payload.len() != 4 {
            return Err(Error::frame_size("RST_STREAM payload must be 4 octets"));
        }
        if id.is_zero() {
            return Err(Error::protocol("RST_STREAM on stream 0"));
        }
        let reason = Reason::from(payload.get_u32());
        match self.streams.remove(&id) {
            Some(mut stream) => {
                debug!(stream = id.as_u32(), ?reason, "peer reset stream");
                stream.rst(reason);
                self.flow.stream_closed(id);
            }
            None => self.guard_control("RST_STREAM")?,
        }
        self.check_goaway()
    }

    fn recv_ping(&mut self, flags: u8, id: StreamId, payload: Bytes) -> Result<(), Error> {
        if payload.len() != 8 {
            return Err(Error::frame_size("PING payload must be 8 octets"));
        }
        if !id.is_zero() {
            return Err(Error::protocol("PING on a stream"));
        }
        if flags & frame::ACK == 0 {
            self.guard_control("PING")?;
            return self.write_frame(Kind::Ping, frame::ACK, StreamId::ZERO, &payload);
        }
        match self.ping.take() {
            Some(ping) if ping.nonce[..] == payload[..] => {
                let rtt = ping.complete();
                debug!(?rtt, "ping acknowledged");
                Ok(())
            }
            _ => Err(Error::protocol("unsolicited PING ack")),
        }
    }

    fn recv_push_promise(&mut self, flags: u8, id: StreamId, mut payload: Bytes) -> Result<(), Error> {
        if self.role == Role::Server || !self.local.enable_push {
            return Err(Error::protocol("push not enabled"));
        }
        if id.is_zero() {
            return Err(Error::protocol("PUSH_PROMISE on stream 0"));
        }
        if !self.streams.contains_key(&id) {
            return Err(invalid_stream(id));
        }
        if let Some(lock) = self.hpack_lock {
            if lock != id {
                return Err(Error::protocol("continuation expected"));
            }
        }
        if flags & frame::PADDED != 0 {
            strip_padding(&mut payload)?;
        }
        if payload.len() < 4 {
            return Err(Error::frame_size("PUSH_PROMISE without promised id"));
        }
        let promised = StreamId::parse(&payload[..4]);
        payload.advance(4);
        if !promised.is_server_initiated() {
            return Err(Error::protocol("promised stream id parity"));
        }
        if self.streams.contains_key(&promised) {
            return Err(invalid_stream(promised));
        }
        self.note_stream_id(promised);
        if let Some(max) = self.local.max_concurrent_streams {
            if self.streams.len() >= max as usize {
                return Err(Error::reset(promised, Reason::REFUSED_STREAM));
            }
        }
        self.open_stream(promised);

        let end_headers = flags & frame::END_HEADERS != 0;
        self.hpack_lock = if end_headers { None } else { Some(promised) };
        {
            let Some(stream) = self.streams.get_mut(&promised) else {
                return Err(invalid_stream(promised));
            };
            stream.mark_promised();
            stream.recv_header_fragment(&payload, &mut self.decoder, true)?;
            if end_headers {
                stream.recv_header_end(false)?;
            }
        }
        Ok(())
    }

    fn recv_go_away(&mut self, id: StreamId, mut payload: Bytes) -> Result<(), Error> {
        if payload.len() < 8 {
            return Err(Error::frame_size("GOAWAY truncated"));
        }
        if !id.is_zero() {
            return Err(Error::protocol("GOAWAY on a stream"));
        }
        let last = StreamId::parse(&payload[..4]);
        payload.advance(4);
        let reason = Reason::from(payload.get_u32());
        let debug_data = payload;
        self.goaway_received = true;
        if reason != Reason::NO_ERROR {
            warn!(?reason, debug = %String::from_utf8_lossy(&debug_data), "peer sent GOAWAY");
        } else {
            debug!(last = last.as_u32(), "peer sent GOAWAY");
        }

        // Streams we initiated past the peer's cutoff were never processed.
        let abandoned: Vec<StreamId> = self
            .streams
            .keys()
            .copied()
            .filter(|sid| sid.as_u32() > last.as_u32() && self.initiated_locally(*sid))
            .collect();
        for sid in abandoned {
            if let Some(mut stream) = self.streams.remove(&sid) {
                stream.rst(reason);
            }
            self.flow.stream_closed(sid);
        }

        self.transport.post_event(Event::GoAway {
            last_stream_id: last,
            reason,
            debug: debug_data,
        });
        self.check_goaway()
    }

    fn recv_window_update(&mut self, id: StreamId, mut payload: Bytes) -> Result<(), Error> {
        if payload.len() != 4 {
            return Err(Error::frame_size("WINDOW_UPDATE payload must be 4 octets"));
        }
        let increment = payload.get_u32() & 0x7fff_ffff;
        if increment == 0 {
            return Err(if id.is_zero() {
                Error::protocol("zero window increment")
            } else {
                Error::reset(id, Reason::PROTOCOL_ERROR)
            });
        }
        if id.is_zero() {
            let updated = self.send_window as i64 + increment as i64;
            if updated > MAX_WINDOW_SIZE as i64 {
                return Err(Error::flow_control("connection send window overflow"));
            }
            self.send_window = updated as i32;
            return Ok(());
        }
        // Updates for already-closed streams are not an error (RFC 9113 §6.9).
        if let Some(stream) = self.streams.get_mut(&id) {
            let updated = stream.send_window as i64 + increment as i64;
            if updated > MAX_WINDOW_SIZE as i64 {
                return Err(Error::reset(id, Reason::FLOW_CONTROL_ERROR));
            }
            stream.send_window = updated as i32;
            stream.handler.on_window_update();
        }
        Ok(())
    }

    // endregion
    // region: outbound operations

    /// Advertise the local settings record.
    pub fn sync_settings(&mut self) -> Result<(), Error> {
        let mut payload = BytesMut::with_capacity(36);
        self.local.encode(self.role == Role::Server, &mut payload);
        self.settings_sent = true;
        self.write_frame(Kind::Settings, 0, StreamId::ZERO, &payload)
    }

    /// Send a PING and invoke `on_pong` with the measured round trip once
    /// the matching ACK arrives. Returns false while one is outstanding.
    pub fn ping<F>(&mut self, on_pong: F) -> Result<bool, Error>
    where
        F: FnOnce(Duration) + 'static,
    {
        if self.ping.is_some() {
            return Ok(false);
        }
        let ping = Ping::new(Box::new(on_pong));
        self.write_frame(Kind::Ping, 0, StreamId::ZERO, &ping.nonce)?;
        self.ping = Some(ping);
        Ok(true)
    }

    /// Announce shutdown. If no streams remain the transport closes
    /// gracefully right away.
    pub fn go_away(&mut self, reason: Reason, debug: &[u8]) -> Result<(), Error> {
        self.emit_go_away(reason, debug)?;
        let _ = self.transport.flush();
        self.check_goaway()
    }

    /// Open a stream and send the request header block. Returns the new
    /// stream id.
    pub fn send_header_client(&mut self, headers: &Headers, no_body: bool) -> Result<StreamId, Error> {
        if self.role != Role::Client {
            return Err(Error::User("server side must use send_header"));
        }
        if self.goaway_sent || self.goaway_received {
            return Err(Error::User("connection is shutting down"));
        }
        let id = self.allocate_stream_id()?;
        self.open_stream(id);
        self.send_header_block(Kind::Headers, id, &[], headers, no_body)?;
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.state = if no_body {
                State::Open
            } else {
                State::SendBodyPreOpen
            };
        }
        Ok(id)
    }

    /// Send the response header block on a stream in PROCESSING state.
    /// With `no_body` the stream completes and leaves the table.
    pub fn send_header(&mut self, id: StreamId, headers: &Headers, no_body: bool) -> Result<(), Error> {
        if self.role != Role::Server {
            return Err(Error::User("client side must use send_header_client"));
        }
        match self.streams.get(&id) {
            Some(stream) if stream.state == State::Processing => {}
            Some(_) => return Err(Error::User("stream is not awaiting a response")),
            None => return Err(Error::User("unknown stream")),
        }
        self.send_header_block(Kind::Headers, id, &[], headers, no_body)?;
        if no_body {
            self.close_local(id)?;
        } else if let Some(stream) = self.streams.get_mut(&id) {
            stream.state = State::SendBody;
        }
        Ok(())
    }

    /// Send body bytes, never blocking. Consumes from `data` only what the
    /// windows and the peer's max frame size permit; returns true when the
    /// write was cut short by flow control (or transport backpressure) and
    /// should be retried after a WINDOW_UPDATE.
    pub fn send_data(&mut self, id: StreamId, data: &mut Bytes, last: bool) -> Result<bool, Error> {
        let expected = match self.role {
            Role::Server => State::SendBody,
            Role::Client => State::SendBodyPreOpen,
        };
        let window = {
            let Some(stream) = self.streams.get(&id) else {
                return Err(Error::User("unknown stream"));
            };
            if stream.state != expected {
                return Err(Error::User("stream is not in a sending state"));
            }
            self.send_window
                .min(stream.send_window)
                .min(self.remote.max_frame_size as i32)
        };
        if self.transport.is_flushing() {
            return Ok(true);
        }

        let send = (window.max(0) as usize).min(data.len());
        if send == 0 && !data.is_empty() {
            return Ok(true);
        }
        let limited = send < data.len();
        let chunk = data.split_to(send);
        self.send_window -= send as i32;
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.send_window -= send as i32;
        }

        let end = last && !limited;
        let flag = if end { frame::END_STREAM } else { 0 };
        self.write_frame(Kind::Data, flag, id, &chunk)?;

        if end {
            match self.role {
                Role::Server => self.close_local(id)?,
                Role::Client => {
                    // Request body done; wait for the response.
                    if let Some(stream) = self.streams.get_mut(&id) {
                        stream.state = State::Open;
                    }
                }
            }
        }
        Ok(limited)
    }

    /// Grant receive-window credit back to the peer.
    pub fn send_window_update(&mut self, stream: Option<StreamId>, increment: u32) -> Result<(), Error> {
        if increment == 0 || increment > MAX_WINDOW_SIZE {
            return Err(Error::User("window increment out of range"));
        }
        let id = match stream {
            None => {
                let updated = self.receive_window as i64 + increment as i64;
                if updated > MAX_WINDOW_SIZE as i64 {
                    return Err(Error::User("window increment overflows"));
                }
                self.receive_window = updated as i32;
                StreamId::ZERO
            }
            Some(id) => {
                let Some(stream) = self.streams.get_mut(&id) else {
                    return Err(Error::User("unknown stream"));
                };
                let updated = stream.receive_window as i64 + increment as i64;
                if updated > MAX_WINDOW_SIZE as i64 {
                    return Err(Error::User("window increment overflows"));
                }
                stream.receive_window = updated as i32;
                id
            }
        };
        self.write_frame(Kind::WindowUpdate, 0, id, &increment.to_be_bytes())
    }

    /// Reserve a pushed stream carrying `request`, announced on `parent`.
    /// Returns None when the peer disabled push or we are not the server.
    pub fn push(&mut self, parent: StreamId, request: &Headers) -> Result<Option<StreamId>, Error> {
        if self.role != Role::Server || !self.remote.enable_push {
            return Ok(None);
        }
        if !self.streams.contains_key(&parent) {
            return Err(Error::User("unknown parent stream"));
        }
        let id = self.allocate_stream_id()?;
        self.open_stream(id);
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.state = State::Processing;
        }
        let promised = id.as_u32().to_be_bytes();
        self.send_header_block(Kind::PushPromise, parent, &promised, request, false)?;
        Ok(Some(id))
    }

    // endregion
    // region: accessors

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    pub fn local_settings(&self) -> &Settings {
        &self.local
    }

    /// Mutable access to the local record, for configuration before the
    /// settings handshake.
    pub fn local_settings_mut(&mut self) -> &mut Settings {
        &mut self.local
    }

    pub fn remote_settings(&self) -> &Settings {
        &self.remote
    }

    pub fn send_window(&self) -> i32 {
        self.send_window
    }

    pub fn receive_window(&self) -> i32 {
        self.receive_window
    }

    pub fn stream_exists(&self, id: StreamId) -> bool {
        self.streams.contains_key(&id)
    }

    pub fn stream_state(&self, id: StreamId) -> Option<State> {
        self.streams.get(&id).map(|stream| stream.state)
    }

    pub fn stream_send_window(&self, id: StreamId) -> Option<i32> {
        self.streams.get(&id).map(|stream| stream.send_window)
    }

    /// Advisory priority last seen for `id`: `(dependency, weight 1..=256)`.
    pub fn stream_priority(&self, id: StreamId) -> Option<(StreamId, u16)> {
        self.streams
            .get(&id)
            .map(|stream| (stream.dependency, stream.weight))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    // endregion
    // region: internals

    fn init_local_settings(&mut self) {
        self.flow.init_settings(&mut self.local);
        self.session.init_settings(&mut self.local);
    }

    fn note_stream_id(&mut self, id: StreamId) {
        if !id.is_zero() && id.as_u32() >= self.next_stream_id {
            self.next_stream_id = id.as_u32() + 1;
        }
    }

    fn initiated_locally(&self, id: StreamId) -> bool {
        match self.role {
            Role::Client => id.is_client_initiated(),
            Role::Server => id.is_server_initiated(),
        }
    }

    fn allocate_stream_id(&mut self) -> Result<StreamId, Error> {
        let parity = match self.role {
            Role::Client => 1,
            Role::Server => 0,
        };
        if self.next_stream_id % 2 != parity {
            self.next_stream_id += 1;
        }
        let id = self.next_stream_id;
        if id > StreamId::MAX.as_u32() {
            return Err(Error::User("stream ids exhausted"));
        }
        self.next_stream_id += 2;
        Ok(StreamId::from(id))
    }

    fn open_stream(&mut self, id: StreamId) {
        let handler = self.session.create_stream(id);
        let stream = Stream::new(
            id,
            handler,
            self.remote.initial_window_size as i32,
            self.local.initial_window_size as i32,
            self.local.header_budget(),
        );
        self.streams.insert(id, stream);
    }

    /// Our side finished sending on a server stream: remove and finish it.
    fn close_local(&mut self, id: StreamId) -> Result<(), Error> {
        if let Some(mut stream) = self.streams.remove(&id) {
            stream.state = State::Closed;
            stream.finish();
        }
        self.flow.stream_closed(id);
        self.check_goaway()
    }

    /// Client side: once the peer finished a stream, nothing more will
    /// happen on it, so drop it from the table.
    fn reap(&mut self, id: StreamId) -> Result<(), Error> {
        if self.role == Role::Server {
            return Ok(());
        }
        let done = self
            .streams
            .get(&id)
            .map(|stream| stream.remote_done())
            .unwrap_or(false);
        if done {
            if let Some(mut stream) = self.streams.remove(&id) {
                stream.finish();
            }
            self.flow.stream_closed(id);
            self.check_goaway()?;
        }
        Ok(())
    }

    fn apply_grant(&mut self, id: StreamId, grant: Grant) -> Result<(), Error> {
        if grant.connection > 0 {
            self.send_window_update(None, grant.connection)?;
        }
        if grant.stream > 0 && self.streams.contains_key(&id) {
            self.send_window_update(Some(id), grant.stream)?;
        }
        Ok(())
    }

    fn check_goaway(&mut self) -> Result<(), Error> {
        if !(self.goaway_sent || self.goaway_received) {
            return Ok(());
        }
        if self.streams.is_empty() {
            if !self.goaway_sent {
                self.emit_go_away(Reason::NO_ERROR, b"")?;
            }
            let _ = self.transport.flush();
            self.closed = true;
            self.transport.close_gracefully();
        }
        Ok(())
    }

    fn guard_control(&mut self, what: &'static str) -> Result<(), Error> {
        if self.role == Role::Server && self.meter.control() {
            return Err(Error::go_away(Reason::ENHANCE_YOUR_CALM, what));
        }
        Ok(())
    }

    /// Remove one stream, answer with RST_STREAM, keep the connection up.
    fn stream_error(&mut self, id: StreamId, reason: Reason) -> Result<(), Error> {
        debug!(stream = id.as_u32(), ?reason, "stream error");
        match self.streams.remove(&id) {
            Some(mut stream) => {
                stream.finish();
                self.flow.stream_closed(id);
            }
            None => self.guard_control("RST_STREAM")?,
        }
        self.write_frame(Kind::Reset, 0, id, &u32::from(reason).to_be_bytes())?;
        let _ = self.transport.flush();
        Ok(())
    }

    /// Connection is done for: emit GOAWAY when one applies, flush whatever
    /// is buffered, tear every stream down, close the transport.
    fn fail(&mut self, error: Error) -> Result<(), Error> {
        self.closed = true;
        match &error {
            Error::GoAway { reason, message } => {
                debug!(?reason, message = *message, "connection error");
                let _ = self.emit_go_away(*reason, message.as_bytes());
            }
            Error::Compression(inner) => {
                debug!(%inner, "compression error");
                let _ = self.emit_go_away(Reason::COMPRESSION_ERROR, b"");
            }
            // Transport faults close silently, without GOAWAY.
            Error::Io(_) => {}
            Error::Reset { .. } | Error::User(_) => {
                let _ = self.emit_go_away(Reason::INTERNAL_ERROR, b"");
            }
        }
        let _ = self.transport.flush();
        self.finish_all();
        self.transport.close();
        Err(error)
    }

    fn finish_all(&mut self) {
        for (_, mut stream) in self.streams.drain() {
            stream.finish();
        }
    }

    fn emit_go_away(&mut self, reason: Reason, debug: &[u8]) -> Result<(), Error> {
        if self.goaway_sent {
            return Ok(());
        }
        self.goaway_sent = true;
        let last = self.next_stream_id.saturating_sub(1) & 0x7fff_ffff;
        let mut payload = BytesMut::with_capacity(8 + debug.len());
        payload.put_u32(last);
        payload.put_u32(reason.into());
        payload.put_slice(debug);
        self.write_frame(Kind::GoAway, 0, StreamId::ZERO, &payload)
    }

    /// Encode a header block and emit it as HEADERS or PUSH_PROMISE plus as
    /// many CONTINUATION frames as the peer's max frame size demands.
    /// `prefix` rides in the first frame only (the promised stream id).
    fn send_header_block(
        &mut self,
        kind: Kind,
        id: StreamId,
        prefix: &[u8],
        headers: &Headers,
        end_stream: bool,
    ) -> Result<(), Error> {
        let mut block = BytesMut::new();
        headers.encode(&mut self.encoder, &mut block);
        let block = block.freeze();
        let limit = self.remote.max_frame_size as usize;

        let mut remaining = &block[..];
        let mut first = true;
        loop {
            let budget = if first { limit - prefix.len() } else { limit };
            let take = remaining.len().min(budget);
            let (chunk, rest) = remaining.split_at(take);
            remaining = rest;
            let last = remaining.is_empty();

            let mut flag = 0;
            if last {
                flag |= frame::END_HEADERS;
            }
            if first && end_stream {
                flag |= frame::END_STREAM;
            }
            let kind_now = if first { kind } else { Kind::Continuation };

            if first && !prefix.is_empty() {
                let mut payload = BytesMut::with_capacity(prefix.len() + chunk.len());
                payload.put_slice(prefix);
                payload.put_slice(chunk);
                self.write_frame(kind_now, flag, id, &payload)?;
            } else {
                self.write_frame(kind_now, flag, id, chunk)?;
            }
            first = false;
            if last {
                return Ok(());
            }
        }
    }

    fn write_frame(&mut self, kind: Kind, flag: u8, id: StreamId, payload: &[u8]) -> Result<(), Error> {
        trace!(?kind, flag, stream = id.as_u32(), len = payload.len(), "send frame");
        let mut buf = BytesMut::with_capacity(frame::HEADER_LEN + payload.len());
        Head::new(kind, flag, id).encode(payload.len(), &mut buf);
        buf.put_slice(payload);
        self.transport.write(buf.freeze())?;
        Ok(())
    }

    // endregion
}

fn invalid_stream(id: StreamId) -> Error {
    if id.is_zero() {
        Error::protocol("invalid stream id")
    } else {
        Error::reset(id, Reason::STREAM_CLOSED)
    }
}

/// Strip trailing padding in place. The padding octets already counted
/// toward flow control; only the length byte and overrun are validated.
fn strip_padding(payload: &mut Bytes) -> Result<(), Error> {
    if payload.is_empty() {
        return Err(Error::protocol("padding length missing"));
    }
    let pad = payload.get_u8() as usize;
    if pad > payload.len() {
        return Err(Error::protocol("padding exceeds payload"));
    }
    payload.truncate(payload.len() - pad);
    Ok(())
}
