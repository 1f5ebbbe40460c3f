use bytes::{Bytes, BytesMut};
use http::{HeaderName, HeaderValue};
use tracing::trace;

use crate::{
    error::{Error, Reason},
    frame::{headers::normalize_authority, Headers, StreamId},
    hpack::{self, BytesStr, Field},
};

use super::session::StreamHandler;

/// Stream lifecycle states.
///
/// The header phase is split so pseudo-header ordering can be enforced:
/// once a regular field is seen, further pseudo fields are a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Client only: request headers sent, request body still going out.
    SendBodyPreOpen,
    Open,
    HeaderPseudo,
    HeaderRegular,
    Data,
    HeaderTrailer,
    /// Request fully received, response pending (server).
    Processing,
    SendBody,
    Closed,
    Errored,
}

/// One bidirectional exchange: state machine, windows and header assembly.
/// Holds the application's callbacks as a trait object.
pub(crate) struct Stream {
    pub(crate) id: StreamId,
    pub(crate) state: State,
    pub(crate) send_window: i32,
    pub(crate) receive_window: i32,
    header_budget: i64,
    /// Advisory priority; parsed, stored, never acted on.
    pub(crate) dependency: StreamId,
    pub(crate) weight: u16,
    headers: Option<Headers>,
    /// First field-level error in the current block. The rest of the block
    /// still runs through the decoder so the shared HPACK state stays exact;
    /// the error surfaces once the block ends.
    block_error: Option<Error>,
    /// Header-block bytes not yet forming a complete instruction.
    buf: BytesMut,
    end_stream: bool,
    /// Client side: this stream was opened by a PUSH_PROMISE and the next
    /// header block carries the promised request, not a response.
    promised: bool,
    finished: bool,
    pub(crate) handler: Box<dyn StreamHandler>,
}

impl Stream {
    pub(crate) fn new(
        id: StreamId,
        handler: Box<dyn StreamHandler>,
        send_window: i32,
        receive_window: i32,
        header_budget: u32,
    ) -> Stream {
        Stream {
            id,
            state: State::Open,
            send_window,
            receive_window,
            header_budget: header_budget as i64,
            dependency: StreamId::ZERO,
            weight: 16,
            headers: None,
            block_error: None,
            buf: BytesMut::new(),
            end_stream: false,
            promised: false,
            finished: false,
            handler,
        }
    }

    pub(crate) fn mark_promised(&mut self) {
        self.promised = true;
    }

    pub(crate) fn set_end_stream(&mut self) {
        self.end_stream = true;
    }

    /// Both header assembly and the data phase have completed from the
    /// peer's side.
    pub(crate) fn remote_done(&self) -> bool {
        self.end_stream && self.headers.is_none() && self.buf.is_empty()
    }

    pub(crate) fn priority(&mut self, dependency: u32, weight: u16) {
        self.dependency = StreamId::from(dependency & 0x7fff_ffff);
        self.weight = weight;
    }

    /// Feed one HEADERS/PUSH_PROMISE/CONTINUATION fragment through the
    /// connection's decoder, accumulating fields into the header map.
    pub(crate) fn recv_header_fragment(
        &mut self,
        fragment: &[u8],
        decoder: &mut hpack::Decoder,
        first: bool,
    ) -> Result<(), Error> {
        if first {
            self.state = match self.state {
                State::Open => State::HeaderPseudo,
                State::Data => State::HeaderTrailer,
                _ => return Err(Error::reset(self.id, Reason::PROTOCOL_ERROR)),
            };
            self.headers = Some(Headers::default());
        }
        self.buf.extend_from_slice(fragment);
        while let Some(field) = decoder.decode(&mut self.buf)? {
            if self.block_error.is_none() {
                if let Err(error) = self.accept(field) {
                    self.block_error = Some(error);
                }
            }
        }
        Ok(())
    }

    fn accept(&mut self, field: Field) -> Result<(), Error> {
        trace!(stream = self.id.as_u32(), ?field, "header field");
        self.header_budget -= field.size() as i64;
        if self.header_budget < 0 {
            // 431-equivalent: the peer blew through max_header_list_size.
            return Err(Error::reset(self.id, Reason::PROTOCOL_ERROR));
        }

        let headers = match self.headers.as_mut() {
            Some(headers) => headers,
            None => return Err(Error::reset(self.id, Reason::PROTOCOL_ERROR)),
        };

        if field.name.first() == Some(&b':') {
            if self.state != State::HeaderPseudo {
                return Err(Error::reset(self.id, Reason::PROTOCOL_ERROR));
            }
            let value = BytesStr::try_from_bytes(field.value)
                .map_err(|_| Error::reset(self.id, Reason::PROTOCOL_ERROR))?;
            let slot = match &field.name[..] {
                b":method" => &mut headers.pseudo.method,
                b":scheme" => &mut headers.pseudo.scheme,
                b":authority" => &mut headers.pseudo.authority,
                b":path" => &mut headers.pseudo.path,
                b":status" => &mut headers.pseudo.status,
                _ => return Err(Error::reset(self.id, Reason::PROTOCOL_ERROR)),
            };
            if slot.is_some() {
                return Err(Error::reset(self.id, Reason::PROTOCOL_ERROR));
            }
            *slot = Some(value);
        } else {
            if self.state == State::HeaderPseudo {
                self.state = State::HeaderRegular;
            }
            let name = HeaderName::from_bytes(&field.name)
                .map_err(|_| Error::reset(self.id, Reason::PROTOCOL_ERROR))?;
            let mut value = HeaderValue::from_maybe_shared(field.value)
                .map_err(|_| Error::reset(self.id, Reason::PROTOCOL_ERROR))?;
            if field.sensitive {
                value.set_sensitive(true);
            }
            headers.fields.append(name, value);
        }
        Ok(())
    }

    /// END_HEADERS: close the assembly phase, validate, deliver. When
    /// END_STREAM already arrived with the block, the data phase completes
    /// right after delivery.
    pub(crate) fn recv_header_end(&mut self, server: bool) -> Result<(), Error> {
        if !self.buf.is_empty() {
            // The block declared END_HEADERS mid-instruction.
            return Err(Error::Compression(hpack::DecoderError::TruncatedBlock));
        }
        if let Some(error) = self.block_error.take() {
            self.headers = None;
            return Err(error);
        }
        let headers = self.headers.take().unwrap_or_default();

        if self.state == State::HeaderTrailer {
            self.state = State::Data;
            let delivered = self.handler.on_header_done(headers, false);
            self.guard(delivered)?;
        } else if self.promised {
            // The promised request block on a pushed stream; the response
            // follows as a separate block later.
            self.promised = false;
            validate_request(&headers, self.id)?;
            self.state = State::Open;
            let delivered = self.handler.on_header_done(headers, false);
            self.guard(delivered)?;
            return Ok(());
        } else {
            if server {
                validate_request(&headers, self.id)?;
            } else {
                validate_response(&headers, self.id)?;
            }
            self.state = State::Data;
            let has_body = !self.end_stream;
            let delivered = self.handler.on_header_done(headers, has_body);
            self.guard(delivered)?;
        }

        if self.end_stream {
            self.recv_data_end(server)?;
        }
        Ok(())
    }

    pub(crate) fn recv_data(&mut self, data: Bytes) -> Result<(), Error> {
        if self.state != State::Data {
            return Err(Error::reset(self.id, Reason::PROTOCOL_ERROR));
        }
        let delivered = self.handler.on_data(data);
        self.guard(delivered)
    }

    /// END_STREAM: the peer is done sending.
    pub(crate) fn recv_data_end(&mut self, server: bool) -> Result<(), Error> {
        self.end_stream = true;
        if server {
            self.state = State::Processing;
        }
        let done = self.handler.on_done();
        self.guard(done)
    }

    /// Peer-initiated abort. Terminal; the finish callback still fires
    /// exactly once.
    pub(crate) fn rst(&mut self, reason: Reason) {
        if self.state != State::Errored {
            self.state = State::Errored;
            self.handler.on_rst(reason);
        }
        self.finish();
    }

    /// The stream is leaving the connection, whatever the cause.
    pub(crate) fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !matches!(self.state, State::Closed | State::Errored) {
            self.state = State::Closed;
        }
        self.handler.on_finish();
    }

    fn guard(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                self.handler.on_error(&error);
                Err(Error::reset(self.id, Reason::INTERNAL_ERROR))
            }
        }
    }
}

fn validate_request(headers: &Headers, id: StreamId) -> Result<(), Error> {
    let pseudo = &headers.pseudo;
    if pseudo.status.is_some()
        || pseudo.method.is_none()
        || pseudo.scheme.is_none()
        || pseudo.path.is_none()
    {
        return Err(Error::reset(id, Reason::PROTOCOL_ERROR));
    }
    if let (Some(authority), Some(host)) = (&pseudo.authority, headers.fields.get(http::header::HOST))
    {
        let host = host
            .to_str()
            .map_err(|_| Error::reset(id, Reason::PROTOCOL_ERROR))?;
        if !normalize_authority(authority.as_str()).eq_ignore_ascii_case(host) {
            return Err(Error::reset(id, Reason::PROTOCOL_ERROR));
        }
    }
    Ok(())
}

fn validate_response(headers: &Headers, id: StreamId) -> Result<(), Error> {
    let pseudo = &headers.pseudo;
    if pseudo.method.is_some()
        || pseudo.scheme.is_some()
        || pseudo.path.is_some()
        || pseudo.authority.is_some()
    {
        return Err(Error::reset(id, Reason::PROTOCOL_ERROR));
    }
    match &pseudo.status {
        Some(status) if status.as_str().len() == 3 => {
            if status.as_str().parse::<u16>().is_err() {
                return Err(Error::reset(id, Reason::PROTOCOL_ERROR));
            }
        }
        _ => return Err(Error::reset(id, Reason::PROTOCOL_ERROR)),
    }
    Ok(())
}
