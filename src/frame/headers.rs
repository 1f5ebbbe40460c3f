use http::HeaderMap;

use crate::hpack::{BytesStr, Encoder, Indexing};

/// The reserved `:`-prefixed request/response metadata fields.
///
/// Requests carry `method`/`scheme`/`path` (plus optional `authority`);
/// responses carry `status`. A populated field of the other kind is a
/// stream-level protocol error, enforced by the stream state machine.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Pseudo {
    pub method: Option<BytesStr>,
    pub scheme: Option<BytesStr>,
    pub authority: Option<BytesStr>,
    pub path: Option<BytesStr>,
    pub status: Option<BytesStr>,
}

/// A full header field list: pseudo-headers plus the regular header map.
///
/// This is what the stream hands to `StreamHandler::on_header_done` and what
/// the application passes to `send_header`/`send_header_client`. Values
/// marked sensitive via [`http::HeaderValue::set_sensitive`] are encoded as
/// never-indexed literals.
#[derive(Debug, Default, Clone)]
pub struct Headers {
    pub(crate) pseudo: Pseudo,
    pub(crate) fields: HeaderMap,
}

impl Headers {
    pub fn request(method: &str, path: &str, scheme: &str) -> Headers {
        Headers {
            pseudo: Pseudo {
                method: Some(BytesStr::from(method)),
                scheme: Some(BytesStr::from(scheme)),
                path: Some(BytesStr::from(path)),
                ..Pseudo::default()
            },
            fields: HeaderMap::new(),
        }
    }

    pub fn response(status: u16) -> Headers {
        Headers {
            pseudo: Pseudo {
                status: Some(BytesStr::from(status.to_string().as_str())),
                ..Pseudo::default()
            },
            fields: HeaderMap::new(),
        }
    }

    pub fn trailers(fields: HeaderMap) -> Headers {
        Headers {
            pseudo: Pseudo::default(),
            fields,
        }
    }

    pub fn set_authority(&mut self, authority: &str) {
        self.pseudo.authority = Some(BytesStr::from(authority));
    }

    pub fn pseudo(&self) -> &Pseudo {
        &self.pseudo
    }

    pub fn fields(&self) -> &HeaderMap {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut HeaderMap {
        &mut self.fields
    }

    /// Parsed `:status`, if present and numeric.
    pub fn status(&self) -> Option<u16> {
        self.pseudo.status.as_ref()?.as_str().parse().ok()
    }

    /// Encode the full list as one header block: pseudo fields first, then
    /// the regular map in insertion order.
    pub(crate) fn encode(&self, encoder: &mut Encoder, dst: &mut bytes::BytesMut) {
        let pseudo = [
            (":method", &self.pseudo.method),
            (":scheme", &self.pseudo.scheme),
            (":authority", &self.pseudo.authority),
            (":path", &self.pseudo.path),
            (":status", &self.pseudo.status),
        ];
        for (name, value) in pseudo {
            if let Some(value) = value {
                encoder.encode(name.as_bytes(), value.as_str().as_bytes(), Indexing::Save, dst);
            }
        }

        for (key, value) in self.fields.iter() {
            let mode = if value.is_sensitive() {
                Indexing::DiscardAlways
            } else {
                Indexing::Save
            };
            encoder.encode(key.as_str().as_bytes(), value.as_bytes(), mode, dst);
        }
    }
}

/// Strip the userinfo production from an authority so it can be compared
/// against a `host` header.
pub(crate) fn normalize_authority(authority: &str) -> &str {
    match authority.rfind('@') {
        Some(at) => &authority[at + 1..],
        None => authority,
    }
}
