use std::{fmt, ops, str};

use bytes::Bytes;

/// An immutable UTF-8 string backed by [`Bytes`].
///
/// Cloning is a reference-count bump; pseudo-header values and other decoded
/// strings ride on the original receive buffer without copying.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BytesStr(Bytes);

impl BytesStr {
    pub(crate) fn try_from_bytes(bytes: Bytes) -> Result<BytesStr, str::Utf8Error> {
        str::from_utf8(&bytes)?;
        Ok(BytesStr(bytes))
    }

    pub fn as_str(&self) -> &str {
        // Invariant: every constructor validates UTF-8.
        unsafe { str::from_utf8_unchecked(&self.0) }
    }
}

impl From<&str> for BytesStr {
    fn from(src: &str) -> BytesStr {
        BytesStr(Bytes::copy_from_slice(src.as_bytes()))
    }
}

impl ops::Deref for BytesStr {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Debug for BytesStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl fmt::Display for BytesStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single decoded header field.
#[derive(Clone, PartialEq, Eq)]
pub struct Field {
    pub name: Bytes,
    pub value: Bytes,
    /// True when the field arrived as a never-indexed literal; relays must
    /// preserve that representation.
    pub sensitive: bool,
}

impl Field {
    pub(crate) fn new(name: Bytes, value: Bytes) -> Field {
        Field {
            name,
            value,
            sensitive: false,
        }
    }

    /// Octets this field counts for against table capacity and the header
    /// list budget (RFC 7541 §4.1).
    pub fn size(&self) -> usize {
        32 + self.name.len() + self.value.len()
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Field {{ {:?}: {:?} }}",
            String::from_utf8_lossy(&self.name),
            String::from_utf8_lossy(&self.value)
        )
    }
}

/// Literal representation requested by the sender of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indexing {
    /// Insert into the encoder's dynamic table (incremental indexing).
    Save,
    /// Send as a plain literal, no table insertion.
    Discard,
    /// Never indexed: intermediaries must not index it either.
    DiscardAlways,
}
