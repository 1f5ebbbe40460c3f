use std::collections::VecDeque;

use bytes::Bytes;

use super::header::Field;

/// Number of fixed entries shared by every connection.
pub(crate) const STATIC_TABLE_LEN: usize = 61;

// RFC 7541 Appendix A, 1-indexed on the wire.
static STATIC_TABLE: [(&str, &str); STATIC_TABLE_LEN] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Result of an index lookup during encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    /// Both name and value matched at this 1-based index.
    Pair(usize),
    /// Only the name matched.
    Name(usize),
    Miss,
}

/// Find `(name, value)` in the static table. A pair match wins; otherwise
/// the first name-only match is reported.
pub(crate) fn static_find(name: &[u8], value: &[u8]) -> Lookup {
    let mut name_index = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if n.as_bytes() == name {
            if v.as_bytes() == value {
                return Lookup::Pair(i + 1);
            }
            if name_index.is_none() {
                name_index = Some(i + 1);
            }
        }
    }
    match name_index {
        Some(i) => Lookup::Name(i),
        None => Lookup::Miss,
    }
}

/// The eviction-managed dynamic table (RFC 7541 §4).
///
/// Entries are ordered most-recently-inserted first; wire indices continue
/// past the 61 static entries, so the newest dynamic entry is index 62.
#[derive(Debug)]
pub(crate) struct Table {
    entries: VecDeque<Field>,
    size: usize,
    capacity: usize,
}

impl Table {
    pub fn new(capacity: usize) -> Table {
        Table {
            entries: VecDeque::new(),
            size: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Change the capacity, evicting from the oldest end until the contents
    /// fit. Capacity zero empties the table.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        if capacity == 0 {
            self.entries.clear();
            self.size = 0;
            return;
        }
        while self.size > capacity {
            self.evict();
        }
    }

    /// Prepend a field. A field larger than the whole table clears it
    /// instead of being stored (RFC 7541 §4.4).
    pub fn insert(&mut self, field: Field) {
        let len = field.size();
        if len > self.capacity {
            self.entries.clear();
            self.size = 0;
            return;
        }
        while self.capacity - self.size < len {
            self.evict();
        }
        self.size += len;
        self.entries.push_front(field);
    }

    fn evict(&mut self) {
        if let Some(evicted) = self.entries.pop_back() {
            self.size -= evicted.size();
        }
    }

    /// Resolve a 1-based wire index across the static and dynamic tables.
    pub fn get(&self, index: usize) -> Option<Field> {
        if index == 0 {
            return None;
        }
        if index <= STATIC_TABLE_LEN {
            let (name, value) = STATIC_TABLE[index - 1];
            return Some(Field::new(
                Bytes::from_static(name.as_bytes()),
                Bytes::from_static(value.as_bytes()),
            ));
        }
        self.entries.get(index - STATIC_TABLE_LEN - 1).cloned()
    }

    /// Find `(name, value)` among the dynamic entries, reporting wire
    /// indices (62-based).
    pub fn find(&self, name: &[u8], value: &[u8]) -> Lookup {
        let mut name_index = None;
        for (i, field) in self.entries.iter().enumerate() {
            if field.name == name {
                if field.value == value {
                    return Lookup::Pair(STATIC_TABLE_LEN + i + 1);
                }
                if name_index.is_none() {
                    name_index = Some(STATIC_TABLE_LEN + i + 1);
                }
            }
        }
        match name_index {
            Some(i) => Lookup::Name(i),
            None => Lookup::Miss,
        }
    }
}
