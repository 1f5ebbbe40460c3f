use fnv::FnvHashMap;

use crate::frame::{Settings, StreamId};

/// Receive-window credit to hand back to the peer right now. Zero means
/// "not yet".
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub connection: u32,
    pub stream: u32,
}

/// Policy deciding when received DATA is acknowledged with WINDOW_UPDATE.
///
/// Consulted by the connection for every DATA payload after the windows have
/// been debited. The returned credit is applied to the receive windows and
/// put on the wire by the connection.
pub trait FlowControl {
    /// Adjust the local settings before they are first advertised.
    fn init_settings(&mut self, _settings: &mut Settings) {}

    /// `len` octets of DATA (padding included) arrived on `id`;
    /// `connection_window`/`stream_window` are the already-debited windows.
    fn data_received(
        &mut self,
        id: StreamId,
        len: usize,
        connection_window: i32,
        stream_window: i32,
    ) -> Grant;

    /// The stream left the connection; drop any per-stream bookkeeping.
    fn stream_closed(&mut self, _id: StreamId) {}
}

/// The naive strategy: return every octet as soon as it arrives. One
/// WINDOW_UPDATE pair per DATA frame.
#[derive(Debug, Default)]
pub struct Immediate;

impl FlowControl for Immediate {
    fn data_received(
        &mut self,
        _id: StreamId,
        len: usize,
        _connection_window: i32,
        _stream_window: i32,
    ) -> Grant {
        Grant {
            connection: len as u32,
            stream: len as u32,
        }
    }
}

/// Batches credit and grants it once half the window has been consumed,
/// trading update-frame overhead against window slack.
#[derive(Debug)]
pub struct Batched {
    window: u32,
    connection_owed: u32,
    stream_owed: FnvHashMap<StreamId, u32>,
}

impl Batched {
    pub fn new(window: u32) -> Batched {
        Batched {
            window,
            connection_owed: 0,
            stream_owed: FnvHashMap::default(),
        }
    }

    fn threshold(&self) -> u32 {
        self.window / 2
    }
}

impl FlowControl for Batched {
    fn data_received(
        &mut self,
        id: StreamId,
        len: usize,
        _connection_window: i32,
        _stream_window: i32,
    ) -> Grant {
        let mut grant = Grant::default();

        self.connection_owed = self.connection_owed.saturating_add(len as u32);
        if self.connection_owed >= self.threshold() {
            grant.connection = self.connection_owed;
            self.connection_owed = 0;
        }

        let threshold = self.threshold();
        let owed = self.stream_owed.entry(id).or_insert(0);
        *owed = owed.saturating_add(len as u32);
        if *owed >= threshold {
            grant.stream = *owed;
            self.stream_owed.remove(&id);
        }

        grant
    }

    fn stream_closed(&mut self, id: StreamId) {
        self.stream_owed.remove(&id);
    }
}
