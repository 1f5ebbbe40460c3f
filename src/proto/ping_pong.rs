use std::{
    fmt,
    hash::{BuildHasher, Hasher},
    time::{Duration, Instant},
};

/// One outstanding PING awaiting its ACK. At most one exists per connection;
/// the ACK must echo the nonce exactly.
pub(crate) struct Ping {
    pub(crate) nonce: [u8; 8],
    sent_at: Instant,
    on_pong: Box<dyn FnOnce(Duration)>,
}

impl Ping {
    pub(crate) fn new(on_pong: Box<dyn FnOnce(Duration)>) -> Ping {
        Ping {
            nonce: nonce(),
            sent_at: Instant::now(),
            on_pong,
        }
    }

    /// Matching ACK arrived: report the measured round trip.
    pub(crate) fn complete(self) -> Duration {
        let rtt = self.sent_at.elapsed();
        (self.on_pong)(rtt);
        rtt
    }
}

impl fmt::Debug for Ping {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Ping").field("nonce", &self.nonce).finish()
    }
}

fn nonce() -> [u8; 8] {
    // Unpredictable enough to pair ACKs; RandomState seeds from OS entropy.
    let hasher = std::collections::hash_map::RandomState::new().build_hasher();
    hasher.finish().to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::Cell, rc::Rc};

    #[test]
    fn complete_reports_a_round_trip() {
        let seen = Rc::new(Cell::new(None));
        let seen2 = seen.clone();
        let ping = Ping::new(Box::new(move |rtt| seen2.set(Some(rtt))));
        ping.complete();
        assert!(seen.get().is_some());
    }

    #[test]
    fn nonces_differ_between_pings() {
        let a = Ping::new(Box::new(|_| {}));
        let b = Ping::new(Box::new(|_| {}));
        assert_ne!(a.nonce, b.nonce);
    }
}
