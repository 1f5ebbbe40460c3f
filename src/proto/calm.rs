use std::time::{Duration, Instant};

/// Thresholds for the control-frame flood guard.
///
/// The mechanism (bound the rate of cheap frames relative to useful data)
/// is load-bearing against ping/settings floods and similar DoS patterns;
/// the exact numbers are empirical and deployment-tunable.
#[derive(Debug, Clone)]
pub struct MeterConfig {
    /// Two cheap control frames closer together than this count toward a
    /// burst.
    pub burst_window: Duration,
    /// Burst length that trips ENHANCE_YOUR_CALM.
    pub burst_limit: u32,
    /// DATA frames per payload-ratio check.
    pub sample_frames: u64,
    /// Minimum average payload octets per DATA frame.
    pub min_bytes_per_frame: u64,
}

impl Default for MeterConfig {
    fn default() -> MeterConfig {
        MeterConfig {
            burst_window: Duration::from_millis(10),
            burst_limit: 8,
            sample_frames: 128,
            min_bytes_per_frame: 128,
        }
    }
}

/// Tracks cheap-frame bursts and the payload-to-frame ratio. Only consulted
/// on the server side; `true` means the peer should calm down.
#[derive(Debug)]
pub(crate) struct PacketMeter {
    config: MeterConfig,
    last_control: Instant,
    burst: u32,
    bytes: u64,
    frames: u64,
}

impl PacketMeter {
    pub(crate) fn new(config: MeterConfig) -> PacketMeter {
        PacketMeter {
            config,
            last_control: Instant::now()
                .checked_sub(Duration::from_secs(1))
                .unwrap_or_else(Instant::now),
            burst: 0,
            bytes: 0,
            frames: 0,
        }
    }

    /// A cheap control frame arrived (PING, PRIORITY, RST for an unknown
    /// stream, SETTINGS).
    pub(crate) fn control(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_control) < self.config.burst_window {
            self.burst += 1;
            if self.burst >= self.config.burst_limit {
                return true;
            }
        } else {
            self.burst = 0;
        }
        self.last_control = now;
        false
    }

    /// A DATA payload arrived; trips when frames stay pathologically small.
    pub(crate) fn data(&mut self, len: usize) -> bool {
        self.bytes += len as u64;
        self.frames += 1;
        self.frames % self.config.sample_frames == 0
            && self.bytes / self.frames < self.config.min_bytes_per_frame
    }
}
