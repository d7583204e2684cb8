use std::time::Duration;

pub mod aggregate;
pub mod capture;
pub mod config;
pub mod echo;
pub mod error;
pub mod exfil;
pub mod f_engine;
pub mod monitoring;
pub mod pipeline;
pub mod rate;
pub mod signal;

pub use config::PipelineConfig;
pub use error::{Error, Result};

// Length of the analysis block (must be a power of 2)
pub const BLOCK_SIZE: usize = 1024;
// Rate we start at before we know anything about the signal (Hz)
pub const INIT_SAMPLE_RATE: u32 = 1000;
// The rate controller never goes below this (Hz)
pub const MIN_SAMPLE_RATE: u32 = 1;
// Sliding window length of the moving average
pub const WINDOW_SIZE: usize = 5;
// How many samples are produced and how many averages are emitted
pub const NUM_OF_SAMPLES_AGGREGATE: usize = 10;
// Sample at 2.5x the highest frequency we see, comfortably above Nyquist
pub const NYQUIST_MULTIPLIER: f32 = 2.5;
// Magnitude a spectral peak has to clear to count as signal
pub const NOISE_THRESHOLD: f32 = 8.0;
// Bounded wait of the aggregator on an empty sample queue
pub const QUEUE_POLL: Duration = Duration::from_millis(5);
// How long the ack task waits for the next acknowledgement before giving up
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Whether a loop should sleep one sample period between iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Sleep `1/rate` between samples, like the real hardware
    Realtime,
    /// Don't sleep at all
    Immediate,
}

impl Pacing {
    pub(crate) fn wait(self, period: Duration) {
        if self == Pacing::Realtime {
            std::thread::sleep(period);
        }
    }
}
