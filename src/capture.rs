//! This module contains the sample producer

// The producer does one thing: sample the signal at the calibrated rate and
// shove the value into an rtrb ring buffer for the aggregator. It never waits
// on the queue. If the aggregator falls behind, the sample is gone.

use rtrb::{Producer, PushError};
use tracing::{debug, info, warn};

use crate::{rate::SamplingRate, signal::Waveform, Pacing};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    /// Samples that made it onto the queue
    pub produced: usize,
    /// Samples lost to a full queue
    pub dropped: usize,
}

pub fn sample_producer(
    waveform: Waveform,
    rate: SamplingRate,
    count: usize,
    pacing: Pacing,
    mut producer: Producer<f32>,
) -> ProducerStats {
    let mut stats = ProducerStats::default();
    info!(%rate, count, "Starting sampling");
    for i in 0..count {
        let sample = waveform.sample(i, rate.hz());
        match producer.push(sample) {
            Ok(()) => {
                stats.produced += 1;
                debug!(i, sample, "Sample");
            }
            Err(PushError::Full(_)) => {
                // Keep truckin, not worth blocking the sampler over
                stats.dropped += 1;
                warn!(i, sample, "Sample queue full, dropping sample");
            }
        }
        pacing.wait(rate.period());
    }
    info!(
        produced = stats.produced,
        dropped = stats.dropped,
        "Sampling completed"
    );
    // Dropping the producer here marks the queue abandoned for the aggregator
    stats
}
