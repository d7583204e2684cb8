//! Configuration parameters for a run

use std::{net::SocketAddr, time::Duration};

use crate::{
    aggregate::Denominator, error::Error, signal::Waveform, Pacing, Result, ACK_TIMEOUT,
    BLOCK_SIZE, INIT_SAMPLE_RATE, MIN_SAMPLE_RATE, NOISE_THRESHOLD, NUM_OF_SAMPLES_AGGREGATE,
    NYQUIST_MULTIPLIER, QUEUE_POLL,
};

/// Where averages go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// In-process echo, no network
    Loopback,
    /// JSON datagrams to an echoing peer
    Udp { bind: SocketAddr, peer: SocketAddr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    // Calibration
    /// Samples per analysis block, power of 2 (default: 1024)
    pub block_size: usize,
    /// Rate before calibration, Hz (default: 1000)
    pub initial_rate: u32,
    /// Calibration never drops below this, Hz (default: 1)
    pub min_rate: u32,
    /// Safety factor over the detected peak (default: 2.5)
    pub multiplier: f32,
    /// Magnitude a peak has to clear (default: 8.0)
    pub noise_threshold: f32,
    pub waveform: Waveform,

    // Steady state
    /// Samples produced and averages emitted (default: 10)
    pub count: usize,
    /// Capacity of the sample and averages queues (default: same as count)
    pub queue_capacity: usize,
    pub denominator: Denominator,
    /// Bounded wait of the aggregator on an empty queue (default: 5 ms)
    pub poll: Duration,
    /// Sleep one period between samples, or run flat out
    pub pacing: Pacing,

    // Transmission
    pub link: Link,
    /// Give up on acks after this long without one (default: 2 s)
    pub ack_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            initial_rate: INIT_SAMPLE_RATE,
            min_rate: MIN_SAMPLE_RATE,
            multiplier: NYQUIST_MULTIPLIER,
            noise_threshold: NOISE_THRESHOLD,
            waveform: Waveform::default(),
            count: NUM_OF_SAMPLES_AGGREGATE,
            queue_capacity: NUM_OF_SAMPLES_AGGREGATE,
            denominator: Denominator::default(),
            poll: QUEUE_POLL,
            pacing: Pacing::Realtime,
            link: Link::Loopback,
            ack_timeout: ACK_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Everything but queue capacities, which fail later as allocation errors
    pub fn validate(&self) -> Result<()> {
        if self.block_size < 4 || !self.block_size.is_power_of_two() {
            return Err(Error::BlockSize(self.block_size));
        }
        if self.initial_rate == 0 {
            return Err(Error::Config("initial rate must be positive".into()));
        }
        if self.min_rate == 0 || self.min_rate > self.initial_rate {
            return Err(Error::Config(format!(
                "minimum rate {} must be within 1..={}",
                self.min_rate, self.initial_rate
            )));
        }
        if !(self.multiplier.is_finite() && self.multiplier > 0.0) {
            return Err(Error::Config(format!(
                "multiplier {} must be positive",
                self.multiplier
            )));
        }
        if !self.noise_threshold.is_finite() || self.noise_threshold < 0.0 {
            return Err(Error::Config(format!(
                "noise threshold {} must be non-negative",
                self.noise_threshold
            )));
        }
        if self.count == 0 {
            return Err(Error::Config("count must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = PipelineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.block_size, 1024);
        assert_eq!(cfg.initial_rate, 1000);
        assert_eq!(cfg.count, 10);
    }

    #[test]
    fn test_rejects() {
        let bad = [
            PipelineConfig {
                block_size: 1000,
                ..Default::default()
            },
            PipelineConfig {
                min_rate: 2000,
                ..Default::default()
            },
            PipelineConfig {
                multiplier: 0.0,
                ..Default::default()
            },
            PipelineConfig {
                noise_threshold: f32::NAN,
                ..Default::default()
            },
            PipelineConfig {
                count: 0,
                ..Default::default()
            },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "{cfg:?}");
        }
    }
}
