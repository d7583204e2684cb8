//! Closed-loop sampling rate control.
//!
//! The rate starts high and can only ever come down. Once calibration is over
//! the controller is frozen into a [`SamplingRate`], which is `Copy` and read-only,
//! and that's what every task gets handed.

use std::{fmt, time::Duration};

use num_traits::ToPrimitive;
use tracing::{debug, info};

/// A sampling rate in Hz, fixed for the rest of the run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SamplingRate(u32);

impl SamplingRate {
    /// A rate that skips calibration altogether
    pub fn fixed(hz: u32) -> Self {
        Self(hz.max(1))
    }

    pub fn hz(self) -> u32 {
        self.0
    }

    /// Time between two samples
    pub fn period(self) -> Duration {
        Duration::from_secs(1) / self.0
    }
}

impl fmt::Display for SamplingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct RateController {
    rate: u32,
    multiplier: f32,
    floor: u32,
}

impl RateController {
    pub fn new(initial: u32, multiplier: f32, floor: u32) -> Self {
        Self {
            rate: initial.max(floor).max(1),
            multiplier,
            floor: floor.max(1),
        }
    }

    pub fn current(&self) -> u32 {
        self.rate
    }

    /// Rate we'd like to run at for a signal whose highest component is `peak` Hz
    pub fn candidate(&self, peak: f32) -> Option<u32> {
        let scaled = (self.multiplier * peak).floor();
        if !scaled.is_finite() || scaled < 0.0 {
            return None;
        }
        // Saturate huge peaks, they can never lower the rate anyway
        let hz = scaled.to_u32().unwrap_or(u32::MAX);
        Some(hz.max(self.floor))
    }

    /// Feed a detected peak frequency. Returns true if the rate went down.
    ///
    /// `None` (no peak found) leaves the rate alone, as does any peak that would
    /// need a faster rate than the one we already have.
    pub fn adjust(&mut self, peak: Option<f32>) -> bool {
        let Some(candidate) = peak.and_then(|p| self.candidate(p)) else {
            debug!("No usable peak, keeping {} Hz", self.rate);
            return false;
        };
        if candidate < self.rate {
            info!(from = self.rate, to = candidate, "Lowering sampling rate");
            self.rate = candidate;
            true
        } else {
            debug!(
                candidate,
                current = self.rate,
                "Candidate rate isn't lower, ignoring"
            );
            false
        }
    }

    pub fn freeze(self) -> SamplingRate {
        SamplingRate(self.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_floors() {
        let rc = RateController::new(1000, 2.5, 1);
        assert_eq!(rc.candidate(5.0), Some(12));
        assert_eq!(rc.candidate(4.8828125), Some(12));
        assert_eq!(rc.candidate(100.0), Some(250));
        assert_eq!(rc.candidate(-3.0), None);
        assert_eq!(rc.candidate(f32::NAN), None);
    }

    #[test]
    fn test_only_goes_down() {
        let mut rc = RateController::new(1000, 2.5, 1);
        assert!(rc.adjust(Some(100.0)));
        assert_eq!(rc.current(), 250);
        // Same peak again is a no-op
        assert!(!rc.adjust(Some(100.0)));
        assert_eq!(rc.current(), 250);
        // A higher peak would want 500 Hz, we stay put
        assert!(!rc.adjust(Some(200.0)));
        assert_eq!(rc.current(), 250);
        assert!(rc.adjust(Some(10.0)));
        assert_eq!(rc.current(), 25);
    }

    #[test]
    fn test_non_increasing_sequence() {
        let mut rc = RateController::new(1000, 2.5, 1);
        let mut last = rc.current();
        for peak in [300.0, 300.0, 120.0, 80.0, 80.0, 3.0] {
            rc.adjust(Some(peak));
            assert!(rc.current() <= last);
            last = rc.current();
        }
        assert_eq!(last, 7);
    }

    #[test]
    fn test_no_peak_keeps_rate() {
        let mut rc = RateController::new(1000, 2.5, 1);
        assert!(!rc.adjust(None));
        assert_eq!(rc.freeze().hz(), 1000);
    }

    #[test]
    fn test_floor() {
        let mut rc = RateController::new(1000, 2.5, 20);
        assert!(rc.adjust(Some(1.0)));
        assert_eq!(rc.current(), 20);
        assert!(!rc.adjust(Some(0.1)));
        assert_eq!(rc.current(), 20);
    }

    #[test]
    fn test_period() {
        let rate = RateController::new(1000, 2.5, 1).freeze();
        assert_eq!(rate.period(), Duration::from_millis(1));
    }
}
