//! The synthetic signals we sample. Every variant is the sum of two sines.

use std::f32::consts::PI;

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Waveform {
    /// 3 Hz and 5 Hz
    #[default]
    LowFreq,
    /// 2 Hz and 9 Hz
    Changed,
    /// 100 Hz and 150 Hz
    MediumFreq,
    /// 300 Hz and 350 Hz
    HighFreq,
}

impl Waveform {
    /// (amplitude, frequency in Hz) of both components
    pub fn components(self) -> [(f32, f32); 2] {
        match self {
            Waveform::LowFreq => [(2.0, 3.0), (4.0, 5.0)],
            Waveform::Changed => [(10.0, 2.0), (6.0, 9.0)],
            Waveform::MediumFreq => [(8.0, 100.0), (3.0, 150.0)],
            Waveform::HighFreq => [(4.0, 350.0), (2.0, 300.0)],
        }
    }

    /// Highest frequency present in the signal
    pub fn bandwidth(self) -> f32 {
        let [(_, a), (_, b)] = self.components();
        a.max(b)
    }

    /// Value at time `t` (seconds)
    pub fn at(self, t: f32) -> f32 {
        self.components()
            .iter()
            .map(|(amp, freq)| amp * (2.0 * PI * freq * t).sin())
            .sum()
    }

    /// Value of the `index`th sample when sampling at `rate` Hz
    pub fn sample(self, index: usize, rate: u32) -> f32 {
        self.at(index as f32 / rate as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Waveform; 4] = [
        Waveform::LowFreq,
        Waveform::Changed,
        Waveform::MediumFreq,
        Waveform::HighFreq,
    ];

    #[test]
    fn test_sampling_is_deterministic() {
        for wf in ALL {
            for rate in [1, 12, 1000, 44100] {
                for i in [0usize, 1, 7, 1023, 100_000] {
                    assert_eq!(wf.sample(i, rate).to_bits(), wf.sample(i, rate).to_bits());
                }
            }
        }
    }

    #[test]
    fn test_starts_at_zero() {
        for wf in ALL {
            assert_eq!(wf.sample(0, 1000), 0.0);
        }
    }

    #[test]
    fn test_low_freq_quarter_period() {
        // t = 0.05s: sin(2pi*0.15) * 2 + sin(2pi*0.25) * 4
        let expected = 2.0 * (2.0 * PI * 0.15).sin() + 4.0;
        assert!((Waveform::LowFreq.sample(50, 1000) - expected).abs() < 1e-4);
    }

    #[test]
    fn test_bandwidth() {
        assert_eq!(Waveform::LowFreq.bandwidth(), 5.0);
        assert_eq!(Waveform::HighFreq.bandwidth(), 350.0);
    }
}
