//! Frequency engine: figure out where the signal's energy is.
//!
//! For one block of samples we
//! * multiply with a Hamming window
//! * FFT (forward, radix-4)
//! * convert to a magnitude spectrum, in place over the real buffer
//! * pick the highest frequency local maximum that clears the noise floor

use std::f32::consts::PI;

use rustfft::{algorithm::Radix4, num_complex::Complex32, Fft, FftDirection};
use tracing::{debug, trace};

use crate::{error::Error, signal::Waveform, Pacing, Result};

/// Sample buffers the transform runs over. The real half holds raw samples
/// after [`SpectralAnalyzer::acquire`] and magnitudes after [`SpectralAnalyzer::analyze`].
#[derive(Debug, Clone)]
pub struct SampleBlock {
    pub real: Box<[f32]>,
    pub imag: Box<[f32]>,
}

impl SampleBlock {
    fn zeroed(len: usize) -> Self {
        Self {
            real: vec![0.0; len].into_boxed_slice(),
            imag: vec![0.0; len].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.real.len()
    }

    pub fn is_empty(&self) -> bool {
        self.real.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumBin {
    pub index: usize,
    pub frequency: f32,
    pub magnitude: f32,
}

pub struct SpectralAnalyzer {
    block: SampleBlock,
    noise_threshold: f32,
    fft: Radix4<f32>,
    // Work buffers, allocated once
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl SpectralAnalyzer {
    pub fn new(block_size: usize, noise_threshold: f32) -> Result<Self> {
        if block_size < 4 || !block_size.is_power_of_two() {
            return Err(Error::BlockSize(block_size));
        }
        let fft = Radix4::new(block_size, FftDirection::Forward);
        let scratch = vec![Complex32::default(); fft.get_inplace_scratch_len()];
        Ok(Self {
            block: SampleBlock::zeroed(block_size),
            noise_threshold,
            fft,
            buffer: vec![Complex32::default(); block_size],
            scratch,
        })
    }

    pub fn block(&self) -> &SampleBlock {
        &self.block
    }

    /// Fill the block by sampling `waveform` at `rate`, optionally at the actual rate
    pub fn acquire(&mut self, waveform: Waveform, rate: u32, pacing: Pacing) {
        let rate = rate.max(1);
        let period = std::time::Duration::from_secs(1) / rate;
        debug!(?waveform, rate, samples = self.block.len(), "Acquiring block");
        for i in 0..self.block.len() {
            self.block.real[i] = waveform.sample(i, rate);
            self.block.imag[i] = 0.0;
            pacing.wait(period);
        }
    }

    /// Fill the block with caller-provided samples
    pub fn load(&mut self, samples: &[f32]) -> Result<()> {
        if samples.len() != self.block.len() {
            return Err(Error::Config(format!(
                "expected {} samples, got {}",
                self.block.len(),
                samples.len()
            )));
        }
        self.block.real.copy_from_slice(samples);
        self.block.imag.iter_mut().for_each(|x| *x = 0.0);
        Ok(())
    }

    /// Window, transform and turn the block into a magnitude spectrum
    pub fn analyze(&mut self) {
        hamming(&mut self.block.real);
        for ((c, re), im) in self
            .buffer
            .iter_mut()
            .zip(self.block.real.iter())
            .zip(self.block.imag.iter())
        {
            *c = Complex32::new(*re, *im);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);
        for ((c, re), im) in self
            .buffer
            .iter()
            .zip(self.block.real.iter_mut())
            .zip(self.block.imag.iter_mut())
        {
            *re = c.norm();
            *im = 0.0;
        }
    }

    /// Bins up to (not including) Nyquist. Only meaningful after [`Self::analyze`].
    pub fn bins(&self, rate: u32) -> impl Iterator<Item = SpectrumBin> + '_ {
        let n = self.block.len();
        self.block.real[..n / 2]
            .iter()
            .enumerate()
            .map(move |(index, &magnitude)| SpectrumBin {
                index,
                frequency: bin_frequency(index, rate, n),
                magnitude,
            })
    }

    /// Frequency of the highest local maximum above the noise threshold.
    ///
    /// DC is skipped. Ties in magnitude don't matter, the highest *frequency*
    /// wins, so the rate follows the top edge of the signal. `None` if nothing
    /// stands out of the noise.
    pub fn dominant_frequency(&self, rate: u32) -> Option<f32> {
        let mags = &self.block.real;
        let n = mags.len();
        let peak = (1..n / 2)
            .rev()
            .find(|&i| {
                mags[i] > mags[i - 1] && mags[i] > mags[i + 1] && mags[i] > self.noise_threshold
            })
            .map(|i| {
                trace!(bin = i, magnitude = mags[i], "Peak");
                bin_frequency(i, rate, n)
            });
        debug!(?peak, "Dominant frequency");
        peak
    }
}

pub fn bin_frequency(index: usize, rate: u32, block_size: usize) -> f32 {
    index as f32 * rate as f32 / block_size as f32
}

/// Symmetric Hamming window, applied in place
pub fn hamming(samples: &mut [f32]) {
    let denom = (samples.len().max(2) - 1) as f32;
    for (n, x) in samples.iter_mut().enumerate() {
        *x *= 0.54 - 0.46 * (2.0 * PI * n as f32 / denom).cos();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    const N: usize = 1024;

    fn tone(freq: f32, amp: f32, rate: u32) -> Vec<f32> {
        (0..N)
            .map(|i| amp * (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_rejects_bad_sizes() {
        assert!(matches!(
            SpectralAnalyzer::new(1000, 8.0),
            Err(Error::BlockSize(1000))
        ));
        assert!(SpectralAnalyzer::new(2, 8.0).is_err());
        assert!(SpectralAnalyzer::new(64, 8.0).is_ok());
    }

    #[test]
    fn test_single_tone() {
        // Rate == N puts every integer frequency right on a bin
        let mut fa = SpectralAnalyzer::new(N, 8.0).unwrap();
        for f in [1.0, 37.0, 100.0, 400.0, 510.0] {
            fa.load(&tone(f, 1.0, N as u32)).unwrap();
            fa.analyze();
            assert_eq!(fa.dominant_frequency(N as u32), Some(f));
        }
    }

    #[test]
    fn test_highest_frequency_wins() {
        let mut fa = SpectralAnalyzer::new(N, 8.0).unwrap();
        // Loud low tone, quiet high tone
        let low = tone(50.0, 10.0, N as u32);
        let high = tone(200.0, 0.5, N as u32);
        let mixed: Vec<f32> = low.iter().zip(&high).map(|(a, b)| a + b).collect();
        fa.load(&mixed).unwrap();
        fa.analyze();
        assert_eq!(fa.dominant_frequency(N as u32), Some(200.0));
    }

    #[test]
    fn test_zeros_have_no_peak() {
        let mut fa = SpectralAnalyzer::new(N, 8.0).unwrap();
        fa.load(&[0.0; N]).unwrap();
        fa.analyze();
        assert_eq!(fa.dominant_frequency(1000), None);
    }

    #[test]
    fn test_noise_below_threshold() {
        let mut rng = StdRng::seed_from_u64(7);
        // Uniform noise of +-0.01 can't sum to more than 0.54 * N * 0.01 in any bin
        let noise: Vec<f32> = (0..N).map(|_| rng.gen_range(-0.01..0.01)).collect();
        let mut fa = SpectralAnalyzer::new(N, 8.0).unwrap();
        fa.load(&noise).unwrap();
        fa.analyze();
        assert_eq!(fa.dominant_frequency(1000), None);
    }

    #[test]
    fn test_quiet_tone_below_threshold() {
        // Peak magnitude is ~0.54 * amp * N / 2 = 2.76
        let mut fa = SpectralAnalyzer::new(N, 8.0).unwrap();
        fa.load(&tone(100.0, 0.01, N as u32)).unwrap();
        fa.analyze();
        assert_eq!(fa.dominant_frequency(N as u32), None);
    }

    #[test]
    fn test_magnitudes_replace_samples() {
        let mut fa = SpectralAnalyzer::new(N, 8.0).unwrap();
        fa.load(&tone(100.0, 1.0, N as u32)).unwrap();
        fa.analyze();
        assert!(fa.block().real.iter().all(|m| *m >= 0.0));
        assert!(fa.block().imag.iter().all(|m| *m == 0.0));
        let top = fa
            .bins(N as u32)
            .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
            .unwrap();
        assert_eq!(top.index, 100);
        assert!((top.magnitude - 0.54 * N as f32 / 2.0).abs() < 5.0);
    }

    #[test]
    fn test_acquire_low_freq() {
        let mut fa = SpectralAnalyzer::new(N, 8.0).unwrap();
        fa.acquire(Waveform::LowFreq, 1000, Pacing::Immediate);
        assert_eq!(fa.block().real[0], 0.0);
        assert_eq!(fa.block().real[10], Waveform::LowFreq.sample(10, 1000));
        fa.analyze();
        // 5 Hz lands closest to bin 5 (4.88 Hz)
        assert_eq!(fa.dominant_frequency(1000), Some(bin_frequency(5, 1000, N)));
    }

    #[test]
    fn test_acquire_realtime_waits_between_samples() {
        let mut fa = SpectralAnalyzer::new(8, 8.0).unwrap();
        let start = std::time::Instant::now();
        // 8 samples, 5 ms apart
        fa.acquire(Waveform::LowFreq, 200, Pacing::Realtime);
        assert!(start.elapsed() >= std::time::Duration::from_millis(40));
        assert_eq!(fa.block().real[3], Waveform::LowFreq.sample(3, 200));
    }

    #[test]
    fn test_load_length_mismatch() {
        let mut fa = SpectralAnalyzer::new(N, 8.0).unwrap();
        assert!(fa.load(&[1.0; 10]).is_err());
    }
}
