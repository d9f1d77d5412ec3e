use anyhow::{Error, Result};
use itertools::izip;
use num_traits::Zero;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::f64::consts::PI;
use std::sync::Arc;

pub type RealVec = Vec<f32>;

pub type FftSample = Complex<f32>;
pub type FftVec = Vec<FftSample>;

/// How to window the FFT to reduce sidelobes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WindowType {
    Rect,
    Hann,
    Blackman,
}

impl std::str::FromStr for WindowType {
    type Err = Error;

    fn from_str(src: &str) -> Result<Self> {
        match src.to_ascii_lowercase().as_str() {
            "rect" | "none" => Ok(WindowType::Rect),
            "hann" => Ok(WindowType::Hann),
            "blackman" => Ok(WindowType::Blackman),
            _ => Err(Error::msg(format!(
                "Unknown window {} (expected blackman, hann or rect)",
                src
            ))),
        }
    }
}

/// Precomputed per-sample window weights. Immutable after construction.
///
/// Formulas are the symmetric variants, for index i of length N:
/// - Rect: 1
/// - Hann: 0.5 − 0.5·cos(2πi/(N−1))
/// - Blackman: 0.42 − 0.5·cos(2πi/(N−1)) + 0.08·cos(4πi/(N−1))
///
/// Values are clamped into [0, 1], since Blackman's endpoints round to -1e-17.
#[derive(Debug, Clone)]
pub struct WindowTable {
    weights: RealVec,
}

impl WindowTable {
    /// len must be at least 2.
    pub fn build(window_type: WindowType, len: usize) -> WindowTable {
        assert!(len >= 2);
        let denom = (len - 1) as f64;

        let weights = (0..len)
            .map(|i| {
                let phase = 2. * PI * i as f64 / denom;
                let w = match window_type {
                    WindowType::Rect => 1.,
                    WindowType::Hann => 0.5 - 0.5 * phase.cos(),
                    WindowType::Blackman => 0.42 - 0.5 * phase.cos() + 0.08 * (2. * phase).cos(),
                };
                w.max(0.).min(1.) as f32
            })
            .collect();

        WindowTable { weights }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Precondition: input, output, and self have the same length.
    pub fn apply(&self, input: &[f32], output: &mut [f32]) {
        assert_eq!(input.len(), self.len());
        assert_eq!(output.len(), self.len());
        for (out, &x, &w) in izip!(output, input, &self.weights) {
            *out = x * w;
        }
    }
}

/// Bin center frequencies in Hz, DC to Nyquist inclusive.
#[derive(Debug, Clone)]
pub struct FrequencyAxis {
    freqs: RealVec,
}

impl FrequencyAxis {
    pub fn new(sample_rate: u32, block_len: usize) -> FrequencyAxis {
        let bin_width = sample_rate as f64 / block_len as f64;
        FrequencyAxis {
            freqs: (0..=block_len / 2)
                .map(|k| (k as f64 * bin_width) as f32)
                .collect(),
        }
    }

    pub fn freqs(&self) -> &[f32] {
        &self.freqs
    }

    pub fn nyquist(&self) -> f32 {
        self.freqs[self.freqs.len() - 1]
    }
}

/// Real-input FFT magnitude spectrum of one windowed block.
pub struct SpectrumTransform {
    fft: Arc<dyn RealToComplex<f32>>,

    // Copy of the windowed block. realfft overwrites its input.
    input: RealVec,
    spectrum: FftVec,
    // Working memory for realfft, so `transform` never allocates.
    scratch: FftVec,
}

impl SpectrumTransform {
    pub fn new(size: usize) -> SpectrumTransform {
        assert!(size >= 2);
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        let scratch = fft.make_scratch_vec();
        SpectrumTransform {
            fft,
            input: vec![Zero::zero(); size],
            spectrum: vec![FftSample::zero(); size / 2 + 1],
            scratch,
        }
    }

    pub fn size(&self) -> usize {
        self.input.len()
    }

    pub fn spectrum_size(&self) -> usize {
        self.spectrum.len()
    }

    /// Preconditions:
    /// - windowed.len() == self.size()
    /// - out.len() == self.spectrum_size()
    ///
    /// Postconditions:
    /// - out contains |X_k| of the unnormalized DFT of windowed.
    pub fn transform(&mut self, windowed: &[f32], out: &mut [f32]) -> Result<()> {
        assert_eq!(windowed.len(), self.size());
        assert_eq!(out.len(), self.spectrum_size());

        self.input.copy_from_slice(windowed);
        self.fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .map_err(|e| Error::msg(format!("FFT failed: {}", e)))?;

        for (mag, bin) in izip!(out, &self.spectrum) {
            *mag = bin.norm();
        }
        Ok(())
    }
}

/// Index of the loudest bin, ignoring DC.
pub fn peak_bin(spectrum: &[f32]) -> Option<usize> {
    spectrum
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, m)| m.is_finite())
        .fold(None, |best: Option<(usize, f32)>, (i, &m)| match best {
            Some((_, best_m)) if best_m >= m => best,
            _ => Some((i, m)),
        })
        .map(|(i, _)| i)
}
