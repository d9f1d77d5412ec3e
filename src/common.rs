use crate::fft::WindowType;
use anyhow::{Error, Result};

pub const MIN_BLOCK_LEN: usize = 4;
pub const MAX_BLOCK_LEN: usize = 16384;

/// Flags reported by the audio driver alongside a callback buffer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CallbackStatus {
    /// The driver dropped input samples before this callback.
    pub input_overflow: bool,
}

impl CallbackStatus {
    pub fn merge(&mut self, other: CallbackStatus) {
        self.input_overflow |= other.input_overflow;
    }
}

/// One fixed-length chunk of interleaved audio.
///
/// `samples.len() == frames * channels`. Only channel 0 is consumed downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub status: CallbackStatus,
}

impl Block {
    pub fn new(frames: usize, channels: u16) -> Block {
        assert!(channels >= 1);
        Block {
            samples: vec![0.; frames * channels as usize],
            channels,
            status: CallbackStatus::default(),
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Iterate over the samples of one channel.
    pub fn channel(&self, index: usize) -> impl Iterator<Item = f32> + '_ {
        assert!(index < self.channels as usize);
        self.samples
            .iter()
            .skip(index)
            .step_by(self.channels as usize)
            .copied()
    }
}

/// Startup-time constants shared by capture, transform and rendering.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per block, also the FFT size.
    pub block_len: usize,
    pub window: WindowType,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            sample_rate: 44100,
            channels: 1,
            block_len: 2048,
            window: WindowType::Blackman,
        }
    }
}

/// Blocks are FFT inputs: even, and within [MIN_BLOCK_LEN, MAX_BLOCK_LEN].
pub fn validate_block_len(block_len: usize) -> Result<usize> {
    if !(MIN_BLOCK_LEN..=MAX_BLOCK_LEN).contains(&block_len) {
        return Err(Error::msg(format!(
            "Block size {} must be between {} and {}",
            block_len, MIN_BLOCK_LEN, MAX_BLOCK_LEN
        )));
    }
    if block_len % 2 != 0 {
        return Err(Error::msg(format!("Block size {} must be even", block_len)));
    }
    Ok(block_len)
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        validate_block_len(self.block_len)?;
        if self.channels == 0 {
            return Err(Error::msg("Channel count must be >= 1"));
        }
        if self.sample_rate == 0 {
            return Err(Error::msg("Sample rate must be >= 1"));
        }
        Ok(())
    }

    /// Number of magnitude bins between DC and Nyquist inclusive.
    pub fn spectrum_len(&self) -> usize {
        self.block_len / 2 + 1
    }
}
