//! Audio input: opens a cpal stream and feeds fixed-size blocks into the capture bridge.
//!
//! Nothing in the data callback blocks, allocates or logs.

use crate::bridge::BridgeWriter;
use crate::common::{Block, CallbackStatus, PipelineConfig};
use anyhow::{bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, SupportedStreamConfig, SupportedStreamConfigRange};
use log::{debug, info, warn};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

/// Accepts data from the audio thread and publishes full blocks.
///
/// cpal::BufferSize::Fixed is not supported on every backend (e.g. WASAPI),
/// so callbacks deliver arbitrary amounts of audio and we reassemble them here.
pub struct BlockAssembler {
    writer: BridgeWriter<Block>,
    block_len: usize,
    channels: usize,

    /// Frames written into the writer's slot so far.
    filled: usize,
    /// Flags seen by any callback contributing to the current block.
    status: CallbackStatus,
}

impl BlockAssembler {
    /// The writer's blocks must hold `block_len` frames of `channels` channels.
    pub fn new(writer: BridgeWriter<Block>, block_len: usize, channels: u16) -> BlockAssembler {
        assert!(block_len >= 1);
        assert!(channels >= 1);
        BlockAssembler {
            writer,
            block_len,
            channels: channels as usize,
            filled: 0,
            status: CallbackStatus::default(),
        }
    }

    /// input.len() must be a multiple of channels.
    /// Samples are assumed to be interleaved.
    pub fn push<T>(&mut self, mut input: &[T], status: CallbackStatus)
    where
        T: cpal::Sample,
        f32: cpal::FromSample<T>,
    {
        debug_assert_eq!(input.len() % self.channels, 0);
        self.status.merge(status);

        while input.len() >= self.channels {
            let room = (self.block_len - self.filled) * self.channels;
            let n = room.min(input.len() - input.len() % self.channels);
            let (head, tail) = input.split_at(n);
            input = tail;

            let start = self.filled * self.channels;
            let slot = self.writer.get_mut();
            for (out, &sample) in slot.samples[start..start + n].iter_mut().zip(head) {
                *out = cpal::Sample::from_sample(sample);
            }
            self.filled += n / self.channels;

            if self.filled == self.block_len {
                slot.status = self.status;
                self.writer.publish();
                self.filled = 0;
                self.status = CallbackStatus::default();
            }
        }
    }
}

const OVERFLOW_SLACK: Duration = Duration::from_millis(2);

/// Detects dropped input by comparing callback capture timestamps
/// against the amount of audio each callback delivered.
pub struct OverflowDetector {
    sample_rate: u32,
    prev_frames: Option<usize>,
}

impl OverflowDetector {
    pub fn new(sample_rate: u32) -> OverflowDetector {
        OverflowDetector {
            sample_rate,
            prev_frames: None,
        }
    }

    /// `gap`: capture time between the previous callback's first frame and this one's.
    pub fn observe(&mut self, gap: Option<Duration>, frames: usize) -> CallbackStatus {
        let prev_frames = self.prev_frames.replace(frames);
        let input_overflow = match (prev_frames, gap) {
            (Some(prev_frames), Some(gap)) => {
                let expected = Duration::from_secs_f64(prev_frames as f64 / self.sample_rate as f64);
                gap > expected.mul_f64(1.5) + OVERFLOW_SLACK
            }
            _ => false,
        };
        CallbackStatus { input_overflow }
    }
}

fn format_rank(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::F32 => 3,
        SampleFormat::I16 => 2,
        SampleFormat::U16 => 1,
        _ => 0,
    }
}

/// A capture device with a negotiated stream configuration, not yet running.
pub struct InputDevice {
    device: cpal::Device,
    config: SupportedStreamConfig,
    name: String,
}

impl InputDevice {
    /// Pick the default input device (or the default output device, for loopback capture)
    /// and a stream configuration close to `cfg`.
    pub fn open_default(cfg: &PipelineConfig, loopback: bool) -> Result<InputDevice> {
        let host = cpal::default_host();
        debug!("Audio host: {:?}", host.id());

        let device = if loopback {
            host.default_output_device()
        } else {
            host.default_input_device()
        }
        .context("No audio device available")?;

        let name = device.name().unwrap_or_else(|_| "<unnamed device>".to_owned());
        info!("Capturing from {}", name);

        let ranges: Vec<SupportedStreamConfigRange> = if loopback {
            device
                .supported_output_configs()
                .context("Failed to query device configs")?
                .collect()
        } else {
            device
                .supported_input_configs()
                .context("Failed to query device configs")?
                .collect()
        };
        for range in &ranges {
            debug!("Supported config: {:?}", range);
        }

        let wanted = SampleRate(cfg.sample_rate);
        let matching = ranges
            .iter()
            .filter(|r| r.channels() == cfg.channels)
            .filter(|r| r.min_sample_rate() <= wanted && wanted <= r.max_sample_rate())
            .filter(|r| format_rank(r.sample_format()) > 0)
            .max_by_key(|r| format_rank(r.sample_format()))
            .cloned();

        let config = match matching {
            Some(range) => range.with_sample_rate(wanted),
            None => {
                let fallback = if loopback {
                    device.default_output_config()
                } else {
                    device.default_input_config()
                }
                .context("Failed to query default device config")?;
                warn!(
                    "Device does not support {} channel(s) at {} Hz, using {} channel(s) at {} Hz",
                    cfg.channels,
                    cfg.sample_rate,
                    fallback.channels(),
                    fallback.sample_rate().0
                );
                fallback
            }
        };
        info!("Picked config: {:?}", config);

        Ok(InputDevice {
            device,
            config,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels()
    }

    /// Start streaming. Each completed block of `block_len` frames is published to `writer`,
    /// whose blocks must have `self.channels()` channels.
    pub fn start(self, writer: BridgeWriter<Block>, block_len: usize) -> Result<AudioInput> {
        let assembler = BlockAssembler::new(writer, block_len, self.channels());
        let (err_tx, errors) = channel();
        let err_fn = move |err: cpal::StreamError| {
            // The receiver is gone only after shutdown.
            let _ = err_tx.send(err);
        };

        let config: cpal::StreamConfig = self.config.config();
        let stream = match self.config.sample_format() {
            SampleFormat::F32 => build_stream::<f32, _>(&self.device, &config, assembler, err_fn)?,
            SampleFormat::I16 => build_stream::<i16, _>(&self.device, &config, assembler, err_fn)?,
            SampleFormat::U16 => build_stream::<u16, _>(&self.device, &config, assembler, err_fn)?,
            other => bail!("Unsupported sample format {:?}", other),
        };
        stream.play().context("Failed to start audio stream")?;
        info!("Audio stream started");

        Ok(AudioInput {
            stream: Some(stream),
            errors,
            name: self.name,
        })
    }
}

fn build_stream<T, E>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut assembler: BlockAssembler,
    err_fn: E,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
    E: FnMut(cpal::StreamError) + Send + 'static,
{
    let channels = config.channels as usize;
    let mut detector = OverflowDetector::new(config.sample_rate.0);
    let mut last_capture: Option<cpal::StreamInstant> = None;

    device
        .build_input_stream(
            config,
            move |data: &[T], info: &cpal::InputCallbackInfo| {
                let capture = info.timestamp().capture;
                let gap = last_capture.and_then(|prev| capture.duration_since(&prev));
                last_capture = Some(capture);

                let status = detector.observe(gap, data.len() / channels);
                assembler.push(data, status);
            },
            err_fn,
            None,
        )
        .context("Failed to build input stream")
}

/// A running capture stream. The callback is active until `close()` or drop.
pub struct AudioInput {
    stream: Option<cpal::Stream>,
    errors: Receiver<cpal::StreamError>,
    name: String,
}

impl AudioInput {
    /// The first driver error reported since the last call, if any.
    /// Driver errors are fatal to the stream.
    pub fn poll_error(&self) -> Option<cpal::StreamError> {
        self.errors.try_recv().ok()
    }

    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                debug!("Failed to pause stream before closing: {}", err);
            }
            drop(stream);
            info!("Closed audio stream from {}", self.name);
        }
    }
}

impl Drop for AudioInput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::block_channel;

    #[test]
    fn assembles_blocks_across_callbacks() {
        let (writer, mut reader) = block_channel(4, 1);
        let mut assembler = BlockAssembler::new(writer, 4, 1);

        assembler.push(&[1f32, 2., 3.], CallbackStatus::default());
        assert_eq!(reader.take_latest(), None);

        assembler.push(&[4f32, 5., 6., 7., 8., 9.], CallbackStatus::default());
        // Two blocks completed; only the latest is visible.
        assert_eq!(reader.take_latest().unwrap().samples, vec![5., 6., 7., 8.]);

        assembler.push(&[10f32, 11., 12.], CallbackStatus::default());
        assert_eq!(reader.take_latest().unwrap().samples, vec![9., 10., 11., 12.]);
    }

    #[test]
    fn keeps_frames_interleaved() {
        let (writer, mut reader) = block_channel(2, 2);
        let mut assembler = BlockAssembler::new(writer, 2, 2);

        assembler.push(&[0.1f32, -0.1], CallbackStatus::default());
        assembler.push(&[0.2f32, -0.2, 0.3, -0.3], CallbackStatus::default());

        let block = reader.take_latest().unwrap();
        assert_eq!(block.samples, vec![0.1, -0.1, 0.2, -0.2]);
        assert_eq!(block.channel(0).collect::<Vec<_>>(), vec![0.1, 0.2]);
    }

    #[test]
    fn converts_integer_samples() {
        let (writer, mut reader) = block_channel(3, 1);
        let mut assembler = BlockAssembler::new(writer, 3, 1);
        assembler.push(&[0i16, i16::MIN, 16384], CallbackStatus::default());

        let block = reader.take_latest().unwrap();
        assert_eq!(block.samples, vec![0., -1., 0.5]);
    }

    #[test]
    fn overflow_flag_marks_the_block_it_touched() {
        let (writer, mut reader) = block_channel(4, 1);
        let mut assembler = BlockAssembler::new(writer, 4, 1);
        let overflow = CallbackStatus {
            input_overflow: true,
        };

        assembler.push(&[0f32; 2], CallbackStatus::default());
        assembler.push(&[0f32; 2], overflow);
        assert!(reader.take_latest().unwrap().status.input_overflow);

        assembler.push(&[0f32; 4], CallbackStatus::default());
        assert!(!reader.take_latest().unwrap().status.input_overflow);
    }

    #[test]
    fn detects_timestamp_gaps() {
        let mut detector = OverflowDetector::new(48000);
        let period = Duration::from_millis(10);

        assert!(!detector.observe(None, 480).input_overflow);
        assert!(!detector.observe(Some(period), 480).input_overflow);
        assert!(!detector.observe(Some(period + Duration::from_millis(1)), 480).input_overflow);
        assert!(detector.observe(Some(period * 3), 480).input_overflow);
    }
}
