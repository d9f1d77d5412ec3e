use crate::bridge::BridgeReader;
use crate::common::{Block, PipelineConfig};
use crate::fft::{peak_bin, FrequencyAxis, RealVec, SpectrumTransform, WindowTable};
use crate::plot::{spectrum_axes, waveform_axes, Axes, LineStyle, Series};
use crate::renderer::{DrawEvent, RenderStats, Renderer, SeriesId};
use crate::surface::{ContextId, Surface};
use anyhow::Result;
use log::{debug, trace, warn};
use std::time::{Duration, Instant};

const WAVEFORM_STYLE: LineStyle = LineStyle {
    color: [90, 200, 250],
    width: 1.,
};
const SPECTRUM_STYLE: LineStyle = LineStyle {
    color: [250, 170, 60],
    width: 1.,
};

/// Outcome of one render tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Nothing has been captured yet. Nothing was drawn.
    Empty,
    /// The latest block was drawn. `fresh` if it arrived since the previous tick.
    Drawn { fresh: bool },
    /// The background is gone. Nothing is drawn until the host redraws static content.
    AwaitingRedraw,
}

/// Pulls the latest block, windows it, transforms it, and draws both series.
pub struct FramePipeline<S: Surface> {
    reader: BridgeReader<Block>,

    // Derived/cached data. Do not mutate.
    window: WindowTable,
    axis: FrequencyAxis,

    transform: SpectrumTransform,
    renderer: Renderer<S>,
    waveform_id: SeriesId,
    spectrum_id: SeriesId,

    // Per-tick scratch, reused to avoid allocation.
    samples: RealVec,
    windowed: RealVec,
    spectrum: RealVec,
}

impl<S: Surface> FramePipeline<S> {
    /// `cfg.sample_rate` must be the rate the stream actually runs at.
    pub fn new(
        cfg: &PipelineConfig,
        reader: BridgeReader<Block>,
        context: ContextId,
    ) -> Result<FramePipeline<S>> {
        cfg.validate()?;
        let len = cfg.block_len;

        let window = WindowTable::build(cfg.window, len);
        let axis = FrequencyAxis::new(cfg.sample_rate, len);

        let mut renderer = Renderer::new(context);
        let waveform_id = renderer.add_series(Series::new(
            "waveform",
            (0..len).map(|i| i as f32).collect(),
            waveform_axes(len),
            WAVEFORM_STYLE,
        ))?;
        let spectrum_id = renderer.add_series(Series::new(
            "spectrum",
            axis.freqs().to_vec(),
            spectrum_axes(axis.nyquist()),
            SPECTRUM_STYLE,
        ))?;

        Ok(FramePipeline {
            reader,
            window,
            axis,
            transform: SpectrumTransform::new(len),
            renderer,
            waveform_id,
            spectrum_id,
            samples: vec![0.; len],
            windowed: vec![0.; len],
            spectrum: vec![0.; cfg.spectrum_len()],
        })
    }

    /// Plot areas the host must draw as static content.
    pub fn layout(&self) -> Vec<Axes> {
        [self.waveform_id, self.spectrum_id]
            .iter()
            .filter_map(|&id| self.renderer.series(id))
            .map(|series| series.axes)
            .collect()
    }

    pub fn frequency_axis(&self) -> &FrequencyAxis {
        &self.axis
    }

    /// Windowed channel-0 samples from the latest tick.
    pub fn waveform(&self) -> &[f32] {
        &self.windowed
    }

    /// Magnitude spectrum from the latest tick.
    pub fn spectrum(&self) -> &[f32] {
        &self.spectrum
    }

    pub fn render_stats(&self) -> RenderStats {
        self.renderer.stats()
    }

    pub fn needs_redraw(&self) -> bool {
        self.renderer.needs_redraw()
    }

    /// Forward a structural redraw from the host.
    pub fn on_draw(&mut self, surface: &mut S, event: DrawEvent) -> Result<()> {
        self.renderer.on_draw(surface, event)
    }

    pub fn tick(&mut self, surface: &mut S) -> Result<Tick> {
        if self.renderer.needs_redraw() {
            return Ok(Tick::AwaitingRedraw);
        }

        let fresh = self.reader.fetch();
        let block = match self.reader.current() {
            Some(block) => block,
            None => return Ok(Tick::Empty),
        };

        debug_assert_eq!(block.frames(), self.samples.len());
        if fresh && block.status.input_overflow {
            warn!("Input overflow: the driver dropped samples before this block");
        }

        // Driver glitches must not reach the FFT.
        let mut zeroed = 0usize;
        for (out, sample) in self.samples.iter_mut().zip(block.channel(0)) {
            *out = if sample.is_finite() {
                sample
            } else {
                zeroed += 1;
                0.
            };
        }
        if fresh && zeroed > 0 {
            debug!("Zeroed {} non-finite samples", zeroed);
        }

        self.window.apply(&self.samples, &mut self.windowed);
        self.transform.transform(&self.windowed, &mut self.spectrum)?;

        self.renderer.set_y(self.waveform_id, &self.windowed)?;
        self.renderer.set_y(self.spectrum_id, &self.spectrum)?;
        self.renderer.update(surface)?;
        if self.renderer.needs_redraw() {
            return Ok(Tick::AwaitingRedraw);
        }

        if fresh {
            if let Some(peak) = peak_bin(&self.spectrum) {
                trace!("Peak near {:.0} Hz", self.axis.freqs()[peak]);
            }
        }
        Ok(Tick::Drawn { fresh })
    }
}

/// Schedules render ticks at a target rate, and measures the achieved rate.
pub struct FramePacer {
    period: Duration,
    next: Instant,

    frames: u32,
    window_start: Instant,
}

impl FramePacer {
    pub fn new(rate: f64, now: Instant) -> FramePacer {
        assert!(rate > 0.);
        FramePacer {
            period: Duration::from_secs_f64(1. / rate),
            next: now,
            frames: 0,
            window_start: now,
        }
    }

    pub fn next_deadline(&self) -> Instant {
        self.next
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next
    }

    /// Record a tick at `now` and schedule the next one.
    /// If we fell behind, skip missed ticks rather than bursting to catch up.
    ///
    /// Returns the measured tick rate about once per second.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.next += self.period;
        if self.next <= now {
            self.next = now + self.period;
        }

        self.frames += 1;
        let elapsed = now.duration_since(self.window_start);
        if elapsed >= Duration::from_secs(1) {
            let rate = self.frames as f64 / elapsed.as_secs_f64();
            self.frames = 0;
            self.window_start = now;
            Some(rate)
        } else {
            None
        }
    }
}
