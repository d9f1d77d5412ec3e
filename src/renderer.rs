//! Partial-redraw manager.
//!
//! Static content is drawn once by the host and saved as a background snapshot.
//! Each frame restores the snapshot, draws the animated series on top,
//! and presents only the plot areas, instead of redrawing the whole surface.
//! Captures present the whole surface.
//!
//! # States
//!
//! - NoBackground (initial): no snapshot, nothing drawn yet. A structural draw event,
//!   or `update()` as a fallback, captures one.
//! - BackgroundCaptured: `update()` restores, draws, presents.
//!   Another structural draw event (resize, full redraw) captures a new snapshot.
//! - AwaitingRedraw: the snapshot was dropped (`invalidate()`, or it no longer
//!   fits the surface) after series were drawn. The surface may hold series pixels,
//!   so `update()` skips frames until the host redraws static content and calls `on_draw()`.

use crate::plot::{Region, Series};
use crate::surface::{ContextId, Surface};
use anyhow::{Context, Result};
use log::{debug, warn};
use thiserror::Error;

/// Renderer misuse. These are programming errors, not runtime conditions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RendererError {
    #[error("series \"{0}\" added after the background was captured")]
    SeriesAfterCapture(&'static str),

    #[error("surface belongs to render context {found:?}, renderer is bound to {bound:?}")]
    ForeignSurface { bound: ContextId, found: ContextId },

    #[error("no series with id {0}")]
    UnknownSeries(usize),

    #[error("series \"{name}\" has {expected} points, got {got}")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SeriesId(usize);

/// Why the host redrew its static content.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DrawCause {
    Shown,
    Resized,
    Full,
}

/// Emitted by the host after it redraws static content from scratch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DrawEvent {
    pub context: ContextId,
    pub cause: DrawCause,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RendererState {
    NoBackground,
    BackgroundCaptured,
    AwaitingRedraw,
}

/// Counts of presented frames, by kind.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RenderStats {
    /// Frames presented right after capturing a background.
    pub captures: u64,
    /// Frames presented over a restored background.
    pub updates: u64,
    /// `update()` calls dropped while waiting for a host redraw.
    pub skipped: u64,
}

pub struct Renderer<S: Surface> {
    context: ContextId,
    series: Vec<Series>,
    background: Option<S::Snapshot>,
    /// Series were drawn since the last capture, and the snapshot is gone.
    stale: bool,
    stats: RenderStats,
}

impl<S: Surface> Renderer<S> {
    /// Bind to one render context. Surfaces from any other context are rejected.
    pub fn new(context: ContextId) -> Renderer<S> {
        Renderer {
            context,
            series: vec![],
            background: None,
            stale: false,
            stats: RenderStats::default(),
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn state(&self) -> RendererState {
        match (&self.background, self.stale) {
            (Some(_), _) => RendererState::BackgroundCaptured,
            (None, true) => RendererState::AwaitingRedraw,
            (None, false) => RendererState::NoBackground,
        }
    }

    /// Whether the host must redraw static content and call `on_draw()`
    /// before frames are presented again.
    pub fn needs_redraw(&self) -> bool {
        self.state() == RendererState::AwaitingRedraw
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// Register an animated series. Only valid before the first capture,
    /// since the snapshot must not contain any animated content.
    pub fn add_series(&mut self, series: Series) -> Result<SeriesId, RendererError> {
        if self.stats.captures > 0 {
            return Err(RendererError::SeriesAfterCapture(series.name));
        }
        self.series.push(series);
        Ok(SeriesId(self.series.len() - 1))
    }

    pub fn series(&self, id: SeriesId) -> Option<&Series> {
        self.series.get(id.0)
    }

    /// Replace a series' Y values in place. The length must not change.
    pub fn set_y(&mut self, id: SeriesId, y: &[f32]) -> Result<(), RendererError> {
        let series = self
            .series
            .get_mut(id.0)
            .ok_or(RendererError::UnknownSeries(id.0))?;
        if series.y.len() != y.len() {
            return Err(RendererError::LengthMismatch {
                name: series.name,
                expected: series.y.len(),
                got: y.len(),
            });
        }
        series.y.copy_from_slice(y);
        Ok(())
    }

    /// Drop the snapshot. Frames are skipped until the next draw event captures a new one.
    pub fn invalidate(&mut self) {
        if self.stats.captures > 0 {
            self.stale = true;
        }
        self.background = None;
    }

    fn check_context(&self, found: ContextId) -> Result<(), RendererError> {
        if found != self.context {
            return Err(RendererError::ForeignSurface {
                bound: self.context,
                found,
            });
        }
        Ok(())
    }

    /// Call after the host has drawn static content from scratch
    /// (window shown, resized, or otherwise fully redrawn).
    pub fn on_draw(&mut self, surface: &mut S, event: DrawEvent) -> Result<()> {
        self.check_context(event.context)?;
        self.check_context(surface.context())?;
        debug!("Capturing background ({:?})", event.cause);
        self.capture(surface)
    }

    /// Present the current series values over the saved background.
    pub fn update(&mut self, surface: &mut S) -> Result<()> {
        self.check_context(surface.context())?;

        let restored = match &self.background {
            Some(background) => surface.restore_snapshot(background),
            None if self.stale => {
                self.stats.skipped += 1;
                return Ok(());
            }
            // Missed the first draw event. Nothing animated has been drawn,
            // so whatever is on the surface is static content.
            None => return self.capture(surface),
        };

        if !restored {
            warn!("Background snapshot no longer matches the surface, waiting for a redraw");
            self.invalidate();
            self.stats.skipped += 1;
            return Ok(());
        }

        self.draw_animated(surface);
        let region = self.dirty_region(surface.size());
        self.present(surface, region)?;
        self.stats.updates += 1;
        Ok(())
    }

    fn capture(&mut self, surface: &mut S) -> Result<()> {
        self.background = Some(surface.capture_snapshot());
        self.stale = false;
        self.draw_animated(surface);
        // Static content may have changed anywhere.
        let (width, height) = surface.size();
        self.present(surface, Region::full(width, height))?;
        self.stats.captures += 1;
        Ok(())
    }

    fn draw_animated(&self, surface: &mut S) {
        for series in &self.series {
            surface.draw_series(series);
        }
    }

    fn present(&self, surface: &mut S, region: Region) -> Result<()> {
        if !region.is_empty() {
            surface
                .present(region)
                .context("Failed to present frame")?;
        }
        surface.flush_events();
        Ok(())
    }

    /// Plot areas of all series, padded for line width and antialiasing.
    fn dirty_region(&self, (width, height): (u32, u32)) -> Region {
        let mut region = Region::full(0, 0);
        for series in &self.series {
            let pad = series.style.width.ceil() as u32 + 1;
            let rect = series.axes.pixel_rect(width, height);
            let padded = Region {
                x: rect.x.saturating_sub(pad),
                y: rect.y.saturating_sub(pad),
                width: rect.width + 2 * pad,
                height: rect.height + 2 * pad,
            };
            region = region.union(&padded);
        }
        region.clamp_to(width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::{Axes, LineStyle, Scale};
    use crate::surface::Canvas;

    fn axes(top: f32) -> Axes {
        Axes {
            area: [0.1, top, 0.8, 0.35],
            x: Scale::Linear { min: 0., max: 7. },
            y: Scale::Linear { min: -1., max: 1. },
        }
    }

    fn series(name: &'static str, top: f32) -> Series {
        Series::new(
            name,
            (0..8).map(|i| i as f32).collect(),
            axes(top),
            LineStyle {
                color: [200, 220, 255],
                width: 1.5,
            },
        )
    }

    fn setup() -> (Canvas, Renderer<Canvas>, SeriesId, SeriesId) {
        let mut canvas = Canvas::new(64, 48).unwrap();
        let mut renderer = Renderer::new(canvas.context());
        let a = renderer.add_series(series("a", 0.1)).unwrap();
        let b = renderer.add_series(series("b", 0.55)).unwrap();
        canvas.draw_background(&[axes(0.1), axes(0.55)]);
        let event = DrawEvent {
            context: canvas.context(),
            cause: DrawCause::Shown,
        };
        renderer.on_draw(&mut canvas, event).unwrap();
        (canvas, renderer, a, b)
    }

    const ZIGZAG: [f32; 8] = [-1., 1., -1., 1., -1., 1., -1., 1.];
    const RAMP: [f32; 8] = [-0.8, -0.6, -0.4, -0.2, 0., 0.2, 0.4, 0.6];

    #[test]
    fn draw_event_captures_background() {
        let (canvas, renderer, _, _) = setup();
        assert_eq!(renderer.state(), RendererState::BackgroundCaptured);
        assert_eq!(
            renderer.stats(),
            RenderStats {
                captures: 1,
                updates: 0,
                skipped: 0,
            }
        );
        assert_eq!(canvas.presents(), 1);
    }

    #[test]
    fn identical_updates_are_pixel_identical() {
        let (mut canvas, mut renderer, a, b) = setup();
        renderer.set_y(a, &ZIGZAG).unwrap();
        renderer.set_y(b, &RAMP).unwrap();

        renderer.update(&mut canvas).unwrap();
        let first = canvas.front().to_vec();
        renderer.update(&mut canvas).unwrap();
        assert_eq!(canvas.front(), &first[..]);
        assert_eq!(renderer.stats().updates, 2);
    }

    #[test]
    fn update_erases_previous_frame() {
        let (mut canvas, mut renderer, a, _) = setup();
        renderer.update(&mut canvas).unwrap();
        let flat = canvas.front().to_vec();

        renderer.set_y(a, &ZIGZAG).unwrap();
        renderer.update(&mut canvas).unwrap();
        assert_ne!(canvas.front(), &flat[..]);

        renderer.set_y(a, &[0.; 8]).unwrap();
        renderer.update(&mut canvas).unwrap();
        assert_eq!(canvas.front(), &flat[..]);
    }

    #[test]
    fn presents_only_plot_areas() {
        let (mut canvas, mut renderer, _, _) = setup();
        renderer.update(&mut canvas).unwrap();
        let region = canvas.last_present().unwrap();
        let (width, height) = canvas.size();
        assert!(region.x > 0 && region.y > 0);
        assert!(region.x + region.width < width);
        assert!(region.y + region.height < height);
    }

    #[test]
    fn add_series_after_capture_fails() {
        let (_, mut renderer, _, _) = setup();
        assert_eq!(
            renderer.add_series(series("late", 0.)),
            Err(RendererError::SeriesAfterCapture("late"))
        );
    }

    #[test]
    fn foreign_surface_is_rejected() {
        let (_, mut renderer, _, _) = setup();
        let mut other = Canvas::new(64, 48).unwrap();
        let err = renderer.update(&mut other).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RendererError>(),
            Some(RendererError::ForeignSurface { .. })
        ));

        let event = DrawEvent {
            context: other.context(),
            cause: DrawCause::Full,
        };
        assert!(renderer.on_draw(&mut other, event).is_err());
    }

    #[test]
    fn update_without_draw_event_captures() {
        let mut canvas = Canvas::new(32, 32).unwrap();
        let mut renderer = Renderer::new(canvas.context());
        renderer.add_series(series("a", 0.1)).unwrap();
        assert_eq!(renderer.state(), RendererState::NoBackground);

        renderer.update(&mut canvas).unwrap();
        assert_eq!(renderer.state(), RendererState::BackgroundCaptured);
        assert_eq!(renderer.stats().captures, 1);
        assert_eq!(renderer.stats().updates, 0);
    }

    /// Front buffer of a freshly drawn surface showing `y` in series "a".
    fn clean_frame(width: u32, height: u32, y: &[f32]) -> Vec<u32> {
        let mut canvas = Canvas::new(width, height).unwrap();
        let mut renderer = Renderer::new(canvas.context());
        let a = renderer.add_series(series("a", 0.1)).unwrap();
        renderer.add_series(series("b", 0.55)).unwrap();
        canvas.draw_background(&[axes(0.1), axes(0.55)]);
        let event = DrawEvent {
            context: canvas.context(),
            cause: DrawCause::Shown,
        };
        renderer.on_draw(&mut canvas, event).unwrap();
        renderer.set_y(a, y).unwrap();
        renderer.update(&mut canvas).unwrap();
        canvas.front().to_vec()
    }

    #[test]
    fn invalidate_never_bakes_series_into_background() {
        let (mut canvas, mut renderer, a, _) = setup();
        renderer.set_y(a, &ZIGZAG).unwrap();
        renderer.update(&mut canvas).unwrap();

        renderer.invalidate();
        assert_eq!(renderer.state(), RendererState::AwaitingRedraw);
        renderer.set_y(a, &[0.; 8]).unwrap();
        let presents = canvas.presents();
        renderer.update(&mut canvas).unwrap();
        renderer.update(&mut canvas).unwrap();
        assert_eq!(canvas.presents(), presents);
        assert_eq!(renderer.stats().skipped, 2);
        assert_eq!(renderer.stats().captures, 1);

        canvas.draw_background(&[axes(0.1), axes(0.55)]);
        let event = DrawEvent {
            context: canvas.context(),
            cause: DrawCause::Full,
        };
        renderer.on_draw(&mut canvas, event).unwrap();
        renderer.update(&mut canvas).unwrap();
        renderer.update(&mut canvas).unwrap();
        assert_eq!(canvas.front(), &clean_frame(64, 48, &[0.; 8])[..]);
    }

    #[test]
    fn invalidate_before_first_draw_still_falls_back() {
        let mut canvas = Canvas::new(32, 32).unwrap();
        let mut renderer = Renderer::new(canvas.context());
        renderer.add_series(series("a", 0.1)).unwrap();
        renderer.invalidate();
        assert_eq!(renderer.state(), RendererState::NoBackground);

        renderer.update(&mut canvas).unwrap();
        assert_eq!(renderer.state(), RendererState::BackgroundCaptured);
    }

    #[test]
    fn resize_waits_for_redraw() {
        let (mut canvas, mut renderer, a, _) = setup();
        renderer.set_y(a, &RAMP).unwrap();
        renderer.update(&mut canvas).unwrap();

        // Missed the draw event: the snapshot no longer fits and the surface was cleared.
        canvas.resize(80, 60).unwrap();
        let presents = canvas.presents();
        renderer.update(&mut canvas).unwrap();
        assert_eq!(renderer.state(), RendererState::AwaitingRedraw);
        assert_eq!(canvas.presents(), presents);
        assert_eq!(renderer.stats().captures, 1);

        canvas.draw_background(&[axes(0.1), axes(0.55)]);
        let event = DrawEvent {
            context: canvas.context(),
            cause: DrawCause::Resized,
        };
        renderer.on_draw(&mut canvas, event).unwrap();
        assert_eq!(renderer.stats().captures, 2);
        renderer.update(&mut canvas).unwrap();
        assert_eq!(renderer.stats().updates, 2);
        assert_eq!(canvas.front(), &clean_frame(80, 60, &RAMP)[..]);
    }

    #[test]
    fn set_y_checks_length_and_id() {
        let (_, mut renderer, a, _) = setup();
        assert_eq!(
            renderer.set_y(a, &[0.; 3]),
            Err(RendererError::LengthMismatch {
                name: "a",
                expected: 8,
                got: 3
            })
        );
        assert_eq!(
            renderer.set_y(SeriesId(9), &[0.; 8]),
            Err(RendererError::UnknownSeries(9))
        );
    }
}
