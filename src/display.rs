use crate::plot::{Axes, Region, Series};
use crate::surface::{Canvas, CanvasSnapshot, ContextId, Surface};
use anyhow::{Error, Result};
use std::num::NonZeroU32;
use std::sync::Arc;
use winit::window::Window;

fn non_zero(x: u32) -> NonZeroU32 {
    NonZeroU32::new(x).unwrap_or(NonZeroU32::MIN)
}

fn softbuffer_error(what: &str, err: softbuffer::SoftBufferError) -> Error {
    // SoftBufferError is not Sync, so it cannot be wrapped directly.
    Error::msg(format!("{}: {}", what, err))
}

/// A `Canvas` shown in a winit window through softbuffer.
pub struct WindowSurface {
    // Dropped before the context.
    surface: softbuffer::Surface<Arc<Window>, Arc<Window>>,
    _context: softbuffer::Context<Arc<Window>>,
    window: Arc<Window>,
    canvas: Canvas,

    /// Presents since the last full-surface present.
    since_full: u64,
}

impl WindowSurface {
    pub fn new(window: Arc<Window>) -> Result<WindowSurface> {
        let context = softbuffer::Context::new(Arc::clone(&window))
            .map_err(|e| softbuffer_error("Failed to create display context", e))?;
        let surface = softbuffer::Surface::new(&context, Arc::clone(&window))
            .map_err(|e| softbuffer_error("Failed to create window surface", e))?;

        let size = window.inner_size();
        let mut this = WindowSurface {
            surface,
            _context: context,
            window,
            canvas: Canvas::new(size.width, size.height)?,
            since_full: 0,
        };
        this.resize(size.width, size.height)?;
        Ok(this)
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Reallocate both the canvas and the window buffer. The caller must redraw.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.canvas.resize(width, height)?;
        let (width, height) = self.canvas.size();
        self.surface
            .resize(non_zero(width), non_zero(height))
            .map_err(|e| softbuffer_error("Failed to resize window surface", e))
    }

    pub fn draw_background(&mut self, axes: &[Axes]) {
        self.canvas.draw_background(axes);
    }
}

impl Surface for WindowSurface {
    type Snapshot = CanvasSnapshot;

    fn context(&self) -> ContextId {
        self.canvas.context()
    }

    fn size(&self) -> (u32, u32) {
        self.canvas.size()
    }

    fn capture_snapshot(&self) -> CanvasSnapshot {
        self.canvas.capture_snapshot()
    }

    fn restore_snapshot(&mut self, snapshot: &CanvasSnapshot) -> bool {
        self.canvas.restore_snapshot(snapshot)
    }

    fn draw_series(&mut self, series: &Series) {
        self.canvas.draw_series(series);
    }

    fn present(&mut self, region: Region) -> Result<()> {
        let (width, height) = self.canvas.size();
        let full = Region::full(width, height);

        let mut buffer = self
            .surface
            .buffer_mut()
            .map_err(|e| softbuffer_error("Failed to get window buffer", e))?;

        // A buffer of age N holds the frame presented N presents ago (0 = undefined).
        // Outside `region` it is only valid if that frame came after the last full present.
        let age = buffer.age() as u64;
        let region = if region == full || age == 0 || age > self.since_full + 1 {
            full
        } else {
            region
        };
        self.canvas.copy_region(region, &mut buffer);

        self.window.pre_present_notify();
        let damage = softbuffer::Rect {
            x: region.x,
            y: region.y,
            width: non_zero(region.width),
            height: non_zero(region.height),
        };
        buffer
            .present_with_damage(&[damage])
            .map_err(|e| softbuffer_error("Failed to present window buffer", e))?;

        if region == full {
            self.since_full = 0;
        } else {
            self.since_full += 1;
        }
        Ok(())
    }
}
