use crate::plot::{Axes, Region, Series};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use tiny_skia::{Color, Paint, PathBuilder, Pixmap, PremultipliedColorU8, Rect, Stroke, Transform};

/// Identifies one logical render context (one window, or one headless canvas).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub fn new() -> ContextId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A display surface supporting cached-background partial redraw.
pub trait Surface {
    /// Opaque saved image of the surface.
    type Snapshot;

    fn context(&self) -> ContextId;

    fn size(&self) -> (u32, u32);

    fn capture_snapshot(&self) -> Self::Snapshot;

    /// Returns false (and leaves the surface untouched) if the snapshot
    /// was taken at a different size.
    fn restore_snapshot(&mut self, snapshot: &Self::Snapshot) -> bool;

    fn draw_series(&mut self, series: &Series);

    /// Push `region` of the drawn image to the display.
    fn present(&mut self, region: Region) -> Result<()>;

    /// Let the host process anything queued by `present()`.
    ///
    /// The default does nothing. A winit window handles its pending events
    /// once the handler returns control to the event loop, and a headless
    /// `Canvas` has none.
    fn flush_events(&mut self) {}
}

pub const BACKGROUND: [u8; 3] = [16, 16, 22];
pub const PLOT_FILL: [u8; 3] = [26, 26, 36];
pub const PLOT_FRAME: [u8; 3] = [70, 70, 90];

/// Saved pixels of a `Canvas`.
#[derive(Clone)]
pub struct CanvasSnapshot {
    pixmap: Pixmap,
}

/// CPU raster surface. `present()` copies into a front buffer of 0RGB pixels,
/// which a window host forwards to the screen.
pub struct Canvas {
    context: ContextId,
    pixmap: Pixmap,
    front: Vec<u32>,
    presents: u64,
    last_present: Option<Region>,
}

fn new_pixmap(width: u32, height: u32) -> Result<Pixmap> {
    Pixmap::new(width.max(1), height.max(1))
        .with_context(|| format!("Failed to create {}x{} pixmap", width, height))
}

fn pack_rgb(c: PremultipliedColorU8) -> u32 {
    (c.red() as u32) << 16 | (c.green() as u32) << 8 | c.blue() as u32
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Result<Canvas> {
        let pixmap = new_pixmap(width, height)?;
        let front = vec![0; pixmap.data().len() / 4];
        Ok(Canvas {
            context: ContextId::new(),
            pixmap,
            front,
            presents: 0,
            last_present: None,
        })
    }

    /// Reallocate at a new size. Contents are cleared; the caller must redraw.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.pixmap = new_pixmap(width, height)?;
        self.front = vec![0; self.pixmap.data().len() / 4];
        self.last_present = None;
        Ok(())
    }

    /// Draw static content: backdrop plus an empty frame for each plot area.
    pub fn draw_background(&mut self, axes: &[Axes]) {
        let [r, g, b] = BACKGROUND;
        self.pixmap.fill(Color::from_rgba8(r, g, b, 255));

        let (width, height) = self.size();
        for ax in axes {
            let region = ax.pixel_rect(width, height);
            let rect = match Rect::from_xywh(
                region.x as f32,
                region.y as f32,
                region.width as f32,
                region.height as f32,
            ) {
                Some(rect) => rect,
                None => continue,
            };

            let mut paint = Paint::default();
            let [r, g, b] = PLOT_FILL;
            paint.set_color_rgba8(r, g, b, 255);
            self.pixmap.fill_rect(rect, &paint, Transform::identity(), None);

            let [r, g, b] = PLOT_FRAME;
            paint.set_color_rgba8(r, g, b, 255);
            let frame = PathBuilder::from_rect(rect);
            self.pixmap
                .stroke_path(&frame, &paint, &Stroke::default(), Transform::identity(), None);
        }
    }

    /// Copy `region` of the drawn image into a 0RGB buffer of the same width.
    pub fn copy_region(&self, region: Region, dst: &mut [u32]) {
        let width = self.pixmap.width();
        let region = region.clamp_to(width, self.pixmap.height());
        let pixels = self.pixmap.pixels();
        for row in region.y..region.y + region.height {
            let start = (row * width + region.x) as usize;
            let end = start + region.width as usize;
            for (out, &px) in dst[start..end].iter_mut().zip(&pixels[start..end]) {
                *out = pack_rgb(px);
            }
        }
    }

    /// Pixels as of the latest `present()`.
    pub fn front(&self) -> &[u32] {
        &self.front
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }

    pub fn last_present(&self) -> Option<Region> {
        self.last_present
    }
}

impl Surface for Canvas {
    type Snapshot = CanvasSnapshot;

    fn context(&self) -> ContextId {
        self.context
    }

    fn size(&self) -> (u32, u32) {
        (self.pixmap.width(), self.pixmap.height())
    }

    fn capture_snapshot(&self) -> CanvasSnapshot {
        CanvasSnapshot {
            pixmap: self.pixmap.clone(),
        }
    }

    fn restore_snapshot(&mut self, snapshot: &CanvasSnapshot) -> bool {
        if snapshot.pixmap.width() != self.pixmap.width()
            || snapshot.pixmap.height() != self.pixmap.height()
        {
            return false;
        }
        self.pixmap.data_mut().copy_from_slice(snapshot.pixmap.data());
        true
    }

    fn draw_series(&mut self, series: &Series) {
        let (width, height) = self.size();

        // Unplottable points (non-finite, or non-positive on a log axis) break the line.
        let mut pb = PathBuilder::new();
        let mut pen_down = false;
        for (&x, &y) in series.x.iter().zip(&series.y) {
            match series.axes.to_pixel(x, y, width, height) {
                Some((px, py)) if pen_down => pb.line_to(px, py),
                Some((px, py)) => {
                    pb.move_to(px, py);
                    pen_down = true;
                }
                None => pen_down = false,
            }
        }
        let path = match pb.finish() {
            Some(path) => path,
            None => return,
        };

        let mut paint = Paint::default();
        let [r, g, b] = series.style.color;
        paint.set_color_rgba8(r, g, b, 255);
        paint.anti_alias = true;
        let stroke = Stroke {
            width: series.style.width,
            ..Stroke::default()
        };
        self.pixmap
            .stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    }

    fn present(&mut self, region: Region) -> Result<()> {
        let mut front = std::mem::take(&mut self.front);
        self.copy_region(region, &mut front);
        self.front = front;
        self.presents += 1;
        self.last_present = Some(region);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::{LineStyle, Scale};

    fn full_axes() -> Axes {
        Axes {
            area: [0., 0., 1., 1.],
            x: Scale::Linear { min: 0., max: 3. },
            y: Scale::Linear { min: -1., max: 1. },
        }
    }

    fn line(y: Vec<f32>) -> Series {
        let mut s = Series::new(
            "test",
            vec![0., 1., 2., 3.],
            full_axes(),
            LineStyle {
                color: [255, 255, 255],
                width: 1.,
            },
        );
        s.y = y;
        s
    }

    #[test]
    fn snapshot_restores_pixels() {
        let mut canvas = Canvas::new(32, 16).unwrap();
        canvas.draw_background(&[full_axes()]);
        let snap = canvas.capture_snapshot();
        let before = canvas.pixmap.data().to_vec();

        canvas.draw_series(&line(vec![-1., 1., -1., 1.]));
        assert_ne!(canvas.pixmap.data(), &before[..]);

        assert!(canvas.restore_snapshot(&snap));
        assert_eq!(canvas.pixmap.data(), &before[..]);
    }

    #[test]
    fn stale_snapshot_is_rejected() {
        let mut canvas = Canvas::new(32, 16).unwrap();
        let snap = canvas.capture_snapshot();
        canvas.resize(64, 16).unwrap();
        assert!(!canvas.restore_snapshot(&snap));
    }

    #[test]
    fn present_copies_only_region() {
        let mut canvas = Canvas::new(8, 8).unwrap();
        canvas.draw_background(&[]);
        let region = Region {
            x: 2,
            y: 2,
            width: 3,
            height: 2,
        };
        canvas.present(region).unwrap();

        let bg = pack_rgb(canvas.pixmap.pixels()[0]);
        for y in 0..8u32 {
            for x in 0..8u32 {
                let inside = (2..5).contains(&x) && (2..4).contains(&y);
                let px = canvas.front()[(y * 8 + x) as usize];
                assert_eq!(px == bg, inside, "pixel {},{}", x, y);
            }
        }
        assert_eq!(canvas.presents(), 1);
        assert_eq!(canvas.last_present(), Some(region));
    }

    #[test]
    fn all_gaps_draw_nothing() {
        let mut canvas = Canvas::new(16, 16).unwrap();
        let before = canvas.pixmap.data().to_vec();
        canvas.draw_series(&line(vec![f32::NAN; 4]));
        assert_eq!(canvas.pixmap.data(), &before[..]);
    }

    #[test]
    fn flushing_leaves_presented_pixels() {
        let mut canvas = Canvas::new(8, 8).unwrap();
        canvas.draw_background(&[]);
        canvas.present(Region::full(8, 8)).unwrap();
        let shown = canvas.front().to_vec();

        canvas.flush_events();
        assert_eq!(canvas.front(), &shown[..]);
        assert_eq!(canvas.presents(), 1);
    }

    #[test]
    fn contexts_are_distinct() {
        let a = Canvas::new(4, 4).unwrap();
        let b = Canvas::new(4, 4).unwrap();
        assert_ne!(a.context(), b.context());
    }
}
