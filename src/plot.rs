//! Maps series data into pixel space.

/// A pixel rectangle on a surface.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn full(width: u32, height: u32) -> Region {
        Region {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Smallest region containing both.
    pub fn union(&self, other: &Region) -> Region {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        Region {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }

    /// Clip to a `width` x `height` surface.
    pub fn clamp_to(&self, width: u32, height: u32) -> Region {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Region {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Scale {
    Linear { min: f32, max: f32 },
    /// min must be > 0.
    Log { min: f32, max: f32 },
}

impl Scale {
    /// Position of `value` within the axis, 0 at min and 1 at max.
    /// None if the value cannot be placed on this scale.
    pub fn normalize(&self, value: f32) -> Option<f32> {
        if !value.is_finite() {
            return None;
        }
        match *self {
            Scale::Linear { min, max } => Some((value - min) / (max - min)),
            Scale::Log { min, max } => {
                if value <= 0. {
                    return None;
                }
                Some((value.ln() - min.ln()) / (max.ln() - min.ln()))
            }
        }
    }
}

/// Fractional placement of a plot area within the surface, plus its scales.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Axes {
    /// Left, top, width, height as fractions of the surface.
    pub area: [f32; 4],
    pub x: Scale,
    pub y: Scale,
}

impl Axes {
    pub fn pixel_rect(&self, width: u32, height: u32) -> Region {
        let [l, t, w, h] = self.area;
        let x0 = (l * width as f32).round() as u32;
        let y0 = (t * height as f32).round() as u32;
        let x1 = ((l + w) * width as f32).round() as u32;
        let y1 = ((t + h) * height as f32).round() as u32;
        Region {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
        .clamp_to(width, height)
    }

    /// Pixel position of a data point, clipped to the plot area.
    pub fn to_pixel(&self, x: f32, y: f32, width: u32, height: u32) -> Option<(f32, f32)> {
        let nx = self.x.normalize(x)?;
        let ny = self.y.normalize(y)?;
        let rect = self.pixel_rect(width, height);
        let left = rect.x as f32;
        let top = rect.y as f32;
        let w = rect.width as f32;
        let h = rect.height as f32;

        // Points outside the horizontal range are dropped. Vertical excursions clip.
        if !(0. ..=1.).contains(&nx) {
            return None;
        }
        let ny = ny.max(0.).min(1.);
        Some((left + nx * w, top + (1. - ny) * h))
    }
}

/// Waveform on the top half: sample index against amplitude.
pub fn waveform_axes(block_len: usize) -> Axes {
    Axes {
        area: [0.02, 0.03, 0.96, 0.44],
        x: Scale::Linear {
            min: 0.,
            max: (block_len - 1) as f32,
        },
        y: Scale::Linear { min: -1., max: 1. },
    }
}

/// Spectrum on the bottom half: log frequency against log magnitude.
pub fn spectrum_axes(nyquist: f32) -> Axes {
    Axes {
        area: [0.02, 0.53, 0.96, 0.44],
        x: Scale::Log {
            min: 10.,
            max: nyquist,
        },
        y: Scale::Log { min: 1e-7, max: 1e5 },
    }
}

/// RGB line color and width in pixels.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LineStyle {
    pub color: [u8; 3],
    pub width: f32,
}

/// One animated line. X values are fixed at registration, Y values change every frame.
#[derive(Debug, Clone)]
pub struct Series {
    pub name: &'static str,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub axes: Axes,
    pub style: LineStyle,
}

impl Series {
    /// A series with all-zero Y values.
    pub fn new(name: &'static str, x: Vec<f32>, axes: Axes, style: LineStyle) -> Series {
        let y = vec![0.; x.len()];
        Series {
            name,
            x,
            y,
            axes,
            style,
        }
    }
}
