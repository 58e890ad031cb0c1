//! Colors: RGB/HSV, an HSV cycle for lines and model coloring, gradients.

use serde::{Deserialize, Serialize};

/// Default series palette.
pub const SERIES_COLORS: [&str; 8] = [
    "#7aa2ff", // blue
    "#fbbf24", // amber
    "#4ade80", // green
    "#fb7185", // pink/red
    "#a78bfa", // purple
    "#22c55e", // bright green
    "#60a5fa", // light blue
    "#e879f9", // magenta
];

/// Linear RGB in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// `#rrggbb` or `rrggbb`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        Some(Self::new(
            channel(0)? as f64 / 255.0,
            channel(2)? as f64 / 255.0,
            channel(4)? as f64 / 255.0,
        ))
    }

    pub fn to_hex(self) -> String {
        let c = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", c(self.r), c(self.g), c(self.b))
    }

    pub fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        Rgb::new(
            self.r + (other.r - self.r) * t,
            self.g + (other.g - self.g) * t,
            self.b + (other.b - self.b) * t,
        )
    }

    pub fn to_hsv(self) -> Hsv {
        let max = self.r.max(self.g).max(self.b);
        let min = self.r.min(self.g).min(self.b);
        let d = max - min;
        let h = if d == 0.0 {
            0.0
        } else if max == self.r {
            ((self.g - self.b) / d).rem_euclid(6.0) / 6.0
        } else if max == self.g {
            ((self.b - self.r) / d + 2.0) / 6.0
        } else {
            ((self.r - self.g) / d + 4.0) / 6.0
        };
        let s = if max == 0.0 { 0.0 } else { d / max };
        Hsv { h, s, v: max }
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::new(0.8, 0.8, 0.8)
    }
}

/// All channels in `[0, 1]`; hue wraps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

impl Hsv {
    pub fn to_rgb(self) -> Rgb {
        let h = self.h.rem_euclid(1.0) * 6.0;
        let s = self.s.clamp(0.0, 1.0);
        let v = self.v.clamp(0.0, 1.0);
        let i = h.floor();
        let f = h - i;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * f);
        let t = v * (1.0 - s * (1.0 - f));
        let (r, g, b) = match i as u8 % 6 {
            0 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        };
        Rgb::new(r, g, b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    H,
    S,
    V,
}

/// Cycles one HSV channel in `max_colors` equal steps from an initial color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorGenerator {
    pub initial: Hsv,
    pub shift: Channel,
    pub max_colors: usize,
    next: usize,
}

impl Default for ColorGenerator {
    fn default() -> Self {
        Self::new(Hsv { h: 0.6, s: 0.7, v: 0.9 }, Channel::H, 8)
    }
}

impl ColorGenerator {
    pub fn new(initial: Hsv, shift: Channel, max_colors: usize) -> Self {
        Self {
            initial,
            shift,
            max_colors: max_colors.max(1),
            next: 0,
        }
    }

    /// The `i`-th color of the cycle, independent of the generator state.
    pub fn color(&self, i: usize) -> Rgb {
        let n = self.max_colors.max(1);
        let step = (i % n) as f64 / n as f64;
        let mut hsv = self.initial;
        match self.shift {
            Channel::H => hsv.h = (hsv.h + step).rem_euclid(1.0),
            // Saturation and value would hit the ceiling, so they wrap too.
            Channel::S => hsv.s = (hsv.s + step).rem_euclid(1.0),
            Channel::V => hsv.v = (hsv.v + step).rem_euclid(1.0),
        }
        hsv.to_rgb()
    }

    pub fn next_color(&mut self) -> Rgb {
        let c = self.color(self.next);
        self.next += 1;
        c
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }
}

/// Piecewise-linear gradient over evenly spaced stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gradient {
    pub stops: Vec<Rgb>,
}

impl Default for Gradient {
    fn default() -> Self {
        let blue = Rgb::from_hex(SERIES_COLORS[0]).unwrap_or_default();
        let amber = Rgb::from_hex(SERIES_COLORS[1]).unwrap_or_default();
        Self {
            stops: vec![blue, amber],
        }
    }
}

impl Gradient {
    /// Color at `t` in `[0, 1]`; values outside are clamped.
    pub fn at(&self, t: f64) -> Rgb {
        match self.stops.len() {
            0 => Rgb::default(),
            1 => self.stops[0],
            n => {
                let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
                let pos = t * (n - 1) as f64;
                let i = (pos.floor() as usize).min(n - 2);
                self.stops[i].lerp(self.stops[i + 1], pos - i as f64)
            }
        }
    }
}

/// The default palette as colors.
pub fn palette() -> Vec<Rgb> {
    SERIES_COLORS.iter().filter_map(|h| Rgb::from_hex(h)).collect()
}
