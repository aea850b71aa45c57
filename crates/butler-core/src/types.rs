//! Core value types shared across Butler crates.

use serde::{Deserialize, Serialize};

/// Identity of one running target-application instance.
///
/// Ordered so the arbitration comparator has a stable total order across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

/// A point in a process window's client coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Offset a point by `dx`, `dy`.
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// An axis-aligned rectangle in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center of the rectangle (integer division, like the capture backends report it).
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.y >= self.y && p.x < self.x + self.width && p.y < self.y + self.height
    }
}

/// One template-match hit returned by a [`crate::traits::ScreenCapture`] backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Where the template was found.
    pub region: Region,
    /// Similarity in `0.0..=1.0`.
    pub similarity: f32,
    /// Template that produced the hit.
    pub template: String,
}

impl Match {
    pub fn center(&self) -> Point {
        self.region.center()
    }
}

/// Rows closer than this many pixels count as the same row when ranking matches.
pub const MATCH_ROW_EPSILON: i32 = 10;

/// Rank matches top-to-bottom, then left-to-right within a row.
pub fn rank_matches(matches: &mut [Match]) {
    matches.sort_by(|a, b| {
        let dy = (a.region.y - b.region.y).abs();
        if dy < MATCH_ROW_EPSILON {
            a.region.x.cmp(&b.region.x)
        } else {
            a.region.y.cmp(&b.region.y)
        }
    });
}

/// Mouse buttons the input service can press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
}

/// Keys the built-in tasks use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Control,
    Shift,
    Alt,
    /// Function key `F1`..`F12`.
    F(u8),
}

/// An RGB pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// True when every channel lies within `tolerance` of `reference`'s channel.
    pub fn near(&self, reference: Rgb, tolerance: (u8, u8, u8)) -> bool {
        self.r.abs_diff(reference.r) <= tolerance.0
            && self.g.abs_diff(reference.g) <= tolerance.1
            && self.b.abs_diff(reference.b) <= tolerance.2
    }
}

/// A captured window image, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pixels: Vec<Rgb>,
}

impl Frame {
    /// Create a frame filled with one color.
    pub fn filled(width: u32, height: u32, color: Rgb) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; (width as usize) * (height as usize)],
        }
    }

    /// Create a frame from raw row-major pixels. Returns `None` on a size mismatch.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<Rgb>) -> Option<Self> {
        if pixels.len() != (width as usize) * (height as usize) {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Pixel at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get((y as usize) * (self.width as usize) + x as usize)
            .copied()
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Rgb) {
        if x < self.width && y < self.height {
            let idx = (y as usize) * (self.width as usize) + x as usize;
            self.pixels[idx] = color;
        }
    }
}
