//! Shared types used throughout the library.

mod bounds;

pub use bounds::{BoundingBox, BoxSphereBounds};

use serde::{Deserialize, Serialize};

/// An integer point on the landscape grid, in quad units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct IntPoint {
    pub x: i32,
    pub y: i32,
}

impl IntPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared euclidean distance, used for spatial locality.
    pub fn distance_squared(&self, other: IntPoint) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        dx * dx + dy * dy
    }
}

/// An inclusive integer rectangle `[x1, x2] x [y1, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl IntRect {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// A rectangle that contains nothing and is absorbed by `union`.
    pub fn empty() -> Self {
        Self {
            x1: i32::MAX,
            y1: i32::MAX,
            x2: i32::MIN,
            y2: i32::MIN,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x1 > self.x2 || self.y1 > self.y2
    }

    /// Number of columns covered.
    pub fn width(&self) -> i32 {
        if self.is_empty() {
            0
        } else {
            self.x2 - self.x1 + 1
        }
    }

    /// Number of rows covered.
    pub fn height(&self) -> i32 {
        if self.is_empty() {
            0
        } else {
            self.y2 - self.y1 + 1
        }
    }

    pub fn include(&mut self, x: i32, y: i32) {
        self.x1 = self.x1.min(x);
        self.y1 = self.y1.min(y);
        self.x2 = self.x2.max(x);
        self.y2 = self.y2.max(y);
    }

    pub fn union(&self, other: &IntRect) -> IntRect {
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        IntRect {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }
}

/// An 8-bit RGBA texel.
///
/// Heightmaps store the 16-bit height in R (high byte) and G (low byte) and the
/// tangent-space normal X/Y in B and A. Weightmaps store one layer weight per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Read one channel by index (0 = R, 1 = G, 2 = B, 3 = A).
    pub fn channel(&self, channel: usize) -> u8 {
        match channel {
            0 => self.r,
            1 => self.g,
            2 => self.b,
            _ => self.a,
        }
    }

    pub fn set_channel(&mut self, channel: usize, value: u8) {
        match channel {
            0 => self.r = value,
            1 => self.g = value,
            2 => self.b = value,
            _ => self.a = value,
        }
    }

    /// Decode the packed 16-bit height.
    pub fn height(&self) -> u16 {
        ((self.r as u16) << 8) | self.g as u16
    }

    pub fn set_height(&mut self, height: u16) {
        self.r = (height >> 8) as u8;
        self.g = (height & 0xff) as u8;
    }

    /// A heightmap texel from a height and packed normal bytes.
    pub fn from_height(height: u16, normal_x: u8, normal_y: u8) -> Self {
        Self::new((height >> 8) as u8, (height & 0xff) as u8, normal_x, normal_y)
    }
}

/// `ceil(log2(value))` for positive values.
pub fn ceil_log2(value: u32) -> u32 {
    if value <= 1 {
        0
    } else {
        32 - (value - 1).leading_zeros()
    }
}

/// `floor(log2(value))` for positive values.
pub fn floor_log2(value: u32) -> u32 {
    if value == 0 {
        0
    } else {
        31 - value.leading_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_height_packing() {
        let mut c = Color::BLACK;
        c.set_height(0xABCD);
        assert_eq!(c.r, 0xAB);
        assert_eq!(c.g, 0xCD);
        assert_eq!(c.height(), 0xABCD);
        assert_eq!(Color::from_height(32768, 128, 128).height(), 32768);
    }

    #[test]
    fn test_channel_access() {
        let mut c = Color::new(1, 2, 3, 4);
        assert_eq!(c.channel(2), 3);
        c.set_channel(3, 9);
        assert_eq!(c.a, 9);
    }

    #[test]
    fn test_rect_union_and_size() {
        let mut r = IntRect::empty();
        assert!(r.is_empty());
        assert_eq!(r.width(), 0);
        r.include(3, 4);
        r.include(5, 1);
        assert_eq!(r, IntRect::new(3, 1, 5, 4));
        assert_eq!(r.width(), 3);
        assert_eq!(r.height(), 4);
        let u = r.union(&IntRect::new(0, 0, 1, 1));
        assert_eq!(u, IntRect::new(0, 0, 5, 4));
        assert_eq!(IntRect::empty().union(&r), r);
    }

    #[test]
    fn test_logs() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
        assert_eq!(floor_log2(8), 3);
        assert_eq!(floor_log2(15), 3);
    }
}
