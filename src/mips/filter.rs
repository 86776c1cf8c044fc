use crate::types::Color;

/// How texels are combined while building a mip chain.
pub trait MipFilter {
    /// Bilinear sample between four neighbouring texels.
    fn lerp(t00: Color, t10: Color, t01: Color, t11: Color, fx: f32, fy: f32) -> Color;

    /// 2x2 box average.
    fn average(t00: Color, t10: Color, t01: Color, t11: Color) -> Color;
}

fn lerp(a: f32, b: f32, alpha: f32) -> f32 {
    a + alpha * (b - a)
}

fn bilerp(v00: f32, v10: f32, v01: f32, v11: f32, fx: f32, fy: f32) -> f32 {
    lerp(lerp(v00, v10, fx), lerp(v01, v11, fx), fy)
}

fn round_to_u8(v: f32) -> u8 {
    (v + 0.5).floor().clamp(0.0, 255.0) as u8
}

/// Height is packed big-endian in R/G and filtered as a 16-bit value; B/A hold the normal.
pub struct HeightmapFilter;

impl MipFilter for HeightmapFilter {
    fn lerp(t00: Color, t10: Color, t01: Color, t11: Color, fx: f32, fy: f32) -> Color {
        let h = bilerp(
            t00.height() as f32,
            t10.height() as f32,
            t01.height() as f32,
            t11.height() as f32,
            fx,
            fy,
        );
        let height = (h + 0.5).floor().clamp(0.0, 65535.0) as u16;
        let b = bilerp(t00.b as f32, t10.b as f32, t01.b as f32, t11.b as f32, fx, fy);
        let a = bilerp(t00.a as f32, t10.a as f32, t01.a as f32, t11.a as f32, fx, fy);
        Color::from_height(height, round_to_u8(b), round_to_u8(a))
    }

    fn average(t00: Color, t10: Color, t01: Color, t11: Color) -> Color {
        let h = (t00.height() as u32 + t10.height() as u32 + t01.height() as u32 + t11.height() as u32) >> 2;
        let b = (t00.b as u32 + t10.b as u32 + t01.b as u32 + t11.b as u32) >> 2;
        let a = (t00.a as u32 + t10.a as u32 + t01.a as u32 + t11.a as u32) >> 2;
        Color::from_height(h as u16, b as u8, a as u8)
    }
}

/// Four independent 8-bit weights.
pub struct WeightmapFilter;

impl MipFilter for WeightmapFilter {
    fn lerp(t00: Color, t10: Color, t01: Color, t11: Color, fx: f32, fy: f32) -> Color {
        let mut out = Color::BLACK;
        for ch in 0..4 {
            let v = bilerp(
                t00.channel(ch) as f32,
                t10.channel(ch) as f32,
                t01.channel(ch) as f32,
                t11.channel(ch) as f32,
                fx,
                fy,
            );
            out.set_channel(ch, round_to_u8(v));
        }
        out
    }

    fn average(t00: Color, t10: Color, t01: Color, t11: Color) -> Color {
        let mut out = Color::BLACK;
        for ch in 0..4 {
            let sum = t00.channel(ch) as u32 + t10.channel(ch) as u32 + t01.channel(ch) as u32 + t11.channel(ch) as u32;
            out.set_channel(ch, (sum >> 2) as u8);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_height_lerp_crosses_byte_boundary() {
        // 255 and 256 differ in both bytes; a bytewise lerp would land far off.
        let lo = Color::from_height(255, 0, 0);
        let hi = Color::from_height(257, 0, 0);
        let mid = HeightmapFilter::lerp(lo, hi, lo, hi, 0.5, 0.0);
        assert_eq!(mid.height(), 256);
    }

    #[test]
    fn test_weight_average_truncates() {
        let c = WeightmapFilter::average(
            Color::new(255, 0, 1, 0),
            Color::new(0, 0, 1, 0),
            Color::new(0, 0, 1, 0),
            Color::new(0, 0, 0, 0),
        );
        assert_eq!(c, Color::new(63, 0, 0, 0));
    }
}
