//! Height and weight exchange with CPU-side render target read-backs.

use crate::error::{LandscapeError, Result};
use crate::proxy::Proxy;
use crate::types::{Color, IntRect};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderTargetFormat {
    Rgba8,
    Rgba16f,
    Rgba32f,
    R8,
    Rg16f,
}

impl RenderTargetFormat {
    fn is_linear(self) -> bool {
        matches!(self, RenderTargetFormat::Rgba16f | RenderTargetFormat::Rgba32f)
    }
}

/// Pixels read back from a render target.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderTargetPixels {
    Rgba8(Vec<Color>),
    Linear(Vec<[f32; 4]>),
}

/// A render target and its read-back pixels. `pixels` is `None` once the GPU resource is released.
#[derive(Debug, Clone)]
pub struct RenderTarget {
    pub size_x: u32,
    pub size_y: u32,
    pub format: RenderTargetFormat,
    pub pixels: Option<RenderTargetPixels>,
}

impl RenderTarget {
    /// A black RGBA8 target.
    pub fn rgba8(size_x: u32, size_y: u32) -> Self {
        Self {
            size_x,
            size_y,
            format: RenderTargetFormat::Rgba8,
            pixels: Some(RenderTargetPixels::Rgba8(vec![Color::BLACK; (size_x * size_y) as usize])),
        }
    }

    /// A black floating-point target; `format` should be one of the linear formats.
    pub fn linear(format: RenderTargetFormat, size_x: u32, size_y: u32) -> Self {
        Self {
            size_x,
            size_y,
            format,
            pixels: Some(RenderTargetPixels::Linear(vec![[0.0; 4]; (size_x * size_y) as usize])),
        }
    }

    fn pixels(&self) -> Result<&RenderTargetPixels> {
        self.pixels.as_ref().ok_or(LandscapeError::MissingRenderTarget)
    }

    /// Pixels of `rect` as linear colors in `[0, 1]` (RGBA8) or as stored (float formats).
    pub fn read_linear(&self, rect: IntRect) -> Result<Vec<[f32; 4]>> {
        let stride = self.size_x as i32;
        let mut out = Vec::with_capacity((rect.width() * rect.height()) as usize);
        match self.pixels()? {
            RenderTargetPixels::Rgba8(pixels) => {
                for y in rect.y1..=rect.y2 {
                    for x in rect.x1..=rect.x2 {
                        let c = pixels[(x + y * stride) as usize];
                        out.push([c.r, c.g, c.b, c.a].map(|v| v as f32 / 255.0));
                    }
                }
            }
            RenderTargetPixels::Linear(pixels) => {
                for y in rect.y1..=rect.y2 {
                    for x in rect.x1..=rect.x2 {
                        out.push(pixels[(x + y * stride) as usize]);
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Quantize a linear color to RGBA8 without gamma.
fn to_color(linear: [f32; 4]) -> Color {
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Color::new(q(linear[0]), q(linear[1]), q(linear[2]), q(linear[3]))
}

fn unsupported(format: RenderTargetFormat) -> LandscapeError {
    LandscapeError::UnsupportedFormat(format!(
        "{:?}; only Rgba8, Rgba16f and Rgba32f are supported",
        format
    ))
}

impl Proxy {
    /// Overwrite heights from a render target, starting at the landscape's minimum corner.
    ///
    /// RGBA8 targets store the height in R (high byte) and G (low byte). Float
    /// targets store it the same way when `height_from_rg`, otherwise in R as a
    /// raw value. Only the part of the landscape the target covers is written.
    pub fn import_heightmap_from_render_target(&mut self, target: Option<&RenderTarget>, height_from_rg: bool) -> Result<()> {
        let extent = self.get_landscape_extent().ok_or(LandscapeError::MissingExtent)?;
        let target = target.ok_or(LandscapeError::MissingRenderTarget)?;
        target.pixels()?;
        let width = extent.width().min(target.size_x as i32);
        let height = extent.height().min(target.size_y as i32);
        let rect = IntRect::new(0, 0, width - 1, height - 1);

        let heights: Vec<u16> = match target.format {
            RenderTargetFormat::Rgba8 => target
                .read_linear(rect)?
                .into_iter()
                .map(|p| {
                    let c = to_color(p);
                    (c.r as u16) << 8 | c.g as u16
                })
                .collect(),
            format if format.is_linear() => target
                .read_linear(rect)?
                .into_iter()
                .map(|p| {
                    if height_from_rg {
                        let c = to_color(p);
                        (c.r as u16) << 8 | c.g as u16
                    } else {
                        p[0].clamp(0.0, u16::MAX as f32) as u16
                    }
                })
                .collect(),
            format => return Err(unsupported(format)),
        };

        self.set_height_data(
            extent.x1,
            extent.y1,
            extent.x1 + width - 1,
            extent.y1 + height - 1,
            &heights,
            true,
        )?;
        info!(width, height, "imported heightmap from render target");
        Ok(())
    }

    /// Draw the height field into a render target, one pixel per vertex from the minimum corner.
    ///
    /// The target is cleared to black first. RGBA8 targets always receive the
    /// R/G split; float targets receive it when `height_into_rg`, otherwise the
    /// raw height in R.
    pub fn export_heightmap_to_render_target(&self, target: &mut RenderTarget, height_into_rg: bool) -> Result<()> {
        let extent = self.get_landscape_extent().ok_or(LandscapeError::MissingExtent)?;
        if target.pixels.is_none() {
            return Err(LandscapeError::MissingRenderTarget);
        }
        if target.format != RenderTargetFormat::Rgba8 && !target.format.is_linear() {
            return Err(unsupported(target.format));
        }
        let width = extent.width().min(target.size_x as i32);
        let height = extent.height().min(target.size_y as i32);
        let heights = self.get_height_data(extent.x1, extent.y1, extent.x1 + width - 1, extent.y1 + height - 1)?;
        let stride = target.size_x as i32;

        match target.pixels.as_mut() {
            Some(RenderTargetPixels::Rgba8(pixels)) => {
                pixels.fill(Color::BLACK);
                for y in 0..height {
                    for x in 0..width {
                        let h = heights[(x + y * width) as usize];
                        pixels[(x + y * stride) as usize] = Color::new((h >> 8) as u8, (h & 0xff) as u8, 0, 255);
                    }
                }
            }
            Some(RenderTargetPixels::Linear(pixels)) => {
                pixels.fill([0.0; 4]);
                for y in 0..height {
                    for x in 0..width {
                        let h = heights[(x + y * width) as usize];
                        pixels[(x + y * stride) as usize] = if height_into_rg {
                            [(h >> 8) as f32 / 255.0, (h & 0xff) as f32 / 255.0, 0.0, 1.0]
                        } else {
                            [h as f32, 0.0, 0.0, 1.0]
                        };
                    }
                }
            }
            None => return Err(LandscapeError::MissingRenderTarget),
        }
        info!(width, height, "exported heightmap to render target");
        Ok(())
    }

    /// Paint the layer named `layer_name` from the red channel of a render target.
    ///
    /// The target must cover the whole landscape.
    pub fn import_weightmap_from_render_target(&mut self, target: Option<&RenderTarget>, layer_name: &str) -> Result<()> {
        let extent = self.get_landscape_extent().ok_or(LandscapeError::MissingExtent)?;
        let target = target.ok_or(LandscapeError::MissingRenderTarget)?;
        let (need_x, need_y) = (extent.width() as u32, extent.height() as u32);
        if target.size_x < need_x || target.size_y < need_y {
            return Err(LandscapeError::RenderTargetTooSmall {
                rt_x: target.size_x,
                rt_y: target.size_y,
                need_x,
                need_y,
            });
        }
        let layer = self
            .layers
            .find_by_name(layer_name)
            .ok_or_else(|| LandscapeError::MissingLayerInfo(layer_name.to_string()))?;

        let rect = IntRect::new(0, 0, need_x as i32 - 1, need_y as i32 - 1);
        let weights: Vec<u8> = target
            .read_linear(rect)?
            .into_iter()
            .map(|p| (p[0].clamp(0.0, 1.0) * 255.0) as u8)
            .collect();
        self.set_alpha_data(layer, extent.x1, extent.y1, extent.x2, extent.y2, &weights)?;
        info!(layer = layer_name, "imported weightmap from render target");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LandscapeConfig;
    use crate::layer::LayerInfo;
    use crate::types::IntPoint;

    fn proxy() -> Proxy {
        let config = LandscapeConfig::default().with_subsections(1, 7);
        let mut proxy = Proxy::new(config).unwrap();
        proxy.add_component(IntPoint::new(0, 0)).unwrap();
        proxy
    }

    #[test]
    fn test_height_round_trip_through_rgba8() {
        let mut proxy = proxy();
        let heights: Vec<u16> = (0..64).map(|i| 32768 + i * 3).collect();
        proxy.set_height_data(0, 0, 7, 7, &heights, true).unwrap();

        let mut target = RenderTarget::rgba8(8, 8);
        proxy.export_heightmap_to_render_target(&mut target, true).unwrap();
        proxy.set_height_data(0, 0, 7, 7, &[100; 64], true).unwrap();
        proxy.import_heightmap_from_render_target(Some(&target), true).unwrap();
        assert_eq!(proxy.get_height_data(0, 0, 7, 7).unwrap(), heights);
    }

    #[test]
    fn test_linear_target_raw_height() {
        let mut proxy = proxy();
        let mut target = RenderTarget::linear(RenderTargetFormat::Rgba32f, 4, 4);
        if let Some(RenderTargetPixels::Linear(pixels)) = target.pixels.as_mut() {
            pixels.fill([40000.0, 0.0, 0.0, 1.0]);
        }
        proxy.import_heightmap_from_render_target(Some(&target), false).unwrap();
        assert_eq!(proxy.get_height_data(3, 3, 3, 3).unwrap(), vec![40000]);
        assert_eq!(proxy.get_height_data(4, 4, 4, 4).unwrap(), vec![32768]);
    }

    #[test]
    fn test_import_errors() {
        let mut empty = Proxy::new(LandscapeConfig::default()).unwrap();
        let target = RenderTarget::rgba8(8, 8);
        assert!(matches!(
            empty.import_heightmap_from_render_target(Some(&target), true),
            Err(LandscapeError::MissingExtent)
        ));

        let mut proxy = proxy();
        assert!(matches!(
            proxy.import_heightmap_from_render_target(None, true),
            Err(LandscapeError::MissingRenderTarget)
        ));
        let mut released = RenderTarget::rgba8(8, 8);
        released.pixels = None;
        assert!(matches!(
            proxy.import_heightmap_from_render_target(Some(&released), true),
            Err(LandscapeError::MissingRenderTarget)
        ));
        let mut r8 = RenderTarget::rgba8(8, 8);
        r8.format = RenderTargetFormat::R8;
        assert!(matches!(
            proxy.import_heightmap_from_render_target(Some(&r8), true),
            Err(LandscapeError::UnsupportedFormat(_))
        ));

        let small = RenderTarget::rgba8(4, 8);
        assert!(matches!(
            proxy.import_weightmap_from_render_target(Some(&small), "Grass"),
            Err(LandscapeError::RenderTargetTooSmall { need_x: 8, .. })
        ));
        assert!(matches!(
            proxy.import_weightmap_from_render_target(Some(&target), "Grass"),
            Err(LandscapeError::MissingLayerInfo(_))
        ));
    }

    #[test]
    fn test_weightmap_from_red_channel() {
        let mut proxy = proxy();
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let mut target = RenderTarget::linear(RenderTargetFormat::Rgba16f, 8, 8);
        if let Some(RenderTargetPixels::Linear(pixels)) = target.pixels.as_mut() {
            pixels.fill([1.0, 0.0, 0.0, 1.0]);
            pixels[0] = [0.5, 0.0, 0.0, 1.0];
        }
        proxy.import_weightmap_from_render_target(Some(&target), "Grass").unwrap();
        let weights = proxy.get_weight_data(grass, 0, 0, 7, 7).unwrap();
        assert_eq!(weights[0], 127);
        assert!(weights[1..].iter().all(|&w| w == 255));
    }
}
