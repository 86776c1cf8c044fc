//! Heightmap and weightmap file codecs.
//!
//! The proxy only gathers sample arrays and their dimensions; a codec owns the
//! file format and the write.

use crate::error::{LandscapeError, Result};
use crate::layer::LayerInfoId;
use crate::proxy::Proxy;
use image::{ImageBuffer, ImageFormat, Luma};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Width and height of a sample array, in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, samples: usize) -> Result<()> {
        if samples != self.len() {
            return Err(LandscapeError::Export(format!(
                "{} samples do not fill {}x{}",
                samples, self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Writes 16-bit height samples.
pub trait HeightmapCodec {
    /// File extension without the dot.
    fn extension(&self) -> &'static str;

    /// `scale` is the landscape's world scale, for formats that record it.
    fn export(&self, path: &Path, data: &[u16], dims: Dimensions, scale: [f32; 3]) -> Result<()>;
}

/// Writes 8-bit layer weight samples.
pub trait WeightmapCodec {
    fn extension(&self) -> &'static str;

    fn export(&self, path: &Path, data: &[u8], dims: Dimensions, scale: [f32; 3]) -> Result<()>;
}

/// 16-bit grayscale PNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct Png16Codec;

/// 8-bit grayscale PNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct Png8Codec;

/// Headerless little-endian samples (`.r16` for heights, `.r8` for weights).
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl HeightmapCodec for Png16Codec {
    fn extension(&self) -> &'static str {
        "png"
    }

    fn export(&self, path: &Path, data: &[u16], dims: Dimensions, _scale: [f32; 3]) -> Result<()> {
        dims.check(data.len())?;
        let image: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(dims.width, dims.height, data.to_vec())
                .ok_or_else(|| LandscapeError::Export("height buffer does not fit image".to_string()))?;
        image.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}

impl WeightmapCodec for Png8Codec {
    fn extension(&self) -> &'static str {
        "png"
    }

    fn export(&self, path: &Path, data: &[u8], dims: Dimensions, _scale: [f32; 3]) -> Result<()> {
        dims.check(data.len())?;
        let image: ImageBuffer<Luma<u8>, Vec<u8>> =
            ImageBuffer::from_raw(dims.width, dims.height, data.to_vec())
                .ok_or_else(|| LandscapeError::Export("weight buffer does not fit image".to_string()))?;
        image.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}

impl HeightmapCodec for RawCodec {
    fn extension(&self) -> &'static str {
        "r16"
    }

    fn export(&self, path: &Path, data: &[u16], dims: Dimensions, _scale: [f32; 3]) -> Result<()> {
        dims.check(data.len())?;
        let mut out = BufWriter::new(File::create(path)?);
        for h in data {
            out.write_all(&h.to_le_bytes())?;
        }
        out.flush()?;
        Ok(())
    }
}

impl WeightmapCodec for RawCodec {
    fn extension(&self) -> &'static str {
        "r8"
    }

    fn export(&self, path: &Path, data: &[u8], dims: Dimensions, _scale: [f32; 3]) -> Result<()> {
        dims.check(data.len())?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

/// Read a headerless little-endian 16-bit height file.
pub fn read_r16(path: &Path) -> Result<Vec<u16>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 2 != 0 {
        return Err(LandscapeError::InvalidLayout(format!(
            "{} has an odd byte count",
            path.display()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect())
}

impl Proxy {
    /// Write the height field of the whole landscape through `codec`.
    pub fn export_heightmap(&self, path: &Path, codec: &dyn HeightmapCodec) -> Result<Dimensions> {
        let extent = self.get_landscape_extent().ok_or(LandscapeError::MissingExtent)?;
        let data = self.get_height_data(extent.x1, extent.y1, extent.x2, extent.y2)?;
        let dims = Dimensions::new(extent.width() as u32, extent.height() as u32);
        codec.export(path, &data, dims, self.config.draw_scale)?;
        info!(path = %path.display(), width = dims.width, height = dims.height, "exported heightmap");
        Ok(dims)
    }

    /// Write the weights of one layer over the whole landscape through `codec`.
    pub fn export_layer(&self, layer: LayerInfoId, path: &Path, codec: &dyn WeightmapCodec) -> Result<Dimensions> {
        let extent = self.get_landscape_extent().ok_or(LandscapeError::MissingExtent)?;
        self.layers.require(layer)?;
        let data = self.get_weight_data(layer, extent.x1, extent.y1, extent.x2, extent.y2)?;
        let dims = Dimensions::new(extent.width() as u32, extent.height() as u32);
        codec.export(path, &data, dims, self.config.draw_scale)?;
        info!(path = %path.display(), layer = layer.0, "exported layer");
        Ok(dims)
    }
}
