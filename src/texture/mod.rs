//! Texture storage: heightmaps, weightmaps and XY offset maps with full mip chains.
//!
//! Textures live in a [`TextureStore`] arena and are referenced by [`TextureId`].
//! Several components may reference the same texture.

mod data_info;

pub use data_info::{TextureDataInfo, TextureUpdates};

use crate::error::{LandscapeError, Result};
use crate::types::Color;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Handle to a texture in a [`TextureStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TextureId(pub u32);

/// What a texture's texels encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureKind {
    /// 16-bit height in R/G, normal X/Y in B/A.
    Heightmap,
    /// One 8-bit layer weight per channel.
    Weightmap,
    /// X offset in R/G, Y offset in B/A.
    XYOffset,
}

/// A 2D RGBA8 texture with a complete mip chain down to 1x1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Texture {
    pub name: String,
    pub kind: TextureKind,
    pub size_x: i32,
    pub size_y: i32,
    pub mips: Vec<Vec<Color>>,
}

impl Texture {
    /// Create a zero-filled texture with every mip allocated.
    pub fn new(name: impl Into<String>, kind: TextureKind, size_x: i32, size_y: i32) -> Self {
        let num_mips = crate::types::floor_log2(size_x.max(size_y).max(1) as u32) as usize + 1;
        let mips = (0..num_mips)
            .map(|m| {
                let (w, h) = mip_size(size_x, size_y, m);
                vec![Color::BLACK; (w * h) as usize]
            })
            .collect();
        Self {
            name: name.into(),
            kind,
            size_x,
            size_y,
            mips,
        }
    }

    pub fn num_mips(&self) -> usize {
        self.mips.len()
    }

    /// Dimensions of mip `mip`.
    pub fn mip_size(&self, mip: usize) -> (i32, i32) {
        mip_size(self.size_x, self.size_y, mip)
    }

    pub fn mip(&self, mip: usize) -> &[Color] {
        &self.mips[mip]
    }

    pub fn mip_mut(&mut self, mip: usize) -> &mut [Color] {
        &mut self.mips[mip]
    }

    /// Clear one channel in every mip.
    pub fn zero_channel(&mut self, channel: usize) {
        for mip in &mut self.mips {
            for texel in mip.iter_mut() {
                texel.set_channel(channel, 0);
            }
        }
    }

    /// Extract one channel of one mip.
    pub fn channel_data(&self, mip: usize, channel: usize) -> Vec<u8> {
        self.mips[mip].iter().map(|c| c.channel(channel)).collect()
    }
}

/// Size of mip `mip` of a `size_x` x `size_y` texture.
pub fn mip_size(size_x: i32, size_y: i32, mip: usize) -> (i32, i32) {
    ((size_x >> mip).max(1), (size_y >> mip).max(1))
}

/// Arena of textures owned by a landscape proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextureStore {
    textures: BTreeMap<TextureId, Texture>,
    next_id: u32,
}

impl TextureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a texture and return its handle.
    pub fn insert(&mut self, texture: Texture) -> TextureId {
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.textures.insert(id, texture);
        id
    }

    /// Create a zero-filled texture and return its handle.
    pub fn create(&mut self, name: impl Into<String>, kind: TextureKind, size_x: i32, size_y: i32) -> TextureId {
        self.insert(Texture::new(name, kind, size_x, size_y))
    }

    pub fn get(&self, id: TextureId) -> Result<&Texture> {
        self.textures.get(&id).ok_or(LandscapeError::MissingTexture(id.0))
    }

    pub fn get_mut(&mut self, id: TextureId) -> Result<&mut Texture> {
        self.textures.get_mut(&id).ok_or(LandscapeError::MissingTexture(id.0))
    }

    pub fn remove(&mut self, id: TextureId) -> Option<Texture> {
        self.textures.remove(&id)
    }

    pub fn contains(&self, id: TextureId) -> bool {
        self.textures.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TextureId, &Texture)> {
        self.textures.iter().map(|(id, t)| (*id, t))
    }

    /// Copy one channel of every mip from `src` into `dst`. `src` may equal `dst`.
    pub fn copy_channel(
        &mut self,
        src: TextureId,
        src_channel: usize,
        dst: TextureId,
        dst_channel: usize,
    ) -> Result<()> {
        if src == dst {
            let texture = self.get_mut(src)?;
            for mip in &mut texture.mips {
                for texel in mip.iter_mut() {
                    let v = texel.channel(src_channel);
                    texel.set_channel(dst_channel, v);
                }
            }
            return Ok(());
        }

        let source: Vec<Vec<u8>> = {
            let texture = self.get(src)?;
            (0..texture.num_mips())
                .map(|m| texture.channel_data(m, src_channel))
                .collect()
        };
        let target = self.get_mut(dst)?;
        for (mip, data) in target.mips.iter_mut().zip(source.iter()) {
            for (texel, v) in mip.iter_mut().zip(data.iter()) {
                texel.set_channel(dst_channel, *v);
            }
        }
        Ok(())
    }
}
