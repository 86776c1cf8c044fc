//! Weightmap channel allocation.
//!
//! Each shared weightmap texture has four channels; [`ChannelAllocator`] records
//! which component owns each one. It knows nothing about texture contents, so the
//! packing policy can be tested in isolation. The proxy-level passes that move
//! texel data live in [`realloc`].

pub mod realloc;

use crate::component::ComponentKey;
use crate::error::{LandscapeError, Result};
use crate::texture::TextureId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Channels per weightmap texture.
pub const CHANNELS_PER_TEXTURE: usize = 4;

/// Channel ownership of one weightmap texture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightmapUsage {
    pub channels: [Option<ComponentKey>; CHANNELS_PER_TEXTURE],
}

impl WeightmapUsage {
    pub fn free_channel_count(&self) -> usize {
        self.channels.iter().filter(|c| c.is_none()).count()
    }

    pub fn first_free(&self) -> Option<usize> {
        self.channels.iter().position(Option::is_none)
    }

    pub fn is_empty(&self) -> bool {
        self.free_channel_count() == CHANNELS_PER_TEXTURE
    }

    /// Components owning at least one channel.
    pub fn owners(&self) -> impl Iterator<Item = ComponentKey> + '_ {
        self.channels.iter().flatten().copied()
    }
}

/// Channel ownership for every weightmap texture of a proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelAllocator {
    usages: BTreeMap<TextureId, WeightmapUsage>,
}

impl ChannelAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a texture with all channels free.
    pub fn register(&mut self, texture: TextureId) {
        self.usages.entry(texture).or_default();
    }

    pub fn usage(&self, texture: TextureId) -> Option<&WeightmapUsage> {
        self.usages.get(&texture)
    }

    pub fn contains(&self, texture: TextureId) -> bool {
        self.usages.contains_key(&texture)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TextureId, &WeightmapUsage)> {
        self.usages.iter().map(|(id, u)| (*id, u))
    }

    pub fn len(&self) -> usize {
        self.usages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usages.is_empty()
    }

    pub fn clear(&mut self) {
        self.usages.clear();
    }

    /// Owner of one channel.
    pub fn owner(&self, texture: TextureId, channel: usize) -> Option<ComponentKey> {
        self.usages
            .get(&texture)
            .and_then(|u| u.channels.get(channel).copied().flatten())
    }

    pub fn free_channel_count(&self, texture: TextureId) -> usize {
        self.usages
            .get(&texture)
            .map(WeightmapUsage::free_channel_count)
            .unwrap_or(0)
    }

    /// Texture with at least `needed` free channels whose owners are closest to `near`.
    ///
    /// Distance is the smallest squared grid distance to any current owner. Textures
    /// without owners are never picked. Ties keep the first texture in id order.
    pub fn find_nearest(&self, needed: usize, near: ComponentKey) -> Option<TextureId> {
        let mut best: Option<(TextureId, i64)> = None;
        for (id, usage) in &self.usages {
            if usage.free_channel_count() < needed {
                continue;
            }
            let Some(distance) = usage.owners().map(|owner| owner.distance_squared(near)).min() else {
                continue;
            };
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((*id, distance)),
            }
        }
        best.map(|(id, _)| id)
    }

    /// Find a texture with `needed` free channels near `near`, or create one.
    ///
    /// Sharing is only attempted for fewer than four channels; `create` must
    /// return a fresh texture id, which is registered with all channels free.
    pub fn find_or_create_capacity<F>(&mut self, needed: usize, near: ComponentKey, create: F) -> TextureId
    where
        F: FnOnce() -> TextureId,
    {
        if needed < CHANNELS_PER_TEXTURE {
            if let Some(id) = self.find_nearest(needed, near) {
                return id;
            }
        }
        let id = create();
        self.register(id);
        id
    }

    /// Give `channel` of `texture` to `owner`.
    pub fn claim(&mut self, texture: TextureId, channel: usize, owner: ComponentKey) -> Result<()> {
        let usage = self.usages.entry(texture).or_default();
        match usage.channels[channel] {
            Some(existing) if existing != owner => Err(LandscapeError::ChannelConflict {
                texture: texture.0,
                channel: channel as u8,
            }),
            _ => {
                usage.channels[channel] = Some(owner);
                Ok(())
            }
        }
    }

    /// Free `channel` of `texture`.
    pub fn release(&mut self, texture: TextureId, channel: usize) {
        if let Some(usage) = self.usages.get_mut(&texture) {
            usage.channels[channel] = None;
        }
    }

    /// Free every channel owned by `owner`.
    pub fn release_owner(&mut self, owner: ComponentKey) {
        for usage in self.usages.values_mut() {
            for channel in usage.channels.iter_mut() {
                if *channel == Some(owner) {
                    *channel = None;
                }
            }
        }
    }

    /// Forget textures with no owned channels and return them.
    pub fn remove_empty(&mut self) -> Vec<TextureId> {
        let empty: Vec<TextureId> = self
            .usages
            .iter()
            .filter(|(_, u)| u.is_empty())
            .map(|(id, _)| *id)
            .collect();
        for id in &empty {
            self.usages.remove(id);
        }
        empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntPoint;

    fn key(x: i32, y: i32) -> ComponentKey {
        IntPoint::new(x, y)
    }

    #[test]
    fn test_claim_is_exclusive() {
        let mut alloc = ChannelAllocator::new();
        let t = TextureId(0);
        alloc.register(t);
        alloc.claim(t, 0, key(0, 0)).unwrap();
        assert!(alloc.claim(t, 0, key(0, 0)).is_ok());
        assert!(matches!(
            alloc.claim(t, 0, key(1, 0)),
            Err(LandscapeError::ChannelConflict { texture: 0, channel: 0 })
        ));
        assert_eq!(alloc.owner(t, 0), Some(key(0, 0)));
        assert_eq!(alloc.free_channel_count(t), 3);
    }

    #[test]
    fn test_find_nearest_prefers_close_owner() {
        let mut alloc = ChannelAllocator::new();
        alloc.register(TextureId(0));
        alloc.register(TextureId(1));
        alloc.claim(TextureId(0), 0, key(10, 10)).unwrap();
        alloc.claim(TextureId(1), 0, key(1, 0)).unwrap();
        assert_eq!(alloc.find_nearest(1, key(0, 0)), Some(TextureId(1)));
        assert_eq!(alloc.find_nearest(1, key(9, 9)), Some(TextureId(0)));
        assert_eq!(alloc.find_nearest(4, key(0, 0)), None);
    }

    #[test]
    fn test_find_or_create_shares_until_full() {
        let mut alloc = ChannelAllocator::new();
        let mut next = 0u32;
        let mut textures = Vec::new();
        for x in 0..5 {
            let t = alloc.find_or_create_capacity(1, key(x, 0), || {
                next += 1;
                TextureId(next - 1)
            });
            let channel = alloc.usage(t).unwrap().first_free().unwrap();
            alloc.claim(t, channel, key(x, 0)).unwrap();
            textures.push((t, channel));
        }
        assert_eq!(
            textures,
            vec![
                (TextureId(0), 0),
                (TextureId(0), 1),
                (TextureId(0), 2),
                (TextureId(0), 3),
                (TextureId(1), 0)
            ]
        );
    }

    #[test]
    fn test_four_channels_always_create() {
        let mut alloc = ChannelAllocator::new();
        alloc.register(TextureId(0));
        let t = alloc.find_or_create_capacity(4, key(0, 0), || TextureId(7));
        assert_eq!(t, TextureId(7));
        assert!(alloc.contains(TextureId(7)));
    }

    #[test]
    fn test_release_and_remove_empty() {
        let mut alloc = ChannelAllocator::new();
        alloc.claim(TextureId(0), 1, key(0, 0)).unwrap();
        alloc.claim(TextureId(1), 2, key(1, 1)).unwrap();
        alloc.release(TextureId(0), 1);
        alloc.release_owner(key(5, 5));
        assert_eq!(alloc.remove_empty(), vec![TextureId(0)]);
        assert_eq!(alloc.len(), 1);
    }
}
