//! Tracks which texels of a texture were touched during an edit.
//!
//! An edit scope collects one region list per mip so the render backend can
//! upload only what changed.

use super::TextureId;
use crate::types::IntRect;
use std::collections::BTreeMap;

/// Per-mip list of updated texel rectangles for one texture.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDataInfo {
    pub texture: TextureId,
    regions: Vec<Vec<IntRect>>,
}

impl TextureDataInfo {
    pub fn new(texture: TextureId, num_mips: usize) -> Self {
        Self {
            texture,
            regions: vec![Vec::new(); num_mips],
        }
    }

    /// Record an inclusive texel rectangle as updated on `mip`.
    pub fn add_mip_update_region(&mut self, mip: usize, x1: i32, y1: i32, x2: i32, y2: i32) {
        if mip >= self.regions.len() {
            self.regions.resize(mip + 1, Vec::new());
        }
        let rect = IntRect::new(x1, y1, x2, y2);
        if !rect.is_empty() {
            self.regions[mip].push(rect);
        }
    }

    pub fn regions(&self, mip: usize) -> &[IntRect] {
        self.regions.get(mip).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Union of every rectangle recorded on `mip`.
    pub fn bounds(&self, mip: usize) -> IntRect {
        self.regions(mip)
            .iter()
            .fold(IntRect::empty(), |acc, r| acc.union(r))
    }

    pub fn num_mips(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.iter().all(Vec::is_empty)
    }
}

/// Update regions collected across an edit, one entry per touched texture.
#[derive(Debug, Clone, Default)]
pub struct TextureUpdates {
    infos: BTreeMap<TextureId, TextureDataInfo>,
}

impl TextureUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tracker for `texture`, created on first use.
    pub fn info(&mut self, texture: TextureId, num_mips: usize) -> &mut TextureDataInfo {
        self.infos
            .entry(texture)
            .or_insert_with(|| TextureDataInfo::new(texture, num_mips))
    }

    pub fn get(&self, texture: TextureId) -> Option<&TextureDataInfo> {
        self.infos.get(&texture)
    }

    pub fn is_empty(&self) -> bool {
        self.infos.values().all(TextureDataInfo::is_empty)
    }

    /// Stop tracking a texture that was destroyed.
    pub fn forget(&mut self, texture: TextureId) {
        self.infos.remove(&texture);
    }

    /// Take every non-empty tracker, leaving the set empty.
    pub fn drain(&mut self) -> Vec<TextureDataInfo> {
        std::mem::take(&mut self.infos)
            .into_values()
            .filter(|info| !info.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_accumulate() {
        let mut info = TextureDataInfo::new(TextureId(0), 2);
        assert!(info.is_empty());
        info.add_mip_update_region(0, 0, 0, 3, 3);
        info.add_mip_update_region(0, 2, 2, 7, 5);
        info.add_mip_update_region(3, 0, 0, 0, 0);
        assert_eq!(info.regions(0).len(), 2);
        assert_eq!(info.bounds(0), IntRect::new(0, 0, 7, 5));
        assert_eq!(info.num_mips(), 4);
        assert!(info.regions(1).is_empty());
    }

    #[test]
    fn test_updates_drain_skips_untouched() {
        let mut updates = TextureUpdates::new();
        updates.info(TextureId(1), 3).add_mip_update_region(0, 0, 0, 1, 1);
        updates.info(TextureId(2), 3);
        assert!(!updates.is_empty());
        let drained = updates.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].texture, TextureId(1));
        assert!(updates.get(TextureId(1)).is_none());
    }
}
