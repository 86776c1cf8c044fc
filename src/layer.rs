//! Paint layers and per-component layer allocations.

use crate::error::{LandscapeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Material parameter name used for the visibility (hole) layer.
pub const VISIBILITY_PARAMETER_NAME: &str = "__LANDSCAPE_VISIBILITY__";

/// Weight above which the visibility layer marks a hole.
pub const VISIBILITY_THRESHOLD: u8 = 170;

/// Handle to a registered layer info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerInfoId(pub u32);

impl LayerInfoId {
    /// The reserved visibility layer, always registered first.
    pub const VISIBILITY: LayerInfoId = LayerInfoId(0);
}

/// Description of a paint layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub name: String,
    /// Layer is painted independently and excluded from the sum-to-255 blend.
    pub no_weight_blend: bool,
    /// Physical material reported through the dominant layer data.
    pub phys_material: Option<String>,
}

impl LayerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            no_weight_blend: false,
            phys_material: None,
        }
    }

    pub fn with_no_weight_blend(mut self, no_weight_blend: bool) -> Self {
        self.no_weight_blend = no_weight_blend;
        self
    }

    pub fn with_phys_material(mut self, phys_material: impl Into<String>) -> Self {
        self.phys_material = Some(phys_material.into());
        self
    }
}

/// Registry of the layer infos known to a proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerRegistry {
    layers: BTreeMap<LayerInfoId, LayerInfo>,
    next_id: u32,
}

impl Default for LayerRegistry {
    fn default() -> Self {
        let mut layers = BTreeMap::new();
        layers.insert(
            LayerInfoId::VISIBILITY,
            LayerInfo::new("DataLayer__").with_no_weight_blend(true),
        );
        Self { layers, next_id: 1 }
    }
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: LayerInfo) -> LayerInfoId {
        let id = LayerInfoId(self.next_id);
        self.next_id += 1;
        self.layers.insert(id, info);
        id
    }

    pub fn get(&self, id: LayerInfoId) -> Option<&LayerInfo> {
        self.layers.get(&id)
    }

    /// Look up a layer, failing with its id in the message.
    pub fn require(&self, id: LayerInfoId) -> Result<&LayerInfo> {
        self.layers
            .get(&id)
            .ok_or_else(|| LandscapeError::MissingLayerInfo(format!("#{}", id.0)))
    }

    pub fn contains(&self, id: LayerInfoId) -> bool {
        self.layers.contains_key(&id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<LayerInfoId> {
        self.layers
            .iter()
            .find(|(_, info)| info.name == name)
            .map(|(id, _)| *id)
    }

    /// Remove a layer info. The visibility layer cannot be removed.
    pub fn unregister(&mut self, id: LayerInfoId) -> Option<LayerInfo> {
        if id == LayerInfoId::VISIBILITY {
            return None;
        }
        self.layers.remove(&id)
    }

    /// Whether `id` takes part in weight blending.
    pub fn is_weight_blended(&self, id: LayerInfoId) -> bool {
        self.layers.get(&id).map(|l| !l.no_weight_blend).unwrap_or(false)
    }

    /// Name used for the layer's material parameter.
    pub fn parameter_name(&self, id: LayerInfoId) -> String {
        if id == LayerInfoId::VISIBILITY {
            VISIBILITY_PARAMETER_NAME.to_string()
        } else {
            self.layers
                .get(&id)
                .map(|l| l.name.clone())
                .unwrap_or_default()
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (LayerInfoId, &LayerInfo)> {
        self.layers.iter().map(|(id, l)| (*id, l))
    }
}

/// Where one paint layer of a component lives in the component's weightmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightmapLayerAllocation {
    /// `None` marks an allocation whose layer info was lost.
    pub layer: Option<LayerInfoId>,
    pub texture_index: u8,
    pub channel: u8,
}

impl WeightmapLayerAllocation {
    /// Texture index of an allocation still waiting for a channel.
    pub const UNALLOCATED: u8 = 255;

    /// A new allocation that still needs packing.
    pub fn unallocated(layer: LayerInfoId) -> Self {
        Self {
            layer: Some(layer),
            texture_index: Self::UNALLOCATED,
            channel: 0,
        }
    }

    pub fn new(layer: LayerInfoId, texture_index: u8, channel: u8) -> Self {
        Self {
            layer: Some(layer),
            texture_index,
            channel,
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.texture_index != Self::UNALLOCATED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_layer_registered() {
        let registry = LayerRegistry::new();
        let vis = registry.get(LayerInfoId::VISIBILITY).unwrap();
        assert!(vis.no_weight_blend);
        assert_eq!(
            registry.parameter_name(LayerInfoId::VISIBILITY),
            VISIBILITY_PARAMETER_NAME
        );
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = LayerRegistry::new();
        let grass = registry.register(LayerInfo::new("Grass"));
        let snow = registry.register(LayerInfo::new("Snow").with_no_weight_blend(true));
        assert_ne!(grass, snow);
        assert_eq!(registry.find_by_name("Snow"), Some(snow));
        assert!(registry.is_weight_blended(grass));
        assert!(!registry.is_weight_blended(snow));
        assert!(registry.unregister(LayerInfoId::VISIBILITY).is_none());
        assert!(registry.unregister(grass).is_some());
        assert!(registry.require(grass).is_err());
    }

    #[test]
    fn test_unallocated_sentinel() {
        let alloc = WeightmapLayerAllocation::unallocated(LayerInfoId(3));
        assert!(!alloc.is_allocated());
        assert!(WeightmapLayerAllocation::new(LayerInfoId(3), 0, 2).is_allocated());
    }
}
