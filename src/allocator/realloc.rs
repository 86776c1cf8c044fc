//! Proxy-level weightmap passes that move texel data between channels.

use super::CHANNELS_PER_TEXTURE;
use crate::component::{Component, ComponentKey};
use crate::error::{LandscapeError, Result};
use crate::layer::LayerInfoId;
use crate::material::{layer_allocation_key, MaterialParent};
use crate::mips::{update_weightmap_mips, MipUpdateRegion, SubsectionLayout};
use crate::proxy::Proxy;
use crate::texture::TextureKind;
use tracing::{debug, warn};

impl Proxy {
    /// Give every unallocated layer of a component a weightmap channel.
    ///
    /// Free channels in the component's own weightmaps are used when there are
    /// enough of them. Otherwise every layer is repacked: existing channels are
    /// copied into textures shared with the nearest components (or new ones) and
    /// the vacated channels are zeroed and released.
    pub fn reallocate_weightmaps(&mut self, key: ComponentKey) -> Result<()> {
        let Self {
            components,
            textures,
            weightmap_usage,
            texture_updates,
            ..
        } = self;
        let component = components
            .get_mut(&key)
            .ok_or(LandscapeError::MissingComponent(key.x, key.y))?;

        let mut needed = component
            .weightmap_layer_allocations
            .iter()
            .filter(|a| !a.is_allocated())
            .count();
        if needed == 0 {
            return Ok(());
        }

        let available: usize = component
            .weightmap_textures
            .iter()
            .map(|t| weightmap_usage.free_channel_count(*t))
            .sum();
        if available >= needed {
            for (texture_index, &texture) in component.weightmap_textures.iter().enumerate() {
                for channel in 0..CHANNELS_PER_TEXTURE {
                    if weightmap_usage.owner(texture, channel).is_some() {
                        continue;
                    }
                    let Some(allocation) = component
                        .weightmap_layer_allocations
                        .iter_mut()
                        .find(|a| !a.is_allocated())
                    else {
                        return Ok(());
                    };
                    textures.get_mut(texture)?.zero_channel(channel);
                    weightmap_usage.claim(texture, channel, key)?;
                    allocation.texture_index = texture_index as u8;
                    allocation.channel = channel as u8;
                    needed -= 1;
                    if needed == 0 {
                        debug!(x = key.x, y = key.y, "allocated layers in existing weightmaps");
                        return Ok(());
                    }
                }
            }
        }

        let size = component.component_size_verts();
        let mut total = component.weightmap_layer_allocations.len();
        let mut current_layer = 0;
        let mut new_textures = Vec::new();
        while total > 0 {
            let texture = weightmap_usage.find_or_create_capacity(total, key, || {
                textures.create(
                    format!("Weightmap_{}_{}", key.x, key.y),
                    TextureKind::Weightmap,
                    size,
                    size,
                )
            });
            new_textures.push(texture);
            let texture_index = (new_textures.len() - 1) as u8;

            for channel in 0..CHANNELS_PER_TEXTURE {
                if total == 0 {
                    break;
                }
                if weightmap_usage.owner(texture, channel).is_some() {
                    continue;
                }
                let allocation = &mut component.weightmap_layer_allocations[current_layer];
                if allocation.is_allocated() {
                    let old = component.weightmap_textures[allocation.texture_index as usize];
                    let old_channel = allocation.channel as usize;
                    textures.copy_channel(old, old_channel, texture, channel)?;
                    textures.get_mut(old)?.zero_channel(old_channel);
                    weightmap_usage.release(old, old_channel);
                } else {
                    textures.get_mut(texture)?.zero_channel(channel);
                }
                weightmap_usage.claim(texture, channel, key)?;
                allocation.texture_index = texture_index;
                allocation.channel = channel as u8;
                current_layer += 1;
                total -= 1;
            }
        }

        component.weightmap_textures = new_textures;
        let w = size as f32;
        component.weightmap_scale_bias = [1.0 / w, 1.0 / w, 0.5 / w, 0.5 / w];
        component.weightmap_subsection_offset = (component.subsection_size_quads + 1) as f32 / w;

        let layout = SubsectionLayout::new(component.num_subsections, component.subsection_size_quads);
        let region = MipUpdateRegion::whole(component.component_size_quads);
        for &texture_id in &component.weightmap_textures {
            let texture = textures.get_mut(texture_id)?;
            let info = texture_updates.info(texture_id, texture.num_mips());
            update_weightmap_mips(texture, layout, region, Some(info));
        }
        debug!(
            x = key.x,
            y = key.y,
            textures = component.weightmap_textures.len(),
            "reallocated weightmaps"
        );

        self.remove_invalid_weightmaps();
        Ok(())
    }

    /// Destroy weightmaps with no owned channel and compact every component's weightmap list.
    pub fn remove_invalid_weightmaps(&mut self) {
        let empty = self.weightmap_usage.remove_empty();
        if !empty.is_empty() {
            self.render.flush_rendering_commands();
        }
        for texture in empty {
            self.textures.remove(texture);
            self.texture_updates.forget(texture);
            debug!(texture = texture.0, "removed unused weightmap");
        }
        for component in self.components.values_mut() {
            compact_weightmaps(component);
        }
    }

    /// Rebuild the channel usage record from the components' allocation lists.
    ///
    /// Allocations for missing layers are deleted, texture indices past the end of
    /// a component's list are clamped, and a channel claimed by two components
    /// stays with the first one in grid order. Known layer combinations are then
    /// re-registered in the combination cache.
    pub fn fixup_weightmaps(&mut self) -> Result<()> {
        self.weightmap_usage.clear();
        let keys: Vec<ComponentKey> = self.components.keys().copied().collect();

        for key in keys {
            let invalid: Vec<Option<LayerInfoId>> = self
                .require_component(key)?
                .weightmap_layer_allocations
                .iter()
                .filter_map(|a| match a.layer {
                    None => Some(None),
                    Some(layer) if layer != LayerInfoId::VISIBILITY && !self.layers.contains(layer) => Some(Some(layer)),
                    Some(_) => None,
                })
                .collect();
            if !invalid.is_empty() {
                warn!(x = key.x, y = key.y, "fixed up deleted layer weightmap");
                for layer in invalid {
                    self.delete_component_layer(key, layer)?;
                }
            }

            let Self {
                components,
                weightmap_usage,
                ..
            } = self;
            let component = components
                .get_mut(&key)
                .ok_or(LandscapeError::MissingComponent(key.x, key.y))?;
            let num_textures = component.weightmap_textures.len();
            let mut fixed_index = false;
            let mut index = 0;
            while index < component.weightmap_layer_allocations.len() {
                let allocation = &mut component.weightmap_layer_allocations[index];
                if !allocation.is_allocated() {
                    index += 1;
                    continue;
                }
                if num_textures == 0 {
                    warn!(x = key.x, y = key.y, "dropped layer allocation without weightmap");
                    component.weightmap_layer_allocations.remove(index);
                    continue;
                }
                if allocation.texture_index as usize >= num_textures {
                    allocation.texture_index = (num_textures - 1) as u8;
                    fixed_index = true;
                }
                let texture = component.weightmap_textures[allocation.texture_index as usize];
                let channel = allocation.channel as usize;
                match weightmap_usage.owner(texture, channel) {
                    Some(owner) if owner != key => {
                        warn!(
                            x = key.x,
                            y = key.y,
                            texture = texture.0,
                            channel,
                            owner_x = owner.x,
                            owner_y = owner.y,
                            "fixed up shared weightmap channel"
                        );
                        component.weightmap_layer_allocations.remove(index);
                        continue;
                    }
                    _ => weightmap_usage.claim(texture, channel, key)?,
                }
                index += 1;
            }
            if fixed_index {
                warn!(x = key.x, y = key.y, "fixed up incorrect layer weightmap texture index");
            }
        }

        self.remove_invalid_weightmaps();
        self.register_cached_combinations();
        Ok(())
    }

    /// Put the combination instance each component already uses back into the cache.
    fn register_cached_combinations(&mut self) {
        let mut found = Vec::new();
        for component in self.components.values() {
            let Some(Some(instance)) = component.material_instances.first() else {
                continue;
            };
            let Some(MaterialParent::Instance(combination)) = self.materials.instance(*instance).map(|i| i.parent) else {
                continue;
            };
            let Some(MaterialParent::Material(material)) = self.materials.instance(combination).map(|i| i.parent) else {
                continue;
            };
            let Some(path) = self.materials.material(material).map(|m| m.path.as_str()) else {
                continue;
            };
            let key = layer_allocation_key(&component.weightmap_layer_allocations, &self.layers, path, false);
            found.push((key, combination));
        }
        for (key, combination) in found {
            self.materials.cache_combination(key, combination);
        }
    }
}

/// Drop weightmaps no allocation refers to, shifting later indices down.
fn compact_weightmaps(component: &mut Component) {
    let mut index = component.weightmap_textures.len();
    while index > 0 {
        index -= 1;
        let used = component
            .weightmap_layer_allocations
            .iter()
            .any(|a| a.is_allocated() && a.texture_index as usize == index);
        if used {
            continue;
        }
        component.weightmap_textures.remove(index);
        for allocation in component.weightmap_layer_allocations.iter_mut() {
            if allocation.is_allocated() && allocation.texture_index as usize > index {
                allocation.texture_index -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LandscapeConfig;
    use crate::layer::{LayerInfo, WeightmapLayerAllocation};
    use crate::types::IntPoint;

    fn proxy(nx: i32) -> Proxy {
        let config = LandscapeConfig::default().with_subsections(1, 7);
        let mut proxy = Proxy::new(config).unwrap();
        for x in 0..nx {
            proxy.add_component(IntPoint::new(x * 7, 0)).unwrap();
        }
        proxy
    }

    fn add_layers(proxy: &mut Proxy, key: ComponentKey, layers: &[LayerInfoId]) {
        let component = proxy.require_component_mut(key).unwrap();
        for layer in layers {
            component
                .weightmap_layer_allocations
                .push(WeightmapLayerAllocation::unallocated(*layer));
        }
        proxy.reallocate_weightmaps(key).unwrap();
    }

    #[test]
    fn test_fast_path_uses_free_channels() {
        let mut proxy = proxy(1);
        let key = IntPoint::new(0, 0);
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let rock = proxy.layers.register(LayerInfo::new("Rock"));

        add_layers(&mut proxy, key, &[grass]);
        let first = proxy.component(key).unwrap().weightmap_textures.clone();
        assert_eq!(first.len(), 1);

        add_layers(&mut proxy, key, &[rock]);
        let component = proxy.component(key).unwrap();
        assert_eq!(component.weightmap_textures, first);
        assert_eq!(component.weightmap_layer_allocations[1], WeightmapLayerAllocation::new(rock, 0, 1));
        assert_eq!(proxy.weightmap_usage.owner(first[0], 1), Some(key));
        assert_eq!(component.weightmap_scale_bias, [0.125, 0.125, 0.0625, 0.0625]);
    }

    #[test]
    fn test_neighbours_share_a_texture() {
        let mut proxy = proxy(2);
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        add_layers(&mut proxy, IntPoint::new(0, 0), &[grass]);
        add_layers(&mut proxy, IntPoint::new(1, 0), &[grass]);

        let a = proxy.component(IntPoint::new(0, 0)).unwrap();
        let b = proxy.component(IntPoint::new(1, 0)).unwrap();
        assert_eq!(a.weightmap_textures, b.weightmap_textures);
        assert_eq!(b.weightmap_layer_allocations[0].channel, 1);
        assert_eq!(proxy.weightmap_usage.len(), 1);
    }

    #[test]
    fn test_global_path_moves_existing_data() {
        let mut proxy = proxy(2);
        let a = IntPoint::new(0, 0);
        let b = IntPoint::new(1, 0);
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let rock = proxy.layers.register(LayerInfo::new("Rock"));
        let sand = proxy.layers.register(LayerInfo::new("Sand"));
        let snow = proxy.layers.register(LayerInfo::new("Snow"));

        add_layers(&mut proxy, a, &[grass]);
        let shared = proxy.component(a).unwrap().weightmap_textures[0];
        proxy.textures.get_mut(shared).unwrap().mip_mut(0)[3].r = 200;
        add_layers(&mut proxy, b, &[rock, sand, snow]);
        assert_eq!(proxy.weightmap_usage.free_channel_count(shared), 0);

        add_layers(&mut proxy, a, &[rock]);
        let component = proxy.component(a).unwrap();
        let moved = component.weightmap_textures[0];
        assert_ne!(moved, shared);
        assert_eq!(component.weightmap_layer_allocations[0], WeightmapLayerAllocation::new(grass, 0, 0));
        assert_eq!(component.weightmap_layer_allocations[1], WeightmapLayerAllocation::new(rock, 0, 1));
        assert_eq!(proxy.textures.get(moved).unwrap().mip(0)[3].r, 200);
        assert_eq!(proxy.textures.get(shared).unwrap().mip(0)[3].r, 0);
        assert_eq!(proxy.weightmap_usage.owner(shared, 0), None);
        assert_eq!(proxy.weightmap_usage.owner(shared, 1), Some(b));
    }

    #[test]
    fn test_remove_invalid_compacts_indices() {
        let mut proxy = proxy(1);
        let key = IntPoint::new(0, 0);
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let unused = proxy.textures.create("w0", TextureKind::Weightmap, 8, 8);
        let used = proxy.textures.create("w1", TextureKind::Weightmap, 8, 8);
        proxy.weightmap_usage.register(unused);
        proxy.weightmap_usage.claim(used, 2, key).unwrap();
        {
            let component = proxy.require_component_mut(key).unwrap();
            component.weightmap_textures = vec![unused, used];
            component.weightmap_layer_allocations = vec![WeightmapLayerAllocation::new(grass, 1, 2)];
        }

        proxy.remove_invalid_weightmaps();
        let component = proxy.component(key).unwrap();
        assert_eq!(component.weightmap_textures, vec![used]);
        assert_eq!(component.weightmap_layer_allocations[0].texture_index, 0);
        assert!(!proxy.textures.contains(unused));
        assert!(!proxy.weightmap_usage.contains(unused));
    }

    #[test]
    fn test_fixup_repairs_allocations() {
        let mut proxy = proxy(2);
        let a = IntPoint::new(0, 0);
        let b = IntPoint::new(1, 0);
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let rock = proxy.layers.register(LayerInfo::new("Rock"));
        let t = proxy.textures.create("w", TextureKind::Weightmap, 8, 8);
        {
            let component = proxy.require_component_mut(a).unwrap();
            component.weightmap_textures = vec![t];
            component.weightmap_layer_allocations = vec![
                WeightmapLayerAllocation::new(grass, 0, 0),
                WeightmapLayerAllocation { layer: None, texture_index: 0, channel: 3 },
            ];
        }
        {
            let component = proxy.require_component_mut(b).unwrap();
            component.weightmap_textures = vec![t];
            component.weightmap_layer_allocations = vec![
                WeightmapLayerAllocation::new(grass, 0, 0),
                WeightmapLayerAllocation::new(rock, 4, 1),
            ];
        }

        proxy.fixup_weightmaps().unwrap();
        let ca = proxy.component(a).unwrap();
        assert_eq!(ca.weightmap_layer_allocations, vec![WeightmapLayerAllocation::new(grass, 0, 0)]);
        let cb = proxy.component(b).unwrap();
        assert_eq!(cb.weightmap_layer_allocations, vec![WeightmapLayerAllocation::new(rock, 0, 1)]);
        assert_eq!(proxy.weightmap_usage.owner(t, 0), Some(a));
        assert_eq!(proxy.weightmap_usage.owner(t, 1), Some(b));
        assert_eq!(proxy.weightmap_usage.owner(t, 3), None);
    }
}
