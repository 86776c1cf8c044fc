//! Bulk import: build the whole component grid from full-resolution arrays.
//!
//! Heights are packed into heightmaps shared by blocks of components; layer
//! weights are sliced per component, optionally knocked out by the layers above
//! them, normalized and packed into shared weightmap channels.

mod render_target;
mod weights;

pub use render_target::{RenderTarget, RenderTargetFormat, RenderTargetPixels};
pub use weights::{AlphamapType, ComponentWeights};

use crate::allocator::CHANNELS_PER_TEXTURE;
use crate::component::{local_height, pack_normal, Component, ComponentKey};
use crate::error::{LandscapeError, Result};
use crate::layer::{LayerInfoId, WeightmapLayerAllocation};
use crate::mips::{update_heightmap_box_mips, update_heightmap_mips, update_weightmap_mips, MipUpdateRegion, SubsectionLayout};
use crate::proxy::Proxy;
use crate::texture::{TextureId, TextureKind};
use crate::types::{ceil_log2, Color, IntPoint, IntRect};
use glam::Vec3;
use tracing::{debug, info};

/// Alpha map of one layer over the whole import area, row-major. Empty means unpainted.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportLayer {
    pub layer: LayerInfoId,
    pub data: Vec<u8>,
}

/// Everything a bulk import needs.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub guid: String,
    /// Inclusive vertex extent of the new landscape.
    pub extent: IntRect,
    pub num_subsections: i32,
    pub subsection_size_quads: i32,
    /// One height per vertex of `extent`, row-major.
    pub heights: Vec<u16>,
    /// Bottom layer first.
    pub layers: Vec<ImportLayer>,
    pub alphamap_type: AlphamapType,
}

impl ImportRequest {
    pub fn new(extent: IntRect, num_subsections: i32, subsection_size_quads: i32, heights: Vec<u16>) -> Self {
        Self {
            guid: String::new(),
            extent,
            num_subsections,
            subsection_size_quads,
            heights,
            layers: Vec::new(),
            alphamap_type: AlphamapType::Additive,
        }
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = guid.into();
        self
    }

    pub fn with_layer(mut self, layer: LayerInfoId, data: Vec<u8>) -> Self {
        self.layers.push(ImportLayer { layer, data });
        self
    }

    pub fn with_alphamap_type(mut self, alphamap_type: AlphamapType) -> Self {
        self.alphamap_type = alphamap_type;
        self
    }
}

/// Components per heightmap side, capped by the texture size limit and so that
/// each component's lowest mip stays resident.
pub fn components_per_heightmap(max_texture_size: i32, min_resident_mips: i32, component_size_verts: i32) -> i32 {
    let resident = 1 << (min_resident_mips - 2).clamp(0, 30);
    (max_texture_size / component_size_verts).min(resident)
}

/// Every vertex of every subsection as `(component x, component y, texel x, texel y)`.
///
/// Subsection border vertices are visited once per subsection that stores them.
fn subsection_vertices(num_subsections: i32, subsection_size_quads: i32) -> impl Iterator<Item = (i32, i32, i32, i32)> {
    let s = subsection_size_quads;
    let n = num_subsections;
    (0..n).flat_map(move |sub_y| {
        (0..n).flat_map(move |sub_x| {
            (0..=s).flat_map(move |y| {
                (0..=s).map(move |x| (s * sub_x + x, s * sub_y + y, (s + 1) * sub_x + x, (s + 1) * sub_y + y))
            })
        })
    })
}

/// One heightmap texture shared by a block of components.
struct HeightmapBlock {
    texture: TextureId,
    size_x: i32,
    size_y: i32,
}

impl Proxy {
    /// Build every component, texture, allocation, collision and material from `request`.
    ///
    /// The proxy must have no components. Nothing is mutated when the request
    /// is rejected.
    pub fn import(&mut self, request: &ImportRequest) -> Result<()> {
        if !self.components.is_empty() {
            return Err(LandscapeError::NotEmpty(self.components.len()));
        }
        let config = self.config.clone().with_subsections(request.num_subsections, request.subsection_size_quads);
        config.validate()?;

        let extent = request.extent;
        let verts_x = extent.width();
        let verts_y = extent.height();
        let cq = config.component_size_quads;
        let csv = config.component_size_verts();
        let num_x = (verts_x - 1) / cq;
        let num_y = (verts_y - 1) / cq;
        if num_x <= 0 || num_y <= 0 {
            return Err(LandscapeError::InvalidLayout(format!(
                "{}x{} vertices hold no {}-quad component",
                verts_x, verts_y, cq
            )));
        }
        let vertex_count = (verts_x * verts_y) as usize;
        if request.heights.len() != vertex_count {
            return Err(LandscapeError::InvalidLayout(format!(
                "expected {} heights, got {}",
                vertex_count,
                request.heights.len()
            )));
        }
        for layer in &request.layers {
            if !self.layers.contains(layer.layer) {
                return Err(LandscapeError::MissingLayerInfo(format!("#{}", layer.layer.0)));
            }
            if !layer.data.is_empty() && layer.data.len() != vertex_count {
                return Err(LandscapeError::InvalidLayout(format!(
                    "layer #{} has {} weights, expected {}",
                    layer.layer.0,
                    layer.data.len(),
                    vertex_count
                )));
            }
        }
        if !request.layers.is_empty() && (csv as u32).count_ones() != 1 {
            return Err(LandscapeError::InvalidLayout(format!(
                "weightmap size {} is not a power of two",
                csv
            )));
        }
        let per_heightmap = components_per_heightmap(
            config.max_heightmap_texture_size,
            config.min_texture_resident_mip_count,
            csv,
        );
        if per_heightmap <= 0 {
            return Err(LandscapeError::InvalidLayout(format!(
                "a {}-texel component does not fit a {}-texel heightmap",
                csv, config.max_heightmap_texture_size
            )));
        }

        self.config = config;
        self.guid = request.guid.clone();
        let height_at = |x: i32, y: i32| request.heights[(x + y * verts_x) as usize];

        // Heightmaps.
        let num_heightmaps_x = (num_x + per_heightmap - 1) / per_heightmap;
        let num_heightmaps_y = (num_y + per_heightmap - 1) / per_heightmap;
        let final_x = num_x - (num_heightmaps_x - 1) * per_heightmap;
        let final_y = num_y - (num_heightmaps_y - 1) * per_heightmap;
        let mut heightmaps = Vec::new();
        for hy in 0..num_heightmaps_y {
            for hx in 0..num_heightmaps_x {
                let cx = if hx == num_heightmaps_x - 1 { final_x } else { per_heightmap };
                let cy = if hy == num_heightmaps_y - 1 { final_y } else { per_heightmap };
                let size_x = 1 << ceil_log2((cx * csv) as u32);
                let size_y = 1 << ceil_log2((cy * csv) as u32);
                let texture = self.textures.create(
                    format!("Heightmap_{}_{}", hx, hy),
                    TextureKind::Heightmap,
                    size_x,
                    size_y,
                );
                heightmaps.push(HeightmapBlock { texture, size_x, size_y });
            }
        }

        // Vertex normals from the two triangles of every quad.
        let scale = Vec3::from(self.config.draw_scale);
        let mut normals = vec![Vec3::ZERO; vertex_count];
        for qy in 0..verts_y - 1 {
            for qx in 0..verts_x - 1 {
                let vertex = |dx: i32, dy: i32| {
                    Vec3::new(dx as f32, dy as f32, local_height(height_at(qx + dx, qy + dy))) * scale
                };
                let (v00, v01, v10, v11) = (vertex(0, 0), vertex(0, 1), vertex(1, 0), vertex(1, 1));
                let face1 = (v00 - v10).cross(v10 - v11).normalize_or_zero();
                let face2 = (v11 - v01).cross(v01 - v00).normalize_or_zero();
                normals[(qx + 1 + qy * verts_x) as usize] += face1;
                normals[(qx + (qy + 1) * verts_x) as usize] += face2;
                normals[(qx + qy * verts_x) as usize] += face1 + face2;
                normals[(qx + 1 + (qy + 1) * verts_x) as usize] += face1 + face2;
            }
        }

        let s = self.config.subsection_size_quads;
        let n = self.config.num_subsections;
        let mut keys = Vec::with_capacity((num_x * num_y) as usize);
        let mut weightmaps: Vec<TextureId> = Vec::new();
        for ky in 0..num_y {
            let hy = ky / per_heightmap;
            let offset_y = (ky - per_heightmap * hy) * csv;
            for kx in 0..num_x {
                let hx = kx / per_heightmap;
                let offset_x = (kx - per_heightmap * hx) * csv;
                let block = &heightmaps[(hx + hy * num_heightmaps_x) as usize];
                let base = IntPoint::new(extent.x1 + kx * cq, extent.y1 + ky * cq);
                let key = self.key_for_section_base(base);

                let mut component = Component::new(base, &self.config, block.texture);
                component.heightmap_scale_bias = [
                    1.0 / block.size_x as f32,
                    1.0 / block.size_y as f32,
                    offset_x as f32 / block.size_x as f32,
                    offset_y as f32 / block.size_y as f32,
                ];

                let weights = self.component_import_weights(request, base, verts_x);
                debug!(x = key.x, y = key.y, layers = weights.len(), "component weightmap channels");
                let channels = self.pack_import_weightmaps(&mut component, key, &weights, &mut weightmaps)?;

                let heightmap = self.textures.get_mut(block.texture)?;
                let stride = block.size_x;
                for (comp_x, comp_y, tex_x, tex_y) in subsection_vertices(n, s) {
                    let vx = base.x - extent.x1 + comp_x;
                    let vy = base.y - extent.y1 + comp_y;
                    let normal = normals[(vx + vy * verts_x) as usize].normalize_or_zero();
                    heightmap.mip_mut(0)[((offset_x + tex_x) + (offset_y + tex_y) * stride) as usize] =
                        Color::from_height(height_at(vx, vy), pack_normal(normal.x), pack_normal(normal.y));
                }
                for (layer, &(texture, channel)) in channels.iter().enumerate() {
                    let mip = self.textures.get_mut(texture)?.mip_mut(0);
                    for (comp_x, comp_y, tex_x, tex_y) in subsection_vertices(n, s) {
                        let value = weights.weights[layer][(comp_x + comp_y * (cq + 1)) as usize];
                        mip[(tex_x + tex_y * csv) as usize].set_channel(channel, value);
                    }
                }

                self.components.insert(key, component);
                keys.push((kx, ky, key));
            }
        }

        let layout = SubsectionLayout::new(n, s);
        for &texture_id in &weightmaps {
            let texture = self.textures.get_mut(texture_id)?;
            let info = self.texture_updates.info(texture_id, texture.num_mips());
            info.add_mip_update_region(0, 0, 0, csv - 1, csv - 1);
            update_weightmap_mips(texture, layout, MipUpdateRegion::whole(cq), Some(info));
        }

        for &(kx, ky, key) in &keys {
            {
                let Self {
                    components,
                    textures,
                    texture_updates,
                    ..
                } = self;
                let component = components
                    .get(&key)
                    .ok_or(LandscapeError::MissingComponent(key.x, key.y))?;
                let texture = textures.get_mut(component.heightmap)?;
                let offset = component.heightmap_offset((texture.size_x, texture.size_y), 0);
                let info = texture_updates.info(component.heightmap, texture.num_mips());
                info.add_mip_update_region(0, offset.0, offset.1, offset.0 + csv - 1, offset.1 + csv - 1);
                let region = MipUpdateRegion::whole(cq).with_padding(kx == num_x - 1, ky == num_y - 1);
                update_heightmap_mips(texture, offset, layout, region, Some(info));
            }
            self.update_cached_bounds(key)?;
            self.update_collision_height_data(key, IntRect::new(0, 0, cq, cq), true)?;
            self.update_collision_layer_data(key, IntRect::new(0, 0, cq, cq))?;
        }

        for block in &heightmaps {
            let texture = self.textures.get_mut(block.texture)?;
            let info = self.texture_updates.info(block.texture, texture.num_mips());
            update_heightmap_box_mips(texture, layout, Some(info));
        }

        self.update_all_material_instances()?;
        self.recreate_collision_components()?;
        info!(
            components = keys.len(),
            heightmaps = heightmaps.len(),
            weightmaps = weightmaps.len(),
            "imported landscape"
        );
        Ok(())
    }

    /// Slice, knock out and normalize the import layers for the component at `base`.
    fn component_import_weights(&self, request: &ImportRequest, base: IntPoint, verts_x: i32) -> ComponentWeights {
        let cq = self.config.component_size_quads;
        let mut weights = ComponentWeights::default();
        for layer in &request.layers {
            let mut values = vec![0u8; ((cq + 1) * (cq + 1)) as usize];
            if !layer.data.is_empty() {
                for y in 0..=cq {
                    let start = ((y + base.y - request.extent.y1) * verts_x + (base.x - request.extent.x1)) as usize;
                    let row = (y * (cq + 1)) as usize;
                    values[row..row + (cq + 1) as usize].copy_from_slice(&layer.data[start..start + (cq + 1) as usize]);
                }
            }
            let no_blend = !self.layers.is_weight_blended(layer.layer);
            weights.push(layer.layer, no_blend, values);
        }
        weights.remove_empty();
        if request.alphamap_type == AlphamapType::Layered {
            weights.apply_knockout();
        }
        weights.normalize();
        weights
    }

    /// Give every layer of `weights` a weightmap channel, sharing textures with nearby components.
    ///
    /// Returns the `(texture, channel)` of each layer in order.
    fn pack_import_weightmaps(
        &mut self,
        component: &mut Component,
        key: ComponentKey,
        weights: &ComponentWeights,
        created: &mut Vec<TextureId>,
    ) -> Result<Vec<(TextureId, usize)>> {
        let csv = component.component_size_verts();
        let size = csv as f32;
        component.weightmap_scale_bias = [1.0 / size, 1.0 / size, 0.5 / size, 0.5 / size];
        component.weightmap_subsection_offset = (component.subsection_size_quads + 1) as f32 / size;

        let mut channels = Vec::with_capacity(weights.len());
        let mut layer_index = 0;
        while layer_index < weights.len() {
            let remaining = weights.len() - layer_index;
            let shared = if remaining < CHANNELS_PER_TEXTURE {
                self.weightmap_usage.find_nearest(remaining, key)
            } else {
                None
            };
            let (texture, take) = match shared {
                Some(texture) => (texture, remaining),
                None => {
                    let texture = self.textures.create(
                        format!("Weightmap_{}_{}", key.x, key.y),
                        TextureKind::Weightmap,
                        csv,
                        csv,
                    );
                    self.weightmap_usage.register(texture);
                    created.push(texture);
                    (texture, remaining.min(CHANNELS_PER_TEXTURE))
                }
            };
            let texture_index = component.weightmap_textures.len() as u8;
            for _ in 0..take {
                let channel = self
                    .weightmap_usage
                    .usage(texture)
                    .and_then(|u| u.first_free())
                    .ok_or(LandscapeError::ChannelConflict {
                        texture: texture.0,
                        channel: 0,
                    })?;
                self.weightmap_usage.claim(texture, channel, key)?;
                component.weightmap_layer_allocations.push(WeightmapLayerAllocation::new(
                    weights.layers[layer_index],
                    texture_index,
                    channel as u8,
                ));
                channels.push((texture, channel));
                layer_index += 1;
            }
            component.weightmap_textures.push(texture);
        }
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LandscapeConfig;
    use crate::layer::LayerInfo;

    fn proxy() -> Proxy {
        Proxy::new(LandscapeConfig::default()).unwrap()
    }

    #[test]
    fn test_components_per_heightmap() {
        assert_eq!(components_per_heightmap(512, 7, 64), 8);
        assert_eq!(components_per_heightmap(512, 3, 8), 2);
        assert_eq!(components_per_heightmap(512, 7, 1024), 0);
    }

    #[test]
    fn test_single_layer_import() {
        let mut proxy = proxy();
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let request = ImportRequest::new(IntRect::new(0, 0, 14, 14), 1, 7, vec![32768; 225])
            .with_guid("terrain")
            .with_layer(grass, vec![255; 225]);
        proxy.import(&request).unwrap();

        assert_eq!(proxy.components.len(), 4);
        assert_eq!(proxy.weightmap_usage.len(), 1);
        let (texture, usage) = proxy.weightmap_usage.iter().next().unwrap();
        assert_eq!(usage.free_channel_count(), 0);

        let mut channels: Vec<u8> = proxy
            .components
            .values()
            .map(|c| {
                assert_eq!(c.weightmap_textures, vec![texture]);
                assert_eq!(c.weightmap_layer_allocations.len(), 1);
                c.weightmap_layer_allocations[0].channel
            })
            .collect();
        channels.sort();
        assert_eq!(channels, vec![0, 1, 2, 3]);

        for collision in proxy.collisions.values() {
            assert_eq!(collision.component_layer_infos, vec![grass]);
            assert!(collision.dominant_layer_data.iter().all(|&d| d == 0));
        }
        assert_eq!(proxy.guid, "terrain");
    }

    #[test]
    fn test_heightmap_shared_by_components() {
        let mut proxy = proxy();
        let heights: Vec<u16> = (0..225).map(|i| 32768 + (i % 15) as u16 * 64).collect();
        let request = ImportRequest::new(IntRect::new(0, 0, 14, 14), 1, 7, heights.clone());
        proxy.import(&request).unwrap();

        let heightmaps: std::collections::BTreeSet<_> = proxy.components.values().map(|c| c.heightmap).collect();
        assert_eq!(heightmaps.len(), 1);
        let texture = proxy.textures.get(*heightmaps.iter().next().unwrap()).unwrap();
        assert_eq!((texture.size_x, texture.size_y), (16, 16));
        assert_eq!(proxy.get_height_data(0, 0, 14, 14).unwrap(), heights);
        let right = proxy.component(IntPoint::new(1, 0)).unwrap();
        assert_eq!(right.heightmap_scale_bias[2], 0.5);
    }

    #[test]
    fn test_layered_import_knocks_out_lower_layers() {
        let mut proxy = proxy();
        let a = proxy.layers.register(LayerInfo::new("A"));
        let b = proxy.layers.register(LayerInfo::new("B"));
        let request = ImportRequest::new(IntRect::new(0, 0, 7, 7), 1, 7, vec![32768; 64])
            .with_layer(a, vec![200; 64])
            .with_layer(b, vec![100; 64])
            .with_alphamap_type(AlphamapType::Layered);
        proxy.import(&request).unwrap();

        let wa = proxy.get_weight_data(a, 0, 0, 7, 7).unwrap();
        let wb = proxy.get_weight_data(b, 0, 0, 7, 7).unwrap();
        assert!(wa.iter().all(|&w| w == 140));
        assert!(wb.iter().all(|&w| w == 115));
    }

    #[test]
    fn test_zero_layers_are_dropped_per_component() {
        let mut proxy = proxy();
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let rock = proxy.layers.register(LayerInfo::new("Rock"));
        let mut rock_data = vec![0u8; 225];
        for y in 0..=14 {
            rock_data[14 + y * 15] = 255;
        }
        let request = ImportRequest::new(IntRect::new(0, 0, 14, 14), 1, 7, vec![32768; 225])
            .with_layer(grass, vec![255; 225])
            .with_layer(rock, rock_data);
        proxy.import(&request).unwrap();

        assert!(proxy.component(IntPoint::new(0, 0)).unwrap().allocation_index(rock).is_none());
        assert!(proxy.component(IntPoint::new(1, 0)).unwrap().allocation_index(rock).is_some());
    }

    #[test]
    fn test_import_rejects_bad_requests() {
        let mut proxy = proxy();
        let bad_len = ImportRequest::new(IntRect::new(0, 0, 7, 7), 1, 7, vec![0; 10]);
        assert!(matches!(proxy.import(&bad_len), Err(LandscapeError::InvalidLayout(_))));
        let missing = ImportRequest::new(IntRect::new(0, 0, 7, 7), 1, 7, vec![0; 64]).with_layer(LayerInfoId(9), vec![]);
        assert!(matches!(proxy.import(&missing), Err(LandscapeError::MissingLayerInfo(_))));
        assert!(proxy.components.is_empty());

        proxy.import(&ImportRequest::new(IntRect::new(0, 0, 7, 7), 1, 7, vec![0; 64])).unwrap();
        let again = ImportRequest::new(IntRect::new(0, 0, 7, 7), 1, 7, vec![0; 64]);
        assert!(matches!(proxy.import(&again), Err(LandscapeError::NotEmpty(1))));
    }
}
