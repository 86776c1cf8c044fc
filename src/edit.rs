//! Region-based reads and writes of height and layer weight data.
//!
//! Every write lands in mip 0 of the affected textures, including the duplicated
//! texels on subsection and component borders, and then re-enters mip
//! generation, collision, bounds and materials for the components it touched.
//! Regions are inclusive and given in landscape vertex coordinates.

use crate::component::{local_height, pack_normal, Component, ComponentDataInterface, ComponentKey, MID_HEIGHT};
use crate::error::{LandscapeError, Result};
use crate::layer::{LayerInfoId, WeightmapLayerAllocation};
use crate::mips::{update_heightmap_box_mips, update_heightmap_mips, update_weightmap_mips, MipUpdateRegion, SubsectionLayout};
use crate::proxy::Proxy;
use crate::texture::{TextureId, TextureKind};
use crate::types::{BoundingBox, Color, IntPoint, IntRect};
use glam::Vec3;
use tracing::{debug, info};

/// Texel columns (or rows) of a component block that store component vertex `v`.
///
/// A vertex on a subsection border is stored once in each subsection.
fn vertex_texels(v: i32, subsection_size_quads: i32, num_subsections: i32) -> impl Iterator<Item = i32> {
    let s = subsection_size_quads;
    let first = (v - 1).max(0) / s;
    let last = (v / s).min(num_subsections - 1);
    (first..=last).map(move |sub| sub * (s + 1) + v - sub * s)
}

/// Intersection of a landscape region with a component, in component-local vertices.
fn local_region(component: &Component, region: IntRect) -> Option<IntRect> {
    let (cx1, cy1, cx2, cy2) = component.extent();
    let local = IntRect::new(
        region.x1.max(cx1) - cx1,
        region.y1.max(cy1) - cy1,
        region.x2.min(cx2) - cx1,
        region.y2.min(cy2) - cy1,
    );
    (!local.is_empty()).then_some(local)
}

fn checked_region(x1: i32, y1: i32, x2: i32, y2: i32, len: Option<usize>) -> Result<IntRect> {
    let region = IntRect::new(x1, y1, x2, y2);
    if region.is_empty() {
        return Err(LandscapeError::InvalidLayout(format!(
            "empty region ({}, {})..({}, {})",
            x1, y1, x2, y2
        )));
    }
    if let Some(len) = len {
        let expected = (region.width() * region.height()) as usize;
        if len != expected {
            return Err(LandscapeError::InvalidLayout(format!(
                "region holds {} values, got {}",
                expected, len
            )));
        }
    }
    Ok(region)
}

/// Scale `others` so they sum to `255 - new_weight`, keeping their proportions.
///
/// The rounding remainder goes to the largest entry. Entries that are all zero
/// stay zero.
fn rebalance(new_weight: u8, others: &mut [u8]) {
    let sum: u32 = others.iter().map(|&w| w as u32).sum();
    if sum == 0 {
        return;
    }
    let target = 255 - new_weight as u32;
    let largest = others
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
        .map(|(i, _)| i);
    let mut assigned = 0;
    for w in others.iter_mut() {
        let scaled = *w as u32 * target / sum;
        assigned += scaled;
        *w = scaled as u8;
    }
    if let Some(i) = largest {
        others[i] = (others[i] as u32 + target - assigned) as u8;
    }
}

/// A painted layer of one component resolved to its texture channel.
#[derive(Clone, Copy)]
struct ChannelRef {
    layer: LayerInfoId,
    texture: TextureId,
    channel: usize,
    blended: bool,
}

impl Proxy {
    /// Add a flat component at `section_base` and build its collision and materials.
    pub fn add_component(&mut self, section_base: IntPoint) -> Result<ComponentKey> {
        let cq = self.config.component_size_quads;
        if section_base.x.rem_euclid(cq) != 0 || section_base.y.rem_euclid(cq) != 0 {
            return Err(LandscapeError::InvalidLayout(format!(
                "section base ({}, {}) is not a multiple of {}",
                section_base.x, section_base.y, cq
            )));
        }
        let key = self.key_for_section_base(section_base);
        if self.components.contains_key(&key) {
            return Err(LandscapeError::InvalidLayout(format!(
                "component ({}, {}) already exists",
                key.x, key.y
            )));
        }

        let csv = self.config.component_size_verts();
        let size = (csv as u32).next_power_of_two() as i32;
        let heightmap = self.textures.create(
            format!("Heightmap_{}_{}", key.x, key.y),
            TextureKind::Heightmap,
            size,
            size,
        );
        let component = Component::new(section_base, &self.config, heightmap);
        self.components.insert(key, component);

        let flat = vec![Color::from_height(MID_HEIGHT, 128, 128); (csv * csv) as usize];
        self.init_heightmap_data(key, &flat, true)?;
        self.update_material_instances(key)?;
        debug!(x = key.x, y = key.y, "added component");
        Ok(key)
    }

    /// Replace a component's heightmap with `heights`, laid out as its texel block.
    ///
    /// The heightmap is rewritten in place when no other component shares it;
    /// otherwise the component gets a texture of its own.
    pub fn init_heightmap_data(&mut self, key: ComponentKey, heights: &[Color], update_collision: bool) -> Result<()> {
        let Self {
            components,
            textures,
            texture_updates,
            render,
            ..
        } = self;
        let old = components
            .get(&key)
            .ok_or(LandscapeError::MissingComponent(key.x, key.y))?
            .heightmap;
        let shared = components.values().filter(|c| c.heightmap == old).count() > 1;
        let component = components
            .get_mut(&key)
            .ok_or(LandscapeError::MissingComponent(key.x, key.y))?;

        let csv = component.component_size_verts();
        if heights.len() != (csv * csv) as usize {
            return Err(LandscapeError::InvalidLayout(format!(
                "component heightmap needs {} texels, got {}",
                csv * csv,
                heights.len()
            )));
        }
        let size = (csv as u32).next_power_of_two() as i32;
        let reuse = !shared
            && textures
                .get(old)
                .map(|t| t.size_x == size && t.size_y == size)
                .unwrap_or(false);
        let texture_id = if reuse {
            old
        } else {
            textures.create(
                format!("Heightmap_{}_{}", key.x, key.y),
                TextureKind::Heightmap,
                size,
                size,
            )
        };
        if !reuse && !shared && textures.contains(old) {
            render.flush_rendering_commands();
            textures.remove(old);
            texture_updates.forget(old);
        }

        let texture = textures.get_mut(texture_id)?;
        for mip in texture.mips.iter_mut() {
            mip.fill(Color::BLACK);
        }
        let mip0 = texture.mip_mut(0);
        for (y, row) in heights.chunks(csv as usize).enumerate() {
            let start = y * size as usize;
            mip0[start..start + row.len()].copy_from_slice(row);
        }

        component.heightmap = texture_id;
        component.heightmap_scale_bias = [1.0 / size as f32, 1.0 / size as f32, 0.0, 0.0];
        component.grass_data.outdated = true;

        let layout = SubsectionLayout::new(component.num_subsections, component.subsection_size_quads);
        let info = texture_updates.info(texture_id, texture.num_mips());
        info.add_mip_update_region(0, 0, 0, csv - 1, csv - 1);
        update_heightmap_mips(
            texture,
            (0, 0),
            layout,
            MipUpdateRegion::whole(component.component_size_quads),
            Some(&mut *info),
        );
        update_heightmap_box_mips(texture, layout, Some(info));

        let cq = component.component_size_quads;
        self.update_cached_bounds(key)?;
        if update_collision {
            self.update_collision_height_data(key, IntRect::new(0, 0, cq, cq), true)?;
        }
        Ok(())
    }

    /// Replace a component's layers with `layers`, one weight array per layer laid out as its texel block.
    pub fn init_weightmap_data(&mut self, key: ComponentKey, layers: &[LayerInfoId], data: &[Vec<u8>]) -> Result<()> {
        let component = self.require_component(key)?;
        let csv = component.component_size_verts();
        let cq = component.component_size_quads;
        if layers.is_empty() || layers.len() != data.len() {
            return Err(LandscapeError::InvalidLayout(format!(
                "{} layers with {} weight arrays",
                layers.len(),
                data.len()
            )));
        }
        if let Some(bad) = data.iter().find(|d| d.len() != (csv * csv) as usize) {
            return Err(LandscapeError::InvalidLayout(format!(
                "component weightmap needs {} texels, got {}",
                csv * csv,
                bad.len()
            )));
        }

        let old: Vec<(TextureId, usize)> = component
            .weightmap_layer_allocations
            .iter()
            .filter(|a| a.is_allocated())
            .filter_map(|a| Some((*component.weightmap_textures.get(a.texture_index as usize)?, a.channel as usize)))
            .collect();
        for (texture, channel) in old {
            if let Ok(t) = self.textures.get_mut(texture) {
                t.zero_channel(channel);
            }
            self.weightmap_usage.release(texture, channel);
        }
        {
            let component = self.require_component_mut(key)?;
            component.weightmap_layer_allocations.clear();
            component.weightmap_textures.clear();
        }
        self.remove_invalid_weightmaps();

        self.require_component_mut(key)?.weightmap_layer_allocations =
            layers.iter().map(|l| WeightmapLayerAllocation::unallocated(*l)).collect();
        self.reallocate_weightmaps(key)?;

        let Self {
            components,
            textures,
            texture_updates,
            ..
        } = self;
        let component = components
            .get_mut(&key)
            .ok_or(LandscapeError::MissingComponent(key.x, key.y))?;
        for (allocation, weights) in component.weightmap_layer_allocations.iter().zip(data) {
            let texture_id = component.weightmap_textures[allocation.texture_index as usize];
            let texture = textures.get_mut(texture_id)?;
            for (texel, w) in texture.mip_mut(0).iter_mut().zip(weights) {
                texel.set_channel(allocation.channel as usize, *w);
            }
        }
        let layout = SubsectionLayout::new(component.num_subsections, component.subsection_size_quads);
        for &texture_id in &component.weightmap_textures {
            let texture = textures.get_mut(texture_id)?;
            let info = texture_updates.info(texture_id, texture.num_mips());
            info.add_mip_update_region(0, 0, 0, csv - 1, csv - 1);
            update_weightmap_mips(texture, layout, MipUpdateRegion::whole(cq), Some(info));
        }
        component.material_instances = vec![None];
        component.lod_index_to_material_index = vec![0];

        self.update_collision_layer_data(key, IntRect::new(0, 0, cq, cq))
    }

    /// Heights of every vertex in the region, row-major. Vertices with no component read as 0.
    pub fn get_height_data(&self, x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Vec<u16>> {
        let region = checked_region(x1, y1, x2, y2, None)?;
        let width = region.width();
        let mut out = vec![0u16; (width * region.height()) as usize];
        for key in self.components_in_region(region, true) {
            let component = self.require_component(key)?;
            let Some(local) = local_region(component, region) else {
                continue;
            };
            let cdi = ComponentDataInterface::new(component, &self.textures, 0)?;
            let base = component.section_base;
            for ly in local.y1..=local.y2 {
                for lx in local.x1..=local.x2 {
                    let index = (base.x + lx - x1) + (base.y + ly - y1) * width;
                    out[index as usize] = cdi.height(lx, ly);
                }
            }
        }
        Ok(out)
    }

    /// Write heights for the region, row-major, and bring every derived view up to date.
    ///
    /// With `update_normals`, normals are recomputed for the region grown by one
    /// vertex, since the faces around its border changed too.
    pub fn set_height_data(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, data: &[u16], update_normals: bool) -> Result<()> {
        let region = checked_region(x1, y1, x2, y2, Some(data.len()))?;
        let width = region.width();
        for key in self.components_in_region(region, true) {
            self.write_heightmap(key, region, |x, y, texel| {
                texel.set_height(data[((x - x1) + (y - y1) * width) as usize]);
            })?;
        }

        let touched = if update_normals {
            self.update_normals(region)?
        } else {
            region
        };

        let mut min_z = f32::MAX;
        let mut max_z = f32::MIN;
        for key in self.components_in_region(touched, true) {
            self.update_after_height_change(key, touched)?;
            let b = self.require_component(key)?.cached_local_box;
            min_z = min_z.min(b.min[2]);
            max_z = max_z.max(b.max[2]);
        }
        if min_z <= max_z {
            let world_box = BoundingBox::new(
                self.local_to_world([touched.x1 as f32, touched.y1 as f32, min_z]),
                self.local_to_world([touched.x2 as f32, touched.y2 as f32, max_z]),
            );
            self.foliage.snap_instances(&world_box);
        }
        debug!(x1, y1, x2, y2, "set height data");
        Ok(())
    }

    /// Call `f` on every mip 0 heightmap texel storing a vertex of `region` in one component.
    fn write_heightmap<F>(&mut self, key: ComponentKey, region: IntRect, mut f: F) -> Result<()>
    where
        F: FnMut(i32, i32, &mut Color),
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
        let Some(local) = local_region(component, region) else {
            return Ok(());
        };
        let texture = textures.get_mut(component.heightmap)?;
        let (ox, oy) = component.heightmap_offset((texture.size_x, texture.size_y), 0);
        let stride = texture.size_x;
        let s = component.subsection_size_quads;
        let n = component.num_subsections;
        let base = component.section_base;

        let mut bounds = IntRect::empty();
        let mip = texture.mip_mut(0);
        for ly in local.y1..=local.y2 {
            for lx in local.x1..=local.x2 {
                for ty in vertex_texels(ly, s, n) {
                    for tx in vertex_texels(lx, s, n) {
                        let (px, py) = (ox + tx, oy + ty);
                        f(base.x + lx, base.y + ly, &mut mip[(px + py * stride) as usize]);
                        bounds.include(px, py);
                    }
                }
            }
        }
        let num_mips = texture.num_mips();
        texture_updates
            .info(component.heightmap, num_mips)
            .add_mip_update_region(0, bounds.x1, bounds.y1, bounds.x2, bounds.y2);
        Ok(())
    }

    /// Recompute vertex normals for `region` grown by one vertex. Returns the rewritten region.
    fn update_normals(&mut self, region: IntRect) -> Result<IntRect> {
        let extent = self.get_landscape_extent().ok_or(LandscapeError::MissingExtent)?;
        let grow = |r: IntRect| {
            IntRect::new(
                (r.x1 - 1).max(extent.x1),
                (r.y1 - 1).max(extent.y1),
                (r.x2 + 1).min(extent.x2),
                (r.y2 + 1).min(extent.y2),
            )
        };
        let normal_region = grow(region);
        let sample = grow(normal_region);
        let heights = self.get_height_data(sample.x1, sample.y1, sample.x2, sample.y2)?;
        let w = sample.width();
        let h = sample.height();
        let scale = Vec3::from(self.config.draw_scale);
        let vertex = |x: i32, y: i32| {
            Vec3::new(x as f32, y as f32, local_height(heights[(x + y * w) as usize])) * scale
        };

        let mut normals = vec![Vec3::ZERO; (w * h) as usize];
        for y in 0..h - 1 {
            for x in 0..w - 1 {
                let v00 = vertex(x, y);
                let v10 = vertex(x + 1, y);
                let v01 = vertex(x, y + 1);
                let v11 = vertex(x + 1, y + 1);
                let face1 = (v00 - v10).cross(v10 - v11).normalize_or_zero();
                let face2 = (v11 - v01).cross(v01 - v00).normalize_or_zero();
                normals[((x + 1) + y * w) as usize] += face1;
                normals[(x + (y + 1) * w) as usize] += face2;
                normals[(x + y * w) as usize] += face1 + face2;
                normals[((x + 1) + (y + 1) * w) as usize] += face1 + face2;
            }
        }

        for key in self.components_in_region(normal_region, true) {
            self.write_heightmap(key, normal_region, |x, y, texel| {
                let n = normals[((x - sample.x1) + (y - sample.y1) * w) as usize].normalize_or_zero();
                texel.b = pack_normal(n.x);
                texel.a = pack_normal(n.y);
            })?;
        }
        Ok(normal_region)
    }

    /// Regenerate mips, bounds and collision of one component after its heights changed in `region`.
    fn update_after_height_change(&mut self, key: ComponentKey, region: IntRect) -> Result<()> {
        let local = {
            let Self {
                components,
                textures,
                texture_updates,
                ..
            } = self;
            let component = components
                .get_mut(&key)
                .ok_or(LandscapeError::MissingComponent(key.x, key.y))?;
            let Some(local) = local_region(component, region) else {
                return Ok(());
            };
            component.grass_data.outdated = true;
            let texture = textures.get_mut(component.heightmap)?;
            let offset = component.heightmap_offset((texture.size_x, texture.size_y), 0);
            let layout = SubsectionLayout::new(component.num_subsections, component.subsection_size_quads);
            let info = texture_updates.info(component.heightmap, texture.num_mips());
            update_heightmap_mips(
                texture,
                offset,
                layout,
                MipUpdateRegion::new(local.x1, local.y1, local.x2, local.y2),
                Some(&mut *info),
            );
            update_heightmap_box_mips(texture, layout, Some(info));
            local
        };
        self.update_cached_bounds(key)?;
        self.update_collision_height_data(key, local, true)
    }

    /// Weights of `layer` at every vertex in the region, row-major. Unpainted vertices read as 0.
    pub fn get_weight_data(&self, layer: LayerInfoId, x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Vec<u8>> {
        let region = checked_region(x1, y1, x2, y2, None)?;
        let width = region.width();
        let mut out = vec![0u8; (width * region.height()) as usize];
        for key in self.components_in_region(region, true) {
            let component = self.require_component(key)?;
            let Some(local) = local_region(component, region) else {
                continue;
            };
            let cdi = ComponentDataInterface::new(component, &self.textures, 0)?;
            let Some(weights) = cdi.weight_data(layer) else {
                continue;
            };
            let base = component.section_base;
            for ly in local.y1..=local.y2 {
                for lx in local.x1..=local.x2 {
                    let (tx, ty) = cdi.vertex_to_texel(lx, ly);
                    let index = (base.x + lx - x1) + (base.y + ly - y1) * width;
                    out[index as usize] = weights[cdi.texel_index(tx, ty)];
                }
            }
        }
        Ok(out)
    }

    /// Paint `layer` with the given weights, row-major over the region.
    ///
    /// Components gain the layer when the region paints it there. For a blended
    /// layer the other blended layers are scaled so the total stays 255. Layers
    /// left with no weight anywhere on a component are removed from it.
    pub fn set_alpha_data(&mut self, layer: LayerInfoId, x1: i32, y1: i32, x2: i32, y2: i32, data: &[u8]) -> Result<()> {
        let region = checked_region(x1, y1, x2, y2, Some(data.len()))?;
        if !self.layers.contains(layer) {
            return Err(LandscapeError::MissingLayerInfo(format!("#{}", layer.0)));
        }
        let width = region.width();
        let weight_at = |x: i32, y: i32| data[((x - x1) + (y - y1) * width) as usize];

        for key in self.components_in_region(region, true) {
            let component = self.require_component(key)?;
            let Some(local) = local_region(component, region) else {
                continue;
            };
            let base = component.section_base;
            let mut allocations_changed = false;
            if component.allocation_index(layer).is_none() {
                let paints = (local.y1..=local.y2)
                    .any(|ly| (local.x1..=local.x2).any(|lx| weight_at(base.x + lx, base.y + ly) > 0));
                if !paints {
                    continue;
                }
                self.require_component_mut(key)?
                    .weightmap_layer_allocations
                    .push(WeightmapLayerAllocation::unallocated(layer));
                self.reallocate_weightmaps(key)?;
                allocations_changed = true;
            }

            self.write_weights(key, layer, local, |lx, ly| weight_at(base.x + lx, base.y + ly))?;
            if self.remove_empty_layers(key)? {
                allocations_changed = true;
            }

            let mip_region = MipUpdateRegion::new(local.x1, local.y1, local.x2, local.y2);
            self.update_component_weightmap_mips(key, mip_region)?;
            self.update_collision_layer_data(key, local)?;
            if allocations_changed {
                self.update_material_instances(key)?;
            }
        }
        debug!(layer = layer.0, x1, y1, x2, y2, "set alpha data");
        Ok(())
    }

    fn channel_refs(&self, key: ComponentKey) -> Result<Vec<ChannelRef>> {
        let component = self.require_component(key)?;
        Ok(component
            .weightmap_layer_allocations
            .iter()
            .filter(|a| a.is_allocated())
            .filter_map(|a| {
                Some(ChannelRef {
                    layer: a.layer?,
                    texture: *component.weightmap_textures.get(a.texture_index as usize)?,
                    channel: a.channel as usize,
                    blended: self.layers.is_weight_blended(a.layer?),
                })
            })
            .collect())
    }

    /// Write `layer` weights over a component-local region, rebalancing blended layers.
    fn write_weights<F>(&mut self, key: ComponentKey, layer: LayerInfoId, local: IntRect, weight: F) -> Result<()>
    where
        F: Fn(i32, i32) -> u8,
    {
        let refs = self.channel_refs(key)?;
        let Some(target) = refs.iter().position(|r| r.layer == layer) else {
            return Ok(());
        };
        let target_ref = refs[target];
        let others: Vec<ChannelRef> = if target_ref.blended {
            refs.iter()
                .enumerate()
                .filter(|(i, r)| *i != target && r.blended)
                .map(|(_, r)| *r)
                .collect()
        } else {
            Vec::new()
        };
        let component = self.require_component(key)?;
        let s = component.subsection_size_quads;
        let n = component.num_subsections;
        let stride = component.component_size_verts();

        let mut bounds = IntRect::empty();
        for ly in local.y1..=local.y2 {
            for lx in local.x1..=local.x2 {
                let w = weight(lx, ly);
                let tx0 = vertex_texels(lx, s, n).next().unwrap_or(0);
                let ty0 = vertex_texels(ly, s, n).next().unwrap_or(0);
                let index0 = (tx0 + ty0 * stride) as usize;
                let mut other_weights = Vec::with_capacity(others.len());
                for r in &others {
                    other_weights.push(self.textures.get(r.texture)?.mip(0)[index0].channel(r.channel));
                }
                rebalance(w, &mut other_weights);

                for ty in vertex_texels(ly, s, n) {
                    for tx in vertex_texels(lx, s, n) {
                        let index = (tx + ty * stride) as usize;
                        self.textures.get_mut(target_ref.texture)?.mip_mut(0)[index].set_channel(target_ref.channel, w);
                        for (r, v) in others.iter().zip(&other_weights) {
                            self.textures.get_mut(r.texture)?.mip_mut(0)[index].set_channel(r.channel, *v);
                        }
                        bounds.include(tx, ty);
                    }
                }
            }
        }

        let mut touched: Vec<TextureId> = vec![target_ref.texture];
        touched.extend(others.iter().map(|r| r.texture));
        touched.sort();
        touched.dedup();
        for texture_id in touched {
            let num_mips = self.textures.get(texture_id)?.num_mips();
            self.texture_updates
                .info(texture_id, num_mips)
                .add_mip_update_region(0, bounds.x1, bounds.y1, bounds.x2, bounds.y2);
        }
        Ok(())
    }

    /// Drop layers with no weight left on a component. Returns whether any were dropped.
    fn remove_empty_layers(&mut self, key: ComponentKey) -> Result<bool> {
        let mut empty = Vec::new();
        for r in self.channel_refs(key)? {
            let texture = self.textures.get(r.texture)?;
            if texture.mip(0).iter().all(|t| t.channel(r.channel) == 0) {
                empty.push(r);
            }
        }
        if empty.is_empty() {
            return Ok(false);
        }
        for r in &empty {
            self.weightmap_usage.release(r.texture, r.channel);
            let component = self.require_component_mut(key)?;
            component.weightmap_layer_allocations.retain(|a| a.layer != Some(r.layer));
            debug!(x = key.x, y = key.y, layer = r.layer.0, "removed empty layer");
        }
        self.remove_invalid_weightmaps();
        Ok(true)
    }

    fn update_component_weightmap_mips(&mut self, key: ComponentKey, region: MipUpdateRegion) -> Result<()> {
        let Self {
            components,
            textures,
            texture_updates,
            ..
        } = self;
        let component = components
            .get(&key)
            .ok_or(LandscapeError::MissingComponent(key.x, key.y))?;
        let layout = SubsectionLayout::new(component.num_subsections, component.subsection_size_quads);
        for &texture_id in &component.weightmap_textures {
            let texture = textures.get_mut(texture_id)?;
            let info = texture_updates.info(texture_id, texture.num_mips());
            update_weightmap_mips(texture, layout, region, Some(info));
        }
        Ok(())
    }

    /// Remove `layer` from every component and unregister it.
    pub fn delete_layer(&mut self, layer: LayerInfoId) -> Result<()> {
        let keys: Vec<ComponentKey> = self.components.keys().copied().collect();
        for key in keys {
            self.delete_component_layer(key, Some(layer))?;
        }
        self.layers.unregister(layer);
        info!(layer = layer.0, "deleted layer");
        Ok(())
    }

    /// Remove one layer allocation from a component.
    ///
    /// A blended layer's weight is handed back to the remaining blended layers.
    /// `None` removes an allocation whose layer info was lost.
    pub(crate) fn delete_component_layer(&mut self, key: ComponentKey, layer: Option<LayerInfoId>) -> Result<()> {
        let component = self.require_component(key)?;
        let Some(index) = component.weightmap_layer_allocations.iter().position(|a| a.layer == layer) else {
            return Ok(());
        };
        let allocation = component.weightmap_layer_allocations[index];
        let texture = if allocation.is_allocated() {
            component.weightmap_textures.get(allocation.texture_index as usize).copied()
        } else {
            None
        };
        let cq = component.component_size_quads;

        if let Some(texture) = texture {
            let channel = allocation.channel as usize;
            let blended = layer.map(|l| self.layers.is_weight_blended(l)).unwrap_or(false);
            if blended {
                let others: Vec<ChannelRef> = self
                    .channel_refs(key)?
                    .into_iter()
                    .filter(|r| r.blended && Some(r.layer) != layer)
                    .collect();
                let texels = self.textures.get(texture)?.mip(0).len();
                for i in 0..texels {
                    let mut weights = Vec::with_capacity(others.len());
                    for r in &others {
                        weights.push(self.textures.get(r.texture)?.mip(0)[i].channel(r.channel));
                    }
                    rebalance(0, &mut weights);
                    for (r, w) in others.iter().zip(weights) {
                        self.textures.get_mut(r.texture)?.mip_mut(0)[i].set_channel(r.channel, w);
                    }
                }
            }
            self.textures.get_mut(texture)?.zero_channel(channel);
            self.weightmap_usage.release(texture, channel);
        }

        self.require_component_mut(key)?.weightmap_layer_allocations.remove(index);
        self.remove_invalid_weightmaps();
        self.update_component_weightmap_mips(key, MipUpdateRegion::whole(cq))?;
        self.update_collision_layer_data(key, IntRect::new(0, 0, cq, cq))?;
        self.update_material_instances(key)?;
        debug!(x = key.x, y = key.y, "deleted component layer");
        Ok(())
    }

    /// Repoint every use of `from` to `to`, merging weights where a component already has `to`.
    pub fn replace_layer(&mut self, from: LayerInfoId, to: LayerInfoId) -> Result<()> {
        if from == to {
            return Err(LandscapeError::InvalidLayout(
                "cannot replace a layer with itself".to_string(),
            ));
        }
        self.layers.require(to)?;
        let keys: Vec<ComponentKey> = self.components.keys().copied().collect();
        for key in keys {
            let refs = self.channel_refs(key)?;
            let from_ref = refs.iter().find(|r| r.layer == from).copied();
            let to_ref = refs.iter().find(|r| r.layer == to).copied();
            let component = self.require_component(key)?;
            if component.allocation_index(from).is_none() {
                continue;
            }
            let cq = component.component_size_quads;
            match (from_ref, to_ref) {
                (Some(f), Some(t)) => {
                    let texels = self.textures.get(f.texture)?.mip(0).len();
                    for i in 0..texels {
                        let add = self.textures.get(f.texture)?.mip(0)[i].channel(f.channel);
                        let texel = &mut self.textures.get_mut(t.texture)?.mip_mut(0)[i];
                        let merged = texel.channel(t.channel).saturating_add(add);
                        texel.set_channel(t.channel, merged);
                        self.textures.get_mut(f.texture)?.mip_mut(0)[i].set_channel(f.channel, 0);
                    }
                    self.delete_component_layer(key, Some(from))?;
                }
                _ => {
                    let component = self.require_component_mut(key)?;
                    if let Some(i) = component.allocation_index(from) {
                        component.weightmap_layer_allocations[i].layer = Some(to);
                    }
                    self.update_component_weightmap_mips(key, MipUpdateRegion::whole(cq))?;
                    self.update_collision_layer_data(key, IntRect::new(0, 0, cq, cq))?;
                    self.update_material_instances(key)?;
                }
            }
        }
        info!(from = from.0, to = to.0, "replaced layer");
        Ok(())
    }

    /// Bilinear weight of `layer` in `[0, 1]` at a world location.
    ///
    /// Returns 0 outside the landscape or where the layer is not painted.
    pub fn get_layer_weight_at_location(&self, world: [f32; 3], layer: LayerInfoId) -> f32 {
        let local = self.world_to_local(world);
        let cq = self.config.component_size_quads;
        let kx = (local[0] / cq as f32).floor() as i32;
        let ky = (local[1] / cq as f32).floor() as i32;
        // A location on a right or bottom border is still inside the previous component.
        let component = [(kx, ky), (kx - 1, ky), (kx, ky - 1), (kx - 1, ky - 1)]
            .iter()
            .filter_map(|(x, y)| self.components.get(&IntPoint::new(*x, *y)))
            .find(|c| {
                let tx = local[0] - c.section_base.x as f32;
                let ty = local[1] - c.section_base.y as f32;
                tx >= 0.0 && ty >= 0.0 && tx <= cq as f32 && ty <= cq as f32
            });
        let Some(component) = component else {
            return 0.0;
        };
        let Ok(cdi) = ComponentDataInterface::new(component, &self.textures, 0) else {
            return 0.0;
        };
        let Some(weights) = cdi.weight_data(layer) else {
            return 0.0;
        };

        let test_x = local[0] - component.section_base.x as f32;
        let test_y = local[1] - component.section_base.y as f32;
        let s = component.subsection_size_quads;
        let stride = (s + 1) * component.num_subsections;
        let texel = |v: i32| ((v / s) * (s + 1) + v % s).min(stride - 1);
        let x1 = texel(test_x.floor() as i32);
        let y1 = texel(test_y.floor() as i32);
        let x2 = texel(test_x.ceil() as i32);
        let y2 = texel(test_y.ceil() as i32);
        let sample = |x: i32, y: i32| weights[(x + y * stride) as usize] as f32 / 255.0;

        let fx = test_x.fract();
        let fy = test_y.fract();
        let top = sample(x1, y1) + (sample(x2, y1) - sample(x1, y1)) * fx;
        let bottom = sample(x1, y2) + (sample(x2, y2) - sample(x1, y2)) * fx;
        top + (bottom - top) * fy
    }

    /// Drop every XY offset map and rebuild collision as heightfields.
    pub fn remove_xy_offsets(&mut self) -> Result<()> {
        let mut removed = Vec::new();
        for (key, component) in self.components.iter_mut() {
            if let Some(texture) = component.xy_offset_map.take() {
                removed.push((*key, texture));
            }
        }
        if removed.is_empty() {
            return Ok(());
        }
        self.render.flush_rendering_commands();
        for (key, texture) in &removed {
            if !self.components.values().any(|c| c.xy_offset_map == Some(*texture)) {
                self.textures.remove(*texture);
                self.texture_updates.forget(*texture);
            }
            self.render.recreate_render_state(*key);
        }
        info!(components = removed.len(), "removed XY offsets");
        self.recreate_collision_components()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::CollisionKind;
    use crate::config::LandscapeConfig;
    use crate::layer::LayerInfo;
    use crate::material::RenderBackend;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct FlushCounter(Rc<Cell<usize>>);

    impl RenderBackend for FlushCounter {
        fn flush_rendering_commands(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn proxy(nx: i32, ny: i32, n: i32, s: i32) -> Proxy {
        let config = LandscapeConfig::default().with_subsections(n, s);
        let mut proxy = Proxy::new(config).unwrap();
        let cq = n * s;
        for y in 0..ny {
            for x in 0..nx {
                proxy.add_component(IntPoint::new(x * cq, y * cq)).unwrap();
            }
        }
        proxy
    }

    #[test]
    fn test_vertex_texels_duplicate_borders() {
        assert_eq!(vertex_texels(0, 7, 2).collect::<Vec<_>>(), vec![0]);
        assert_eq!(vertex_texels(3, 7, 2).collect::<Vec<_>>(), vec![3]);
        assert_eq!(vertex_texels(7, 7, 2).collect::<Vec<_>>(), vec![7, 8]);
        assert_eq!(vertex_texels(8, 7, 2).collect::<Vec<_>>(), vec![9]);
        assert_eq!(vertex_texels(14, 7, 2).collect::<Vec<_>>(), vec![15]);
        assert_eq!(vertex_texels(7, 7, 1).collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn test_rebalance_keeps_sum() {
        let mut others = [100, 50];
        rebalance(60, &mut others);
        assert_eq!(others.iter().map(|&w| w as u32).sum::<u32>(), 195);
        assert!(others[0] > others[1]);

        let mut zero = [0, 0];
        rebalance(10, &mut zero);
        assert_eq!(zero, [0, 0]);

        let mut full = [255];
        rebalance(0, &mut full);
        assert_eq!(full, [255]);
    }

    #[test]
    fn test_add_component_is_flat_with_collision() {
        let proxy = proxy(1, 1, 1, 7);
        let key = IntPoint::new(0, 0);
        let heights = proxy.get_height_data(0, 0, 7, 7).unwrap();
        assert!(heights.iter().all(|&h| h == MID_HEIGHT));
        let collision = &proxy.collisions[&key];
        assert_eq!(collision.kind, CollisionKind::Heightfield);
        assert!(collision.collision_heights.iter().all(|&h| h == MID_HEIGHT));
    }

    #[test]
    fn test_add_component_clamps_collision_mip() {
        let config = LandscapeConfig::default().with_subsections(1, 7).with_collision_mip_level(9);
        assert!(Proxy::new(config).is_err());

        let mut proxy = proxy(0, 0, 1, 7);
        proxy.config.collision_mip_level = 9;
        proxy.config.simple_collision_mip_level = 4;
        let key = proxy.add_component(IntPoint::new(0, 0)).unwrap();
        let component = proxy.component(key).unwrap();
        assert_eq!(component.collision_mip_level, 2);
        assert_eq!(component.simple_collision_mip_level, 2);
        let collision = &proxy.collisions[&key];
        assert_eq!(collision.collision_size_quads, 1);
        assert_eq!(collision.collision_heights.len(), 4);
    }

    #[test]
    fn test_add_component_rejects_duplicates_and_misalignment() {
        let mut proxy = proxy(1, 1, 1, 7);
        assert!(proxy.add_component(IntPoint::new(0, 0)).is_err());
        assert!(proxy.add_component(IntPoint::new(3, 0)).is_err());
    }

    #[test]
    fn test_height_round_trip_across_components() {
        let mut proxy = proxy(2, 2, 2, 7);
        let heights: Vec<u16> = (0..25).map(|i| 30000 + i * 100).collect();
        proxy.set_height_data(12, 12, 16, 16, &heights, true).unwrap();
        assert_eq!(proxy.get_height_data(12, 12, 16, 16).unwrap(), heights);

        // The shared corner vertex (14, 14) is stored by all four components.
        let corner = 30000 + 12 * 100;
        for key in [IntPoint::new(0, 0), IntPoint::new(1, 0), IntPoint::new(0, 1), IntPoint::new(1, 1)] {
            let component = proxy.component(key).unwrap();
            let cdi = ComponentDataInterface::new(component, &proxy.textures, 0).unwrap();
            let lx = 14 - component.section_base.x;
            let ly = 14 - component.section_base.y;
            assert_eq!(cdi.height(lx, ly), corner);
        }
    }

    #[test]
    fn test_set_height_rejects_bad_length() {
        let mut proxy = proxy(1, 1, 1, 7);
        assert!(matches!(
            proxy.set_height_data(0, 0, 3, 3, &[0; 15], true),
            Err(LandscapeError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_sloped_heights_tilt_normals() {
        let mut proxy = proxy(1, 1, 1, 7);
        let heights: Vec<u16> = (0..64).map(|i| MID_HEIGHT + (i % 8) as u16 * 128).collect();
        proxy.set_height_data(0, 0, 7, 7, &heights, true).unwrap();
        let component = proxy.component(IntPoint::new(0, 0)).unwrap();
        let cdi = ComponentDataInterface::new(component, &proxy.textures, 0).unwrap();
        let (_, _, n) = cdi.local_tangents(3, 3);
        // Heights rise along +X, so the normal leans toward -X.
        assert!(n[0] < -0.1);
        assert!(n[1].abs() < 0.05);
    }

    #[test]
    fn test_set_alpha_rebalances_and_removes_empty_layers() {
        let mut proxy = proxy(1, 1, 1, 7);
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let rock = proxy.layers.register(LayerInfo::new("Rock"));
        proxy.set_alpha_data(grass, 0, 0, 7, 7, &[255; 64]).unwrap();
        proxy.set_alpha_data(rock, 2, 2, 3, 3, &[200; 4]).unwrap();

        let g = proxy.get_weight_data(grass, 0, 0, 7, 7).unwrap();
        let r = proxy.get_weight_data(rock, 0, 0, 7, 7).unwrap();
        assert_eq!(r[2 + 2 * 8], 200);
        assert_eq!(g[2 + 2 * 8], 55);
        assert_eq!(g[0], 255);

        proxy.set_alpha_data(rock, 2, 2, 3, 3, &[0; 4]).unwrap();
        let component = proxy.component(IntPoint::new(0, 0)).unwrap();
        assert!(component.allocation_index(rock).is_none());
        assert_eq!(component.weightmap_layer_allocations.len(), 1);
    }

    #[test]
    fn test_set_alpha_skips_unpainted_components() {
        let mut proxy = proxy(2, 1, 1, 7);
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let mut data = vec![0u8; 9 * 8];
        data[0] = 255;
        proxy.set_alpha_data(grass, 0, 0, 8, 7, &data).unwrap();
        assert!(proxy.component(IntPoint::new(0, 0)).unwrap().allocation_index(grass).is_some());
        assert!(proxy.component(IntPoint::new(1, 0)).unwrap().allocation_index(grass).is_none());
        assert!(proxy.set_alpha_data(LayerInfoId(99), 0, 0, 0, 0, &[1]).is_err());
    }

    #[test]
    fn test_delete_layer_renormalizes() {
        let mut proxy = proxy(1, 1, 1, 7);
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let rock = proxy.layers.register(LayerInfo::new("Rock"));
        proxy.set_alpha_data(grass, 0, 0, 7, 7, &[255; 64]).unwrap();
        proxy.set_alpha_data(rock, 0, 0, 7, 7, &[100; 64]).unwrap();

        proxy.delete_layer(rock).unwrap();
        assert!(proxy.layers.get(rock).is_none());
        let g = proxy.get_weight_data(grass, 0, 0, 7, 7).unwrap();
        assert!(g.iter().all(|&w| w == 255));
        assert_eq!(proxy.weightmap_usage.len(), 1);
    }

    #[test]
    fn test_replace_layer_merges_and_repoints() {
        let mut proxy = proxy(2, 1, 1, 7);
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let rock = proxy.layers.register(LayerInfo::new("Rock"));
        let moss = proxy.layers.register(LayerInfo::new("Moss"));
        proxy.set_alpha_data(grass, 0, 0, 7, 7, &[255; 64]).unwrap();
        proxy.set_alpha_data(rock, 0, 0, 7, 7, &[55; 64]).unwrap();
        proxy.set_alpha_data(moss, 8, 0, 14, 7, &[255; 56]).unwrap();

        proxy.replace_layer(rock, grass).unwrap();
        proxy.replace_layer(moss, rock).unwrap();
        let left = proxy.component(IntPoint::new(0, 0)).unwrap();
        assert!(left.allocation_index(rock).is_none());
        assert!(proxy.get_weight_data(grass, 0, 0, 7, 7).unwrap().iter().all(|&w| w == 255));
        let right = proxy.component(IntPoint::new(1, 0)).unwrap();
        assert!(right.allocation_index(rock).is_some());
        assert!(right.allocation_index(moss).is_none());
        assert!(proxy.replace_layer(grass, grass).is_err());
    }

    #[test]
    fn test_layer_weight_at_location() {
        let mut proxy = proxy(1, 1, 1, 7);
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let mut data = vec![0u8; 64];
        data[1] = 255;
        proxy.set_alpha_data(grass, 0, 0, 7, 7, &data).unwrap();

        let at = |proxy: &Proxy, x: f32, y: f32| proxy.get_layer_weight_at_location([x * 100.0, y * 100.0, 0.0], grass);
        assert_eq!(at(&proxy, 1.0, 0.0), 1.0);
        assert!((at(&proxy, 0.5, 0.0) - 0.5).abs() < 1e-5);
        assert_eq!(at(&proxy, 3.0, 3.0), 0.0);
        assert_eq!(at(&proxy, 9.0, 0.0), 0.0);
        assert_eq!(proxy.get_layer_weight_at_location([0.0; 3], LayerInfoId(42)), 0.0);
    }

    #[test]
    fn test_remove_xy_offsets_rebuilds_heightfield() {
        let flushes = FlushCounter::default();
        let mut proxy = proxy(1, 1, 1, 7).with_render_backend(flushes.clone());
        let key = IntPoint::new(0, 0);
        let xy = proxy.textures.create("xy", TextureKind::XYOffset, 8, 8);
        proxy.require_component_mut(key).unwrap().xy_offset_map = Some(xy);
        proxy.update_collision_data(key, true).unwrap();
        assert_eq!(proxy.collisions[&key].kind, CollisionKind::Mesh);

        assert_eq!(flushes.0.get(), 0);
        proxy.remove_xy_offsets().unwrap();
        assert_eq!(flushes.0.get(), 1);
        assert!(!proxy.textures.contains(xy));
        assert_eq!(proxy.collisions[&key].kind, CollisionKind::Heightfield);
    }
}
