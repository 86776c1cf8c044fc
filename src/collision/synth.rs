use super::{collision_region, for_each_collision_vertex, CollisionComponent, CollisionId, CollisionKind, CollisionLayout};
use crate::component::ComponentKey;
use crate::error::{LandscapeError, Result};
use crate::layer::{LayerInfoId, VISIBILITY_THRESHOLD};
use crate::proxy::Proxy;
use crate::texture::TextureId;
use crate::types::IntRect;
use tracing::{debug, info};

impl Proxy {
    /// Copy heights in `region` (component quads) into the component's collision data.
    ///
    /// The collision component is created on first use and rebuilt whole when the
    /// kind it needs changes; otherwise only the collision vertices covering the
    /// region are rewritten and the physics backend is told which ones.
    pub fn update_collision_height_data(&mut self, key: ComponentKey, region: IntRect, update_bounds: bool) -> Result<()> {
        let bake = self.config.bake_material_position_offset_into_collision;
        let Self {
            components,
            textures,
            collisions,
            physics,
            foliage,
            next_collision_id,
            ..
        } = self;
        let component = components
            .get(&key)
            .ok_or(LandscapeError::MissingComponent(key.x, key.y))?;
        let heightmap = textures.get(component.heightmap)?;

        let cm = component.collision_mip_level.max(0);
        let scm = component.simple_collision_mip_level;
        let has_xy = component.xy_offset_map.is_some();
        let using_simple = scm > cm && !has_xy && (scm as usize) < heightmap.num_mips();
        let layout = CollisionLayout::new(component, using_simple.then_some(scm));
        let kind = if has_xy {
            CollisionKind::Mesh
        } else {
            CollisionKind::Heightfield
        };
        let cq = component.component_size_quads;

        let old_id = collisions.get(&key).map(|c| c.id);
        let mut created_new = false;
        let mut change_type = false;
        let mut region = region;

        let reuse = collisions.get(&key).map_or(false, |c| c.kind == kind);
        match collisions.get_mut(&key) {
            Some(existing) if reuse => {
                region = IntRect::new(
                    region.x1.clamp(0, cq),
                    region.y1.clamp(0, cq),
                    region.x2.clamp(0, cq),
                    region.y2.clamp(0, cq),
                );
                if region.x2 < region.x1 || region.y2 < region.y1 {
                    return Ok(());
                }
                if update_bounds {
                    existing.cached_local_box = component.cached_local_box;
                }
                let total = layout.total_size();
                if existing.collision_heights.len() != total {
                    existing.collision_heights.resize(total, 0);
                }
            }
            _ => {
                region = IntRect::new(0, 0, cq, cq);
                let total = layout.total_size();
                let (dominant_layer_data, component_layer_infos) = match collisions.remove(&key) {
                    Some(old) => {
                        change_type = true;
                        let mut dominant = old.dominant_layer_data;
                        if dominant.len() >= total {
                            dominant.truncate(total);
                        } else {
                            dominant.clear();
                        }
                        (dominant, old.component_layer_infos)
                    }
                    None => (Vec::new(), Vec::new()),
                };
                let collision_size_quads = layout.subsection_size_quads * component.num_subsections;
                let id = CollisionId(*next_collision_id);
                *next_collision_id += 1;
                collisions.insert(
                    key,
                    CollisionComponent {
                        id,
                        kind,
                        component: key,
                        section_base: component.section_base,
                        collision_size_quads,
                        collision_scale: cq as f32 / collision_size_quads as f32,
                        simple_collision_size_quads: layout.simple_subsection_size_quads * component.num_subsections,
                        collision_heights: vec![0; total],
                        collision_xy_offsets: if has_xy { vec![0; total * 2] } else { Vec::new() },
                        dominant_layer_data,
                        component_layer_infos,
                        cached_local_box: component.cached_local_box,
                    },
                );
                created_new = true;
            }
        }
        let Some(collision) = collisions.get_mut(&key) else {
            return Ok(());
        };

        let grass_heights = if bake && kind == CollisionKind::Heightfield && component.grass_data.has_data() && !component.grass_data.outdated {
            component
                .grass_data
                .heights_for_mip(cm)
                .filter(|h| h.len() >= (layout.size_verts * layout.size_verts) as usize)
        } else {
            None
        };

        let mip = heightmap.mip(cm as usize);
        let (mip_u, _) = heightmap.mip_size(cm as usize);
        let (offset_x, offset_y) = component.heightmap_offset((heightmap.size_x, heightmap.size_y), cm);
        let xy_mip = match component.xy_offset_map {
            Some(id) => {
                let texture = textures.get(id)?;
                texture
                    .mips
                    .get(cm as usize)
                    .map(|data| (data.as_slice(), texture.mip_size(cm as usize).0))
            }
            None => None,
        };

        let csq = layout.subsection_size_quads;
        let csv = layout.subsection_size_verts;
        let stride = layout.size_verts;
        for_each_collision_vertex(component, region, csq, |sub_x, sub_y, vx, vy| {
            let comp_x = csq * sub_x + vx;
            let comp_y = csq * sub_y + vy;
            let index = (comp_x + comp_y * stride) as usize;
            collision.collision_heights[index] = match grass_heights {
                Some(heights) => heights[index],
                None => {
                    let tex_x = offset_x + csv * sub_x + vx;
                    let tex_y = offset_y + csv * sub_y + vy;
                    mip[(tex_x + tex_y * mip_u) as usize].height()
                }
            };
            if let Some((xy, xy_u)) = xy_mip {
                if !collision.collision_xy_offsets.is_empty() {
                    let tex_x = csv * sub_x + vx;
                    let tex_y = csv * sub_y + vy;
                    let texel = xy[(tex_x + tex_y * xy_u) as usize];
                    collision.collision_xy_offsets[index * 2] = (texel.r as u16) << 8 | texel.g as u16;
                    collision.collision_xy_offsets[index * 2 + 1] = (texel.b as u16) << 8 | texel.a as u16;
                }
            }
        });

        if using_simple {
            let simple_mip = heightmap.mip(scm as usize);
            let (simple_u, _) = heightmap.mip_size(scm as usize);
            let (simple_x, simple_y) = component.heightmap_offset((heightmap.size_x, heightmap.size_y), scm);
            let simple_grass = if grass_heights.is_some() {
                component
                    .grass_data
                    .height_mip_data
                    .get(&scm)
                    .filter(|h| h.len() >= (layout.simple_size_verts * layout.simple_size_verts) as usize)
            } else {
                None
            };
            let sq = layout.simple_subsection_size_quads;
            let sv = layout.simple_subsection_size_verts;
            let simple_stride = layout.simple_size_verts;
            let base = layout.simple_offset();
            for_each_collision_vertex(component, region, sq, |sub_x, sub_y, vx, vy| {
                let comp_x = sq * sub_x + vx;
                let comp_y = sq * sub_y + vy;
                let index = (comp_x + comp_y * simple_stride) as usize;
                collision.collision_heights[base + index] = match simple_grass {
                    Some(heights) => heights[index],
                    None => {
                        let tex_x = simple_x + sv * sub_x + vx;
                        let tex_y = simple_y + sv * sub_y + vy;
                        simple_mip[(tex_x + tex_y * simple_u) as usize].height()
                    }
                };
            });
        }

        let new_id = collision.id;
        if !created_new && kind == CollisionKind::Heightfield {
            let r = if cm == 0 {
                region
            } else {
                collision_region(region, csq, component.subsection_size_quads)
            };
            physics.update_heightfield_region(new_id, r.x1, r.y1, r.x2, r.y2);
        }

        if let Some(old) = old_id {
            if old != new_id {
                foliage.move_instances_to_new_component(old, new_id);
            }
        }
        if created_new {
            physics.recreate_collision(new_id);
            debug!(x = key.x, y = key.y, id = new_id.0, "created collision component");
        }

        if created_new && !change_type {
            self.update_collision_layer_data(key, IntRect::new(0, 0, cq, cq))?;
        }
        Ok(())
    }

    /// Rebuild collision heights for a whole component, optionally discarding the old collision first.
    pub fn update_collision_data(&mut self, key: ComponentKey, rebuild: bool) -> Result<()> {
        if rebuild {
            self.collisions.remove(&key);
        }
        let cq = self.require_component(key)?.component_size_quads;
        self.update_collision_height_data(key, IntRect::new(0, 0, cq, cq), true)
    }

    /// Recompute the dominant layer of each collision vertex in `region`.
    ///
    /// The visibility layer wins outright above the hole threshold; any other
    /// layer wins by strictly greater weight. A change in the set of painted
    /// layers, or any painted hole, rebuilds the whole component.
    pub fn update_collision_layer_data(&mut self, key: ComponentKey, region: IntRect) -> Result<()> {
        let Self {
            components,
            textures,
            collisions,
            ..
        } = self;
        let component = components
            .get(&key)
            .ok_or(LandscapeError::MissingComponent(key.x, key.y))?;
        let Some(collision) = collisions.get_mut(&key) else {
            return Ok(());
        };

        let cm = component.collision_mip_level.max(0);
        let scm = component.simple_collision_mip_level;
        let using_simple = scm > cm && component.xy_offset_map.is_none();

        let mut candidates: Vec<(LayerInfoId, TextureId, usize)> = Vec::new();
        let mut mismatch = false;
        let mut hole_index: Option<usize> = None;
        for allocation in &component.weightmap_layer_allocations {
            let Some(layer) = allocation.layer else {
                continue;
            };
            let Some(&texture) = component.weightmap_textures.get(allocation.texture_index as usize) else {
                continue;
            };
            let index = candidates.len();
            candidates.push((layer, texture, allocation.channel as usize));
            if collision.component_layer_infos.get(index) != Some(&layer) {
                mismatch = true;
            }
            if layer == LayerInfoId::VISIBILITY {
                hole_index = Some(index);
                mismatch = true;
            }
        }
        if candidates.len() != collision.component_layer_infos.len() {
            mismatch = true;
        }

        if candidates.is_empty() {
            collision.dominant_layer_data.clear();
            collision.component_layer_infos.clear();
            return Ok(());
        }

        let weights_at = |mip: i32| -> Result<Option<(Vec<Vec<u8>>, i32)>> {
            let mut data = Vec::with_capacity(candidates.len());
            let mut width = 0;
            for (_, texture, channel) in &candidates {
                let texture = textures.get(*texture)?;
                if mip as usize >= texture.num_mips() {
                    return Ok(None);
                }
                width = texture.mip_size(mip as usize).0;
                data.push(texture.channel_data(mip as usize, *channel));
            }
            Ok(Some((data, width)))
        };

        let Some((weights, mip_u)) = weights_at(cm)? else {
            return Ok(());
        };
        let simple_weights = if using_simple { weights_at(scm)? } else { None };
        let layout = CollisionLayout::new(component, simple_weights.as_ref().map(|_| scm));
        let total = layout.total_size();
        let cq = component.component_size_quads;

        let region = if mismatch || collision.dominant_layer_data.len() != total {
            collision.dominant_layer_data = vec![0; total];
            collision.component_layer_infos = candidates.iter().map(|(l, _, _)| *l).collect();
            IntRect::new(0, 0, cq, cq)
        } else {
            IntRect::new(
                region.x1.clamp(0, cq),
                region.y1.clamp(0, cq),
                region.x2.clamp(0, cq),
                region.y2.clamp(0, cq),
            )
        };

        let dominant_at = |data: &[Vec<u8>], offset: usize| -> u8 {
            let mut dominant = 255u8;
            let mut dominant_weight = 0i32;
            for (layer_index, weights) in data.iter().enumerate() {
                let weight = weights[offset];
                if Some(layer_index) == hole_index {
                    if weight > VISIBILITY_THRESHOLD {
                        dominant = layer_index as u8;
                        dominant_weight = i32::MAX;
                    }
                } else if weight as i32 > dominant_weight {
                    dominant = layer_index as u8;
                    dominant_weight = weight as i32;
                }
            }
            dominant
        };

        let csq = layout.subsection_size_quads;
        let csv = layout.subsection_size_verts;
        let stride = layout.size_verts;
        let dominant_data = &mut collision.dominant_layer_data;
        for_each_collision_vertex(component, region, csq, |sub_x, sub_y, vx, vy| {
            let tex_x = csv * sub_x + vx;
            let tex_y = csv * sub_y + vy;
            let comp_x = csq * sub_x + vx;
            let comp_y = csq * sub_y + vy;
            dominant_data[(comp_x + comp_y * stride) as usize] = dominant_at(&weights, (tex_x + tex_y * mip_u) as usize);
        });

        if let Some((simple, simple_u)) = &simple_weights {
            let sq = layout.simple_subsection_size_quads;
            let sv = layout.simple_subsection_size_verts;
            let simple_stride = layout.simple_size_verts;
            let base = layout.simple_offset();
            for_each_collision_vertex(component, region, sq, |sub_x, sub_y, vx, vy| {
                let tex_x = sv * sub_x + vx;
                let tex_y = sv * sub_y + vy;
                let comp_x = sq * sub_x + vx;
                let comp_y = sq * sub_y + vy;
                dominant_data[base + (comp_x + comp_y * simple_stride) as usize] =
                    dominant_at(simple, (tex_x + tex_y * simple_u) as usize);
            });
        }
        Ok(())
    }

    /// Rebuild every collision component after a collision mip level or scale change.
    pub fn recreate_collision_components(&mut self) -> Result<()> {
        let max_mip = self.config.max_collision_mip_level();
        let collision_mip = self.config.collision_mip_level.clamp(0, max_mip);
        let simple_mip = self.config.simple_collision_mip_level.clamp(0, max_mip);
        let keys: Vec<ComponentKey> = self.components.keys().copied().collect();
        for key in &keys {
            let component = self.require_component_mut(*key)?;
            component.collision_mip_level = collision_mip;
            component.simple_collision_mip_level = simple_mip;
            self.update_collision_data(*key, true)?;
        }
        info!(components = keys.len(), collision_mip, simple_mip, "recreated collision components");
        Ok(())
    }

    /// Physical materials of layers changed: refresh dominant layers and rebuild physics objects.
    pub fn changed_phys_material(&mut self) -> Result<()> {
        let keys: Vec<ComponentKey> = self.components.keys().copied().collect();
        for key in keys {
            let cq = self.require_component(key)?.component_size_quads;
            self.update_collision_layer_data(key, IntRect::new(0, 0, cq, cq))?;
            if let Some(collision) = self.collisions.get(&key) {
                self.physics.recreate_collision(collision.id);
            }
        }
        Ok(())
    }
}
