//! Collision heightfields derived from component heightmaps.
//!
//! Each render component owns at most one collision component, keyed by the same
//! grid coordinate in [`crate::Proxy::collisions`]. Collision data is sampled from
//! a coarser heightmap mip and only rewritten in the region an edit touched.

mod synth;

use crate::component::{Component, ComponentKey};
use crate::layer::LayerInfoId;
use crate::types::{BoundingBox, IntPoint, IntRect};
use serde::{Deserialize, Serialize};

/// Handle of one collision component instance; a rebuild produces a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollisionId(pub u64);

/// Heightfield collision cannot represent XY offsets; mesh collision can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionKind {
    Heightfield,
    Mesh,
}

/// Collision data of one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollisionComponent {
    pub id: CollisionId,
    pub kind: CollisionKind,
    /// Render component this collision belongs to.
    pub component: ComponentKey,
    pub section_base: IntPoint,
    pub collision_size_quads: i32,
    /// Render quads per collision quad.
    pub collision_scale: f32,
    /// Zero when simple collision is not in use.
    pub simple_collision_size_quads: i32,
    /// Collision heights followed by simple collision heights.
    pub collision_heights: Vec<u16>,
    /// Interleaved X/Y offsets, mesh collision only.
    pub collision_xy_offsets: Vec<u16>,
    /// Index into `component_layer_infos` per vertex, 255 for none.
    pub dominant_layer_data: Vec<u8>,
    pub component_layer_infos: Vec<LayerInfoId>,
    pub cached_local_box: BoundingBox,
}

impl CollisionComponent {
    pub fn collision_size_verts(&self) -> i32 {
        self.collision_size_quads + 1
    }

    /// Collision height at collision vertex `(x, y)`.
    pub fn height(&self, x: i32, y: i32) -> Option<u16> {
        let stride = self.collision_size_verts();
        if x < 0 || y < 0 || x >= stride || y >= stride {
            return None;
        }
        self.collision_heights.get((x + y * stride) as usize).copied()
    }

    /// Dominant layer at collision vertex `(x, y)`.
    pub fn dominant_layer(&self, x: i32, y: i32) -> Option<LayerInfoId> {
        let stride = self.collision_size_verts();
        let index = *self.dominant_layer_data.get((x + y * stride) as usize)?;
        self.component_layer_infos.get(index as usize).copied()
    }

    /// Physical material reported for collision vertex `(x, y)`.
    pub fn phys_material<'a>(&self, layers: &'a crate::layer::LayerRegistry, x: i32, y: i32) -> Option<&'a str> {
        let layer = self.dominant_layer(x, y)?;
        layers.get(layer)?.phys_material.as_deref()
    }
}

/// Sizes of the collision grids of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionLayout {
    pub subsection_size_verts: i32,
    pub subsection_size_quads: i32,
    pub size_verts: i32,
    pub simple_subsection_size_verts: i32,
    pub simple_subsection_size_quads: i32,
    pub simple_size_verts: i32,
}

impl CollisionLayout {
    /// Layout at the component's collision mip, plus `simple_mip` when simple collision is used.
    pub fn new(component: &Component, simple_mip: Option<i32>) -> Self {
        let subsection_size_verts = (component.subsection_size_quads + 1) >> component.collision_mip_level;
        let subsection_size_quads = subsection_size_verts - 1;
        let size_verts = component.num_subsections * subsection_size_quads + 1;
        let (simple_subsection_size_verts, simple_subsection_size_quads, simple_size_verts) = match simple_mip {
            Some(mip) => {
                let verts = (component.subsection_size_quads + 1) >> mip;
                (verts, verts - 1, component.num_subsections * (verts - 1) + 1)
            }
            None => (0, 0, 0),
        };
        Self {
            subsection_size_verts,
            subsection_size_quads,
            size_verts,
            simple_subsection_size_verts,
            simple_subsection_size_quads,
            simple_size_verts,
        }
    }

    /// Length of the combined collision + simple collision arrays.
    pub fn total_size(&self) -> usize {
        (self.size_verts * self.size_verts + self.simple_size_verts * self.simple_size_verts) as usize
    }

    pub fn simple_offset(&self) -> usize {
        (self.size_verts * self.size_verts) as usize
    }
}

/// Receives heightfield updates. Only the data layout is produced here.
pub trait PhysicsBackend {
    /// A sub-rectangle (collision vertex coordinates) of an existing heightfield changed.
    fn update_heightfield_region(&mut self, _collision: CollisionId, _x1: i32, _y1: i32, _x2: i32, _y2: i32) {}

    /// The collision object must be rebuilt from scratch.
    fn recreate_collision(&mut self, _collision: CollisionId) {}
}

/// Instances placed on collision surfaces.
pub trait FoliageSystem {
    /// A collision component was replaced; instances attached to `old` now belong to `new`.
    fn move_instances_to_new_component(&mut self, _old: CollisionId, _new: CollisionId) {}

    /// Heights changed inside `world_box`; instances there may need snapping.
    fn snap_instances(&mut self, _world_box: &BoundingBox) {}
}

/// Map a component quad region to the collision vertices it affects, per subsection.
///
/// The region is rounded outward so every collision vertex touched by the render
/// region is visited. `collision_subsection_quads` is the subsection size at the
/// collision mip.
pub(crate) fn for_each_collision_vertex<F>(
    component: &Component,
    region: IntRect,
    collision_subsection_quads: i32,
    mut f: F,
) where
    F: FnMut(i32, i32, i32, i32),
{
    let s = component.subsection_size_quads;
    let n = component.num_subsections;
    let ratio = collision_subsection_quads as f32 / s as f32;

    let sub_x1 = (region.x1 - 1).div_euclid(s).max(0);
    let sub_y1 = (region.y1 - 1).div_euclid(s).max(0);
    let sub_x2 = div_round_up(region.x2 + 1, s).min(n);
    let sub_y2 = div_round_up(region.y2 + 1, s).min(n);

    for sub_y in sub_y1..sub_y2 {
        for sub_x in sub_x1..sub_x2 {
            let x1 = ((region.x1 - s * sub_x) as f32 * ratio).floor() as i32;
            let y1 = ((region.y1 - s * sub_y) as f32 * ratio).floor() as i32;
            let x2 = ((region.x2 - s * sub_x) as f32 * ratio).ceil() as i32;
            let y2 = ((region.y2 - s * sub_y) as f32 * ratio).ceil() as i32;

            let vx1 = x1.clamp(0, collision_subsection_quads);
            let vy1 = y1.clamp(0, collision_subsection_quads);
            let vx2 = x2.clamp(0, collision_subsection_quads);
            let vy2 = y2.clamp(0, collision_subsection_quads);

            for vy in vy1..=vy2 {
                for vx in vx1..=vx2 {
                    f(sub_x, sub_y, vx, vy);
                }
            }
        }
    }
}

/// Map a component quad region to collision coordinates, rounding outward.
pub fn collision_region(region: IntRect, collision_subsection_quads: i32, subsection_size_quads: i32) -> IntRect {
    let ratio = collision_subsection_quads as f32 / subsection_size_quads as f32;
    IntRect::new(
        (region.x1 as f32 * ratio).floor() as i32,
        (region.y1 as f32 * ratio).floor() as i32,
        (region.x2 as f32 * ratio).ceil() as i32,
        (region.y2 as f32 * ratio).ceil() as i32,
    )
}

fn div_round_up(a: i32, b: i32) -> i32 {
    (a + b - 1).div_euclid(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LandscapeConfig;
    use crate::texture::TextureId;

    fn component(n: i32, s: i32, mip: i32) -> Component {
        let config = LandscapeConfig::default()
            .with_subsections(n, s)
            .with_collision_mip_level(mip);
        Component::new(IntPoint::new(0, 0), &config, TextureId(0))
    }

    #[test]
    fn test_layout_sizes() {
        let c = component(2, 7, 1);
        let layout = CollisionLayout::new(&c, Some(2));
        assert_eq!(layout.subsection_size_verts, 4);
        assert_eq!(layout.size_verts, 7);
        assert_eq!(layout.simple_size_verts, 3);
        assert_eq!(layout.total_size(), 49 + 9);
        assert_eq!(layout.simple_offset(), 49);
    }

    #[test]
    fn test_vertex_walk_covers_region() {
        let c = component(2, 7, 1);
        let mut visited = Vec::new();
        for_each_collision_vertex(&c, IntRect::new(3, 3, 5, 5), 3, |sx, sy, vx, vy| {
            visited.push((3 * sx + vx, 3 * sy + vy));
        });
        // Render quads 3..5 map to collision 1.28..2.14, rounded outward to 1..3.
        for x in 1..=3 {
            for y in 1..=3 {
                assert!(visited.contains(&(x, y)), "missing ({}, {})", x, y);
            }
        }
        assert!(!visited.contains(&(5, 5)));
    }

    #[test]
    fn test_collision_region_rounds_outward() {
        let r = collision_region(IntRect::new(1, 2, 5, 6), 3, 7);
        assert_eq!(r, IntRect::new(0, 0, 3, 3));
    }
}
