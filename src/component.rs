//! Landscape components and read access to their texture data.
//!
//! A component is one square patch of the grid. Its heights live in a block of
//! a (possibly shared) heightmap texture located by `heightmap_scale_bias`; its
//! paint layers live in channels of one or more weightmap textures.

use crate::config::LandscapeConfig;
use crate::error::{LandscapeError, Result};
use crate::layer::{LayerInfoId, WeightmapLayerAllocation};
use crate::material::{MaterialId, MaterialInstanceId};
use crate::texture::{TextureId, TextureStore};
use crate::types::{BoundingBox, Color, IntPoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grid coordinate of a component: its section base divided by the component size.
pub type ComponentKey = IntPoint;

/// Local height units per world height unit before draw scale.
pub const LANDSCAPE_ZSCALE: f32 = 1.0 / 128.0;
/// Inverse of [`LANDSCAPE_ZSCALE`].
pub const LANDSCAPE_INV_ZSCALE: f32 = 128.0;
/// Scale of packed XY offsets.
pub const LANDSCAPE_XYOFFSET_SCALE: f32 = 1.0 / 256.0;
/// Height value that maps to local Z = 0.
pub const MID_HEIGHT: u16 = 32768;

/// Convert a packed height to local Z.
pub fn local_height(height: u16) -> f32 {
    (height as f32 - MID_HEIGHT as f32) * LANDSCAPE_ZSCALE
}

/// Pack one normal component in `[-1, 1]` into a heightmap byte.
pub fn pack_normal(v: f32) -> u8 {
    (127.5 * (v + 1.0)).round().clamp(0.0, 255.0) as u8
}

/// Per-component heights precomputed with material position offset applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrassData {
    /// Heights at collision mip 0, `(component_size_quads + 1)^2` values.
    pub height_data: Vec<u16>,
    /// Heights for coarser mips, keyed by mip level.
    pub height_mip_data: BTreeMap<i32, Vec<u16>>,
    /// Set when the heights no longer match the heightmap.
    pub outdated: bool,
}

impl GrassData {
    pub fn has_data(&self) -> bool {
        !self.height_data.is_empty()
    }

    /// Heights for `mip`, if cached.
    pub fn heights_for_mip(&self, mip: i32) -> Option<&[u16]> {
        if mip == 0 {
            if self.height_data.is_empty() {
                None
            } else {
                Some(&self.height_data)
            }
        } else {
            self.height_mip_data.get(&mip).map(Vec::as_slice)
        }
    }
}

/// A material override that applies from one LOD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LodMaterialOverride {
    pub lod_index: i32,
    pub material: MaterialId,
}

/// One square patch of the landscape grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    /// Offset of the component's first vertex, in quads.
    pub section_base: IntPoint,
    pub component_size_quads: i32,
    pub num_subsections: i32,
    pub subsection_size_quads: i32,

    pub heightmap: TextureId,
    /// UV scale (x, y) and bias (z, w) of this component's block in `heightmap`.
    pub heightmap_scale_bias: [f32; 4],
    pub weightmap_scale_bias: [f32; 4],
    pub weightmap_subsection_offset: f32,
    pub weightmap_layer_allocations: Vec<WeightmapLayerAllocation>,
    pub weightmap_textures: Vec<TextureId>,
    pub mobile_weightmap_layer_allocations: Vec<WeightmapLayerAllocation>,
    pub xy_offset_map: Option<TextureId>,

    pub collision_mip_level: i32,
    pub simple_collision_mip_level: i32,
    pub grass_data: GrassData,
    pub cached_local_box: BoundingBox,

    pub override_material: Option<MaterialId>,
    pub override_hole_material: Option<MaterialId>,
    pub lod_override_materials: Vec<LodMaterialOverride>,

    /// Component material instances; tessellation-disabled children follow the per-material ones.
    pub material_instances: Vec<Option<MaterialInstanceId>>,
    /// Distinct materials in LOD order, with the first LOD using each.
    pub material_per_lod: Vec<(MaterialId, i8)>,
    pub lod_index_to_material_index: Vec<i8>,
    /// For each material index, the slot of its tessellation-disabled instance (-1 when none).
    pub material_index_to_disabled_tessellation_material: Vec<i8>,
    pub mobile_combination_material_instances: Vec<Option<MaterialInstanceId>>,
}

impl Component {
    /// Create a component with the configured sizes and no layers.
    pub fn new(section_base: IntPoint, config: &LandscapeConfig, heightmap: TextureId) -> Self {
        let max_mip = config.max_collision_mip_level();
        Self {
            section_base,
            component_size_quads: config.component_size_quads,
            num_subsections: config.num_subsections,
            subsection_size_quads: config.subsection_size_quads,
            heightmap,
            heightmap_scale_bias: [1.0, 1.0, 0.0, 0.0],
            weightmap_scale_bias: [1.0, 1.0, 0.0, 0.0],
            weightmap_subsection_offset: 0.0,
            weightmap_layer_allocations: Vec::new(),
            weightmap_textures: Vec::new(),
            mobile_weightmap_layer_allocations: Vec::new(),
            xy_offset_map: None,
            collision_mip_level: config.collision_mip_level.clamp(0, max_mip),
            simple_collision_mip_level: config.simple_collision_mip_level.clamp(0, max_mip),
            grass_data: GrassData::default(),
            cached_local_box: BoundingBox::new([0.0; 3], [0.0; 3]),
            override_material: None,
            override_hole_material: None,
            lod_override_materials: Vec::new(),
            material_instances: vec![None],
            material_per_lod: Vec::new(),
            lod_index_to_material_index: vec![0],
            material_index_to_disabled_tessellation_material: Vec::new(),
            mobile_combination_material_instances: Vec::new(),
        }
    }

    /// Grid coordinate of this component.
    pub fn key(&self) -> ComponentKey {
        IntPoint::new(
            self.section_base.x.div_euclid(self.component_size_quads),
            self.section_base.y.div_euclid(self.component_size_quads),
        )
    }

    /// Texels along one side of this component's block in its textures.
    pub fn component_size_verts(&self) -> i32 {
        self.num_subsections * (self.subsection_size_quads + 1)
    }

    /// Highest LOD index, `ceil(log2(subsection_size_quads + 1)) - 1`.
    pub fn max_lod(&self) -> i32 {
        crate::types::ceil_log2((self.subsection_size_quads + 1) as u32) as i32 - 1
    }

    /// Index of the allocation for `layer`.
    pub fn allocation_index(&self, layer: LayerInfoId) -> Option<usize> {
        self.weightmap_layer_allocations
            .iter()
            .position(|a| a.layer == Some(layer))
    }

    /// Whether the visibility layer is allocated on this component.
    pub fn has_visibility_painted(&self) -> bool {
        self.allocation_index(LayerInfoId::VISIBILITY).is_some()
    }

    /// Extent of this component in quads, `(min_x, min_y, max_x, max_y)`.
    pub fn extent(&self) -> (i32, i32, i32, i32) {
        (
            self.section_base.x,
            self.section_base.y,
            self.section_base.x + self.component_size_quads,
            self.section_base.y + self.component_size_quads,
        )
    }

    /// Texel offset of this component's block in its heightmap at `mip`.
    pub fn heightmap_offset(&self, heightmap_size: (i32, i32), mip: i32) -> (i32, i32) {
        (
            ((self.heightmap_scale_bias[2] * heightmap_size.0 as f32).round() as i32) >> mip,
            ((self.heightmap_scale_bias[3] * heightmap_size.1 as f32).round() as i32) >> mip,
        )
    }
}

/// Read access to one component's texel data at a given mip.
pub struct ComponentDataInterface<'a> {
    component: &'a Component,
    textures: &'a TextureStore,
    mip: i32,
    height_mip: &'a [Color],
    heightmap_stride: i32,
    heightmap_offset: (i32, i32),
    xy_offset_mip: Option<&'a [Color]>,
    /// Vertices along one side of the component at this mip.
    pub component_size_verts: i32,
    /// Vertices along one side of a subsection at this mip.
    pub subsection_size_verts: i32,
}

impl<'a> ComponentDataInterface<'a> {
    pub fn new(component: &'a Component, textures: &'a TextureStore, mip: i32) -> Result<Self> {
        let heightmap = textures.get(component.heightmap)?;
        let mip_index = mip.max(0) as usize;
        if mip_index >= heightmap.num_mips() {
            return Err(LandscapeError::InvalidLayout(format!(
                "heightmap has no mip {}",
                mip
            )));
        }
        let (stride, _) = heightmap.mip_size(mip_index);
        let heightmap_offset = (
            ((stride as f32) * component.heightmap_scale_bias[2]).round() as i32,
            (((heightmap.size_y >> mip).max(1) as f32) * component.heightmap_scale_bias[3]).round() as i32,
        );
        let xy_offset_mip = match component.xy_offset_map {
            Some(id) => {
                let texture = textures.get(id)?;
                texture.mips.get(mip_index).map(Vec::as_slice)
            }
            None => None,
        };
        Ok(Self {
            component,
            textures,
            mip,
            height_mip: heightmap.mip(mip_index),
            heightmap_stride: stride,
            heightmap_offset,
            xy_offset_mip,
            component_size_verts: (component.component_size_quads + 1) >> mip,
            subsection_size_verts: (component.subsection_size_quads + 1) >> mip,
        })
    }

    pub fn mip(&self) -> i32 {
        self.mip
    }

    /// Split a component vertex coordinate into `(subsection, local)`.
    ///
    /// The shared last vertex of a subsection resolves to the earlier subsection.
    pub fn vertex_to_subsection(&self, v: i32) -> (i32, i32) {
        if v <= 0 {
            return (0, 0);
        }
        let quads = self.subsection_size_verts - 1;
        ((v - 1) / quads, (v - 1) % quads + 1)
    }

    /// Texel coordinate of a component vertex.
    pub fn vertex_to_texel(&self, x: i32, y: i32) -> (i32, i32) {
        let (sx, lx) = self.vertex_to_subsection(x);
        let (sy, ly) = self.vertex_to_subsection(y);
        (
            sx * self.subsection_size_verts + lx,
            sy * self.subsection_size_verts + ly,
        )
    }

    /// Index into a component-sized texel array.
    pub fn texel_index(&self, tx: i32, ty: i32) -> usize {
        (ty * self.component.num_subsections * self.subsection_size_verts + tx) as usize
    }

    /// Heightmap texel of a component vertex.
    pub fn height_texel(&self, x: i32, y: i32) -> Color {
        let (tx, ty) = self.vertex_to_texel(x, y);
        let idx = (self.heightmap_offset.0 + tx) + (self.heightmap_offset.1 + ty) * self.heightmap_stride;
        self.height_mip[idx as usize]
    }

    pub fn height(&self, x: i32, y: i32) -> u16 {
        self.height_texel(x, y).height()
    }

    /// Horizontal displacement of a vertex from the XY offset map.
    pub fn xy_offset(&self, x: i32, y: i32) -> (f32, f32) {
        match self.xy_offset_mip {
            Some(data) => {
                let (tx, ty) = self.vertex_to_texel(x, y);
                let texel = data[self.texel_index(tx, ty)];
                let ox = ((texel.r as u16) << 8 | texel.g as u16) as f32;
                let oy = ((texel.b as u16) << 8 | texel.a as u16) as f32;
                (
                    (ox - MID_HEIGHT as f32) * LANDSCAPE_XYOFFSET_SCALE,
                    (oy - MID_HEIGHT as f32) * LANDSCAPE_XYOFFSET_SCALE,
                )
            }
            None => (0.0, 0.0),
        }
    }

    /// Component-local position of a vertex, in quads and local height units.
    pub fn local_vertex(&self, x: i32, y: i32) -> [f32; 3] {
        let scale = self.component.component_size_quads as f32 / (self.component_size_verts - 1) as f32;
        let (ox, oy) = self.xy_offset(x, y);
        [
            x as f32 * scale + ox,
            y as f32 * scale + oy,
            local_height(self.height(x, y)),
        ]
    }

    /// Tangent basis `(tangent_x, tangent_y, normal)` decoded from the heightmap.
    pub fn local_tangents(&self, x: i32, y: i32) -> ([f32; 3], [f32; 3], [f32; 3]) {
        let texel = self.height_texel(x, y);
        let nx = 2.0 * texel.b as f32 / 255.0 - 1.0;
        let ny = 2.0 * texel.a as f32 / 255.0 - 1.0;
        let nz = (1.0 - (nx * nx + ny * ny)).max(0.0).sqrt();
        let tangent_x = [-nz, 0.0, nx];
        let tangent_y = [0.0, nz, -ny];
        (tangent_x, tangent_y, [nx, ny, nz])
    }

    /// Weights of `layer` for the whole component at this mip, or `None` if not painted.
    pub fn weight_data(&self, layer: LayerInfoId) -> Option<Vec<u8>> {
        let alloc = self
            .component
            .weightmap_layer_allocations
            .iter()
            .find(|a| a.layer == Some(layer) && a.is_allocated())?;
        let texture_id = *self
            .component
            .weightmap_textures
            .get(alloc.texture_index as usize)?;
        let texture = self.textures.get(texture_id).ok()?;
        let mip = self.mip.max(0) as usize;
        if mip >= texture.num_mips() {
            return None;
        }
        Some(texture.channel_data(mip, alloc.channel as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::TextureKind;

    fn setup(num_subsections: i32, subsection: i32) -> (Component, TextureStore) {
        let config = LandscapeConfig::default().with_subsections(num_subsections, subsection);
        let mut textures = TextureStore::new();
        let size = (config.component_size_verts() as u32).next_power_of_two() as i32;
        let hm = textures.create("hm", TextureKind::Heightmap, size, size);
        let mut component = Component::new(IntPoint::new(0, 0), &config, hm);
        component.heightmap_scale_bias = [1.0 / size as f32, 1.0 / size as f32, 0.0, 0.0];
        (component, textures)
    }

    #[test]
    fn test_vertex_to_texel_duplicates_shared_vertex() {
        let (component, textures) = setup(2, 3);
        let cdi = ComponentDataInterface::new(&component, &textures, 0).unwrap();
        assert_eq!(cdi.vertex_to_subsection(0), (0, 0));
        assert_eq!(cdi.vertex_to_subsection(3), (0, 3));
        assert_eq!(cdi.vertex_to_subsection(4), (1, 1));
        assert_eq!(cdi.vertex_to_texel(3, 0), (3, 0));
        assert_eq!(cdi.vertex_to_texel(4, 6), (5, 7));
        assert_eq!(cdi.texel_index(1, 1), 9);
    }

    #[test]
    fn test_local_vertex_height() {
        let (component, mut textures) = setup(1, 3);
        {
            let hm = textures.get_mut(component.heightmap).unwrap();
            let stride = hm.size_x;
            hm.mip_mut(0)[(1 + 2 * stride) as usize] = Color::from_height(32768 + 256, 128, 128);
        }
        let cdi = ComponentDataInterface::new(&component, &textures, 0).unwrap();
        assert_eq!(cdi.local_vertex(1, 2), [1.0, 2.0, 2.0]);
        assert_eq!(cdi.local_vertex(0, 0)[2], -256.0);
    }

    #[test]
    fn test_flat_tangents() {
        let (component, mut textures) = setup(1, 3);
        for texel in textures.get_mut(component.heightmap).unwrap().mip_mut(0) {
            *texel = Color::from_height(MID_HEIGHT, 127, 127);
        }
        let cdi = ComponentDataInterface::new(&component, &textures, 0).unwrap();
        let (_, _, n) = cdi.local_tangents(2, 2);
        assert!(n[0].abs() < 0.01 && n[1].abs() < 0.01);
        assert!((n[2] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_key_and_extent() {
        let config = LandscapeConfig::default().with_subsections(1, 7);
        let c = Component::new(IntPoint::new(14, 7), &config, TextureId(0));
        assert_eq!(c.key(), IntPoint::new(2, 1));
        assert_eq!(c.extent(), (14, 7, 21, 14));
        assert_eq!(c.max_lod(), 2);
    }
}
