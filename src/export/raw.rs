//! Triangulation of the landscape into an indexed mesh.
//!
//! Coincident vertices are merged across quads and across component borders by
//! sorting candidate positions on Z and scanning sorted neighbours within an epsilon.

use crate::component::ComponentDataInterface;
use crate::error::Result;
use crate::layer::{LayerInfoId, VISIBILITY_THRESHOLD};
use crate::proxy::Proxy;
use crate::types::{BoundingBox, BoxSphereBounds};
use glam::{Mat3, Vec3};
use tracing::debug;

/// Two positions closer than this on every axis are the same vertex.
const POSITION_EPSILON: f32 = 1e-4;

/// Corner offsets of the two triangles of a quad.
const QUAD_PATTERN: [(i32, i32); 6] = [(0, 0), (0, 1), (1, 1), (0, 0), (1, 1), (1, 0)];

/// Attributes of one triangle corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexInstance {
    /// Index into [`RawMesh::positions`].
    pub vertex: u32,
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    /// Sign of the tangent basis determinant.
    pub binormal_sign: f32,
    /// Landscape-wide UV, also used as the lightmap UV.
    pub uv: [f32; 2],
}

/// An indexed triangle mesh with per-corner attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMesh {
    /// Unique world positions.
    pub positions: Vec<[f32; 3]>,
    pub instances: Vec<VertexInstance>,
    /// Triangles as indices into `instances`.
    pub triangles: Vec<[u32; 3]>,
}

impl RawMesh {
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.positions.iter().copied())
    }
}

/// A candidate corner before deduplication.
struct Corner {
    position: [f32; 3],
    instance: VertexInstance,
}

/// Map each position to the first position in sorted order that equals it.
///
/// Heights of a shared vertex decode from the same texel value, so equal
/// vertices have the same Z exactly; X and Y may drift by rounding at coarse LODs.
fn coalesce(positions: &[[f32; 3]]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..positions.len()).collect();
    order.sort_by(|&a, &b| {
        let (p, q) = (positions[a], positions[b]);
        p[2].total_cmp(&q[2])
            .then(p[0].total_cmp(&q[0]))
            .then(p[1].total_cmp(&q[1]))
            .then(a.cmp(&b))
    });
    let mut canonical: Vec<usize> = (0..positions.len()).collect();
    // Start offsets into `order` of each run sharing Z and X exactly.
    let mut runs: Vec<usize> = Vec::new();
    for (j, &idx) in order.iter().enumerate() {
        let p = positions[idx];
        let same_run = j > 0 && {
            let q = positions[order[j - 1]];
            q[2] == p[2] && q[0] == p[0]
        };
        if !same_run {
            runs.push(j);
        }

        // Within a run Y ascends, so only the previous entry can be within reach.
        let run_start = runs[runs.len() - 1];
        if j > run_start {
            let prev = order[j - 1];
            if p[1] - positions[prev][1] <= POSITION_EPSILON {
                canonical[idx] = canonical[prev];
                continue;
            }
        }

        let mut run_end = run_start;
        for &start in runs[..runs.len() - 1].iter().rev() {
            let q = positions[order[start]];
            if q[2] != p[2] || p[0] - q[0] > POSITION_EPSILON {
                break;
            }
            let run = &order[start..run_end];
            let k = run.partition_point(|&i| positions[i][1] < p[1] - POSITION_EPSILON);
            if let Some(&found) = run.get(k) {
                if positions[found][1] - p[1] <= POSITION_EPSILON {
                    canonical[idx] = canonical[found];
                    break;
                }
            }
            run_end = start;
        }
    }
    canonical
}

impl Proxy {
    /// Triangulate every component at `lod` into an indexed mesh.
    ///
    /// With `bounds`, only components whose bounding sphere meets it are walked,
    /// and a quad is kept when one of its corners lies inside the bounds' sphere
    /// distance of the box. Quads whose visibility weight is above the hole
    /// threshold are left out. Returns `None` when no triangle survives.
    pub fn export_to_raw_mesh(&self, lod: i32, bounds: Option<&BoxSphereBounds>) -> Result<Option<RawMesh>> {
        let Some(extent) = self.get_landscape_extent() else {
            return Ok(None);
        };
        let rect_quads = [
            (extent.x2 - extent.x1).max(1) as f32,
            (extent.y2 - extent.y1).max(1) as f32,
        ];
        let max_lod = crate::types::ceil_log2((self.config.subsection_size_quads + 1) as u32) as i32 - 1;
        let lod = lod.clamp(0, max_lod.max(0));

        let mut corners: Vec<Corner> = Vec::new();
        let mut holes = 0usize;
        for (&key, component) in &self.components {
            if let Some(bounds) = bounds {
                let component_bounds = BoxSphereBounds::from_box(&self.component_world_bounds(key)?);
                if !BoxSphereBounds::spheres_intersect(&component_bounds, bounds, 0.0) {
                    continue;
                }
            }
            let cdi = ComponentDataInterface::new(component, &self.textures, lod)?;
            let quads_lod = cdi.component_size_verts - 1;
            let lod_scale = component.component_size_quads as f32 / quads_lod as f32;
            let base = component.section_base;
            let visibility = cdi.weight_data(LayerInfoId::VISIBILITY);

            for y in 0..quads_lod {
                for x in 0..quads_lod {
                    let positions = QUAD_PATTERN.map(|(dx, dy)| {
                        let local = cdi.local_vertex(x + dx, y + dy);
                        self.local_to_world([base.x as f32 + local[0], base.y as f32 + local[1], local[2]])
                    });
                    if let Some(bounds) = bounds {
                        let radius_sq = bounds.sphere_radius * bounds.sphere_radius;
                        if !positions.iter().any(|&p| bounds.squared_distance_to_box(p) < radius_sq) {
                            continue;
                        }
                    }
                    if let Some(vis) = visibility.as_deref() {
                        let (tx, ty) = cdi.vertex_to_texel(x, y);
                        if vis.get(cdi.texel_index(tx, ty)).copied().unwrap_or(0) > VISIBILITY_THRESHOLD {
                            holes += 1;
                            continue;
                        }
                    }
                    for (i, &(dx, dy)) in QUAD_PATTERN.iter().enumerate() {
                        let (vx, vy) = (x + dx, y + dy);
                        let (tangent_x, tangent_y, normal) = cdi.local_tangents(vx, vy);
                        let basis = Mat3::from_cols(
                            Vec3::from(tangent_x),
                            Vec3::from(tangent_y),
                            Vec3::from(normal),
                        );
                        let uv = [
                            ((base.x - extent.x1) as f32 + vx as f32 * lod_scale) / rect_quads[0],
                            ((base.y - extent.y1) as f32 + vy as f32 * lod_scale) / rect_quads[1],
                        ];
                        corners.push(Corner {
                            position: positions[i],
                            instance: VertexInstance {
                                vertex: 0,
                                normal,
                                tangent: tangent_x,
                                binormal_sign: if basis.determinant() < 0.0 { -1.0 } else { 1.0 },
                                uv,
                            },
                        });
                    }
                }
            }
        }

        if corners.is_empty() {
            debug!(lod, holes, "raw mesh export produced no triangles");
            return Ok(None);
        }

        let candidate_positions: Vec<[f32; 3]> = corners.iter().map(|c| c.position).collect();
        let canonical = coalesce(&candidate_positions);
        let mut vertex_of = vec![u32::MAX; corners.len()];
        let mut mesh = RawMesh::default();
        for (i, corner) in corners.into_iter().enumerate() {
            let rep = canonical[i];
            if vertex_of[rep] == u32::MAX {
                vertex_of[rep] = mesh.positions.len() as u32;
                mesh.positions.push(candidate_positions[rep]);
            }
            mesh.instances.push(VertexInstance {
                vertex: vertex_of[rep],
                ..corner.instance
            });
        }
        mesh.triangles = (0..mesh.instances.len() as u32 / 3)
            .map(|t| [t * 3, t * 3 + 1, t * 3 + 2])
            .collect();

        debug!(
            lod,
            vertices = mesh.positions.len(),
            triangles = mesh.triangles.len(),
            holes,
            "exported raw mesh"
        );
        Ok(Some(mesh))
    }
}
