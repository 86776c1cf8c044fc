//! glTF/GLB export of a raw landscape mesh.

use crate::error::{LandscapeError, Result};
use crate::export::raw::RawMesh;
use gltf_json as json;
use json::accessor::{ComponentType, Type};
use json::buffer::Target;
use json::mesh::Semantic;
use json::validation::Checked::Valid;
use json::validation::USize64;
use std::collections::BTreeMap;

/// GLB chunk type tags.
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

/// Collects the binary payload of a single-primitive mesh.
///
/// Each attribute gets one tightly packed buffer view and one accessor, so
/// view and accessor indices always agree with the primitive's attribute map.
#[derive(Default)]
struct PrimitiveBuilder {
    data: Vec<u8>,
    views: Vec<json::buffer::View>,
    accessors: Vec<json::Accessor>,
    attributes: BTreeMap<json::validation::Checked<Semantic>, json::Index<json::Accessor>>,
    indices: Option<json::Index<json::Accessor>>,
}

impl PrimitiveBuilder {
    fn attribute<const N: usize>(
        &mut self,
        semantic: Semantic,
        type_: Type,
        values: impl IntoIterator<Item = [f32; N]>,
        bounds: Option<([f32; 3], [f32; 3])>,
    ) {
        let start = self.data.len();
        let mut count = 0;
        for value in values {
            for component in value {
                self.data.extend_from_slice(&component.to_le_bytes());
            }
            count += 1;
        }
        let accessor = self.push_view(start, count, type_, ComponentType::F32, Target::ArrayBuffer);
        if let Some((min, max)) = bounds {
            self.accessors[accessor.value()].min = Some(json::Value::from(min.to_vec()));
            self.accessors[accessor.value()].max = Some(json::Value::from(max.to_vec()));
        }
        self.attributes.insert(Valid(semantic), accessor);
    }

    fn triangles(&mut self, triangles: &[[u32; 3]]) {
        let start = self.data.len();
        for index in triangles.iter().flatten() {
            self.data.extend_from_slice(&index.to_le_bytes());
        }
        let accessor = self.push_view(
            start,
            triangles.len() * 3,
            Type::Scalar,
            ComponentType::U32,
            Target::ElementArrayBuffer,
        );
        self.indices = Some(accessor);
    }

    /// Describe `data[start..]` as a new view and accessor.
    fn push_view(
        &mut self,
        start: usize,
        count: usize,
        type_: Type,
        component_type: ComponentType,
        target: Target,
    ) -> json::Index<json::Accessor> {
        let view = json::Index::new(self.views.len() as u32);
        self.views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: USize64((self.data.len() - start) as u64),
            byte_offset: Some(USize64(start as u64)),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            target: Some(Valid(target)),
        });
        let accessor = json::Index::new(self.accessors.len() as u32);
        self.accessors.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(USize64(0)),
            count: USize64(count as u64),
            component_type: Valid(json::accessor::GenericComponentType(component_type)),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(type_),
            min: None,
            max: None,
            normalized: false,
            sparse: None,
        });
        accessor
    }

    /// Finish into a one-node scene, returning the root and the BIN payload.
    fn finish(self) -> (json::Root, Vec<u8>) {
        let primitive = json::mesh::Primitive {
            attributes: self.attributes,
            extensions: Default::default(),
            extras: Default::default(),
            indices: self.indices,
            material: Some(json::Index::new(0)),
            mode: Valid(json::mesh::Mode::Triangles),
            targets: None,
        };
        let root = json::Root {
            accessors: self.accessors,
            buffers: vec![json::Buffer {
                byte_length: USize64(self.data.len() as u64),
                extensions: Default::default(),
                extras: Default::default(),
                uri: None,
            }],
            buffer_views: self.views,
            materials: vec![create_material()],
            meshes: vec![json::Mesh {
                extensions: Default::default(),
                extras: Default::default(),
                primitives: vec![primitive],
                weights: None,
            }],
            nodes: vec![json::Node {
                mesh: Some(json::Index::new(0)),
                ..Default::default()
            }],
            scenes: vec![json::Scene {
                extensions: Default::default(),
                extras: Default::default(),
                nodes: vec![json::Index::new(0)],
            }],
            scene: Some(json::Index::new(0)),
            ..Default::default()
        };
        (root, self.data)
    }
}

/// Export a raw mesh to GLB (binary glTF).
///
/// glTF attributes are per vertex, so every corner instance becomes its own
/// vertex and the triangles index them directly.
pub fn export_glb(mesh: &RawMesh) -> Result<Vec<u8>> {
    if mesh.is_empty() {
        return Err(LandscapeError::Export("Cannot export empty mesh".to_string()));
    }
    let bounds = mesh.bounds().map(|b| (b.min, b.max));

    let mut builder = PrimitiveBuilder::default();
    builder.attribute(
        Semantic::Positions,
        Type::Vec3,
        mesh.instances.iter().map(|inst| mesh.positions[inst.vertex as usize]),
        Some(bounds.unwrap_or(([0.0; 3], [0.0; 3]))),
    );
    builder.attribute(Semantic::Normals, Type::Vec3, mesh.instances.iter().map(|inst| inst.normal), None);
    builder.attribute(
        Semantic::Tangents,
        Type::Vec4,
        mesh.instances.iter().map(|inst| {
            let t = inst.tangent;
            [t[0], t[1], t[2], inst.binormal_sign]
        }),
        None,
    );
    builder.attribute(Semantic::TexCoords(0), Type::Vec2, mesh.instances.iter().map(|inst| inst.uv), None);
    builder.triangles(&mesh.triangles);

    let (root, data) = builder.finish();
    let json_string = json::serialize::to_string(&root)
        .map_err(|e| LandscapeError::Export(format!("Failed to serialize glTF JSON: {}", e)))?;

    let mut glb = Vec::with_capacity(28 + json_string.len() + data.len() + 6);
    glb.extend_from_slice(b"glTF");
    glb.extend_from_slice(&2u32.to_le_bytes());
    glb.extend_from_slice(&0u32.to_le_bytes());
    write_chunk(&mut glb, CHUNK_JSON, json_string.as_bytes(), b' ');
    write_chunk(&mut glb, CHUNK_BIN, &data, 0);
    let total = (glb.len() as u32).to_le_bytes();
    glb[8..12].copy_from_slice(&total);
    Ok(glb)
}

/// Append a chunk, padded with `pad` to a 4-byte boundary.
fn write_chunk(glb: &mut Vec<u8>, kind: u32, payload: &[u8], pad: u8) {
    let padding = (4 - payload.len() % 4) % 4;
    glb.extend_from_slice(&((payload.len() + padding) as u32).to_le_bytes());
    glb.extend_from_slice(&kind.to_le_bytes());
    glb.extend_from_slice(payload);
    glb.resize(glb.len() + padding, pad);
}

fn create_material() -> json::Material {
    json::Material {
        pbr_metallic_roughness: json::material::PbrMetallicRoughness {
            base_color_texture: None,
            base_color_factor: json::material::PbrBaseColorFactor([0.8, 0.8, 0.8, 1.0]),
            metallic_factor: json::material::StrengthFactor(0.0),
            roughness_factor: json::material::StrengthFactor(1.0),
            metallic_roughness_texture: None,
            extensions: Default::default(),
            extras: Default::default(),
        },
        alpha_mode: Valid(json::material::AlphaMode::Opaque),
        alpha_cutoff: None,
        double_sided: false,
        normal_texture: None,
        occlusion_texture: None,
        emissive_texture: None,
        emissive_factor: json::material::EmissiveFactor([0.0, 0.0, 0.0]),
        extensions: Default::default(),
        extras: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LandscapeConfig;
    use crate::proxy::Proxy;
    use crate::types::IntPoint;

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    #[test]
    fn test_export_landscape_glb() {
        let mut proxy = Proxy::new(LandscapeConfig::default().with_subsections(1, 7)).unwrap();
        proxy.add_component(IntPoint::new(0, 0)).unwrap();
        let mesh = proxy.export_to_raw_mesh(0, None).unwrap().unwrap();

        let glb = export_glb(&mesh).unwrap();
        assert_eq!(&glb[0..4], b"glTF");
        assert_eq!(read_u32(&glb, 4), 2);
        assert_eq!(read_u32(&glb, 8) as usize, glb.len());
        assert_eq!(glb.len() % 4, 0);

        let json_len = read_u32(&glb, 12) as usize;
        let root: serde_json::Value = serde_json::from_slice(&glb[20..20 + json_len]).unwrap();
        assert_eq!(root["accessors"][0]["count"], 7 * 7 * 6);
        assert_eq!(root["accessors"][4]["count"], 7 * 7 * 6);
        assert!(root["meshes"][0]["primitives"][0]["attributes"]["TANGENT"].is_number());
    }

    #[test]
    fn test_chunks_are_padded_to_four_bytes() {
        let mut glb = Vec::new();
        write_chunk(&mut glb, CHUNK_JSON, b"{}", b' ');
        assert_eq!(read_u32(&glb, 0), 4);
        assert_eq!(read_u32(&glb, 4), CHUNK_JSON);
        assert_eq!(&glb[8..], b"{}  ");

        let mut bin = Vec::new();
        write_chunk(&mut bin, CHUNK_BIN, &[1, 2, 3, 4, 5], 0);
        assert_eq!(read_u32(&bin, 0), 8);
        assert_eq!(&bin[8..], &[1, 2, 3, 4, 5, 0, 0, 0]);
    }

    #[test]
    fn test_builder_views_follow_attribute_order() {
        let mut builder = PrimitiveBuilder::default();
        builder.attribute(Semantic::TexCoords(0), Type::Vec2, [[0.0, 1.0], [1.0, 0.0]], None);
        builder.attribute(
            Semantic::Positions,
            Type::Vec3,
            [[0.0, 0.0, 0.0], [1.0, 2.0, 3.0]],
            Some(([0.0; 3], [1.0, 2.0, 3.0])),
        );
        builder.triangles(&[[0, 1, 0]]);
        let (root, data) = builder.finish();

        assert_eq!(data.len(), 2 * 8 + 2 * 12 + 3 * 4);
        assert_eq!(root.buffer_views[1].byte_offset, Some(USize64(16)));
        assert_eq!(root.buffer_views[1].byte_length, USize64(24));
        let primitive = &root.meshes[0].primitives[0];
        assert_eq!(primitive.attributes[&Valid(Semantic::Positions)].value(), 1);
        assert_eq!(primitive.indices.map(|i| i.value()), Some(2));
        assert!(root.accessors[1].max.is_some());
        assert!(root.accessors[0].max.is_none());
        assert_eq!(root.accessors[2].count, USize64(3));
    }

    #[test]
    fn test_export_empty_mesh_fails() {
        assert!(export_glb(&RawMesh::default()).is_err());
    }
}
