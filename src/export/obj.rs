//! Wavefront OBJ export of a raw landscape mesh.
//!
//! Positions are written once per unique vertex. UVs, normals and faces follow
//! the per-corner instances, so shared positions keep their own attributes.

use crate::error::{LandscapeError, Result};
use crate::export::raw::RawMesh;
use std::fmt::Write;

/// OBJ and MTL text for one mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjExport {
    pub obj: String,
    pub mtl: String,
}

/// Export a raw mesh to OBJ. `name` names the object, the material and the MTL file.
pub fn export_obj(mesh: &RawMesh, name: &str) -> Result<ObjExport> {
    if mesh.is_empty() {
        return Err(LandscapeError::Export("Cannot export empty mesh".to_string()));
    }
    // ~40 bytes per position and ~60 per corner (vt, vn and face share)
    let mut obj = String::with_capacity(256 + mesh.positions.len() * 40 + mesh.instances.len() * 60);
    let mut mtl = String::with_capacity(128);
    write_obj(&mut obj, mesh, name).map_err(fmt_error)?;
    write_mtl(&mut mtl, name).map_err(fmt_error)?;
    Ok(ObjExport { obj, mtl })
}

fn fmt_error(e: std::fmt::Error) -> LandscapeError {
    LandscapeError::Export(format!("Failed to format OBJ: {}", e))
}

fn write_obj(obj: &mut String, mesh: &RawMesh, name: &str) -> std::fmt::Result {
    writeln!(obj, "# Landscape OBJ Export")?;
    writeln!(obj, "# Vertices: {}", mesh.positions.len())?;
    writeln!(obj, "# Triangles: {}", mesh.triangle_count())?;
    writeln!(obj)?;
    writeln!(obj, "mtllib {}.mtl", name)?;
    writeln!(obj, "o {}", name)?;
    writeln!(obj)?;

    for p in &mesh.positions {
        writeln!(obj, "v {} {} {}", p[0], p[1], p[2])?;
    }
    writeln!(obj)?;
    for inst in &mesh.instances {
        // OBJ puts the texture origin at the bottom left
        writeln!(obj, "vt {} {}", inst.uv[0], 1.0 - inst.uv[1])?;
    }
    writeln!(obj)?;
    for inst in &mesh.instances {
        writeln!(obj, "vn {} {} {}", inst.normal[0], inst.normal[1], inst.normal[2])?;
    }
    writeln!(obj)?;

    writeln!(obj, "usemtl {}", name)?;
    for tri in &mesh.triangles {
        write!(obj, "f")?;
        for &corner in tri {
            let v = mesh.instances[corner as usize].vertex + 1;
            let c = corner + 1;
            write!(obj, " {}/{}/{}", v, c, c)?;
        }
        writeln!(obj)?;
    }
    Ok(())
}

fn write_mtl(mtl: &mut String, name: &str) -> std::fmt::Result {
    writeln!(mtl, "# Landscape MTL Export")?;
    writeln!(mtl)?;
    writeln!(mtl, "newmtl {}", name)?;
    writeln!(mtl, "Ka 1.0 1.0 1.0")?;
    writeln!(mtl, "Kd 0.8 0.8 0.8")?;
    writeln!(mtl, "Ks 0.0 0.0 0.0")?;
    writeln!(mtl, "d 1.0")?;
    writeln!(mtl, "illum 1")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::raw::VertexInstance;

    fn corner(vertex: u32, uv: [f32; 2]) -> VertexInstance {
        VertexInstance {
            vertex,
            normal: [0.0, 0.0, 1.0],
            tangent: [1.0, 0.0, 0.0],
            binormal_sign: 1.0,
            uv,
        }
    }

    fn quad() -> RawMesh {
        RawMesh {
            positions: vec![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0], [1.0, 0.0, 0.0]],
            instances: vec![
                corner(0, [0.0, 0.0]),
                corner(1, [0.0, 1.0]),
                corner(2, [1.0, 1.0]),
                corner(0, [0.0, 0.0]),
                corner(2, [1.0, 1.0]),
                corner(3, [1.0, 0.0]),
            ],
            triangles: vec![[0, 1, 2], [3, 4, 5]],
        }
    }

    #[test]
    fn test_export_quad() {
        let out = export_obj(&quad(), "terrain").unwrap();
        assert!(out.obj.contains("mtllib terrain.mtl"));
        assert_eq!(out.obj.lines().filter(|l| l.starts_with("v ")).count(), 4);
        assert_eq!(out.obj.lines().filter(|l| l.starts_with("vt ")).count(), 6);
        assert!(out.obj.contains("f 1/1/1 2/2/2 3/3/3"));
        assert!(out.obj.contains("f 1/4/4 3/5/5 4/6/6"));
        assert!(out.mtl.contains("newmtl terrain"));
    }

    #[test]
    fn test_export_empty_mesh_fails() {
        assert!(export_obj(&RawMesh::default(), "terrain").is_err());
    }
}
