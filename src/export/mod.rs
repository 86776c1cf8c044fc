//! Mesh and texture export.
//!
//! The raw mesh is the hand-off point: OBJ and GLB writers consume it, and
//! heightmap/weightmap codecs consume plain sample arrays.

pub mod codec;
pub mod gltf;
pub mod obj;
pub mod raw;

pub use codec::{read_r16, Dimensions, HeightmapCodec, Png16Codec, Png8Codec, RawCodec, WeightmapCodec};
pub use gltf::export_glb;
pub use obj::{export_obj, ObjExport};
pub use raw::{RawMesh, VertexInstance};
