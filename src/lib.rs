//! # Landscape Data
//!
//! The authoritative data model of a grid-based terrain: 16-bit heightmaps,
//! 8-bit layer weightmaps packed four to a texture, their mip chains, the
//! heightfield collision data derived from them and the material instances
//! that combine the painted layers.
//!
//! ## Overview
//!
//! A [`Proxy`] owns every registry. Bulk import builds components and
//! textures, region edits rewrite texels and re-enter mip generation,
//! collision synthesis and material combination for the touched area only,
//! and mesh export reads the result back as an indexed triangle mesh.
//!
//! ## Quick Start
//!
//! ```ignore
//! use landscape_data::{export_glb, ImportRequest, IntRect, LandscapeConfig, Proxy};
//!
//! let mut proxy = Proxy::new(LandscapeConfig::default().with_subsections(1, 63))?;
//!
//! // 127 x 127 vertices: a 2 x 2 grid of components
//! let heights = vec![32768u16; 127 * 127];
//! proxy.import(&ImportRequest::new(IntRect::new(0, 0, 126, 126), 1, 63, heights))?;
//!
//! // Raise a corner, then export the mesh at LOD 1
//! proxy.set_height_data(0, 0, 9, 9, &[40000; 100], true)?;
//! if let Some(mesh) = proxy.export_to_raw_mesh(1, None)? {
//!     let glb_bytes = export_glb(&mesh)?;
//! }
//! ```

pub mod allocator;
pub mod collision;
pub mod component;
pub mod config;
pub mod edit;
pub mod error;
pub mod export;
pub mod grid;
pub mod import;
pub mod layer;
pub mod material;
pub mod mips;
pub mod proxy;
pub mod texture;
pub mod types;

// Re-export main types for convenience
pub use allocator::{ChannelAllocator, WeightmapUsage, CHANNELS_PER_TEXTURE};
pub use collision::{CollisionComponent, CollisionKind, FoliageSystem, PhysicsBackend};
pub use component::{Component, ComponentDataInterface, ComponentKey};
pub use config::LandscapeConfig;
pub use error::{LandscapeError, Result};
pub use export::{
    export_glb, export_obj, Dimensions, HeightmapCodec, ObjExport, Png16Codec, Png8Codec, RawCodec,
    RawMesh, WeightmapCodec,
};
pub use import::{AlphamapType, ImportLayer, ImportRequest, RenderTarget, RenderTargetFormat};
pub use layer::{LayerInfo, LayerInfoId, WeightmapLayerAllocation};
pub use material::{Material, MaterialId, MaterialInstance, MaterialInstanceId, RenderBackend};
pub use proxy::{NullBackend, Proxy};
pub use texture::{Texture, TextureId, TextureKind, TextureStore};
pub use types::{BoundingBox, BoxSphereBounds, Color, IntPoint, IntRect};
