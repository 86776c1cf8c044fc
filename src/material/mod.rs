//! Materials, material instances and the layer-combination cache.
//!
//! Only the contract the renderer relies on is modelled: instances form a parent
//! chain ending in a base material and carry named static, vector and texture
//! parameters.

mod combination;

pub use combination::layer_allocation_key;

use crate::component::ComponentKey;
use crate::texture::{TextureDataInfo, TextureId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterialId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterialInstanceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendMode {
    Opaque,
    Masked,
    Translucent,
    Additive,
}

/// A base material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub path: String,
    pub blend_mode: BlendMode,
    /// Shading uses tessellation; component instances get a tessellation-disabled twin.
    pub tessellation: bool,
    /// Reserved engine default; its blend mode must not be overridden.
    pub engine_material: bool,
    /// Layer parameter names sampled by the mobile shading path.
    pub mobile_layer_names: Vec<String>,
}

impl Material {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            blend_mode: BlendMode::Opaque,
            tessellation: false,
            engine_material: false,
            mobile_layer_names: Vec::new(),
        }
    }

    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    pub fn with_tessellation(mut self, tessellation: bool) -> Self {
        self.tessellation = tessellation;
        self
    }

    pub fn with_engine_material(mut self, engine_material: bool) -> Self {
        self.engine_material = engine_material;
        self
    }

    pub fn with_mobile_layers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mobile_layer_names = names.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialParent {
    Material(MaterialId),
    Instance(MaterialInstanceId),
}

/// Static permutation switch for one painted layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticLayerParameter {
    pub name: String,
    pub weightmap_index: i32,
    pub weight_based: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialInstance {
    pub name: String,
    pub parent: MaterialParent,
    pub mobile: bool,
    pub blend_mode_override: Option<BlendMode>,
    pub static_layer_params: Vec<StaticLayerParameter>,
    pub vector_params: BTreeMap<String, [f32; 4]>,
    pub texture_params: BTreeMap<String, TextureId>,
    pub disable_tessellation: bool,
}

impl MaterialInstance {
    pub fn new(name: impl Into<String>, parent: MaterialParent) -> Self {
        Self {
            name: name.into(),
            parent,
            mobile: false,
            blend_mode_override: None,
            static_layer_params: Vec::new(),
            vector_params: BTreeMap::new(),
            texture_params: BTreeMap::new(),
            disable_tessellation: false,
        }
    }
}

/// Materials and instances known to a proxy, plus the combination cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterialLibrary {
    materials: BTreeMap<MaterialId, Material>,
    instances: BTreeMap<MaterialInstanceId, MaterialInstance>,
    /// Layer allocation key to shared combination instance.
    combination_cache: BTreeMap<String, MaterialInstanceId>,
    next_material: u32,
    next_instance: u32,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        let id = MaterialId(self.next_material);
        self.next_material += 1;
        self.materials.insert(id, material);
        id
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(&id)
    }

    pub fn instance(&self, id: MaterialInstanceId) -> Option<&MaterialInstance> {
        self.instances.get(&id)
    }

    pub fn instance_mut(&mut self, id: MaterialInstanceId) -> Option<&mut MaterialInstance> {
        self.instances.get_mut(&id)
    }

    pub fn add_instance(&mut self, instance: MaterialInstance) -> MaterialInstanceId {
        let id = MaterialInstanceId(self.next_instance);
        self.next_instance += 1;
        self.instances.insert(id, instance);
        id
    }

    pub fn remove_instance(&mut self, id: MaterialInstanceId) -> Option<MaterialInstance> {
        self.instances.remove(&id)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn cached_combination(&self, key: &str) -> Option<MaterialInstanceId> {
        self.combination_cache.get(key).copied()
    }

    pub(crate) fn cache_combination(&mut self, key: String, id: MaterialInstanceId) {
        self.combination_cache.insert(key, id);
    }

    pub fn combination_count(&self) -> usize {
        self.combination_cache.len()
    }

    /// Base material at the root of an instance's parent chain.
    pub fn base_material(&self, id: MaterialInstanceId) -> Option<MaterialId> {
        let mut current = id;
        // Parent chains are at most combination -> component -> tessellation twin.
        for _ in 0..8 {
            match self.instances.get(&current)?.parent {
                MaterialParent::Material(m) => return Some(m),
                MaterialParent::Instance(i) => current = i,
            }
        }
        None
    }
}

/// Consumes material instances and uploaded texture regions.
pub trait RenderBackend {
    /// Wait until no in-flight draw references instances or textures about to change.
    fn flush_rendering_commands(&mut self) {}

    /// A component's instances were replaced.
    fn recreate_render_state(&mut self, _component: ComponentKey) {}

    /// Texel regions of a texture changed.
    fn upload_texture(&mut self, _info: &TextureDataInfo) {}

    /// Show a message to the user.
    fn notify_user(&mut self, _message: &str) {}
}
