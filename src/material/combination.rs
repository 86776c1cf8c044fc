use super::{BlendMode, MaterialId, MaterialInstance, MaterialInstanceId, MaterialParent, StaticLayerParameter};
use crate::component::{Component, ComponentKey};
use crate::error::{LandscapeError, Result};
use crate::layer::{LayerInfoId, LayerRegistry, WeightmapLayerAllocation, VISIBILITY_PARAMETER_NAME};
use crate::proxy::Proxy;
use tracing::{debug, info};

const CHANNEL_MASKS: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

fn layer_name(allocation: &WeightmapLayerAllocation, layers: &LayerRegistry) -> String {
    allocation
        .layer
        .and_then(|l| layers.get(l))
        .map(|l| l.name.clone())
        .unwrap_or_else(|| "None".to_string())
}

fn parameter_name(allocation: &WeightmapLayerAllocation, layers: &LayerRegistry) -> String {
    match allocation.layer {
        Some(layer) => layers.parameter_name(layer),
        None => "None".to_string(),
    }
}

/// Cache key describing `allocations` rendered with the material at `material_path`.
///
/// Layer tokens are sorted so components listing the same layers in a
/// different order share one combination.
pub fn layer_allocation_key(
    allocations: &[WeightmapLayerAllocation],
    layers: &LayerRegistry,
    material_path: &str,
    mobile: bool,
) -> String {
    let mut tokens: Vec<String> = allocations
        .iter()
        .map(|a| {
            let no_blend = a
                .layer
                .and_then(|l| layers.get(l))
                .map(|l| l.no_weight_blend)
                .unwrap_or(false);
            format!(
                "_{}_{}{}",
                layer_name(a, layers),
                if no_blend { "n" } else { "w" },
                a.texture_index
            )
        })
        .collect();
    tokens.sort_by(|a, b| b.cmp(a));

    let mut key = material_path.to_string();
    for token in &tokens {
        key.push_str(token);
    }
    if mobile {
        key.push('M');
    }
    key
}

impl Proxy {
    /// Material used by `component` at `lod`, or for the component as a whole when `lod` is `None`.
    ///
    /// A per-LOD override matching `lod` wins, then the component override, then the landscape material.
    pub fn component_material(&self, component: &Component, lod: Option<i32>) -> Option<MaterialId> {
        if let Some(lod) = lod {
            if let Some(o) = component.lod_override_materials.iter().find(|o| o.lod_index == lod) {
                return Some(o.material);
            }
        }
        component.override_material.or(self.landscape_material)
    }

    /// Hole material of `component`, if any.
    pub fn component_hole_material(&self, component: &Component) -> Option<MaterialId> {
        component.override_hole_material.or(self.hole_material)
    }

    /// Shared instance for a layer combination, created on a cache miss.
    ///
    /// Returns `None` when no material is assigned, or when holes would need a
    /// blend mode override on an engine material.
    pub fn get_combination_material(
        &mut self,
        key: ComponentKey,
        allocations: &[WeightmapLayerAllocation],
        lod: Option<i32>,
        mobile: bool,
    ) -> Result<Option<MaterialInstanceId>> {
        let (landscape_material, hole_material, has_holes) = {
            let component = self.require_component(key)?;
            let has_holes = component.has_visibility_painted();
            let hole = if has_holes {
                self.component_hole_material(component)
            } else {
                None
            };
            (self.component_material(component, lod), hole, has_holes)
        };
        let Some(landscape_material) = landscape_material else {
            return Ok(None);
        };
        let base = self
            .materials
            .material(landscape_material)
            .ok_or(LandscapeError::MissingMaterial(landscape_material.0))?;

        let material_to_use = hole_material.unwrap_or(landscape_material);
        let override_blend_mode = has_holes && hole_material.is_none() && base.blend_mode == BlendMode::Opaque;
        if override_blend_mode && base.engine_material {
            self.notify_user(
                "You must assign a regular, non-engine material to your landscape in order to see holes created with the visibility tool.",
            );
            return Ok(None);
        }

        let path = self
            .materials
            .material(material_to_use)
            .ok_or(LandscapeError::MissingMaterial(material_to_use.0))?
            .path
            .clone();
        let layer_key = layer_allocation_key(allocations, &self.layers, &path, mobile);

        let cached = self.materials.cached_combination(&layer_key).filter(|id| {
            self.materials
                .instance(*id)
                .map(|i| i.parent == MaterialParent::Material(material_to_use))
                .unwrap_or(false)
        });
        if let Some(id) = cached {
            return Ok(Some(id));
        }

        self.render.flush_rendering_commands();

        let mut instance = MaterialInstance::new(
            format!("Combination_{}", self.materials.combination_count()),
            MaterialParent::Material(material_to_use),
        );
        instance.mobile = mobile;
        if override_blend_mode {
            instance.blend_mode_override = Some(BlendMode::Masked);
        }
        for allocation in allocations {
            if let Some(layer) = allocation.layer {
                instance.static_layer_params.push(StaticLayerParameter {
                    name: self.layers.parameter_name(layer),
                    weightmap_index: allocation.texture_index as i32,
                    weight_based: !self.layers.get(layer).map(|l| l.no_weight_blend).unwrap_or(false),
                });
            }
        }

        let id = self.materials.add_instance(instance);
        info!(key = %layer_key, instance = id.0, "created combination material instance");
        self.materials.cache_combination(layer_key, id);
        Ok(Some(id))
    }

    /// Filter and order a component's allocations for the mobile shading path.
    ///
    /// Only layers the material samples on mobile are kept. The visibility layer
    /// sorts first, then non-blended layers, so with three layers the last one is
    /// always weight based and can be implied.
    pub fn generate_mobile_allocations(&mut self, key: ComponentKey) -> Result<Vec<WeightmapLayerAllocation>> {
        let component = self.require_component(key)?;
        let names: Vec<String> = self
            .component_material(component, None)
            .and_then(|m| self.materials.material(m))
            .map(|m| m.mobile_layer_names.clone())
            .unwrap_or_default();

        let mut mobile: Vec<WeightmapLayerAllocation> = component
            .weightmap_layer_allocations
            .iter()
            .filter(|a| match a.layer {
                Some(LayerInfoId::VISIBILITY) => names.iter().any(|n| n == VISIBILITY_PARAMETER_NAME),
                Some(layer) => self
                    .layers
                    .get(layer)
                    .map(|l| names.contains(&l.name))
                    .unwrap_or(false),
                None => false,
            })
            .copied()
            .collect();

        let layers = &self.layers;
        mobile.sort_by_key(|a| match a.layer {
            None => 3,
            Some(LayerInfoId::VISIBILITY) => 0,
            Some(layer) if !layers.is_weight_blended(layer) => 1,
            Some(_) => 2,
        });

        self.require_component_mut(key)?.mobile_weightmap_layer_allocations = mobile.clone();
        Ok(mobile)
    }

    /// Rebuild the material instances of one component.
    ///
    /// LODs that resolve to the same material share an instance. Each instance is
    /// a child of the combination for the component's layers and binds its
    /// weightmaps, heightmap and per-layer channel masks.
    pub fn update_material_instances(&mut self, key: ComponentKey) -> Result<()> {
        let (max_lod, lod_materials, allocations, weightmaps, heightmap, old_instances) = {
            let component = self.require_component(key)?;
            let max_lod = component.max_lod().max(0);
            let base = self.component_material(component, None);
            let lod0 = self.component_material(component, Some(0));
            let lod_materials: Vec<Option<MaterialId>> = (0..=max_lod)
                .map(|lod| {
                    let current = self.component_material(component, Some(lod));
                    // A LOD 0 override also replaces the base material on other LODs.
                    if current == base && base != lod0 {
                        lod0
                    } else {
                        current
                    }
                })
                .collect();
            (
                max_lod,
                lod_materials,
                component.weightmap_layer_allocations.clone(),
                component.weightmap_textures.clone(),
                component.heightmap,
                component.material_instances.clone(),
            )
        };

        let mut material_per_lod: Vec<(MaterialId, i8)> = Vec::new();
        let mut lod_index_to_material_index = vec![0i8; (max_lod + 1) as usize];
        let mut last_lod_index: i8 = -1;
        for (lod, current) in lod_materials.into_iter().enumerate() {
            let Some(current) = current else {
                continue;
            };
            // Indices never decrease with LOD, so a material seen again maps to the latest slot.
            match material_per_lod.iter().position(|(m, _)| *m == current) {
                Some(index) => {
                    lod_index_to_material_index[lod] = (index as i8).max(last_lod_index);
                }
                None => {
                    let added = material_per_lod.len() as i8;
                    material_per_lod.push((current, lod as i8));
                    lod_index_to_material_index[lod] = added;
                    last_lod_index = added;
                }
            }
        }

        if old_instances.iter().any(Option::is_some) {
            // In-flight draws may still reference the instances being replaced.
            self.render.flush_rendering_commands();
            for id in old_instances.into_iter().flatten() {
                self.materials.remove_instance(id);
            }
        }

        let slot_count = material_per_lod.len();
        let mut instances: Vec<Option<MaterialInstanceId>> = vec![None; slot_count * 2];
        let mut disabled_tessellation = vec![-1i8; (max_lod + 1) as usize];
        let mut tessellated_count = 0usize;

        for (material_index, &(_, material_lod)) in material_per_lod.iter().enumerate() {
            let Some(combination) = self.get_combination_material(key, &allocations, Some(material_lod as i32), false)? else {
                continue;
            };

            let mut instance = MaterialInstance::new(
                format!("Component_{}_{}_{}", key.x, key.y, material_index),
                MaterialParent::Instance(combination),
            );
            for allocation in &allocations {
                let name = parameter_name(allocation, &self.layers);
                let mask = CHANNEL_MASKS[(allocation.channel as usize).min(3)];
                instance.vector_params.insert(format!("LayerMask_{}", name), mask);
            }
            for (i, texture) in weightmaps.iter().enumerate() {
                instance.texture_params.insert(format!("Weightmap{}", i), *texture);
            }
            instance.texture_params.insert("Heightmap".to_string(), heightmap);
            let instance_name = instance.name.clone();
            let id = self.materials.add_instance(instance);
            instances[material_index] = Some(id);

            let tessellates = self
                .materials
                .base_material(combination)
                .and_then(|m| self.materials.material(m))
                .map(|m| m.tessellation)
                .unwrap_or(false);
            if tessellates {
                let slot = slot_count + tessellated_count;
                tessellated_count += 1;
                let mut twin = MaterialInstance::new(format!("{}_NoTessellation", instance_name), MaterialParent::Instance(id));
                twin.disable_tessellation = true;
                instances[slot] = Some(self.materials.add_instance(twin));
                if material_index < disabled_tessellation.len() {
                    disabled_tessellation[material_index] = slot as i8;
                }
            }
        }

        // Compact away empty slots, remapping the tessellation table to the new positions.
        let mut remap = vec![-1i8; instances.len()];
        let mut compacted = Vec::with_capacity(instances.len());
        for (old, slot) in instances.into_iter().enumerate() {
            if slot.is_some() {
                remap[old] = compacted.len() as i8;
                compacted.push(slot);
            }
        }
        for entry in disabled_tessellation.iter_mut() {
            if *entry >= 0 {
                *entry = remap[*entry as usize];
            }
        }
        let mut instances = compacted;

        if material_per_lod.is_empty() {
            instances = vec![None];
            lod_index_to_material_index = vec![0];
        }

        let mobile_allocations = self.generate_mobile_allocations(key)?;
        let mut mobile_instances = Vec::with_capacity(material_per_lod.len());
        for &(_, material_lod) in &material_per_lod {
            mobile_instances.push(self.get_combination_material(key, &mobile_allocations, Some(material_lod as i32), true)?);
        }

        let component = self.require_component_mut(key)?;
        component.material_per_lod = material_per_lod;
        component.lod_index_to_material_index = lod_index_to_material_index;
        component.material_instances = instances;
        component.material_index_to_disabled_tessellation_material = disabled_tessellation;
        component.mobile_combination_material_instances = mobile_instances;
        debug!(x = key.x, y = key.y, "updated material instances");

        self.render.recreate_render_state(key);
        Ok(())
    }

    /// Rebuild the material instances of every component.
    pub fn update_all_material_instances(&mut self) -> Result<()> {
        let keys: Vec<ComponentKey> = self.components.keys().copied().collect();
        for key in keys {
            self.update_material_instances(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::LodMaterialOverride;
    use crate::config::LandscapeConfig;
    use crate::layer::LayerInfo;
    use crate::material::Material;
    use crate::material::RenderBackend;
    use crate::types::IntPoint;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct RecordingRender {
        messages: Rc<RefCell<Vec<String>>>,
        recreated: Rc<RefCell<Vec<ComponentKey>>>,
        events: Rc<RefCell<Vec<&'static str>>>,
    }

    impl RenderBackend for RecordingRender {
        fn flush_rendering_commands(&mut self) {
            self.events.borrow_mut().push("flush");
        }

        fn recreate_render_state(&mut self, component: ComponentKey) {
            self.recreated.borrow_mut().push(component);
            self.events.borrow_mut().push("recreate");
        }

        fn notify_user(&mut self, message: &str) {
            self.messages.borrow_mut().push(message.to_string());
        }
    }

    fn proxy(render: RecordingRender) -> Proxy {
        let config = LandscapeConfig::default().with_subsections(1, 7);
        let mut proxy = Proxy::new(config).unwrap().with_render_backend(render);
        proxy.add_component(IntPoint::new(0, 0)).unwrap();
        proxy.add_component(IntPoint::new(7, 0)).unwrap();
        proxy
    }

    #[test]
    fn test_key_is_order_independent() {
        let mut layers = LayerRegistry::new();
        let grass = layers.register(LayerInfo::new("Grass"));
        let rock = layers.register(LayerInfo::new("Rock").with_no_weight_blend(true));
        let a = [
            WeightmapLayerAllocation::new(grass, 0, 0),
            WeightmapLayerAllocation::new(rock, 0, 1),
        ];
        let b = [a[1], a[0]];
        let key = layer_allocation_key(&a, &layers, "/Game/M", false);
        assert_eq!(key, "/Game/M_Rock_n0_Grass_w0");
        assert_eq!(key, layer_allocation_key(&b, &layers, "/Game/M", false));
        assert_eq!(layer_allocation_key(&a, &layers, "/Game/M", true), "/Game/M_Rock_n0_Grass_w0M");
    }

    #[test]
    fn test_combination_is_shared_between_components() {
        let mut proxy = proxy(RecordingRender::default());
        proxy.landscape_material = Some(proxy.materials.add_material(Material::new("/Game/M")));
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let rock = proxy.layers.register(LayerInfo::new("Rock"));
        let one = [WeightmapLayerAllocation::new(grass, 0, 0)];
        let two = [WeightmapLayerAllocation::new(grass, 0, 0), WeightmapLayerAllocation::new(rock, 0, 1)];

        let a = proxy.get_combination_material(IntPoint::new(0, 0), &one, Some(0), false).unwrap();
        let b = proxy.get_combination_material(IntPoint::new(1, 0), &one, Some(0), false).unwrap();
        let c = proxy.get_combination_material(IntPoint::new(1, 0), &two, Some(0), false).unwrap();
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(proxy.materials.combination_count(), 2);

        let params = &proxy.materials.instance(c.unwrap()).unwrap().static_layer_params;
        assert_eq!(params.len(), 2);
        assert!(params.iter().all(|p| p.weight_based && p.weightmap_index == 0));
    }

    #[test]
    fn test_holes_override_opaque_blend_mode() {
        let mut proxy = proxy(RecordingRender::default());
        proxy.landscape_material = Some(proxy.materials.add_material(Material::new("/Game/M")));
        let key = IntPoint::new(0, 0);
        let holes = [WeightmapLayerAllocation::new(LayerInfoId::VISIBILITY, 0, 0)];
        proxy.require_component_mut(key).unwrap().weightmap_layer_allocations = holes.to_vec();

        let id = proxy.get_combination_material(key, &holes, None, false).unwrap().unwrap();
        let instance = proxy.materials.instance(id).unwrap();
        assert_eq!(instance.blend_mode_override, Some(BlendMode::Masked));
        assert_eq!(instance.static_layer_params[0].name, VISIBILITY_PARAMETER_NAME);
        assert!(!instance.static_layer_params[0].weight_based);
    }

    #[test]
    fn test_engine_material_refuses_holes() {
        let render = RecordingRender::default();
        let mut proxy = proxy(render.clone());
        proxy.landscape_material = Some(
            proxy
                .materials
                .add_material(Material::new("/Engine/Default").with_engine_material(true)),
        );
        let key = IntPoint::new(0, 0);
        let holes = [WeightmapLayerAllocation::new(LayerInfoId::VISIBILITY, 0, 0)];
        proxy.require_component_mut(key).unwrap().weightmap_layer_allocations = holes.to_vec();

        assert_eq!(proxy.get_combination_material(key, &holes, None, false).unwrap(), None);
        assert_eq!(render.messages.borrow().len(), 1);
    }

    #[test]
    fn test_hole_material_substitutes_base() {
        let mut proxy = proxy(RecordingRender::default());
        proxy.landscape_material = Some(proxy.materials.add_material(Material::new("/Game/M")));
        let hole = proxy.materials.add_material(Material::new("/Game/Holes").with_blend_mode(BlendMode::Masked));
        proxy.hole_material = Some(hole);
        let key = IntPoint::new(0, 0);
        let holes = [WeightmapLayerAllocation::new(LayerInfoId::VISIBILITY, 0, 0)];
        proxy.require_component_mut(key).unwrap().weightmap_layer_allocations = holes.to_vec();

        let id = proxy.get_combination_material(key, &holes, None, false).unwrap().unwrap();
        let instance = proxy.materials.instance(id).unwrap();
        assert_eq!(instance.parent, MaterialParent::Material(hole));
        assert_eq!(instance.blend_mode_override, None);
    }

    #[test]
    fn test_component_instances_bind_textures_and_masks() {
        let render = RecordingRender::default();
        let mut proxy = proxy(render.clone());
        proxy.landscape_material = Some(
            proxy
                .materials
                .add_material(Material::new("/Game/M").with_tessellation(true).with_mobile_layers(["Grass"])),
        );
        let grass = proxy.layers.register(LayerInfo::new("Grass"));
        let rock = proxy.layers.register(LayerInfo::new("Rock"));
        let key = IntPoint::new(0, 0);
        {
            let c = proxy.require_component_mut(key).unwrap();
            c.weightmap_layer_allocations = vec![
                WeightmapLayerAllocation::new(grass, 0, 0),
                WeightmapLayerAllocation::new(rock, 0, 2),
            ];
        }
        proxy.update_material_instances(key).unwrap();

        let c = proxy.component(key).unwrap();
        assert_eq!(c.material_per_lod.len(), 1);
        assert_eq!(c.material_instances.len(), 2);
        assert_eq!(c.material_index_to_disabled_tessellation_material[0], 1);
        let instance = proxy.materials.instance(c.material_instances[0].unwrap()).unwrap();
        assert_eq!(instance.vector_params["LayerMask_Rock"], [0.0, 0.0, 1.0, 0.0]);
        assert_eq!(instance.texture_params["Heightmap"], c.heightmap);
        let twin = proxy.materials.instance(c.material_instances[1].unwrap()).unwrap();
        assert!(twin.disable_tessellation);

        assert_eq!(c.mobile_weightmap_layer_allocations.len(), 1);
        assert_eq!(c.mobile_combination_material_instances.len(), 1);
        assert!(render.recreated.borrow().contains(&key));
    }

    #[test]
    fn test_replacing_instances_flushes_first() {
        let render = RecordingRender::default();
        let mut proxy = proxy(render.clone());
        proxy.landscape_material = Some(proxy.materials.add_material(Material::new("/Game/M")));
        let key = IntPoint::new(0, 0);

        proxy.update_material_instances(key).unwrap();
        assert_eq!(render.events.borrow().last(), Some(&"recreate"));
        let old = proxy.component(key).unwrap().material_instances[0].unwrap();

        render.events.borrow_mut().clear();
        proxy.update_material_instances(key).unwrap();
        assert_eq!(*render.events.borrow(), vec!["flush", "recreate"]);
        assert!(proxy.materials.instance(old).is_none());
        let new = proxy.component(key).unwrap().material_instances[0].unwrap();
        assert!(proxy.materials.instance(new).is_some());
    }

    #[test]
    fn test_lod_override_gets_own_slot() {
        let mut proxy = proxy(RecordingRender::default());
        let base = proxy.materials.add_material(Material::new("/Game/M"));
        let far = proxy.materials.add_material(Material::new("/Game/Far"));
        proxy.landscape_material = Some(base);
        let key = IntPoint::new(0, 0);
        proxy
            .require_component_mut(key)
            .unwrap()
            .lod_override_materials
            .push(LodMaterialOverride { lod_index: 1, material: far });
        proxy.update_material_instances(key).unwrap();

        let c = proxy.component(key).unwrap();
        assert_eq!(c.material_per_lod, vec![(base, 0), (far, 1)]);
        assert_eq!(&c.lod_index_to_material_index[..2], &[0, 1]);
        assert_eq!(c.material_instances.len(), 2);
    }

    #[test]
    fn test_no_material_leaves_single_empty_slot() {
        let mut proxy = proxy(RecordingRender::default());
        let key = IntPoint::new(0, 0);
        proxy.update_material_instances(key).unwrap();
        let c = proxy.component(key).unwrap();
        assert_eq!(c.material_instances, vec![None]);
        assert_eq!(c.lod_index_to_material_index, vec![0]);
    }
}
