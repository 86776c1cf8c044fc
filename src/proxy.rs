//! The landscape proxy: the aggregate that owns every registry.
//!
//! Components, textures, the weightmap channel usage record, layer infos, the
//! material combination cache and collision components all live here and are
//! mutated only through `&mut Proxy`, so a test can build an isolated landscape.

use crate::allocator::ChannelAllocator;
use crate::collision::{CollisionComponent, FoliageSystem, PhysicsBackend};
use crate::component::{Component, ComponentDataInterface, ComponentKey, LANDSCAPE_ZSCALE};
use crate::config::LandscapeConfig;
use crate::error::{LandscapeError, Result};
use crate::grid;
use crate::layer::LayerRegistry;
use crate::material::{MaterialId, MaterialLibrary, RenderBackend};
use crate::texture::{TextureStore, TextureUpdates};
use crate::types::{BoundingBox, IntPoint, IntRect};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Collaborator that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl PhysicsBackend for NullBackend {}
impl FoliageSystem for NullBackend {}
impl RenderBackend for NullBackend {}

/// A landscape: a grid of components and everything derived from them.
pub struct Proxy {
    pub config: LandscapeConfig,
    pub guid: String,
    pub components: BTreeMap<ComponentKey, Component>,
    pub textures: TextureStore,
    /// Which component owns each channel of each weightmap texture.
    pub weightmap_usage: ChannelAllocator,
    pub layers: LayerRegistry,
    pub materials: MaterialLibrary,
    pub landscape_material: Option<MaterialId>,
    pub hole_material: Option<MaterialId>,
    pub collisions: BTreeMap<ComponentKey, CollisionComponent>,
    /// Texel regions written since the last [`Proxy::flush_texture_updates`].
    pub texture_updates: TextureUpdates,
    pub(crate) physics: Box<dyn PhysicsBackend>,
    pub(crate) foliage: Box<dyn FoliageSystem>,
    pub(crate) render: Box<dyn RenderBackend>,
    pub(crate) next_collision_id: u64,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("guid", &self.guid)
            .field("components", &self.components.len())
            .field("textures", &self.textures.len())
            .field("weightmaps", &self.weightmap_usage.len())
            .field("collisions", &self.collisions.len())
            .finish()
    }
}

impl Proxy {
    /// Create an empty landscape. Fails if the configured sizes are inconsistent.
    pub fn new(config: LandscapeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            guid: String::new(),
            components: BTreeMap::new(),
            textures: TextureStore::new(),
            weightmap_usage: ChannelAllocator::new(),
            layers: LayerRegistry::new(),
            materials: MaterialLibrary::new(),
            landscape_material: None,
            hole_material: None,
            collisions: BTreeMap::new(),
            texture_updates: TextureUpdates::new(),
            physics: Box::new(NullBackend),
            foliage: Box::new(NullBackend),
            render: Box::new(NullBackend),
            next_collision_id: 0,
        })
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = guid.into();
        self
    }

    pub fn with_physics_backend(mut self, backend: impl PhysicsBackend + 'static) -> Self {
        self.physics = Box::new(backend);
        self
    }

    pub fn with_foliage_system(mut self, foliage: impl FoliageSystem + 'static) -> Self {
        self.foliage = Box::new(foliage);
        self
    }

    pub fn with_render_backend(mut self, backend: impl RenderBackend + 'static) -> Self {
        self.render = Box::new(backend);
        self
    }

    pub fn component(&self, key: ComponentKey) -> Option<&Component> {
        self.components.get(&key)
    }

    /// Look up a component, failing with its grid coordinate.
    pub fn require_component(&self, key: ComponentKey) -> Result<&Component> {
        self.components
            .get(&key)
            .ok_or(LandscapeError::MissingComponent(key.x, key.y))
    }

    pub(crate) fn require_component_mut(&mut self, key: ComponentKey) -> Result<&mut Component> {
        self.components
            .get_mut(&key)
            .ok_or(LandscapeError::MissingComponent(key.x, key.y))
    }

    /// Grid coordinate of the component starting at `section_base`.
    pub fn key_for_section_base(&self, section_base: IntPoint) -> ComponentKey {
        let s = self.config.component_size_quads;
        IntPoint::new(section_base.x.div_euclid(s), section_base.y.div_euclid(s))
    }

    /// Inclusive vertex extent of every component, or `None` when the landscape is empty.
    pub fn get_landscape_extent(&self) -> Option<IntRect> {
        let mut extent = IntRect::empty();
        for component in self.components.values() {
            let (x1, y1, x2, y2) = component.extent();
            extent.include(x1, y1);
            extent.include(x2, y2);
        }
        if extent.is_empty() {
            None
        } else {
            Some(extent)
        }
    }

    /// Range of component grid coordinates in use.
    pub fn get_bounding_rect(&self) -> Option<IntRect> {
        let mut rect = IntRect::empty();
        for key in self.components.keys() {
            rect.include(key.x, key.y);
        }
        if rect.is_empty() {
            None
        } else {
            Some(rect)
        }
    }

    /// Components touching a vertex region. With `overlap`, components that only
    /// share a border vertex with the region are included too.
    pub fn components_in_region(&self, region: IntRect, overlap: bool) -> Vec<ComponentKey> {
        let s = self.config.component_size_quads;
        let range = if overlap {
            grid::component_indices_overlap(region, s)
        } else {
            grid::component_indices_no_overlap(region, s)
        };
        self.components
            .range(IntPoint::new(range.x1, i32::MIN)..=IntPoint::new(range.x2, i32::MAX))
            .map(|(key, _)| *key)
            .filter(|key| key.y >= range.y1 && key.y <= range.y2)
            .collect()
    }

    /// Whether vertex `(x, y)` lies on some component.
    pub fn is_valid_position(&self, x: i32, y: i32) -> bool {
        let s = self.config.component_size_quads;
        let key = IntPoint::new(x.div_euclid(s), y.div_euclid(s));
        if self.components.contains_key(&key) {
            return true;
        }
        // A vertex on a right or bottom border belongs to the neighbour too.
        let left = IntPoint::new((x - 1).div_euclid(s), y.div_euclid(s));
        let up = IntPoint::new(x.div_euclid(s), (y - 1).div_euclid(s));
        let diag = IntPoint::new((x - 1).div_euclid(s), (y - 1).div_euclid(s));
        [left, up, diag].iter().any(|k| {
            self.components
                .get(k)
                .map(|c| {
                    let (x1, y1, x2, y2) = c.extent();
                    x >= x1 && x <= x2 && y >= y1 && y <= y2
                })
                .unwrap_or(false)
        })
    }

    /// World position of a landscape-local point given in quads and local height units.
    pub fn local_to_world(&self, local: [f32; 3]) -> [f32; 3] {
        let s = self.config.draw_scale;
        let l = self.config.location;
        [
            l[0] + local[0] * s[0],
            l[1] + local[1] * s[1],
            l[2] + local[2] * s[2],
        ]
    }

    /// Landscape-local quad coordinates of a world position.
    pub fn world_to_local(&self, world: [f32; 3]) -> [f32; 3] {
        let s = self.config.draw_scale;
        let l = self.config.location;
        [
            (world[0] - l[0]) / s[0],
            (world[1] - l[1]) / s[1],
            (world[2] - l[2]) / s[2],
        ]
    }

    /// World bounds of a component, from its cached local box.
    pub fn component_world_bounds(&self, key: ComponentKey) -> Result<BoundingBox> {
        let component = self.require_component(key)?;
        let base = component.section_base;
        let b = component.cached_local_box;
        let min = self.local_to_world([
            base.x as f32 + b.min[0],
            base.y as f32 + b.min[1],
            b.min[2],
        ]);
        let max = self.local_to_world([
            base.x as f32 + b.max[0],
            base.y as f32 + b.max[1],
            b.max[2],
        ]);
        Ok(BoundingBox::new(min, max))
    }

    /// Recompute a component's local box from its heights and copy it to its collision.
    pub fn update_cached_bounds(&mut self, key: ComponentKey) -> Result<()> {
        let bounds = {
            let component = self.require_component(key)?;
            let cdi = ComponentDataInterface::new(component, &self.textures, 0)?;
            let verts = component.component_size_quads + 1;
            let mut min_z = f32::MAX;
            let mut max_z = f32::MIN;
            for y in 0..verts {
                for x in 0..verts {
                    let z = cdi.local_vertex(x, y)[2];
                    min_z = min_z.min(z);
                    max_z = max_z.max(z);
                }
            }
            let size = component.component_size_quads as f32;
            let mut bounds = BoundingBox::new([0.0, 0.0, min_z], [size, size, max_z]);
            // Flat components still need a non-degenerate box.
            if bounds.max[2] - bounds.min[2] == 0.0 {
                bounds.min[2] -= 1.0;
                bounds.max[2] += 1.0;
            }
            bounds
        };
        self.require_component_mut(key)?.cached_local_box = bounds;
        if let Some(collision) = self.collisions.get_mut(&key) {
            collision.cached_local_box = bounds;
        }
        debug!(x = key.x, y = key.y, min_z = bounds.min[2], max_z = bounds.max[2], "updated bounds");
        Ok(())
    }

    /// World-space height scale of one height unit.
    pub fn height_scale(&self) -> f32 {
        self.config.draw_scale[2] * LANDSCAPE_ZSCALE
    }

    /// Hand every pending texture update region to the render backend.
    pub fn flush_texture_updates(&mut self) -> usize {
        let infos = self.texture_updates.drain();
        for info in &infos {
            self.render.upload_texture(info);
        }
        infos.len()
    }

    /// Log a user-facing message and forward it to the render backend.
    pub(crate) fn notify_user(&mut self, message: &str) {
        warn!("{}", message);
        self.render.notify_user(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy_with_grid(nx: i32, ny: i32) -> Proxy {
        let config = LandscapeConfig::default().with_subsections(1, 7);
        let mut proxy = Proxy::new(config).unwrap();
        for y in 0..ny {
            for x in 0..nx {
                proxy.add_component(IntPoint::new(x * 7, y * 7)).unwrap();
            }
        }
        proxy
    }

    #[test]
    fn test_empty_proxy_has_no_extent() {
        let proxy = Proxy::new(LandscapeConfig::default()).unwrap();
        assert!(proxy.get_landscape_extent().is_none());
        assert!(proxy.get_bounding_rect().is_none());
    }

    #[test]
    fn test_extent_and_region_queries() {
        let proxy = proxy_with_grid(3, 2);
        assert_eq!(proxy.get_landscape_extent(), Some(IntRect::new(0, 0, 21, 14)));
        assert_eq!(proxy.get_bounding_rect(), Some(IntRect::new(0, 0, 2, 1)));

        let touching = proxy.components_in_region(IntRect::new(7, 0, 7, 0), true);
        assert_eq!(touching, vec![IntPoint::new(0, 0), IntPoint::new(1, 0)]);
        let owned = proxy.components_in_region(IntRect::new(7, 0, 14, 7), false);
        assert_eq!(owned, vec![IntPoint::new(1, 0)]);

        assert!(proxy.is_valid_position(21, 14));
        assert!(proxy.is_valid_position(0, 0));
        assert!(!proxy.is_valid_position(22, 0));
        assert!(!proxy.is_valid_position(-1, 0));
    }

    #[test]
    fn test_flat_bounds_are_expanded() {
        let mut proxy = proxy_with_grid(1, 1);
        let key = IntPoint::new(0, 0);
        proxy.update_cached_bounds(key).unwrap();
        let b = proxy.component(key).unwrap().cached_local_box;
        assert_eq!(b.max[2] - b.min[2], 2.0);
        assert_eq!(proxy.collisions[&key].cached_local_box, b);
    }

    #[test]
    fn test_world_round_trip() {
        let config = LandscapeConfig::default()
            .with_subsections(1, 7)
            .with_location([10.0, 20.0, 30.0])
            .with_draw_scale([2.0, 2.0, 4.0]);
        let proxy = Proxy::new(config).unwrap();
        let w = proxy.local_to_world([1.0, 2.0, 3.0]);
        assert_eq!(w, [12.0, 24.0, 42.0]);
        assert_eq!(proxy.world_to_local(w), [1.0, 2.0, 3.0]);
    }
}
