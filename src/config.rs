//! Landscape configuration.
//!
//! Sizes describe the regular component grid; the remaining fields control
//! collision resolution, world placement and heightmap texture packing.

use crate::error::{LandscapeError, Result};
use crate::types::ceil_log2;
use serde::{Deserialize, Serialize};

/// Configuration shared by every component of a landscape proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandscapeConfig {
    /// Quads along one side of a component.
    pub component_size_quads: i32,
    /// Subsections along one side of a component (1 or 2).
    pub num_subsections: i32,
    /// Quads along one side of a subsection.
    pub subsection_size_quads: i32,
    /// Heightmap mip used for complex collision.
    pub collision_mip_level: i32,
    /// Heightmap mip used for simple collision; only used when coarser than `collision_mip_level`.
    pub simple_collision_mip_level: i32,
    /// World units per quad (x, y) and per height unit (z).
    pub draw_scale: [f32; 3],
    /// World location of the landscape origin.
    pub location: [f32; 3],
    /// Largest heightmap texture created by bulk import.
    pub max_heightmap_texture_size: i32,
    /// Number of mips the renderer always keeps resident.
    pub min_texture_resident_mip_count: i32,
    /// Source collision heights from the cached grass height data when it is current.
    pub bake_material_position_offset_into_collision: bool,
}

impl Default for LandscapeConfig {
    fn default() -> Self {
        Self {
            component_size_quads: 63,
            num_subsections: 1,
            subsection_size_quads: 63,
            collision_mip_level: 0,
            simple_collision_mip_level: 0,
            draw_scale: [100.0, 100.0, 100.0],
            location: [0.0, 0.0, 0.0],
            max_heightmap_texture_size: 512,
            min_texture_resident_mip_count: 7,
            bake_material_position_offset_into_collision: false,
        }
    }
}

impl LandscapeConfig {
    /// Set the component layout. `component_size_quads` is derived.
    pub fn with_subsections(mut self, num_subsections: i32, subsection_size_quads: i32) -> Self {
        self.num_subsections = num_subsections;
        self.subsection_size_quads = subsection_size_quads;
        self.component_size_quads = num_subsections * subsection_size_quads;
        self
    }

    pub fn with_collision_mip_level(mut self, level: i32) -> Self {
        self.collision_mip_level = level;
        self
    }

    pub fn with_simple_collision_mip_level(mut self, level: i32) -> Self {
        self.simple_collision_mip_level = level;
        self
    }

    pub fn with_draw_scale(mut self, scale: [f32; 3]) -> Self {
        self.draw_scale = scale;
        self
    }

    pub fn with_location(mut self, location: [f32; 3]) -> Self {
        self.location = location;
        self
    }

    pub fn with_bake_material_position_offset(mut self, bake: bool) -> Self {
        self.bake_material_position_offset_into_collision = bake;
        self
    }

    /// Vertices along one side of a subsection.
    pub fn subsection_size_verts(&self) -> i32 {
        self.subsection_size_quads + 1
    }

    /// Texels along one side of a component in its heightmap.
    pub fn component_size_verts(&self) -> i32 {
        self.num_subsections * self.subsection_size_verts()
    }

    /// Coarsest heightmap mip that still has a quad per subsection.
    pub fn max_collision_mip_level(&self) -> i32 {
        (ceil_log2(self.subsection_size_verts().max(1) as u32) as i32 - 1).max(0)
    }

    /// Load a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the component size invariants.
    pub fn validate(&self) -> Result<()> {
        if self.num_subsections != 1 && self.num_subsections != 2 {
            return Err(LandscapeError::InvalidLayout(format!(
                "num_subsections must be 1 or 2, got {}",
                self.num_subsections
            )));
        }
        if self.subsection_size_quads < 1 {
            return Err(LandscapeError::InvalidLayout(format!(
                "subsection_size_quads must be positive, got {}",
                self.subsection_size_quads
            )));
        }
        if self.num_subsections * self.subsection_size_quads != self.component_size_quads {
            return Err(LandscapeError::InvalidLayout(format!(
                "{} subsections of {} quads do not make a {} quad component",
                self.num_subsections, self.subsection_size_quads, self.component_size_quads
            )));
        }
        if !((self.subsection_size_quads + 1) as u32).is_power_of_two() {
            return Err(LandscapeError::InvalidLayout(format!(
                "subsection size {} + 1 is not a power of two",
                self.subsection_size_quads
            )));
        }
        if self.collision_mip_level < 0 || self.simple_collision_mip_level < 0 {
            return Err(LandscapeError::InvalidLayout(
                "collision mip levels must not be negative".to_string(),
            ));
        }
        let max_mip = self.max_collision_mip_level();
        if self.collision_mip_level > max_mip || self.simple_collision_mip_level > max_mip {
            return Err(LandscapeError::InvalidLayout(format!(
                "collision mip levels {} and {} exceed {} for {} quad subsections",
                self.collision_mip_level, self.simple_collision_mip_level, max_mip, self.subsection_size_quads
            )));
        }
        Ok(())
    }
}
