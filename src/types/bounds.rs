//! Axis-aligned and sphere bounds.

use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl BoundingBox {
    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: impl Iterator<Item = [f32; 3]>) -> Option<Self> {
        let mut bounds: Option<Self> = None;
        for p in points {
            match bounds.as_mut() {
                Some(b) => b.include(p),
                None => bounds = Some(Self::new(p, p)),
            }
        }
        bounds
    }

    /// Grow the box to contain `p`.
    pub fn include(&mut self, p: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let mut out = *self;
        out.include(other.min);
        out.include(other.max);
        out
    }

    pub fn dimensions(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && other.min[i] <= self.max[i])
    }
}

/// Combined box and sphere bounds sharing an origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxSphereBounds {
    pub origin: [f32; 3],
    pub box_extent: [f32; 3],
    pub sphere_radius: f32,
}

impl BoxSphereBounds {
    pub fn new(origin: [f32; 3], box_extent: [f32; 3], sphere_radius: f32) -> Self {
        Self {
            origin,
            box_extent,
            sphere_radius,
        }
    }

    pub fn from_box(bounds: &BoundingBox) -> Self {
        let origin = bounds.center();
        let dims = bounds.dimensions();
        let box_extent = [dims[0] * 0.5, dims[1] * 0.5, dims[2] * 0.5];
        let sphere_radius = glam::Vec3::from(box_extent).length();
        Self::new(origin, box_extent, sphere_radius)
    }

    pub fn to_box(&self) -> BoundingBox {
        BoundingBox::new(
            [
                self.origin[0] - self.box_extent[0],
                self.origin[1] - self.box_extent[1],
                self.origin[2] - self.box_extent[2],
            ],
            [
                self.origin[0] + self.box_extent[0],
                self.origin[1] + self.box_extent[1],
                self.origin[2] + self.box_extent[2],
            ],
        )
    }

    /// Whether the bounding spheres of `a` and `b` overlap within `tolerance`.
    pub fn spheres_intersect(a: &BoxSphereBounds, b: &BoxSphereBounds, tolerance: f32) -> bool {
        let d = glam::Vec3::from(a.origin) - glam::Vec3::from(b.origin);
        let r = a.sphere_radius + b.sphere_radius + tolerance;
        d.length_squared() <= r * r
    }

    /// Squared distance from `point` to the box, zero when inside.
    pub fn squared_distance_to_box(&self, point: [f32; 3]) -> f32 {
        let mut dist = 0.0;
        for i in 0..3 {
            let min = self.origin[i] - self.box_extent[i];
            let max = self.origin[i] + self.box_extent[i];
            if point[i] < min {
                dist += (min - point[i]) * (min - point[i]);
            } else if point[i] > max {
                dist += (point[i] - max) * (point[i] - max);
            }
        }
        dist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points() {
        let b = BoundingBox::from_points([[1.0, 2.0, 3.0], [-1.0, 5.0, 0.0]].into_iter()).unwrap();
        assert_eq!(b.min, [-1.0, 2.0, 0.0]);
        assert_eq!(b.max, [1.0, 5.0, 3.0]);
        assert!(BoundingBox::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn test_sphere_bounds() {
        let a = BoxSphereBounds::from_box(&BoundingBox::new([0.0; 3], [2.0, 2.0, 2.0]));
        assert_eq!(a.origin, [1.0, 1.0, 1.0]);
        let far = BoxSphereBounds::new([100.0, 0.0, 0.0], [1.0; 3], 1.0);
        assert!(!BoxSphereBounds::spheres_intersect(&a, &far, 0.0));
        assert!(BoxSphereBounds::spheres_intersect(&a, &a, 0.0));
        assert_eq!(a.squared_distance_to_box([1.0, 1.0, 1.0]), 0.0);
        assert_eq!(a.squared_distance_to_box([4.0, 1.0, 1.0]), 4.0);
    }
}
