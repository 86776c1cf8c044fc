//! Grid addressing: mapping quad-space regions to component index ranges.
//!
//! Component `(i, j)` covers quads `[i * size, (i + 1) * size]` and shares its
//! border vertices with its neighbours.

use crate::types::IntRect;

/// Component index range touching the vertex region `[x1, x2] x [y1, y2]`.
///
/// Border vertices belong to two components, so a region starting on a
/// component edge also pulls in the neighbour to the left/top.
pub fn component_indices_overlap(region: IntRect, component_size_quads: i32) -> IntRect {
    let s = component_size_quads;
    IntRect::new(
        (region.x1 - 1).div_euclid(s),
        (region.y1 - 1).div_euclid(s),
        region.x2.div_euclid(s),
        region.y2.div_euclid(s),
    )
}

/// Component index range owning the region without shared borders.
///
/// The range never inverts: a degenerate region still yields the component
/// containing its start.
pub fn component_indices_no_overlap(region: IntRect, component_size_quads: i32) -> IntRect {
    let s = component_size_quads;
    let x1 = region.x1.div_euclid(s);
    let y1 = region.y1.div_euclid(s);
    let x2 = (region.x2 - 1).div_euclid(s).max(x1);
    let y2 = (region.y2 - 1).div_euclid(s).max(y1);
    IntRect::new(x1, y1, x2, y2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_includes_left_neighbour_on_edge() {
        let r = component_indices_overlap(IntRect::new(7, 7, 7, 7), 7);
        assert_eq!(r, IntRect::new(0, 0, 1, 1));
    }

    #[test]
    fn test_overlap_interior() {
        let r = component_indices_overlap(IntRect::new(1, 2, 6, 5), 7);
        assert_eq!(r, IntRect::new(0, 0, 0, 0));
    }

    #[test]
    fn test_overlap_negative_region() {
        let r = component_indices_overlap(IntRect::new(-3, 0, 0, 0), 7);
        assert_eq!(r, IntRect::new(-1, -1, 0, 0));
    }

    #[test]
    fn test_no_overlap() {
        let r = component_indices_no_overlap(IntRect::new(0, 0, 14, 7), 7);
        assert_eq!(r, IntRect::new(0, 0, 1, 0));
        let r = component_indices_no_overlap(IntRect::new(7, 7, 7, 7), 7);
        assert_eq!(r, IntRect::new(1, 1, 1, 1));
    }
}
