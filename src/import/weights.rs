//! Per-component layer weights during bulk import.

use crate::layer::LayerInfoId;

/// How imported alpha maps combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum AlphamapType {
    /// Each layer is taken as painted and only normalized.
    #[default]
    Additive,
    /// Later layers sit on top and knock out the blended layers below them.
    Layered,
}

/// Layer weights of one component, one array of `(cq + 1)^2` vertex weights per layer.
///
/// Layers are ordered bottom to top.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentWeights {
    pub layers: Vec<LayerInfoId>,
    pub no_blend: Vec<bool>,
    pub weights: Vec<Vec<u8>>,
}

impl ComponentWeights {
    pub fn push(&mut self, layer: LayerInfoId, no_blend: bool, weights: Vec<u8>) {
        self.layers.push(layer);
        self.no_blend.push(no_blend);
        self.weights.push(weights);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn remove(&mut self, index: usize) {
        self.layers.remove(index);
        self.no_blend.remove(index);
        self.weights.remove(index);
    }

    /// Drop layers with no weight anywhere.
    pub fn remove_empty(&mut self) {
        let mut i = 0;
        while i < self.len() {
            if self.weights[i].iter().all(|&w| w == 0) {
                self.remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// Scale every blended layer below each layer by the inverse of that layer's weight.
    ///
    /// Layers knocked out completely are removed. A removal only shifts layers
    /// above the one removed, so the current top layer index moves down with it.
    pub fn apply_knockout(&mut self) {
        let mut top = self.len();
        while top > 0 {
            top -= 1;
            let mut below = top;
            while below > 0 {
                below -= 1;
                if self.no_blend[below] {
                    continue;
                }
                let (lower, upper) = self.weights.split_at_mut(top);
                let cover = &upper[0];
                let mut total = 0u32;
                for (w, c) in lower[below].iter_mut().zip(cover) {
                    *w = (*w as u32 * (255 - *c as u32) / 255) as u8;
                    total += *w as u32;
                }
                if total == 0 {
                    self.remove(below);
                    top -= 1;
                }
            }
        }
    }

    /// Make blended layer weights sum to exactly 255 at every vertex.
    ///
    /// The rounding remainder goes to the heaviest blended layer. A vertex where
    /// every blended layer is zero gets 255 in the first blended layer.
    pub fn normalize(&mut self) {
        let Some(count) = self.weights.first().map(Vec::len) else {
            return;
        };
        for idx in 0..count {
            let mut total = 0u32;
            let mut max_layer = None;
            let mut max_weight = 0u32;
            for (layer, weights) in self.weights.iter().enumerate() {
                if self.no_blend[layer] {
                    continue;
                }
                let w = weights[idx] as u32;
                total += w;
                if max_layer.is_none() || w > max_weight {
                    max_weight = w;
                    max_layer = Some(layer);
                }
            }
            let Some(max_layer) = max_layer else {
                continue;
            };
            if total == 0 {
                self.weights[max_layer][idx] = 255;
            } else if total != 255 {
                let factor = 255.0 / total as f32;
                let mut scaled_total = 0u32;
                for (layer, weights) in self.weights.iter_mut().enumerate() {
                    if self.no_blend[layer] {
                        continue;
                    }
                    weights[idx] = (factor * weights[idx] as f32) as u8;
                    scaled_total += weights[idx] as u32;
                }
                let remainder = 255u32.saturating_sub(scaled_total);
                let w = &mut self.weights[max_layer][idx];
                *w = (*w as u32 + remainder).min(255) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(layers: &[(u32, bool, u8)], count: usize) -> ComponentWeights {
        let mut w = ComponentWeights::default();
        for &(id, no_blend, value) in layers {
            w.push(LayerInfoId(id), no_blend, vec![value; count]);
        }
        w
    }

    fn blended_sum(w: &ComponentWeights, idx: usize) -> u32 {
        w.weights
            .iter()
            .zip(&w.no_blend)
            .filter(|(_, nb)| !**nb)
            .map(|(v, _)| v[idx] as u32)
            .sum()
    }

    #[test]
    fn test_knockout_then_normalize() {
        let mut w = weights(&[(1, false, 200), (2, false, 100)], 4);
        w.apply_knockout();
        assert_eq!(w.weights[0][0], 121);
        assert_eq!(w.weights[1][0], 100);
        w.normalize();
        assert_eq!(w.weights[0][0], 140);
        assert_eq!(w.weights[1][0], 115);
        assert_eq!(blended_sum(&w, 3), 255);
    }

    #[test]
    fn test_knockout_removes_covered_layers() {
        let mut w = weights(&[(1, false, 80), (2, false, 90), (3, false, 255)], 2);
        w.apply_knockout();
        assert_eq!(w.layers, vec![LayerInfoId(3)]);
        w.normalize();
        assert_eq!(w.weights[0], vec![255, 255]);
    }

    #[test]
    fn test_knockout_skips_no_blend_layers() {
        let mut w = weights(&[(1, true, 80), (2, false, 255)], 2);
        w.apply_knockout();
        assert_eq!(w.len(), 2);
        assert_eq!(w.weights[0], vec![80, 80]);
    }

    #[test]
    fn test_normalize_forces_a_layer_on_empty_vertices() {
        let mut w = ComponentWeights::default();
        w.push(LayerInfoId(1), false, vec![0, 10]);
        w.push(LayerInfoId(2), false, vec![0, 30]);
        w.push(LayerInfoId(3), true, vec![7, 7]);
        w.normalize();
        assert_eq!(w.weights[0][0], 255);
        assert_eq!(w.weights[1][0], 0);
        assert_eq!(blended_sum(&w, 1), 255);
        assert!(w.weights[1][1] > w.weights[0][1]);
        assert_eq!(w.weights[2], vec![7, 7]);
    }

    #[test]
    fn test_remove_empty() {
        let mut w = weights(&[(1, false, 0), (2, false, 9), (3, false, 0)], 3);
        w.remove_empty();
        assert_eq!(w.layers, vec![LayerInfoId(2)]);
    }
}
