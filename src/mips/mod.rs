//! Mip chain generation for heightmaps and weightmaps.
//!
//! Mips that still map one texel to one vertex are generated per subsection by
//! bilinear resampling, because each subsection carries a duplicated border row.
//! Once a texel would span subsections the chain continues with a plain 2x2 box
//! average; those mips are only sampled by pixel shaders.

mod filter;

pub use filter::{HeightmapFilter, MipFilter, WeightmapFilter};

use crate::texture::{mip_size, Texture, TextureDataInfo};
use crate::types::{floor_log2, Color};

/// Subsection layout of the components stored in a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsectionLayout {
    pub num_subsections: i32,
    pub subsection_size_quads: i32,
}

impl SubsectionLayout {
    pub fn new(num_subsections: i32, subsection_size_quads: i32) -> Self {
        Self {
            num_subsections,
            subsection_size_quads,
        }
    }

    /// Last mip in which every texel comes from a single subsection.
    pub fn max_whole_subsection_mip(&self) -> usize {
        (floor_log2((self.subsection_size_quads + 1) as u32) as usize).saturating_sub(1)
    }
}

/// Region of a component (in mip 0 quads) whose mips must be regenerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipUpdateRegion {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    /// The component is the last one in its texture row; replicate its last column.
    pub pad_end_x: bool,
    /// The component is the last one in its texture column; replicate its last row.
    pub pad_end_y: bool,
}

impl MipUpdateRegion {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            pad_end_x: false,
            pad_end_y: false,
        }
    }

    /// The whole component.
    pub fn whole(component_size_quads: i32) -> Self {
        Self::new(0, 0, component_size_quads, component_size_quads)
    }

    pub fn with_padding(mut self, pad_end_x: bool, pad_end_y: bool) -> Self {
        self.pad_end_x = pad_end_x;
        self.pad_end_y = pad_end_y;
        self
    }
}

/// Number of heightmap mips that still represent vertices.
pub fn heightmap_vertex_mip_count(size_x: i32, size_y: i32, subsection_size_quads: i32) -> usize {
    let (mut u, mut v, mut sub) = (size_x, size_y, subsection_size_quads);
    let mut count = 0;
    while u > 1 && v > 1 && sub >= 1 {
        count += 1;
        u >>= 1;
        v >>= 1;
        sub = ((sub + 1) >> 1) - 1;
    }
    count
}

/// Regenerate mips `1..num_mips` of one component block by per-subsection bilinear resampling.
///
/// `offset` is the texel position of the component block in mip 0.
#[allow(clippy::too_many_arguments)]
pub fn update_subsection_mips<F: MipFilter>(
    mips: &mut [Vec<Color>],
    size: (i32, i32),
    offset: (i32, i32),
    layout: SubsectionLayout,
    num_mips: usize,
    region: MipUpdateRegion,
    mut info: Option<&mut TextureDataInfo>,
) {
    let s = layout.subsection_size_quads;
    let n = layout.num_subsections;
    let num_mips = num_mips.min(mips.len());

    for sub_y in 0..n {
        if region.y2 < s * sub_y || region.y1 > s * (sub_y + 1) {
            continue;
        }
        for sub_x in 0..n {
            if region.x2 < s * sub_x || region.x1 > s * (sub_x + 1) {
                continue;
            }

            let mut prev_x1 = region.x1 - s * sub_x;
            let mut prev_y1 = region.y1 - s * sub_y;
            let mut prev_x2 = region.x2 - s * sub_x;
            let mut prev_y2 = region.y2 - s * sub_y;
            let mut prev_sub = s;
            let mut prev_size = size;
            let mut prev_offset = offset;

            for mip in 1..num_mips {
                let cur_size = mip_size(size.0, size.1, mip);
                let mip_sub = ((s + 1) >> mip) - 1;
                if mip_sub < 1 {
                    break;
                }
                let cur_offset = (offset.0 >> mip, offset.1 >> mip);
                let inv_prev = 1.0 / prev_sub as f32;
                let inv_mip = 1.0 / mip_sub as f32;

                let mip_x1 = (mip_sub as f32 * prev_x1 as f32 * inv_prev).floor() as i32;
                let mip_y1 = (mip_sub as f32 * prev_y1 as f32 * inv_prev).floor() as i32;
                let mip_x2 = (mip_sub as f32 * prev_x2 as f32 * inv_prev).ceil() as i32;
                let mip_y2 = (mip_sub as f32 * prev_y2 as f32 * inv_prev).ceil() as i32;

                let vx1 = mip_x1.clamp(0, mip_sub);
                let vy1 = mip_y1.clamp(0, mip_sub);
                let vx2 = mip_x2.clamp(0, mip_sub);
                let vy2 = mip_y2.clamp(0, mip_sub);

                let (lower, upper) = mips.split_at_mut(mip);
                let prev = &mut lower[mip - 1];
                let cur = &mut upper[0];

                for vy in vy1..=vy2 {
                    for vx in vx1..=vx2 {
                        let prev_vx = prev_sub as f32 * vx as f32 * inv_mip;
                        let prev_vy = prev_sub as f32 * vy as f32 * inv_mip;

                        let tex_x = cur_offset.0 + (mip_sub + 1) * sub_x + vx;
                        let tex_y = cur_offset.1 + (mip_sub + 1) * sub_y + vy;

                        let f_prev_x = prev_offset.0 as f32 + ((prev_sub + 1) * sub_x) as f32 + prev_vx;
                        let f_prev_y = prev_offset.1 as f32 + ((prev_sub + 1) * sub_y) as f32 + prev_vy;
                        let px = f_prev_x.floor() as i32;
                        let py = f_prev_y.floor() as i32;
                        let fx = f_prev_x - px as f32;
                        let fy = f_prev_y - py as f32;
                        let px1 = (px + 1).min(prev_size.0 - 1);
                        let py1 = (py + 1).min(prev_size.1 - 1);

                        let last_x = sub_x == n - 1 && vx == vx2;
                        let last_xy = last_x && sub_y == n - 1 && vy == vy2;

                        if mip == 1 {
                            if region.pad_end_x && last_x {
                                pad_row(prev, prev_size.0, px, py);
                            }
                            if region.pad_end_y && last_xy {
                                pad_rows(prev, prev_size, py);
                            }
                        }

                        let w = prev_size.0;
                        let t00 = prev[(px + py * w) as usize];
                        let t10 = prev[(px1 + py * w) as usize];
                        let t01 = prev[(px + py1 * w) as usize];
                        let t11 = prev[(px1 + py1 * w) as usize];
                        cur[(tex_x + tex_y * cur_size.0) as usize] = F::lerp(t00, t10, t01, t11, fx, fy);

                        if region.pad_end_x && last_x {
                            pad_row(cur, cur_size.0, tex_x, tex_y);
                        }
                        if region.pad_end_y && last_xy {
                            pad_rows(cur, cur_size, tex_y);
                        }
                    }
                }

                if let Some(info) = info.as_deref_mut() {
                    info.add_mip_update_region(
                        mip,
                        cur_offset.0 + (mip_sub + 1) * sub_x + vx1,
                        cur_offset.1 + (mip_sub + 1) * sub_y + vy1,
                        cur_offset.0 + (mip_sub + 1) * sub_x + vx2,
                        cur_offset.1 + (mip_sub + 1) * sub_y + vy2,
                    );
                }

                prev_sub = mip_sub;
                prev_size = cur_size;
                prev_offset = cur_offset;
                prev_x1 = mip_x1;
                prev_y1 = mip_y1;
                prev_x2 = mip_x2;
                prev_y2 = mip_y2;
            }
        }
    }
}

/// Regenerate mips `first_mip..` by 2x2 box averaging of the previous mip.
pub fn update_box_mips<F: MipFilter>(
    mips: &mut [Vec<Color>],
    size: (i32, i32),
    first_mip: usize,
    mut info: Option<&mut TextureDataInfo>,
) {
    for mip in first_mip.max(1)..mips.len() {
        let (w, h) = mip_size(size.0, size.1, mip);
        let (pw, ph) = mip_size(size.0, size.1, mip - 1);
        let (lower, upper) = mips.split_at_mut(mip);
        let prev = &lower[mip - 1];
        let cur = &mut upper[0];
        for y in 0..h {
            let y0 = (y * 2).min(ph - 1);
            let y1 = (y * 2 + 1).min(ph - 1);
            for x in 0..w {
                let x0 = (x * 2).min(pw - 1);
                let x1 = (x * 2 + 1).min(pw - 1);
                cur[(x + y * w) as usize] = F::average(
                    prev[(x0 + y0 * pw) as usize],
                    prev[(x1 + y0 * pw) as usize],
                    prev[(x0 + y1 * pw) as usize],
                    prev[(x1 + y1 * pw) as usize],
                );
            }
        }
        if let Some(info) = info.as_deref_mut() {
            info.add_mip_update_region(mip, 0, 0, w - 1, h - 1);
        }
    }
}

/// Regenerate a weightmap's mip chain after `region` of its component changed.
pub fn update_weightmap_mips(
    texture: &mut Texture,
    layout: SubsectionLayout,
    region: MipUpdateRegion,
    mut info: Option<&mut TextureDataInfo>,
) {
    let size = (texture.size_x, texture.size_y);
    let max_whole = layout.max_whole_subsection_mip();
    update_subsection_mips::<WeightmapFilter>(
        &mut texture.mips,
        size,
        (0, 0),
        layout,
        max_whole + 1,
        region,
        info.as_deref_mut(),
    );
    update_box_mips::<WeightmapFilter>(&mut texture.mips, size, max_whole + 1, info);
}

/// Regenerate the vertex mips of one component block of a heightmap.
pub fn update_heightmap_mips(
    texture: &mut Texture,
    offset: (i32, i32),
    layout: SubsectionLayout,
    region: MipUpdateRegion,
    info: Option<&mut TextureDataInfo>,
) {
    let size = (texture.size_x, texture.size_y);
    let count = heightmap_vertex_mip_count(size.0, size.1, layout.subsection_size_quads);
    update_subsection_mips::<HeightmapFilter>(
        &mut texture.mips,
        size,
        offset,
        layout,
        count,
        region,
        info,
    );
}

/// Fill the heightmap mips below the vertex mips by box averaging.
pub fn update_heightmap_box_mips(
    texture: &mut Texture,
    layout: SubsectionLayout,
    info: Option<&mut TextureDataInfo>,
) {
    let size = (texture.size_x, texture.size_y);
    let count = heightmap_vertex_mip_count(size.0, size.1, layout.subsection_size_quads);
    update_box_mips::<HeightmapFilter>(&mut texture.mips, size, count.max(1), info);
}

/// Replicate texel `(x, y)` to the end of its row.
fn pad_row(data: &mut [Color], width: i32, x: i32, y: i32) {
    let start = (x + y * width) as usize;
    let end = ((y + 1) * width) as usize;
    for i in start..end.saturating_sub(1) {
        data[i + 1] = data[i];
    }
}

/// Replicate row `y` down to the last row.
fn pad_rows(data: &mut [Color], size: (i32, i32), y: i32) {
    let (w, h) = size;
    for py in y..h - 1 {
        for px in 0..w {
            data[(px + (py + 1) * w) as usize] = data[(px + py * w) as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::{TextureId, TextureKind};

    fn filled(kind: TextureKind, size: i32, color: Color) -> Texture {
        let mut t = Texture::new("t", kind, size, size);
        for texel in t.mip_mut(0) {
            *texel = color;
        }
        t
    }

    #[test]
    fn test_constant_heightmap_mips_stay_constant() {
        let h = Color::from_height(40000, 130, 120);
        let mut t = filled(TextureKind::Heightmap, 8, h);
        let layout = SubsectionLayout::new(2, 3);
        update_heightmap_mips(&mut t, (0, 0), layout, MipUpdateRegion::whole(6), None);
        update_heightmap_box_mips(&mut t, layout, None);
        for mip in 0..t.num_mips() {
            assert!(t.mip(mip).iter().all(|c| *c == h), "mip {} not constant", mip);
        }
    }

    #[test]
    fn test_constant_weightmap_mips_stay_constant() {
        let w = Color::new(255, 0, 17, 99);
        let mut t = filled(TextureKind::Weightmap, 16, w);
        update_weightmap_mips(&mut t, SubsectionLayout::new(2, 7), MipUpdateRegion::whole(14), None);
        for mip in 0..t.num_mips() {
            assert!(t.mip(mip).iter().all(|c| *c == w), "mip {} not constant", mip);
        }
    }

    #[test]
    fn test_vertex_mip_count() {
        assert_eq!(heightmap_vertex_mip_count(8, 8, 7), 3);
        assert_eq!(heightmap_vertex_mip_count(8, 8, 3), 2);
        assert_eq!(heightmap_vertex_mip_count(64, 64, 7), 3);
        assert_eq!(SubsectionLayout::new(1, 7).max_whole_subsection_mip(), 2);
    }

    #[test]
    fn test_subsection_resample_keeps_corners() {
        // One 7-quad subsection; mip 1 has 4 vertices that sample mip 0 at 0, 7/3, 14/3, 7.
        let mut t = Texture::new("hm", TextureKind::Heightmap, 8, 8);
        for y in 0..8 {
            for x in 0..8 {
                t.mip_mut(0)[x + y * 8] = Color::from_height((x * 100) as u16, 0, 0);
            }
        }
        update_heightmap_mips(&mut t, (0, 0), SubsectionLayout::new(1, 7), MipUpdateRegion::whole(7), None);
        let mip1 = t.mip(1);
        assert_eq!(mip1[0].height(), 0);
        assert_eq!(mip1[3].height(), 700);
        assert_eq!(mip1[1].height(), 233);
    }

    #[test]
    fn test_region_is_recorded_per_mip() {
        let mut t = Texture::new("wm", TextureKind::Weightmap, 8, 8);
        let mut info = TextureDataInfo::new(TextureId(0), t.num_mips());
        update_weightmap_mips(
            &mut t,
            SubsectionLayout::new(1, 7),
            MipUpdateRegion::new(0, 0, 2, 2),
            Some(&mut info),
        );
        let r = info.bounds(1);
        assert_eq!((r.x1, r.y1), (0, 0));
        assert_eq!((r.x2, r.y2), (1, 1));
        assert_eq!(info.bounds(3).width(), 1);
    }

    #[test]
    fn test_padding_replicates_last_column() {
        // Component block of 4 texels in an 8 wide texture.
        let mut t = Texture::new("hm", TextureKind::Heightmap, 8, 8);
        for y in 0..4 {
            for x in 0..4 {
                t.mip_mut(0)[x + y * 8] = Color::from_height(1000 + x as u16, 0, 0);
            }
        }
        let region = MipUpdateRegion::whole(3).with_padding(true, true);
        update_heightmap_mips(&mut t, (0, 0), SubsectionLayout::new(1, 3), region, None);
        let mip0 = t.mip(0);
        assert_eq!(mip0[7].height(), 1003);
        assert_eq!(mip0[7 + 7 * 8].height(), 1003);
        let mip1 = t.mip(1);
        assert_eq!(mip1[3].height(), 1003);
    }
}
