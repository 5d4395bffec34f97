//! Local contrast enhancement ahead of edge detection.
//!
//! Two operations prepare the working image so that object boundaries
//! stand out against a plain backdrop:
//!
//! 1. [`clahe`]: contrast-limited adaptive histogram equalization. The
//!    image is divided into a `grid x grid` set of tiles, each tile gets
//!    its own clipped and redistributed histogram, and every pixel is
//!    mapped through a bilinear blend of the four nearest tile
//!    look-up tables.
//! 2. [`enhance_sharpness`]: extrapolates away from a smoothed copy,
//!    `out = smooth + factor * (orig - smooth)`. A factor of 1.0 returns
//!    the input; large factors exaggerate fine detail.

use image::{GrayImage, Luma};

const BINS: usize = 256;

/// One equalization look-up table per tile.
type Lut = [u8; BINS];

/// Contrast-limited adaptive histogram equalization.
///
/// `clip_limit` is expressed relative to a uniform histogram: a tile's
/// bin count is capped at `clip_limit * tile_pixels / 256` (at least 1),
/// and the clipped excess is spread evenly over all bins. A `grid` of 0
/// or an empty image returns the input unchanged.
#[must_use = "returns the equalized image"]
pub fn clahe(image: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    if grid == 0 || w == 0 || h == 0 {
        return image.clone();
    }

    let tile_w = w.div_ceil(grid);
    let tile_h = h.div_ceil(grid);

    let mut luts: Vec<Lut> = Vec::with_capacity((grid * grid) as usize);
    for ty in 0..grid {
        for tx in 0..grid {
            let x0 = (tx * tile_w).min(w);
            let y0 = (ty * tile_h).min(h);
            let x1 = ((tx + 1) * tile_w).min(w);
            let y1 = ((ty + 1) * tile_h).min(h);
            luts.push(tile_lut(image, x0, y0, x1, y1, clip_limit));
        }
    }

    let lut_at = |tx: u32, ty: u32| &luts[(ty * grid + tx) as usize];
    let max_tile = grid - 1;

    GrayImage::from_fn(w, h, |x, y| {
        let v = image.get_pixel(x, y).0[0] as usize;

        let (tx0, tx1, wx) = tile_neighbours(x, tile_w, max_tile);
        let (ty0, ty1, wy) = tile_neighbours(y, tile_h, max_tile);

        let top = f32::from(lut_at(tx0, ty0)[v]).mul_add(1.0 - wx, f32::from(lut_at(tx1, ty0)[v]) * wx);
        let bottom =
            f32::from(lut_at(tx0, ty1)[v]).mul_add(1.0 - wx, f32::from(lut_at(tx1, ty1)[v]) * wx);
        Luma([to_u8(top.mul_add(1.0 - wy, bottom * wy))])
    })
}

/// The two tile indices bracketing pixel coordinate `p` along one axis,
/// and the weight of the second.
fn tile_neighbours(p: u32, tile: u32, max_tile: u32) -> (u32, u32, f32) {
    #[allow(clippy::cast_precision_loss)]
    let f = (p as f32 + 0.5) / tile as f32 - 0.5;
    if f <= 0.0 {
        return (0, 0, 0.0);
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lo = f.floor() as u32;
    if lo >= max_tile {
        return (max_tile, max_tile, 0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let weight = f - lo as f32;
    (lo, lo + 1, weight)
}

/// Build the clipped equalization table for one tile. Empty tiles get
/// the identity table.
fn tile_lut(image: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> Lut {
    let mut lut = [0u8; BINS];
    let total = u64::from(x1 - x0) * u64::from(y1 - y0);
    if total == 0 {
        for (i, entry) in lut.iter_mut().enumerate() {
            *entry = u8::try_from(i).unwrap_or(u8::MAX);
        }
        return lut;
    }

    let mut hist = [0u64; BINS];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[image.get_pixel(x, y).0[0] as usize] += 1;
        }
    }

    if clip_limit > 0.0 {
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let limit = ((clip_limit * total as f32 / BINS as f32) as u64).max(1);
        let mut excess = 0u64;
        for bin in &mut hist {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let per_bin = excess / BINS as u64;
        let remainder = usize::try_from(excess % BINS as u64).unwrap_or(0);
        for (i, bin) in hist.iter_mut().enumerate() {
            *bin += per_bin;
            if i < remainder {
                *bin += 1;
            }
        }
    }

    let mut cdf = 0u64;
    #[allow(clippy::cast_precision_loss)]
    let scale = 255.0 / total as f32;
    for (entry, count) in lut.iter_mut().zip(hist) {
        cdf += count;
        #[allow(clippy::cast_precision_loss)]
        let mapped = cdf as f32 * scale;
        *entry = to_u8(mapped);
    }
    lut
}

/// Extrapolate `image` away from its smoothed copy by `factor`.
///
/// The smoothing kernel is `[1 1 1; 1 5 1; 1 1 1] / 13`. Border pixels
/// have no full neighbourhood and are copied through unchanged.
#[must_use = "returns the enhanced image"]
pub fn enhance_sharpness(image: &GrayImage, factor: f32) -> GrayImage {
    let (w, h) = image.dimensions();
    if w < 3 || h < 3 || (factor - 1.0).abs() < f32::EPSILON {
        return image.clone();
    }

    let at = |x: u32, y: u32| f32::from(image.get_pixel(x, y).0[0]);

    GrayImage::from_fn(w, h, |x, y| {
        let orig = at(x, y);
        if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
            return Luma([image.get_pixel(x, y).0[0]]);
        }
        let mut sum = 4.0 * orig;
        for dy in 0..3 {
            for dx in 0..3 {
                sum += at(x + dx - 1, y + dy - 1);
            }
        }
        let smooth = sum / 13.0;
        Luma([to_u8(factor.mul_add(orig - smooth, smooth))])
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
