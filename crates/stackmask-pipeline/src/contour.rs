//! Contour extraction and filling.
//!
//! Boundaries are traced with Suzuki-Abe border following
//! ([`imageproc::contours::find_contours`]). Only outermost borders
//! (no parent in the containment hierarchy) are candidates; the one with
//! the largest enclosed area is the significant foreground contour.
//!
//! Filling marks the contour itself and every pixel it encloses. Pixels
//! that are 4-connected to the image border without crossing the contour
//! are outside; an 8-connected border-following contour is always
//! watertight under 4-connectivity, so no scanline polygon rules are
//! needed.

use image::{GrayImage, Luma};
use imageproc::contours::BorderType;
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::types::{BACKGROUND, Contour, FOREGROUND, Point};

/// Trace all outermost contours in a binary image (non-zero pixels are
/// foreground), in discovery order.
///
/// Pixels outside the image count as background, so a region touching
/// the image edge still has an outer border.
#[must_use]
pub fn outer_contours(binary: &GrayImage) -> Vec<Contour> {
    let mut padded = GrayImage::new(binary.width() + 2, binary.height() + 2);
    image::imageops::replace(&mut padded, binary, 1, 1);
    imageproc::contours::find_contours::<u32>(&padded)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| {
            Contour::new(
                c.points
                    .into_iter()
                    .map(|p| Point::new(p.x.saturating_sub(1), p.y.saturating_sub(1)))
                    .collect(),
            )
        })
        .collect()
}

/// The contour with the largest enclosed area.
///
/// Ties keep the first contour found at the maximum area. Returns `None`
/// if `contours` is empty.
#[must_use]
pub fn significant_contour(contours: Vec<Contour>) -> Option<Contour> {
    let mut best: Option<(f64, Contour)> = None;
    for contour in contours {
        let area = contour.area();
        if best.as_ref().is_none_or(|(best_area, _)| area > *best_area) {
            best = Some((area, contour));
        }
    }
    best.map(|(_, contour)| contour)
}

/// Rasterize `contour` filled into a `width x height` mask.
#[must_use]
pub fn fill_contour(contour: &Contour, width: u32, height: u32) -> GrayImage {
    if contour.is_empty() {
        return GrayImage::new(width, height);
    }
    let mut barrier = GrayImage::from_pixel(width, height, Luma([FOREGROUND]));
    for p in contour.points() {
        if p.x < width && p.y < height {
            barrier.put_pixel(p.x, p.y, Luma([BACKGROUND]));
        }
    }

    // Label the open (non-contour) regions; label 0 marks the contour.
    let labels = connected_components(&barrier, Connectivity::Four, Luma([BACKGROUND]));

    let mut outside = vec![false; label_bound(&labels)];
    let mut mark = |x: u32, y: u32| {
        let label = labels.get_pixel(x, y).0[0] as usize;
        if label != 0 {
            outside[label] = true;
        }
    };
    for x in 0..width {
        mark(x, 0);
        mark(x, height.saturating_sub(1));
    }
    for y in 0..height {
        mark(0, y);
        mark(width.saturating_sub(1), y);
    }

    GrayImage::from_fn(width, height, |x, y| {
        let label = labels.get_pixel(x, y).0[0] as usize;
        if label == 0 || !outside[label] {
            Luma([FOREGROUND])
        } else {
            Luma([BACKGROUND])
        }
    })
}

/// One past the largest label in a labelled image.
pub(crate) fn label_bound(labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>) -> usize {
    labels.pixels().map(|p| p.0[0] as usize).max().unwrap_or(0) + 1
}

/// Trace the significant outer contour of `binary` and fill it.
///
/// Returns `None` when the image has no foreground.
#[must_use]
pub fn fill_significant(binary: &GrayImage) -> Option<(Contour, GrayImage)> {
    let contour = significant_contour(outer_contours(binary))?;
    let filled = fill_contour(&contour, binary.width(), binary.height());
    Some((contour, filled))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn count_foreground(img: &GrayImage) -> usize {
        img.pixels().filter(|p| p.0[0] == FOREGROUND).count()
    }

    /// One-pixel-wide square outline from (x0,y0) to (x1,y1) inclusive.
    fn outline(img: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) {
        for x in x0..=x1 {
            img.put_pixel(x, y0, Luma([FOREGROUND]));
            img.put_pixel(x, y1, Luma([FOREGROUND]));
        }
        for y in y0..=y1 {
            img.put_pixel(x0, y, Luma([FOREGROUND]));
            img.put_pixel(x1, y, Luma([FOREGROUND]));
        }
    }

    #[test]
    fn empty_image_produces_no_contours() {
        assert!(outer_contours(&GrayImage::new(10, 10)).is_empty());
        assert!(fill_significant(&GrayImage::new(10, 10)).is_none());
    }

    #[test]
    fn nested_outline_yields_only_outer_contour() {
        let mut img = GrayImage::new(30, 30);
        outline(&mut img, 2, 2, 27, 27);
        outline(&mut img, 10, 10, 20, 20);
        let contours = outer_contours(&img);
        assert_eq!(contours.len(), 1);
    }

    #[test]
    fn largest_of_disjoint_contours_is_significant() {
        let mut img = GrayImage::new(40, 20);
        outline(&mut img, 1, 1, 6, 6);
        outline(&mut img, 10, 2, 35, 17);
        let contour = significant_contour(outer_contours(&img)).unwrap();
        assert!(contour.area() > 300.0, "area {}", contour.area());
    }

    #[test]
    fn equal_area_tie_keeps_first() {
        let a = Contour::new(vec![
            Point::new(0, 0),
            Point::new(4, 0),
            Point::new(4, 4),
            Point::new(0, 4),
        ]);
        let b = Contour::new(vec![
            Point::new(10, 10),
            Point::new(14, 10),
            Point::new(14, 14),
            Point::new(10, 14),
        ]);
        let best = significant_contour(vec![a.clone(), b]).unwrap();
        assert_eq!(best, a);
    }

    #[test]
    fn filled_outline_covers_interior() {
        let mut img = GrayImage::new(20, 20);
        outline(&mut img, 5, 5, 14, 14);
        let (_, filled) = fill_significant(&img).unwrap();
        assert_eq!(count_foreground(&filled), 100);
        assert_eq!(filled.get_pixel(10, 10).0[0], FOREGROUND);
        assert_eq!(filled.get_pixel(2, 2).0[0], BACKGROUND);
    }

    #[test]
    fn fill_discards_inner_holes_and_islands() {
        let mut img = GrayImage::new(30, 30);
        outline(&mut img, 3, 3, 26, 26);
        outline(&mut img, 10, 10, 15, 15);
        img.put_pixel(1, 28, Luma([FOREGROUND]));
        let (_, filled) = fill_significant(&img).unwrap();
        assert_eq!(count_foreground(&filled), 24 * 24);
        assert_eq!(filled.get_pixel(1, 28).0[0], BACKGROUND);
    }

    #[test]
    fn contour_touching_border_still_fills() {
        let img = GrayImage::from_fn(10, 10, |x, _| {
            Luma([if x < 5 { FOREGROUND } else { BACKGROUND }])
        });
        let (_, filled) = fill_significant(&img).unwrap();
        assert_eq!(count_foreground(&filled), 50);
    }

    #[test]
    fn region_on_each_edge_has_one_outer_contour() {
        let blocks: [fn(u32, u32) -> bool; 4] = [
            |x, y| x < 20 && (10..40).contains(&y),
            |x, y| x >= 30 && (10..40).contains(&y),
            |x, y| y < 20 && (10..40).contains(&x),
            |x, y| y >= 30 && (10..40).contains(&x),
        ];
        for inside in blocks {
            let img = GrayImage::from_fn(50, 50, |x, y| {
                Luma([if inside(x, y) { FOREGROUND } else { BACKGROUND }])
            });
            let contours = outer_contours(&img);
            assert_eq!(contours.len(), 1);
            assert!(contours[0].points().iter().all(|p| p.x < 50 && p.y < 50));
            let (_, filled) = fill_significant(&img).unwrap();
            assert_eq!(count_foreground(&filled), 20 * 30);
        }
    }

    #[test]
    fn empty_contour_fills_nothing() {
        let filled = fill_contour(&Contour::new(vec![]), 8, 8);
        assert_eq!(count_foreground(&filled), 0);
    }
}
