//! Trimap construction and iterative foreground/background refinement.
//!
//! The initial filled contour is eroded into a definite-foreground core.
//! Together with the contour mask that gives a [`Trimap`]: outside the
//! mask is definite background, the band between mask edge and core is
//! probable background, the core is definite foreground.
//!
//! [`grabcut`] then alternates between fitting two color mixture models
//! (foreground and background, see [`crate::gmm`]) and solving a
//! minimum cut over the pixel grid (see [`crate::maxflow`]). Only the
//! probable pixels can change label. Definite pixels are contracted
//! into the source and sink, so the graph covers just the probable band.
//!
//! Energy terms follow Rother, Kolmogorov and Blake, "GrabCut:
//! interactive foreground extraction using iterated graph cuts"
//! (SIGGRAPH 2004): data term `-ln p(color)` under each model and an
//! 8-neighbour contrast term `gamma * exp(-beta * |dc|^2) / dist`.

use image::GrayImage;
use imageproc::distance_transform::Norm;
use serde::{Deserialize, Serialize};

use crate::gmm::{Color, Gmm};
use crate::maxflow::FlowGraph;
use crate::types::{BACKGROUND, FOREGROUND, RgbImage};

/// Smoothness weight of the contrast term.
const GAMMA: f64 = 50.0;

/// Floor for mixture likelihoods before taking logarithms.
const MIN_PROBABILITY: f64 = 1e-300;

/// Per-pixel trimap label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrimapLabel {
    /// Definite background; never changes.
    Background,
    /// Definite foreground; never changes.
    Foreground,
    /// Probable background; may flip during refinement.
    ProbableBackground,
    /// Probable foreground; may flip during refinement.
    ProbableForeground,
}

impl TrimapLabel {
    /// Whether the label counts as foreground in the output mask.
    #[must_use]
    pub const fn is_foreground(self) -> bool {
        matches!(self, Self::Foreground | Self::ProbableForeground)
    }

    const fn is_probable(self) -> bool {
        matches!(self, Self::ProbableBackground | Self::ProbableForeground)
    }
}

/// Number of pixels carrying each label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimapCounts {
    /// Definite background pixels.
    pub background: u64,
    /// Probable background pixels.
    pub probable_background: u64,
    /// Probable foreground pixels.
    pub probable_foreground: u64,
    /// Definite foreground pixels.
    pub foreground: u64,
}

/// A per-pixel three-way (four with probable foreground) labeling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trimap {
    width: u32,
    height: u32,
    labels: Vec<TrimapLabel>,
}

impl Trimap {
    /// Build a trimap from a filled contour mask and its eroded core.
    ///
    /// Pixels outside `mask` are background, pixels in `core` are
    /// foreground, everything in between is probable background.
    /// `core` must have the same dimensions as `mask`; missing pixels
    /// count as outside the core.
    #[must_use]
    pub fn from_masks(mask: &GrayImage, core: &GrayImage) -> Self {
        let (width, height) = mask.dimensions();
        let labels = mask
            .enumerate_pixels()
            .map(|(x, y, p)| {
                let in_core = core
                    .get_pixel_checked(x, y)
                    .is_some_and(|c| c.0[0] == FOREGROUND);
                match (p.0[0] == FOREGROUND, in_core) {
                    (false, _) => TrimapLabel::Background,
                    (true, true) => TrimapLabel::Foreground,
                    (true, false) => TrimapLabel::ProbableBackground,
                }
            })
            .collect();
        Self {
            width,
            height,
            labels,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Label at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are out of bounds.
    #[must_use]
    pub fn label(&self, x: u32, y: u32) -> TrimapLabel {
        self.labels[(y * self.width + x) as usize]
    }

    /// Tally of each label.
    #[must_use]
    pub fn counts(&self) -> TrimapCounts {
        let mut counts = TrimapCounts::default();
        for label in &self.labels {
            match label {
                TrimapLabel::Background => counts.background += 1,
                TrimapLabel::Foreground => counts.foreground += 1,
                TrimapLabel::ProbableBackground => counts.probable_background += 1,
                TrimapLabel::ProbableForeground => counts.probable_foreground += 1,
            }
        }
        counts
    }

    /// Binary mask of the foreground-side labels.
    #[must_use]
    pub fn foreground_mask(&self) -> GrayImage {
        let raw = self
            .labels
            .iter()
            .map(|l| if l.is_foreground() { FOREGROUND } else { BACKGROUND })
            .collect();
        GrayImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }
}

/// Erode `mask` by `iterations` passes of a `(2 * radius + 1)` square
/// structuring element.
///
/// Repeated square erosions compose into a single erosion by the summed
/// radius under the chessboard norm. Pixels outside the image do not
/// erode the mask.
#[must_use = "returns the eroded mask"]
pub fn erode_core(mask: &GrayImage, radius: u8, iterations: u32) -> GrayImage {
    let total = u32::from(radius).saturating_mul(iterations);
    if total == 0 {
        return mask.clone();
    }
    let k = u8::try_from(total).unwrap_or(u8::MAX);
    imageproc::morphology::erode(mask, Norm::LInf, k)
}

/// Refine `trimap` in place with `iterations` rounds of mixture fitting
/// and minimum cut over `image`.
///
/// Returns `false` without touching the trimap when refinement is not
/// possible: the dimensions disagree, or either side (definite plus
/// probable) has no pixels to learn a color model from.
pub fn grabcut(image: &RgbImage, trimap: &mut Trimap, iterations: u32) -> bool {
    if image.dimensions() != (trimap.width, trimap.height) {
        return false;
    }

    let colors: Vec<Color> = image
        .pixels()
        .map(|p| [f64::from(p.0[0]), f64::from(p.0[1]), f64::from(p.0[2])])
        .collect();

    let (bg, fg) = split_samples(&colors, &trimap.labels);
    if bg.is_empty() || fg.is_empty() {
        return false;
    }
    let mut bg_model = Gmm::fit(&bg);
    let mut fg_model = Gmm::fit(&fg);

    let links = NeighbourLinks::new(&colors, trimap.width, trimap.height);

    for _ in 0..iterations {
        let (bg, fg) = split_samples(&colors, &trimap.labels);
        if bg.is_empty() || fg.is_empty() {
            break;
        }
        bg_model = relearn(&bg_model, &bg);
        fg_model = relearn(&fg_model, &fg);
        cut(trimap, &colors, &links, &bg_model, &fg_model);
    }
    true
}

fn split_samples(colors: &[Color], labels: &[TrimapLabel]) -> (Vec<Color>, Vec<Color>) {
    let mut bg = Vec::new();
    let mut fg = Vec::new();
    for (c, label) in colors.iter().zip(labels) {
        if label.is_foreground() {
            fg.push(*c);
        } else {
            bg.push(*c);
        }
    }
    (bg, fg)
}

/// Assign each sample to its most likely component and refit.
fn relearn(model: &Gmm, samples: &[Color]) -> Gmm {
    let assignment: Vec<usize> = samples
        .iter()
        .map(|&c| model.most_likely_component(c))
        .collect();
    Gmm::learn(samples, &assignment)
}

/// Contrast-sensitive weights to the four "backward" neighbours of each
/// pixel: left, up-left, up, up-right. Each undirected pair appears once.
struct NeighbourLinks {
    width: u32,
    height: u32,
    weights: Vec<[f64; 4]>,
}

const BACKWARD: [(i64, i64); 4] = [(-1, 0), (-1, -1), (0, -1), (1, -1)];

impl NeighbourLinks {
    fn new(colors: &[Color], width: u32, height: u32) -> Self {
        let index = |x: i64, y: i64| -> Option<usize> {
            (x >= 0 && y >= 0 && x < i64::from(width) && y < i64::from(height))
                .then(|| usize::try_from(y * i64::from(width) + x).ok())
                .flatten()
        };
        let dist2 = |a: &Color, b: &Color| (0..3).map(|i| (a[i] - b[i]).powi(2)).sum::<f64>();

        let mut sum = 0.0;
        let mut pairs = 0u64;
        for y in 0..i64::from(height) {
            for x in 0..i64::from(width) {
                let Some(p) = index(x, y) else { continue };
                for (dx, dy) in BACKWARD {
                    if let Some(q) = index(x + dx, y + dy) {
                        sum += dist2(&colors[p], &colors[q]);
                        pairs += 1;
                    }
                }
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let beta = if sum <= f64::EPSILON {
            0.0
        } else {
            1.0 / (2.0 * sum / pairs as f64)
        };

        let diagonal = GAMMA / std::f64::consts::SQRT_2;
        let mut weights = vec![[0.0; 4]; colors.len()];
        for y in 0..i64::from(height) {
            for x in 0..i64::from(width) {
                let Some(p) = index(x, y) else { continue };
                for (slot, (dx, dy)) in BACKWARD.iter().enumerate() {
                    if let Some(q) = index(x + dx, y + dy) {
                        let scale = if *dx != 0 && *dy != 0 { diagonal } else { GAMMA };
                        weights[p][slot] = scale * (-beta * dist2(&colors[p], &colors[q])).exp();
                    }
                }
            }
        }
        Self {
            width,
            height,
            weights,
        }
    }

    /// Neighbour index and weight pairs for pixel `(x, y)`.
    fn backward(&self, x: u32, y: u32) -> impl Iterator<Item = (usize, f64)> + '_ {
        let p = (y * self.width + x) as usize;
        BACKWARD.iter().enumerate().filter_map(move |(slot, (dx, dy))| {
            let nx = i64::from(x) + dx;
            let ny = i64::from(y) + dy;
            if nx < 0 || ny < 0 || nx >= i64::from(self.width) || ny >= i64::from(self.height) {
                return None;
            }
            let q = usize::try_from(ny * i64::from(self.width) + nx).ok()?;
            Some((q, self.weights[p][slot]))
        })
    }
}

/// One graph-cut step: relabel the probable pixels.
fn cut(trimap: &mut Trimap, colors: &[Color], links: &NeighbourLinks, bg: &Gmm, fg: &Gmm) {
    let mut node_of = vec![u32::MAX; trimap.labels.len()];
    let mut pixels = Vec::new();
    for (p, label) in trimap.labels.iter().enumerate() {
        if label.is_probable() {
            node_of[p] = u32::try_from(pixels.len()).unwrap_or(u32::MAX);
            pixels.push(p);
        }
    }
    if pixels.is_empty() {
        return;
    }

    let mut graph = FlowGraph::new(pixels.len());
    for (node, &p) in pixels.iter().enumerate() {
        let node = u32::try_from(node).unwrap_or(u32::MAX);
        let c = colors[p];
        graph.add_terminal(
            node,
            -bg.probability(c).max(MIN_PROBABILITY).ln(),
            -fg.probability(c).max(MIN_PROBABILITY).ln(),
        );
    }

    for y in 0..trimap.height {
        for x in 0..trimap.width {
            let p = (y * trimap.width + x) as usize;
            for (q, w) in links.backward(x, y) {
                link(&mut graph, trimap, &node_of, p, q, w);
            }
        }
    }

    let result = graph.min_cut();
    for (node, &p) in pixels.iter().enumerate() {
        trimap.labels[p] = if result.source_side[node] {
            TrimapLabel::ProbableForeground
        } else {
            TrimapLabel::ProbableBackground
        };
    }
}

/// Add the pairwise term between pixels `p` and `q`. A definite
/// neighbour acts as the terminal it is tied to.
fn link(graph: &mut FlowGraph, trimap: &Trimap, node_of: &[u32], p: usize, q: usize, w: f64) {
    let (np, nq) = (node_of[p], node_of[q]);
    match (np != u32::MAX, nq != u32::MAX) {
        (true, true) => graph.add_edge(np, nq, w, w),
        (true, false) => attach(graph, np, trimap.labels[q], w),
        (false, true) => attach(graph, nq, trimap.labels[p], w),
        (false, false) => {}
    }
}

fn attach(graph: &mut FlowGraph, node: u32, fixed: TrimapLabel, w: f64) {
    if fixed.is_foreground() {
        graph.add_terminal(node, w, 0.0);
    } else {
        graph.add_terminal(node, 0.0, w);
    }
}
