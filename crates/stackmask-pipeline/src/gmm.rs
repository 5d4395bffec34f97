//! Gaussian mixture color models for trimap refinement.
//!
//! Each model has a fixed number of full-covariance RGB components.
//! Components are seeded by a deterministic k-means (centers start at
//! the means of luminance quantiles) so that the same image always
//! produces the same model.

/// Number of mixture components per model.
pub const COMPONENTS: usize = 5;

/// Regularization added to the covariance diagonal of singular
/// components.
const VARIANCE_FLOOR: f64 = 0.01;

/// Lloyd iterations used to seed the components.
const KMEANS_ITERATIONS: usize = 10;

/// An RGB sample in 0-255 space.
pub type Color = [f64; 3];

#[derive(Debug, Clone, Copy, Default)]
struct Component {
    weight: f64,
    mean: Color,
    inverse: [[f64; 3]; 3],
    det: f64,
}

impl Component {
    /// Unnormalized Gaussian density (the constant `(2pi)^-3/2` factor
    /// is dropped).
    fn density(&self, c: Color) -> f64 {
        if self.weight <= 0.0 {
            return 0.0;
        }
        let d = [c[0] - self.mean[0], c[1] - self.mean[1], c[2] - self.mean[2]];
        let mut mahalanobis = 0.0;
        for (i, row) in self.inverse.iter().enumerate() {
            mahalanobis += d[i] * (row[0] * d[0] + row[1] * d[1] + row[2] * d[2]);
        }
        (-0.5 * mahalanobis).exp() / self.det.sqrt()
    }
}

/// A Gaussian mixture model over RGB colors.
#[derive(Debug, Clone)]
pub struct Gmm {
    components: [Component; COMPONENTS],
}

impl Gmm {
    /// Fit a model to `samples`, where `assignment[i]` is the component
    /// (`< COMPONENTS`) that sample `i` belongs to. Components with no
    /// samples get zero weight.
    #[must_use]
    pub fn learn(samples: &[Color], assignment: &[usize]) -> Self {
        let mut counts = [0usize; COMPONENTS];
        let mut sums = [[0.0_f64; 3]; COMPONENTS];
        let mut products = [[[0.0_f64; 3]; 3]; COMPONENTS];

        for (c, &k) in samples.iter().zip(assignment) {
            let k = k.min(COMPONENTS - 1);
            counts[k] += 1;
            for i in 0..3 {
                sums[k][i] += c[i];
                for j in 0..3 {
                    products[k][i][j] += c[i] * c[j];
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let total = samples.len() as f64;
        let mut components = [Component::default(); COMPONENTS];
        for (k, component) in components.iter_mut().enumerate() {
            if counts[k] == 0 {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let n = counts[k] as f64;
            let mean = [sums[k][0] / n, sums[k][1] / n, sums[k][2] / n];
            let mut cov = [[0.0_f64; 3]; 3];
            for i in 0..3 {
                for j in 0..3 {
                    cov[i][j] = products[k][i][j] / n - mean[i] * mean[j];
                }
            }
            let mut det = determinant(&cov);
            if det <= f64::EPSILON {
                for (i, row) in cov.iter_mut().enumerate() {
                    row[i] += VARIANCE_FLOOR;
                }
                det = determinant(&cov);
            }
            if det <= 0.0 {
                continue;
            }
            *component = Component {
                weight: n / total,
                mean,
                inverse: inverse(&cov, det),
                det,
            };
        }
        Self { components }
    }

    /// Fit a model to `samples` using the deterministic k-means seeding.
    #[must_use]
    pub fn fit(samples: &[Color]) -> Self {
        Self::learn(samples, &kmeans(samples))
    }

    /// Mixture likelihood of `c`.
    #[must_use]
    pub fn probability(&self, c: Color) -> f64 {
        self.components
            .iter()
            .map(|comp| comp.weight * comp.density(c))
            .sum()
    }

    /// The component most likely to have produced `c`. Ties keep the
    /// lowest index.
    #[must_use]
    pub fn most_likely_component(&self, c: Color) -> usize {
        let mut best = 0;
        let mut best_p = f64::NEG_INFINITY;
        for (k, comp) in self.components.iter().enumerate() {
            let p = comp.weight * comp.density(c);
            if p > best_p {
                best = k;
                best_p = p;
            }
        }
        best
    }
}

/// Deterministic k-means over RGB samples.
///
/// Centers start at the means of `COMPONENTS` equal luminance quantiles,
/// then run a fixed number of Lloyd iterations. Returns the final
/// component index of each sample.
#[must_use]
pub fn kmeans(samples: &[Color]) -> Vec<usize> {
    if samples.is_empty() {
        return Vec::new();
    }

    let luminance = |c: &Color| 0.114f64.mul_add(c[2], 0.299f64.mul_add(c[0], 0.587 * c[1]));
    let mut order: Vec<usize> = (0..samples.len()).collect();
    order.sort_by(|&a, &b| {
        luminance(&samples[a])
            .total_cmp(&luminance(&samples[b]))
            .then(a.cmp(&b))
    });

    let n = samples.len();
    let mut centers = [[0.0_f64; 3]; COMPONENTS];
    for (k, center) in centers.iter_mut().enumerate() {
        let start = k * n / COMPONENTS;
        let end = ((k + 1) * n / COMPONENTS).max(start + 1).min(n);
        let start = start.min(end - 1);
        *center = mean_of(order[start..end].iter().map(|&i| samples[i]));
    }

    let mut assignment = vec![0usize; n];
    for _ in 0..KMEANS_ITERATIONS {
        for (slot, c) in assignment.iter_mut().zip(samples) {
            *slot = nearest(&centers, *c);
        }
        let mut sums = [[0.0_f64; 3]; COMPONENTS];
        let mut counts = [0usize; COMPONENTS];
        for (&k, c) in assignment.iter().zip(samples) {
            counts[k] += 1;
            for i in 0..3 {
                sums[k][i] += c[i];
            }
        }
        for k in 0..COMPONENTS {
            if counts[k] > 0 {
                #[allow(clippy::cast_precision_loss)]
                let count = counts[k] as f64;
                centers[k] = [sums[k][0] / count, sums[k][1] / count, sums[k][2] / count];
            }
        }
    }
    for (slot, c) in assignment.iter_mut().zip(samples) {
        *slot = nearest(&centers, *c);
    }
    assignment
}

fn nearest(centers: &[Color; COMPONENTS], c: Color) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (k, center) in centers.iter().enumerate() {
        let d = (0..3).map(|i| (c[i] - center[i]).powi(2)).sum::<f64>();
        if d < best_d {
            best = k;
            best_d = d;
        }
    }
    best
}

fn mean_of(colors: impl Iterator<Item = Color>) -> Color {
    let mut sum = [0.0_f64; 3];
    let mut n = 0usize;
    for c in colors {
        n += 1;
        for i in 0..3 {
            sum[i] += c[i];
        }
    }
    if n == 0 {
        return sum;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = n as f64;
    [sum[0] / n, sum[1] / n, sum[2] / n]
}

fn determinant(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn inverse(m: &[[f64; 3]; 3], det: f64) -> [[f64; 3]; 3] {
    [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) / det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) / det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) / det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) / det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) / det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) / det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) / det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) / det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) / det,
        ],
    ]
}
