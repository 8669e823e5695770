//! # Similarity and Concordance Metrics
//!
//! Pairwise statistics over the rows of a variable × factor correlation matrix, and the
//! aggregate statistics that compare those pairwise similarities against a prior.
//!
//! Any statistic that is undefined for its input (too few observations, zero variance) is
//! reported as `None`. Nothing in this module substitutes a numeric default.

use crate::indices::prior::PriorMatrix;
use ndarray::{Array2, ArrayView1, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Tie-aware Kendall rank correlation (τ-b).
///
/// Pairs tied in both sequences contribute to neither tie count. Returns `None` when the
/// sequences are shorter than two, contain NaN, or when either sequence has no untied pair, in
/// which case the statistic is undefined.
///
/// Runs in `O(n log n)`: after sorting by `(x, y)`, the discordant pairs are exactly the
/// inversions a merge sort of `y` removes (Knight's algorithm).
pub fn kendall_tau_b(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    if n != y.len() || n < 2 || x.iter().chain(y).any(|v| v.is_nan()) {
        return None;
    }

    // Adding zero folds -0.0 into 0.0 so equal values also sort next to each other.
    let mut pairs: Vec<(f64, f64)> = x.iter().zip(y).map(|(&a, &b)| (a + 0.0, b + 0.0)).collect();
    pairs.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let ties_x = tied_pairs(pairs.chunk_by(|a, b| a.0 == b.0));
    let ties_xy = tied_pairs(pairs.chunk_by(|a, b| a == b));

    let mut ys: Vec<f64> = pairs.iter().map(|p| p.1).collect();
    let mut buffer = vec![0.0; n];
    let discordant = sort_counting_inversions(&mut ys, &mut buffer);
    let ties_y = tied_pairs(ys.chunk_by(|a, b| a == b));

    let total = (n * (n - 1) / 2) as u64;
    let untied_x = (total - ties_x) as f64;
    let untied_y = (total - ties_y) as f64;
    let difference = (total + ties_xy) as f64 - (ties_x + ties_y) as f64 - 2.0 * discordant as f64;

    let denom = (untied_x * untied_y).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        None
    } else {
        Some(difference / denom)
    }
}

fn tied_pairs<'a, T: 'a>(runs: impl Iterator<Item = &'a [T]>) -> u64 {
    runs.map(|run| (run.len() * (run.len() - 1) / 2) as u64).sum()
}

/// Bottom-up merge sort of `values`, returning the number of strictly inverted pairs.
fn sort_counting_inversions(values: &mut [f64], buffer: &mut [f64]) -> u64 {
    let n = values.len();
    let mut inversions = 0u64;
    let mut width = 1;
    while width < n {
        for start in (0..n).step_by(2 * width) {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j, mut k) = (start, mid, start);
            while i < mid && j < end {
                if values[j] < values[i] {
                    inversions += (mid - i) as u64;
                    buffer[k] = values[j];
                    j += 1;
                } else {
                    buffer[k] = values[i];
                    i += 1;
                }
                k += 1;
            }
            buffer[k..k + mid - i].copy_from_slice(&values[i..mid]);
            buffer[j..end].copy_from_slice(&values[j..end]);
        }
        values.copy_from_slice(buffer);
        width *= 2;
    }
    inversions
}

/// Maps a correlation in `[-1, 1]` onto `[0, 1]`.
#[inline]
pub fn rescale_unit(tau: f64) -> f64 {
    0.5 * (tau + 1.0)
}

/// How two variables are compared through their rows of the correlation matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityKind {
    /// Do the two variables load onto the factors in the same relative order?
    RankConcordance,
    /// Do the two variables spread their explained variance across factors the same way?
    EuclideanShape,
}

impl SimilarityKind {
    /// Similarity of two variable rows. Symmetric in its arguments; identical rows give exactly 1.
    pub fn pair(self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> Option<f64> {
        match self {
            SimilarityKind::RankConcordance => rank_concordance(a, b),
            SimilarityKind::EuclideanShape => Some(euclidean_shape(a, b)),
        }
    }
}

/// `(τ_b(|a|, |b|) + 1) / 2`. Ranking is monotone, so τ_b over the absolute values equals τ_b
/// over their ranks.
pub fn rank_concordance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Option<f64> {
    let abs_a: Vec<f64> = a.iter().map(|v| v.abs()).collect();
    let abs_b: Vec<f64> = b.iter().map(|v| v.abs()).collect();
    if abs_a == abs_b {
        return Some(1.0);
    }
    kendall_tau_b(&abs_a, &abs_b).map(rescale_unit)
}

/// `1 - sqrt(½ Σ (a_k² - b_k²)²)` over squared correlations.
pub fn euclidean_shape(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let mut sum = 0.0;
    Zip::from(a).and(b).for_each(|&x, &y| {
        let d = x * x - y * y;
        sum += d * d;
    });
    1.0 - (0.5 * sum).sqrt()
}

/// Full pairwise similarity matrix with a unit diagonal.
pub fn similarity_matrix(
    correlations: ArrayView2<f64>,
    kind: SimilarityKind,
) -> Array2<Option<f64>> {
    let n = correlations.nrows();
    let mut out = Array2::from_elem((n, n), Some(1.0));
    for i in 0..n {
        for j in (i + 1)..n {
            let value = kind.pair(correlations.row(i), correlations.row(j));
            out[(i, j)] = value;
            out[(j, i)] = value;
        }
    }
    out
}

/// One element of the (prior, similarity) multiset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairSample {
    pub i: usize,
    pub j: usize,
    pub prior: f64,
    /// `None` when the pairwise similarity is not computable for this pair.
    pub similarity: Option<f64>,
}

/// The multiset of (prior, similarity) pairs over every constrained unordered variable pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Multiset {
    pub kind: SimilarityKind,
    pub samples: Vec<PairSample>,
}

impl Multiset {
    /// Recomputes the multiset from scratch for one correlation matrix.
    pub fn build(prior: &PriorMatrix, correlations: ArrayView2<f64>, kind: SimilarityKind) -> Self {
        let samples = prior
            .constrained_pairs()
            .map(|pair| PairSample {
                i: pair.i,
                j: pair.j,
                prior: pair.value,
                similarity: kind.pair(correlations.row(pair.i), correlations.row(pair.j)),
            })
            .collect();
        Self { kind, samples }
    }

    /// Splits the multiset into parallel prior and similarity columns, or `None` if any pairwise
    /// similarity is not computable.
    pub fn columns(&self) -> Option<(Vec<f64>, Vec<f64>)> {
        let priors = self.samples.iter().map(|s| s.prior).collect();
        let similarities = self
            .samples
            .iter()
            .map(|s| s.similarity)
            .collect::<Option<Vec<f64>>>()?;
        Some((priors, similarities))
    }

    /// Aggregate rank correlation between prior and similarity, rescaled to `[0, 1]`.
    pub fn tau(&self) -> Option<f64> {
        let (priors, similarities) = self.columns()?;
        kendall_tau_b(&priors, &similarities).map(rescale_unit)
    }

    /// Least-squares slope of similarity on prior, compressed through `arctan(slope)/π + ½`.
    pub fn theta(&self) -> Option<f64> {
        let (priors, similarities) = self.columns()?;
        ols_slope(&priors, &similarities).map(|slope| slope.atan() / PI + 0.5)
    }
}

/// Ordinary least-squares slope of `y` on `x`; `None` if `x` has no spread.
pub fn ols_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    if n != y.len() || n < 2 {
        return None;
    }
    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;
    let (sxy, sxx) = x
        .iter()
        .zip(y)
        .fold((0.0, 0.0), |(sxy, sxx), (&xi, &yi)| {
            let dx = xi - mean_x;
            (sxy + dx * (yi - mean_y), sxx + dx * dx)
        });
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    slope.is_finite().then_some(slope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn tau_b_matches_hand_computed_values() {
        assert_abs_diff_eq!(
            kendall_tau_b(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 4.0]).unwrap(),
            1.0
        );
        assert_abs_diff_eq!(
            kendall_tau_b(&[1.0, 2.0, 3.0, 4.0], &[4.0, 3.0, 2.0, 1.0]).unwrap(),
            -1.0
        );
        // x ties on the first two entries: C = 5, D = 0, Tx = 1, Ty = 0
        let tau = kendall_tau_b(&[1.0, 1.0, 2.0, 3.0], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_abs_diff_eq!(tau, 5.0 / (5.0f64 * 6.0).sqrt(), epsilon = 1e-12);
    }

    fn pairwise_tau_b(x: &[f64], y: &[f64]) -> Option<f64> {
        let (mut concordant, mut discordant, mut ties_x, mut ties_y) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        for i in 0..x.len() {
            for j in (i + 1)..x.len() {
                let (dx, dy) = (x[i] - x[j], y[i] - y[j]);
                if dx == 0.0 && dy == 0.0 {
                    continue;
                } else if dx == 0.0 {
                    ties_x += 1.0;
                } else if dy == 0.0 {
                    ties_y += 1.0;
                } else if (dx > 0.0) == (dy > 0.0) {
                    concordant += 1.0;
                } else {
                    discordant += 1.0;
                }
            }
        }
        let denom: f64 =
            ((concordant + discordant + ties_x) * (concordant + discordant + ties_y)).sqrt();
        (denom > 0.0).then(|| (concordant - discordant) / denom)
    }

    #[test]
    fn tau_b_agrees_with_pairwise_counting_on_tied_samples() {
        let mut rng = StdRng::seed_from_u64(17);
        for n in [2, 3, 7, 50, 301] {
            for _ in 0..20 {
                // Coarse grids force ties on both sides.
                let x: Vec<f64> = (0..n)
                    .map(|_| f64::from(rng.gen_range(-3..4)) * 0.5)
                    .collect();
                let y: Vec<f64> = (0..n).map(|_| f64::from(rng.gen_range(0..5))).collect();
                match (kendall_tau_b(&x, &y), pairwise_tau_b(&x, &y)) {
                    (Some(fast), Some(slow)) => assert_abs_diff_eq!(fast, slow, epsilon = 1e-12),
                    (fast, slow) => assert_eq!(fast, slow),
                }
            }
        }
        let signed_zeros = kendall_tau_b(&[-0.0, 0.0, 1.0], &[2.0, 1.0, 3.0]).unwrap();
        let unsigned = pairwise_tau_b(&[0.0, 0.0, 1.0], &[2.0, 1.0, 3.0]).unwrap();
        assert_abs_diff_eq!(signed_zeros, unsigned);
        assert_eq!(kendall_tau_b(&[1.0, f64::NAN], &[1.0, 2.0]), None);
    }

    #[test]
    fn tau_b_is_undefined_for_constant_or_short_input() {
        assert_eq!(kendall_tau_b(&[1.0], &[2.0]), None);
        assert_eq!(kendall_tau_b(&[], &[]), None);
        assert_eq!(kendall_tau_b(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);
    }

    #[test]
    fn similarities_are_symmetric_with_unit_diagonal() {
        let mut rng = StdRng::seed_from_u64(99);
        let corr = Array2::from_shape_fn((7, 4), |_| rng.gen_range(-0.9..0.9));
        for kind in [SimilarityKind::RankConcordance, SimilarityKind::EuclideanShape] {
            let sims = similarity_matrix(corr.view(), kind);
            for i in 0..7 {
                assert_eq!(sims[(i, i)], Some(1.0));
                for j in 0..7 {
                    assert_eq!(sims[(i, j)], sims[(j, i)]);
                    let forward = kind.pair(corr.row(i), corr.row(j));
                    let backward = kind.pair(corr.row(j), corr.row(i));
                    assert_eq!(forward, backward);
                }
            }
        }
    }

    #[test]
    fn identical_rows_are_exactly_similar() {
        let row = array![0.7, -0.2, 0.1];
        assert_eq!(rank_concordance(row.view(), row.view()), Some(1.0));
        assert_eq!(euclidean_shape(row.view(), row.view()), 1.0);

        let flat = array![0.3, 0.3, -0.3];
        assert_eq!(rank_concordance(flat.view(), flat.view()), Some(1.0));
    }

    #[test]
    fn rank_concordance_ignores_magnitude_and_sign() {
        let a = array![0.8, 0.4, 0.1];
        let b = array![-0.5, 0.3, 0.05];
        assert_eq!(rank_concordance(a.view(), b.view()), Some(1.0));
        let reversed = array![0.1, 0.4, 0.8];
        assert_eq!(rank_concordance(a.view(), reversed.view()), Some(0.0));
    }

    #[test]
    fn euclidean_shape_is_bounded_for_correlations() {
        let a = array![1.0, 0.0];
        let b = array![0.0, 1.0];
        assert_abs_diff_eq!(euclidean_shape(a.view(), b.view()), 0.0);
        let c = array![0.6, 0.0];
        let d = array![0.0, 0.6];
        let s = euclidean_shape(c.view(), d.view());
        assert!(s > 0.0 && s < 1.0);
    }

    #[test]
    fn tau_and_theta_are_invariant_under_joint_sign_flip() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 15;
        let priors: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let sims: Vec<f64> = priors
            .iter()
            .map(|p| 0.6 * p + rng.gen_range(-0.3..0.3))
            .collect();
        let to_multiset = |ps: &[f64], ss: &[f64]| Multiset {
            kind: SimilarityKind::EuclideanShape,
            samples: ps
                .iter()
                .zip(ss)
                .enumerate()
                .map(|(k, (&prior, &similarity))| PairSample {
                    i: k,
                    j: k + 1,
                    prior,
                    similarity: Some(similarity),
                })
                .collect(),
        };
        let original = to_multiset(&priors, &sims);
        let flipped_priors: Vec<f64> = priors.iter().map(|v| -v).collect();
        let flipped_sims: Vec<f64> = sims.iter().map(|v| -v).collect();
        let flipped = to_multiset(&flipped_priors, &flipped_sims);

        assert_abs_diff_eq!(original.tau().unwrap(), flipped.tau().unwrap(), epsilon = 1e-12);
        assert_abs_diff_eq!(
            original.theta().unwrap(),
            flipped.theta().unwrap(),
            epsilon = 1e-12
        );
        assert!(original.theta().unwrap() > 0.5);
    }

    #[test]
    fn fully_unconstrained_prior_is_not_computable() {
        let cells: Array2<Option<f64>> = Array2::from_elem((4, 4), None);
        let prior = PriorMatrix::from_cells(cells.view()).unwrap();
        let corr = array![[0.9, 0.1], [0.8, 0.2], [0.1, 0.9], [0.2, 0.7]];
        let multiset = Multiset::build(&prior, corr.view(), SimilarityKind::RankConcordance);
        assert!(multiset.samples.is_empty());
        assert_eq!(multiset.tau(), None);
        assert_eq!(multiset.theta(), None);
    }

    #[test]
    fn ols_slope_recovers_line() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 5.0, 7.0];
        assert_abs_diff_eq!(ols_slope(&x, &y).unwrap(), 2.0, epsilon = 1e-12);
        assert_eq!(ols_slope(&[1.0, 1.0], &[0.0, 2.0]), None);
    }
}
