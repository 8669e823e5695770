//! # Predefined Rotation Catalog
//!
//! Classical orthogonal rotations used as the second tournament family. Varimax uses the SVD
//! fixed-point iteration; quartimax, equamax and oblimax use gradient projection onto the
//! orthogonal group with step halving. Every rotation returns both the rotated loadings and the
//! `T×T` rotation matrix, so `rotated = unrotated · rotation` always holds.

use crate::faer_ndarray::{FaerLinalgError, FaerSvd};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Unknown rotation '{name}'. Valid rotations are: {valid}.")]
    UnknownRotation { name: String, valid: String },
    #[error("The {rotation} criterion is not finite for these loadings.")]
    NonFiniteCriterion { rotation: OrthogonalRotation },
    #[error(transparent)]
    Linalg(#[from] FaerLinalgError),
}

/// Orthogonal rotations with a closed criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrthogonalRotation {
    Equamax,
    Oblimax,
    Quartimax,
    Varimax,
}

impl OrthogonalRotation {
    /// Evaluation order of the predefined family. The first maximum wins a tie.
    pub const CATALOG_ORDER: [OrthogonalRotation; 4] = [
        OrthogonalRotation::Equamax,
        OrthogonalRotation::Oblimax,
        OrthogonalRotation::Quartimax,
        OrthogonalRotation::Varimax,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OrthogonalRotation::Equamax => "equamax",
            OrthogonalRotation::Oblimax => "oblimax",
            OrthogonalRotation::Quartimax => "quartimax",
            OrthogonalRotation::Varimax => "varimax",
        }
    }
}

impl fmt::Display for OrthogonalRotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OrthogonalRotation {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        OrthogonalRotation::CATALOG_ORDER
            .into_iter()
            .find(|r| r.name() == lowered)
            .ok_or_else(|| CatalogError::UnknownRotation {
                name: s.to_string(),
                valid: OrthogonalRotation::CATALOG_ORDER
                    .iter()
                    .map(|r| r.name())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Oblique rotations. These are fitted by the extraction collaborator, never by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObliqueRotation {
    Promax,
    Oblimin,
    Quartimin,
}

impl ObliqueRotation {
    pub const ALL: [ObliqueRotation; 3] = [
        ObliqueRotation::Promax,
        ObliqueRotation::Oblimin,
        ObliqueRotation::Quartimin,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ObliqueRotation::Promax => "promax",
            ObliqueRotation::Oblimin => "oblimin",
            ObliqueRotation::Quartimin => "quartimin",
        }
    }
}

impl fmt::Display for ObliqueRotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Kaiser row normalization before rotating.
    pub normalize: bool,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            max_iter: 500,
            tol: 1e-5,
        }
    }
}

/// Result of one catalog rotation.
#[derive(Debug, Clone)]
pub struct RotatedSolution {
    pub rotation_kind: OrthogonalRotation,
    pub loadings: Array2<f64>,
    pub rotation: Array2<f64>,
    pub converged: bool,
    pub iterations: usize,
}

// --- Criteria ---

/// Criterion value and its gradient with respect to the rotated loadings. Lower is better.
fn criterion(
    rotation_kind: OrthogonalRotation,
    loadings: &Array2<f64>,
) -> Result<(f64, Array2<f64>), CatalogError> {
    let squared = loadings.mapv(|v| v * v);
    let (value, gradient) = match rotation_kind {
        OrthogonalRotation::Quartimax => {
            let value = -squared.mapv(|v| v * v).sum() / 4.0;
            (value, loadings.mapv(|v| -v * v * v))
        }
        OrthogonalRotation::Oblimax => {
            let fourth = squared.mapv(|v| v * v).sum();
            let second = squared.sum();
            let value = -(fourth.ln() - 2.0 * second.ln());
            let gradient = loadings.mapv(|v| -(4.0 * v * v * v / fourth - 4.0 * v / second));
            (value, gradient)
        }
        OrthogonalRotation::Equamax => {
            let (rows, cols) = loadings.dim();
            let kappa = cols as f64 / (2.0 * rows as f64);
            let n = Array2::<f64>::ones((cols, cols)) - Array2::<f64>::eye(cols);
            let m = Array2::<f64>::ones((rows, rows)) - Array2::<f64>::eye(rows);
            let row_part = squared.dot(&n);
            let col_part = m.dot(&squared);
            let f1 = (1.0 - kappa) * (&squared * &row_part).sum() / 4.0;
            let f2 = kappa * (&squared * &col_part).sum() / 4.0;
            let gradient = loadings * &((1.0 - kappa) * &row_part + kappa * &col_part);
            (f1 + f2, gradient)
        }
        OrthogonalRotation::Varimax => {
            let col_means = squared
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array1::zeros(loadings.ncols()));
            let centered = &squared - &col_means;
            let value = -(&centered * &centered).sum() / 4.0;
            (value, -(loadings * &centered))
        }
    };
    if !value.is_finite() || gradient.iter().any(|v| !v.is_finite()) {
        return Err(CatalogError::NonFiniteCriterion { rotation: rotation_kind });
    }
    Ok((value, gradient))
}

// --- Normalization ---

fn kaiser_weights(loadings: ArrayView2<f64>) -> Array1<f64> {
    loadings
        .axis_iter(Axis(0))
        .map(|row| {
            let norm = row.dot(&row).sqrt();
            if norm > 0.0 && norm.is_finite() { norm } else { 1.0 }
        })
        .collect()
}

fn scale_rows(matrix: &mut Array2<f64>, weights: &Array1<f64>, divide: bool) {
    for (mut row, &w) in matrix.axis_iter_mut(Axis(0)).zip(weights.iter()) {
        if divide {
            row.mapv_inplace(|v| v / w);
        } else {
            row.mapv_inplace(|v| v * w);
        }
    }
}

// --- Algorithms ---

fn polar_factor(matrix: &Array2<f64>) -> Result<(Array2<f64>, f64), CatalogError> {
    let (u, s, vt) = matrix.svd()?;
    Ok((u.dot(&vt), s.sum()))
}

fn varimax(
    x: &Array2<f64>,
    config: &CatalogConfig,
) -> Result<(Array2<f64>, bool, usize), CatalogError> {
    let (rows, cols) = x.dim();
    let mut rotation = Array2::<f64>::eye(cols);
    let mut d = 0.0;
    for iteration in 0..config.max_iter {
        let old_d = d;
        let basis = x.dot(&rotation);
        let col_sums = basis.mapv(|v| v * v).sum_axis(Axis(0));
        let cubed = basis.mapv(|v| v * v * v);
        let shrink = &basis * &col_sums / rows as f64;
        let transformed = x.t().dot(&(cubed - shrink));
        let (next, singular_sum) = polar_factor(&transformed)?;
        rotation = next;
        d = singular_sum;
        if old_d != 0.0 && d / old_d < 1.0 + config.tol {
            return Ok((rotation, true, iteration + 1));
        }
    }
    Ok((rotation, false, config.max_iter))
}

fn gradient_projection(
    rotation_kind: OrthogonalRotation,
    x: &Array2<f64>,
    config: &CatalogConfig,
) -> Result<(Array2<f64>, bool, usize), CatalogError> {
    let cols = x.ncols();
    let mut rotation = Array2::<f64>::eye(cols);
    let mut alpha = 1.0;
    let (mut value, objective_grad) = criterion(rotation_kind, &x.dot(&rotation))?;
    let mut gradient = x.t().dot(&objective_grad);

    for iteration in 0..=config.max_iter {
        let m = rotation.t().dot(&gradient);
        let symmetric = (&m + &m.t()) / 2.0;
        let projected = &gradient - &rotation.dot(&symmetric);
        let step_norm = projected.mapv(|v| v * v).sum().sqrt();
        if step_norm < config.tol {
            return Ok((rotation, true, iteration));
        }

        alpha *= 2.0;
        let mut halvings = 0;
        let (next, next_value, next_grad) = loop {
            let trial = &rotation - &(alpha * &projected);
            let (polar, _) = polar_factor(&trial)?;
            let (trial_value, trial_grad) = criterion(rotation_kind, &x.dot(&polar))?;
            let accepted = trial_value < value - 0.5 * step_norm * step_norm * alpha;
            if !accepted {
                alpha /= 2.0;
            }
            if accepted || halvings == 10 {
                break (polar, trial_value, trial_grad);
            }
            halvings += 1;
        };
        rotation = next;
        value = next_value;
        gradient = x.t().dot(&next_grad);
    }
    Ok((rotation, false, config.max_iter))
}

/// Rotates `unrotated` with one predefined orthogonal rotation.
///
/// A single factor is returned unchanged with a `1×1` identity rotation.
pub fn rotate(
    rotation_kind: OrthogonalRotation,
    unrotated: ArrayView2<f64>,
    config: &CatalogConfig,
) -> Result<RotatedSolution, CatalogError> {
    let cols = unrotated.ncols();
    if cols < 2 {
        return Ok(RotatedSolution {
            rotation_kind,
            loadings: unrotated.to_owned(),
            rotation: Array2::eye(cols),
            converged: true,
            iterations: 0,
        });
    }

    let mut x = unrotated.to_owned();
    let weights = kaiser_weights(unrotated);
    if config.normalize {
        scale_rows(&mut x, &weights, true);
    }

    let (rotation, converged, iterations) = match rotation_kind {
        OrthogonalRotation::Varimax => varimax(&x, config)?,
        other => gradient_projection(other, &x, config)?,
    };
    if !converged {
        log::warn!(
            "{} rotation did not converge within {} iterations; using the last iterate.",
            rotation_kind,
            config.max_iter
        );
    }

    let rotated = x.dot(&rotation);
    let (final_value, _) = criterion(rotation_kind, &rotated)?;
    log::debug!(
        "{} converged={} after {} iterations, criterion {:.6}",
        rotation_kind,
        converged,
        iterations,
        final_value
    );

    let mut loadings = rotated;
    if config.normalize {
        scale_rows(&mut loadings, &weights, false);
    }
    Ok(RotatedSolution {
        rotation_kind,
        loadings,
        rotation,
        converged,
        iterations,
    })
}
