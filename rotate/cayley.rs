//! # Orthogonal Rotation Parameterization
//!
//! Maps an unconstrained real vector onto an exactly orthogonal `T×T` matrix. The first
//! `T(T-1)/2` entries fill the strictly upper triangle of a skew-symmetric matrix `S`; the last
//! `T` entries pick the signs of a diagonal reflection matrix `D`. The rotation is
//! `R = (I - S)(I + S)^-1 D`, the Cayley transform of `S` followed by the reflections.
//!
//! The Cayley factor is orthogonal for every real skew-symmetric `S` because the eigenvalues of
//! `S` are purely imaginary, which also makes `I + S` invertible. Diagonal parameters are snapped
//! to `+1`/`-1` so that any vector, feasible or not, decodes to an orthogonal matrix.

use crate::faer_ndarray::{FaerLinalgError, FaerLu};
use ndarray::{Array1, Array2, ArrayView2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error(
        "A rotation parameter vector must have T(T+1)/2 entries for some factor count T >= 1; got {0}"
    )]
    NotTriangular(usize),
    #[error("Rotation parameters encode {expected} factors but the loading matrix has {found}")]
    FactorCountMismatch { expected: usize, found: usize },
    #[error(transparent)]
    Linalg(#[from] FaerLinalgError),
}

/// Number of skew-symmetric parameters for `num_factors` factors.
pub fn skew_parameter_count(num_factors: usize) -> usize {
    num_factors * num_factors.saturating_sub(1) / 2
}

/// Total length of a parameter vector for `num_factors` factors.
pub fn parameter_count(num_factors: usize) -> usize {
    skew_parameter_count(num_factors) + num_factors
}

/// Recovers `T` from a parameter vector length, rejecting lengths that are not triangular.
pub fn factor_count(parameter_len: usize) -> Result<usize, ParameterError> {
    let discriminant = 1.0 + 8.0 * parameter_len as f64;
    let estimate = ((discriminant.sqrt() - 1.0) / 2.0).round() as usize;
    if estimate == 0 || parameter_count(estimate) != parameter_len {
        return Err(ParameterError::NotTriangular(parameter_len));
    }
    Ok(estimate)
}

/// The parameter vector that decodes to the identity: no skew component, all signs positive.
pub fn identity_parameters(num_factors: usize) -> Array1<f64> {
    let skew = skew_parameter_count(num_factors);
    Array1::from_shape_fn(parameter_count(num_factors), |i| if i < skew { 0.0 } else { 1.0 })
}

/// Snaps a raw diagonal parameter onto the reflection set `{-1, +1}`.
#[inline]
pub fn reflection_sign(value: f64) -> f64 {
    if value < 0.0 { -1.0 } else { 1.0 }
}

/// Builds the skew-symmetric matrix from the leading parameters, in row-major upper-triangle order.
fn skew_symmetric(params: &[f64], num_factors: usize) -> Array2<f64> {
    let mut skew = Array2::<f64>::zeros((num_factors, num_factors));
    let mut cursor = 0;
    for i in 0..num_factors {
        for j in (i + 1)..num_factors {
            skew[(i, j)] = params[cursor];
            skew[(j, i)] = -params[cursor];
            cursor += 1;
        }
    }
    skew
}

/// Decodes a parameter vector into an orthogonal rotation matrix.
///
/// A failed solve of `(I + S) X = (I - S)` cannot happen for finite input; if it does, the
/// error is returned to the caller as a fatal numerical fault.
pub fn rotation_matrix(params: &[f64]) -> Result<Array2<f64>, ParameterError> {
    let num_factors = factor_count(params.len())?;
    let skew_len = skew_parameter_count(num_factors);

    let skew = skew_symmetric(&params[..skew_len], num_factors);
    let identity = Array2::<f64>::eye(num_factors);
    let i_plus_s = &identity + &skew;
    let i_minus_s = &identity - &skew;

    // (I - S) and (I + S)^-1 commute, so the Cayley factor is the solution of (I + S) X = (I - S).
    let mut rotation = i_plus_s.lu_solve(&i_minus_s)?;

    for (k, &raw) in params[skew_len..].iter().enumerate() {
        let sign = reflection_sign(raw);
        rotation.column_mut(k).mapv_inplace(|v| v * sign);
    }
    Ok(rotation)
}

/// Applies the decoded rotation to an unrotated loading matrix, returning `L · R(x)`.
pub fn rotate_loadings(
    unrotated: ArrayView2<f64>,
    params: &[f64],
) -> Result<Array2<f64>, ParameterError> {
    let rotation = rotation_matrix(params)?;
    if rotation.nrows() != unrotated.ncols() {
        return Err(ParameterError::FactorCountMismatch {
            expected: rotation.nrows(),
            found: unrotated.ncols(),
        });
    }
    Ok(unrotated.dot(&rotation))
}

/// Projects raw parameters for `num_factors` factors onto the feasible set of the sign
/// constraints, leaving the skew part untouched. Decoding the projected vector yields the same
/// matrix as decoding the raw one.
pub fn project_feasible(params: &[f64], num_factors: usize) -> Array1<f64> {
    let skew_len = skew_parameter_count(num_factors);
    Array1::from_shape_fn(params.len(), |i| {
        if i < skew_len {
            params[i]
        } else {
            reflection_sign(params[i])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn orthogonality_defect(r: &Array2<f64>) -> f64 {
        let gram = r.t().dot(r);
        let eye = Array2::<f64>::eye(r.nrows());
        (&gram - &eye).iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    #[test]
    fn random_parameters_decode_to_orthogonal_matrices() {
        let mut rng = StdRng::seed_from_u64(20_240_611);
        for num_factors in 1..=6 {
            for trial in 0..50 {
                let len = parameter_count(num_factors);
                let scale = if trial % 2 == 0 { 1.0 } else { 25.0 };
                let params: Vec<f64> = (0..len).map(|_| rng.gen_range(-scale..scale)).collect();
                let r = rotation_matrix(&params).unwrap();
                assert_eq!(r.dim(), (num_factors, num_factors));
                let defect = orthogonality_defect(&r);
                assert!(
                    defect < 1e-9,
                    "T={num_factors} trial={trial}: ||RᵗR - I|| = {defect:e}"
                );
            }
        }
    }

    #[test]
    fn single_factor_is_a_pure_sign() {
        assert_eq!(rotation_matrix(&[0.3]).unwrap(), ndarray::array![[1.0]]);
        assert_eq!(rotation_matrix(&[-0.7]).unwrap(), ndarray::array![[-1.0]]);
        assert_eq!(rotation_matrix(&[1.0]).unwrap(), ndarray::array![[1.0]]);
    }

    #[test]
    fn identity_parameters_decode_to_identity() {
        for num_factors in 1..=5 {
            let r = rotation_matrix(identity_parameters(num_factors).as_slice().unwrap()).unwrap();
            let eye = Array2::<f64>::eye(num_factors);
            for (lhs, rhs) in r.iter().zip(eye.iter()) {
                assert_abs_diff_eq!(*lhs, *rhs, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn two_factor_skew_parameter_is_half_angle_tangent() {
        let angle: f64 = 0.6;
        let t = (angle / 2.0).tan();
        let r = rotation_matrix(&[t, 1.0, 1.0]).unwrap();
        assert_abs_diff_eq!(r[(0, 0)], angle.cos(), epsilon = 1e-12);
        assert_abs_diff_eq!(r[(1, 1)], angle.cos(), epsilon = 1e-12);
        assert_abs_diff_eq!(r[(0, 1)].abs(), angle.sin(), epsilon = 1e-12);
    }

    #[test]
    fn negative_diagonal_reflects_columns() {
        let r = rotation_matrix(&[0.0, -1.0, 1.0]).unwrap();
        assert_abs_diff_eq!(r[(0, 0)], -1.0, epsilon = 1e-14);
        assert_abs_diff_eq!(r[(1, 1)], 1.0, epsilon = 1e-14);
    }

    #[test]
    fn factor_count_rejects_non_triangular_lengths() {
        assert_eq!(factor_count(1).unwrap(), 1);
        assert_eq!(factor_count(3).unwrap(), 2);
        assert_eq!(factor_count(6).unwrap(), 3);
        assert_eq!(factor_count(21).unwrap(), 6);
        for bad in [0, 2, 4, 5, 7] {
            assert!(matches!(factor_count(bad), Err(ParameterError::NotTriangular(n)) if n == bad));
        }
    }

    #[test]
    fn rotate_loadings_checks_factor_count() {
        let loadings = Array2::<f64>::ones((4, 3));
        let err = rotate_loadings(loadings.view(), &[0.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(
            err,
            ParameterError::FactorCountMismatch {
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn projection_keeps_decoded_matrix() {
        let raw = [0.2, -0.4, 0.1, 0.3, -0.9, 0.05];
        let projected = project_feasible(&raw, 3);
        assert_eq!(projected.as_slice().unwrap()[3..], [1.0, -1.0, 1.0]);
        let a = rotation_matrix(&raw).unwrap();
        let b = rotation_matrix(projected.as_slice().unwrap()).unwrap();
        assert_eq!(a, b);
    }
}
