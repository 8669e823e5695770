use faer::diag::DiagRef;
use faer::linalg::solvers::Solve;
use faer::{Mat, MatRef};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use thiserror::Error;

/// Numerical faults raised by the dense linear algebra bridge.
///
/// Every variant is treated as an internal-consistency failure by callers: the matrices handed
/// to this module are small, well conditioned by construction, and a failure here means an
/// invariant upstream has been broken.
#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("SVD failed to converge")]
    SvdNoConvergence,
    #[error("Linear solve of a {dim}x{dim} system produced non-finite values; the system is singular")]
    SingularSystem { dim: usize },
    #[error("Shape mismatch in linear solve: lhs is {lhs_rows}x{lhs_cols}, rhs has {rhs_rows} rows")]
    ShapeMismatch {
        lhs_rows: usize,
        lhs_cols: usize,
        rhs_rows: usize,
    },
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    Array1::from_shape_fn(mat.nrows(), |i| mat[(i, 0)])
}

enum FaerStorage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

impl FaerStorage<'_> {
    #[inline]
    fn as_ref(&self) -> MatRef<'_, f64> {
        match self {
            FaerStorage::Borrowed(view) => *view,
            FaerStorage::Owned(mat) => mat.as_ref(),
        }
    }
}

/// Zero-copy view of an `ndarray` matrix as a faer `MatRef` when the memory layout allows it,
/// falling back to an owned copy for strided views.
pub struct FaerArrayView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let storage = match array.as_slice_memory_order() {
            Some(slice) if array.is_standard_layout() => FaerStorage::Borrowed(
                MatRef::from_row_major_slice(slice, array.nrows(), array.ncols()),
            ),
            Some(slice) if array.t().is_standard_layout() => FaerStorage::Borrowed(
                MatRef::from_column_major_slice(slice, array.nrows(), array.ncols()),
            ),
            _ => {
                let (rows, cols) = array.dim();
                FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)]))
            }
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.storage.as_ref()
    }
}

pub trait FaerSvd {
    /// Full singular value decomposition `A = U diag(S) Vᵗ`, returned as `(U, S, Vᵗ)`.
    fn svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerSvd for ArrayBase<S, Ix2> {
    fn svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let decomposition = faer_view
            .as_ref()
            .svd()
            .map_err(|_| FaerLinalgError::SvdNoConvergence)?;
        let u = mat_to_array(decomposition.U());
        let singular_values = diag_to_array(decomposition.S());
        let v = decomposition.V();
        let vt = Array2::from_shape_fn((v.ncols(), v.nrows()), |(i, j)| v[(j, i)]);
        Ok((u, singular_values, vt))
    }
}

pub trait FaerLu {
    /// Solves `A X = B` by LU with partial pivoting.
    ///
    /// A pivoted LU does not report rank deficiency on its own, so the solution is checked for
    /// finiteness and a non-finite result is surfaced as [`FaerLinalgError::SingularSystem`].
    fn lu_solve(&self, rhs: &Array2<f64>) -> Result<Array2<f64>, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerLu for ArrayBase<S, Ix2> {
    fn lu_solve(&self, rhs: &Array2<f64>) -> Result<Array2<f64>, FaerLinalgError> {
        if self.nrows() != self.ncols() || rhs.nrows() != self.nrows() {
            return Err(FaerLinalgError::ShapeMismatch {
                lhs_rows: self.nrows(),
                lhs_cols: self.ncols(),
                rhs_rows: rhs.nrows(),
            });
        }
        let lhs_view = FaerArrayView::new(self);
        let rhs_view = FaerArrayView::new(rhs);
        let lu = lhs_view.as_ref().partial_piv_lu();
        let solution = mat_to_array(lu.solve(rhs_view.as_ref()).as_ref());
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(FaerLinalgError::SingularSystem { dim: self.nrows() });
        }
        Ok(solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn lu_solve_recovers_known_solution() {
        let a = array![[4.0, 1.0, 0.0], [1.0, 3.0, -1.0], [0.0, -1.0, 2.0]];
        let x = array![[1.0, 0.5], [-2.0, 1.0], [3.0, -1.5]];
        let b = a.dot(&x);
        let solved = a.lu_solve(&b).unwrap();
        for (lhs, rhs) in solved.iter().zip(x.iter()) {
            assert_abs_diff_eq!(*lhs, *rhs, epsilon = 1e-12);
        }
    }

    #[test]
    fn lu_solve_rejects_mismatched_rhs() {
        let a = Array2::<f64>::eye(3);
        let b = Array2::<f64>::zeros((2, 1));
        assert!(matches!(
            a.lu_solve(&b),
            Err(FaerLinalgError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn svd_reconstructs_input() {
        let a = array![[2.0, -1.0], [0.5, 3.0], [1.0, 1.0]];
        let (u, s, vt) = a.svd().unwrap();
        let k = s.len();
        let mut reconstructed = Array2::<f64>::zeros(a.dim());
        for r in 0..k {
            for i in 0..a.nrows() {
                for j in 0..a.ncols() {
                    reconstructed[(i, j)] += u[(i, r)] * s[r] * vt[(r, j)];
                }
            }
        }
        for (lhs, rhs) in reconstructed.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*lhs, *rhs, epsilon = 1e-10);
        }
    }

    #[test]
    fn strided_views_are_copied_correctly() {
        let a = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 10.0]];
        let every_other = a.slice(ndarray::s![.., ..;2]);
        let view = FaerArrayView::new(&every_other);
        let mat = view.as_ref();
        assert_eq!(mat.ncols(), 2);
        assert_abs_diff_eq!(mat[(2, 1)], 10.0);
    }
}
