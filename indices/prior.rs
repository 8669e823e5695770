//! # Prior Matrices
//!
//! A prior states which variable pairs are expected to belong together. It is a symmetric
//! `P×P` matrix whose off-diagonal cells either hold a real value or carry no constraint at all.
//! The two cases are stored as parallel structures: a numeric matrix and a boolean mask of
//! constrained cells. Unconstrained cells hold `NaN` in the numeric matrix and are skipped by every
//! statistic downstream.

use ndarray::{Array2, ArrayView2};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PriorError {
    #[error("The prior must be a square matrix, but it has shape {rows}x{cols}.")]
    NotSquare { rows: usize, cols: usize },
    #[error("The prior covers {prior} variables, but the data has {variables} variables.")]
    DimensionMismatch { prior: usize, variables: usize },
    #[error("The prior must be symmetric, but cells ({row}, {col}) and ({col}, {row}) differ.")]
    NotSymmetric { row: usize, col: usize },
    #[error("The constraint mask has shape {mask_rows}x{mask_cols}, but the values have shape {rows}x{cols}.")]
    MaskShapeMismatch {
        rows: usize,
        cols: usize,
        mask_rows: usize,
        mask_cols: usize,
    },
    #[error("The constrained prior cell ({row}, {col}) is not a finite number.")]
    NonFiniteValue { row: usize, col: usize },
    #[error("Invalid grouping: {0}")]
    InvalidGrouping(String),
    #[error("Embedding row {0} has zero norm, so its cosine similarity is undefined.")]
    DegenerateEmbedding(usize),
    #[error("Expected one item text per variable ({variables}), but {questions} were given.")]
    QuestionCountMismatch { questions: usize, variables: usize },
}

/// One constrained off-diagonal cell of the upper triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstrainedPair {
    pub i: usize,
    pub j: usize,
    pub value: f64,
}

/// A validated symmetric prior with an explicit constraint mask.
#[derive(Debug, Clone)]
pub struct PriorMatrix {
    values: Array2<f64>,
    constrained: Array2<bool>,
}

impl PriorMatrix {
    /// Builds a prior from a value matrix and a mask of constrained cells.
    ///
    /// Values under unconstrained cells are discarded. Both the mask and the constrained values
    /// must be exactly symmetric.
    pub fn new(values: Array2<f64>, constrained: Array2<bool>) -> Result<Self, PriorError> {
        let (rows, cols) = values.dim();
        if rows != cols {
            return Err(PriorError::NotSquare { rows, cols });
        }
        if constrained.dim() != values.dim() {
            return Err(PriorError::MaskShapeMismatch {
                rows,
                cols,
                mask_rows: constrained.nrows(),
                mask_cols: constrained.ncols(),
            });
        }

        for row in 0..rows {
            for col in row..cols {
                if constrained[(row, col)] != constrained[(col, row)] {
                    return Err(PriorError::NotSymmetric { row, col });
                }
                if !constrained[(row, col)] {
                    continue;
                }
                let upper = values[(row, col)];
                if !upper.is_finite() || !values[(col, row)].is_finite() {
                    return Err(PriorError::NonFiniteValue { row, col });
                }
                if upper != values[(col, row)] {
                    return Err(PriorError::NotSymmetric { row, col });
                }
            }
        }

        let mut values = values;
        values.zip_mut_with(&constrained, |v, &c| {
            if !c {
                *v = f64::NAN;
            }
        });
        Ok(Self {
            values,
            constrained,
        })
    }

    /// Builds a prior where every cell is constrained.
    pub fn dense(values: Array2<f64>) -> Result<Self, PriorError> {
        let mask = Array2::from_elem(values.dim(), true);
        Self::new(values, mask)
    }

    /// Builds a prior from cells where `None` marks "no constraint".
    pub fn from_cells(cells: ArrayView2<Option<f64>>) -> Result<Self, PriorError> {
        let values = cells.mapv(|c| c.unwrap_or(f64::NAN));
        let mask = cells.mapv(|c| c.is_some());
        Self::new(values, mask)
    }

    /// Builds a grouping prior over `size` variables from 1-based groups.
    ///
    /// Pairs inside a group get `1`, pairs across groups get `0`, and every row and column of a
    /// variable that appears in no group is left unconstrained. The groups must be disjoint and
    /// drawn from `1..=size`, but they need not cover every variable.
    pub fn grouper(size: usize, groupings: &[Vec<usize>]) -> Result<Self, PriorError> {
        if size < 1 {
            return Err(PriorError::InvalidGrouping("size must be positive".to_string()));
        }
        let mut seen = HashSet::new();
        for &item in groupings.iter().flatten() {
            if item < 1 || item > size {
                return Err(PriorError::InvalidGrouping(format!(
                    "item {item} is outside 1..={size}"
                )));
            }
            if !seen.insert(item) {
                return Err(PriorError::InvalidGrouping(format!(
                    "item {item} appears in more than one group"
                )));
            }
        }

        let mut values = Array2::<f64>::zeros((size, size));
        for group in groupings {
            for &a in group {
                for &b in group {
                    values[(a - 1, b - 1)] = 1.0;
                }
            }
        }
        let mask = Array2::from_shape_fn((size, size), |(i, j)| {
            seen.contains(&(i + 1)) && seen.contains(&(j + 1))
        });
        Self::new(values, mask)
    }

    /// Number of variables the prior covers.
    pub fn dim(&self) -> usize {
        self.values.nrows()
    }

    /// Rejects the prior when it does not match the number of observed variables.
    pub fn check_variables(&self, variables: usize) -> Result<(), PriorError> {
        if self.dim() != variables {
            return Err(PriorError::DimensionMismatch {
                prior: self.dim(),
                variables,
            });
        }
        Ok(())
    }

    /// The constrained value of a cell, or `None` when the cell carries no constraint.
    pub fn value(&self, i: usize, j: usize) -> Option<f64> {
        self.constrained[(i, j)].then(|| self.values[(i, j)])
    }

    /// Iterates the constrained cells of the strict upper triangle in row-major order.
    pub fn constrained_pairs(&self) -> impl Iterator<Item = ConstrainedPair> + '_ {
        let n = self.dim();
        (0..n).flat_map(move |i| {
            ((i + 1)..n).filter_map(move |j| {
                self.value(i, j).map(|value| ConstrainedPair { i, j, value })
            })
        })
    }

    /// Number of constrained unordered pairs.
    pub fn constrained_pair_count(&self) -> usize {
        self.constrained_pairs().count()
    }

    /// Cell view with `None` for unconstrained cells.
    pub fn to_cells(&self) -> Array2<Option<f64>> {
        Array2::from_shape_fn(self.values.dim(), |(i, j)| self.value(i, j))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rejects_non_square_priors() {
        let err = PriorMatrix::dense(Array2::zeros((3, 2))).unwrap_err();
        assert!(matches!(err, PriorError::NotSquare { rows: 3, cols: 2 }));
    }

    #[test]
    fn rejects_asymmetric_values_and_masks() {
        let values = array![[1.0, 0.2], [0.3, 1.0]];
        assert!(matches!(
            PriorMatrix::dense(values).unwrap_err(),
            PriorError::NotSymmetric { row: 0, col: 1 }
        ));

        let cells = array![[Some(1.0), None], [Some(0.4), Some(1.0)]];
        assert!(matches!(
            PriorMatrix::from_cells(cells.view()).unwrap_err(),
            PriorError::NotSymmetric { .. }
        ));
    }

    #[test]
    fn rejects_non_finite_constrained_cells() {
        let values = array![[1.0, f64::INFINITY], [f64::INFINITY, 1.0]];
        assert!(matches!(
            PriorMatrix::dense(values).unwrap_err(),
            PriorError::NonFiniteValue { row: 0, col: 1 }
        ));
    }

    #[test]
    fn unconstrained_cells_never_read_as_zero() {
        let cells = array![
            [None, Some(0.5), None],
            [Some(0.5), None, None],
            [None, None, None]
        ];
        let prior = PriorMatrix::from_cells(cells.view()).unwrap();
        assert_eq!(prior.value(0, 2), None);
        assert_eq!(prior.value(0, 1), Some(0.5));
        let pairs: Vec<_> = prior.constrained_pairs().collect();
        assert_eq!(pairs, vec![ConstrainedPair { i: 0, j: 1, value: 0.5 }]);
    }

    #[test]
    fn dimension_check_reports_both_sizes() {
        let prior = PriorMatrix::dense(Array2::eye(4)).unwrap();
        assert!(prior.check_variables(4).is_ok());
        assert!(matches!(
            prior.check_variables(5).unwrap_err(),
            PriorError::DimensionMismatch {
                prior: 4,
                variables: 5
            }
        ));
    }

    #[test]
    fn grouper_builds_block_structure_with_partial_partition() {
        let prior = PriorMatrix::grouper(6, &[vec![1, 2, 3], vec![5, 6]]).unwrap();
        assert_eq!(prior.value(0, 1), Some(1.0));
        assert_eq!(prior.value(1, 2), Some(1.0));
        assert_eq!(prior.value(4, 5), Some(1.0));
        assert_eq!(prior.value(0, 4), Some(0.0));
        assert_eq!(prior.value(3, 0), None);
        assert_eq!(prior.value(3, 3), None);
        assert_eq!(prior.value(2, 2), Some(1.0));
        // 5 grouped items -> 10 pairs, all constrained
        assert_eq!(prior.constrained_pair_count(), 10);
    }

    #[test]
    fn grouper_rejects_overlap_and_out_of_range_items() {
        assert!(matches!(
            PriorMatrix::grouper(4, &[vec![1, 2], vec![2, 3]]).unwrap_err(),
            PriorError::InvalidGrouping(_)
        ));
        assert!(matches!(
            PriorMatrix::grouper(3, &[vec![1, 4]]).unwrap_err(),
            PriorError::InvalidGrouping(_)
        ));
        assert!(matches!(
            PriorMatrix::grouper(0, &[]).unwrap_err(),
            PriorError::InvalidGrouping(_)
        ));
    }
}
