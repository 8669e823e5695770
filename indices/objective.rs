//! # Interpretability Objectives
//!
//! Pure scoring functions. An [`ObjectiveContext`] bundles the fixed inputs of a study (prior,
//! scaling, optional embeddings) and scores either a rotation parameter vector against unrotated
//! loadings or loadings that are already rotated. Nothing here mutates a model.

use crate::cayley::{ParameterError, rotate_loadings};
use crate::indices::concordance::{Multiset, SimilarityKind};
use crate::indices::prior::{PriorError, PriorMatrix};
use crate::indices::semantic::{SemanticError, central_meanings, horizontal_index};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObjectiveError {
    #[error("Unknown objective '{name}'. Valid objectives are: {valid}.")]
    UnknownObjective { name: String, valid: String },
    #[error(
        "The overall index needs item embeddings, but the study was created without item texts or embeddings."
    )]
    EmbeddingsUnavailable,
    #[error("The scaling vector has {scaling} entries, but the loadings have {variables} rows.")]
    ScalingMismatch { scaling: usize, variables: usize },
    #[error("The factor correlation matrix must be {factors}x{factors}, but it is {rows}x{cols}.")]
    PhiShapeMismatch {
        factors: usize,
        rows: usize,
        cols: usize,
    },
    #[error(transparent)]
    Parameters(#[from] ParameterError),
    #[error(transparent)]
    Semantic(#[from] SemanticError),
    #[error(transparent)]
    Prior(#[from] PriorError),
}

/// Which interpretability index drives a rotation or a model comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Agreement (vertical) index over rank-concordance similarity.
    Agreement,
    /// Overall index combining the agreement and horizontal indices.
    Overall,
    /// Second-generation composite of tau and theta over Euclidean-shape similarity.
    CompositeV,
}

impl Objective {
    pub const ALL: [Objective; 3] = [Objective::Agreement, Objective::Overall, Objective::CompositeV];

    pub fn name(self) -> &'static str {
        match self {
            Objective::Agreement => "agreement",
            Objective::Overall => "overall",
            Objective::CompositeV => "composite",
        }
    }

    /// The rotation procedure that optimizes this objective.
    pub fn procedure_name(self) -> &'static str {
        match self {
            Objective::Agreement => "priorimax",
            Objective::Overall => "interpmax",
            Objective::CompositeV => "composite",
        }
    }

    pub fn similarity_kind(self) -> SimilarityKind {
        match self {
            Objective::Agreement | Objective::Overall => SimilarityKind::RankConcordance,
            Objective::CompositeV => SimilarityKind::EuclideanShape,
        }
    }

    pub fn requires_embeddings(self) -> bool {
        matches!(self, Objective::Overall)
    }

    fn valid_names() -> String {
        Objective::ALL
            .iter()
            .map(|o| format!("{} ({})", o.name(), o.procedure_name()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Objective {
    type Err = ObjectiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agreement" | "vertical" | "priorimax" => Ok(Objective::Agreement),
            "overall" | "interpmax" => Ok(Objective::Overall),
            "composite" | "composite_v" | "v" => Ok(Objective::CompositeV),
            _ => Err(ObjectiveError::UnknownObjective {
                name: s.to_string(),
                valid: Objective::valid_names(),
            }),
        }
    }
}

/// Variable-factor correlations: `L` (or `L·phi` when `phi` is given) with row `i` divided by `s_i`.
pub fn variable_factor_correlations(
    loadings: ArrayView2<f64>,
    phi: Option<ArrayView2<f64>>,
    scaling: ArrayView1<f64>,
) -> Result<Array2<f64>, ObjectiveError> {
    if scaling.len() != loadings.nrows() {
        return Err(ObjectiveError::ScalingMismatch {
            scaling: scaling.len(),
            variables: loadings.nrows(),
        });
    }
    let mut correlations = match phi {
        Some(phi) => {
            let factors = loadings.ncols();
            if phi.dim() != (factors, factors) {
                return Err(ObjectiveError::PhiShapeMismatch {
                    factors,
                    rows: phi.nrows(),
                    cols: phi.ncols(),
                });
            }
            loadings.dot(&phi)
        }
        None => loadings.to_owned(),
    };
    for (mut row, &scale) in correlations.axis_iter_mut(Axis(0)).zip(scaling.iter()) {
        row.mapv_inplace(|v| v / scale);
    }
    Ok(correlations)
}

/// Agreement (vertical) index: aggregate tau over rank-concordance similarity.
pub fn agreement_index(prior: &PriorMatrix, correlations: ArrayView2<f64>) -> Option<f64> {
    Multiset::build(prior, correlations, SimilarityKind::RankConcordance).tau()
}

/// The parts of the second-generation composite index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeIndex {
    pub tau: Option<f64>,
    pub theta: Option<f64>,
    pub value: Option<f64>,
}

/// Composite V-index: `sqrt(tau · theta)` over Euclidean-shape similarity.
pub fn composite_index(prior: &PriorMatrix, correlations: ArrayView2<f64>) -> CompositeIndex {
    let multiset = Multiset::build(prior, correlations, SimilarityKind::EuclideanShape);
    let tau = multiset.tau();
    let theta = multiset.theta();
    let value = tau.zip(theta).map(|(t, h)| (t * h).sqrt());
    CompositeIndex { tau, theta, value }
}

/// Overall index: `1 - (√2/2) sqrt((V - 1)² + (H - 1)²)`.
pub fn overall_index(vertical: Option<f64>, horizontal: Option<f64>) -> Option<f64> {
    let (v, h) = vertical.zip(horizontal)?;
    Some(1.0 - std::f64::consts::FRAC_1_SQRT_2 * ((v - 1.0).powi(2) + (h - 1.0).powi(2)).sqrt())
}

/// Horizontal index of a correlation matrix given item embeddings.
pub fn horizontal_from_correlations(
    correlations: ArrayView2<f64>,
    embeddings: ArrayView2<f64>,
) -> Result<Option<f64>, ObjectiveError> {
    Ok(central_meanings(correlations, embeddings)?.and_then(|m| horizontal_index(m.view())))
}

/// The fixed inputs shared by every candidate scored during one procedure.
#[derive(Debug, Clone, Copy)]
pub struct ObjectiveContext<'a> {
    objective: Objective,
    prior: &'a PriorMatrix,
    scaling: ArrayView1<'a, f64>,
    embeddings: Option<ArrayView2<'a, f64>>,
}

impl<'a> ObjectiveContext<'a> {
    pub fn new(
        objective: Objective,
        prior: &'a PriorMatrix,
        scaling: ArrayView1<'a, f64>,
        embeddings: Option<ArrayView2<'a, f64>>,
    ) -> Result<Self, ObjectiveError> {
        prior.check_variables(scaling.len())?;
        if objective.requires_embeddings() {
            let embeddings = embeddings.ok_or(ObjectiveError::EmbeddingsUnavailable)?;
            if embeddings.nrows() != scaling.len() {
                return Err(SemanticError::EmbeddingShapeMismatch {
                    embeddings: embeddings.nrows(),
                    variables: scaling.len(),
                }
                .into());
            }
        }
        Ok(Self {
            objective,
            prior,
            scaling,
            embeddings,
        })
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    /// Scores a correlation matrix under the configured objective.
    pub fn score_correlations(
        &self,
        correlations: ArrayView2<f64>,
    ) -> Result<Option<f64>, ObjectiveError> {
        match self.objective {
            Objective::Agreement => Ok(agreement_index(self.prior, correlations)),
            Objective::CompositeV => Ok(composite_index(self.prior, correlations).value),
            Objective::Overall => {
                let embeddings = self
                    .embeddings
                    .ok_or(ObjectiveError::EmbeddingsUnavailable)?;
                let vertical = agreement_index(self.prior, correlations);
                let horizontal = horizontal_from_correlations(correlations, embeddings)?;
                Ok(overall_index(vertical, horizontal))
            }
        }
    }

    /// Scores loadings read from a model. `phi` is given only for oblique solutions.
    pub fn score_loadings(
        &self,
        loadings: ArrayView2<f64>,
        phi: Option<ArrayView2<f64>>,
    ) -> Result<Option<f64>, ObjectiveError> {
        let correlations = variable_factor_correlations(loadings, phi, self.scaling)?;
        self.score_correlations(correlations.view())
    }

    /// Scores the orthogonal rotation encoded by `params` without materializing it in any model.
    pub fn score_parameters(
        &self,
        unrotated: ArrayView2<f64>,
        params: &[f64],
    ) -> Result<Option<f64>, ObjectiveError> {
        let rotated = rotate_loadings(unrotated, params)?;
        self.score_loadings(rotated.view(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cayley::{identity_parameters, parameter_count};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn block_loadings() -> Array2<f64> {
        array![
            [0.80, 0.05],
            [0.75, 0.10],
            [0.70, 0.02],
            [0.08, 0.85],
            [0.03, 0.78]
        ]
    }

    fn block_prior() -> PriorMatrix {
        PriorMatrix::grouper(5, &[vec![1, 2, 3], vec![4, 5]]).unwrap()
    }

    #[test]
    fn objective_names_parse_and_reject_unknowns() {
        assert_eq!("priorimax".parse::<Objective>().unwrap(), Objective::Agreement);
        assert_eq!("INTERPMAX".parse::<Objective>().unwrap(), Objective::Overall);
        assert_eq!("composite".parse::<Objective>().unwrap(), Objective::CompositeV);
        let err = "bogus".parse::<Objective>().unwrap_err();
        match err {
            ObjectiveError::UnknownObjective { name, valid } => {
                assert_eq!(name, "bogus");
                assert!(valid.contains("priorimax"));
                assert!(valid.contains("interpmax"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn correlations_apply_phi_and_scaling() {
        let loadings = array![[1.0, 0.0], [0.0, 2.0]];
        let phi = array![[1.0, 0.5], [0.5, 1.0]];
        let scaling = array![1.0, 2.0];
        let orthogonal =
            variable_factor_correlations(loadings.view(), None, scaling.view()).unwrap();
        assert_eq!(orthogonal, array![[1.0, 0.0], [0.0, 1.0]]);
        let oblique =
            variable_factor_correlations(loadings.view(), Some(phi.view()), scaling.view())
                .unwrap();
        assert_eq!(oblique, array![[1.0, 0.5], [0.5, 1.0]]);

        let bad_phi = Array2::<f64>::eye(3);
        assert!(matches!(
            variable_factor_correlations(loadings.view(), Some(bad_phi.view()), scaling.view()),
            Err(ObjectiveError::PhiShapeMismatch { factors: 2, .. })
        ));
    }

    #[test]
    fn block_structure_scores_near_one() {
        let prior = block_prior();
        let scaling = Array1::ones(5);
        let ctx = ObjectiveContext::new(Objective::Agreement, &prior, scaling.view(), None).unwrap();
        let score = ctx
            .score_loadings(block_loadings().view(), None)
            .unwrap()
            .unwrap();
        assert!(score > 0.95, "agreement index was {score}");
    }

    #[test]
    fn single_factor_agreement_is_not_computable_without_error() {
        let prior = block_prior();
        let scaling = Array1::ones(5);
        let ctx = ObjectiveContext::new(Objective::Agreement, &prior, scaling.view(), None).unwrap();
        let loadings = array![[0.9], [0.8], [0.7], [0.6], [0.5]];
        assert_eq!(ctx.score_loadings(loadings.view(), None).unwrap(), None);
        assert_eq!(ctx.score_parameters(loadings.view(), &[1.0]).unwrap(), None);
    }

    #[test]
    fn overall_objective_requires_embeddings() {
        let prior = block_prior();
        let scaling = Array1::ones(5);
        assert!(matches!(
            ObjectiveContext::new(Objective::Overall, &prior, scaling.view(), None),
            Err(ObjectiveError::EmbeddingsUnavailable)
        ));
    }

    #[test]
    fn overall_index_combines_vertical_and_horizontal() {
        assert_abs_diff_eq!(overall_index(Some(1.0), Some(1.0)).unwrap(), 1.0);
        assert_abs_diff_eq!(overall_index(Some(0.0), Some(0.0)).unwrap(), 0.0, epsilon = 1e-12);
        assert_eq!(overall_index(None, Some(1.0)), None);

        let prior = block_prior();
        let scaling = Array1::ones(5);
        let embeddings = array![
            [1.0, 0.0, 0.1],
            [0.9, 0.1, 0.0],
            [1.0, 0.1, 0.1],
            [0.0, 1.0, 0.0],
            [0.1, 0.9, 0.0]
        ];
        let ctx = ObjectiveContext::new(
            Objective::Overall,
            &prior,
            scaling.view(),
            Some(embeddings.view()),
        )
        .unwrap();
        let score = ctx
            .score_loadings(block_loadings().view(), None)
            .unwrap()
            .unwrap();
        assert!(score > 0.8 && score <= 1.0, "overall index was {score}");
    }

    #[test]
    fn composite_index_is_geometric_mean_of_parts() {
        let prior = block_prior();
        let corr = block_loadings();
        let composite = composite_index(&prior, corr.view());
        let (tau, theta) = (composite.tau.unwrap(), composite.theta.unwrap());
        assert_abs_diff_eq!(composite.value.unwrap(), (tau * theta).sqrt(), epsilon = 1e-12);
        assert!(theta > 0.5);
    }

    #[test]
    fn parameter_scoring_matches_materialized_rotation() {
        let mut rng = StdRng::seed_from_u64(314);
        let prior = block_prior();
        let scaling = Array1::ones(5);
        let loadings = block_loadings();
        let ctx = ObjectiveContext::new(Objective::CompositeV, &prior, scaling.view(), None)
            .unwrap();
        for _ in 0..10 {
            let params: Vec<f64> = (0..parameter_count(2))
                .map(|_| rng.gen_range(-1.0..1.0))
                .collect();
            let rotated = rotate_loadings(loadings.view(), &params).unwrap();
            assert_eq!(
                ctx.score_parameters(loadings.view(), &params).unwrap(),
                ctx.score_loadings(rotated.view(), None).unwrap()
            );
        }
        let identity = identity_parameters(2);
        assert_eq!(
            ctx.score_parameters(loadings.view(), identity.as_slice().unwrap())
                .unwrap(),
            ctx.score_loadings(loadings.view(), None).unwrap()
        );
    }
}
