//! # Selection Tournament
//!
//! Scores three candidate families on one objective and picks a single winner:
//!
//! 1. no rotation (the loadings as fitted),
//! 2. the best rotation of the predefined catalog,
//! 3. the free-form search result.
//!
//! Scoring is pure. The only mutation happens when the caller applies the [`Commit`] produced
//! from the outcome.

use crate::catalog::{self, CatalogError, OrthogonalRotation};
use crate::cayley::{ParameterError, rotation_matrix};
use crate::config::RotationConfig;
use crate::indices::objective::{ObjectiveContext, ObjectiveError};
use crate::isres;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TournamentError {
    #[error(transparent)]
    Objective(#[from] ObjectiveError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Parameters(#[from] ParameterError),
}

/// Candidate families in priority order. An earlier family wins an exact tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateFamily {
    NoRotation,
    Predefined,
    FreeForm,
}

impl fmt::Display for CandidateFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CandidateFamily::NoRotation => "no rotation",
            CandidateFamily::Predefined => "predefined rotation",
            CandidateFamily::FreeForm => "free-form search",
        })
    }
}

/// Orders scores for selection: a missing or non-finite score is unattainable.
#[inline]
pub fn rank_value(score: Option<f64>) -> f64 {
    score.filter(|s| s.is_finite()).unwrap_or(f64::NEG_INFINITY)
}

/// Index of the first maximum.
fn first_max(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[derive(Debug, Clone)]
pub struct PredefinedCandidate {
    pub rotation_kind: OrthogonalRotation,
    pub score: Option<f64>,
    pub loadings: Array2<f64>,
    pub rotation: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct FreeFormCandidate {
    pub params: Array1<f64>,
    pub score: Option<f64>,
    pub loadings: Array2<f64>,
    pub rotation: Array2<f64>,
    pub evaluations: usize,
    pub generations: usize,
}

/// The scored state of a tournament. Nothing has been written anywhere yet.
#[derive(Debug, Clone)]
pub struct TournamentOutcome {
    pub no_rotation: Option<f64>,
    /// `None` when every catalog rotation failed.
    pub predefined: Option<PredefinedCandidate>,
    /// `None` when the search was disabled or given no time.
    pub free_form: Option<FreeFormCandidate>,
    pub winner: CandidateFamily,
}

/// The single write a rotation procedure performs on a model.
#[derive(Debug, Clone)]
pub struct Commit {
    pub family: CandidateFamily,
    pub loadings: Array2<f64>,
    /// `None` when no rotation won.
    pub rotation: Option<Array2<f64>>,
    pub score: Option<f64>,
    pub predefined_rotation: Option<OrthogonalRotation>,
}

impl TournamentOutcome {
    pub fn family_scores(&self) -> [Option<f64>; 3] {
        [
            self.no_rotation,
            self.predefined.as_ref().and_then(|p| p.score),
            self.free_form.as_ref().and_then(|f| f.score),
        ]
    }

    pub fn winning_score(&self) -> Option<f64> {
        match self.winner {
            CandidateFamily::NoRotation => self.no_rotation,
            CandidateFamily::Predefined => self.predefined.as_ref().and_then(|p| p.score),
            CandidateFamily::FreeForm => self.free_form.as_ref().and_then(|f| f.score),
        }
    }

    /// Turns the outcome into the commit for the winning family.
    pub fn into_commit(self, unrotated: ArrayView2<f64>) -> Commit {
        let score = self.winning_score();
        match (self.winner, self.predefined, self.free_form) {
            (CandidateFamily::Predefined, Some(p), _) => Commit {
                family: CandidateFamily::Predefined,
                loadings: p.loadings,
                rotation: Some(p.rotation),
                score,
                predefined_rotation: Some(p.rotation_kind),
            },
            (CandidateFamily::FreeForm, _, Some(f)) => Commit {
                family: CandidateFamily::FreeForm,
                loadings: f.loadings,
                rotation: Some(f.rotation),
                score,
                predefined_rotation: None,
            },
            _ => Commit {
                family: CandidateFamily::NoRotation,
                loadings: unrotated.to_owned(),
                rotation: None,
                score,
                predefined_rotation: None,
            },
        }
    }
}

fn best_predefined(
    unrotated: ArrayView2<f64>,
    ctx: &ObjectiveContext<'_>,
    config: &RotationConfig,
) -> Result<Option<PredefinedCandidate>, TournamentError> {
    let mut best: Option<PredefinedCandidate> = None;
    for rotation_kind in OrthogonalRotation::CATALOG_ORDER {
        let solution = match catalog::rotate(rotation_kind, unrotated, &config.catalog) {
            Ok(solution) => solution,
            Err(CatalogError::NonFiniteCriterion { rotation }) => {
                log::warn!("Skipping {rotation}: its criterion is not finite for these loadings.");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let score = ctx.score_loadings(solution.loadings.view(), None)?;
        log::debug!("{} {}: {:?}", rotation_kind, ctx.objective(), score);
        let improves = best
            .as_ref()
            .is_none_or(|b| rank_value(score) > rank_value(b.score));
        if improves {
            best = Some(PredefinedCandidate {
                rotation_kind,
                score,
                loadings: solution.loadings,
                rotation: solution.rotation,
            });
        }
    }
    Ok(best)
}

fn free_form(
    unrotated: ArrayView2<f64>,
    ctx: &ObjectiveContext<'_>,
    config: &RotationConfig,
) -> Result<Option<FreeFormCandidate>, TournamentError> {
    if !config.runs_search() {
        log::info!("Free-form search skipped (disabled or no time budget).");
        return Ok(None);
    }
    let num_factors = unrotated.ncols();
    let outcome = isres::maximize(num_factors, &config.isres_settings(), |x| {
        ctx.score_parameters(unrotated, x)
    })?;
    if outcome.stopped_by_deadline {
        log::info!(
            "Free-form search reached its {:.1}s budget after {} generations.",
            config.max_time_secs,
            outcome.generations
        );
    }
    let params_slice = outcome.params.to_vec();
    let rotation = rotation_matrix(&params_slice)?;
    Ok(Some(FreeFormCandidate {
        loadings: unrotated.dot(&rotation),
        rotation,
        params: outcome.params,
        score: outcome.score,
        evaluations: outcome.evaluations,
        generations: outcome.generations,
    }))
}

/// Scores all families for one set of unrotated orthogonal loadings and picks the winner.
pub fn run(
    unrotated: ArrayView2<f64>,
    ctx: &ObjectiveContext<'_>,
    config: &RotationConfig,
) -> Result<TournamentOutcome, TournamentError> {
    let no_rotation = ctx.score_loadings(unrotated, None)?;
    let predefined = best_predefined(unrotated, ctx, config)?;
    let free_form = free_form(unrotated, ctx, config)?;

    let mut outcome = TournamentOutcome {
        no_rotation,
        predefined,
        free_form,
        winner: CandidateFamily::NoRotation,
    };
    let ranked = outcome.family_scores().map(rank_value);
    outcome.winner = [
        CandidateFamily::NoRotation,
        CandidateFamily::Predefined,
        CandidateFamily::FreeForm,
    ][first_max(&ranked)];
    log::info!(
        "Tournament on {}: no rotation {:?}, predefined {:?}, free-form {:?}; winner: {}",
        ctx.objective(),
        ranked[0],
        ranked[1],
        ranked[2],
        outcome.winner
    );
    Ok(outcome)
}
