//! Data types of a study: the observed dataset, fitted factor models, and the interfaces of the
//! external collaborators that fit them.

use crate::catalog::{ObliqueRotation, OrthogonalRotation};
use crate::indices::objective::Objective;
use crate::tournament::{CandidateFamily, Commit};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Expected {variables} variable names, but {names} were given.")]
    NameCountMismatch { names: usize, variables: usize },
    #[error("At least two observations are needed to estimate the scaling, but only {0} were given.")]
    TooFewObservations(usize),
    #[error("Observation ({row}, {col}) is not a finite number.")]
    NonFiniteObservation { row: usize, col: usize },
    #[error(
        "Scaling of variable '{name}' must be finite and strictly positive, but it is {value}. A constant column cannot be analyzed."
    )]
    InvalidScaling { name: String, value: f64 },
    #[error("The dataset must contain at least one variable.")]
    Empty,
}

#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("Factor extraction failed: {0}")]
    Extraction(String),
    #[error("No factor solution is available for {n_factors} factors with rotation '{rotation}'.")]
    NoSolution { n_factors: usize, rotation: String },
    #[error("The sufficiency test is not available: {0}")]
    Unsupported(String),
    #[error("The factor correlation matrix must be {factors}x{factors}, but it is {rows}x{cols}.")]
    PhiShapeMismatch {
        factors: usize,
        rows: usize,
        cols: usize,
    },
}

// --- Dataset ---

/// The observed variables of a study: names, per-variable scaling, and the sample size.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    names: Vec<String>,
    scaling: Array1<f64>,
    n_obs: usize,
}

/// `V1, V2, ...` for unnamed variables.
pub fn default_names(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("V{i}")).collect()
}

impl Dataset {
    fn checked(names: Vec<String>, scaling: Array1<f64>, n_obs: usize) -> Result<Self, DatasetError> {
        if scaling.is_empty() {
            return Err(DatasetError::Empty);
        }
        let names = if names.is_empty() {
            default_names(scaling.len())
        } else {
            names
        };
        if names.len() != scaling.len() {
            return Err(DatasetError::NameCountMismatch {
                names: names.len(),
                variables: scaling.len(),
            });
        }
        if let Some((i, &value)) = scaling
            .iter()
            .enumerate()
            .find(|(_, v)| !(v.is_finite() && **v > 0.0))
        {
            return Err(DatasetError::InvalidScaling {
                name: names[i].clone(),
                value,
            });
        }
        Ok(Self {
            names,
            scaling,
            n_obs,
        })
    }

    /// Builds a dataset from raw observations (rows are observations, columns variables).
    /// Scaling is the sample standard deviation of each column.
    pub fn from_observations(
        names: Vec<String>,
        observations: ArrayView2<f64>,
    ) -> Result<Self, DatasetError> {
        let n_obs = observations.nrows();
        if n_obs < 2 {
            return Err(DatasetError::TooFewObservations(n_obs));
        }
        if let Some(((row, col), _)) = observations.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(DatasetError::NonFiniteObservation { row, col });
        }
        let scaling = observations.std_axis(Axis(0), 1.0);
        Self::checked(names, scaling, n_obs)
    }

    /// Builds a dataset when only the correlation structure is known. Without an explicit scaling
    /// vector every variable has unit scale.
    pub fn from_correlation(
        names: Vec<String>,
        n_variables: usize,
        scaling: Option<Array1<f64>>,
        n_obs: usize,
    ) -> Result<Self, DatasetError> {
        let scaling = scaling.unwrap_or_else(|| Array1::ones(n_variables));
        if scaling.len() != n_variables {
            return Err(DatasetError::NameCountMismatch {
                names: scaling.len(),
                variables: n_variables,
            });
        }
        Self::checked(names, scaling, n_obs)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn scaling(&self) -> ArrayView1<'_, f64> {
        self.scaling.view()
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn n_variables(&self) -> usize {
        self.scaling.len()
    }
}

// --- Rotation methods ---

/// Every rotation a model can be fitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum RotationMethod {
    Unrotated,
    /// Tournament driven by an interpretability index (priorimax, interpmax, composite).
    IndexDriven(Objective),
    Orthogonal(OrthogonalRotation),
    /// Fitted by the extraction collaborator.
    Oblique(ObliqueRotation),
}

impl RotationMethod {
    pub fn is_orthogonal(self) -> bool {
        !matches!(self, RotationMethod::Oblique(_))
    }

    pub fn name(self) -> &'static str {
        match self {
            RotationMethod::Unrotated => "none",
            RotationMethod::IndexDriven(objective) => objective.procedure_name(),
            RotationMethod::Orthogonal(rotation) => rotation.name(),
            RotationMethod::Oblique(rotation) => rotation.name(),
        }
    }

    /// All accepted rotation names.
    pub fn valid_names() -> Vec<&'static str> {
        let mut names = vec!["none"];
        names.extend(Objective::ALL.iter().map(|o| o.procedure_name()));
        names.extend(OrthogonalRotation::CATALOG_ORDER.iter().map(|r| r.name()));
        names.extend(ObliqueRotation::ALL.iter().map(|r| r.name()));
        names
    }
}

impl fmt::Display for RotationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for a rotation name outside the enumerated set.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unknown rotation '{name}'. Valid rotations are: {valid}.")]
pub struct UnknownRotationMethod {
    pub name: String,
    pub valid: String,
}

impl FromStr for RotationMethod {
    type Err = UnknownRotationMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if lowered == "none" {
            return Ok(RotationMethod::Unrotated);
        }
        if let Some(objective) = Objective::ALL
            .into_iter()
            .find(|o| o.procedure_name() == lowered)
        {
            return Ok(RotationMethod::IndexDriven(objective));
        }
        if let Ok(rotation) = lowered.parse::<OrthogonalRotation>() {
            return Ok(RotationMethod::Orthogonal(rotation));
        }
        if let Some(rotation) = ObliqueRotation::ALL.into_iter().find(|r| r.name() == lowered) {
            return Ok(RotationMethod::Oblique(rotation));
        }
        Err(UnknownRotationMethod {
            name: s.to_string(),
            valid: RotationMethod::valid_names().join(", "),
        })
    }
}

// --- Collaborators ---

/// Output of the extraction collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorSolution {
    pub loadings: Array2<f64>,
    /// Factor correlation matrix of an oblique solution.
    pub phi: Option<Array2<f64>>,
    pub communalities: Array1<f64>,
}

impl FactorSolution {
    /// An orthogonal solution whose communalities are the row sums of squared loadings.
    pub fn orthogonal(loadings: Array2<f64>) -> Self {
        let communalities = loadings.mapv(|v| v * v).sum_axis(Axis(1));
        Self {
            loadings,
            phi: None,
            communalities,
        }
    }

    /// An oblique solution. Communalities are the row sums of `L ∘ (L Φ)`.
    pub fn oblique(loadings: Array2<f64>, phi: Array2<f64>) -> Result<Self, CollaboratorError> {
        let factors = loadings.ncols();
        if phi.dim() != (factors, factors) {
            return Err(CollaboratorError::PhiShapeMismatch {
                factors,
                rows: phi.nrows(),
                cols: phi.ncols(),
            });
        }
        let structure = loadings.dot(&phi);
        let communalities = (&loadings * &structure).sum_axis(Axis(1));
        Ok(Self {
            loadings,
            phi: Some(phi),
            communalities,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SufficiencyTest {
    pub statistic: f64,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
}

/// Outcome of the sufficiency test. The only part of a report that may degrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Sufficiency {
    Available(SufficiencyTest),
    Unavailable { reason: String },
}

/// Fits unrotated (or collaborator-rotated oblique) factor solutions.
pub trait FactorExtractor {
    fn extract(
        &self,
        n_factors: usize,
        oblique: Option<ObliqueRotation>,
    ) -> Result<FactorSolution, CollaboratorError>;

    fn sufficiency(
        &self,
        solution: &FactorSolution,
        n_observations: usize,
    ) -> Result<SufficiencyTest, CollaboratorError> {
        Err(CollaboratorError::Unsupported(format!(
            "this extractor has no sufficiency test ({} factors, {} observations)",
            solution.loadings.ncols(),
            n_observations
        )))
    }
}

/// Serves solutions that were fitted elsewhere, keyed by factor count and oblique rotation.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedExtractor {
    solutions: HashMap<(usize, Option<ObliqueRotation>), FactorSolution>,
    sufficiency: HashMap<usize, SufficiencyTest>,
}

impl PrecomputedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_solution(
        mut self,
        oblique: Option<ObliqueRotation>,
        solution: FactorSolution,
    ) -> Self {
        self.solutions
            .insert((solution.loadings.ncols(), oblique), solution);
        self
    }

    pub fn with_sufficiency(mut self, n_factors: usize, test: SufficiencyTest) -> Self {
        self.sufficiency.insert(n_factors, test);
        self
    }
}

impl FactorExtractor for PrecomputedExtractor {
    fn extract(
        &self,
        n_factors: usize,
        oblique: Option<ObliqueRotation>,
    ) -> Result<FactorSolution, CollaboratorError> {
        self.solutions
            .get(&(n_factors, oblique))
            .cloned()
            .ok_or_else(|| CollaboratorError::NoSolution {
                n_factors,
                rotation: oblique.map_or("none", |r| r.name()).to_string(),
            })
    }

    fn sufficiency(
        &self,
        solution: &FactorSolution,
        n_observations: usize,
    ) -> Result<SufficiencyTest, CollaboratorError> {
        self.sufficiency
            .get(&solution.loadings.ncols())
            .copied()
            .ok_or_else(|| {
                CollaboratorError::Unsupported(format!(
                    "no precomputed test for {} factors and {} observations",
                    solution.loadings.ncols(),
                    n_observations
                ))
            })
    }
}

/// KMO and Bartlett statistics, computed by the caller and reported unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingAdequacy {
    pub kmo_per_item: Vec<f64>,
    pub kmo_overall: f64,
    pub bartlett_statistic: f64,
    pub bartlett_p_value: f64,
}

// --- Factor models ---

/// A fitted factor model. Loadings and rotation change only through [`FactorModel::apply`].
#[derive(Debug, Clone)]
pub struct FactorModel {
    pub method: RotationMethod,
    pub loadings: Array2<f64>,
    pub phi: Option<Array2<f64>>,
    pub communalities: Array1<f64>,
    pub orthogonal: bool,
    /// Rotation used for the current loadings; `None` when the loadings are unrotated.
    pub rotation: Option<Array2<f64>>,
    /// Winning family of the last index-driven rotation.
    pub winner: Option<CandidateFamily>,
    pub predefined_rotation: Option<OrthogonalRotation>,
    pub sufficiency: Sufficiency,
}

impl FactorModel {
    pub fn from_solution(
        method: RotationMethod,
        solution: FactorSolution,
        sufficiency: Sufficiency,
    ) -> Self {
        let orthogonal = method.is_orthogonal();
        Self {
            method,
            loadings: solution.loadings,
            phi: if orthogonal { None } else { solution.phi },
            communalities: solution.communalities,
            orthogonal,
            rotation: None,
            winner: None,
            predefined_rotation: None,
            sufficiency,
        }
    }

    pub fn n_factors(&self) -> usize {
        self.loadings.ncols()
    }

    /// `phi` only for oblique models, as used by the variable-factor correlations.
    pub fn oblique_phi(&self) -> Option<ArrayView2<'_, f64>> {
        if self.orthogonal {
            None
        } else {
            self.phi.as_ref().map(|p| p.view())
        }
    }

    /// Writes the tournament result into the model.
    pub fn apply(&mut self, commit: Commit) {
        self.loadings = commit.loadings;
        self.rotation = commit.rotation;
        self.winner = Some(commit.family);
        self.predefined_rotation = commit.predefined_rotation;
    }
}
