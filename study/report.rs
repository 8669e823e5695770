//! Serializable, read-only views of a study: index reports, model summaries, per-variable
//! analyses, and the data behind the interpretability plots.

use crate::catalog::OrthogonalRotation;
use crate::indices::concordance::PairSample;
use crate::indices::objective::Objective;
use crate::study::model::{SamplingAdequacy, Sufficiency};
use crate::tournament::{CandidateFamily, rank_value};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Number of points on one isoquant curve.
pub const ISOQUANT_POINTS: usize = 400;

/// Default isoquant radii of the overall-index plot.
pub const DEFAULT_RADII: [f64; 4] = [0.25, 0.5, 0.75, 1.0];

pub fn matrix_rows(matrix: ArrayView2<f64>) -> Vec<Vec<f64>> {
    matrix.outer_iter().map(|row| row.to_vec()).collect()
}

/// Indices of one model under one objective. Statistics that are not computable are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub model: String,
    pub objective: Objective,
    /// Agreement (vertical) index, always reported.
    pub agreement: Option<f64>,
    /// Only for the overall objective.
    pub horizontal: Option<f64>,
    pub overall: Option<f64>,
    /// Only for the composite objective.
    pub tau: Option<f64>,
    pub theta: Option<f64>,
    pub composite: Option<f64>,
    pub communalities: Vec<f64>,
    pub adequacy: Option<SamplingAdequacy>,
    pub sufficiency: Sufficiency,
}

impl IndexReport {
    /// The value the objective ranks models by.
    pub fn score(&self) -> Option<f64> {
        match self.objective {
            Objective::Agreement => self.agreement,
            Objective::Overall => self.overall,
            Objective::CompositeV => self.composite,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    #[serde(flatten)]
    pub indices: IndexReport,
    pub method: String,
    pub orthogonal: bool,
    pub winner: Option<CandidateFamily>,
    pub predefined_rotation: Option<OrthogonalRotation>,
    pub variable_factor_correlations: Vec<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loadings: Option<Vec<Vec<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Vec<Vec<f64>>>,
}

/// Sorts summaries from the highest score to the lowest. Uncomputable scores go last, and equal
/// scores keep their input order.
pub fn sort_by_score(summaries: &mut [ModelSummary]) {
    summaries.sort_by(|a, b| {
        rank_value(b.indices.score())
            .partial_cmp(&rank_value(a.indices.score()))
            .unwrap_or(Ordering::Equal)
    });
}

/// One variable of a model analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableAnalysis {
    pub variable: String,
    pub correlations: Vec<f64>,
    pub communality: f64,
    pub kmo_msa: Option<f64>,
}

impl VariableAnalysis {
    fn largest_correlation(&self) -> f64 {
        self.correlations
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Orders variables by their largest (signed) correlation, descending.
pub fn sort_by_largest_correlation(rows: &mut [VariableAnalysis]) {
    rows.sort_by(|a, b| {
        b.largest_correlation()
            .partial_cmp(&a.largest_correlation())
            .unwrap_or(Ordering::Equal)
    });
}

/// Variable-factor correlations ready for a heatmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub variables: Vec<String>,
    pub factors: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl Heatmap {
    /// Builds the heatmap, optionally ordering variables by largest absolute correlation.
    pub fn new(names: &[String], correlations: &Array2<f64>, sorted: bool) -> Self {
        let mut order: Vec<usize> = (0..correlations.nrows()).collect();
        if sorted {
            let peak = |i: usize| {
                correlations
                    .row(i)
                    .iter()
                    .fold(0.0f64, |acc, v| acc.max(v.abs()))
            };
            order.sort_by(|&a, &b| peak(b).partial_cmp(&peak(a)).unwrap_or(Ordering::Equal));
        }
        Self {
            variables: order.iter().map(|&i| names[i].clone()).collect(),
            factors: (1..=correlations.ncols())
                .map(|k| format!("Factor {k}"))
                .collect(),
            values: order.iter().map(|&i| correlations.row(i).to_vec()).collect(),
        }
    }
}

/// Scatter data of the agreement plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementScatter {
    pub model: String,
    pub samples: Vec<PairSample>,
}

/// Vertical and horizontal index of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VhPoint {
    pub model: String,
    pub vertical: Option<f64>,
    pub horizontal: Option<f64>,
}

impl VhPoint {
    /// Distance to the ideal point `(1, 1)`, when both indices are computable.
    pub fn distance_to_ideal(&self) -> Option<f64> {
        let (v, h) = self.vertical.zip(self.horizontal)?;
        Some(((v - 1.0).powi(2) + (h - 1.0).powi(2)).sqrt())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VhPlot {
    pub points: Vec<VhPoint>,
    /// Model whose point lies closest to `(1, 1)`; the first one wins a tie.
    pub closest: Option<String>,
    pub isoquants: Vec<Isoquant>,
}

impl VhPlot {
    pub fn new(points: Vec<VhPoint>, radii: &[f64]) -> Self {
        let mut closest: Option<(f64, &str)> = None;
        for point in &points {
            if let Some(distance) = point.distance_to_ideal() {
                if closest.is_none_or(|(best, _)| distance < best) {
                    closest = Some((distance, point.model.as_str()));
                }
            }
        }
        let closest = closest.map(|(_, name)| name.to_string());
        Self {
            isoquants: radii.iter().map(|&r| Isoquant::new(r)).collect(),
            points,
            closest,
        }
    }
}

/// Points of constant overall index: `1 - (√2/2) r` for radius `r`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Isoquant {
    pub radius: f64,
    pub points: Vec<(f64, f64)>,
}

impl Isoquant {
    /// Samples the quarter circle of `radius` around `(1, 1)` inside the unit square.
    ///
    /// For `r < 1` the abscissa spans `[1 - r, 1]`, otherwise `[0, 1 - sqrt(r² - 1)]`. Points with
    /// no real ordinate are dropped.
    pub fn new(radius: f64) -> Self {
        let (start, end) = if radius < 1.0 {
            (1.0 - radius, 1.0)
        } else {
            (0.0, 1.0 - (radius * radius - 1.0).sqrt())
        };
        let step = (end - start) / (ISOQUANT_POINTS - 1) as f64;
        let points = (0..ISOQUANT_POINTS)
            .map(|i| {
                let x = start + step * i as f64;
                (x, 1.0 - (radius * radius - (x - 1.0).powi(2)).sqrt())
            })
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect();
        Self { radius, points }
    }
}
