//! # Study Store
//!
//! A [`Study`] owns the dataset, the prior, optional item embeddings and a named collection of
//! fitted factor models. Every operation that names a model fails with the list of valid names
//! when the model does not exist. Rotation procedures score candidates without touching the store
//! and then apply a single commit to the named model; all other operations are read-only.

use crate::catalog::{self, CatalogError};
use crate::config::{ConfigError, RotationConfig};
use crate::indices::concordance::{self, Multiset, SimilarityKind};
use crate::indices::objective::{
    self, CompositeIndex, Objective, ObjectiveContext, ObjectiveError,
    variable_factor_correlations,
};
use crate::indices::prior::{PriorError, PriorMatrix};
use crate::indices::semantic::{self, EncoderHandle, SemanticError};
use crate::study::model::{
    CollaboratorError, Dataset, DatasetError, FactorExtractor, FactorModel, RotationMethod,
    SamplingAdequacy, Sufficiency, UnknownRotationMethod,
};
use crate::study::report::{
    AgreementScatter, Heatmap, IndexReport, ModelSummary, VariableAnalysis, VhPlot, VhPoint,
    matrix_rows, sort_by_largest_correlation, sort_by_score,
};
use crate::tournament::{self, TournamentError, TournamentOutcome};
use ndarray::{Array2, ArrayView2};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StudyError {
    #[error("Model '{name}' does not exist. Available models: [{}].", .available.join(", "))]
    UnknownModel {
        name: String,
        available: Vec<String>,
    },
    #[error("Unknown procedure '{name}'. Valid procedures are: {valid}.")]
    InvalidProcedure { name: String, valid: String },
    #[error(transparent)]
    InvalidRotation(#[from] UnknownRotationMethod),
    #[error("The factor solution has {found} variables, but the dataset has {expected}.")]
    VariableCountMismatch { expected: usize, found: usize },
    #[error("Model selection needs at least one model.")]
    EmptySelection,
    #[error(
        "Model '{0}' is oblique. Index-driven rotation only applies to orthogonal models."
    )]
    NotOrthogonal(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Prior(#[from] PriorError),
    #[error(transparent)]
    Objective(#[from] ObjectiveError),
    #[error(transparent)]
    Tournament(#[from] TournamentError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Semantic(#[from] SemanticError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Which models a comparison covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    All,
    Names(Vec<String>),
}

/// Parses a selection procedure name (`priorimax`, `interpmax`, `composite` and their aliases).
pub fn parse_procedure(name: &str) -> Result<Objective, StudyError> {
    name.parse::<Objective>().map_err(|e| match e {
        ObjectiveError::UnknownObjective { name, valid } => {
            StudyError::InvalidProcedure { name, valid }
        }
        other => other.into(),
    })
}

/// Parses a rotation method name.
pub fn parse_rotation(name: &str) -> Result<RotationMethod, StudyError> {
    Ok(name.parse::<RotationMethod>()?)
}

#[derive(Debug, Clone)]
pub struct Study {
    dataset: Dataset,
    prior: PriorMatrix,
    embeddings: Option<Array2<f64>>,
    adequacy: Option<SamplingAdequacy>,
    models: BTreeMap<String, FactorModel>,
}

impl Study {
    /// A study with an explicit prior.
    pub fn new(dataset: Dataset, prior: PriorMatrix) -> Result<Self, StudyError> {
        prior.check_variables(dataset.n_variables())?;
        Ok(Self {
            dataset,
            prior,
            embeddings: None,
            adequacy: None,
            models: BTreeMap::new(),
        })
    }

    /// A study whose prior is derived from item embeddings.
    pub fn semantic(dataset: Dataset, embeddings: Array2<f64>) -> Result<Self, StudyError> {
        check_embeddings(&dataset, embeddings.view())?;
        let prior = semantic::semantic_prior(embeddings.view())?;
        Self::new(dataset, prior)?.with_embeddings(embeddings)
    }

    /// A study whose prior is derived from the item texts through the encoder.
    pub fn from_questions(
        dataset: Dataset,
        questions: &[String],
        encoder: &EncoderHandle,
    ) -> Result<Self, StudyError> {
        let embeddings = semantic::embed_questions(encoder, questions, dataset.n_variables())?;
        Self::semantic(dataset, embeddings)
    }

    /// Attaches item embeddings, enabling the horizontal and overall indices.
    pub fn with_embeddings(mut self, embeddings: Array2<f64>) -> Result<Self, StudyError> {
        check_embeddings(&self.dataset, embeddings.view())?;
        self.embeddings = Some(embeddings);
        Ok(self)
    }

    pub fn with_adequacy(mut self, adequacy: SamplingAdequacy) -> Self {
        self.adequacy = Some(adequacy);
        self
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn prior(&self) -> &PriorMatrix {
        &self.prior
    }

    pub fn embeddings(&self) -> Option<ArrayView2<'_, f64>> {
        self.embeddings.as_ref().map(|e| e.view())
    }

    // --- Model collection ---

    pub fn model_names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn model(&self, name: &str) -> Result<&FactorModel, StudyError> {
        self.models
            .get(name)
            .ok_or_else(|| self.unknown_model(name))
    }

    fn model_mut(&mut self, name: &str) -> Result<&mut FactorModel, StudyError> {
        let available = self.model_names();
        self.models
            .get_mut(name)
            .ok_or_else(|| StudyError::UnknownModel {
                name: name.to_string(),
                available,
            })
    }

    fn unknown_model(&self, name: &str) -> StudyError {
        StudyError::UnknownModel {
            name: name.to_string(),
            available: self.model_names(),
        }
    }

    /// Stores a model under `name`, replacing any model of that name.
    pub fn insert_model(&mut self, name: &str, model: FactorModel) -> Result<(), StudyError> {
        if model.loadings.nrows() != self.dataset.n_variables() {
            return Err(StudyError::VariableCountMismatch {
                expected: self.dataset.n_variables(),
                found: model.loadings.nrows(),
            });
        }
        if self.models.insert(name.to_string(), model).is_some() {
            log::debug!("Replaced existing model '{name}'.");
        }
        Ok(())
    }

    pub fn remove_model(&mut self, name: &str) -> Result<FactorModel, StudyError> {
        match self.models.remove(name) {
            Some(model) => Ok(model),
            None => Err(self.unknown_model(name)),
        }
    }

    /// Fits a model through the extractor and rotates it with `method`.
    ///
    /// Oblique rotations are fitted by the extractor. Catalog rotations are applied directly, and
    /// index-driven methods run the full tournament, whose outcome is returned.
    pub fn fit_model(
        &mut self,
        name: &str,
        extractor: &dyn FactorExtractor,
        n_factors: usize,
        method: RotationMethod,
        config: &RotationConfig,
    ) -> Result<Option<TournamentOutcome>, StudyError> {
        config.validate()?;
        // Missing embeddings fail here, before anything is extracted.
        if let RotationMethod::IndexDriven(objective) = method {
            self.objective_context(objective)?;
        }
        let oblique = match method {
            RotationMethod::Oblique(rotation) => Some(rotation),
            _ => None,
        };
        let solution = extractor.extract(n_factors, oblique)?;
        if solution.loadings.nrows() != self.dataset.n_variables() {
            return Err(StudyError::VariableCountMismatch {
                expected: self.dataset.n_variables(),
                found: solution.loadings.nrows(),
            });
        }

        let sufficiency = match extractor.sufficiency(&solution, self.dataset.n_obs()) {
            Ok(test) => Sufficiency::Available(test),
            Err(e) => {
                log::warn!("Sufficiency test unavailable for model '{name}': {e}");
                Sufficiency::Unavailable {
                    reason: e.to_string(),
                }
            }
        };

        let mut model = FactorModel::from_solution(method, solution, sufficiency);
        if let RotationMethod::Orthogonal(kind) = method {
            let rotated = catalog::rotate(kind, model.loadings.view(), &config.catalog)?;
            model.loadings = rotated.loadings;
            model.rotation = Some(rotated.rotation);
            model.predefined_rotation = Some(kind);
        }
        let outcome = match method {
            RotationMethod::IndexDriven(objective) => {
                let ctx = self.objective_context(objective)?;
                let outcome = tournament::run(model.loadings.view(), &ctx, config)?;
                let commit = outcome.clone().into_commit(model.loadings.view());
                model.apply(commit);
                Some(outcome)
            }
            _ => None,
        };
        // Only a fully rotated model reaches the store.
        self.insert_model(name, model)?;
        log::info!("Fitted model '{name}' with {n_factors} factors ({method}).");
        Ok(outcome)
    }

    /// Runs the rotation tournament on a stored orthogonal model and commits the winner.
    pub fn rotate_model(
        &mut self,
        name: &str,
        objective: Objective,
        config: &RotationConfig,
    ) -> Result<TournamentOutcome, StudyError> {
        config.validate()?;
        let (outcome, commit) = {
            let model = self.model(name)?;
            if !model.orthogonal {
                return Err(StudyError::NotOrthogonal(name.to_string()));
            }
            let ctx = self.objective_context(objective)?;
            let outcome = tournament::run(model.loadings.view(), &ctx, config)?;
            let commit = outcome.clone().into_commit(model.loadings.view());
            (outcome, commit)
        };
        self.model_mut(name)?.apply(commit);
        Ok(outcome)
    }

    fn objective_context(&self, objective: Objective) -> Result<ObjectiveContext<'_>, StudyError> {
        Ok(ObjectiveContext::new(
            objective,
            &self.prior,
            self.dataset.scaling(),
            self.embeddings(),
        )?)
    }

    fn require_embeddings(&self) -> Result<ArrayView2<'_, f64>, StudyError> {
        self.embeddings()
            .ok_or(StudyError::Objective(ObjectiveError::EmbeddingsUnavailable))
    }

    // --- Queries ---

    pub fn variable_factor_correlations(&self, name: &str) -> Result<Array2<f64>, StudyError> {
        let model = self.model(name)?;
        Ok(variable_factor_correlations(
            model.loadings.view(),
            model.oblique_phi(),
            self.dataset.scaling(),
        )?)
    }

    pub fn similarity_matrix(
        &self,
        name: &str,
        kind: SimilarityKind,
    ) -> Result<Array2<Option<f64>>, StudyError> {
        let correlations = self.variable_factor_correlations(name)?;
        Ok(concordance::similarity_matrix(correlations.view(), kind))
    }

    pub fn multiset(&self, name: &str, kind: SimilarityKind) -> Result<Multiset, StudyError> {
        let correlations = self.variable_factor_correlations(name)?;
        Ok(Multiset::build(&self.prior, correlations.view(), kind))
    }

    pub fn agreement_scatter(
        &self,
        name: &str,
        kind: SimilarityKind,
    ) -> Result<AgreementScatter, StudyError> {
        Ok(AgreementScatter {
            model: name.to_string(),
            samples: self.multiset(name, kind)?.samples,
        })
    }

    pub fn agreement_index(&self, name: &str) -> Result<Option<f64>, StudyError> {
        let correlations = self.variable_factor_correlations(name)?;
        Ok(objective::agreement_index(&self.prior, correlations.view()))
    }

    /// Same as [`Study::agreement_index`].
    pub fn vertical_index(&self, name: &str) -> Result<Option<f64>, StudyError> {
        self.agreement_index(name)
    }

    pub fn central_meanings(&self, name: &str) -> Result<Option<Array2<f64>>, StudyError> {
        let embeddings = self.require_embeddings()?;
        let correlations = self.variable_factor_correlations(name)?;
        Ok(semantic::central_meanings(correlations.view(), embeddings)?)
    }

    pub fn horizontal_index(&self, name: &str) -> Result<Option<f64>, StudyError> {
        Ok(self
            .central_meanings(name)?
            .and_then(|meanings| semantic::horizontal_index(meanings.view())))
    }

    pub fn overall_index(&self, name: &str) -> Result<Option<f64>, StudyError> {
        let horizontal = self.horizontal_index(name)?;
        let vertical = self.agreement_index(name)?;
        Ok(objective::overall_index(vertical, horizontal))
    }

    pub fn composite_index(&self, name: &str) -> Result<CompositeIndex, StudyError> {
        let correlations = self.variable_factor_correlations(name)?;
        Ok(objective::composite_index(&self.prior, correlations.view()))
    }

    // --- Reports ---

    /// Index report of one model. The agreement index is always present; the horizontal and
    /// overall indices only for the overall objective, tau, theta and V only for the composite.
    pub fn calculate_indices(
        &self,
        name: &str,
        objective: Objective,
    ) -> Result<IndexReport, StudyError> {
        let model = self.model(name)?;
        let correlations = self.variable_factor_correlations(name)?;
        let agreement = objective::agreement_index(&self.prior, correlations.view());

        let mut report = IndexReport {
            model: name.to_string(),
            objective,
            agreement,
            horizontal: None,
            overall: None,
            tau: None,
            theta: None,
            composite: None,
            communalities: model.communalities.to_vec(),
            adequacy: self.adequacy.clone(),
            sufficiency: model.sufficiency.clone(),
        };
        match objective {
            Objective::Agreement => {}
            Objective::Overall => {
                let embeddings = self.require_embeddings()?;
                let horizontal =
                    objective::horizontal_from_correlations(correlations.view(), embeddings)?;
                report.horizontal = horizontal;
                report.overall = objective::overall_index(agreement, horizontal);
            }
            Objective::CompositeV => {
                let composite = objective::composite_index(&self.prior, correlations.view());
                report.tau = composite.tau;
                report.theta = composite.theta;
                report.composite = composite.value;
            }
        }
        Ok(report)
    }

    pub fn summarize_model(
        &self,
        name: &str,
        objective: Objective,
        include_loadings: bool,
    ) -> Result<ModelSummary, StudyError> {
        let indices = self.calculate_indices(name, objective)?;
        let model = self.model(name)?;
        let correlations = self.variable_factor_correlations(name)?;
        Ok(ModelSummary {
            indices,
            method: model.method.name().to_string(),
            orthogonal: model.orthogonal,
            winner: model.winner,
            predefined_rotation: model.predefined_rotation,
            variable_factor_correlations: matrix_rows(correlations.view()),
            loadings: include_loadings.then(|| matrix_rows(model.loadings.view())),
            rotation: if include_loadings {
                model.rotation.as_ref().map(|r| matrix_rows(r.view()))
            } else {
                None
            },
        })
    }

    /// One row per variable with its factor correlations, communality and KMO MSA.
    pub fn analyze_model(
        &self,
        name: &str,
        sorted: bool,
    ) -> Result<Vec<VariableAnalysis>, StudyError> {
        let model = self.model(name)?;
        let correlations = self.variable_factor_correlations(name)?;
        let kmo = self.adequacy.as_ref().map(|a| a.kmo_per_item.as_slice());
        let mut rows: Vec<VariableAnalysis> = self
            .dataset
            .names()
            .iter()
            .enumerate()
            .map(|(i, variable)| VariableAnalysis {
                variable: variable.clone(),
                correlations: correlations.row(i).to_vec(),
                communality: model.communalities.get(i).copied().unwrap_or(f64::NAN),
                kmo_msa: kmo.and_then(|k| k.get(i).copied()),
            })
            .collect();
        if sorted {
            sort_by_largest_correlation(&mut rows);
        }
        Ok(rows)
    }

    pub fn heatmap(&self, name: &str, sorted: bool) -> Result<Heatmap, StudyError> {
        let correlations = self.variable_factor_correlations(name)?;
        Ok(Heatmap::new(self.dataset.names(), &correlations, sorted))
    }

    fn selected_names(&self, selection: &ModelSelection) -> Result<Vec<String>, StudyError> {
        let names = match selection {
            ModelSelection::All => self.model_names(),
            ModelSelection::Names(names) => {
                for name in names {
                    self.model(name)?;
                }
                names.clone()
            }
        };
        if names.is_empty() {
            return Err(StudyError::EmptySelection);
        }
        Ok(names)
    }

    /// Summaries of the selected models, from the highest score to the lowest. Models whose
    /// score is not computable come last.
    pub fn select_factor_model(
        &self,
        selection: &ModelSelection,
        objective: Objective,
    ) -> Result<Vec<ModelSummary>, StudyError> {
        let mut summaries = self
            .selected_names(selection)?
            .iter()
            .map(|name| self.summarize_model(name, objective, false))
            .collect::<Result<Vec<_>, _>>()?;
        sort_by_score(&mut summaries);
        if let Some(best) = summaries.first() {
            log::info!(
                "Best model by {objective}: '{}' ({:?})",
                best.indices.model,
                best.indices.score()
            );
        }
        Ok(summaries)
    }

    /// Vertical and horizontal indices of the selected models with isoquants of the given radii.
    pub fn vh_plot(
        &self,
        selection: &ModelSelection,
        radii: &[f64],
    ) -> Result<VhPlot, StudyError> {
        let points = self
            .selected_names(selection)?
            .into_iter()
            .map(|model| {
                Ok(VhPoint {
                    vertical: self.agreement_index(&model)?,
                    horizontal: self.horizontal_index(&model)?,
                    model,
                })
            })
            .collect::<Result<Vec<_>, StudyError>>()?;
        Ok(VhPlot::new(points, radii))
    }
}

fn check_embeddings(dataset: &Dataset, embeddings: ArrayView2<f64>) -> Result<(), StudyError> {
    if embeddings.nrows() != dataset.n_variables() {
        return Err(SemanticError::EmbeddingShapeMismatch {
            embeddings: embeddings.nrows(),
            variables: dataset.n_variables(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ObliqueRotation, OrthogonalRotation};
    use crate::study::model::{FactorSolution, PrecomputedExtractor, SufficiencyTest};
    use crate::study::report::DEFAULT_RADII;
    use crate::tournament::{CandidateFamily, rank_value};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn simple_structure() -> Array2<f64> {
        array![
            [0.80, 0.05],
            [0.75, 0.10],
            [0.70, 0.02],
            [0.08, 0.85],
            [0.03, 0.78]
        ]
    }

    fn mixed_loadings() -> Array2<f64> {
        let angle: f64 = 0.5;
        let rotation = array![[angle.cos(), -angle.sin()], [angle.sin(), angle.cos()]];
        simple_structure().dot(&rotation)
    }

    fn embeddings() -> Array2<f64> {
        array![
            [1.0, 0.0, 0.1],
            [0.9, 0.1, 0.0],
            [1.0, 0.1, 0.1],
            [0.0, 1.0, 0.0],
            [0.1, 0.9, 0.0]
        ]
    }

    fn study() -> Study {
        let dataset = Dataset::from_correlation(vec![], 5, None, 200).unwrap();
        let prior = PriorMatrix::grouper(5, &[vec![1, 2, 3], vec![4, 5]]).unwrap();
        Study::new(dataset, prior).unwrap()
    }

    fn no_search() -> RotationConfig {
        RotationConfig {
            search_enabled: false,
            ..RotationConfig::default()
        }
    }

    fn extractor() -> PrecomputedExtractor {
        let oblique = FactorSolution {
            loadings: simple_structure(),
            phi: Some(array![[1.0, 0.3], [0.3, 1.0]]),
            communalities: array![0.64, 0.57, 0.49, 0.73, 0.61],
        };
        PrecomputedExtractor::new()
            .with_solution(None, FactorSolution::orthogonal(mixed_loadings()))
            .with_solution(Some(ObliqueRotation::Oblimin), oblique)
            .with_sufficiency(
                2,
                SufficiencyTest {
                    statistic: 3.2,
                    degrees_of_freedom: 1,
                    p_value: 0.07,
                },
            )
    }

    #[test]
    fn mismatched_prior_is_rejected() {
        let dataset = Dataset::from_correlation(vec![], 4, None, 50).unwrap();
        let prior = PriorMatrix::grouper(5, &[vec![1, 2]]).unwrap();
        assert!(matches!(
            Study::new(dataset, prior),
            Err(StudyError::Prior(PriorError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn unknown_models_list_available_names() {
        let mut study = study();
        study
            .fit_model("raw", &extractor(), 2, RotationMethod::Unrotated, &no_search())
            .unwrap();
        let err = study.agreement_index("missing").unwrap_err();
        match &err {
            StudyError::UnknownModel { name, available } => {
                assert_eq!(name, "missing");
                assert_eq!(available, &["raw"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("raw"));
        assert!(study.remove_model("missing").is_err());
        assert!(study.remove_model("raw").is_ok());
        assert!(study.model_names().is_empty());
    }

    #[test]
    fn procedure_and_rotation_names_are_validated() {
        assert_eq!(parse_procedure("interpmax").unwrap(), Objective::Overall);
        assert!(matches!(
            parse_procedure("maximax"),
            Err(StudyError::InvalidProcedure { .. })
        ));
        assert!(matches!(
            parse_rotation("geomin"),
            Err(StudyError::InvalidRotation(_))
        ));
    }

    #[test]
    fn index_driven_rotation_never_scores_below_no_rotation() {
        let mut study = study();
        study
            .fit_model("raw", &extractor(), 2, RotationMethod::Unrotated, &no_search())
            .unwrap();
        let before = study.agreement_index("raw").unwrap();

        let outcome = study
            .fit_model(
                "rotated",
                &extractor(),
                2,
                RotationMethod::IndexDriven(Objective::Agreement),
                &no_search(),
            )
            .unwrap()
            .unwrap();
        assert!(rank_value(outcome.winning_score()) >= rank_value(before));
        assert!(outcome.free_form.is_none());

        let model = study.model("rotated").unwrap();
        assert_eq!(model.winner, Some(outcome.winner));
        let after = study.agreement_index("rotated").unwrap();
        assert_eq!(after, outcome.winning_score());
        if outcome.winner == CandidateFamily::NoRotation {
            assert!(model.rotation.is_none());
        } else {
            assert!(model.rotation.is_some());
        }
    }

    #[test]
    fn catalog_fit_records_rotation() {
        let mut study = study();
        study
            .fit_model(
                "varimax",
                &extractor(),
                2,
                RotationMethod::Orthogonal(OrthogonalRotation::Varimax),
                &no_search(),
            )
            .unwrap();
        let model = study.model("varimax").unwrap();
        assert_eq!(model.predefined_rotation, Some(OrthogonalRotation::Varimax));
        let rotation = model.rotation.as_ref().unwrap();
        let identity = rotation.t().dot(rotation);
        assert_abs_diff_eq!(identity[(0, 1)], 0.0, epsilon = 1e-10);
        assert!(study.agreement_index("varimax").unwrap().unwrap() > 0.9);
    }

    #[test]
    fn oblique_models_use_phi_and_refuse_index_rotation() {
        let mut study = study();
        study
            .fit_model(
                "oblimin",
                &extractor(),
                2,
                RotationMethod::Oblique(ObliqueRotation::Oblimin),
                &no_search(),
            )
            .unwrap();
        assert!(!study.model("oblimin").unwrap().orthogonal);
        let corr = study.variable_factor_correlations("oblimin").unwrap();
        assert_abs_diff_eq!(corr[(0, 1)], 0.05 + 0.3 * 0.80, epsilon = 1e-12);
        assert!(matches!(
            study.rotate_model("oblimin", Objective::Agreement, &no_search()),
            Err(StudyError::NotOrthogonal(_))
        ));
    }

    #[test]
    fn missing_sufficiency_degrades_only_that_field() {
        let mut study = study();
        let bare = PrecomputedExtractor::new()
            .with_solution(None, FactorSolution::orthogonal(simple_structure()));
        study
            .fit_model("bare", &bare, 2, RotationMethod::Unrotated, &no_search())
            .unwrap();
        let report = study.calculate_indices("bare", Objective::CompositeV).unwrap();
        assert!(matches!(report.sufficiency, Sufficiency::Unavailable { .. }));
        assert!(report.agreement.is_some());
        assert!(report.composite.is_some());
        assert!(report.overall.is_none());

        study
            .fit_model("full", &extractor(), 2, RotationMethod::Unrotated, &no_search())
            .unwrap();
        let report = study.calculate_indices("full", Objective::Agreement).unwrap();
        assert!(matches!(report.sufficiency, Sufficiency::Available(_)));
    }

    #[test]
    fn failed_index_driven_fit_stores_nothing() {
        let mut study = study();
        let result = study.fit_model(
            "m",
            &extractor(),
            2,
            RotationMethod::IndexDriven(Objective::Overall),
            &no_search(),
        );
        assert!(matches!(
            result,
            Err(StudyError::Objective(ObjectiveError::EmbeddingsUnavailable))
        ));
        assert!(study.model_names().is_empty());

        let result = study.fit_model(
            "m",
            &extractor(),
            3,
            RotationMethod::IndexDriven(Objective::Agreement),
            &no_search(),
        );
        assert!(result.is_err());
        assert!(study.model_names().is_empty());
    }

    #[test]
    fn overall_needs_embeddings() {
        let mut study = study();
        study
            .fit_model("raw", &extractor(), 2, RotationMethod::Unrotated, &no_search())
            .unwrap();
        assert!(matches!(
            study.calculate_indices("raw", Objective::Overall),
            Err(StudyError::Objective(ObjectiveError::EmbeddingsUnavailable))
        ));
        let study = study.with_embeddings(embeddings()).unwrap();
        let report = study.calculate_indices("raw", Objective::Overall).unwrap();
        assert!(report.horizontal.is_some());
        assert_eq!(
            report.overall,
            objective::overall_index(report.agreement, report.horizontal)
        );
    }

    #[test]
    fn selection_orders_models_by_score() {
        let mut study = study();
        let ex = extractor();
        study
            .fit_model("raw", &ex, 2, RotationMethod::Unrotated, &no_search())
            .unwrap();
        study
            .fit_model(
                "varimax",
                &ex,
                2,
                RotationMethod::Orthogonal(OrthogonalRotation::Varimax),
                &no_search(),
            )
            .unwrap();
        let ranked = study
            .select_factor_model(&ModelSelection::All, Objective::Agreement)
            .unwrap();
        assert_eq!(ranked.len(), 2);
        assert!(rank_value(ranked[0].indices.score()) >= rank_value(ranked[1].indices.score()));
        assert!(ranked[0].loadings.is_none());

        assert!(matches!(
            study.select_factor_model(&ModelSelection::Names(vec![]), Objective::Agreement),
            Err(StudyError::EmptySelection)
        ));
        assert!(matches!(
            study.select_factor_model(
                &ModelSelection::Names(vec!["nope".to_string()]),
                Objective::Agreement
            ),
            Err(StudyError::UnknownModel { .. })
        ));
    }

    #[test]
    fn analysis_carries_kmo_and_communalities() {
        let adequacy = SamplingAdequacy {
            kmo_per_item: vec![0.7, 0.8, 0.75, 0.9, 0.6],
            kmo_overall: 0.76,
            bartlett_statistic: 210.0,
            bartlett_p_value: 1e-9,
        };
        let mut study = study().with_adequacy(adequacy);
        study
            .fit_model("raw", &extractor(), 2, RotationMethod::Unrotated, &no_search())
            .unwrap();
        let rows = study.analyze_model("raw", false).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[3].variable, "V4");
        assert_eq!(rows[3].kmo_msa, Some(0.9));
        let expected = mixed_loadings().row(0).mapv(|v| v * v).sum();
        assert_abs_diff_eq!(rows[0].communality, expected, epsilon = 1e-12);

        let heatmap = study.heatmap("raw", true).unwrap();
        assert_eq!(heatmap.variables.len(), 5);
    }

    #[test]
    fn semantic_study_supports_vh_plot() {
        let dataset = Dataset::from_correlation(vec![], 5, None, 200).unwrap();
        let mut study = Study::semantic(dataset, embeddings()).unwrap();
        assert_eq!(study.prior().constrained_pair_count(), 10);
        study
            .fit_model(
                "varimax",
                &extractor(),
                2,
                RotationMethod::Orthogonal(OrthogonalRotation::Varimax),
                &no_search(),
            )
            .unwrap();
        let plot = study.vh_plot(&ModelSelection::All, &DEFAULT_RADII).unwrap();
        assert_eq!(plot.points.len(), 1);
        assert_eq!(plot.closest.as_deref(), Some("varimax"));
        assert_eq!(plot.isoquants.len(), DEFAULT_RADII.len());
    }
}
