pub mod io;
pub mod model;
pub mod report;
pub mod store;

pub use model::{
    CollaboratorError, Dataset, DatasetError, FactorExtractor, FactorModel, FactorSolution,
    PrecomputedExtractor, RotationMethod, SamplingAdequacy, Sufficiency, SufficiencyTest,
};
pub use report::{IndexReport, ModelSummary, VariableAnalysis};
pub use store::{ModelSelection, Study, StudyError};
