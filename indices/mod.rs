//! Interpretability indices: priors, pairwise similarity metrics, semantic structure, and the
//! objectives built from them.

pub mod concordance;
pub mod objective;
pub mod prior;
pub mod semantic;
