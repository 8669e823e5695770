//! # Semantic Structure
//!
//! Everything that needs item embeddings: the lazily loaded sentence encoder handle, the
//! semantic-similarity prior, per-factor central meanings, and the horizontal index built on them.

use crate::indices::prior::{PriorError, PriorMatrix};
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::f64::consts::PI;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("The sentence encoder failed: {0}")]
    Encoder(String),
    #[error("The sentence encoder returned {rows} embeddings for {texts} texts.")]
    EmbeddingCountMismatch { rows: usize, texts: usize },
    #[error("Embeddings cover {embeddings} variables, but the correlation matrix has {variables} rows.")]
    EmbeddingShapeMismatch { embeddings: usize, variables: usize },
    #[error(transparent)]
    Prior(#[from] PriorError),
}

/// Maps ordered texts to one embedding row per text.
pub trait SentenceEncoder: Send + Sync {
    fn encode(&self, texts: &[String]) -> Result<Array2<f64>, SemanticError>;
}

type EncoderLoader = Box<dyn Fn() -> Result<Box<dyn SentenceEncoder>, SemanticError> + Send + Sync>;

/// A single owned encoder that is loaded on first use and reused afterwards.
///
/// The handle is created once by the caller and passed explicitly wherever embeddings are needed.
pub struct EncoderHandle {
    loader: EncoderLoader,
    encoder: OnceLock<Box<dyn SentenceEncoder>>,
}

impl fmt::Debug for EncoderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderHandle")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl EncoderHandle {
    pub fn lazy<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn SentenceEncoder>, SemanticError> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            encoder: OnceLock::new(),
        }
    }

    /// Wraps an encoder that is already loaded.
    pub fn ready(encoder: Box<dyn SentenceEncoder>) -> Self {
        let handle = Self::lazy(|| {
            Err(SemanticError::Encoder(
                "the preloaded encoder cannot be reloaded".to_string(),
            ))
        });
        // A fresh cell always accepts its first value.
        let _ = handle.encoder.set(encoder);
        handle
    }

    pub fn is_loaded(&self) -> bool {
        self.encoder.get().is_some()
    }

    fn encoder(&self) -> Result<&dyn SentenceEncoder, SemanticError> {
        if self.encoder.get().is_none() {
            log::info!("Loading sentence encoder...");
            let loaded = (self.loader)()?;
            // Another thread may have won the race; either value is a loaded encoder.
            let _ = self.encoder.set(loaded);
        }
        self.encoder
            .get()
            .map(|boxed| boxed.as_ref())
            .ok_or_else(|| SemanticError::Encoder("encoder was not initialized".to_string()))
    }

    /// Embeds one text per variable, in variable order.
    pub fn embed(&self, texts: &[String]) -> Result<Array2<f64>, SemanticError> {
        let embeddings = self.encoder()?.encode(texts)?;
        if embeddings.nrows() != texts.len() {
            return Err(SemanticError::EmbeddingCountMismatch {
                rows: embeddings.nrows(),
                texts: texts.len(),
            });
        }
        Ok(embeddings)
    }
}

/// Embeds the item texts of a study, checking that there is exactly one text per variable.
pub fn embed_questions(
    handle: &EncoderHandle,
    questions: &[String],
    variables: usize,
) -> Result<Array2<f64>, SemanticError> {
    if questions.len() != variables {
        return Err(PriorError::QuestionCountMismatch {
            questions: questions.len(),
            variables,
        }
        .into());
    }
    handle.embed(questions)
}

fn norm(v: ArrayView1<f64>) -> f64 {
    v.dot(&v).sqrt()
}

/// Cosine of the angle between two vectors, clamped to `[-1, 1]`. `None` for a zero vector.
pub fn clamped_cosine(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Option<f64> {
    let denom = norm(a) * norm(b);
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    Some((a.dot(&b) / denom).clamp(-1.0, 1.0))
}

/// Semantic-similarity prior: `1 - arccos(cos(e_i, e_j)) / π` for every pair, unit diagonal.
pub fn semantic_prior(embeddings: ArrayView2<f64>) -> Result<PriorMatrix, PriorError> {
    let n = embeddings.nrows();
    if let Some(row) = embeddings
        .axis_iter(Axis(0))
        .position(|row| norm(row) == 0.0 || !norm(row).is_finite())
    {
        return Err(PriorError::DegenerateEmbedding(row));
    }

    let mut values = Array2::<f64>::ones((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let cosine = clamped_cosine(embeddings.row(i), embeddings.row(j))
                .ok_or(PriorError::DegenerateEmbedding(i))?;
            let similarity = 1.0 - cosine.acos() / PI;
            values[(i, j)] = similarity;
            values[(j, i)] = similarity;
        }
    }
    PriorMatrix::dense(values)
}

/// Central meaning of each factor: the embedding average weighted by `|r_ik| / Σ_i |r_ik|`.
///
/// Returns one row per factor, or `Ok(None)` when some factor has zero total weight.
pub fn central_meanings(
    correlations: ArrayView2<f64>,
    embeddings: ArrayView2<f64>,
) -> Result<Option<Array2<f64>>, SemanticError> {
    if correlations.nrows() != embeddings.nrows() {
        return Err(SemanticError::EmbeddingShapeMismatch {
            embeddings: embeddings.nrows(),
            variables: correlations.nrows(),
        });
    }

    let weights = correlations.mapv(f64::abs);
    let totals: Array1<f64> = weights.sum_axis(Axis(0));
    if totals.iter().any(|&t| t == 0.0 || !t.is_finite()) {
        return Ok(None);
    }
    let mut meanings = weights.t().dot(&embeddings);
    for (mut row, &total) in meanings.axis_iter_mut(Axis(0)).zip(totals.iter()) {
        row.mapv_inplace(|v| v / total);
    }
    Ok(Some(meanings))
}

/// Horizontal index over central meanings (one row per factor).
///
/// `H = 1 - 4 / (π T (T - 1)) Σ_{k<l} |arccos(cos(c_k, c_l)) - π/2|`. Fully orthogonal meanings
/// give 1. `None` for fewer than two factors or a zero-norm central meaning.
pub fn horizontal_index(meanings: ArrayView2<f64>) -> Option<f64> {
    let t = meanings.nrows();
    if t < 2 {
        return None;
    }
    let mut deviation = 0.0;
    for (k, l) in (0..t).tuple_combinations() {
        let cosine = clamped_cosine(meanings.row(k), meanings.row(l))?;
        deviation += (cosine.acos() - PI / 2.0).abs();
    }
    Some(1.0 - 4.0 / (PI * t as f64 * (t as f64 - 1.0)) * deviation)
}
