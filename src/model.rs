//! Seam to the trained recommender.
//!
//! The model is consumed only through three operations: news encoding, user
//! encoding from a time-major stack of clicked-news embeddings, and candidate
//! scoring. Its architecture, weights and device placement are not a concern
//! of this crate.

use crate::dataset::NewsRecord;
use crate::error::{EvalError, Result};
use crate::store::Embedding;

/// Clicked-news embeddings of a user batch, time-major: `[history_len][batch][D]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ClickedNewsStack {
    steps: Vec<Vec<Embedding>>,
}

impl ClickedNewsStack {
    /// Transpose per-user histories (`[batch][history_len]`) into time-major order.
    ///
    /// All histories must have the same length.
    pub fn from_histories(histories: &[Vec<&Embedding>]) -> Result<Self> {
        let history_len = histories.first().map(|h| h.len()).unwrap_or(0);
        if let Some(bad) = histories.iter().find(|h| h.len() != history_len) {
            return Err(EvalError::dimension_mismatch(history_len, bad.len()));
        }
        let steps = (0..history_len)
            .map(|t| histories.iter().map(|h| h[t].clone()).collect())
            .collect();
        Ok(Self { steps })
    }

    pub fn history_len(&self) -> usize {
        self.steps.len()
    }

    pub fn batch_size(&self) -> usize {
        self.steps.first().map(|s| s.len()).unwrap_or(0)
    }

    /// History of user `b`, oldest slot first.
    pub fn user(&self, b: usize) -> impl Iterator<Item = &Embedding> + '_ {
        self.steps.iter().map(move |s| &s[b])
    }
}

/// A trained news recommender.
///
/// Implementations must be shareable across threads: impressions may be
/// scored concurrently.
pub trait NewsRecommender: Sync {
    /// One embedding per record, same order.
    fn encode_news(&self, batch: &[NewsRecord]) -> Result<Vec<Embedding>>;

    /// One embedding per user in the stack's batch dimension.
    fn encode_user(&self, clicked: &ClickedNewsStack) -> Result<Vec<Embedding>>;

    /// One click probability per candidate, same order.
    fn score(&self, candidates: &[Embedding], user: &Embedding) -> Result<Vec<f64>>;
}
