//! Session ranking: click probabilities → dense ordinal ranks.
//!
//! Rank 1 goes to the most probable candidate. Ties are broken by original
//! list position (earlier wins), so every candidate gets a distinct rank in
//! `[1, n]`. Ranks are reported aligned with the input candidate order, not
//! sorted.
//!
//! ```
//! use newsdebias::ranking::ordinal_ranks;
//!
//! assert_eq!(ordinal_ranks(&[0.1, 0.8, 0.3]), vec![3, 1, 2]);
//! assert_eq!(ordinal_ranks(&[0.5, 0.5, 0.9]), vec![2, 3, 1]);
//! ```

use std::cmp::Ordering;
use std::fmt;

use log::trace;

use crate::dataset::Impression;
use crate::error::{EvalError, Result};
use crate::model::NewsRecommender;
use crate::store::{Embedding, EmbeddingStore};

/// Stable ordinal ranking over descending probability.
///
/// NaN probabilities sort after every finite value.
pub fn ordinal_ranks(probabilities: &[f64]) -> Vec<usize> {
    let key = |p: f64| if p.is_nan() { f64::NEG_INFINITY } else { p };

    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    // stable: equal keys keep list order
    order.sort_by(|&a, &b| {
        key(probabilities[b])
            .partial_cmp(&key(probabilities[a]))
            .unwrap_or(Ordering::Equal)
    });

    let mut ranks = vec![0usize; probabilities.len()];
    for (position, &idx) in order.iter().enumerate() {
        ranks[idx] = position + 1;
    }
    ranks
}

/// Ranks of one impression, aligned with its candidate list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankedImpression {
    pub impression_id: i64,
    pub ranks: Vec<usize>,
}

impl fmt::Display for RankedImpression {
    /// `"{impression_id} [{r1},{r2},...]"`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.impression_id)?;
        for (i, r) in self.ranks.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", r)?;
        }
        f.write_str("]")
    }
}

pub struct SessionRanker<'a, M: ?Sized> {
    model: &'a M,
}

impl<'a, M: NewsRecommender + ?Sized> SessionRanker<'a, M> {
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }

    /// Score the impression's candidates against `user` and rank them.
    ///
    /// Every candidate must have a (neutralized) embedding in `news`.
    pub fn rank(
        &self,
        impression: &Impression,
        news: &EmbeddingStore<String>,
        user: &Embedding,
    ) -> Result<RankedImpression> {
        let candidates: Vec<Embedding> = impression
            .candidate_ids()
            .map(|id| news.require(id).cloned())
            .collect::<Result<_>>()?;

        let ranks = if candidates.is_empty() {
            Vec::new()
        } else {
            let probabilities = self.model.score(&candidates, user)?;
            if probabilities.len() != candidates.len() {
                return Err(EvalError::dimension_mismatch(
                    candidates.len(),
                    probabilities.len(),
                ));
            }
            trace!(
                "Impression {}: {} candidates scored",
                impression.impression_id,
                candidates.len()
            );
            ordinal_ranks(&probabilities)
        };

        Ok(RankedImpression {
            impression_id: impression.impression_id,
            ranks,
        })
    }
}
