//! Per-category embedding statistics.
//!
//! Groups news embeddings by their dense integer category code and computes
//! the arithmetic mean of each group. Groups are kept in a `BTreeMap` so that
//! every downstream accumulation visits categories in a fixed order.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::error::{EvalError, Result};
use crate::linalg::axpy;
use crate::store::Embedding;

/// Dense integer category code; callers map raw labels before this point.
pub type CategoryCode = i64;

/// Members and mean of one category.
#[derive(Clone, Debug, PartialEq)]
pub struct CategoryGroup {
    /// Row indices into the embedding set.
    pub members: Vec<usize>,
    pub mean: Embedding,
}

impl CategoryGroup {
    pub fn count(&self) -> usize {
        self.members.len()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CategoryStatistics {
    pub dim: usize,
    pub groups: BTreeMap<CategoryCode, CategoryGroup>,
}

impl CategoryStatistics {
    /// Compute per-category means of `embeddings` labelled by `categories`.
    ///
    /// Both slices are aligned by row. All embeddings must share a dimension.
    pub fn compute(embeddings: &[Embedding], categories: &[CategoryCode]) -> Result<Self> {
        if embeddings.len() != categories.len() {
            return Err(EvalError::dimension_mismatch(
                embeddings.len(),
                categories.len(),
            ));
        }
        let dim = embeddings.first().map(|e| e.len()).ok_or_else(|| {
            EvalError::invalid_parameter("category statistics need at least one embedding")
        })?;

        info!(
            "Computing category means over {} embeddings (D={})",
            embeddings.len(),
            dim
        );

        let mut groups: BTreeMap<CategoryCode, CategoryGroup> = BTreeMap::new();
        for (i, (e, &c)) in embeddings.iter().zip(categories).enumerate() {
            if e.len() != dim {
                return Err(EvalError::dimension_mismatch(dim, e.len()));
            }
            let group = groups.entry(c).or_insert_with(|| CategoryGroup {
                members: Vec::new(),
                mean: vec![0.0; dim],
            });
            group.members.push(i);
            axpy(1.0, e, &mut group.mean);
        }

        let mut singletons = 0usize;
        for group in groups.values_mut() {
            let n = group.members.len() as f64;
            group.mean.iter_mut().for_each(|x| *x /= n);
            if group.members.len() == 1 {
                singletons += 1;
            }
        }

        if singletons > 0 {
            warn!(
                "{} of {} categories have a single member and contribute no scatter",
                singletons,
                groups.len()
            );
        }
        debug!(
            "Category sizes: {:?}",
            groups
                .iter()
                .map(|(c, g)| (*c, g.count()))
                .collect::<Vec<_>>()
        );

        Ok(Self { dim, groups })
    }

    pub fn n_categories(&self) -> usize {
        self.groups.len()
    }

    pub fn mean(&self, category: CategoryCode) -> Option<&Embedding> {
        self.groups.get(&category).map(|g| &g.mean)
    }
}
