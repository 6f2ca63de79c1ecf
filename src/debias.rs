//! # Debiasing pipeline
//!
//! Chains the four numeric stages over the complete news embedding set:
//!
//! 1. **Category statistics**: per-category means ([`CategoryStatistics`]).
//! 2. **Scatter**: size-balanced within-category scatter matrix ([`ScatterMatrixBuilder`]).
//! 3. **Subspace**: top-k directions of the scatter matrix ([`BiasSubspaceExtractor`]).
//! 4. **Neutralize**: projection removal and renormalization ([`Neutralizer`]).
//!
//! The stages are also exposed one by one so that tests and custom workflows
//! can inspect intermediate results. Neutralization must run on the full news
//! set before any user is encoded; the padding sentinel is added afterwards by
//! the driver and never reaches the statistics.

use std::time::Instant;

use log::{debug, info, trace};

use crate::config::EvalConfig;
use crate::error::{EvalError, Result};
use crate::linalg::{solver_for, SubspaceSolver};
use crate::neutralize::Neutralizer;
use crate::scatter::{ScatterMatrix, ScatterMatrixBuilder};
use crate::statistics::{CategoryCode, CategoryStatistics};
use crate::store::{Embedding, EmbeddingStore};
use crate::subspace::{BiasSubspace, BiasSubspaceExtractor};

/// Outcome of one debiasing pass.
#[derive(Clone, Debug)]
pub struct DebiasReport {
    pub n_embeddings: usize,
    pub n_categories: usize,
    pub scatter_trace: f64,
    pub subspace: BiasSubspace,
}

pub struct DebiasPipeline {
    bias_rank: usize,
    rank_tolerance: f64,
    solver: Box<dyn SubspaceSolver + Send + Sync>,
    neutralizer: Neutralizer,
}

impl DebiasPipeline {
    pub fn new(config: &EvalConfig) -> Self {
        debug!(
            "Debias pipeline: k={}, backend={:?}, rank_tol={:e}, degenerate_eps={:e}",
            config.bias_rank, config.backend, config.rank_tolerance, config.degenerate_norm_eps
        );
        Self {
            bias_rank: config.bias_rank,
            rank_tolerance: config.rank_tolerance,
            solver: solver_for(config.backend),
            neutralizer: Neutralizer::new(config.degenerate_norm_eps),
        }
    }

    /// Replace the decomposition backend.
    pub fn with_solver(mut self, solver: Box<dyn SubspaceSolver + Send + Sync>) -> Self {
        self.solver = solver;
        self
    }

    // -------------------- Stages --------------------

    pub fn category_statistics(
        &self,
        embeddings: &[Embedding],
        categories: &[CategoryCode],
    ) -> Result<CategoryStatistics> {
        CategoryStatistics::compute(embeddings, categories)
    }

    pub fn scatter(
        &self,
        embeddings: &[Embedding],
        stats: &CategoryStatistics,
    ) -> Result<ScatterMatrix> {
        ScatterMatrixBuilder::build(embeddings, stats)
    }

    pub fn bias_subspace(&self, c: &ScatterMatrix) -> Result<BiasSubspace> {
        BiasSubspaceExtractor::extract(c, self.bias_rank, self.solver.as_ref(), self.rank_tolerance)
    }

    pub fn neutralize(&self, embeddings: &mut [Embedding], subspace: &BiasSubspace) -> Result<()> {
        self.neutralizer.neutralize(embeddings, subspace)
    }

    // -------------------- Full pass --------------------

    /// Run all stages, neutralizing `embeddings` in place.
    pub fn run(
        &self,
        embeddings: &mut [Embedding],
        categories: &[CategoryCode],
    ) -> Result<DebiasReport> {
        let start = Instant::now();
        info!(
            "Debiasing {} embeddings with rank-{} subspace",
            embeddings.len(),
            self.bias_rank
        );

        let stats = self.category_statistics(embeddings, categories)?;
        trace!("Category statistics ready: {} categories", stats.n_categories());

        let c = self.scatter(embeddings, &stats)?;
        trace!("Scatter matrix asymmetry {:e}", c.asymmetry());

        let subspace = self.bias_subspace(&c)?;
        self.neutralize(embeddings, &subspace)?;

        info!(
            "Debiasing complete in {:?}: {} categories, leading singular values {:?}",
            start.elapsed(),
            stats.n_categories(),
            &subspace.singular_values[..subspace.rank().min(subspace.singular_values.len())]
        );

        Ok(DebiasReport {
            n_embeddings: embeddings.len(),
            n_categories: stats.n_categories(),
            scatter_trace: c.trace(),
            subspace,
        })
    }

    /// Debias the store entries for `ids` in place.
    ///
    /// `ids` and `categories` are aligned rows (e.g. the news table in file
    /// order). Every id must already be encoded.
    pub fn run_on_store(
        &self,
        store: &mut EmbeddingStore<String>,
        ids: &[String],
        categories: &[CategoryCode],
    ) -> Result<DebiasReport> {
        if ids.len() != categories.len() {
            return Err(EvalError::dimension_mismatch(ids.len(), categories.len()));
        }
        let mut embeddings: Vec<Embedding> = ids
            .iter()
            .map(|id| store.require(id.as_str()).cloned())
            .collect::<Result<_>>()?;

        let report = self.run(&mut embeddings, categories)?;

        for (id, embedding) in ids.iter().zip(embeddings) {
            store.insert(id.clone(), embedding)?;
        }
        Ok(report)
    }
}
