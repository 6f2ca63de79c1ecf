//! Within-category scatter matrix.
//!
//! C = Σ_c (1 / n_c) · X_cᵗ X_c, where X_c stacks the members of category c
//! centred on the category mean. Every category contributes the Gram matrix
//! of its own centred block, scaled by its own member count, so small
//! categories weigh as much per category as large ones. A single-member
//! category contributes zero.
//!
//! Per-category Gram blocks are computed in parallel and summed in category
//! order, which keeps the result reproducible run to run. The upper triangle
//! is computed and mirrored, so C is exactly symmetric.

use log::{debug, info, trace};
use rayon::prelude::*;
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::error::{EvalError, Result};
use crate::linalg::square_to_dense;
use crate::statistics::{CategoryGroup, CategoryStatistics};
use crate::store::Embedding;

/// Symmetric D×D scatter matrix, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct ScatterMatrix {
    pub dim: usize,
    pub values: Vec<f64>,
}

impl ScatterMatrix {
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            values: vec![0.0; dim * dim],
        }
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.dim + j]
    }

    /// Largest |C_ij - C_ji|.
    pub fn asymmetry(&self) -> f64 {
        let d = self.dim;
        let mut worst = 0.0f64;
        for i in 0..d {
            for j in (i + 1)..d {
                worst = worst.max((self.get(i, j) - self.get(j, i)).abs());
            }
        }
        worst
    }

    pub fn trace(&self) -> f64 {
        (0..self.dim).map(|i| self.get(i, i)).sum()
    }

    pub fn to_dense(&self) -> Result<DenseMatrix<f64>> {
        square_to_dense(&self.values, self.dim)
    }

    fn add_assign(&mut self, other: &[f64]) {
        for (a, b) in self.values.iter_mut().zip(other) {
            *a += b;
        }
    }
}

pub struct ScatterMatrixBuilder;

impl ScatterMatrixBuilder {
    /// Build C from the embeddings and their category statistics.
    pub fn build(embeddings: &[Embedding], stats: &CategoryStatistics) -> Result<ScatterMatrix> {
        let dim = stats.dim;
        info!(
            "Building {}x{} scatter matrix over {} categories",
            dim,
            dim,
            stats.n_categories()
        );

        let groups: Vec<&CategoryGroup> = stats.groups.values().collect();
        let blocks: Vec<Result<Option<Vec<f64>>>> = groups
            .par_iter()
            .map(|group| category_gram(embeddings, group, dim))
            .collect();

        let mut c = ScatterMatrix::zeros(dim);
        let mut contributing = 0usize;
        for block in blocks {
            if let Some(g) = block? {
                c.add_assign(&g);
                contributing += 1;
            }
        }

        debug!(
            "Scatter matrix: {} contributing categories, trace={:.6e}",
            contributing,
            c.trace()
        );
        Ok(c)
    }
}

/// (1/n) · X_cᵗ X_c for one category, `None` for singletons.
fn category_gram(
    embeddings: &[Embedding],
    group: &CategoryGroup,
    dim: usize,
) -> Result<Option<Vec<f64>>> {
    let n = group.count();
    if n < 2 {
        return Ok(None);
    }

    // Centred block, column-major so each Gram entry is a contiguous dot.
    let mut cols = vec![0.0f64; n * dim];
    for (r, &idx) in group.members.iter().enumerate() {
        let e = embeddings
            .get(idx)
            .ok_or_else(|| EvalError::dimension_mismatch(embeddings.len(), idx + 1))?;
        if e.len() != dim {
            return Err(EvalError::dimension_mismatch(dim, e.len()));
        }
        for (j, (&x, &m)) in e.iter().zip(&group.mean).enumerate() {
            cols[j * n + r] = x - m;
        }
    }

    let scale = 1.0 / n as f64;
    let mut g = vec![0.0f64; dim * dim];
    for i in 0..dim {
        let ci = &cols[i * n..(i + 1) * n];
        for j in i..dim {
            let cj = &cols[j * n..(j + 1) * n];
            let v = ci.iter().zip(cj).map(|(a, b)| a * b).sum::<f64>() * scale;
            g[i * dim + j] = v;
            g[j * dim + i] = v;
        }
    }
    trace!("Gram block for {} members computed", n);
    Ok(Some(g))
}
