//! Bias neutralization: remove the bias-subspace component of every embedding
//! and renormalize to unit L2 norm.
//!
//! Directions are removed one at a time in basis order. Since the basis is
//! orthonormal the successive subtractions commute and equal a single
//! projection onto the orthogonal complement of the subspace.
//!
//! An embedding whose norm falls below `degenerate_norm_eps` after removal
//! cannot be renormalized and aborts with `DegenerateProjection`.

use log::{debug, info};
use rayon::prelude::*;

use crate::error::{EvalError, Result};
use crate::linalg::{axpy, dot, norm};
use crate::store::Embedding;
use crate::subspace::BiasSubspace;

pub struct Neutralizer {
    degenerate_norm_eps: f64,
}

impl Neutralizer {
    pub fn new(degenerate_norm_eps: f64) -> Self {
        Self {
            degenerate_norm_eps,
        }
    }

    /// Remove the subspace component, then renormalize every row in place.
    pub fn neutralize(&self, embeddings: &mut [Embedding], subspace: &BiasSubspace) -> Result<()> {
        info!(
            "Neutralizing {} embeddings against a rank-{} bias subspace",
            embeddings.len(),
            subspace.rank()
        );
        remove_projection(embeddings, subspace)?;
        self.renormalize(embeddings)?;
        debug!("Neutralization complete");
        Ok(())
    }

    /// Scale every row to unit norm, failing on (near) zero rows.
    ///
    /// Nothing is modified when any row is degenerate.
    pub fn renormalize(&self, embeddings: &mut [Embedding]) -> Result<()> {
        let norms: Vec<f64> = embeddings.par_iter().map(|e| norm(e)).collect();
        if let Some((index, n)) = norms
            .iter()
            .copied()
            .enumerate()
            .find(|&(_, n)| !(n.is_finite() && n > self.degenerate_norm_eps))
        {
            return Err(EvalError::DegenerateProjection { index, norm: n });
        }

        embeddings
            .par_iter_mut()
            .zip(norms.par_iter())
            .for_each(|(e, &n)| e.iter_mut().for_each(|x| *x /= n));
        Ok(())
    }
}

/// Subtract `(e · v_i) v_i` from every row for each basis vector in order.
pub fn remove_projection(embeddings: &mut [Embedding], subspace: &BiasSubspace) -> Result<()> {
    if let Some(bad) = embeddings.iter().find(|e| e.len() != subspace.dim) {
        return Err(EvalError::dimension_mismatch(subspace.dim, bad.len()));
    }
    for v in &subspace.basis {
        embeddings.par_iter_mut().for_each(|e| {
            let p = dot(e, v);
            axpy(-p, v, e);
        });
    }
    Ok(())
}
