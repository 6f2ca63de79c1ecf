//! Bias subspace extraction.
//!
//! The bias subspace is spanned by the k leading right singular vectors of the
//! scatter matrix C. Since C is symmetric PSD these coincide with its top-k
//! eigenvectors, so either solver from [`crate::linalg`] can be used.
//!
//! With repeated singular values the individual basis vectors are not unique;
//! only the spanned subspace is. Compare subspaces through
//! [`BiasSubspace::projector`], never vector by vector.

use log::{debug, info, warn};

use crate::error::{EvalError, Result};
use crate::linalg::{axpy, dot, norm, SubspaceSolver};
use crate::scatter::ScatterMatrix;

/// Orthonormal D×k basis of the dominant bias directions.
#[derive(Clone, Debug, PartialEq)]
pub struct BiasSubspace {
    pub dim: usize,
    /// k unit vectors, strongest direction first.
    pub basis: Vec<Vec<f64>>,
    /// Full spectrum of C, descending.
    pub singular_values: Vec<f64>,
    /// Directions whose singular value is above the relative rank tolerance.
    pub informative_rank: usize,
}

impl BiasSubspace {
    pub fn rank(&self) -> usize {
        self.basis.len()
    }

    /// Fewer informative directions than requested.
    pub fn rank_deficient(&self) -> bool {
        self.informative_rank < self.rank()
    }

    /// Coordinates of `e` in the subspace basis.
    pub fn coordinates(&self, e: &[f64]) -> Vec<f64> {
        self.basis.iter().map(|v| dot(e, v)).collect()
    }

    /// P = Σ v_i v_iᵗ, row-major D×D.
    pub fn projector(&self) -> Vec<f64> {
        let d = self.dim;
        let mut p = vec![0.0; d * d];
        for v in &self.basis {
            for i in 0..d {
                for j in 0..d {
                    p[i * d + j] += v[i] * v[j];
                }
            }
        }
        p
    }
}

pub struct BiasSubspaceExtractor;

impl BiasSubspaceExtractor {
    /// Extract the top-`k` directions of `c` using `solver`.
    ///
    /// `rank_tolerance` is relative to the largest singular value; directions
    /// below it are still returned but flagged through `informative_rank`.
    pub fn extract(
        c: &ScatterMatrix,
        k: usize,
        solver: &dyn SubspaceSolver,
        rank_tolerance: f64,
    ) -> Result<BiasSubspace> {
        let dim = c.dim;
        if k == 0 || k > dim {
            return Err(EvalError::invalid_parameter(format!(
                "bias rank k={} must satisfy 1 <= k <= D={}",
                k, dim
            )));
        }
        info!(
            "Extracting rank-{} bias subspace from {}x{} scatter matrix with {}",
            k,
            dim,
            dim,
            solver.name()
        );

        let dense = c.to_dense()?;
        let decomposition = solver.top_directions(&dense, k)?;
        if decomposition.directions.len() != k {
            return Err(EvalError::dimension_mismatch(
                k,
                decomposition.directions.len(),
            ));
        }

        let basis = orthonormalize(decomposition.directions)?;

        let spectrum = decomposition.spectrum;
        let top = spectrum.first().copied().unwrap_or(0.0);
        let floor = top * rank_tolerance;
        let informative_rank = spectrum
            .iter()
            .take(k)
            .filter(|&&s| top > 0.0 && s > floor)
            .count();

        if informative_rank < k {
            warn!(
                "Scatter matrix has {} informative directions for requested rank {}; \
                 trailing bias directions are near-arbitrary",
                informative_rank, k
            );
        }
        debug!(
            "Bias subspace spectrum (top {}): {:?}",
            k,
            &spectrum[..spectrum.len().min(k)]
        );

        Ok(BiasSubspace {
            dim,
            basis,
            singular_values: spectrum,
            informative_rank,
        })
    }
}

/// Modified Gram-Schmidt; a no-op up to rounding for an orthonormal input.
fn orthonormalize(mut vectors: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>> {
    for i in 0..vectors.len() {
        let (done, rest) = vectors.split_at_mut(i);
        let v = &mut rest[0];
        for u in done.iter() {
            let proj = dot(v, u);
            axpy(-proj, u, v);
        }
        let n = norm(v);
        if !(n.is_finite() && n > 1e-12) {
            return Err(EvalError::Linalg(format!(
                "bias direction {} is not linearly independent",
                i
            )));
        }
        v.iter_mut().for_each(|x| *x /= n);
    }
    Ok(vectors)
}
