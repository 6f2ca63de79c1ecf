//! Numeric backend for the debiasing pipeline.
//!
//! - Allocation-free vector primitives (`dot`, `norm`, `axpy`)
//! - `SubspaceSolver`: top-k directions of a symmetric PSD matrix
//! - Two smartcore-backed solvers: general SVD and symmetric EVD
//!
//! Spectra are re-sorted here by magnitude descending so callers never depend
//! on the ordering conventions of the backend.

use log::{debug, trace};
use smartcore::linalg::basic::arrays::{Array, Array2};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linalg::traits::evd::EVDDecomposable;
use smartcore::linalg::traits::svd::SVDDecomposable;

use crate::config::DecompositionBackend;
use crate::error::{EvalError, Result};

/// Computes the Euclidean norm (L2) without allocating.
#[inline]
pub fn norm(a: &[f64]) -> f64 {
    a.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(&x, &y)| x * y).sum()
}

/// y += alpha * x
#[inline]
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

/// Row-major square buffer into a smartcore matrix.
pub fn square_to_dense(values: &[f64], dim: usize) -> Result<DenseMatrix<f64>> {
    if values.len() != dim * dim {
        return Err(EvalError::dimension_mismatch(dim * dim, values.len()));
    }
    Ok(DenseMatrix::from_iterator(values.iter().copied(), dim, dim, 0))
}

/// Spectrum and leading directions of a symmetric PSD matrix.
#[derive(Clone, Debug)]
pub struct Decomposition {
    /// All singular values (or eigenvalue magnitudes), descending.
    pub spectrum: Vec<f64>,
    /// The first `k` directions, each of length D, matching `spectrum[..k]`.
    pub directions: Vec<Vec<f64>>,
}

/// Extracts the dominant directions of a symmetric PSD matrix.
pub trait SubspaceSolver {
    fn name(&self) -> &'static str;

    /// Return the top-`k` orthonormal directions of the D×D matrix `c`.
    fn top_directions(&self, c: &DenseMatrix<f64>, k: usize) -> Result<Decomposition>;
}

/// Right singular vectors of a general SVD, C = U·S·Vᵗ.
#[derive(Clone, Copy, Debug, Default)]
pub struct SvdSolver;

/// Eigenvectors of the symmetric eigendecomposition.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymmetricEigenSolver;

impl SubspaceSolver for SvdSolver {
    fn name(&self) -> &'static str {
        "svd"
    }

    fn top_directions(&self, c: &DenseMatrix<f64>, k: usize) -> Result<Decomposition> {
        let (n, m) = c.shape();
        trace!("SVD of {}x{} scatter matrix", n, m);
        let svd = c.svd()?;
        Ok(select_columns(&svd.s, &svd.V, k))
    }
}

impl SubspaceSolver for SymmetricEigenSolver {
    fn name(&self) -> &'static str {
        "symmetric-eigen"
    }

    fn top_directions(&self, c: &DenseMatrix<f64>, k: usize) -> Result<Decomposition> {
        let (n, m) = c.shape();
        trace!("Symmetric EVD of {}x{} scatter matrix", n, m);
        let evd = c.evd(true)?;
        Ok(select_columns(&evd.d, &evd.V, k))
    }
}

/// Sort by |value| descending (stable on index) and copy out the first k columns.
fn select_columns(values: &[f64], vectors: &DenseMatrix<f64>, k: usize) -> Decomposition {
    let (dim, ncols) = vectors.shape();
    let mut order: Vec<usize> = (0..values.len().min(ncols)).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .abs()
            .partial_cmp(&values[a].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });

    let spectrum: Vec<f64> = order.iter().map(|&j| values[j].abs()).collect();
    let directions: Vec<Vec<f64>> = order
        .iter()
        .take(k)
        .map(|&j| (0..dim).map(|i| *vectors.get((i, j))).collect())
        .collect();

    debug!(
        "Selected {} directions, leading spectrum {:?}",
        directions.len(),
        &spectrum[..spectrum.len().min(k)]
    );
    Decomposition {
        spectrum,
        directions,
    }
}

/// Solver for the configured backend.
pub fn solver_for(backend: DecompositionBackend) -> Box<dyn SubspaceSolver + Send + Sync> {
    match backend {
        DecompositionBackend::Svd => Box::new(SvdSolver),
        DecompositionBackend::SymmetricEigen => Box::new(SymmetricEigenSolver),
    }
}
