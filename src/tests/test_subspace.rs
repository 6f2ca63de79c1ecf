use approx::assert_relative_eq;

use crate::error::EvalError;
use crate::linalg::{dot, SvdSolver, SymmetricEigenSolver};
use crate::scatter::{ScatterMatrix, ScatterMatrixBuilder};
use crate::statistics::CategoryStatistics;
use crate::subspace::{BiasSubspace, BiasSubspaceExtractor};
use crate::tests::test_data::make_categorised;
use crate::tests::{init, TOL};

fn scatter(embeddings: &[Vec<f64>], categories: &[i64]) -> ScatterMatrix {
    let stats = CategoryStatistics::compute(embeddings, categories).unwrap();
    ScatterMatrixBuilder::build(embeddings, &stats).unwrap()
}

fn assert_orthonormal(s: &BiasSubspace) {
    for (i, u) in s.basis.iter().enumerate() {
        for (j, v) in s.basis.iter().enumerate() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_relative_eq!(dot(u, v), expected, epsilon = 1e-8);
        }
    }
}

fn assert_same_subspace(a: &BiasSubspace, b: &BiasSubspace, tol: f64) {
    for (x, y) in a.projector().iter().zip(b.projector()) {
        assert_relative_eq!(*x, y, epsilon = tol);
    }
}

#[test]
fn test_toy_direction() {
    init();
    let embeddings = vec![vec![2.0, 1.0], vec![0.0, 3.0], vec![3.0, 3.0]];
    let c = scatter(&embeddings, &[0, 0, 1]);
    let s = BiasSubspaceExtractor::extract(&c, 1, &SvdSolver, TOL).unwrap();

    assert_eq!(s.rank(), 1);
    let expected = [1.0 / 2f64.sqrt(), -1.0 / 2f64.sqrt()];
    assert_relative_eq!(dot(&s.basis[0], &expected).abs(), 1.0, epsilon = 1e-8);
    assert_relative_eq!(s.singular_values[0], 2.0, epsilon = 1e-8);
    assert!(!s.rank_deficient());
}

#[test]
fn test_basis_is_orthonormal() {
    init();
    let (embeddings, categories) = make_categorised(&[6, 8, 5, 9], 7, 21);
    let c = scatter(&embeddings, &categories);
    for k in 1..=4 {
        let s = BiasSubspaceExtractor::extract(&c, k, &SvdSolver, TOL).unwrap();
        assert_eq!(s.rank(), k);
        assert_eq!(s.dim, 7);
        assert_orthonormal(&s);
    }
}

#[test]
fn test_spectrum_is_descending() {
    init();
    let (embeddings, categories) = make_categorised(&[10, 10, 10], 5, 5);
    let c = scatter(&embeddings, &categories);
    let s = BiasSubspaceExtractor::extract(&c, 2, &SvdSolver, TOL).unwrap();
    for w in s.singular_values.windows(2) {
        assert!(w[0] >= w[1]);
    }
}

#[test]
fn test_svd_and_eigen_agree() {
    init();
    let (embeddings, categories) = make_categorised(&[12, 7, 9, 15], 6, 3);
    let c = scatter(&embeddings, &categories);

    let by_svd = BiasSubspaceExtractor::extract(&c, 2, &SvdSolver, TOL).unwrap();
    let by_evd = BiasSubspaceExtractor::extract(&c, 2, &SymmetricEigenSolver, TOL).unwrap();

    assert_orthonormal(&by_evd);
    assert_same_subspace(&by_svd, &by_evd, 1e-6);
    for (a, b) in by_svd.singular_values.iter().zip(&by_evd.singular_values) {
        assert_relative_eq!(*a, *b, epsilon = 1e-8, max_relative = 1e-8);
    }
}

#[test]
fn test_tied_spectrum_spans_the_same_subspace() {
    init();
    // isotropic within the plane: C = diag(0.5, 0.5, 0), any basis of the plane is valid
    let embeddings = vec![
        vec![1.0, 0.0, 0.0],
        vec![-1.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0],
        vec![0.0, -1.0, 0.0],
    ];
    let c = scatter(&embeddings, &[0, 0, 0, 0]);
    let s = BiasSubspaceExtractor::extract(&c, 2, &SvdSolver, TOL).unwrap();

    let p = s.projector();
    let expected = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
    for (a, b) in p.iter().zip(expected) {
        assert_relative_eq!(*a, b, epsilon = 1e-8);
    }
}

#[test]
fn test_rank_deficiency_is_a_warning() {
    init();
    // one category, two members: a single informative direction
    let embeddings = vec![vec![1.0, 2.0, 0.0], vec![3.0, 2.0, 0.0]];
    let c = scatter(&embeddings, &[4, 4]);
    let s = BiasSubspaceExtractor::extract(&c, 2, &SvdSolver, TOL).unwrap();

    assert_eq!(s.rank(), 2);
    assert_eq!(s.informative_rank, 1);
    assert!(s.rank_deficient());
    assert_orthonormal(&s);
    assert_relative_eq!(dot(&s.basis[0], &[1.0, 0.0, 0.0]).abs(), 1.0, epsilon = 1e-8);
}

#[test]
fn test_invalid_rank() {
    init();
    let embeddings = vec![vec![1.0, 2.0], vec![3.0, 2.0]];
    let c = scatter(&embeddings, &[0, 0]);

    for k in [0usize, 3] {
        let err = BiasSubspaceExtractor::extract(&c, k, &SvdSolver, TOL).unwrap_err();
        assert!(matches!(err, EvalError::InvalidParameter { .. }));
    }
}
