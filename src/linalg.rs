// src/linalg.rs
//
// Thin wrappers over ndarray-linalg used by the projector and the
// distribution fitter.

use ndarray::{Array2, ArrayBase, Axis, Data, Ix2};
use ndarray_linalg::{Cholesky, Factorize, Inverse, ReciprocalConditionNum, UPLO};

use crate::error::{EvalError, Result};

/// Returns the inverse of a square matrix.
///
/// The matrix is LU-factorized once; the reciprocal condition number of the
/// factorization is checked before inverting, so numerically singular input
/// (e.g. the Gram matrix of a rank-deficient basis) is rejected instead of
/// producing a matrix full of huge values.
///
/// # Errors
/// - `NotSquare` if the matrix is not square.
/// - `SingularMatrix` if it is singular or its condition number exceeds `1 / f64::EPSILON`.
pub fn inverse<S>(matrix: &ArrayBase<S, Ix2>) -> Result<Array2<f64>>
where
    S: Data<Elem = f64>,
{
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(EvalError::NotSquare { rows, cols });
    }
    if rows == 0 {
        return Ok(Array2::zeros((0, 0)));
    }

    let lu = matrix
        .factorize()
        .map_err(|e| EvalError::SingularMatrix {
            context: format!("LU factorization of {rows}x{cols} matrix failed: {e}"),
        })?;
    let rcond = lu.rcond()?;
    if !rcond.is_finite() || rcond < f64::EPSILON {
        return Err(EvalError::SingularMatrix {
            context: format!("reciprocal condition number {rcond:.3e} of {rows}x{cols} matrix"),
        });
    }
    Ok(lu.inv()?)
}

/// Sample covariance of `data` across its column (sample) axis.
///
/// `data` has shape (n_variables, n_samples); the result has shape
/// (n_variables, n_variables). The unbiased estimator (denominator N-1) is
/// used everywhere in this crate.
pub fn empirical_covariance<S>(data: &ArrayBase<S, Ix2>) -> Result<Array2<f64>>
where
    S: Data<Elem = f64>,
{
    let n_samples = data.ncols();
    if n_samples < 2 {
        return Err(EvalError::InsufficientSamples {
            context: "empirical covariance".to_string(),
            found: n_samples,
        });
    }
    let mean = data
        .mean_axis(Axis(1))
        .ok_or(EvalError::EmptyInput("empirical covariance of a matrix without samples"))?;
    let centered = data - &mean.insert_axis(Axis(1));
    let mut cov = centered.dot(&centered.t());
    cov /= (n_samples - 1) as f64;
    Ok(cov)
}

/// Natural log of the determinant of a symmetric positive-definite matrix.
///
/// Computed from the Cholesky factor as `2 * sum(ln L_ii)`, which also
/// serves as the positive-definiteness check.
pub fn cholesky_log_determinant<S>(matrix: &ArrayBase<S, Ix2>) -> Result<f64>
where
    S: Data<Elem = f64>,
{
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(EvalError::NotSquare { rows, cols });
    }
    let lower = matrix
        .cholesky(UPLO::Lower)
        .map_err(|e| EvalError::SingularMatrix {
            context: format!("Cholesky factorization failed, matrix is not positive definite: {e}"),
        })?;
    Ok(2.0 * lower.diag().iter().map(|v| v.ln()).sum::<f64>())
}

/// Largest absolute asymmetry `|m_ij - m_ji|` relative to the largest entry.
pub(crate) fn relative_asymmetry<S>(matrix: &ArrayBase<S, Ix2>) -> f64
where
    S: Data<Elem = f64>,
{
    let scale = matrix.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 {
        return 0.0;
    }
    let diff = matrix - &matrix.t();
    diff.iter().fold(0.0_f64, |acc, v| acc.max(v.abs())) / scale
}
