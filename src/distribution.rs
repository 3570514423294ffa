// src/distribution.rs
//
// Multivariate Gaussians fitted to projected ensemble members.

use std::f64::consts::PI;
use std::time::Instant;

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix1};
use serde::Serialize;

use crate::error::{EvalError, Result};
use crate::linalg::{cholesky_log_determinant, empirical_covariance, inverse, relative_asymmetry};
use crate::projection::Projection;

/// Relative tolerance when checking that a covariance is symmetric.
const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// A multivariate normal distribution with cached precision matrix.
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioDistribution {
    mean: Array1<f64>,
    covariance: Array2<f64>,
    #[serde(skip)]
    precision: Array2<f64>,
    /// `-(k ln(2π) + ln|Σ|) / 2`
    #[serde(skip)]
    log_normalizer: f64,
}

impl ScenarioDistribution {
    /// Validates and caches everything a density evaluation needs.
    ///
    /// # Errors
    /// - `DimensionMismatch` if mean and covariance disagree.
    /// - `SingularMatrix` if the covariance is not symmetric positive definite.
    pub fn new(mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self> {
        let k = mean.len();
        if k == 0 {
            return Err(EvalError::EmptyInput("distribution with zero dimensions"));
        }
        let (rows, cols) = covariance.dim();
        if rows != cols {
            return Err(EvalError::NotSquare { rows, cols });
        }
        if rows != k {
            return Err(EvalError::DimensionMismatch {
                context: "covariance dimension vs. mean length".to_string(),
                expected: k,
                found: rows,
            });
        }
        let asymmetry = relative_asymmetry(&covariance);
        if asymmetry > SYMMETRY_TOLERANCE {
            return Err(EvalError::SingularMatrix {
                context: format!("covariance is not symmetric (relative asymmetry {asymmetry:.3e})"),
            });
        }
        let log_det = cholesky_log_determinant(&covariance)?;
        let precision = inverse(&covariance)?;
        let log_normalizer = -0.5 * (k as f64 * (2.0 * PI).ln() + log_det);
        Ok(Self {
            mean,
            covariance,
            precision,
            log_normalizer,
        })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    pub fn covariance(&self) -> ArrayView2<'_, f64> {
        self.covariance.view()
    }

    /// Standard deviation along one axis, `sqrt(Σ[d, d])`.
    pub fn std_dev(&self, axis: usize) -> f64 {
        self.covariance[[axis, axis]].sqrt()
    }

    /// `(x - μ)ᵗ Σ⁻¹ (x - μ)`
    pub fn mahalanobis_squared<S>(&self, point: &ArrayBase<S, Ix1>) -> f64
    where
        S: Data<Elem = f64>,
    {
        let delta = point - &self.mean;
        delta.dot(&self.precision.dot(&delta))
    }

    pub fn log_density<S>(&self, point: &ArrayBase<S, Ix1>) -> Result<f64>
    where
        S: Data<Elem = f64>,
    {
        if point.len() != self.dim() {
            return Err(EvalError::DimensionMismatch {
                context: "evaluation point vs. distribution dimension".to_string(),
                expected: self.dim(),
                found: point.len(),
            });
        }
        Ok(self.log_normalizer - 0.5 * self.mahalanobis_squared(point))
    }

    pub fn density<S>(&self, point: &ArrayBase<S, Ix1>) -> Result<f64>
    where
        S: Data<Elem = f64>,
    {
        Ok(self.log_density(point)?.exp())
    }

    /// Caller guarantees `point.len() == self.dim()`.
    pub(crate) fn density_unchecked<S>(&self, point: &ArrayBase<S, Ix1>) -> f64
    where
        S: Data<Elem = f64>,
    {
        (self.log_normalizer - 0.5 * self.mahalanobis_squared(point)).exp()
    }

    /// The 1-D marginal along `axis`: `N(μ[axis], Σ[axis, axis])`.
    pub fn marginal(&self, axis: usize) -> Result<ScenarioDistribution> {
        if axis >= self.dim() {
            return Err(EvalError::DimensionMismatch {
                context: format!("marginal axis {axis} of a {}-dimensional distribution", self.dim()),
                expected: self.dim(),
                found: axis + 1,
            });
        }
        ScenarioDistribution::new(
            Array1::from_elem(1, self.mean[axis]),
            Array2::from_elem((1, 1), self.covariance[[axis, axis]]),
        )
    }
}

/// One fitted distribution per scenario, in store order.
#[derive(Clone, Debug, Serialize)]
pub struct FittedDistribution {
    pub id: String,
    pub distribution: ScenarioDistribution,
}

impl Projection {
    /// Fits a Gaussian to every projected scenario.
    ///
    /// Mean is the member average, covariance the unbiased empirical
    /// covariance plus the projected observational uncertainty (if any).
    pub fn fit_distributions(&self) -> Result<Vec<FittedDistribution>> {
        let start_time = Instant::now();
        let uncertainty = self.projected_uncertainty();
        let fitted = self
            .scenarios()
            .iter()
            .map(|scenario| {
                let distribution = fit_gaussian(scenario.coordinates.view(), uncertainty)
                    .map_err(|e| annotate(e, &scenario.id))?;
                debug!(
                    "Fitted scenario '{}': mean {:?}, covariance diagonal {:?}.",
                    scenario.id,
                    distribution.mean().to_vec(),
                    distribution.covariance().diag().to_vec()
                );
                Ok(FittedDistribution {
                    id: scenario.id.clone(),
                    distribution,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        info!(
            "Fitted {} scenario distributions of dimension {} in {:?}.",
            fitted.len(),
            self.n_degrees(),
            start_time.elapsed()
        );
        Ok(fitted)
    }
}

/// Fits `N(mean, cov + extra)` to the columns of `coordinates` (degrees x members).
pub fn fit_gaussian(
    coordinates: ArrayView2<f64>,
    extra_covariance: Option<ArrayView2<f64>>,
) -> Result<ScenarioDistribution> {
    let members = coordinates.ncols();
    if members < 2 {
        return Err(EvalError::InsufficientSamples {
            context: "fitting a scenario distribution".to_string(),
            found: members,
        });
    }
    let mean = coordinates
        .mean_axis(Axis(1))
        .ok_or(EvalError::EmptyInput("scenario without members"))?;
    let mut covariance = empirical_covariance(&coordinates)?;
    if let Some(extra) = extra_covariance {
        if extra.dim() != covariance.dim() {
            return Err(EvalError::DimensionMismatch {
                context: "projected observational uncertainty vs. basis degrees".to_string(),
                expected: covariance.nrows(),
                found: extra.nrows(),
            });
        }
        covariance += &extra;
    }
    ScenarioDistribution::new(mean, covariance)
}

fn annotate(error: EvalError, id: &str) -> EvalError {
    match error {
        EvalError::SingularMatrix { context } => EvalError::SingularMatrix {
            context: format!("covariance of scenario '{id}': {context}"),
        },
        EvalError::InsufficientSamples { found, .. } => EvalError::InsufficientSamples {
            context: format!("scenario '{id}'"),
            found,
        },
        other => other,
    }
}
