// src/projection.rs
//
// Least-squares projection of raw ensemble data onto a basis.

use std::time::Instant;

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Data, Ix1, Ix2};
use serde::Serialize;

use crate::basis::BasisMatrix;
use crate::error::{EvalError, Result};
use crate::linalg::inverse;
use crate::store::ScenarioStore;

/// The operator `P = (GᵗG)⁻¹Gᵗ` of a basis `G`.
///
/// Shape: `(n_degrees, n_observations)`.
#[derive(Clone, Debug, Serialize)]
pub struct ProjectionOperator {
    matrix: Array2<f64>,
    degree_labels: Vec<String>,
}

impl ProjectionOperator {
    /// Fails with `SingularMatrix` if `G` does not have full column rank.
    pub fn from_basis(basis: &BasisMatrix) -> Result<Self> {
        let g = basis.values();
        let gram = g.t().dot(&g);
        let gram_inv = inverse(&gram).map_err(|e| match e {
            EvalError::SingularMatrix { context } => EvalError::SingularMatrix {
                context: format!(
                    "Gram matrix of a basis with {} degrees on {} observations is rank deficient; {}",
                    basis.n_degrees(),
                    basis.n_observations(),
                    context
                ),
            },
            other => other,
        })?;
        Ok(Self {
            matrix: gram_inv.dot(&g.t()),
            degree_labels: basis.column_labels(),
        })
    }

    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    pub fn n_degrees(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_observations(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn degree_labels(&self) -> &[String] {
        &self.degree_labels
    }

    /// `P·X` for a raw `(n_observations, n_members)` matrix.
    pub fn apply<S>(&self, raw: &ArrayBase<S, Ix2>) -> Result<Array2<f64>>
    where
        S: Data<Elem = f64>,
    {
        self.check_observations("raw feature matrix rows", raw.nrows())?;
        Ok(self.matrix.dot(raw))
    }

    /// `P·o` for a single time series.
    pub fn apply_to_series<S>(&self, series: &ArrayBase<S, Ix1>) -> Result<Array1<f64>>
    where
        S: Data<Elem = f64>,
    {
        self.check_observations("observed series length", series.len())?;
        Ok(self.matrix.dot(series))
    }

    /// `P·Σ·Pᵗ` for a covariance given in observation space.
    pub fn apply_to_covariance<S>(&self, covariance: &ArrayBase<S, Ix2>) -> Result<Array2<f64>>
    where
        S: Data<Elem = f64>,
    {
        let (rows, cols) = covariance.dim();
        if rows != cols {
            return Err(EvalError::NotSquare { rows, cols });
        }
        self.check_observations("observational uncertainty dimension", rows)?;
        Ok(self.matrix.dot(covariance).dot(&self.matrix.t()))
    }

    fn check_observations(&self, context: &str, found: usize) -> Result<()> {
        if found != self.n_observations() {
            return Err(EvalError::DimensionMismatch {
                context: context.to_string(),
                expected: self.n_observations(),
                found,
            });
        }
        Ok(())
    }
}

/// Projected members of one scenario.
///
/// Shape: `(n_degrees, n_members)`; column `m` is member `m` as a point in
/// feature space.
#[derive(Clone, Debug, Serialize)]
pub struct ProjectedCoordinates {
    pub id: String,
    pub coordinates: Array2<f64>,
    pub members: Vec<String>,
}

/// Every scenario of a store projected onto one basis.
///
/// Immutable: adding data or changing the basis yields a new snapshot.
#[derive(Clone, Debug)]
pub struct Projection {
    operator: ProjectionOperator,
    scenarios: Vec<ProjectedCoordinates>,
    projected_uncertainty: Option<Array2<f64>>,
}

/// Projects every scenario of `store` onto `basis`.
///
/// The operator is computed once. If the store carries an observational
/// uncertainty it is projected as `P·Σ·Pᵗ` alongside.
pub fn project_onto(store: &ScenarioStore, basis: &BasisMatrix) -> Result<Projection> {
    let start_time = Instant::now();
    let operator = ProjectionOperator::from_basis(basis)?;

    let mut scenarios = Vec::with_capacity(store.len());
    for (id, matrix) in store.iter() {
        let coordinates = operator.apply(&matrix.data()).map_err(|e| match e {
            EvalError::DimensionMismatch { expected, found, .. } => EvalError::DimensionMismatch {
                context: format!("observations of scenario '{id}' vs. basis rows"),
                expected,
                found,
            },
            other => other,
        })?;
        debug!(
            "Projected scenario '{}' onto {:?}: {} members.",
            id,
            operator.degree_labels(),
            coordinates.ncols()
        );
        scenarios.push(ProjectedCoordinates {
            id: id.to_string(),
            coordinates,
            members: matrix.members().to_vec(),
        });
    }

    let projected_uncertainty = store
        .observational_uncertainty()
        .map(|sigma| operator.apply_to_covariance(&sigma))
        .transpose()?;

    info!(
        "Projected {} scenarios onto {} basis degrees in {:?} (observational uncertainty: {}).",
        scenarios.len(),
        operator.n_degrees(),
        start_time.elapsed(),
        projected_uncertainty.is_some()
    );
    Ok(Projection {
        operator,
        scenarios,
        projected_uncertainty,
    })
}

impl Projection {
    pub fn operator(&self) -> &ProjectionOperator {
        &self.operator
    }

    pub fn n_degrees(&self) -> usize {
        self.operator.n_degrees()
    }

    /// Projected scenarios in store order.
    pub fn scenarios(&self) -> &[ProjectedCoordinates] {
        &self.scenarios
    }

    pub fn get(&self, id: &str) -> Result<&ProjectedCoordinates> {
        self.scenarios
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| EvalError::UnknownScenario(id.to_string()))
    }

    /// `P·Σ_obs·Pᵗ`, if an observational uncertainty was set.
    pub fn projected_uncertainty(&self) -> Option<ArrayView2<'_, f64>> {
        self.projected_uncertainty.as_ref().map(|c| c.view())
    }

    /// Re-derives the projected uncertainty from a new observation-space
    /// covariance, keeping the operator and the projected members.
    pub fn with_observational_uncertainty<S>(mut self, covariance: &ArrayBase<S, Ix2>) -> Result<Self>
    where
        S: Data<Elem = f64>,
    {
        self.projected_uncertainty = Some(self.operator.apply_to_covariance(covariance)?);
        Ok(self)
    }

    /// Places an observed time series in feature space (`P·o`).
    pub fn project_observation<S>(&self, series: &ArrayBase<S, Ix1>) -> Result<Array1<f64>>
    where
        S: Data<Elem = f64>,
    {
        self.operator.apply_to_series(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::BasisSpec;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    fn linear_series(n: usize, offset: f64, slope: f64) -> Array1<f64> {
        Array1::linspace(-1.0, 1.0, n).mapv(|x| offset + slope * x)
    }

    #[test]
    fn operator_is_left_inverse_of_basis() {
        let basis = BasisSpec::new(3).with_length(50).generate().unwrap();
        let op = ProjectionOperator::from_basis(&basis).unwrap();
        assert_eq!(op.matrix().dim(), (3, 50));
        let identity = op.matrix().dot(&basis.values());
        assert_abs_diff_eq!(identity, Array2::eye(3), epsilon = 1e-10);
    }

    #[test]
    fn rank_deficient_basis_fails_numerically() {
        // five degrees on three samples cannot have full column rank
        let basis = BasisSpec::new(5).with_length(3).generate().unwrap();
        let err = ProjectionOperator::from_basis(&basis).unwrap_err();
        assert!(err.is_numeric(), "unexpected error {err:?}");
    }

    #[test]
    fn projection_recovers_polynomial_coefficients() {
        let n = 40;
        let basis = BasisSpec::new(2).with_length(n).generate().unwrap();
        let mut data = Array2::<f64>::zeros((n, 2));
        data.column_mut(0).assign(&linear_series(n, 1.0, 0.5));
        data.column_mut(1).assign(&linear_series(n, -2.0, 0.0));

        let mut store = ScenarioStore::new();
        store.add([("a", data)]);
        let projection = project_onto(&store, &basis).unwrap();
        let coords = &projection.get("a").unwrap().coordinates;
        assert_eq!(coords.dim(), (2, 2));

        // offset c maps to c / sqrt(1/2), slope s to s / sqrt(3/2)
        assert_abs_diff_eq!(coords[[0, 0]], 1.0 / 0.5_f64.sqrt(), epsilon = 1e-10);
        assert_abs_diff_eq!(coords[[1, 0]], 0.5 / 1.5_f64.sqrt(), epsilon = 1e-10);
        assert_abs_diff_eq!(coords[[0, 1]], -2.0 / 0.5_f64.sqrt(), epsilon = 1e-10);
        assert_abs_diff_eq!(coords[[1, 1]], 0.0, epsilon = 1e-10);

        let obs = projection
            .project_observation(&linear_series(n, 1.0, 0.5))
            .unwrap();
        assert_abs_diff_eq!(obs, coords.column(0).to_owned(), epsilon = 1e-12);
    }

    #[test]
    fn mismatched_observation_count_is_rejected() {
        let basis = BasisSpec::new(2).with_length(10).generate().unwrap();
        let mut store = ScenarioStore::new();
        store.add([("short", Array2::<f64>::zeros((9, 3)))]);
        match project_onto(&store, &basis) {
            Err(EvalError::DimensionMismatch { expected: 10, found: 9, context }) => {
                assert!(context.contains("short"));
            }
            other => panic!("expected DimensionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn uncertainty_is_projected_with_the_operator() {
        let n = 20;
        let basis = BasisSpec::new(2).with_length(n).generate().unwrap();
        let mut store = ScenarioStore::new();
        store.add([("a", Array2::<f64>::zeros((n, 3)))]);
        store.set_observational_uncertainty(Array2::eye(n)).unwrap();
        let projection = project_onto(&store, &basis).unwrap();
        let p = projection.operator().matrix();
        let expected = p.dot(&p.t());
        assert_abs_diff_eq!(
            projection.projected_uncertainty().unwrap(),
            expected.view(),
            epsilon = 1e-12
        );

        let doubled = projection
            .with_observational_uncertainty(&(Array2::<f64>::eye(n) * 2.0))
            .unwrap();
        assert_abs_diff_eq!(
            doubled.projected_uncertainty().unwrap()[[0, 0]],
            2.0 * expected[[0, 0]],
            epsilon = 1e-12
        );
    }
}
