// src/evaluator.rs
//
// The add -> project -> fit -> grid -> decide pipeline behind one object.

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayBase, ArrayD, Data, Ix1, IxDyn};
use serde::{Deserialize, Serialize};

use crate::basis::BasisMatrix;
use crate::decision::{DecisionSegment, DecisionSurface};
use crate::distribution::{FittedDistribution, ScenarioDistribution};
use crate::error::{EvalError, Result};
use crate::grid::{EvaluationGrid, FittedScenarios, GridExtent};
use crate::projection::{project_onto, ProjectedCoordinates, Projection};
use crate::store::{FeatureMatrix, ScenarioStore};

/// Tunable parameters of the grid stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Points per grid axis.
    pub grid_resolution: usize,
    /// Half-width of the grid in standard deviations around each scenario mean.
    pub extent_factor: f64,
    /// Largest feature-space dimension a grid may be built for.
    pub max_grid_dimensions: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            grid_resolution: 500,
            extent_factor: 2.5,
            max_grid_dimensions: 2,
        }
    }
}

impl EvaluationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.grid_resolution < 2 {
            return Err(EvalError::Configuration(format!(
                "grid_resolution must be at least 2, got {}",
                self.grid_resolution
            )));
        }
        if !(self.extent_factor.is_finite() && self.extent_factor > 0.0) {
            return Err(EvalError::Configuration(format!(
                "extent_factor must be finite and positive, got {}",
                self.extent_factor
            )));
        }
        if !(1..=2).contains(&self.max_grid_dimensions) {
            return Err(EvalError::Configuration(format!(
                "max_grid_dimensions must be 1 or 2, got {}",
                self.max_grid_dimensions
            )));
        }
        Ok(())
    }
}

/// Bayesian evaluation of scenario ensembles.
///
/// Stages run in order and each one discards whatever depended on the
/// previous state: `add` drops the projection and the fit, `project_onto`
/// and `set_observational_uncertainty` drop the fit. Derived results live in
/// immutable snapshots, so reading a stale projection or fit is impossible.
///
/// # Examples
///
/// ```
/// use ndarray::Array2;
/// use scenario_bayes::basis::BasisSpec;
/// use scenario_bayes::evaluator::{BayesEvaluator, EvaluationConfig};
///
/// let n = 30;
/// let ramp = |slope: f64, jitter: f64| {
///     Array2::from_shape_fn((n, 4), |(t, m)| slope * t as f64 + jitter * (m as f64 - 1.5))
/// };
/// let mut eval = BayesEvaluator::with_config(EvaluationConfig {
///     grid_resolution: 50,
///     ..EvaluationConfig::default()
/// })
/// .unwrap();
/// eval.add([("warming", ramp(0.02, 0.1)), ("control", ramp(0.0, 0.1))]);
///
/// let basis = BasisSpec::new(2).with_length(n).generate().unwrap();
/// eval.set_observational_uncertainty(Array2::eye(n) * 0.01).unwrap();
/// eval.project_onto(&basis).unwrap();
/// eval.fit().unwrap();
///
/// let p = eval.decision_probability("warming").unwrap();
/// assert_eq!(p.shape(), &[50, 50]);
/// ```
#[derive(Debug)]
pub struct BayesEvaluator {
    config: EvaluationConfig,
    store: ScenarioStore,
    projection: Option<Projection>,
    fitted: Option<FittedScenarios>,
}

impl Default for BayesEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl BayesEvaluator {
    pub fn new() -> Self {
        Self {
            config: EvaluationConfig::default(),
            store: ScenarioStore::new(),
            projection: None,
            fitted: None,
        }
    }

    pub fn with_config(config: EvaluationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn store(&self) -> &ScenarioStore {
        &self.store
    }

    pub fn scenario_ids(&self) -> &[String] {
        self.store.ids()
    }

    /// Merges scenarios into the store and discards the stale projection and fit.
    pub fn add<I, K, F>(&mut self, scenarios: I)
    where
        I: IntoIterator<Item = (K, F)>,
        K: Into<String>,
        F: Into<FeatureMatrix>,
    {
        self.store.add(scenarios);
        let had_projection = self.projection.take().is_some();
        let had_fit = self.fitted.take().is_some();
        if had_projection || had_fit {
            debug!("New raw data added; discarded previous projection and fit.");
        }
    }

    /// Sets the observation-space uncertainty covariance.
    ///
    /// Overwriting a previous value only logs a warning. An existing
    /// projection is updated right away; the fit must be rerun.
    pub fn set_observational_uncertainty(&mut self, covariance: Array2<f64>) -> Result<()> {
        let reprojected = match &self.projection {
            Some(projection) => Some(projection.clone().with_observational_uncertainty(&covariance)?),
            None => None,
        };
        self.store.set_observational_uncertainty(covariance)?;
        if reprojected.is_some() {
            self.projection = reprojected;
        }
        self.fitted = None;
        Ok(())
    }

    /// Projects every stored scenario onto `basis`.
    pub fn project_onto(&mut self, basis: &BasisMatrix) -> Result<&Projection> {
        self.fitted = None;
        self.projection = None;
        let projection = project_onto(&self.store, basis)?;
        Ok(&*self.projection.insert(projection))
    }

    /// Fits one Gaussian per projected scenario.
    pub fn fit(&mut self) -> Result<&FittedScenarios> {
        let projection = self.projection()?;
        let fitted = FittedScenarios::new(projection.fit_distributions()?, self.config.clone())?;
        info!(
            "Pipeline fitted {} scenarios: {:?}.",
            fitted.scenarios().len(),
            fitted.ids().collect::<Vec<_>>()
        );
        Ok(&*self.fitted.insert(fitted))
    }

    pub fn projection(&self) -> Result<&Projection> {
        self.projection
            .as_ref()
            .ok_or(EvalError::Pipeline { missing: "project_onto" })
    }

    pub fn fitted(&self) -> Result<&FittedScenarios> {
        self.fitted.as_ref().ok_or(EvalError::Pipeline { missing: "fit" })
    }

    pub fn projected_coordinates(&self, id: &str) -> Result<&ProjectedCoordinates> {
        self.projection()?.get(id)
    }

    pub fn distribution(&self, id: &str) -> Result<&ScenarioDistribution> {
        self.fitted()?.get(id)
    }

    pub fn distributions(&self) -> Result<&[FittedDistribution]> {
        Ok(self.fitted()?.scenarios())
    }

    /// Rebuilds the grid at `factor` standard deviations and caches it.
    ///
    /// A non-finite or non-positive `factor` is a `Configuration` error and
    /// keeps the current grid.
    pub fn compute_grid_extent(&mut self, factor: f64) -> Result<GridExtent> {
        let fitted = self
            .fitted
            .as_mut()
            .ok_or(EvalError::Pipeline { missing: "fit" })?;
        Ok(fitted.recompute_grid(factor)?.extent().clone())
    }

    pub fn grid(&self) -> Result<&EvaluationGrid> {
        self.fitted()?.grid()
    }

    pub fn likelihood(&self, id: &str) -> Result<ArrayD<f64>> {
        self.fitted()?.likelihood(id)
    }

    pub fn decision_probability(&self, id: &str) -> Result<ArrayD<f64>> {
        self.fitted()?.decision_probability(id)
    }

    pub fn marginal_likelihood(&self, id: &str, axis: usize) -> Result<Array1<f64>> {
        self.fitted()?.marginal_likelihood(id, axis)
    }

    pub fn decision_surface(&self) -> Result<DecisionSurface<IxDyn>> {
        self.fitted()?.decision_surface()
    }

    pub fn marginal_decision_boundaries(&self, axis: usize) -> Result<Vec<DecisionSegment>> {
        self.fitted()?.marginal_decision_boundaries(axis)
    }

    /// Observed time series in feature space.
    pub fn project_observation<S>(&self, series: &ArrayBase<S, Ix1>) -> Result<Array1<f64>>
    where
        S: Data<Elem = f64>,
    {
        self.projection()?.project_observation(series)
    }

    /// Posterior of every scenario given an observed time series.
    pub fn posterior_for_observation<S>(&self, series: &ArrayBase<S, Ix1>) -> Result<Vec<(String, f64)>>
    where
        S: Data<Elem = f64>,
    {
        let point = self.project_observation(series)?;
        self.posterior_at(&point)
    }

    /// Posterior of every scenario at a feature-space point.
    pub fn posterior_at<S>(&self, point: &ArrayBase<S, Ix1>) -> Result<Vec<(String, f64)>>
    where
        S: Data<Elem = f64>,
    {
        self.fitted()?.posterior_at(point)
    }
}
