// src/grid.rs
//
// Regular evaluation grids in feature space and the fitted-scenario snapshot
// that evaluates densities and posteriors on them.

use std::time::Instant;

use log::{debug, info};
use ndarray::{indices, Array1, Array2, ArrayBase, ArrayD, ArrayView1, Axis, Data, Ix1, IxDyn};
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use serde::Serialize;

use crate::decision::{
    decision_boundaries, decision_surface, posterior_from_log_likelihoods, posterior_probabilities,
    DecisionSegment, DecisionSurface,
};
use crate::distribution::{FittedDistribution, ScenarioDistribution};
use crate::error::{EvalError, Result};
use crate::evaluator::EvaluationConfig;

/// Per-axis bounds of an evaluation grid.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GridExtent {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl GridExtent {
    pub fn dim(&self) -> usize {
        self.min.len()
    }
}

/// Union of `mean ± factor·σ` over all distributions, per axis.
///
/// # Errors
/// - `Configuration` if `factor` is not finite and positive.
/// - `Dimensionality` if any distribution has more than `max_dimensions` axes.
/// - `DimensionMismatch` if the distributions disagree on their dimension.
/// - `EmptyInput` if there are no distributions.
///
/// # Examples
///
/// ```
/// use ndarray::{array, Array2};
/// use scenario_bayes::distribution::ScenarioDistribution;
/// use scenario_bayes::grid::compute_grid_extent;
///
/// let a = ScenarioDistribution::new(array![0.0, 0.0], Array2::eye(2) * 2.0).unwrap();
/// let b = ScenarioDistribution::new(array![0.5, 0.0], array![[9.0, 0.0], [0.0, 4.0]]).unwrap();
/// let extent = compute_grid_extent([&a, &b], 2.5, 2).unwrap();
/// assert_eq!(extent.min, vec![-7.0, -5.0]);
/// assert_eq!(extent.max, vec![8.0, 5.0]);
/// ```
pub fn compute_grid_extent<'a, I>(distributions: I, factor: f64, max_dimensions: usize) -> Result<GridExtent>
where
    I: IntoIterator<Item = &'a ScenarioDistribution>,
{
    if !(factor.is_finite() && factor > 0.0) {
        return Err(EvalError::Configuration(format!(
            "grid extent factor must be finite and positive, got {factor}"
        )));
    }
    let mut extent: Option<GridExtent> = None;
    for distribution in distributions {
        let dim = distribution.dim();
        if dim > max_dimensions {
            return Err(EvalError::Dimensionality {
                found: dim,
                max: max_dimensions,
            });
        }
        let mean = distribution.mean();
        let lower: Vec<f64> = (0..dim).map(|d| mean[d] - factor * distribution.std_dev(d)).collect();
        let upper: Vec<f64> = (0..dim).map(|d| mean[d] + factor * distribution.std_dev(d)).collect();

        match extent.as_mut() {
            None => extent = Some(GridExtent { min: lower, max: upper }),
            Some(current) => {
                if current.dim() != dim {
                    return Err(EvalError::DimensionMismatch {
                        context: "dimensions of fitted distributions".to_string(),
                        expected: current.dim(),
                        found: dim,
                    });
                }
                for d in 0..dim {
                    current.min[d] = current.min[d].min(lower[d]);
                    current.max[d] = current.max[d].max(upper[d]);
                }
            }
        }
    }
    extent.ok_or(EvalError::EmptyInput("no distributions to span a grid over"))
}

/// A regular grid with `resolution` points per axis.
///
/// Arrays over the grid use matrix indexing: cell `[i, j]` lies at
/// `(axis(0)[i], axis(1)[j])`.
#[derive(Clone, Debug, Serialize)]
pub struct EvaluationGrid {
    extent: GridExtent,
    axes: Vec<Array1<f64>>,
    /// Every cell's coordinates, one row per cell in row-major order.
    #[serde(skip)]
    points: Array2<f64>,
}

impl EvaluationGrid {
    pub fn new(extent: GridExtent, resolution: usize) -> Result<Self> {
        if resolution < 2 {
            return Err(EvalError::Configuration(format!(
                "grid resolution must be at least 2, got {resolution}"
            )));
        }
        let axes: Vec<Array1<f64>> = extent
            .min
            .iter()
            .zip(&extent.max)
            .map(|(&lo, &hi)| Array1::linspace(lo, hi, resolution))
            .collect();
        let dims = axes.len();
        let shape = vec![resolution; dims];
        let n_cells = shape.iter().product::<usize>();

        let mut points = Array2::<f64>::zeros((n_cells, dims));
        for (row, index) in indices(IxDyn(&shape)).into_iter().enumerate() {
            for d in 0..dims {
                points[[row, d]] = axes[d][index[d]];
            }
        }
        Ok(Self { extent, axes, points })
    }

    pub fn extent(&self) -> &GridExtent {
        &self.extent
    }

    pub fn dim(&self) -> usize {
        self.axes.len()
    }

    pub fn axes(&self) -> &[Array1<f64>] {
        &self.axes
    }

    pub fn axis(&self, d: usize) -> Result<ArrayView1<'_, f64>> {
        self.axes
            .get(d)
            .map(|a| a.view())
            .ok_or_else(|| EvalError::DimensionMismatch {
                context: format!("grid axis {d}"),
                expected: self.dim(),
                found: d + 1,
            })
    }

    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(|a| a.len()).collect()
    }

    /// Coordinate arrays, one per axis, each shaped like the grid.
    pub fn mesh(&self) -> Result<Vec<ArrayD<f64>>> {
        let shape = self.shape();
        self.points
            .columns()
            .into_iter()
            .map(|c| Ok(c.to_owned().into_shape_with_order(IxDyn(&shape))?))
            .collect()
    }

    pub fn points(&self) -> &Array2<f64> {
        &self.points
    }

    /// Density of `distribution` at every cell, evaluated in parallel.
    pub fn evaluate(&self, distribution: &ScenarioDistribution) -> Result<ArrayD<f64>> {
        if distribution.dim() != self.dim() {
            return Err(EvalError::DimensionMismatch {
                context: "distribution dimension vs. grid dimension".to_string(),
                expected: self.dim(),
                found: distribution.dim(),
            });
        }
        let values: Vec<f64> = self
            .points
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|point| distribution.density_unchecked(&point))
            .collect();
        Ok(ArrayD::from_shape_vec(IxDyn(&self.shape()), values)?)
    }
}

/// Fitted distributions of every scenario plus the lazily computed grid.
///
/// Snapshot of one fit: it never changes after construction except for
/// filling (or explicitly replacing) the cached grid.
#[derive(Debug)]
pub struct FittedScenarios {
    scenarios: Vec<FittedDistribution>,
    config: EvaluationConfig,
    grid: OnceCell<EvaluationGrid>,
    /// Densities of every scenario over `grid`, in scenario order.
    likelihoods: OnceCell<Vec<ArrayD<f64>>>,
}

impl FittedScenarios {
    pub fn new(scenarios: Vec<FittedDistribution>, config: EvaluationConfig) -> Result<Self> {
        if scenarios.is_empty() {
            return Err(EvalError::EmptyInput("no scenarios were fitted"));
        }
        Ok(Self {
            scenarios,
            config,
            grid: OnceCell::new(),
            likelihoods: OnceCell::new(),
        })
    }

    pub fn scenarios(&self) -> &[FittedDistribution] {
        &self.scenarios
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.scenarios.iter().map(|s| s.id.as_str())
    }

    pub fn get(&self, id: &str) -> Result<&ScenarioDistribution> {
        self.scenarios
            .iter()
            .find(|s| s.id == id)
            .map(|s| &s.distribution)
            .ok_or_else(|| EvalError::UnknownScenario(id.to_string()))
    }

    pub fn dim(&self) -> usize {
        self.scenarios[0].distribution.dim()
    }

    pub fn compute_grid_extent(&self, factor: f64) -> Result<GridExtent> {
        compute_grid_extent(
            self.scenarios.iter().map(|s| &s.distribution),
            factor,
            self.config.max_grid_dimensions,
        )
    }

    fn build_grid(&self, factor: f64) -> Result<EvaluationGrid> {
        let start_time = Instant::now();
        let extent = self.compute_grid_extent(factor)?;
        let grid = EvaluationGrid::new(extent, self.config.grid_resolution)?;
        info!(
            "Built {:?} evaluation grid spanning {:?}..{:?} (factor {}) in {:?}.",
            grid.shape(),
            grid.extent().min,
            grid.extent().max,
            factor,
            start_time.elapsed()
        );
        Ok(grid)
    }

    /// The grid at the configured extent factor, computed on first use.
    pub fn grid(&self) -> Result<&EvaluationGrid> {
        self.grid
            .get_or_try_init(|| self.build_grid(self.config.extent_factor))
    }

    /// Recomputes the grid with another extent factor and caches it.
    pub fn recompute_grid(&mut self, factor: f64) -> Result<&EvaluationGrid> {
        let grid = self.build_grid(factor)?;
        self.grid = OnceCell::with_value(grid);
        self.likelihoods = OnceCell::new();
        self.grid()
    }

    /// Density of one scenario over the grid.
    pub fn likelihood(&self, id: &str) -> Result<ArrayD<f64>> {
        let distribution = self.get(id)?;
        let grid = self.grid()?;
        let start_time = Instant::now();
        let density = grid.evaluate(distribution)?;
        debug!("Evaluated likelihood of '{}' on {:?} grid in {:?}.", id, grid.shape(), start_time.elapsed());
        Ok(density)
    }

    /// Densities of every scenario over the grid, in scenario order.
    ///
    /// Computed once per grid and shared by the decision outputs.
    pub fn likelihoods(&self) -> Result<&[ArrayD<f64>]> {
        let stack = self.likelihoods.get_or_try_init(|| {
            self.scenarios
                .iter()
                .map(|s| self.likelihood(&s.id))
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(stack.as_slice())
    }

    /// Flat-prior posterior probability of `id` at every grid cell.
    pub fn decision_probability(&self, id: &str) -> Result<ArrayD<f64>> {
        let position = self.position(id)?;
        let mut posteriors = posterior_probabilities(self.likelihoods()?)?;
        Ok(posteriors.swap_remove(position))
    }

    /// 1-D marginal density of `id` along one grid axis.
    pub fn marginal_likelihood(&self, id: &str, axis: usize) -> Result<Array1<f64>> {
        let marginal = self.get(id)?.marginal(axis)?;
        let coordinates = self.grid()?.axis(axis)?;
        Ok(coordinates.mapv(|x| marginal.density_unchecked(&Array1::from_elem(1, x))))
    }

    pub fn marginal_likelihoods(&self, axis: usize) -> Result<Vec<Array1<f64>>> {
        self.scenarios
            .iter()
            .map(|s| self.marginal_likelihood(&s.id, axis))
            .collect()
    }

    /// Hard decision map over the grid; indices follow scenario order.
    pub fn decision_surface(&self) -> Result<DecisionSurface<IxDyn>> {
        decision_surface(self.likelihoods()?)
    }

    /// Decision segments along one axis from the marginal densities.
    pub fn marginal_decision_boundaries(&self, axis: usize) -> Result<Vec<DecisionSegment>> {
        decision_boundaries(&self.marginal_likelihoods(axis)?)
    }

    /// Posterior of every scenario at a single point of feature space.
    pub fn posterior_at<S>(&self, point: &ArrayBase<S, Ix1>) -> Result<Vec<(String, f64)>>
    where
        S: Data<Elem = f64>,
    {
        let log_likelihoods = self
            .scenarios
            .iter()
            .map(|s| s.distribution.log_density(point))
            .collect::<Result<Vec<f64>>>()?;
        let posterior = posterior_from_log_likelihoods(&log_likelihoods)?;
        Ok(self
            .scenarios
            .iter()
            .zip(posterior.iter())
            .map(|(s, &p)| (s.id.clone(), p))
            .collect())
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.scenarios
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| EvalError::UnknownScenario(id.to_string()))
    }
}
