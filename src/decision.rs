// src/decision.rs
//
// Combining per-scenario densities into decisions: which scenario wins each
// cell, where along an axis the winner changes, and the flat-prior
// posterior probability of every scenario.

use ndarray::{Array, Array1, ArrayBase, Data, Dimension, Ix1, NdIndex, Zip};
use serde::Serialize;

use crate::error::{EvalError, Result};

/// Winning scenario per cell, plus the cells where no scenario has any
/// appreciable density.
#[derive(Clone, Debug, Serialize)]
pub struct DecisionSurface<D: Dimension> {
    winners: Array<usize, D>,
    mask: Array<bool, D>,
}

impl<D: Dimension> DecisionSurface<D> {
    /// Arg-max index per cell. Values under masked cells are meaningless.
    pub fn winners(&self) -> &Array<usize, D> {
        &self.winners
    }

    /// `true` where every density is below `f64::EPSILON`.
    pub fn mask(&self) -> &Array<bool, D> {
        &self.mask
    }

    /// Winner at `index`, or `None` if the cell is masked or out of bounds.
    pub fn winner<I>(&self, index: I) -> Option<usize>
    where
        I: NdIndex<D> + Clone,
    {
        match self.mask.get(index.clone()) {
            Some(false) => self.winners.get(index).copied(),
            _ => None,
        }
    }

    /// Winners with masked cells replaced by `None`.
    pub fn masked_winners(&self) -> Array<Option<usize>, D> {
        Zip::from(&self.winners)
            .and(&self.mask)
            .map_collect(|&w, &masked| if masked { None } else { Some(w) })
    }

    pub fn any_masked(&self) -> bool {
        self.mask.iter().any(|&m| m)
    }
}

/// A run `[start, end]` of samples along one axis won by `scenario`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DecisionSegment {
    pub start: usize,
    pub end: usize,
    pub scenario: usize,
}

fn check_same_shape<S, D>(densities: &[ArrayBase<S, D>]) -> Result<()>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let first = densities
        .first()
        .ok_or(EvalError::EmptyInput("no scenario densities given"))?;
    for other in &densities[1..] {
        if other.shape() != first.shape() {
            return Err(EvalError::DimensionMismatch {
                context: format!(
                    "density arrays must share one shape, got {:?} and {:?}",
                    first.shape(),
                    other.shape()
                ),
                expected: first.len(),
                found: other.len(),
            });
        }
    }
    Ok(())
}

/// Arg-max over scenarios at every cell.
///
/// NaN densities never win; ties go to the lowest scenario index. Cells
/// where every density is below machine epsilon (or NaN) are masked.
pub fn decision_surface<S, D>(densities: &[ArrayBase<S, D>]) -> Result<DecisionSurface<D>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    check_same_shape(densities)?;
    let first = &densities[0];
    let n_cells = first.len();

    let mut best = vec![0usize; n_cells];
    let mut best_value = vec![f64::NEG_INFINITY; n_cells];
    let mut negligible = vec![true; n_cells];
    for (scenario, density) in densities.iter().enumerate() {
        for (cell, &value) in density.iter().enumerate() {
            if value >= f64::EPSILON {
                negligible[cell] = false;
            }
            if value > best_value[cell] {
                best_value[cell] = value;
                best[cell] = scenario;
            }
        }
    }

    Ok(DecisionSurface {
        winners: Array::from_shape_vec(first.raw_dim(), best)?,
        mask: Array::from_shape_vec(first.raw_dim(), negligible)?,
    })
}

/// Run-length encodes the 1-D decision surface.
///
/// Each segment starts where the winner changes; a segment ends at the
/// start of the next one, and the last segment ends at the final index.
/// A single change at index 50 of 100 samples gives `[0, 50, a]` and
/// `[50, 99, b]`.
pub fn decision_boundaries<S>(densities: &[ArrayBase<S, Ix1>]) -> Result<Vec<DecisionSegment>>
where
    S: Data<Elem = f64>,
{
    let surface = decision_surface(densities)?;
    let winners = surface.winners();
    let n = winners.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut starts = vec![0];
    starts.extend((1..n).filter(|&i| winners[i] != winners[i - 1]));

    let segments = starts
        .iter()
        .enumerate()
        .map(|(k, &start)| DecisionSegment {
            start,
            end: starts.get(k + 1).copied().unwrap_or(n - 1),
            scenario: winners[start],
        })
        .collect();
    Ok(segments)
}

/// Posterior probability of each scenario per cell under a flat prior.
///
/// With prior `1/N` the prior cancels: `p_i = L_i / Σ_j L_j`. NaN densities
/// count as zero evidence; cells without any evidence keep the prior.
pub fn posterior_probabilities<S, D>(densities: &[ArrayBase<S, D>]) -> Result<Vec<Array<f64, D>>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    check_same_shape(densities)?;
    let prior = 1.0 / densities.len() as f64;
    let evidence = |v: f64| if v.is_nan() { 0.0 } else { v };

    let mut total = Array::<f64, D>::zeros(densities[0].raw_dim());
    for density in densities {
        Zip::from(&mut total)
            .and(density)
            .for_each(|t, &v| *t += evidence(v));
    }

    Ok(densities
        .iter()
        .map(|density| {
            Zip::from(density).and(&total).map_collect(|&v, &t| {
                if t > 0.0 && t.is_finite() {
                    evidence(v) / t
                } else {
                    prior
                }
            })
        })
        .collect())
}

/// Flat-prior posterior from log-likelihoods at a single point, computed
/// with the log-sum-exp shift so far-away points do not underflow.
pub fn posterior_from_log_likelihoods(log_likelihoods: &[f64]) -> Result<Array1<f64>> {
    if log_likelihoods.is_empty() {
        return Err(EvalError::EmptyInput("no scenario log-likelihoods given"));
    }
    let max = log_likelihoods
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        let prior = 1.0 / log_likelihoods.len() as f64;
        return Ok(Array1::from_elem(log_likelihoods.len(), prior));
    }
    let weights = Array1::from_iter(log_likelihoods.iter().map(|&l| (l - max).exp()));
    let total = weights.sum();
    Ok(weights / total)
}
