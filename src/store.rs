// src/store.rs

use std::collections::HashMap;

use log::{debug, warn};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};

/// Raw ensemble data of one scenario.
///
/// Shape: `(n_observations, n_members)`; one column per ensemble member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    data: Array2<f64>,
    members: Vec<String>,
}

impl FeatureMatrix {
    /// Members are labelled `mem1`, `mem2`, ...
    pub fn new(data: Array2<f64>) -> Self {
        let members = (1..=data.ncols()).map(|i| format!("mem{i}")).collect();
        Self { data, members }
    }

    pub fn with_members(data: Array2<f64>, members: Vec<String>) -> Result<Self> {
        if members.len() != data.ncols() {
            return Err(EvalError::DimensionMismatch {
                context: "member labels vs. feature matrix columns".to_string(),
                expected: data.ncols(),
                found: members.len(),
            });
        }
        Ok(Self { data, members })
    }

    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn n_observations(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_members(&self) -> usize {
        self.data.ncols()
    }
}

impl From<Array2<f64>> for FeatureMatrix {
    fn from(data: Array2<f64>) -> Self {
        FeatureMatrix::new(data)
    }
}

/// Raw scenario data keyed by scenario id, kept in insertion order.
///
/// The order matters downstream: decision-surface indices refer to
/// positions in [`ScenarioStore::ids`].
#[derive(Clone, Debug, Default)]
pub struct ScenarioStore {
    order: Vec<String>,
    raw: HashMap<String, FeatureMatrix>,
    observational_uncertainty: Option<Array2<f64>>,
}

impl ScenarioStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges scenarios into the store. New ids are appended, existing ids
    /// are overwritten in place.
    pub fn add<I, K, F>(&mut self, scenarios: I)
    where
        I: IntoIterator<Item = (K, F)>,
        K: Into<String>,
        F: Into<FeatureMatrix>,
    {
        for (id, matrix) in scenarios {
            let id = id.into();
            let matrix = matrix.into();
            debug!(
                "Adding scenario '{}' with {} observations x {} members.",
                id,
                matrix.n_observations(),
                matrix.n_members()
            );
            if self.raw.insert(id.clone(), matrix).is_none() {
                self.order.push(id);
            }
        }
    }

    /// Scenario ids in insertion order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, id: &str) -> Result<&FeatureMatrix> {
        self.raw
            .get(id)
            .ok_or_else(|| EvalError::UnknownScenario(id.to_string()))
    }

    /// `(id, matrix)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureMatrix)> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.raw.get(id).map(|m| (id.as_str(), m)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Sets the observational-uncertainty covariance (observation space).
    ///
    /// Replacing an existing value is allowed but logged as a warning.
    /// Returns `true` if a previous value was replaced.
    pub fn set_observational_uncertainty(&mut self, covariance: Array2<f64>) -> Result<bool> {
        let (rows, cols) = covariance.dim();
        if rows != cols {
            return Err(EvalError::NotSquare { rows, cols });
        }
        let replaced = self.observational_uncertainty.replace(covariance).is_some();
        if replaced {
            warn!("Observational uncertainty was already set and is being overwritten.");
        }
        Ok(replaced)
    }

    pub fn observational_uncertainty(&self) -> Option<ArrayView2<'_, f64>> {
        self.observational_uncertainty.as_ref().map(|c| c.view())
    }
}
