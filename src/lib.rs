// Bayesian evaluation of climate-model scenario ensembles

#![doc = include_str!("../README.md")]

pub mod basis;
pub mod decision;
pub mod distribution;
pub mod error;
pub mod evaluator;
pub mod grid;
pub mod linalg;
pub mod projection;
pub mod store;

pub use basis::{generate_basis, BasisMatrix, BasisSpec, Degrees, Normalization};
pub use decision::{decision_boundaries, decision_surface, DecisionSegment, DecisionSurface};
pub use distribution::ScenarioDistribution;
pub use error::{EvalError, Result};
pub use evaluator::{BayesEvaluator, EvaluationConfig};
pub use grid::{compute_grid_extent, EvaluationGrid, FittedScenarios, GridExtent};
pub use projection::{project_onto, Projection, ProjectionOperator};
pub use store::{FeatureMatrix, ScenarioStore};
