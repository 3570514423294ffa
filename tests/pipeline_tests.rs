// In tests/pipeline_tests.rs

use std::sync::Mutex;

use approx::assert_abs_diff_eq;
use log::{Level, LevelFilter, Log, Metadata, Record};
use ndarray::{array, Array, Array1, Array2, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use scenario_bayes::distribution::FittedDistribution;
use scenario_bayes::{
    BasisSpec, BayesEvaluator, EvalError, EvaluationConfig, FittedScenarios, ScenarioDistribution, ScenarioStore,
};

/// Keeps every record so tests can look for specific messages.
struct CapturingLogger {
    records: Mutex<Vec<(Level, String)>>,
}

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Ok(mut records) = self.records.lock() {
            records.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger {
    records: Mutex::new(Vec::new()),
};

#[ctor::ctor]
fn install_capturing_logger() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Debug);
}

fn logged(level: Level, needle: &str) -> bool {
    LOGGER
        .records
        .lock()
        .map(|records| records.iter().any(|(l, m)| *l == level && m.contains(needle)))
        .unwrap_or(false)
}

const YEARS: usize = 100;

/// `members` noisy runs around `offset + trend * year`.
fn ensemble(trend: f64, offset: f64, members: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Array2::random_using((YEARS, members), Normal::new(0.0, 0.15).unwrap(), &mut rng);
    let forced = Array1::from_shape_fn(YEARS, |t| offset + trend * t as f64);
    noise + &forced.insert_axis(Axis(1))
}

fn three_experiments() -> BayesEvaluator {
    let mut eval = BayesEvaluator::with_config(EvaluationConfig {
        grid_resolution: 60,
        ..EvaluationConfig::default()
    })
    .unwrap();
    eval.add([
        ("historical", ensemble(0.01, 0.0, 10, 11)),
        ("hist-nat", ensemble(0.0, -0.1, 10, 12)),
        ("hist-GHG", ensemble(0.015, 0.0, 10, 13)),
    ]);
    eval
}

#[test]
fn overwriting_uncertainty_warns_once_per_overwrite() {
    let mut store = ScenarioStore::new();
    assert!(!store.set_observational_uncertainty(Array2::eye(4)).unwrap());
    assert!(store.set_observational_uncertainty(Array2::eye(4) * 2.0).unwrap());
    assert!(logged(Level::Warn, "being overwritten"));
    assert_eq!(store.observational_uncertainty().unwrap()[[0, 0]], 2.0);
}

#[test]
fn full_pipeline_on_noisy_ensembles() {
    let mut eval = three_experiments();
    let basis = BasisSpec::new(2).with_length(YEARS).generate().unwrap();
    eval.project_onto(&basis).unwrap();
    eval.fit().unwrap();

    let ids: Vec<&str> = eval.fitted().unwrap().ids().collect();
    assert_eq!(ids, ["historical", "hist-nat", "hist-GHG"]);

    let grid = eval.grid().unwrap();
    assert_eq!(grid.shape(), vec![60, 60]);

    // each fitted mean is classified as its own scenario
    let surface = eval.decision_surface().unwrap();
    for (k, fitted) in eval.distributions().unwrap().iter().enumerate() {
        let mean = fitted.distribution.mean();
        let nearest: Vec<usize> = (0..2)
            .map(|d| {
                let axis = grid.axis(d).unwrap();
                let mut best = 0;
                for (i, &x) in axis.iter().enumerate() {
                    if (x - mean[d]).abs() < (axis[best] - mean[d]).abs() {
                        best = i;
                    }
                }
                best
            })
            .collect();
        assert_eq!(surface.winner(nearest.as_slice()), Some(k), "scenario {}", fitted.id);
    }

    let total = eval.decision_probability("historical").unwrap()
        + eval.decision_probability("hist-nat").unwrap()
        + eval.decision_probability("hist-GHG").unwrap();
    for &t in total.iter() {
        assert_abs_diff_eq!(t, 1.0, epsilon = 1e-9);
    }

    assert!(logged(Level::Info, "Projected 3 scenarios"));
}

#[test]
fn likelihood_integrates_to_one_over_wide_grid() {
    let mut eval = three_experiments();
    let basis = BasisSpec::new(1).with_length(YEARS).generate().unwrap();
    eval.project_onto(&basis).unwrap();
    eval.fit().unwrap();
    eval.compute_grid_extent(8.0).unwrap();

    let x = eval.grid().unwrap().axis(0).unwrap().to_owned();
    let dx = x[1] - x[0];
    for id in ["historical", "hist-nat", "hist-GHG"] {
        let density = eval.likelihood(id).unwrap();
        let mass: f64 = density.sum() * dx;
        assert_abs_diff_eq!(mass, 1.0, epsilon = 0.05);
        assert_abs_diff_eq!(
            eval.marginal_likelihood(id, 0).unwrap(),
            density.into_dimensionality::<ndarray::Ix1>().unwrap(),
            epsilon = 1e-12
        );
    }
}

#[test]
fn physical_units_basis_projects_like_unit_basis_up_to_scale() {
    let years: Vec<String> = (1900..1900 + YEARS).map(|y| y.to_string()).collect();
    let unit = BasisSpec::new(2).with_index(years.clone()).generate().unwrap();
    let physical = BasisSpec::new(2)
        .with_index(years)
        .with_physical_units(true)
        .generate()
        .unwrap();
    assert_eq!(unit.row_labels().unwrap()[0], "1900");

    let mut eval = three_experiments();
    let lp0_unit = eval.project_onto(&unit).unwrap().get("historical").unwrap().coordinates.row(0).to_owned();
    let lp0_physical = eval
        .project_onto(&physical)
        .unwrap()
        .get("historical")
        .unwrap()
        .coordinates
        .row(0)
        .to_owned();
    // LP0 is constant, so the two coordinates differ by a fixed ratio
    let ratio = lp0_unit[0] / lp0_physical[0];
    assert_abs_diff_eq!(lp0_unit, lp0_physical * ratio, epsilon = 1e-9);
}

#[test]
fn singular_covariance_is_reported_as_numeric_failure() {
    let mut eval = BayesEvaluator::new();
    // every member identical: zero spread in feature space
    let flat = Array2::from_shape_fn((YEARS, 4), |(t, _)| 0.01 * t as f64);
    eval.add([("degenerate", flat)]);
    let basis = BasisSpec::new(2).with_length(YEARS).generate().unwrap();
    eval.project_onto(&basis).unwrap();
    let err = eval.fit().unwrap_err();
    assert!(err.is_numeric() || matches!(err, EvalError::SingularMatrix { .. }), "{err:?}");
}

#[test]
fn fitted_outputs_serialize() {
    let mut eval = three_experiments();
    let basis = BasisSpec::new(2).with_length(YEARS).generate().unwrap();
    eval.project_onto(&basis).unwrap();
    eval.fit().unwrap();

    let json = serde_json::to_value(eval.distributions().unwrap()).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 3);
    assert_eq!(json[0]["id"], "historical");

    let extent = serde_json::to_value(eval.grid().unwrap().extent()).unwrap();
    assert_eq!(extent["min"].as_array().unwrap().len(), 2);

    let config: EvaluationConfig =
        serde_json::from_str(r#"{"grid_resolution": 10, "extent_factor": 3.0, "max_grid_dimensions": 1}"#).unwrap();
    assert!(config.validate().is_ok());
}

#[test]
fn snapshot_can_be_built_from_external_distributions() {
    let scenarios = vec![
        FittedDistribution {
            id: "a".to_string(),
            distribution: ScenarioDistribution::new(array![0.0, 0.0], Array2::eye(2) * 2.0).unwrap(),
        },
        FittedDistribution {
            id: "b".to_string(),
            distribution: ScenarioDistribution::new(array![5.0, 0.0], Array2::eye(2) * 2.0).unwrap(),
        },
    ];
    let fitted = FittedScenarios::new(
        scenarios,
        EvaluationConfig {
            grid_resolution: 51,
            ..EvaluationConfig::default()
        },
    )
    .unwrap();
    let surface = fitted.decision_surface().unwrap();
    let x = fitted.grid().unwrap().axis(0).unwrap().to_owned();
    let y = fitted.grid().unwrap().axis(1).unwrap().to_owned();
    let near = |axis: &Array1<f64>, v: f64| {
        axis.iter()
            .enumerate()
            .min_by(|a, b| (a.1 - v).abs().total_cmp(&(b.1 - v).abs()))
            .map(|(i, _)| i)
            .unwrap()
    };
    let (i0, i5, j0) = (near(&x, 0.0), near(&x, 5.0), near(&y, 0.0));
    assert_eq!(surface.winner([i0, j0]), Some(0));
    assert_eq!(surface.winner([i5, j0]), Some(1));
    assert!(!surface.mask()[[i0, j0]]);
    assert!(!surface.mask()[[i5, j0]]);

    let mut rng = ChaCha8Rng::seed_from_u64(25);
    let random_points = Array::random_using((20, 2), Normal::new(2.5, 1.0).unwrap(), &mut rng);
    for point in random_points.rows() {
        let posterior = fitted.posterior_at(&point).unwrap();
        let expected_a = point[0] < 2.5;
        assert_eq!(posterior[0].1 > 0.5, expected_a, "point {point}");
    }
}
