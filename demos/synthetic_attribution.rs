use ndarray::{Array, Array1, Array2, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use scenario_bayes::{BasisSpec, BayesEvaluator, EvaluationConfig};

const YEARS: usize = 126;

fn ensemble(trend: f64, members: usize, rng: &mut ChaCha8Rng) -> Array2<f64> {
    let forced = Array::from_shape_fn(YEARS, |t| trend * t as f64).insert_axis(Axis(1));
    Array::random_using((YEARS, members), Normal::new(0.0, 0.15).unwrap(), rng) + &forced
}

fn main() {
    let mut rng = ChaCha8Rng::seed_from_u64(1850);

    let mut eval = BayesEvaluator::with_config(EvaluationConfig {
        grid_resolution: 200,
        ..EvaluationConfig::default()
    })
    .expect("default-derived config is valid");
    eval.add([
        ("historical", ensemble(0.008, 20, &mut rng)),
        ("hist-nat", ensemble(0.0, 20, &mut rng)),
        ("hist-GHG", ensemble(0.012, 20, &mut rng)),
    ]);
    eval.set_observational_uncertainty(Array2::eye(YEARS) * 0.01)
        .expect("square uncertainty");

    let basis = BasisSpec::new(2)
        .with_length(YEARS)
        .generate()
        .expect("basis generation failed");
    eval.project_onto(&basis).expect("projection failed");
    eval.fit().expect("fit failed");

    for fitted in eval.distributions().expect("fitted") {
        println!(
            "{:>10}: mean {:.3}, std dev ({:.3}, {:.3})",
            fitted.id,
            fitted.distribution.mean(),
            fitted.distribution.std_dev(0),
            fitted.distribution.std_dev(1)
        );
    }

    let grid = eval.grid().expect("grid construction failed");
    println!("Grid {:?} over {:?}..{:?}", grid.shape(), grid.extent().min, grid.extent().max);

    let surface = eval.decision_surface().expect("decision surface failed");
    let masked = surface.mask().iter().filter(|&&m| m).count();
    println!("{} of {} cells have no appreciable density", masked, surface.mask().len());

    let ids = eval.scenario_ids().to_vec();
    for axis in 0..2 {
        let x = grid.axis(axis).expect("axis");
        let segments = eval.marginal_decision_boundaries(axis).expect("boundaries");
        let described: Vec<String> = segments
            .iter()
            .map(|s| format!("{} [{:.3}, {:.3}]", ids[s.scenario], x[s.start], x[s.end]))
            .collect();
        println!("LP{} boundaries: {}", axis, described.join(" | "));
    }

    let observed: Array1<f64> = ensemble(0.0085, 1, &mut rng).column(0).to_owned();
    let posterior = eval
        .posterior_for_observation(&observed)
        .expect("posterior failed");
    println!("Posterior for a synthetic observation:");
    for (id, p) in posterior {
        println!("{:>10}: {:.4}", id, p);
    }
}
