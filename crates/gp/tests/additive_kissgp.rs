use approx::assert_abs_diff_eq;
use kissgp::correlation_models::SquaredExponentialCorr;
use kissgp::mean_models::ConstantMean;
use kissgp::metrics::mae;
use kissgp::{
    ExactGp, GaussianLikelihood, GaussianProcess, GridSize, Kernel, SolverConfig, StopReason,
    TrainingParams,
};
use linfa::prelude::{Dataset, Fit};
use ndarray::{Array, Array1, Array2, Axis};
use ndarray_npy::write_npy;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;
use std::f64::consts::TAU;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

type AdditiveGp = ExactGp<f64, ConstantMean<f64>, SquaredExponentialCorr>;

type Target = fn(&Array2<f64>) -> Array1<f64>;

/// sin(x0) + cos(x1) * 2pi
fn scaled_cosine_fn(x: &Array2<f64>) -> Array1<f64> {
    x.map_axis(Axis(1), |row| row[0].sin() + row[1].cos() * TAU)
}

/// sin(2pi x0) + cos(2pi x1)
fn periodic_fn(x: &Array2<f64>) -> Array1<f64> {
    x.map_axis(Axis(1), |row| (TAU * row[0]).sin() + (TAU * row[1]).cos())
}

/// Points of the regular n x n grid on [0, 1]^2
fn grid_points(n: usize) -> Array2<f64> {
    let u = Array::linspace(0., 1., n);
    Array2::from_shape_fn((n * n, 2), |(i, j)| if j == 0 { u[i / n] } else { u[i % n] })
}

fn training_data(n: usize, target: Target) -> (Array2<f64>, Array1<f64>) {
    let x = grid_points(n);
    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let noise = Array1::<f64>::random_using(x.nrows(), StandardNormal, &mut rng);
    let y = target(&x) + noise * 0.01;
    (x, y)
}

fn additive_model(
    n: usize,
    grid_size: usize,
    target: Target,
    config: SolverConfig<f64>,
) -> AdditiveGp {
    let (x, y) = training_data(n, target);
    ExactGp::new(
        ConstantMean::default(),
        Kernel::additive_kissgp(SquaredExponentialCorr(), 2, GridSize::Fixed(grid_size)),
        GaussianLikelihood::default(),
        x,
        y,
        config,
    )
    .expect("GP model")
}

fn check_training_trace(target: Target, name: &str) {
    let mut model = additive_model(100, 100, target, SolverConfig::default());
    assert!(model.uses_structured_solver());

    let report = model.train(&TrainingParams::default()).expect("GP training");
    let losses = &report.losses;
    assert_eq!(report.n_iter, 20);
    assert_eq!(losses.len(), 20);
    assert_eq!(report.stop_reason, StopReason::BudgetExhausted);

    let (first, last) = (losses[0], losses[19]);
    assert!((0.70..0.95).contains(&first), "{name}: first loss {first}");
    assert!(last > -0.15 && last < 0., "{name}: last loss {last}");
    assert!(first - last > 0.75, "{name}: losses {losses}");
    // monotonic up to a small slack
    assert!(losses.windows(2).into_iter().all(|w| w[1] < w[0] + 1e-3));

    let gp = model.condition().expect("GP posterior");
    assert!(gp.is_structured());
    let xtest = grid_points(10);
    let ytest = target(&xtest);
    let (ypred, yvar) = gp.predict_valvar(&xtest).expect("GP prediction");
    assert!(mae(&ypred, &ytest) < 1.0, "{name}: mae {}", mae(&ypred, &ytest));
    assert!(yvar.iter().all(|v| *v >= 0.));

    let test_dir = "target/tests";
    std::fs::create_dir_all(test_dir).ok();
    write_npy(format!("{test_dir}/{name}_losses.npy"), losses).expect("losses saved");
    write_npy(format!("{test_dir}/{name}_xtest.npy"), &xtest).expect("xtest saved");
    write_npy(format!("{test_dir}/{name}_ypred.npy"), &ypred).expect("ypred saved");
}

#[test]
fn test_additive_kissgp_training_trace() {
    check_training_trace(scaled_cosine_fn, "kissgp_scaled_cosine");
}

#[test]
fn test_additive_kissgp_periodic_training_trace() {
    check_training_trace(periodic_fn, "kissgp_periodic");
}

#[test]
fn test_training_is_deterministic() {
    let mut model1 = additive_model(30, 30, scaled_cosine_fn, SolverConfig::default());
    let mut model2 = additive_model(30, 30, scaled_cosine_fn, SolverConfig::default());
    assert!(model1.uses_structured_solver());
    let params = TrainingParams {
        n_iter: 5,
        ..TrainingParams::default()
    };
    let report1 = model1.train(&params).unwrap();
    let report2 = model2.train(&params).unwrap();
    assert_eq!(report1.losses, report2.losses);
    assert_eq!(model1.raw_params(), model2.raw_params());

    let xtest = grid_points(5);
    let gp1 = model1.condition().unwrap();
    let gp2 = model2.condition().unwrap();
    assert_eq!(gp1.predict(&xtest).unwrap(), gp2.predict(&xtest).unwrap());
}

#[test]
fn test_structured_and_dense_training_agree() {
    let structured_config = SolverConfig {
        max_cholesky_size: 100,
        cg_tolerance: 1e-10,
        ..SolverConfig::default()
    };
    let mut structured = additive_model(15, 20, periodic_fn, structured_config);
    let mut dense = additive_model(15, 20, periodic_fn, SolverConfig::default());
    assert!(structured.uses_structured_solver());
    assert!(!dense.uses_structured_solver());

    let params = TrainingParams {
        n_iter: 5,
        ..TrainingParams::default()
    };
    let report_s = structured.train(&params).unwrap();
    let report_d = dense.train(&params).unwrap();
    assert_abs_diff_eq!(report_s.losses, report_d.losses, epsilon = 1e-4);
    assert_abs_diff_eq!(structured.raw_params(), dense.raw_params(), epsilon = 1e-3);
}

#[test]
fn test_interrupted_fit() {
    let (xt, yt) = training_data(20, periodic_fn);
    let interrupt = Arc::new(AtomicBool::new(true));
    let gp = GaussianProcess::<f64, ConstantMean<f64>, SquaredExponentialCorr>::params(
        ConstantMean::default(),
        Kernel::additive_kissgp(SquaredExponentialCorr(), 2, GridSize::Fixed(20)),
    )
    .interrupt(interrupt)
    .fit(&Dataset::new(xt, yt))
    .expect("GP fit");
    let report = gp.training_report().unwrap();
    assert_eq!(report.stop_reason, StopReason::Interrupted);
    assert_eq!(report.n_iter, 0);
    // untrained model still predicts
    let ypred = gp.predict(&grid_points(3)).unwrap();
    assert!(ypred.iter().all(|v| v.is_finite()));
}

#[test]
fn test_invalid_grid_size() {
    let (xt, yt) = training_data(5, periodic_fn);
    let res = GaussianProcess::<f64, ConstantMean<f64>, SquaredExponentialCorr>::params(
        ConstantMean::default(),
        Kernel::additive_kissgp(SquaredExponentialCorr(), 2, GridSize::Fixed(2)),
    )
    .fit(&Dataset::new(xt, yt));
    assert!(res.is_err());
}
