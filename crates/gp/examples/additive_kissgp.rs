use env_logger::{Builder, Env, Target};
use kissgp::correlation_models::SquaredExponentialCorr;
use kissgp::mean_models::ConstantMean;
use kissgp::metrics::mae;
use kissgp::{ExactGp, GaussianLikelihood, GridSize, Kernel, SolverConfig, TrainingParams};
use ndarray::{Array, Array1, Array2, Axis};
use ndarray_npy::write_npy;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

/// sin(x0) + cos(x1) * 2pi
fn additive_fn(x: &Array2<f64>) -> Array1<f64> {
    x.map_axis(Axis(1), |row| row[0].sin() + row[1].cos() * std::f64::consts::TAU)
}

fn grid(n: usize) -> Array2<f64> {
    let u = Array::linspace(0., 1., n);
    Array2::from_shape_fn((n * n, 2), |(i, j)| if j == 0 { u[i / n] } else { u[i % n] })
}

fn main() {
    let env = Env::new().filter_or("KISSGP_LOG", "info");
    let mut builder = Builder::from_env(env);
    let builder = builder.target(Target::Stdout);
    builder.try_init().ok();

    let xtrain = grid(100);
    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let noise = Array1::<f64>::random_using(xtrain.nrows(), StandardNormal, &mut rng);
    let ytrain = additive_fn(&xtrain) + noise * 0.01;

    let mut model = ExactGp::new(
        ConstantMean::default(),
        Kernel::additive_kissgp(SquaredExponentialCorr(), 2, GridSize::Fixed(100)),
        GaussianLikelihood::default(),
        xtrain,
        ytrain,
        SolverConfig::default(),
    )
    .expect("GP model");
    println!("{model}");

    let params = TrainingParams {
        ctrlc: true,
        ..TrainingParams::default()
    };
    let report = model.train(&params).expect("GP training");
    println!(
        "Training stopped after {} iterations ({:?}), final loss = {:?}",
        report.n_iter,
        report.stop_reason,
        report.final_loss()
    );

    let gp = model.condition().expect("GP posterior");
    let xtest = grid(10);
    let ytest = additive_fn(&xtest);
    let (ypred, yvar) = gp.predict_valvar(&xtest).expect("GP prediction");
    println!("Test MAE = {:.4}", mae(&ypred, &ytest));

    let out_dir = "target/examples";
    std::fs::create_dir_all(out_dir).ok();
    write_npy(format!("{out_dir}/kissgp_losses.npy"), &report.losses).expect("losses saved");
    write_npy(format!("{out_dir}/kissgp_xtest.npy"), &xtest).expect("xtest saved");
    write_npy(format!("{out_dir}/kissgp_ypred.npy"), &ypred).expect("ypred saved");
    write_npy(format!("{out_dir}/kissgp_yvar.npy"), &yvar).expect("yvar saved");
}
