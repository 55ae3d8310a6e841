use criterion::{criterion_group, criterion_main, Criterion};
use kissgp::correlation_models::SquaredExponentialCorr;
use kissgp::mean_models::ConstantMean;
use kissgp::{GaussianProcess, GridSize, Kernel};
use linfa::prelude::{Dataset, Fit};
use ndarray::{Array1, Array2, Axis};
use ndarray_npy::{read_npy, write_npy};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

fn additive_fn(x: &Array2<f64>) -> Array1<f64> {
    x.map_axis(Axis(1), |row| {
        row.iter()
            .enumerate()
            .map(|(i, v)| (std::f64::consts::TAU * v + i as f64).sin())
            .sum()
    })
}

fn criterion_kissgp(c: &mut Criterion) {
    let dims = [2, 4];
    let nts = [1000, 2000];

    let mut group = c.benchmark_group("gp");
    group.sample_size(20);
    for (&dim, &nt) in dims.iter().zip(nts.iter()) {
        let prefix = "kissgp";
        let xfilename = format!("{prefix}_xt_{nt}x{dim}.npy");
        let xt: Array2<f64> = match read_npy(&xfilename) {
            Ok(xt) => xt,
            Err(_) => {
                let mut rng = Xoshiro256Plus::seed_from_u64(42);
                let xt = Array2::random_using((nt, dim), Uniform::new(0., 1.), &mut rng);
                write_npy(&xfilename, &xt).expect("cannot save xt");
                xt
            }
        };
        let yt = additive_fn(&xt);

        let params = GaussianProcess::<f64, ConstantMean<f64>, SquaredExponentialCorr>::params(
            ConstantMean::default(),
            Kernel::additive_kissgp(SquaredExponentialCorr(), dim, GridSize::Fixed(100)),
        )
        .n_iter(5);

        group.bench_function(format!("kissgp fit {dim}"), |b| {
            b.iter(|| {
                std::hint::black_box(
                    params
                        .clone()
                        .fit(&Dataset::new(xt.to_owned(), yt.to_owned()))
                        .expect("GP fit error"),
                )
            });
        });

        let gp = params
            .fit(&Dataset::new(xt.to_owned(), yt.to_owned()))
            .expect("GP fit error");
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let xtest = Array2::random_using((500, dim), Uniform::new(0.1, 0.9), &mut rng);
        group.bench_function(format!("kissgp predict {dim}"), |b| {
            b.iter(|| {
                std::hint::black_box(gp.predict_valvar(&xtest).expect("GP prediction error"))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_kissgp);
criterion_main!(benches);
