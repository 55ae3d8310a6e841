use crate::correlation_models::*;
use crate::distributions::MultivariateNormal;
use crate::errors::{GpError, Result};
use crate::interpolation::{GridSize, InterpolationWeights};
use crate::kernels::Kernel;
use crate::likelihood::GaussianLikelihood;
use crate::linalg::{cholesky_log_det, cholesky_solve_vec, cholesky_with_jitter};
use crate::mean_models::*;
use crate::model::ExactGp;
use crate::parameters::{GpParams, GpValidParams, SolverConfig, TrainingParams};
use crate::ski::{
    exact_variances, interpolated_covariance, interpolated_variances, solve_cg, variance_cache,
    SkiFactorization, SkiOperator,
};
use crate::training::TrainingReport;
use crate::utils::check_input_dim;

use linfa::prelude::{DatasetBase, Fit, Float, PredictInplace};
use linfa_linalg::triangular::*;
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Axis, Data, Ix1, Ix2};
use ndarray_rand::rand::Rng;

use log::{debug, info, warn};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

#[cfg(feature = "persistent")]
use std::fs;
#[cfg(feature = "persistent")]
use std::io::Write;

/// Quantities computed once when conditioning on the training data
/// and used later on in prediction computations
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub(crate) enum PosteriorCache<F: Float> {
    /// Cholesky based posterior
    Dense {
        /// `Sigma^-1 (y - mu)`
        alpha: Array1<F>,
        /// Lower Cholesky factor of `Sigma`
        chol: Array2<F>,
    },
    /// Structured (SKI) posterior
    Structured {
        /// Training covariance operator
        op: SkiOperator<F>,
        /// Low-rank factorization of the training covariance
        factorization: SkiFactorization<F>,
        /// (D, G) rows `K_UU W_d^T alpha`
        mean_cache: Array2<F>,
        /// (D G, D G) predictive covariance on the grid
        variance_cache: Array2<F>,
    },
}

/// A GP regression model conditioned on its training data.
///
/// The observed output is modeled as:
///
/// `y(x) = mu(x) + f(x) + eps`
///
/// where:
/// * `mu(x)` is the learnable mean of the process (zero, constant or linear),
/// * `f(x) ~ GP(0, k(x, x'))` is a zero mean gaussian process governed by the covariance
///   kernel `k`,
/// * `eps ~ Normal(0, noise)` is the observation noise of the gaussian likelihood.
///
/// Hyperparameters (mean parameters, kernel lengthscale and outputscale, noise variance) are
/// trained with Adam on the exact marginal log-likelihood for a fixed number of iterations.
///
/// # Implementation
///
/// * Based on [ndarray](https://github.com/rust-ndarray/ndarray)
///   and [linfa](https://github.com/rust-ml/linfa) and strive to follow [linfa guidelines](https://github.com/rust-ml/linfa/blob/master/CONTRIBUTE.md)
/// * The kernel is an explicit composition tree, see [`Kernel`]. The additive KISS-GP kernel
///   `Additive(Scale(GridInterpolation(Stationary)))` interpolates the base kernel from a
///   regular grid of inducing points shared by all input components (structured kernel
///   interpolation).
/// * With such a kernel and more than [`SolverConfig::max_cholesky_size`] training points,
///   linear solves use conjugate gradients with fast structured matrix-vector products and
///   prediction uses precomputed grid caches, otherwise a dense Cholesky factorization is used.
/// * GP models can be saved and loaded using [serde](https://serde.rs/).
///   See `serializable` feature section below.
///
/// # Features
///
/// ## serializable
///
/// The `serializable` feature enables the serialization of GP models using the [`serde crate`](https://serde.rs/).
///
/// ## persistent
///
/// The `persistent` feature enables `save()`/`load()` methods of GP models to/from a json file.
///
/// # Example
///
/// ```no_run
/// use kissgp::{correlation_models::*, mean_models::*, GaussianProcess, GridSize, Kernel};
/// use linfa::prelude::*;
/// use ndarray::{Array, Array1, Array2, Axis};
///
/// // additive test function to approximate
/// fn f(x: &Array2<f64>) -> Array1<f64> {
///     x.map_axis(Axis(1), |row| {
///         (2. * std::f64::consts::PI * row[0]).sin() + (2. * std::f64::consts::PI * row[1]).cos()
///     })
/// }
///
/// // training data on a 30x30 grid
/// let n = 30;
/// let u = Array::linspace(0., 1., n);
/// let xt = Array2::from_shape_fn((n * n, 2), |(i, j)| if j == 0 { u[i / n] } else { u[i % n] });
/// let yt = f(&xt);
///
/// // GP with constant mean and additive KISS-GP kernel
/// let gp = GaussianProcess::<f64, ConstantMean<f64>, SquaredExponentialCorr>::params(
///     ConstantMean::default(),
///     Kernel::additive_kissgp(SquaredExponentialCorr(), 2, GridSize::Fixed(100)),
/// )
/// .n_iter(20)
/// .learning_rate(0.1)
/// .fit(&Dataset::new(xt, yt))
/// .expect("GP trained");
///
/// // Use trained model for making predictions
/// let xtest =
///     Array2::from_shape_fn((10, 2), |(i, j)| 0.05 + 0.1 * i as f64 * (j + 1) as f64 / 2.);
/// let ypred = gp.predict(&xtest).expect("GP prediction");
/// let yvariances = gp.predict_var(&xtest).expect("GP prediction");
///```
///
/// # Reference:
///
/// Wilson, Andrew Gordon and Nickisch, Hannes,
/// [Kernel interpolation for scalable structured Gaussian processes (KISS-GP)](https://arxiv.org/abs/1503.01057),
/// International Conference on Machine Learning, 2015.
///
/// Gardner, Jacob R., et al. [GPyTorch: Blackbox Matrix-Matrix Gaussian Process Inference with GPU Acceleration](https://arxiv.org/abs/1809.11165),
/// Advances in Neural Information Processing Systems, 2018.
///
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Mean: Serialize, Corr: Serialize",
        deserialize = "F: Deserialize<'de>, Mean: Deserialize<'de>, Corr: Deserialize<'de>"
    ))
)]
pub struct GaussianProcess<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> {
    /// Trained mean model
    mean: Mean,
    /// Trained covariance kernel, with its interpolation grid fitted to training inputs
    kernel: Kernel<F, Corr>,
    /// Trained observation model
    likelihood: GaussianLikelihood<F>,
    /// Linear solvers settings
    config: SolverConfig<F>,
    /// Marginal log-likelihood value at trained hyperparameters
    mll: F,
    /// Prediction caches
    cache: PosteriorCache<F>,
    /// Training losses when obtained with `fit()`
    report: Option<TrainingReport<F>>,
    /// Training dataset (input, output)
    pub(crate) training_data: (Array2<F>, Array1<F>),
    /// Parameters used to fit this model
    pub(crate) params: GpValidParams<F, Mean, Corr>,
}

/// Additive KISS-GP as GP special case when using constant mean and
/// additive grid interpolated squared exponential kernel
pub type KissGp<F> = GpParams<F, ConstantMean<F>, SquaredExponentialCorr>;

impl<F: Float> KissGp<F> {
    /// Additive KISS-GP parameters constructor for inputs with `num_dims` components
    pub fn params(num_dims: usize) -> GpParams<F, ConstantMean<F>, SquaredExponentialCorr> {
        GpParams::new(
            ConstantMean::default(),
            Kernel::additive_kissgp(SquaredExponentialCorr(), num_dims, GridSize::default()),
        )
    }
}

impl<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> fmt::Display
    for GaussianProcess<F, Mean, Corr>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GP(mean={}, kernel={}, likelihood={}, mll={})",
            self.mean, self.kernel, self.likelihood, self.mll,
        )
    }
}

impl<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> GaussianProcess<F, Mean, Corr> {
    /// Gp parameters contructor
    pub fn params<NewMean: MeanModel<F>, NewCorr: CorrelationModel<F>>(
        mean: NewMean,
        kernel: Kernel<F, NewCorr>,
    ) -> GpParams<F, NewMean, NewCorr> {
        GpParams::new(mean, kernel)
    }

    /// Condition the given model on its training data
    pub(crate) fn from_model(model: &ExactGp<F, Mean, Corr>) -> Result<Self> {
        let now = Instant::now();
        let (x, y) = (model.training_inputs(), model.training_targets());
        let n = F::cast(x.nrows());
        let residual = y - &model.mean().value(x);
        let half = F::cast(0.5);
        let log_2pi = F::cast(std::f64::consts::TAU).ln();

        let (cache, log_det, alpha_dot) = if model.uses_structured_solver() {
            let config = model.config();
            let form = model.kernel().grid_form()?.ok_or_else(|| {
                GpError::InvalidValueError("Kernel has no structured form".to_string())
            })?;
            let op = SkiOperator::new(&form, x, model.likelihood().noise())?;
            let factorization = SkiFactorization::new(&op, config.jitter)?;
            let cg = solve_cg(
                &op,
                &factorization,
                &residual.view(),
                config.preconditioner,
                config.cg_tolerance,
                config.max_cg_iterations,
            );
            if !cg.converged {
                warn!(
                    "Posterior: CG residual {} above tolerance after {} iterations",
                    cg.residual, cg.iterations
                );
            }
            let alpha = cg.solution;
            let log_det = factorization.log_det();
            let alpha_dot = residual.dot(&alpha);
            let mean_cache = op.interp_t(&alpha.view()).dot(&form.kuu);
            let variance_cache = variance_cache(&form.kuu, &factorization.p_matrix()?);
            (
                PosteriorCache::Structured {
                    op,
                    factorization,
                    mean_cache,
                    variance_cache,
                },
                log_det,
                alpha_dot,
            )
        } else {
            let mut sigma = model.kernel().evaluate(x, x)?;
            let noise = model.likelihood().noise();
            sigma.diag_mut().mapv_inplace(|v| v + noise);
            let chol = cholesky_with_jitter(&sigma, model.config().jitter)?;
            let alpha = cholesky_solve_vec(&chol, &residual.view())?;
            let log_det = cholesky_log_det(&chol);
            let alpha_dot = residual.dot(&alpha);
            (PosteriorCache::Dense { alpha, chol }, log_det, alpha_dot)
        };
        let mll = -half * alpha_dot - half * log_det - half * n * log_2pi;
        debug!("Posterior caches computed in {:?}", now.elapsed());

        Ok(GaussianProcess {
            mean: model.mean().clone(),
            kernel: model.kernel().clone(),
            likelihood: *model.likelihood(),
            config: *model.config(),
            mll,
            cache,
            report: None,
            training_data: (x.to_owned(), y.to_owned()),
            params: GpValidParams {
                mean: model.mean().clone(),
                kernel: model.kernel().clone(),
                likelihood: *model.likelihood(),
                init_noise: None,
                solver: *model.config(),
                training: TrainingParams::default(),
            },
        })
    }

    /// Apply `f` on successive batches of rows of `x` and concatenate the results
    fn batched(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        f: impl Fn(&ArrayView2<F>) -> Result<Array1<F>>,
    ) -> Result<Array1<F>> {
        check_input_dim(x, self.training_data.0.ncols())?;
        let batch_size = self.config.prediction_batch_size.max(1);
        let mut res = Vec::with_capacity(x.nrows());
        for batch in x.axis_chunks_iter(Axis(0), batch_size) {
            res.extend(f(&batch)?.iter());
        }
        Ok(Array1::from(res))
    }

    /// Interpolation weights of the test points for each additive component
    fn test_weights(&self, x: &ArrayView2<F>) -> Result<Vec<InterpolationWeights<F>>> {
        let grid = self.kernel.grid().ok_or_else(|| {
            GpError::InvalidValueError(
                "Structured posterior without interpolation grid".to_string(),
            )
        })?;
        (0..x.ncols())
            .map(|d| grid.weights(&x.column(d)))
            .collect()
    }

    fn predict_batch(&self, x: &ArrayView2<F>) -> Result<Array1<F>> {
        let prior_mean = self.mean.value(x);
        match &self.cache {
            PosteriorCache::Dense { alpha, .. } => {
                let kx = self.kernel.evaluate(x, &self.training_data.0)?;
                Ok(prior_mean + kx.dot(alpha))
            }
            PosteriorCache::Structured { mean_cache, .. } => {
                let weights = self.test_weights(x)?;
                Ok(weights
                    .iter()
                    .zip(mean_cache.rows())
                    .fold(prior_mean, |acc, (w, u)| acc + w.matvec(&u)))
            }
        }
    }

    /// Returns `L^-1 K(X, x)` used for dense variance and covariance computations
    fn dense_projection(&self, chol: &Array2<F>, x: &ArrayView2<F>) -> Result<Array2<F>> {
        let kx = self.kernel.evaluate(&self.training_data.0, x)?;
        Ok(chol.solve_triangular_into(kx, UPLO::Lower)?)
    }

    fn predict_var_batch(&self, x: &ArrayView2<F>) -> Result<Array1<F>> {
        let var = match &self.cache {
            PosteriorCache::Dense { chol, .. } => {
                let v = self.dense_projection(chol, x)?;
                self.kernel.diag(x)? - v.mapv(|v| v * v).sum_axis(Axis(0))
            }
            PosteriorCache::Structured {
                op,
                factorization,
                variance_cache,
                ..
            } => {
                let weights = self.test_weights(x)?;
                if self.config.fast_pred_var {
                    interpolated_variances(&weights, variance_cache)
                } else {
                    exact_variances(
                        op,
                        factorization,
                        &weights,
                        self.config.preconditioner,
                        self.config.cg_tolerance,
                        self.config.max_cg_iterations,
                    )
                }
            }
        };
        // Variance might be slightly negative depending on
        // machine precision: set to zero in that case
        Ok(var.mapv(|v| if v < F::zero() { F::zero() } else { v }))
    }

    /// Predict output values at n given `x` points of nx components specified as a (n, nx) matrix.
    /// Returns n scalar output values as a vector (n,).
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.batched(x, |batch| self.predict_batch(batch))
    }

    /// Predict variance values of the latent function at n given `x` points of nx components
    /// specified as a (n, nx) matrix. Returns n variance values as (n,) column vector.
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.batched(x, |batch| self.predict_var_batch(batch))
    }

    /// Predict both output values and variance at n given `x` points of nx components
    pub fn predict_valvar(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        Ok((self.predict(x)?, self.predict_var(x)?))
    }

    /// Compute posterior covariance matrix of the latent function given x points
    /// specified as a (n, nx) matrix
    pub fn predict_covariance(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        check_input_dim(x, self.training_data.0.ncols())?;
        let x = x.view();
        match &self.cache {
            PosteriorCache::Dense { chol, .. } => {
                let v = self.dense_projection(chol, &x)?;
                Ok(self.kernel.evaluate(&x, &x)? - v.t().dot(&v))
            }
            PosteriorCache::Structured { variance_cache, .. } => {
                let weights = self.test_weights(&x)?;
                Ok(interpolated_covariance(&weights, variance_cache))
            }
        }
    }

    /// Posterior distribution of the latent function at given x points
    pub fn predictive_distribution(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<MultivariateNormal<F>> {
        MultivariateNormal::new(self.predict(x)?, self.predict_covariance(x)?)
    }

    /// Posterior distribution of the noisy observations at given x points
    pub fn observed_distribution(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<MultivariateNormal<F>> {
        self.likelihood.marginal(&self.predictive_distribution(x)?)
    }

    /// Sample the posterior gaussian process for `n_traj` trajectories at given x points
    /// specified as a (n, nx) matrix. Returns a (n, n_traj) matrix.
    pub fn sample<R: Rng>(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_traj: usize,
        rng: &mut R,
    ) -> Result<Array2<F>> {
        self.predictive_distribution(x)?.sample(n_traj, rng)
    }

    /// Trained mean model
    pub fn mean(&self) -> &Mean {
        &self.mean
    }

    /// Trained covariance kernel
    pub fn kernel(&self) -> &Kernel<F, Corr> {
        &self.kernel
    }

    /// Trained observation model
    pub fn likelihood(&self) -> &GaussianLikelihood<F> {
        &self.likelihood
    }

    /// Trained noise variance
    pub fn noise(&self) -> F {
        self.likelihood.noise()
    }

    /// Linear solvers settings
    pub fn config(&self) -> &SolverConfig<F> {
        &self.config
    }

    /// Marginal log-likelihood of the training data at trained hyperparameters
    pub fn marginal_log_likelihood(&self) -> F {
        self.mll
    }

    /// Training report when the model was obtained with `fit()`
    pub fn training_report(&self) -> Option<&TrainingReport<F>> {
        self.report.as_ref()
    }

    /// Whether predictions use the structured (SKI) caches
    pub fn is_structured(&self) -> bool {
        matches!(self.cache, PosteriorCache::Structured { .. })
    }

    /// Retrieve input and output dimensions
    pub fn dims(&self) -> (usize, usize) {
        (self.training_data.0.ncols(), 1)
    }

    /// Training dataset (input, output)
    pub fn training_data(&self) -> &(Array2<F>, Array1<F>) {
        &self.training_data
    }

    /// Parameters used to build this model
    pub fn params_used(&self) -> &GpValidParams<F, Mean, Corr> {
        &self.params
    }

    /// Variance predictor implementing `linfa::Predict`
    pub fn variance_predictor(&self) -> GpVariancePredictor<'_, F, Mean, Corr> {
        GpVariancePredictor(self)
    }
}

#[cfg(feature = "persistent")]
impl<F, Mean, Corr> GaussianProcess<F, Mean, Corr>
where
    F: Float + Serialize + for<'de> Deserialize<'de>,
    Mean: MeanModel<F> + Serialize + for<'de> Deserialize<'de>,
    Corr: CorrelationModel<F> + Serialize + for<'de> Deserialize<'de>,
{
    /// Save GP model in given json file.
    pub fn save(&self, path: &str) -> Result<()> {
        let mut file = fs::File::create(path)?;
        let bytes = serde_json::to_vec(self)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Load GP model from given json file.
    pub fn load(path: &str) -> Result<Box<Self>> {
        let data = fs::read(path)?;
        let gp = serde_json::from_slice(&data).map_err(|err| GpError::LoadError(err.to_string()))?;
        Ok(Box::new(gp))
    }
}

impl<F, D, Mean, Corr> PredictInplace<ArrayBase<D, Ix2>, Array1<F>>
    for GaussianProcess<F, Mean, Corr>
where
    F: Float,
    D: Data<Elem = F>,
    Mean: MeanModel<F>,
    Corr: CorrelationModel<F>,
{
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );

        let values = self.predict(x).expect("GP Prediction");
        *y = values;
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
        Array1::zeros((x.nrows(),))
    }
}

/// Gausssian Process adaptator to implement `linfa::Predict` trait for variance prediction.
pub struct GpVariancePredictor<'a, F, Mean, Corr>(&'a GaussianProcess<F, Mean, Corr>)
where
    F: Float,
    Mean: MeanModel<F>,
    Corr: CorrelationModel<F>;

impl<F, D, Mean, Corr> PredictInplace<ArrayBase<D, Ix2>, Array1<F>>
    for GpVariancePredictor<'_, F, Mean, Corr>
where
    F: Float,
    D: Data<Elem = F>,
    Mean: MeanModel<F>,
    Corr: CorrelationModel<F>,
{
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );

        let values = self.0.predict_var(x).expect("GP Prediction");
        *y = values;
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
        Array1::zeros(x.nrows())
    }
}

impl<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>, D: Data<Elem = F>>
    Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GpError> for GpValidParams<F, Mean, Corr>
{
    type Object = GaussianProcess<F, Mean, Corr>;

    /// Fit GP hyperparameters by maximizing the marginal log-likelihood
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records().to_owned();
        let y = dataset.targets().to_owned();

        let mut model = ExactGp::new(
            self.mean().clone(),
            self.kernel().clone(),
            self.likelihood()?,
            x,
            y,
            *self.solver(),
        )?;
        debug!("Train {model}");
        let report = model.train(self.training())?;
        info!(
            "Training stopped after {} iterations ({:?}), final loss = {:?}",
            report.n_iter,
            report.stop_reason,
            report.final_loss()
        );

        let mut gp = model.condition()?;
        gp.report = Some(report);
        gp.params = self.clone();
        Ok(gp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::StopReason;
    use approx::assert_abs_diff_eq;
    use linfa::prelude::{Dataset, Predict};
    use ndarray::{arr1, arr2, array, Array};
    use ndarray_npy::write_npy;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use paste::paste;
    use rand_xoshiro::Xoshiro256Plus;

    fn additive_data(n: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let x = Array2::random_using((n, 2), Uniform::new(0., 1.), &mut rng);
        let y = x.map_axis(Axis(1), |row| {
            (std::f64::consts::TAU * row[0]).sin() + (std::f64::consts::TAU * row[1]).cos()
        });
        (x, y)
    }

    /// Points inside the interpolation grid fitted on training data
    fn test_points(n: usize, seed: u64) -> Array2<f64> {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        Array2::random_using((n, 2), Uniform::new(0.1, 0.9), &mut rng)
    }

    fn kissgp(
        n: usize,
        config: SolverConfig<f64>,
    ) -> ExactGp<f64, ConstantMean<f64>, SquaredExponentialCorr> {
        let (x, y) = additive_data(n, 42);
        let kernel = Kernel::additive_kissgp(SquaredExponentialCorr(), 2, GridSize::Fixed(30))
            .with_lengthscale(&array![0.3])
            .unwrap();
        ExactGp::new(
            ConstantMean::new(0.1),
            kernel,
            GaussianLikelihood::new(0.05).unwrap(),
            x,
            y,
            config,
        )
        .unwrap()
    }

    fn structured_config() -> SolverConfig<f64> {
        SolverConfig {
            max_cholesky_size: 10,
            cg_tolerance: 1e-10,
            ..SolverConfig::default()
        }
    }

    #[test]
    fn test_interpolates_training_data() {
        let xt = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
        let yt = array![0.0, 1.0, 1.5, 0.9, 1.0];
        let model = ExactGp::new(
            ZeroMean(),
            Kernel::scale(Kernel::stationary(SquaredExponentialCorr())),
            GaussianLikelihood::new(1e-3).unwrap(),
            xt.clone(),
            yt.clone(),
            SolverConfig::default(),
        )
        .unwrap();
        let gp = model.condition().unwrap();
        assert!(!gp.is_structured());
        assert_abs_diff_eq!(gp.predict(&xt).unwrap(), yt, epsilon = 5e-2);
        let vars = gp.predict_var(&xt).unwrap();
        assert!(vars.iter().all(|v| *v >= 0. && *v < 1e-2));
        // far from data the prior is recovered
        let far = array![[50.]];
        assert_abs_diff_eq!(gp.predict(&far).unwrap()[0], 0., epsilon = 1e-8);
        assert_abs_diff_eq!(
            gp.predict_var(&far).unwrap()[0],
            std::f64::consts::LN_2,
            epsilon = 1e-8
        );
    }

    #[test]
    fn test_structured_matches_dense_prediction() {
        let dense = kissgp(60, SolverConfig::default()).condition().unwrap();
        let structured = kissgp(60, structured_config()).condition().unwrap();
        assert!(!dense.is_structured());
        assert!(structured.is_structured());

        let xtest = test_points(25, 7);
        assert_abs_diff_eq!(
            dense.predict(&xtest).unwrap(),
            structured.predict(&xtest).unwrap(),
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            dense.predict_var(&xtest).unwrap(),
            structured.predict_var(&xtest).unwrap(),
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            dense.predict_covariance(&xtest).unwrap(),
            structured.predict_covariance(&xtest).unwrap(),
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            dense.marginal_log_likelihood(),
            structured.marginal_log_likelihood(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_exact_variances() {
        let fast = kissgp(60, structured_config()).condition().unwrap();
        let exact = kissgp(
            60,
            SolverConfig {
                fast_pred_var: false,
                ..structured_config()
            },
        )
        .condition()
        .unwrap();
        let xtest = test_points(15, 3);
        assert_abs_diff_eq!(
            fast.predict_var(&xtest).unwrap(),
            exact.predict_var(&xtest).unwrap(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_batched_prediction() {
        let gp = kissgp(60, structured_config()).condition().unwrap();
        let small_batches = kissgp(
            60,
            SolverConfig {
                prediction_batch_size: 7,
                ..structured_config()
            },
        )
        .condition()
        .unwrap();
        let xtest = test_points(40, 11);
        let (y, v) = gp.predict_valvar(&xtest).unwrap();
        let (yb, vb) = small_batches.predict_valvar(&xtest).unwrap();
        assert_eq!(y.len(), 40);
        assert_abs_diff_eq!(y, yb, epsilon = 1e-12);
        assert_abs_diff_eq!(v, vb, epsilon = 1e-12);
    }

    #[test]
    fn test_covariance_diag_is_variance() {
        for config in [SolverConfig::default(), structured_config()] {
            let gp = kissgp(60, config).condition().unwrap();
            let xtest = test_points(12, 5);
            let cov = gp.predict_covariance(&xtest).unwrap();
            let var = gp.predict_var(&xtest).unwrap();
            assert_abs_diff_eq!(cov.diag().mapv(|v| v.max(0.)), var, epsilon = 1e-10);
            assert_abs_diff_eq!(cov, cov.t(), epsilon = 1e-10);

            let latent = gp.predictive_distribution(&xtest).unwrap();
            let observed = gp.observed_distribution(&xtest).unwrap();
            assert_abs_diff_eq!(
                observed.variance(),
                latent.variance() + gp.noise(),
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn test_invalid_prediction_inputs() {
        let gp = kissgp(60, structured_config()).condition().unwrap();
        assert!(gp.predict(&array![[0.5]]).is_err());
        // out of the interpolation grid
        assert!(gp.predict(&array![[0.5, 3.]]).is_err());
        assert!(gp.predict_var(&array![[-2., 0.5]]).is_err());
        let empty = gp.predict(&Array2::<f64>::zeros((0, 2))).unwrap();
        assert_eq!(empty.len(), 0);
    }

    #[test]
    fn test_sampling() {
        let gp = kissgp(60, SolverConfig::default()).condition().unwrap();
        let n_plot = 35;
        let n_traj = 10;
        let x = Array::linspace(0.1, 0.9, n_plot)
            .insert_axis(Axis(1))
            .broadcast((n_plot, 2))
            .unwrap()
            .to_owned();
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let trajs = gp.sample(&x, n_traj, &mut rng).unwrap();
        assert_eq!(&[n_plot, n_traj], trajs.shape());
        assert!(!trajs.fold(false, |acc, v| acc || v.is_nan()));
    }

    #[test]
    fn test_linfa_predictors() {
        let gp = kissgp(60, SolverConfig::default()).condition().unwrap();
        let xtest = test_points(8, 9);
        let y: Array1<f64> = gp.predict(&xtest).unwrap();
        let y_linfa: Array1<f64> = Predict::predict(&gp, &xtest);
        assert_abs_diff_eq!(y, y_linfa);
        let v_linfa: Array1<f64> = gp.variance_predictor().predict(&xtest);
        assert_abs_diff_eq!(gp.predict_var(&xtest).unwrap(), v_linfa);
    }

    #[test]
    fn test_kissgp_fit() {
        let (xt, yt) = additive_data(100, 0);
        let gp = KissGp::<f64>::params(2)
            .n_iter(10)
            .fit(&Dataset::new(xt, yt))
            .expect("GP fit error");
        let report = gp.training_report().unwrap();
        assert_eq!(report.n_iter, 10);
        assert_eq!(report.stop_reason, StopReason::BudgetExhausted);
        assert!(report.final_loss().unwrap() < report.losses[0]);
        assert_eq!(gp.params_used().training().n_iter, 10);
        assert_eq!(gp.dims(), (2, 1));
        assert!(gp.to_string().starts_with("GP(mean=ConstantMean"));
    }

    macro_rules! test_gp {
        ($corr:ident) => {
            paste! {

                #[test]
                fn [<test_gp_ $corr:snake >]() {
                    let xt = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
                    let xplot = Array::linspace(0., 4., 100).insert_axis(Axis(1));
                    let yt = array![0.0, 1.0, 1.5, 0.9, 1.0];
                    let gp = GaussianProcess::<f64, ConstantMean<f64>, [<$corr Corr>] >::params(
                        ConstantMean::default(),
                        Kernel::scale(Kernel::stationary([<$corr Corr>]::default())),
                    )
                    .noise(1e-2)
                    .n_iter(50)
                    .fit(&Dataset::new(xt, yt))
                    .expect("GP fit error");
                    let yvals = gp
                        .predict(&arr2(&[[1.0], [3.5]]))
                        .expect("prediction error");
                    let expected_y = arr1(&[1.0, 0.9]);
                    assert_abs_diff_eq!(expected_y, yvals, epsilon = 0.5);

                    let gpr_vals = gp.predict(&xplot).unwrap();

                    let yvars = gp
                        .predict_var(&arr2(&[[1.0], [3.5]]))
                        .expect("prediction error");
                    let expected_vars = arr1(&[0., 0.1]);
                    assert_abs_diff_eq!(expected_vars, yvars, epsilon = 0.5);

                    let gpr_vars = gp.predict_var(&xplot).unwrap();

                    let test_dir = "target/tests";
                    std::fs::create_dir_all(test_dir).ok();

                    let xplot_file = stringify!([<gp_x_ $corr:snake >]);
                    let file_path = format!("{}/{}.npy", test_dir, xplot_file);
                    write_npy(file_path, &xplot).expect("x saved");

                    let gp_vals_file = stringify!([<gp_vals_ $corr:snake >]);
                    let file_path = format!("{}/{}.npy", test_dir, gp_vals_file);
                    write_npy(file_path, &gpr_vals).expect("gp vals saved");

                    let gp_vars_file = stringify!([<gp_vars_ $corr:snake >]);
                    let file_path = format!("{}/{}.npy", test_dir, gp_vars_file);
                    write_npy(file_path, &gpr_vars).expect("gp vars saved");
                }
            }
        };
    }

    test_gp!(SquaredExponential);
    test_gp!(AbsoluteExponential);
    test_gp!(Matern32);
    test_gp!(Matern52);

    #[cfg(feature = "persistent")]
    #[test]
    fn test_save_load() {
        let gp = kissgp(60, structured_config()).condition().unwrap();
        let test_dir = "target/tests";
        std::fs::create_dir_all(test_dir).ok();
        let file_path = format!("{test_dir}/kissgp.json");
        gp.save(&file_path).expect("GP not saved");
        let loaded = GaussianProcess::<f64, ConstantMean<f64>, SquaredExponentialCorr>::load(
            &file_path,
        )
        .expect("GP not loaded");
        let xtest = test_points(10, 1);
        assert_abs_diff_eq!(
            gp.predict(&xtest).unwrap(),
            loaded.predict(&xtest).unwrap(),
            epsilon = 1e-12
        );
        assert!(loaded.is_structured());
    }
}
