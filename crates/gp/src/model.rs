//! Exact GP model under training: prior mean, kernel, likelihood and training data.

use crate::algorithm::GaussianProcess;
use crate::correlation_models::CorrelationModel;
use crate::distributions::MultivariateNormal;
use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::likelihood::GaussianLikelihood;
use crate::mean_models::MeanModel;
use crate::mll::{self, ExactMarginalLogLikelihood, MllEvaluation};
use crate::parameters::{SolverConfig, TrainingParams};
use crate::training::{self, TrainingReport};
use crate::utils::{check_input_dim, check_training_data};

use linfa::Float;
use ndarray::{s, Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use std::fmt;

/// Exact GP regression model owning its hyperparameters and training data.
///
/// Raw hyperparameters are laid out as `[mean params, kernel params, raw noise]`, they are
/// mutated by [`ExactGp::train`] and frozen by [`ExactGp::condition`] which returns the
/// posterior used for predictions.
#[derive(Clone, Debug)]
pub struct ExactGp<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> {
    mean: Mean,
    kernel: Kernel<F, Corr>,
    likelihood: GaussianLikelihood<F>,
    x: Array2<F>,
    y: Array1<F>,
    config: SolverConfig<F>,
}

impl<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> ExactGp<F, Mean, Corr> {
    /// Build the model given its components and training data `x` (n, nx) and `y` (n,).
    ///
    /// Mean parameters are sized to the input dimension and interpolation grids
    /// of the kernel are fitted to `x`.
    pub fn new(
        mut mean: Mean,
        mut kernel: Kernel<F, Corr>,
        likelihood: GaussianLikelihood<F>,
        x: Array2<F>,
        y: Array1<F>,
        config: SolverConfig<F>,
    ) -> Result<Self> {
        check_training_data(&x, &y)?;
        config.check()?;
        kernel.check_grid_size()?;
        kernel.check_input_dim(x.ncols())?;
        mean.adapt_dim(x.ncols());
        kernel.adapt_grid(&x)?;
        Ok(ExactGp {
            mean,
            kernel,
            likelihood,
            x,
            y,
            config,
        })
    }

    /// Mean model
    pub fn mean(&self) -> &Mean {
        &self.mean
    }

    /// Covariance kernel
    pub fn kernel(&self) -> &Kernel<F, Corr> {
        &self.kernel
    }

    /// Observation model
    pub fn likelihood(&self) -> &GaussianLikelihood<F> {
        &self.likelihood
    }

    /// Training inputs (n, nx)
    pub fn training_inputs(&self) -> &Array2<F> {
        &self.x
    }

    /// Training outputs (n,)
    pub fn training_targets(&self) -> &Array1<F> {
        &self.y
    }

    /// Linear solvers settings
    pub fn config(&self) -> &SolverConfig<F> {
        &self.config
    }

    /// Whether objective and posterior are computed with the structured (SKI) solver
    pub fn uses_structured_solver(&self) -> bool {
        self.x.nrows() > self.config.max_cholesky_size
            && self.kernel.is_structured()
            && self.kernel.grid().is_some()
    }

    /// Total number of raw hyperparameters
    pub fn n_params(&self) -> usize {
        self.mean.n_params() + self.kernel.n_params() + 1
    }

    /// Raw hyperparameters `[mean params, kernel params, raw noise]`
    pub fn raw_params(&self) -> Array1<F> {
        let mut params = self.mean.params().to_vec();
        params.extend(self.kernel.raw_params().iter());
        params.push(self.likelihood.raw_noise());
        Array1::from(params)
    }

    /// Set raw hyperparameters `[mean params, kernel params, raw noise]`
    pub fn set_raw_params(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        if params.len() != self.n_params() {
            return Err(GpError::InvalidValueError(format!(
                "Model expects {} raw parameters, got {}",
                self.n_params(),
                params.len()
            )));
        }
        let nm = self.mean.n_params();
        let nk = self.kernel.n_params();
        self.mean.set_params(&params.slice(s![..nm]))?;
        self.kernel.set_raw_params(&params.slice(s![nm..nm + nk]))?;
        self.likelihood.set_raw_noise(params[nm + nk]);
        Ok(())
    }

    /// Prior distribution `N(mean(x), K(x, x))` of the latent function at `x` (n, nx)
    pub fn prior(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<MultivariateNormal<F>> {
        check_input_dim(x, self.x.ncols())?;
        MultivariateNormal::new(self.mean.value(x), self.kernel.evaluate(x, x)?)
    }

    /// Marginal log-likelihood objective of the model
    pub fn mll(&self) -> ExactMarginalLogLikelihood<'_, F, Mean, Corr> {
        ExactMarginalLogLikelihood::new(self)
    }

    /// Marginal log-likelihood value and gradient at the current hyperparameters
    pub fn evaluate_mll(&self) -> Result<MllEvaluation<F>> {
        mll::evaluate(self)
    }

    /// Train the hyperparameters with Adam for a fixed number of iterations
    pub fn train(&mut self, params: &TrainingParams) -> Result<TrainingReport<F>> {
        training::train(self, params)
    }

    /// Frozen posterior conditioned on the training data
    pub fn condition(&self) -> Result<GaussianProcess<F, Mean, Corr>> {
        GaussianProcess::from_model(self)
    }
}

impl<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> fmt::Display
    for ExactGp<F, Mean, Corr>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ExactGP(mean={}, kernel={}, likelihood={}, n={})",
            self.mean,
            self.kernel,
            self.likelihood,
            self.x.nrows()
        )
    }
}
