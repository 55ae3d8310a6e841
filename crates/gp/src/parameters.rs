use crate::correlation_models::CorrelationModel;
use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::likelihood::GaussianLikelihood;
use crate::linalg::PreconditionerKind;
use crate::mean_models::MeanModel;
use linfa::{Float, ParamGuard};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Default number of training iterations
pub const GP_TRAINING_N_ITER: usize = 20;
/// Default Adam learning rate
pub const GP_LEARNING_RATE: f64 = 0.1;

/// Numerical settings of the linear solves used in training and prediction.
///
/// They are passed explicitly to the model, there is no global state.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct SolverConfig<F: Float> {
    /// Relative residual tolerance of conjugate gradients
    pub cg_tolerance: F,
    /// Max number of conjugate gradients iterations per solve
    pub max_cg_iterations: usize,
    /// Training sets larger than this size use the structured solver when the kernel allows it
    pub max_cholesky_size: usize,
    /// Value added to the diagonal when a Cholesky factorization fails
    pub jitter: F,
    /// Preconditioner of conjugate gradients
    pub preconditioner: PreconditionerKind,
    /// Whether structured predictive variances use the precomputed cache
    /// rather than one conjugate gradients solve per point
    pub fast_pred_var: bool,
    /// Number of points predicted at once
    pub prediction_batch_size: usize,
}

impl<F: Float> Default for SolverConfig<F> {
    fn default() -> Self {
        SolverConfig {
            cg_tolerance: F::cast(1e-6),
            max_cg_iterations: 1000,
            max_cholesky_size: 800,
            jitter: F::cast(1e-6),
            preconditioner: PreconditionerKind::default(),
            fast_pred_var: true,
            prediction_batch_size: 1024,
        }
    }
}

impl<F: Float> SolverConfig<F> {
    pub(crate) fn check(&self) -> Result<()> {
        if !(self.cg_tolerance > F::zero()) {
            return Err(GpError::InvalidValueError(format!(
                "CG tolerance should be positive, got {}",
                self.cg_tolerance
            )));
        }
        if self.max_cg_iterations == 0 {
            return Err(GpError::InvalidValueError(
                "Max number of CG iterations should be positive".to_string(),
            ));
        }
        if !(self.jitter >= F::zero()) {
            return Err(GpError::InvalidValueError(format!(
                "Jitter should be non negative, got {}",
                self.jitter
            )));
        }
        if self.prediction_batch_size == 0 {
            return Err(GpError::InvalidValueError(
                "Prediction batch size should be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings of the hyperparameters training loop (Adam optimizer run for a fixed budget)
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct TrainingParams {
    /// Number of optimizer iterations
    pub n_iter: usize,
    /// Adam step size
    pub learning_rate: f64,
    /// Exponential decay of the first moment estimates
    pub beta1: f64,
    /// Exponential decay of the second moment estimates
    pub beta2: f64,
    /// Adam denominator offset
    pub epsilon: f64,
    /// Whether Ctrl-C stops the training loop
    pub ctrlc: bool,
    /// Flag checked between iterations, training stops once set to `true`
    #[cfg_attr(feature = "serializable", serde(skip))]
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl Default for TrainingParams {
    fn default() -> Self {
        TrainingParams {
            n_iter: GP_TRAINING_N_ITER,
            learning_rate: GP_LEARNING_RATE,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            ctrlc: false,
            interrupt: None,
        }
    }
}

impl TrainingParams {
    pub(crate) fn check(&self) -> Result<()> {
        if !(self.learning_rate > 0.) || !self.learning_rate.is_finite() {
            return Err(GpError::InvalidValueError(format!(
                "Learning rate should be positive, got {}",
                self.learning_rate
            )));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0. ..1.).contains(&beta) {
                return Err(GpError::InvalidValueError(format!(
                    "Adam {name} should be in [0, 1), got {beta}"
                )));
            }
        }
        if !(self.epsilon > 0.) {
            return Err(GpError::InvalidValueError(format!(
                "Adam epsilon should be positive, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

/// A set of validated GP parameters.
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Mean: Serialize, Corr: Serialize",
        deserialize = "F: Deserialize<'de>, Mean: Deserialize<'de>, Corr: Deserialize<'de>"
    ))
)]
pub struct GpValidParams<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> {
    /// Mean model of the prior
    pub(crate) mean: Mean,
    /// Covariance kernel of the prior
    pub(crate) kernel: Kernel<F, Corr>,
    /// Observation model
    pub(crate) likelihood: GaussianLikelihood<F>,
    /// Initial noise variance overriding the likelihood one
    pub(crate) init_noise: Option<F>,
    /// Linear solvers settings
    pub(crate) solver: SolverConfig<F>,
    /// Training loop settings
    pub(crate) training: TrainingParams,
}

impl<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> GpValidParams<F, Mean, Corr> {
    /// Get mean model
    pub fn mean(&self) -> &Mean {
        &self.mean
    }

    /// Get covariance kernel
    pub fn kernel(&self) -> &Kernel<F, Corr> {
        &self.kernel
    }

    /// Get likelihood, with its initial noise set
    pub fn likelihood(&self) -> Result<GaussianLikelihood<F>> {
        let mut likelihood = self.likelihood;
        if let Some(noise) = self.init_noise {
            likelihood.set_noise(noise)?;
        }
        Ok(likelihood)
    }

    /// Get linear solvers settings
    pub fn solver(&self) -> &SolverConfig<F> {
        &self.solver
    }

    /// Get training loop settings
    pub fn training(&self) -> &TrainingParams {
        &self.training
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [GP algorithm](struct.GaussianProcess.html).
pub struct GpParams<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>>(
    GpValidParams<F, Mean, Corr>,
);

impl<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> GpParams<F, Mean, Corr> {
    /// A constructor for GP parameters given mean model and kernel
    pub fn new(mean: Mean, kernel: Kernel<F, Corr>) -> GpParams<F, Mean, Corr> {
        Self(GpValidParams {
            mean,
            kernel,
            likelihood: GaussianLikelihood::default(),
            init_noise: None,
            solver: SolverConfig::default(),
            training: TrainingParams::default(),
        })
    }

    /// A constructor for GP parameters from validated parameters
    pub fn new_from_valid(params: &GpValidParams<F, Mean, Corr>) -> Self {
        Self(params.clone())
    }

    /// Set mean model.
    pub fn mean(mut self, mean: Mean) -> Self {
        self.0.mean = mean;
        self
    }

    /// Set covariance kernel.
    pub fn kernel(mut self, kernel: Kernel<F, Corr>) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set likelihood.
    pub fn likelihood(mut self, likelihood: GaussianLikelihood<F>) -> Self {
        self.0.likelihood = likelihood;
        self
    }

    /// Set initial noise variance, should be greater than the likelihood noise lower bound.
    pub fn noise(mut self, noise: F) -> Self {
        self.0.init_noise = Some(noise);
        self
    }

    /// Set linear solvers settings.
    pub fn solver(mut self, solver: SolverConfig<F>) -> Self {
        self.0.solver = solver;
        self
    }

    /// Set training loop settings.
    pub fn training(mut self, training: TrainingParams) -> Self {
        self.0.training = training;
        self
    }

    /// Set the number of training iterations.
    pub fn n_iter(mut self, n_iter: usize) -> Self {
        self.0.training.n_iter = n_iter;
        self
    }

    /// Set the Adam learning rate.
    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.0.training.learning_rate = learning_rate;
        self
    }

    /// Set the flag used to interrupt training between iterations.
    pub fn interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.0.training.interrupt = Some(interrupt);
        self
    }
}

impl<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> From<GpValidParams<F, Mean, Corr>>
    for GpParams<F, Mean, Corr>
{
    fn from(valid: GpValidParams<F, Mean, Corr>) -> Self {
        GpParams(valid)
    }
}

impl<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> ParamGuard
    for GpParams<F, Mean, Corr>
{
    type Checked = GpValidParams<F, Mean, Corr>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        self.0.kernel.check_grid_size()?;
        self.0.solver.check()?;
        self.0.training.check()?;
        if let Some(noise) = self.0.init_noise {
            let bound = self.0.likelihood.lower_bound();
            if !(noise > bound) {
                return Err(GpError::InvalidValueError(format!(
                    "Initial noise should be greater than {bound}, got {noise}"
                )));
            }
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation_models::SquaredExponentialCorr;
    use crate::interpolation::GridSize;
    use crate::mean_models::ConstantMean;

    fn params(grid_size: GridSize) -> GpParams<f64, ConstantMean<f64>, SquaredExponentialCorr> {
        GpParams::new(
            ConstantMean::default(),
            Kernel::additive_kissgp(SquaredExponentialCorr(), 2, grid_size),
        )
    }

    #[test]
    fn test_default_params() {
        let valid = params(GridSize::default()).check().unwrap();
        assert_eq!(valid.training().n_iter, 20);
        assert_eq!(valid.training().learning_rate, 0.1);
        assert_eq!(valid.solver().max_cholesky_size, 800);
        assert!(valid.solver().fast_pred_var);
        assert_eq!(valid.solver().preconditioner, PreconditionerKind::LowRank);
    }

    #[test]
    fn test_invalid_params() {
        assert!(params(GridSize::Fixed(3)).check_ref().is_err());
        assert!(params(GridSize::Auto { ratio: 0. }).check_ref().is_err());
        assert!(params(GridSize::Fixed(4)).check_ref().is_ok());
        assert!(params(GridSize::default()).learning_rate(0.).check().is_err());
        assert!(params(GridSize::default()).learning_rate(f64::NAN).check().is_err());
        assert!(params(GridSize::default()).noise(1e-5).check().is_err());
        assert!(params(GridSize::default()).noise(0.01).check().is_ok());

        let solver = SolverConfig {
            cg_tolerance: 0.,
            ..SolverConfig::default()
        };
        assert!(params(GridSize::default()).solver(solver).check().is_err());
        let solver = SolverConfig {
            jitter: -1e-6,
            ..SolverConfig::default()
        };
        assert!(params(GridSize::default()).solver(solver).check().is_err());
        let training = TrainingParams {
            beta1: 1.,
            ..TrainingParams::default()
        };
        assert!(params(GridSize::default()).training(training).check().is_err());
    }

    #[test]
    fn test_initial_noise() {
        let valid = params(GridSize::default()).noise(0.04).check().unwrap();
        approx::assert_abs_diff_eq!(valid.likelihood().unwrap().noise(), 0.04, epsilon = 1e-12);
    }
}
