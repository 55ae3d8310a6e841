//! Exact marginal log-likelihood of the GP model and its analytic gradient.
//!
//! `L = -1/2 (y - mu)^T Sigma^-1 (y - mu) - 1/2 log|Sigma| - n/2 log(2 pi)`
//!
//! With `alpha = Sigma^-1 (y - mu)`, the derivatives wrt raw hyperparameters are:
//! * kernel: `1/2 alpha^T dSigma alpha - 1/2 tr(Sigma^-1 dSigma)`
//! * noise: `(1/2 alpha^T alpha - 1/2 tr(Sigma^-1)) dnoise/draw`
//! * mean: `dmu^T alpha`
//!
//! The training loss minimized by the optimizer is `-L / n`.

use crate::correlation_models::CorrelationModel;
use crate::errors::{GpError, Result};
use crate::kernels::frobenius_dot;
use crate::linalg::{cholesky_log_det, cholesky_solve, cholesky_solve_vec, cholesky_with_jitter};
use crate::mean_models::MeanModel;
use crate::model::ExactGp;
use crate::ski::{solve_cg, SkiFactorization, SkiOperator};

use argmin::core::{CostFunction, Error, Gradient};
use linfa::Float;
use log::{debug, warn};
use ndarray::{s, Array1, Array2};
use std::sync::Mutex;
use std::time::Instant;

/// Marginal log-likelihood value and derivatives at given hyperparameters
#[derive(Clone, Debug)]
pub struct MllEvaluation<F: Float> {
    /// Marginal log-likelihood value
    pub value: F,
    /// Derivatives of the value wrt the raw hyperparameters,
    /// laid out as `[mean params, kernel params, raw noise]`
    pub gradient: Array1<F>,
    /// Number of training points
    pub n_points: usize,
    /// Whether the structured solver was used
    pub structured: bool,
}

impl<F: Float> MllEvaluation<F> {
    /// Training loss `-L / n`
    pub fn loss(&self) -> F {
        -self.value / F::cast(self.n_points)
    }

    /// Derivatives of the training loss wrt the raw hyperparameters
    pub fn loss_gradient(&self) -> Array1<F> {
        self.gradient.mapv(|g| -g / F::cast(self.n_points))
    }
}

fn log_2pi<F: Float>() -> F {
    F::cast(std::f64::consts::TAU).ln()
}

/// Evaluate the marginal log-likelihood of the model at its current hyperparameters
pub(crate) fn evaluate<F, Mean, Corr>(model: &ExactGp<F, Mean, Corr>) -> Result<MllEvaluation<F>>
where
    F: Float,
    Mean: MeanModel<F>,
    Corr: CorrelationModel<F>,
{
    let now = Instant::now();
    let res = if model.uses_structured_solver() {
        structured_evaluation(model)
    } else {
        dense_evaluation(model)
    };
    debug!("MLL evaluation in {:?}", now.elapsed());
    res
}

fn check_value<F: Float>(value: F) -> Result<F> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(GpError::LikelihoodComputationError(format!(
            "Marginal log-likelihood is not finite ({value})"
        )))
    }
}

fn dense_evaluation<F, Mean, Corr>(model: &ExactGp<F, Mean, Corr>) -> Result<MllEvaluation<F>>
where
    F: Float,
    Mean: MeanModel<F>,
    Corr: CorrelationModel<F>,
{
    let (x, y) = (model.training_inputs(), model.training_targets());
    let n = x.nrows();
    let likelihood = model.likelihood();
    let noise = likelihood.noise();

    let residual = y - &model.mean().value(x);
    let mut sigma = model.kernel().evaluate(x, x)?;
    sigma.diag_mut().mapv_inplace(|v| v + noise);
    let l = cholesky_with_jitter(&sigma, model.config().jitter)?;
    let alpha = cholesky_solve_vec(&l, &residual.view())?;
    let sigma_inv = cholesky_solve(&l, &Array2::eye(n))?;

    let half = F::cast(0.5);
    let value = -half * residual.dot(&alpha)
        - half * cholesky_log_det(&l)
        - half * F::cast(n) * log_2pi::<F>();

    let mut gradient = Vec::with_capacity(model.n_params());
    gradient.extend(model.mean().gradient(x).t().dot(&alpha).iter());
    for dk in model.kernel().gradients(x, x)? {
        gradient.push(half * alpha.dot(&dk.dot(&alpha)) - half * frobenius_dot(&sigma_inv, &dk));
    }
    let trace = sigma_inv.diag().sum();
    gradient.push((half * alpha.dot(&alpha) - half * trace) * likelihood.noise_derivative());

    Ok(MllEvaluation {
        value: check_value(value)?,
        gradient: Array1::from(gradient),
        n_points: n,
        structured: false,
    })
}

fn structured_evaluation<F, Mean, Corr>(model: &ExactGp<F, Mean, Corr>) -> Result<MllEvaluation<F>>
where
    F: Float,
    Mean: MeanModel<F>,
    Corr: CorrelationModel<F>,
{
    let (x, y) = (model.training_inputs(), model.training_targets());
    let n = x.nrows();
    let config = model.config();
    let likelihood = model.likelihood();
    let form = model.kernel().grid_form()?.ok_or_else(|| {
        GpError::InvalidValueError("Kernel has no structured form".to_string())
    })?;

    let op = SkiOperator::new(&form, x, likelihood.noise())?;
    let factorization = SkiFactorization::new(&op, config.jitter)?;
    let residual = y - &model.mean().value(x);
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
            "MLL: CG residual {} above tolerance after {} iterations",
            cg.residual, cg.iterations
        );
    }
    let alpha = cg.solution;

    let half = F::cast(0.5);
    let value = -half * residual.dot(&alpha)
        - half * factorization.log_det()
        - half * F::cast(n) * log_2pi::<F>();

    // u_d = W_d^T alpha, P_dd diagonal blocks of W^T Sigma^-1 W
    let u = op.interp_t(&alpha.view());
    let p = factorization.p_matrix()?;
    let g = op.grid_size();
    let mut p_sum = Array2::zeros((g, g));
    for d in 0..op.num_dims() {
        p_sum += &p.slice(s![d * g..(d + 1) * g, d * g..(d + 1) * g]);
    }

    let mut gradient = Vec::with_capacity(model.n_params());
    gradient.extend(model.mean().gradient(x).t().dot(&alpha).iter());
    for dk in form.dkuu.iter() {
        let quad = (&u.dot(dk) * &u).sum();
        gradient.push(half * quad - half * frobenius_dot(&p_sum, dk));
    }
    let trace = factorization.inv_trace()?;
    gradient.push((half * alpha.dot(&alpha) - half * trace) * likelihood.noise_derivative());

    Ok(MllEvaluation {
        value: check_value(value)?,
        gradient: Array1::from(gradient),
        n_points: n,
        structured: true,
    })
}

/// Exact marginal log-likelihood objective of a GP model.
///
/// Implements argmin [`CostFunction`] (training loss) and [`Gradient`] on raw hyperparameters
/// given as f64 vectors. The loss and its gradient share one evaluation per parameter vector.
pub struct ExactMarginalLogLikelihood<'a, F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> {
    model: &'a ExactGp<F, Mean, Corr>,
    last: Mutex<Option<(Array1<f64>, MllEvaluation<F>)>>,
}

impl<'a, F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>>
    ExactMarginalLogLikelihood<'a, F, Mean, Corr>
{
    /// Objective of the given model
    pub fn new(model: &'a ExactGp<F, Mean, Corr>) -> Self {
        ExactMarginalLogLikelihood {
            model,
            last: Mutex::new(None),
        }
    }

    /// Evaluation at the model current hyperparameters
    pub fn evaluate(&self) -> Result<MllEvaluation<F>> {
        evaluate(self.model)
    }

    /// Evaluation at the given raw hyperparameters
    pub fn evaluate_at(&self, raw_params: &Array1<F>) -> Result<MllEvaluation<F>> {
        let mut model = self.model.clone();
        model.set_raw_params(raw_params)?;
        evaluate(&model)
    }

    fn cached(&self, p: &Array1<f64>) -> Result<MllEvaluation<F>> {
        let mut last = self
            .last
            .lock()
            .map_err(|err| GpError::LikelihoodComputationError(err.to_string()))?;
        if let Some((params, eval)) = last.as_ref() {
            if params == p {
                return Ok(eval.clone());
            }
        }
        let eval = self.evaluate_at(&p.mapv(F::cast))?;
        *last = Some((p.to_owned(), eval.clone()));
        Ok(eval)
    }
}

impl<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> CostFunction
    for ExactMarginalLogLikelihood<'_, F, Mean, Corr>
{
    type Param = Array1<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> std::result::Result<Self::Output, Error> {
        let eval = self.cached(p)?;
        Ok(<f64 as Float>::cast(eval.loss()))
    }
}

impl<F: Float, Mean: MeanModel<F>, Corr: CorrelationModel<F>> Gradient
    for ExactMarginalLogLikelihood<'_, F, Mean, Corr>
{
    type Param = Array1<f64>;
    type Gradient = Array1<f64>;

    fn gradient(&self, p: &Self::Param) -> std::result::Result<Self::Gradient, Error> {
        let eval = self.cached(p)?;
        Ok(eval.loss_gradient().mapv(<f64 as Float>::cast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation_models::SquaredExponentialCorr;
    use crate::distributions::MultivariateNormal;
    use crate::interpolation::GridSize;
    use crate::kernels::Kernel;
    use crate::likelihood::GaussianLikelihood;
    use crate::mean_models::{ConstantMean, LinearMean};
    use crate::parameters::SolverConfig;
    use approx::assert_abs_diff_eq;
    use finitediff::FiniteDiff;
    use ndarray::{array, Axis};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;

    fn dataset(n: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let x = Array2::random_using((n, 2), Uniform::new(0., 1.), &mut rng);
        let y = x.map_axis(Axis(1), |row| {
            (std::f64::consts::TAU * row[0]).sin() + (std::f64::consts::TAU * row[1]).cos()
        });
        (x, y)
    }

    fn kissgp_model(
        n: usize,
        max_cholesky_size: usize,
    ) -> ExactGp<f64, ConstantMean<f64>, SquaredExponentialCorr> {
        let (x, y) = dataset(n, 42);
        let config = SolverConfig {
            max_cholesky_size,
            cg_tolerance: 1e-10,
            ..SolverConfig::default()
        };
        let kernel = Kernel::additive_kissgp(SquaredExponentialCorr(), 2, GridSize::Fixed(30))
            .with_lengthscale(&array![0.3])
            .unwrap();
        ExactGp::new(
            ConstantMean::new(0.2),
            kernel,
            GaussianLikelihood::new(0.05).unwrap(),
            x,
            y,
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_dense_value_matches_log_prob() {
        let (x, y) = dataset(20, 0);
        let kernel = Kernel::scale(Kernel::stationary(SquaredExponentialCorr()));
        let model = ExactGp::new(
            ConstantMean::new(0.5),
            kernel.clone(),
            GaussianLikelihood::new(0.1).unwrap(),
            x.clone(),
            y.clone(),
            SolverConfig::default(),
        )
        .unwrap();
        let eval = ExactMarginalLogLikelihood::new(&model).evaluate().unwrap();
        assert!(!eval.structured);

        let mut cov = kernel.evaluate(&x, &x).unwrap();
        cov.diag_mut().mapv_inplace(|v| v + 0.1);
        let mvn = MultivariateNormal::new(Array1::from_elem(20, 0.5), cov).unwrap();
        assert_abs_diff_eq!(eval.value, mvn.log_prob(&y, 0.).unwrap(), epsilon = 1e-8);
        assert_abs_diff_eq!(eval.loss(), -eval.value / 20., epsilon = 1e-12);
    }

    #[test]
    fn test_structured_matches_dense() {
        let dense = kissgp_model(60, 1000);
        let structured = kissgp_model(60, 10);
        assert!(!dense.uses_structured_solver());
        assert!(structured.uses_structured_solver());

        let e_dense = evaluate(&dense).unwrap();
        let e_struct = evaluate(&structured).unwrap();
        assert!(e_struct.structured);
        assert_abs_diff_eq!(e_dense.value, e_struct.value, epsilon = 1e-6);
        assert_abs_diff_eq!(e_dense.gradient, e_struct.gradient, epsilon = 1e-5);
    }

    fn check_gradient<Mean: MeanModel<f64>>(model: &ExactGp<f64, Mean, SquaredExponentialCorr>) {
        let mll = ExactMarginalLogLikelihood::new(model);
        let raw = model.raw_params();
        let eval = mll.evaluate_at(&raw).unwrap();
        let fd = raw.central_diff(&|p: &Array1<f64>| mll.evaluate_at(p).unwrap().value);
        assert_abs_diff_eq!(eval.gradient, fd, epsilon = 1e-3);
    }

    #[test]
    fn test_dense_gradient() {
        let (x, y) = dataset(25, 1);
        let kernel = Kernel::scale(Kernel::stationary_ard(SquaredExponentialCorr(), 2))
            .with_lengthscale(&array![0.4, 0.7])
            .unwrap();
        let model = ExactGp::new(
            LinearMean::new(array![0.1, -0.2], 0.3),
            kernel,
            GaussianLikelihood::new(0.2).unwrap(),
            x,
            y,
            SolverConfig::default(),
        )
        .unwrap();
        assert_eq!(model.n_params(), 3 + 3 + 1);
        check_gradient(&model);
    }

    #[test]
    fn test_structured_gradient() {
        let model = kissgp_model(50, 10);
        assert!(model.uses_structured_solver());
        check_gradient(&model);
    }

    #[test]
    fn test_cost_and_gradient_share_evaluation() {
        let model = kissgp_model(40, 1000);
        let mll = ExactMarginalLogLikelihood::new(&model);
        let p = model.raw_params();
        let cost = mll.cost(&p).unwrap();
        let grad = mll.gradient(&p).unwrap();
        let eval = mll.evaluate().unwrap();
        assert_abs_diff_eq!(cost, eval.loss(), epsilon = 1e-12);
        assert_abs_diff_eq!(grad, eval.loss_gradient(), epsilon = 1e-12);
        let shifted = &p + 0.1;
        assert!((mll.cost(&shifted).unwrap() - cost).abs() > 0.);
    }

    #[test]
    fn test_single_point() {
        let model = ExactGp::new(
            ConstantMean::default(),
            Kernel::scale(Kernel::stationary(SquaredExponentialCorr())),
            GaussianLikelihood::default(),
            array![[0.5, 0.5]],
            array![1.],
            SolverConfig::default(),
        )
        .unwrap();
        let eval = evaluate(&model).unwrap();
        let var = std::f64::consts::LN_2 + model.likelihood().noise();
        let expected = -0.5 / var - 0.5 * var.ln() - 0.5 * std::f64::consts::TAU.ln();
        assert_abs_diff_eq!(eval.value, expected, epsilon = 1e-10);
    }
}
