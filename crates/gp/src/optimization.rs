//! Adam optimizer implemented as an [argmin::core::Solver] to benefit from
//! the argmin executor features: iteration budget, observers and Ctrl-C handling.
//!
//! The solver performs exactly one cost and gradient evaluation per iteration and
//! never checks convergence: it runs until the executor max iterations is reached or
//! the optional interrupt flag is raised (checked between iterations).

use argmin::core::{
    ArgminError, CostFunction, Error, Gradient, IterState, Problem, Solver, State,
    TerminationReason, TerminationStatus, KV,
};
use log::debug;
use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Optimizer state: raw hyperparameters, gradient and loss in f64
pub type AdamState = IterState<Array1<f64>, Array1<f64>, (), (), (), f64>;

/// Termination message used when the interrupt flag is raised
pub const INTERRUPTED: &str = "interrupted";

/// Adam first order optimizer with bias corrected moment estimates
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    /// first moment estimate
    m: Array1<f64>,
    /// second moment estimate
    v: Array1<f64>,
    /// number of updates done
    t: i32,
    #[serde(skip)]
    interrupt: Option<Arc<AtomicBool>>,
}

impl Default for Adam {
    fn default() -> Self {
        Adam::new(0.1)
    }
}

impl Adam {
    /// Adam with the given learning rate and default decay rates (0.9, 0.999)
    pub fn new(learning_rate: f64) -> Self {
        Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            m: Array1::zeros(0),
            v: Array1::zeros(0),
            t: 0,
            interrupt: None,
        }
    }

    /// Set the exponential decay rates of the moment estimates
    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    /// Set the offset added to the update denominator
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Set a flag stopping the optimization once raised
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Apply one Adam update of `param` given its gradient
    pub fn step(&mut self, param: &Array1<f64>, grad: &Array1<f64>) -> Array1<f64> {
        if self.m.len() != param.len() {
            self.m = Array1::zeros(param.len());
            self.v = Array1::zeros(param.len());
            self.t = 0;
        }
        self.t += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        Zip::from(&mut self.m)
            .and(&mut self.v)
            .and(grad)
            .for_each(|m, v, &g| {
                *m = b1 * *m + (1. - b1) * g;
                *v = b2 * *v + (1. - b2) * g * g;
            });
        let c1 = 1. - b1.powi(self.t);
        let c2 = 1. - b2.powi(self.t);
        let mut next = param.to_owned();
        Zip::from(&mut next)
            .and(&self.m)
            .and(&self.v)
            .for_each(|p, &m, &v| {
                *p -= self.learning_rate * (m / c1) / ((v / c2).sqrt() + self.epsilon);
            });
        next
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

impl<O> Solver<O, AdamState> for Adam
where
    O: CostFunction<Param = Array1<f64>, Output = f64>
        + Gradient<Param = Array1<f64>, Gradient = Array1<f64>>,
{
    const NAME: &'static str = "Adam";

    fn init(
        &mut self,
        _problem: &mut Problem<O>,
        state: AdamState,
    ) -> std::result::Result<(AdamState, Option<KV>), Error> {
        let n = state
            .get_param()
            .ok_or_else(|| ArgminError::NotInitialized {
                text: "Adam requires an initial parameter vector".to_string(),
            })?
            .len();
        self.m = Array1::zeros(n);
        self.v = Array1::zeros(n);
        self.t = 0;
        Ok((state, None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        mut state: AdamState,
    ) -> std::result::Result<(AdamState, Option<KV>), Error> {
        let param = state.take_param().ok_or_else(|| ArgminError::NotInitialized {
            text: "Adam parameter vector is missing".to_string(),
        })?;
        let cost = problem.cost(&param)?;
        let grad = problem.gradient(&param)?;
        debug!(
            "Adam iteration {}: cost={} |grad|={}",
            state.get_iter() + 1,
            cost,
            grad.dot(&grad).sqrt()
        );
        let next = self.step(&param, &grad);
        Ok((state.param(next).cost(cost).gradient(grad), None))
    }

    fn terminate(&mut self, _state: &AdamState) -> TerminationStatus {
        if self.interrupted() {
            debug!("Adam interrupted");
            TerminationStatus::Terminated(TerminationReason::SolverExit(INTERRUPTED.to_string()))
        } else {
            TerminationStatus::NotTerminated
        }
    }
}
