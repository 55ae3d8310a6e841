//! Hyperparameters training loop: Adam run on the marginal log-likelihood loss
//! for a fixed number of iterations.

use crate::correlation_models::CorrelationModel;
use crate::errors::{GpError, Result};
use crate::mean_models::MeanModel;
use crate::model::ExactGp;
use crate::optimization::{Adam, AdamState, INTERRUPTED};
use crate::parameters::TrainingParams;

use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{Error, Executor, State, TerminationReason, KV};
use linfa::Float;
use log::{debug, info};
use ndarray::Array1;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Why the training loop stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum StopReason {
    /// All iterations of the budget were run
    BudgetExhausted,
    /// The interrupt flag was raised (or Ctrl-C pressed) between two iterations
    Interrupted,
}

/// Outcome of a training run
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct TrainingReport<F: Float> {
    /// Loss `-mll / n` evaluated at the start of each completed iteration
    pub losses: Array1<F>,
    /// Number of completed iterations
    pub n_iter: usize,
    /// Stop reason
    pub stop_reason: StopReason,
}

impl<F: Float> TrainingReport<F> {
    /// Loss of the last completed iteration
    pub fn final_loss(&self) -> Option<F> {
        self.losses.last().copied()
    }
}

/// Observer recording the loss of each iteration
struct LossObserver {
    losses: Arc<Mutex<Vec<f64>>>,
    n_iter: u64,
}

impl Observe<AdamState> for LossObserver {
    fn observe_iter(&mut self, state: &AdamState, _kv: &KV) -> std::result::Result<(), Error> {
        let loss = state.get_cost();
        info!(
            "Iter {}/{} - Loss: {:.3}",
            state.get_iter() + 1,
            self.n_iter,
            loss
        );
        if let Ok(mut losses) = self.losses.lock() {
            losses.push(loss);
        }
        Ok(())
    }
}

/// Train the model hyperparameters in place.
///
/// Each iteration evaluates the loss and its gradient at the current hyperparameters
/// then applies one Adam update. The model ends up with the hyperparameters of the
/// last update, even when the loop is interrupted.
pub(crate) fn train<F, Mean, Corr>(
    model: &mut ExactGp<F, Mean, Corr>,
    params: &TrainingParams,
) -> Result<TrainingReport<F>>
where
    F: Float,
    Mean: MeanModel<F>,
    Corr: CorrelationModel<F>,
{
    params.check()?;
    let init = model.raw_params().mapv(<f64 as Float>::cast);
    if params.n_iter == 0 {
        return Ok(TrainingReport {
            losses: Array1::zeros(0),
            n_iter: 0,
            stop_reason: StopReason::BudgetExhausted,
        });
    }

    let mut adam = Adam::new(params.learning_rate)
        .with_betas(params.beta1, params.beta2)
        .with_epsilon(params.epsilon);
    if let Some(interrupt) = params.interrupt.as_ref() {
        adam = adam.with_interrupt(Arc::clone(interrupt));
    }
    let losses = Arc::new(Mutex::new(Vec::with_capacity(params.n_iter)));
    let observer = LossObserver {
        losses: Arc::clone(&losses),
        n_iter: params.n_iter as u64,
    };

    let now = Instant::now();
    let (param, reason, n_iter) = {
        let objective = model.mll();
        let res = Executor::new(objective, adam)
            .configure(|state| state.param(init.clone()).max_iters(params.n_iter as u64))
            .ctrlc(params.ctrlc)
            .add_observer(observer, ObserverMode::Always)
            .run()
            .map_err(GpError::from_optimizer)?;
        let state = res.state();
        (
            state.get_param().cloned(),
            state.get_termination_reason().cloned(),
            state.get_iter() as usize,
        )
    };
    debug!("Training done in {:?} ({:?})", now.elapsed(), reason);

    let stop_reason = match reason {
        Some(TerminationReason::SolverExit(msg)) if msg == INTERRUPTED => StopReason::Interrupted,
        Some(TerminationReason::Interrupt) => StopReason::Interrupted,
        _ => StopReason::BudgetExhausted,
    };
    let param = param.unwrap_or(init);
    model.set_raw_params(&param.mapv(F::cast))?;

    let losses = losses
        .lock()
        .map_err(|err| GpError::LikelihoodComputationError(err.to_string()))?
        .iter()
        .map(|&l| F::cast(l))
        .collect::<Array1<F>>();
    Ok(TrainingReport {
        losses,
        n_iter,
        stop_reason,
    })
}
