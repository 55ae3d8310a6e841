//! A module for learnable mean models of the GP model.
//!
//! The following models are implemented:
//! * zero,
//! * constant,
//! * linear
//!
//! Mean parameters are unconstrained and trained along with the kernel and likelihood
//! hyperparameters.

use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::{concatenate, s, Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trait for mean models used in GP regression
pub trait MeanModel<F: Float>: Clone + fmt::Debug + fmt::Display + Send + Sync {
    /// Compute the mean values at the given `x` data points specified as (n, nx) matrix.
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F>;

    /// Number of learnable parameters
    fn n_params(&self) -> usize;

    /// Learnable parameters as a (n_params,) vector
    fn params(&self) -> Array1<F>;

    /// Set learnable parameters given as a (n_params,) vector
    fn set_params(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()>;

    /// Jacobian of the mean values wrt the parameters at `x` (n, nx).
    /// Returns a (n, n_params) matrix
    fn gradient(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F>;

    /// Size the parameters for inputs of `nx` components
    fn adapt_dim(&mut self, _nx: usize) {}
}

fn check_params_len<F: Float>(
    params: &ArrayBase<impl Data<Elem = F>, Ix1>,
    expected: usize,
) -> Result<()> {
    if params.len() != expected {
        return Err(GpError::InvalidValueError(format!(
            "Mean model expects {} parameters, got {}",
            expected,
            params.len()
        )));
    }
    Ok(())
}

/// A zero function as mean of the GP
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct ZeroMean();

impl<F: Float> MeanModel<F> for ZeroMean {
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        Array1::zeros(x.nrows())
    }

    fn n_params(&self) -> usize {
        0
    }

    fn params(&self) -> Array1<F> {
        Array1::zeros(0)
    }

    fn set_params(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        check_params_len(params, 0)
    }

    fn gradient(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        Array2::zeros((x.nrows(), 0))
    }
}

/// A learnable constant as mean of the GP
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct ConstantMean<F: Float> {
    constant: F,
}

impl<F: Float> ConstantMean<F> {
    /// Constant mean with the given initial value
    pub fn new(constant: F) -> Self {
        ConstantMean { constant }
    }

    /// Current constant value
    pub fn constant(&self) -> F {
        self.constant
    }
}

impl<F: Float> MeanModel<F> for ConstantMean<F> {
    /// mean(x) = [c, ..., c].T
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        Array1::from_elem(x.nrows(), self.constant)
    }

    fn n_params(&self) -> usize {
        1
    }

    fn params(&self) -> Array1<F> {
        Array1::from_elem(1, self.constant)
    }

    fn set_params(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        check_params_len(params, 1)?;
        self.constant = params[0];
        Ok(())
    }

    /// d mean / dc = [1, ..., 1].T
    fn gradient(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        Array2::ones((x.nrows(), 1))
    }
}

/// An affine function as mean of the GP
#[derive(Clone, Debug, PartialEq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct LinearMean<F: Float> {
    weights: Array1<F>,
    bias: F,
}

impl<F: Float> LinearMean<F> {
    /// Linear mean with the given initial weights and bias
    pub fn new(weights: Array1<F>, bias: F) -> Self {
        LinearMean { weights, bias }
    }

    /// Current weights
    pub fn weights(&self) -> &Array1<F> {
        &self.weights
    }

    /// Current bias
    pub fn bias(&self) -> F {
        self.bias
    }
}

impl<F: Float> MeanModel<F> for LinearMean<F> {
    /// mean(x) = x.w + b
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        x.dot(&self.weights) + self.bias
    }

    fn n_params(&self) -> usize {
        self.weights.len() + 1
    }

    fn params(&self) -> Array1<F> {
        let mut params = self.weights.to_vec();
        params.push(self.bias);
        Array1::from(params)
    }

    fn set_params(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        check_params_len(params, self.n_params())?;
        let nw = self.weights.len();
        self.weights.assign(&params.slice(s![..nw]));
        self.bias = params[nw];
        Ok(())
    }

    /// d mean / d(w, b) = [x, 1]
    fn gradient(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        concatenate![Axis(1), x.to_owned(), Array2::ones((x.nrows(), 1))]
    }

    fn adapt_dim(&mut self, nx: usize) {
        if self.weights.len() != nx {
            self.weights = Array1::zeros(nx);
        }
    }
}

impl fmt::Display for ZeroMean {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ZeroMean")
    }
}

impl<F: Float> fmt::Display for ConstantMean<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConstantMean(constant={})", self.constant)
    }
}

impl<F: Float> fmt::Display for LinearMean<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LinearMean(weights={}, bias={})", self.weights, self.bias)
    }
}
