//! Positivity constraints applied to GP hyperparameters.
//!
//! Hyperparameters are stored as unconstrained *raw* values which are mapped to their
//! constrained counterpart through a softplus transform:
//!
//! `value = lower_bound + softplus(raw)` where `softplus(x) = ln(1 + exp(x))`
//!
//! so that a strictly positive quantity (noise variance, lengthscale, outputscale)
//! can not be given a negative or zero value by the optimizer.

use crate::errors::{GpError, Result};
use linfa::Float;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Constrain a hyperparameter to be greater than a given lower bound
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct GreaterThan<F: Float> {
    lower_bound: F,
}

impl<F: Float> Default for GreaterThan<F> {
    fn default() -> Self {
        Self::positive()
    }
}

impl<F: Float> GreaterThan<F> {
    /// Raw values above this threshold are mapped linearly (softplus(x) ~ x)
    const LINEAR_THRESHOLD: f64 = 20.;

    /// Constraint with the given lower bound
    pub fn new(lower_bound: F) -> Self {
        GreaterThan { lower_bound }
    }

    /// Strictly positive constraint
    pub fn positive() -> Self {
        GreaterThan {
            lower_bound: F::zero(),
        }
    }

    /// Lower bound of the constrained value
    pub fn lower_bound(&self) -> F {
        self.lower_bound
    }

    /// Map a raw value to its constrained value.
    /// The result is floored at machine epsilon above the bound.
    pub fn transform(&self, raw: F) -> F {
        self.lower_bound + softplus(raw).max(F::epsilon())
    }

    /// Map a constrained value back to a raw value
    pub fn inverse_transform(&self, value: F) -> Result<F> {
        let shifted = value - self.lower_bound;
        if !(shifted > F::zero()) || !shifted.is_finite() {
            return Err(GpError::InvalidValueError(format!(
                "Constrained value {} should be finite and greater than {}",
                value, self.lower_bound
            )));
        }
        Ok(inv_softplus(shifted))
    }

    /// Derivative of the constrained value wrt the raw value
    pub fn derivative(&self, raw: F) -> F {
        sigmoid(raw)
    }
}

pub(crate) fn softplus<F: Float>(x: F) -> F {
    if x > F::cast(GreaterThan::<F>::LINEAR_THRESHOLD) {
        x
    } else {
        x.exp().ln_1p()
    }
}

pub(crate) fn inv_softplus<F: Float>(y: F) -> F {
    if y > F::cast(GreaterThan::<F>::LINEAR_THRESHOLD) {
        y
    } else {
        // ln(exp(y) - 1) = y + ln(1 - exp(-y))
        y + (-(-y).exp_m1()).ln()
    }
}

pub(crate) fn sigmoid<F: Float>(x: F) -> F {
    if x >= F::zero() {
        F::one() / (F::one() + (-x).exp())
    } else {
        let e = x.exp();
        e / (F::one() + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_default_raw_value() {
        let c = GreaterThan::<f64>::positive();
        assert_abs_diff_eq!(c.transform(0.), std::f64::consts::LN_2, epsilon = 1e-12);
        let noise = GreaterThan::new(1e-4);
        assert_abs_diff_eq!(noise.transform(0.), 1e-4 + std::f64::consts::LN_2);
    }

    #[test]
    fn test_inverse_transform() {
        let c = GreaterThan::new(1e-4);
        for v in [1e-3, 0.01, 0.5, 1., 3., 50.] {
            let raw = c.inverse_transform(v).expect("valid value");
            assert_abs_diff_eq!(c.transform(raw), v, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_invalid_values() {
        let c = GreaterThan::new(1e-4);
        assert!(c.inverse_transform(1e-4).is_err());
        assert!(c.inverse_transform(-1.).is_err());
        assert!(c.inverse_transform(f64::NAN).is_err());
        assert!(c.inverse_transform(f64::INFINITY).is_err());
    }

    #[test]
    fn test_never_below_bound() {
        let c = GreaterThan::<f64>::positive();
        for raw in [-1e3, -50., -10., 0., 10., 1e3] {
            assert!(c.transform(raw) > 0.);
        }
    }

    #[test]
    fn test_derivative() {
        let c = GreaterThan::new(0.5);
        let e = 1e-6;
        for raw in [-5., -0.3, 0., 1.2, 25.] {
            let fd = (c.transform(raw + e) - c.transform(raw - e)) / (2. * e);
            assert_abs_diff_eq!(c.derivative(raw), fd, epsilon = 1e-6);
        }
    }
}
