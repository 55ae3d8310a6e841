//! Gaussian observation model of the GP regression.

use crate::constraints::GreaterThan;
use crate::distributions::MultivariateNormal;
use crate::errors::Result;
use linfa::Float;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default lower bound of the noise variance
pub const NOISE_LOWER_BOUND: f64 = 1e-4;

/// Gaussian likelihood `y = f(x) + eps` with `eps ~ N(0, noise)`.
///
/// The noise variance is learnable and stored as a raw value constrained to be
/// greater than [`NOISE_LOWER_BOUND`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct GaussianLikelihood<F: Float> {
    raw_noise: F,
    constraint: GreaterThan<F>,
}

impl<F: Float> Default for GaussianLikelihood<F> {
    fn default() -> Self {
        GaussianLikelihood {
            raw_noise: F::zero(),
            constraint: GreaterThan::new(F::cast(NOISE_LOWER_BOUND)),
        }
    }
}

impl<F: Float> GaussianLikelihood<F> {
    /// Likelihood with the default noise constraint and the given initial noise variance
    pub fn new(noise: F) -> Result<Self> {
        let mut lik = Self::default();
        lik.set_noise(noise)?;
        Ok(lik)
    }

    /// Likelihood with a custom noise constraint, raw noise initialized to 0
    pub fn with_constraint(constraint: GreaterThan<F>) -> Self {
        GaussianLikelihood {
            raw_noise: F::zero(),
            constraint,
        }
    }

    /// Noise variance
    pub fn noise(&self) -> F {
        self.constraint.transform(self.raw_noise)
    }

    /// Set noise variance, rejecting values at or below the constraint lower bound
    pub fn set_noise(&mut self, noise: F) -> Result<()> {
        self.raw_noise = self.constraint.inverse_transform(noise)?;
        Ok(())
    }

    /// Lower bound of the noise variance
    pub fn lower_bound(&self) -> F {
        self.constraint.lower_bound()
    }

    /// Raw (unconstrained) noise value
    pub fn raw_noise(&self) -> F {
        self.raw_noise
    }

    /// Set raw (unconstrained) noise value
    pub fn set_raw_noise(&mut self, raw_noise: F) {
        self.raw_noise = raw_noise;
    }

    /// Derivative of the noise variance wrt the raw noise
    pub fn noise_derivative(&self) -> F {
        self.constraint.derivative(self.raw_noise)
    }

    /// Distribution of the observations given the latent function distribution:
    /// the noise variance is added to the covariance diagonal
    pub fn marginal(&self, latent: &MultivariateNormal<F>) -> Result<MultivariateNormal<F>> {
        let mut covariance = latent.covariance().to_owned();
        let noise = self.noise();
        covariance.diag_mut().mapv_inplace(|v| v + noise);
        MultivariateNormal::new(latent.mean().to_owned(), covariance)
    }
}

impl<F: Float> fmt::Display for GaussianLikelihood<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GaussianLikelihood(noise={})", self.noise())
    }
}
