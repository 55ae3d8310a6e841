//! A module for stationary correlation models used as base kernels of the GP model.
//!
//! A correlation model is a product over input components of a 1D factor `phi(tau)`
//! evaluated at the scaled distance `tau = |x_j - x'_j| / l_j` where `l` is the lengthscale
//! (either one shared value or one value per component).
//!
//! The following correlation models are implemented:
//! * squared exponential,
//! * absolute exponential,
//! * matern 3/2,
//! * matern 5/2.

use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2, Zip};
use paste::paste;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// A trait for using a correlation model in GP regression
pub trait CorrelationModel<F: Float>:
    Clone + Copy + Default + fmt::Display + fmt::Debug + Send + Sync
{
    /// 1D correlation factor `phi(tau)` at scaled distance `tau >= 0`, with `phi(0) = 1`
    fn factor(&self, tau: F) -> F;

    /// Derivative `dphi/dtau` of the 1D factor at scaled distance `tau >= 0`
    fn factor_derivative(&self, tau: F) -> F;

    /// Compute correlation values `r(x, x')` given differences `d` between x and x', where:
    /// `d`           : differences (n, nx)
    /// `lengthscale` : lengthscales (1,) or (nx,)
    /// Returns correlations as a (n,) vector
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        lengthscale: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array1<F> {
        let mut r = Array1::ones(d.nrows());
        Zip::from(&mut r).and(d.rows()).for_each(|r_i, d_i| {
            *r_i = d_i
                .iter()
                .enumerate()
                .map(|(j, d_ij)| self.factor(d_ij.abs() / lengthscale_at(lengthscale, j)))
                .fold(F::one(), |acc, v| acc * v);
        });
        r
    }

    /// Compute derivatives of correlation values wrt lengthscale components given
    /// differences `d` (n, nx) and lengthscales (1,) or (nx,).
    /// Returns a (n, nl) matrix where nl is the lengthscale length
    fn lengthscale_gradient(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        lengthscale: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array2<F> {
        let nl = lengthscale.len();
        let mut grad = Array2::zeros((d.nrows(), nl));
        Zip::from(grad.rows_mut())
            .and(d.rows())
            .for_each(|mut grad_i, d_i| {
                let nx = d_i.len();
                let ls = (0..nx)
                    .map(|j| lengthscale_at(lengthscale, j))
                    .collect::<Vec<_>>();
                let taus = (0..nx).map(|j| d_i[j].abs() / ls[j]).collect::<Vec<_>>();
                let phis = taus.iter().map(|t| self.factor(*t)).collect::<Vec<_>>();
                for j in 0..nx {
                    let others = phis
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != j)
                        .fold(F::one(), |acc, (_, v)| acc * *v);
                    // dtau/dl = -tau / l
                    let dj = self.factor_derivative(taus[j]) * (-taus[j] / ls[j]) * others;
                    let k = if nl == 1 { 0 } else { j };
                    grad_i[k] += dj;
                }
            });
        grad
    }
}

fn lengthscale_at<F: Float>(lengthscale: &ArrayBase<impl Data<Elem = F>, Ix1>, j: usize) -> F {
    if lengthscale.len() == 1 {
        lengthscale[0]
    } else {
        lengthscale[j]
    }
}

/// Squared exponential correlation models
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct SquaredExponentialCorr();

impl<F: Float> CorrelationModel<F> for SquaredExponentialCorr {
    /// exp( - tau^2 / 2 )
    fn factor(&self, tau: F) -> F {
        F::exp(F::cast(-0.5) * tau * tau)
    }

    fn factor_derivative(&self, tau: F) -> F {
        -tau * self.factor(tau)
    }
}

/// Absolute exponential correlation models
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct AbsoluteExponentialCorr();

impl<F: Float> CorrelationModel<F> for AbsoluteExponentialCorr {
    /// exp( - tau )
    fn factor(&self, tau: F) -> F {
        F::exp(-tau)
    }

    fn factor_derivative(&self, tau: F) -> F {
        -F::exp(-tau)
    }
}

/// Matern 3/2 correlation model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct Matern32Corr();

impl<F: Float> CorrelationModel<F> for Matern32Corr {
    /// (1 + sqrt(3) * tau) exp( - sqrt(3) * tau )
    fn factor(&self, tau: F) -> F {
        let v = F::cast(3.).sqrt() * tau;
        (F::one() + v) * F::exp(-v)
    }

    fn factor_derivative(&self, tau: F) -> F {
        let sqrt3 = F::cast(3.).sqrt();
        F::cast(-3.) * tau * F::exp(-sqrt3 * tau)
    }
}

/// Matern 5/2 correlation model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct Matern52Corr();

impl<F: Float> CorrelationModel<F> for Matern52Corr {
    /// (1 + sqrt(5) * tau + 5/3 * tau^2) exp( - sqrt(5) * tau )
    fn factor(&self, tau: F) -> F {
        let v = F::cast(5.).sqrt() * tau;
        (F::one() + v + F::cast(5. / 3.) * tau * tau) * F::exp(-v)
    }

    fn factor_derivative(&self, tau: F) -> F {
        let sqrt5 = F::cast(5.).sqrt();
        F::cast(-5. / 3.) * tau * (F::one() + sqrt5 * tau) * F::exp(-sqrt5 * tau)
    }
}

macro_rules! declare_corr_util_impls {
    ($corr:ident) => {
        paste! {
            impl fmt::Display for [<$corr Corr>] {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}", stringify!($corr))
                }
            }

            impl From<[<$corr Corr>]> for String {
                fn from(_item: [<$corr Corr>]) -> String {
                    stringify!($corr).to_string()
                }
            }

            impl TryFrom<String> for [<$corr Corr>] {
                type Error = &'static str;
                fn try_from(s: String) -> Result<Self, Self::Error> {
                    if s == stringify!($corr) {
                        Ok(Self::default())
                    } else {
                        Err(concat!(
                            "Bad string value for ",
                            stringify!([<$corr Corr>]),
                            ", should be '",
                            stringify!($corr),
                            "'"
                        ))
                    }
                }
            }
        }
    };
}

declare_corr_util_impls!(SquaredExponential);
declare_corr_util_impls!(AbsoluteExponential);
declare_corr_util_impls!(Matern32);
declare_corr_util_impls!(Matern52);
