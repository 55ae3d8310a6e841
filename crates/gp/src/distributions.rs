//! Multivariate normal distribution returned by GP models and likelihoods.

use crate::errors::{GpError, Result};
use crate::linalg::{cholesky_log_det, cholesky_with_jitter};
use linfa::Float;
use linfa_linalg::{eigh::*, triangular::*};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Multivariate normal distribution `N(mean, covariance)`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct MultivariateNormal<F: Float> {
    mean: Array1<F>,
    covariance: Array2<F>,
}

impl<F: Float> MultivariateNormal<F> {
    /// Constructor given a (n,) mean vector and a (n, n) covariance matrix
    pub fn new(mean: Array1<F>, covariance: Array2<F>) -> Result<Self> {
        if covariance.nrows() != mean.len() || covariance.ncols() != mean.len() {
            return Err(GpError::InvalidValueError(format!(
                "Covariance shape {:?} does not match mean length {}",
                covariance.shape(),
                mean.len()
            )));
        }
        Ok(MultivariateNormal { mean, covariance })
    }

    /// Dimension of the distribution
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Mean vector
    pub fn mean(&self) -> &Array1<F> {
        &self.mean
    }

    /// Covariance matrix
    pub fn covariance(&self) -> &Array2<F> {
        &self.covariance
    }

    /// Marginal variances, clamped at zero
    pub fn variance(&self) -> Array1<F> {
        self.covariance.diag().mapv(|v| v.max(F::zero()))
    }

    /// Two standard deviations below and above the mean
    pub fn confidence_region(&self) -> (Array1<F>, Array1<F>) {
        let std2 = self.variance().mapv(|v| F::cast(2.) * v.sqrt());
        (&self.mean - &std2, &self.mean + &std2)
    }

    /// Log probability density of the given (n,) value, `jitter` is added to the
    /// covariance diagonal if it is not numerically positive definite.
    pub fn log_prob(&self, y: &ArrayBase<impl Data<Elem = F>, Ix1>, jitter: F) -> Result<F> {
        if y.len() != self.dim() {
            return Err(GpError::InvalidValueError(format!(
                "Value length {} does not match distribution dimension {}",
                y.len(),
                self.dim()
            )));
        }
        let l = cholesky_with_jitter(&self.covariance, jitter)?;
        let diff = (y - &self.mean).insert_axis(Axis(1));
        let z = l.solve_triangular_into(diff, UPLO::Lower)?;
        let quad = z.iter().fold(F::zero(), |acc, v| acc + *v * *v);
        let n = F::cast(self.dim());
        Ok(-F::cast(0.5) * (quad + cholesky_log_det(&l) + n * F::cast(std::f64::consts::TAU).ln()))
    }

    /// Draw `n_traj` samples as a (n, n_traj) matrix.
    ///
    /// The covariance square root is computed by eigendecomposition which is more robust than
    /// Cholesky for ill-conditioned covariances: eigenvalues below 1e-9 are ignored.
    pub fn sample<R: Rng>(&self, n_traj: usize, rng: &mut R) -> Result<Array2<F>> {
        let (v, w) = self.covariance.to_owned().eigh_into()?;
        let v = v.mapv(|x| {
            if x < F::cast(1e-9) {
                return F::zero();
            }
            x.sqrt()
        });
        let c = w * &v;
        let ary = Array2::<f64>::random_using((self.dim(), n_traj), StandardNormal, rng)
            .mapv(|v| F::cast(v));
        Ok(c.dot(&ary) + &self.mean.view().insert_axis(Axis(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    #[test]
    fn test_log_prob_diagonal() {
        let mvn = MultivariateNormal::new(array![1., -1.], array![[2., 0.], [0., 0.5]]).unwrap();
        let y = array![2., 0.];
        let expected = -0.5 * (1. / 2. + 1. / 0.5)
            - 0.5 * (2f64 * 0.5).ln()
            - std::f64::consts::TAU.ln();
        assert_abs_diff_eq!(mvn.log_prob(&y, 1e-8).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_bad_shapes() {
        assert!(MultivariateNormal::new(array![1., -1.], Array2::eye(3)).is_err());
        let mvn = MultivariateNormal::new(array![0.], array![[1.]]).unwrap();
        assert!(mvn.log_prob(&array![1., 2.], 0.).is_err());
    }

    #[test]
    fn test_sample_statistics() {
        let cov = array![[1., 0.8], [0.8, 1.]];
        let mvn = MultivariateNormal::new(array![3., -2.], cov.clone()).unwrap();
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let samples = mvn.sample(20000, &mut rng).unwrap();
        assert_eq!(samples.shape(), &[2, 20000]);
        let mean = samples.mean_axis(Axis(1)).unwrap();
        assert_abs_diff_eq!(mean, array![3., -2.], epsilon = 0.05);
        let centered = &samples - &mean.insert_axis(Axis(1));
        let emp_cov = centered.dot(&centered.t()) / 20000.;
        assert_abs_diff_eq!(emp_cov, cov, epsilon = 0.05);
    }

    #[test]
    fn test_confidence_region() {
        let mvn = MultivariateNormal::new(array![0., 1.], array![[4., 0.], [0., -1e-12]]).unwrap();
        let (lower, upper) = mvn.confidence_region();
        assert_abs_diff_eq!(lower, array![-4., 1.]);
        assert_abs_diff_eq!(upper, array![4., 1.]);
    }
}
