//! A module for metrics to evaluate Gaussian Process models performances:
//! error measures on a test set and Q2 predictive coefficient with cross validation.
//!
//! Q2 follows the definition of the following paper:
//! Marrel, Amandine, and Bertrand Iooss.
//! "Probabilistic surrogate modeling by Gaussian process: A review on recent insights in estimation and validation."
//! Reliability Engineering & System Safety 247 (2024): 110094.

use linfa::dataset::Dataset;
use linfa::{traits::Fit, Float, ParamGuard};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1};

use crate::{correlation_models, mean_models, GaussianProcess, GpError, GpParams, Result};

/// Mean absolute error between predicted and expected values
pub fn mae<F: Float>(
    pred: &ArrayBase<impl Data<Elem = F>, Ix1>,
    expected: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> F {
    (pred - expected).mapv(|v| v.abs()).mean().unwrap_or(F::zero())
}

/// Root mean squared error between predicted and expected values
pub fn rmse<F: Float>(
    pred: &ArrayBase<impl Data<Elem = F>, Ix1>,
    expected: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> F {
    (pred - expected)
        .mapv(|v| v * v)
        .mean()
        .unwrap_or(F::zero())
        .sqrt()
}

/// A trait for Q2 predictive coefficient cross validation score
pub trait PredictScore<F, ER, P, O>
where
    F: Float,
    ER: std::error::Error + From<linfa::error::Error>,
    P: Fit<Array2<F>, Array1<F>, ER, Object = O> + ParamGuard,
{
    /// Return the training data (xt, yt)
    fn training_data(&self) -> &(Array2<F>, Array1<F>);

    /// Return the model parameters
    fn params(&self) -> P;

    /// Predict validation outputs with a model fitted on a training fold
    fn predict_fold(model: &O, x: &Array2<F>) -> std::result::Result<Array1<F>, ER>;

    /// Compute quality metric Q2 with kfold cross validation.
    ///
    /// Fails when a sub model can not be fitted or can not predict its validation fold.
    fn q2_score(&self, kfold: usize) -> std::result::Result<F, ER> {
        let (xt, yt) = self.training_data();
        let dataset = Dataset::new(xt.to_owned(), yt.to_owned());
        let yt_mean = yt.mean().ok_or(linfa::error::Error::NotEnoughSamples)?;
        // Predictive Residual Sum of Squares
        let mut press = F::zero();
        // Total Sum of Squares
        let mut tss = F::zero();
        for (train, valid) in dataset.fold(kfold).into_iter() {
            let model: O = self.params().fit(&train)?;
            let pred = Self::predict_fold(&model, valid.records())?;
            press += (valid.targets() - pred).mapv(|v| v * v).sum();
            tss += (valid.targets() - yt_mean).mapv(|v| v * v).sum();
        }
        Ok(F::one() - press / tss)
    }

    /// Q2 predictive coefficient with Leave-One-Out Cross-Validation
    fn looq2_score(&self) -> std::result::Result<F, ER> {
        self.q2_score(self.training_data().0.nrows())
    }
}

impl<F, Mean, Corr> PredictScore<F, GpError, GpParams<F, Mean, Corr>, Self>
    for GaussianProcess<F, Mean, Corr>
where
    F: Float,
    Mean: mean_models::MeanModel<F>,
    Corr: correlation_models::CorrelationModel<F>,
{
    fn training_data(&self) -> &(Array2<F>, Array1<F>) {
        &self.training_data
    }

    fn params(&self) -> GpParams<F, Mean, Corr> {
        GpParams::from(self.params.clone())
    }

    fn predict_fold(model: &Self, x: &Array2<F>) -> Result<Array1<F>> {
        model.predict(x)
    }
}
