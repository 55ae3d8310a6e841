use thiserror::Error;

/// A result type for GP regression algorithm
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when building, training or using a [`GaussianProcess`](crate::GaussianProcess)
#[derive(Error, Debug)]
pub enum GpError {
    /// When LikelihoodComputation computation fails
    #[error("LikelihoodComputation computation error: {0}")]
    LikelihoodComputationError(String),
    #[error(transparent)]
    /// When linear algebra computation fails
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a covariance matrix stays non positive definite even after jitter is added
    #[error("Numerical error: {0}")]
    NumericalError(String),
    #[error(transparent)]
    /// When the hyperparameters optimizer fails
    OptimizerError(#[from] argmin::core::Error),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When error during saving
    #[cfg(feature = "persistent")]
    #[error("Save error: {0}")]
    SaveError(#[from] serde_json::Error),
    /// When error during loading
    #[error("Load IO error")]
    LoadIoError(#[from] std::io::Error),
    /// When error during loading
    #[error("Load error: {0}")]
    LoadError(String),
    /// When error dur to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}

impl GpError {
    /// Recover a [`GpError`] raised inside the objective function from the optimizer error
    /// which wraps it, otherwise keep the optimizer error as is.
    pub(crate) fn from_optimizer(err: argmin::core::Error) -> GpError {
        match err.downcast::<GpError>() {
            Ok(gp_err) => gp_err,
            Err(err) => GpError::OptimizerError(err),
        }
    }
}
