//! This library implements
//! [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) regression
//! with structured kernel interpolation (SKI, also known as
//! [KISS-GP](https://arxiv.org/abs/1503.01057)) and additive kernels.
//!
//! Exact GP inference costs O(N^3) in processing time and O(N^2) in memory where N is the
//! number of training points. With a grid interpolated kernel, the covariance of the training
//! points is approximated as `W K_UU W^T` where `K_UU` is the kernel evaluated on a regular
//! grid of G inducing points and `W` a sparse interpolation matrix. With an additive kernel
//! the grid is one dimensional and shared by all input components, so that linear solves only
//! involve O(N + D G^2) matrix-vector products and a (D G, D G) low-rank factorization.
//!
//! The main components are:
//! * [Kernel]: covariance kernel built as a composition tree,
//! * [mean_models]: zero, constant and linear learnable means,
//! * [GaussianLikelihood]: gaussian observation model with learnable noise,
//! * [ExactGp]: the GP model owning hyperparameters and training data,
//! * [ExactMarginalLogLikelihood]: training objective with analytic gradients,
//! * [ExactGp::train]: Adam optimizer run for a fixed number of iterations,
//! * [GaussianProcess]: the trained model used for predictions, parameterized by [GpParams]
//!   when fitted with the linfa [Fit](linfa::traits::Fit) trait.
//!
//! # Example
//!
//! ```no_run
//! use kissgp::{correlation_models::*, mean_models::*};
//! use kissgp::{ExactGp, GaussianLikelihood, GridSize, Kernel, SolverConfig, TrainingParams};
//! use ndarray::{Array, Array2, Axis};
//!
//! let n = 30;
//! let u = Array::linspace(0., 1., n);
//! let xt = Array2::from_shape_fn((n * n, 2), |(i, j)| if j == 0 { u[i / n] } else { u[i % n] });
//! let yt = xt.map_axis(Axis(1), |row| {
//!     (2. * std::f64::consts::PI * row[0]).sin() + (2. * std::f64::consts::PI * row[1]).cos()
//! });
//!
//! let mut model = ExactGp::new(
//!     ConstantMean::default(),
//!     Kernel::additive_kissgp(SquaredExponentialCorr(), 2, GridSize::Fixed(100)),
//!     GaussianLikelihood::default(),
//!     xt,
//!     yt,
//!     SolverConfig::default(),
//! )
//! .expect("GP model");
//! let report = model.train(&TrainingParams::default()).expect("GP training");
//! println!("losses = {}", report.losses);
//!
//! let gp = model.condition().expect("GP posterior");
//! let xtest = Array2::from_elem((1, 2), 0.5);
//! let (mean, var) = gp.predict_valvar(&xtest).expect("GP prediction");
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
pub mod constraints;
pub mod correlation_models;
mod distributions;
mod errors;
mod interpolation;
mod kernels;
mod likelihood;
pub mod linalg;
pub mod mean_models;
pub mod metrics;
mod mll;
mod model;
mod optimization;
mod parameters;
pub mod ski;
mod training;
mod utils;

pub use algorithm::*;
pub use distributions::*;
pub use errors::*;
pub use interpolation::*;
pub use kernels::{GridForm, Kernel};
pub use likelihood::*;
pub use mll::{ExactMarginalLogLikelihood, MllEvaluation};
pub use model::ExactGp;
pub use optimization::{Adam, AdamState, INTERRUPTED};
pub use parameters::*;
pub use training::{StopReason, TrainingReport};
pub use utils::pairwise_differences;
