//! Covariance kernels of the GP model, built as an explicit composition tree.
//!
//! A [`Kernel`] is one of:
//! * `Stationary`: a correlation model (see [`crate::correlation_models`]) with lengthscale(s),
//! * `Scale`: an outputscale factor applied to a base kernel,
//! * `Additive`: a sum of the base kernel evaluated on each input component separately,
//!   all components sharing the same base hyperparameters,
//! * `GridInterpolation`: the base kernel evaluated on a regular grid of inducing points
//!   and interpolated at the input points (SKI approximation).
//!
//! The typical additive KISS-GP kernel is `Additive(Scale(GridInterpolation(Stationary)))`,
//! see [`Kernel::additive_kissgp`].
//!
//! Hyperparameters are stored as raw values (see [`crate::constraints`]), they are listed in
//! tree order: for `Scale` the raw outputscale comes first followed by the base parameters.

use crate::constraints::GreaterThan;
use crate::correlation_models::CorrelationModel;
use crate::errors::{GpError, Result};
use crate::interpolation::{GridSize, InterpolationGrid, InterpolationWeights, GRID_MIN_SIZE};
use crate::utils::{pairwise_differences, value_bounds};

use linfa::Float;
use ndarray::{s, Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Data, Ix1, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Covariance kernel tree
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Corr: Serialize",
        deserialize = "F: Deserialize<'de>, Corr: Deserialize<'de>"
    ))
)]
pub enum Kernel<F: Float, Corr: CorrelationModel<F>> {
    /// Stationary correlation model
    Stationary {
        /// correlation shape
        corr: Corr,
        /// raw lengthscales, either one shared value or one per input component
        raw_lengthscale: Array1<F>,
        /// lengthscale constraint
        constraint: GreaterThan<F>,
    },
    /// Outputscale times base kernel
    Scale {
        /// scaled kernel
        base: Box<Kernel<F, Corr>>,
        /// raw outputscale
        raw_outputscale: F,
        /// outputscale constraint
        constraint: GreaterThan<F>,
    },
    /// Sum of the base kernel over the 1D slices of the input
    Additive {
        /// kernel applied to each input component
        base: Box<Kernel<F, Corr>>,
        /// expected input dimension
        num_dims: usize,
    },
    /// Base kernel interpolated from a regular grid of inducing points
    GridInterpolation {
        /// kernel evaluated on the grid
        base: Box<Kernel<F, Corr>>,
        /// grid size policy
        grid_size: GridSize,
        /// grid fitted to the training inputs
        grid: Option<InterpolationGrid<F>>,
    },
}

/// Structured representation of a grid interpolated kernel
/// `K(X, X') = sum_d W_d K_UU W'_d^T` used by the SKI solver
#[derive(Clone, Debug)]
pub struct GridForm<F: Float> {
    /// shared interpolation grid
    pub grid: InterpolationGrid<F>,
    /// number of additive components (1 when no additive structure)
    pub num_dims: usize,
    /// (G, G) kernel values on the grid
    pub kuu: Array2<F>,
    /// derivatives of `kuu` wrt the kernel raw parameters
    pub dkuu: Vec<Array2<F>>,
}

impl<F: Float, Corr: CorrelationModel<F>> Kernel<F, Corr> {
    /// Isotropic stationary kernel, raw lengthscale initialized to 0
    pub fn stationary(corr: Corr) -> Self {
        Kernel::Stationary {
            corr,
            raw_lengthscale: Array1::zeros(1),
            constraint: GreaterThan::positive(),
        }
    }

    /// Stationary kernel with one lengthscale per input component (ARD)
    pub fn stationary_ard(corr: Corr, nx: usize) -> Self {
        Kernel::Stationary {
            corr,
            raw_lengthscale: Array1::zeros(nx.max(1)),
            constraint: GreaterThan::positive(),
        }
    }

    /// Scaled kernel, raw outputscale initialized to 0
    pub fn scale(base: Kernel<F, Corr>) -> Self {
        Kernel::Scale {
            base: Box::new(base),
            raw_outputscale: F::zero(),
            constraint: GreaterThan::positive(),
        }
    }

    /// Additive kernel over `num_dims` input components
    pub fn additive(base: Kernel<F, Corr>, num_dims: usize) -> Self {
        Kernel::Additive {
            base: Box::new(base),
            num_dims,
        }
    }

    /// Grid interpolated kernel
    pub fn grid_interpolation(base: Kernel<F, Corr>, grid_size: GridSize) -> Self {
        Kernel::GridInterpolation {
            base: Box::new(base),
            grid_size,
            grid: None,
        }
    }

    /// `Additive(Scale(GridInterpolation(Stationary(corr))))` kernel
    pub fn additive_kissgp(corr: Corr, num_dims: usize, grid_size: GridSize) -> Self {
        Self::additive(
            Self::scale(Self::grid_interpolation(Self::stationary(corr), grid_size)),
            num_dims,
        )
    }

    /// Set the lengthscale(s) of the stationary kernel of the tree
    pub fn with_lengthscale(mut self, lengthscale: &Array1<F>) -> Result<Self> {
        self.set_lengthscale(lengthscale)?;
        Ok(self)
    }

    /// Set the outputscale of the outermost scale kernel of the tree
    pub fn with_outputscale(mut self, outputscale: F) -> Result<Self> {
        self.set_outputscale(outputscale)?;
        Ok(self)
    }

    /// Set the lengthscale(s) of the stationary kernel of the tree
    pub fn set_lengthscale(&mut self, lengthscale: &Array1<F>) -> Result<()> {
        match self {
            Kernel::Stationary {
                raw_lengthscale,
                constraint,
                ..
            } => {
                if lengthscale.is_empty() {
                    return Err(GpError::InvalidValueError(
                        "Lengthscale should not be empty".to_string(),
                    ));
                }
                let raw = lengthscale
                    .iter()
                    .map(|l| constraint.inverse_transform(*l))
                    .collect::<Result<Vec<_>>>()?;
                *raw_lengthscale = Array1::from(raw);
                Ok(())
            }
            Kernel::Scale { base, .. }
            | Kernel::Additive { base, .. }
            | Kernel::GridInterpolation { base, .. } => base.set_lengthscale(lengthscale),
        }
    }

    /// Set the outputscale of the outermost scale kernel of the tree
    pub fn set_outputscale(&mut self, outputscale: F) -> Result<()> {
        match self {
            Kernel::Scale {
                raw_outputscale,
                constraint,
                ..
            } => {
                *raw_outputscale = constraint.inverse_transform(outputscale)?;
                Ok(())
            }
            Kernel::Additive { base, .. } | Kernel::GridInterpolation { base, .. } => {
                base.set_outputscale(outputscale)
            }
            Kernel::Stationary { .. } => Err(GpError::InvalidValueError(
                "Kernel has no outputscale, wrap it in a scale kernel".to_string(),
            )),
        }
    }

    /// Constrained lengthscale(s) of the stationary kernel of the tree
    pub fn lengthscale(&self) -> Array1<F> {
        match self {
            Kernel::Stationary {
                raw_lengthscale,
                constraint,
                ..
            } => raw_lengthscale.mapv(|v| constraint.transform(v)),
            Kernel::Scale { base, .. }
            | Kernel::Additive { base, .. }
            | Kernel::GridInterpolation { base, .. } => base.lengthscale(),
        }
    }

    /// Constrained outputscale of the outermost scale kernel if any
    pub fn outputscale(&self) -> Option<F> {
        match self {
            Kernel::Scale {
                raw_outputscale,
                constraint,
                ..
            } => Some(constraint.transform(*raw_outputscale)),
            Kernel::Additive { base, .. } | Kernel::GridInterpolation { base, .. } => {
                base.outputscale()
            }
            Kernel::Stationary { .. } => None,
        }
    }

    /// Interpolation grid of the tree if any and fitted
    pub fn grid(&self) -> Option<&InterpolationGrid<F>> {
        match self {
            Kernel::GridInterpolation { grid, .. } => grid.as_ref(),
            Kernel::Scale { base, .. } | Kernel::Additive { base, .. } => base.grid(),
            Kernel::Stationary { .. } => None,
        }
    }

    /// Whether the tree can be handled by the structured (SKI) solver
    pub fn is_structured(&self) -> bool {
        match self {
            Kernel::GridInterpolation { .. } => true,
            Kernel::Scale { base, .. } => base.is_structured(),
            Kernel::Additive { base, .. } => {
                !matches!(**base, Kernel::Additive { .. }) && base.is_structured()
            }
            Kernel::Stationary { .. } => false,
        }
    }

    /// Check the kernel can be applied to inputs with `nx` components
    pub fn check_input_dim(&self, nx: usize) -> Result<()> {
        match self {
            Kernel::Stationary {
                raw_lengthscale, ..
            } => {
                if raw_lengthscale.len() != 1 && raw_lengthscale.len() != nx {
                    Err(GpError::InvalidValueError(format!(
                        "Lengthscale length should be 1 or {} (input dim), got {}",
                        nx,
                        raw_lengthscale.len()
                    )))
                } else {
                    Ok(())
                }
            }
            Kernel::Scale { base, .. } => base.check_input_dim(nx),
            Kernel::Additive { base, num_dims } => {
                if nx != *num_dims {
                    return Err(GpError::InvalidValueError(format!(
                        "Additive kernel expects {num_dims} input components, got {nx}"
                    )));
                }
                base.check_input_dim(1)
            }
            Kernel::GridInterpolation { base, .. } => {
                if nx != 1 {
                    return Err(GpError::InvalidValueError(format!(
                        "Grid interpolation applies to 1D inputs, got {nx} components \
                         (wrap it in an additive kernel)"
                    )));
                }
                base.check_input_dim(1)
            }
        }
    }

    /// Check the grid size policies of the tree
    pub fn check_grid_size(&self) -> Result<()> {
        match self {
            Kernel::Stationary { .. } => Ok(()),
            Kernel::Scale { base, .. } | Kernel::Additive { base, .. } => base.check_grid_size(),
            Kernel::GridInterpolation {
                base, grid_size, ..
            } => {
                match *grid_size {
                    GridSize::Fixed(size) if size < GRID_MIN_SIZE => {
                        return Err(GpError::InvalidValueError(format!(
                            "Grid size should be greater or equal to {GRID_MIN_SIZE}, got {size}"
                        )))
                    }
                    GridSize::Auto { ratio } if !(ratio > 0.) || !ratio.is_finite() => {
                        return Err(GpError::InvalidValueError(format!(
                            "Grid size ratio should be a positive number, got {ratio}"
                        )))
                    }
                    _ => (),
                }
                base.check_grid_size()
            }
        }
    }

    /// Fit interpolation grids of the tree to the given training inputs.
    /// The grid is shared by all additive components and spans all input values.
    pub fn adapt_grid(&mut self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
        self.adapt_grid_view(&x.view())
    }

    fn adapt_grid_view(&mut self, x: &ArrayView2<F>) -> Result<()> {
        match self {
            Kernel::GridInterpolation {
                grid_size, grid, ..
            } => {
                let size = grid_size.resolve(x.nrows(), x.ncols());
                *grid = Some(InterpolationGrid::from_values(x.iter(), size)?);
                Ok(())
            }
            Kernel::Scale { base, .. } | Kernel::Additive { base, .. } => {
                base.adapt_grid_view(x)
            }
            Kernel::Stationary { .. } => Ok(()),
        }
    }

    /// Number of raw hyperparameters
    pub fn n_params(&self) -> usize {
        match self {
            Kernel::Stationary {
                raw_lengthscale, ..
            } => raw_lengthscale.len(),
            Kernel::Scale { base, .. } => 1 + base.n_params(),
            Kernel::Additive { base, .. } | Kernel::GridInterpolation { base, .. } => {
                base.n_params()
            }
        }
    }

    /// Raw hyperparameters in tree order
    pub fn raw_params(&self) -> Array1<F> {
        match self {
            Kernel::Stationary {
                raw_lengthscale, ..
            } => raw_lengthscale.to_owned(),
            Kernel::Scale {
                base,
                raw_outputscale,
                ..
            } => {
                let mut params = vec![*raw_outputscale];
                params.extend(base.raw_params().iter());
                Array1::from(params)
            }
            Kernel::Additive { base, .. } | Kernel::GridInterpolation { base, .. } => {
                base.raw_params()
            }
        }
    }

    /// Set raw hyperparameters given in tree order
    pub fn set_raw_params(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        if params.len() != self.n_params() {
            return Err(GpError::InvalidValueError(format!(
                "Kernel expects {} raw parameters, got {}",
                self.n_params(),
                params.len()
            )));
        }
        self.set_raw_params_view(&params.view());
        Ok(())
    }

    fn set_raw_params_view(&mut self, params: &ArrayView1<F>) {
        match self {
            Kernel::Stationary {
                raw_lengthscale, ..
            } => raw_lengthscale.assign(params),
            Kernel::Scale {
                base,
                raw_outputscale,
                ..
            } => {
                *raw_outputscale = params[0];
                base.set_raw_params_view(&params.slice(s![1..]));
            }
            Kernel::Additive { base, .. } | Kernel::GridInterpolation { base, .. } => {
                base.set_raw_params_view(params)
            }
        }
    }

    /// Kernel matrix K(x1, x2) of shape (n1, n2)
    pub fn evaluate(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        check_same_dim(x1, x2)?;
        self.check_input_dim(x1.ncols())?;
        if x1.nrows() == 0 || x2.nrows() == 0 {
            return Ok(Array2::zeros((x1.nrows(), x2.nrows())));
        }
        self.evaluate_view(&x1.view(), &x2.view())
    }

    fn evaluate_view(&self, x1: &ArrayView2<F>, x2: &ArrayView2<F>) -> Result<Array2<F>> {
        match self {
            Kernel::Stationary {
                corr,
                raw_lengthscale,
                constraint,
            } => {
                let l = raw_lengthscale.mapv(|v| constraint.transform(v));
                let d = pairwise_differences(x1, x2);
                reshape(corr.value(&d, &l), x1.nrows(), x2.nrows())
            }
            Kernel::Scale {
                base,
                raw_outputscale,
                constraint,
            } => {
                let k = base.evaluate_view(x1, x2)?;
                Ok(k * constraint.transform(*raw_outputscale))
            }
            Kernel::Additive { base, num_dims } => {
                let mut k = Array2::zeros((x1.nrows(), x2.nrows()));
                for d in 0..*num_dims {
                    let (x1d, x2d) = (x1.slice(s![.., d..d + 1]), x2.slice(s![.., d..d + 1]));
                    k += &base.evaluate_view(&x1d, &x2d)?;
                }
                Ok(k)
            }
            Kernel::GridInterpolation {
                base,
                grid_size,
                grid,
            } => {
                let grid = current_grid(grid, grid_size, x1, x2)?;
                let kuu = base.evaluate_view(&grid.points().view(), &grid.points().view())?;
                let w1 = grid.weights(&x1.column(0))?;
                let w2 = grid.weights(&x2.column(0))?;
                Ok(interpolate(&w1, &kuu, &w2))
            }
        }
    }

    /// Diagonal of K(x, x) as a (n,) vector
    pub fn diag(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.check_input_dim(x.ncols())?;
        if x.nrows() == 0 {
            return Ok(Array1::zeros(0));
        }
        self.diag_view(&x.view())
    }

    fn diag_view(&self, x: &ArrayView2<F>) -> Result<Array1<F>> {
        match self {
            Kernel::Stationary { .. } => Ok(Array1::ones(x.nrows())),
            Kernel::Scale {
                base,
                raw_outputscale,
                constraint,
            } => Ok(base.diag_view(x)? * constraint.transform(*raw_outputscale)),
            Kernel::Additive { base, num_dims } => {
                let mut diag = Array1::zeros(x.nrows());
                for d in 0..*num_dims {
                    diag += &base.diag_view(&x.slice(s![.., d..d + 1]))?;
                }
                Ok(diag)
            }
            Kernel::GridInterpolation {
                base,
                grid_size,
                grid,
            } => {
                let grid = current_grid(grid, grid_size, x, x)?;
                let kuu = base.evaluate_view(&grid.points().view(), &grid.points().view())?;
                let w = grid.weights(&x.column(0))?;
                let kuu = kuu.view();
                Ok(Array1::from_shape_fn(x.nrows(), |i| {
                    w.row_bilinear(i, &kuu, &w)
                }))
            }
        }
    }

    /// Derivatives of K(x1, x2) wrt each raw hyperparameter, in tree order
    pub fn gradients(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Vec<Array2<F>>> {
        check_same_dim(x1, x2)?;
        self.check_input_dim(x1.ncols())?;
        if x1.nrows() == 0 || x2.nrows() == 0 {
            return Ok(vec![Array2::zeros((x1.nrows(), x2.nrows())); self.n_params()]);
        }
        self.gradients_view(&x1.view(), &x2.view())
    }

    fn gradients_view(&self, x1: &ArrayView2<F>, x2: &ArrayView2<F>) -> Result<Vec<Array2<F>>> {
        match self {
            Kernel::Stationary {
                corr,
                raw_lengthscale,
                constraint,
            } => {
                let l = raw_lengthscale.mapv(|v| constraint.transform(v));
                let d = pairwise_differences(x1, x2);
                let grad = corr.lengthscale_gradient(&d, &l);
                grad.columns()
                    .into_iter()
                    .zip(raw_lengthscale.iter())
                    .map(|(g, raw)| {
                        reshape(g.to_owned() * constraint.derivative(*raw), x1.nrows(), x2.nrows())
                    })
                    .collect()
            }
            Kernel::Scale {
                base,
                raw_outputscale,
                constraint,
            } => {
                let scale = constraint.transform(*raw_outputscale);
                let dscale = constraint.derivative(*raw_outputscale);
                let mut grads = vec![base.evaluate_view(x1, x2)? * dscale];
                grads.extend(base.gradients_view(x1, x2)?.into_iter().map(|g| g * scale));
                Ok(grads)
            }
            Kernel::Additive { base, num_dims } => {
                let mut grads = vec![Array2::zeros((x1.nrows(), x2.nrows())); base.n_params()];
                for d in 0..*num_dims {
                    let (x1d, x2d) = (x1.slice(s![.., d..d + 1]), x2.slice(s![.., d..d + 1]));
                    let gd = base.gradients_view(&x1d, &x2d)?;
                    grads.iter_mut().zip(gd.iter()).for_each(|(g, gd)| *g += gd);
                }
                Ok(grads)
            }
            Kernel::GridInterpolation {
                base,
                grid_size,
                grid,
            } => {
                let grid = current_grid(grid, grid_size, x1, x2)?;
                let points = grid.points();
                let dkuu = base.gradients_view(&points.view(), &points.view())?;
                let w1 = grid.weights(&x1.column(0))?;
                let w2 = grid.weights(&x2.column(0))?;
                Ok(dkuu.iter().map(|dk| interpolate(&w1, dk, &w2)).collect())
            }
        }
    }

    /// Structured form of the kernel when the tree is made of a grid interpolated kernel
    /// possibly wrapped in scale and additive kernels, `None` otherwise or if the grid
    /// is not fitted yet.
    pub fn grid_form(&self) -> Result<Option<GridForm<F>>> {
        match self {
            Kernel::Stationary { .. } => Ok(None),
            Kernel::GridInterpolation {
                base,
                grid: Some(grid),
                ..
            } => {
                let points = grid.points();
                Ok(Some(GridForm {
                    grid: grid.clone(),
                    num_dims: 1,
                    kuu: base.evaluate_view(&points.view(), &points.view())?,
                    dkuu: base.gradients_view(&points.view(), &points.view())?,
                }))
            }
            Kernel::GridInterpolation { grid: None, .. } => Ok(None),
            Kernel::Scale {
                base,
                raw_outputscale,
                constraint,
            } => Ok(base.grid_form()?.map(|form| {
                let scale = constraint.transform(*raw_outputscale);
                let mut dkuu = vec![form.kuu.mapv(|v| v * constraint.derivative(*raw_outputscale))];
                dkuu.extend(form.dkuu.into_iter().map(|dk| dk * scale));
                GridForm {
                    kuu: form.kuu * scale,
                    dkuu,
                    ..form
                }
            })),
            Kernel::Additive { base, num_dims } => Ok(base.grid_form()?.and_then(|form| {
                (form.num_dims == 1).then_some(GridForm {
                    num_dims: *num_dims,
                    ..form
                })
            })),
        }
    }
}

fn check_same_dim<F: Float>(
    x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
    x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<()> {
    if x1.ncols() != x2.ncols() {
        return Err(GpError::InvalidValueError(format!(
            "Kernel inputs should have the same number of components, got {} and {}",
            x1.ncols(),
            x2.ncols()
        )));
    }
    Ok(())
}

fn reshape<F: Float>(values: Array1<F>, n1: usize, n2: usize) -> Result<Array2<F>> {
    values
        .into_shape((n1, n2))
        .map_err(|err| GpError::InvalidValueError(err.to_string()))
}

/// Fitted grid or grid spanning the given inputs when not fitted yet
fn current_grid<F: Float>(
    grid: &Option<InterpolationGrid<F>>,
    grid_size: &GridSize,
    x1: &ArrayView2<F>,
    x2: &ArrayView2<F>,
) -> Result<InterpolationGrid<F>> {
    match grid {
        Some(grid) => Ok(grid.clone()),
        None => {
            let (lower, upper) = value_bounds(x1.iter().chain(x2.iter())).ok_or_else(|| {
                GpError::InvalidValueError("Can not build a grid from empty data".to_string())
            })?;
            let n = x1.nrows().max(x2.nrows());
            InterpolationGrid::new(lower, upper, grid_size.resolve(n, 1))
        }
    }
}

/// Compute `W1 M W2^T`
fn interpolate<F: Float>(
    w1: &InterpolationWeights<F>,
    m: &Array2<F>,
    w2: &InterpolationWeights<F>,
) -> Array2<F> {
    let w1m = w1.dot(m);
    w2.dot(&w1m.t()).reversed_axes()
}

impl<F: Float, Corr: CorrelationModel<F>> fmt::Display for Kernel<F, Corr> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Kernel::Stationary {
                corr,
                raw_lengthscale,
                constraint,
            } => write!(
                f,
                "{}(lengthscale={})",
                corr,
                raw_lengthscale.mapv(|v| constraint.transform(v))
            ),
            Kernel::Scale {
                base,
                raw_outputscale,
                constraint,
            } => write!(
                f,
                "Scale({}, outputscale={})",
                base,
                constraint.transform(*raw_outputscale)
            ),
            Kernel::Additive { base, num_dims } => write!(f, "Additive({base}, dims={num_dims})"),
            Kernel::GridInterpolation { base, grid, .. } => match grid {
                Some(grid) => write!(f, "GridInterpolation({}, grid_size={})", base, grid.size()),
                None => write!(f, "GridInterpolation({base})"),
            },
        }
    }
}

/// Sum over rows of `a ∘ b` products, i.e. `sum_ij a_ij * b_ij`
pub(crate) fn frobenius_dot<F: Float>(a: &Array2<F>, b: &Array2<F>) -> F {
    let mut acc = F::zero();
    Zip::from(a).and(b).for_each(|&x, &y| acc += x * y);
    acc
}
