//! Structured kernel interpolation (SKI) building blocks.
//!
//! Input coordinates are mapped onto a regular 1D grid of inducing points using
//! cubic convolution interpolation (Keys kernel with `a = -0.5`): each point gets
//! 4 non-zero weights on its nearest grid nodes. The (n, G) sparse interpolation matrix `W`
//! allows to approximate a kernel matrix as `K(X, X') ~ W K_UU W'^T` where `K_UU` is the
//! kernel evaluated on the grid.

use crate::errors::{GpError, Result};
use crate::utils::value_bounds;
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Data, Ix1, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Number of non zero interpolation weights per point
pub const N_INTERP: usize = 4;
/// Minimal valid grid size
pub const GRID_MIN_SIZE: usize = 4;
/// Relative margin added on each side of the data range when a grid is fitted to data
pub const GRID_MARGIN: f64 = 0.2;
/// Bounds of the grid size chosen by [`GridSize::Auto`] policy
pub const GRID_AUTO_SIZE_BOUNDS: (usize, usize) = (5, 1024);

/// Policy used to choose the number of inducing points of the interpolation grid
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum GridSize {
    /// Given number of grid points
    Fixed(usize),
    /// Grid size computed from the training data as `ceil(ratio * n^(1/nx))`
    /// where n is the number of training points and nx the input dimension,
    /// bounded by [`GRID_AUTO_SIZE_BOUNDS`].
    Auto {
        /// Multiplicative factor of the size heuristic
        ratio: f64,
    },
}

impl Default for GridSize {
    fn default() -> Self {
        GridSize::Auto { ratio: 1.0 }
    }
}

impl GridSize {
    /// Grid size to use for `n_samples` training points of dimension `n_dims`
    pub fn resolve(&self, n_samples: usize, n_dims: usize) -> usize {
        match *self {
            GridSize::Fixed(size) => size,
            GridSize::Auto { ratio } => {
                let g = ratio * (n_samples.max(1) as f64).powf(1. / n_dims.max(1) as f64);
                // guard against powf round-off on exact powers
                let g = (g - g * 16. * f64::EPSILON).ceil().max(0.) as usize;
                g.clamp(GRID_AUTO_SIZE_BOUNDS.0, GRID_AUTO_SIZE_BOUNDS.1)
            }
        }
    }
}

/// Cubic convolution interpolation kernel
fn cubic_kernel<F: Float>(s: F) -> F {
    let s = s.abs();
    let s2 = s * s;
    let s3 = s2 * s;
    if s <= F::one() {
        F::cast(1.5) * s3 - F::cast(2.5) * s2 + F::one()
    } else if s < F::cast(2.) {
        F::cast(-0.5) * s3 + F::cast(2.5) * s2 - F::cast(4.) * s + F::cast(2.)
    } else {
        F::zero()
    }
}

/// A regular 1D grid of inducing points.
///
/// The `size` nodes are `g_k = lower + (k - 1) * h` for k in 0..size, with spacing
/// `h = (upper - lower) / (size - 3)` so that interior nodes 1..size-2 span `[lower, upper]`
/// and every point of that interval has 4 interpolation nodes.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct InterpolationGrid<F: Float> {
    lower: F,
    upper: F,
    size: usize,
}

impl<F: Float> InterpolationGrid<F> {
    /// Constructor of a grid covering `[lower, upper]` with `size` nodes
    pub fn new(lower: F, upper: F, size: usize) -> Result<Self> {
        if size < GRID_MIN_SIZE {
            return Err(GpError::InvalidValueError(format!(
                "Interpolation grid size should be greater or equal to {GRID_MIN_SIZE}, got {size}"
            )));
        }
        if !lower.is_finite() || !upper.is_finite() || lower > upper {
            return Err(GpError::InvalidValueError(format!(
                "Interpolation grid bounds should be finite with lower <= upper, \
                 got [{lower}, {upper}]"
            )));
        }
        Ok(InterpolationGrid { lower, upper, size })
    }

    /// Constructor of a grid covering all the given values, the range being extended
    /// by [`GRID_MARGIN`] times its width on each side
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a F>, size: usize) -> Result<Self>
    where
        F: 'a,
    {
        let (lower, upper) = value_bounds(values).ok_or_else(|| {
            GpError::InvalidValueError("Can not build a grid from empty data".to_string())
        })?;
        let margin = F::cast(GRID_MARGIN) * (upper - lower);
        Self::new(lower - margin, upper + margin, size)
    }

    /// Number of grid nodes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Interval `[lower, upper]` covered by interpolation
    pub fn bounds(&self) -> (F, F) {
        (self.lower, self.upper)
    }

    /// Distance between consecutive nodes, unit spacing for a degenerated interval
    pub fn spacing(&self) -> F {
        if self.upper > self.lower {
            (self.upper - self.lower) / F::cast(self.size - 3)
        } else {
            F::one()
        }
    }

    /// Location of the first node
    fn origin(&self) -> F {
        self.lower - self.spacing()
    }

    /// Grid nodes as a (size,) vector
    pub fn nodes(&self) -> Array1<F> {
        let h = self.spacing();
        let g0 = self.origin();
        Array1::from_shape_fn(self.size, |k| g0 + F::cast(k) * h)
    }

    /// Grid nodes as a (size, 1) matrix of points
    pub fn points(&self) -> Array2<F> {
        self.nodes().insert_axis(ndarray::Axis(1))
    }

    fn tolerance(&self) -> F {
        F::cast(1e-8) * (F::one() + self.upper.abs().max(self.lower.abs()))
    }

    /// Whether the given value can be interpolated on the grid
    pub fn contains(&self, x: F) -> bool {
        let tol = self.tolerance();
        x >= self.lower - tol && x <= self.upper + tol
    }

    /// Compute the sparse interpolation weights of the given values
    pub fn weights(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<InterpolationWeights<F>> {
        if let Some(v) = x.iter().find(|v| !self.contains(**v)) {
            return Err(GpError::InvalidValueError(format!(
                "Value {} is out of the interpolation grid bounds [{}, {}]",
                v, self.lower, self.upper
            )));
        }
        let n = x.len();
        let mut indices = Array2::<usize>::zeros((n, N_INTERP));
        let mut values = Array2::<F>::zeros((n, N_INTERP));
        let h = self.spacing();
        let g0 = self.origin();
        let max_base = self.size - 3;
        Zip::from(indices.rows_mut())
            .and(values.rows_mut())
            .and(x)
            .par_for_each(|mut idx, mut w, &xi| {
                let xi = xi.max(self.lower).min(self.upper);
                let t = (xi - g0) / h;
                let base = t.floor().to_usize().unwrap_or(1).clamp(1, max_base);
                for m in 0..N_INTERP {
                    let k = base + m - 1;
                    idx[m] = k;
                    w[m] = cubic_kernel(t - F::cast(k));
                }
            });
        Ok(InterpolationWeights {
            indices,
            values,
            grid_size: self.size,
        })
    }
}

/// Sparse (n, G) interpolation matrix with 4 non zero values per row
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct InterpolationWeights<F: Float> {
    indices: Array2<usize>,
    values: Array2<F>,
    grid_size: usize,
}

impl<F: Float> InterpolationWeights<F> {
    /// Number of interpolated points (rows of W)
    pub fn n_points(&self) -> usize {
        self.indices.nrows()
    }

    /// Number of grid nodes (columns of W)
    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    /// Grid node indices (n, 4)
    pub fn indices(&self) -> &Array2<usize> {
        &self.indices
    }

    /// Interpolation weights (n, 4)
    pub fn values(&self) -> &Array2<F> {
        &self.values
    }

    /// Compute `W u` where u is a (G,) vector
    pub fn matvec(&self, u: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Array1<F> {
        let mut res = Array1::zeros(self.n_points());
        Zip::from(&mut res)
            .and(self.indices.rows())
            .and(self.values.rows())
            .for_each(|r, idx, w| {
                *r = idx
                    .iter()
                    .zip(w.iter())
                    .fold(F::zero(), |acc, (&k, &wk)| acc + wk * u[k]);
            });
        res
    }

    /// Compute `W^T v` where v is a (n,) vector
    pub fn t_matvec(&self, v: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Array1<F> {
        let mut res = Array1::zeros(self.grid_size);
        Zip::from(self.indices.rows())
            .and(self.values.rows())
            .and(v)
            .for_each(|idx, w, &vi| {
                idx.iter()
                    .zip(w.iter())
                    .for_each(|(&k, &wk)| res[k] += wk * vi);
            });
        res
    }

    /// Compute `W M` where M is a (G, m) matrix
    pub fn dot(&self, m: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        let m = m.view();
        let mut res = Array2::zeros((self.n_points(), m.ncols()));
        Zip::from(res.rows_mut())
            .and(self.indices.rows())
            .and(self.values.rows())
            .par_for_each(|mut r, idx, w| {
                idx.iter()
                    .zip(w.iter())
                    .for_each(|(&k, &wk)| r.scaled_add(wk, &m.row(k)));
            });
        res
    }

    /// Compute the (G, G') matrix `W^T W_other` where both matrices interpolate the same points
    pub fn t_dot(&self, other: &InterpolationWeights<F>) -> Array2<F> {
        assert_eq!(self.n_points(), other.n_points());
        let mut res = Array2::zeros((self.grid_size, other.grid_size));
        Zip::from(self.indices.rows())
            .and(self.values.rows())
            .and(other.indices.rows())
            .and(other.values.rows())
            .for_each(|idx, w, oidx, ow| {
                for (&p, &wp) in idx.iter().zip(w.iter()) {
                    for (&q, &wq) in oidx.iter().zip(ow.iter()) {
                        res[[p, q]] += wp * wq;
                    }
                }
            });
        res
    }

    /// Compute `w_i^T M w'_i` for the ith row of W and the ith row of `other`
    pub fn row_bilinear(&self, i: usize, m: &ArrayView2<F>, other: &InterpolationWeights<F>) -> F {
        let mut acc = F::zero();
        for (&p, &wp) in self.indices.row(i).iter().zip(self.values.row(i).iter()) {
            for (&q, &wq) in other.indices.row(i).iter().zip(other.values.row(i).iter()) {
                acc += wp * m[[p, q]] * wq;
            }
        }
        acc
    }

    /// Dense (n, G) matrix
    pub fn to_dense(&self) -> Array2<F> {
        let mut res = Array2::zeros((self.n_points(), self.grid_size));
        Zip::from(res.rows_mut())
            .and(self.indices.rows())
            .and(self.values.rows())
            .for_each(|mut r, idx, w| {
                idx.iter()
                    .zip(w.iter())
                    .for_each(|(&k, &wk)| r[k] += wk);
            });
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};

    #[test]
    fn test_grid_nodes() {
        let grid = InterpolationGrid::new(0., 1., 13).unwrap();
        assert_abs_diff_eq!(grid.spacing(), 0.1);
        let nodes = grid.nodes();
        assert_abs_diff_eq!(nodes[0], -0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(nodes[1], 0., epsilon = 1e-12);
        assert_abs_diff_eq!(nodes[11], 1., epsilon = 1e-12);
        assert_abs_diff_eq!(nodes[12], 1.1, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_grid() {
        assert!(InterpolationGrid::new(0., 1., 3).is_err());
        assert!(InterpolationGrid::new(1., 0., 10).is_err());
        assert!(InterpolationGrid::new(0., f64::NAN, 10).is_err());
        let empty: Vec<f64> = vec![];
        assert!(InterpolationGrid::from_values(empty.iter(), 10).is_err());
    }

    #[test]
    fn test_partition_of_unity() {
        let grid = InterpolationGrid::new(-2., 3., 20).unwrap();
        let x = Array::linspace(-2., 3., 57);
        let w = grid.weights(&x).unwrap();
        let sums = w.values().sum_axis(ndarray::Axis(1));
        assert_abs_diff_eq!(sums, Array1::ones(57), epsilon = 1e-12);
    }

    #[test]
    fn test_exact_on_nodes() {
        let grid = InterpolationGrid::new(0., 1., 13).unwrap();
        let nodes = grid.nodes();
        let interior = nodes.slice(ndarray::s![1..12]).to_owned();
        let w = grid.weights(&interior).unwrap().to_dense();
        for (i, row) in w.rows().into_iter().enumerate() {
            assert_abs_diff_eq!(row[i + 1], 1., epsilon = 1e-12);
            assert_abs_diff_eq!(row.sum(), 1., epsilon = 1e-12);
        }
    }

    #[test]
    fn test_reproduce_quadratic() {
        // cubic convolution reproduces polynomials up to degree 2 away from boundaries
        let grid = InterpolationGrid::new(0., 1., 30).unwrap();
        let u = grid.nodes().mapv(|v| 3. * v * v - v + 0.5);
        let x = array![0.23, 0.5, 0.618, 0.77];
        let w = grid.weights(&x).unwrap();
        assert_abs_diff_eq!(
            w.matvec(&u),
            x.mapv(|v| 3. * v * v - v + 0.5),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_out_of_bounds() {
        let grid = InterpolationGrid::new(0., 1., 10).unwrap();
        assert!(grid.weights(&array![0.5, 1.2]).is_err());
        assert!(grid.weights(&array![1. + 1e-12, -1e-12]).is_ok());
    }

    #[test]
    fn test_grid_margin() {
        let grid = InterpolationGrid::from_values([0., 0.5, 1.].iter(), 20).unwrap();
        let (lower, upper) = grid.bounds();
        assert_abs_diff_eq!(lower, -GRID_MARGIN, epsilon = 1e-12);
        assert_abs_diff_eq!(upper, 1. + GRID_MARGIN, epsilon = 1e-12);
        // unseen points near the data range can be interpolated
        let w = grid.weights(&array![-0.1, 1.15]).unwrap();
        assert_abs_diff_eq!(w.values().sum_axis(ndarray::Axis(1)), array![1., 1.], epsilon = 1e-12);
        assert!(grid.weights(&array![1.5]).is_err());
    }

    #[test]
    fn test_degenerated_grid() {
        let grid = InterpolationGrid::from_values([2.5, 2.5].iter(), 6).unwrap();
        assert_abs_diff_eq!(grid.spacing(), 1.);
        let w = grid.weights(&array![2.5]).unwrap().to_dense();
        assert_abs_diff_eq!(w, array![[0., 1., 0., 0., 0., 0.]], epsilon = 1e-12);
    }

    #[test]
    fn test_sparse_products() {
        let grid = InterpolationGrid::new(0., 2., 9).unwrap();
        let x = array![0.1, 0.45, 1.3, 1.99, 0.7];
        let w = grid.weights(&x).unwrap();
        let dense = w.to_dense();
        let u = Array::linspace(1., 2., 9);
        let v = array![1., -2., 0.5, 3., 1.5];
        assert_abs_diff_eq!(w.matvec(&u), dense.dot(&u), epsilon = 1e-12);
        assert_abs_diff_eq!(w.t_matvec(&v), dense.t().dot(&v), epsilon = 1e-12);
        let m = Array2::from_shape_fn((9, 3), |(i, j)| (i + 2 * j) as f64 * 0.1);
        assert_abs_diff_eq!(w.dot(&m), dense.dot(&m), epsilon = 1e-12);

        let other = grid.weights(&array![1.2, 0.3, 0.9, 0.05, 1.5]).unwrap();
        let odense = other.to_dense();
        assert_abs_diff_eq!(w.t_dot(&other), dense.t().dot(&odense), epsilon = 1e-12);
        let k = Array2::from_shape_fn((9, 9), |(i, j)| 1. / (1. + (i as f64 - j as f64).abs()));
        let full = dense.dot(&k).dot(&odense.t());
        for i in 0..5 {
            assert_abs_diff_eq!(
                w.row_bilinear(i, &k.view(), &other),
                full[[i, i]],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_grid_size_policy() {
        assert_eq!(GridSize::Fixed(42).resolve(10000, 2), 42);
        assert_eq!(GridSize::default().resolve(10000, 2), 100);
        assert_eq!(GridSize::Auto { ratio: 1.0 }.resolve(100, 1), 100);
        assert_eq!(GridSize::Auto { ratio: 2.0 }.resolve(1000, 3), 20);
        assert_eq!(GridSize::default().resolve(1, 2), GRID_AUTO_SIZE_BOUNDS.0);
        assert_eq!(GridSize::default().resolve(1_000_000, 1), GRID_AUTO_SIZE_BOUNDS.1);
    }
}
