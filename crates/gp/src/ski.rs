//! Structured kernel interpolation (SKI) solver.
//!
//! With a grid interpolated kernel, the training covariance is
//!
//! `Sigma = W K W^T + noise * I`
//!
//! where `W = [W_1, ..., W_D]` stacks the (n, G) sparse interpolation matrices of the D additive
//! components and `K` is block diagonal with the shared (G, G) grid kernel matrix `K_UU`.
//!
//! * Matrix-vector products with `Sigma` cost O(n + D G^2) and are used by conjugate gradients.
//! * The log-determinant, the trace of `Sigma^-1` and `P = W^T Sigma^-1 W` are computed exactly
//!   from the low-rank factorization `K_UU = S S^T` and the (r, r) matrix
//!   `M = noise * I + S^T W^T W S` where `r = D G`.

use crate::errors::{GpError, Result};
use crate::interpolation::InterpolationWeights;
use crate::kernels::GridForm;
use crate::linalg::{
    cholesky_log_det, cholesky_with_jitter, conjugate_gradients, CgResult, IdentityPreconditioner,
    JacobiPreconditioner, LinearOperator, Preconditioner, PreconditionerKind,
};
use linfa::Float;
use linfa_linalg::{eigh::*, triangular::*};
use ndarray::{s, Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix2};
use rayon::prelude::*;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Training covariance `Sigma = sum_d W_d K_UU W_d^T + noise * I` as a matrix-free operator
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct SkiOperator<F: Float> {
    weights: Vec<InterpolationWeights<F>>,
    kuu: Array2<F>,
    noise: F,
}

impl<F: Float> SkiOperator<F> {
    /// Build the operator of the given kernel structured form at training inputs `x` (n, D)
    pub fn new(
        form: &GridForm<F>,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        noise: F,
    ) -> Result<Self> {
        if x.ncols() != form.num_dims {
            return Err(GpError::InvalidValueError(format!(
                "Structured kernel expects {} input components, got {}",
                form.num_dims,
                x.ncols()
            )));
        }
        let weights = (0..form.num_dims)
            .map(|d| form.grid.weights(&x.column(d)))
            .collect::<Result<Vec<_>>>()?;
        Ok(SkiOperator {
            weights,
            kuu: form.kuu.to_owned(),
            noise,
        })
    }

    /// Number of training points
    pub fn n_points(&self) -> usize {
        self.weights.first().map(|w| w.n_points()).unwrap_or(0)
    }

    /// Number of additive components
    pub fn num_dims(&self) -> usize {
        self.weights.len()
    }

    /// Number of grid points
    pub fn grid_size(&self) -> usize {
        self.kuu.nrows()
    }

    /// Likelihood noise variance
    pub fn noise(&self) -> F {
        self.noise
    }

    /// Kernel matrix on the grid
    pub fn kuu(&self) -> &Array2<F> {
        &self.kuu
    }

    /// Interpolation matrices of the additive components
    pub fn weights(&self) -> &[InterpolationWeights<F>] {
        &self.weights
    }

    /// Compute the (D, G) matrix whose rows are `W_d^T v`
    pub fn interp_t(&self, v: &ArrayView1<F>) -> Array2<F> {
        let mut res = Array2::zeros((self.num_dims(), self.grid_size()));
        res.rows_mut()
            .into_iter()
            .zip(self.weights.iter())
            .for_each(|(mut r, w)| r.assign(&w.t_matvec(v)));
        res
    }

    /// Compute `sum_d W_d u_d` given a (D, G) matrix with rows `u_d`
    pub fn interp(&self, u: &ArrayView2<F>) -> Array1<F> {
        let mut res = Array1::zeros(self.n_points());
        self.weights
            .iter()
            .zip(u.rows())
            .for_each(|(w, u_d)| res += &w.matvec(&u_d));
        res
    }

    /// Diagonal of `Sigma`
    pub fn diag(&self) -> Array1<F> {
        let kuu = self.kuu.view();
        Array1::from_shape_fn(self.n_points(), |i| {
            self.weights
                .iter()
                .fold(self.noise, |acc, w| acc + w.row_bilinear(i, &kuu, w))
        })
    }
}

impl<F: Float> LinearOperator<F> for SkiOperator<F> {
    fn size(&self) -> usize {
        self.n_points()
    }

    fn apply(&self, v: &ArrayView1<F>) -> Array1<F> {
        // K_UU is symmetric: rows of (W^T v) K_UU are K_UU W_d^T v
        let u = self.interp_t(v).dot(&self.kuu);
        let mut res = self.interp(&u.view());
        res.scaled_add(self.noise, v);
        res
    }
}

/// Low-rank factorization of the structured training covariance
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct SkiFactorization<F: Float> {
    /// (G, G) square root of K_UU
    s: Array2<F>,
    /// (r, r) Gram matrix `W^T W`
    gram: Array2<F>,
    /// (r, r) Cholesky factor of `noise * I + S^T W^T W S`
    m_chol: Array2<F>,
    noise: F,
    n_points: usize,
}

impl<F: Float> SkiFactorization<F> {
    /// Factorize the given operator, `jitter` is used if `M` is not numerically positive definite
    pub fn new(op: &SkiOperator<F>, jitter: F) -> Result<Self> {
        let (eigvals, q) = op.kuu.to_owned().eigh_into()?;
        // clamp round-off negative eigenvalues
        let s = q * &eigvals.mapv(|v| v.max(F::zero()).sqrt());

        let (nd, g) = (op.num_dims(), op.grid_size());
        let r = nd * g;
        let mut gram = Array2::zeros((r, r));
        for d in 0..nd {
            for e in d..nd {
                let block = op.weights[d].t_dot(&op.weights[e]);
                if e != d {
                    gram.slice_mut(s![e * g..(e + 1) * g, d * g..(d + 1) * g])
                        .assign(&block.t());
                }
                gram.slice_mut(s![d * g..(d + 1) * g, e * g..(e + 1) * g])
                    .assign(&block);
            }
        }

        let s_blk = block_diag(&s, nd);
        let mut m = s_blk.t().dot(&gram).dot(&s_blk);
        m.diag_mut().mapv_inplace(|v| v + op.noise);
        let m_chol = cholesky_with_jitter(&m, jitter)?;

        Ok(SkiFactorization {
            s,
            gram,
            m_chol,
            noise: op.noise,
            n_points: op.n_points(),
        })
    }

    fn rank(&self) -> usize {
        self.m_chol.nrows()
    }

    fn num_dims(&self) -> usize {
        self.rank() / self.s.nrows()
    }

    /// `log|Sigma| = (n - r) log(noise) + log|M|`
    pub fn log_det(&self) -> F {
        let n = F::cast(self.n_points);
        let r = F::cast(self.rank());
        (n - r) * self.noise.ln() + cholesky_log_det(&self.m_chol)
    }

    /// `tr(Sigma^-1) = (n - r + noise * tr(M^-1)) / noise`
    pub fn inv_trace(&self) -> Result<F> {
        let l_inv = self
            .m_chol
            .solve_triangular(&Array2::eye(self.rank()), UPLO::Lower)?;
        let tr_m_inv = l_inv.iter().fold(F::zero(), |acc, v| acc + *v * *v);
        let n = F::cast(self.n_points);
        let r = F::cast(self.rank());
        Ok((n - r + self.noise * tr_m_inv) / self.noise)
    }

    /// (r, r) matrix `P = W^T Sigma^-1 W = (A - T^T T) / noise`
    /// where `A = W^T W` and `T = L_M^-1 S^T A`
    pub fn p_matrix(&self) -> Result<Array2<F>> {
        let s_blk = block_diag(&self.s, self.num_dims());
        let sta = s_blk.t().dot(&self.gram);
        let t = self.m_chol.solve_triangular_into(sta, UPLO::Lower)?;
        Ok((&self.gram - &t.t().dot(&t)) / self.noise)
    }

    /// Woodbury solve `Sigma^-1 v = (v - U M^-1 U^T v) / noise` with `U = W S`
    pub fn solve(&self, op: &SkiOperator<F>, v: &ArrayView1<F>) -> Result<Array1<F>> {
        let g = self.s.nrows();
        let wtv = op.interp_t(v);
        let ut_v = wtv.dot(&self.s).into_shape(self.rank()).map_err(|err| {
            GpError::InvalidValueError(err.to_string())
        })?;
        let z = self
            .m_chol
            .solve_triangular_into(ut_v.insert_axis(Axis(1)), UPLO::Lower)?;
        let z = self.m_chol.t().solve_triangular_into(z, UPLO::Upper)?;
        let z = z
            .into_shape((self.num_dims(), g))
            .map_err(|err| GpError::InvalidValueError(err.to_string()))?;
        // rows of z S^T are S z_d
        let u_z = op.interp(&z.dot(&self.s.t()).view());
        Ok((v.to_owned() - u_z) / self.noise)
    }
}

/// Low-rank (Woodbury) preconditioner of the structured covariance
pub struct LowRankPreconditioner<'a, F: Float> {
    op: &'a SkiOperator<F>,
    factorization: &'a SkiFactorization<F>,
}

impl<'a, F: Float> LowRankPreconditioner<'a, F> {
    /// Preconditioner of `op` from its factorization
    pub fn new(op: &'a SkiOperator<F>, factorization: &'a SkiFactorization<F>) -> Self {
        LowRankPreconditioner { op, factorization }
    }
}

impl<F: Float> Preconditioner<F> for LowRankPreconditioner<'_, F> {
    fn precondition(&self, r: &ArrayView1<F>) -> Array1<F> {
        // fall back to the noise scaling if the triangular solves fail
        self.factorization
            .solve(self.op, r)
            .unwrap_or_else(|_| r.mapv(|v| v / self.op.noise))
    }
}

/// Solve `Sigma x = b` by conjugate gradients with the given preconditioner kind
pub fn solve_cg<F: Float>(
    op: &SkiOperator<F>,
    factorization: &SkiFactorization<F>,
    b: &ArrayView1<F>,
    kind: PreconditionerKind,
    tol: F,
    max_iter: usize,
) -> CgResult<F> {
    match kind {
        PreconditionerKind::Identity => {
            conjugate_gradients(op, b, &IdentityPreconditioner, tol, max_iter)
        }
        PreconditionerKind::Jacobi => {
            conjugate_gradients(op, b, &JacobiPreconditioner::new(&op.diag()), tol, max_iter)
        }
        PreconditionerKind::LowRank => conjugate_gradients(
            op,
            b,
            &LowRankPreconditioner::new(op, factorization),
            tol,
            max_iter,
        ),
    }
}

/// Block diagonal (D G, D G) matrix with `num_dims` copies of `block`
pub(crate) fn block_diag<F: Float>(block: &Array2<F>, num_dims: usize) -> Array2<F> {
    let g = block.nrows();
    let mut res = Array2::zeros((num_dims * g, num_dims * g));
    for d in 0..num_dims {
        res.slice_mut(s![d * g..(d + 1) * g, d * g..(d + 1) * g])
            .assign(block);
    }
    res
}

/// Predictive variance cache `R = K - K P K` where K is the block diagonal grid kernel
pub fn variance_cache<F: Float>(kuu: &Array2<F>, p: &Array2<F>) -> Array2<F> {
    let nd = p.nrows() / kuu.nrows();
    let k_blk = block_diag(kuu, nd);
    &k_blk - &k_blk.dot(p).dot(&k_blk)
}

/// Predictive covariance `sum_{d,e} W*_d R_de W*_e^T` given the interpolation matrices
/// of the test points and the variance cache R
pub fn interpolated_covariance<F: Float>(
    test_weights: &[InterpolationWeights<F>],
    cache: &Array2<F>,
) -> Array2<F> {
    let g = cache.nrows() / test_weights.len().max(1);
    let n = test_weights.first().map(|w| w.n_points()).unwrap_or(0);
    let mut cov = Array2::zeros((n, n));
    for (d, wd) in test_weights.iter().enumerate() {
        for (e, we) in test_weights.iter().enumerate() {
            let block = cache.slice(s![d * g..(d + 1) * g, e * g..(e + 1) * g]);
            let wr = wd.dot(&block);
            cov += &we.dot(&wr.t()).reversed_axes();
        }
    }
    cov
}

/// Diagonal of [`interpolated_covariance`]
pub fn interpolated_variances<F: Float>(
    test_weights: &[InterpolationWeights<F>],
    cache: &Array2<F>,
) -> Array1<F> {
    let g = cache.nrows() / test_weights.len().max(1);
    let n = test_weights.first().map(|w| w.n_points()).unwrap_or(0);
    let variances: Vec<F> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut acc = F::zero();
            for (d, wd) in test_weights.iter().enumerate() {
                for (e, we) in test_weights.iter().enumerate() {
                    let block = cache.slice(s![d * g..(d + 1) * g, e * g..(e + 1) * g]);
                    acc += wd.row_bilinear(i, &block, we);
                }
            }
            acc
        })
        .collect();
    Array1::from(variances)
}

/// Predictive variances computed with one CG solve per test point:
/// `var_i = k(x_i, x_i) - k_i^T Sigma^-1 k_i` with `k_i = sum_d W_d K_UU w*_{d,i}`
pub fn exact_variances<F: Float>(
    op: &SkiOperator<F>,
    factorization: &SkiFactorization<F>,
    test_weights: &[InterpolationWeights<F>],
    kind: PreconditionerKind,
    tol: F,
    max_iter: usize,
) -> Array1<F> {
    let n = test_weights.first().map(|w| w.n_points()).unwrap_or(0);
    let kuu = op.kuu.view();
    let variances: Vec<F> = (0..n)
        .into_par_iter()
        .map(|i| {
            let prior = test_weights.iter().fold(F::zero(), |acc, w| {
                acc + w.row_bilinear(i, &kuu, w)
            });
            // rows K_UU w*_{d,i}
            let mut u = Array2::zeros((op.num_dims(), op.grid_size()));
            for (mut u_d, w) in u.rows_mut().into_iter().zip(test_weights.iter()) {
                for (&k, &wk) in w.indices().row(i).iter().zip(w.values().row(i).iter()) {
                    u_d.scaled_add(wk, &kuu.row(k));
                }
            }
            let k_i = op.interp(&u.view());
            let cg = solve_cg(op, factorization, &k_i.view(), kind, tol, max_iter);
            prior - k_i.dot(&cg.solution)
        })
        .collect();
    Array1::from(variances)
}
