//! Linear algebra helpers used by the GP solvers:
//! Cholesky factorization with jitter retry and preconditioned conjugate gradients
//! over a matrix-free [`LinearOperator`].

use crate::errors::{GpError, Result};
use linfa::Float;
use linfa_linalg::{cholesky::*, norm::*, triangular::*};
use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Data, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Cholesky factorization `A = L L^T` returning the lower triangular factor.
///
/// When the factorization fails the `jitter` value is added to the diagonal and
/// the factorization is retried once. A second failure is reported as a numerical error.
pub fn cholesky_with_jitter<F: Float>(
    a: &ArrayBase<impl Data<Elem = F>, Ix2>,
    jitter: F,
) -> Result<Array2<F>> {
    match a.cholesky() {
        Ok(l) => Ok(l),
        Err(err) => {
            warn!("Cholesky factorization failed ({err}), retry with jitter {jitter}");
            let mut aj = a.to_owned();
            aj.diag_mut().mapv_inplace(|v| v + jitter);
            aj.cholesky_into().map_err(|err| {
                GpError::NumericalError(format!(
                    "Cholesky factorization failed after adding jitter {jitter}: {err}"
                ))
            })
        }
    }
}

/// Solve `L L^T X = B` given the lower triangular Cholesky factor `L`
pub fn cholesky_solve<F: Float>(
    l: &Array2<F>,
    b: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<Array2<F>> {
    let z = l.solve_triangular(b, UPLO::Lower)?;
    Ok(l.t().solve_triangular_into(z, UPLO::Upper)?)
}

/// Solve `L L^T x = b` given the lower triangular Cholesky factor `L`
pub fn cholesky_solve_vec<F: Float>(l: &Array2<F>, b: &ArrayView1<F>) -> Result<Array1<F>> {
    let b = b.to_owned().insert_axis(ndarray::Axis(1));
    Ok(cholesky_solve(l, &b)?.remove_axis(ndarray::Axis(1)))
}

/// `log|A|` given the lower triangular Cholesky factor of A
pub fn cholesky_log_det<F: Float>(l: &Array2<F>) -> F {
    l.diag().mapv(|v| v.ln()).sum() * F::cast(2.)
}

/// A symmetric positive definite operator only known through its matrix-vector product
pub trait LinearOperator<F: Float>: Sync {
    /// Size n of the (n, n) operator
    fn size(&self) -> usize;

    /// Compute `A v`
    fn apply(&self, v: &ArrayView1<F>) -> Array1<F>;
}

impl<F: Float> LinearOperator<F> for Array2<F> {
    fn size(&self) -> usize {
        self.nrows()
    }

    fn apply(&self, v: &ArrayView1<F>) -> Array1<F> {
        self.dot(v)
    }
}

/// An approximation of the inverse of a [`LinearOperator`] used to speed up CG convergence
pub trait Preconditioner<F: Float>: Sync {
    /// Compute `M^-1 r`
    fn precondition(&self, r: &ArrayView1<F>) -> Array1<F>;
}

/// Kind of preconditioner used by structured linear solves
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum PreconditionerKind {
    /// No preconditioning
    Identity,
    /// Inverse of the operator diagonal
    Jacobi,
    /// Woodbury inverse of the low-rank structured covariance
    #[default]
    LowRank,
}

/// No preconditioning
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityPreconditioner;

impl<F: Float> Preconditioner<F> for IdentityPreconditioner {
    fn precondition(&self, r: &ArrayView1<F>) -> Array1<F> {
        r.to_owned()
    }
}

/// Diagonal (Jacobi) preconditioner
#[derive(Clone, Debug)]
pub struct JacobiPreconditioner<F: Float> {
    inv_diag: Array1<F>,
}

impl<F: Float> JacobiPreconditioner<F> {
    /// Preconditioner from the operator diagonal
    pub fn new(diag: &Array1<F>) -> Self {
        JacobiPreconditioner {
            inv_diag: diag.mapv(|v| if v > F::zero() { F::one() / v } else { F::one() }),
        }
    }
}

impl<F: Float> Preconditioner<F> for JacobiPreconditioner<F> {
    fn precondition(&self, r: &ArrayView1<F>) -> Array1<F> {
        &self.inv_diag * r
    }
}

/// Outcome of a conjugate gradients solve
#[derive(Clone, Debug)]
pub struct CgResult<F: Float> {
    /// Last iterate
    pub solution: Array1<F>,
    /// Number of iterations performed
    pub iterations: usize,
    /// Relative residual `||b - A x|| / ||b||` of the solution
    pub residual: F,
    /// Whether the relative residual reached the tolerance
    pub converged: bool,
}

/// Solve `A x = b` with preconditioned conjugate gradients starting from x = 0.
///
/// Iterations stop when the relative residual is below `tol` or after `max_iter` iterations.
/// When not converged, the last iterate (smallest `A`-norm error so far) is returned
/// with a warning.
pub fn conjugate_gradients<F, A, P>(
    op: &A,
    b: &ArrayView1<F>,
    precond: &P,
    tol: F,
    max_iter: usize,
) -> CgResult<F>
where
    F: Float,
    A: LinearOperator<F> + ?Sized,
    P: Preconditioner<F> + ?Sized,
{
    let b_norm = b.norm_l2();
    let mut x = Array1::zeros(b.len());
    if b_norm == F::zero() {
        return CgResult {
            solution: x,
            iterations: 0,
            residual: F::zero(),
            converged: true,
        };
    }

    let mut r = b.to_owned();
    let mut z = precond.precondition(&r.view());
    let mut p = z.clone();
    let mut rz = r.dot(&z);

    let mut residual = F::one();
    let mut iterations = 0;
    let mut converged = false;
    while iterations < max_iter {
        let q = op.apply(&p.view());
        let pq = p.dot(&q);
        if !(pq > F::zero()) {
            debug!("CG breakdown at iteration {iterations} (p^T A p = {pq})");
            break;
        }
        let a = rz / pq;
        x.scaled_add(a, &p);
        r.scaled_add(-a, &q);
        iterations += 1;

        residual = r.norm_l2() / b_norm;
        if residual <= tol {
            converged = true;
            break;
        }
        z = precond.precondition(&r.view());
        let rz_next = r.dot(&z);
        let beta = rz_next / rz;
        p = &z + &(p * beta);
        rz = rz_next;
    }

    if !converged {
        warn!(
            "CG did not converge within {} iterations (relative residual {} > {})",
            iterations, residual, tol
        );
    }
    CgResult {
        solution: x,
        iterations,
        residual,
        converged,
    }
}
