use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::{Array2, ArrayBase, Data, Ix1, Ix2};

/// Computes differences between each element of x and each element of y
/// resulting in a 2d array of shape (nrows(x) * nrows(y), ncols(x));
/// *Panics* if x and y have not the same column numbers
pub fn pairwise_differences<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    assert!(x.ncols() == y.ncols());

    let nx = x.nrows();
    let ny = y.nrows();
    let ncols = x.ncols();
    let mut result = Array2::zeros((nx * ny, ncols));

    for (i, x_row) in x.rows().into_iter().enumerate() {
        for (j, y_row) in y.rows().into_iter().enumerate() {
            let idx = i * ny + j;
            for k in 0..ncols {
                result[[idx, k]] = x_row[k] - y_row[k];
            }
        }
    }

    result
}

/// Returns (min, max) over all the values of the given arrays,
/// `None` when arrays are all empty
pub(crate) fn value_bounds<'a, F: Float + 'a>(
    values: impl IntoIterator<Item = &'a F>,
) -> Option<(F, F)> {
    values.into_iter().fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Check training data consistency: non empty, same number of samples and finite values
pub(crate) fn check_training_data<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(GpError::InvalidValueError(format!(
            "Training inputs should be a non empty (n, nx) matrix, got shape {:?}",
            x.shape()
        )));
    }
    if x.nrows() != y.len() {
        return Err(GpError::InvalidValueError(format!(
            "Number of training inputs ({}) and outputs ({}) should be equal",
            x.nrows(),
            y.len()
        )));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(GpError::InvalidValueError(
            "Training data should only contain finite values".to_string(),
        ));
    }
    Ok(())
}

/// Check prediction inputs are given with the expected number of components
pub(crate) fn check_input_dim<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    nx: usize,
) -> Result<()> {
    if x.ncols() != nx {
        return Err(GpError::InvalidValueError(format!(
            "Input points should have {} components, got {}",
            nx,
            x.ncols()
        )));
    }
    Ok(())
}
