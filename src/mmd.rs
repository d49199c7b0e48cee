//! Loss primitives for the invertible path.
//!
//! `mmd` is a kernel moment-matching discrepancy between two sample batches,
//! built from a sum of inverse multiquadratic kernels. `l2_fit` is the mean
//! squared error used by the fit and reconstruction terms. Both are pure
//! functions over tensors; any gradient detachment happens at the call site.

use candle_core::Tensor;

use crate::error::Result;

/// Kernel bandwidths summed into the multiquadratic kernel.
const KERNEL_BANDWIDTHS: [f64; 3] = [0.2, 1.0, 2.0];

/// Pairwise squared Euclidean distances between the rows of `x` `(n, d)` and
/// `y` `(m, d)`, shape `(n, m)`.
fn pairwise_sq_dists(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    let x_sq = x.sqr()?.sum_keepdim(1)?;
    let y_sq = y.sqr()?.sum_keepdim(1)?.t()?;
    let cross = (x.matmul(&y.t()?)? * 2.0)?;
    Ok(x_sq.broadcast_add(&y_sq)?.broadcast_sub(&cross)?)
}

/// Mean multiquadratic kernel value over all row pairs of `x` and `y`.
fn kernel_mean(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    let dists = pairwise_sq_dists(x, y)?;
    let mut sum: Option<Tensor> = None;
    for c in KERNEL_BANDWIDTHS {
        let k = ((dists.clone() + c)?.recip()? * c)?;
        sum = Some(match sum {
            Some(acc) => (acc + k)?,
            None => k,
        });
    }
    // KERNEL_BANDWIDTHS is nonempty, so sum is always set.
    let sum = sum.ok_or_else(|| candle_core::Error::Msg("no kernel bandwidths".into()))?;
    Ok(sum.mean_all()?)
}

/// Empirical moment-matching discrepancy between batches `x` and `y`.
///
/// `mean(k(x,x)) + mean(k(y,y)) - 2 mean(k(x,y))`. Nonnegative in expectation
/// and zero for identical batches.
///
/// # Errors
/// Returns an error on shape mismatch or tensor failure.
pub fn mmd(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    let kxx = kernel_mean(x, x)?;
    let kyy = kernel_mean(y, y)?;
    let kxy = kernel_mean(x, y)?;
    Ok(((kxx + kyy)? - (kxy * 2.0)?)?)
}

/// Mean squared error between `a` and `b`.
///
/// # Errors
/// Returns an error on shape mismatch.
pub fn l2_fit(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    Ok(candle_nn::loss::mse(a, b)?)
}
