//! Bulk inner products of normalized columns.

use ndarray::linalg::general_mat_mul;
use ndarray::{ArrayView2, ArrayViewMut2};

/// Dense matrix products used for the bulk pass.
///
/// Both operations overwrite `out` completely. Inputs hold one normalized
/// column per column, so `out[[i, j]]` is the correlation estimate of the
/// pair `(i, j)`.
pub trait DenseProduct: Sync {
    /// `out = aᵀ a`. Callers only read the lower triangle.
    fn symmetric_rank_update(&self, a: ArrayView2<f64>, out: ArrayViewMut2<f64>);

    /// `out = aᵀ b`.
    fn general_product(&self, a: ArrayView2<f64>, b: ArrayView2<f64>, out: ArrayViewMut2<f64>);
}

/// Products through `ndarray::linalg::general_mat_mul` (matrixmultiply, or
/// BLAS when ndarray is built with it).
#[derive(Copy, Clone, Debug, Default)]
pub struct NdarrayProduct;

impl DenseProduct for NdarrayProduct {
    fn symmetric_rank_update(&self, a: ArrayView2<f64>, mut out: ArrayViewMut2<f64>) {
        general_mat_mul(1.0, &a.t(), &a, 0.0, &mut out);
    }

    fn general_product(&self, a: ArrayView2<f64>, b: ArrayView2<f64>, mut out: ArrayViewMut2<f64>) {
        general_mat_mul(1.0, &a.t(), &b, 0.0, &mut out);
    }
}
