//! Column normalization.
//!
//! Each routine turns one raw column into a vector whose plain dot product
//! with another prepared column is the correlation of the two sources.
//! Missing positions are written as zero.

use crate::error::{try_filled, CorError};
use crate::options::ZeroMadFallback;
use crate::select::{median, quantile};
use ndarray::ArrayView1;

const REF_UX: f64 = 0.5;

/// What column preparation learned about one column.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Number of missing observations (value or weight NaN).
    pub n_na: usize,
    /// The normalized vector is undefined; every cell touching the column is NA.
    pub degenerate: bool,
    /// Median absolute deviation was zero (bicor only).
    pub zero_mad: bool,
}

impl ColumnMeta {
    fn degenerate(n_na: usize) -> Self {
        ColumnMeta {
            n_na,
            degenerate: true,
            zero_mad: false,
        }
    }
}

/// Working space for [`prepare_col_bicor`]; one per worker.
pub struct BicorScratch {
    aux: Vec<f64>,
    aux2: Vec<f64>,
}

impl BicorScratch {
    pub fn new(n_rows: usize) -> Result<Self, CorError> {
        Ok(BicorScratch {
            aux: try_filled(n_rows, 0.0, "bicor scratch")?,
            aux2: try_filled(n_rows, 0.0, "bicor scratch")?,
        })
    }
}

#[derive(Copy, Clone, Debug)]
pub struct BicorParams {
    pub max_p_outliers: f64,
    pub fallback: ZeroMadFallback,
    pub cosine: bool,
}

/// How the columns of one matrix are prepared during a phase.
#[derive(Copy, Clone, Debug)]
pub(crate) enum ColumnMethod {
    Pearson { cosine: bool },
    WeightedPearson { cosine: bool },
    Bicor(BicorParams),
}

impl ColumnMethod {
    /// Per-worker state for preparing columns of `n_rows` rows.
    pub(crate) fn preparer(self, n_rows: usize) -> Result<ColumnPreparer, CorError> {
        Ok(match self {
            ColumnMethod::Pearson { cosine } => ColumnPreparer::Pearson { cosine },
            ColumnMethod::WeightedPearson { cosine } => ColumnPreparer::WeightedPearson { cosine },
            ColumnMethod::Bicor(params) => {
                ColumnPreparer::Bicor(params, BicorScratch::new(n_rows)?)
            }
        })
    }
}

/// A [`ColumnMethod`] together with the working space it needs.
pub(crate) enum ColumnPreparer {
    Pearson { cosine: bool },
    WeightedPearson { cosine: bool },
    Bicor(BicorParams, BicorScratch),
}

impl ColumnPreparer {
    pub(crate) fn prepare(
        &mut self,
        col: ArrayView1<f64>,
        weights: Option<ArrayView1<f64>>,
        out: &mut [f64],
    ) -> ColumnMeta {
        match self {
            ColumnPreparer::Pearson { cosine } => prepare_col_cor(col, *cosine, out),
            ColumnPreparer::WeightedPearson { cosine } => match weights {
                Some(w) => prepare_col_cor_weighted(col, w, *cosine, out),
                // unit weights
                None => prepare_col_cor(col, *cosine, out),
            },
            ColumnPreparer::Bicor(params, scratch) => prepare_col_bicor(col, params, out, scratch),
        }
    }
}

/// Pearson preparation: `(x - mean) / ||x - mean||`, or `x / ||x||` in cosine
/// mode.
pub fn prepare_col_cor(col: ArrayView1<f64>, cosine: bool, out: &mut [f64]) -> ColumnMeta {
    let nr = col.len();
    let mut count = 0usize;
    let mut sum = 0.0;
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for &v in col.iter() {
        if !v.is_nan() {
            count += 1;
            sum += v;
            lo = lo.min(v);
            hi = hi.max(v);
        }
    }

    if count == 0 {
        out.fill(0.0);
        return ColumnMeta::degenerate(nr);
    }

    let mean = if cosine { 0.0 } else { sum / count as f64 };
    let mut ss = 0.0;
    for &v in col.iter() {
        if !v.is_nan() {
            let d = v - mean;
            ss += d * d;
        }
    }
    let norm = ss.sqrt();
    let n_na = nr - count;

    // centring a constant column leaves rounding noise, not zeros
    if (!cosine && lo == hi) || norm == 0.0 || !norm.is_finite() {
        out.fill(0.0);
        return ColumnMeta::degenerate(n_na);
    }

    for (o, &v) in out.iter_mut().zip(col.iter()) {
        *o = if v.is_nan() { 0.0 } else { (v - mean) / norm };
    }

    ColumnMeta {
        n_na,
        degenerate: false,
        zero_mad: false,
    }
}

/// Weighted Pearson preparation: `w (x - m) / sqrt(sum w^2 (x - m)^2)` with
/// `m` the weighted mean. An observation is missing when either its value or
/// its weight is NaN.
pub fn prepare_col_cor_weighted(
    col: ArrayView1<f64>,
    weights: ArrayView1<f64>,
    cosine: bool,
    out: &mut [f64],
) -> ColumnMeta {
    let nr = col.len();
    let mut count = 0usize;
    let mut wsum = 0.0;
    let mut wxsum = 0.0;
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for (&v, &w) in col.iter().zip(weights.iter()) {
        if !v.is_nan() && !w.is_nan() {
            count += 1;
            wsum += w;
            wxsum += w * v;
            if w != 0.0 {
                lo = lo.min(v);
                hi = hi.max(v);
            }
        }
    }

    if count == 0 {
        out.fill(0.0);
        return ColumnMeta::degenerate(nr);
    }

    let mean = if cosine { 0.0 } else { wxsum / wsum };
    let mut ss = 0.0;
    for (&v, &w) in col.iter().zip(weights.iter()) {
        if !v.is_nan() && !w.is_nan() {
            let d = w * (v - mean);
            ss += d * d;
        }
    }
    let norm = ss.sqrt();
    let n_na = nr - count;

    let constant = !cosine && lo >= hi;
    if !(wsum > 0.0) || constant || norm == 0.0 || !norm.is_finite() {
        out.fill(0.0);
        return ColumnMeta::degenerate(n_na);
    }

    for ((o, &v), &w) in out.iter_mut().zip(col.iter()).zip(weights.iter()) {
        *o = if v.is_nan() || w.is_nan() {
            0.0
        } else {
            w * (v - mean) / norm
        };
    }

    ColumnMeta {
        n_na,
        degenerate: false,
        zero_mad: false,
    }
}

/// Biweight preparation: `(1 - u^2)^2 (x - med) / norm` with
/// `u = (x - med) / (9 mad)`, rescaled so that the `max_p_outliers` tails sit
/// no further in than `|u| = 0.5`.
///
/// With `ZeroMadFallback::All` a zero MAD leaves `out` zeroed and only sets
/// `zero_mad`; the caller is expected to redo the whole matrix with Pearson.
pub fn prepare_col_bicor(
    col: ArrayView1<f64>,
    params: &BicorParams,
    out: &mut [f64],
    scratch: &mut BicorScratch,
) -> ColumnMeta {
    if params.fallback == ZeroMadFallback::ForcePearson {
        return prepare_col_cor(col, params.cosine, out);
    }

    let nr = col.len();
    for (o, &v) in out.iter_mut().zip(col.iter()) {
        *o = v;
    }
    let med = median(out);

    if med.is_nan() {
        out.fill(0.0);
        return ColumnMeta::degenerate(nr);
    }

    let med_x = if params.cosine { 0.0 } else { med };
    let aux = &mut scratch.aux[..nr];
    let aux2 = &mut scratch.aux2[..nr];

    let mut n_na = 0usize;
    for ((o, a), &v) in out.iter_mut().zip(aux.iter_mut()).zip(col.iter()) {
        if v.is_nan() {
            n_na += 1;
            *o = f64::NAN;
            *a = f64::NAN;
        } else {
            *o = v - med_x;
            *a = (v - med).abs();
        }
    }

    let mad = median(aux);
    if mad == 0.0 {
        match params.fallback {
            ZeroMadFallback::None => {
                out.fill(0.0);
                return ColumnMeta {
                    n_na,
                    degenerate: true,
                    zero_mad: true,
                };
            }
            ZeroMadFallback::All => {
                out.fill(0.0);
                return ColumnMeta {
                    n_na,
                    degenerate: false,
                    zero_mad: true,
                };
            }
            ZeroMadFallback::Individual | ZeroMadFallback::ForcePearson => {
                let mut meta = prepare_col_cor(col, params.cosine, out);
                meta.zero_mad = true;
                return meta;
            }
        }
    }

    let denom = 9.0 * mad;
    for (a, &v) in aux.iter_mut().zip(col.iter()) {
        *a = if v.is_nan() { f64::NAN } else { (v - med) / denom };
    }

    aux2.copy_from_slice(aux);
    let mut low_q = quantile(aux2, params.max_p_outliers);
    aux2.copy_from_slice(aux);
    let mut hi_q = quantile(aux2, 1.0 - params.max_p_outliers);

    if low_q > -REF_UX {
        low_q = -REF_UX;
    }
    if hi_q < REF_UX {
        hi_q = REF_UX;
    }
    low_q = low_q.abs();

    for a in aux.iter_mut().filter(|a| !a.is_nan()) {
        if *a < 0.0 {
            *a = *a * REF_UX / low_q;
        } else {
            *a = *a * REF_UX / hi_q;
        }
    }

    let mut sum_sq = 0.0;
    for (o, &a) in out.iter_mut().zip(aux.iter()) {
        if o.is_nan() {
            *o = 0.0;
        } else {
            let ux = a.abs().min(1.0);
            let ux = 1.0 - ux * ux;
            *o *= ux * ux;
            sum_sq += *o * *o;
        }
    }

    let norm = sum_sq.sqrt();
    if norm == 0.0 || !norm.is_finite() {
        out.fill(0.0);
        return ColumnMeta::degenerate(n_na);
    }

    for o in out.iter_mut() {
        *o /= norm;
    }

    ColumnMeta {
        n_na,
        degenerate: false,
        zero_mad: false,
    }
}
