//! Biweight midcorrelation.
//!
//! Columns are centred on their median and down-weighted by the biweight of
//! their distance from it in units of nine median absolute deviations.

use crate::engine::{correlate, CorResult, Input};
use crate::error::CorError;
use crate::kernel::NdarrayProduct;
use crate::options::{BicorOptions, ZeroMadFallback};
use crate::prepare::{BicorParams, ColumnMethod};
use crate::slow::ExactMethod;
use ndarray::{Array2, ArrayBase, Data, Ix2};

fn params(options: &BicorOptions, cosine: bool, robust: bool) -> BicorParams {
    BicorParams {
        max_p_outliers: options.max_p_outliers,
        fallback: if robust {
            options.fallback
        } else {
            ZeroMadFallback::ForcePearson
        },
        cosine,
    }
}

fn column_method(p: BicorParams) -> ColumnMethod {
    if p.fallback == ZeroMadFallback::ForcePearson {
        ColumnMethod::Pearson { cosine: p.cosine }
    } else {
        ColumnMethod::Bicor(p)
    }
}

/// Bicor between all pairs of columns of `data`. The robust flags of
/// `options` only apply to [`correlation_cross_matrix`].
pub fn correlation_matrix<S>(data: &ArrayBase<S, Ix2>, options: &BicorOptions) -> Result<CorResult, CorError>
where
    S: Data<Elem = f64>,
{
    options.validate()?;
    let p = params(options, options.cor.cosine_x, true);
    let x = Input {
        data: data.view(),
        weights: None,
        method: column_method(p),
    };
    correlate(x, None, ExactMethod::Bicor { x: p, y: p }, &options.cor, &NdarrayProduct)
}

/// Bicor of every column of `lhs` with every column of `rhs`. A side with
/// `robust_x`/`robust_y` off is treated with Pearson.
pub fn correlation_cross_matrix<S1, S2>(
    lhs: &ArrayBase<S1, Ix2>,
    rhs: &ArrayBase<S2, Ix2>,
    options: &BicorOptions,
) -> Result<CorResult, CorError>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    options.validate()?;
    let px = params(options, options.cor.cosine_x, options.robust_x);
    let py = params(options, options.cor.cosine_y, options.robust_y);
    let x = Input {
        data: lhs.view(),
        weights: None,
        method: column_method(px),
    };
    let y = Input {
        data: rhs.view(),
        weights: None,
        method: column_method(py),
    };
    correlate(x, Some(y), ExactMethod::Bicor { x: px, y: py }, &options.cor, &NdarrayProduct)
}

/// One-matrix bicor with default options.
pub fn matrix<S>(data: &ArrayBase<S, Ix2>) -> Result<Array2<f64>, CorError>
where
    S: Data<Elem = f64>,
{
    correlation_matrix(data, &BicorOptions::default()).map(|r| r.matrix)
}
