use crate::engine::{correlate, CorResult, Input};
use crate::error::CorError;
use crate::kernel::NdarrayProduct;
use crate::options::CorOptions;
use crate::prepare::ColumnMethod;
use crate::slow::ExactMethod;
use ndarray::{Array2, ArrayBase, ArrayView2, Data, Ix2};

fn exact(options: &CorOptions, cosine_y: bool) -> ExactMethod {
    ExactMethod::Pearson {
        cosine_x: options.cosine_x,
        cosine_y,
    }
}

/// Pearson correlation between all pairs of columns of `data` (samples in
/// rows). Missing values are NaN and are handled pairwise.
pub fn correlation_matrix<S>(data: &ArrayBase<S, Ix2>, options: &CorOptions) -> Result<CorResult, CorError>
where
    S: Data<Elem = f64>,
{
    options.validate()?;
    let x = Input {
        data: data.view(),
        weights: None,
        method: ColumnMethod::Pearson {
            cosine: options.cosine_x,
        },
    };
    correlate(x, None, exact(options, options.cosine_x), options, &NdarrayProduct)
}

/// Weighted Pearson correlation between all pairs of columns of `data`.
/// `weights` has the shape of `data`; a NaN weight marks the observation
/// missing.
pub fn weighted_correlation_matrix<S, W>(
    data: &ArrayBase<S, Ix2>,
    weights: &ArrayBase<W, Ix2>,
    options: &CorOptions,
) -> Result<CorResult, CorError>
where
    S: Data<Elem = f64>,
    W: Data<Elem = f64>,
{
    options.validate()?;
    let x = Input {
        data: data.view(),
        weights: Some(weights.view()),
        method: ColumnMethod::WeightedPearson {
            cosine: options.cosine_x,
        },
    };
    correlate(x, None, exact(options, options.cosine_x), options, &NdarrayProduct)
}

/// Pearson correlation of every column of `lhs` with every column of `rhs`.
/// Both matrices need the same number of rows.
pub fn correlation_cross_matrix<S1, S2>(
    lhs: &ArrayBase<S1, Ix2>,
    rhs: &ArrayBase<S2, Ix2>,
    options: &CorOptions,
) -> Result<CorResult, CorError>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    weighted_correlation_cross_matrix(lhs, rhs, None, None, options)
}

/// Weighted two-matrix Pearson correlation. Weights are given for both sides
/// or for neither.
pub fn weighted_correlation_cross_matrix<S1, S2>(
    lhs: &ArrayBase<S1, Ix2>,
    rhs: &ArrayBase<S2, Ix2>,
    lhs_weights: Option<ArrayView2<f64>>,
    rhs_weights: Option<ArrayView2<f64>>,
    options: &CorOptions,
) -> Result<CorResult, CorError>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    options.validate()?;
    if lhs_weights.is_some() != rhs_weights.is_some() {
        return Err(CorError::InconsistentWeights);
    }

    let method = |cosine| {
        if lhs_weights.is_some() {
            ColumnMethod::WeightedPearson { cosine }
        } else {
            ColumnMethod::Pearson { cosine }
        }
    };
    let x = Input {
        data: lhs.view(),
        weights: lhs_weights.as_ref().map(|w| w.view()),
        method: method(options.cosine_x),
    };
    let y = Input {
        data: rhs.view(),
        weights: rhs_weights.as_ref().map(|w| w.view()),
        method: method(options.cosine_y),
    };
    correlate(x, Some(y), exact(options, options.cosine_y), options, &NdarrayProduct)
}

/// One-matrix Pearson with default options.
pub fn matrix<S>(data: &ArrayBase<S, Ix2>) -> Result<Array2<f64>, CorError>
where
    S: Data<Elem = f64>,
{
    correlation_matrix(data, &CorOptions::default()).map(|r| r.matrix)
}
