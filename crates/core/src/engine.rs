//! Phase orchestration shared by the Pearson and bicor entry points.

use crate::error::{try_filled, CorError};
use crate::finalize::{finalize_cross, finalize_symmetric};
use crate::kernel::DenseProduct;
use crate::options::{CorOptions, ZeroMadFallback};
use crate::parallel::{choose_threads, Executor, WorkQueue};
use crate::prepare::{ColumnMeta, ColumnMethod};
use crate::slow::{recompute, Block, ExactMethod, SideView, SlowOutcome};
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2, ArrayViewMut2, ShapeBuilder};

/// Output of a correlation call.
#[derive(Clone, Debug)]
pub struct CorResult {
    /// Column-major result, `ncol(x) × ncol(y)` (`ncol(x)` square for one matrix).
    pub matrix: Array2<f64>,
    /// Cells set to NA by exact recomputation.
    pub n_na: usize,
    /// Cells recomputed exactly.
    pub n_slow: usize,
    /// Workers used.
    pub n_threads: usize,
    pub zero_mad_x: bool,
    pub zero_mad_y: bool,
    /// Workers could not be started and the call ran on one thread.
    pub thread_start_failed: bool,
}

impl CorResult {
    /// 0 on full success, 2 if the call had to fall back to one thread.
    pub fn error_code(&self) -> i32 {
        if self.thread_start_failed {
            2
        } else {
            0
        }
    }

    /// 1 if any column had zero median absolute deviation, 0 otherwise.
    pub fn warning_code(&self) -> i32 {
        if self.zero_mad_x || self.zero_mad_y {
            1
        } else {
            0
        }
    }
}

/// One data matrix and how to prepare its columns.
pub(crate) struct Input<'a> {
    pub data: ArrayView2<'a, f64>,
    pub weights: Option<ArrayView2<'a, f64>>,
    pub method: ColumnMethod,
}

struct Prepared {
    normalized: Vec<f64>,
    meta: Vec<ColumnMeta>,
    zero_mad: bool,
    redone_as_pearson: bool,
}

impl Prepared {
    fn degenerate(&self) -> Vec<bool> {
        self.meta.iter().map(|m| m.degenerate).collect()
    }
}

fn report(options: &CorOptions, message: std::fmt::Arguments) {
    if options.verbose > 0 {
        info!("{}{}", options.prefix(), message);
    } else {
        debug!("{}{}", options.prefix(), message);
    }
}

fn check_weights(input: &Input, what: &'static str) -> Result<(), CorError> {
    if let Some(w) = input.weights {
        if w.dim() != input.data.dim() {
            return Err(CorError::ShapeMismatch {
                what,
                expected: input.data.dim(),
                found: w.dim(),
            });
        }
    }
    Ok(())
}

/// Computes the correlation matrix of `x` with itself, or with `y` when given.
pub(crate) fn correlate(
    x: Input,
    y: Option<Input>,
    exact: ExactMethod,
    options: &CorOptions,
    kernel: &dyn DenseProduct,
) -> Result<CorResult, CorError> {
    check_weights(&x, "weights for x")?;
    if let Some(y) = &y {
        check_weights(y, "weights for y")?;
        if y.data.nrows() != x.data.nrows() {
            return Err(CorError::ShapeMismatch {
                what: "rows of y",
                expected: (x.data.nrows(), y.data.ncols()),
                found: y.data.dim(),
            });
        }
    }

    let nr = x.data.nrows();
    let ncx = x.data.ncols();
    let ncy = y.as_ref().map_or(ncx, |y| y.data.ncols());

    let nt = choose_threads(ncx.saturating_mul(ncy), options.n_threads);
    let (exec, thread_start_failed) = Executor::new(nt, options.strict_threads)?;
    report(options, format_args!("Number of threads: {}", exec.workers()));

    let mut result = CorResult {
        matrix: Array2::zeros((0, 0).f()),
        n_na: 0,
        n_slow: 0,
        n_threads: exec.workers(),
        zero_mad_x: false,
        zero_mad_y: false,
        thread_start_failed,
    };

    if ncx == 0 || ncy == 0 {
        result.matrix = Array2::zeros((ncx, ncy).f());
        return Ok(result);
    }
    if nr == 0 {
        // every column is empty and therefore degenerate
        let buf = try_filled(ncx.saturating_mul(ncy), f64::NAN, "result matrix")?;
        result.matrix = Array2::from_shape_vec((ncx, ncy).f(), buf)?;
        return Ok(result);
    }

    debug!("{}preparing {} columns of x", options.prefix(), ncx);
    let px = prepare_matrix(&exec, &x)?;
    let py = match &y {
        Some(y) => {
            debug!("{}preparing {} columns of y", options.prefix(), ncy);
            Some(prepare_matrix(&exec, y)?)
        }
        None => None,
    };
    result.zero_mad_x = px.zero_mad;
    result.zero_mad_y = py.as_ref().map_or(false, |p| p.zero_mad);

    let mut buf = try_filled(ncx.saturating_mul(ncy), 0.0, "result matrix")?;
    {
        let a = ArrayView2::from_shape((nr, ncx).f(), &px.normalized)?;
        let out = ArrayViewMut2::from_shape((ncx, ncy).f(), &mut buf[..])?;
        match &py {
            None => kernel.symmetric_rank_update(a, out),
            Some(py) => {
                let b = ArrayView2::from_shape((nr, ncy).f(), &py.normalized)?;
                kernel.general_product(a, b, out);
            }
        }
    }

    if options.quick < 1.0 {
        let max_diff = (options.quick * nr as f64).floor() as usize;
        let exact = match exact {
            ExactMethod::Bicor { x: bx, y: by } => ExactMethod::Bicor {
                x: bx.for_pair(px.redone_as_pearson),
                y: by.for_pair(py.as_ref().unwrap_or(&px).redone_as_pearson),
            },
            other => other,
        };

        let side_x = SideView {
            data: x.data.view(),
            weights: x.weights.as_ref().map(|w| w.view()),
            normalized: &px.normalized,
            meta: &px.meta,
        };
        let side_y = match (&y, &py) {
            (Some(y), Some(py)) => Some(SideView {
                data: y.data.view(),
                weights: y.weights.as_ref().map(|w| w.view()),
                normalized: &py.normalized,
                meta: &py.meta,
            }),
            _ => None,
        };

        // each worker overwrites the cells of the result columns it claims
        let queue = WorkQueue::new(buf.chunks_mut(ncx).enumerate());
        let outcomes = match &side_y {
            Some(side_y) => exec.run(|_| {
                recompute(&queue, Block::Cross, &side_x, side_y, &exact, max_diff)
            }),
            None => exec.run(|_| {
                recompute(&queue, Block::Symmetric, &side_x, &side_x, &exact, max_diff)
            }),
        };
        drop(queue);

        for outcome in outcomes {
            let SlowOutcome {
                n_slow,
                n_na,
                zero_mad_x,
                zero_mad_y,
            } = outcome?;
            result.n_slow += n_slow;
            result.n_na += n_na;
            if side_y.is_some() {
                result.zero_mad_x |= zero_mad_x;
                result.zero_mad_y |= zero_mad_y;
            } else {
                result.zero_mad_x |= zero_mad_x || zero_mad_y;
            }
        }

        let total = if py.is_some() {
            (ncx * ncy) as f64
        } else {
            (ncx * ncx.saturating_sub(1)) as f64 / 2.0
        };
        let fraction = if total > 0.0 {
            result.n_slow as f64 / total
        } else {
            0.0
        };
        report(options, format_args!("Fraction of slow calculations: {fraction:.6}"));
    }

    match &py {
        None => finalize_symmetric(&exec, &mut buf, ncx, &px.degenerate()),
        Some(py) => finalize_cross(&exec, &mut buf, ncx, &px.degenerate(), &py.degenerate()),
    }

    result.matrix = Array2::from_shape_vec((ncx, ncy).f(), buf)?;
    Ok(result)
}

/// Normalizes every column of `input`, redoing the whole matrix with Pearson
/// when the `All` fallback is triggered.
fn prepare_matrix(exec: &Executor, input: &Input) -> Result<Prepared, CorError> {
    let (nr, nc) = input.data.dim();
    let mut normalized = try_filled(nr.saturating_mul(nc), 0.0, "normalized data")?;
    let mut meta = vec![ColumnMeta::default(); nc];

    let hit_all = prepare_columns(exec, input, input.method, &mut normalized, &mut meta)?;
    let mut zero_mad = meta.iter().any(|m| m.zero_mad);

    if hit_all {
        let cosine = match input.method {
            ColumnMethod::Pearson { cosine } | ColumnMethod::WeightedPearson { cosine } => cosine,
            ColumnMethod::Bicor(params) => params.cosine,
        };
        warn!("zero median absolute deviation in a column; using Pearson for all columns");
        prepare_columns(exec, input, ColumnMethod::Pearson { cosine }, &mut normalized, &mut meta)?;
        zero_mad = true;
    } else if zero_mad {
        warn!(
            "{} column(s) with zero median absolute deviation",
            meta.iter().filter(|m| m.zero_mad).count()
        );
    }

    Ok(Prepared {
        normalized,
        meta,
        zero_mad,
        redone_as_pearson: hit_all,
    })
}

/// One preparation phase. Returns whether a worker met zero MAD under the
/// `All` fallback, in which case the phase stopped early.
fn prepare_columns(
    exec: &Executor,
    input: &Input,
    method: ColumnMethod,
    normalized: &mut [f64],
    meta: &mut [ColumnMeta],
) -> Result<bool, CorError> {
    let nr = input.data.nrows();
    let stop_on_zero_mad = matches!(
        method,
        ColumnMethod::Bicor(p) if p.fallback == ZeroMadFallback::All
    );

    let queue = WorkQueue::new(normalized.chunks_mut(nr).zip(meta.iter_mut()).enumerate());
    let outcomes = exec.run(|_| -> Result<bool, CorError> {
        let mut preparer = method.preparer(nr)?;
        while let Some((c, (out, m))) = queue.claim() {
            *m = preparer.prepare(
                input.data.column(c),
                input.weights.as_ref().map(|w| w.column(c)),
                out,
            );
            if stop_on_zero_mad && m.zero_mad {
                queue.close();
                return Ok(true);
            }
        }
        Ok(false)
    });

    let mut hit_all = false;
    for outcome in outcomes {
        hit_all |= outcome?;
    }
    Ok(hit_all)
}
