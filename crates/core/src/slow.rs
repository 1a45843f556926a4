//! Exact recomputation of pairs whose missing-value pattern the bulk product
//! does not account for.

use crate::error::{try_filled, CorError};
use crate::options::ZeroMadFallback;
use crate::parallel::WorkQueue;
use crate::prepare::{prepare_col_bicor, BicorParams, BicorScratch, ColumnMeta};
use ndarray::{ArrayView1, ArrayView2};

/// Raw and prepared data of one side of the product.
pub(crate) struct SideView<'d, 'p> {
    pub data: ArrayView2<'d, f64>,
    pub weights: Option<ArrayView2<'d, f64>>,
    pub normalized: &'p [f64],
    pub meta: &'p [ColumnMeta],
}

impl SideView<'_, '_> {
    fn normalized_column(&self, c: usize) -> &[f64] {
        let nr = self.data.nrows();
        &self.normalized[c * nr..(c + 1) * nr]
    }
}

/// How a single pair is recomputed.
#[derive(Copy, Clone, Debug)]
pub(crate) enum ExactMethod {
    Pearson { cosine_x: bool, cosine_y: bool },
    Bicor { x: BicorParams, y: BicorParams },
}

impl ExactMethod {
    fn worker(&self, n_rows: usize) -> Result<PairWorker, CorError> {
        Ok(match *self {
            ExactMethod::Pearson { cosine_x, cosine_y } => PairWorker::Pearson { cosine_x, cosine_y },
            ExactMethod::Bicor { x, y } => PairWorker::Bicor {
                x,
                y,
                scratch: PairScratch::new(n_rows)?,
            },
        })
    }
}

impl BicorParams {
    /// Parameters for re-normalizing a column of a masked pair. A matrix
    /// already redone with Pearson stays Pearson; otherwise `All` acts
    /// column by column.
    pub(crate) fn for_pair(mut self, redone_as_pearson: bool) -> Self {
        if redone_as_pearson {
            self.fallback = ZeroMadFallback::ForcePearson;
        } else if self.fallback == ZeroMadFallback::All {
            self.fallback = ZeroMadFallback::Individual;
        }
        self
    }
}

/// Whether the bulk value of `(i, j)` must be replaced.
pub(crate) fn needs_exact(mi: &ColumnMeta, mj: &ColumnMeta, max_diff: usize) -> bool {
    !(mi.degenerate || mj.degenerate || (mi.n_na <= max_diff && mj.n_na <= max_diff))
}

/// Which cells of a result column the slow phase visits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Block {
    /// Square result of one matrix; column `i` holds the pairs `(i, j > i)`
    /// below the diagonal.
    Symmetric,
    /// `ncx × ncy` result; column `j` holds the pairs `(i, j)` for every `i`.
    Cross,
}

/// Counters gathered by one worker of the slow phase.
#[derive(Debug, Default)]
pub(crate) struct SlowOutcome {
    pub n_slow: usize,
    pub n_na: usize,
    pub zero_mad_x: bool,
    pub zero_mad_y: bool,
}

struct PairScratch {
    xx: Vec<f64>,
    yy: Vec<f64>,
    x_norm: Vec<f64>,
    y_norm: Vec<f64>,
    bicor: BicorScratch,
}

impl PairScratch {
    fn new(nr: usize) -> Result<Self, CorError> {
        Ok(PairScratch {
            xx: try_filled(nr, 0.0, "pair scratch")?,
            yy: try_filled(nr, 0.0, "pair scratch")?,
            x_norm: try_filled(nr, 0.0, "pair scratch")?,
            y_norm: try_filled(nr, 0.0, "pair scratch")?,
            bicor: BicorScratch::new(nr)?,
        })
    }
}

/// An [`ExactMethod`] with the working space of one worker.
enum PairWorker {
    Pearson {
        cosine_x: bool,
        cosine_y: bool,
    },
    Bicor {
        x: BicorParams,
        y: BicorParams,
        scratch: PairScratch,
    },
}

enum PairValue {
    Keep,
    Value(f64),
    Missing,
}

/// Drains `queue` of result columns and overwrites, in place, every cell of
/// a claimed column whose pair needs exact recomputation. Column `i` of `x`
/// is paired with column `j` of `y`.
pub(crate) fn recompute<'b, I>(
    queue: &WorkQueue<I>,
    block: Block,
    x: &SideView,
    y: &SideView,
    method: &ExactMethod,
    max_diff: usize,
) -> Result<SlowOutcome, CorError>
where
    I: Iterator<Item = (usize, &'b mut [f64])>,
{
    let mut worker = method.worker(x.data.nrows())?;
    let mut outcome = SlowOutcome::default();

    while let Some((c, col)) = queue.claim() {
        let first = match block {
            Block::Symmetric => c + 1,
            Block::Cross => 0,
        };
        for (r, cell) in col.iter_mut().enumerate().skip(first) {
            let (i, j) = match block {
                Block::Symmetric => (c, r),
                Block::Cross => (r, c),
            };
            if !needs_exact(&x.meta[i], &y.meta[j], max_diff) {
                continue;
            }

            let value = match &mut worker {
                PairWorker::Pearson { cosine_x, cosine_y } => {
                    let xc = x.data.column(i);
                    let yc = y.data.column(j);
                    let pair = match (x.weights, y.weights) {
                        (Some(wx), Some(wy)) => weighted_pearson_pair(
                            xc,
                            yc,
                            wx.column(i),
                            wy.column(j),
                            *cosine_x,
                            *cosine_y,
                        ),
                        _ => pearson_pair(xc, yc, *cosine_x, *cosine_y),
                    };
                    pair.map_or(PairValue::Missing, PairValue::Value)
                }
                PairWorker::Bicor {
                    x: px,
                    y: py,
                    scratch,
                } => bicor_pair(i, j, x, y, px, py, max_diff, scratch, &mut outcome),
            };

            match value {
                PairValue::Keep => {}
                PairValue::Value(v) => {
                    outcome.n_slow += 1;
                    *cell = v;
                }
                PairValue::Missing => {
                    outcome.n_slow += 1;
                    outcome.n_na += 1;
                    *cell = f64::NAN;
                }
            }
        }
    }
    Ok(outcome)
}

/// Smallest and largest value seen. Centring a constant column leaves
/// rounding noise instead of zeros, so constancy is tested on the values.
struct Range {
    lo: f64,
    hi: f64,
}

impl Default for Range {
    fn default() -> Self {
        Range {
            lo: f64::INFINITY,
            hi: f64::NEG_INFINITY,
        }
    }
}

impl Range {
    fn add(&mut self, v: f64) {
        self.lo = self.lo.min(v);
        self.hi = self.hi.max(v);
    }

    /// True for a single distinct value and for no value at all.
    fn is_constant(&self) -> bool {
        self.lo >= self.hi
    }
}

/// Pearson correlation over the rows observed in both columns. `None` when no
/// row is shared or either side has zero variance there.
pub fn pearson_pair(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    cosine_x: bool,
    cosine_y: bool,
) -> Option<f64> {
    let mut count = 0usize;
    let (mut sx, mut sy) = (0.0, 0.0);
    let (mut x_range, mut y_range) = (Range::default(), Range::default());
    for (&a, &b) in x.iter().zip(y.iter()) {
        if !a.is_nan() && !b.is_nan() {
            count += 1;
            sx += a;
            sy += b;
            x_range.add(a);
            y_range.add(b);
        }
    }
    if count == 0 || (!cosine_x && x_range.is_constant()) || (!cosine_y && y_range.is_constant()) {
        return None;
    }
    let mx = if cosine_x { 0.0 } else { sx / count as f64 };
    let my = if cosine_y { 0.0 } else { sy / count as f64 };

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (&a, &b) in x.iter().zip(y.iter()) {
        if !a.is_nan() && !b.is_nan() {
            let (da, db) = (a - mx, b - my);
            sxy += da * db;
            sxx += da * da;
            syy += db * db;
        }
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some(sxy / (sxx.sqrt() * syy.sqrt()))
}

/// Weighted Pearson correlation over the rows where both values and both
/// weights are observed. Each side is centred on its own weighted mean.
pub fn weighted_pearson_pair(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    wx: ArrayView1<f64>,
    wy: ArrayView1<f64>,
    cosine_x: bool,
    cosine_y: bool,
) -> Option<f64> {
    let valid = |k: usize| !(x[k].is_nan() || y[k].is_nan() || wx[k].is_nan() || wy[k].is_nan());

    let mut count = 0usize;
    let (mut swx, mut swy, mut swxx, mut swyy) = (0.0, 0.0, 0.0, 0.0);
    let (mut x_range, mut y_range) = (Range::default(), Range::default());
    for k in (0..x.len()).filter(|&k| valid(k)) {
        count += 1;
        swx += wx[k];
        swy += wy[k];
        swxx += wx[k] * x[k];
        swyy += wy[k] * y[k];
        if wx[k] != 0.0 {
            x_range.add(x[k]);
        }
        if wy[k] != 0.0 {
            y_range.add(y[k]);
        }
    }
    if count == 0
        || !(swx > 0.0)
        || !(swy > 0.0)
        || (!cosine_x && x_range.is_constant())
        || (!cosine_y && y_range.is_constant())
    {
        return None;
    }
    let mx = if cosine_x { 0.0 } else { swxx / swx };
    let my = if cosine_y { 0.0 } else { swyy / swy };

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for k in (0..x.len()).filter(|&k| valid(k)) {
        let da = wx[k] * (x[k] - mx);
        let db = wy[k] * (y[k] - my);
        sxy += da * db;
        sxx += da * da;
        syy += db * db;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some(sxy / (sxx.sqrt() * syy.sqrt()))
}

#[allow(clippy::too_many_arguments)]
fn bicor_pair(
    i: usize,
    j: usize,
    x: &SideView,
    y: &SideView,
    px: &BicorParams,
    py: &BicorParams,
    max_diff: usize,
    scratch: &mut PairScratch,
    outcome: &mut SlowOutcome,
) -> PairValue {
    let xc = x.data.column(i);
    let yc = y.data.column(j);

    let mut shared_na = 0usize;
    for (k, (&a, &b)) in xc.iter().zip(yc.iter()).enumerate() {
        if a.is_nan() || b.is_nan() {
            shared_na += 1;
            scratch.xx[k] = f64::NAN;
            scratch.yy[k] = f64::NAN;
        } else {
            scratch.xx[k] = a;
            scratch.yy[k] = b;
        }
    }

    let redo_x = shared_na - x.meta[i].n_na > max_diff;
    let redo_y = shared_na - y.meta[j].n_na > max_diff;
    if !redo_x && !redo_y {
        return PairValue::Keep;
    }

    if redo_x {
        let meta = prepare_col_bicor(
            ArrayView1::from(&scratch.xx[..]),
            px,
            &mut scratch.x_norm,
            &mut scratch.bicor,
        );
        outcome.zero_mad_x |= meta.zero_mad;
        if meta.degenerate {
            return PairValue::Missing;
        }
    }
    if redo_y {
        let meta = prepare_col_bicor(
            ArrayView1::from(&scratch.yy[..]),
            py,
            &mut scratch.y_norm,
            &mut scratch.bicor,
        );
        outcome.zero_mad_y |= meta.zero_mad;
        if meta.degenerate {
            return PairValue::Missing;
        }
    }

    let xv = if redo_x { &scratch.x_norm[..] } else { x.normalized_column(i) };
    let yv = if redo_y { &scratch.y_norm[..] } else { y.normalized_column(j) };
    PairValue::Value(xv.iter().zip(yv).map(|(a, b)| a * b).sum())
}
