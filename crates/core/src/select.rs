//! Order statistics by quickselect.
//!
//! Every routine first moves the missing entries (NaN) to the end of the
//! buffer and works on the remaining prefix only. Buffers are reordered in
//! place; use the `*_copy` variants when the caller's order matters.

use crate::error::{try_copy, CorError};

/// Moves every NaN to the end of `values` and returns the number of
/// non-missing entries, which now form the prefix `values[..n]`.
pub fn partition_missing(values: &mut [f64]) -> usize {
    let mut bound = values.len();
    let mut i = bound;
    while i > 0 {
        i -= 1;
        if values[i].is_nan() {
            bound -= 1;
            values.swap(i, bound);
        }
    }
    bound
}

/// The `q`-quantile of the non-missing entries, interpolating linearly between
/// the two order statistics that bracket the fractional rank `(n - 1) * q`.
/// Returns NaN when no entry is observed.
pub fn quantile(values: &mut [f64], q: f64) -> f64 {
    let n = partition_missing(values);
    if n == 0 {
        return f64::NAN;
    }
    let q = q.clamp(0.0, 1.0);
    select_fractional(&mut values[..n], (n - 1) as f64 * q)
}

pub fn median(values: &mut [f64]) -> f64 {
    quantile(values, 0.5)
}

/// [`quantile`] on a private copy of `values`.
pub fn quantile_copy(values: &[f64], q: f64) -> Result<f64, CorError> {
    let mut copy = try_copy(values, "quantile copy")?;
    Ok(quantile(&mut copy, q))
}

pub fn median_copy(values: &[f64]) -> Result<f64, CorError> {
    quantile_copy(values, 0.5)
}

/// Lower weighted quantile: the smallest observed value `v` such that the
/// weights of all entries `<= v` add up to at least `q` times the total weight.
///
/// Entries with a missing value, a missing weight or a non-positive weight are
/// ignored. `values` and `weights` are permuted together.
pub fn weighted_quantile(values: &mut [f64], weights: &mut [f64], q: f64) -> f64 {
    let len = values.len().min(weights.len());
    let (values, weights) = (&mut values[..len], &mut weights[..len]);

    let mut bound = len;
    let mut i = len;
    while i > 0 {
        i -= 1;
        if values[i].is_nan() || weights[i].is_nan() || weights[i] <= 0.0 {
            bound -= 1;
            values.swap(i, bound);
            weights.swap(i, bound);
        }
    }
    if bound == 0 {
        return f64::NAN;
    }

    let mut v = &mut values[..bound];
    let mut w = &mut weights[..bound];
    let total: f64 = w.iter().sum();
    let mut target = q.clamp(0.0, 1.0) * total;

    loop {
        if v.len() == 1 {
            return v[0];
        }
        let pivot = median_of_three(v);
        let (lo, hi) = partition3_weighted(v, w, pivot);
        let below: f64 = w[..lo].iter().sum();
        let equal: f64 = w[lo..hi].iter().sum();

        if lo > 0 && target <= below {
            v = &mut std::mem::take(&mut v)[..lo];
            w = &mut std::mem::take(&mut w)[..lo];
        } else if target <= below + equal || hi == v.len() {
            return pivot;
        } else {
            target -= below + equal;
            v = &mut std::mem::take(&mut v)[hi..];
            w = &mut std::mem::take(&mut w)[hi..];
        }
    }
}

/// Value at fractional rank `target` of `v`, which holds no missing entries.
fn select_fractional(values: &mut [f64], mut target: f64) -> f64 {
    let mut v = values;
    loop {
        match v.len() {
            0 => return f64::NAN,
            1 => return v[0],
            2 => {
                let (low, high) = (v[0].min(v[1]), v[0].max(v[1]));
                return if target <= 0.0 {
                    low
                } else if target >= 1.0 {
                    high
                } else {
                    low + (high - low) * target
                };
            }
            _ => {}
        }

        let pivot = median_of_three(v);
        let (lo, hi) = partition3(v, pivot);

        // Both bracketing ranks strictly left of the pivot block.
        if target < lo as f64 - 1.0 {
            v = &mut std::mem::take(&mut v)[..lo];
            continue;
        }
        // Both bracketing ranks strictly right of it.
        if target > hi as f64 {
            target -= hi as f64;
            v = &mut std::mem::take(&mut v)[hi..];
            continue;
        }

        let rank_value = |k: usize| -> f64 {
            if k < lo {
                max_of(&v[..lo])
            } else if k < hi {
                pivot
            } else {
                min_of(&v[hi..])
            }
        };
        let floor = target.floor();
        let frac = target - floor;
        let k0 = floor as usize;
        let v0 = rank_value(k0);
        if frac == 0.0 {
            return v0;
        }
        let v1 = rank_value(k0 + 1);
        return v0 + (v1 - v0) * frac;
    }
}

fn median_of_three(v: &[f64]) -> f64 {
    let a = v[0];
    let b = v[(v.len() - 1) / 2];
    let c = v[v.len() - 1];
    a.min(b).max(a.max(b).min(c))
}

/// Dutch-flag partition around `pivot`: returns `(lo, hi)` with
/// `v[..lo] < pivot`, `v[lo..hi] == pivot`, `v[hi..] > pivot`.
fn partition3(v: &mut [f64], pivot: f64) -> (usize, usize) {
    let (mut lt, mut i, mut gt) = (0, 0, v.len());
    while i < gt {
        if v[i] < pivot {
            v.swap(lt, i);
            lt += 1;
            i += 1;
        } else if v[i] > pivot {
            gt -= 1;
            v.swap(i, gt);
        } else {
            i += 1;
        }
    }
    (lt, gt)
}

fn partition3_weighted(v: &mut [f64], w: &mut [f64], pivot: f64) -> (usize, usize) {
    let (mut lt, mut i, mut gt) = (0, 0, v.len());
    while i < gt {
        if v[i] < pivot {
            v.swap(lt, i);
            w.swap(lt, i);
            lt += 1;
            i += 1;
        } else if v[i] > pivot {
            gt -= 1;
            v.swap(i, gt);
            w.swap(i, gt);
        } else {
            i += 1;
        }
    }
    (lt, gt)
}

fn max_of(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn min_of(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sorted_quantile(values: &[f64], q: f64) -> f64 {
        let mut kept: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        if kept.is_empty() {
            return f64::NAN;
        }
        kept.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = (kept.len() - 1) as f64 * q;
        let k0 = idx.floor() as usize;
        let k1 = idx.ceil() as usize;
        kept[k0] + (kept[k1] - kept[k0]) * (idx - k0 as f64)
    }

    fn sorted_weighted_quantile(values: &[f64], weights: &[f64], q: f64) -> f64 {
        let mut pairs: Vec<(f64, f64)> = values
            .iter()
            .zip(weights)
            .filter(|(v, w)| !v.is_nan() && !w.is_nan() && **w > 0.0)
            .map(|(v, w)| (*v, *w))
            .collect();
        if pairs.is_empty() {
            return f64::NAN;
        }
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        let total: f64 = pairs.iter().map(|p| p.1).sum();
        let target = q * total;
        let mut cum = 0.0;
        for (v, w) in &pairs {
            cum += w;
            if cum >= target {
                return *v;
            }
        }
        pairs[pairs.len() - 1].0
    }

    #[test]
    fn small_lengths() {
        assert!(median(&mut []).is_nan());
        assert_eq!(median(&mut [3.0]), 3.0);
        assert_eq!(median(&mut [4.0, 2.0]), 3.0);
        assert_eq!(quantile(&mut [4.0, 2.0], 0.0), 2.0);
        assert_eq!(quantile(&mut [4.0, 2.0], 1.0), 4.0);
        assert_eq!(median(&mut [5.0, 1.0, 3.0]), 3.0);
    }

    #[test]
    fn missing_entries_are_ignored() {
        let mut v = [f64::NAN, 7.0, f64::NAN, 1.0, 4.0];
        assert_eq!(median(&mut v), 4.0);
        let mut all_na = [f64::NAN, f64::NAN];
        assert!(quantile(&mut all_na, 0.25).is_nan());
    }

    #[test]
    fn partition_missing_keeps_observed_prefix() {
        let mut v = [1.0, f64::NAN, 2.0, f64::NAN, 3.0];
        let n = partition_missing(&mut v);
        assert_eq!(n, 3);
        let mut prefix = v[..3].to_vec();
        prefix.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(prefix, vec![1.0, 2.0, 3.0]);
        assert!(v[3..].iter().all(|x| x.is_nan()));
    }

    #[test]
    fn matches_sort_and_interpolate() {
        let mut rng = StdRng::seed_from_u64(7);
        for trial in 0..400 {
            let len = rng.gen_range(0..40);
            let values: Vec<f64> = (0..len)
                .map(|_| {
                    if rng.gen_bool(0.1) {
                        f64::NAN
                    } else if trial % 3 == 0 {
                        // many ties
                        rng.gen_range(0..4) as f64
                    } else {
                        rng.gen_range(-10.0..10.0)
                    }
                })
                .collect();
            for &q in &[0.0, 0.05, 0.25, 0.5, 0.5001, 0.9, 1.0] {
                let expected = sorted_quantile(&values, q);
                let mut work = values.clone();
                let got = quantile(&mut work, q);
                if expected.is_nan() {
                    assert!(got.is_nan());
                } else {
                    assert!(
                        (got - expected).abs() <= 1e-12 * (1.0 + expected.abs()),
                        "q={q} got={got} expected={expected} values={values:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn copy_variant_leaves_input_untouched() {
        let values = vec![9.0, f64::NAN, 1.0, 5.0];
        let m = median_copy(&values).unwrap();
        assert_eq!(m, 5.0);
        assert_eq!(values[0], 9.0);
        assert!(values[1].is_nan());
    }

    #[test]
    fn weighted_matches_sort_and_accumulate() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..300 {
            let len = rng.gen_range(1..30);
            let values: Vec<f64> = (0..len)
                .map(|_| if rng.gen_bool(0.1) { f64::NAN } else { rng.gen_range(0..12) as f64 })
                .collect();
            let weights: Vec<f64> = (0..len).map(|_| rng.gen_range(0..5) as f64).collect();
            for &q in &[0.0, 0.1, 0.3, 0.5, 0.75, 1.0] {
                let expected = sorted_weighted_quantile(&values, &weights, q);
                let (mut v, mut w) = (values.clone(), weights.clone());
                let got = weighted_quantile(&mut v, &mut w, q);
                if expected.is_nan() {
                    assert!(got.is_nan());
                } else {
                    assert_eq!(got, expected, "q={q} values={values:?} weights={weights:?}");
                }
            }
        }
    }

    #[test]
    fn unit_weights_give_lower_median() {
        let mut v = [4.0, 1.0, 3.0, 2.0];
        let mut w = [1.0; 4];
        assert_eq!(weighted_quantile(&mut v, &mut w, 0.5), 2.0);
    }
}
