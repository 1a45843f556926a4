use crate::parallel::{Executor, WorkQueue};

fn clamp_cell(v: f64) -> f64 {
    // NaN passes through f64::clamp unchanged
    v.clamp(-1.0, 1.0)
}

/// Finalizes a square column-major `n × n` result whose lower triangle
/// (`row >= col`) holds the values: clamps them, writes NA for degenerate
/// columns and mirrors the lower triangle into the upper one.
pub(crate) fn finalize_symmetric(exec: &Executor, buf: &mut [f64], n: usize, degenerate: &[bool]) {
    if n == 0 {
        return;
    }

    let queue = WorkQueue::new(buf.chunks_mut(n).enumerate());
    exec.run(|_| {
        while let Some((c, col)) = queue.claim() {
            for (row, cell) in col.iter_mut().enumerate().skip(c) {
                *cell = if degenerate[c] || degenerate[row] {
                    f64::NAN
                } else {
                    clamp_cell(*cell)
                };
            }
        }
    });
    drop(queue);

    let (uppers, lowers): (Vec<&mut [f64]>, Vec<&[f64]>) = buf
        .chunks_mut(n)
        .enumerate()
        .map(|(c, col)| {
            let (upper, lower) = col.split_at_mut(c);
            (upper, &*lower)
        })
        .unzip();

    let queue = WorkQueue::new(uppers.into_iter().enumerate());
    exec.run(|_| {
        while let Some((c, upper)) = queue.claim() {
            for (r, cell) in upper.iter_mut().enumerate() {
                *cell = lowers[r][c - r];
            }
        }
    });
}

/// Finalizes a column-major `ncx × ncy` cross result: NA for degenerate rows
/// and columns, everything else clamped.
pub(crate) fn finalize_cross(
    exec: &Executor,
    buf: &mut [f64],
    ncx: usize,
    degenerate_x: &[bool],
    degenerate_y: &[bool],
) {
    if ncx == 0 {
        return;
    }

    let queue = WorkQueue::new(buf.chunks_mut(ncx).enumerate());
    exec.run(|_| {
        while let Some((j, col)) = queue.claim() {
            for (cell, &dx) in col.iter_mut().zip(degenerate_x) {
                *cell = if dx || degenerate_y[j] {
                    f64::NAN
                } else {
                    clamp_cell(*cell)
                };
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_mirror_clamp_and_na() {
        // column-major 3x3, upper triangle is garbage
        let mut buf = vec![
            1.0000000001, 0.5, -1.2, //
            9.0, 1.0, 0.3, //
            9.0, 9.0, 1.0,
        ];
        let exec = Executor::Sequential;
        finalize_symmetric(&exec, &mut buf, 3, &[false, false, false]);
        assert_eq!(buf[0], 1.0);
        assert_eq!(buf[2], -1.0);
        for r in 0..3 {
            for c in 0..3 {
                assert_eq!(buf[c * 3 + r].to_bits(), buf[r * 3 + c].to_bits());
            }
        }
        assert_eq!(buf[3], 0.5);
        assert_eq!(buf[7], 0.3);

        let mut buf = vec![0.2; 9];
        finalize_symmetric(&exec, &mut buf, 3, &[false, true, false]);
        for r in 0..3 {
            for c in 0..3 {
                let na = r == 1 || c == 1;
                assert_eq!(buf[c * 3 + r].is_nan(), na, "cell ({r}, {c})");
            }
        }
    }

    #[test]
    fn pooled_finalize_matches_sequential() {
        let n = 37;
        let source: Vec<f64> = (0..n * n).map(|k| ((k * 7919) % 211) as f64 / 100.0 - 1.05).collect();
        let degenerate: Vec<bool> = (0..n).map(|c| c % 11 == 3).collect();

        let mut seq = source.clone();
        finalize_symmetric(&Executor::Sequential, &mut seq, n, &degenerate);
        let (pool, _) = Executor::new(4, true).unwrap();
        let mut par = source;
        finalize_symmetric(&pool, &mut par, n, &degenerate);

        assert_eq!(
            seq.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            par.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn cross_na_and_clamp() {
        // 2x3, column-major
        let mut buf = vec![0.1, 1.5, -2.0, 0.2, 0.3, 0.4];
        finalize_cross(&Executor::Sequential, &mut buf, 2, &[false, false], &[false, false, true]);
        assert_eq!(&buf[..4], &[0.1, 1.0, -1.0, 0.2]);
        assert!(buf[4].is_nan() && buf[5].is_nan());

        let mut buf = vec![0.1; 6];
        finalize_cross(&Executor::Sequential, &mut buf, 2, &[true, false], &[false; 3]);
        for (k, v) in buf.iter().enumerate() {
            assert_eq!(v.is_nan(), k % 2 == 0);
        }
    }
}
