use approx::assert_abs_diff_eq;
use fastcor::prepare::{prepare_col_bicor, prepare_col_cor, BicorParams, BicorScratch};
use fastcor::{bicor, pearson, BicorOptions, CorOptions, ZeroMadFallback};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0..1.0))
}

/// Column 0 has a zero MAD but a non-zero variance.
fn with_spiky_column(seed: u64) -> Array2<f64> {
    let mut data = random_matrix(16, 4, seed);
    data.column_mut(0).fill(1.0);
    data[[5, 0]] = 4.0;
    data[[11, 0]] = -2.0;
    data
}

fn options(fallback: ZeroMadFallback) -> BicorOptions {
    BicorOptions {
        fallback,
        ..BicorOptions::default()
    }
}

fn bicor_column(data: &Array2<f64>, c: usize) -> Vec<f64> {
    let params = BicorParams {
        max_p_outliers: 1.0,
        fallback: ZeroMadFallback::Individual,
        cosine: false,
    };
    let mut scratch = BicorScratch::new(data.nrows()).unwrap();
    let mut out = vec![0.0; data.nrows()];
    prepare_col_bicor(data.column(c), &params, &mut out, &mut scratch);
    out
}

fn pearson_column(data: &Array2<f64>, c: usize) -> Vec<f64> {
    let mut out = vec![0.0; data.nrows()];
    prepare_col_cor(data.column(c), false, &mut out);
    out
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn fallback_none_gives_na_and_warning() {
    let mut data = random_matrix(12, 3, 1);
    data.column_mut(1).fill(2.5);
    let result = bicor::correlation_matrix(&data, &options(ZeroMadFallback::None)).expect("bicor");
    assert_eq!(result.warning_code(), 1);
    assert!(result.zero_mad_x);
    for k in 0..3 {
        assert!(result.matrix[[1, k]].is_nan());
        assert!(result.matrix[[k, 1]].is_nan());
    }
    assert!(result.matrix[[0, 2]].is_finite());

    let spiky = with_spiky_column(2);
    let result = bicor::correlation_matrix(&spiky, &options(ZeroMadFallback::None)).expect("bicor");
    assert!(result.matrix[[0, 1]].is_nan());
}

#[test]
fn fallback_individual_mixes_preparations() {
    let data = with_spiky_column(3);
    let result =
        bicor::correlation_matrix(&data, &options(ZeroMadFallback::Individual)).expect("bicor");
    assert_eq!(result.warning_code(), 1);
    let pearson0 = pearson_column(&data, 0);
    for k in 1..4 {
        let expected = dot(&pearson0, &bicor_column(&data, k));
        assert_abs_diff_eq!(result.matrix[[0, k]], expected, epsilon = 1e-12);
    }
    let expected = dot(&bicor_column(&data, 1), &bicor_column(&data, 2));
    assert_abs_diff_eq!(result.matrix[[1, 2]], expected, epsilon = 1e-12);
}

#[test]
fn fallback_all_equals_pearson() {
    let data = with_spiky_column(4);
    let result = bicor::correlation_matrix(&data, &options(ZeroMadFallback::All)).expect("bicor");
    assert_eq!(result.warning_code(), 1);
    let reference = pearson::correlation_matrix(&data, &CorOptions::default()).expect("pearson");
    assert_eq!(result.matrix, reference.matrix);
}

#[test]
fn force_pearson_never_warns() {
    let data = with_spiky_column(5);
    let result =
        bicor::correlation_matrix(&data, &options(ZeroMadFallback::ForcePearson)).expect("bicor");
    assert_eq!(result.warning_code(), 0);
    let reference = pearson::matrix(&data).expect("pearson");
    assert_eq!(result.matrix, reference);
}

#[test]
fn cross_with_one_non_robust_side() {
    let x = random_matrix(20, 3, 6);
    let mut y = random_matrix(20, 2, 7);
    y[[4, 1]] = 30.0;
    let opts = BicorOptions {
        robust_x: false,
        ..BicorOptions::default()
    };
    let result = bicor::correlation_cross_matrix(&x, &y, &opts).expect("cross");
    assert_eq!(result.matrix.dim(), (3, 2));
    for i in 0..3 {
        for j in 0..2 {
            let expected = dot(&pearson_column(&x, i), &bicor_column(&y, j));
            assert_abs_diff_eq!(result.matrix[[i, j]], expected, epsilon = 1e-12);
        }
    }
}

#[test]
fn outlier_is_down_weighted() {
    let mut data = random_matrix(30, 2, 8);
    let copy = data.column(0).to_owned();
    data.column_mut(1).assign(&copy);
    data[[7, 1]] = 1e3;
    let robust = bicor::matrix(&data).expect("bicor")[[0, 1]];
    let plain = pearson::matrix(&data).expect("pearson")[[0, 1]];
    assert!(robust > 0.9, "bicor {robust}");
    assert!(plain < 0.5, "pearson {plain}");
}

#[test]
fn max_p_outliers_limits_trimming() {
    let data = random_matrix(40, 3, 9).mapv(|v| v * v * v * 10.0);
    let full = bicor::matrix(&data).expect("default");
    let trimmed = bicor::correlation_matrix(
        &data,
        &BicorOptions {
            max_p_outliers: 0.05,
            ..BicorOptions::default()
        },
    )
    .expect("trimmed");
    for v in trimmed.matrix.iter() {
        assert!((-1.0..=1.0).contains(v));
    }
    assert_eq!(full.dim(), trimmed.matrix.dim());

    let invalid = BicorOptions {
        max_p_outliers: 1.5,
        ..BicorOptions::default()
    };
    assert_eq!(bicor::correlation_matrix(&data, &invalid).unwrap_err().code(), 5);
}

fn sorted_quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("no NaN"));
    let pos = (sorted.len() - 1) as f64 * q;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Biweight column with the outlier tails rescaled separately on each side of
/// the median. Also returns the two tail quantiles of `u`.
fn rescaled_biweight(x: &[f64], max_p: f64, cosine: bool) -> (Vec<f64>, f64, f64) {
    let med = sorted_quantile(x, 0.5);
    let dev: Vec<f64> = x.iter().map(|v| (v - med).abs()).collect();
    let mad = sorted_quantile(&dev, 0.5);
    let u: Vec<f64> = x.iter().map(|v| (v - med) / (9.0 * mad)).collect();
    let low_q = sorted_quantile(&u, max_p);
    let high_q = sorted_quantile(&u, 1.0 - max_p);
    let low_scale = low_q.min(-0.5).abs();
    let high_scale = high_q.max(0.5);
    let centre = if cosine { 0.0 } else { med };

    let raw: Vec<f64> = x
        .iter()
        .zip(&u)
        .map(|(v, &u)| {
            let u = if u < 0.0 { u * 0.5 / low_scale } else { u * 0.5 / high_scale };
            let w = if u.abs() < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
            (v - centre) * w
        })
        .collect();
    let norm = dot(&raw, &raw).sqrt();
    (raw.iter().map(|v| v / norm).collect(), low_q, high_q)
}

/// Heavy, lopsided tails: the 10% quantiles of `u` lie outside ±0.5 for the
/// first column; the second has one tail inside.
fn heavy_tailed() -> Array2<f64> {
    let t: Vec<f64> = (0..40).map(|k| (2 * k + 1) as f64 / 40.0 - 1.0).collect();
    Array2::from_shape_fn((40, 2), |(k, c)| {
        let a = t[k].powi(5) * if t[k] > 0.0 { 2.5 } else { 1.0 };
        if c == 0 {
            1.0 + a
        } else {
            0.6 * a + 0.8 * t[(11 * k + 3) % 40].powi(5) - 0.5
        }
    })
}

#[test]
fn outlier_quantiles_rescale_each_tail() {
    let data = heavy_tailed();
    let x = data.column(0).to_vec();
    let y = data.column(1).to_vec();

    for cosine in [false, true] {
        let (px, low_x, high_x) = rescaled_biweight(&x, 0.1, cosine);
        let (py, low_y, high_y) = rescaled_biweight(&y, 0.1, cosine);
        assert!(low_x < -0.5 && high_x > 0.5);
        assert!(low_y > -0.5 && high_y > 0.5);

        let opts = BicorOptions {
            max_p_outliers: 0.1,
            cor: CorOptions {
                cosine_x: cosine,
                ..CorOptions::default()
            },
            ..BicorOptions::default()
        };
        let result = bicor::correlation_matrix(&data, &opts).expect("bicor");
        assert_abs_diff_eq!(result.matrix[[0, 1]], dot(&px, &py), epsilon = 1e-12);

        // without rescaling the value moves
        let (fx, _, _) = rescaled_biweight(&x, 1.0, cosine);
        let (fy, _, _) = rescaled_biweight(&y, 1.0, cosine);
        assert!((dot(&px, &py) - dot(&fx, &fy)).abs() > 1e-3);
    }
}

#[test]
fn constant_column_is_na_under_individual_fallback() {
    let mut data = random_matrix(10, 3, 10);
    data.column_mut(2).fill(0.1);
    let result =
        bicor::correlation_matrix(&data, &options(ZeroMadFallback::Individual)).expect("bicor");
    assert_eq!(result.warning_code(), 1);
    for k in 0..3 {
        assert!(result.matrix[[2, k]].is_nan());
        assert!(result.matrix[[k, 2]].is_nan());
    }
    assert!(result.matrix[[0, 1]].is_finite());
}
