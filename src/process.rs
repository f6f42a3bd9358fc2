//! Signal conditioning.
//!
//! Every function here is pure: it takes paired `(x, y)` slices (and optionally `σ`)
//! and returns new vectors. The two pipelines at the bottom compose the individual
//! steps in the order the analysis uses them:
//!
//! - growth: zeros → calibration → outliers → x-origin → y-threshold → Savitzky–Golay
//! - conditions: x-origin only

use std::collections::BTreeMap;

use crate::calibration::Calibration;
use crate::domain::Context;
use crate::error::{Error, Result};
use crate::math::{self, stats};

/// A processed (possibly averaged) series with optional error bars.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Series {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub sigma: Option<Vec<f64>>,
}

impl Series {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        Self { x, y, sigma: None }
    }

    pub fn with_sigma(x: Vec<f64>, y: Vec<f64>, sigma: Vec<f64>) -> Self {
        Self {
            x,
            y,
            sigma: Some(sigma),
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

fn keep_where(x: &[f64], y: &[f64], keep: impl Fn(usize) -> bool) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .enumerate()
        .filter(|(i, _)| keep(*i))
        .map(|(_, (&a, &b))| (a, b))
        .unzip()
}

/// Drop points whose y is exactly zero.
pub fn remove_zeros(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    keep_where(x, y, |i| y[i] != 0.0)
}

/// Shift x so the series starts at zero. An empty series is returned unchanged.
pub fn align_x0(x: &[f64]) -> Vec<f64> {
    match x.first() {
        Some(&x0) => x.iter().map(|v| v - x0).collect(),
        None => Vec::new(),
    }
}

/// Shift x so the first point with `y >= threshold` sits at zero.
///
/// If y never reaches the threshold, x is returned unchanged.
pub fn align_to_y(x: &[f64], y: &[f64], threshold: f64) -> Vec<f64> {
    match y.iter().position(|&v| v >= threshold) {
        Some(i) => {
            let origin = x[i];
            x.iter().map(|v| v - origin).collect()
        }
        None => x.to_vec(),
    }
}

/// Trim points outside `[min, max]`, then optionally remove spikes.
///
/// Spike removal repeats until a pass removes nothing: with `d̄` the mean absolute
/// difference of adjacent points, every point `i + 1` whose jump from point `i`
/// exceeds `k · d̄` is dropped.
pub fn remove_outliers(
    x: &[f64],
    y: &[f64],
    min: Option<f64>,
    max: Option<f64>,
    auto: bool,
    k: f64,
) -> (Vec<f64>, Vec<f64>) {
    let (mut x, mut y) = keep_where(x, y, |i| {
        min.is_none_or(|lo| y[i] >= lo) && max.is_none_or(|hi| y[i] <= hi)
    });
    if !auto {
        return (x, y);
    }

    loop {
        if y.len() < 2 {
            break;
        }
        let diffs: Vec<f64> = y.windows(2).map(|w| (w[0] - w[1]).abs()).collect();
        let mean_diff = diffs.iter().sum::<f64>() / diffs.len() as f64;
        let limit = k * mean_diff;
        let mut drop = vec![false; y.len()];
        for (i, d) in diffs.iter().enumerate() {
            if *d > limit {
                drop[i + 1] = true;
            }
        }
        if !drop.iter().any(|&d| d) {
            break;
        }
        let before = y.len();
        (x, y) = keep_where(&x, &y, |i| !drop[i]);
        log::debug!("Spike removal dropped {} points", before - y.len());
    }
    (x, y)
}

/// Average replicates pointwise on the first replicate's x grid.
///
/// Each other replicate is linearly interpolated at those x values (end values are
/// held outside its range). σ is the sample standard deviation, or SEM when `sem`.
pub fn average_data(xs: &[Vec<f64>], ys: &[Vec<f64>], sem: bool) -> Result<Series> {
    let grid = xs
        .first()
        .ok_or_else(|| Error::no_data("No replicates to average."))?;
    let mut out = Series::with_sigma(Vec::new(), Vec::new(), Vec::new());
    let mut sigma = Vec::with_capacity(grid.len());
    for &gx in grid {
        let values: Vec<f64> = xs
            .iter()
            .zip(ys)
            .filter_map(|(x, y)| math::interp(gx, x, y))
            .collect();
        let Some(mean) = stats::mean(&values) else {
            continue;
        };
        out.x.push(gx);
        out.y.push(mean);
        sigma.push(stats::spread(&values, sem));
    }
    out.sigma = Some(sigma);
    Ok(out)
}

/// Bucket a single series into windows of width `window` (bucket `⌊x / window⌋`).
///
/// Each non-empty bucket yields its mean x, mean y and spread of y.
pub fn time_average(x: &[f64], y: &[f64], window: f64, sem: bool) -> Result<Series> {
    check_window(window)?;
    let mut buckets: BTreeMap<i64, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for (&xi, &yi) in x.iter().zip(y) {
        let key = (xi / window).floor() as i64;
        let entry = buckets.entry(key).or_default();
        entry.0.push(xi);
        entry.1.push(yi);
    }
    let mut out = Series::default();
    let mut sigma = Vec::with_capacity(buckets.len());
    for (bx, by) in buckets.values() {
        // Buckets are never empty: an entry exists only once a point was pushed.
        if let (Some(mx), Some(my)) = (stats::mean(bx), stats::mean(by)) {
            out.x.push(mx);
            out.y.push(my);
            sigma.push(stats::spread(by, sem));
        }
    }
    out.sigma = Some(sigma);
    Ok(out)
}

/// Window-average several replicates together.
///
/// Windows start at the one containing the smallest x and advance by `window`; each
/// window pools the points of every replicate that fall inside it. Iteration stops once
/// no replicate has data at or beyond the next window start.
pub fn time_average_arrays(
    xs: &[Vec<f64>],
    ys: &[Vec<f64>],
    window: f64,
    sem: bool,
) -> Result<Series> {
    check_window(window)?;
    let min_x = xs
        .iter()
        .flatten()
        .copied()
        .filter(|v| v.is_finite())
        .reduce(f64::min)
        .ok_or_else(|| Error::no_data("No replicate data to average."))?;

    let mut out = Series::default();
    let mut sigma = Vec::new();
    let mut k = (min_x / window).floor();
    loop {
        let lo = k * window;
        let hi = lo + window;
        let mut bx = Vec::new();
        let mut by = Vec::new();
        for (x, y) in xs.iter().zip(ys) {
            for (&xi, &yi) in x.iter().zip(y) {
                if xi >= lo && xi < hi {
                    bx.push(xi);
                    by.push(yi);
                }
            }
        }
        if let (Some(mx), Some(my)) = (stats::mean(&bx), stats::mean(&by)) {
            out.x.push(mx);
            out.y.push(my);
            sigma.push(stats::spread(&by, sem));
        }
        if !xs.iter().any(|x| x.iter().any(|&v| v >= hi)) {
            break;
        }
        k += 1.0;
    }
    out.sigma = Some(sigma);
    Ok(out)
}

fn check_window(window: f64) -> Result<()> {
    if window.is_finite() && window > 0.0 {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "Averaging window must be > 0 (got {window})."
        )))
    }
}

/// Restrict a series to the inclusive index range between the points closest to `a`
/// and `b` (in either order).
pub fn get_fit_data_range(series: &Series, a: f64, b: f64) -> Result<Series> {
    let ia = math::argmin_distance(&series.x, a);
    let ib = math::argmin_distance(&series.x, b);
    let (Some(ia), Some(ib)) = (ia, ib) else {
        return Err(Error::no_data("Cannot select a fit range from an empty series."));
    };
    let (lo, hi) = if ia <= ib { (ia, ib) } else { (ib, ia) };
    Ok(Series {
        x: series.x[lo..=hi].to_vec(),
        y: series.y[lo..=hi].to_vec(),
        sigma: series.sigma.as_ref().map(|s| s[lo..=hi].to_vec()),
    })
}

/// Apply the growth conditioning pipeline configured in `ctx`.
pub fn process_growth(
    x: &[f64],
    y: &[f64],
    ctx: &Context,
    calibration: Option<&Calibration>,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let p = &ctx.processing;
    let (mut x, mut y) = (x.to_vec(), y.to_vec());

    if p.remove_zeros {
        let n = x.len();
        (x, y) = remove_zeros(&x, &y);
        log::debug!("remove_zeros dropped {} points", n - x.len());
    }
    if p.calibrate {
        let cal = calibration.ok_or_else(|| {
            Error::invalid_argument("Calibration requested but no calibration is loaded.")
        })?;
        y = cal.calibrate(&y);
    }
    if p.remove_above.is_some() || p.remove_below.is_some() || p.auto_remove {
        let n = x.len();
        (x, y) = remove_outliers(
            &x,
            &y,
            p.remove_below,
            p.remove_above,
            p.auto_remove,
            p.outlier_threshold,
        );
        log::debug!("remove_outliers dropped {} points", n - x.len());
    }
    if p.align {
        x = align_x0(&x);
    }
    if let Some(threshold) = p.y_alignment {
        x = align_to_y(&x, &y, threshold);
    }
    if p.smooth {
        if y.len() < p.sg_window {
            return Err(Error::no_data(format!(
                "Only {} points left, fewer than the smoothing window {}.",
                y.len(),
                p.sg_window
            )));
        }
        y = math::savitzky_golay(&y, p.sg_window, p.sg_order, p.sg_deriv, p.sg_rate)?;
    }
    Ok((x, y))
}

/// Apply the condition pipeline (x-origin alignment only).
pub fn process_condition(x: &[f64], y: &[f64], ctx: &Context) -> (Vec<f64>, Vec<f64>) {
    let x = if ctx.processing.align {
        align_x0(x)
    } else {
        x.to_vec()
    };
    (x, y.to_vec())
}
