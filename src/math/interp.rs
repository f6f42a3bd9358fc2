//! Piecewise-linear interpolation on sorted grids.

/// Interpolate `fp(xp)` at `x`, clamping to the end values outside `[xp[0], xp[n-1]]`.
///
/// `xp` must be non-decreasing. Returns `None` for an empty grid.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> Option<f64> {
    let n = xp.len().min(fp.len());
    if n == 0 || x.is_nan() {
        return None;
    }
    if x <= xp[0] {
        return Some(fp[0]);
    }
    if x >= xp[n - 1] {
        return Some(fp[n - 1]);
    }
    // First index with xp[k] > x; k >= 1 because x > xp[0].
    let k = xp[..n].partition_point(|&v| v <= x);
    let (x0, x1) = (xp[k - 1], xp[k]);
    let (y0, y1) = (fp[k - 1], fp[k]);
    if x1 == x0 {
        return Some(y1);
    }
    Some(y0 + (y1 - y0) * (x - x0) / (x1 - x0))
}

/// Interpolate at every point of `x`.
pub fn interp_many(x: &[f64], xp: &[f64], fp: &[f64]) -> Option<Vec<f64>> {
    x.iter().map(|&v| interp(v, xp, fp)).collect()
}

/// Straight line through two points, evaluated at `x`.
pub fn line_through(p0: (f64, f64), p1: (f64, f64), x: f64) -> f64 {
    let (x0, y0) = p0;
    let (x1, y1) = p1;
    if x1 == x0 {
        return y0;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// Index of the element closest to `target` (first on ties).
pub fn argmin_distance(values: &[f64], target: f64) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| {
            let d = (v - target).abs();
            match best {
                Some((_, bd)) if bd <= d => best,
                _ => Some((i, d)),
            }
        })
        .map(|(i, _)| i)
}
