//! Savitzky–Golay smoothing and differentiation.
//!
//! A window of `w` samples is fitted with a polynomial of order `p`; the smoothed value
//! (or its `d`-th derivative) at the window centre is a fixed linear combination of the
//! samples. The combination weights are row `d` of the pseudo-inverse of the
//! `w × (p+1)` matrix `B[k, i] = k^i`, `k ∈ [-(w-1)/2, (w-1)/2]`, scaled by `r^d · d!`.
//!
//! The series is padded at both ends by point-reflecting the first/last `(w-1)/2`
//! samples about `y[0]` / `y[n-1]`, so the output has the input's length.

use nalgebra::DMatrix;

use crate::error::{Error, Result};

/// Check window/order/derivative against a series of length `n`.
pub fn check_parameters(n: usize, window: usize, order: usize, deriv: usize) -> Result<()> {
    if window == 0 || window % 2 == 0 {
        return Err(Error::invalid_argument(format!(
            "Savitzky-Golay window must be a positive odd integer (got {window})."
        )));
    }
    if window < order + 2 {
        return Err(Error::invalid_argument(format!(
            "Savitzky-Golay window {window} is too small for polynomial order {order}."
        )));
    }
    if deriv > order {
        return Err(Error::invalid_argument(format!(
            "Savitzky-Golay derivative {deriv} exceeds polynomial order {order}."
        )));
    }
    if n < window {
        return Err(Error::invalid_argument(format!(
            "Series of {n} points is shorter than the Savitzky-Golay window {window}."
        )));
    }
    Ok(())
}

/// Filter weights applied to `window` consecutive samples.
pub fn coefficients(window: usize, order: usize, deriv: usize, rate: f64) -> Result<Vec<f64>> {
    check_parameters(window, window, order, deriv)?;
    let half = (window - 1) / 2;
    let b = DMatrix::from_fn(window, order + 1, |r, c| {
        let k = r as f64 - half as f64;
        k.powi(c as i32)
    });
    let pinv = b
        .pseudo_inverse(1e-12)
        .map_err(|e| Error::invalid_argument(format!("Savitzky-Golay matrix: {e}")))?;
    let factorial: f64 = (1..=deriv).map(|v| v as f64).product();
    let scale = rate.powi(deriv as i32) * factorial;
    let row: Vec<f64> = pinv.row(deriv).iter().map(|v| v * scale).collect();
    if row.iter().any(|v| !v.is_finite()) {
        return Err(Error::invalid_argument(
            "Savitzky-Golay coefficients are not finite.",
        ));
    }
    Ok(row)
}

/// Smooth (or differentiate) `y`.
pub fn savitzky_golay(
    y: &[f64],
    window: usize,
    order: usize,
    deriv: usize,
    rate: f64,
) -> Result<Vec<f64>> {
    check_parameters(y.len(), window, order, deriv)?;
    let m = coefficients(window, order, deriv, rate)?;
    let half = (window - 1) / 2;
    let n = y.len();
    let first = y[0];
    let last = y[n - 1];

    let mut padded = Vec::with_capacity(n + 2 * half);
    padded.extend(y[1..=half].iter().rev().map(|&v| first - (v - first).abs()));
    padded.extend_from_slice(y);
    padded.extend(y[n - 1 - half..n - 1].iter().rev().map(|&v| last + (v - last).abs()));

    Ok((0..n)
        .map(|j| m.iter().zip(&padded[j..j + window]).map(|(c, v)| c * v).sum())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn constant_series_is_unchanged() {
        let y = [1.0; 7];
        let out = savitzky_golay(&y, 3, 1, 0, 1.0).unwrap();
        assert_eq!(out.len(), 7);
        for v in out {
            assert_abs_diff_eq!(v, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn moving_average_weights() {
        let c = coefficients(5, 1, 0, 1.0).unwrap();
        for v in c {
            assert_abs_diff_eq!(v, 0.2, epsilon = 1e-12);
        }
    }

    #[test]
    fn first_derivative_of_line() {
        let y: Vec<f64> = (0..9).map(|i| 3.0 * i as f64 + 1.0).collect();
        let d = savitzky_golay(&y, 5, 2, 1, 1.0).unwrap();
        // Interior points see an exact line.
        for v in &d[2..7] {
            assert_abs_diff_eq!(*v, 3.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn invalid_parameters() {
        let y = [1.0; 7];
        assert!(savitzky_golay(&y, 4, 1, 0, 1.0).is_err());
        assert!(savitzky_golay(&y, 3, 2, 0, 1.0).is_err());
        assert!(savitzky_golay(&y, 5, 2, 3, 1.0).is_err());
        assert!(savitzky_golay(&y[..2], 3, 1, 0, 1.0).is_err());
        assert!(savitzky_golay(&y, 0, 0, 0, 1.0).is_err());
    }
}
