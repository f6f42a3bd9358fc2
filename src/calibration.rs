//! OD → cell density calibration.
//!
//! A calibration is a set of `(measured, true)` points. Inside the measured range values
//! are interpolated linearly; below and above it the first and last segments are
//! extended.

use crate::math::{interp, line_through};

#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    measured: Vec<f64>,
    truth: Vec<f64>,
}

impl Calibration {
    /// Build from paired points; points are sorted by measured value.
    ///
    /// Pairs containing non-finite values are ignored.
    pub fn new(measured: &[f64], truth: &[f64]) -> Self {
        let mut pairs: Vec<(f64, f64)> = measured
            .iter()
            .zip(truth)
            .map(|(&m, &t)| (m, t))
            .filter(|(m, t)| m.is_finite() && t.is_finite())
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (measured, truth) = pairs.into_iter().unzip();
        let cal = Self { measured, truth };
        if !cal.is_usable() {
            log::warn!(
                "Calibration has {} point(s); values will pass through unchanged",
                cal.measured.len()
            );
        }
        cal
    }

    pub fn measured(&self) -> &[f64] {
        &self.measured
    }

    pub fn truth(&self) -> &[f64] {
        &self.truth
    }

    /// At least two points are needed to interpolate.
    pub fn is_usable(&self) -> bool {
        self.measured.len() >= 2
    }

    /// Map one measured value to its calibrated value.
    pub fn apply(&self, v: f64) -> f64 {
        if !self.is_usable() {
            return v;
        }
        let n = self.measured.len();
        let point = |k: usize| (self.measured[k], self.truth[k]);
        if v < self.measured[0] {
            line_through(point(0), point(1), v)
        } else if v > self.measured[n - 1] {
            line_through(point(n - 2), point(n - 1), v)
        } else {
            interp(v, &self.measured, &self.truth).unwrap_or(v)
        }
    }

    pub fn calibrate(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.apply(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn interpolates_and_extrapolates() {
        let cal = Calibration::new(&[0.1, 0.2, 0.8, 0.9], &[1.0, 2.0, 8.0, 9.0]);
        let out = cal.calibrate(&[0.05, 0.5, 0.95]);
        assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(out[1], 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out[2], 9.5, epsilon = 1e-9);
    }

    #[test]
    fn points_are_sorted_and_reproduced() {
        let cal = Calibration::new(&[0.9, 0.1, 0.5], &[9.0, 1.0, 4.0]);
        assert_eq!(cal.measured(), &[0.1, 0.5, 0.9]);
        for (m, t) in cal.measured().iter().zip(cal.truth()) {
            assert_abs_diff_eq!(cal.apply(*m), *t, epsilon = 1e-12);
        }
    }

    #[test]
    fn single_point_is_identity() {
        let cal = Calibration::new(&[0.5], &[3.0]);
        assert_eq!(cal.calibrate(&[0.1, 0.7]), vec![0.1, 0.7]);
    }
}
