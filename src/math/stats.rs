//! Descriptive statistics shared by averaging and hypothesis tests.

use statrs::statistics::Statistics;

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.mean())
}

/// Sample standard deviation (`ddof = 1`); zero for fewer than two values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.std_dev()
}

/// Sample variance (`ddof = 1`); zero for fewer than two values.
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.variance()
}

/// Spread reported for `values`: sample standard deviation, or SEM when `sem` is set.
pub fn spread(values: &[f64], sem: bool) -> f64 {
    let sd = sample_std(values);
    if sem && !values.is_empty() {
        sd / (values.len() as f64).sqrt()
    } else {
        sd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sample_statistics() {
        let v = [0.0, 10.0];
        assert_eq!(mean(&v), Some(5.0));
        assert_relative_eq!(sample_std(&v), 50f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(spread(&v, true), 5.0, epsilon = 1e-12);
        assert_eq!(sample_std(&[3.0]), 0.0);
        assert_eq!(mean(&[]), None);
    }
}
