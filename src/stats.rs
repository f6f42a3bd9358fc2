//! Hypothesis tests on replicate-level measurements.
//!
//! Groups are the per-replicate values of one [`Measurement`] for selected slots.
//! Missing values are dropped before any sample count is checked.

use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};

use crate::domain::Context;
use crate::error::{Error, Result};
use crate::manager::{DataManager, Measurement};
use crate::math::stats::{mean, sample_variance};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TTestResult {
    pub t: f64,
    /// Two-sided p-value.
    pub p: f64,
    pub df: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnovaResult {
    pub f: f64,
    pub p: f64,
    pub df_between: f64,
    pub df_within: f64,
}

fn present(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().flatten().copied().filter(|v| v.is_finite()).collect()
}

/// Independent two-sample Student's t-test with pooled variance.
pub fn ttest(a: &[Option<f64>], b: &[Option<f64>]) -> Result<TTestResult> {
    let (a, b) = (present(a), present(b));
    if a.len() < 2 || b.len() < 2 {
        return Err(Error::insufficient_samples(format!(
            "t-test needs at least 2 values per group (got {} and {}).",
            a.len(),
            b.len()
        )));
    }
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let df = n1 + n2 - 2.0;
    let pooled = ((n1 - 1.0) * sample_variance(&a) + (n2 - 1.0) * sample_variance(&b)) / df;
    let diff = mean(&a).unwrap_or(f64::NAN) - mean(&b).unwrap_or(f64::NAN);
    let t = diff / (pooled * (1.0 / n1 + 1.0 / n2)).sqrt();

    let p = if t.is_nan() {
        f64::NAN
    } else {
        let dist = StudentsT::new(0.0, 1.0, df)
            .map_err(|e| Error::invalid_argument(format!("Student's t distribution: {e}")))?;
        (2.0 * dist.sf(t.abs())).min(1.0)
    };
    log::debug!("t-test: t={t}, df={df}, p={p}");
    Ok(TTestResult { t, p, df })
}

/// One-way ANOVA across `groups`.
pub fn anova(groups: &[Vec<Option<f64>>]) -> Result<AnovaResult> {
    let groups: Vec<Vec<f64>> = groups
        .iter()
        .map(|g| present(g))
        .filter(|g| !g.is_empty())
        .collect();
    let k = groups.len();
    let n: usize = groups.iter().map(Vec::len).sum();
    if k < 2 {
        return Err(Error::insufficient_samples(format!(
            "ANOVA needs at least 2 non-empty groups (got {k})."
        )));
    }
    if n <= k {
        return Err(Error::insufficient_samples(format!(
            "ANOVA needs more values than groups (got {n} values in {k} groups)."
        )));
    }

    let all: Vec<f64> = groups.iter().flatten().copied().collect();
    let grand = mean(&all).unwrap_or(f64::NAN);
    let mut ss_between = 0.0;
    let mut ss_within = 0.0;
    for g in &groups {
        let m = mean(g).unwrap_or(f64::NAN);
        ss_between += g.len() as f64 * (m - grand).powi(2);
        ss_within += g.iter().map(|v| (v - m).powi(2)).sum::<f64>();
    }
    let df_between = (k - 1) as f64;
    let df_within = (n - k) as f64;
    let f = (ss_between / df_between) / (ss_within / df_within);

    let p = if f.is_nan() {
        f64::NAN
    } else {
        let dist = FisherSnedecor::new(df_between, df_within)
            .map_err(|e| Error::invalid_argument(format!("F distribution: {e}")))?;
        dist.sf(f)
    };
    log::debug!("ANOVA: F={f}, df=({df_between}, {df_within}), p={p}");
    Ok(AnovaResult {
        f,
        p,
        df_between,
        df_within,
    })
}

/// t-test of measurement `m` between the replicates of slots `i` and `j`.
pub fn ttest_slots(
    dm: &DataManager,
    i: usize,
    j: usize,
    m: &Measurement,
    ctx: &Context,
) -> Result<TTestResult> {
    let a = dm.measure_replicates(i, m, ctx)?;
    let b = dm.measure_replicates(j, m, ctx)?;
    ttest(&a, &b)
}

/// ANOVA of measurement `m` across the replicates of `slots`.
pub fn anova_slots(dm: &DataManager, slots: &[usize], m: &Measurement, ctx: &Context) -> Result<AnovaResult> {
    let groups = slots
        .iter()
        .map(|&i| dm.measure_replicates(i, m, ctx))
        .collect::<Result<Vec<_>>>()?;
    anova(&groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use approx::assert_relative_eq;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn pooled_t_test() {
        let r = ttest(&some(&[1.0, 2.0, 3.0, 4.0, 5.0]), &some(&[2.0, 4.0, 6.0, 8.0, 10.0])).unwrap();
        assert_relative_eq!(r.t, -3.0 / 2.5f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(r.df, 8.0);
        assert_relative_eq!(r.p, 0.09435, epsilon = 1e-4);
    }

    #[test]
    fn missing_values_are_dropped() {
        let err = ttest(&[Some(1.0), None], &some(&[1.0, 2.0])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InsufficientSamples);
        let r = ttest(&[Some(1.0), None, Some(3.0)], &some(&[1.0, 3.0])).unwrap();
        assert_relative_eq!(r.t, 0.0);
        assert_relative_eq!(r.p, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn one_way_anova() {
        let groups = vec![
            some(&[1.0, 2.0, 3.0]),
            some(&[4.0, 5.0, 6.0]),
            some(&[7.0, 8.0, 9.0]),
        ];
        let r = anova(&groups).unwrap();
        assert_relative_eq!(r.f, 12.0, epsilon = 1e-12);
        assert_eq!((r.df_between, r.df_within), (2.0, 6.0));
        // For d1 = 2 the F survival function is (1 + 2F/d2)^(-d2/2).
        assert_relative_eq!(r.p, 1.0 / 125.0, epsilon = 1e-9);
    }

    #[test]
    fn anova_needs_two_groups() {
        let err = anova(&[some(&[1.0, 2.0]), vec![None]]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InsufficientSamples);
        let err = anova(&[some(&[1.0]), some(&[2.0])]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InsufficientSamples);
    }
}
