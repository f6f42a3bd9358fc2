//! Least squares fitting for a single model kind.
//!
//! Given:
//! - abscissae `x_i`
//! - observed values `y_i`
//! - optional standard deviations `σ_i` (weights `w_i = 1/σ_i²`)
//! - optional start vector and box bounds
//!
//! we find θ minimising `χ² = Σ w_i (y_i - f(x_i; θ))²`:
//!
//! - linear-in-θ models without bounds: one weighted OLS solve (SVD)
//! - otherwise: Levenberg–Marquardt with analytic Jacobians, projected onto the bounds
//! - if LM does not converge, a Nelder–Mead search (argmin) on the same cost seeds a
//!   second LM run
//!
//! The covariance estimate is `(JᵀWJ)⁻¹ · χ²/(n - p)`, matching the usual
//! "relative sigma" convention. With `n <= p` it is reported as infinite.

use argmin::core::{CostFunction, Executor};
use argmin::solver::neldermead::NelderMead;
use nalgebra::{DMatrix, DVector};

use crate::domain::TimeUnit;
use crate::error::{Error, Result};
use crate::math::{invert_normal_matrix, solve_weighted_least_squares};
use crate::models::{default_start, fill_design_row, fill_jacobian_row, predict, ModelKind};

const LM_MAX_ITERS: usize = 200;
const NM_MAX_ITERS: u64 = 2000;

/// Fitting request options.
#[derive(Debug, Clone, Default)]
pub struct FitOptions {
    /// Per-point standard deviations.
    pub sigma: Option<Vec<f64>>,
    /// Starting parameter vector (required length: `model.param_len()`).
    pub start: Option<Vec<f64>>,
    /// Box bounds `(min, max)`.
    pub bounds: Option<(Vec<f64>, Vec<f64>)>,
    /// Unit of x; sets the default exponential rate.
    pub x_unit: TimeUnit,
}

/// How the final parameters were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMethod {
    LinearLeastSquares,
    LevenbergMarquardt,
    NelderMeadThenLm,
}

/// Result of a successful fit.
#[derive(Debug, Clone)]
pub struct ModelFit {
    pub model: ModelKind,
    pub params: Vec<f64>,
    pub covariance: DMatrix<f64>,
    pub chi2: f64,
    pub n: usize,
    pub method: FitMethod,
}

impl ModelFit {
    /// Standard errors `sqrt(diag(Σ))`.
    pub fn errors(&self) -> Vec<f64> {
        (0..self.params.len())
            .map(|i| self.covariance[(i, i)].sqrt())
            .collect()
    }

    /// Parameter value by name.
    pub fn param(&self, name: &str) -> Option<f64> {
        self.model
            .param_index(name)
            .and_then(|i| self.params.get(i).copied())
    }

    pub fn predict(&self, x: f64) -> f64 {
        predict(self.model, x, &self.params)
    }
}

/// Bound-aware parameter space.
#[derive(Debug, Clone)]
struct Bounds {
    lo: Vec<f64>,
    hi: Vec<f64>,
}

impl Bounds {
    fn unbounded(p: usize) -> Self {
        Self {
            lo: vec![f64::NEG_INFINITY; p],
            hi: vec![f64::INFINITY; p],
        }
    }

    fn clamp(&self, theta: &mut [f64]) {
        for (i, v) in theta.iter_mut().enumerate() {
            *v = v.clamp(self.lo[i], self.hi[i]);
        }
    }

    /// Squared distance of θ outside the box.
    fn violation(&self, theta: &[f64]) -> f64 {
        theta
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let d = (self.lo[i] - v).max(0.0) + (v - self.hi[i]).max(0.0);
                d * d
            })
            .sum()
    }
}

/// Weighted data prepared for fitting.
struct Problem<'a> {
    model: ModelKind,
    x: &'a [f64],
    y: &'a [f64],
    w: &'a [f64],
    bounds: &'a Bounds,
}

impl Problem<'_> {
    fn chi2(&self, theta: &[f64]) -> f64 {
        self.x
            .iter()
            .zip(self.y)
            .zip(self.w)
            .map(|((&x, &y), &w)| {
                let r = y - predict(self.model, x, theta);
                w * r * r
            })
            .sum()
    }

    fn jacobian(&self, theta: &[f64]) -> DMatrix<f64> {
        let p = self.model.param_len();
        let mut j = DMatrix::zeros(self.x.len(), p);
        let mut row = vec![0.0; p];
        for (i, &x) in self.x.iter().enumerate() {
            fill_jacobian_row(self.model, x, theta, &mut row);
            for (k, v) in row.iter().enumerate() {
                j[(i, k)] = *v;
            }
        }
        j
    }

    /// `(JᵀWJ, JᵀWr)` at θ.
    fn normal_equations(&self, theta: &[f64]) -> (DMatrix<f64>, DVector<f64>) {
        let j = self.jacobian(theta);
        let mut jw = j.transpose();
        let mut r = DVector::zeros(self.x.len());
        for (i, ((&x, &y), &w)) in self.x.iter().zip(self.y).zip(self.w).enumerate() {
            jw.column_mut(i).scale_mut(w);
            r[i] = y - predict(self.model, x, theta);
        }
        (&jw * &j, &jw * r)
    }
}

impl CostFunction for Problem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let mut clamped = theta.clone();
        self.bounds.clamp(&mut clamped);
        let c = self.chi2(&clamped);
        let c = if c.is_finite() { c } else { f64::MAX / 4.0 };
        // Penalise leaving the box so the simplex stays near feasible points.
        Ok(c + 1e6 * self.bounds.violation(theta) * (1.0 + c))
    }
}

/// Fit `model` to `(x, y)`.
pub fn fit_model(model: ModelKind, x: &[f64], y: &[f64], opts: &FitOptions) -> Result<ModelFit> {
    let p = model.param_len();
    if x.len() != y.len() {
        return Err(Error::invalid_argument(format!(
            "x and y have different lengths ({} vs {}).",
            x.len(),
            y.len()
        )));
    }
    if let Some(sigma) = &opts.sigma {
        if sigma.len() != x.len() {
            return Err(Error::invalid_argument("sigma must have one value per point."));
        }
    }
    let bounds = match &opts.bounds {
        Some((lo, hi)) => {
            if lo.len() != p || hi.len() != p {
                return Err(Error::invalid_argument(format!(
                    "{model} needs {p} lower and upper bounds (got {} and {}).",
                    lo.len(),
                    hi.len()
                )));
            }
            if lo.iter().zip(hi).any(|(l, h)| l.is_nan() || h.is_nan() || l > h) {
                return Err(Error::invalid_argument("Each lower bound must be <= its upper bound."));
            }
            Some(Bounds {
                lo: lo.clone(),
                hi: hi.clone(),
            })
        }
        None => None,
    };
    if let Some(start) = &opts.start {
        if start.len() != p {
            return Err(Error::invalid_argument(format!(
                "{model} needs {p} starting values (got {}).",
                start.len()
            )));
        }
    }

    // Drop non-finite points (e.g. ln of a non-positive value).
    let mut xs = Vec::with_capacity(x.len());
    let mut ys = Vec::with_capacity(y.len());
    let mut sig = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        let s = opts.sigma.as_ref().map_or(1.0, |s| s[i]);
        if x[i].is_finite() && y[i].is_finite() && s.is_finite() {
            xs.push(x[i]);
            ys.push(y[i]);
            sig.push(s);
        }
    }
    if xs.is_empty() {
        return Err(Error::no_data(format!("No finite points to fit {model} to.")));
    }
    let w: Vec<f64> = if sig.iter().all(|&s| s > 0.0) {
        sig.iter().map(|s| 1.0 / (s * s)).collect()
    } else {
        if opts.sigma.is_some() {
            log::warn!("Some error values are zero; fitting {model} unweighted");
        }
        vec![1.0; xs.len()]
    };

    let bounds_or_open = bounds.clone().unwrap_or_else(|| Bounds::unbounded(p));
    let problem = Problem {
        model,
        x: &xs,
        y: &ys,
        w: &w,
        bounds: &bounds_or_open,
    };

    if model.is_linear() && bounds.is_none() {
        let params = fit_linear(model, &xs, &ys, &w)?;
        return finish(&problem, params, FitMethod::LinearLeastSquares);
    }

    let mut start = match &opts.start {
        Some(s) => s.clone(),
        None if model.is_linear() => fit_linear(model, &xs, &ys, &w)?,
        None => default_start(model, &xs, &ys, opts.x_unit),
    };
    bounds_or_open.clamp(&mut start);

    if let Some(params) = levenberg_marquardt(&problem, start.clone()) {
        return finish(&problem, params, FitMethod::LevenbergMarquardt);
    }
    log::debug!("{model}: Levenberg-Marquardt did not converge, trying Nelder-Mead");

    let seeded = nelder_mead(&problem, &start)?;
    match levenberg_marquardt(&problem, seeded) {
        Some(params) => finish(&problem, params, FitMethod::NelderMeadThenLm),
        None => Err(Error::fit_failure(format!(
            "{model} fit did not converge after {LM_MAX_ITERS} iterations."
        ))),
    }
}

fn fit_linear(model: ModelKind, x: &[f64], y: &[f64], w: &[f64]) -> Result<Vec<f64>> {
    let p = model.param_len();
    let mut design = DMatrix::zeros(x.len(), p);
    let mut row = vec![0.0; p];
    for (i, &xi) in x.iter().enumerate() {
        fill_design_row(model, xi, &mut row);
        for (k, v) in row.iter().enumerate() {
            design[(i, k)] = *v;
        }
    }
    let yv = DVector::from_column_slice(y);
    solve_weighted_least_squares(&design, &yv, w)
        .map(|beta| beta.iter().copied().collect())
        .ok_or_else(|| Error::fit_failure(format!("{model} least squares system is singular.")))
}

/// Projected Levenberg–Marquardt. `None` when the iteration limit is hit or the cost
/// is not finite at the start.
fn levenberg_marquardt(problem: &Problem<'_>, mut theta: Vec<f64>) -> Option<Vec<f64>> {
    let p = theta.len();
    let mut cost = problem.chi2(&theta);
    if !cost.is_finite() {
        return None;
    }
    let mut lambda = 1e-3;

    for _ in 0..LM_MAX_ITERS {
        let (a, g) = problem.normal_equations(&theta);
        if a.iter().any(|v| !v.is_finite()) || g.iter().any(|v| !v.is_finite()) {
            return None;
        }
        // Parameters pinned at a bound with the gradient pointing outwards stay fixed.
        let active: Vec<bool> = (0..p)
            .map(|k| {
                (theta[k] <= problem.bounds.lo[k] && g[k] < 0.0)
                    || (theta[k] >= problem.bounds.hi[k] && g[k] > 0.0)
            })
            .collect();
        let mut accepted = None;
        while lambda <= 1e16 {
            let mut m = a.clone();
            let mut rhs = g.clone();
            for k in 0..p {
                m[(k, k)] += lambda * a[(k, k)].max(1e-12);
            }
            for k in (0..p).filter(|&k| active[k]) {
                m.row_mut(k).fill(0.0);
                m.column_mut(k).fill(0.0);
                m[(k, k)] = 1.0;
                rhs[k] = 0.0;
            }
            let delta = m.lu().solve(&rhs);
            if let Some(delta) = delta {
                let mut cand: Vec<f64> = theta.iter().zip(delta.iter()).map(|(t, d)| t + d).collect();
                problem.bounds.clamp(&mut cand);
                let new_cost = problem.chi2(&cand);
                if new_cost.is_finite() && new_cost <= cost {
                    accepted = Some((cand, new_cost));
                    break;
                }
            }
            lambda *= 10.0;
        }

        let Some((cand, new_cost)) = accepted else {
            // No downhill step at any damping: θ is a (possibly constrained) minimum.
            return Some(theta);
        };
        let step: f64 = cand
            .iter()
            .zip(&theta)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt();
        let scale: f64 = theta.iter().map(|v| v * v).sum::<f64>().sqrt();
        let improvement = cost - new_cost;
        theta = cand;
        cost = new_cost;
        lambda = (lambda / 10.0).max(1e-12);
        if improvement <= 1e-12 * cost.max(1e-300) || step <= 1e-10 * (scale + 1e-10) {
            return Some(theta);
        }
    }
    None
}

fn initial_simplex(start: &[f64]) -> Vec<Vec<f64>> {
    let mut vertices = vec![start.to_vec()];
    for i in 0..start.len() {
        let mut v = start.to_vec();
        v[i] += if v[i] == 0.0 { 0.00025 } else { 0.05 * v[i] };
        vertices.push(v);
    }
    vertices
}

fn nelder_mead(problem: &Problem<'_>, start: &[f64]) -> Result<Vec<f64>> {
    let solver: NelderMead<Vec<f64>, f64> = NelderMead::new(initial_simplex(start))
        .with_sd_tolerance(1e-12)
        .map_err(|e| Error::fit_failure(format!("Nelder-Mead setup failed: {e}")))?;
    let res = Executor::new(
        Problem {
            model: problem.model,
            x: problem.x,
            y: problem.y,
            w: problem.w,
            bounds: problem.bounds,
        },
        solver,
    )
    .configure(|state| state.max_iters(NM_MAX_ITERS))
    .run()
    .map_err(|e| Error::fit_failure(format!("Nelder-Mead failed: {e}")))?;
    let mut best = res
        .state
        .best_param
        .ok_or_else(|| Error::fit_failure("Nelder-Mead returned no parameters."))?;
    problem.bounds.clamp(&mut best);
    Ok(best)
}

fn finish(problem: &Problem<'_>, params: Vec<f64>, method: FitMethod) -> Result<ModelFit> {
    if params.iter().any(|v| !v.is_finite()) {
        return Err(Error::fit_failure(format!(
            "{} fit produced non-finite parameters.",
            problem.model
        )));
    }
    let p = params.len();
    let n = problem.x.len();
    let chi2 = problem.chi2(&params);
    let (a, _) = problem.normal_equations(&params);
    let covariance = if n > p {
        match invert_normal_matrix(&a) {
            Some(inv) => inv * (chi2 / (n - p) as f64),
            None => DMatrix::from_element(p, p, f64::INFINITY),
        }
    } else {
        DMatrix::from_element(p, p, f64::INFINITY)
    };
    log::debug!(
        "{} fit via {:?}: chi2={chi2:.6e}, n={n}",
        problem.model,
        method
    );
    Ok(ModelFit {
        model: problem.model,
        params,
        covariance,
        chi2,
        n,
        method,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn flat_line_recovers_constant() {
        let x = ramp(8);
        let y = vec![3.25; 8];
        let fit = fit_model(ModelKind::FlatLine, &x, &y, &FitOptions::default()).unwrap();
        assert_abs_diff_eq!(fit.params[0], 3.25, epsilon = 1e-9);
        assert_eq!(fit.method, FitMethod::LinearLeastSquares);
        assert_abs_diff_eq!(fit.errors()[0], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn linear_recovers_line() {
        let x: Vec<f64> = (0..20).map(|i| 10.0 + 0.5 * i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| -2.0 * v + 7.0).collect();
        let fit = fit_model(ModelKind::Linear, &x, &y, &FitOptions::default()).unwrap();
        assert_abs_diff_eq!(fit.params[0], 7.0, epsilon = 1e-8);
        assert_abs_diff_eq!(fit.params[1], -2.0, epsilon = 1e-8);
        assert_eq!(fit.param("P1"), Some(fit.params[1]));
    }

    #[test]
    fn bounded_linear_goes_through_lm() {
        let x = ramp(10);
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let opts = FitOptions {
            bounds: Some((vec![-10.0, 0.0], vec![10.0, 1.5])),
            ..FitOptions::default()
        };
        let fit = fit_model(ModelKind::Linear, &x, &y, &opts).unwrap();
        assert_abs_diff_eq!(fit.params[1], 1.5, epsilon = 1e-9);
        // Best intercept with the slope pinned: mean(y) - 1.5 * mean(x).
        assert_abs_diff_eq!(fit.params[0], 3.25, epsilon = 1e-6);
        assert_ne!(fit.method, FitMethod::LinearLeastSquares);
    }

    #[test]
    fn exponential_growth() {
        let x: Vec<f64> = (0..15).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|v| 0.05 * (0.4 * v).exp()).collect();
        let opts = FitOptions {
            start: Some(vec![0.1, 0.1]),
            ..FitOptions::default()
        };
        let fit = fit_model(ModelKind::Exponential, &x, &y, &opts).unwrap();
        assert_abs_diff_eq!(fit.params[0], 0.05, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.params[1], 0.4, epsilon = 1e-6);
    }

    #[test]
    fn zweitering_growth() {
        let truth = [0.05, 1.2, 0.15, 6.0];
        let x: Vec<f64> = (0..60).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&v| predict(ModelKind::Zweitering, v, &truth))
            .collect();
        let fit = fit_model(ModelKind::Zweitering, &x, &y, &FitOptions::default()).unwrap();
        for (got, want) in fit.params.iter().zip(truth) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-4);
        }
    }

    #[test]
    fn argument_checks() {
        let x = ramp(5);
        let y = ramp(5);
        let bad_bounds = FitOptions {
            bounds: Some((vec![0.0], vec![1.0])),
            ..FitOptions::default()
        };
        let err = fit_model(ModelKind::Linear, &x, &y, &bad_bounds).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);

        let inverted = FitOptions {
            bounds: Some((vec![1.0, 1.0], vec![0.0, 2.0])),
            ..FitOptions::default()
        };
        assert!(fit_model(ModelKind::Linear, &x, &y, &inverted).is_err());

        let err = fit_model(ModelKind::Linear, &[], &[], &FitOptions::default()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NoData);
    }

    #[test]
    fn covariance_is_infinite_without_spare_points() {
        let fit = fit_model(ModelKind::Linear, &[0.0, 1.0], &[1.0, 2.0], &FitOptions::default())
            .unwrap();
        assert!(fit.errors().iter().all(|e| e.is_infinite()));
    }
}
