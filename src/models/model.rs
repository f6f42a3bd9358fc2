//! Model evaluation for the growth model family.
//!
//! The fitter relies on three primitive operations:
//! - build a design row for a given x (for OLS; linear-in-parameter models only)
//! - predict y(x) given a parameter vector
//! - fill a Jacobian row `∂y/∂θ` at x (for Levenberg–Marquardt)
//!
//! These are implemented here for each model kind.

use std::fmt;

use crate::domain::TimeUnit;
use crate::error::{Error, Result};

/// Closed set of fittable models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    FlatLine,
    Linear,
    Quadratic,
    Exponential,
    Zweitering,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::FlatLine,
        ModelKind::Linear,
        ModelKind::Quadratic,
        ModelKind::Exponential,
        ModelKind::Zweitering,
    ];

    /// Look a model up by name (case-insensitive).
    pub fn parse(name: &str) -> Result<ModelKind> {
        match name.trim().to_ascii_lowercase().as_str() {
            "flat" | "flat line" | "flat-line" | "flatline" => Ok(ModelKind::FlatLine),
            "linear" => Ok(ModelKind::Linear),
            "quadratic" => Ok(ModelKind::Quadratic),
            "exponential" => Ok(ModelKind::Exponential),
            "zweitering" => Ok(ModelKind::Zweitering),
            _ => Err(Error::model_unknown(name)),
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::FlatLine => "Flat line",
            ModelKind::Linear => "Linear",
            ModelKind::Quadratic => "Quadratic",
            ModelKind::Exponential => "Exponential",
            ModelKind::Zweitering => "Zweitering",
        }
    }

    pub fn formula(self) -> &'static str {
        match self {
            ModelKind::FlatLine => "y = p",
            ModelKind::Linear => "y = p1*x + p0",
            ModelKind::Quadratic => "y = p2*x^2 + p1*x + p0",
            ModelKind::Exponential => "y = p0*exp(p1*x)",
            ModelKind::Zweitering => "y = y0 + (A - y0)/(1 + exp((4*mu/A)*(lambda - x) + 2))",
        }
    }

    /// Parameter names in canonical order.
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            ModelKind::FlatLine => &["p"],
            ModelKind::Linear => &["p0", "p1"],
            ModelKind::Quadratic => &["p0", "p1", "p2"],
            ModelKind::Exponential => &["p0", "p1"],
            ModelKind::Zweitering => &["y0", "A", "mu", "lambda"],
        }
    }

    pub fn param_len(self) -> usize {
        self.param_names().len()
    }

    /// Index of a parameter by name (case-insensitive).
    pub fn param_index(self, name: &str) -> Option<usize> {
        self.param_names()
            .iter()
            .position(|p| p.eq_ignore_ascii_case(name.trim()))
    }

    /// True when y is linear in θ, so the fit is a single least squares solve.
    pub fn is_linear(self) -> bool {
        matches!(
            self,
            ModelKind::FlatLine | ModelKind::Linear | ModelKind::Quadratic
        )
    }

    /// Parameter units composed from the x and y unit labels.
    pub fn param_units(self, x_unit: &str, y_unit: &str) -> Vec<String> {
        let y = if y_unit.is_empty() { "a.u." } else { y_unit };
        let x = x_unit;
        match self {
            ModelKind::FlatLine => vec![y.to_string()],
            ModelKind::Linear => vec![y.to_string(), format!("{y}/{x}")],
            ModelKind::Quadratic => vec![y.to_string(), format!("{y}/{x}"), format!("{y}/{x}^2")],
            ModelKind::Exponential => vec![y.to_string(), format!("1/{x}")],
            ModelKind::Zweitering => vec![
                y.to_string(),
                y.to_string(),
                format!("{y}/{x}"),
                x.to_string(),
            ],
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Fill a design row for a linear-in-parameter model.
///
/// # Panics
/// Panics if `out` is shorter than `model.param_len()`.
pub fn fill_design_row(model: ModelKind, x: f64, out: &mut [f64]) {
    match model {
        ModelKind::FlatLine => out[0] = 1.0,
        ModelKind::Linear => {
            out[0] = 1.0;
            out[1] = x;
        }
        ModelKind::Quadratic => {
            out[0] = 1.0;
            out[1] = x;
            out[2] = x * x;
        }
        // Not linear in θ; callers go through the Jacobian instead.
        ModelKind::Exponential | ModelKind::Zweitering => {
            out.iter_mut().for_each(|v| *v = f64::NAN)
        }
    }
}

/// `1 / (1 + exp(z))` without overflow for large |z|.
fn inverse_logistic(z: f64) -> f64 {
    if z >= 0.0 {
        let e = (-z).exp();
        e / (1.0 + e)
    } else {
        1.0 / (1.0 + z.exp())
    }
}

fn zweitering_exponent(x: f64, a: f64, mu: f64, lambda: f64) -> f64 {
    (4.0 * mu / a) * (lambda - x) + 2.0
}

/// Predict `y(x)`.
///
/// # Panics
/// Panics if `theta` is shorter than `model.param_len()`.
pub fn predict(model: ModelKind, x: f64, theta: &[f64]) -> f64 {
    match model {
        ModelKind::FlatLine => theta[0],
        ModelKind::Linear => theta[1] * x + theta[0],
        ModelKind::Quadratic => theta[2] * x * x + theta[1] * x + theta[0],
        ModelKind::Exponential => theta[0] * (theta[1] * x).exp(),
        ModelKind::Zweitering => {
            let (y0, a, mu, lambda) = (theta[0], theta[1], theta[2], theta[3]);
            let s = inverse_logistic(zweitering_exponent(x, a, mu, lambda));
            y0 + (a - y0) * s
        }
    }
}

/// Fill `∂y/∂θ` at `x`.
pub fn fill_jacobian_row(model: ModelKind, x: f64, theta: &[f64], out: &mut [f64]) {
    match model {
        ModelKind::FlatLine | ModelKind::Linear | ModelKind::Quadratic => {
            fill_design_row(model, x, out)
        }
        ModelKind::Exponential => {
            let e = (theta[1] * x).exp();
            out[0] = e;
            out[1] = theta[0] * x * e;
        }
        ModelKind::Zweitering => {
            let (y0, a, mu, lambda) = (theta[0], theta[1], theta[2], theta[3]);
            let s = inverse_logistic(zweitering_exponent(x, a, mu, lambda));
            // ds/dz = -s(1-s)
            let k = -(a - y0) * s * (1.0 - s);
            let dz_da = -4.0 * mu * (lambda - x) / (a * a);
            let dz_dmu = 4.0 * (lambda - x) / a;
            let dz_dlambda = 4.0 * mu / a;
            out[0] = 1.0 - s;
            out[1] = s + k * dz_da;
            out[2] = k * dz_dmu;
            out[3] = k * dz_dlambda;
        }
    }
}

/// Starting point used when the caller gives none.
pub fn default_start(model: ModelKind, x: &[f64], y: &[f64], xvar: TimeUnit) -> Vec<f64> {
    match model {
        ModelKind::Exponential => vec![1.0, 1.0 / xvar.per_day()],
        ModelKind::Zweitering => zweitering_start(x, y),
        ModelKind::FlatLine => {
            let mean = if y.is_empty() {
                0.0
            } else {
                y.iter().sum::<f64>() / y.len() as f64
            };
            vec![mean]
        }
        ModelKind::Linear | ModelKind::Quadratic => {
            let mut start = vec![0.0; model.param_len()];
            if let (Some(&y0), Some(slope)) = (y.first(), secant_slope(x, y)) {
                start[0] = y0 - slope * x[0];
                start[1] = slope;
            }
            start
        }
    }
}

fn secant_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 || x[n - 1] == x[0] {
        return None;
    }
    Some((y[n - 1] - y[0]) / (x[n - 1] - x[0]))
}

/// `[min y, max y, steepest secant slope, x where it occurs]`.
fn zweitering_start(x: &[f64], y: &[f64]) -> Vec<f64> {
    let lo = y.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut best = (0.0, x.first().copied().unwrap_or(0.0));
    for i in 1..x.len().min(y.len()) {
        let dx = x[i] - x[i - 1];
        if dx > 0.0 {
            let slope = (y[i] - y[i - 1]) / dx;
            if slope > best.0 {
                best = (slope, x[i - 1]);
            }
        }
    }
    let (lo, hi) = if lo.is_finite() && hi.is_finite() {
        (lo, hi)
    } else {
        (0.0, 1.0)
    };
    vec![lo, hi, best.0, best.1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn parse_names() {
        assert_eq!(ModelKind::parse("Flat Line").unwrap(), ModelKind::FlatLine);
        assert_eq!(ModelKind::parse("flat").unwrap(), ModelKind::FlatLine);
        assert_eq!(ModelKind::parse("ZWEITERING").unwrap(), ModelKind::Zweitering);
        let err = ModelKind::parse("gompertz").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ModelUnknown);
    }

    #[test]
    fn formulas() {
        assert_eq!(predict(ModelKind::Linear, 2.0, &[1.0, 3.0]), 7.0);
        assert_eq!(predict(ModelKind::Quadratic, 2.0, &[1.0, 0.0, 1.0]), 5.0);
        assert_relative_eq!(predict(ModelKind::Exponential, 1.0, &[2.0, 1.0]), 2.0 * 1f64.exp());
        // At x = lambda the logistic term is 1/(1+e^2).
        let y = predict(ModelKind::Zweitering, 3.0, &[0.1, 1.1, 0.2, 3.0]);
        assert_relative_eq!(y, 0.1 + 1.0 / (1.0 + 2f64.exp()), epsilon = 1e-12);
    }

    #[test]
    fn zweitering_jacobian_matches_finite_differences() {
        let theta = [0.1, 1.5, 0.3, 4.0];
        let x = 5.0;
        let mut row = [0.0; 4];
        fill_jacobian_row(ModelKind::Zweitering, x, &theta, &mut row);
        for k in 0..4 {
            let h = 1e-6;
            let mut up = theta;
            let mut down = theta;
            up[k] += h;
            down[k] -= h;
            let fd = (predict(ModelKind::Zweitering, x, &up)
                - predict(ModelKind::Zweitering, x, &down))
                / (2.0 * h);
            assert_relative_eq!(row[k], fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn units_compose() {
        assert_eq!(
            ModelKind::Exponential.param_units("h", "OD"),
            vec!["OD".to_string(), "1/h".to_string()]
        );
        assert_eq!(ModelKind::Zweitering.param_units("d", "")[3], "d");
    }

    #[test]
    fn exponential_default_start_uses_axis_unit() {
        let s = default_start(ModelKind::Exponential, &[], &[], TimeUnit::Seconds);
        assert_eq!(s, vec![1.0, 1.0 / 86_400.0]);
    }
}
