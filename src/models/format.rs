//! Pretty-printing of fitted parameters.
//!
//! Numbers are written with about four significant figures. When the decimal exponent
//! of a value is beyond ±2 the mantissa/exponent form is used instead (`1.234e-5`).

use crate::models::ModelKind;

const SIG_FIGS: i32 = 4;

/// Decimal exponent of `v` (`floor(log10 |v|)`), zero for 0 and non-finite values.
pub fn exponent(v: f64) -> i32 {
    if v == 0.0 || !v.is_finite() {
        return 0;
    }
    v.abs().log10().floor() as i32
}

/// Exponent of `v` once rounded to the printed significant figures, so 9999.6 counts as 1e4.
fn rounded_exponent(v: f64) -> i32 {
    let exp = exponent(v);
    let scale = 10f64.powi(SIG_FIGS - 1 - exp);
    exponent((v * scale).round() / scale)
}

fn fixed(v: f64, exp: i32) -> String {
    let decimals = (SIG_FIGS - 1 - exp).max(0) as usize;
    format!("{v:.decimals$}")
}

/// Format a single number.
pub fn format_value(v: f64) -> String {
    if !v.is_finite() {
        return v.to_string();
    }
    let exp = rounded_exponent(v);
    if exp.abs() > 2 {
        let mantissa = v / 10f64.powi(exp);
        format!("{mantissa:.3}e{exp}")
    } else {
        fixed(v, exp)
    }
}

/// Format `value ± error`, sharing the value's exponent: `(1.234 ± 0.012)e-5` or
/// `0.1234 ± 0.0056`.
pub fn format_value_error(value: f64, error: f64) -> String {
    if !value.is_finite() {
        return format!("{value} ± {}", format_value(error));
    }
    let exp = rounded_exponent(value);
    if exp.abs() > 2 {
        let scale = 10f64.powi(exp);
        format!("({:.3} ± {:.3})e{exp}", value / scale, error / scale)
    } else {
        let decimals = (SIG_FIGS - 1 - exp).max(0) as usize;
        if error.is_finite() {
            format!("{value:.decimals$} ± {error:.decimals$}")
        } else {
            format!("{value:.decimals$} ± {error}")
        }
    }
}

/// One `name = value [unit]` line per parameter.
pub fn format_parameters(
    model: ModelKind,
    theta: &[f64],
    errors: Option<&[f64]>,
    units: &[String],
) -> Vec<String> {
    model
        .param_names()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let value = theta.get(i).copied().unwrap_or(f64::NAN);
            let text = match errors.and_then(|e| e.get(i)) {
                Some(&err) => format_value_error(value, err),
                None => format_value(value),
            };
            match units.get(i) {
                Some(unit) if !unit.is_empty() => format!("{name} = {text} {unit}"),
                _ => format!("{name} = {text}"),
            }
        })
        .collect()
}
