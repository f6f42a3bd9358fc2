//! Plain-text tables for the terminal.
//!
//! Missing values render as blank cells, never as zero.

use crate::domain::Context;
use crate::fit::ModelFit;
use crate::manager::DataManager;
use crate::models::{format_parameters, format_value};
use crate::stats::{AnovaResult, TTestResult};

const LABEL_WIDTH: usize = 28;

/// One line per slot: label, replicate count, origin and available signals.
pub fn format_summary(dm: &DataManager, ctx: &Context) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== odc - {} experiment(s) ===\n", dm.len()));
    out.push_str(&header(&[
        ("#", 3, false),
        ("label", LABEL_WIDTH, false),
        ("n", 3, true),
        ("reactor", 12, false),
        ("start", 19, false),
        ("points", 7, true),
    ]));
    for (i, reps) in (0..dm.len()).filter_map(|i| dm.growth().replicates(i).map(|r| (i, r))) {
        let e = &reps[0];
        let reactor = if e.sub_reactor.is_empty() {
            e.reactor.clone()
        } else {
            format!("{}/{}", e.reactor, e.sub_reactor)
        };
        let start = match (e.date, e.time) {
            (Some(d), Some(t)) => d.and_time(t).format("%Y-%m-%d %H:%M:%S").to_string(),
            (Some(d), None) => d.to_string(),
            _ => String::new(),
        };
        let legend = dm.get_legend(i, ctx).unwrap_or_default();
        out.push_str(
            format!(
                "{i:<3} {:<LABEL_WIDTH$} {:>3} {:<12} {:<19} {:>7}",
                truncate(&legend, LABEL_WIDTH),
                reps.len(),
                truncate(&reactor, 12),
                start,
                e.xaxis.len(),
            )
            .trim_end(),
        );
        out.push('\n');
        out.push_str(&format!("    signals: {}\n", e.signal_names().join(", ")));
    }
    let conditions = dm.conditions().len();
    if conditions > 0 {
        out.push_str(&format!("\n{conditions} condition experiment(s) loaded\n"));
    }
    out
}

/// Measurement table: one row per slot.
pub fn format_measurements(title: &str, labels: &[String], values: &[Option<f64>], unit: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("{title}\n"));
    let value_title = if unit.is_empty() {
        "value".to_string()
    } else {
        format!("value [{unit}]")
    };
    out.push_str(&header(&[("#", 3, false), ("label", LABEL_WIDTH, false), (value_title.as_str(), 16, true)]));
    for (i, (label, value)) in labels.iter().zip(values).enumerate() {
        let cell = value.map(format_value).unwrap_or_default();
        out.push_str(format!("{i:<3} {:<LABEL_WIDTH$} {cell:>16}", truncate(label, LABEL_WIDTH)).trim_end());
        out.push('\n');
    }
    out
}

/// Fit results: model header then one block of parameters per slot.
pub fn format_fits(labels: &[String], fits: &[Option<ModelFit>], x_unit: &str, y_unit: &str) -> String {
    let mut out = String::new();
    if let Some(model) = fits.iter().flatten().map(|f| f.model).next() {
        out.push_str(&format!("Model: {} ({})\n", model.display_name(), model.formula()));
    }
    for (i, (label, fit)) in labels.iter().zip(fits).enumerate() {
        out.push_str(&format!("\n[{i}] {label}\n"));
        let Some(fit) = fit else {
            out.push_str("  (no fit)\n");
            continue;
        };
        let units = fit.model.param_units(x_unit, y_unit);
        let errors = fit.errors();
        for line in format_parameters(fit.model, &fit.params, Some(&errors), &units) {
            out.push_str(&format!("  {line}\n"));
        }
        out.push_str(&format!("  chi2 = {}  n = {}  ({:?})\n", format_value(fit.chi2), fit.n, fit.method));
    }
    out
}

pub fn format_ttest(a: &str, b: &str, r: &TTestResult) -> String {
    format!(
        "t-test: {a} vs {b}\n  t = {}\n  df = {}\n  p = {}\n",
        format_value(r.t),
        r.df,
        format_value(r.p)
    )
}

pub fn format_anova(labels: &[String], r: &AnovaResult) -> String {
    let mut out = String::from("One-way ANOVA\n");
    for label in labels {
        out.push_str(&format!("  - {label}\n"));
    }
    out.push_str(&format!(
        "  F = {}\n  df = ({}, {})\n  p = {}\n",
        format_value(r.f),
        r.df_between,
        r.df_within,
        format_value(r.p)
    ));
    out
}

fn header(columns: &[(&str, usize, bool)]) -> String {
    let mut names = Vec::with_capacity(columns.len());
    let mut rules = Vec::with_capacity(columns.len());
    for &(name, width, right) in columns {
        names.push(if right {
            format!("{name:>width$}")
        } else {
            format!("{name:<width$}")
        });
        rules.push("-".repeat(width));
    }
    format!("{}\n{}\n", names.join(" ").trim_end(), rules.join(" "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_values_are_blank() {
        let labels = vec!["a".to_string(), "b".to_string()];
        let text = format_measurements("Gradient", &labels, &[Some(1.5), None], "AU/h");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Gradient");
        assert!(lines[1].ends_with("value [AU/h]"));
        assert!(lines[3].starts_with("0") && lines[3].ends_with("1.500"));
        assert_eq!(lines[4].trim_end(), "1   b");
    }

    #[test]
    fn long_labels_are_truncated() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }

    #[test]
    fn anova_lists_groups() {
        let r = AnovaResult {
            f: 12.0,
            p: 0.008,
            df_between: 2.0,
            df_within: 6.0,
        };
        let text = format_anova(&["x".into(), "y".into()], &r);
        assert!(text.contains("  - x\n  - y\n"));
        assert!(text.contains("df = (2, 6)"));
    }
}
