//! Replicate-aware access to loaded experiments.
//!
//! [`DataManager`] owns the growth and condition holders plus the optional calibration.
//! Every query takes the [`Context`] it should run under, pulls raw series from the
//! holders, runs the processing pipeline per replicate and aggregates.
//!
//! Per-experiment measurements return one `Option<f64>` per primary. `None` marks a
//! value that could not be computed (no data in range, threshold never reached) and is
//! never silently replaced by zero.

use rayon::prelude::*;

use crate::calibration::Calibration;
use crate::data::DataHolder;
use crate::domain::{Context, Experiment};
use crate::error::{Error, ErrorKind, Result};
use crate::fit::{fit_model, FitOptions, ModelFit};
use crate::io::ReadResult;
use crate::math::{self, stats};
use crate::models::ModelKind;
use crate::process::{self, Series};

/// A scalar derived from one processed series.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    /// Slope of the secant between the first points where y reaches `from` and `to`.
    Gradient { signal: String, from: f64, to: f64 },
    /// First x at which y reaches `value`.
    TimeTo { signal: String, value: f64 },
    /// Mean growth value inside `[from, to]`.
    Average { signal: String, from: Option<f64>, to: Option<f64> },
    /// Mean condition value inside `[from, to]`.
    ConditionAverage { signal: String, from: Option<f64>, to: Option<f64> },
    /// Condition value interpolated at `time`.
    ConditionAt { signal: String, time: f64 },
    /// Named parameter of the configured fit.
    FitParameter { signal: String, name: String },
}

impl Measurement {
    pub fn signal(&self) -> &str {
        match self {
            Measurement::Gradient { signal, .. }
            | Measurement::TimeTo { signal, .. }
            | Measurement::Average { signal, .. }
            | Measurement::ConditionAverage { signal, .. }
            | Measurement::ConditionAt { signal, .. }
            | Measurement::FitParameter { signal, .. } => signal,
        }
    }

    fn uses_conditions(&self) -> bool {
        matches!(
            self,
            Measurement::ConditionAverage { .. } | Measurement::ConditionAt { .. }
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataManager {
    growth: DataHolder,
    conditions: DataHolder,
    calibration: Option<Calibration>,
}

impl DataManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn growth(&self) -> &DataHolder {
        &self.growth
    }

    pub fn conditions(&self) -> &DataHolder {
        &self.conditions
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn set_calibration(&mut self, calibration: Option<Calibration>) {
        self.calibration = calibration;
    }

    pub fn len(&self) -> usize {
        self.growth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.growth.is_empty()
    }

    /// Add one reader result. Replicate groups become slots headed by their
    /// representative unless `readers.merge_replicates` is off.
    ///
    /// Returns the indices of the new growth slots.
    pub fn load(&mut self, result: ReadResult, ctx: &Context) -> Vec<usize> {
        let groups = if ctx.readers.merge_replicates {
            result.replicate_groups
        } else {
            Vec::new()
        };
        let n = result.experiments.len();
        // For each experiment: Some(group) if it represents one, None if it is a member.
        let mut role: Vec<Option<Option<usize>>> = vec![Some(None); n];
        for (g, members) in groups.iter().enumerate() {
            for (k, &m) in members.iter().enumerate() {
                if m < n {
                    role[m] = if k == 0 { Some(Some(g)) } else { None };
                }
            }
        }

        let mut growth: Vec<Option<Experiment>> = Vec::with_capacity(n);
        for acq in result.experiments {
            if let Some(c) = acq.conditions {
                self.conditions.add_primary(c);
            }
            growth.push(Some(acq.growth));
        }

        let mut added = Vec::new();
        for i in 0..n {
            let Some(group) = role[i] else { continue };
            let Some(primary) = growth[i].take() else { continue };
            let slot = self.growth.add_primary(primary);
            added.push(slot);
            if let Some(g) = group {
                for &m in groups[g].iter().skip(1).filter(|&&m| m < n) {
                    if let Some(rep) = growth[m].take() {
                        // Slot was created just above, so this cannot fail.
                        let _ = self.growth.add_replicate(slot, rep);
                    }
                }
            }
        }
        log::info!(
            "Loaded {} growth slot(s), {} condition experiment(s) in total",
            self.growth.len(),
            self.conditions.len()
        );
        added
    }

    pub fn delete(&mut self, i: usize) -> Result<()> {
        self.growth.delete(i).map(|_| ())
    }

    pub fn delete_replicate(&mut self, i: usize, j: usize) -> Result<()> {
        self.growth.delete_replicate(i, j).map(|_| ())
    }

    fn replicates(&self, i: usize) -> Result<&[Experiment]> {
        self.growth.replicates(i).ok_or_else(|| {
            Error::invalid_argument(format!(
                "No experiment at index {i} (have {}).",
                self.growth.len()
            ))
        })
    }

    /// Condition experiment paired with `growth` by `(reactor, sub_reactor, date, time)`.
    pub fn find_condition(&self, growth: &Experiment) -> Result<&Experiment> {
        let key = growth.condition_key();
        let mut matches = self
            .conditions
            .iter_all()
            .filter(|c| key.matches(&c.condition_key()));
        let first = matches.next().ok_or_else(|| {
            Error::no_condition_match(format!(
                "No condition data for '{}' (reactor '{}', sub-reactor '{}').",
                growth.label, growth.reactor, growth.sub_reactor
            ))
        })?;
        let extra = matches.count();
        if extra > 0 {
            log::warn!(
                "{} condition experiments match '{}'; using the first",
                extra + 1,
                growth.label
            );
        }
        Ok(first)
    }

    /// Processed growth series of every replicate in slot `i`.
    pub fn get_replicate_xy_data(
        &self,
        i: usize,
        signal: &str,
        ctx: &Context,
    ) -> Result<(Vec<Vec<f64>>, Vec<Vec<f64>>)> {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for exp in self.replicates(i)? {
            let (x, y) = exp.xy(signal, ctx.axes.xvar)?;
            let (x, y) = process::process_growth(&x, &y, ctx, self.calibration.as_ref())?;
            xs.push(x);
            ys.push(y);
        }
        Ok((xs, ys))
    }

    /// Processed condition series paired with every replicate in slot `i`.
    pub fn get_condition_replicate_xy_data(
        &self,
        i: usize,
        signal: &str,
        ctx: &Context,
    ) -> Result<(Vec<Vec<f64>>, Vec<Vec<f64>>)> {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for exp in self.replicates(i)? {
            let cond = self.find_condition(exp)?;
            let (x, y) = cond.xy(signal, ctx.axes.xvar)?;
            let (x, y) = process::process_condition(&x, &y, ctx);
            xs.push(x);
            ys.push(y);
        }
        Ok((xs, ys))
    }

    /// Aggregate replicate series.
    ///
    /// | replicates | window | result |
    /// |---|---|---|
    /// | several | yes | [`process::time_average_arrays`] |
    /// | several | no | [`process::average_data`] |
    /// | one | yes | [`process::time_average`] |
    /// | one | no | the replicate itself |
    pub fn get_averaged_data(
        xs: &[Vec<f64>],
        ys: &[Vec<f64>],
        window: Option<f64>,
        sem: bool,
    ) -> Result<Series> {
        match (xs.len(), window) {
            (0, _) => Err(Error::no_data("No replicate data to average.")),
            (1, Some(w)) => process::time_average(&xs[0], &ys[0], w, sem),
            (1, None) => Ok(Series::new(xs[0].clone(), ys[0].clone())),
            (_, Some(w)) => process::time_average_arrays(xs, ys, w, sem),
            (_, None) => process::average_data(xs, ys, sem),
        }
    }

    /// Averaged growth series of slot `i`, log-normalised when `display.ynormlog`.
    pub fn get_xy_data(&self, i: usize, signal: &str, ctx: &Context) -> Result<Series> {
        let (xs, ys) = self.get_replicate_xy_data(i, signal, ctx)?;
        let series = Self::get_averaged_data(&xs, &ys, ctx.averaging.growth_average, ctx.stats.std_err)?;
        finish_growth(series, ctx)
    }

    /// Averaged condition series paired with slot `i`.
    pub fn get_condition_xy_data(&self, i: usize, signal: &str, ctx: &Context) -> Result<Series> {
        let (xs, ys) = self.get_condition_replicate_xy_data(i, signal, ctx)?;
        Self::get_averaged_data(&xs, &ys, ctx.averaging.condition_average, ctx.stats.std_err)
    }

    /// Growth series of slot `i` restricted to the configured fit range.
    pub fn get_fit_data(&self, i: usize, signal: &str, ctx: &Context) -> Result<Series> {
        let series = self.get_xy_data(i, signal, ctx)?;
        fit_range(&series, ctx.fit.from, ctx.fit.to)
    }

    pub fn get_title(&self, i: usize) -> Option<&str> {
        self.growth.primary(i).map(|e| e.label.as_str())
    }

    pub fn get_titles(&self) -> Vec<String> {
        self.growth.primaries().map(|e| e.label.clone()).collect()
    }

    /// Legend text: label plus the parts enabled in `display`, and `(n=k)` for slots
    /// with replicates.
    pub fn get_legend(&self, i: usize, ctx: &Context) -> Option<String> {
        let reps = self.growth.replicates(i)?;
        let e = &reps[0];
        let d = &ctx.display;
        let mut parts = vec![e.label.clone()];
        if d.legend_title && !e.title.is_empty() && e.title != e.label {
            parts.push(e.title.clone());
        }
        if d.legend_reactor && !e.reactor.is_empty() {
            parts.push(e.reactor.clone());
        }
        if d.legend_profile && !e.profile.is_empty() {
            parts.push(e.profile.clone());
        }
        let mut legend = parts.join(" ");
        if reps.len() > 1 {
            legend.push_str(&format!(" (n={})", reps.len()));
        }
        Some(legend)
    }

    /// Growth (or paired condition) series for slot `i`: averaged when `replicate` is
    /// `None`, otherwise the single processed replicate.
    fn series_for(
        &self,
        i: usize,
        replicate: Option<usize>,
        signal: &str,
        conditions: bool,
        ctx: &Context,
    ) -> Result<Series> {
        let Some(j) = replicate else {
            return if conditions {
                self.get_condition_xy_data(i, signal, ctx)
            } else {
                self.get_xy_data(i, signal, ctx)
            };
        };
        let reps = self.replicates(i)?;
        let exp = reps.get(j).ok_or_else(|| {
            Error::invalid_argument(format!("Slot {i} has no replicate {j}."))
        })?;
        if conditions {
            let (x, y) = self.find_condition(exp)?.xy(signal, ctx.axes.xvar)?;
            let (x, y) = process::process_condition(&x, &y, ctx);
            Ok(Series::new(x, y))
        } else {
            let (x, y) = exp.xy(signal, ctx.axes.xvar)?;
            let (x, y) = process::process_growth(&x, &y, ctx, self.calibration.as_ref())?;
            finish_growth(Series::new(x, y), ctx)
        }
    }

    fn evaluate(
        &self,
        m: &Measurement,
        i: usize,
        replicate: Option<usize>,
        ctx: &Context,
    ) -> Result<Option<f64>> {
        let series = self.series_for(i, replicate, m.signal(), m.uses_conditions(), ctx)?;
        match m {
            Measurement::Gradient { from, to, .. } => Ok(gradient(&series, *from, *to)),
            Measurement::TimeTo { value, .. } => Ok(time_to(&series, *value)),
            Measurement::Average { from, to, .. } | Measurement::ConditionAverage { from, to, .. } => {
                Ok(window_mean(&series, *from, *to))
            }
            Measurement::ConditionAt { time, .. } => Ok(value_at(&series, *time)),
            Measurement::FitParameter { name, .. } => {
                let model = ModelKind::parse(&ctx.fit.model)?;
                let index = param_index(model, name)?;
                Ok(fit_series(model, &series, ctx)?.map(|f| f.params[index]))
            }
        }
    }

    /// Evaluate `m` on every primary, in parallel.
    pub fn measure(&self, m: &Measurement, ctx: &Context) -> Result<Vec<Option<f64>>> {
        let results: Vec<Result<Option<f64>>> = (0..self.growth.len())
            .into_par_iter()
            .map(|i| self.evaluate(m, i, None, ctx))
            .collect();
        collect_optional(results)
    }

    /// Evaluate `m` on every replicate of slot `i` individually.
    pub fn measure_replicates(&self, i: usize, m: &Measurement, ctx: &Context) -> Result<Vec<Option<f64>>> {
        let n = self.replicates(i)?.len();
        let results = (0..n).map(|j| self.evaluate(m, i, Some(j), ctx)).collect();
        collect_optional(results)
    }

    pub fn get_gradients(&self, signal: &str, from: f64, to: f64, ctx: &Context) -> Result<Vec<Option<f64>>> {
        self.measure(
            &Measurement::Gradient {
                signal: signal.to_string(),
                from,
                to,
            },
            ctx,
        )
    }

    pub fn get_time_to(&self, signal: &str, value: f64, ctx: &Context) -> Result<Vec<Option<f64>>> {
        self.measure(
            &Measurement::TimeTo {
                signal: signal.to_string(),
                value,
            },
            ctx,
        )
    }

    pub fn get_averages(
        &self,
        signal: &str,
        from: Option<f64>,
        to: Option<f64>,
        ctx: &Context,
    ) -> Result<Vec<Option<f64>>> {
        self.measure(
            &Measurement::Average {
                signal: signal.to_string(),
                from,
                to,
            },
            ctx,
        )
    }

    pub fn get_condition_averages(
        &self,
        signal: &str,
        from: Option<f64>,
        to: Option<f64>,
        ctx: &Context,
    ) -> Result<Vec<Option<f64>>> {
        self.measure(
            &Measurement::ConditionAverage {
                signal: signal.to_string(),
                from,
                to,
            },
            ctx,
        )
    }

    pub fn get_condition_at_time(&self, signal: &str, time: f64, ctx: &Context) -> Result<Vec<Option<f64>>> {
        self.measure(
            &Measurement::ConditionAt {
                signal: signal.to_string(),
                time,
            },
            ctx,
        )
    }

    pub fn get_fit_parameter(&self, signal: &str, name: &str, ctx: &Context) -> Result<Vec<Option<f64>>> {
        self.measure(
            &Measurement::FitParameter {
                signal: signal.to_string(),
                name: name.to_string(),
            },
            ctx,
        )
    }

    /// Fit the configured model to every primary's fit-range data.
    pub fn get_fits(&self, signal: &str, ctx: &Context) -> Result<Vec<Option<ModelFit>>> {
        let model = ModelKind::parse(&ctx.fit.model)?;
        let results: Vec<Result<Option<ModelFit>>> = (0..self.growth.len())
            .into_par_iter()
            .map(|i| {
                let series = self.get_xy_data(i, signal, ctx)?;
                fit_series(model, &series, ctx)
            })
            .collect();
        collect_optional(results)
    }
}

fn finish_growth(mut series: Series, ctx: &Context) -> Result<Series> {
    if series.is_empty() {
        return Err(Error::no_data("No points left after processing."));
    }
    if ctx.display.ynormlog {
        let y0 = series.y[0];
        if !(y0.is_finite() && y0 > 0.0) {
            return Err(Error::no_data(format!(
                "Cannot log-normalise: first value {y0} is not positive."
            )));
        }
        if let Some(sigma) = series.sigma.as_mut() {
            for (s, y) in sigma.iter_mut().zip(&series.y) {
                *s /= y.abs();
            }
        }
        for y in &mut series.y {
            *y = (*y / y0).ln();
        }
    }
    Ok(series)
}

/// Fit range from optional bounds; a missing bound means the series end.
fn fit_range(series: &Series, from: Option<f64>, to: Option<f64>) -> Result<Series> {
    if from.is_none() && to.is_none() {
        return Ok(series.clone());
    }
    let first = series.x.first().copied().unwrap_or(f64::NEG_INFINITY);
    let last = series.x.last().copied().unwrap_or(f64::INFINITY);
    process::get_fit_data_range(series, from.unwrap_or(first), to.unwrap_or(last))
}

/// Secant slope between the first points with `y >= from` and `y >= to`.
fn gradient(series: &Series, from: f64, to: f64) -> Option<f64> {
    let ia = series.y.iter().position(|&y| y >= from)?;
    let ib = series.y.iter().position(|&y| y >= to)?;
    let dx = series.x[ib] - series.x[ia];
    if dx == 0.0 {
        return None;
    }
    Some((series.y[ib] - series.y[ia]) / dx)
}

fn time_to(series: &Series, value: f64) -> Option<f64> {
    series
        .y
        .iter()
        .position(|&y| y >= value)
        .map(|k| series.x[k])
}

fn window_mean(series: &Series, from: Option<f64>, to: Option<f64>) -> Option<f64> {
    let values: Vec<f64> = series
        .x
        .iter()
        .zip(&series.y)
        .filter(|(x, _)| from.is_none_or(|a| **x >= a) && to.is_none_or(|b| **x <= b))
        .map(|(_, &y)| y)
        .collect();
    stats::mean(&values)
}

/// Interpolated value at `t`; `None` outside the sampled range.
fn value_at(series: &Series, t: f64) -> Option<f64> {
    let (first, last) = (*series.x.first()?, *series.x.last()?);
    if t < first || t > last {
        return None;
    }
    math::interp(t, &series.x, &series.y)
}

fn param_index(model: ModelKind, name: &str) -> Result<usize> {
    model.param_index(name).ok_or_else(|| {
        Error::invalid_argument(format!(
            "{model} has no parameter '{name}' (parameters: {}).",
            model.param_names().join(", ")
        ))
    })
}

fn fit_options(model: ModelKind, series: &Series, ctx: &Context) -> Result<FitOptions> {
    let f = &ctx.fit;
    let bounds = match (f.min.is_empty(), f.max.is_empty()) {
        (true, true) => None,
        (false, false) => Some((f.min.clone(), f.max.clone())),
        _ => {
            return Err(Error::invalid_argument(format!(
                "Bounds for {model} need both min and max."
            )))
        }
    };
    Ok(FitOptions {
        sigma: series.sigma.clone(),
        start: (!f.start.is_empty()).then(|| f.start.clone()),
        bounds,
        x_unit: ctx.axes.xvar,
    })
}

fn fit_series(model: ModelKind, series: &Series, ctx: &Context) -> Result<Option<ModelFit>> {
    let range = fit_range(series, ctx.fit.from, ctx.fit.to)?;
    let opts = fit_options(model, &range, ctx)?;
    fit_model(model, &range.x, &range.y, &opts).map(Some)
}

/// Turn per-experiment failures that only mean "no value here" into `None`.
fn collect_optional<T>(results: Vec<Result<Option<T>>>) -> Result<Vec<Option<T>>> {
    results
        .into_iter()
        .map(|r| match r {
            Err(e) if matches!(e.kind, ErrorKind::NoData | ErrorKind::FitFailure) => {
                log::warn!("{e}");
                Ok(None)
            }
            other => other,
        })
        .collect()
}
