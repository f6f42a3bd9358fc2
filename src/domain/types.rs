//! Shared domain types.
//!
//! An [`Experiment`] is one acquisition from one reactor/sub-reactor: header metadata,
//! a time axis stored in seconds, any number of named signals sampled on that axis,
//! and free-text events.
//!
//! Experiments are built by the readers in `crate::io` and are treated as immutable
//! afterwards. All unit conversion happens on access.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Unit of the displayed/analysed x-axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    #[default]
    Hours,
    Days,
}

impl TimeUnit {
    /// Length of one unit in seconds.
    pub fn seconds(self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3600.0,
            TimeUnit::Days => 86_400.0,
        }
    }

    /// Number of units in one day.
    pub fn per_day(self) -> f64 {
        86_400.0 / self.seconds()
    }

    /// Short label used when composing parameter units.
    pub fn label(self) -> &'static str {
        match self {
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "min",
            TimeUnit::Hours => "h",
            TimeUnit::Days => "d",
        }
    }

    /// Recognise a free-form unit string from a source file.
    pub fn parse(unit: &str) -> Option<TimeUnit> {
        match unit.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Some(TimeUnit::Seconds),
            "m" | "min" | "mins" | "minute" | "minutes" => Some(TimeUnit::Minutes),
            "h" | "hr" | "hrs" | "hour" | "hours" => Some(TimeUnit::Hours),
            "d" | "day" | "days" => Some(TimeUnit::Days),
            _ => None,
        }
    }
}

/// The x-axis of an experiment.
///
/// Values are appended in source units and stored in seconds whenever the source
/// unit is recognised; `unit` then reads `"s"`.
#[derive(Debug, Clone)]
pub struct TimeAxis {
    pub name: String,
    pub unit: String,
    pub data: Vec<f64>,
    scale: f64,
}

impl PartialEq for TimeAxis {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.unit == other.unit && self.data == other.data
    }
}

impl TimeAxis {
    pub fn new(name: impl Into<String>, unit: &str) -> Self {
        let (unit, scale) = match TimeUnit::parse(unit) {
            Some(u) => ("s".to_string(), u.seconds()),
            None => (unit.trim().to_string(), 1.0),
        };
        Self {
            name: name.into(),
            unit,
            data: Vec::new(),
            scale,
        }
    }

    /// Axis already expressed in seconds.
    pub fn seconds(name: impl Into<String>, data: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            unit: "s".to_string(),
            data,
            scale: 1.0,
        }
    }

    /// Append a value given in the source unit.
    pub fn push(&mut self, value: f64) {
        self.data.push(value * self.scale);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One measured channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub name: String,
    pub unit: String,
    pub range: Option<(f64, f64)>,
    pub data: Vec<f64>,
}

impl Signal {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            range: None,
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Vec<f64>) -> Self {
        self.data = data;
        self
    }
}

/// Annotation without numeric values (e.g. "light on").
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub datetime: Option<NaiveDateTime>,
    /// Position on the time axis in seconds.
    pub xpos: f64,
    pub labels: Vec<String>,
}

/// Key pairing a growth experiment with its condition counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConditionKey {
    pub reactor: String,
    pub sub_reactor: String,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl ConditionKey {
    /// Match two keys; an empty sub-reactor on either side collapses the key to
    /// `(reactor, date, time)`.
    pub fn matches(&self, other: &ConditionKey) -> bool {
        if self.reactor != other.reactor || self.date != other.date || self.time != other.time {
            return false;
        }
        self.sub_reactor.is_empty()
            || other.sub_reactor.is_empty()
            || self.sub_reactor == other.sub_reactor
    }
}

/// One acquisition from one reactor/sub-reactor.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    pub label: String,
    pub title: String,
    pub reactor: String,
    pub sub_reactor: String,
    pub profile: String,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub xaxis: TimeAxis,
    pub signals: Vec<Signal>,
    pub events: Vec<Event>,
}

impl Experiment {
    pub fn new(label: impl Into<String>, xaxis: TimeAxis) -> Self {
        Self {
            label: label.into(),
            title: String::new(),
            reactor: String::new(),
            sub_reactor: String::new(),
            profile: String::new(),
            date: None,
            time: None,
            xaxis,
            signals: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Check the length invariant: every signal has one value per time point.
    pub fn validate(&self) -> Result<()> {
        for s in &self.signals {
            if s.data.len() != self.xaxis.len() {
                return Err(Error::format(format!(
                    "Signal '{}' of '{}' has {} values but the time axis has {}.",
                    s.name,
                    self.label,
                    s.data.len(),
                    self.xaxis.len()
                )));
            }
        }
        Ok(())
    }

    /// Start of the acquisition when both date and time are known.
    pub fn start(&self) -> Option<NaiveDateTime> {
        Some(self.date?.and_time(self.time?))
    }

    pub fn condition_key(&self) -> ConditionKey {
        ConditionKey {
            reactor: self.reactor.clone(),
            sub_reactor: self.sub_reactor.clone(),
            date: self.date,
            time: self.time,
        }
    }

    pub fn signal_names(&self) -> Vec<&str> {
        self.signals.iter().map(|s| s.name.as_str()).collect()
    }

    /// Resolve a signal by exact name, then case-insensitively, then by unique prefix.
    pub fn signal(&self, name: &str) -> Option<&Signal> {
        if let Some(s) = self.signals.iter().find(|s| s.name == name) {
            return Some(s);
        }
        if let Some(s) = self.signals.iter().find(|s| s.name.eq_ignore_ascii_case(name)) {
            return Some(s);
        }
        let lower = name.to_ascii_lowercase();
        let mut prefixed = self
            .signals
            .iter()
            .filter(|s| s.name.to_ascii_lowercase().starts_with(&lower));
        match (prefixed.next(), prefixed.next()) {
            (Some(s), None) => Some(s),
            _ => None,
        }
    }

    /// Time axis converted to `unit`.
    pub fn x_values(&self, unit: TimeUnit) -> Vec<f64> {
        let factor = unit.seconds();
        self.xaxis.data.iter().map(|&t| t / factor).collect()
    }

    pub fn y_values(&self, signal: &str) -> Option<&[f64]> {
        self.signal(signal).map(|s| s.data.as_slice())
    }

    /// Paired `(x, y)` for a signal with x in `unit`.
    ///
    /// Points the signal was not sampled at (NaN cells in sparse files) are left out.
    pub fn xy(&self, signal: &str, unit: TimeUnit) -> Result<(Vec<f64>, Vec<f64>)> {
        let y = self.y_values(signal).ok_or_else(|| {
            Error::no_data(format!(
                "Experiment '{}' has no signal '{signal}' (available: {}).",
                self.label,
                self.signal_names().join(", ")
            ))
        })?;
        Ok(self
            .x_values(unit)
            .into_iter()
            .zip(y)
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .map(|(x, &y)| (x, y))
            .unzip())
    }

    /// Add a label to the event at `xpos`, creating it if needed.
    pub fn add_event(&mut self, datetime: Option<NaiveDateTime>, xpos: f64, labels: Vec<String>) {
        if let Some(existing) = self.events.iter_mut().find(|e| (e.xpos - xpos).abs() < 1e-9) {
            existing.labels.extend(labels);
            return;
        }
        self.events.push(Event {
            datetime,
            xpos,
            labels,
        });
    }
}

/// True when a signal name denotes a growth (optical/relative density) channel.
pub fn is_growth_signal(name: &str) -> bool {
    let trimmed = name.trim();
    let od_prefix = trimmed
        .get(..2)
        .is_some_and(|p| p.eq_ignore_ascii_case("od"));
    od_prefix || trimmed.eq_ignore_ascii_case("RelativeDensity")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experiment() -> Experiment {
        let mut axis = TimeAxis::new("Time", "min");
        for v in [0.0, 1.0, 2.0] {
            axis.push(v);
        }
        let mut e = Experiment::new("run", axis);
        e.signals.push(Signal::new("OD 680", "AU").with_data(vec![0.1, 0.2, 0.3]));
        e.signals.push(Signal::new("OD 720", "AU").with_data(vec![0.1, 0.2, 0.3]));
        e.signals.push(Signal::new("Light", "umol").with_data(vec![5.0, 5.0, 5.0]));
        e
    }

    #[test]
    fn minutes_are_stored_as_seconds() {
        let e = experiment();
        assert_eq!(e.xaxis.unit, "s");
        assert_eq!(e.xaxis.data, vec![0.0, 60.0, 120.0]);
        assert_eq!(e.x_values(TimeUnit::Minutes), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn unknown_units_are_kept_verbatim() {
        let mut axis = TimeAxis::new("Cycle", "cycles");
        axis.push(3.0);
        assert_eq!(axis.unit, "cycles");
        assert_eq!(axis.data, vec![3.0]);
    }

    #[test]
    fn unsampled_points_are_skipped() {
        let mut e = experiment();
        e.signals[2].data[1] = f64::NAN;
        let (x, y) = e.xy("Light", TimeUnit::Minutes).unwrap();
        assert_eq!(x, vec![0.0, 2.0]);
        assert_eq!(y, vec![5.0, 5.0]);
        assert_eq!(e.xy("OD 680", TimeUnit::Minutes).unwrap().0.len(), 3);
    }

    #[test]
    fn signal_lookup_prefers_exact_then_prefix() {
        let e = experiment();
        assert_eq!(e.signal("OD 720").unwrap().name, "OD 720");
        assert_eq!(e.signal("light").unwrap().name, "Light");
        assert!(e.signal("OD").is_none(), "ambiguous prefix");
        assert_eq!(e.signal("Li").unwrap().name, "Light");
    }

    #[test]
    fn validate_rejects_length_mismatch() {
        let mut e = experiment();
        e.signals[0].data.pop();
        assert!(e.validate().is_err());
    }

    #[test]
    fn events_at_same_position_merge_labels() {
        let mut e = experiment();
        e.add_event(None, 60.0, vec!["a".into()]);
        e.add_event(None, 60.0, vec!["b".into()]);
        assert_eq!(e.events.len(), 1);
        assert_eq!(e.events[0].labels, vec!["a", "b"]);
    }

    #[test]
    fn empty_sub_reactor_collapses_key() {
        let mut a = experiment().condition_key();
        a.reactor = "R1".into();
        a.sub_reactor = "A1".into();
        let mut b = a.clone();
        b.sub_reactor.clear();
        assert!(a.matches(&b));
        b.sub_reactor = "A2".into();
        assert!(!a.matches(&b));
    }

    #[test]
    fn growth_signal_names() {
        assert!(is_growth_signal("OD 740"));
        assert!(is_growth_signal("od680"));
        assert!(is_growth_signal("RelativeDensity"));
        assert!(!is_growth_signal("Temperature"));
        assert!(!is_growth_signal("O"));
    }
}
