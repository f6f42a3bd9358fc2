//! Parsing helpers shared by the readers.
//!
//! - tolerant CSV record splitting (`csv` crate, flexible rows, trimmed cells)
//! - `Name [unit]` header cells
//! - numbers with row-located `FormatError`s
//! - dates, times and timestamps in the handful of layouts instruments emit
//! - assembling growth/condition experiments from column blocks, with downsampling

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::StringRecord;

use crate::domain::{is_growth_signal, Experiment, ReaderSettings, Signal, TimeAxis};
use crate::error::{Error, Result};

/// One parsed file: acquisitions plus replicate groups (index lists into
/// `experiments`, representative first).
#[derive(Debug, Clone, Default)]
pub struct ReadResult {
    pub experiments: Vec<Acquisition>,
    pub replicate_groups: Vec<Vec<usize>>,
}

impl ReadResult {
    pub fn single(acq: Acquisition) -> Self {
        Self {
            experiments: vec![acq],
            replicate_groups: Vec::new(),
        }
    }
}

/// A growth experiment and its optional condition counterpart.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub growth: Experiment,
    pub conditions: Option<Experiment>,
}

/// Split delimited text into records.
pub fn read_records(text: &str, delimiter: u8) -> Result<Vec<StringRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut out = Vec::new();
    for rec in reader.records() {
        out.push(rec?);
    }
    Ok(out)
}

/// 1-based source line of a record (blank lines are skipped by the splitter).
pub fn line_of(rec: &StringRecord, fallback: usize) -> usize {
    rec.position().map_or(fallback, |p| p.line() as usize)
}

/// Strip a UTF-8 BOM and surrounding whitespace.
pub fn clean_cell(cell: &str) -> &str {
    cell.trim().trim_start_matches('\u{feff}').trim()
}

pub fn normalize_key(name: &str) -> String {
    clean_cell(name).to_ascii_lowercase()
}

/// True when every cell of the record is blank.
pub fn is_blank(rec: &StringRecord) -> bool {
    rec.iter().all(|c| c.trim().is_empty())
}

/// Split `"OD 680 [AU]"` into `("OD 680", "AU")`.
pub fn split_name_unit(cell: &str) -> (String, String) {
    let cell = clean_cell(cell);
    if let (Some(open), true) = (cell.rfind('['), cell.ends_with(']')) {
        let name = cell[..open].trim().to_string();
        let unit = cell[open + 1..cell.len() - 1].trim().to_string();
        return (name, unit);
    }
    (cell.to_string(), String::new())
}

/// Parse a numeric cell; `line` is 1-based.
pub fn parse_number(cell: &str, line: usize, column: &str) -> Result<f64> {
    let s = clean_cell(cell);
    s.parse::<f64>().map_err(|_| {
        Error::format(format!("Non-numeric value '{s}' in column '{column}'.")).with_row(line)
    })
}

/// Like [`parse_number`] but an empty cell is `None`.
pub fn parse_optional_number(cell: &str, line: usize, column: &str) -> Result<Option<f64>> {
    if clean_cell(cell).is_empty() {
        return Ok(None);
    }
    parse_number(cell, line, column).map(Some)
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    const FMTS: [&str; 5] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    let s = clean_cell(s);
    FMTS.iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    const FMTS: [&str; 4] = ["%H:%M:%S", "%H:%M:%S%.f", "%H:%M", "%I:%M:%S %p"];
    let s = clean_cell(s);
    FMTS.iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    const FMTS: [&str; 6] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%m/%d/%Y %H:%M:%S",
        "%d.%m.%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    let s = clean_cell(s);
    FMTS.iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Seconds between two timestamps.
pub fn seconds_between(start: NaiveDateTime, t: NaiveDateTime) -> f64 {
    (t - start).num_milliseconds() as f64 / 1000.0
}

/// Column-major samples on a shared x axis (seconds).
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub x: Vec<f64>,
    pub signals: Vec<Signal>,
}

impl Block {
    /// Build from rows where `None` means "not sampled on this row".
    ///
    /// Rows with no sample at all are skipped; remaining gaps become NaN.
    pub fn from_sparse_rows(columns: &[(String, String)], rows: &[(f64, Vec<Option<f64>>)]) -> Self {
        let mut block = Block {
            x: Vec::new(),
            signals: columns
                .iter()
                .map(|(name, unit)| Signal::new(name.clone(), unit.clone()))
                .collect(),
        };
        for (x, values) in rows {
            if !values.iter().any(Option::is_some) {
                continue;
            }
            block.x.push(*x);
            for (k, s) in block.signals.iter_mut().enumerate() {
                s.data.push(values.get(k).copied().flatten().unwrap_or(f64::NAN));
            }
        }
        block
    }

    /// Keep every `n`-th row (`row_index % n == 0`).
    pub fn downsample(mut self, n: usize) -> Self {
        if n <= 1 {
            return self;
        }
        let keep = |v: &Vec<f64>| v.iter().step_by(n).copied().collect::<Vec<_>>();
        self.x = keep(&self.x);
        for s in &mut self.signals {
            s.data = keep(&s.data);
        }
        self
    }

    /// Partition signals by `is_growth`.
    pub fn partition(self, is_growth: impl Fn(&str) -> bool) -> (Block, Block) {
        let (growth, cond): (Vec<Signal>, Vec<Signal>) =
            self.signals.into_iter().partition(|s| is_growth(&s.name));
        (
            Block {
                x: self.x.clone(),
                signals: growth,
            },
            Block {
                x: self.x,
                signals: cond,
            },
        )
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

/// Copy `meta`'s header onto a new experiment holding `block`, then check lengths.
pub fn experiment_from_block(meta: &Experiment, axis_name: &str, block: Block) -> Result<Experiment> {
    let mut exp = meta.clone();
    exp.xaxis = TimeAxis::seconds(axis_name, block.x);
    exp.signals = block.signals;
    exp.validate()?;
    Ok(exp)
}

/// Split a full table into growth and condition experiments, downsampling each.
///
/// Signals are classified with [`is_growth_signal`].
pub fn build_acquisition(
    meta: &Experiment,
    axis_name: &str,
    block: Block,
    opts: &ReaderSettings,
) -> Result<Acquisition> {
    let (growth, cond) = block.partition(is_growth_signal);
    split_blocks(meta, axis_name, growth, cond, opts)
}

/// Assemble an acquisition from already separated blocks.
pub fn split_blocks(
    meta: &Experiment,
    axis_name: &str,
    growth: Block,
    cond: Block,
    opts: &ReaderSettings,
) -> Result<Acquisition> {
    let growth = experiment_from_block(meta, axis_name, growth.downsample(opts.growth_downsample))?;
    let conditions = if cond.is_empty() {
        None
    } else {
        let mut c = experiment_from_block(meta, axis_name, cond.downsample(opts.condition_downsample))?;
        c.events.clear();
        Some(c)
    };
    Ok(Acquisition { growth, conditions })
}

/// Parse read-time headers such as `"1 h 30 min"`, `"45 min"`, `"20 s"`, `"2h"`.
pub fn parse_duration(text: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut pending: Option<f64> = None;
    let mut matched = false;
    for token in clean_cell(text).split_whitespace() {
        let split = token
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(token.len());
        let (num, unit) = token.split_at(split);
        if !num.is_empty() {
            pending = Some(num.parse::<f64>().ok()?);
        }
        if !unit.is_empty() {
            let unit = crate::domain::TimeUnit::parse(unit)?;
            total += pending.take()? * unit.seconds();
            matched = true;
        }
    }
    (matched && pending.is_none()).then_some(total)
}
