//! Vendor B tabular export with interleaved event rows.
//!
//! ```text
//! Photobioreactor,PBR-7,A
//! Nitrogen starvation
//! Timestamp,RelativeDensity,Conditions,Temperature_C,Light_umol
//! 03/05/2024 10:00:00,0.10,,30.0,150
//! Event:,03/05/2024 10:30:00,Light on,Pump start
//! 03/05/2024 11:00:00,0.12,,30.2,150
//! ```
//!
//! The growth column is the one named `RelativeDensity`; every other column after the
//! timestamp is a condition named `Name_unit`. The literal `Conditions` column is only
//! a separator. Times are seconds since the first data row.

use chrono::NaiveDateTime;

use crate::domain::{Experiment, ReaderSettings, TimeAxis};
use crate::error::{Error, Result};
use crate::io::common::{
    clean_cell, is_blank, line_of, parse_optional_number, read_records, seconds_between, split_blocks,
    Block, ReadResult,
};

const TIMESTAMP_FMT: &str = "%m/%d/%Y %H:%M:%S";

fn parse_timestamp(cell: &str, line: usize) -> Result<NaiveDateTime> {
    let s = clean_cell(cell);
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FMT).map_err(|_| {
        Error::format(format!("Invalid timestamp '{s}' (expected MM/DD/YYYY HH:MM:SS).")).with_row(line)
    })
}

/// Split `Temperature_C` into `("Temperature", "C")`.
fn split_condition_name(header: &str) -> (String, String) {
    match header.rsplit_once('_') {
        Some((name, unit)) if !name.is_empty() => (name.to_string(), unit.to_string()),
        _ => (header.to_string(), String::new()),
    }
}

pub fn parse_eventlog(text: &str, opts: &ReaderSettings) -> Result<ReadResult> {
    let records = read_records(text, b',')?;
    if records.len() < 3 {
        return Err(Error::format("Expected device, name and column header rows."));
    }
    let device = &records[0];
    let mut meta = Experiment::new("", TimeAxis::seconds("Time", Vec::new()));
    meta.reactor = clean_cell(device.get(1).unwrap_or_default()).to_string();
    meta.sub_reactor = clean_cell(device.get(2).unwrap_or_default()).to_string();
    meta.title = clean_cell(records[1].get(0).unwrap_or_default()).to_string();
    meta.label = if meta.title.is_empty() {
        meta.reactor.clone()
    } else {
        meta.title.clone()
    };

    let header = &records[2];
    let mut growth_col = None;
    let mut cond_cols: Vec<(usize, (String, String))> = Vec::new();
    for (k, cell) in header.iter().enumerate().skip(1) {
        let name = clean_cell(cell);
        if name.is_empty() || name.eq_ignore_ascii_case("conditions") {
            continue;
        }
        if name.contains("RelativeDensity") {
            growth_col = Some(k);
        } else {
            cond_cols.push((k, split_condition_name(name)));
        }
    }
    let growth_col = growth_col
        .ok_or_else(|| Error::format("No 'RelativeDensity' column in header.").with_row(3))?;

    let mut start: Option<NaiveDateTime> = None;
    let mut growth_rows: Vec<(NaiveDateTime, Vec<Option<f64>>)> = Vec::new();
    let mut cond_rows: Vec<(NaiveDateTime, Vec<Option<f64>>)> = Vec::new();
    let mut events: Vec<(NaiveDateTime, Vec<String>)> = Vec::new();

    for (idx, rec) in records.iter().enumerate().skip(3) {
        let line = line_of(rec, idx + 1);
        if is_blank(rec) {
            continue;
        }
        let first = clean_cell(rec.get(0).unwrap_or_default());
        if first.eq_ignore_ascii_case("Event:") {
            let t = parse_timestamp(rec.get(1).unwrap_or_default(), line)?;
            let labels = rec
                .iter()
                .skip(2)
                .map(clean_cell)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            events.push((t, labels));
            continue;
        }
        let t = parse_timestamp(first, line)?;
        start.get_or_insert(t);
        let g = parse_optional_number(rec.get(growth_col).unwrap_or_default(), line, "RelativeDensity")?;
        growth_rows.push((t, vec![g]));
        let mut values = Vec::with_capacity(cond_cols.len());
        for (k, (name, _)) in &cond_cols {
            values.push(parse_optional_number(rec.get(*k).unwrap_or_default(), line, name)?);
        }
        cond_rows.push((t, values));
    }
    let start = start.ok_or_else(|| Error::format("No data rows."))?;
    meta.date = Some(start.date());
    meta.time = Some(start.time());
    for (t, labels) in events {
        meta.add_event(Some(t), seconds_between(start, t), labels);
    }

    let rel = |rows: Vec<(NaiveDateTime, Vec<Option<f64>>)>| -> Vec<(f64, Vec<Option<f64>>)> {
        rows.into_iter()
            .map(|(t, v)| (seconds_between(start, t), v))
            .collect()
    };
    let growth = Block::from_sparse_rows(
        &[("RelativeDensity".to_string(), String::new())],
        &rel(growth_rows),
    );
    let cond_names: Vec<(String, String)> = cond_cols.into_iter().map(|(_, n)| n).collect();
    let cond = Block::from_sparse_rows(&cond_names, &rel(cond_rows));
    let acq = split_blocks(&meta, "Time", growth, cond, opts)?;
    Ok(ReadResult::single(acq))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Photobioreactor,PBR-7,A\nNitrogen starvation\n\
Timestamp,RelativeDensity,Conditions,Temperature_C,Light_umol\n\
03/05/2024 10:00:00,0.10,,30.0,150\n\
Event:,03/05/2024 10:30:00,Light on\n\
Event:,03/05/2024 10:30:00,Pump start\n\
03/05/2024 11:00:00,0.12,,30.2,\n\
03/05/2024 11:30:00,,,30.4,160\n";

    #[test]
    fn growth_conditions_and_events() {
        let r = parse_eventlog(SAMPLE, &ReaderSettings::default()).unwrap();
        let acq = &r.experiments[0];
        let g = &acq.growth;
        assert_eq!(g.reactor, "PBR-7");
        assert_eq!(g.sub_reactor, "A");
        assert_eq!(g.title, "Nitrogen starvation");
        assert_eq!(g.xaxis.data, vec![0.0, 3600.0]);
        assert_eq!(g.events.len(), 1);
        assert_eq!(g.events[0].xpos, 1800.0);
        assert_eq!(g.events[0].labels, vec!["Light on", "Pump start"]);

        let c = acq.conditions.as_ref().unwrap();
        assert_eq!(c.signal_names(), vec!["Temperature", "Light"]);
        assert_eq!(c.signals[0].unit, "C");
        assert_eq!(c.xaxis.data, vec![0.0, 3600.0, 5400.0]);
        assert!(c.signals[1].data[1].is_nan());
    }

    #[test]
    fn bad_timestamp_is_located() {
        let text = SAMPLE.replace("03/05/2024 11:00:00", "yesterday");
        let err = parse_eventlog(&text, &ReaderSettings::default()).unwrap_err();
        assert_eq!(err.row, Some(7));
    }
}
