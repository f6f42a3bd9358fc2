//! Microbemeter tab-separated export.
//!
//! ```text
//! # Name: Run 3
//! # Date: 2024-03-05
//! # Time: 10:15:00
//! # Device: MBM-2
//! Time [min]	Ch1	Ch2	Temperature
//! 0	0.10	0.11	30.0
//! ```
//!
//! Every column except `Temp*` is a channel of its own; it becomes an acquisition whose
//! sub-reactor and label are the column header and whose single growth signal is `OD`.
//! The temperature column is a condition with no sub-reactor, shared by all channels.

use crate::domain::{Experiment, ReaderSettings, TimeAxis};
use crate::error::{Error, Result};
use crate::io::common::{
    clean_cell, is_blank, line_of, parse_date, parse_optional_number, parse_number, parse_time, read_records,
    split_blocks, split_name_unit, Block, ReadResult,
};

pub fn parse_microbemeter(text: &str, opts: &ReaderSettings) -> Result<ReadResult> {
    let mut meta = Experiment::new("", TimeAxis::seconds("Time", Vec::new()));
    let mut body = String::with_capacity(text.len());
    let mut comment_lines = 0;
    for line in text.lines() {
        let trimmed = clean_cell(line);
        if let Some(comment) = trimmed.strip_prefix('#') {
            if let Some((key, value)) = comment.split_once(':') {
                let value = value.trim();
                match key.trim().to_ascii_lowercase().as_str() {
                    "name" => meta.label = value.to_string(),
                    "date" => meta.date = parse_date(value),
                    "time" => meta.time = parse_time(value),
                    "device" => meta.reactor = value.to_string(),
                    other => log::debug!("Ignoring comment key '{other}'"),
                }
            }
            // Blank line keeps csv line numbers aligned with the file.
            body.push('\n');
            comment_lines += 1;
            continue;
        }
        body.push_str(line);
        body.push('\n');
    }
    log::debug!("Microbemeter: {comment_lines} comment lines");

    let records = read_records(&body, b'\t')?;
    let mut rows = records.iter().enumerate().filter(|(_, r)| !is_blank(r));
    let (header_idx, header) = rows
        .next()
        .ok_or_else(|| Error::format("No column header found."))?;
    let (time_name, time_unit) = split_name_unit(header.get(0).unwrap_or_default());
    if !time_name.eq_ignore_ascii_case("time") {
        return Err(Error::format(format!("First column must be 'Time [unit]' (found '{time_name}')."))
            .with_row(line_of(header, header_idx + 1)));
    }

    let mut channels: Vec<(usize, String)> = Vec::new();
    let mut temperature: Option<(usize, (String, String))> = None;
    for (k, cell) in header.iter().enumerate().skip(1) {
        let name = clean_cell(cell);
        if name.is_empty() {
            continue;
        }
        if name.to_ascii_lowercase().starts_with("temp") {
            temperature = Some((k, split_name_unit(name)));
        } else {
            channels.push((k, name.to_string()));
        }
    }
    if channels.is_empty() {
        return Err(Error::format("No channel columns found.").with_row(line_of(header, header_idx + 1)));
    }

    let mut axis = TimeAxis::new(time_name.clone(), &time_unit);
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); channels.len()];
    let mut temps: Vec<Option<f64>> = Vec::new();
    for (idx, rec) in rows {
        let line = line_of(rec, idx + 1);
        axis.push(parse_number(rec.get(0).unwrap_or_default(), line, &time_name)?);
        for ((k, name), column) in channels.iter().zip(values.iter_mut()) {
            column.push(parse_optional_number(rec.get(*k).unwrap_or_default(), line, name)?);
        }
        if let Some((k, (name, _))) = &temperature {
            temps.push(parse_optional_number(rec.get(*k).unwrap_or_default(), line, name)?);
        }
    }

    let mut result = ReadResult::default();
    for ((_, channel), column) in channels.iter().zip(values) {
        let mut m = meta.clone();
        m.sub_reactor = channel.clone();
        m.label = if meta.label.is_empty() {
            channel.clone()
        } else {
            format!("{} {channel}", meta.label)
        };
        let rows: Vec<(f64, Vec<Option<f64>>)> = axis.data.iter().zip(column).map(|(&t, v)| (t, vec![v])).collect();
        let growth = Block::from_sparse_rows(&[("OD".to_string(), String::new())], &rows);
        let cond = match &temperature {
            Some((_, name)) => {
                let rows: Vec<(f64, Vec<Option<f64>>)> =
                    axis.data.iter().zip(&temps).map(|(&t, &v)| (t, vec![v])).collect();
                Block::from_sparse_rows(std::slice::from_ref(name), &rows)
            }
            None => Block::default(),
        };
        let mut acq = split_blocks(&m, &time_name, growth, cond, opts)?;
        if let Some(c) = acq.conditions.as_mut() {
            c.sub_reactor.clear();
        }
        result.experiments.push(acq);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Name: Run 3\n# Date: 2024-03-05\n# Time: 10:15:00\n# Device: MBM-2\n\
Time [min]\tCh1\tCh2\tTemperature [C]\n0\t0.10\t0.11\t30.0\n1\t0.12\t\t30.1\n2\t0.14\t0.15\t30.2\n";

    #[test]
    fn one_acquisition_per_channel_with_shared_temperature() {
        let r = parse_microbemeter(SAMPLE, &ReaderSettings::default()).unwrap();
        assert_eq!(r.experiments.len(), 2);
        let ch2 = &r.experiments[1];
        assert_eq!(ch2.growth.sub_reactor, "Ch2");
        assert_eq!(ch2.growth.label, "Run 3 Ch2");
        assert_eq!(ch2.growth.reactor, "MBM-2");
        assert_eq!(ch2.growth.signal_names(), vec!["OD"]);
        assert_eq!(ch2.growth.xaxis.data, vec![0.0, 120.0]);
        let cond = ch2.conditions.as_ref().unwrap();
        assert_eq!(cond.sub_reactor, "");
        assert_eq!(cond.signals[0].name, "Temperature");
        assert_eq!(cond.xaxis.data, vec![0.0, 60.0, 120.0]);
    }

    #[test]
    fn bad_value_reports_file_line() {
        let text = SAMPLE.replace("0.12", "n/a");
        let err = parse_microbemeter(&text, &ReaderSettings::default()).unwrap_err();
        assert_eq!(err.row, Some(7));
    }
}
