//! Vendor A "Pro" text export.
//!
//! ```text
//! [Header]
//! Name=Run 12
//! Reactor=PBR-3
//! Date=2024-03-05
//! Time=10:15:00
//! Columns="Time,OD 680,OD 720,Light"
//! Units="s,AU,AU,umol/m2/s"
//! [Data]
//! 0<TAB>0.101<TAB>0.093<TAB>150
//! ...
//! [End]
//! ```

use crate::domain::{Experiment, ReaderSettings, Signal, TimeAxis};
use crate::error::{Error, Result};
use crate::io::common::{build_acquisition, parse_date, parse_number, parse_time, Block, ReadResult};

#[derive(PartialEq)]
enum Section {
    Preamble,
    Header,
    Data,
    End,
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    v.strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(v)
}

fn split_list(value: &str) -> Vec<String> {
    unquote(value)
        .split(',')
        .map(|s| s.trim().to_string())
        .collect()
}

pub fn parse_pro(text: &str, opts: &ReaderSettings) -> Result<ReadResult> {
    let mut section = Section::Preamble;
    let mut meta = Experiment::new("", TimeAxis::seconds("Time", Vec::new()));
    let mut columns: Option<Vec<String>> = None;
    let mut units: Vec<String> = Vec::new();
    let mut block = Block::default();
    let mut axis = TimeAxis::new("Time", "s");

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_start_matches('\u{feff}').trim_end_matches('\r');
        let marker = line.trim();
        match marker {
            "[Header]" => {
                section = Section::Header;
                continue;
            }
            "[Data]" => {
                let cols = columns.as_ref().ok_or_else(|| {
                    Error::format("Missing 'Columns' entry before [Data].").with_row(line_no)
                })?;
                if cols.len() < 2 {
                    return Err(Error::format("'Columns' must list the time column and at least one signal.")
                        .with_row(line_no));
                }
                axis = TimeAxis::new(cols[0].clone(), units.first().map_or("s", |u| u.as_str()));
                block.signals = cols[1..]
                    .iter()
                    .enumerate()
                    .map(|(k, name)| {
                        Signal::new(name.clone(), units.get(k + 1).cloned().unwrap_or_default())
                    })
                    .collect();
                section = Section::Data;
                continue;
            }
            "[End]" => {
                section = Section::End;
                break;
            }
            _ => {}
        }
        if marker.is_empty() {
            continue;
        }
        match section {
            Section::Preamble => {
                return Err(Error::format("Expected a [Header] section.").with_row(line_no));
            }
            Section::Header => {
                let Some((key, value)) = marker.split_once('=') else {
                    return Err(Error::format(format!("Malformed header line '{marker}'."))
                        .with_row(line_no));
                };
                let value = unquote(value).to_string();
                match key.trim().to_ascii_lowercase().as_str() {
                    "name" => meta.label = value,
                    "title" => meta.title = value,
                    "reactor" => meta.reactor = value,
                    "subreactor" | "sub_reactor" => meta.sub_reactor = value,
                    "profile" => meta.profile = value,
                    "date" => meta.date = parse_date(&value),
                    "time" => meta.time = parse_time(&value),
                    "columns" => columns = Some(split_list(&value)),
                    "units" => units = split_list(&value),
                    other => log::debug!("Ignoring header key '{other}'"),
                }
            }
            Section::Data => {
                let cells: Vec<&str> = marker.split('\t').collect();
                if cells.len() != block.signals.len() + 1 {
                    return Err(Error::format(format!(
                        "Expected {} tab-separated values, found {}.",
                        block.signals.len() + 1,
                        cells.len()
                    ))
                    .with_row(line_no));
                }
                let t = parse_number(cells[0], line_no, &axis.name)?;
                axis.push(t);
                for (s, cell) in block.signals.iter_mut().zip(&cells[1..]) {
                    s.data.push(parse_number(cell, line_no, &s.name)?);
                }
            }
            Section::End => break,
        }
    }

    match section {
        Section::End => {}
        Section::Data => return Err(Error::format("Missing [End] marker.")),
        _ => return Err(Error::format("Missing [Data] section.")),
    }
    if meta.label.is_empty() {
        meta.label = meta.reactor.clone();
    }
    block.x = axis.data.clone();
    let acq = build_acquisition(&meta, &axis.name, block, opts)?;
    Ok(ReadResult::single(acq))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "[Header]\nName=Run 1\nReactor=PBR-3\nDate=2024-03-05\nTime=10:15:00\n\
Columns=\"Time,OD 680,Light\"\nUnits=\"s,AU,umol\"\n[Data]\n0\t0.10\t150\n60\t0.12\t150\n120\t0.15\t0\n[End]\n";

    #[test]
    fn parses_header_and_splits_conditions() {
        let r = parse_pro(SAMPLE, &ReaderSettings::default()).unwrap();
        let acq = &r.experiments[0];
        assert_eq!(acq.growth.label, "Run 1");
        assert_eq!(acq.growth.reactor, "PBR-3");
        assert_eq!(acq.growth.signal_names(), vec!["OD 680"]);
        assert_eq!(acq.growth.xaxis.data, vec![0.0, 60.0, 120.0]);
        let cond = acq.conditions.as_ref().unwrap();
        assert_eq!(cond.signal_names(), vec!["Light"]);
        assert_eq!(cond.signals[0].unit, "umol");
    }

    #[test]
    fn missing_end_is_an_error() {
        let text = SAMPLE.replace("[End]\n", "");
        assert!(parse_pro(&text, &ReaderSettings::default()).is_err());
    }

    #[test]
    fn bad_number_reports_line() {
        let text = SAMPLE.replace("60\t0.12", "60\tx");
        let err = parse_pro(&text, &ReaderSettings::default()).unwrap_err();
        assert_eq!(err.row, Some(10));
    }

    #[test]
    fn downsampling_is_per_channel() {
        let opts = ReaderSettings {
            growth_downsample: 2,
            ..ReaderSettings::default()
        };
        let r = parse_pro(SAMPLE, &opts).unwrap();
        assert_eq!(r.experiments[0].growth.xaxis.data, vec![0.0, 120.0]);
        assert_eq!(r.experiments[0].conditions.as_ref().unwrap().xaxis.len(), 3);
    }
}
