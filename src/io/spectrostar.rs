//! Plate-reader (Spectrostar) workbook export.
//!
//! The first sheet holds a few `key, value` rows, then a table with one well per row:
//!
//! ```text
//! Test name | Growth screen
//! Date      | 05/03/2024
//! Time      | 10:15:00
//! ID1       | Plate 4
//!
//! Well | Content  | 0 h  | 30 min | 1 h
//! A01  | Sample X | 0.11 | 0.14   | 0.19
//! A02  | Sample X | 0.10 | 0.13   | 0.18
//! A03  | Blank    | 0.04 | 0.04   | 0.04
//! ```
//!
//! Wells sharing a content label (other than `Blank`) are replicates.

use std::collections::HashMap;

use crate::domain::{Experiment, ReaderSettings, Signal, TimeAxis};
use crate::error::{Error, Result};
use crate::io::common::{build_acquisition, parse_date, parse_duration, parse_time, Block, ReadResult};
use crate::io::workbook::{Cell, Workbook};

fn cell_date(cell: &Cell) -> Option<chrono::NaiveDate> {
    match cell {
        Cell::Number(_) => cell.as_datetime().map(|dt| dt.date()),
        _ => parse_date(&cell.as_text()),
    }
}

fn cell_time(cell: &Cell) -> Option<chrono::NaiveTime> {
    match cell {
        // Time-of-day serials are day fractions.
        Cell::Number(v) => Cell::Number(v.fract()).as_datetime().map(|dt| dt.time()),
        _ => parse_time(&cell.as_text()),
    }
}

pub fn parse_spectrostar(wb: &Workbook, opts: &ReaderSettings) -> Result<ReadResult> {
    let sheet = wb
        .sheets
        .first()
        .ok_or_else(|| Error::format("Workbook has no sheets."))?;

    let mut meta = Experiment::new("", TimeAxis::seconds("Time", Vec::new()));
    let mut rows = sheet.non_empty_rows();
    let mut header: Option<(usize, &[Cell])> = None;
    for (r, row) in rows.by_ref() {
        let key = row.first().map(|c| c.as_text()).unwrap_or_default();
        if key.eq_ignore_ascii_case("Well")
            && row.get(1).is_some_and(|c| c.as_text().eq_ignore_ascii_case("Content"))
        {
            header = Some((r, row));
            break;
        }
        let value = row.get(1).cloned().unwrap_or_default();
        match key.to_ascii_lowercase().trim_end_matches(':') {
            "test name" => meta.title = value.as_text(),
            "date" => meta.date = cell_date(&value),
            "time" => meta.time = cell_time(&value),
            "id1" => meta.reactor = value.as_text(),
            other => log::debug!("Ignoring plate key '{other}'"),
        }
    }
    let (header_row, header) =
        header.ok_or_else(|| Error::format("No 'Well, Content' table header found."))?;

    let mut axis = TimeAxis::seconds("Time", Vec::new());
    for cell in &header[2..] {
        if cell.is_empty() {
            break;
        }
        let t = parse_duration(&cell.as_text()).ok_or_else(|| {
            Error::format(format!("Unrecognised read time '{}'.", cell.as_text())).with_row(header_row + 1)
        })?;
        axis.data.push(t);
    }
    if axis.is_empty() {
        return Err(Error::format("No read-time columns in table header.").with_row(header_row + 1));
    }

    let mut result = ReadResult::default();
    let mut by_content: Vec<(String, Vec<usize>)> = Vec::new();
    let mut slot: HashMap<String, usize> = HashMap::new();
    for (r, row) in rows {
        let well = row.first().map(|c| c.as_text()).unwrap_or_default();
        if well.is_empty() {
            continue;
        }
        let content = row.get(1).map(|c| c.as_text()).unwrap_or_default();
        let mut values = Vec::with_capacity(axis.len());
        for k in 0..axis.len() {
            let v = match row.get(k + 2) {
                None => f64::NAN,
                Some(c) if c.is_empty() => f64::NAN,
                Some(c) => c.as_number().ok_or_else(|| {
                    Error::format(format!("Non-numeric value '{}' for well {well}.", c.as_text())).with_row(r + 1)
                })?,
            };
            values.push(v);
        }

        let mut m = meta.clone();
        m.label = if content.is_empty() {
            well.clone()
        } else {
            format!("{content} ({well})")
        };
        m.sub_reactor = well;
        m.profile = content.clone();
        let block = Block {
            x: axis.data.clone(),
            signals: vec![Signal::new("OD", "").with_data(values)],
        };
        let index = result.experiments.len();
        result
            .experiments
            .push(build_acquisition(&m, &axis.name, block, opts)?);

        if !content.is_empty() && !content.eq_ignore_ascii_case("blank") {
            let s = *slot.entry(content.clone()).or_insert_with(|| {
                by_content.push((content, Vec::new()));
                by_content.len() - 1
            });
            by_content[s].1.push(index);
        }
    }

    if opts.merge_replicates {
        result.replicate_groups = by_content
            .into_iter()
            .map(|(_, members)| members)
            .filter(|m| m.len() > 1)
            .collect();
    }
    log::debug!(
        "Plate: {} wells, {} replicate groups",
        result.experiments.len(),
        result.replicate_groups.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::workbook::{build_zip, ods_content};

    fn workbook() -> Workbook {
        let content = ods_content(&[(
            "Plate",
            vec![
                vec!["Test name", "Growth screen"],
                vec!["Date", "05/03/2024"],
                vec!["Time", "10:15:00"],
                vec!["ID1", "Plate 4"],
                vec![],
                vec!["Well", "Content", "0 h", "30 min", "1 h"],
                vec!["A01", "Sample X", "0.11", "0.14", "0.19"],
                vec!["A02", "Sample X", "0.10", "0.13", "0.18"],
                vec!["A03", "Blank", "0.04", "0.04", "0.04"],
                vec!["A04", "Blank", "0.05", "", "0.05"],
            ],
        )]);
        Workbook::from_bytes(&build_zip(&[("content.xml", &content)])).unwrap()
    }

    #[test]
    fn wells_and_content_groups() {
        let r = parse_spectrostar(&workbook(), &ReaderSettings::default()).unwrap();
        assert_eq!(r.experiments.len(), 4);
        let a1 = &r.experiments[0].growth;
        assert_eq!(a1.title, "Growth screen");
        assert_eq!(a1.reactor, "Plate 4");
        assert_eq!(a1.sub_reactor, "A01");
        assert_eq!(a1.profile, "Sample X");
        assert_eq!(a1.date, chrono::NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(a1.xaxis.data, vec![0.0, 1800.0, 3600.0]);
        assert!(r.experiments[0].conditions.is_none());
        assert_eq!(r.replicate_groups, vec![vec![0, 1]]);
        assert!(r.experiments[3].growth.signals[0].data[1].is_nan());
    }

    #[test]
    fn merge_can_be_disabled() {
        let opts = ReaderSettings {
            merge_replicates: false,
            ..ReaderSettings::default()
        };
        let r = parse_spectrostar(&workbook(), &opts).unwrap();
        assert!(r.replicate_groups.is_empty());
    }
}
