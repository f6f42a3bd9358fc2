//! Native round-trip CSV.
//!
//! ```text
//! Name,Run 1,Title,Screen,Reactor,PBR-3,Profile,High light,SubReactor,A1
//! Date,2024-03-05,Time,10:15:00
//! Time [s],OD 680 [AU],Conditions,Light [umol]
//! 0,0.10,,150
//! 60,0.12,,
//! Event:,1800,Light on
//! ```
//!
//! Empty cells mean "no sample on this row" for that block, so growth and condition
//! channels keep their own time axes through a write/read cycle.

use std::fs::File;
use std::path::Path;

use crate::domain::{Experiment, ReaderSettings, TimeAxis};
use crate::error::{Error, Result};
use crate::io::common::{
    clean_cell, is_blank, line_of, parse_date, parse_number, parse_optional_number, parse_time,
    read_records, split_blocks, split_name_unit, Acquisition, Block, ReadResult,
};

const SEPARATOR: &str = "Conditions";
const EVENT_MARKER: &str = "Event:";

pub fn parse_native(text: &str, opts: &ReaderSettings) -> Result<ReadResult> {
    let records = read_records(text, b',')?;
    if records.len() < 3 {
        return Err(Error::format("Expected three header rows."));
    }

    let mut meta = Experiment::new("", TimeAxis::seconds("Time", Vec::new()));
    let header = &records[0];
    if clean_cell(header.get(0).unwrap_or_default()) != "Name" {
        return Err(Error::format("First header row must start with 'Name'.").with_row(1));
    }
    let cells: Vec<&str> = header.iter().collect();
    for pair in cells.chunks(2) {
        let key = clean_cell(pair[0]);
        let value = pair.get(1).map(|v| clean_cell(v)).unwrap_or_default().to_string();
        match key {
            "Name" => meta.label = value,
            "Title" => meta.title = value,
            "Reactor" => meta.reactor = value,
            "Profile" => meta.profile = value,
            "SubReactor" => meta.sub_reactor = value,
            "" => {}
            other => log::debug!("Ignoring native header key '{other}'"),
        }
    }

    let dates = &records[1];
    if clean_cell(dates.get(0).unwrap_or_default()) != "Date" {
        return Err(Error::format("Second header row must start with 'Date'.").with_row(2));
    }
    meta.date = parse_date(dates.get(1).unwrap_or_default());
    meta.time = parse_time(dates.get(3).unwrap_or_default());

    let columns = &records[2];
    let (time_name, time_unit) = split_name_unit(columns.get(0).unwrap_or_default());
    let mut growth_cols: Vec<(usize, (String, String))> = Vec::new();
    let mut cond_cols: Vec<(usize, (String, String))> = Vec::new();
    let mut in_conditions = false;
    for (k, cell) in columns.iter().enumerate().skip(1) {
        if clean_cell(cell) == SEPARATOR {
            in_conditions = true;
            continue;
        }
        let entry = (k, split_name_unit(cell));
        if in_conditions {
            cond_cols.push(entry);
        } else {
            growth_cols.push(entry);
        }
    }

    let mut axis = TimeAxis::new(time_name.clone(), &time_unit);
    let mut growth_rows = Vec::new();
    let mut cond_rows = Vec::new();
    for (idx, rec) in records.iter().enumerate().skip(3) {
        let line = line_of(rec, idx + 1);
        if is_blank(rec) {
            continue;
        }
        let first = clean_cell(rec.get(0).unwrap_or_default());
        if first == EVENT_MARKER {
            let xpos = parse_number(rec.get(1).unwrap_or_default(), line, "Event")?;
            let labels = rec
                .iter()
                .skip(2)
                .map(clean_cell)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            meta.add_event(None, xpos, labels);
            continue;
        }
        axis.push(parse_number(first, line, &time_name)?);
        let x = axis.data[axis.len() - 1];
        let read = |cols: &[(usize, (String, String))]| -> Result<Vec<Option<f64>>> {
            cols.iter()
                .map(|(k, (name, _))| parse_optional_number(rec.get(*k).unwrap_or_default(), line, name))
                .collect()
        };
        growth_rows.push((x, read(&growth_cols)?));
        cond_rows.push((x, read(&cond_cols)?));
    }

    let names = |cols: Vec<(usize, (String, String))>| cols.into_iter().map(|(_, n)| n).collect::<Vec<_>>();
    let growth = Block::from_sparse_rows(&names(growth_cols), &growth_rows);
    let cond = Block::from_sparse_rows(&names(cond_cols), &cond_rows);
    let acq = split_blocks(&meta, &time_name, growth, cond, opts)?;
    Ok(ReadResult::single(acq))
}

fn fmt_num(v: f64) -> String {
    if v.is_nan() { String::new() } else { v.to_string() }
}

/// Serialise an acquisition in the native layout.
pub fn native_to_string(acq: &Acquisition) -> Result<String> {
    let mut w = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
    write_records(&mut w, acq)?;
    let bytes = w
        .into_inner()
        .map_err(|e| Error::format(format!("Failed to flush CSV: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::format(format!("Invalid UTF-8 in export: {e}")))
}

/// Write an acquisition to `path`.
pub fn write_native(path: &Path, acq: &Acquisition) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut w = csv::WriterBuilder::new().flexible(true).from_writer(file);
    write_records(&mut w, acq).map_err(|e| e.with_file(path))?;
    w.flush().map_err(|e| Error::io(path, e))?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

fn write_records<W: std::io::Write>(w: &mut csv::Writer<W>, acq: &Acquisition) -> Result<()> {
    let g = &acq.growth;
    let mut head = vec![
        "Name".to_string(),
        g.label.clone(),
        "Title".to_string(),
        g.title.clone(),
        "Reactor".to_string(),
        g.reactor.clone(),
        "Profile".to_string(),
        g.profile.clone(),
    ];
    if !g.sub_reactor.is_empty() {
        head.push("SubReactor".to_string());
        head.push(g.sub_reactor.clone());
    }
    w.write_record(&head)?;
    w.write_record([
        "Date".to_string(),
        g.date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
        "Time".to_string(),
        g.time.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_default(),
    ])?;

    let empty = Vec::new();
    let cond_signals = acq.conditions.as_ref().map_or(&empty, |c| &c.signals);
    let mut columns = vec![format!("{} [{}]", g.xaxis.name, g.xaxis.unit)];
    columns.extend(g.signals.iter().map(|s| format!("{} [{}]", s.name, s.unit)));
    columns.push(SEPARATOR.to_string());
    columns.extend(cond_signals.iter().map(|s| format!("{} [{}]", s.name, s.unit)));
    w.write_record(&columns)?;

    // Merge both axes on exact x.
    let gx = &g.xaxis.data;
    let cx: &[f64] = acq.conditions.as_ref().map_or(&[][..], |c| c.xaxis.data.as_slice());
    let (mut i, mut j) = (0, 0);
    while i < gx.len() || j < cx.len() {
        let take_g = i < gx.len() && (j >= cx.len() || gx[i] <= cx[j]);
        let take_c = j < cx.len() && (i >= gx.len() || cx[j] <= gx[i]);
        let x = if take_g { gx[i] } else { cx[j] };
        let mut row = vec![x.to_string()];
        row.extend(g.signals.iter().map(|s| if take_g { fmt_num(s.data[i]) } else { String::new() }));
        row.push(String::new());
        row.extend(cond_signals.iter().map(|s| if take_c { fmt_num(s.data[j]) } else { String::new() }));
        w.write_record(&row)?;
        if take_g {
            i += 1;
        }
        if take_c {
            j += 1;
        }
    }

    for e in &g.events {
        let mut row = vec![EVENT_MARKER.to_string(), e.xpos.to_string()];
        row.extend(e.labels.iter().cloned());
        w.write_record(&row)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Signal;

    fn acquisition() -> Acquisition {
        let mut g = Experiment::new("Run 1", TimeAxis::seconds("Time", vec![0.0, 60.0, 120.0]));
        g.reactor = "PBR-3".into();
        g.sub_reactor = "A1".into();
        g.date = chrono::NaiveDate::from_ymd_opt(2024, 3, 5);
        g.time = chrono::NaiveTime::from_hms_opt(10, 15, 0);
        g.signals.push(Signal::new("OD 680", "AU").with_data(vec![0.1, 0.12, 0.15]));
        g.add_event(None, 60.0, vec!["Light on".into()]);
        let mut c = Experiment::new("Run 1", TimeAxis::seconds("Time", vec![0.0, 90.0]));
        c.reactor = "PBR-3".into();
        c.sub_reactor = "A1".into();
        c.date = g.date;
        c.time = g.time;
        c.signals.push(Signal::new("Light", "umol").with_data(vec![150.0, 200.0]));
        Acquisition {
            growth: g,
            conditions: Some(c),
        }
    }

    #[test]
    fn round_trip_keeps_axes_and_events() {
        let acq = acquisition();
        let text = native_to_string(&acq).unwrap();
        let back = parse_native(&text, &ReaderSettings::default()).unwrap();
        let r = &back.experiments[0];
        assert_eq!(r.growth.label, "Run 1");
        assert_eq!(r.growth.sub_reactor, "A1");
        assert_eq!(r.growth.date, acq.growth.date);
        assert_eq!(r.growth.xaxis.data, acq.growth.xaxis.data);
        assert_eq!(r.growth.signals, acq.growth.signals);
        assert_eq!(r.growth.events, acq.growth.events);
        let c = r.conditions.as_ref().unwrap();
        assert_eq!(c.xaxis.data, vec![0.0, 90.0]);
        assert_eq!(c.signals[0].data, vec![150.0, 200.0]);
    }

    #[test]
    fn writes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        write_native(&path, &acquisition()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Name,Run 1,"));
    }

    #[test]
    fn header_is_checked() {
        assert!(parse_native("Foo\nDate\nTime [s]\n", &ReaderSettings::default()).is_err());
    }
}
