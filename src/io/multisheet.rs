//! Vendor C multi-sheet ODS export.
//!
//! | sheet | content |
//! |---|---|
//! | `Info` | `Key, Value` rows: `Name`, `Title`, `Start` |
//! | `Devices` | header, then `Key, Name`; the first name is the reactor |
//! | `Events` | header, then `Time [s], Label` |
//! | `Accessories` | header, then `Key, Name, Unit, Channel` |
//! | `Data` | header `Time [unit]` followed by accessory keys |
//!
//! Accessories with a channel belong to that channel (one acquisition each, channel =
//! sub-reactor); accessories without one are conditions shared by every channel.

use chrono::Duration;

use crate::domain::{is_growth_signal, Experiment, ReaderSettings, TimeAxis, TimeUnit};
use crate::error::{Error, Result};
use crate::io::common::{split_blocks, split_name_unit, Block, ReadResult};
use crate::io::workbook::{Sheet, Workbook};

#[derive(Debug, Clone)]
struct Accessory {
    key: String,
    name: String,
    unit: String,
    channel: String,
}

fn require<'a>(wb: &'a Workbook, name: &str) -> Result<&'a Sheet> {
    wb.sheet(name)
        .ok_or_else(|| Error::format(format!("Workbook has no '{name}' sheet.")))
}

fn read_accessories(sheet: &Sheet) -> Vec<Accessory> {
    sheet
        .non_empty_rows()
        .skip(1)
        .map(|(_, row)| {
            let text = |k: usize| row.get(k).map(|c| c.as_text()).unwrap_or_default();
            Accessory {
                key: text(0),
                name: text(1),
                unit: text(2),
                channel: text(3),
            }
        })
        .filter(|a| !a.key.is_empty())
        .collect()
}

fn header_factor(cell: &str) -> f64 {
    let (_, unit) = split_name_unit(cell);
    TimeUnit::parse(&unit).map_or(1.0, TimeUnit::seconds)
}

pub fn parse_multisheet(wb: &Workbook, opts: &ReaderSettings) -> Result<ReadResult> {
    let mut meta = Experiment::new("", TimeAxis::seconds("Time", Vec::new()));
    let mut start = None;
    for (_, row) in require(wb, "Info")?.non_empty_rows() {
        let key = row.first().map(|c| c.as_text()).unwrap_or_default();
        let Some(value) = row.get(1) else { continue };
        match key.as_str() {
            "Name" => meta.label = value.as_text(),
            "Title" => meta.title = value.as_text(),
            "Start" => start = value.as_datetime(),
            other => log::debug!("Ignoring Info key '{other}'"),
        }
    }
    if let Some(dt) = start {
        meta.date = Some(dt.date());
        meta.time = Some(dt.time());
    }
    if let Some(devices) = wb.sheet("Devices") {
        if let Some((_, row)) = devices.non_empty_rows().nth(1) {
            meta.reactor = row.get(1).map(|c| c.as_text()).unwrap_or_default();
        }
    }
    if meta.label.is_empty() {
        meta.label = meta.title.clone();
    }

    if let Some(events) = wb.sheet("Events") {
        let mut rows = events.non_empty_rows();
        let factor = rows
            .next()
            .map_or(1.0, |(_, header)| header_factor(&header.first().map(|c| c.as_text()).unwrap_or_default()));
        for (r, row) in rows {
            let xpos = row
                .first()
                .and_then(|c| c.as_number())
                .ok_or_else(|| Error::format("Event time is not numeric.").with_row(r + 1))?
                * factor;
            let label = row.get(1).map(|c| c.as_text()).unwrap_or_default();
            let datetime = start.and_then(|s| s.checked_add_signed(Duration::milliseconds((xpos * 1000.0) as i64)));
            meta.add_event(datetime, xpos, vec![label]);
        }
    }

    let accessories = read_accessories(require(wb, "Accessories")?);
    let data = require(wb, "Data")?;
    let mut rows = data.non_empty_rows();
    let (_, header) = rows
        .next()
        .ok_or_else(|| Error::format("Data sheet is empty."))?;
    let time_header = header.first().map(|c| c.as_text()).unwrap_or_default();
    let (time_name, _) = split_name_unit(&time_header);
    let factor = header_factor(&time_header);

    // Column index of each accessory key in the Data sheet.
    let column_of = |key: &str| header.iter().position(|c| c.as_text() == key);
    let mut placed: Vec<(usize, &Accessory)> = Vec::new();
    for a in &accessories {
        match column_of(&a.key) {
            Some(k) => placed.push((k, a)),
            None => log::warn!("Accessory '{}' has no column in the Data sheet", a.key),
        }
    }

    let mut x = Vec::new();
    let mut table: Vec<Vec<Option<f64>>> = Vec::new();
    for (r, row) in rows {
        let t = row
            .first()
            .and_then(|c| c.as_number())
            .ok_or_else(|| Error::format(format!("Non-numeric value in column '{time_name}'.")).with_row(r + 1))?;
        x.push(t * factor);
        let mut values = Vec::with_capacity(placed.len());
        for (k, a) in &placed {
            let cell = row.get(*k);
            values.push(match cell {
                None => None,
                Some(c) if c.is_empty() => None,
                Some(c) => Some(c.as_number().ok_or_else(|| {
                    Error::format(format!("Non-numeric value '{}' in column '{}'.", c.as_text(), a.key))
                        .with_row(r + 1)
                })?),
            });
        }
        table.push(values);
    }

    let mut channels: Vec<&str> = Vec::new();
    for a in &accessories {
        if !a.channel.is_empty() && !channels.contains(&a.channel.as_str()) {
            channels.push(&a.channel);
        }
    }
    if channels.is_empty() {
        channels.push("");
    }

    let block_for = |select: &dyn Fn(&Accessory) -> bool| -> Block {
        let picked: Vec<usize> = (0..placed.len()).filter(|&i| select(placed[i].1)).collect();
        let columns: Vec<(String, String)> = picked
            .iter()
            .map(|&i| (placed[i].1.name.clone(), placed[i].1.unit.clone()))
            .collect();
        let rows: Vec<(f64, Vec<Option<f64>>)> = x
            .iter()
            .zip(&table)
            .map(|(&t, values)| (t, picked.iter().map(|&i| values[i]).collect()))
            .collect();
        Block::from_sparse_rows(&columns, &rows)
    };

    let mut result = ReadResult::default();
    for channel in channels {
        let mut m = meta.clone();
        m.sub_reactor = channel.to_string();
        let growth = block_for(&|a: &Accessory| a.channel == channel && is_growth_signal(&a.name));
        let cond = block_for(&|a: &Accessory| {
            (a.channel == channel || a.channel.is_empty()) && !is_growth_signal(&a.name)
        });
        result
            .experiments
            .push(split_blocks(&m, &time_name, growth, cond, opts)?);
    }
    log::debug!("Multi-sheet workbook: {} channels", result.experiments.len());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::workbook::{build_zip, ods_content};

    fn workbook() -> Workbook {
        let content = ods_content(&[
            ("Info", vec![vec!["Name", "Run 5"], vec!["Title", "Salt"], vec!["Start", "2024-03-05 10:00:00"]]),
            ("Devices", vec![vec!["Key", "Name"], vec!["dev1", "MC-1000"]]),
            ("Events", vec![vec!["Time [s]", "Label"], vec!["3600", "Dilution"]]),
            (
                "Accessories",
                vec![
                    vec!["Key", "Name", "Unit", "Channel"],
                    vec!["od1", "OD 720", "AU", "1"],
                    vec!["od2", "OD 720", "AU", "2"],
                    vec!["temp", "Temperature", "C", ""],
                ],
            ),
            (
                "Data",
                vec![
                    vec!["Time [h]", "od1", "od2", "temp"],
                    vec!["0", "0.1", "0.2", "30"],
                    vec!["1", "0.15", "", "30.5"],
                    vec!["2", "0.2", "0.3", ""],
                ],
            ),
        ]);
        Workbook::from_bytes(&build_zip(&[("content.xml", &content)])).unwrap()
    }

    #[test]
    fn one_acquisition_per_channel() {
        let r = parse_multisheet(&workbook(), &ReaderSettings::default()).unwrap();
        assert_eq!(r.experiments.len(), 2);
        let one = &r.experiments[0];
        assert_eq!(one.growth.label, "Run 5");
        assert_eq!(one.growth.reactor, "MC-1000");
        assert_eq!(one.growth.sub_reactor, "1");
        assert_eq!(one.growth.xaxis.data, vec![0.0, 3600.0, 7200.0]);
        assert_eq!(one.growth.events[0].xpos, 3600.0);

        let two = &r.experiments[1];
        assert_eq!(two.growth.sub_reactor, "2");
        assert_eq!(two.growth.xaxis.data, vec![0.0, 7200.0]);
        let cond = two.conditions.as_ref().unwrap();
        assert_eq!(cond.signal_names(), vec!["Temperature"]);
        assert_eq!(cond.xaxis.data, vec![0.0, 3600.0]);
        assert!(cond.events.is_empty());
    }

    #[test]
    fn missing_sheet_is_a_format_error() {
        let content = ods_content(&[("Info", vec![vec!["Name", "x"]])]);
        let wb = Workbook::from_bytes(&build_zip(&[("content.xml", &content)])).unwrap();
        let err = parse_multisheet(&wb, &ReaderSettings::default()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Format);
    }
}
