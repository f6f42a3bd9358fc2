//! Readers for the supported instrument exports.
//!
//! Every reader is a pure function over the file contents. This module adds the file
//! layer on top: dialect probing, HT24 details pairing, and attaching the file name to
//! errors.
//!
//! - `common`: shared parsing helpers and the [`ReadResult`] model
//! - `pro`, `ht24`, `eventlog`, `native`, `microbemeter`: text formats
//! - `workbook`: ODS/XLSX loader used by `multisheet` and `spectrostar`

pub mod common;
pub mod eventlog;
pub mod ht24;
pub mod microbemeter;
pub mod multisheet;
pub mod native;
pub mod pro;
pub mod spectrostar;
pub mod workbook;

use std::fs;
use std::path::{Path, PathBuf};

use crate::calibration::Calibration;
use crate::domain::ReaderSettings;
use crate::error::{Error, Result};

pub use common::{Acquisition, ReadResult};
pub use ht24::Ht24Details;
pub use native::{native_to_string, write_native};
pub use workbook::Workbook;

/// Reader options are the `readers` section of the configuration.
pub type ReaderOptions = ReaderSettings;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Pro,
    Ht24,
    Ht24Details,
    EventLog,
    Native,
    Microbemeter,
    MultiSheet,
    Spectrostar,
}

impl Dialect {
    /// Recognise a text export from its first lines.
    pub fn probe_text(text: &str) -> Option<Dialect> {
        let mut lines = text
            .lines()
            .map(|l| l.trim_start_matches('\u{feff}').trim())
            .filter(|l| !l.is_empty());
        let first = lines.next()?;
        if first.starts_with("[Header]") {
            return Some(Dialect::Pro);
        }
        if first.starts_with('#') {
            return Some(Dialect::Microbemeter);
        }
        let first_cell = first.split([',', '\t']).next().unwrap_or_default().trim();
        if first_cell.starts_with("Time") && first.contains('\t') && !first.contains(',') {
            return Some(Dialect::Microbemeter);
        }
        if first_cell == "Date" {
            return Some(Dialect::Ht24Details);
        }
        if first_cell == "Name" {
            return Some(Dialect::Native);
        }
        if first_cell.starts_with("Time [") {
            return Some(Dialect::Ht24);
        }
        let _ = lines.next();
        if lines.next().is_some_and(|l| l.contains("RelativeDensity")) {
            return Some(Dialect::EventLog);
        }
        None
    }

    /// Pick the workbook dialect from its sheet names.
    pub fn probe_workbook(wb: &Workbook) -> Dialect {
        if wb.sheet("Accessories").is_some() {
            Dialect::MultiSheet
        } else {
            Dialect::Spectrostar
        }
    }
}

enum Loaded {
    Text(String),
    Workbook(Workbook),
}

fn load(path: &Path) -> Result<(Dialect, Loaded)> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    if bytes.starts_with(ZIP_MAGIC) {
        let wb = Workbook::from_bytes(&bytes)?;
        return Ok((Dialect::probe_workbook(&wb), Loaded::Workbook(wb)));
    }
    let text = String::from_utf8(bytes)
        .map_err(|e| Error::format(format!("File is not valid UTF-8 text: {e}")))?;
    let dialect = Dialect::probe_text(&text)
        .ok_or_else(|| Error::format("Unrecognised file format."))?;
    Ok((dialect, Loaded::Text(text)))
}

fn parse_loaded(
    dialect: Dialect,
    loaded: &Loaded,
    details: Option<&Ht24Details>,
    opts: &ReaderOptions,
) -> Result<ReadResult> {
    match (dialect, loaded) {
        (Dialect::Pro, Loaded::Text(t)) => pro::parse_pro(t, opts),
        (Dialect::Ht24, Loaded::Text(t)) => ht24::parse_ht24(t, details, opts),
        (Dialect::EventLog, Loaded::Text(t)) => eventlog::parse_eventlog(t, opts),
        (Dialect::Native, Loaded::Text(t)) => native::parse_native(t, opts),
        (Dialect::Microbemeter, Loaded::Text(t)) => microbemeter::parse_microbemeter(t, opts),
        (Dialect::MultiSheet, Loaded::Workbook(wb)) => multisheet::parse_multisheet(wb, opts),
        (Dialect::Spectrostar, Loaded::Workbook(wb)) => spectrostar::parse_spectrostar(wb, opts),
        (Dialect::Ht24Details, _) => Err(Error::format(
            "HT24 details file given without its data file.",
        )),
        _ => Err(Error::format("File content does not match its detected format.")),
    }
}

/// Read one file, probing its format.
pub fn read_file(path: &Path, opts: &ReaderOptions) -> Result<ReadResult> {
    let (dialect, loaded) = load(path).map_err(|e| e.with_file(path))?;
    log::debug!("{}: detected {dialect:?}", path.display());
    let result = parse_loaded(dialect, &loaded, None, opts).map_err(|e| e.with_file(path))?;
    log::info!(
        "Loaded {} experiment(s) from {}",
        result.experiments.len(),
        path.display()
    );
    Ok(result)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

/// Read several files; HT24 details files are paired with the data file sharing the
/// longest filename prefix and do not produce results of their own.
///
/// Results are returned in input order, one per data file.
pub fn read_files(paths: &[PathBuf], opts: &ReaderOptions) -> Result<Vec<ReadResult>> {
    let mut loaded = Vec::with_capacity(paths.len());
    let mut details: Vec<(String, Ht24Details)> = Vec::new();
    for path in paths {
        let (dialect, content) = load(path).map_err(|e| e.with_file(path))?;
        if dialect == Dialect::Ht24Details {
            if let Loaded::Text(t) = &content {
                let d = ht24::parse_details(t).map_err(|e| e.with_file(path))?;
                details.push((file_stem(path), d));
            }
            continue;
        }
        loaded.push((path, dialect, content));
    }

    let mut used = vec![false; details.len()];
    let mut results = Vec::with_capacity(loaded.len());
    for (path, dialect, content) in &loaded {
        let mut paired = None;
        if *dialect == Dialect::Ht24 {
            let stem = file_stem(path);
            let best = details
                .iter()
                .enumerate()
                .map(|(k, (s, _))| (k, common_prefix_len(s, &stem)))
                .filter(|(_, n)| *n > 0)
                .max_by_key(|(_, n)| *n);
            if let Some((k, _)) = best {
                used[k] = true;
                paired = Some(&details[k].1);
            }
        }
        let result = parse_loaded(*dialect, content, paired, opts).map_err(|e| e.with_file(path))?;
        log::info!(
            "Loaded {} experiment(s) from {}",
            result.experiments.len(),
            path.display()
        );
        results.push(result);
    }
    for ((stem, _), used) in details.iter().zip(used) {
        if !used {
            log::warn!("Details file '{stem}' has no matching HT24 data file");
        }
    }
    Ok(results)
}

/// Parse a calibration table: one header row, then `true,measured` rows.
pub fn parse_calibration(text: &str) -> Result<Calibration> {
    let records = common::read_records(text, b',')?;
    let mut truth = Vec::new();
    let mut measured = Vec::new();
    for (idx, rec) in records.iter().enumerate().skip(1) {
        if common::is_blank(rec) {
            continue;
        }
        let line = common::line_of(rec, idx + 1);
        truth.push(common::parse_number(rec.get(0).unwrap_or_default(), line, "true")?);
        measured.push(common::parse_number(rec.get(1).unwrap_or_default(), line, "measured")?);
    }
    Ok(Calibration::new(&measured, &truth))
}

pub fn read_calibration(path: &Path) -> Result<Calibration> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let cal = parse_calibration(&text).map_err(|e| e.with_file(path))?;
    log::info!(
        "Loaded calibration with {} point(s) from {}",
        cal.measured().len(),
        path.display()
    );
    Ok(cal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn probes_text_dialects() {
        assert_eq!(Dialect::probe_text("[Header]\nName=x\n"), Some(Dialect::Pro));
        assert_eq!(Dialect::probe_text("Time [h],OD (A1)\n"), Some(Dialect::Ht24));
        assert_eq!(Dialect::probe_text("Date,2024-03-05\n"), Some(Dialect::Ht24Details));
        assert_eq!(Dialect::probe_text("Name,Run\nDate,\n"), Some(Dialect::Native));
        assert_eq!(Dialect::probe_text("# Name: a\nTime [h]\tCh1\n"), Some(Dialect::Microbemeter));
        assert_eq!(Dialect::probe_text("Time [h]\tCh1\n"), Some(Dialect::Microbemeter));
        assert_eq!(
            Dialect::probe_text("Photobioreactor,PBR,A\nName\nTimestamp,RelativeDensity\n"),
            Some(Dialect::EventLog)
        );
        assert_eq!(Dialect::probe_text("hello\nworld\n"), None);
    }

    #[test]
    fn details_pair_with_longest_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("run7_data.csv");
        let details = dir.path().join("run7_details.csv");
        let other = dir.path().join("x_details.csv");
        fs::write(&data, "Time [h],OD 680 (A1) [AU],OD 680 (A2) [AU]\n0,0.1,0.1\n1,0.2,0.2\n").unwrap();
        fs::write(&details, "Date,2024-03-05\nSerial Number,HT-1\nA1 Replicates,A2\n").unwrap();
        fs::write(&other, "Date,2024-01-01\nSerial Number,HT-9\n").unwrap();
        let results = read_files(&[other, data, details], &ReaderOptions::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].experiments[0].growth.reactor, "HT-1");
        assert_eq!(results[0].replicate_groups, vec![vec![0, 1]]);
    }

    #[test]
    fn errors_carry_the_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        fs::write(&path, "[Header]\nColumns=\"Time,OD\"\n[Data]\n0\tx\n[End]\n").unwrap();
        let err = read_file(&path, &ReaderOptions::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Format);
        assert_eq!(err.row, Some(4));
        assert!(err.to_string().ends_with("(bad.txt, line 4)"));
    }

    #[test]
    fn missing_file_is_io() {
        let err = read_file(Path::new("/nonexistent/run.csv"), &ReaderOptions::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
    }

    #[test]
    fn calibration_table() {
        let cal = parse_calibration("true,measured\n0,0\n10,1\n30,2\n").unwrap();
        assert_eq!(cal.measured(), &[0.0, 1.0, 2.0]);
        assert_eq!(cal.apply(1.5), 20.0);
        let err = parse_calibration("true,measured\n1,abc\n").unwrap_err();
        assert_eq!(err.row, Some(2));
    }
}
