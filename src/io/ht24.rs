//! Vendor A HT24 multi-cultivator export and its details sidecar.
//!
//! The data file is a wide CSV:
//!
//! ```text
//! Time [h],OD 680 (A1) [AU],OD 680 (A2) [AU],Temperature [°C]
//! 0,0.10,0.11,30.1
//! ```
//!
//! Columns carrying `(sub_reactor)` belong to that sub-reactor; columns without one are
//! shared by every sub-reactor. One acquisition is produced per sub-reactor, in header
//! order.
//!
//! The optional details file is keyed by its first cell:
//!
//! ```text
//! Date,2024-03-05
//! Time,10:15:00
//! Experiment Name,Nitrogen screen
//! Serial Number,HT24-0042
//! A1 Profile,High light
//! A1 Replicates,A2 A3
//! ```
//!
//! Replicate lists are merged into equivalence classes (union–find); the representative
//! of a class is the member mentioned first in the details file.

use std::collections::HashMap;

use crate::domain::{Experiment, ReaderSettings, Signal, TimeAxis};
use crate::error::{Error, Result};
use crate::io::common::{
    build_acquisition, clean_cell, is_blank, line_of, parse_date, parse_number, parse_time, read_records,
    split_name_unit, Block, ReadResult,
};

/// Parsed details sidecar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ht24Details {
    pub date: Option<chrono::NaiveDate>,
    pub time: Option<chrono::NaiveTime>,
    pub experiment_name: String,
    pub serial_number: String,
    pub profiles: HashMap<String, String>,
    /// `(sub_reactor, listed replicates)` in file order.
    pub replicates: Vec<(String, Vec<String>)>,
}

pub fn parse_details(text: &str) -> Result<Ht24Details> {
    let mut details = Ht24Details::default();
    for (idx, rec) in read_records(text, b',')?.iter().enumerate() {
        if is_blank(rec) {
            continue;
        }
        let key = clean_cell(rec.get(0).unwrap_or_default());
        let value = clean_cell(rec.get(1).unwrap_or_default()).to_string();
        let line = line_of(rec, idx + 1);
        match key {
            "Date" => {
                details.date = Some(parse_date(&value).ok_or_else(|| {
                    Error::format(format!("Invalid date '{value}'.")).with_row(line)
                })?)
            }
            "Time" => {
                details.time = Some(parse_time(&value).ok_or_else(|| {
                    Error::format(format!("Invalid time '{value}'.")).with_row(line)
                })?)
            }
            "Experiment Name" => details.experiment_name = value,
            "Serial Number" => details.serial_number = value,
            _ => {
                if let Some(sr) = key.strip_suffix(" Profile") {
                    details.profiles.insert(sr.trim().to_string(), value);
                } else if let Some(sr) = key.strip_suffix(" Replicates") {
                    let members = value.split_whitespace().map(str::to_string).collect();
                    details.replicates.push((sr.trim().to_string(), members));
                } else {
                    log::debug!("Ignoring details key '{key}'");
                }
            }
        }
    }
    Ok(details)
}

/// Disjoint sets over `0..n` with path halving.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    pub fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

/// Replicate groups over `sub_reactors`, representative first then header order.
///
/// Only classes with at least two members are returned.
pub fn replicate_groups(sub_reactors: &[String], replicates: &[(String, Vec<String>)]) -> Vec<Vec<usize>> {
    let index: HashMap<&str, usize> = sub_reactors
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    let mut uf = UnionFind::new(sub_reactors.len());
    // Position of each sub-reactor's first mention in the details file.
    let mut first_mention: Vec<usize> = vec![usize::MAX; sub_reactors.len()];
    let mut rank = 0;
    let mut mention = |name: &str, first_mention: &mut Vec<usize>| -> Option<usize> {
        let Some(&i) = index.get(name) else {
            log::warn!("Replicate '{name}' does not match any sub-reactor in the data file");
            return None;
        };
        if first_mention[i] == usize::MAX {
            first_mention[i] = rank;
        }
        rank += 1;
        Some(i)
    };
    for (owner, members) in replicates {
        let Some(o) = mention(owner, &mut first_mention) else {
            continue;
        };
        for m in members {
            if let Some(j) = mention(m, &mut first_mention) {
                uf.union(o, j);
            }
        }
    }

    let mut classes: Vec<(usize, Vec<usize>)> = Vec::new();
    let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
    for i in 0..sub_reactors.len() {
        let root = uf.find(i);
        let slot = *slot_of_root.entry(root).or_insert_with(|| {
            classes.push((root, Vec::new()));
            classes.len() - 1
        });
        classes[slot].1.push(i);
    }
    classes
        .into_iter()
        .map(|(_, members)| members)
        .filter(|members| members.len() > 1)
        .map(|mut members| {
            if let Some(pos) = members
                .iter()
                .enumerate()
                .min_by_key(|(_, m)| first_mention[**m])
                .map(|(pos, _)| pos)
            {
                let rep = members.remove(pos);
                members.insert(0, rep);
            }
            members
        })
        .collect()
}

/// Split `"OD 680 (A1)"` into `("OD 680", Some("A1"))`.
fn split_sub_reactor(name: &str) -> (String, Option<String>) {
    if let (Some(open), true) = (name.rfind('('), name.ends_with(')')) {
        let sub = name[open + 1..name.len() - 1].trim();
        if !sub.is_empty() {
            return (name[..open].trim().to_string(), Some(sub.to_string()));
        }
    }
    (name.to_string(), None)
}

pub fn parse_ht24(text: &str, details: Option<&Ht24Details>, opts: &ReaderSettings) -> Result<ReadResult> {
    let records = read_records(text, b',')?;
    let mut rows = records.iter().enumerate().filter(|(_, r)| !is_blank(r));
    let (_, header) = rows
        .next()
        .ok_or_else(|| Error::format("Empty HT24 file."))?;
    let (time_name, time_unit) = split_name_unit(header.get(0).unwrap_or_default());
    if !time_name.eq_ignore_ascii_case("time") {
        return Err(Error::format(format!(
            "HT24 header must start with 'Time [unit]' (found '{time_name}')."
        ))
        .with_row(1));
    }

    // (signal name, unit, sub-reactor) per column.
    let mut columns: Vec<(String, String, Option<String>)> = Vec::new();
    let mut subs: Vec<String> = Vec::new();
    for cell in header.iter().skip(1) {
        let (name, unit) = split_name_unit(cell);
        let (name, sub) = split_sub_reactor(&name);
        if let Some(s) = &sub {
            if !subs.contains(s) {
                subs.push(s.clone());
            }
        }
        columns.push((name, unit, sub));
    }
    if subs.is_empty() {
        subs.push(String::new());
    }

    let mut axis = TimeAxis::new(time_name.clone(), &time_unit);
    let mut data: Vec<Vec<f64>> = vec![Vec::new(); columns.len()];
    for (idx, rec) in rows {
        let line = line_of(rec, idx + 1);
        let t = parse_number(rec.get(0).unwrap_or_default(), line, &time_name)?;
        axis.push(t);
        for (k, (name, _, _)) in columns.iter().enumerate() {
            let cell = rec.get(k + 1).unwrap_or_default();
            let v = if clean_cell(cell).is_empty() {
                f64::NAN
            } else {
                parse_number(cell, line, name)?
            };
            data[k].push(v);
        }
    }

    let mut result = ReadResult::default();
    for sub in &subs {
        let mut meta = Experiment::new(sub.clone(), TimeAxis::seconds(axis.name.clone(), Vec::new()));
        meta.sub_reactor = sub.clone();
        if let Some(d) = details {
            meta.date = d.date;
            meta.time = d.time;
            meta.title = d.experiment_name.clone();
            meta.reactor = d.serial_number.clone();
            meta.profile = d.profiles.get(sub).cloned().unwrap_or_default();
        }
        if meta.label.is_empty() {
            meta.label = meta.title.clone();
        }
        let signals = columns
            .iter()
            .zip(&data)
            .filter(|((_, _, s), _)| s.as_ref().is_none_or(|s| s == sub))
            .map(|((name, unit, _), values)| Signal::new(name.clone(), unit.clone()).with_data(values.clone()))
            .collect();
        let block = Block {
            x: axis.data.clone(),
            signals,
        };
        result
            .experiments
            .push(build_acquisition(&meta, &axis.name, block, opts)?);
    }

    if opts.merge_replicates {
        if let Some(d) = details {
            result.replicate_groups = replicate_groups(&subs, &d.replicates);
        }
    }
    log::debug!(
        "HT24: {} sub-reactors, {} replicate groups",
        subs.len(),
        result.replicate_groups.len()
    );
    Ok(result)
}
