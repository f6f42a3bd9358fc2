//! Shared loading steps used by every subcommand:
//! settings -> calibration -> readers -> [`DataManager`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::Context;
use crate::error::{Error, Result};
use crate::io::{self, ReadResult};
use crate::manager::DataManager;

/// Settings from `--config`, or the defaults.
pub fn load_context(config: Option<&Path>) -> Result<Context> {
    match config {
        Some(path) => Context::load(path),
        None => Ok(Context::default()),
    }
}

/// Read the input files and load them into a manager.
///
/// A calibration file turns calibration on, since it is useless otherwise.
pub fn load_manager(
    files: &[PathBuf],
    calibration: Option<&Path>,
    ctx: &mut Context,
) -> Result<DataManager> {
    let mut dm = DataManager::new();
    if let Some(path) = calibration {
        dm.set_calibration(Some(io::read_calibration(path)?));
        if !ctx.processing.calibrate {
            log::info!("Calibration file given; enabling calibration");
            ctx.processing.calibrate = true;
        }
    }
    for result in io::read_files(files, &ctx.readers)? {
        dm.load(result, ctx);
    }
    if dm.is_empty() {
        return Err(Error::no_data("No experiments found in the input files."));
    }
    Ok(dm)
}

fn file_name_for(index: usize, label: &str) -> String {
    let clean: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{index:03}_{}.csv", clean.trim_matches('_'))
}

/// Write every acquisition of `results` into `dir` as native CSV. Returns the paths.
pub fn export_native(results: &[ReadResult], dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let mut written = Vec::new();
    for acq in results.iter().flat_map(|r| &r.experiments) {
        let path = dir.join(file_name_for(written.len(), &acq.growth.label));
        io::write_native(&path, acq)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Signal, TimeAxis, Experiment};
    use crate::io::Acquisition;

    #[test]
    fn export_names_are_sanitised() {
        assert_eq!(file_name_for(3, "OD 680 (A1)"), "003_OD_680__A1.csv");
    }

    #[test]
    fn exported_files_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = Experiment::new("run/1", TimeAxis::seconds("Time", vec![0.0, 60.0]));
        e.signals.push(Signal::new("OD", "AU").with_data(vec![0.1, 0.2]));
        let results = vec![ReadResult::single(Acquisition {
            growth: e,
            conditions: None,
        })];
        let paths = export_native(&results, dir.path()).unwrap();
        assert_eq!(paths.len(), 1);
        let back = io::read_file(&paths[0], &Default::default()).unwrap();
        assert_eq!(back.experiments[0].growth.label, "run/1");
    }
}
