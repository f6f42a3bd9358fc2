//! Analysis settings threaded through every core call.
//!
//! A [`Context`] is a plain value: the presentation layer builds (or loads) one and
//! passes it by reference into readers, the processing pipeline and the measurement
//! routines. Nothing in the core holds on to it.
//!
//! The JSON file format mirrors the struct layout; every field is optional and falls
//! back to [`Default`].

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::TimeUnit;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    pub axes: AxisSettings,
    pub processing: ProcessingSettings,
    pub averaging: AveragingSettings,
    pub stats: StatsSettings,
    pub display: DisplaySettings,
    pub fit: FitSettings,
    pub readers: ReaderSettings,
}

/// Axis names, units and display ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisSettings {
    pub xvar: TimeUnit,
    pub x_name: String,
    pub x_range: Option<(f64, f64)>,
    pub y_name: String,
    pub y_unit: String,
    pub y_range: Option<(f64, f64)>,
    pub y2_name: String,
    pub y2_unit: String,
    pub y2_range: Option<(f64, f64)>,
}

impl Default for AxisSettings {
    fn default() -> Self {
        Self {
            xvar: TimeUnit::Hours,
            x_name: "Time".to_string(),
            x_range: None,
            y_name: "OD".to_string(),
            y_unit: String::new(),
            y_range: None,
            y2_name: String::new(),
            y2_unit: String::new(),
            y2_range: None,
        }
    }
}

/// Signal conditioning applied to growth series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub remove_zeros: bool,
    /// Convert OD into cell density through the loaded calibration.
    pub calibrate: bool,
    pub align: bool,
    pub y_alignment: Option<f64>,
    pub remove_above: Option<f64>,
    pub remove_below: Option<f64>,
    pub auto_remove: bool,
    pub outlier_threshold: f64,
    pub smooth: bool,
    pub sg_window: usize,
    pub sg_order: usize,
    pub sg_deriv: usize,
    pub sg_rate: f64,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            remove_zeros: false,
            calibrate: false,
            align: false,
            y_alignment: None,
            remove_above: None,
            remove_below: None,
            auto_remove: false,
            outlier_threshold: 5.0,
            smooth: false,
            sg_window: 5,
            sg_order: 2,
            sg_deriv: 0,
            sg_rate: 1.0,
        }
    }
}

/// Time-window averaging, in units of `axes.xvar`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AveragingSettings {
    pub growth_average: Option<f64>,
    pub condition_average: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSettings {
    /// Report the standard error of the mean instead of the sample standard deviation.
    pub std_err: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Replace y by `ln(y / y0)`.
    pub ynormlog: bool,
    pub legend_title: bool,
    pub legend_reactor: bool,
    pub legend_profile: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            ynormlog: false,
            legend_title: false,
            legend_reactor: false,
            legend_profile: true,
        }
    }
}

/// Model fitting request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitSettings {
    #[serde(rename = "type")]
    pub model: String,
    pub from: Option<f64>,
    pub to: Option<f64>,
    pub start: Vec<f64>,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            model: "linear".to_string(),
            from: None,
            to: None,
            start: Vec::new(),
            min: Vec::new(),
            max: Vec::new(),
        }
    }
}

/// Options honoured by the file readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    /// Attach replicate-group members to their representative's slot.
    pub merge_replicates: bool,
    /// Keep every N-th growth row.
    pub growth_downsample: usize,
    /// Keep every N-th condition row.
    pub condition_downsample: usize,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            merge_replicates: true,
            growth_downsample: 1,
            condition_downsample: 1,
        }
    }
}

impl Context {
    /// Load settings from a JSON document.
    pub fn load(path: &Path) -> Result<Context> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let ctx: Context = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            Error::format(format!("Invalid settings JSON: {e}"))
                .with_file(path)
                .with_row(e.line())
        })?;
        ctx.validate()?;
        log::info!("Loaded settings from {}", path.display());
        Ok(ctx)
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        let p = &self.processing;
        if p.smooth {
            if p.sg_window == 0 || p.sg_window % 2 == 0 {
                return Err(Error::invalid_argument(format!(
                    "Savitzky-Golay window must be a positive odd integer (got {}).",
                    p.sg_window
                )));
            }
            if p.sg_window < p.sg_order + 2 {
                return Err(Error::invalid_argument(format!(
                    "Savitzky-Golay window {} is too small for order {}.",
                    p.sg_window, p.sg_order
                )));
            }
        }
        if !(p.outlier_threshold.is_finite() && p.outlier_threshold >= 0.0) {
            return Err(Error::invalid_argument("Outlier threshold must be finite and >= 0."));
        }
        for (name, window) in [
            ("growth_average", self.averaging.growth_average),
            ("condition_average", self.averaging.condition_average),
        ] {
            if let Some(w) = window {
                if !(w.is_finite() && w > 0.0) {
                    return Err(Error::invalid_argument(format!(
                        "Averaging window `{name}` must be > 0 (got {w})."
                    )));
                }
            }
        }
        if self.readers.growth_downsample == 0 || self.readers.condition_downsample == 0 {
            return Err(Error::invalid_argument("Downsampling factors must be >= 1."));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{
            "axes": { "xvar": "minutes" },
            "processing": { "remove_zeros": true, "y_alignment": 0.2 },
            "fit": { "type": "exponential", "start": [1.0, 0.5] },
            "unknown_section": 3
        }"#;
        let ctx: Context = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.axes.xvar, TimeUnit::Minutes);
        assert!(ctx.processing.remove_zeros);
        assert_eq!(ctx.processing.y_alignment, Some(0.2));
        assert_eq!(ctx.processing.sg_window, 5);
        assert_eq!(ctx.fit.model, "exponential");
        assert_eq!(ctx.fit.start, vec![1.0, 0.5]);
        assert!(ctx.readers.merge_replicates);
    }

    #[test]
    fn even_sg_window_is_rejected() {
        let mut ctx = Context::default();
        ctx.processing.smooth = true;
        ctx.processing.sg_window = 4;
        assert!(ctx.validate().is_err());
        ctx.processing.sg_window = 3;
        ctx.processing.sg_order = 2;
        assert!(ctx.validate().is_err());
        ctx.processing.sg_order = 1;
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn load_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ \"axes\": ").unwrap();
        let err = Context::load(file.path()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Format);
    }
}
