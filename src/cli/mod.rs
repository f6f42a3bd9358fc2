//! Command-line parsing for the `odc` binary.
//!
//! Parsing and dispatch stay here and in [`crate::app`]; nothing below depends on clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::manager::Measurement;

#[derive(Debug, Parser)]
#[command(name = "odc", version, about = "Growth-curve analysis for bioreactor and plate-reader exports")]
pub struct Cli {
    /// Settings JSON (axes, processing, averaging, fit, readers).
    #[arg(long, global = true, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Calibration table (`true,measured` rows) for OD to cell density conversion.
    #[arg(long, global = true, value_name = "CSV")]
    pub calibration: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List loaded experiments.
    Summary(Inputs),
    /// Slope of the secant between the first points where the signal reaches two values.
    Gradient(GradientArgs),
    /// First time a signal reaches a value.
    TimeTo(TimeToArgs),
    /// Mean signal inside a time window.
    Average(AverageArgs),
    /// Condition value at a given time.
    ConditionAt(ConditionAtArgs),
    /// Fit a growth model.
    Fit(FitArgs),
    /// Two-sample t-test of a measurement between two experiments' replicates.
    Ttest(TTestArgs),
    /// One-way ANOVA of a measurement across experiments' replicates.
    Anova(AnovaArgs),
    /// Write every acquisition in the native CSV format.
    Export(ExportArgs),
}

impl Command {
    pub fn inputs(&self) -> &Inputs {
        match self {
            Command::Summary(a) => a,
            Command::Gradient(a) => &a.inputs,
            Command::TimeTo(a) => &a.inputs,
            Command::Average(a) => &a.inputs,
            Command::ConditionAt(a) => &a.inputs,
            Command::Fit(a) => &a.inputs,
            Command::Ttest(a) => &a.inputs,
            Command::Anova(a) => &a.inputs,
            Command::Export(a) => &a.inputs,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct Inputs {
    /// Data files (details files are paired with their HT24 data file).
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub struct GradientArgs {
    #[arg(long)]
    pub signal: String,
    /// Signal value where the secant starts.
    #[arg(long)]
    pub from: f64,
    /// Signal value where the secant ends.
    #[arg(long)]
    pub to: f64,
    #[command(flatten)]
    pub inputs: Inputs,
}

#[derive(Debug, Args)]
pub struct TimeToArgs {
    #[arg(long)]
    pub signal: String,
    #[arg(long)]
    pub value: f64,
    #[command(flatten)]
    pub inputs: Inputs,
}

#[derive(Debug, Args)]
pub struct AverageArgs {
    #[arg(long)]
    pub signal: String,
    #[arg(long)]
    pub from: Option<f64>,
    #[arg(long)]
    pub to: Option<f64>,
    /// Average the paired condition signal instead of the growth signal.
    #[arg(long)]
    pub conditions: bool,
    #[command(flatten)]
    pub inputs: Inputs,
}

#[derive(Debug, Args)]
pub struct ConditionAtArgs {
    #[arg(long)]
    pub signal: String,
    #[arg(long)]
    pub time: f64,
    #[command(flatten)]
    pub inputs: Inputs,
}

#[derive(Debug, Args)]
pub struct FitArgs {
    #[arg(long)]
    pub signal: String,
    /// Model name (flat, linear, quadratic, exponential, zweitering); overrides the settings.
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub from: Option<f64>,
    #[arg(long)]
    pub to: Option<f64>,
    #[command(flatten)]
    pub inputs: Inputs,
}

/// Which replicate-level measurement a statistical test compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MeasureKind {
    Gradient,
    TimeTo,
    Average,
    ConditionAverage,
    ConditionAt,
    FitParameter,
}

#[derive(Debug, Args, Clone)]
pub struct MeasureArgs {
    #[arg(long, value_enum)]
    pub measure: MeasureKind,
    #[arg(long)]
    pub signal: String,
    #[arg(long)]
    pub from: Option<f64>,
    #[arg(long)]
    pub to: Option<f64>,
    /// Threshold for `time-to`, or the time for `condition-at`.
    #[arg(long)]
    pub value: Option<f64>,
    /// Parameter name for `fit-parameter`.
    #[arg(long)]
    pub param: Option<String>,
}

impl MeasureArgs {
    /// Build the measurement, reporting which option is missing.
    pub fn measurement(&self) -> Result<Measurement, String> {
        let signal = self.signal.clone();
        let need = |v: Option<f64>, name: &str| v.ok_or_else(|| format!("--measure {:?} needs --{name}", self.measure));
        Ok(match self.measure {
            MeasureKind::Gradient => Measurement::Gradient {
                signal,
                from: need(self.from, "from")?,
                to: need(self.to, "to")?,
            },
            MeasureKind::TimeTo => Measurement::TimeTo {
                signal,
                value: need(self.value, "value")?,
            },
            MeasureKind::Average => Measurement::Average {
                signal,
                from: self.from,
                to: self.to,
            },
            MeasureKind::ConditionAverage => Measurement::ConditionAverage {
                signal,
                from: self.from,
                to: self.to,
            },
            MeasureKind::ConditionAt => Measurement::ConditionAt {
                signal,
                time: need(self.value, "value")?,
            },
            MeasureKind::FitParameter => Measurement::FitParameter {
                signal,
                name: self
                    .param
                    .clone()
                    .ok_or_else(|| "--measure fit-parameter needs --param".to_string())?,
            },
        })
    }
}

#[derive(Debug, Args)]
pub struct TTestArgs {
    #[command(flatten)]
    pub measure: MeasureArgs,
    /// The two experiment indices to compare.
    #[arg(long, num_args = 2, value_names = ["I", "J"], required = true)]
    pub groups: Vec<usize>,
    #[command(flatten)]
    pub inputs: Inputs,
}

#[derive(Debug, Args)]
pub struct AnovaArgs {
    #[command(flatten)]
    pub measure: MeasureArgs,
    /// Experiment indices to compare (default: all).
    #[arg(long, num_args = 1..)]
    pub groups: Vec<usize>,
    #[command(flatten)]
    pub inputs: Inputs,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Output directory.
    #[arg(long, value_name = "DIR")]
    pub out: PathBuf,
    #[command(flatten)]
    pub inputs: Inputs,
}
