//! Structured errors returned by every core routine.
//!
//! The core never recovers locally and never exits the process. Each failure carries:
//!
//! - a `kind` the presentation layer can branch on
//! - a human-readable `message`
//! - optionally the file and the (1-based) line/row that caused it

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reader parse failure.
    Format,
    /// Analytical operation on an empty selection.
    NoData,
    /// Condition pairing failed for a growth experiment.
    NoConditionMatch,
    /// Fit requested against an unrecognised model name.
    ModelUnknown,
    /// Bad numeric argument (SG window, bounds, malformed numbers, ...).
    InvalidArgument,
    /// Statistical test preconditions violated.
    InsufficientSamples,
    /// Non-linear least squares did not converge.
    FitFailure,
    /// File could not be opened or read.
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Format => "FormatError",
            ErrorKind::NoData => "NoDataError",
            ErrorKind::NoConditionMatch => "NoConditionMatch",
            ErrorKind::ModelUnknown => "ModelUnknown",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::InsufficientSamples => "InsufficientSamples",
            ErrorKind::FitFailure => "FitFailure",
            ErrorKind::Io => "IoError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone)]
#[error("{message}{}", location_suffix(.source_file, .row))]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub source_file: Option<PathBuf>,
    pub row: Option<usize>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source_file: None,
            row: None,
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Format, message)
    }

    pub fn no_data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoData, message)
    }

    pub fn no_condition_match(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoConditionMatch, message)
    }

    pub fn model_unknown(name: &str) -> Self {
        Self::new(ErrorKind::ModelUnknown, format!("Unknown model '{name}'."))
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn insufficient_samples(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InsufficientSamples, message)
    }

    pub fn fit_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FitFailure, message)
    }

    pub fn io(path: &Path, err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, format!("Failed to read '{}': {err}", path.display()))
            .with_file(path)
    }

    /// Attach the originating file (keeps an already attached one).
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        if self.source_file.is_none() {
            self.source_file = Some(path.as_ref().to_path_buf());
        }
        self
    }

    /// Attach a 1-based line/row number (keeps an already attached one).
    pub fn with_row(mut self, row: usize) -> Self {
        if self.row.is_none() {
            self.row = Some(row);
        }
        self
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self.kind {
            ErrorKind::Format | ErrorKind::InvalidArgument | ErrorKind::Io => 2,
            ErrorKind::NoData | ErrorKind::NoConditionMatch | ErrorKind::InsufficientSamples => 3,
            ErrorKind::ModelUnknown | ErrorKind::FitFailure => 4,
        }
    }
}

fn location_suffix(file: &Option<PathBuf>, row: &Option<usize>) -> String {
    let name = file.as_ref().map(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| p.display().to_string())
    });
    match (name, *row) {
        (Some(name), Some(row)) => format!(" ({name}, line {row})"),
        (Some(name), None) => format!(" ({name})"),
        (None, Some(row)) => format!(" (line {row})"),
        (None, None) => String::new(),
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        let row = err.position().map(|p| p.line() as usize);
        let mut out = Error::format(format!("CSV parse error: {err}"));
        if let Some(row) = row {
            out = out.with_row(row);
        }
        out
    }
}
