//! Top-level application orchestration.
//!
//! `src/main.rs` only maps the returned error to an exit code; this module parses the
//! command line, sets up logging, loads data and prints reports.

use clap::Parser;

use crate::cli::{Cli, Command, MeasureArgs};
use crate::error::{Error, Result};
use crate::manager::{DataManager, Measurement};
use crate::report;
use crate::stats;

pub mod pipeline;

/// Entry point for the `odc` binary.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut ctx = pipeline::load_context(cli.config.as_deref())?;
    let files = cli.command.inputs().files.clone();

    if let Command::Export(args) = &cli.command {
        let results = crate::io::read_files(&files, &ctx.readers)?;
        for path in pipeline::export_native(&results, &args.out)? {
            println!("{}", path.display());
        }
        return Ok(());
    }

    if let Command::Fit(args) = &cli.command {
        if let Some(model) = &args.model {
            ctx.fit.model = model.clone();
        }
        ctx.fit.from = args.from.or(ctx.fit.from);
        ctx.fit.to = args.to.or(ctx.fit.to);
    }
    ctx.validate()?;

    let dm = pipeline::load_manager(&files, cli.calibration.as_deref(), &mut ctx)?;
    let labels = dm.get_titles();
    let x_unit = ctx.axes.xvar.label();

    let output = match &cli.command {
        Command::Summary(_) => report::format_summary(&dm, &ctx),
        Command::Gradient(a) => {
            let values = dm.get_gradients(&a.signal, a.from, a.to, &ctx)?;
            let unit = format!("{}/{x_unit}", signal_unit(&dm, &a.signal));
            report::format_measurements(&format!("Gradient of {} from {} to {}", a.signal, a.from, a.to), &labels, &values, &unit)
        }
        Command::TimeTo(a) => {
            let values = dm.get_time_to(&a.signal, a.value, &ctx)?;
            report::format_measurements(&format!("Time for {} to reach {}", a.signal, a.value), &labels, &values, x_unit)
        }
        Command::Average(a) => {
            let values = if a.conditions {
                dm.get_condition_averages(&a.signal, a.from, a.to, &ctx)?
            } else {
                dm.get_averages(&a.signal, a.from, a.to, &ctx)?
            };
            let unit = if a.conditions {
                condition_unit(&dm, &a.signal)
            } else {
                signal_unit(&dm, &a.signal)
            };
            report::format_measurements(&format!("Average {}", a.signal), &labels, &values, &unit)
        }
        Command::ConditionAt(a) => {
            let values = dm.get_condition_at_time(&a.signal, a.time, &ctx)?;
            report::format_measurements(
                &format!("{} at {} {x_unit}", a.signal, a.time),
                &labels,
                &values,
                &condition_unit(&dm, &a.signal),
            )
        }
        Command::Fit(a) => {
            let fits = dm.get_fits(&a.signal, &ctx)?;
            report::format_fits(&labels, &fits, x_unit, &signal_unit(&dm, &a.signal))
        }
        Command::Ttest(a) => {
            let (i, j) = match a.groups.as_slice() {
                [i, j] => (*i, *j),
                _ => return Err(Error::invalid_argument("--groups takes exactly two indices.")),
            };
            let m = measurement(&a.measure)?;
            let r = stats::ttest_slots(&dm, i, j, &m, &ctx)?;
            report::format_ttest(&title(&dm, i)?, &title(&dm, j)?, &r)
        }
        Command::Anova(a) => {
            let groups: Vec<usize> = if a.groups.is_empty() {
                (0..dm.len()).collect()
            } else {
                a.groups.clone()
            };
            let m = measurement(&a.measure)?;
            let r = stats::anova_slots(&dm, &groups, &m, &ctx)?;
            let names = groups.iter().map(|&i| title(&dm, i)).collect::<Result<Vec<_>>>()?;
            report::format_anova(&names, &r)
        }
        Command::Export(_) => String::new(),
    };
    print!("{output}");
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn measurement(args: &MeasureArgs) -> Result<Measurement> {
    args.measurement().map_err(Error::invalid_argument)
}

fn title(dm: &DataManager, i: usize) -> Result<String> {
    dm.get_title(i)
        .map(str::to_string)
        .ok_or_else(|| Error::invalid_argument(format!("No experiment at index {i}.")))
}

fn signal_unit(dm: &DataManager, signal: &str) -> String {
    dm.growth()
        .primaries()
        .find_map(|e| e.signal(signal))
        .map(|s| s.unit.clone())
        .unwrap_or_default()
}

fn condition_unit(dm: &DataManager, signal: &str) -> String {
    dm.conditions()
        .iter_all()
        .find_map(|e| e.signal(signal))
        .map(|s| s.unit.clone())
        .unwrap_or_default()
}
