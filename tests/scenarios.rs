//! End-to-end behaviour through the public API.

use std::fs;

use approx::assert_relative_eq;
use od_curves::calibration::Calibration;
use od_curves::domain::{Context, Experiment, Signal, TimeAxis, TimeUnit};
use od_curves::io::{self, Acquisition, ReadResult};
use od_curves::math::savitzky_golay;
use od_curves::process::remove_outliers;
use od_curves::stats::{ttest_slots, anova_slots};
use od_curves::{DataManager, ErrorKind, Measurement};

fn seconds_ctx() -> Context {
    let mut ctx = Context::default();
    ctx.axes.xvar = TimeUnit::Seconds;
    ctx
}

fn experiment(label: &str, sub: &str, y: Vec<f64>) -> Experiment {
    let x = (0..y.len()).map(|i| i as f64).collect();
    let mut e = Experiment::new(label, TimeAxis::seconds("Time", x));
    e.reactor = "PBR".into();
    e.sub_reactor = sub.into();
    e.signals.push(Signal::new("sig", "arb").with_data(y));
    e
}

fn manager_with(experiments: Vec<Experiment>, groups: Vec<Vec<usize>>, ctx: &Context) -> DataManager {
    let mut dm = DataManager::new();
    dm.load(
        ReadResult {
            experiments: experiments
                .into_iter()
                .map(|growth| Acquisition {
                    growth,
                    conditions: None,
                })
                .collect(),
            replicate_groups: groups,
        },
        ctx,
    );
    dm
}

fn ramp(from: f64) -> Vec<f64> {
    (0..10).map(|i| from + i as f64).collect()
}

#[test]
fn linear_gradient() {
    let ctx = seconds_ctx();
    let dm = manager_with(vec![experiment("a", "A1", ramp(0.0))], vec![], &ctx);
    let g = dm.get_gradients("sig", 2.0, 6.0, &ctx).unwrap();
    assert_eq!(g.len(), 1);
    assert_relative_eq!(g[0].unwrap(), 1.0, epsilon = 1e-9);
}

#[test]
fn curved_gradient_is_a_secant() {
    let ctx = seconds_ctx();
    let y = (0..10).map(|i| (i * i) as f64).collect();
    let dm = manager_with(vec![experiment("a", "A1", y)], vec![], &ctx);
    let g = dm.get_gradients("sig", 4.0, 36.0, &ctx).unwrap();
    assert_relative_eq!(g[0].unwrap(), 8.0, epsilon = 1e-9);
    assert_eq!(dm.get_gradients("sig", 4.0, 100.0, &ctx).unwrap(), vec![None]);
    assert_eq!(dm.get_gradients("sig", 4.0, 3.0, &ctx).unwrap(), vec![None]);
}

#[test]
fn short_experiment_does_not_abort_smoothed_query() {
    let mut ctx = seconds_ctx();
    ctx.processing.smooth = true;
    ctx.processing.sg_window = 5;
    let dm = manager_with(
        vec![experiment("long", "A1", ramp(0.0)), experiment("short", "A2", vec![0.0, 1.0, 2.0])],
        vec![],
        &ctx,
    );
    assert_eq!(dm.get_time_to("sig", 4.5, &ctx).unwrap(), vec![Some(5.0), None]);
}

#[test]
fn time_to_threshold() {
    let ctx = seconds_ctx();
    let dm = manager_with(vec![experiment("a", "A1", ramp(0.0))], vec![], &ctx);
    assert_eq!(dm.get_time_to("sig", 5.5, &ctx).unwrap(), vec![Some(6.0)]);
}

#[test]
fn outlier_bounds() {
    let x = ramp(0.0);
    let y = vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 30.0];
    let (x, y) = remove_outliers(&x, &y, Some(2.0), Some(6.0), false, 0.0);
    assert_eq!(y, vec![2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(x, vec![2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn smoothing_constant_is_identity() {
    let y = vec![1.0; 7];
    let out = savitzky_golay(&y, 3, 1, 0, 1.0).unwrap();
    for v in out {
        assert_relative_eq!(v, 1.0, epsilon = 1e-12);
    }
}

#[test]
fn calibration_extrapolates_linearly() {
    let cal = Calibration::new(&[0.1, 0.2, 0.8, 0.9], &[1.0, 2.0, 8.0, 9.0]);
    let out = cal.calibrate(&[0.05, 0.5, 0.95]);
    assert_relative_eq!(out[0], 0.5, epsilon = 1e-9);
    assert_relative_eq!(out[1], 5.0, epsilon = 1e-9);
    assert_relative_eq!(out[2], 9.5, epsilon = 1e-9);
}

#[test]
fn replicate_averaging_and_sem() {
    let mut ctx = seconds_ctx();
    let dm = manager_with(
        vec![experiment("a", "A1", ramp(0.0)), experiment("b", "A2", ramp(10.0))],
        vec![vec![0, 1]],
        &ctx,
    );
    assert_eq!(dm.len(), 1);
    let s = dm.get_xy_data(0, "sig", &ctx).unwrap();
    assert_eq!(s.y, ramp(5.0));
    let sd = s.sigma.unwrap();
    for v in &sd {
        assert_relative_eq!(*v, 7.0710678, epsilon = 1e-6);
    }
    ctx.stats.std_err = true;
    let sem = dm.get_xy_data(0, "sig", &ctx).unwrap().sigma.unwrap();
    for (a, b) in sem.iter().zip(&sd) {
        assert_relative_eq!(*a, b / 2f64.sqrt(), epsilon = 1e-12);
    }
}

#[test]
fn primary_is_first_replicate() {
    let ctx = seconds_ctx();
    let dm = manager_with(
        vec![
            experiment("a", "A1", ramp(0.0)),
            experiment("b", "A2", ramp(1.0)),
            experiment("c", "A3", ramp(2.0)),
        ],
        vec![vec![2, 0]],
        &ctx,
    );
    assert_eq!(dm.get_titles(), vec!["b", "c"]);
    assert_eq!(dm.growth().replicates(1).unwrap().len(), 2);
    for i in 0..dm.len() {
        let reps = dm.growth().replicates(i).unwrap();
        assert_eq!(Some(&reps[0]), dm.growth().primary(i));
    }
}

#[test]
fn missing_values_stay_missing() {
    let ctx = seconds_ctx();
    let dm = manager_with(
        vec![experiment("a", "A1", ramp(0.0)), experiment("b", "A2", ramp(100.0))],
        vec![],
        &ctx,
    );
    let t = dm.get_time_to("sig", 50.0, &ctx).unwrap();
    assert_eq!(t, vec![None, Some(0.0)]);
    let g = dm.get_gradients("nope", 1.0, 2.0, &ctx).unwrap();
    assert_eq!(g, vec![None, None]);
}

#[test]
fn statistics_on_replicates() {
    let ctx = seconds_ctx();
    let dm = manager_with(
        vec![
            experiment("a1", "A1", ramp(0.0)),
            experiment("a2", "A2", ramp(1.0)),
            experiment("b1", "B1", ramp(10.0)),
            experiment("b2", "B2", ramp(12.0)),
        ],
        vec![vec![0, 1], vec![2, 3]],
        &ctx,
    );
    let m = Measurement::Average {
        signal: "sig".into(),
        from: None,
        to: None,
    };
    let r = ttest_slots(&dm, 0, 1, &m, &ctx).unwrap();
    assert_eq!(r.df, 2.0);
    assert!(r.t < 0.0 && r.p < 0.05);

    let err = anova_slots(&dm, &[0], &m, &ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InsufficientSamples);
}

#[test]
fn reads_files_and_measures() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("screen_data.csv");
    let details = dir.path().join("screen_details.csv");
    fs::write(
        &data,
        "Time [h],OD 680 (A1) [AU],OD 680 (A2) [AU],OD 680 (A3) [AU]\n\
         0,0.1,0.1,0.2\n1,0.2,0.2,0.2\n2,0.3,0.3,0.2\n3,0.4,0.4,0.2\n",
    )
    .unwrap();
    fs::write(&details, "Date,2024-03-05\nSerial Number,HT-7\nA1 Replicates,A2\n").unwrap();

    let ctx = Context::default();
    let mut dm = DataManager::new();
    for result in io::read_files(&[data, details], &ctx.readers).unwrap() {
        dm.load(result, &ctx);
    }
    assert_eq!(dm.len(), 2);
    let g = dm.get_gradients("OD 680", 0.1, 0.3, &ctx).unwrap();
    assert_relative_eq!(g[0].unwrap(), 0.1, epsilon = 1e-9);
    assert_eq!(g[1], None);
}

#[test]
fn sparse_condition_cells_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    fs::write(
        &path,
        "Name,Run,Reactor,PBR,SubReactor,A1
         Date,2024-03-05,Time,10:00:00
         Time [s],OD [AU],Conditions,Light [umol],Temp [C]
         0,0.1,,100,30
         1800,0.2,,,31
         3600,0.3,,300,32
",
    )
    .unwrap();

    let ctx = seconds_ctx();
    let mut dm = DataManager::new();
    dm.load(io::read_file(&path, &ctx.readers).unwrap(), &ctx);

    let avg = dm.get_condition_averages("Light", None, None, &ctx).unwrap();
    assert_relative_eq!(avg[0].unwrap(), 200.0, epsilon = 1e-9);
    let at = dm.get_condition_at_time("Light", 1800.0, &ctx).unwrap();
    assert_relative_eq!(at[0].unwrap(), 200.0, epsilon = 1e-9);
    let temp = dm.get_condition_at_time("Temp", 1800.0, &ctx).unwrap();
    assert_relative_eq!(temp[0].unwrap(), 31.0, epsilon = 1e-9);
}
