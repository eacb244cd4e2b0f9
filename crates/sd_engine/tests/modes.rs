// crates/sd_engine/tests/modes.rs

//! Execution mode tests
//!
//! Runs the same configuration through the pull and concurrent modes with a
//! toy integrator whose result depends on every forcing value it sees.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use ndarray::Array2;
use sd_config::RunConfig;
use sd_forcing::{FnProducer, ForcingVariable, NormalizedSample, FREEZE};
use sd_foundation::grid::{Grid, Shape};
use sd_io::{DepthObservations, MemorySink, StateField, StateSnapshot};
use sd_engine::{
    run_pipeline, run_single, run_threaded, DepthUpdater, IntegrationError, Integrator,
    IntegratorDriver, IntegratorParams, StateRecord, TimestepLadder,
};

const SHAPE: Shape = Shape::new(3, 4);

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2018, 3, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn config(steps: i64, minutes: u32) -> RunConfig {
    let end = start() + Duration::minutes(steps * minutes as i64);
    RunConfig::new(start(), end, minutes, SHAPE.ny, SHAPE.nx)
}

/// Station-like forcing varying over time, space and variable
fn synthetic(variable: ForcingVariable, key: &NaiveDateTime) -> Option<Grid> {
    let t = key.hour() as f64 * 60.0 + key.minute() as f64;
    let v = ForcingVariable::ALL.iter().position(|x| *x == variable).unwrap_or(0) as f64;
    Some(Array2::from_shape_fn(SHAPE.dim(), |(y, x)| {
        ((t + 1.0) * 0.37 + v * 1.3 + y as f64 * 0.11 - x as f64 * 0.07).sin()
    }))
}

/// Snow depth driven by the forcing window
#[derive(Default)]
struct Accumulator {
    first_steps: Vec<usize>,
    air_temps: Vec<f64>,
}

impl Integrator for Accumulator {
    fn integrate(
        &mut self,
        left: &NormalizedSample,
        right: &NormalizedSample,
        state: &mut StateRecord,
        ladder: &TimestepLadder,
        _params: &IntegratorParams,
        first_step: usize,
    ) -> Result<(), IntegrationError> {
        self.first_steps.push(first_step);
        if let Some(t) = right.get(ForcingVariable::AirTemp) {
            self.air_temps.push(t[[0, 0]]);
        }

        let mut depth = state[StateField::ZS].clone();
        for (variable, grid) in right.iter() {
            let previous = left.get(variable).ok_or_else(|| {
                IntegrationError::Fatal(format!("{} missing on the left edge", variable.name()))
            })?;
            depth = depth + &((grid - previous) * 1e-3);
        }
        depth.mapv_inplace(|z| z.abs());
        state
            .set(StateField::ZS, depth)
            .map_err(|e| IntegrationError::Fatal(e.to_string()))?;
        state.advance_clock(ladder.data_seconds());
        Ok(())
    }

    fn name(&self) -> &str {
        "accumulator"
    }
}

fn fresh_state() -> StateRecord {
    let mut state = StateRecord::flat(SHAPE, 2100.0, 0.005);
    state.fill(StateField::ZS, 0.5).unwrap();
    state
}

fn depths(snapshots: &[StateSnapshot]) -> Vec<Grid> {
    snapshots
        .iter()
        .map(|s| s.require(StateField::ZS).unwrap().clone())
        .collect()
}

#[test]
fn test_pull_and_concurrent_modes_are_bitwise_identical() {
    let config = config(24, 60);
    let producer = FnProducer::new(ForcingVariable::streamed().collect(), synthetic);

    let mut single = IntegratorDriver::new(&config, fresh_state()).unwrap();
    let mut single_sink = MemorySink::new();
    run_single(&mut single, &producer, &mut Accumulator::default(), &mut single_sink).unwrap();

    for max_ahead in [1, 3] {
        let mut threaded = IntegratorDriver::new(&config, fresh_state()).unwrap();
        let mut threaded_sink = MemorySink::new();
        run_threaded(
            &mut threaded,
            &producer,
            max_ahead,
            &mut Accumulator::default(),
            &mut threaded_sink,
        )
        .unwrap();

        assert!(single.state().bitwise_eq(threaded.state()));
        let a = depths(single_sink.snapshots());
        let b = depths(threaded_sink.snapshots());
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!(sd_foundation::grid::bitwise_eq(x, y));
        }
    }
}

#[test]
fn test_missing_forcing_is_zero_and_temperatures_shift_once() {
    let config = config(3, 60);
    // only air temperature is ever delivered
    let producer = FnProducer::new(ForcingVariable::streamed().collect(), |variable, _key: &NaiveDateTime| {
        (variable == ForcingVariable::AirTemp).then(|| sd_foundation::grid::filled(SHAPE, -4.0))
    });

    let mut driver = IntegratorDriver::new(&config, fresh_state()).unwrap();
    let mut integrator = Accumulator::default();
    run_single(&mut driver, &producer, &mut integrator, &mut MemorySink::new()).unwrap();

    assert_eq!(integrator.air_temps, vec![-4.0 + FREEZE; 3]);
    let left = driver.left().unwrap();
    assert!(left.get(ForcingVariable::Precip).unwrap().iter().all(|v| *v == 0.0));
    // precipitation temperature is not delivered: zero in °C, shifted once
    assert!(left
        .get(ForcingVariable::PrecipTemp)
        .unwrap()
        .iter()
        .all(|v| *v == FREEZE));
    assert!(left
        .get(ForcingVariable::SoilTemp)
        .unwrap()
        .iter()
        .all(|v| *v == -2.5 + FREEZE));
    // all deltas were zero
    assert!(driver.state()[StateField::ZS].iter().all(|z| *z == 0.5));
}

#[test]
fn test_sub_hourly_steps_flush_on_the_output_hour() {
    let config = config(10, 15);
    let producer = FnProducer::new(ForcingVariable::streamed().collect(), synthetic);
    let mut driver = IntegratorDriver::new(&config, fresh_state()).unwrap();
    let mut sink = MemorySink::new();
    let summary = run_single(&mut driver, &producer, &mut Accumulator::default(), &mut sink).unwrap();

    assert_eq!(summary.steps, 10);
    let keys: Vec<NaiveDateTime> = sink.snapshots().iter().map(|s| s.key).collect();
    assert_eq!(
        keys,
        vec![
            start() + Duration::hours(1),
            start() + Duration::hours(2),
            start() + Duration::minutes(150),
        ]
    );
    // time since the last output restarts at every flush
    assert_eq!(driver.state()[StateField::TimeSinceOut][[0, 0]], 0.0);
    assert_eq!(driver.state().current_time(), 150.0 * 60.0);
}

#[test]
fn test_depth_update_forces_first_step_and_keeps_shape() {
    let config = config(4, 60);
    let producer = FnProducer::new(ForcingVariable::streamed().collect(), synthetic);
    let update_key = start() + Duration::hours(2);

    let mut observations = DepthObservations::default();
    observations
        .grids
        .insert(update_key, sd_foundation::grid::filled(SHAPE, 1.25));
    let updater = DepthUpdater::new(observations, 150.0, -75.0);

    let mut driver = IntegratorDriver::new(&config, fresh_state())
        .unwrap()
        .with_updater(updater);
    let mut integrator = Accumulator::default();
    let summary = run_single(&mut driver, &producer, &mut integrator, &mut MemorySink::new()).unwrap();

    assert_eq!(summary.updates, 1);
    assert_eq!(integrator.first_steps, vec![1, 1, 3, 4]);
    for field in StateField::ALL {
        assert_eq!(driver.state()[*field].dim(), SHAPE.dim());
    }
}

#[test]
fn test_step_limit_stops_early() {
    let mut config = config(12, 60);
    config.time.run_for_nsteps = Some(5);
    config.forcing.threaded = true;
    let producer = FnProducer::new(ForcingVariable::streamed().collect(), synthetic);
    let mut sink = MemorySink::new();
    let outcome = run_pipeline(
        &config,
        fresh_state(),
        &producer,
        &mut Accumulator::default(),
        &mut sink,
    )
    .unwrap();

    assert_eq!(outcome.summary.steps, 5);
    assert_eq!(sink.snapshots().last().unwrap().key, start() + Duration::hours(5));
    assert!(sink.is_finished());
}
