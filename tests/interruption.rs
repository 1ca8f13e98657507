//! Pause, timeout, and acquisition-failure terminations.

mod common;

use common::{record_events, sim_engine};
use plumbline::{
    Axis, EngineError, EngineEvent, LevelState, TerminationReason, LEVEL_TIMEOUT,
};

#[test]
fn pause_during_coarse_halts_within_one_adapt() {
    // Stuck actuators: without the pause the coarse loop would never exit.
    let mut t = sim_engine(0.0);
    t.engine.save_zeros_at_origin();
    t.rig.set_tilt(Axis::Pitch, 8.0);

    // Request pause from "another thread" as soon as the first pulse lands.
    let pause = t.engine.flags();
    t.engine.register_callback(move |event| {
        if matches!(event, EngineEvent::Pulse { .. }) {
            pause.set_paused(true);
        }
    });

    let outcome = t.engine.level_once().unwrap();

    assert_eq!(outcome.reason, TerminationReason::Paused);
    assert_eq!(*t.engine.state(), LevelState::Paused);
    // The in-flight adapt completes, nothing further fires.
    assert_eq!(t.rig.pulses().len(), 1);
    // Zero references survive the pause for later resumption.
    assert_eq!(t.engine.sensor(Axis::Pitch).zero(), Some(0.0));
    assert_eq!(t.engine.sensor(Axis::Roll).zero(), Some(0.0));
}

#[test]
fn resume_after_pause_converges() {
    let mut t = sim_engine(2.0);
    t.engine.save_zeros_at_origin();
    t.rig.set_tilt(Axis::Roll, 6.0);

    let flags = t.engine.flags();
    flags.set_paused(true);
    let outcome = t.engine.level_once().unwrap();
    assert_eq!(outcome.reason, TerminationReason::Paused);
    assert!(t.rig.pulses().is_empty());

    flags.set_paused(false);
    let outcome = t.engine.level_once().unwrap();
    assert_eq!(outcome.reason, TerminationReason::Done);
    assert!(t.rig.tilt(Axis::Roll).abs() < 0.5);
}

#[test]
fn timeout_terminates_a_stuck_invocation() {
    // Stuck actuators and a large offset: every adapt burns simulated
    // pulse + settle time without moving the rig.
    let mut t = sim_engine(0.0);
    t.engine.save_zeros_at_origin();
    t.rig.set_tilt(Axis::Pitch, 15.0);

    let outcome = t.engine.level_once().unwrap();

    assert_eq!(outcome.reason, TerminationReason::TimedOut);
    assert_eq!(*t.engine.state(), LevelState::TimedOut);
    assert!(outcome.elapsed > LEVEL_TIMEOUT);
    // XL pulse + settle is 3 s of simulated time, so the budget admits
    // roughly thirty pulses, not an unbounded loop.
    let fired = t.rig.pulses().len();
    assert!(fired >= 30 && fired <= 32, "fired {fired} pulses");
    // Zero references survive the timeout.
    assert_eq!(t.engine.sensor(Axis::Pitch).zero(), Some(0.0));
}

#[test]
fn acquisition_failure_aborts_and_is_retryable() {
    let mut t = sim_engine(2.0);
    t.engine.save_zeros_at_origin();
    t.rig.set_tilt(Axis::Pitch, 7.4);

    t.rig.fail_next_reads(1);
    let err = t.engine.level_once().unwrap_err();
    assert!(matches!(err, EngineError::Acquisition(_)));
    assert!(t.rig.pulses().is_empty());
    assert_eq!(t.engine.sensor(Axis::Pitch).zero(), Some(0.0));

    // The transport recovered; the next invocation runs to completion.
    let outcome = t.engine.level_once().unwrap();
    assert_eq!(outcome.reason, TerminationReason::Done);
    assert!(t.rig.tilt(Axis::Pitch).abs() < 0.5);
}

#[test]
fn failed_zeroing_preserves_previous_zero() {
    let mut t = sim_engine(2.0);
    t.rig.set_tilt(Axis::Pitch, 3.0);
    t.rig.set_tilt(Axis::Roll, 3.0);
    t.engine.save_zeros().unwrap();
    assert!((t.engine.sensor(Axis::Pitch).zero().unwrap() - 3.0).abs() < 1e-9);

    t.rig.fail_next_reads(2);
    let err = t.engine.save_zeros().unwrap_err();
    assert!(matches!(err, EngineError::Acquisition(_)));
    assert!((t.engine.sensor(Axis::Pitch).zero().unwrap() - 3.0).abs() < 1e-9);
    assert!((t.engine.sensor(Axis::Roll).zero().unwrap() - 3.0).abs() < 1e-9);
}

#[test]
fn termination_reports_elapsed_time() {
    let mut t = sim_engine(2.0);
    t.engine.save_zeros_at_origin();
    t.rig.set_tilt(Axis::Roll, 5.4);

    let events = record_events(&t.engine);
    t.engine.level_once().unwrap();

    let finished = events
        .lock()
        .unwrap()
        .iter()
        .find_map(|e| match e {
            EngineEvent::Finished { reason, elapsed } => Some((*reason, *elapsed)),
            _ => None,
        })
        .expect("no Finished event");
    assert_eq!(finished.0, TerminationReason::Done);
    assert!(finished.1.as_secs_f64() > 0.0);
}
