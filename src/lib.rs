//! PLUMBLINE - two-axis rig auto-leveling control engine.
//!
//! Drives a rig's actuators through a four-relay bank to bring pitch and
//! roll level against analog tilt-sensor feedback. Convergence runs in two
//! stages per invocation: a coarse phase that walks each axis alone to
//! within the `sens2` band, then a fine phase that nudges both axes to
//! within `sens1`. All movement is tiered open-loop pulses selected by
//! deviation magnitude; there is no position feedback during a pulse.
//!
//! The control loop is strictly sequential: one pulse or one read at a
//! time, each a blocking call. Operator pause is cooperative, observed
//! between discrete steps and never mid-pulse.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub mod actuator;
pub mod calibration;
pub mod callback;
pub mod clock;
pub mod error;
pub mod hardware;
pub mod sensor;
pub mod settings;
pub mod sim;
pub mod state;

use crate::calibration::CalibrationCurve;
use crate::clock::Clock;

// Re-export commonly used types for external use
pub use crate::actuator::{ActuatorBank, ControlFlags, Direction, RelayPins, SwitchBank};
pub use crate::callback::{CallbackId, EngineCallback, EngineEvent};
pub use crate::error::{AcquisitionError, CalibrationError, ConfigurationError, EngineError};
pub use crate::sensor::{AdcTransport, Axis, Sensor, SharedTransport};
pub use crate::settings::{Precision, Preset, Rig, SensorSetup, SettingsStore};
pub use crate::state::{LevelState, TerminationReason, Tier};

/// Poll interval for the stay-on supervisory loop.
pub const STAY_ON_POLL: Duration = Duration::from_millis(60);

/// Wall-clock budget for one leveling invocation.
pub const LEVEL_TIMEOUT: Duration = Duration::from_secs(90);

/// How one leveling invocation ended, with its wall-clock duration.
///
/// Every termination path reports elapsed time so the operator can decide
/// whether to resume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelingOutcome {
    pub reason: TerminationReason,
    pub elapsed: Duration,
}

/// Point-in-time view of the engine for display refresh.
///
/// The display layer holds snapshots only; all mutation goes through
/// [`LevelingEngine`] methods.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: LevelState,
    pub pitch_reading: f64,
    pub roll_reading: f64,
    pub pitch_zero: Option<f64>,
    pub roll_zero: Option<f64>,
    /// `reading - zero` per axis, as displayed.
    pub pitch_delta: f64,
    pub roll_delta: f64,
    pub last_tier: Option<Tier>,
    pub last_outcome: Option<LevelingOutcome>,
}

/// Main leveling engine state machine
pub struct LevelingEngine {
    /// Current state
    state: LevelState,
    pitch: Sensor,
    roll: Sensor,
    actuators: ActuatorBank,
    settings: SettingsStore,
    clock: Arc<dyn Clock>,
    /// Axis leveled first during the coarse phase.
    priority: Axis,
    timeout: Duration,
    last_tier: Option<Tier>,
    last_outcome: Option<LevelingOutcome>,
    /// Registered callbacks
    callbacks: Arc<Mutex<HashMap<CallbackId, EngineCallback>>>,
    /// Next callback ID
    next_callback_id: Arc<Mutex<CallbackId>>,
}

impl LevelingEngine {
    /// Build an engine over a loaded settings store and the two hardware
    /// seams.
    ///
    /// Fits both calibration curves from the stored sensor setup and
    /// applies the active preset's persisted inversion flags to the relay
    /// mapping.
    pub fn new(
        settings: SettingsStore,
        transport: SharedTransport,
        switch_bank: Box<dyn SwitchBank>,
        pins: RelayPins,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let setup = settings.sensor_setup();
        let pitch_curve = CalibrationCurve::fit(&setup.points(Axis::Pitch), setup.order)?;
        let roll_curve = CalibrationCurve::fit(&setup.points(Axis::Roll), setup.order)?;
        let raw_mode = setup.show_raw;

        let pitch = Sensor::new(
            Axis::Pitch,
            pitch_curve,
            raw_mode,
            transport.clone(),
            clock.clone(),
        );
        let roll = Sensor::new(Axis::Roll, roll_curve, raw_mode, transport, clock.clone());
        let actuators = ActuatorBank::new(switch_bank, pins, clock.clone());

        let mut engine = Self {
            state: LevelState::Idle,
            pitch,
            roll,
            actuators,
            settings,
            clock,
            priority: Axis::Pitch,
            timeout: LEVEL_TIMEOUT,
            last_tier: None,
            last_outcome: None,
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            next_callback_id: Arc::new(Mutex::new(0)),
        };
        engine.reconcile_inversion();
        Ok(engine)
    }

    /// Register a callback for engine events
    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.lock().unwrap();
        let mut next_id = self.next_callback_id.lock().unwrap();

        let callback_id = *next_id;
        *next_id += 1;

        callbacks.insert(callback_id, Arc::new(callback));
        callback_id
    }

    /// Deregister a callback
    pub fn deregister_callback(&self, callback_id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap();
        callbacks.remove(&callback_id).is_some()
    }

    /// Get the number of registered callbacks
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    /// Emit an event to all registered callbacks
    fn emit(&self, event: &EngineEvent) {
        let callbacks = self.callbacks.lock().unwrap();
        for callback in callbacks.values() {
            callback(event);
        }
    }

    fn set_state(&mut self, state: LevelState) {
        if self.state != state {
            log::debug!("state: {} -> {state}", self.state);
            self.state = state;
            self.emit(&EngineEvent::StateChanged { state });
        }
    }

    fn sensor_mut(&mut self, axis: Axis) -> &mut Sensor {
        match axis {
            Axis::Pitch => &mut self.pitch,
            Axis::Roll => &mut self.roll,
        }
    }

    pub fn sensor(&self, axis: Axis) -> &Sensor {
        match axis {
            Axis::Pitch => &self.pitch,
            Axis::Roll => &self.roll,
        }
    }

    fn zero_of(&self, axis: Axis) -> f64 {
        self.sensor(axis).zero().unwrap_or(0.0)
    }

    /// Read one axis and report the fresh value to collaborators.
    fn read_axis(&mut self, axis: Axis) -> Result<f64, EngineError> {
        let sensor = self.sensor_mut(axis);
        let value = sensor.read()?;
        let delta = value - sensor.zero().unwrap_or(0.0);
        self.emit(&EngineEvent::Reading { axis, value, delta });
        Ok(value)
    }

    /// Establish zero references for both axes by averaged measurement.
    ///
    /// Returns `(pitch_zero, roll_zero)`. Blocks for the full averaging
    /// window on each axis in turn.
    pub fn save_zeros(&mut self) -> Result<(f64, f64), EngineError> {
        let pitch_zero = self.pitch.save_zero()?;
        self.emit(&EngineEvent::ZeroSet {
            axis: Axis::Pitch,
            zero: pitch_zero,
        });
        let roll_zero = self.roll.save_zero()?;
        self.emit(&EngineEvent::ZeroSet {
            axis: Axis::Roll,
            zero: roll_zero,
        });
        Ok((pitch_zero, roll_zero))
    }

    /// Set both zero references to the absolute origin (0 minutes), for
    /// workflows calibrated to an absolute angle rather than a measured
    /// flat point.
    pub fn save_zeros_at_origin(&mut self) {
        let pitch_zero = self.pitch.save_zero_at_origin();
        self.emit(&EngineEvent::ZeroSet {
            axis: Axis::Pitch,
            zero: pitch_zero,
        });
        let roll_zero = self.roll.save_zero_at_origin();
        self.emit(&EngineEvent::ZeroSet {
            axis: Axis::Roll,
            zero: roll_zero,
        });
    }

    /// One tiered correction: select direction from the deviation's sign,
    /// tier from its magnitude, then pulse and settle.
    ///
    /// One call is one discrete control action with a fixed minimum latency
    /// of pulse + delay; nothing can interrupt it.
    fn adapt(&mut self, axis: Axis, reading: f64) {
        let zero = self.zero_of(axis);
        let difference = reading - zero;
        let direction = match axis {
            Axis::Roll => {
                if difference > 0.0 {
                    Direction::Right
                } else {
                    Direction::Left
                }
            }
            Axis::Pitch => {
                if difference > 0.0 {
                    Direction::Up
                } else {
                    Direction::Down
                }
            }
        };

        let preset = self.settings.active();
        let tier = preset.boundaries.classify(difference.abs());
        let pulse = preset.pulses.get(tier);
        let delay = preset.delays.get(tier);

        log::debug!("adapt {axis}: difference {difference:+.2} -> {tier} pulse {direction}");
        self.actuators.pulse(direction, pulse);
        self.clock.sleep(delay);

        self.last_tier = Some(tier);
        self.emit(&EngineEvent::Pulse {
            axis,
            direction,
            tier,
        });
    }

    /// Run one leveling invocation to a terminal state.
    ///
    /// Requires both zero references; fails with
    /// [`EngineError::ZeroNotTaken`] otherwise. Pause and timeout are
    /// normal outcomes, not errors; an acquisition failure aborts the
    /// invocation with the state left as last known.
    pub fn level_once(&mut self) -> Result<LevelingOutcome, EngineError> {
        if self.pitch.zero().is_none() || self.roll.zero().is_none() {
            log::warn!("leveling requested with zero not taken");
            return Err(EngineError::ZeroNotTaken);
        }

        let flags = self.actuators.flags();
        let start = self.clock.now();

        if flags.is_paused() {
            log::info!("leveling requested while paused");
            return Ok(self.finish(TerminationReason::Paused, start));
        }

        log::info!(
            "leveling started ({} / {}, {} first)",
            self.settings.rig(),
            self.settings.precision(),
            self.priority
        );

        let sens1 = self.settings.active().sens1;
        let sens2 = self.settings.active().sens2;
        let zero_pitch = self.zero_of(Axis::Pitch);
        let zero_roll = self.zero_of(Axis::Roll);
        let order = [self.priority, self.priority.other()];

        let mut p = self.read_axis(Axis::Pitch)?;
        let mut r = self.read_axis(Axis::Roll)?;

        loop {
            // Terminal checks between discrete steps only.
            if (p - zero_pitch).abs() < sens1 && (r - zero_roll).abs() < sens1 {
                return Ok(self.finish(TerminationReason::Done, start));
            }
            if flags.is_paused() {
                return Ok(self.finish(TerminationReason::Paused, start));
            }
            if self.clock.now().saturating_sub(start) > self.timeout {
                return Ok(self.finish(TerminationReason::TimedOut, start));
            }

            // Coarse phase: walk each axis alone to within sens2, priority
            // axis first.
            for axis in order {
                let zero = self.zero_of(axis);
                let mut value = self.read_axis(axis)?;
                if (value - zero).abs() < sens2 {
                    continue;
                }
                self.set_state(LevelState::CoarseConverging { axis });
                while (value - zero).abs() >= sens2 {
                    if flags.is_paused() {
                        return Ok(self.finish(TerminationReason::Paused, start));
                    }
                    if self.clock.now().saturating_sub(start) > self.timeout {
                        return Ok(self.finish(TerminationReason::TimedOut, start));
                    }
                    self.adapt(axis, value);
                    value = self.read_axis(axis)?;
                }
            }

            if flags.is_paused() {
                return Ok(self.finish(TerminationReason::Paused, start));
            }

            // Fine phase: at most one correction per axis per round.
            self.set_state(LevelState::FineConverging);
            p = self.read_axis(Axis::Pitch)?;
            r = self.read_axis(Axis::Roll)?;
            for axis in order {
                let (value, zero) = match axis {
                    Axis::Pitch => (p, zero_pitch),
                    Axis::Roll => (r, zero_roll),
                };
                if (value - zero).abs() >= sens1 {
                    self.adapt(axis, value);
                }
            }
        }
    }

    fn finish(&mut self, reason: TerminationReason, start: Duration) -> LevelingOutcome {
        let elapsed = self.clock.now().saturating_sub(start);
        let state = match reason {
            TerminationReason::Done => LevelState::Done,
            TerminationReason::Paused => LevelState::Paused,
            TerminationReason::TimedOut => LevelState::TimedOut,
        };
        self.set_state(state);

        let outcome = LevelingOutcome { reason, elapsed };
        self.last_outcome = Some(outcome);
        log::info!(
            "leveling finished: {reason} (elapsed {:.2}s)",
            elapsed.as_secs_f64()
        );
        self.emit(&EngineEvent::Finished { reason, elapsed });
        outcome
    }

    /// Level-maintaining supervisory loop.
    ///
    /// While the stay-on flag is set, polls both axes and re-invokes the
    /// full leveling algorithm whenever either deviation exceeds the active
    /// preset's threshold. Disengages itself and returns as soon as the
    /// pause flag is observed.
    pub fn stay_on_loop(&mut self) -> Result<(), EngineError> {
        let flags = self.actuators.flags();
        log::info!(
            "stay-on engaged (threshold {} min)",
            self.settings.active().threshold
        );

        while flags.is_stay_on() {
            if flags.is_paused() {
                log::info!("stay-on disengaged by pause");
                flags.set_stay_on(false);
                break;
            }

            self.read_axis(Axis::Pitch)?;
            self.read_axis(Axis::Roll)?;
            self.clock.sleep(STAY_ON_POLL);

            let threshold = self.settings.active().threshold;
            if self.pitch.difference().abs() > threshold
                || self.roll.difference().abs() > threshold
            {
                self.level_once()?;
            }
        }
        Ok(())
    }

    /// Jog one direction manually with the active preset's XS pulse.
    pub fn jog(&mut self, direction: Direction) {
        let pulse = self.settings.active().pulses.get(Tier::Xs);
        self.actuators.pulse(direction, pulse);
    }

    pub fn set_priority(&mut self, axis: Axis) {
        self.priority = axis;
    }

    pub fn priority(&self) -> Axis {
        self.priority
    }

    /// Override the invocation wall-clock budget (default 90 s).
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn invert_pitch(&mut self) {
        self.actuators.invert_pitch();
    }

    pub fn invert_roll(&mut self) {
        self.actuators.invert_roll();
    }

    /// Handle over the shared pause / stay-on flags.
    pub fn flags(&self) -> ControlFlags {
        self.actuators.flags()
    }

    /// Select and persist a new preset, applying its stored inversion
    /// flags to the relay mapping.
    pub fn select_preset(&mut self, rig: Rig, precision: Precision) -> Result<(), EngineError> {
        self.settings.select(rig, precision)?;
        self.reconcile_inversion();
        Ok(())
    }

    /// Persist an edited preset row. Inversion flags in the edit are
    /// applied to the relay mapping once the row is stored.
    pub fn update_preset(&mut self, preset: Preset) -> Result<(), EngineError> {
        self.settings.update_preset(preset)?;
        self.reconcile_inversion();
        Ok(())
    }

    /// Replace one axis's calibration table and the shared fit order.
    ///
    /// Both curves are refitted and validated before anything is stored or
    /// replaced; a rejected fit leaves the old calibration active.
    pub fn update_calibration(
        &mut self,
        axis: Axis,
        points: &[(f64, f64)],
        order: usize,
    ) -> Result<(), EngineError> {
        let edited_curve = CalibrationCurve::fit(points, order)?;
        let other = axis.other();
        let other_points = self.settings.sensor_setup().points(other);
        let other_curve = CalibrationCurve::fit(&other_points, order)?;

        let mut setup = self.settings.sensor_setup().clone();
        let (raw, minutes): (Vec<f64>, Vec<f64>) = points.iter().copied().unzip();
        match axis {
            Axis::Pitch => {
                setup.pitch_raw = raw;
                setup.pitch_minutes = minutes;
            }
            Axis::Roll => {
                setup.roll_raw = raw;
                setup.roll_minutes = minutes;
            }
        }
        setup.order = order;
        self.settings.update_sensor_setup(setup)?;

        self.sensor_mut(axis).set_curve(edited_curve);
        self.sensor_mut(other).set_curve(other_curve);
        log::info!("calibration updated for {axis} (order {order})");
        Ok(())
    }

    /// Persist the raw-display flag and apply it to both sensors.
    ///
    /// Leveling is not meaningful while raw counts are displayed; the
    /// operator is expected to switch back before leveling.
    pub fn set_raw_display(&mut self, show_raw: bool) -> Result<(), EngineError> {
        let mut setup = self.settings.sensor_setup().clone();
        setup.show_raw = show_raw;
        self.settings.update_sensor_setup(setup)?;
        self.pitch.set_raw_mode(show_raw);
        self.roll.set_raw_mode(show_raw);
        Ok(())
    }

    /// Match the relay inversion state to the active preset's stored flags.
    fn reconcile_inversion(&mut self) {
        let preset = self.settings.active();
        let (roll_invert, pitch_invert) = (preset.roll_invert, preset.pitch_invert);
        if roll_invert != self.actuators.is_roll_inverted() {
            self.actuators.invert_roll();
        }
        if pitch_invert != self.actuators.is_pitch_inverted() {
            self.actuators.invert_pitch();
        }
    }

    /// Get the current state
    pub fn state(&self) -> &LevelState {
        &self.state
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn actuators(&self) -> &ActuatorBank {
        &self.actuators
    }

    /// Snapshot for display refresh.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            pitch_reading: self.pitch.reading(),
            roll_reading: self.roll.reading(),
            pitch_zero: self.pitch.zero(),
            roll_zero: self.roll.zero(),
            pitch_delta: self.pitch.reading() - self.zero_of(Axis::Pitch),
            roll_delta: self.roll.reading() - self.zero_of(Axis::Roll),
            last_tier: self.last_tier,
            last_outcome: self.last_outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsDoc;
    use crate::sim::{SimClock, SimRig};
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_settings() -> SettingsStore {
        let path: PathBuf = std::env::temp_dir().join(format!(
            "plumbline_engine_test_{}.json",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let mut doc = SettingsDoc::seed();
        doc.sensor_setup.pitch_raw = SimRig::calibration_points().iter().map(|p| p.0).collect();
        doc.sensor_setup.pitch_minutes = SimRig::calibration_points().iter().map(|p| p.1).collect();
        doc.sensor_setup.roll_raw = doc.sensor_setup.pitch_raw.clone();
        doc.sensor_setup.roll_minutes = doc.sensor_setup.pitch_minutes.clone();
        doc.sensor_setup.order = 1;
        std::fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
        SettingsStore::load(path).unwrap()
    }

    fn sim_engine() -> (LevelingEngine, SimRig, Arc<SimClock>) {
        let clock = Arc::new(SimClock::new());
        let rig = SimRig::new(RelayPins::default(), 2.0, clock.clone());
        let transport: SharedTransport = Arc::new(Mutex::new(rig.adc()));
        let engine = LevelingEngine::new(
            temp_settings(),
            transport,
            Box::new(rig.switch_bank()),
            RelayPins::default(),
            clock.clone(),
        )
        .unwrap();
        (engine, rig, clock)
    }

    #[test]
    fn leveling_requires_zero_reference() {
        let (mut engine, _rig, _clock) = sim_engine();
        let err = engine.level_once().unwrap_err();
        assert!(matches!(err, EngineError::ZeroNotTaken));
        assert_eq!(*engine.state(), LevelState::Idle);
    }

    #[test]
    fn paused_at_entry_is_a_normal_termination() {
        let (mut engine, rig, _clock) = sim_engine();
        engine.save_zeros_at_origin();
        engine.flags().set_paused(true);

        let outcome = engine.level_once().unwrap();
        assert_eq!(outcome.reason, TerminationReason::Paused);
        assert!(rig.pulses().is_empty());
    }

    #[test]
    fn callback_registration_and_deregistration() {
        let (engine, _rig, _clock) = sim_engine();
        assert_eq!(engine.callback_count(), 0);

        let id = engine.register_callback(|_event| {});
        assert_eq!(engine.callback_count(), 1);

        assert!(engine.deregister_callback(id));
        assert!(!engine.deregister_callback(id));
        assert_eq!(engine.callback_count(), 0);
    }

    #[test]
    fn rejected_calibration_edit_keeps_old_curve() {
        let (mut engine, _rig, _clock) = sim_engine();
        let before = engine.sensor(Axis::Pitch).curve().coefficients().to_vec();

        // Order must be strictly below the point count.
        let err = engine
            .update_calibration(Axis::Pitch, &[(0.0, 0.0), (1.0, 1.0)], 2)
            .unwrap_err();
        assert!(matches!(err, EngineError::Calibration(_)));
        assert_eq!(
            engine.sensor(Axis::Pitch).curve().coefficients(),
            before.as_slice()
        );
    }

    #[test]
    fn calibration_edit_persists_and_replaces_curve() {
        let (mut engine, _rig, _clock) = sim_engine();
        let points = [(10_000.0, -50.0), (30_000.0, 0.0), (50_000.0, 50.0)];

        engine.update_calibration(Axis::Roll, &points, 1).unwrap();

        assert_eq!(engine.settings().sensor_setup().roll_raw[0], 10_000.0);
        assert_eq!(engine.settings().sensor_setup().order, 1);
        let curve = engine.sensor(Axis::Roll).curve();
        assert!((curve.evaluate(30_000.0)).abs() < 1e-9);
        assert!((curve.evaluate(50_000.0) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn runtime_invert_toggles_without_persisting() {
        let (mut engine, _rig, _clock) = sim_engine();

        engine.invert_roll();
        assert!(engine.actuators().is_roll_inverted());
        assert!(!engine.settings().active().roll_invert);

        engine.invert_roll();
        assert!(!engine.actuators().is_roll_inverted());

        engine.invert_pitch();
        engine.invert_pitch();
        assert!(!engine.actuators().is_pitch_inverted());
    }

    #[test]
    fn preset_edit_applies_stored_inversion() {
        let (mut engine, _rig, _clock) = sim_engine();
        assert!(!engine.actuators().is_roll_inverted());

        let mut edited = engine.settings().active().clone();
        edited.roll_invert = true;
        engine.update_preset(edited).unwrap();

        assert!(engine.actuators().is_roll_inverted());
    }

    #[test]
    fn status_snapshot_reflects_zeros() {
        let (mut engine, rig, _clock) = sim_engine();
        rig.set_tilt(Axis::Pitch, 3.0);
        rig.set_tilt(Axis::Roll, -1.0);
        engine.save_zeros().unwrap();

        let status = engine.status();
        assert!((status.pitch_zero.unwrap() - 3.0).abs() < 0.05);
        assert!((status.roll_zero.unwrap() + 1.0).abs() < 0.05);
        assert_eq!(status.state, LevelState::Idle);
    }
}
