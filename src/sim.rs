//! Simulated rig, transport, and clock for tests and the `--simulate` CLI.
//!
//! [`SimRig`] closes the loop the way the physical rig does: relay pulses
//! integrate into per-axis tilt, and reads report that tilt back through a
//! linear sensor model. [`SimClock`] advances simulated time on every
//! `sleep`, so a full leveling run completes instantly in tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::actuator::{Level, RelayPins, SwitchBank};
use crate::clock::Clock;
use crate::error::AcquisitionError;
use crate::sensor::{AdcChannel, AdcTransport, Axis};

/// Count reported for a perfectly level axis.
pub const COUNT_OFFSET: f64 = 30_000.0;

/// Counts per minute of arc in the simulated sensor model.
pub const COUNTS_PER_MINUTE: f64 = 100.0;

/// Manually advanced time source; `sleep` advances simulated time instantly.
#[derive(Default)]
pub struct SimClock {
    now: Mutex<Duration>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Scripted transport: pops one count per acquisition.
///
/// Errors with a transport failure once the script is exhausted.
pub struct ScriptedAdc {
    counts: VecDeque<i64>,
}

impl ScriptedAdc {
    pub fn new(counts: Vec<i64>) -> Self {
        Self {
            counts: counts.into(),
        }
    }
}

impl AdcTransport for ScriptedAdc {
    fn acquire(&mut self, _channel: AdcChannel) -> Result<i64, AcquisitionError> {
        self.counts.pop_front().ok_or_else(|| {
            AcquisitionError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "scripted reads exhausted",
            ))
        })
    }
}

/// One completed relay pulse, as observed by the simulated rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseRecord {
    pub line: u32,
    pub duration: Duration,
    /// Simulated time at which the line was released.
    pub at: Duration,
}

struct RigState {
    pitch: f64,
    roll: f64,
    rate: f64,
    pins: RelayPins,
    on_since: Option<(u32, Duration)>,
    pulses: Vec<PulseRecord>,
    fail_reads: usize,
}

impl RigState {
    // Wired the way the engine expects with no inversion: the up/right
    // outputs lower their axis reading, down/left raise it.
    fn apply_pulse(&mut self, line: u32, duration: Duration, at: Duration) {
        let travel = self.rate * duration.as_secs_f64();
        if line == self.pins.right {
            self.roll -= travel;
        } else if line == self.pins.left {
            self.roll += travel;
        } else if line == self.pins.up {
            self.pitch -= travel;
        } else if line == self.pins.down {
            self.pitch += travel;
        }
        self.pulses.push(PulseRecord { line, duration, at });
    }
}

/// Closed-loop simulated rig shared between a [`SimSwitchBank`] and a
/// [`SimAdc`].
#[derive(Clone)]
pub struct SimRig {
    state: Arc<Mutex<RigState>>,
    clock: Arc<dyn Clock>,
}

impl SimRig {
    /// `rate` is minutes of arc moved per second of pulse on any output.
    pub fn new(pins: RelayPins, rate: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RigState {
                pitch: 0.0,
                roll: 0.0,
                rate,
                pins,
                on_since: None,
                pulses: Vec::new(),
                fail_reads: 0,
            })),
            clock,
        }
    }

    pub fn switch_bank(&self) -> SimSwitchBank {
        SimSwitchBank {
            state: self.state.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn adc(&self) -> SimAdc {
        SimAdc {
            state: self.state.clone(),
        }
    }

    pub fn set_tilt(&self, axis: Axis, minutes: f64) {
        let mut state = self.state.lock().unwrap();
        match axis {
            Axis::Pitch => state.pitch = minutes,
            Axis::Roll => state.roll = minutes,
        }
    }

    pub fn tilt(&self, axis: Axis) -> f64 {
        let state = self.state.lock().unwrap();
        match axis {
            Axis::Pitch => state.pitch,
            Axis::Roll => state.roll,
        }
    }

    /// Make the next `n` acquisitions fail with a transport error.
    pub fn fail_next_reads(&self, n: usize) {
        self.state.lock().unwrap().fail_reads = n;
    }

    /// Completed pulses in the order the rig saw them.
    pub fn pulses(&self) -> Vec<PulseRecord> {
        self.state.lock().unwrap().pulses.clone()
    }

    /// Calibration points matching the simulated sensor model, for an
    /// order-1 fit that converts counts back to minutes exactly.
    pub fn calibration_points() -> Vec<(f64, f64)> {
        vec![
            (COUNT_OFFSET - 100.0 * COUNTS_PER_MINUTE, -100.0),
            (COUNT_OFFSET + 100.0 * COUNTS_PER_MINUTE, 100.0),
        ]
    }
}

/// Relay seam of the simulated rig: integrates on-time into axis travel.
pub struct SimSwitchBank {
    state: Arc<Mutex<RigState>>,
    clock: Arc<dyn Clock>,
}

impl SwitchBank for SimSwitchBank {
    fn set_level(&mut self, line: u32, level: Level) {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        match level {
            Level::Low => state.on_since = Some((line, now)),
            Level::High => {
                if let Some((on_line, since)) = state.on_since.take() {
                    if on_line == line {
                        state.apply_pulse(line, now - since, now);
                    } else {
                        state.on_since = Some((on_line, since));
                    }
                }
            }
        }
    }
}

/// Transport seam of the simulated rig: reports tilt as conditioner counts.
pub struct SimAdc {
    state: Arc<Mutex<RigState>>,
}

impl AdcTransport for SimAdc {
    fn acquire(&mut self, channel: AdcChannel) -> Result<i64, AcquisitionError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(AcquisitionError::Transport(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated transport dropout",
            )));
        }
        let minutes = match channel {
            AdcChannel::X => state.roll,
            AdcChannel::Y => state.pitch,
        };
        Ok((COUNT_OFFSET + minutes * COUNTS_PER_MINUTE).round() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulses_integrate_into_tilt() {
        let clock = Arc::new(SimClock::new());
        let rig = SimRig::new(RelayPins::default(), 2.0, clock.clone());
        let mut bank = rig.switch_bank();
        let pins = RelayPins::default();

        bank.set_level(pins.up, Level::Low);
        clock.advance(Duration::from_millis(500));
        bank.set_level(pins.up, Level::High);

        assert!((rig.tilt(Axis::Pitch) + 1.0).abs() < 1e-9);
        assert_eq!(rig.pulses().len(), 1);
    }

    #[test]
    fn adc_reports_tilt_in_counts() {
        let clock = Arc::new(SimClock::new());
        let rig = SimRig::new(RelayPins::default(), 1.0, clock);
        rig.set_tilt(Axis::Roll, -2.5);

        let mut adc = rig.adc();
        let count = adc.acquire(AdcChannel::X).unwrap();
        assert_eq!(count, (COUNT_OFFSET - 2.5 * COUNTS_PER_MINUTE) as i64);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let clock = Arc::new(SimClock::new());
        let rig = SimRig::new(RelayPins::default(), 1.0, clock);
        rig.fail_next_reads(1);

        let mut adc = rig.adc();
        assert!(adc.acquire(AdcChannel::Y).is_err());
        assert!(adc.acquire(AdcChannel::Y).is_ok());
    }
}
