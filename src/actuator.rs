//! Relay-bank actuation: timed open-loop pulses on four directional outputs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;

/// Logical actuation directions as seen by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Left => write!(f, "left"),
            Direction::Right => write!(f, "right"),
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Relay signal levels. The bank is active-low: a relay closes on `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Seam to the physical relay module.
///
/// Lines are addressed by their BCM offsets. Writes are infallible at this
/// boundary; hardware implementations log and continue on line errors.
pub trait SwitchBank: Send {
    fn set_level(&mut self, line: u32, level: Level);
}

/// BCM line assignments for the four relay outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPins {
    pub left: u32,
    pub right: u32,
    pub up: u32,
    pub down: u32,
}

impl Default for RelayPins {
    fn default() -> Self {
        Self {
            left: 16,
            right: 12,
            up: 20,
            down: 21,
        }
    }
}

/// Operator pause / stay-on flags behind a cloneable handle.
///
/// Writes are single-word atomics so a display or input thread can flip
/// them while the control loop is between discrete steps; the loop polls
/// them at step boundaries only, never mid-pulse.
#[derive(Clone, Default)]
pub struct ControlFlags {
    paused: Arc<AtomicBool>,
    stay_on: Arc<AtomicBool>,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_stay_on(&self, stay_on: bool) {
        self.stay_on.store(stay_on, Ordering::SeqCst);
    }

    pub fn is_stay_on(&self) -> bool {
        self.stay_on.load(Ordering::SeqCst)
    }
}

/// Four directional relay outputs with axis-inversion state.
///
/// All movement is a timed open-loop pulse: drive the line to the on level,
/// block for the pulse duration, drive it back off. There is no position
/// feedback during a pulse and no overlapping pulses.
pub struct ActuatorBank {
    bank: Box<dyn SwitchBank>,
    clock: Arc<dyn Clock>,
    left: u32,
    right: u32,
    up: u32,
    down: u32,
    on: Level,
    off: Level,
    roll_inverted: bool,
    pitch_inverted: bool,
    flags: ControlFlags,
}

impl ActuatorBank {
    pub fn new(bank: Box<dyn SwitchBank>, pins: RelayPins, clock: Arc<dyn Clock>) -> Self {
        Self {
            bank,
            clock,
            left: pins.left,
            right: pins.right,
            up: pins.up,
            down: pins.down,
            on: Level::Low,
            off: Level::High,
            roll_inverted: false,
            pitch_inverted: false,
            flags: ControlFlags::new(),
        }
    }

    fn line(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Left => self.left,
            Direction::Right => self.right,
            Direction::Up => self.up,
            Direction::Down => self.down,
        }
    }

    /// Drive one output for `duration`, then release it.
    ///
    /// Atomic and blocking: the pause flag cannot interrupt an in-flight
    /// pulse, only the gap before the next one.
    pub fn pulse(&mut self, direction: Direction, duration: Duration) {
        let line = self.line(direction);
        log::debug!("pulse {direction} (line {line}) for {duration:?}");
        self.bank.set_level(line, self.on);
        self.clock.sleep(duration);
        self.bank.set_level(line, self.off);
    }

    /// Swap the up/down line mapping and toggle the inversion flag.
    ///
    /// Two calls restore the original mapping and flag.
    pub fn invert_pitch(&mut self) {
        std::mem::swap(&mut self.up, &mut self.down);
        self.pitch_inverted = !self.pitch_inverted;
        log::info!("pitch outputs inverted: {}", self.pitch_inverted);
    }

    /// Swap the left/right line mapping and toggle the inversion flag.
    pub fn invert_roll(&mut self) {
        std::mem::swap(&mut self.left, &mut self.right);
        self.roll_inverted = !self.roll_inverted;
        log::info!("roll outputs inverted: {}", self.roll_inverted);
    }

    pub fn is_pitch_inverted(&self) -> bool {
        self.pitch_inverted
    }

    pub fn is_roll_inverted(&self) -> bool {
        self.roll_inverted
    }

    /// Handle over the shared pause / stay-on flags.
    pub fn flags(&self) -> ControlFlags {
        self.flags.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimClock, SimRig};

    fn test_bank() -> (ActuatorBank, SimRig, Arc<SimClock>) {
        let clock = Arc::new(SimClock::new());
        let rig = SimRig::new(RelayPins::default(), 1.0, clock.clone());
        let bank = ActuatorBank::new(
            Box::new(rig.switch_bank()),
            RelayPins::default(),
            clock.clone(),
        );
        (bank, rig, clock)
    }

    #[test]
    fn pulse_drives_line_for_duration() {
        let (mut bank, rig, _clock) = test_bank();
        bank.pulse(Direction::Up, Duration::from_millis(250));

        let pulses = rig.pulses();
        assert_eq!(pulses.len(), 1);
        assert_eq!(pulses[0].line, RelayPins::default().up);
        assert_eq!(pulses[0].duration, Duration::from_millis(250));
    }

    #[test]
    fn double_invert_restores_roll_mapping() {
        let (mut bank, rig, _clock) = test_bank();
        let pins = RelayPins::default();

        bank.invert_roll();
        assert!(bank.is_roll_inverted());
        bank.pulse(Direction::Right, Duration::from_millis(100));
        assert_eq!(rig.pulses()[0].line, pins.left);

        bank.invert_roll();
        assert!(!bank.is_roll_inverted());
        bank.pulse(Direction::Right, Duration::from_millis(100));
        assert_eq!(rig.pulses()[1].line, pins.right);
    }

    #[test]
    fn double_invert_restores_pitch_mapping() {
        let (mut bank, rig, _clock) = test_bank();
        let pins = RelayPins::default();

        bank.invert_pitch();
        bank.invert_pitch();
        assert!(!bank.is_pitch_inverted());
        bank.pulse(Direction::Down, Duration::from_millis(50));
        assert_eq!(rig.pulses()[0].line, pins.down);
    }

    #[test]
    fn inversion_never_aliases_outputs() {
        let (mut bank, rig, _clock) = test_bank();
        bank.invert_roll();
        bank.pulse(Direction::Left, Duration::from_millis(10));
        bank.pulse(Direction::Right, Duration::from_millis(10));
        let pulses = rig.pulses();
        assert_ne!(pulses[0].line, pulses[1].line);
    }

    #[test]
    fn flags_are_shared_across_handles() {
        let (bank, _rig, _clock) = test_bank();
        let a = bank.flags();
        let b = bank.flags();
        assert!(!a.is_paused());
        b.set_paused(true);
        assert!(a.is_paused());
        a.set_stay_on(true);
        assert!(b.is_stay_on());
    }
}
