//! Tilt sensor acquisition and zero-reference management.
//!
//! Both axes share one signal conditioner behind the [`AdcTransport`] seam;
//! each [`Sensor`] owns its channel token, calibration curve, zero reference,
//! and last reading.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::calibration::CalibrationCurve;
use crate::clock::Clock;
use crate::error::AcquisitionError;

/// Number of consecutive reads averaged into a zero reference.
pub const AVG_SAMPLES: usize = 5;

/// Delay between zero-averaging reads.
pub const AVG_DELAY: Duration = Duration::from_millis(100);

/// Settle delay between triggering an acquisition and decoding the reply.
pub const READ_DELAY: Duration = Duration::from_millis(100);

/// Legal decoded count range for the signal conditioner.
pub const MIN_ADC_COUNT: i64 = 0;
pub const MAX_ADC_COUNT: i64 = 65535;

/// One of the two leveled axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Pitch,
    Roll,
}

impl Axis {
    /// The conditioner channel this axis is wired to.
    pub fn channel(self) -> AdcChannel {
        match self {
            Axis::Pitch => AdcChannel::Y,
            Axis::Roll => AdcChannel::X,
        }
    }

    pub fn other(self) -> Axis {
        match self {
            Axis::Pitch => Axis::Roll,
            Axis::Roll => Axis::Pitch,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Pitch => write!(f, "pitch"),
            Axis::Roll => write!(f, "roll"),
        }
    }
}

/// Acquisition channel token on the signal conditioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcChannel {
    X,
    Y,
}

impl AdcChannel {
    /// Single-byte trigger command understood by the conditioner.
    pub fn command_byte(self) -> u8 {
        match self {
            AdcChannel::X => b'x',
            AdcChannel::Y => b'y',
        }
    }
}

/// Transport seam to the tilt-sensor signal conditioner.
///
/// One call triggers one acquisition and returns the decoded count; framing
/// and settle timing live behind this trait. Implementations:
/// [`SerialAdc`](crate::hardware::SerialAdc) for the RS-232 conditioner and
/// [`SimAdc`](crate::sim::SimAdc) for tests.
pub trait AdcTransport: Send {
    fn acquire(&mut self, channel: AdcChannel) -> Result<i64, AcquisitionError>;
}

/// Both axes share one conditioner; reads are serialized through this handle.
pub type SharedTransport = Arc<Mutex<dyn AdcTransport>>;

/// One tilt sensor: channel, calibration, zero reference, last reading.
pub struct Sensor {
    axis: Axis,
    channel: AdcChannel,
    curve: CalibrationCurve,
    raw_mode: bool,
    zero: Option<f64>,
    reading: f64,
    transport: SharedTransport,
    clock: Arc<dyn Clock>,
}

impl Sensor {
    pub fn new(
        axis: Axis,
        curve: CalibrationCurve,
        raw_mode: bool,
        transport: SharedTransport,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            axis,
            channel: axis.channel(),
            curve,
            raw_mode,
            zero: None,
            reading: 0.0,
            transport,
            clock,
        }
    }

    /// Trigger one acquisition, validate the count, convert to minutes.
    ///
    /// In raw-display mode the count is returned unconverted. On any failure
    /// the previous reading is left unchanged and the error is surfaced to
    /// the caller; a bad read never terminates the process.
    pub fn read(&mut self) -> Result<f64, AcquisitionError> {
        let count = self.transport.lock().unwrap().acquire(self.channel)?;
        if !(MIN_ADC_COUNT..=MAX_ADC_COUNT).contains(&count) {
            return Err(AcquisitionError::OutOfRange { value: count });
        }

        let value = if self.raw_mode {
            count as f64
        } else {
            self.curve.evaluate(count as f64)
        };
        self.reading = value;
        Ok(value)
    }

    /// Average [`AVG_SAMPLES`] reads into a new zero reference.
    ///
    /// Blocks for roughly `AVG_SAMPLES * AVG_DELAY`. A failed read aborts
    /// the averaging and leaves the previous zero in place.
    pub fn save_zero(&mut self) -> Result<f64, AcquisitionError> {
        let mut sum = 0.0;
        for _ in 0..AVG_SAMPLES {
            sum += self.read()?;
            self.clock.sleep(AVG_DELAY);
        }
        let zero = sum / AVG_SAMPLES as f64;
        log::info!("{} zero set to {zero:.3}", self.axis);
        self.zero = Some(zero);
        Ok(zero)
    }

    /// Set the zero reference to the absolute origin (0 minutes).
    pub fn save_zero_at_origin(&mut self) -> f64 {
        log::info!("{} zero set to origin", self.axis);
        self.zero = Some(0.0);
        0.0
    }

    /// Signed deviation `zero - reading`; 0-referenced when no zero is set.
    pub fn difference(&self) -> f64 {
        self.zero.unwrap_or(0.0) - self.reading
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Zero reference, if one has been established this session.
    pub fn zero(&self) -> Option<f64> {
        self.zero
    }

    pub fn reading(&self) -> f64 {
        self.reading
    }

    pub fn curve(&self) -> &CalibrationCurve {
        &self.curve
    }

    /// Replace the calibration curve (after a validated edit).
    pub fn set_curve(&mut self, curve: CalibrationCurve) {
        self.curve = curve;
    }

    pub fn raw_mode(&self) -> bool {
        self.raw_mode
    }

    /// Switch between calibrated minutes and raw counts for future reads.
    pub fn set_raw_mode(&mut self, raw_mode: bool) {
        self.raw_mode = raw_mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ScriptedAdc, SimClock};

    fn identity_curve() -> CalibrationCurve {
        CalibrationCurve::fit(&[(0.0, 0.0), (1000.0, 1000.0)], 1).unwrap()
    }

    fn scripted_sensor(counts: Vec<i64>) -> Sensor {
        let transport: SharedTransport = Arc::new(Mutex::new(ScriptedAdc::new(counts)));
        Sensor::new(
            Axis::Pitch,
            identity_curve(),
            false,
            transport,
            Arc::new(SimClock::new()),
        )
    }

    #[test]
    fn save_zero_averages_five_reads() {
        let mut sensor = scripted_sensor(vec![10, 20, 30, 40, 50]);
        let zero = sensor.save_zero().unwrap();
        assert!((zero - 30.0).abs() < 1e-9);
        assert!((sensor.zero().unwrap() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn zero_only_changes_via_explicit_operation() {
        let mut sensor = scripted_sensor(vec![100, 200, 300]);
        assert_eq!(sensor.zero(), None);
        sensor.read().unwrap();
        sensor.read().unwrap();
        assert_eq!(sensor.zero(), None);
        sensor.save_zero_at_origin();
        sensor.read().unwrap();
        assert_eq!(sensor.zero(), Some(0.0));
    }

    #[test]
    fn out_of_range_count_leaves_reading_unchanged() {
        let mut sensor = scripted_sensor(vec![500, 70000]);
        sensor.read().unwrap();
        assert!((sensor.reading() - 500.0).abs() < 1e-9);

        let err = sensor.read().unwrap_err();
        assert!(matches!(err, AcquisitionError::OutOfRange { value: 70000 }));
        assert!((sensor.reading() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn raw_mode_bypasses_calibration() {
        // A curve that would halve every count.
        let curve = CalibrationCurve::fit(&[(0.0, 0.0), (1000.0, 500.0)], 1).unwrap();
        let transport: SharedTransport = Arc::new(Mutex::new(ScriptedAdc::new(vec![800, 800])));

        let mut raw = Sensor::new(
            Axis::Roll,
            curve.clone(),
            true,
            transport.clone(),
            Arc::new(SimClock::new()),
        );
        assert!((raw.read().unwrap() - 800.0).abs() < 1e-9);

        let mut converted = Sensor::new(Axis::Roll, curve, false, transport, Arc::new(SimClock::new()));
        assert!((converted.read().unwrap() - 400.0).abs() < 1e-9);
    }

    #[test]
    fn difference_is_zero_minus_reading() {
        let mut sensor = scripted_sensor(vec![10, 10, 10, 10, 10, 25]);
        sensor.save_zero().unwrap();
        sensor.read().unwrap();
        assert!((sensor.difference() - (10.0 - 25.0)).abs() < 1e-9);
    }
}
