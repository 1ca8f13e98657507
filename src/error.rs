use thiserror::Error;

use crate::sensor::{MAX_ADC_COUNT, MIN_ADC_COUNT};
use crate::settings::{Precision, Rig};

/// Errors raised while acquiring a tilt reading.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// The transport to the signal conditioner failed.
    #[error("no signal from sensor: {0}")]
    Transport(#[from] std::io::Error),

    /// The conditioner replied with something that is not a count.
    #[error("unparseable sensor reply: {0:?}")]
    Malformed(String),

    /// Decoded count fell outside the legal ADC range.
    #[error("raw count {value} outside {MIN_ADC_COUNT}..={MAX_ADC_COUNT}")]
    OutOfRange {
        /// Decoded count as reported by the conditioner.
        value: i64,
    },
}

/// Errors raised while fitting a calibration curve.
#[derive(Error, Debug)]
pub enum CalibrationError {
    /// A polynomial fit needs at least two points.
    #[error("need at least 2 calibration points, got {count}")]
    TooFewPoints { count: usize },

    /// Fit order must be strictly less than the number of points.
    #[error("fit order {order} too high for {points} calibration points")]
    OrderTooHigh { order: usize, points: usize },

    /// The point set produced a singular system (e.g. duplicated raw values).
    #[error("calibration points produce a degenerate fit")]
    DegenerateFit,
}

/// Errors raised while loading, selecting, or editing stored settings.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("failed to read or write settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),

    /// No preset row exists for the requested rig/precision pair.
    #[error("no preset for {rig} / {precision}")]
    PresetNotFound { rig: Rig, precision: Precision },

    /// Two preset rows share the same rig/precision key.
    #[error("duplicate preset for {rig} / {precision}")]
    DuplicatePreset { rig: Rig, precision: Precision },

    /// A preset row violates a field invariant.
    #[error("invalid preset {rig} / {precision}: {problem}")]
    InvalidPreset {
        rig: Rig,
        precision: Precision,
        problem: String,
    },

    /// The shared sensor setup record is inconsistent.
    #[error("invalid sensor setup: {0}")]
    InvalidSensorSetup(String),

    #[error("unknown rig {0:?}")]
    UnknownRig(String),

    #[error("unknown precision level {0:?}")]
    UnknownPrecision(String),
}

/// Top-level failures surfaced by leveling engine entry points.
///
/// Pause and timeout are not errors; they are normal termination reasons
/// carried by [`LevelingOutcome`](crate::LevelingOutcome).
#[derive(Error, Debug)]
pub enum EngineError {
    /// Leveling was requested before a zero reference was established.
    #[error("zero not taken")]
    ZeroNotTaken,

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
