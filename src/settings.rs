//! Stored configuration: per-rig/per-precision presets plus the shared
//! sensor calibration record.
//!
//! The whole document round-trips through one JSON file: every edit
//! validates, writes the full document, and re-parses it to repopulate the
//! active in-memory view. The last-selected rig/precision pair is itself
//! persisted and decides which preset row is active.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::state::Tier;

/// Rig selections, one per supported load frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rig {
    Midload,
    LightLoad,
    AbcsRig,
    Llr,
}

impl Rig {
    pub const ALL: [Rig; 4] = [Rig::Midload, Rig::LightLoad, Rig::AbcsRig, Rig::Llr];
}

impl fmt::Display for Rig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rig::Midload => write!(f, "Midload"),
            Rig::LightLoad => write!(f, "Light Load"),
            Rig::AbcsRig => write!(f, "ABCS Rig"),
            Rig::Llr => write!(f, "LLR"),
        }
    }
}

impl FromStr for Rig {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "midload" => Ok(Rig::Midload),
            "light-load" | "lightload" | "light load" => Ok(Rig::LightLoad),
            "abcs" | "abcs-rig" | "abcs rig" => Ok(Rig::AbcsRig),
            "llr" => Ok(Rig::Llr),
            other => Err(ConfigurationError::UnknownRig(other.to_string())),
        }
    }
}

/// Precision class a preset is tuned to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    /// Matches T-level accuracy (fine).
    TLevel,
    /// Matches 1" level accuracy (coarse).
    InchLevel,
}

impl Precision {
    pub const ALL: [Precision; 2] = [Precision::TLevel, Precision::InchLevel];
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::TLevel => write!(f, "T-Level"),
            Precision::InchLevel => write!(f, "1\" Level"),
        }
    }
}

impl FromStr for Precision {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "t-level" | "tlevel" | "t" => Ok(Precision::TLevel),
            "inch-level" | "inch" | "1\"" | "1" => Ok(Precision::InchLevel),
            other => Err(ConfigurationError::UnknownPrecision(other.to_string())),
        }
    }
}

/// Difference-tier boundaries in minutes of arc, strictly decreasing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierBoundaries {
    pub xl_diff: f64,
    pub l_diff: f64,
    pub m_diff: f64,
    pub s_diff: f64,
}

impl TierBoundaries {
    /// Select the pulse tier for a deviation magnitude.
    ///
    /// Total over every `magnitude >= 0`: the XS arm catches everything at
    /// or below `s_diff`, so no magnitude falls through and no two tiers
    /// overlap.
    pub fn classify(&self, magnitude: f64) -> Tier {
        if magnitude > self.xl_diff {
            Tier::Xl
        } else if magnitude > self.l_diff {
            Tier::L
        } else if magnitude > self.m_diff {
            Tier::M
        } else if magnitude > self.s_diff {
            Tier::S
        } else {
            Tier::Xs
        }
    }

    fn validate(&self) -> Result<(), String> {
        if !(self.xl_diff > self.l_diff
            && self.l_diff > self.m_diff
            && self.m_diff > self.s_diff
            && self.s_diff >= 0.0)
        {
            return Err(format!(
                "tier boundaries must be strictly decreasing and non-negative, got \
                 {} > {} > {} > {} >= 0",
                self.xl_diff, self.l_diff, self.m_diff, self.s_diff
            ));
        }
        Ok(())
    }
}

/// Per-tier durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierSeconds {
    pub xl: f64,
    pub l: f64,
    pub m: f64,
    pub s: f64,
    pub xs: f64,
}

impl TierSeconds {
    pub fn get(&self, tier: Tier) -> Duration {
        let seconds = match tier {
            Tier::Xl => self.xl,
            Tier::L => self.l,
            Tier::M => self.m,
            Tier::S => self.s,
            Tier::Xs => self.xs,
        };
        Duration::from_secs_f64(seconds)
    }

    fn validate(&self, what: &str) -> Result<(), String> {
        for tier in Tier::ALL {
            let seconds = match tier {
                Tier::Xl => self.xl,
                Tier::L => self.l,
                Tier::M => self.m,
                Tier::S => self.s,
                Tier::Xs => self.xs,
            };
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(format!("{what} duration for {tier} must be non-negative"));
            }
        }
        Ok(())
    }
}

/// One (rig, precision) preset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub rig: Rig,
    pub precision: Precision,
    /// Fine tolerance band, minutes.
    pub sens1: f64,
    /// Coarse tolerance band, minutes. Must exceed `sens1`.
    pub sens2: f64,
    pub boundaries: TierBoundaries,
    /// Pulse duration per tier, seconds.
    pub pulses: TierSeconds,
    /// Post-pulse settle delay per tier, seconds.
    pub delays: TierSeconds,
    pub roll_invert: bool,
    pub pitch_invert: bool,
    /// Stay-on mode re-levels when either deviation exceeds this, minutes.
    pub threshold: f64,
}

impl Preset {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let problem = if !(self.sens1 > 0.0 && self.sens1 < self.sens2) {
            Some(format!(
                "need 0 < sens1 < sens2, got sens1={} sens2={}",
                self.sens1, self.sens2
            ))
        } else if self.threshold <= 0.0 {
            Some(format!("stay-on threshold must be positive, got {}", self.threshold))
        } else {
            self.boundaries
                .validate()
                .err()
                .or_else(|| self.pulses.validate("pulse").err())
                .or_else(|| self.delays.validate("delay").err())
        };

        match problem {
            Some(problem) => Err(ConfigurationError::InvalidPreset {
                rig: self.rig,
                precision: self.precision,
                problem,
            }),
            None => Ok(()),
        }
    }
}

/// Shared sensor calibration record, independent of rig/precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSetup {
    pub pitch_raw: Vec<f64>,
    pub pitch_minutes: Vec<f64>,
    pub roll_raw: Vec<f64>,
    pub roll_minutes: Vec<f64>,
    /// Polynomial fit order shared by both axes.
    pub order: usize,
    /// Display and return raw counts instead of calibrated minutes.
    pub show_raw: bool,
}

impl SensorSetup {
    /// Calibration point pairs for one axis.
    pub fn points(&self, axis: crate::sensor::Axis) -> Vec<(f64, f64)> {
        let (raw, minutes) = match axis {
            crate::sensor::Axis::Pitch => (&self.pitch_raw, &self.pitch_minutes),
            crate::sensor::Axis::Roll => (&self.roll_raw, &self.roll_minutes),
        };
        raw.iter().copied().zip(minutes.iter().copied()).collect()
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.pitch_raw.len() != self.pitch_minutes.len() {
            return Err(ConfigurationError::InvalidSensorSetup(format!(
                "pitch tables differ in length: {} raw vs {} minutes",
                self.pitch_raw.len(),
                self.pitch_minutes.len()
            )));
        }
        if self.roll_raw.len() != self.roll_minutes.len() {
            return Err(ConfigurationError::InvalidSensorSetup(format!(
                "roll tables differ in length: {} raw vs {} minutes",
                self.roll_raw.len(),
                self.roll_minutes.len()
            )));
        }
        Ok(())
    }
}

/// The full persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsDoc {
    pub last_rig: Rig,
    pub last_precision: Precision,
    pub presets: Vec<Preset>,
    pub sensor_setup: SensorSetup,
}

impl SettingsDoc {
    /// Factory document: one row per rig/precision combination, tier
    /// timings tuned per precision class, and the reference calibration
    /// tables for both axes.
    pub fn seed() -> Self {
        let mut presets = Vec::new();
        for rig in Rig::ALL {
            for precision in Precision::ALL {
                presets.push(seed_preset(rig, precision));
            }
        }
        Self {
            last_rig: Rig::Midload,
            last_precision: Precision::TLevel,
            presets,
            sensor_setup: SensorSetup {
                pitch_raw: vec![36112.0, 32564.0, 31163.0, 30462.0, 29730.0, 27540.0, 23575.0],
                pitch_minutes: vec![7.0, 3.0, 1.0, 0.0, -1.0, -3.5, -8.0],
                roll_raw: vec![37064.0, 34036.0, 32642.0, 31910.0, 31251.0, 29702.0, 26029.0],
                roll_minutes: vec![7.0, 3.0, 1.0, 0.0, -1.0, -3.0, -7.0],
                order: 5,
                show_raw: false,
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        for (i, preset) in self.presets.iter().enumerate() {
            preset.validate()?;
            let duplicate = self.presets[..i]
                .iter()
                .any(|p| p.rig == preset.rig && p.precision == preset.precision);
            if duplicate {
                return Err(ConfigurationError::DuplicatePreset {
                    rig: preset.rig,
                    precision: preset.precision,
                });
            }
        }
        self.sensor_setup.validate()
    }

    fn position(&self, rig: Rig, precision: Precision) -> Option<usize> {
        self.presets
            .iter()
            .position(|p| p.rig == rig && p.precision == precision)
    }
}

fn seed_preset(rig: Rig, precision: Precision) -> Preset {
    match precision {
        Precision::TLevel => Preset {
            rig,
            precision,
            sens1: 0.5,
            sens2: 2.0,
            boundaries: TierBoundaries {
                xl_diff: 4.0,
                l_diff: 2.5,
                m_diff: 1.5,
                s_diff: 0.5,
            },
            pulses: TierSeconds {
                xl: 1.0,
                l: 0.6,
                m: 0.4,
                s: 0.25,
                xs: 0.12,
            },
            delays: TierSeconds {
                xl: 2.0,
                l: 1.5,
                m: 1.2,
                s: 0.8,
                xs: 0.5,
            },
            roll_invert: false,
            pitch_invert: false,
            threshold: 2.0,
        },
        Precision::InchLevel => Preset {
            rig,
            precision,
            sens1: 1.0,
            sens2: 3.0,
            boundaries: TierBoundaries {
                xl_diff: 6.0,
                l_diff: 4.0,
                m_diff: 2.5,
                s_diff: 1.0,
            },
            pulses: TierSeconds {
                xl: 1.2,
                l: 0.8,
                m: 0.5,
                s: 0.3,
                xs: 0.15,
            },
            delays: TierSeconds {
                xl: 2.0,
                l: 1.5,
                m: 1.2,
                s: 0.8,
                xs: 0.5,
            },
            roll_invert: false,
            pitch_invert: false,
            threshold: 3.0,
        },
    }
}

/// File-backed settings store with a whole-document round trip per edit.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    doc: SettingsDoc,
    active: usize,
}

impl SettingsStore {
    /// Load and validate the document, resolving the persisted
    /// last-selected pair to its preset row. Any failure here is fatal to
    /// initialization.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigurationError> {
        let path = path.into();
        let (doc, active) = Self::read_document(&path)?;
        Ok(Self { path, doc, active })
    }

    /// Load the document, writing the factory seed first if the file does
    /// not exist yet.
    pub fn open_or_seed(path: impl Into<PathBuf>) -> Result<Self, ConfigurationError> {
        let path = path.into();
        if !path.exists() {
            log::info!("seeding settings file {}", path.display());
            let json = serde_json::to_string_pretty(&SettingsDoc::seed())?;
            std::fs::write(&path, json)?;
        }
        Self::load(path)
    }

    fn read_document(path: &Path) -> Result<(SettingsDoc, usize), ConfigurationError> {
        let text = std::fs::read_to_string(path)?;
        let doc: SettingsDoc = serde_json::from_str(&text)?;
        doc.validate()?;
        let active = doc
            .position(doc.last_rig, doc.last_precision)
            .ok_or(ConfigurationError::PresetNotFound {
                rig: doc.last_rig,
                precision: doc.last_precision,
            })?;
        Ok((doc, active))
    }

    fn save(&self) -> Result<(), ConfigurationError> {
        let json = serde_json::to_string_pretty(&self.doc)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Write the document and re-parse it from disk, repopulating the
    /// active view.
    fn commit(&mut self) -> Result<(), ConfigurationError> {
        self.save()?;
        let (doc, active) = Self::read_document(&self.path)?;
        self.doc = doc;
        self.active = active;
        Ok(())
    }

    /// The active preset row.
    pub fn active(&self) -> &Preset {
        &self.doc.presets[self.active]
    }

    pub fn rig(&self) -> Rig {
        self.doc.last_rig
    }

    pub fn precision(&self) -> Precision {
        self.doc.last_precision
    }

    pub fn sensor_setup(&self) -> &SensorSetup {
        &self.doc.sensor_setup
    }

    pub fn doc(&self) -> &SettingsDoc {
        &self.doc
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Select and persist a new active rig/precision pair.
    pub fn select(&mut self, rig: Rig, precision: Precision) -> Result<&Preset, ConfigurationError> {
        self.doc
            .position(rig, precision)
            .ok_or(ConfigurationError::PresetNotFound { rig, precision })?;
        self.doc.last_rig = rig;
        self.doc.last_precision = precision;
        self.commit()?;
        log::info!("selected preset {rig} / {precision}");
        Ok(self.active())
    }

    /// Replace the preset row matching `edited`'s rig/precision key.
    ///
    /// The edit is validated before anything is written; an invalid row
    /// leaves both file and in-memory view untouched.
    pub fn update_preset(&mut self, edited: Preset) -> Result<(), ConfigurationError> {
        edited.validate()?;
        let index = self
            .doc
            .position(edited.rig, edited.precision)
            .ok_or(ConfigurationError::PresetNotFound {
                rig: edited.rig,
                precision: edited.precision,
            })?;
        self.doc.presets[index] = edited;
        self.commit()
    }

    /// Replace the shared sensor calibration record.
    pub fn update_sensor_setup(&mut self, setup: SensorSetup) -> Result<(), ConfigurationError> {
        setup.validate()?;
        self.doc.sensor_setup = setup;
        self.commit()
    }
}
