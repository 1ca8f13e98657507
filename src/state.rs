use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sensor::Axis;

/// Leveling engine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelState {
    /// Waiting for an operator command
    Idle,
    /// Driving one axis to within the coarse tolerance band
    CoarseConverging { axis: Axis },
    /// Nudging both axes to within the fine tolerance band
    FineConverging,
    /// Last invocation converged on both axes
    Done,
    /// Last invocation was halted by the pause flag
    Paused,
    /// Last invocation exceeded its wall-clock budget
    TimedOut,
}

impl fmt::Display for LevelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelState::Idle => write!(f, "Idle"),
            LevelState::CoarseConverging { axis } => write!(f, "Coarse ({axis})"),
            LevelState::FineConverging => write!(f, "Fine"),
            LevelState::Done => write!(f, "Done"),
            LevelState::Paused => write!(f, "Paused"),
            LevelState::TimedOut => write!(f, "Time Out"),
        }
    }
}

/// Pulse tiers, largest deviation first.
///
/// Exactly one tier matches any non-negative deviation magnitude; selection
/// lives in [`TierBoundaries::classify`](crate::settings::TierBoundaries::classify).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Xl,
    L,
    M,
    S,
    Xs,
}

impl Tier {
    /// All tiers, in descending magnitude order.
    pub const ALL: [Tier; 5] = [Tier::Xl, Tier::L, Tier::M, Tier::S, Tier::Xs];
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Tier::Xl => "XL",
            Tier::L => "L",
            Tier::M => "M",
            Tier::S => "S",
            Tier::Xs => "XS",
        };
        write!(f, "{label}")
    }
}

/// Why a leveling invocation ended.
///
/// All three are normal terminations; acquisition failures surface as
/// [`EngineError`](crate::error::EngineError) instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Both axes simultaneously within the fine tolerance of their zeros.
    Done,
    /// The pause flag was observed between control steps.
    Paused,
    /// The invocation exceeded its wall-clock budget.
    TimedOut,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Done => write!(f, "done"),
            TerminationReason::Paused => write!(f, "paused"),
            TerminationReason::TimedOut => write!(f, "timed out"),
        }
    }
}
