//! Event surface for display/input collaborators.

use std::sync::Arc;
use std::time::Duration;

use crate::actuator::Direction;
use crate::sensor::Axis;
use crate::state::{LevelState, TerminationReason, Tier};

/// Events emitted to registered callbacks as the engine works.
///
/// The engine never blocks on a collaborator; callbacks run inline on the
/// control thread and should return quickly.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The engine moved to a new state.
    StateChanged { state: LevelState },
    /// A fresh reading was taken. `delta` is `reading - zero` as displayed.
    Reading { axis: Axis, value: f64, delta: f64 },
    /// A zero reference was established.
    ZeroSet { axis: Axis, zero: f64 },
    /// One tiered correction pulse was issued.
    Pulse {
        axis: Axis,
        direction: Direction,
        tier: Tier,
    },
    /// A leveling invocation terminated.
    Finished {
        reason: TerminationReason,
        elapsed: Duration,
    },
}

/// Callback ID for registration/deregistration
pub type CallbackId = u64;

/// Callback function type
pub type EngineCallback = Arc<dyn Fn(&EngineEvent) + Send + Sync>;
