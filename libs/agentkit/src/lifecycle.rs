//! Lifecycle phases, desired actions and change classification.

use serde::Serialize;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Unloaded,
    Loaded,
    Initialized,
    Running,
    Stopped,
    /// Build failed under hot reload; waiting for a source change.
    AwaitingChange,
    Destroyed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Unloaded => "unloaded",
            Phase::Loaded => "loaded",
            Phase::Initialized => "initialized",
            Phase::Running => "running",
            Phase::Stopped => "stopped",
            Phase::AwaitingChange => "awaiting_change",
            Phase::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Transition the scheduler should perform next.
///
/// Ordered by how much of the lifecycle it replays: `Load` implies Init and
/// Start, `Init` implies Start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredAction {
    #[default]
    None,
    Start,
    Init,
    Load,
}

impl DesiredAction {
    /// The stronger of two pending requests.
    #[must_use]
    pub fn merge(self, other: DesiredAction) -> DesiredAction {
        self.max(other)
    }
}

/// Result of every lifecycle call: where the runtime is and what it wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub phase: Phase,
    pub desired: DesiredAction,
}

impl Transition {
    #[must_use]
    pub fn new(phase: Phase, desired: DesiredAction) -> Self {
        Self { phase, desired }
    }

    #[must_use]
    pub fn settled(phase: Phase) -> Self {
        Self::new(phase, DesiredAction::None)
    }
}

/// Map a changed file to the action that picks it up.
///
/// Generated OpenAPI documents are ignored, protobuf definitions change the
/// endpoints read at Load, anything else only needs a rebuild and restart.
#[must_use]
pub fn classify_change(path: &Path) -> DesiredAction {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    if name.ends_with(".swagger.json") {
        DesiredAction::None
    } else if name.ends_with(".proto") {
        DesiredAction::Load
    } else {
        DesiredAction::Start
    }
}
