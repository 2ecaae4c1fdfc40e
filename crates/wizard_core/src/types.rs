use serde::Serialize;
use shared::domain::{CompletionMap, Draft, Mode, Record, RecordId, StepId};

/// Result of reporting a step's patch to the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Local validation failed; nothing was merged or marked complete.
    ValidationFailed,
    /// The patch was committed and the active step moved on.
    Advanced { to: StepId },
    /// The terminal step was committed and the full record persisted.
    Completed { record: Record },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "navigation", rename_all = "snake_case")]
pub enum Navigation {
    Moved { to: StepId },
    /// A jump landed on the earliest incomplete prerequisite instead.
    Redirected { requested: StepId, to: StepId },
    /// The next step is gated behind `blocking`.
    Blocked { blocking: StepId },
    AtBoundary,
}

impl Navigation {
    /// Step the wizard is showing after the move, if it moved at all.
    pub fn landed_on(&self) -> Option<&StepId> {
        match self {
            Navigation::Moved { to } | Navigation::Redirected { to, .. } => Some(to),
            Navigation::Blocked { .. } | Navigation::AtBoundary => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WizardEvent {
    Initialized {
        mode: Mode,
        record_id: Option<RecordId>,
    },
    StepCommitted {
        step: StepId,
        saved: bool,
    },
    ActiveStepChanged(StepId),
    SaveFailed {
        step: StepId,
        message: String,
    },
    Completed(Record),
    Reset,
    Disposed,
}

/// Read-only projection of the session handed to a step form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepView {
    pub step: StepId,
    pub label: String,
    pub mode: Mode,
    /// The step's own field groups as currently held in the draft.
    pub data: Draft,
    pub completion: CompletionMap,
    pub editable: bool,
    pub accessible: bool,
    pub active: bool,
}
