use shared::{
    domain::{Mode, RecordId, StepId},
    error::ErrorCode,
};
use thiserror::Error;

/// Failure reported by a [`crate::RecordStore`] or [`crate::BlobStore`].
/// The controller treats every variant as "operation failed, do not advance".
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request rejected ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("invalid store endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(value: reqwest::Error) -> Self {
        StoreError::Transport(value.to_string())
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(value: anyhow::Error) -> Self {
        StoreError::Backend(format!("{value:#}"))
    }
}

#[derive(Debug, Error)]
pub enum WizardError {
    #[error("{mode} mode requires an existing record id")]
    MissingRecordId { mode: Mode },
    #[error("failed to load record {record_id}: {source}")]
    Load {
        record_id: RecordId,
        #[source]
        source: StoreError,
    },
    #[error("failed to save step {step}: {source}")]
    Save {
        step: StepId,
        #[source]
        source: StoreError,
    },
    #[error("unknown step '{0}'")]
    UnknownStep(StepId),
    #[error("step {step} does not own field group '{group}'")]
    ForeignFieldGroup { step: StepId, group: String },
    #[error("step {step} is locked until {blocking} is complete")]
    StepLocked { step: StepId, blocking: StepId },
    #[error("wizard is read-only in view mode")]
    ReadOnly,
    #[error("another request is already in flight for this wizard session")]
    InFlight,
    #[error("wizard session was disposed")]
    Disposed,
    #[error("wizard session was reset while a request was outstanding")]
    Superseded,
}

impl WizardError {
    /// Load and save failures leave the session usable; the same call may be
    /// retried by the user.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WizardError::Load { .. } | WizardError::Save { .. } | WizardError::InFlight
        )
    }
}

#[derive(Debug, Error)]
pub enum StepConfigError {
    #[error("step sequence must contain at least one step")]
    Empty,
    #[error("duplicate step id '{0}'")]
    DuplicateStep(StepId),
    #[error("field group '{group}' is claimed by both '{first}' and '{second}'")]
    SharedFieldGroup {
        group: String,
        first: StepId,
        second: StepId,
    },
    #[error("step '{0}' has a blank id or field group")]
    Blank(StepId),
    #[error("failed to read step config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse step config: {0}")]
    Parse(#[from] toml::de::Error),
}
