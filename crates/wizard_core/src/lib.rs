//! Multi-step wizard controller and the record stores it persists through.

pub mod controller;
pub mod durable_store;
pub mod error;
pub mod policy;
pub mod step_form;
pub mod steps;
pub mod store;
pub mod transport;
pub mod types;

pub use controller::WizardController;
pub use durable_store::SqliteRecordStore;
pub use error::{StepConfigError, StoreError, WizardError};
pub use policy::{ModePolicy, SaveStrategy};
pub use step_form::{
    submit_step, FieldError, FieldRule, RuleForm, StepForm, Submission, ValidationReport,
};
pub use steps::StepSequence;
pub use store::{
    attach_blob, BlobRef, BlobStore, BlobUpload, InMemoryRecordStore, MissingBlobStore,
    MissingRecordStore, RecordStore,
};
pub use transport::HttpRecordStore;
pub use types::{Navigation, StepOutcome, StepView, WizardEvent};
