use std::{fmt, sync::Arc};

use serde::Serialize;
use serde_json::Value;
use shared::domain::{Draft, StepId};

use crate::{controller::WizardController, error::WizardError, types::StepOutcome};

/// One section of the wizard as seen by the controller: it names its step
/// and decides whether a patch passes its own field checks.
pub trait StepForm: Send + Sync {
    fn step(&self) -> &StepId;
    fn validate(&self, patch: &Draft) -> ValidationReport;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// JSON pointer of the offending field, e.g. `/personal/email`.
    pub pointer: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pointer, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<FieldError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, pointer: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            pointer: pointer.into(),
            message: message.into(),
        });
    }
}

type Check = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

/// An opaque check on a single field of a patch.
#[derive(Clone)]
pub struct FieldRule {
    pointer: String,
    message: String,
    check: Check,
}

impl FieldRule {
    /// Present, not null and not a blank string.
    pub fn required(pointer: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            message: "Value cannot be empty".to_string(),
            check: Arc::new(|value| match value {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            }),
        }
    }

    /// The predicate sees the field value, or `None` when the field is absent.
    pub fn predicate<F>(pointer: impl Into<String>, message: impl Into<String>, check: F) -> Self
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        Self {
            pointer: pointer.into(),
            message: message.into(),
            check: Arc::new(check),
        }
    }

    pub fn pointer(&self) -> &str {
        &self.pointer
    }

    fn evaluate(&self, patch: &Draft) -> Option<FieldError> {
        if (self.check)(patch.pointer(&self.pointer)) {
            None
        } else {
            Some(FieldError {
                pointer: self.pointer.clone(),
                message: self.message.clone(),
            })
        }
    }
}

impl fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRule")
            .field("pointer", &self.pointer)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Step form driven by a list of field rules.
#[derive(Debug, Clone)]
pub struct RuleForm {
    step: StepId,
    rules: Vec<FieldRule>,
}

impl RuleForm {
    pub fn new(step: impl Into<StepId>) -> Self {
        Self {
            step: step.into(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn require(self, pointer: impl Into<String>) -> Self {
        self.with_rule(FieldRule::required(pointer))
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }
}

impl StepForm for RuleForm {
    fn step(&self) -> &StepId {
        &self.step
    }

    fn validate(&self, patch: &Draft) -> ValidationReport {
        ValidationReport {
            errors: self
                .rules
                .iter()
                .filter_map(|rule| rule.evaluate(patch))
                .collect(),
        }
    }
}

/// What a save action produced: the controller's outcome plus the form's own
/// field errors, which the controller never looks at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub outcome: StepOutcome,
    pub report: ValidationReport,
}

/// Validates `patch` with `form` and reports the result to the controller.
pub async fn submit_step(
    controller: &WizardController,
    form: &dyn StepForm,
    patch: Draft,
) -> Result<Submission, WizardError> {
    let report = form.validate(&patch);
    let outcome = controller
        .report_step_result(form.step(), patch, report.is_valid())
        .await?;
    Ok(Submission { outcome, report })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use shared::domain::Step;

    use super::*;
    use crate::{steps::StepSequence, store::InMemoryRecordStore};

    fn personal_form() -> RuleForm {
        RuleForm::new("personal")
            .require("/personal/first_name")
            .with_rule(FieldRule::predicate(
                "/contact/email",
                "Enter a valid email address",
                |value| value.and_then(Value::as_str).is_some_and(|s| s.contains('@')),
            ))
    }

    #[test]
    fn rule_form_collects_every_failing_field() {
        let patch = Draft::from_value(json!({
            "personal": { "first_name": "  " },
            "contact": { "email": "nope" }
        }))
        .expect("object");

        let report = personal_form().validate(&patch);
        assert!(!report.is_valid());
        let pointers: Vec<&str> = report.errors.iter().map(|e| e.pointer.as_str()).collect();
        assert_eq!(pointers, vec!["/personal/first_name", "/contact/email"]);
    }

    #[test]
    fn required_accepts_non_string_values() {
        let form = RuleForm::new("bank").require("/bank/account_no");
        let patch = Draft::from_value(json!({ "bank": { "account_no": 1234 } })).expect("object");
        assert!(form.validate(&patch).is_valid());
        let missing = Draft::from_value(json!({ "bank": {} })).expect("object");
        assert!(!form.validate(&missing).is_valid());
    }

    #[tokio::test]
    async fn submit_step_reports_validation_result_to_controller() {
        let steps = StepSequence::new(vec![
            Step::new("personal", "Personal").with_field_groups(["personal", "contact"]),
            Step::new("bank", "Bank"),
        ])
        .expect("steps");
        let controller =
            WizardController::new_with_store(steps, Arc::new(InMemoryRecordStore::new()));
        let form = personal_form();

        let bad = Draft::from_value(json!({ "personal": { "first_name": "Ann" } }))
            .expect("object");
        let submission = submit_step(&controller, &form, bad).await.expect("submit");
        assert_eq!(submission.outcome, StepOutcome::ValidationFailed);
        assert_eq!(submission.report.errors.len(), 1);
        assert!(controller.draft().is_empty());

        let good = Draft::from_value(json!({
            "personal": { "first_name": "Ann" },
            "contact": { "email": "ann@example.com" }
        }))
        .expect("object");
        let submission = submit_step(&controller, &form, good).await.expect("submit");
        assert_eq!(
            submission.outcome,
            StepOutcome::Advanced {
                to: StepId::from("bank")
            }
        );
        assert!(submission.report.is_valid());
        assert!(controller.completion().is_complete(&StepId::from("personal")));
    }
}
