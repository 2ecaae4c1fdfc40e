use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use shared::domain::{Draft, StepId};
use tracing::{info, warn};
use wizard_core::{
    attach_blob, submit_step, BlobStore, BlobUpload, RuleForm, StepForm, WizardController,
    WizardError,
};

/// One user interaction replayed against the controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScriptAction {
    Submit {
        step: StepId,
        #[serde(default)]
        patch: Value,
        /// JSON pointers the step form treats as required.
        #[serde(default)]
        required: Vec<String>,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    Advance,
    Retreat,
    Jump {
        step: StepId,
    },
    Reset,
}

impl ScriptAction {
    fn name(&self) -> &'static str {
        match self {
            ScriptAction::Submit { .. } => "submit",
            ScriptAction::Advance => "advance",
            ScriptAction::Retreat => "retreat",
            ScriptAction::Jump { .. } => "jump",
            ScriptAction::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub group: String,
    pub field: String,
    /// Relative paths resolve against the script's directory.
    pub file: PathBuf,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionReport {
    pub index: usize,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn load_script(path: &Path) -> Result<Vec<ScriptAction>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read session script '{}'", path.display()))?;
    parse_script(&raw).with_context(|| format!("invalid session script '{}'", path.display()))
}

pub fn parse_script(raw: &str) -> Result<Vec<ScriptAction>> {
    Ok(serde_json::from_str(raw)?)
}

/// Replays `actions` in order. Controller errors are reported per action and
/// do not stop the run; failing to read an attachment does.
pub async fn run_script(
    controller: &WizardController,
    blobs: &dyn BlobStore,
    actions: Vec<ScriptAction>,
    base_dir: &Path,
) -> Result<Vec<ActionReport>> {
    let mut reports = Vec::with_capacity(actions.len());
    for (index, action) in actions.into_iter().enumerate() {
        let name = action.name();
        let result = match action {
            ScriptAction::Submit {
                step,
                patch,
                required,
                attachments,
            } => submit(controller, blobs, base_dir, step, patch, required, attachments).await?,
            ScriptAction::Advance => to_json(controller.advance()),
            ScriptAction::Retreat => to_json(controller.retreat()),
            ScriptAction::Jump { step } => to_json(controller.jump_to(&step)),
            ScriptAction::Reset => to_json(controller.reset().map(|()| "reset")),
        };

        let report = match result {
            Ok(value) => ActionReport {
                index,
                action: name,
                result: Some(value),
                error: None,
            },
            Err(error) => {
                warn!(index, action = name, %error, "scripted action failed");
                ActionReport {
                    index,
                    action: name,
                    result: None,
                    error: Some(error),
                }
            }
        };
        reports.push(report);
    }
    info!(actions = reports.len(), "session script finished");
    Ok(reports)
}

async fn submit(
    controller: &WizardController,
    blobs: &dyn BlobStore,
    base_dir: &Path,
    step: StepId,
    patch: Value,
    required: Vec<String>,
    attachments: Vec<Attachment>,
) -> Result<Result<Value, String>> {
    let draft = match patch {
        Value::Null => Draft::new(),
        other => Draft::from_value(other).context("submit patch must be a JSON object")?,
    };
    let form = required
        .into_iter()
        .fold(RuleForm::new(step.clone()), |form, pointer| form.require(pointer));
    if attachments.is_empty() {
        return Ok(to_json(submit_step(controller, &form, draft).await));
    }

    let mut uploads = Vec::with_capacity(attachments.len());
    let mut staged = draft.clone();
    for attachment in attachments {
        let path = base_dir.join(&attachment.file);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read attachment '{}'", path.display()))?;
        let filename = attachment
            .file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let upload = BlobUpload {
            filename,
            mime_type: attachment.mime_type.clone(),
            bytes,
        };
        stage_attachment(&mut staged, &attachment, &upload);
        uploads.push((attachment, upload));
    }

    // Nothing is uploaded for a report the form or the controller would refuse.
    if !form.validate(&staged).is_valid() {
        return Ok(to_json(submit_step(controller, &form, staged).await));
    }
    if let Err(err) = controller.check_report(&step, &staged) {
        return Ok(Err(err.to_string()));
    }

    let mut draft = draft;
    for (attachment, upload) in uploads {
        if let Err(err) =
            attach_blob(blobs, &mut draft, &attachment.group, &attachment.field, upload).await
        {
            return Ok(Err(format!("failed to upload attachment for {step}: {err}")));
        }
    }
    Ok(to_json(submit_step(controller, &form, draft).await))
}

/// Fills `group.field` with the shape `attach_blob` writes, using a
/// placeholder path, so the form can check the patch before any upload.
fn stage_attachment(draft: &mut Draft, attachment: &Attachment, upload: &BlobUpload) {
    let mut fields = match draft.get(&attachment.group) {
        Some(Value::Object(existing)) => existing.clone(),
        _ => Map::new(),
    };
    fields.insert(
        attachment.field.clone(),
        json!({
            "path": format!("pending/{}", upload.filename),
            "filename": upload.filename,
            "mime_type": upload.mime_type,
            "size_bytes": upload.bytes.len(),
        }),
    );
    draft.insert(&attachment.group, Value::Object(fields));
}

fn to_json<T: Serialize>(result: Result<T, WizardError>) -> Result<Value, String> {
    result
        .map_err(|err| err.to_string())
        .and_then(|value| serde_json::to_value(value).map_err(|err| err.to_string()))
}

#[cfg(test)]
#[path = "tests/script_tests.rs"]
mod tests;
