//! Ordered step definitions for a wizard.
//!
//! A sequence is fixed configuration: it is built in code, parsed from TOML,
//! or taken from [`StepSequence::contractor_employee`]. Validation guarantees
//! the sequence is non-empty, ids are unique and no field group is owned by
//! more than one step.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
};

use serde::Deserialize;
use shared::domain::{Step, StepId};

use crate::error::StepConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSequence {
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct StepFile {
    steps: Vec<Step>,
}

impl StepSequence {
    pub fn new(steps: Vec<Step>) -> Result<Self, StepConfigError> {
        if steps.is_empty() {
            return Err(StepConfigError::Empty);
        }

        let mut steps = steps;
        let mut seen_ids: HashSet<StepId> = HashSet::new();
        let mut group_owner: HashMap<String, StepId> = HashMap::new();
        for step in &mut steps {
            if step.id.as_str().trim().is_empty() {
                return Err(StepConfigError::Blank(step.id.clone()));
            }
            if step.field_groups.is_empty() {
                step.field_groups.push(step.id.as_str().to_string());
            }
            if !seen_ids.insert(step.id.clone()) {
                return Err(StepConfigError::DuplicateStep(step.id.clone()));
            }
            for group in &step.field_groups {
                if group.trim().is_empty() {
                    return Err(StepConfigError::Blank(step.id.clone()));
                }
                if let Some(first) = group_owner.get(group) {
                    return Err(StepConfigError::SharedFieldGroup {
                        group: group.clone(),
                        first: first.clone(),
                        second: step.id.clone(),
                    });
                }
                group_owner.insert(group.clone(), step.id.clone());
            }
        }

        Ok(Self { steps })
    }

    /// Parses `[[steps]]` tables with `id`, `label` and optional `field_groups`.
    pub fn from_toml_str(raw: &str) -> Result<Self, StepConfigError> {
        let file: StepFile = toml::from_str(raw)?;
        Self::new(file.steps)
    }

    pub fn load(path: &Path) -> Result<Self, StepConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| StepConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Tabs of the contractor/employee master-data record.
    pub fn contractor_employee() -> Self {
        Self {
            steps: vec![
                Step::new("personal", "Personal Info")
                    .with_field_groups(["personal", "contact", "address"]),
                Step::new("employment", "Employment"),
                Step::new("bank", "Bank Details"),
                Step::new("documents", "Documents"),
                Step::new("family", "Family"),
                Step::new("education", "Education"),
                Step::new("training", "Training"),
                Step::new("medical", "Medical"),
                Step::new("actions", "Actions / Status").with_field_groups(["actions", "status"]),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    // A validated sequence is never empty; kept for clippy's len_without_is_empty.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn first(&self) -> &Step {
        &self.steps[0]
    }

    pub fn index_of(&self, id: &StepId) -> Option<usize> {
        self.steps.iter().position(|step| &step.id == id)
    }

    pub fn is_terminal(&self, index: usize) -> bool {
        index + 1 == self.steps.len()
    }

    pub fn owner_of(&self, group: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.owns_group(group))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &StepId> {
        self.steps.iter().map(|step| &step.id)
    }
}

impl std::ops::Index<usize> for StepSequence {
    type Output = Step;

    fn index(&self, index: usize) -> &Self::Output {
        &self.steps[index]
    }
}
