use std::{borrow::Cow, collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(RecordId);
id_newtype!(StepId);

impl RecordId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Create,
    Edit,
    View,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Create => "create",
            Mode::Edit => "edit",
            Mode::View => "view",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" | "add" => Ok(Mode::Create),
            "edit" => Ok(Mode::Edit),
            "view" => Ok(Mode::View),
            other => Err(format!("unknown wizard mode '{other}'")),
        }
    }
}

/// One section of a multi-part form. A step owns a set of top-level draft
/// keys ("field groups"); no two steps of a sequence may share a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub label: String,
    #[serde(default)]
    pub field_groups: Vec<String>,
}

impl Step {
    /// A step owning the single field group named after its id.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            field_groups: vec![id.clone()],
            id: StepId(id),
            label: label.into(),
        }
    }

    pub fn with_field_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field_groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn owns_group(&self, group: &str) -> bool {
        self.field_groups.iter().any(|owned| owned == group)
    }
}

/// In-progress aggregate record: field group name to arbitrary JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Draft(BTreeMap<String, Value>);

impl Draft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group: &str) -> Option<&Value> {
        self.0.get(group)
    }

    pub fn insert(&mut self, group: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(group.into(), value)
    }

    pub fn contains_group(&self, group: &str) -> bool {
        self.0.contains_key(group)
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shallow-key union: every group named by `patch` is replaced wholesale,
    /// every other group is kept as-is.
    pub fn merge_patch(&mut self, patch: Draft) {
        for (group, value) in patch.0 {
            self.0.insert(group, value);
        }
    }

    /// Copy of the groups listed in `groups` that are present in this draft.
    pub fn slice<'a, I>(&self, groups: I) -> Draft
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = Draft::new();
        for group in groups {
            if let Some(value) = self.0.get(group) {
                out.0.insert(group.to_string(), value.clone());
            }
        }
        out
    }

    /// Looks up a JSON pointer such as `/personal/email` against the draft.
    /// Tokens use the usual `~1` (`/`) and `~0` (`~`) escapes.
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        let trimmed = pointer.strip_prefix('/')?;
        let (group, rest) = match trimmed.split_once('/') {
            Some((group, rest)) => (group, Some(rest)),
            None => (trimmed, None),
        };
        let value = self.0.get(unescape_pointer_token(group).as_ref())?;
        match rest {
            Some(rest) => value.pointer(&format!("/{rest}")),
            None => Some(value),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0.into_iter().collect())
    }

    /// Accepts only JSON objects.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map.into_iter().collect())),
            _ => None,
        }
    }
}

impl FromIterator<(String, Value)> for Draft {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Draft {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub data: Draft,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-step "validated and committed" flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMap(BTreeMap<StepId, bool>);

impl CompletionMap {
    pub fn for_steps<'a, I>(steps: I) -> Self
    where
        I: IntoIterator<Item = &'a StepId>,
    {
        Self(steps.into_iter().map(|id| (id.clone(), false)).collect())
    }

    pub fn is_complete(&self, step: &StepId) -> bool {
        self.0.get(step).copied().unwrap_or(false)
    }

    pub fn mark_complete(&mut self, step: &StepId) {
        self.0.insert(step.clone(), true);
    }

    pub fn clear(&mut self) {
        for done in self.0.values_mut() {
            *done = false;
        }
    }

    pub fn completed_count(&self) -> usize {
        self.0.values().filter(|done| **done).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StepId, bool)> {
        self.0.iter().map(|(id, done)| (id, *done))
    }
}

fn unescape_pointer_token(token: &str) -> Cow<'_, str> {
    if token.contains('~') {
        Cow::Owned(token.replace("~1", "/").replace("~0", "~"))
    } else {
        Cow::Borrowed(token)
    }
}
