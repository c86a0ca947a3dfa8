use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_PRIORITY: u8 = 2;

/// Server-assigned identity of a task or custom-field value.
///
/// Backends answer with either numeric or string ids; both are carried as an
/// opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(value) => Self::from(value),
            RawId::Text(value) => Self(value),
        })
    }
}

/// A single editable value as it travels between the panel and the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Parses free-form input for a custom field of the given kind.
    ///
    /// Blank input clears the value.
    pub fn parse_for(kind: CustomFieldKind, raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::Null);
        }

        match kind {
            CustomFieldKind::Text | CustomFieldKind::Select => Ok(Self::text(trimmed)),
            CustomFieldKind::Number => trimmed
                .parse::<f64>()
                .map(Self::Number)
                .map_err(|_| format!("'{trimmed}' is not a number")),
            CustomFieldKind::Checkbox => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Self::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(Self::Bool(false)),
                _ => Err(format!("'{trimmed}' is not a checkbox value")),
            },
            CustomFieldKind::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(|date| Self::Text(date.to_string()))
                .map_err(|_| format!("'{trimmed}' is not a YYYY-MM-DD date")),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("-"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "todo" => Ok(Self::Todo),
            "in_progress" | "doing" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            _ => Err(()),
        }
    }
}

/// A task as the backend reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub assignee_ids: Vec<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

/// The locally edited shape of a task, with or without a backing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: u8,
    pub assignee_ids: Vec<String>,
    pub due_date: Option<NaiveDate>,
}

impl Default for TaskDraft {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: DEFAULT_PRIORITY,
            assignee_ids: Vec::new(),
            due_date: None,
        }
    }
}

impl From<&TaskRecord> for TaskDraft {
    fn from(record: &TaskRecord) -> Self {
        Self {
            title: record.title.clone(),
            description: record.description.clone(),
            status: record.status,
            priority: record.priority,
            assignee_ids: record.assignee_ids.clone(),
            due_date: record.due_date,
        }
    }
}

impl TaskDraft {
    pub fn has_required_fields(&self) -> bool {
        !self.title.trim().is_empty()
    }

    pub fn create_payload(&self) -> CreateTaskPayload {
        CreateTaskPayload {
            title: self.title.trim().to_string(),
            description: Some(self.description.clone()).filter(|text| !text.trim().is_empty()),
            status: self.status,
            priority: self.priority,
            assignee_ids: self.assignee_ids.clone(),
            due_date: self.due_date,
        }
    }

    /// Fields of `self` that differ from `baseline`.
    pub fn diff(&self, baseline: &TaskDraft) -> TaskPatch {
        TaskPatch {
            title: (self.title.trim() != baseline.title.trim())
                .then(|| self.title.trim().to_string()),
            description: (self.description != baseline.description)
                .then(|| self.description.clone()),
            status: (self.status != baseline.status).then_some(self.status),
            priority: (self.priority != baseline.priority).then_some(self.priority),
            assignee_ids: (self.assignee_ids != baseline.assignee_ids)
                .then(|| self.assignee_ids.clone()),
            due_date: (self.due_date != baseline.due_date).then_some(self.due_date),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateTaskPayload {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assignee_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

/// Partial update; absent fields are left untouched by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_ids: Option<Vec<String>>,
    /// `Some(None)` clears the due date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<NaiveDate>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Folds `self` into `draft`.
    pub fn apply_to(&self, draft: &mut TaskDraft) {
        if let Some(title) = &self.title {
            draft.title = title.clone();
        }
        if let Some(description) = &self.description {
            draft.description = description.clone();
        }
        if let Some(status) = self.status {
            draft.status = status;
        }
        if let Some(priority) = self.priority {
            draft.priority = priority;
        }
        if let Some(assignee_ids) = &self.assignee_ids {
            draft.assignee_ids = assignee_ids.clone();
        }
        if let Some(due_date) = self.due_date {
            draft.due_date = due_date;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomFieldKind {
    Text,
    Number,
    Checkbox,
    Select,
    Date,
}

impl CustomFieldKind {
    /// Atomic choices commit on change; keystroke streams are debounced.
    pub fn commits_immediately(self) -> bool {
        matches!(self, Self::Checkbox | Self::Select | Self::Date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldDefinition {
    pub id: RecordId,
    pub name: String,
    pub kind: CustomFieldKind,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldValue {
    pub id: RecordId,
    pub definition_id: RecordId,
    #[serde(default)]
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldEntry {
    pub definition: CustomFieldDefinition,
    #[serde(default)]
    pub value: Option<CustomFieldValue>,
}

/// Coarse save feedback for one editing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveState {
    #[default]
    Idle,
    Dirty,
    Saving,
    Creating,
}

impl SaveState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dirty => "dirty",
            Self::Saving => "saving",
            Self::Creating => "creating",
        }
    }

    pub fn is_busy(self) -> bool {
        matches!(self, Self::Saving | Self::Creating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_accepts_numbers_and_strings() {
        let numeric: RecordId = serde_json::from_str("42").expect("numeric id should parse");
        let text: RecordId = serde_json::from_str("\"abc-1\"").expect("string id should parse");
        assert_eq!(numeric, RecordId::from(42));
        assert_eq!(numeric.as_str(), "42");
        assert_eq!(text.as_str(), "abc-1");
    }

    #[test]
    fn test_field_value_json_shapes() {
        assert_eq!(serde_json::to_string(&FieldValue::Null).unwrap(), "null");
        assert_eq!(
            serde_json::from_str::<FieldValue>("true").unwrap(),
            FieldValue::Bool(true)
        );
        assert_eq!(
            serde_json::from_str::<FieldValue>("3.5").unwrap(),
            FieldValue::Number(3.5)
        );
        assert_eq!(
            serde_json::from_str::<FieldValue>("\"hi\"").unwrap(),
            FieldValue::text("hi")
        );
    }

    #[test]
    fn test_field_value_parse_for_kind() {
        assert_eq!(
            FieldValue::parse_for(CustomFieldKind::Number, " 12 "),
            Ok(FieldValue::Number(12.0))
        );
        assert!(FieldValue::parse_for(CustomFieldKind::Number, "twelve").is_err());
        assert_eq!(
            FieldValue::parse_for(CustomFieldKind::Checkbox, "Yes"),
            Ok(FieldValue::Bool(true))
        );
        assert_eq!(
            FieldValue::parse_for(CustomFieldKind::Date, "2026-03-01"),
            Ok(FieldValue::text("2026-03-01"))
        );
        assert!(FieldValue::parse_for(CustomFieldKind::Date, "03/01/2026").is_err());
        assert_eq!(
            FieldValue::parse_for(CustomFieldKind::Text, "   "),
            Ok(FieldValue::Null)
        );
    }

    #[test]
    fn test_task_status_from_str() {
        assert_eq!(TaskStatus::from_str("In-Progress"), Ok(TaskStatus::InProgress));
        assert_eq!(TaskStatus::from_str("DONE"), Ok(TaskStatus::Done));
        assert!(TaskStatus::from_str("archived").is_err());
    }

    #[test]
    fn test_create_payload_omits_empty_optionals() {
        let draft = TaskDraft {
            title: "Fix login bug".to_string(),
            ..TaskDraft::default()
        };

        let json = serde_json::to_value(draft.create_payload()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"title": "Fix login bug", "status": "todo", "priority": 2})
        );
    }

    #[test]
    fn test_diff_only_reports_changed_fields() {
        let baseline = TaskDraft {
            title: "Write docs".to_string(),
            ..TaskDraft::default()
        };
        let mut edited = baseline.clone();
        edited.due_date = NaiveDate::from_ymd_opt(2026, 11, 2);

        let patch = edited.diff(&baseline);
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            serde_json::json!({"due_date": "2026-11-02"})
        );

        let cleared = baseline.diff(&edited);
        assert_eq!(
            serde_json::to_value(&cleared).unwrap(),
            serde_json::json!({"due_date": null})
        );
        assert!(baseline.diff(&baseline).is_empty());
    }

    #[test]
    fn test_diff_ignores_surrounding_whitespace_in_title() {
        let baseline = TaskDraft {
            title: "Write docs".to_string(),
            ..TaskDraft::default()
        };
        let mut edited = baseline.clone();
        edited.title = "  Write docs ".to_string();
        assert!(edited.diff(&baseline).is_empty());

        edited.title = "Write more docs ".to_string();
        let patch = edited.diff(&baseline);
        assert_eq!(patch.title.as_deref(), Some("Write more docs"));

        let mut saved = baseline.clone();
        patch.apply_to(&mut saved);
        assert!(edited.diff(&saved).is_empty());
    }

    #[test]
    fn test_patch_apply_to_draft() {
        let mut draft = TaskDraft::default();
        let patch = TaskPatch {
            title: Some("New".to_string()),
            priority: Some(4),
            ..TaskPatch::default()
        };

        patch.apply_to(&mut draft);

        assert_eq!(draft.title, "New");
        assert_eq!(draft.priority, 4);
        assert_eq!(draft.status, TaskStatus::Todo);
    }

    #[test]
    fn test_task_record_defaults() {
        let record: TaskRecord =
            serde_json::from_str(r#"{"id": 7, "title": "Call ACME"}"#).unwrap();
        assert_eq!(record.priority, DEFAULT_PRIORITY);
        assert_eq!(record.status, TaskStatus::Todo);
        assert!(record.due_date.is_none());
    }

    #[test]
    fn test_commit_mode_by_kind() {
        assert!(CustomFieldKind::Checkbox.commits_immediately());
        assert!(CustomFieldKind::Select.commits_immediately());
        assert!(!CustomFieldKind::Text.commits_immediately());
        assert!(!CustomFieldKind::Number.commits_immediately());
    }
}
