//! Task record model: status and priority enums plus the persisted entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Task status in the delivery state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    Doing,
    TechnicalComplete,
    RuatValidation,
    Review,
    Done,
    Blocked,
    Cancelled,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Todo,
        TaskStatus::Doing,
        TaskStatus::TechnicalComplete,
        TaskStatus::RuatValidation,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Blocked,
        TaskStatus::Cancelled,
    ];

    /// Convert to the string stored in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Doing => "doing",
            TaskStatus::TechnicalComplete => "technical_complete",
            TaskStatus::RuatValidation => "ruat_validation",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a stored string back into a status.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "doing" => Ok(TaskStatus::Doing),
            "technical_complete" => Ok(TaskStatus::TechnicalComplete),
            "ruat_validation" => Ok(TaskStatus::RuatValidation),
            "review" => Ok(TaskStatus::Review),
            "done" => Ok(TaskStatus::Done),
            "blocked" => Ok(TaskStatus::Blocked),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(crate::Error::InvalidStatus(s.to_string())),
        }
    }

    /// Statuses this one may legally move to. Advisory: the validator warns
    /// on other transitions but never hard-fails, since imported data may
    /// jump states.
    pub fn allowed_transitions(&self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Todo => &[TaskStatus::Doing, TaskStatus::Blocked, TaskStatus::Cancelled],
            TaskStatus::Doing => &[
                TaskStatus::Todo,
                TaskStatus::TechnicalComplete,
                TaskStatus::Blocked,
                TaskStatus::Cancelled,
            ],
            TaskStatus::TechnicalComplete => &[TaskStatus::RuatValidation, TaskStatus::Doing],
            TaskStatus::RuatValidation => &[TaskStatus::Review, TaskStatus::TechnicalComplete],
            TaskStatus::Review => &[
                TaskStatus::Done,
                TaskStatus::RuatValidation,
                TaskStatus::Doing,
            ],
            TaskStatus::Blocked => &[TaskStatus::Todo, TaskStatus::Doing],
            TaskStatus::Done | TaskStatus::Cancelled => &[],
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    /// Convert to the string stored in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }

    /// Parse a stored string back into a priority.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "urgent" => Ok(TaskPriority::Urgent),
            _ => Err(crate::Error::InvalidPriority(s.to_string())),
        }
    }

    /// Sort rank: 0 is most urgent. Ascending sort puts Urgent first.
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Urgent => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// A unit of work. Field names serialize in camelCase, which is the JSONL
/// wire format; unknown wire fields (such as the export-only `exportedAt`
/// stamp) are ignored on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ids this task waits on. Entries may reference ids absent from the
    /// local store after a partial synchronization.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Reverse view: ids that name this task as a dependency. Materialized
    /// from incoming edges on read, never independently authoritative.
    #[serde(default)]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default = "now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub actual_hours: Option<f64>,
    /// Open extension map for callers. Ordered, arbitrarily nested values.
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl TaskRecord {
    /// Create a task with the given id and title and defaulted fields.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let ts = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            tags: Vec::new(),
            depends_on: Vec::new(),
            blocks: Vec::new(),
            assignee: None,
            created_at: ts,
            updated_at: ts,
            completed_at: None,
            due_date: None,
            estimated_hours: None,
            actual_hours: None,
            context: Map::new(),
        }
    }

    /// Create a task with a freshly generated id.
    pub fn with_generated_id(title: impl Into<String>) -> Self {
        Self::new(Self::generate_id(), title)
    }

    /// Generate a short unique id matching the `[A-Za-z0-9_-]{1,50}` rule.
    pub fn generate_id() -> String {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        format!("task-{}", &hex[..8])
    }

    /// Refresh `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Move to a new status, keeping `completed_at` paired with Done.
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        if status == TaskStatus::Done {
            self.completed_at = Some(Utc::now());
        } else {
            self.completed_at = None;
        }
        self.touch();
    }

    /// Add a tag. Returns false if the exact tag is already present.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        if self.tags.contains(&tag) {
            return false;
        }
        self.tags.push(tag);
        self.touch();
        true
    }

    /// Add a dependency id. Returns false on duplicates or self-reference.
    pub fn add_dependency(&mut self, dep_id: impl Into<String>) -> bool {
        let dep_id = dep_id.into();
        if dep_id == self.id || self.depends_on.contains(&dep_id) {
            return false;
        }
        self.depends_on.push(dep_id);
        self.touch();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_roundtrip() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(TaskStatus::parse("invalid").is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", TaskStatus::TechnicalComplete), "technical_complete");
        assert_eq!(format!("{}", TaskStatus::RuatValidation), "ruat_validation");
    }

    #[test]
    fn test_transition_table() {
        assert!(TaskStatus::Todo
            .allowed_transitions()
            .contains(&TaskStatus::Doing));
        assert!(!TaskStatus::Todo
            .allowed_transitions()
            .contains(&TaskStatus::Done));
        assert!(TaskStatus::Done.allowed_transitions().is_empty());
        assert!(TaskStatus::Cancelled.allowed_transitions().is_empty());
    }

    #[test]
    fn test_priority_rank_ordering() {
        let mut priorities = vec![
            TaskPriority::Low,
            TaskPriority::Urgent,
            TaskPriority::Medium,
            TaskPriority::High,
        ];
        priorities.sort_by_key(|p| p.rank());
        assert_eq!(
            priorities,
            vec![
                TaskPriority::Urgent,
                TaskPriority::High,
                TaskPriority::Medium,
                TaskPriority::Low,
            ]
        );
    }

    #[test]
    fn test_new_task_defaults() {
        let task = TaskRecord::new("t1", "Title");
        assert_eq!(task.id, "t1");
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(task.tags.is_empty());
        assert!(task.completed_at.is_none());
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn test_generated_id_shape() {
        let id = TaskRecord::generate_id();
        assert!(id.starts_with("task-"));
        assert_eq!(id.len(), 13);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn test_set_status_pairs_completed_at() {
        let mut task = TaskRecord::new("t1", "Title");
        task.set_status(TaskStatus::Done);
        assert!(task.completed_at.is_some());
        task.set_status(TaskStatus::Review);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_add_tag_and_dependency_dedupe() {
        let mut task = TaskRecord::new("t1", "Title");
        assert!(task.add_tag("backend"));
        assert!(!task.add_tag("backend"));
        assert!(task.add_dependency("t2"));
        assert!(!task.add_dependency("t2"));
        assert!(!task.add_dependency("t1"));
        assert_eq!(task.depends_on, vec!["t2".to_string()]);
    }

    #[test]
    fn test_wire_format_camel_case() {
        let task = TaskRecord::new("t1", "Title");
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("dependsOn").is_some());
        assert!(json.get("created_at").is_none());
    }

    #[test]
    fn test_wire_ignores_unknown_fields() {
        let line = r#"{"id":"t1","title":"T","exportedAt":"2025-01-01T00:00:00Z"}"#;
        let task: TaskRecord = serde_json::from_str(line).unwrap();
        assert_eq!(task.id, "t1");
        assert_eq!(task.status, TaskStatus::Todo);
    }
}
