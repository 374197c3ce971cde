//! Field and business-rule validation for task records.
//!
//! Validation never mutates the record. Failures are split into hard errors
//! (the record must not be persisted) and warnings (suspicious but
//! tolerated, since imported data may legitimately violate soft rules in
//! transit).

use crate::model::{TaskRecord, TaskStatus};
use chrono::{Duration, Utc};
use serde::Serialize;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 5000;
pub const MAX_ID_LEN: usize = 50;
pub const MAX_TAGS: usize = 20;
pub const MAX_TAG_LEN: usize = 50;
pub const MAX_DEPENDENCIES: usize = 50;
pub const MAX_ASSIGNEE_LEN: usize = 100;
pub const MAX_ESTIMATED_HOURS: f64 = 1000.0;
pub const MAX_ACTUAL_HOURS: f64 = 2000.0;
pub const MAX_CONTEXT_BYTES: usize = 10 * 1024;

/// Tolerated clock skew before a future `created_at` draws a warning.
const FUTURE_SKEW_MINUTES: i64 = 5;
/// Due dates further out than this draw a warning.
const DUE_DATE_HORIZON_DAYS: i64 = 365 * 10;

/// A single field-scoped validation error.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

/// Outcome of validating one task record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Validate a task against field constraints and business rules.
pub fn validate(task: &TaskRecord, strict: bool) -> ValidationReport {
    validate_with_previous(task, strict, None)
}

/// Validate with an optional previous-status hint. When the hint is present
/// the status transition table is checked; violations warn rather than fail
/// because external imports may jump states.
pub fn validate_with_previous(
    task: &TaskRecord,
    strict: bool,
    previous_status: Option<TaskStatus>,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    check_id(task, &mut report);
    check_title(task, &mut report);
    check_description(task, &mut report);
    check_tags(task, strict, &mut report);
    check_dependencies(task, strict, &mut report);
    check_assignee(task, strict, &mut report);
    check_hours(task, &mut report);
    check_timestamps(task, &mut report);
    check_context(task, &mut report);
    check_business_rules(task, previous_status, &mut report);

    report.is_valid = report.errors.is_empty();
    report
}

/// True when `s` matches `[A-Za-z0-9_-]{1,50}`.
pub fn is_valid_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_ID_LEN
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_valid_tag(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_valid_assignee(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || ".@+_-".contains(c))
}

fn check_id(task: &TaskRecord, report: &mut ValidationReport) {
    if !is_valid_id(&task.id) {
        report.error(
            "id",
            format!("id must match [A-Za-z0-9_-]{{1,{MAX_ID_LEN}}}"),
        );
    }
}

fn check_title(task: &TaskRecord, report: &mut ValidationReport) {
    if task.title.trim().is_empty() {
        report.error("title", "title is required");
    } else if task.title.chars().count() > MAX_TITLE_LEN {
        report.error(
            "title",
            format!("title exceeds {MAX_TITLE_LEN} characters"),
        );
    }
}

fn check_description(task: &TaskRecord, report: &mut ValidationReport) {
    if let Some(desc) = &task.description {
        if desc.chars().count() > MAX_DESCRIPTION_LEN {
            report.error(
                "description",
                format!("description exceeds {MAX_DESCRIPTION_LEN} characters"),
            );
        }
    }
}

fn check_tags(task: &TaskRecord, strict: bool, report: &mut ValidationReport) {
    if task.tags.len() > MAX_TAGS {
        report.error("tags", format!("at most {MAX_TAGS} tags allowed"));
    }
    for tag in &task.tags {
        if tag.chars().count() > MAX_TAG_LEN {
            report.error("tags", format!("tag '{tag}' exceeds {MAX_TAG_LEN} characters"));
        } else if strict && !is_valid_tag(tag) {
            report.error("tags", format!("tag '{tag}' contains invalid characters"));
        }
    }
    let mut seen = std::collections::HashSet::new();
    for tag in &task.tags {
        if !seen.insert(tag.to_lowercase()) {
            report.warn(format!("duplicate tag '{tag}' (case-insensitive)"));
        }
    }
}

fn check_dependencies(task: &TaskRecord, strict: bool, report: &mut ValidationReport) {
    if task.depends_on.len() > MAX_DEPENDENCIES {
        report.error(
            "depends_on",
            format!("at most {MAX_DEPENDENCIES} dependencies allowed"),
        );
    }
    for dep in &task.depends_on {
        if dep == &task.id {
            report.error("depends_on", "task cannot depend on itself");
        } else if strict && !is_valid_id(dep) {
            report.error("depends_on", format!("dependency id '{dep}' is invalid"));
        }
    }
    let mut seen = std::collections::HashSet::new();
    for dep in &task.depends_on {
        if !seen.insert(dep.as_str()) {
            report.warn(format!("duplicate dependency '{dep}'"));
        }
    }
}

fn check_assignee(task: &TaskRecord, strict: bool, report: &mut ValidationReport) {
    if let Some(assignee) = &task.assignee {
        if assignee.chars().count() > MAX_ASSIGNEE_LEN {
            report.error(
                "assignee",
                format!("assignee exceeds {MAX_ASSIGNEE_LEN} characters"),
            );
        } else if strict && !is_valid_assignee(assignee) {
            report.error("assignee", "assignee contains invalid characters");
        }
    }
}

fn check_hours(task: &TaskRecord, report: &mut ValidationReport) {
    if let Some(est) = task.estimated_hours {
        if !est.is_finite() {
            report.error("estimated_hours", "estimated_hours must be a finite number");
        } else if est < 0.0 {
            report.error("estimated_hours", "estimated_hours cannot be negative");
        } else if est > MAX_ESTIMATED_HOURS {
            report.error(
                "estimated_hours",
                format!("estimated_hours exceeds {MAX_ESTIMATED_HOURS}"),
            );
        }
    }
    if let Some(actual) = task.actual_hours {
        if !actual.is_finite() {
            report.error("actual_hours", "actual_hours must be a finite number");
        } else if actual < 0.0 {
            report.error("actual_hours", "actual_hours cannot be negative");
        } else if actual > MAX_ACTUAL_HOURS {
            report.error(
                "actual_hours",
                format!("actual_hours exceeds {MAX_ACTUAL_HOURS}"),
            );
        }
    }
    if let (Some(est), Some(actual)) = (task.estimated_hours, task.actual_hours) {
        // A zero estimate counts: any positive actual is an overrun of it.
        if actual > est * 3.0 {
            report.warn(format!(
                "actual_hours ({actual}) is more than 3x estimated_hours ({est})"
            ));
        }
    }
}

fn check_timestamps(task: &TaskRecord, report: &mut ValidationReport) {
    let now = Utc::now();

    if task.created_at > now + Duration::minutes(FUTURE_SKEW_MINUTES) {
        report.warn("created_at is in the future".to_string());
    }
    if task.updated_at < task.created_at {
        report.error("updated_at", "updated_at is before created_at");
    }
    if let Some(completed) = task.completed_at {
        if completed < task.created_at {
            report.error("completed_at", "completed_at is before created_at");
        }
    }
    if let Some(due) = task.due_date {
        if due > now + Duration::days(DUE_DATE_HORIZON_DAYS) {
            report.warn("due_date is more than 10 years out".to_string());
        }
    }
}

fn check_context(task: &TaskRecord, report: &mut ValidationReport) {
    // Values are tagged serde_json variants, so non-serializable content is
    // unrepresentable; only the size bound needs a check.
    match serde_json::to_string(&task.context) {
        Ok(encoded) => {
            if encoded.len() > MAX_CONTEXT_BYTES {
                report.warn(format!(
                    "context is {} bytes serialized (over {MAX_CONTEXT_BYTES})",
                    encoded.len()
                ));
            }
        }
        Err(e) => report.error("context", format!("context failed to serialize: {e}")),
    }
}

fn check_business_rules(
    task: &TaskRecord,
    previous_status: Option<TaskStatus>,
    report: &mut ValidationReport,
) {
    if task.status == TaskStatus::Done && task.completed_at.is_none() {
        report.warn("status is done but completed_at is not set".to_string());
    }
    if task.status != TaskStatus::Done && task.completed_at.is_some() {
        report.warn(format!(
            "completed_at is set but status is {}",
            task.status
        ));
    }
    if matches!(task.status, TaskStatus::Todo | TaskStatus::Blocked) {
        if let Some(actual) = task.actual_hours {
            if actual > 0.0 {
                report.warn(format!(
                    "actual_hours recorded while status is {}",
                    task.status
                ));
            }
        }
    }
    if let Some(prev) = previous_status {
        if prev != task.status && !prev.allowed_transitions().contains(&task.status) {
            report.warn(format!(
                "unusual status transition {} -> {}",
                prev, task.status
            ));
        }
    }
}
