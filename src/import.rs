//! JSONL import.
//!
//! Reads files written by the exporter (plain or gzipped) and applies them to
//! a store. Imports are line-robust: a bad record is reported with its line
//! number and the rest of the file still lands. Conflicts on existing ids are
//! resolved per [`ConflictResolution`]; the default leaves the store as it
//! was.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{Error, Result};
use crate::export::ExportMetadata;
use crate::model::{TaskPriority, TaskRecord, TaskStatus};
use crate::store::TaskStore;
use crate::validate::validate;

/// What to do when an incoming record's id already exists in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep the stored record, drop the incoming one.
    #[default]
    Skip,
    /// Replace the stored record with the incoming one, timestamps included.
    Overwrite,
    /// Field-level merge of the two records, see [`merge_records`].
    Merge,
    /// Keep both: the incoming record gets a fresh id, the original id is
    /// noted under `importedFrom` in its context.
    CreateNew,
}

/// How duplicate ids across several input files are collapsed before
/// importing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergeStrategy {
    /// The first file mentioning an id wins; later occurrences are dropped.
    First,
    /// The last file mentioning an id wins.
    Last,
    /// Keep every occurrence; later ones go through conflict resolution.
    #[default]
    All,
}

/// Knobs for an import run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub resolution: ConflictResolution,
    /// Count and report everything without writing to the store.
    pub dry_run: bool,
    /// Validate each record before applying it. On by default.
    pub validate: bool,
    /// Escalate format checks that are advisory otherwise.
    pub strict: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            resolution: ConflictResolution::default(),
            dry_run: false,
            validate: true,
            strict: false,
        }
    }
}

/// Outcome of one import run. `total_processed` counts record lines, not
/// blanks or the metadata envelope; every processed line lands in exactly one
/// of imported, updated, skipped, or failed.
#[derive(Debug, Clone)]
pub struct ImportResult {
    /// True when nothing failed.
    pub success: bool,
    pub total_processed: usize,
    /// Records created under a new row.
    pub imported: usize,
    /// Records that replaced or merged into an existing row.
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Line-numbered error messages.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub processing_time_secs: f64,
    /// Envelope from the file, when present.
    pub metadata: Option<ExportMetadata>,
}

impl ImportResult {
    fn new(metadata: Option<ExportMetadata>) -> Self {
        ImportResult {
            success: true,
            total_processed: 0,
            imported: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            processing_time_secs: 0.0,
            metadata,
        }
    }
}

/// Validation-only view of an import file, nothing applied.
#[derive(Debug, Clone)]
pub struct FileValidation {
    /// True when every record line parses and validates.
    pub valid: bool,
    pub total_records: usize,
    pub valid_records: usize,
    pub invalid_records: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metadata: Option<ExportMetadata>,
}

/// Summary of what an import file contains.
#[derive(Debug, Clone)]
pub struct ImportPreview {
    pub total_records: usize,
    pub parse_errors: usize,
    pub status_counts: HashMap<TaskStatus, usize>,
    pub priority_counts: HashMap<TaskPriority, usize>,
    /// Record counts per assignee; unassigned records are not counted.
    pub assignee_counts: HashMap<String, usize>,
    /// The first records of the file, up to the requested cap.
    pub sample: Vec<TaskRecord>,
    pub metadata: Option<ExportMetadata>,
}

struct RawEntry {
    line_no: usize,
    task: std::result::Result<TaskRecord, String>,
}

/// Applies JSONL files to a store.
pub struct Importer<'a> {
    store: &'a mut TaskStore,
}

impl<'a> Importer<'a> {
    pub fn new(store: &'a mut TaskStore) -> Self {
        Importer { store }
    }

    /// Import one file.
    pub fn import_tasks<P: AsRef<Path>>(
        &mut self,
        path: P,
        options: &ImportOptions,
    ) -> Result<ImportResult> {
        let path = path.as_ref();
        let started = Instant::now();
        let (entries, metadata) = read_file(path)?;

        let mut result = ImportResult::new(metadata);
        let mut seen_new = HashSet::new();
        self.run_entries(entries, options, None, &mut seen_new, &mut result);

        result.processing_time_secs = started.elapsed().as_secs_f64();
        result.success = result.failed == 0;
        info!(
            path = %path.display(),
            imported = result.imported,
            updated = result.updated,
            skipped = result.skipped,
            failed = result.failed,
            dry_run = options.dry_run,
            "import finished"
        );
        Ok(result)
    }

    /// Import only records touched strictly after `since`. Older records
    /// count as skipped.
    pub fn import_incremental<P: AsRef<Path>>(
        &mut self,
        path: P,
        since: DateTime<Utc>,
        options: &ImportOptions,
    ) -> Result<ImportResult> {
        let path = path.as_ref();
        let started = Instant::now();
        let (entries, metadata) = read_file(path)?;

        let mut result = ImportResult::new(metadata);
        let mut seen_new = HashSet::new();
        self.run_entries(entries, options, Some(since), &mut seen_new, &mut result);

        result.processing_time_secs = started.elapsed().as_secs_f64();
        result.success = result.failed == 0;
        Ok(result)
    }

    /// Import several files in order, collapsing cross-file duplicate ids per
    /// `strategy` first. Messages are prefixed with the file they came from.
    pub fn import_from_multiple_files<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        strategy: MergeStrategy,
        options: &ImportOptions,
    ) -> Result<ImportResult> {
        let started = Instant::now();

        let mut files: Vec<(String, Vec<RawEntry>, Option<ExportMetadata>)> = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let label = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .unwrap_or_else(|| path.display().to_string());
            let (entries, metadata) = read_file(path)?;
            files.push((label, entries, metadata));
        }

        // For First/Last, decide one winning occurrence per id up front.
        let winners: Option<HashMap<String, (usize, usize)>> = match strategy {
            MergeStrategy::All => None,
            MergeStrategy::First | MergeStrategy::Last => {
                let mut map: HashMap<String, (usize, usize)> = HashMap::new();
                for (fi, (_, entries, _)) in files.iter().enumerate() {
                    for (ei, entry) in entries.iter().enumerate() {
                        if let Ok(task) = &entry.task {
                            match strategy {
                                MergeStrategy::First => {
                                    map.entry(task.id.clone()).or_insert((fi, ei));
                                }
                                _ => {
                                    map.insert(task.id.clone(), (fi, ei));
                                }
                            }
                        }
                    }
                }
                Some(map)
            }
        };

        let first_metadata = files.iter().find_map(|(_, _, m)| m.clone());
        let mut result = ImportResult::new(first_metadata);
        let mut seen_new = HashSet::new();

        for (fi, (label, entries, _)) in files.into_iter().enumerate() {
            let mut kept: Vec<RawEntry> = Vec::new();
            for (ei, entry) in entries.into_iter().enumerate() {
                let keep = match (&winners, &entry.task) {
                    (None, _) | (_, Err(_)) => true,
                    (Some(map), Ok(task)) => map.get(&task.id) == Some(&(fi, ei)),
                };
                if keep {
                    kept.push(entry);
                } else {
                    result.total_processed += 1;
                    result.skipped += 1;
                }
            }

            let mut sub = ImportResult::new(None);
            self.run_entries(kept, options, None, &mut seen_new, &mut sub);
            result.total_processed += sub.total_processed;
            result.imported += sub.imported;
            result.updated += sub.updated;
            result.skipped += sub.skipped;
            result.failed += sub.failed;
            result
                .errors
                .extend(sub.errors.into_iter().map(|e| format!("{label}: {e}")));
            result
                .warnings
                .extend(sub.warnings.into_iter().map(|w| format!("{label}: {w}")));
        }

        result.processing_time_secs = started.elapsed().as_secs_f64();
        result.success = result.failed == 0;
        Ok(result)
    }

    fn run_entries(
        &mut self,
        entries: Vec<RawEntry>,
        options: &ImportOptions,
        cutoff: Option<DateTime<Utc>>,
        seen_new: &mut HashSet<String>,
        result: &mut ImportResult,
    ) {
        for entry in entries {
            result.total_processed += 1;
            match entry.task {
                Ok(task) => {
                    if let Some(since) = cutoff {
                        if task.updated_at <= since {
                            result.skipped += 1;
                            continue;
                        }
                    }
                    self.apply(task, entry.line_no, options, seen_new, result);
                }
                Err(message) => {
                    result.failed += 1;
                    result.errors.push(message);
                }
            }
        }
    }

    fn apply(
        &mut self,
        mut task: TaskRecord,
        line_no: usize,
        options: &ImportOptions,
        seen_new: &mut HashSet<String>,
        result: &mut ImportResult,
    ) {
        if options.validate {
            let report = validate(&task, options.strict);
            for warning in &report.warnings {
                result
                    .warnings
                    .push(format!("line {line_no}: {}: {warning}", task.id));
            }
            if !report.is_valid {
                result.failed += 1;
                for issue in &report.errors {
                    result.errors.push(format!(
                        "line {line_no}: {}: {}: {}",
                        task.id, issue.field, issue.message
                    ));
                }
                return;
            }
        }

        let exists = match self.store.exists(&task.id) {
            Ok(found) => found || seen_new.contains(&task.id),
            Err(e) => {
                record_failure(result, line_no, &task.id, &e);
                return;
            }
        };

        if !exists {
            if !options.dry_run {
                if let Err(e) = self.store.create(&task) {
                    record_failure(result, line_no, &task.id, &e);
                    return;
                }
            }
            seen_new.insert(task.id.clone());
            result.imported += 1;
            return;
        }

        match options.resolution {
            ConflictResolution::Skip => {
                result.skipped += 1;
            }
            ConflictResolution::Overwrite => {
                if !options.dry_run {
                    if let Err(e) = self.store.upsert(&task) {
                        record_failure(result, line_no, &task.id, &e);
                        return;
                    }
                }
                result.updated += 1;
            }
            ConflictResolution::Merge => {
                let existing = match self.store.get(&task.id) {
                    Ok(existing) => existing,
                    Err(e) => {
                        record_failure(result, line_no, &task.id, &e);
                        return;
                    }
                };
                match existing {
                    Some(existing) => {
                        let merged = merge_records(&existing, &task);
                        if !options.dry_run {
                            if let Err(e) = self.store.upsert(&merged) {
                                record_failure(result, line_no, &task.id, &e);
                                return;
                            }
                        }
                        result.updated += 1;
                    }
                    // The clash is against a record this dry run pretended to
                    // create; there is nothing stored to merge with.
                    None => {
                        result.updated += 1;
                    }
                }
            }
            ConflictResolution::CreateNew => {
                let original = task.id.clone();
                let mut new_id = TaskRecord::generate_id();
                loop {
                    let clash = seen_new.contains(&new_id)
                        || matches!(self.store.exists(&new_id), Ok(true));
                    if !clash {
                        break;
                    }
                    new_id = TaskRecord::generate_id();
                }
                task.id = new_id.clone();
                task.context
                    .insert("importedFrom".to_string(), Value::String(original.clone()));
                if !options.dry_run {
                    if let Err(e) = self.store.create(&task) {
                        record_failure(result, line_no, &original, &e);
                        return;
                    }
                }
                seen_new.insert(new_id.clone());
                result.imported += 1;
                result.warnings.push(format!(
                    "line {line_no}: id '{original}' already exists; imported as '{new_id}'"
                ));
            }
        }
    }
}

/// Field-level merge of two records sharing an id.
///
/// The more recently updated side supplies title, description, status,
/// priority, and `completed_at`. Assignee, due date, and the hour fields
/// take the incoming value whenever it is set and keep the existing one
/// otherwise, independent of recency. Tags and edges are unioned, existing
/// order first. Context keys merge shallowly with incoming values winning,
/// and a `mergedFrom` entry records both timestamps for audit.
pub fn merge_records(existing: &TaskRecord, incoming: &TaskRecord) -> TaskRecord {
    let newer = if incoming.updated_at > existing.updated_at {
        incoming
    } else {
        existing
    };

    let mut context = existing.context.clone();
    for (key, value) in &incoming.context {
        context.insert(key.clone(), value.clone());
    }
    context.insert(
        "mergedFrom".to_string(),
        json!({
            "existingUpdatedAt": existing.updated_at.to_rfc3339(),
            "incomingUpdatedAt": incoming.updated_at.to_rfc3339(),
            "mergedAt": Utc::now().to_rfc3339(),
        }),
    );

    TaskRecord {
        id: existing.id.clone(),
        title: newer.title.clone(),
        description: newer.description.clone(),
        status: newer.status,
        priority: newer.priority,
        tags: union(&existing.tags, &incoming.tags),
        depends_on: union(&existing.depends_on, &incoming.depends_on)
            .into_iter()
            .filter(|dep| dep != &existing.id)
            .collect(),
        blocks: union(&existing.blocks, &incoming.blocks),
        assignee: incoming
            .assignee
            .clone()
            .or_else(|| existing.assignee.clone()),
        created_at: existing.created_at,
        updated_at: existing.updated_at.max(incoming.updated_at),
        completed_at: newer.completed_at,
        due_date: incoming.due_date.or(existing.due_date),
        estimated_hours: incoming.estimated_hours.or(existing.estimated_hours),
        actual_hours: incoming.actual_hours.or(existing.actual_hours),
        context,
    }
}

/// Parse and validate a file without touching any store.
pub fn validate_import_file<P: AsRef<Path>>(path: P) -> Result<FileValidation> {
    let (entries, metadata) = read_file(path.as_ref())?;

    let mut validation = FileValidation {
        valid: true,
        total_records: 0,
        valid_records: 0,
        invalid_records: 0,
        errors: Vec::new(),
        warnings: Vec::new(),
        metadata,
    };

    for entry in entries {
        validation.total_records += 1;
        match entry.task {
            Ok(task) => {
                let report = validate(&task, false);
                for warning in &report.warnings {
                    validation
                        .warnings
                        .push(format!("line {}: {}: {warning}", entry.line_no, task.id));
                }
                if report.is_valid {
                    validation.valid_records += 1;
                } else {
                    validation.invalid_records += 1;
                    for issue in &report.errors {
                        validation.errors.push(format!(
                            "line {}: {}: {}: {}",
                            entry.line_no, task.id, issue.field, issue.message
                        ));
                    }
                }
            }
            Err(message) => {
                validation.invalid_records += 1;
                validation.errors.push(message);
            }
        }
    }

    validation.valid = validation.invalid_records == 0;
    Ok(validation)
}

/// Peek at a file: record counts, status and priority distributions, and the
/// first `max_tasks` records.
pub fn import_preview<P: AsRef<Path>>(path: P, max_tasks: usize) -> Result<ImportPreview> {
    let (entries, metadata) = read_file(path.as_ref())?;

    let mut preview = ImportPreview {
        total_records: 0,
        parse_errors: 0,
        status_counts: HashMap::new(),
        priority_counts: HashMap::new(),
        assignee_counts: HashMap::new(),
        sample: Vec::new(),
        metadata,
    };

    for entry in entries {
        preview.total_records += 1;
        match entry.task {
            Ok(task) => {
                *preview.status_counts.entry(task.status).or_insert(0) += 1;
                *preview.priority_counts.entry(task.priority).or_insert(0) += 1;
                if let Some(assignee) = &task.assignee {
                    *preview.assignee_counts.entry(assignee.clone()).or_insert(0) += 1;
                }
                if preview.sample.len() < max_tasks {
                    preview.sample.push(task);
                }
            }
            Err(_) => preview.parse_errors += 1,
        }
    }

    Ok(preview)
}

fn read_file(path: &Path) -> Result<(Vec<RawEntry>, Option<ExportMetadata>)> {
    let text = read_to_text(path)?;

    let mut entries = Vec::new();
    let mut metadata = None;
    let mut saw_record = false;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                entries.push(RawEntry {
                    line_no,
                    task: Err(format!("line {line_no}: invalid JSON: {e}")),
                });
                continue;
            }
        };

        // The envelope may only lead the file; anything later claiming to be
        // one is treated as a record.
        if !saw_record
            && metadata.is_none()
            && value.get("id").is_none()
            && value.get("metadata").is_some()
        {
            if let Ok(parsed) = serde_json::from_value::<ExportMetadata>(value["metadata"].clone())
            {
                metadata = Some(parsed);
            }
            continue;
        }

        saw_record = true;
        match serde_json::from_value::<TaskRecord>(value) {
            Ok(task) => entries.push(RawEntry {
                line_no,
                task: Ok(task),
            }),
            Err(e) => entries.push(RawEntry {
                line_no,
                task: Err(format!("line {line_no}: {e}")),
            }),
        }
    }

    Ok((entries, metadata))
}

fn read_to_text(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(import_err(path))?;
    let mut text = String::new();
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        GzDecoder::new(file)
            .read_to_string(&mut text)
            .map_err(import_err(path))?;
    } else {
        BufReader::new(file)
            .read_to_string(&mut text)
            .map_err(import_err(path))?;
    }
    Ok(text)
}

fn import_err(path: &Path) -> impl Fn(io::Error) -> Error + '_ {
    move |source| Error::Import {
        path: path.to_path_buf(),
        source,
    }
}

fn record_failure(result: &mut ImportResult, line_no: usize, id: &str, err: &dyn fmt::Display) {
    result.failed += 1;
    result.errors.push(format!("line {line_no}: {id}: {err}"));
}

fn union(base: &[String], extra: &[String]) -> Vec<String> {
    let mut out: Vec<String> = base.to_vec();
    for item in extra {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}
