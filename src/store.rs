//! SQLite-backed task storage.
//!
//! One store maps to one database file, by convention
//! `.taskdag/tasks.db` under a project root. Records own their outgoing
//! dependency edges; the `blocks` side is derived from the edge table when a
//! record is read. Edges may name ids that have no row, so a half-synced
//! clone still round-trips.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::model::{TaskPriority, TaskRecord, TaskStatus};

/// Directory created under a project root to hold the database.
pub const DEFAULT_DIR: &str = ".taskdag";
/// Database file name inside [`DEFAULT_DIR`].
pub const DEFAULT_DB_FILE: &str = "tasks.db";

const TASK_COLUMNS: &str = "id, title, description, status, priority, tags, assignee, \
     created_at, updated_at, completed_at, due_date, estimated_hours, actual_hours, context";

/// Filters for [`TaskStore::list`]. Empty filter means everything.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<TaskStatus>,
    pub assignee: Option<String>,
    /// Keep tasks carrying at least one of these tags.
    pub tags: Vec<String>,
}

/// Aggregate numbers about a store.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub total: usize,
    pub by_status: HashMap<TaskStatus, usize>,
    pub dependency_count: usize,
    pub disk_size_bytes: u64,
}

/// Database handle. All writes go through `&mut self`, so one store value
/// is one writer.
pub struct TaskStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl TaskStore {
    /// Open (or create) a store at the given file path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "opening task store");
        let conn = Connection::open(&path)?;

        // WAL keeps readers unblocked while a writer holds the database.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        let store = TaskStore {
            conn,
            path: Some(path),
        };
        store.create_tables()?;
        store.create_indexes()?;
        Ok(store)
    }

    /// Open the conventional store under a project root, creating
    /// `<root>/.taskdag/` if needed.
    pub fn open_default<P: AsRef<Path>>(root: P) -> Result<Self> {
        let dir = root.as_ref().join(DEFAULT_DIR);
        fs::create_dir_all(&dir)?;
        Self::open(dir.join(DEFAULT_DB_FILE))
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = TaskStore { conn, path: None };
        store.create_tables()?;
        store.create_indexes()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id              TEXT PRIMARY KEY,
                title           TEXT NOT NULL,
                description     TEXT,
                status          TEXT NOT NULL DEFAULT 'todo',
                priority        TEXT NOT NULL DEFAULT 'medium',
                tags            TEXT NOT NULL DEFAULT '[]',
                assignee        TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                completed_at    TEXT,
                due_date        TEXT,
                estimated_hours REAL,
                actual_hours    REAL,
                context         TEXT NOT NULL DEFAULT '{}'
            )",
            [],
        )?;

        // No foreign keys on purpose: an edge may point at an id whose row
        // has not arrived yet.
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS task_dependencies (
                task_id       TEXT NOT NULL,
                depends_on_id TEXT NOT NULL,
                PRIMARY KEY (task_id, depends_on_id),
                CHECK (task_id != depends_on_id)
            )",
            [],
        )?;

        Ok(())
    }

    fn create_indexes(&self) -> Result<()> {
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_deps_task_id ON task_dependencies(task_id)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_deps_depends_on_id ON task_dependencies(depends_on_id)",
            [],
        )?;
        Ok(())
    }

    // ==================== Task Operations ====================

    /// Insert a record exactly as given, timestamps included. The record's
    /// `blocks` list is ignored; that side is derived on read.
    pub fn create(&mut self, task: &TaskRecord) -> Result<()> {
        if self.exists(&task.id)? {
            return Err(Error::DuplicateTask(task.id.clone()));
        }

        let tags_json = serde_json::to_string(&task.tags)?;
        let context_json = serde_json::to_string(&task.context)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO tasks (id, title, description, status, priority, tags, assignee,
                                created_at, updated_at, completed_at, due_date,
                                estimated_hours, actual_hours, context)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            rusqlite::params![
                task.id,
                task.title,
                task.description,
                task.status.as_str(),
                task.priority.as_str(),
                tags_json,
                task.assignee,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
                task.completed_at.map(|d| d.to_rfc3339()),
                task.due_date.map(|d| d.to_rfc3339()),
                task.estimated_hours,
                task.actual_hours,
                context_json,
            ],
        )?;
        insert_edges(&tx, &task.id, &task.depends_on)?;
        tx.commit()?;

        debug!(task_id = %task.id, "created task");
        Ok(())
    }

    /// Fetch one record with both edge directions materialized.
    pub fn get(&self, id: &str) -> Result<Option<TaskRecord>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let task = self
            .conn
            .query_row(&sql, [id], task_from_row)
            .optional()?;
        match task {
            Some(mut task) => {
                self.load_edges(&mut task)?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Replace a record's fields and outgoing edges. `updated_at` is stamped
    /// with the current time regardless of the value passed in; `created_at`
    /// and incoming edges are left alone.
    pub fn update(&mut self, task: &TaskRecord) -> Result<TaskRecord> {
        if !self.exists(&task.id)? {
            return Err(Error::TaskNotFound(task.id.clone()));
        }

        let tags_json = serde_json::to_string(&task.tags)?;
        let context_json = serde_json::to_string(&task.context)?;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE tasks
             SET title = ?2, description = ?3, status = ?4, priority = ?5, tags = ?6,
                 assignee = ?7, updated_at = ?8, completed_at = ?9, due_date = ?10,
                 estimated_hours = ?11, actual_hours = ?12, context = ?13
             WHERE id = ?1",
            rusqlite::params![
                task.id,
                task.title,
                task.description,
                task.status.as_str(),
                task.priority.as_str(),
                tags_json,
                task.assignee,
                now,
                task.completed_at.map(|d| d.to_rfc3339()),
                task.due_date.map(|d| d.to_rfc3339()),
                task.estimated_hours,
                task.actual_hours,
                context_json,
            ],
        )?;
        tx.execute(
            "DELETE FROM task_dependencies WHERE task_id = ?1",
            [task.id.as_str()],
        )?;
        insert_edges(&tx, &task.id, &task.depends_on)?;
        tx.commit()?;

        self.get(&task.id)?
            .ok_or_else(|| Error::TaskNotFound(task.id.clone()))
    }

    /// Create or replace a record with exactly the given field values,
    /// timestamps included. Sync paths use this so applying remote data does
    /// not re-stamp `updated_at` and bounce the record back out on the next
    /// incremental export.
    pub fn upsert(&mut self, task: &TaskRecord) -> Result<()> {
        let tags_json = serde_json::to_string(&task.tags)?;
        let context_json = serde_json::to_string(&task.context)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO tasks (id, title, description, status, priority, tags, assignee,
                                created_at, updated_at, completed_at, due_date,
                                estimated_hours, actual_hours, context)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 description = excluded.description,
                 status = excluded.status,
                 priority = excluded.priority,
                 tags = excluded.tags,
                 assignee = excluded.assignee,
                 created_at = excluded.created_at,
                 updated_at = excluded.updated_at,
                 completed_at = excluded.completed_at,
                 due_date = excluded.due_date,
                 estimated_hours = excluded.estimated_hours,
                 actual_hours = excluded.actual_hours,
                 context = excluded.context",
            rusqlite::params![
                task.id,
                task.title,
                task.description,
                task.status.as_str(),
                task.priority.as_str(),
                tags_json,
                task.assignee,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
                task.completed_at.map(|d| d.to_rfc3339()),
                task.due_date.map(|d| d.to_rfc3339()),
                task.estimated_hours,
                task.actual_hours,
                context_json,
            ],
        )?;
        tx.execute(
            "DELETE FROM task_dependencies WHERE task_id = ?1",
            [task.id.as_str()],
        )?;
        insert_edges(&tx, &task.id, &task.depends_on)?;
        tx.commit()?;
        Ok(())
    }

    /// Remove a record and every edge touching it, in either direction.
    /// Returns false when the id had no row.
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM task_dependencies WHERE task_id = ?1 OR depends_on_id = ?1",
            [id],
        )?;
        let rows = tx.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        tx.commit()?;

        if rows > 0 {
            debug!(task_id = %id, "deleted task");
        }
        Ok(rows > 0)
    }

    /// List records newest first, optionally filtered. Status and assignee
    /// filter in SQL; the tag filter keeps rows carrying at least one of the
    /// requested tags.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<TaskRecord>> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks");
        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            clauses.push("status = ?");
            params.push(status.as_str().to_string());
        }
        if let Some(assignee) = &filter.assignee {
            clauses.push("assignee = ?");
            params.push(assignee.clone());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), task_from_row)?;
        let mut tasks = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        if !filter.tags.is_empty() {
            tasks.retain(|t| filter.tags.iter().any(|tag| t.tags.contains(tag)));
        }

        for task in &mut tasks {
            self.load_edges(task)?;
        }
        Ok(tasks)
    }

    /// Tasks in `todo` whose dependencies are all done. A dependency without
    /// a row never counts as done. Ordered by priority, then age.
    pub fn ready_tasks(&self) -> Result<Vec<TaskRecord>> {
        self.readiness_query(false)
    }

    /// Tasks in `todo` held back by at least one unfinished or missing
    /// dependency. Ordered like [`ready_tasks`](Self::ready_tasks).
    pub fn blocked_tasks(&self) -> Result<Vec<TaskRecord>> {
        self.readiness_query(true)
    }

    fn readiness_query(&self, blocked: bool) -> Result<Vec<TaskRecord>> {
        let quantifier = if blocked { "EXISTS" } else { "NOT EXISTS" };
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE status = 'todo'
               AND {quantifier} (
                   SELECT 1 FROM task_dependencies d
                   LEFT JOIN tasks dt ON dt.id = d.depends_on_id
                   WHERE d.task_id = tasks.id
                     AND (dt.id IS NULL OR dt.status != 'done')
               )
             ORDER BY CASE priority
                 WHEN 'urgent' THEN 0
                 WHEN 'high' THEN 1
                 WHEN 'medium' THEN 2
                 ELSE 3
             END, created_at, id"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], task_from_row)?;
        let mut tasks = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        for task in &mut tasks {
            self.load_edges(task)?;
        }
        Ok(tasks)
    }

    /// True if a row with this id exists.
    pub fn exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM tasks WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Number of stored tasks.
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // ==================== Dependency Operations ====================

    /// Record that `task_id` depends on `depends_on_id`. The dependency id
    /// does not need a row. Returns false when the edge already exists.
    pub fn add_dependency(&mut self, task_id: &str, depends_on_id: &str) -> Result<bool> {
        if !self.exists(task_id)? {
            return Err(Error::TaskNotFound(task_id.to_string()));
        }
        if task_id == depends_on_id {
            return Err(Error::SelfDependency(task_id.to_string()));
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let rows = tx.execute(
            "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id) VALUES (?1, ?2)",
            (task_id, depends_on_id),
        )?;
        if rows > 0 {
            tx.execute(
                "UPDATE tasks SET updated_at = ?1 WHERE id = ?2",
                (&now, task_id),
            )?;
        }
        tx.commit()?;
        Ok(rows > 0)
    }

    /// Drop one edge. Returns false when it was not there.
    pub fn remove_dependency(&mut self, task_id: &str, depends_on_id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let rows = tx.execute(
            "DELETE FROM task_dependencies WHERE task_id = ?1 AND depends_on_id = ?2",
            (task_id, depends_on_id),
        )?;
        if rows > 0 {
            tx.execute(
                "UPDATE tasks SET updated_at = ?1 WHERE id = ?2",
                (&now, task_id),
            )?;
        }
        tx.commit()?;
        Ok(rows > 0)
    }

    // ==================== Convenience Mutations ====================

    /// Move a task to a new status. Entering `done` stamps `completed_at`;
    /// leaving it clears the stamp.
    pub fn set_status(&mut self, id: &str, status: TaskStatus) -> Result<TaskRecord> {
        let now = Utc::now().to_rfc3339();
        let rows = if status == TaskStatus::Done {
            self.conn.execute(
                "UPDATE tasks SET status = ?1, completed_at = ?2, updated_at = ?2 WHERE id = ?3",
                (status.as_str(), &now, id),
            )?
        } else {
            self.conn.execute(
                "UPDATE tasks SET status = ?1, completed_at = NULL, updated_at = ?2 WHERE id = ?3",
                (status.as_str(), &now, id),
            )?
        };
        if rows == 0 {
            return Err(Error::TaskNotFound(id.to_string()));
        }
        self.get(id)?
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    /// Append a tag. Returns false when the exact tag is already present.
    pub fn add_tag(&mut self, id: &str, tag: &str) -> Result<bool> {
        let mut task = self
            .get(id)?
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        if !task.add_tag(tag) {
            return Ok(false);
        }
        let tags_json = serde_json::to_string(&task.tags)?;
        self.conn.execute(
            "UPDATE tasks SET tags = ?1, updated_at = ?2 WHERE id = ?3",
            (&tags_json, task.updated_at.to_rfc3339(), id),
        )?;
        Ok(true)
    }

    // ==================== Analysis ====================

    /// Snapshot every task into a [`DependencyGraph`] for analysis.
    pub fn dependency_graph(&self) -> Result<DependencyGraph> {
        let tasks = self.list(&ListFilter::default())?;
        Ok(DependencyGraph::new(&tasks))
    }

    /// Aggregate counts plus the approximate on-disk size. In-memory stores
    /// report the page-backed size instead.
    pub fn stats(&self) -> Result<StoreStats> {
        let total = self.count()?;

        let mut by_status: HashMap<TaskStatus, usize> = HashMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, n) = row?;
            by_status.insert(TaskStatus::parse(&status)?, n as usize);
        }

        let dependency_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM task_dependencies",
            [],
            |row| row.get(0),
        )?;

        let disk_size_bytes = match &self.path {
            Some(path) => fs::metadata(path)?.len(),
            None => {
                let pages: i64 =
                    self.conn
                        .query_row("PRAGMA page_count", [], |row| row.get(0))?;
                let page_size: i64 =
                    self.conn
                        .query_row("PRAGMA page_size", [], |row| row.get(0))?;
                (pages * page_size) as u64
            }
        };

        Ok(StoreStats {
            total,
            by_status,
            dependency_count: dependency_count as usize,
            disk_size_bytes,
        })
    }

    fn load_edges(&self, task: &mut TaskRecord) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT depends_on_id FROM task_dependencies WHERE task_id = ?1 ORDER BY rowid",
        )?;
        let deps = stmt.query_map([task.id.as_str()], |row| row.get::<_, String>(0))?;
        task.depends_on = deps.collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT task_id FROM task_dependencies WHERE depends_on_id = ?1 ORDER BY rowid",
        )?;
        let blocks = stmt.query_map([task.id.as_str()], |row| row.get::<_, String>(0))?;
        task.blocks = blocks.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(())
    }
}

fn insert_edges(tx: &rusqlite::Transaction<'_>, task_id: &str, deps: &[String]) -> Result<()> {
    let mut seen: Vec<&str> = Vec::new();
    for dep in deps {
        if seen.contains(&dep.as_str()) {
            continue;
        }
        seen.push(dep.as_str());
        tx.execute(
            "INSERT INTO task_dependencies (task_id, depends_on_id) VALUES (?1, ?2)",
            (task_id, dep),
        )?;
    }
    Ok(())
}

// ==================== Row Parsers ====================

fn task_from_row(row: &Row) -> std::result::Result<TaskRecord, rusqlite::Error> {
    let status_str: String = row.get(3)?;
    let status = TaskStatus::parse(&status_str).map_err(|e| conversion_err(3, e))?;
    let priority_str: String = row.get(4)?;
    let priority = TaskPriority::parse(&priority_str).map_err(|e| conversion_err(4, e))?;
    let tags_json: String = row.get(5)?;
    let tags: Vec<String> =
        serde_json::from_str(&tags_json).map_err(|e| conversion_err(5, e))?;
    let context_json: String = row.get(13)?;
    let context: Map<String, Value> =
        serde_json::from_str(&context_json).map_err(|e| conversion_err(13, e))?;

    Ok(TaskRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status,
        priority,
        tags,
        depends_on: Vec::new(),
        blocks: Vec::new(),
        assignee: row.get(6)?,
        created_at: parse_datetime(row.get(7)?)?,
        updated_at: parse_datetime(row.get(8)?)?,
        completed_at: row
            .get::<_, Option<String>>(9)?
            .map(parse_datetime)
            .transpose()?,
        due_date: row
            .get::<_, Option<String>>(10)?
            .map(parse_datetime)
            .transpose()?,
        estimated_hours: row.get(11)?,
        actual_hours: row.get(12)?,
        context,
    })
}

fn parse_datetime(s: String) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Naive fallbacks for rows written by other tooling.
    if let Ok(ndt) = NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(DateTime::from_naive_utc_and_offset(ndt, Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::from_naive_utc_and_offset(ndt, Utc));
    }
    Err(rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("cannot parse datetime: {s}"),
        )),
    ))
}

fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    fn task(id: &str) -> TaskRecord {
        TaskRecord::new(id, format!("Task {id}"))
    }

    fn store() -> TaskStore {
        TaskStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_create_and_get_round_trip() {
        let mut store = store();
        let mut t = task("t1");
        t.description = Some("longer form".into());
        t.priority = TaskPriority::High;
        t.tags = vec!["infra".into(), "backend".into()];
        t.assignee = Some("ada".into());
        t.estimated_hours = Some(2.5);
        t.actual_hours = Some(3.25);
        t.due_date = Some(Utc::now() + Duration::days(7));
        t.context.insert("sprint".into(), json!(12));
        t.add_dependency("t0");
        store.create(&t).unwrap();

        let got = store.get("t1").unwrap().unwrap();
        assert_eq!(got.title, t.title);
        assert_eq!(got.description, t.description);
        assert_eq!(got.priority, TaskPriority::High);
        assert_eq!(got.tags, t.tags);
        assert_eq!(got.assignee, t.assignee);
        assert_eq!(got.estimated_hours, Some(2.5));
        assert_eq!(got.actual_hours, Some(3.25));
        assert_eq!(got.created_at, t.created_at);
        assert_eq!(got.updated_at, t.updated_at);
        assert_eq!(got.due_date, t.due_date);
        assert_eq!(got.context, t.context);
        assert_eq!(got.depends_on, vec!["t0".to_string()]);
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let mut store = store();
        store.create(&task("t1")).unwrap();
        assert!(matches!(
            store.create(&task("t1")),
            Err(Error::DuplicateTask(_))
        ));
    }

    #[test]
    fn test_get_missing_is_none() {
        let store = store();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_blocks_side_is_derived() {
        let mut store = store();
        store.create(&task("a")).unwrap();
        let mut b = task("b");
        b.add_dependency("a");
        store.create(&b).unwrap();

        let a = store.get("a").unwrap().unwrap();
        assert_eq!(a.blocks, vec!["b".to_string()]);
        assert!(a.depends_on.is_empty());
    }

    #[test]
    fn test_update_stamps_updated_at_and_replaces_edges() {
        let mut store = store();
        store.create(&task("a")).unwrap();
        store.create(&task("b")).unwrap();
        let mut t = task("t1");
        t.add_dependency("a");
        store.create(&t).unwrap();
        let before = store.get("t1").unwrap().unwrap();

        let mut changed = before.clone();
        changed.title = "renamed".into();
        changed.depends_on = vec!["b".into()];
        let after = store.update(&changed).unwrap();

        assert_eq!(after.title, "renamed");
        assert_eq!(after.depends_on, vec!["b".to_string()]);
        assert!(after.updated_at > before.updated_at);
        assert_eq!(after.created_at, before.created_at);
    }

    #[test]
    fn test_update_unknown_task() {
        let mut store = store();
        assert!(matches!(
            store.update(&task("ghost")),
            Err(Error::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_upsert_inserts_then_replaces_verbatim() {
        let mut store = store();
        let mut t = task("t1");
        store.upsert(&t).unwrap();
        assert_eq!(store.count().unwrap(), 1);

        t.title = "replaced".into();
        t.updated_at = Utc::now() + Duration::hours(1);
        t.depends_on = vec!["other".into()];
        store.upsert(&t).unwrap();

        let got = store.get("t1").unwrap().unwrap();
        assert_eq!(got.title, "replaced");
        assert_eq!(got.updated_at, t.updated_at);
        assert_eq!(got.depends_on, vec!["other".to_string()]);
    }

    #[test]
    fn test_delete_removes_edges_both_directions() {
        let mut store = store();
        store.create(&task("a")).unwrap();
        let mut b = task("b");
        b.add_dependency("a");
        store.create(&b).unwrap();

        assert!(store.delete("a").unwrap());
        let b = store.get("b").unwrap().unwrap();
        assert!(b.depends_on.is_empty());
        assert!(!store.delete("a").unwrap());
    }

    #[test]
    fn test_list_filters() {
        let mut store = store();
        let mut a = task("a");
        a.assignee = Some("ada".into());
        a.tags = vec!["infra".into()];
        store.create(&a).unwrap();
        let mut b = task("b");
        b.assignee = Some("grace".into());
        b.tags = vec!["ui".into()];
        store.create(&b).unwrap();
        store.set_status("b", TaskStatus::Doing).unwrap();

        let all = store.list(&ListFilter::default()).unwrap();
        assert_eq!(all.len(), 2);

        let doing = store
            .list(&ListFilter {
                status: Some(TaskStatus::Doing),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(doing.len(), 1);
        assert_eq!(doing[0].id, "b");

        let adas = store
            .list(&ListFilter {
                assignee: Some("ada".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(adas.len(), 1);
        assert_eq!(adas[0].id, "a");

        let tagged = store
            .list(&ListFilter {
                tags: vec!["ui".into(), "docs".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].id, "b");
    }

    #[test]
    fn test_list_newest_first() {
        let mut store = store();
        let base = Utc::now();
        for (i, id) in ["old", "mid", "new"].iter().enumerate() {
            let mut t = task(id);
            t.created_at = base + Duration::minutes(i as i64);
            store.create(&t).unwrap();
        }
        let ids: Vec<String> = store
            .list(&ListFilter::default())
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_ready_and_blocked() {
        let mut store = store();
        store.create(&task("a")).unwrap();
        let mut b = task("b");
        b.add_dependency("a");
        store.create(&b).unwrap();
        let mut c = task("c");
        c.add_dependency("ghost");
        store.create(&c).unwrap();

        let ready: Vec<String> = store
            .ready_tasks()
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ready, vec!["a"]);

        let blocked: Vec<String> = store
            .blocked_tasks()
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(blocked, vec!["b", "c"]);

        store.set_status("a", TaskStatus::Done).unwrap();
        let ready: Vec<String> = store
            .ready_tasks()
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[test]
    fn test_ready_ordering() {
        let mut store = store();
        let base = Utc::now();
        let mut low = task("low");
        low.priority = TaskPriority::Low;
        low.created_at = base;
        let mut urgent_new = task("urgent-new");
        urgent_new.priority = TaskPriority::Urgent;
        urgent_new.created_at = base + Duration::minutes(1);
        let mut urgent_old = task("urgent-old");
        urgent_old.priority = TaskPriority::Urgent;
        urgent_old.created_at = base;
        store.create(&low).unwrap();
        store.create(&urgent_new).unwrap();
        store.create(&urgent_old).unwrap();

        let ready: Vec<String> = store
            .ready_tasks()
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ready, vec!["urgent-old", "urgent-new", "low"]);
    }

    #[test]
    fn test_add_dependency() {
        let mut store = store();
        store.create(&task("a")).unwrap();
        store.create(&task("b")).unwrap();

        assert!(store.add_dependency("b", "a").unwrap());
        assert!(!store.add_dependency("b", "a").unwrap());
        assert!(store.add_dependency("b", "ghost").unwrap());
        assert!(matches!(
            store.add_dependency("nope", "a"),
            Err(Error::TaskNotFound(_))
        ));
        assert!(matches!(
            store.add_dependency("a", "a"),
            Err(Error::SelfDependency(_))
        ));

        let b = store.get("b").unwrap().unwrap();
        assert_eq!(b.depends_on, vec!["a".to_string(), "ghost".to_string()]);
    }

    #[test]
    fn test_remove_dependency() {
        let mut store = store();
        store.create(&task("a")).unwrap();
        let mut b = task("b");
        b.add_dependency("a");
        store.create(&b).unwrap();

        assert!(store.remove_dependency("b", "a").unwrap());
        assert!(!store.remove_dependency("b", "a").unwrap());
        assert!(store.get("b").unwrap().unwrap().depends_on.is_empty());
    }

    #[test]
    fn test_set_status_pairs_completed_at() {
        let mut store = store();
        store.create(&task("a")).unwrap();

        let done = store.set_status("a", TaskStatus::Done).unwrap();
        assert!(done.completed_at.is_some());

        let reopened = store.set_status("a", TaskStatus::Doing).unwrap();
        assert!(reopened.completed_at.is_none());

        assert!(matches!(
            store.set_status("ghost", TaskStatus::Done),
            Err(Error::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_add_tag() {
        let mut store = store();
        store.create(&task("a")).unwrap();
        assert!(store.add_tag("a", "infra").unwrap());
        assert!(!store.add_tag("a", "infra").unwrap());
        assert_eq!(
            store.get("a").unwrap().unwrap().tags,
            vec!["infra".to_string()]
        );
    }

    #[test]
    fn test_stats() {
        let mut store = store();
        store.create(&task("a")).unwrap();
        let mut b = task("b");
        b.add_dependency("a");
        store.create(&b).unwrap();
        store.set_status("a", TaskStatus::Done).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get(&TaskStatus::Done), Some(&1));
        assert_eq!(stats.by_status.get(&TaskStatus::Todo), Some(&1));
        assert_eq!(stats.dependency_count, 1);
        assert!(stats.disk_size_bytes > 0);
    }

    #[test]
    fn test_dependency_graph_snapshot() {
        let mut store = store();
        store.create(&task("a")).unwrap();
        let mut b = task("b");
        b.add_dependency("a");
        store.create(&b).unwrap();

        let graph = store.dependency_graph().unwrap();
        assert_eq!(graph.len(), 2);
        assert!(graph.detect_cycles().is_empty());
        assert_eq!(graph.blocking_tasks("b").unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.db");
        {
            let mut store = TaskStore::open(&path).unwrap();
            let mut t = task("t1");
            t.add_dependency("ghost");
            store.create(&t).unwrap();
        }
        let store = TaskStore::open(&path).unwrap();
        let t = store.get("t1").unwrap().unwrap();
        assert_eq!(t.depends_on, vec!["ghost".to_string()]);
    }

    #[test]
    fn test_open_default_creates_layout() {
        let dir = TempDir::new().unwrap();
        let _store = TaskStore::open_default(dir.path()).unwrap();
        assert!(dir.path().join(DEFAULT_DIR).join(DEFAULT_DB_FILE).exists());
    }
}
