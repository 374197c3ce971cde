use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the task store and its pipelines.
#[derive(Error, Debug)]
pub enum Error {
    #[error("task '{0}' not found")]
    TaskNotFound(String),

    #[error("task '{0}' already exists")]
    DuplicateTask(String),

    #[error("task '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("dependency '{task_id}' -> '{depends_on_id}' already exists")]
    DependencyExists {
        task_id: String,
        depends_on_id: String,
    },

    #[error("dependency cycle: {path}", path = format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<String> },

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    #[error("export to {path} failed: {source}")]
    Export {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("import from {path} failed: {source}")]
    Import {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_cycle(path: &[String]) -> String {
    path.iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
