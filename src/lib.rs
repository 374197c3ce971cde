//! # taskdag - project-embedded task tracking
//!
//! Task records live in a SQLite file inside the project tree and travel
//! between clones as JSONL, so the task list syncs through git alongside the
//! code. Dependencies form a directed graph that answers what is ready, what
//! is blocked, and what a slip would knock over.

pub mod error;
pub mod export;
pub mod graph;
pub mod import;
pub mod model;
pub mod store;
pub mod validate;

// Re-export commonly used types
pub use error::{Error, Result};
pub use export::{ExportFilter, ExportOptions, Exporter};
pub use graph::DependencyGraph;
pub use import::{ConflictResolution, ImportOptions, Importer};
pub use model::{TaskPriority, TaskRecord, TaskStatus};
pub use store::{ListFilter, TaskStore};
