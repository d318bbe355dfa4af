pub mod sqlite_catalog_repository;
pub mod sqlite_task_log_repository;
pub mod sqlite_task_repository;

pub use sqlite_catalog_repository::{SqliteStudentRepository, SqliteTemplateRepository};
pub use sqlite_task_log_repository::SqliteTaskLogRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
