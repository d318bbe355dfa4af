pub mod postgres_catalog_repository;
pub mod postgres_task_log_repository;
pub mod postgres_task_repository;

pub use postgres_catalog_repository::{PostgresStudentRepository, PostgresTemplateRepository};
pub use postgres_task_log_repository::PostgresTaskLogRepository;
pub use postgres_task_repository::PostgresTaskRepository;
