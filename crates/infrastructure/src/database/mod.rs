pub mod manager;
pub mod mapping;
pub mod migrations;
pub mod postgres;
pub mod sqlite;
pub mod task_query_builder;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType, PoolSettings};
pub use postgres::{
    PostgresStudentRepository, PostgresTaskLogRepository, PostgresTaskRepository,
    PostgresTemplateRepository,
};
pub use sqlite::{
    SqliteStudentRepository, SqliteTaskLogRepository, SqliteTaskRepository,
    SqliteTemplateRepository,
};
