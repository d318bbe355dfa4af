pub mod app_config;
pub mod database;
pub mod engine;
pub mod observability;

pub use app_config::*;
pub use database::*;
pub use engine::*;
pub use observability::*;
