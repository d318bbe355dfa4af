pub mod database;
pub mod error_handling;
pub mod observability;
pub mod timeout_handler;

pub use database::*;
pub use observability::*;
pub use timeout_handler::{TimeoutConfig, TimeoutHandler};
